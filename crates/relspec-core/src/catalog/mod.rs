//! Module: catalog
//! Responsibility: loaded database self-description — types, operators,
//! casts, procedures, relations — and the process-wide caches over them.
//! Does not own: compatibility decisions (typecheck) or IR walking (check).
//!
//! Invariants:
//! - Catalog entities are immutable once loaded.
//! - The type/operator/cast/procedure snapshot is loaded once per source
//!   identity and shared; relations are loaded on demand and cached under
//!   their alias when given, else their bare name.
//! - A cache hit returns the same `Arc`; the underlying queries are not
//!   re-issued.


use crate::ident::RelId;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Arc, LazyLock, RwLock},
};
use thiserror::Error as ThisError;
use tracing::debug;

///
/// Well-known type oids of the catalog protocol.
///

pub mod oid {
    pub const BOOL: u32 = 16;
    pub const BYTEA: u32 = 17;
    pub const CHAR: u32 = 18;
    pub const NAME: u32 = 19;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
    pub const OID: u32 = 26;
    pub const JSON: u32 = 114;
    pub const XML: u32 = 142;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const UNKNOWN: u32 = 705;
    pub const BPCHAR: u32 = 1042;
    pub const VARCHAR: u32 = 1043;
    pub const DATE: u32 = 1082;
    pub const TIME: u32 = 1083;
    pub const TIMESTAMP: u32 = 1114;
    pub const TIMESTAMPTZ: u32 = 1184;
    pub const INTERVAL: u32 = 1186;
    pub const TIMETZ: u32 = 1266;
    pub const BIT: u32 = 1560;
    pub const VARBIT: u32 = 1562;
    pub const NUMERIC: u32 = 1700;
    pub const UUID: u32 = 2950;
    pub const JSONB: u32 = 3802;
    pub const TSVECTOR: u32 = 3614;
    pub const TSQUERY: u32 = 3615;

    pub const BOOL_ARR: u32 = 1000;
    pub const BYTEA_ARR: u32 = 1001;
    pub const CHAR_ARR: u32 = 1002;
    pub const NAME_ARR: u32 = 1003;
    pub const INT2_ARR: u32 = 1005;
    pub const INT4_ARR: u32 = 1007;
    pub const TEXT_ARR: u32 = 1009;
    pub const BPCHAR_ARR: u32 = 1014;
    pub const VARCHAR_ARR: u32 = 1015;
    pub const INT8_ARR: u32 = 1016;
    pub const FLOAT4_ARR: u32 = 1021;
    pub const FLOAT8_ARR: u32 = 1022;
    pub const DATE_ARR: u32 = 1182;
    pub const TIMESTAMP_ARR: u32 = 1115;
    pub const TIMESTAMPTZ_ARR: u32 = 1185;
    pub const NUMERIC_ARR: u32 = 1231;
    pub const UUID_ARR: u32 = 2951;
    pub const JSON_ARR: u32 = 199;
    pub const JSONB_ARR: u32 = 3807;
    pub const XML_ARR: u32 = 143;
}

///
/// Type category letters of the catalog protocol.
///

pub mod category {
    pub const ARRAY: char = 'A';
    pub const BOOLEAN: char = 'B';
    pub const COMPOSITE: char = 'C';
    pub const DATETIME: char = 'D';
    pub const NUMERIC: char = 'N';
    pub const STRING: char = 'S';
    pub const USER: char = 'U';
}

///
/// CatalogError
///
/// Loader-level failures. "Relation not found" is not an error at this
/// layer; `load_relation` reports it as `Ok(None)` and the checker raises
/// the structured type-check error.
///

#[derive(Clone, Debug, ThisError)]
pub enum CatalogError {
    #[error("catalog source error: {message}")]
    Source { message: String },

    #[error("catalog has no type with oid {oid}")]
    UnknownTypeOid { oid: u32 },
}

impl CatalogError {
    #[must_use]
    pub fn source(message: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
        }
    }
}

///
/// PgType
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PgType {
    pub oid: u32,
    pub name: String,
    /// `typtype` letter: base, composite, domain, enum, ...
    pub typtype: char,
    /// `typcategory` letter, see [`category`].
    pub category: char,
    /// Element type oid for array types, else 0.
    pub elem: u32,
}

impl PgType {
    #[must_use]
    pub const fn is_array(&self) -> bool {
        self.category == category::ARRAY && self.elem != 0
    }
}

///
/// Operator
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Operator {
    pub name: String,
    pub left: u32,
    pub right: u32,
    pub result: u32,
}

///
/// CastContext
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum CastContext {
    Explicit,
    Assignment,
    Implicit,
}

///
/// Cast
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Cast {
    pub source: u32,
    pub target: u32,
    pub context: CastContext,
}

///
/// Procedure
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Procedure {
    pub oid: u32,
    pub name: String,
    pub arg_types: Vec<u32>,
    pub ret: u32,
}

impl Procedure {
    /// The single argument oid of a one-argument procedure, if that is what
    /// this is.
    #[must_use]
    pub fn single_arg(&self) -> Option<u32> {
        match self.arg_types.as_slice() {
            [arg] => Some(*arg),
            _ => None,
        }
    }
}

///
/// CatalogSnapshot
///
/// The full type/operator/cast/procedure catalog of one source, loaded once
/// and shared.
///

#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    types: HashMap<u32, PgType>,
    operators: HashMap<(String, u32, u32), Operator>,
    casts: HashMap<(u32, u32), CastContext>,
    procs_by_name: HashMap<String, Vec<Procedure>>,
}

impl CatalogSnapshot {
    #[must_use]
    pub fn build(
        types: Vec<PgType>,
        operators: Vec<Operator>,
        casts: Vec<Cast>,
        procs: Vec<Procedure>,
    ) -> Self {
        let mut snapshot = Self::default();
        for ty in types {
            snapshot.types.insert(ty.oid, ty);
        }
        for op in operators {
            snapshot
                .operators
                .insert((op.name.clone(), op.left, op.right), op);
        }
        for cast in casts {
            snapshot.casts.insert((cast.source, cast.target), cast.context);
        }
        for proc in procs {
            snapshot
                .procs_by_name
                .entry(proc.name.clone())
                .or_default()
                .push(proc);
        }

        snapshot
    }

    #[must_use]
    pub fn type_by_oid(&self, oid: u32) -> Option<&PgType> {
        self.types.get(&oid)
    }

    /// Whether an operator `(name, left, right)` exists.
    #[must_use]
    pub fn has_operator(&self, name: &str, left: u32, right: u32) -> bool {
        self.operators
            .contains_key(&(name.to_string(), left, right))
    }

    /// The cast context between two type oids, if a cast exists.
    #[must_use]
    pub fn cast_context(&self, source: u32, target: u32) -> Option<CastContext> {
        self.casts.get(&(source, target)).copied()
    }

    #[must_use]
    pub fn procs_named(&self, name: &str) -> &[Procedure] {
        self.procs_by_name.get(name).map_or(&[], Vec::as_slice)
    }
}

///
/// Column
///

#[derive(Clone, Debug, Serialize)]
pub struct Column {
    /// Attribute number, 1-based.
    pub num: i16,
    pub name: String,
    pub type_oid: u32,
    /// Type modifier as stored; -1 when absent.
    pub type_mod: i32,
    /// Array dimensionality; 0 for scalars.
    pub ndims: i32,
    pub not_null: bool,
    pub has_default: bool,
    pub is_primary: bool,
    pub ty: PgType,
}

///
/// Constraint
///

#[derive(Clone, Debug, Serialize)]
pub struct Constraint {
    pub name: String,
    /// Constraint type letter: p, u, f, c, x.
    pub kind: char,
    pub deferrable: bool,
    pub deferred: bool,
    /// Key column attribute numbers.
    pub key: Vec<i16>,
}

///
/// Index
///

#[derive(Clone, Debug, Serialize)]
pub struct Index {
    pub name: String,
    /// Key column attribute numbers; 0 entries denote expression keys.
    pub key: Vec<i16>,
    pub is_unique: bool,
    pub is_primary: bool,
    pub is_exclusion: bool,
    /// Whether the index is ready for inserts (not mid-build).
    pub is_ready: bool,
    pub definition: String,
    /// Key expression list extracted from the definition.
    pub expression: String,
    /// Partial-index predicate extracted from the definition, if any.
    pub predicate: String,
}

///
/// Relation
///

#[derive(Clone, Debug, Serialize)]
pub struct Relation {
    pub oid: u32,
    pub schema: String,
    pub name: String,
    /// Relation kind letter: r, v, m, f, p.
    pub relkind: char,
    pub columns: Vec<Column>,
    pub constraints: Vec<Constraint>,
    pub indexes: Vec<Index>,
}

impl Relation {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    #[must_use]
    pub fn constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.name == name)
    }
}

///
/// Source row shapes, straight off the catalog queries.
///

#[derive(Clone, Debug)]
pub struct RelationRow {
    pub oid: u32,
    pub schema: String,
    pub name: String,
    pub relkind: char,
}

#[derive(Clone, Debug)]
pub struct ColumnRow {
    pub num: i16,
    pub name: String,
    pub type_oid: u32,
    pub type_mod: i32,
    pub ndims: i32,
    pub not_null: bool,
    pub has_default: bool,
    pub is_primary: bool,
}

#[derive(Clone, Debug)]
pub struct ConstraintRow {
    pub name: String,
    pub kind: char,
    pub deferrable: bool,
    pub deferred: bool,
    pub key: Vec<i16>,
}

#[derive(Clone, Debug)]
pub struct IndexRow {
    pub name: String,
    pub key: Vec<i16>,
    pub is_unique: bool,
    pub is_primary: bool,
    pub is_exclusion: bool,
    pub is_ready: bool,
    pub definition: String,
}

///
/// CatalogSource
///
/// The fixed external protocol of the catalog backend. An adapter over a
/// live server implements this; tests supply fixture sources.
///

pub trait CatalogSource: Send + Sync {
    /// Stable identity of the connection target; the snapshot cache key.
    fn identity(&self) -> String;

    /// Current database name, for diagnostics.
    fn database_name(&self) -> Result<String, CatalogError>;

    /// Server version string, for diagnostics.
    fn version(&self) -> Result<String, CatalogError>;

    fn types(&self) -> Result<Vec<PgType>, CatalogError>;
    fn operators(&self) -> Result<Vec<Operator>, CatalogError>;
    fn casts(&self) -> Result<Vec<Cast>, CatalogError>;
    fn procedures(&self) -> Result<Vec<Procedure>, CatalogError>;

    fn find_relation(&self, schema: &str, name: &str)
    -> Result<Option<RelationRow>, CatalogError>;
    fn relation_columns(&self, oid: u32) -> Result<Vec<ColumnRow>, CatalogError>;
    fn relation_constraints(&self, oid: u32) -> Result<Vec<ConstraintRow>, CatalogError>;
    fn relation_indexes(&self, oid: u32) -> Result<Vec<IndexRow>, CatalogError>;
}

///
/// CatalogCache
///
/// Get-or-load cache of catalog snapshots keyed by source identity.
/// Injected into `Catalog::open`; a process-wide default instance exists for
/// callers that do not need isolation.
///

#[derive(Debug, Default)]
pub struct CatalogCache {
    snapshots: RwLock<HashMap<String, Arc<CatalogSnapshot>>>,
}

static DEFAULT_CACHE: LazyLock<CatalogCache> = LazyLock::new(CatalogCache::default);

impl CatalogCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache instance.
    #[must_use]
    pub fn global() -> &'static Self {
        &DEFAULT_CACHE
    }

    /// Get or load the snapshot for a source.
    pub fn snapshot(&self, source: &dyn CatalogSource) -> Result<Arc<CatalogSnapshot>, CatalogError> {
        let key = source.identity();

        {
            let snapshots = self
                .snapshots
                .read()
                .expect("catalog cache lock poisoned while reading");
            if let Some(snapshot) = snapshots.get(&key) {
                return Ok(Arc::clone(snapshot));
            }
        }

        let snapshot = Arc::new(CatalogSnapshot::build(
            source.types()?,
            source.operators()?,
            source.casts()?,
            source.procedures()?,
        ));
        debug!(source = %key, "loaded catalog snapshot");

        let mut snapshots = self
            .snapshots
            .write()
            .expect("catalog cache lock poisoned while writing");

        // A racing loader may have won; keep the first-published snapshot so
        // all readers share one instance.
        Ok(Arc::clone(
            snapshots.entry(key).or_insert(snapshot),
        ))
    }
}

///
/// Catalog
///
/// One opened catalog: the shared snapshot plus on-demand relation loading.
///

pub struct Catalog {
    source: Arc<dyn CatalogSource>,
    pub database: String,
    pub version: String,
    pub snapshot: Arc<CatalogSnapshot>,
    relations: RwLock<HashMap<String, Arc<Relation>>>,
}

impl Catalog {
    /// Open a catalog over a source, sharing snapshots through `cache`.
    pub fn open(source: Arc<dyn CatalogSource>, cache: &CatalogCache) -> Result<Self, CatalogError> {
        let database = source.database_name()?;
        let version = source.version()?;
        let snapshot = cache.snapshot(&*source)?;

        Ok(Self {
            source,
            database,
            version,
            snapshot,
            relations: RwLock::new(HashMap::new()),
        })
    }

    /// Open using the process-wide snapshot cache.
    pub fn open_global(source: Arc<dyn CatalogSource>) -> Result<Self, CatalogError> {
        Self::open(source, CatalogCache::global())
    }

    /// Load (or fetch from cache) the relation a `RelId` names. The schema
    /// defaults to `public` when unqualified. Returns `Ok(None)` when the
    /// relation does not exist.
    pub fn load_relation(&self, id: &RelId) -> Result<Option<Arc<Relation>>, CatalogError> {
        let key = id.key().to_string();

        {
            let relations = self
                .relations
                .read()
                .expect("relation cache lock poisoned while reading");
            if let Some(rel) = relations.get(&key) {
                return Ok(Some(Arc::clone(rel)));
            }
        }

        let schema = if id.qual.is_empty() { "public" } else { &id.qual };
        let Some(row) = self.source.find_relation(schema, &id.name)? else {
            return Ok(None);
        };

        let columns = self
            .source
            .relation_columns(row.oid)?
            .into_iter()
            .map(|c| {
                let ty = self
                    .snapshot
                    .type_by_oid(c.type_oid)
                    .cloned()
                    .ok_or(CatalogError::UnknownTypeOid { oid: c.type_oid })?;

                Ok(Column {
                    num: c.num,
                    name: c.name,
                    type_oid: c.type_oid,
                    type_mod: c.type_mod,
                    ndims: c.ndims,
                    not_null: c.not_null,
                    has_default: c.has_default,
                    is_primary: c.is_primary,
                    ty,
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;

        let constraints = self
            .source
            .relation_constraints(row.oid)?
            .into_iter()
            .map(|c| Constraint {
                name: c.name,
                kind: c.kind,
                deferrable: c.deferrable,
                deferred: c.deferred,
                key: c.key,
            })
            .collect();

        let indexes = self
            .source
            .relation_indexes(row.oid)?
            .into_iter()
            .map(|i| {
                let (expression, predicate) = split_index_def(&i.definition);

                Index {
                    name: i.name,
                    key: i.key,
                    is_unique: i.is_unique,
                    is_primary: i.is_primary,
                    is_exclusion: i.is_exclusion,
                    is_ready: i.is_ready,
                    definition: i.definition,
                    expression,
                    predicate,
                }
            })
            .collect();

        let rel = Arc::new(Relation {
            oid: row.oid,
            schema: row.schema,
            name: row.name,
            relkind: row.relkind,
            columns,
            constraints,
            indexes,
        });
        debug!(relation = %id, oid = rel.oid, "loaded relation");

        let mut relations = self
            .relations
            .write()
            .expect("relation cache lock poisoned while writing");

        Ok(Some(Arc::clone(
            relations.entry(key).or_insert(rel),
        )))
    }
}

/// Extract the key-expression list and the optional partial-index predicate
/// out of a stored index definition. The expression is found by locating the
/// access-method clause and balancing parentheses while respecting
/// single-quoted literals.
#[must_use]
pub fn split_index_def(def: &str) -> (String, String) {
    let Some(using_at) = def.find(" USING ") else {
        return (String::new(), String::new());
    };
    let after_method = &def[using_at + " USING ".len()..];

    let Some(open_rel) = after_method.find('(') else {
        return (String::new(), String::new());
    };
    let body = &after_method[open_rel + 1..];

    let mut depth = 1usize;
    let mut in_quote = false;
    let mut end = None;
    for (i, c) in body.char_indices() {
        if in_quote {
            if c == '\'' {
                in_quote = false;
            }
            continue;
        }
        match c {
            '\'' => in_quote = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    let Some(end) = end else {
        return (String::new(), String::new());
    };

    let expression = body[..end].trim().to_string();

    let rest = &body[end + 1..];
    let predicate = rest
        .find(" WHERE ")
        .map(|at| rest[at + " WHERE ".len()..].trim().to_string())
        .unwrap_or_default();

    (expression, predicate)
}
