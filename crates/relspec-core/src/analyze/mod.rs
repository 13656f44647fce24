//! Module: analyze
//! Responsibility: depth-first interpretation of an annotated record type
//! into the unchecked IR — field classification, directive dispatch, the
//! where-tree builder, and the record-shape cache.
//! Does not own: catalog contact or type compatibility; the checker does
//! those against the IR built here.
//!
//! Invariants:
//! - Traversal uses an explicit LIFO stack of frames, not call recursion, so
//!   descending into a nested record suspends the parent frame at its exact
//!   field index and resumes it afterwards.
//! - At most one relation-binding field; at most one producer of the
//!   affected row set; at most one producer of the result slot.
//! - Sibling condition order and connectives are recorded exactly as
//!   declared.


use crate::{
    ident::{ColId, IdentError, RelId},
    ir::{
        BetweenBound, BetweenPredicate, ColumnList, ColumnOperand, ColumnPredicate, ConditionKind,
        ConflictAction, ConflictTarget, Connective, DataField, ErrorHandlerField, FieldEntry,
        FieldNode, FieldPredicate, FilterSpec, JoinCond, JoinItem, JoinKind, JoinSpec, LimitSpec,
        NullsPosition, OffsetSpec, OnConflictSpec, OrderByItem, OrderBySpec, OverrideKind,
        QueryKind, QuerySpec, RecordType, ResultField, RowsAffectedField, SearchCondition, Target,
        WhereSpec,
    },
    predicate::{Predicate, parse_predicate},
    reflect::{Directive, FieldDesc, TypeDesc, TypeKind},
};
use std::{
    collections::HashMap,
    sync::{LazyLock, RwLock},
};
use thiserror::Error as ThisError;
use tracing::debug;

///
/// AnalysisError
///
/// Structural violations found before any database contact.
///

#[derive(Clone, Debug, ThisError)]
pub enum AnalysisError {
    #[error("{ty}: type name carries no query kind prefix")]
    BadQueryName { ty: String },

    #[error("{ty}: not a record type")]
    NotARecord { ty: String },

    #[error("{ty}.{field}: multiple relation-binding (data) fields")]
    MultipleDataFields { ty: String, field: String },

    #[error("{ty}: no relation-binding field")]
    NoDataField { ty: String },

    #[error("{ty}.{field}: bad relation tag '{tag}': {source}")]
    BadRelTag {
        ty: String,
        field: String,
        tag: String,
        source: IdentError,
    },

    #[error("{ty}.{field}: bad column tag '{tag}': {source}")]
    BadColTag {
        ty: String,
        field: String,
        tag: String,
        source: IdentError,
    },

    #[error("{ty}.{field}: data field must be a record shape")]
    BadDataShape { ty: String, field: String },

    #[error("{ty}.{field}: iterator must yield a record")]
    BadIteratorShape { ty: String, field: String },

    #[error("{ty}.{field}: conflicting producers of the affected row set")]
    ConflictWhereProducer { ty: String, field: String },

    #[error("{ty}.{field}: conflicting producers of the query result")]
    ConflictResultProducer { ty: String, field: String },

    #[error("{ty}.{field}: duplicate '{directive}' directive")]
    DuplicateDirective {
        ty: String,
        field: String,
        directive: &'static str,
    },

    #[error("{ty}.{field}: '{directive}' directive is illegal here")]
    IllegalDirective {
        ty: String,
        field: String,
        directive: &'static str,
    },

    #[error("{ty}.{field}: field is illegal for this query kind")]
    IllegalField { ty: String, field: String },

    #[error("{ty}.{field}: unknown field option '{option}'")]
    BadFieldOption {
        ty: String,
        field: String,
        option: String,
    },

    #[error("{ty}.{field}: unary predicate '{pred}' takes no right-hand side")]
    IllegalUnaryRhs {
        ty: String,
        field: String,
        pred: Predicate,
    },

    #[error("{ty}.{field}: quantifier is illegal with predicate '{pred}'")]
    IllegalQuantifier {
        ty: String,
        field: String,
        pred: Predicate,
    },

    #[error("{ty}.{field}: predicate '{pred}' is missing its right-hand side")]
    MissingRhs {
        ty: String,
        field: String,
        pred: Predicate,
    },

    #[error("{ty}.{field}: field predicate takes no right-hand side, found '{rhs}'")]
    IllegalFieldRhs {
        ty: String,
        field: String,
        rhs: String,
    },

    #[error("{ty}.{field}: no between 'x' argument")]
    NoBetweenX { ty: String, field: String },

    #[error("{ty}.{field}: no between 'y' argument")]
    NoBetweenY { ty: String, field: String },

    #[error("{ty}.{field}: between group must have exactly one 'x' and one 'y' member")]
    BadBetweenShape { ty: String, field: String },

    #[error("{ty}.{field}: conflicting on-conflict targets")]
    ConflictConflictTarget { ty: String, field: String },

    #[error("{ty}.{field}: conflicting on-conflict actions")]
    ConflictConflictAction { ty: String, field: String },

    #[error("{ty}: on-conflict update action requires a target")]
    NoConflictTarget { ty: String },

    #[error("{ty}.{field}: bad limit/offset value '{tag}'")]
    BadLimitValue {
        ty: String,
        field: String,
        tag: String,
    },

    #[error("{ty}.{field}: bad override value '{tag}', want 'system' or 'user'")]
    BadOverrideValue {
        ty: String,
        field: String,
        tag: String,
    },

    #[error("{ty}.{field}: bad order-by item '{tag}'")]
    BadOrderByItem {
        ty: String,
        field: String,
        tag: String,
    },

    #[error("{ty}.{field}: cross join takes no conditions")]
    IllegalJoinCondition { ty: String, field: String },

    #[error("{ty}.{field}: multiple error handler fields")]
    MultipleErrorHandlers { ty: String, field: String },

    #[error("{ty}.{field}: field must have an integer type")]
    BadIntegerField { ty: String, field: String },
}

///
/// TypeShapeCache
///
/// Get-or-insert cache of analyzed record shapes keyed by structural key.
/// Repeated references to the same shape short-circuit re-analysis.
///

#[derive(Debug, Default)]
pub struct TypeShapeCache {
    shapes: RwLock<HashMap<String, Vec<FieldEntry>>>,
}

static GLOBAL_SHAPES: LazyLock<TypeShapeCache> = LazyLock::new(TypeShapeCache::default);

impl TypeShapeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache instance.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL_SHAPES
    }

    fn get(&self, key: &str) -> Option<Vec<FieldEntry>> {
        self.shapes
            .read()
            .expect("shape cache lock poisoned while reading")
            .get(key)
            .cloned()
    }

    fn insert(&self, key: String, fields: Vec<FieldEntry>) {
        self.shapes
            .write()
            .expect("shape cache lock poisoned while writing")
            .entry(key)
            .or_insert(fields);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.shapes.read().unwrap().len()
    }
}

/// Analyze an annotated record type using the process-wide shape cache.
pub fn analyze_type(ty: &TypeDesc) -> Result<Target, AnalysisError> {
    Analyzer::new(TypeShapeCache::global()).analyze(ty)
}

///
/// Analyzer
///

pub struct Analyzer<'a> {
    cache: &'a TypeShapeCache,
}

impl<'a> Analyzer<'a> {
    #[must_use]
    pub const fn new(cache: &'a TypeShapeCache) -> Self {
        Self { cache }
    }

    /// Analyze one annotated record type into a query or filter spec.
    pub fn analyze(&self, ty: &TypeDesc) -> Result<Target, AnalysisError> {
        let full = qualified(ty);
        let Some(fields) = ty.record_fields() else {
            return Err(AnalysisError::NotARecord { ty: full });
        };

        let lowered = ty.name.to_ascii_lowercase();
        if lowered.starts_with("filter") {
            let filter = self.analyze_filter(ty, fields)?;
            return Ok(Target::Filter(filter));
        }

        let kind = if lowered.starts_with("insert") {
            QueryKind::Insert
        } else if lowered.starts_with("update") {
            QueryKind::Update
        } else if lowered.starts_with("select") {
            QueryKind::Select
        } else if lowered.starts_with("delete") {
            QueryKind::Delete
        } else {
            return Err(AnalysisError::BadQueryName { ty: full });
        };

        let spec = self.analyze_query(ty, fields, kind)?;
        debug!(ty = %spec.name, kind = ?spec.kind, "analyzed query type");

        Ok(Target::Query(spec))
    }

    fn analyze_query(
        &self,
        ty: &TypeDesc,
        fields: &[FieldDesc],
        kind: QueryKind,
    ) -> Result<QuerySpec, AnalysisError> {
        let full = qualified(ty);
        let mut spec = QuerySpec::new(&ty.name, &ty.pkg, kind);
        let mut have_rel = false;

        for field in fields {
            if !field.exported && field.name != "_" {
                continue;
            }

            // (1) the unique relation-binding field
            if let Some(rel_tag) = field.tags.first("rel") {
                if have_rel {
                    return Err(AnalysisError::MultipleDataFields {
                        ty: full.clone(),
                        field: field.name.clone(),
                    });
                }
                have_rel = true;
                self.analyze_rel_field(&mut spec, &full, field, rel_tag)?;
                continue;
            }

            // (2) directive fields, recognized by the synthetic name plus a
            // directive-type marker
            if field.name == "_" {
                if let Some(directive) = field.ty.directive() {
                    self.analyze_directive(&mut spec, &full, field, directive)?;
                    continue;
                }
            }

            // (3) specially-named fields
            match field.name.to_ascii_lowercase().as_str() {
                "where" if kind != QueryKind::Insert => {
                    if spec.all || spec.filter.is_some() || spec.where_spec.is_some() {
                        return Err(AnalysisError::ConflictWhereProducer {
                            ty: full.clone(),
                            field: field.name.clone(),
                        });
                    }
                    spec.where_spec = Some(self.analyze_where(&full, field)?);
                    continue;
                }
                "join" if kind == QueryKind::Select => {
                    spec.joins = Some(self.analyze_joins(&full, field, false)?);
                    continue;
                }
                "from" if kind == QueryKind::Update => {
                    spec.joins = Some(self.analyze_joins(&full, field, true)?);
                    continue;
                }
                "using" if kind == QueryKind::Delete => {
                    spec.joins = Some(self.analyze_joins(&full, field, true)?);
                    continue;
                }
                "onconflict" if kind == QueryKind::Insert => {
                    spec.on_conflict = Some(self.analyze_on_conflict(&full, field)?);
                    continue;
                }
                "result" if kind == QueryKind::Select => {
                    if spec.result.is_some()
                        || spec.returning.is_some()
                        || spec.rows_affected.is_some()
                    {
                        return Err(AnalysisError::ConflictResultProducer {
                            ty: full.clone(),
                            field: field.name.clone(),
                        });
                    }
                    let record = self.analyze_data_record(&full, field)?;
                    spec.result = Some(ResultField {
                        name: field.name.clone(),
                        record,
                    });
                    continue;
                }
                "limit" if kind == QueryKind::Select => {
                    require_integer(&full, field)?;
                    let value = parse_tag_u64(&full, field)?;
                    set_limit(&mut spec, &full, field, Some(field.name.clone()), value)?;
                    continue;
                }
                "offset" if kind == QueryKind::Select => {
                    require_integer(&full, field)?;
                    let value = parse_tag_u64(&full, field)?;
                    set_offset(&mut spec, &full, field, Some(field.name.clone()), value)?;
                    continue;
                }
                "rowsaffected" if !kind.is_select() => {
                    if spec.rows_affected.is_some()
                        || spec.returning.is_some()
                        || spec.result.is_some()
                    {
                        return Err(AnalysisError::ConflictResultProducer {
                            ty: full.clone(),
                            field: field.name.clone(),
                        });
                    }
                    require_integer(&full, field)?;
                    spec.rows_affected = Some(RowsAffectedField {
                        name: field.name.clone(),
                    });
                    continue;
                }
                _ => {}
            }

            // (4) fallback by type
            let dty = field.ty.deref();
            if dty.caps.filter_marker {
                if spec.all || spec.where_spec.is_some() {
                    return Err(AnalysisError::ConflictWhereProducer {
                        ty: full.clone(),
                        field: field.name.clone(),
                    });
                }
                spec.filter = Some(field.name.clone());
                continue;
            }
            if dty.caps.error_handler || dty.caps.error_info_handler {
                if spec.error_handler.is_some() {
                    return Err(AnalysisError::MultipleErrorHandlers {
                        ty: full.clone(),
                        field: field.name.clone(),
                    });
                }
                spec.error_handler = Some(ErrorHandlerField {
                    name: field.name.clone(),
                    info: dty.caps.error_info_handler,
                });
                continue;
            }

            return Err(AnalysisError::IllegalField {
                ty: full.clone(),
                field: field.name.clone(),
            });
        }

        if !have_rel {
            return Err(AnalysisError::NoDataField { ty: full });
        }
        if let Some(on_conflict) = &spec.on_conflict {
            if matches!(on_conflict.action, Some(ConflictAction::Update(_)))
                && on_conflict.target.is_none()
            {
                return Err(AnalysisError::NoConflictTarget { ty: full });
            }
        }

        Ok(spec)
    }

    /// The relation-binding field, with late specialization by name + type.
    fn analyze_rel_field(
        &self,
        spec: &mut QuerySpec,
        full: &str,
        field: &FieldDesc,
        rel_tag: &str,
    ) -> Result<(), AnalysisError> {
        let rel = RelId::parse(rel_tag).map_err(|source| AnalysisError::BadRelTag {
            ty: full.to_string(),
            field: field.name.clone(),
            tag: rel_tag.to_string(),
            source,
        })?;
        spec.rel = rel.clone();

        let lowered = field.name.to_ascii_lowercase();
        if spec.kind == QueryKind::Select {
            if lowered == "count" && field.ty.is_integer() {
                spec.kind = QueryKind::SelectCount;
                return Ok(());
            }
            if lowered == "exists" && field.ty.is_bool() {
                spec.kind = QueryKind::SelectExists;
                return Ok(());
            }
            if lowered == "notexists" && field.ty.is_bool() {
                spec.kind = QueryKind::SelectNotExists;
                return Ok(());
            }
        }

        // A bare relation directive binds the relation with no data record;
        // only deletes can affect rows without one.
        if field.ty.directive() == Some(Directive::Relation) {
            if spec.kind != QueryKind::Delete {
                return Err(AnalysisError::IllegalDirective {
                    ty: full.to_string(),
                    field: field.name.clone(),
                    directive: Directive::Relation.name(),
                });
            }
            return Ok(());
        }

        let record = self.analyze_data_record(full, field)?;
        spec.data = Some(DataField {
            name: field.name.clone(),
            rel,
            record,
        });

        Ok(())
    }

    /// Unwrap iterator/pointer/sequence wrapping down to the record shape
    /// and analyze its fields.
    fn analyze_data_record(
        &self,
        full: &str,
        field: &FieldDesc,
    ) -> Result<RecordType, AnalysisError> {
        let mut record = RecordType {
            base_name: String::new(),
            base_pkg: String::new(),
            imported: false,
            is_pointer: false,
            is_slice: false,
            is_array: false,
            array_len: 0,
            is_iter: false,
            iter_method: None,
            fields: Vec::new(),
        };

        let mut ty = &field.ty;
        if let TypeKind::Iterator { elem, method } = &ty.deref().kind {
            record.is_iter = true;
            record.iter_method = method.clone();
            ty = elem;
        }
        if ty.is_pointer() {
            record.is_pointer = true;
            ty = ty.deref();
        }
        match &ty.kind {
            TypeKind::Slice(elem) => {
                record.is_slice = true;
                ty = elem;
            }
            TypeKind::Array(len, elem) => {
                record.is_array = true;
                record.array_len = *len;
                ty = elem;
            }
            _ => {}
        }
        if ty.is_pointer() {
            record.is_pointer = true;
            ty = ty.deref();
        }

        let Some(fields) = ty.record_fields() else {
            let err = if record.is_iter {
                AnalysisError::BadIteratorShape {
                    ty: full.to_string(),
                    field: field.name.clone(),
                }
            } else {
                AnalysisError::BadDataShape {
                    ty: full.to_string(),
                    field: field.name.clone(),
                }
            };
            return Err(err);
        };

        record.base_name = ty.name.clone();
        record.base_pkg = ty.pkg.clone();
        record.imported = ty.imported;

        let key = ty.shape_key();
        if let Some(cached) = self.cache.get(&key) {
            record.fields = cached;
            return Ok(record);
        }

        record.fields = self.analyze_record_fields(full, fields)?;
        self.cache.insert(key, record.fields.clone());

        Ok(record)
    }

    /// Walk record fields with an explicit frame stack, descending into
    /// nested records marked `>prefix` while composing the column prefix.
    fn analyze_record_fields(
        &self,
        full: &str,
        fields: &[FieldDesc],
    ) -> Result<Vec<FieldEntry>, AnalysisError> {
        struct Frame<'f> {
            fields: &'f [FieldDesc],
            idx: usize,
            prefix: String,
            path: Vec<FieldNode>,
        }

        let mut out = Vec::new();
        let mut stack = vec![Frame {
            fields,
            idx: 0,
            prefix: String::new(),
            path: Vec::new(),
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(field) = frame.fields.get(frame.idx) else {
                stack.pop();
                continue;
            };
            frame.idx += 1;

            if !field.exported {
                continue;
            }
            let Some(tag) = field.tags.first("sql") else {
                continue;
            };
            if tag == "-" {
                continue;
            }

            // Descend marker: suspend this frame and push the child record.
            if let Some(prefix_part) = tag.strip_prefix('>') {
                let Some(child_fields) = field.ty.record_fields() else {
                    return Err(AnalysisError::BadDataShape {
                        ty: full.to_string(),
                        field: field.name.clone(),
                    });
                };
                let mut path = frame.path.clone();
                path.push(FieldNode {
                    name: field.name.clone(),
                    is_pointer: field.ty.is_pointer(),
                });
                let prefix = format!("{}{}", frame.prefix, prefix_part);
                stack.push(Frame {
                    fields: child_fields,
                    idx: 0,
                    prefix,
                    path,
                });
                continue;
            }

            let mut col =
                ColId::parse(tag).map_err(|source| AnalysisError::BadColTag {
                    ty: full.to_string(),
                    field: field.name.clone(),
                    tag: tag.to_string(),
                    source,
                })?;
            col.name = format!("{}{}", frame.prefix, col.name);

            let mut entry = FieldEntry::new(&field.name, field.ty.clone(), col);
            entry.path = frame.path.clone();
            apply_field_options(full, field, &mut entry)?;

            out.push(entry);
        }

        Ok(out)
    }

    fn analyze_directive(
        &self,
        spec: &mut QuerySpec,
        full: &str,
        field: &FieldDesc,
        directive: Directive,
    ) -> Result<(), AnalysisError> {
        let illegal = || AnalysisError::IllegalDirective {
            ty: full.to_string(),
            field: field.name.clone(),
            directive: directive.name(),
        };
        let duplicate = || AnalysisError::DuplicateDirective {
            ty: full.to_string(),
            field: field.name.clone(),
            directive: directive.name(),
        };

        match directive {
            Directive::All => {
                if !spec.kind.needs_row_set() {
                    return Err(illegal());
                }
                if spec.all {
                    return Err(duplicate());
                }
                if spec.where_spec.is_some() || spec.filter.is_some() {
                    return Err(AnalysisError::ConflictWhereProducer {
                        ty: full.to_string(),
                        field: field.name.clone(),
                    });
                }
                spec.all = true;
            }
            Directive::Default => {
                if !spec.kind.is_write() {
                    return Err(illegal());
                }
                if spec.defaults.is_some() {
                    return Err(duplicate());
                }
                spec.defaults = Some(column_list(full, field)?);
            }
            Directive::Force => {
                if !spec.kind.is_write() {
                    return Err(illegal());
                }
                if spec.force.is_some() {
                    return Err(duplicate());
                }
                spec.force = Some(column_list(full, field)?);
            }
            Directive::Return => {
                if spec.kind.is_select() {
                    return Err(illegal());
                }
                if spec.returning.is_some() {
                    return Err(duplicate());
                }
                if spec.result.is_some() || spec.rows_affected.is_some() {
                    return Err(AnalysisError::ConflictResultProducer {
                        ty: full.to_string(),
                        field: field.name.clone(),
                    });
                }
                spec.returning = Some(column_list(full, field)?);
            }
            Directive::Limit => {
                if spec.kind != QueryKind::Select {
                    return Err(illegal());
                }
                let value = parse_tag_u64(full, field)?;
                set_limit(spec, full, field, None, value)?;
            }
            Directive::Offset => {
                if spec.kind != QueryKind::Select {
                    return Err(illegal());
                }
                let value = parse_tag_u64(full, field)?;
                set_offset(spec, full, field, None, value)?;
            }
            Directive::OrderBy => {
                if spec.kind != QueryKind::Select {
                    return Err(illegal());
                }
                if spec.order_by.is_some() {
                    return Err(duplicate());
                }
                spec.order_by = Some(order_by_spec(full, field)?);
            }
            Directive::Override => {
                if spec.kind != QueryKind::Insert {
                    return Err(illegal());
                }
                if spec.override_kind.is_some() {
                    return Err(duplicate());
                }
                let tag = field.tags.first("sql").unwrap_or_default();
                spec.override_kind = Some(match tag {
                    "system" => OverrideKind::System,
                    "user" => OverrideKind::User,
                    _ => {
                        return Err(AnalysisError::BadOverrideValue {
                            ty: full.to_string(),
                            field: field.name.clone(),
                            tag: tag.to_string(),
                        });
                    }
                });
            }
            // Everything else (relation, column, joins, conflict markers,
            // textsearch) only has meaning inside its block.
            _ => return Err(illegal()),
        }

        Ok(())
    }

    /// Where-tree analysis over an explicit frame stack. Nested records
    /// become groups; range operators capture the nested record as a
    /// between x/y pair instead.
    fn analyze_where(&self, full: &str, field: &FieldDesc) -> Result<WhereSpec, AnalysisError> {
        struct Frame<'f> {
            fields: &'f [FieldDesc],
            idx: usize,
            conds: Vec<SearchCondition>,
            connective: Connective,
        }

        let Some(root_fields) = field.ty.record_fields() else {
            return Err(AnalysisError::NotARecord {
                ty: format!("{full}.{}", field.name),
            });
        };

        let mut stack = vec![Frame {
            fields: root_fields,
            idx: 0,
            conds: Vec::new(),
            connective: Connective::None,
        }];

        loop {
            let frame = stack.last_mut().expect("where stack is never empty");

            let Some(field) = frame.fields.get(frame.idx) else {
                let done = stack.pop().expect("where stack is never empty");
                let group = WhereSpec { conds: done.conds };
                let Some(parent) = stack.last_mut() else {
                    return Ok(group);
                };
                parent.conds.push(SearchCondition {
                    connective: done.connective,
                    kind: ConditionKind::Group(group),
                });
                continue;
            };
            frame.idx += 1;

            if !field.exported && field.name != "_" {
                continue;
            }

            // A completed child group lands in `conds` before its next
            // sibling is visited, so emptiness marks the true first
            // condition even after nesting.
            let connective = if frame.conds.is_empty() {
                Connective::None
            } else {
                connective_of(field)
            };

            // Column directive: both sides are database expressions.
            if field.name == "_" && field.ty.directive() == Some(Directive::Column) {
                let pred = column_predicate(full, field)?;
                frame.conds.push(SearchCondition {
                    connective,
                    kind: ConditionKind::Column(pred),
                });
                continue;
            }

            // Nested record: a between group when the operator is a range
            // predicate, otherwise a nested condition group.
            if let Some(child_fields) = field.ty.record_fields() {
                let tag = field.tags.first("sql").unwrap_or_default();
                let expr = parse_predicate(tag);

                if let Some(pred) = expr.pred.filter(|p| p.is_range()) {
                    let between = self.analyze_between(full, field, child_fields, &expr.lhs, pred)?;
                    frame.conds.push(SearchCondition {
                        connective,
                        kind: ConditionKind::Between(between),
                    });
                    continue;
                }

                stack.push(Frame {
                    fields: child_fields,
                    idx: 0,
                    conds: Vec::new(),
                    connective,
                });
                continue;
            }

            // Plain field predicate.
            let pred = field_predicate(full, field)?;
            frame.conds.push(SearchCondition {
                connective,
                kind: ConditionKind::Field(pred),
            });
        }
    }

    /// A between group: exactly one member marked `x` and one marked `y`.
    fn analyze_between(
        &self,
        full: &str,
        field: &FieldDesc,
        members: &[FieldDesc],
        lhs: &str,
        pred: Predicate,
    ) -> Result<BetweenPredicate, AnalysisError> {
        let col = ColId::parse(lhs).map_err(|source| AnalysisError::BadColTag {
            ty: full.to_string(),
            field: field.name.clone(),
            tag: lhs.to_string(),
            source,
        })?;

        let mut x = None;
        let mut y = None;

        for member in members {
            if !member.exported && member.name != "_" {
                continue;
            }

            // Column-directive members carry the marker after the column.
            let (bound, marker) = if member.ty.directive() == Some(Directive::Column) {
                let tag = member.tags.first("sql").unwrap_or_default();
                let col = ColId::parse(tag).map_err(|source| AnalysisError::BadColTag {
                    ty: full.to_string(),
                    field: member.name.clone(),
                    tag: tag.to_string(),
                    source,
                })?;
                let marker = member.tags.options("sql").first().cloned().unwrap_or_default();
                (BetweenBound::Col(col), marker)
            } else {
                // Plain members carry the marker as the whole tag value, or
                // in the option position when the value slot is taken.
                let marker = member
                    .tags
                    .options("sql")
                    .first()
                    .cloned()
                    .unwrap_or_else(|| member.tags.first("sql").unwrap_or_default().to_string());
                (
                    BetweenBound::Field {
                        name: member.name.clone(),
                        ty: member.ty.clone(),
                    },
                    marker,
                )
            };

            let slot = match marker.as_str() {
                "x" => &mut x,
                "y" => &mut y,
                _ => continue,
            };
            if slot.is_some() {
                return Err(AnalysisError::BadBetweenShape {
                    ty: full.to_string(),
                    field: field.name.clone(),
                });
            }
            *slot = Some(bound);
        }

        let x = x.ok_or_else(|| AnalysisError::NoBetweenX {
            ty: full.to_string(),
            field: field.name.clone(),
        })?;
        let y = y.ok_or_else(|| AnalysisError::NoBetweenY {
            ty: full.to_string(),
            field: field.name.clone(),
        })?;

        Ok(BetweenPredicate {
            field_name: field.name.clone(),
            col,
            pred,
            x,
            y,
        })
    }

    /// JOIN/FROM/USING block: a relation directive (for FROM/USING forms)
    /// plus ordered join items.
    fn analyze_joins(
        &self,
        full: &str,
        field: &FieldDesc,
        allow_rel: bool,
    ) -> Result<JoinSpec, AnalysisError> {
        let Some(fields) = field.ty.record_fields() else {
            return Err(AnalysisError::NotARecord {
                ty: format!("{full}.{}", field.name),
            });
        };

        let mut spec = JoinSpec::default();

        for field in fields {
            let Some(directive) = field.ty.directive() else {
                return Err(AnalysisError::IllegalField {
                    ty: full.to_string(),
                    field: field.name.clone(),
                });
            };
            let illegal = || AnalysisError::IllegalDirective {
                ty: full.to_string(),
                field: field.name.clone(),
                directive: directive.name(),
            };

            let kind = match directive {
                Directive::Relation if allow_rel => {
                    if spec.rel.is_some() {
                        return Err(AnalysisError::DuplicateDirective {
                            ty: full.to_string(),
                            field: field.name.clone(),
                            directive: directive.name(),
                        });
                    }
                    let tag = field.tags.first("sql").unwrap_or_default();
                    let rel =
                        RelId::parse(tag).map_err(|source| AnalysisError::BadRelTag {
                            ty: full.to_string(),
                            field: field.name.clone(),
                            tag: tag.to_string(),
                            source,
                        })?;
                    spec.rel = Some(rel);
                    continue;
                }
                Directive::LeftJoin => JoinKind::Left,
                Directive::RightJoin => JoinKind::Right,
                Directive::FullJoin => JoinKind::Full,
                Directive::CrossJoin => JoinKind::Cross,
                _ => return Err(illegal()),
            };

            let values = field.tags.values("sql");
            let rel_tag = values.first().map(String::as_str).unwrap_or_default();
            let rel = RelId::parse(rel_tag).map_err(|source| AnalysisError::BadRelTag {
                ty: full.to_string(),
                field: field.name.clone(),
                tag: rel_tag.to_string(),
                source,
            })?;

            if kind == JoinKind::Cross && values.len() > 1 {
                return Err(AnalysisError::IllegalJoinCondition {
                    ty: full.to_string(),
                    field: field.name.clone(),
                });
            }

            let mut conds = Vec::new();
            for (i, value) in values.iter().skip(1).enumerate() {
                let pred = column_predicate_from(full, field, value)?;
                conds.push(JoinCond {
                    connective: if i == 0 { Connective::None } else { Connective::And },
                    pred,
                });
            }

            spec.items.push(JoinItem { kind, rel, conds });
        }

        Ok(spec)
    }

    fn analyze_on_conflict(
        &self,
        full: &str,
        field: &FieldDesc,
    ) -> Result<OnConflictSpec, AnalysisError> {
        let Some(fields) = field.ty.record_fields() else {
            return Err(AnalysisError::NotARecord {
                ty: format!("{full}.{}", field.name),
            });
        };

        let mut spec = OnConflictSpec::default();

        for field in fields {
            let Some(directive) = field.ty.directive() else {
                return Err(AnalysisError::IllegalField {
                    ty: full.to_string(),
                    field: field.name.clone(),
                });
            };
            let conflict_target = || AnalysisError::ConflictConflictTarget {
                ty: full.to_string(),
                field: field.name.clone(),
            };
            let conflict_action = || AnalysisError::ConflictConflictAction {
                ty: full.to_string(),
                field: field.name.clone(),
            };

            match directive {
                Directive::Column => {
                    if spec.target.is_some() {
                        return Err(conflict_target());
                    }
                    let mut cols = Vec::new();
                    for value in field.tags.values("sql") {
                        let col =
                            ColId::parse(value).map_err(|source| AnalysisError::BadColTag {
                                ty: full.to_string(),
                                field: field.name.clone(),
                                tag: value.clone(),
                                source,
                            })?;
                        cols.push(col);
                    }
                    spec.target = Some(ConflictTarget::Columns(cols));
                }
                Directive::Index => {
                    if spec.target.is_some() {
                        return Err(conflict_target());
                    }
                    let name = field.tags.first("sql").unwrap_or_default().to_string();
                    spec.target = Some(ConflictTarget::Index(name));
                }
                Directive::Constraint => {
                    if spec.target.is_some() {
                        return Err(conflict_target());
                    }
                    let name = field.tags.first("sql").unwrap_or_default().to_string();
                    spec.target = Some(ConflictTarget::Constraint(name));
                }
                Directive::Ignore => {
                    if spec.action.is_some() {
                        return Err(conflict_action());
                    }
                    spec.action = Some(ConflictAction::Ignore);
                }
                Directive::Update => {
                    if spec.action.is_some() {
                        return Err(conflict_action());
                    }
                    spec.action = Some(ConflictAction::Update(column_list(full, field)?));
                }
                _ => {
                    return Err(AnalysisError::IllegalDirective {
                        ty: full.to_string(),
                        field: field.name.clone(),
                        directive: directive.name(),
                    });
                }
            }
        }

        Ok(spec)
    }

    /// Filter record types: one relation-bound data record plus an optional
    /// text-search directive.
    fn analyze_filter(
        &self,
        ty: &TypeDesc,
        fields: &[FieldDesc],
    ) -> Result<FilterSpec, AnalysisError> {
        let full = qualified(ty);
        let mut data = None;
        let mut text_search = None;

        for field in fields {
            if let Some(rel_tag) = field.tags.first("rel") {
                if data.is_some() {
                    return Err(AnalysisError::MultipleDataFields {
                        ty: full.clone(),
                        field: field.name.clone(),
                    });
                }
                let rel = RelId::parse(rel_tag).map_err(|source| AnalysisError::BadRelTag {
                    ty: full.clone(),
                    field: field.name.clone(),
                    tag: rel_tag.to_string(),
                    source,
                })?;
                let record = self.analyze_data_record(&full, field)?;
                data = Some(DataField {
                    name: field.name.clone(),
                    rel,
                    record,
                });
                continue;
            }

            if field.name == "_" && field.ty.directive() == Some(Directive::TextSearch) {
                if text_search.is_some() {
                    return Err(AnalysisError::DuplicateDirective {
                        ty: full.clone(),
                        field: field.name.clone(),
                        directive: Directive::TextSearch.name(),
                    });
                }
                let tag = field.tags.first("sql").unwrap_or_default();
                let col = ColId::parse(tag).map_err(|source| AnalysisError::BadColTag {
                    ty: full.clone(),
                    field: field.name.clone(),
                    tag: tag.to_string(),
                    source,
                })?;
                text_search = Some(col);
                continue;
            }

            return Err(AnalysisError::IllegalField {
                ty: full.clone(),
                field: field.name.clone(),
            });
        }

        let data = data.ok_or(AnalysisError::NoDataField { ty: full.clone() })?;

        Ok(FilterSpec {
            name: ty.name.clone(),
            pkg: ty.pkg.clone(),
            data,
            text_search,
        })
    }
}

//
// Shared helpers
//

fn qualified(ty: &TypeDesc) -> String {
    if ty.pkg.is_empty() {
        ty.name.clone()
    } else {
        format!("{}::{}", ty.pkg, ty.name)
    }
}

fn connective_of(field: &FieldDesc) -> Connective {
    match field.tags.first("bool") {
        Some("or") => Connective::Or,
        _ => Connective::And,
    }
}

fn require_integer(full: &str, field: &FieldDesc) -> Result<(), AnalysisError> {
    if field.ty.is_integer() {
        Ok(())
    } else {
        Err(AnalysisError::BadIntegerField {
            ty: full.to_string(),
            field: field.name.clone(),
        })
    }
}

fn parse_tag_u64(full: &str, field: &FieldDesc) -> Result<Option<u64>, AnalysisError> {
    let Some(tag) = field.tags.first("sql") else {
        return Ok(None);
    };

    tag.parse::<u64>()
        .map(Some)
        .map_err(|_| AnalysisError::BadLimitValue {
            ty: full.to_string(),
            field: field.name.clone(),
            tag: tag.to_string(),
        })
}

fn set_limit(
    spec: &mut QuerySpec,
    full: &str,
    field: &FieldDesc,
    field_name: Option<String>,
    value: Option<u64>,
) -> Result<(), AnalysisError> {
    if spec.limit.is_some() {
        return Err(AnalysisError::DuplicateDirective {
            ty: full.to_string(),
            field: field.name.clone(),
            directive: Directive::Limit.name(),
        });
    }
    spec.limit = Some(LimitSpec {
        field: field_name,
        value,
    });

    Ok(())
}

fn set_offset(
    spec: &mut QuerySpec,
    full: &str,
    field: &FieldDesc,
    field_name: Option<String>,
    value: Option<u64>,
) -> Result<(), AnalysisError> {
    if spec.offset.is_some() {
        return Err(AnalysisError::DuplicateDirective {
            ty: full.to_string(),
            field: field.name.clone(),
            directive: Directive::Offset.name(),
        });
    }
    spec.offset = Some(OffsetSpec {
        field: field_name,
        value,
    });

    Ok(())
}

/// A directive column list: `*` means all, otherwise each tag value is one
/// column id.
fn column_list(full: &str, field: &FieldDesc) -> Result<ColumnList, AnalysisError> {
    let values = field.tags.values("sql");
    if values.len() == 1 && values[0] == "*" {
        return Ok(ColumnList::All);
    }

    let mut cols = Vec::new();
    for value in values {
        let col = ColId::parse(value).map_err(|source| AnalysisError::BadColTag {
            ty: full.to_string(),
            field: field.name.clone(),
            tag: value.clone(),
            source,
        })?;
        cols.push(col);
    }

    Ok(ColumnList::Columns(cols))
}

/// Order-by items: `[-]col[:nullsfirst|:nullslast]`.
fn order_by_spec(full: &str, field: &FieldDesc) -> Result<OrderBySpec, AnalysisError> {
    let mut items = Vec::new();

    for value in field.tags.values("sql") {
        let bad = || AnalysisError::BadOrderByItem {
            ty: full.to_string(),
            field: field.name.clone(),
            tag: value.clone(),
        };

        let (body, descending) = match value.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (value.as_str(), false),
        };
        let (body, nulls) = match body.split_once(':') {
            Some((body, "nullsfirst")) => (body, Some(NullsPosition::First)),
            Some((body, "nullslast")) => (body, Some(NullsPosition::Last)),
            Some(_) => return Err(bad()),
            None => (body, None),
        };
        let col = ColId::parse(body).map_err(|_| bad())?;

        items.push(OrderByItem {
            col,
            descending,
            nulls,
        });
    }

    Ok(OrderBySpec { items })
}

/// A column-directive predicate from the field's own sql tag.
fn column_predicate(full: &str, field: &FieldDesc) -> Result<ColumnPredicate, AnalysisError> {
    let tag = field.tags.first("sql").unwrap_or_default();

    column_predicate_from(full, field, tag)
}

fn column_predicate_from(
    full: &str,
    field: &FieldDesc,
    tag: &str,
) -> Result<ColumnPredicate, AnalysisError> {
    let expr = parse_predicate(tag);
    let col = ColId::parse(&expr.lhs).map_err(|source| AnalysisError::BadColTag {
        ty: full.to_string(),
        field: field.name.clone(),
        tag: tag.to_string(),
        source,
    })?;

    // Directive columns default to an is-true test.
    let pred = expr.pred.unwrap_or(Predicate::IsTrue);

    if pred.is_unary() {
        if !expr.rhs.is_empty() {
            return Err(AnalysisError::IllegalUnaryRhs {
                ty: full.to_string(),
                field: field.name.clone(),
                pred,
            });
        }
        if expr.quant.is_some() {
            return Err(AnalysisError::IllegalQuantifier {
                ty: full.to_string(),
                field: field.name.clone(),
                pred,
            });
        }
        return Ok(ColumnPredicate {
            col,
            pred,
            quant: None,
            rhs: ColumnOperand::None,
        });
    }

    if expr.rhs.is_empty() {
        return Err(AnalysisError::MissingRhs {
            ty: full.to_string(),
            field: field.name.clone(),
            pred,
        });
    }
    if expr.quant.is_some() && !pred.is_quantifiable() {
        return Err(AnalysisError::IllegalQuantifier {
            ty: full.to_string(),
            field: field.name.clone(),
            pred,
        });
    }

    let rhs = match ColId::parse(&expr.rhs) {
        Ok(col) => ColumnOperand::Col(col),
        Err(_) => ColumnOperand::Lit(expr.rhs),
    };

    Ok(ColumnPredicate {
        col,
        pred,
        quant: expr.quant,
        rhs,
    })
}

/// A plain-field predicate: the column and operator come from the tag; the
/// value comes from the field itself, so a right-hand side is illegal.
fn field_predicate(full: &str, field: &FieldDesc) -> Result<FieldPredicate, AnalysisError> {
    let tag = field.tags.first("sql").unwrap_or_default();
    let expr = parse_predicate(tag);

    let col = ColId::parse(&expr.lhs).map_err(|source| AnalysisError::BadColTag {
        ty: full.to_string(),
        field: field.name.clone(),
        tag: tag.to_string(),
        source,
    })?;

    // Field predicates default to equality against the field value.
    let pred = expr.pred.unwrap_or(Predicate::Eq);

    if !expr.rhs.is_empty() {
        return Err(AnalysisError::IllegalFieldRhs {
            ty: full.to_string(),
            field: field.name.clone(),
            rhs: expr.rhs,
        });
    }
    if expr.quant.is_some() && !pred.is_quantifiable() {
        return Err(AnalysisError::IllegalQuantifier {
            ty: full.to_string(),
            field: field.name.clone(),
            pred,
        });
    }

    let mut modifier = None;
    for option in field.tags.options("sql") {
        if let Some(name) = option.strip_prefix('@') {
            modifier = Some(name.to_string());
        }
    }

    Ok(FieldPredicate {
        field_name: field.name.clone(),
        field_ty: field.ty.clone(),
        col,
        pred,
        quant: expr.quant,
        modifier,
    })
}

/// Apply the sql-tag option list to a data-record field entry.
fn apply_field_options(
    full: &str,
    field: &FieldDesc,
    entry: &mut FieldEntry,
) -> Result<(), AnalysisError> {
    for option in field.tags.options("sql") {
        match option.as_str() {
            "pk" => entry.is_pkey = true,
            "nullempty" => entry.null_empty = true,
            "ro" => entry.read_only = true,
            "wo" => entry.write_only = true,
            "json" => entry.use_json = true,
            "xml" => entry.use_xml = true,
            "add" => entry.use_add = true,
            "cast" => entry.can_cast = true,
            "default" => entry.use_default = true,
            "coalesce" => entry.use_coalesce = true,
            other => {
                if let Some(value) = other.strip_prefix("coalesce:") {
                    entry.use_coalesce = true;
                    entry.coalesce_value = Some(value.to_string());
                } else {
                    return Err(AnalysisError::BadFieldOption {
                        ty: full.to_string(),
                        field: field.name.clone(),
                        option: other.to_string(),
                    });
                }
            }
        }
    }

    Ok(())
}
