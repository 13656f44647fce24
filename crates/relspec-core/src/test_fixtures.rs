//! Shared test fixtures: an in-memory catalog source resembling a small
//! live database, plus type-descriptor builders for analyzer and checker
//! tests.

use crate::{
    catalog::{
        Cast, CastContext, CatalogError, CatalogSource, ColumnRow, ConstraintRow, IndexRow,
        Operator, PgType, Procedure, RelationRow, category, oid,
    },
    reflect::{Directive, FieldDesc, TypeCaps, TypeDesc, TypeKind},
};
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) const USERS_OID: u32 = 50_010;
pub(crate) const ORDERS_OID: u32 = 50_020;

///
/// FixtureCatalog
///
/// An in-memory `CatalogSource` with a `users_table` and an `orders_table`
/// in the `public` schema. Counts issued queries so cache-idempotence tests
/// can assert that hits do not re-query.
///

pub(crate) struct FixtureCatalog {
    identity: String,
    pub queries: AtomicUsize,
}

impl FixtureCatalog {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.queries.fetch_add(1, Ordering::SeqCst);
    }
}

fn base(oid: u32, name: &str, cat: char) -> PgType {
    PgType {
        oid,
        name: name.to_string(),
        typtype: 'b',
        category: cat,
        elem: 0,
    }
}

fn arr(oid: u32, name: &str, elem: u32) -> PgType {
    PgType {
        oid,
        name: name.to_string(),
        typtype: 'b',
        category: category::ARRAY,
        elem,
    }
}

fn cast(source: u32, target: u32, context: CastContext) -> Cast {
    Cast {
        source,
        target,
        context,
    }
}

impl CatalogSource for FixtureCatalog {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn database_name(&self) -> Result<String, CatalogError> {
        Ok("fixture_db".to_string())
    }

    fn version(&self) -> Result<String, CatalogError> {
        Ok("16.3 (fixture)".to_string())
    }

    fn types(&self) -> Result<Vec<PgType>, CatalogError> {
        self.tick();

        Ok(vec![
            base(oid::BOOL, "bool", category::BOOLEAN),
            base(oid::BYTEA, "bytea", category::USER),
            base(oid::CHAR, "char", category::STRING),
            base(oid::NAME, "name", category::STRING),
            base(oid::INT2, "int2", category::NUMERIC),
            base(oid::INT4, "int4", category::NUMERIC),
            base(oid::INT8, "int8", category::NUMERIC),
            base(oid::FLOAT4, "float4", category::NUMERIC),
            base(oid::FLOAT8, "float8", category::NUMERIC),
            base(oid::NUMERIC, "numeric", category::NUMERIC),
            base(oid::TEXT, "text", category::STRING),
            base(oid::VARCHAR, "varchar", category::STRING),
            base(oid::BPCHAR, "bpchar", category::STRING),
            base(oid::DATE, "date", category::DATETIME),
            base(oid::TIME, "time", category::DATETIME),
            base(oid::TIMESTAMP, "timestamp", category::DATETIME),
            base(oid::TIMESTAMPTZ, "timestamptz", category::DATETIME),
            base(oid::UUID, "uuid", category::USER),
            base(oid::JSON, "json", category::USER),
            base(oid::JSONB, "jsonb", category::USER),
            base(oid::XML, "xml", category::USER),
            base(oid::BIT, "bit", category::USER),
            base(oid::VARBIT, "varbit", category::USER),
            base(oid::UNKNOWN, "unknown", 'X'),
            arr(oid::BOOL_ARR, "_bool", oid::BOOL),
            arr(oid::INT2_ARR, "_int2", oid::INT2),
            arr(oid::INT4_ARR, "_int4", oid::INT4),
            arr(oid::INT8_ARR, "_int8", oid::INT8),
            arr(oid::FLOAT8_ARR, "_float8", oid::FLOAT8),
            arr(oid::TEXT_ARR, "_text", oid::TEXT),
            arr(oid::VARCHAR_ARR, "_varchar", oid::VARCHAR),
            arr(oid::TIMESTAMPTZ_ARR, "_timestamptz", oid::TIMESTAMPTZ),
            arr(oid::NUMERIC_ARR, "_numeric", oid::NUMERIC),
        ])
    }

    fn operators(&self) -> Result<Vec<Operator>, CatalogError> {
        self.tick();

        let comparison = ["=", "<>", "<", "<=", ">", ">="];
        let same_type = [
            oid::BOOL,
            oid::INT2,
            oid::INT4,
            oid::INT8,
            oid::FLOAT4,
            oid::FLOAT8,
            oid::NUMERIC,
            oid::TEXT,
            oid::VARCHAR,
            oid::BPCHAR,
            oid::DATE,
            oid::TIMESTAMP,
            oid::TIMESTAMPTZ,
            oid::UUID,
        ];

        let mut ops = Vec::new();
        for name in comparison {
            for ty in same_type {
                ops.push(Operator {
                    name: name.to_string(),
                    left: ty,
                    right: ty,
                    result: oid::BOOL,
                });
            }
            // Mixed-width integer comparisons exist in the real catalog.
            for (l, r) in [
                (oid::INT4, oid::INT8),
                (oid::INT8, oid::INT4),
                (oid::INT2, oid::INT4),
                (oid::INT4, oid::INT2),
                (oid::INT2, oid::INT8),
                (oid::INT8, oid::INT2),
            ] {
                ops.push(Operator {
                    name: name.to_string(),
                    left: l,
                    right: r,
                    result: oid::BOOL,
                });
            }
        }
        for name in ["~", "~*", "!~", "!~*", "~~", "!~~", "~~*", "!~~*"] {
            for ty in [oid::TEXT, oid::VARCHAR, oid::BPCHAR, oid::NAME] {
                ops.push(Operator {
                    name: name.to_string(),
                    left: ty,
                    right: oid::TEXT,
                    result: oid::BOOL,
                });
                ops.push(Operator {
                    name: name.to_string(),
                    left: ty,
                    right: ty,
                    result: oid::BOOL,
                });
            }
        }

        Ok(ops)
    }

    fn casts(&self) -> Result<Vec<Cast>, CatalogError> {
        self.tick();

        Ok(vec![
            cast(oid::INT2, oid::INT4, CastContext::Implicit),
            cast(oid::INT2, oid::INT8, CastContext::Implicit),
            cast(oid::INT4, oid::INT8, CastContext::Implicit),
            cast(oid::INT8, oid::INT4, CastContext::Assignment),
            cast(oid::INT4, oid::INT2, CastContext::Assignment),
            cast(oid::INT4, oid::NUMERIC, CastContext::Implicit),
            cast(oid::INT8, oid::NUMERIC, CastContext::Implicit),
            cast(oid::FLOAT4, oid::FLOAT8, CastContext::Implicit),
            cast(oid::FLOAT8, oid::FLOAT4, CastContext::Assignment),
            cast(oid::NUMERIC, oid::FLOAT8, CastContext::Implicit),
            cast(oid::TEXT, oid::VARCHAR, CastContext::Implicit),
            cast(oid::VARCHAR, oid::TEXT, CastContext::Implicit),
            cast(oid::BPCHAR, oid::TEXT, CastContext::Implicit),
            cast(oid::DATE, oid::TIMESTAMP, CastContext::Implicit),
            cast(oid::DATE, oid::TIMESTAMPTZ, CastContext::Implicit),
            cast(oid::TIMESTAMP, oid::TIMESTAMPTZ, CastContext::Implicit),
            cast(oid::INT4_ARR, oid::INT8_ARR, CastContext::Implicit),
        ])
    }

    fn procedures(&self) -> Result<Vec<Procedure>, CatalogError> {
        self.tick();

        Ok(vec![
            Procedure {
                oid: 870,
                name: "lower".to_string(),
                arg_types: vec![oid::TEXT],
                ret: oid::TEXT,
            },
            Procedure {
                oid: 871,
                name: "upper".to_string(),
                arg_types: vec![oid::TEXT],
                ret: oid::TEXT,
            },
            Procedure {
                oid: 1705,
                name: "abs".to_string(),
                arg_types: vec![oid::NUMERIC],
                ret: oid::NUMERIC,
            },
        ])
    }

    fn find_relation(
        &self,
        schema: &str,
        name: &str,
    ) -> Result<Option<RelationRow>, CatalogError> {
        self.tick();

        if schema != "public" {
            return Ok(None);
        }
        let row = match name {
            "users_table" => RelationRow {
                oid: USERS_OID,
                schema: schema.to_string(),
                name: name.to_string(),
                relkind: 'r',
            },
            "orders_table" => RelationRow {
                oid: ORDERS_OID,
                schema: schema.to_string(),
                name: name.to_string(),
                relkind: 'r',
            },
            _ => return Ok(None),
        };

        Ok(Some(row))
    }

    fn relation_columns(&self, rel_oid: u32) -> Result<Vec<ColumnRow>, CatalogError> {
        self.tick();

        let col = |num: i16, name: &str, type_oid: u32| ColumnRow {
            num,
            name: name.to_string(),
            type_oid,
            type_mod: -1,
            ndims: 0,
            not_null: false,
            has_default: false,
            is_primary: false,
        };

        let rows = match rel_oid {
            USERS_OID => vec![
                ColumnRow {
                    not_null: true,
                    is_primary: true,
                    has_default: true,
                    ..col(1, "id", oid::INT8)
                },
                ColumnRow {
                    not_null: true,
                    ..col(2, "name", oid::TEXT)
                },
                ColumnRow {
                    type_mod: 259,
                    ..col(3, "email", oid::VARCHAR)
                },
                ColumnRow {
                    not_null: true,
                    has_default: true,
                    ..col(4, "is_active", oid::BOOL)
                },
                ColumnRow {
                    not_null: true,
                    has_default: true,
                    ..col(5, "created_at", oid::TIMESTAMPTZ)
                },
                col(6, "updated_at", oid::TIMESTAMPTZ),
                ColumnRow {
                    ndims: 1,
                    ..col(7, "tags", oid::TEXT_ARR)
                },
                col(8, "metadata", oid::JSONB),
                col(9, "age", oid::INT4),
            ],
            ORDERS_OID => vec![
                ColumnRow {
                    not_null: true,
                    is_primary: true,
                    ..col(1, "id", oid::INT8)
                },
                ColumnRow {
                    not_null: true,
                    ..col(2, "user_id", oid::INT8)
                },
                col(3, "total", oid::NUMERIC),
                col(4, "placed_at", oid::TIMESTAMPTZ),
            ],
            _ => vec![],
        };

        Ok(rows)
    }

    fn relation_constraints(&self, rel_oid: u32) -> Result<Vec<ConstraintRow>, CatalogError> {
        self.tick();

        let rows = match rel_oid {
            USERS_OID => vec![
                ConstraintRow {
                    name: "users_table_pkey".to_string(),
                    kind: 'p',
                    deferrable: false,
                    deferred: false,
                    key: vec![1],
                },
                ConstraintRow {
                    name: "users_table_email_key".to_string(),
                    kind: 'u',
                    deferrable: false,
                    deferred: false,
                    key: vec![3],
                },
            ],
            ORDERS_OID => vec![ConstraintRow {
                name: "orders_table_pkey".to_string(),
                kind: 'p',
                deferrable: false,
                deferred: false,
                key: vec![1],
            }],
            _ => vec![],
        };

        Ok(rows)
    }

    fn relation_indexes(&self, rel_oid: u32) -> Result<Vec<IndexRow>, CatalogError> {
        self.tick();

        let index = |name: &str, key: Vec<i16>, unique: bool, primary: bool, def: &str| IndexRow {
            name: name.to_string(),
            key,
            is_unique: unique,
            is_primary: primary,
            is_exclusion: false,
            is_ready: true,
            definition: def.to_string(),
        };

        let rows = match rel_oid {
            USERS_OID => vec![
                index(
                    "users_table_pkey",
                    vec![1],
                    true,
                    true,
                    "CREATE UNIQUE INDEX users_table_pkey ON public.users_table USING btree (id)",
                ),
                index(
                    "users_table_email_key",
                    vec![3],
                    true,
                    false,
                    "CREATE UNIQUE INDEX users_table_email_key ON public.users_table USING btree (email)",
                ),
                index(
                    "users_table_lower_email_idx",
                    vec![0],
                    false,
                    false,
                    "CREATE INDEX users_table_lower_email_idx ON public.users_table USING btree (lower((email)::text)) WHERE (email IS NOT NULL)",
                ),
            ],
            ORDERS_OID => vec![index(
                "orders_table_pkey",
                vec![1],
                true,
                true,
                "CREATE UNIQUE INDEX orders_table_pkey ON public.orders_table USING btree (id)",
            )],
            _ => vec![],
        };

        Ok(rows)
    }
}

//
// Type-descriptor builders
//

pub(crate) fn bool_ty() -> TypeDesc {
    TypeDesc::new(TypeKind::Bool)
}

pub(crate) fn i16_ty() -> TypeDesc {
    TypeDesc::new(TypeKind::I16)
}

pub(crate) fn i32_ty() -> TypeDesc {
    TypeDesc::new(TypeKind::I32)
}

pub(crate) fn i64_ty() -> TypeDesc {
    TypeDesc::new(TypeKind::I64)
}

pub(crate) fn string_ty() -> TypeDesc {
    TypeDesc::new(TypeKind::String)
}

pub(crate) fn time_ty() -> TypeDesc {
    TypeDesc::new(TypeKind::Time)
}

pub(crate) fn ptr(ty: TypeDesc) -> TypeDesc {
    TypeDesc::new(TypeKind::Ptr(Box::new(ty)))
}

pub(crate) fn slice_of(ty: TypeDesc) -> TypeDesc {
    TypeDesc::new(TypeKind::Slice(Box::new(ty)))
}

pub(crate) fn record(fields: Vec<FieldDesc>) -> TypeDesc {
    TypeDesc::new(TypeKind::Record(fields))
}

pub(crate) fn named_record(name: &str, fields: Vec<FieldDesc>) -> TypeDesc {
    record(fields).named(name, "app")
}

pub(crate) fn directive(d: Directive) -> TypeDesc {
    TypeDesc::new(TypeKind::Directive(d))
}

/// A `_`-named directive field.
pub(crate) fn directive_field(d: Directive) -> FieldDesc {
    FieldDesc::new("_", directive(d))
}

pub(crate) fn json_capable(ty: TypeDesc) -> TypeDesc {
    let caps = TypeCaps {
        json: true,
        ..ty.caps
    };

    ty.with_caps(caps)
}
