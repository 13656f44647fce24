//! Module: typecheck
//! Responsibility: type compatibility decisions between catalog columns and
//! host field types — comparability, assignability, coercibility.
//! Does not own: IR traversal (check) or catalog loading (catalog).
//!
//! Three related decisions, in increasing permissiveness:
//! - `can_compare`: an operator exists for the (column, candidate) pair.
//! - `can_assign`: the pair is in the static conversion table, or the field
//!   type carries the right capability.
//! - `can_coerce`: the live cast catalog admits an implicit or
//!   assignment-context conversion. Only consulted when the field opts in
//!   with the `cast` option.


use crate::{
    catalog::{CastContext, CatalogSnapshot, Column, PgType, category, oid},
    ir::FieldEntry,
    predicate::Predicate,
    reflect::{TypeDesc, TypeKind},
};

///
/// AssignDirection
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AssignDirection {
    /// Column value into field (select/result/returning).
    Read,
    /// Field value into column parameter (insert/update).
    Write,
}

/// Whether the column can be compared to any of the candidate type oids
/// under the predicate's base operator.
///
/// A string-category column compared against the untyped-literal oid is
/// always accepted.
#[must_use]
pub fn can_compare(
    snap: &CatalogSnapshot,
    col: &Column,
    candidates: &[u32],
    pred: Predicate,
) -> bool {
    let Some(name) = pred.base_operator() else {
        return false;
    };

    candidates.iter().any(|&cand| {
        (cand == oid::UNKNOWN && col.ty.category == category::STRING)
            || snap.has_operator(name, col.type_oid, cand)
    })
}

/// Whether the field can be assigned to/from the column.
#[must_use]
pub fn can_assign(
    snap: &CatalogSnapshot,
    col: &Column,
    field: &FieldEntry,
    dir: AssignDirection,
) -> bool {
    let ty = field.ty.deref();

    // Self-encoding/decoding types short-circuit everything.
    let capable = match dir {
        AssignDirection::Write => ty.caps.sql_encode,
        AssignDirection::Read => ty.caps.sql_decode,
    };
    if capable {
        return true;
    }

    // Document columns accept serializable types, raw strings/bytes, or an
    // explicit treat-as annotation.
    if matches!(col.type_oid, oid::JSON | oid::JSONB) {
        let raw = matches!(ty.canonical().as_str(), "String" | "Vec<u8>");
        if ty.caps.json || raw || field.use_json {
            return true;
        }
    }
    if col.type_oid == oid::XML {
        let raw = matches!(ty.canonical().as_str(), "String" | "Vec<u8>");
        if ty.caps.xml || raw || field.use_xml {
            return true;
        }
    }

    let (key, zero_scale) = normalize_column_key(col);
    if assign_table(key, zero_scale, &ty.canonical()) {
        return true;
    }

    // Coercion is opt-in via the `cast` option; absence keeps the check
    // restrictive.
    if field.can_cast {
        return field_oids(ty)
            .iter()
            .any(|&cand| can_coerce(snap, &col.ty, cand));
    }

    false
}

/// Whether `source_oid` is coercible to the target type via an implicit or
/// assignment-context cast.
#[must_use]
pub fn can_coerce(snap: &CatalogSnapshot, target: &PgType, source_oid: u32) -> bool {
    if target.oid == source_oid {
        return true;
    }

    // Everything renders as text.
    if target.category == category::STRING {
        return true;
    }

    let source = snap.type_by_oid(source_oid);

    // Array-of-string targets accept any array source.
    if target.is_array() {
        let elem_is_string = snap
            .type_by_oid(target.elem)
            .is_some_and(|t| t.category == category::STRING);
        let source_is_array = source.is_some_and(PgType::is_array);
        if elem_is_string && source_is_array {
            return true;
        }
    }

    if matches!(
        snap.cast_context(source_oid, target.oid),
        Some(CastContext::Implicit | CastContext::Assignment)
    ) {
        return true;
    }

    // Array-to-array coercion recurses one level into the element types.
    if target.is_array() {
        if let Some(source) = source {
            if source.is_array() {
                return source.elem == target.elem
                    || matches!(
                        snap.cast_context(source.elem, target.elem),
                        Some(CastContext::Implicit | CastContext::Assignment)
                    );
            }
        }
    }

    false
}

/// Whether a single-argument modifier function named `name` applies: the
/// column's oid must be coercible to the function's argument oid, and at
/// least one candidate field oid must be too.
#[must_use]
pub fn can_apply_modifier(
    snap: &CatalogSnapshot,
    name: &str,
    col: &Column,
    candidates: &[u32],
) -> bool {
    snap.procs_named(name).iter().any(|proc| {
        let Some(arg_oid) = proc.single_arg() else {
            return false;
        };
        let Some(arg_ty) = snap.type_by_oid(arg_oid) else {
            return false;
        };

        can_coerce(snap, arg_ty, col.type_oid)
            && candidates.iter().any(|&cand| can_coerce(snap, arg_ty, cand))
    })
}

/// Candidate catalog oids for a field type, used for comparability and
/// coercion checks. Unknown shapes produce no candidates.
#[must_use]
pub fn field_oids(ty: &TypeDesc) -> Vec<u32> {
    let ty = ty.deref();

    match &ty.kind {
        TypeKind::Bool => vec![oid::BOOL],
        TypeKind::I8 | TypeKind::I16 | TypeKind::U8 => vec![oid::INT2],
        TypeKind::I32 | TypeKind::U16 => vec![oid::INT4],
        TypeKind::I64 | TypeKind::U32 => vec![oid::INT8],
        TypeKind::U64 => vec![oid::INT8, oid::NUMERIC],
        TypeKind::F32 => vec![oid::FLOAT4, oid::FLOAT8],
        TypeKind::F64 => vec![oid::FLOAT8, oid::NUMERIC],
        TypeKind::String => vec![oid::TEXT, oid::VARCHAR, oid::BPCHAR],
        TypeKind::Bytes => vec![oid::BYTEA],
        TypeKind::Time => vec![oid::TIMESTAMPTZ, oid::TIMESTAMP, oid::DATE],
        TypeKind::Slice(elem) | TypeKind::Array(_, elem) => {
            // Special-cased before element mapping: []u8 is bytea.
            if elem.deref().kind == TypeKind::U8 {
                return vec![oid::BYTEA];
            }
            field_oids(elem)
                .into_iter()
                .filter_map(array_oid)
                .collect()
        }
        _ => Vec::new(),
    }
}

/// The array type oid for a scalar oid, where one exists in the fixed
/// protocol set.
#[must_use]
pub const fn array_oid(scalar: u32) -> Option<u32> {
    let arr = match scalar {
        oid::BOOL => oid::BOOL_ARR,
        oid::BYTEA => oid::BYTEA_ARR,
        oid::CHAR => oid::CHAR_ARR,
        oid::NAME => oid::NAME_ARR,
        oid::INT2 => oid::INT2_ARR,
        oid::INT4 => oid::INT4_ARR,
        oid::INT8 => oid::INT8_ARR,
        oid::TEXT => oid::TEXT_ARR,
        oid::VARCHAR => oid::VARCHAR_ARR,
        oid::BPCHAR => oid::BPCHAR_ARR,
        oid::FLOAT4 => oid::FLOAT4_ARR,
        oid::FLOAT8 => oid::FLOAT8_ARR,
        oid::DATE => oid::DATE_ARR,
        oid::TIMESTAMP => oid::TIMESTAMP_ARR,
        oid::TIMESTAMPTZ => oid::TIMESTAMPTZ_ARR,
        oid::NUMERIC => oid::NUMERIC_ARR,
        oid::UUID => oid::UUID_ARR,
        oid::JSON => oid::JSON_ARR,
        oid::JSONB => oid::JSONB_ARR,
        oid::XML => oid::XML_ARR,
        _ => return None,
    };

    Some(arr)
}

/// Normalize a column to its conversion-table key: length-1 char-family
/// columns collapse to the single-char key, and the second component flags
/// a zero-scale (integer-capable) numeric or a single-bit bit column.
fn normalize_column_key(col: &Column) -> (u32, bool) {
    match col.type_oid {
        // Char-family typmod stores length + 4 bytes of header.
        oid::BPCHAR | oid::VARCHAR if col.type_mod == 5 => (oid::CHAR, false),
        // Bit-family typmod is the bit length itself.
        oid::BIT | oid::VARBIT if col.type_mod == 1 => (oid::BIT, true),
        oid::NUMERIC if col.type_mod != -1 && (col.type_mod - 4) & 0xFFFF == 0 => {
            (oid::NUMERIC, true)
        }
        other => (other, false),
    }
}

/// The static conversion table: which canonical field type identifiers are
/// assignable to/from which column key without consulting the cast catalog.
#[expect(clippy::match_same_arms)]
fn assign_table(key: u32, zero_scale: bool, canonical: &str) -> bool {
    let allowed: &[&str] = match key {
        oid::BOOL => &["bool"],
        oid::BOOL_ARR => &["Vec<bool>"],
        oid::BYTEA => &["Vec<u8>", "String"],
        oid::BYTEA_ARR => &["Vec<Vec<u8>>"],
        oid::CHAR => &["String", "u8"],
        oid::CHAR_ARR => &["Vec<String>", "Vec<u8>"],
        oid::NAME | oid::TEXT | oid::VARCHAR | oid::BPCHAR => &["String", "Vec<u8>"],
        oid::NAME_ARR | oid::TEXT_ARR | oid::VARCHAR_ARR | oid::BPCHAR_ARR => {
            &["Vec<String>", "Vec<Vec<u8>>"]
        }
        oid::INT2 => &["i16", "i8", "u8"],
        oid::INT2_ARR => &["Vec<i16>", "Vec<i8>"],
        oid::INT4 => &["i32", "i16", "u16"],
        oid::INT4_ARR => &["Vec<i32>", "Vec<i16>"],
        oid::INT8 => &["i64", "i32", "u32", "u64"],
        oid::INT8_ARR => &["Vec<i64>", "Vec<i32>", "Vec<u32>", "Vec<u64>"],
        oid::FLOAT4 => &["f32"],
        oid::FLOAT4_ARR => &["Vec<f32>"],
        oid::FLOAT8 => &["f64", "f32"],
        oid::FLOAT8_ARR => &["Vec<f64>", "Vec<f32>"],
        oid::NUMERIC if zero_scale => &["i64", "i32", "u64", "u32", "f64", "String"],
        oid::NUMERIC => &["f64", "f32", "i64", "u64", "String"],
        oid::NUMERIC_ARR => &["Vec<f64>", "Vec<i64>", "Vec<String>"],
        oid::DATE | oid::TIME | oid::TIMETZ | oid::TIMESTAMP | oid::TIMESTAMPTZ => &["Time"],
        oid::DATE_ARR | oid::TIMESTAMP_ARR | oid::TIMESTAMPTZ_ARR => &["Vec<Time>"],
        oid::UUID => &["String", "Vec<u8>", "[u8; 16]"],
        oid::UUID_ARR => &["Vec<String>", "Vec<[u8; 16]>"],
        oid::JSON | oid::JSONB => &["String", "Vec<u8>"],
        oid::JSON_ARR | oid::JSONB_ARR => &["Vec<String>", "Vec<Vec<u8>>"],
        oid::XML => &["String", "Vec<u8>"],
        oid::XML_ARR => &["Vec<String>", "Vec<Vec<u8>>"],
        oid::BIT | oid::VARBIT if zero_scale => &["bool", "u8", "String"],
        oid::BIT | oid::VARBIT => &["String", "Vec<u8>"],
        oid::TSVECTOR | oid::TSQUERY => &["String"],
        oid::OID => &["u32", "i64"],
        oid::INTERVAL => &["String"],
        _ => &[],
    };

    allowed.contains(&canonical)
}
