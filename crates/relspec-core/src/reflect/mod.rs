//! Module: reflect
//! Responsibility: the narrow type-descriptor data model supplied by the
//! host reflection adapter — field names, tags, type shapes, and capability
//! flags.
//! Does not own: annotation interpretation or catalog knowledge. The
//! analyzer consumes these descriptors; nothing here talks back to the host.

#[cfg(test)]
mod tests;

use derive_more::{Deref, DerefMut};
use serde::Serialize;
use std::{collections::BTreeMap, fmt::Write};

///
/// Directive
///
/// Marker types recognized on synthetic (`_`-named) fields. The *type* of
/// the field, not its name, selects the IR-building instruction.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum Directive {
    All,
    Column,
    Constraint,
    CrossJoin,
    Default,
    Force,
    FullJoin,
    Ignore,
    Index,
    LeftJoin,
    Limit,
    Offset,
    OrderBy,
    Override,
    Relation,
    Return,
    RightJoin,
    TextSearch,
    Update,
}

impl Directive {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Column => "column",
            Self::Constraint => "constraint",
            Self::CrossJoin => "crossjoin",
            Self::Default => "default",
            Self::Force => "force",
            Self::FullJoin => "fulljoin",
            Self::Ignore => "ignore",
            Self::Index => "index",
            Self::LeftJoin => "leftjoin",
            Self::Limit => "limit",
            Self::Offset => "offset",
            Self::OrderBy => "orderby",
            Self::Override => "override",
            Self::Relation => "relation",
            Self::Return => "return",
            Self::RightJoin => "rightjoin",
            Self::TextSearch => "textsearch",
            Self::Update => "update",
        }
    }
}

///
/// TypeCaps
///
/// Capability flags the reflection adapter resolves from the host type
/// system ("implements X" predicates).
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct TypeCaps {
    /// Can encode itself into a SQL parameter (write direction).
    pub sql_encode: bool,
    /// Can decode itself from a SQL result (read direction).
    pub sql_decode: bool,
    /// Can (de)serialize itself as JSON.
    pub json: bool,
    /// Can (de)serialize itself as XML.
    pub xml: bool,
    /// Is a query error handler.
    pub error_handler: bool,
    /// Is a query error handler that also receives error info.
    pub error_info_handler: bool,
    /// Marks a named filter reference.
    pub filter_marker: bool,
}

///
/// TypeKind
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum TypeKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
    Bytes,
    Time,
    Ptr(Box<TypeDesc>),
    Slice(Box<TypeDesc>),
    Array(usize, Box<TypeDesc>),
    Map(Box<TypeDesc>, Box<TypeDesc>),
    Record(Vec<FieldDesc>),
    Iterator {
        elem: Box<TypeDesc>,
        method: Option<String>,
    },
    Directive(Directive),
    /// A named type whose shape the adapter does not expose.
    Opaque,
}

///
/// TypeDesc
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TypeDesc {
    /// Named-type identity; empty for unnamed shapes.
    pub name: String,
    /// Owning package/module path; empty for builtins.
    pub pkg: String,
    /// Whether the named type comes from a package other than the one
    /// under analysis.
    pub imported: bool,
    pub kind: TypeKind,
    pub caps: TypeCaps,
}

impl TypeDesc {
    #[must_use]
    pub const fn new(kind: TypeKind) -> Self {
        Self {
            name: String::new(),
            pkg: String::new(),
            imported: false,
            kind,
            caps: TypeCaps {
                sql_encode: false,
                sql_decode: false,
                json: false,
                xml: false,
                error_handler: false,
                error_info_handler: false,
                filter_marker: false,
            },
        }
    }

    #[must_use]
    pub fn named(self, name: impl Into<String>, pkg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pkg: pkg.into(),
            ..self
        }
    }

    #[must_use]
    pub const fn with_caps(mut self, caps: TypeCaps) -> Self {
        self.caps = caps;
        self
    }

    /// Strip pointer wrapping down to the pointee.
    #[must_use]
    pub fn deref(&self) -> &Self {
        let mut ty = self;
        while let TypeKind::Ptr(inner) = &ty.kind {
            ty = inner;
        }

        ty
    }

    #[must_use]
    pub fn pointer_depth(&self) -> usize {
        let mut depth = 0;
        let mut ty = self;
        while let TypeKind::Ptr(inner) = &ty.kind {
            depth += 1;
            ty = inner;
        }

        depth
    }

    #[must_use]
    pub const fn is_pointer(&self) -> bool {
        matches!(self.kind, TypeKind::Ptr(_))
    }

    /// Whether the (dereferenced) type is a slice or array, and its element
    /// type if so.
    #[must_use]
    pub fn sequence_elem(&self) -> Option<&Self> {
        match &self.deref().kind {
            TypeKind::Slice(elem) | TypeKind::Array(_, elem) => Some(elem),
            _ => None,
        }
    }

    #[must_use]
    pub fn record_fields(&self) -> Option<&[FieldDesc]> {
        match &self.deref().kind {
            TypeKind::Record(fields) => Some(fields),
            _ => None,
        }
    }

    #[must_use]
    pub fn directive(&self) -> Option<Directive> {
        match self.deref().kind {
            TypeKind::Directive(d) => Some(d),
            _ => None,
        }
    }

    /// Whether this is one of the integer kinds.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(
            self.deref().kind,
            TypeKind::I8
                | TypeKind::I16
                | TypeKind::I32
                | TypeKind::I64
                | TypeKind::U8
                | TypeKind::U16
                | TypeKind::U32
                | TypeKind::U64
        )
    }

    #[must_use]
    pub fn is_bool(&self) -> bool {
        matches!(self.deref().kind, TypeKind::Bool)
    }

    /// Canonical type identifier used as the field-side key of the static
    /// assignability table. Pointer wrapping is normalized away; named types
    /// use their qualified name.
    #[must_use]
    pub fn canonical(&self) -> String {
        let ty = self.deref();
        if !ty.name.is_empty() {
            return if ty.pkg.is_empty() {
                ty.name.clone()
            } else {
                format!("{}::{}", ty.pkg, ty.name)
            };
        }

        match &ty.kind {
            TypeKind::Bool => "bool".to_string(),
            TypeKind::I8 => "i8".to_string(),
            TypeKind::I16 => "i16".to_string(),
            TypeKind::I32 => "i32".to_string(),
            TypeKind::I64 => "i64".to_string(),
            TypeKind::U8 => "u8".to_string(),
            TypeKind::U16 => "u16".to_string(),
            TypeKind::U32 => "u32".to_string(),
            TypeKind::U64 => "u64".to_string(),
            TypeKind::F32 => "f32".to_string(),
            TypeKind::F64 => "f64".to_string(),
            TypeKind::String => "String".to_string(),
            TypeKind::Bytes => "Vec<u8>".to_string(),
            TypeKind::Time => "Time".to_string(),
            TypeKind::Slice(elem) => format!("Vec<{}>", elem.canonical()),
            TypeKind::Array(len, elem) => format!("[{}; {len}]", elem.canonical()),
            TypeKind::Map(key, value) => {
                format!("Map<{}, {}>", key.canonical(), value.canonical())
            }
            TypeKind::Iterator { elem, .. } => elem.canonical(),
            TypeKind::Record(_) | TypeKind::Directive(_) | TypeKind::Opaque | TypeKind::Ptr(_) => {
                String::new()
            }
        }
    }

    /// Structural key of the underlying shape, used to short-circuit
    /// re-analysis of repeated record shapes.
    #[must_use]
    pub fn shape_key(&self) -> String {
        let mut out = String::new();
        self.write_shape_key(&mut out);

        out
    }

    fn write_shape_key(&self, out: &mut String) {
        if !self.name.is_empty() {
            let _ = write!(out, "{}::{};", self.pkg, self.name);
        }
        match &self.kind {
            TypeKind::Ptr(inner) => {
                out.push('*');
                inner.write_shape_key(out);
            }
            TypeKind::Slice(elem) => {
                out.push_str("[]");
                elem.write_shape_key(out);
            }
            TypeKind::Array(len, elem) => {
                let _ = write!(out, "[{len}]");
                elem.write_shape_key(out);
            }
            TypeKind::Map(key, value) => {
                out.push_str("map[");
                key.write_shape_key(out);
                out.push(']');
                value.write_shape_key(out);
            }
            TypeKind::Record(fields) => {
                out.push('{');
                for field in fields {
                    let _ = write!(out, "{} ", field.name);
                    field.ty.write_shape_key(out);
                    for (key, values) in field.tags.iter() {
                        let _ = write!(out, " `{key}:{}`", values.join(","));
                    }
                    out.push(';');
                }
                out.push('}');
            }
            TypeKind::Iterator { elem, method } => {
                let _ = write!(out, "iter[{}]", method.as_deref().unwrap_or(""));
                elem.write_shape_key(out);
            }
            TypeKind::Directive(d) => {
                let _ = write!(out, "@{}", d.name());
            }
            other => {
                let _ = write!(out, "{other:?}");
            }
        }
    }
}

///
/// TagMap
///
/// Per-field key → value-list annotation map. Values preserve their
/// declared order.
///

#[derive(Clone, Debug, Default, Deref, DerefMut, Eq, PartialEq, Serialize)]
pub struct TagMap(BTreeMap<String, Vec<String>>);

impl TagMap {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, values: &[&str]) -> Self {
        self.0.insert(
            key.into(),
            values.iter().map(ToString::to_string).collect(),
        );

        self
    }

    /// First value of a key, if any.
    #[must_use]
    pub fn first(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    /// All values of a key; empty when absent.
    #[must_use]
    pub fn values(&self, key: &str) -> &[String] {
        self.0.get(key).map_or(&[], Vec::as_slice)
    }

    /// Values after the first, typically the option list of a `sql` tag.
    #[must_use]
    pub fn options(&self, key: &str) -> &[String] {
        let values = self.values(key);
        if values.is_empty() { values } else { &values[1..] }
    }
}

///
/// FieldDesc
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FieldDesc {
    pub name: String,
    /// Whether the host language exposes the field to reflection-driven
    /// reads and writes.
    pub exported: bool,
    pub tags: TagMap,
    pub ty: TypeDesc,
}

impl FieldDesc {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: TypeDesc) -> Self {
        Self {
            name: name.into(),
            exported: true,
            tags: TagMap::new(),
            ty,
        }
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, values: &[&str]) -> Self {
        self.tags = self.tags.with(key, values);
        self
    }

    #[must_use]
    pub const fn unexported(mut self) -> Self {
        self.exported = false;
        self
    }
}
