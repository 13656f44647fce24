//! Module: ir
//! Responsibility: the typed intermediate representation built by the
//! analyzer and enriched by the checker.
//! Does not own: annotation parsing or catalog contact.
//!
//! Invariants:
//! - The unchecked IR is immutable after analysis; the checker only appends
//!   to the binding lists of [`CheckedQuery`].
//! - Sibling where-condition order and connective association are preserved
//!   exactly as declared; generated SQL precedence depends on it.

use crate::{
    catalog::{Column, Index},
    ident::{ColId, RelId},
    predicate::{Predicate, Quantifier},
    reflect::TypeDesc,
};
use derive_more::{Deref, DerefMut, IntoIterator};
use serde::Serialize;

///
/// QueryKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum QueryKind {
    Insert,
    Update,
    Select,
    SelectCount,
    SelectExists,
    SelectNotExists,
    Delete,
}

impl QueryKind {
    /// Write kinds produce input bindings and primary-key bindings.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Insert | Self::Update)
    }

    /// Kinds whose affected row set must come from exactly one of
    /// {data field, all flag, where spec, filter field}.
    #[must_use]
    pub const fn needs_row_set(self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }

    #[must_use]
    pub const fn is_select(self) -> bool {
        matches!(
            self,
            Self::Select | Self::SelectCount | Self::SelectExists | Self::SelectNotExists
        )
    }
}

///
/// OverrideKind
///
/// `OVERRIDING { SYSTEM | USER } VALUE` on an insert.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum OverrideKind {
    System,
    User,
}

///
/// QuerySpec
///
/// The unchecked IR of one annotated query record type.
///

#[derive(Clone, Debug, Serialize)]
pub struct QuerySpec {
    /// Record type name, as reported by the reflection layer.
    pub name: String,
    /// Owning package path, for diagnostics.
    pub pkg: String,
    pub kind: QueryKind,
    /// Target relation, taken from the relation-binding field.
    pub rel: RelId,

    pub data: Option<DataField>,
    pub all: bool,
    pub where_spec: Option<WhereSpec>,
    /// Named filter-field reference; mutually exclusive with `all` and
    /// `where_spec`.
    pub filter: Option<String>,

    pub joins: Option<JoinSpec>,
    pub on_conflict: Option<OnConflictSpec>,
    pub order_by: Option<OrderBySpec>,
    pub limit: Option<LimitSpec>,
    pub offset: Option<OffsetSpec>,
    pub override_kind: Option<OverrideKind>,

    pub result: Option<ResultField>,
    pub rows_affected: Option<RowsAffectedField>,
    pub returning: Option<ColumnList>,
    pub defaults: Option<ColumnList>,
    pub force: Option<ColumnList>,
    pub error_handler: Option<ErrorHandlerField>,
}

impl QuerySpec {
    #[must_use]
    pub fn new(name: impl Into<String>, pkg: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            name: name.into(),
            pkg: pkg.into(),
            kind,
            rel: RelId::default(),
            data: None,
            all: false,
            where_spec: None,
            filter: None,
            joins: None,
            on_conflict: None,
            order_by: None,
            limit: None,
            offset: None,
            override_kind: None,
            result: None,
            rows_affected: None,
            returning: None,
            defaults: None,
            force: None,
            error_handler: None,
        }
    }
}

///
/// FilterSpec
///
/// The unchecked IR of one annotated filter record type.
///

#[derive(Clone, Debug, Serialize)]
pub struct FilterSpec {
    pub name: String,
    pub pkg: String,
    pub data: DataField,
    pub text_search: Option<ColId>,
}

///
/// Target
///
/// What the analyzer produced for one record type.
///

#[derive(Clone, Debug, Serialize)]
pub enum Target {
    Query(QuerySpec),
    Filter(FilterSpec),
}

///
/// DataField
///
/// The unique relation-binding field and the record shape it reads/writes.
///

#[derive(Clone, Debug, Serialize)]
pub struct DataField {
    pub name: String,
    pub rel: RelId,
    pub record: RecordType,
}

///
/// RecordType
///

#[derive(Clone, Debug, Serialize)]
pub struct RecordType {
    /// Named-type identity of the base record, empty for anonymous shapes.
    pub base_name: String,
    pub base_pkg: String,
    pub imported: bool,

    pub is_pointer: bool,
    pub is_slice: bool,
    pub is_array: bool,
    pub array_len: usize,
    pub is_iter: bool,
    pub iter_method: Option<String>,

    pub fields: Vec<FieldEntry>,
}

///
/// FieldNode
///
/// One ancestor hop in the path of a nested ("descend") record field.
///

#[derive(Clone, Debug, Serialize)]
pub struct FieldNode {
    pub name: String,
    pub is_pointer: bool,
}

///
/// FieldEntry
///
/// One data-carrying field resolved to a column reference plus its
/// behavior options.
///

#[derive(Clone, Debug, Serialize)]
pub struct FieldEntry {
    pub name: String,
    pub ty: TypeDesc,
    /// Ancestor path for nested records, outermost first.
    pub path: Vec<FieldNode>,
    pub col: ColId,

    pub is_pkey: bool,
    pub null_empty: bool,
    pub read_only: bool,
    pub write_only: bool,
    pub use_json: bool,
    pub use_xml: bool,
    pub use_add: bool,
    pub can_cast: bool,
    pub use_default: bool,
    pub use_coalesce: bool,
    pub coalesce_value: Option<String>,
}

impl FieldEntry {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: TypeDesc, col: ColId) -> Self {
        Self {
            name: name.into(),
            ty,
            path: Vec::new(),
            col,
            is_pkey: false,
            null_empty: false,
            read_only: false,
            write_only: false,
            use_json: false,
            use_xml: false,
            use_add: false,
            can_cast: false,
            use_default: false,
            use_coalesce: false,
            coalesce_value: None,
        }
    }
}

///
/// Connective
///
/// Boolean connective of a where-condition relative to its previous
/// sibling. The first condition of a group carries `None`.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum Connective {
    #[default]
    None,
    And,
    Or,
}

///
/// WhereSpec
///

#[derive(Clone, Debug, Default, Deref, DerefMut, IntoIterator, Serialize)]
pub struct WhereSpec {
    #[deref]
    #[deref_mut]
    #[into_iterator(ref)]
    pub conds: Vec<SearchCondition>,
}

///
/// SearchCondition
///

#[derive(Clone, Debug, Serialize)]
pub struct SearchCondition {
    pub connective: Connective,
    pub kind: ConditionKind,
}

///
/// ConditionKind
///
/// Closed payload set; checker dispatch over it is exhaustive.
///

#[derive(Clone, Debug, Serialize)]
pub enum ConditionKind {
    Field(FieldPredicate),
    Column(ColumnPredicate),
    Between(BetweenPredicate),
    Group(WhereSpec),
}

///
/// FieldPredicate
///
/// `<column> <op> <field value>` — the right-hand side is the field's own
/// runtime value.
///

#[derive(Clone, Debug, Serialize)]
pub struct FieldPredicate {
    pub field_name: String,
    pub field_ty: TypeDesc,
    pub col: ColId,
    pub pred: Predicate,
    pub quant: Option<Quantifier>,
    /// Single-argument column modifier function (`@lower` and friends).
    pub modifier: Option<String>,
}

///
/// ColumnOperand
///

#[derive(Clone, Debug, Serialize)]
pub enum ColumnOperand {
    None,
    Col(ColId),
    Lit(String),
}

///
/// ColumnPredicate
///
/// A column directive: both sides are database expressions; no host field
/// is involved.
///

#[derive(Clone, Debug, Serialize)]
pub struct ColumnPredicate {
    pub col: ColId,
    pub pred: Predicate,
    pub quant: Option<Quantifier>,
    pub rhs: ColumnOperand,
}

///
/// BetweenBound
///

#[derive(Clone, Debug, Serialize)]
pub enum BetweenBound {
    Field { name: String, ty: TypeDesc },
    Col(ColId),
}

///
/// BetweenPredicate
///
/// A range predicate whose two bounds come from a nested two-member record
/// marked `x`/`y`.
///

#[derive(Clone, Debug, Serialize)]
pub struct BetweenPredicate {
    pub field_name: String,
    pub col: ColId,
    pub pred: Predicate,
    pub x: BetweenBound,
    pub y: BetweenBound,
}

///
/// JoinKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum JoinKind {
    Left,
    Right,
    Full,
    Cross,
}

///
/// JoinCond
///

#[derive(Clone, Debug, Serialize)]
pub struct JoinCond {
    pub connective: Connective,
    pub pred: ColumnPredicate,
}

///
/// JoinItem
///

#[derive(Clone, Debug, Serialize)]
pub struct JoinItem {
    pub kind: JoinKind,
    pub rel: RelId,
    pub conds: Vec<JoinCond>,
}

///
/// JoinSpec
///
/// `JOIN`/`FROM`/`USING` block: an optional top relation plus ordered join
/// items.
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct JoinSpec {
    pub rel: Option<RelId>,
    pub items: Vec<JoinItem>,
}

///
/// ConflictTarget
///

#[derive(Clone, Debug, Serialize)]
pub enum ConflictTarget {
    Columns(Vec<ColId>),
    Index(String),
    Constraint(String),
}

///
/// ConflictAction
///

#[derive(Clone, Debug, Serialize)]
pub enum ConflictAction {
    Ignore,
    Update(ColumnList),
}

///
/// OnConflictSpec
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct OnConflictSpec {
    pub target: Option<ConflictTarget>,
    pub action: Option<ConflictAction>,
}

///
/// NullsPosition
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum NullsPosition {
    First,
    Last,
}

///
/// OrderByItem
///

#[derive(Clone, Debug, Serialize)]
pub struct OrderByItem {
    pub col: ColId,
    pub descending: bool,
    pub nulls: Option<NullsPosition>,
}

///
/// OrderBySpec
///

#[derive(Clone, Debug, Default, Deref, DerefMut, IntoIterator, Serialize)]
pub struct OrderBySpec {
    #[deref]
    #[deref_mut]
    #[into_iterator(ref)]
    pub items: Vec<OrderByItem>,
}

///
/// LimitSpec
///
/// Either a field supplying the value at runtime, a static default from the
/// directive tag, or both (the field value wins when non-zero).
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct LimitSpec {
    pub field: Option<String>,
    pub value: Option<u64>,
}

///
/// OffsetSpec
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct OffsetSpec {
    pub field: Option<String>,
    pub value: Option<u64>,
}

///
/// ResultField
///

#[derive(Clone, Debug, Serialize)]
pub struct ResultField {
    pub name: String,
    pub record: RecordType,
}

///
/// RowsAffectedField
///

#[derive(Clone, Debug, Serialize)]
pub struct RowsAffectedField {
    pub name: String,
}

///
/// ErrorHandlerField
///

#[derive(Clone, Debug, Serialize)]
pub struct ErrorHandlerField {
    pub name: String,
    /// Whether the handler also receives error info.
    pub info: bool,
}

///
/// ColumnList
///
/// A directive column list, or `*` meaning "all".
///

#[derive(Clone, Debug, Serialize)]
pub enum ColumnList {
    All,
    Columns(Vec<ColId>),
}

///
/// TransformTag
///
/// Per-field (de)serialization strategy chosen for the generator.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum TransformTag {
    #[default]
    None,
    Json,
    Xml,
}

///
/// FieldColumnBinding
///
/// A resolved field-to-column pair accumulated by the checker.
///

#[derive(Clone, Debug, Serialize)]
pub struct FieldColumnBinding {
    pub field: FieldEntry,
    pub column: Column,
    /// Externally-visible qualified column id.
    pub col_id: ColId,
    pub transform: TransformTag,
}

///
/// CheckedQuery
///
/// The generator-ready enriched IR.
///

#[derive(Clone, Debug, Serialize)]
pub struct CheckedQuery {
    pub spec: QuerySpec,
    /// Ordered input bindings (write direction), in field-declaration order.
    pub inputs: Vec<FieldColumnBinding>,
    /// Ordered output bindings (read direction), in field-declaration order.
    pub outputs: Vec<FieldColumnBinding>,
    /// Primary-key bindings; populated for write kinds only.
    pub pkeys: Vec<FieldColumnBinding>,
    /// The unique/primary index resolved from the on-conflict target.
    pub conflict_index: Option<Index>,
}
