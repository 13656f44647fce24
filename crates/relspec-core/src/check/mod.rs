//! Module: check
//! Responsibility: checking an unchecked query or filter spec against the
//! live catalog — relation resolution, column existence, predicate
//! comparability, assignability — and producing the generator-ready IR.
//! Does not own: annotation interpretation (analyze) or compatibility rules
//! (typecheck); it orchestrates them.
//!
//! Invariants:
//! - Fail fast: the first violation aborts the whole check.
//! - Binding lists preserve field-declaration order.
//! - The where-tree walk uses an explicit frame stack, mirroring the
//!   analyzer's traversal.

#[cfg(test)]
mod tests;

use crate::{
    catalog::{Catalog, CatalogError, Column, Index, Relation, category, oid},
    ident::ColId,
    ir::{
        BetweenBound, CheckedQuery, ColumnList, ColumnOperand, ColumnPredicate, ConditionKind,
        ConflictAction, ConflictTarget, FieldColumnBinding, FieldEntry, FieldPredicate,
        FilterSpec, QuerySpec, RecordType, Target, TransformTag, WhereSpec,
    },
    predicate::Predicate,
    typecheck::{AssignDirection, can_apply_modifier, can_assign, can_compare, field_oids},
};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error as ThisError;
use tracing::debug;

///
/// PredicateError
///
/// A where-tree or join condition that the catalog cannot satisfy.
///

#[derive(Clone, Debug, ThisError)]
pub enum PredicateError {
    #[error("{ty}.{field}: column '{column}' has no '{op}' operator for the given operand")]
    NotComparable {
        ty: String,
        field: String,
        column: String,
        op: &'static str,
    },

    #[error("{ty}.{field}: truth test on non-boolean column '{column}'")]
    NotBoolean {
        ty: String,
        field: String,
        column: String,
    },

    #[error("{ty}.{field}: null test on non-nullable column '{column}'")]
    NotNullable {
        ty: String,
        field: String,
        column: String,
    },

    #[error("{ty}.{field}: quantified predicate requires a slice or array field")]
    NotQuantifiable { ty: String, field: String },

    #[error("{ty}.{field}: quantifier requires an array right-hand side for column '{column}'")]
    NotArrayRhs {
        ty: String,
        field: String,
        column: String,
    },

    #[error("{ty}.{field}: pointer field cannot be matched against non-nullable column '{column}'")]
    NullablePointer {
        ty: String,
        field: String,
        column: String,
    },

    #[error("{ty}.{field}: modifier function '{name}' does not apply to column '{column}'")]
    BadModifier {
        ty: String,
        field: String,
        name: String,
        column: String,
    },
}

///
/// TypeCheckError
///

#[derive(Debug, ThisError)]
pub enum TypeCheckError {
    #[error("{ty}: relation '{rel}' not found")]
    RelationNotFound { ty: String, rel: String },

    #[error("{ty}.{field}: column '{column}' not found in relation '{relation}'")]
    ColumnNotFound {
        ty: String,
        field: String,
        column: String,
        relation: String,
    },

    #[error("{ty}.{field}: unknown relation qualifier '{qual}'")]
    UnknownQualifier {
        ty: String,
        field: String,
        qual: String,
    },

    #[error("{ty}.{field}: type is not assignable to column '{column}'")]
    NotAssignable {
        ty: String,
        field: String,
        column: String,
    },

    #[error("{ty}.{field}: column '{column}' has no default value")]
    NoColumnDefault {
        ty: String,
        field: String,
        column: String,
    },

    #[error("{ty}: data-driven {kind} requires a primary-key field")]
    NoPrimaryKey { ty: String, kind: &'static str },

    #[error("{ty}.{field}: join condition must reference joined relation '{rel}'")]
    JoinConditionScope {
        ty: String,
        field: String,
        rel: String,
    },

    #[error("{ty}: on-conflict target matches no unique index of '{relation}'")]
    ConflictTargetNotUnique { ty: String, relation: String },

    #[error("{ty}: on-conflict index '{name}' not found or not unique")]
    ConflictIndexNotFound { ty: String, name: String },

    #[error("{ty}: on-conflict constraint '{name}' not found")]
    ConflictConstraintNotFound { ty: String, name: String },

    #[error(transparent)]
    Predicate(#[from] PredicateError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

///
/// Checker
///
/// Checks one analyzed target against a catalog.
///

pub struct Checker<'a> {
    catalog: &'a Catalog,
}

struct RelMap {
    target: Arc<Relation>,
    by_key: HashMap<String, Arc<Relation>>,
}

impl RelMap {
    fn resolve<'m>(
        &'m self,
        ty: &str,
        field: &str,
        col: &ColId,
    ) -> Result<(&'m Relation, &'m Column), TypeCheckError> {
        let rel = if col.qual.is_empty() {
            &self.target
        } else {
            self.by_key
                .get(&col.qual)
                .ok_or_else(|| TypeCheckError::UnknownQualifier {
                    ty: ty.to_string(),
                    field: field.to_string(),
                    qual: col.qual.clone(),
                })?
        };

        let column = rel
            .column(&col.name)
            .ok_or_else(|| TypeCheckError::ColumnNotFound {
                ty: ty.to_string(),
                field: field.to_string(),
                column: col.name.clone(),
                relation: rel.name.clone(),
            })?;

        Ok((rel.as_ref(), column))
    }
}

impl<'a> Checker<'a> {
    #[must_use]
    pub const fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Check an analyzed target.
    pub fn check(&self, target: &Target) -> Result<Option<CheckedQuery>, TypeCheckError> {
        match target {
            Target::Query(spec) => self.check_query(spec).map(Some),
            Target::Filter(spec) => {
                self.check_filter(spec)?;
                Ok(None)
            }
        }
    }

    /// Check a query spec and produce the generator-ready IR.
    pub fn check_query(&self, spec: &QuerySpec) -> Result<CheckedQuery, TypeCheckError> {
        let ty = qualified(&spec.name, &spec.pkg);
        let rels = self.build_rel_map(&ty, spec)?;

        // Directive column lists resolve against the target relation.
        if let Some(defaults) = &spec.defaults {
            self.check_column_list(&ty, &rels, defaults, true)?;
        }
        if let Some(force) = &spec.force {
            self.check_column_list(&ty, &rels, force, false)?;
        }
        if let Some(returning) = &spec.returning {
            self.check_column_list(&ty, &rels, returning, false)?;
        }
        if let Some(order_by) = &spec.order_by {
            for item in order_by {
                rels.resolve(&ty, "orderby", &item.col)?;
            }
        }

        let mut out = CheckedQuery {
            spec: spec.clone(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            pkeys: Vec::new(),
            conflict_index: None,
        };

        if let Some(data) = &spec.data {
            self.bind_data_record(&ty, spec, &rels, &data.record, &mut out)?;
        }
        if let Some(result) = &spec.result {
            self.bind_outputs(&ty, &rels, &result.record, &mut out.outputs)?;
        }

        // A data-driven row set needs primary keys to address the rows.
        if spec.kind.needs_row_set()
            && spec.data.is_some()
            && !spec.all
            && spec.where_spec.is_none()
            && spec.filter.is_none()
            && out.pkeys.is_empty()
        {
            return Err(TypeCheckError::NoPrimaryKey {
                ty,
                kind: if spec.kind.is_write() { "update" } else { "delete" },
            });
        }

        if let Some(where_spec) = &spec.where_spec {
            self.check_where(&ty, &rels, where_spec)?;
        }
        if let Some(joins) = &spec.joins {
            self.check_joins(&ty, &rels, joins)?;
        }
        if let Some(on_conflict) = &spec.on_conflict {
            out.conflict_index = self.check_on_conflict(&ty, &rels, on_conflict)?;
        }

        debug!(
            ty = %spec.name,
            inputs = out.inputs.len(),
            outputs = out.outputs.len(),
            "checked query"
        );

        Ok(out)
    }

    /// Check a filter spec: the relation must exist and every data field
    /// must be readable from its column.
    pub fn check_filter(&self, spec: &FilterSpec) -> Result<(), TypeCheckError> {
        let ty = qualified(&spec.name, &spec.pkg);

        let rel = self.load(&ty, &spec.data.rel.qual, &spec.data.rel.name)?;
        let mut by_key = HashMap::new();
        by_key.insert(spec.data.rel.key().to_string(), Arc::clone(&rel));
        let rels = RelMap {
            target: rel,
            by_key,
        };

        let mut outputs = Vec::new();
        self.bind_outputs(&ty, &rels, &spec.data.record, &mut outputs)?;

        if let Some(col) = &spec.text_search {
            let (_, column) = rels.resolve(&ty, "textsearch", col)?;
            if !matches!(column.type_oid, oid::TSVECTOR | oid::TEXT | oid::VARCHAR) {
                return Err(TypeCheckError::NotAssignable {
                    ty,
                    field: "textsearch".to_string(),
                    column: column.name.clone(),
                });
            }
        }

        Ok(())
    }

    fn load(&self, ty: &str, qual: &str, name: &str) -> Result<Arc<Relation>, TypeCheckError> {
        let id = crate::ident::RelId {
            qual: qual.to_string(),
            name: name.to_string(),
            alias: String::new(),
        };

        self.catalog
            .load_relation(&id)?
            .ok_or_else(|| TypeCheckError::RelationNotFound {
                ty: ty.to_string(),
                rel: if qual.is_empty() {
                    name.to_string()
                } else {
                    format!("{qual}.{name}")
                },
            })
    }

    fn build_rel_map(&self, ty: &str, spec: &QuerySpec) -> Result<RelMap, TypeCheckError> {
        let target = self.load(ty, &spec.rel.qual, &spec.rel.name)?;

        let mut by_key = HashMap::new();
        by_key.insert(spec.rel.key().to_string(), Arc::clone(&target));

        if let Some(joins) = &spec.joins {
            if let Some(rel_id) = &joins.rel {
                let rel = self.load(ty, &rel_id.qual, &rel_id.name)?;
                by_key.insert(rel_id.key().to_string(), rel);
            }
            for item in &joins.items {
                let rel = self.load(ty, &item.rel.qual, &item.rel.name)?;
                by_key.insert(item.rel.key().to_string(), rel);
            }
        }

        Ok(RelMap { target, by_key })
    }

    fn check_column_list(
        &self,
        ty: &str,
        rels: &RelMap,
        list: &ColumnList,
        need_default: bool,
    ) -> Result<(), TypeCheckError> {
        let ColumnList::Columns(cols) = list else {
            return Ok(());
        };

        for col in cols {
            let (_, column) = rels.resolve(ty, "directive", col)?;
            if need_default && !column.has_default {
                return Err(TypeCheckError::NoColumnDefault {
                    ty: ty.to_string(),
                    field: "directive".to_string(),
                    column: column.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Bind the data record's fields in declaration order: write kinds
    /// accumulate inputs and primary keys, read kinds accumulate outputs.
    fn bind_data_record(
        &self,
        ty: &str,
        spec: &QuerySpec,
        rels: &RelMap,
        record: &RecordType,
        out: &mut CheckedQuery,
    ) -> Result<(), TypeCheckError> {
        for field in &record.fields {
            let (_, column) = rels.resolve(ty, &field.name, &field.col)?;

            if spec.kind.is_write() {
                if field.is_pkey {
                    self.require_assign(ty, field, column, AssignDirection::Write)?;
                    out.pkeys.push(binding(field, column));
                    // Inserts also write the key column itself; updates only
                    // address rows with it.
                    if spec.kind == crate::ir::QueryKind::Insert && !field.read_only {
                        out.inputs.push(binding(field, column));
                    }
                } else if !field.read_only {
                    self.require_assign(ty, field, column, AssignDirection::Write)?;
                    out.inputs.push(binding(field, column));
                }
                // RETURNING reads selected columns back into the record.
                if let Some(returning) = &spec.returning {
                    if !field.write_only && list_contains(returning, &field.col) {
                        self.require_assign(ty, field, column, AssignDirection::Read)?;
                        out.outputs.push(binding(field, column));
                    }
                }
                continue;
            }

            if spec.kind == crate::ir::QueryKind::Delete {
                if field.is_pkey {
                    self.require_assign(ty, field, column, AssignDirection::Write)?;
                    out.pkeys.push(binding(field, column));
                }
                continue;
            }

            // Select kinds read every non-write-only field.
            if !field.write_only {
                self.require_assign(ty, field, column, AssignDirection::Read)?;
                out.outputs.push(binding(field, column));
            }
        }

        Ok(())
    }

    fn bind_outputs(
        &self,
        ty: &str,
        rels: &RelMap,
        record: &RecordType,
        outputs: &mut Vec<FieldColumnBinding>,
    ) -> Result<(), TypeCheckError> {
        for field in &record.fields {
            if field.write_only {
                continue;
            }
            let (_, column) = rels.resolve(ty, &field.name, &field.col)?;
            self.require_assign(ty, field, column, AssignDirection::Read)?;
            outputs.push(binding(field, column));
        }

        Ok(())
    }

    fn require_assign(
        &self,
        ty: &str,
        field: &FieldEntry,
        column: &Column,
        dir: AssignDirection,
    ) -> Result<(), TypeCheckError> {
        if can_assign(&self.catalog.snapshot, column, field, dir) {
            Ok(())
        } else {
            Err(TypeCheckError::NotAssignable {
                ty: ty.to_string(),
                field: field.name.clone(),
                column: column.name.clone(),
            })
        }
    }

    /// Walk the where tree with an explicit frame stack, checking each
    /// condition against the catalog.
    fn check_where(
        &self,
        ty: &str,
        rels: &RelMap,
        where_spec: &WhereSpec,
    ) -> Result<(), TypeCheckError> {
        let mut stack: Vec<(&WhereSpec, usize)> = vec![(where_spec, 0)];

        while let Some(frame) = stack.last_mut() {
            // Copy the group reference out so conditions borrowed from it
            // stay valid across pushes onto the stack.
            let group = frame.0;
            let Some(cond) = group.get(frame.1) else {
                stack.pop();
                continue;
            };
            frame.1 += 1;

            match &cond.kind {
                ConditionKind::Field(pred) => self.check_field_predicate(ty, rels, pred)?,
                ConditionKind::Column(pred) => {
                    self.check_column_predicate(ty, rels, "column", pred)?;
                }
                ConditionKind::Between(between) => {
                    let (_, column) = rels.resolve(ty, &between.field_name, &between.col)?;
                    for bound in [&between.x, &between.y] {
                        match bound {
                            BetweenBound::Field { name, ty: field_ty } => {
                                let candidates = field_oids(field_ty);
                                if !can_compare(
                                    &self.catalog.snapshot,
                                    column,
                                    &candidates,
                                    between.pred,
                                ) {
                                    return Err(PredicateError::NotComparable {
                                        ty: ty.to_string(),
                                        field: name.clone(),
                                        column: column.name.clone(),
                                        op: between.pred.as_str(),
                                    }
                                    .into());
                                }
                            }
                            BetweenBound::Col(col) => {
                                let (_, bound_col) =
                                    rels.resolve(ty, &between.field_name, col)?;
                                if !can_compare(
                                    &self.catalog.snapshot,
                                    column,
                                    &[bound_col.type_oid],
                                    between.pred,
                                ) {
                                    return Err(PredicateError::NotComparable {
                                        ty: ty.to_string(),
                                        field: between.field_name.clone(),
                                        column: column.name.clone(),
                                        op: between.pred.as_str(),
                                    }
                                    .into());
                                }
                            }
                        }
                    }
                }
                ConditionKind::Group(nested) => {
                    stack.push((nested, 0));
                }
            }
        }

        Ok(())
    }

    fn check_field_predicate(
        &self,
        ty: &str,
        rels: &RelMap,
        pred: &FieldPredicate,
    ) -> Result<(), TypeCheckError> {
        let snap = &self.catalog.snapshot;
        let (_, column) = rels.resolve(ty, &pred.field_name, &pred.col)?;

        self.check_unary(ty, &pred.field_name, column, pred.pred)?;
        if pred.pred.is_unary() {
            return Ok(());
        }

        // A pointer field may be nil; a not-null column can never match it.
        if column.not_null && pred.field_ty.is_pointer() {
            return Err(PredicateError::NullablePointer {
                ty: ty.to_string(),
                field: pred.field_name.clone(),
                column: column.name.clone(),
            }
            .into());
        }

        // A quantified predicate compares the column against each element.
        let candidates = if pred.quant.is_some() {
            let Some(elem) = pred.field_ty.sequence_elem() else {
                return Err(PredicateError::NotQuantifiable {
                    ty: ty.to_string(),
                    field: pred.field_name.clone(),
                }
                .into());
            };
            field_oids(elem)
        } else {
            field_oids(&pred.field_ty)
        };

        if let Some(name) = &pred.modifier {
            if !can_apply_modifier(snap, name, column, &candidates) {
                return Err(PredicateError::BadModifier {
                    ty: ty.to_string(),
                    field: pred.field_name.clone(),
                    name: name.clone(),
                    column: column.name.clone(),
                }
                .into());
            }
            return Ok(());
        }

        if !can_compare(snap, column, &candidates, pred.pred) {
            return Err(PredicateError::NotComparable {
                ty: ty.to_string(),
                field: pred.field_name.clone(),
                column: column.name.clone(),
                op: pred.pred.as_str(),
            }
            .into());
        }

        Ok(())
    }

    fn check_column_predicate(
        &self,
        ty: &str,
        rels: &RelMap,
        field: &str,
        pred: &ColumnPredicate,
    ) -> Result<(), TypeCheckError> {
        let snap = &self.catalog.snapshot;
        let (_, column) = rels.resolve(ty, field, &pred.col)?;

        self.check_unary(ty, field, column, pred.pred)?;
        if pred.pred.is_unary() {
            return Ok(());
        }

        let candidates = match &pred.rhs {
            ColumnOperand::Col(col) => {
                let (_, rhs) = rels.resolve(ty, field, col)?;
                // The quantifier ranges over the right-hand side's elements,
                // so comparability is checked against the element type.
                if pred.quant.is_some() {
                    if !rhs.ty.is_array() {
                        return Err(PredicateError::NotArrayRhs {
                            ty: ty.to_string(),
                            field: field.to_string(),
                            column: rhs.name.clone(),
                        }
                        .into());
                    }
                    vec![rhs.ty.elem]
                } else {
                    vec![rhs.type_oid]
                }
            }
            ColumnOperand::Lit(_) if pred.quant.is_some() => {
                return Err(PredicateError::NotArrayRhs {
                    ty: ty.to_string(),
                    field: field.to_string(),
                    column: column.name.clone(),
                }
                .into());
            }
            // Untyped literals resolve to the column's own type first, the
            // way the database planner would read them.
            ColumnOperand::Lit(_) => vec![column.type_oid, oid::UNKNOWN],
            ColumnOperand::None => Vec::new(),
        };

        if !can_compare(snap, column, &candidates, pred.pred) {
            return Err(PredicateError::NotComparable {
                ty: ty.to_string(),
                field: field.to_string(),
                column: column.name.clone(),
                op: pred.pred.as_str(),
            }
            .into());
        }

        Ok(())
    }

    /// Unary predicates constrain the column itself: truth tests need a
    /// boolean column, null tests need a nullable one.
    fn check_unary(
        &self,
        ty: &str,
        field: &str,
        column: &Column,
        pred: Predicate,
    ) -> Result<(), TypeCheckError> {
        if pred.is_truth() && column.ty.category != category::BOOLEAN {
            return Err(PredicateError::NotBoolean {
                ty: ty.to_string(),
                field: field.to_string(),
                column: column.name.clone(),
            }
            .into());
        }
        if pred.is_null_form() && column.not_null {
            return Err(PredicateError::NotNullable {
                ty: ty.to_string(),
                field: field.to_string(),
                column: column.name.clone(),
            }
            .into());
        }

        Ok(())
    }

    fn check_joins(
        &self,
        ty: &str,
        rels: &RelMap,
        joins: &crate::ir::JoinSpec,
    ) -> Result<(), TypeCheckError> {
        for item in &joins.items {
            let key = item.rel.key();

            for cond in &item.conds {
                // The left side scopes the condition to the joined relation.
                let qual = cond.pred.col.qual.as_str();
                if !qual.is_empty() && qual != key {
                    return Err(TypeCheckError::JoinConditionScope {
                        ty: ty.to_string(),
                        field: cond.pred.col.name.clone(),
                        rel: key.to_string(),
                    });
                }

                // Unqualified join columns resolve in the joined relation,
                // not the target.
                let mut col = cond.pred.col.clone();
                if col.qual.is_empty() {
                    col.qual = key.to_string();
                }
                let pred = ColumnPredicate {
                    col,
                    ..cond.pred.clone()
                };
                self.check_column_predicate(ty, rels, "join", &pred)?;
            }
        }

        Ok(())
    }

    /// Resolve the on-conflict target to a unique index of the target
    /// relation and validate the update column list.
    fn check_on_conflict(
        &self,
        ty: &str,
        rels: &RelMap,
        spec: &crate::ir::OnConflictSpec,
    ) -> Result<Option<Index>, TypeCheckError> {
        let rel = &rels.target;

        let index = match &spec.target {
            Some(ConflictTarget::Columns(cols)) => {
                let mut nums = Vec::with_capacity(cols.len());
                for col in cols {
                    let (_, column) = rels.resolve(ty, "onconflict", col)?;
                    nums.push(column.num);
                }
                nums.sort_unstable();

                let found = rel.indexes.iter().find(|index| {
                    let mut key = index.key.clone();
                    key.sort_unstable();
                    index.is_unique && index.is_ready && key == nums
                });
                match found {
                    Some(index) => Some(index.clone()),
                    None => {
                        return Err(TypeCheckError::ConflictTargetNotUnique {
                            ty: ty.to_string(),
                            relation: rel.name.clone(),
                        });
                    }
                }
            }
            Some(ConflictTarget::Index(name)) => {
                let found = rel.index(name).filter(|i| i.is_unique && i.is_ready);
                match found {
                    Some(index) => Some(index.clone()),
                    None => {
                        return Err(TypeCheckError::ConflictIndexNotFound {
                            ty: ty.to_string(),
                            name: name.clone(),
                        });
                    }
                }
            }
            Some(ConflictTarget::Constraint(name)) => {
                if rel.constraint(name).is_none() {
                    return Err(TypeCheckError::ConflictConstraintNotFound {
                        ty: ty.to_string(),
                        name: name.clone(),
                    });
                }
                // Unique and primary constraints back an index of the same
                // name.
                rel.index(name).cloned()
            }
            None => None,
        };

        if let Some(ConflictAction::Update(list)) = &spec.action {
            self.check_column_list(ty, rels, list, false)?;
        }

        Ok(index)
    }
}

fn qualified(name: &str, pkg: &str) -> String {
    if pkg.is_empty() {
        name.to_string()
    } else {
        format!("{pkg}::{name}")
    }
}

fn binding(field: &FieldEntry, column: &Column) -> FieldColumnBinding {
    let transform = if field.use_json {
        TransformTag::Json
    } else if field.use_xml {
        TransformTag::Xml
    } else if matches!(column.type_oid, oid::JSON | oid::JSONB)
        && field.ty.deref().caps.json
        && !matches!(field.ty.canonical().as_str(), "String" | "Vec<u8>")
    {
        TransformTag::Json
    } else {
        TransformTag::None
    };

    FieldColumnBinding {
        field: field.clone(),
        column: column.clone(),
        col_id: field.col.clone(),
        transform,
    }
}

fn list_contains(list: &ColumnList, col: &ColId) -> bool {
    match list {
        ColumnList::All => true,
        ColumnList::Columns(cols) => cols.iter().any(|c| c.name == col.name),
    }
}
