use super::*;
use crate::{
    analyze::{Analyzer, TypeShapeCache},
    catalog::{CatalogCache, CatalogSource},
    ir::QueryKind,
    reflect::{Directive, FieldDesc, TypeDesc},
    test_fixtures::{
        FixtureCatalog, directive, directive_field, i32_ty, i64_ty, named_record, ptr, record,
        slice_of, string_ty,
    },
};
use std::sync::Arc;

fn catalog() -> Catalog {
    let source = Arc::new(FixtureCatalog::new("db://check"));

    Catalog::open(source as Arc<dyn CatalogSource>, &CatalogCache::new())
        .expect("fixture catalog opens")
}

fn check(ty: &TypeDesc) -> Result<CheckedQuery, TypeCheckError> {
    let shapes = TypeShapeCache::new();
    let target = Analyzer::new(&shapes).analyze(ty).expect("analysis succeeds");
    let catalog = catalog();

    match target {
        Target::Query(spec) => Checker::new(&catalog).check_query(&spec),
        Target::Filter(spec) => {
            panic!("expected a query type, got filter {}", spec.name)
        }
    }
}

fn check_err(ty: &TypeDesc) -> TypeCheckError {
    match check(ty) {
        Err(err) => err,
        Ok(_) => panic!("expected a check failure"),
    }
}

fn user_record() -> TypeDesc {
    named_record(
        "User",
        vec![
            FieldDesc::new("id", i64_ty()).tag("sql", &["id", "pk"]),
            FieldDesc::new("name", string_ty()).tag("sql", &["name"]),
            FieldDesc::new("email", string_ty()).tag("sql", &["email"]),
        ],
    )
}

fn rel_field(name: &str, ty: TypeDesc) -> FieldDesc {
    FieldDesc::new(name, ty).tag("rel", &["users_table:u"])
}

fn query_type(name: &str, fields: Vec<FieldDesc>) -> TypeDesc {
    record(fields).named(name, "app")
}

fn where_field(members: Vec<FieldDesc>) -> FieldDesc {
    FieldDesc::new("Where", record(members))
}

#[test]
fn select_binds_outputs_in_declaration_order() {
    let ty = query_type(
        "SelectUsers",
        vec![
            rel_field("users", slice_of(user_record())),
            where_field(vec![FieldDesc::new("name", string_ty()).tag("sql", &["name"])]),
        ],
    );

    let checked = check(&ty).expect("checks clean");
    assert_eq!(checked.spec.kind, QueryKind::Select);
    assert!(checked.inputs.is_empty());
    assert!(checked.pkeys.is_empty());

    let cols: Vec<_> = checked.outputs.iter().map(|b| b.column.name.as_str()).collect();
    assert_eq!(cols, ["id", "name", "email"]);
    assert_eq!(checked.outputs[0].column.type_oid, crate::catalog::oid::INT8);

    // The checked IR feeds downstream generators as data.
    let json = serde_json::to_value(&checked).expect("checked IR serializes");
    assert_eq!(json["spec"]["kind"], "Select");
}

#[test]
fn missing_relation_is_a_structured_error() {
    let user = named_record(
        "User",
        vec![FieldDesc::new("id", i64_ty()).tag("sql", &["id", "pk"])],
    );
    let ty = query_type(
        "SelectUsers",
        vec![FieldDesc::new("users", slice_of(user)).tag("rel", &["nope_table"])],
    );

    assert!(matches!(
        check_err(&ty),
        TypeCheckError::RelationNotFound { rel, .. } if rel == "nope_table"
    ));
}

#[test]
fn unknown_column_names_column_and_relation() {
    let user = named_record(
        "User",
        vec![FieldDesc::new("nick", string_ty()).tag("sql", &["nickname"])],
    );
    let ty = query_type("SelectUsers", vec![rel_field("users", slice_of(user))]);

    assert!(matches!(
        check_err(&ty),
        TypeCheckError::ColumnNotFound { column, relation, .. }
            if column == "nickname" && relation == "users_table"
    ));
}

#[test]
fn unknown_qualifier_is_rejected() {
    let ty = query_type(
        "SelectUsers",
        vec![
            rel_field("users", slice_of(user_record())),
            where_field(vec![FieldDesc::new("name", string_ty()).tag("sql", &["z.name"])]),
        ],
    );

    assert!(matches!(
        check_err(&ty),
        TypeCheckError::UnknownQualifier { qual, .. } if qual == "z"
    ));
}

#[test]
fn insert_binds_inputs_pkeys_and_returning() {
    let ty = query_type(
        "InsertUser",
        vec![
            rel_field("user", user_record()),
            directive_field(Directive::Return).tag("sql", &["id"]),
        ],
    );

    let checked = check(&ty).expect("checks clean");
    let inputs: Vec<_> = checked.inputs.iter().map(|b| b.column.name.as_str()).collect();
    assert_eq!(inputs, ["id", "name", "email"]);

    let pkeys: Vec<_> = checked.pkeys.iter().map(|b| b.column.name.as_str()).collect();
    assert_eq!(pkeys, ["id"]);

    let outputs: Vec<_> = checked.outputs.iter().map(|b| b.column.name.as_str()).collect();
    assert_eq!(outputs, ["id"]);
}

#[test]
fn data_driven_update_requires_a_primary_key() {
    let keyless = named_record(
        "User",
        vec![FieldDesc::new("name", string_ty()).tag("sql", &["name"])],
    );
    let ty = query_type("UpdateUser", vec![rel_field("user", keyless)]);
    assert!(matches!(check_err(&ty), TypeCheckError::NoPrimaryKey { .. }));

    let ty = query_type("UpdateUser", vec![rel_field("user", user_record())]);
    let checked = check(&ty).expect("checks clean");
    // The key addresses rows; it is not part of the SET list.
    let inputs: Vec<_> = checked.inputs.iter().map(|b| b.column.name.as_str()).collect();
    assert_eq!(inputs, ["name", "email"]);
    assert_eq!(checked.pkeys.len(), 1);
}

#[test]
fn assignability_gates_data_bindings() {
    let user = named_record(
        "User",
        vec![FieldDesc::new("name", i64_ty()).tag("sql", &["name"])],
    );
    let ty = query_type("InsertUser", vec![rel_field("user", user)]);

    assert!(matches!(
        check_err(&ty),
        TypeCheckError::NotAssignable { column, .. } if column == "name"
    ));
}

#[test]
fn where_predicates_are_checked_against_operators() {
    let select = |member: FieldDesc| {
        query_type(
            "SelectUsers",
            vec![rel_field("users", slice_of(user_record())), where_field(vec![member])],
        )
    };

    // int4 column vs string field: no operator.
    let ty = select(FieldDesc::new("age", string_ty()).tag("sql", &["age >"]));
    assert!(matches!(
        check_err(&ty),
        TypeCheckError::Predicate(PredicateError::NotComparable { column, .. })
            if column == "age"
    ));

    // Truth tests need boolean columns.
    let ty = select(FieldDesc::new("active", i64_ty()).tag("sql", &["is_active istrue"]));
    check(&ty).expect("boolean truth test checks clean");

    let ty = select(FieldDesc::new("named", i64_ty()).tag("sql", &["name istrue"]));
    assert!(matches!(
        check_err(&ty),
        TypeCheckError::Predicate(PredicateError::NotBoolean { column, .. })
            if column == "name"
    ));

    // Null tests need nullable columns.
    let ty = select(FieldDesc::new("email", i64_ty()).tag("sql", &["email isnull"]));
    check(&ty).expect("nullable null test checks clean");

    let ty = select(FieldDesc::new("named", i64_ty()).tag("sql", &["name isnull"]));
    assert!(matches!(
        check_err(&ty),
        TypeCheckError::Predicate(PredicateError::NotNullable { column, .. })
            if column == "name"
    ));
}

#[test]
fn quantified_predicates_need_sequence_fields() {
    let select = |member: FieldDesc| {
        query_type(
            "SelectUsers",
            vec![rel_field("users", slice_of(user_record())), where_field(vec![member])],
        )
    };

    let ty = select(FieldDesc::new("ids", slice_of(i64_ty())).tag("sql", &["id = any"]));
    check(&ty).expect("scalar column vs slice elements checks clean");

    let ty = select(FieldDesc::new("ids", i64_ty()).tag("sql", &["id = any"]));
    assert!(matches!(
        check_err(&ty),
        TypeCheckError::Predicate(PredicateError::NotQuantifiable { .. })
    ));
}

#[test]
fn modifier_functions_are_checked_against_procedures() {
    let select = |member: FieldDesc| {
        query_type(
            "SelectUsers",
            vec![rel_field("users", slice_of(user_record())), where_field(vec![member])],
        )
    };

    let ty = select(FieldDesc::new("email", string_ty()).tag("sql", &["email", "@lower"]));
    check(&ty).expect("lower applies to a varchar column");

    let ty = select(FieldDesc::new("age", i32_ty()).tag("sql", &["age", "@abs"]));
    check(&ty).expect("abs applies to an int4 column");

    let ty = select(FieldDesc::new("flag", i64_ty()).tag("sql", &["is_active", "@abs"]));
    assert!(matches!(
        check_err(&ty),
        TypeCheckError::Predicate(PredicateError::BadModifier { name, .. }) if name == "abs"
    ));
}

#[test]
fn column_predicates_accept_columns_and_literals() {
    let select = |members: Vec<FieldDesc>| {
        query_type(
            "SelectUsers",
            vec![rel_field("users", slice_of(user_record())), where_field(members)],
        )
    };

    let ty = select(vec![
        FieldDesc::new("_", directive(Directive::Column)).tag("sql", &["created_at <= updated_at"]),
        FieldDesc::new("_", directive(Directive::Column)).tag("sql", &["age > 21"]),
        FieldDesc::new("_", directive(Directive::Column)).tag("sql", &["name islike J%"]),
    ]);
    check(&ty).expect("column predicates check clean");

    let ty = select(vec![
        FieldDesc::new("_", directive(Directive::Column)).tag("sql", &["is_active > age"]),
    ]);
    assert!(matches!(
        check_err(&ty),
        TypeCheckError::Predicate(PredicateError::NotComparable { .. })
    ));
}

#[test]
fn not_null_columns_reject_pointer_fields() {
    let select = |member: FieldDesc| {
        query_type(
            "SelectUsers",
            vec![rel_field("users", slice_of(user_record())), where_field(vec![member])],
        )
    };

    let ty = select(FieldDesc::new("name", ptr(string_ty())).tag("sql", &["name"]));
    assert!(matches!(
        check_err(&ty),
        TypeCheckError::Predicate(PredicateError::NullablePointer { column, .. })
            if column == "name"
    ));

    // A nullable column can match the field's nil.
    let ty = select(FieldDesc::new("email", ptr(string_ty())).tag("sql", &["email"]));
    check(&ty).expect("pointer field over a nullable column checks clean");
}

#[test]
fn quantified_column_predicates_range_over_array_elements() {
    let select = |members: Vec<FieldDesc>| {
        query_type(
            "SelectUsers",
            vec![rel_field("users", slice_of(user_record())), where_field(members)],
        )
    };

    // text vs text[]: the element type substitutes under the quantifier.
    let ty = select(vec![
        FieldDesc::new("_", directive(Directive::Column)).tag("sql", &["name = any tags"]),
    ]);
    check(&ty).expect("quantified column predicate checks clean");

    let ty = select(vec![
        FieldDesc::new("_", directive(Directive::Column)).tag("sql", &["name = any email"]),
    ]);
    assert!(matches!(
        check_err(&ty),
        TypeCheckError::Predicate(PredicateError::NotArrayRhs { column, .. })
            if column == "email"
    ));
}

#[test]
fn join_conditions_scope_to_the_joined_relation() {
    let select = |cond: &str| {
        let join = FieldDesc::new(
            "Join",
            record(vec![
                directive_field(Directive::LeftJoin).tag("sql", &["orders_table:o", cond]),
            ]),
        );
        query_type(
            "SelectUsers",
            vec![rel_field("users", slice_of(user_record())), join],
        )
    };

    check(&select("o.user_id = u.id")).expect("scoped join condition checks clean");
    check(&select("user_id = u.id")).expect("unqualified side defaults to the joined relation");

    assert!(matches!(
        check_err(&select("u.id = o.user_id")),
        TypeCheckError::JoinConditionScope { rel, .. } if rel == "o"
    ));
}

#[test]
fn on_conflict_targets_resolve_to_unique_indexes() {
    let insert = |members: Vec<FieldDesc>| {
        query_type(
            "InsertUser",
            vec![
                rel_field("user", user_record()),
                FieldDesc::new("OnConflict", record(members)),
            ],
        )
    };

    let ty = insert(vec![
        directive_field(Directive::Column).tag("sql", &["email"]),
        directive_field(Directive::Update).tag("sql", &["name"]),
    ]);
    let checked = check(&ty).expect("checks clean");
    let index = checked.conflict_index.expect("conflict index");
    assert_eq!(index.name, "users_table_email_key");
    assert!(index.is_unique);

    // `name` has no unique index.
    let ty = insert(vec![
        directive_field(Directive::Column).tag("sql", &["name"]),
        directive_field(Directive::Ignore),
    ]);
    assert!(matches!(
        check_err(&ty),
        TypeCheckError::ConflictTargetNotUnique { .. }
    ));

    // A named index must be unique.
    let ty = insert(vec![
        directive_field(Directive::Index).tag("sql", &["users_table_lower_email_idx"]),
        directive_field(Directive::Ignore),
    ]);
    assert!(matches!(
        check_err(&ty),
        TypeCheckError::ConflictIndexNotFound { name, .. }
            if name == "users_table_lower_email_idx"
    ));

    let ty = insert(vec![
        directive_field(Directive::Constraint).tag("sql", &["users_table_email_key"]),
        directive_field(Directive::Ignore),
    ]);
    let checked = check(&ty).expect("checks clean");
    assert_eq!(
        checked.conflict_index.expect("index behind constraint").name,
        "users_table_email_key"
    );

    let ty = insert(vec![
        directive_field(Directive::Constraint).tag("sql", &["ghost"]),
        directive_field(Directive::Ignore),
    ]);
    assert!(matches!(
        check_err(&ty),
        TypeCheckError::ConflictConstraintNotFound { name, .. } if name == "ghost"
    ));
}

#[test]
fn default_directive_requires_column_defaults() {
    let insert = |col: &str| {
        query_type(
            "InsertUser",
            vec![
                rel_field("user", user_record()),
                directive_field(Directive::Default).tag("sql", &[col]),
            ],
        )
    };

    check(&insert("created_at")).expect("created_at has a default");

    assert!(matches!(
        check_err(&insert("email")),
        TypeCheckError::NoColumnDefault { column, .. } if column == "email"
    ));
}

#[test]
fn order_by_columns_must_exist() {
    let ty = query_type(
        "SelectUsers",
        vec![
            rel_field("users", slice_of(user_record())),
            directive_field(Directive::OrderBy).tag("sql", &["nope"]),
        ],
    );

    assert!(matches!(
        check_err(&ty),
        TypeCheckError::ColumnNotFound { column, .. } if column == "nope"
    ));
}

#[test]
fn filters_check_their_relation_and_text_search() {
    let shapes = TypeShapeCache::new();
    let catalog = catalog();
    let checker = Checker::new(&catalog);

    let filter = |col: &str| {
        record(vec![
            rel_field("users", slice_of(user_record())),
            directive_field(Directive::TextSearch).tag("sql", &[col]),
        ])
        .named("FilterUsers", "app")
    };

    let Target::Filter(spec) = Analyzer::new(&shapes).analyze(&filter("email")).unwrap() else {
        panic!("filter spec");
    };
    checker.check_filter(&spec).expect("text search over varchar");

    let Target::Filter(spec) = Analyzer::new(&shapes).analyze(&filter("age")).unwrap() else {
        panic!("filter spec");
    };
    assert!(matches!(
        checker.check_filter(&spec),
        Err(TypeCheckError::NotAssignable { .. })
    ));
}

#[test]
fn between_bounds_check_against_the_column() {
    let select = |bound_ty: TypeDesc| {
        let range = FieldDesc::new(
            "Created",
            record(vec![
                FieldDesc::new("from", bound_ty.clone()).tag("sql", &["x"]),
                FieldDesc::new("to", bound_ty).tag("sql", &["y"]),
            ]),
        )
        .tag("sql", &["created_at isbetween"]);
        query_type(
            "SelectUsers",
            vec![rel_field("users", slice_of(user_record())), where_field(vec![range])],
        )
    };

    check(&select(crate::test_fixtures::time_ty())).expect("time bounds check clean");

    assert!(matches!(
        check_err(&select(i64_ty())),
        TypeCheckError::Predicate(PredicateError::NotComparable { .. })
    ));
}
