use super::*;

fn string_ty() -> TypeDesc {
    TypeDesc::new(TypeKind::String)
}

#[test]
fn deref_strips_pointer_chain() {
    let ty = TypeDesc::new(TypeKind::Ptr(Box::new(TypeDesc::new(TypeKind::Ptr(
        Box::new(string_ty()),
    )))));

    assert_eq!(ty.pointer_depth(), 2);
    assert_eq!(ty.deref().kind, TypeKind::String);
    assert_eq!(ty.canonical(), "String");
}

#[test]
fn canonical_idents() {
    assert_eq!(TypeDesc::new(TypeKind::I32).canonical(), "i32");
    assert_eq!(TypeDesc::new(TypeKind::Bytes).canonical(), "Vec<u8>");
    assert_eq!(
        TypeDesc::new(TypeKind::Slice(Box::new(string_ty()))).canonical(),
        "Vec<String>"
    );
    assert_eq!(
        TypeDesc::new(TypeKind::Time).named("DateTime", "chrono").canonical(),
        "chrono::DateTime"
    );
}

#[test]
fn sequence_elem_sees_through_pointers() {
    let ty = TypeDesc::new(TypeKind::Ptr(Box::new(TypeDesc::new(TypeKind::Slice(
        Box::new(TypeDesc::new(TypeKind::I64)),
    )))));

    assert_eq!(ty.sequence_elem().unwrap().kind, TypeKind::I64);
}

#[test]
fn shape_key_distinguishes_tags() {
    let a = TypeDesc::new(TypeKind::Record(vec![
        FieldDesc::new("name", string_ty()).tag("sql", &["name"]),
    ]));
    let b = TypeDesc::new(TypeKind::Record(vec![
        FieldDesc::new("name", string_ty()).tag("sql", &["other_col"]),
    ]));
    let a2 = a.clone();

    assert_ne!(a.shape_key(), b.shape_key());
    assert_eq!(a.shape_key(), a2.shape_key());
}

#[test]
fn tag_map_accessors() {
    let tags = TagMap::new().with("sql", &["col_a", "pk", "json"]);

    assert_eq!(tags.first("sql"), Some("col_a"));
    assert_eq!(tags.options("sql"), &["pk".to_string(), "json".to_string()]);
    assert!(tags.values("rel").is_empty());
    assert_eq!(tags.first("rel"), None);
}
