use rowctl::engine::Interpreter;
use rowctl::idl::Idl;
use rowctl::schema::{AtomicType, BaseType, Column, ColumnType, CtlTable, RowId, TableClass};

fn setup() -> (Interpreter, Idl) {
    let port = TableClass::new("Port", true)
        .with_column(Column::new("name", ColumnType::scalar(AtomicType::String)))
        .with_column(Column::new("tag", ColumnType::optional_scalar(AtomicType::Integer)))
        .with_column(Column::new(
            "speeds",
            ColumnType::set(BaseType::new(AtomicType::Integer), 0, 3),
        ))
        .with_column(Column::new(
            "trunks",
            ColumnType::set(BaseType::new(AtomicType::Integer), 1, usize::MAX),
        ))
        .with_column(Column::new(
            "external_ids",
            ColumnType::map(
                BaseType::new(AtomicType::String),
                BaseType::new(AtomicType::String),
            ),
        ))
        .with_column(
            Column::new("statistics", ColumnType::optional_scalar(AtomicType::Integer))
                .read_only(),
        );
    let tables = vec![CtlTable::new(port).with_row_id(RowId {
        table: "Port".into(),
        name_column: Some("name".into()),
        uuid_column: None,
    })];
    let interp = Interpreter::new(tables, None).expect("schema should validate");
    let idl = Idl::open(":memory:").expect("in-memory store");
    (interp, idl)
}

fn seed(interp: &Interpreter, idl: &mut Idl) {
    interp
        .execute(idl, &["create", "Port", "name=p0", "trunks=1"])
        .expect("seed row");
}

#[test]
fn set_then_get_scalar() {
    let (interp, mut idl) = setup();
    seed(&interp, &mut idl);
    interp
        .execute(&mut idl, &["set", "Port", "p0", "tag=7"])
        .expect("set");
    let out = interp.execute(&mut idl, &["get", "Port", "p0", "tag"]).expect("get");
    assert_eq!(out, "7\n");
}

#[test]
fn set_then_clear_restores_the_default() {
    let (interp, mut idl) = setup();
    seed(&interp, &mut idl);
    interp
        .execute(&mut idl, &["set", "Port", "p0", "tag=7", "--", "clear", "Port", "p0", "tag"])
        .expect("set and clear");
    let out = interp.execute(&mut idl, &["get", "Port", "p0", "tag"]).expect("get");
    assert_eq!(out, "[]\n");
}

#[test]
fn add_then_remove_restores_the_initial_set() {
    let (interp, mut idl) = setup();
    seed(&interp, &mut idl);
    interp
        .execute(&mut idl, &["add", "Port", "p0", "speeds", "100"])
        .expect("add");
    interp
        .execute(&mut idl, &["remove", "Port", "p0", "speeds", "100"])
        .expect("remove");
    let out = interp
        .execute(&mut idl, &["get", "Port", "p0", "speeds"])
        .expect("get");
    assert_eq!(out, "[]\n");
}

#[test]
fn add_absorbs_duplicates() {
    let (interp, mut idl) = setup();
    seed(&interp, &mut idl);
    interp
        .execute(&mut idl, &["add", "Port", "p0", "speeds", "10", "--", "add", "Port", "p0", "speeds", "10"])
        .expect("duplicate adds");
    let out = interp
        .execute(&mut idl, &["get", "Port", "p0", "speeds"])
        .expect("get");
    assert_eq!(out, "[10]\n");
}

#[test]
fn add_enforces_the_upper_cardinality_bound() {
    let (interp, mut idl) = setup();
    seed(&interp, &mut idl);
    let err = interp
        .execute(&mut idl, &["add", "Port", "p0", "speeds", "1", "2", "3", "4"])
        .unwrap_err();
    assert!(format!("{}", err).contains(
        "\"add\" operation would put 4 values in column speeds of table Port but the \
         maximum number is 3"
    ));
}

#[test]
fn remove_enforces_the_lower_cardinality_bound() {
    let (interp, mut idl) = setup();
    seed(&interp, &mut idl);
    let err = interp
        .execute(&mut idl, &["remove", "Port", "p0", "trunks", "1"])
        .unwrap_err();
    assert!(format!("{}", err).contains(
        "\"remove\" operation would put 0 values in column trunks of table Port but the \
         minimum number is 1"
    ));
}

#[test]
fn set_rejects_values_beyond_the_column_bound() {
    let (interp, mut idl) = setup();
    seed(&interp, &mut idl);
    let err = interp
        .execute(&mut idl, &["set", "Port", "p0", "speeds=[1,2,3,4]"])
        .unwrap_err();
    assert!(format!("{}", err).contains("maximum number is 3"));
}

#[test]
fn clear_refuses_mandatory_columns_without_writing() {
    let (interp, mut idl) = setup();
    seed(&interp, &mut idl);
    let err = interp
        .execute(&mut idl, &["clear", "Port", "p0", "name"])
        .unwrap_err();
    assert!(format!("{}", err).contains(
        "\"clear\" operation cannot be applied to column name of table Port, which is \
         not allowed to be empty"
    ));
    // The failed stream must not have committed anything.
    let out = interp.execute(&mut idl, &["get", "Port", "p0", "name"]).expect("get");
    assert_eq!(out, "p0\n");
}

#[test]
fn read_only_columns_reject_every_mutation() {
    let (interp, mut idl) = setup();
    seed(&interp, &mut idl);
    for stream in [
        vec!["set", "Port", "p0", "statistics=1"],
        vec!["add", "Port", "p0", "statistics", "1"],
        vec!["remove", "Port", "p0", "statistics", "1"],
        vec!["clear", "Port", "p0", "statistics"],
    ] {
        let err = interp.execute(&mut idl, &stream).unwrap_err();
        assert!(
            format!("{}", err)
                .contains("cannot modify read-only column statistics in table Port"),
            "stream {:?} produced: {}",
            stream,
            err
        );
    }
}

#[test]
fn map_keys_update_through_a_single_pair_overlay() {
    let (interp, mut idl) = setup();
    seed(&interp, &mut idl);
    interp
        .execute(&mut idl, &["set", "Port", "p0", "external_ids:color=red"])
        .expect("first key");
    interp
        .execute(&mut idl, &["set", "Port", "p0", "external_ids:size=big"])
        .expect("second key");
    interp
        .execute(&mut idl, &["set", "Port", "p0", "external_ids:color=blue"])
        .expect("overwrite one key");
    let color = interp
        .execute(&mut idl, &["get", "Port", "p0", "external_ids:color"])
        .expect("get key");
    assert_eq!(color, "blue\n");
    let all = interp
        .execute(&mut idl, &["get", "Port", "p0", "external_ids"])
        .expect("get map");
    assert_eq!(all, "{color=blue, size=big}\n");
}

#[test]
fn key_syntax_is_rejected_on_non_map_columns() {
    let (interp, mut idl) = setup();
    seed(&interp, &mut idl);
    let err = interp
        .execute(&mut idl, &["set", "Port", "p0", "tag:x=1"])
        .unwrap_err();
    assert!(format!("{}", err).contains("cannot specify key to set for non-map column tag"));
}

#[test]
fn remove_from_a_map_by_key_or_by_exact_pair() {
    let (interp, mut idl) = setup();
    seed(&interp, &mut idl);
    interp
        .execute(
            &mut idl,
            &["set", "Port", "p0", "external_ids:color=red", "external_ids:size=big"],
        )
        .expect("seed map");

    // A mismatched pair removes nothing.
    interp
        .execute(&mut idl, &["remove", "Port", "p0", "external_ids", "color=blue"])
        .expect("pair mismatch is not an error");
    let out = interp
        .execute(&mut idl, &["get", "Port", "p0", "external_ids:color"])
        .expect("get");
    assert_eq!(out, "red\n");

    // A bare key removes the entry whatever its value.
    interp
        .execute(&mut idl, &["remove", "Port", "p0", "external_ids", "color"])
        .expect("remove by key");
    let out = interp
        .execute(&mut idl, &["get", "Port", "p0", "external_ids"])
        .expect("get");
    assert_eq!(out, "{size=big}\n");
}

#[test]
fn quoted_strings_unescape_and_render_back_quoted() {
    let (interp, mut idl) = setup();
    seed(&interp, &mut idl);
    interp
        .execute(&mut idl, &["set", "Port", "p0", "external_ids:note=\"hello world\""])
        .expect("quoted value");
    let out = interp
        .execute(&mut idl, &["get", "Port", "p0", "external_ids:note"])
        .expect("get");
    assert_eq!(out, "\"hello world\"\n");
}
