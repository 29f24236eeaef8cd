use rowctl::engine::Interpreter;
use rowctl::idl::Idl;
use rowctl::schema::{
    AtomicType, BaseType, Column, ColumnType, CtlTable, RefMode, RowId, ShowTable, ShowWeakRef,
    TableClass,
};

fn named_table(name: &str, root: bool) -> TableClass {
    TableClass::new(name, root)
        .with_column(Column::new("name", ColumnType::scalar(AtomicType::String)))
}

fn row_id_by_name(table: &str) -> RowId {
    RowId {
        table: table.into(),
        name_column: Some("name".into()),
        uuid_column: None,
    }
}

#[test]
fn show_terminates_on_reference_cycles() {
    let a = named_table("A", true).with_column(Column::new(
        "peer",
        ColumnType::set(BaseType::reference("B", RefMode::Strong), 0, 1),
    ));
    let b = named_table("B", false).with_column(Column::new(
        "peer",
        ColumnType::set(BaseType::reference("A", RefMode::Strong), 0, 1),
    ));
    let tables = vec![
        CtlTable::new(a).with_row_id(row_id_by_name("A")),
        CtlTable::new(b).with_row_id(row_id_by_name("B")),
    ];
    let shows = vec![
        ShowTable {
            table: "A".into(),
            name_column: Some("name".into()),
            columns: vec!["peer".into()],
            wref: None,
        },
        ShowTable {
            table: "B".into(),
            name_column: Some("name".into()),
            columns: vec!["peer".into()],
            wref: None,
        },
    ];
    let interp = Interpreter::new(tables, Some(shows)).expect("schema");
    let mut idl = Idl::open(":memory:").expect("store");

    interp
        .execute(
            &mut idl,
            &[
                "--", "--id=@a", "create", "A", "name=a1", "peer=@b", "--", "--id=@b",
                "create", "B", "name=b1", "peer=@a",
            ],
        )
        .expect("create the cycle");

    let out = interp.execute(&mut idl, &["show"]).expect("show terminates");
    // a1 prints its detail once; the cycle back to it prints only the
    // header line, at the deeper indentation.
    assert_eq!(out.matches("A a1").count(), 2);
    assert_eq!(out.matches("B b1").count(), 1);
    assert!(out.contains("\nA a1\n") || out.starts_with("A a1\n"));
    assert!(out.contains("    B b1\n"));
    assert!(out.contains("        A a1\n"));
}

#[test]
fn show_renders_names_children_and_plain_columns() {
    let bridge = named_table("Bridge", true)
        .with_column(Column::new(
            "ports",
            ColumnType::set(BaseType::reference("Port", RefMode::Strong), 0, usize::MAX),
        ))
        .with_column(Column::new(
            "datapath_id",
            ColumnType::optional_scalar(AtomicType::String),
        ));
    let port = named_table("Port", false)
        .with_column(Column::new("tag", ColumnType::optional_scalar(AtomicType::Integer)));
    let tables = vec![
        CtlTable::new(bridge).with_row_id(row_id_by_name("Bridge")),
        CtlTable::new(port).with_row_id(row_id_by_name("Port")),
    ];
    let shows = vec![
        ShowTable {
            table: "Bridge".into(),
            name_column: Some("name".into()),
            columns: vec!["ports".into(), "datapath_id".into()],
            wref: None,
        },
        ShowTable {
            table: "Port".into(),
            name_column: Some("name".into()),
            columns: vec!["tag".into()],
            wref: None,
        },
    ];
    let interp = Interpreter::new(tables, Some(shows)).expect("schema");
    let mut idl = Idl::open(":memory:").expect("store");

    interp
        .execute(
            &mut idl,
            &[
                "--", "--id=@p", "create", "Port", "name=eth0", "tag=7", "--", "create",
                "Bridge", "name=br0", "ports=@p", "datapath_id=dp1",
            ],
        )
        .expect("seed");

    let out = interp.execute(&mut idl, &["show"]).expect("show");
    assert!(out.starts_with("Bridge br0\n"));
    assert!(out.contains("    Port eth0\n"));
    assert!(out.contains("        tag: 7\n"));
    assert!(out.contains("    datapath_id: dp1\n"));
    // Default-valued columns stay silent.
    assert!(!out.contains("external"));
}

#[test]
fn show_renders_weak_back_references() {
    let bridge = named_table("Bridge", true);
    let port = named_table("Port", true).with_column(Column::new(
        "bridge",
        ColumnType::set(BaseType::reference("Bridge", RefMode::Weak), 0, 1),
    ));
    let tables = vec![
        CtlTable::new(bridge).with_row_id(row_id_by_name("Bridge")),
        CtlTable::new(port).with_row_id(row_id_by_name("Port")),
    ];
    let shows = vec![ShowTable {
        table: "Bridge".into(),
        name_column: Some("name".into()),
        columns: vec![],
        wref: Some(ShowWeakRef {
            table: "Port".into(),
            name_column: "name".into(),
            wref_column: "bridge".into(),
        }),
    }];
    let interp = Interpreter::new(tables, Some(shows)).expect("schema");
    let mut idl = Idl::open(":memory:").expect("store");

    interp
        .execute(
            &mut idl,
            &[
                "--", "--id=@b", "create", "Bridge", "name=br0", "--", "create", "Port",
                "name=p1", "bridge=@b", "--", "create", "Port", "name=p2",
            ],
        )
        .expect("seed");

    let out = interp.execute(&mut idl, &["show"]).expect("show");
    assert!(out.starts_with("Bridge br0\n"));
    assert!(out.contains("    Port p1\n"));
    assert!(!out.contains("p2"));
}

#[test]
fn show_renders_maps_of_references_by_name() {
    let mirror = named_table("Mirror", false);
    let bridge = named_table("Bridge", true).with_column(Column::new(
        "mirrors",
        ColumnType::map(
            BaseType::new(AtomicType::String),
            BaseType::reference("Mirror", RefMode::Strong),
        ),
    ));
    let tables = vec![
        CtlTable::new(bridge).with_row_id(row_id_by_name("Bridge")),
        CtlTable::new(mirror).with_row_id(row_id_by_name("Mirror")),
    ];
    let shows = vec![
        ShowTable {
            table: "Bridge".into(),
            name_column: Some("name".into()),
            columns: vec!["mirrors".into()],
            wref: None,
        },
        ShowTable {
            table: "Mirror".into(),
            name_column: Some("name".into()),
            columns: vec![],
            wref: None,
        },
    ];
    let interp = Interpreter::new(tables, Some(shows)).expect("schema");
    let mut idl = Idl::open(":memory:").expect("store");

    interp
        .execute(
            &mut idl,
            &[
                "--", "--id=@m", "create", "Mirror", "name=m0", "--", "create", "Bridge",
                "name=br0", "mirrors=main=@m",
            ],
        )
        .expect("seed");
    // A dangling reference renders as "<null>".
    interp
        .execute(
            &mut idl,
            &[
                "set", "Bridge", "br0",
                "mirrors:gone=123e4567-e89b-42d3-a456-426614174000",
            ],
        )
        .expect("dangling entry");

    let out = interp.execute(&mut idl, &["show"]).expect("show");
    assert!(out.contains("    mirrors:\n"));
    assert!(out.contains("        main=m0\n"));
    assert!(out.contains("        gone=\"<null>\"\n"));
}
