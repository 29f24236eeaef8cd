use rowctl::engine::Interpreter;
use rowctl::idl::Idl;
use rowctl::schema::{
    AtomicType, BaseType, Column, ColumnType, CtlTable, RefMode, RowId, TableClass,
};
use uuid::Uuid;

fn setup() -> (Interpreter, Idl) {
    let bridge = TableClass::new("Bridge", true)
        .with_column(Column::new("name", ColumnType::scalar(AtomicType::String)))
        .with_column(Column::new(
            "ports",
            ColumnType::set(BaseType::reference("Port", RefMode::Strong), 0, usize::MAX),
        ));
    let port = TableClass::new("Port", false)
        .with_column(Column::new("name", ColumnType::scalar(AtomicType::String)))
        .with_column(Column::new("tag", ColumnType::optional_scalar(AtomicType::Integer)));
    let tables = vec![
        CtlTable::new(bridge).with_row_id(RowId {
            table: "Bridge".into(),
            name_column: Some("name".into()),
            uuid_column: None,
        }),
        CtlTable::new(port).with_row_id(RowId {
            table: "Port".into(),
            name_column: Some("name".into()),
            uuid_column: None,
        }),
    ];
    let interp = Interpreter::new(tables, None).expect("schema should validate");
    let idl = Idl::open(":memory:").expect("in-memory store");
    (interp, idl)
}

#[test]
fn create_with_forward_reference_commits_both_rows() {
    let (interp, mut idl) = setup();
    let out = interp
        .execute(
            &mut idl,
            &[
                "--", "--id=@p", "create", "Port", "name=eth0", "--", "create", "Bridge",
                "name=br0", "ports=@p",
            ],
        )
        .expect("create port and bridge");

    let uuids: Vec<Uuid> = out
        .lines()
        .map(|line| Uuid::parse_str(line).expect("each output line is a committed UUID"))
        .collect();
    assert_eq!(uuids.len(), 2);

    // The bridge's ports set holds the committed UUID of the port.
    let ports = interp
        .execute(&mut idl, &["get", "Bridge", "br0", "ports"])
        .expect("get ports");
    assert_eq!(ports, format!("[{}]\n", uuids[0]));

    let name = interp
        .execute(&mut idl, &["get", "Port", "eth0", "name"])
        .expect("port survived garbage collection");
    assert_eq!(name, "eth0\n");
}

#[test]
fn a_symbol_may_be_claimed_only_once() {
    let (interp, mut idl) = setup();
    let err = interp
        .execute(
            &mut idl,
            &[
                "--", "--id=@x", "create", "Bridge", "name=b1", "--", "--id=@x", "create",
                "Bridge", "name=b2",
            ],
        )
        .unwrap_err();
    assert!(format!("{}", err)
        .contains("row id \"@x\" may only be specified on one --id option"));
}

#[test]
fn get_id_rejects_symbols_used_before_definition() {
    let (interp, mut idl) = setup();
    interp
        .execute(&mut idl, &["create", "Bridge", "name=b0"])
        .expect("seed");
    let err = interp
        .execute(
            &mut idl,
            &[
                "--", "create", "Bridge", "name=b1", "ports=@x", "--", "--id=@x", "get",
                "Bridge", "b0",
            ],
        )
        .unwrap_err();
    assert!(format!("{}", err).contains(
        "row id \"@x\" specified on \"get\" command was used before it was defined"
    ));
}

#[test]
fn symbols_must_begin_with_an_at_sign() {
    let (interp, mut idl) = setup();
    let err = interp
        .execute(&mut idl, &["--id=p", "create", "Bridge", "name=b"])
        .unwrap_err();
    assert!(format!("{}", err).contains("row id \"p\" does not begin with \"@\""));
}

#[test]
fn a_failing_command_aborts_the_whole_stream() {
    let (interp, mut idl) = setup();
    let err = interp
        .execute(
            &mut idl,
            &["create", "Bridge", "name=br1", "--", "set", "Bridge", "ghost", "name=x"],
        )
        .unwrap_err();
    assert!(format!("{}", err).contains("no row \"ghost\" in table Bridge"));

    // Nothing from the failed stream may be visible afterwards.
    let out = interp
        .execute(&mut idl, &["--columns=name", "list", "Bridge"])
        .expect("list");
    assert!(!out.contains("br1"));
}

#[test]
fn unreferenced_non_root_rows_are_garbage_collected() {
    let (interp, mut idl) = setup();
    let out = interp
        .execute(&mut idl, &["create", "Port", "name=lone"])
        .expect("create prints a UUID even for a doomed row");
    assert!(Uuid::parse_str(out.trim()).is_ok());

    let listed = interp
        .execute(&mut idl, &["--columns=name", "list", "Port"])
        .expect("list");
    assert!(!listed.contains("lone"));
}

#[test]
fn destroying_a_bridge_collects_its_ports() {
    let (interp, mut idl) = setup();
    interp
        .execute(
            &mut idl,
            &[
                "--", "--id=@p", "create", "Port", "name=eth1", "--", "create", "Bridge",
                "name=br2", "ports=@p",
            ],
        )
        .expect("seed");
    interp
        .execute(&mut idl, &["destroy", "Bridge", "br2"])
        .expect("destroy");
    let ports = interp
        .execute(&mut idl, &["--columns=name", "list", "Port"])
        .expect("list ports");
    assert!(!ports.contains("eth1"));
}

#[test]
fn destroy_option_conflicts() {
    let (interp, mut idl) = setup();
    let err = interp
        .execute(&mut idl, &["--all", "destroy", "Bridge", "br0"])
        .unwrap_err();
    assert!(format!("{}", err)
        .contains("--all and records argument should not be specified together"));

    let err = interp
        .execute(&mut idl, &["--all", "--if-exists", "destroy", "Bridge"])
        .unwrap_err();
    assert!(format!("{}", err)
        .contains("--all and --if-exists should not be specified together"));
}

#[test]
fn destroy_all_empties_the_table() {
    let (interp, mut idl) = setup();
    interp
        .execute(&mut idl, &["create", "Bridge", "name=b1", "--", "create", "Bridge", "name=b2"])
        .expect("seed");
    interp
        .execute(&mut idl, &["--all", "destroy", "Bridge"])
        .expect("destroy all");
    let out = interp
        .execute(&mut idl, &["--columns=name", "list", "Bridge"])
        .expect("list");
    assert!(!out.contains("b1"));
    assert!(!out.contains("b2"));
}

#[test]
fn committed_state_survives_reopening_the_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("state.db").display().to_string();

    let interp = Interpreter::new(
        vec![CtlTable::new(
            TableClass::new("Bridge", true)
                .with_column(Column::new("name", ColumnType::scalar(AtomicType::String))),
        )
        .with_row_id(RowId {
            table: "Bridge".into(),
            name_column: Some("name".into()),
            uuid_column: None,
        })],
        None,
    )
    .expect("schema");

    {
        let mut idl = Idl::open(&db).expect("store");
        interp
            .execute(&mut idl, &["create", "Bridge", "name=durable"])
            .expect("create");
    }

    let mut idl = Idl::open(&db).expect("reopen");
    let out = interp
        .execute(&mut idl, &["get", "Bridge", "durable", "name"])
        .expect("row survived the reopen");
    assert_eq!(out, "durable\n");
}

#[test]
fn get_if_exists_and_id_conflict() {
    let (interp, mut idl) = setup();
    interp
        .execute(&mut idl, &["create", "Bridge", "name=b0"])
        .expect("seed");
    let err = interp
        .execute(&mut idl, &["--if-exists", "--id=@b", "get", "Bridge", "b0"])
        .unwrap_err();
    assert!(format!("{}", err).contains("--if-exists and --id may not be specified together"));
}

#[test]
fn get_id_lets_later_commands_reference_an_existing_row() {
    let (interp, mut idl) = setup();
    interp
        .execute(&mut idl, &["create", "Bridge", "name=b0"])
        .expect("seed");
    let out = interp
        .execute(
            &mut idl,
            &[
                "--", "--id=@b", "get", "Bridge", "b0", "--", "--id=@p", "create", "Port",
                "name=eth2", "--", "add", "Bridge", "b0", "ports", "@p",
            ],
        )
        .expect("reference through symbols");
    // Only "create" prints output.
    let port_uuid = Uuid::parse_str(out.trim()).expect("create output");
    let ports = interp
        .execute(&mut idl, &["get", "Bridge", "b0", "ports"])
        .expect("get ports");
    assert_eq!(ports, format!("[{}]\n", port_uuid));
}
