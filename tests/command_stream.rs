use rowctl::commands::{CommandSyntax, Mode};
use rowctl::engine::Interpreter;
use rowctl::idl::Idl;
use rowctl::parse::annotate_arguments;
use rowctl::schema::{AtomicType, Column, ColumnType, CtlTable, RowId, TableClass};

fn setup() -> (Interpreter, Idl) {
    let port = TableClass::new("Port", true)
        .with_column(Column::new("name", ColumnType::scalar(AtomicType::String)))
        .with_column(Column::new("tag", ColumnType::optional_scalar(AtomicType::Integer)));
    let tables = vec![CtlTable::new(port).with_row_id(RowId {
        table: "Port".into(),
        name_column: Some("name".into()),
        uuid_column: None,
    })];
    let interp = Interpreter::new(tables, None).expect("schema should validate");
    let idl = Idl::open(":memory:").expect("in-memory store");
    (interp, idl)
}

#[test]
fn empty_streams_and_unknown_verbs_are_usage_errors() {
    let (interp, mut idl) = setup();
    let err = interp.execute(&mut idl, &[]).unwrap_err();
    assert!(format!("{}", err).contains("missing command name (use --help for help)"));

    let err = interp.execute(&mut idl, &["frobnicate"]).unwrap_err();
    assert!(format!("{}", err).contains("unknown command 'frobnicate'; use --help for help"));
}

#[test]
fn options_are_validated_against_the_verb_spec() {
    let (interp, mut idl) = setup();

    let err = interp
        .execute(&mut idl, &["--columns=name", "set", "Port", "p", "tag=1"])
        .unwrap_err();
    assert!(format!("{}", err).contains("'set' command has no '--columns' option"));

    let err = interp
        .execute(&mut idl, &["--if-exists=yes", "list", "Port"])
        .unwrap_err();
    assert!(format!("{}", err)
        .contains("'--if-exists' option on 'list' does not accept an argument"));

    let err = interp
        .execute(&mut idl, &["--columns", "list", "Port"])
        .unwrap_err();
    assert!(format!("{}", err)
        .contains("missing argument to '--columns' option on 'list' command"));

    let err = interp
        .execute(&mut idl, &["--if-exists", "--if-exists", "list", "Port"])
        .unwrap_err();
    assert!(format!("{}", err).contains("'--if-exists' option specified multiple times"));
}

#[test]
fn argument_counts_are_enforced() {
    let (interp, mut idl) = setup();

    let err = interp.execute(&mut idl, &["get", "Port"]).unwrap_err();
    assert!(format!("{}", err).contains("'get' command requires at least 2 arguments"));

    let err = interp
        .execute(&mut idl, &["set", "Port", "p"])
        .unwrap_err();
    assert!(format!("{}", err).contains("'set' command requires at least 3 arguments"));
}

#[test]
fn misplaced_options_get_the_placement_hint() {
    let port = TableClass::new("Port", true)
        .with_column(Column::new("name", ColumnType::scalar(AtomicType::String)));
    let interp = Interpreter::new(
        vec![CtlTable::new(port)],
        Some(vec![rowctl::schema::ShowTable {
            table: "Port".into(),
            name_column: Some("name".into()),
            columns: vec![],
            wref: None,
        }]),
    )
    .expect("schema");
    let mut idl = Idl::open(":memory:").expect("store");

    let err = interp.execute(&mut idl, &["show", "extra"]).unwrap_err();
    assert!(format!("{}", err).contains("'show' command takes at most 0 arguments"));
    assert!(!format!("{}", err).contains("note that options"));

    let err = interp
        .execute(&mut idl, &["show", "--if-exists"])
        .unwrap_err();
    assert!(format!("{}", err).contains(
        "'show' command takes at most 0 arguments (note that options must precede \
         command names and follow a \"--\" argument)"
    ));
}

#[test]
fn comment_accepts_anything_and_does_nothing() {
    let (interp, mut idl) = setup();
    let out = interp
        .execute(&mut idl, &["comment", "records", "port", "rename", "--", "list", "Port"])
        .expect("comment plus list");
    assert!(out.contains("_uuid"));
}

#[test]
fn might_write_to_db_is_a_conservative_token_scan() {
    let (interp, _) = setup();
    let ro: Vec<String> = ["list", "Port"].iter().map(|s| s.to_string()).collect();
    assert!(!interp.might_write_to_db(&ro));

    let rw: Vec<String> = ["set", "Port", "p", "tag=1"].iter().map(|s| s.to_string()).collect();
    assert!(interp.might_write_to_db(&rw));

    // Tokens are not parsed, so a verb name in argument position counts.
    let sneaky: Vec<String> = ["comment", "set"].iter().map(|s| s.to_string()).collect();
    assert!(interp.might_write_to_db(&sneaky));
}

#[test]
fn completion_annotations_follow_the_sigil_grammar() {
    assert_eq!(annotate_arguments(""), "");
    assert_eq!(annotate_arguments("[ARG]..."), "*ARG");
    assert_eq!(
        annotate_arguments("TABLE RECORD [COLUMN[:KEY]]..."),
        "!TABLE !RECORD *COLUMN?:KEY"
    );
    assert_eq!(
        annotate_arguments("TABLE COLUMN[:KEY]=VALUE..."),
        "!TABLE +COLUMN?:KEY=VALUE"
    );
    assert_eq!(annotate_arguments("TABLE [RECORD]..."), "!TABLE *RECORD");
}

#[test]
fn command_listing_includes_options_name_and_annotated_arguments() {
    let (interp, _) = setup();
    let listing = interp.command_listing();
    assert!(listing.contains("[--if-exists] [--id=] ,get,!TABLE !RECORD *COLUMN?:KEY"));
    assert!(listing.contains(",comment,*ARG"));
    assert!(listing.contains(",wait-until,"));
}

#[test]
fn option_listing_unions_all_command_options() {
    let (interp, _) = setup();
    let listing = interp.option_listing();
    assert!(listing.contains("--if-exists\n"));
    assert!(listing.contains("--id=ARG\n"));
    assert!(listing.contains("--columns=ARG\n"));
    assert!(listing.contains("--all\n"));
}

#[test]
fn default_db_is_derived_from_the_rundir() {
    let (interp, _) = setup();
    let interp = interp.with_rundir("/tmp/rowctl-test".into());
    assert_eq!(interp.default_db(), "unix:/tmp/rowctl-test/db.sock");
}

#[test]
fn duplicate_verb_registration_is_rejected() {
    let (mut interp, _) = setup();
    let duplicate = CommandSyntax::new(
        "get",
        0,
        0,
        "",
        None,
        None,
        None,
        "",
        Mode::ReadOnly,
    );
    let err = interp.register_commands(vec![duplicate]).unwrap_err();
    assert!(format!("{}", err).contains("command \"get\" is registered twice"));
}

#[test]
fn stream_wide_options_attach_to_the_first_command() {
    let (interp, mut idl) = setup();
    interp
        .execute(&mut idl, &["create", "Port", "name=p0"])
        .expect("seed");
    // --if-exists before the verb behaves as if it followed a "--".
    let out = interp
        .execute(&mut idl, &["--if-exists", "get", "Port", "ghost", "name"])
        .expect("if-exists via leading option");
    assert_eq!(out, "");
}
