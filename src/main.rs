//! Command-line front end over a sample network-configuration schema.
//!
//! The library is schema-agnostic; this binary wires it to a small
//! demonstration schema (bridges holding ports) so the command set can be
//! exercised against a local store:
//!
//! ```text
//! rowctl --db=config.db -- --id=@p create Port name=eth0 \
//!        -- create Bridge name=br0 ports=@p
//! rowctl --db=config.db show
//! ```
//!
//! Options before the first command are either global (`--db`, `--timeout`,
//! `--dry-run`, `--commands`, `--options`, `--help`) or belong to the first
//! command, exactly as if they followed a `--` separator.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;
use tracing_subscriber::EnvFilter;

use rowctl::commands::OptionMap;
use rowctl::engine::Interpreter;
use rowctl::error::Result;
use rowctl::idl::Idl;
use rowctl::parse::parse_commands;
use rowctl::schema::{
    AtomicType, BaseType, Column, ColumnType, CtlTable, RefMode, RowId, ShowTable, TableClass,
};

/// The demonstration schema: a root table of bridges, each holding a set of
/// ports by strong reference.
fn sample_tables() -> Vec<CtlTable> {
    let bridge = TableClass::new("Bridge", true)
        .with_column(Column::new("name", ColumnType::scalar(AtomicType::String)))
        .with_column(Column::new(
            "ports",
            ColumnType::set(BaseType::reference("Port", RefMode::Strong), 0, usize::MAX),
        ))
        .with_column(Column::new(
            "datapath_id",
            ColumnType::optional_scalar(AtomicType::String),
        ))
        .with_column(Column::new(
            "external_ids",
            ColumnType::map(
                BaseType::new(AtomicType::String),
                BaseType::new(AtomicType::String),
            ),
        ));
    let port = TableClass::new("Port", false)
        .with_column(Column::new("name", ColumnType::scalar(AtomicType::String)))
        .with_column(Column::new(
            "tag",
            ColumnType::optional_scalar(AtomicType::Integer),
        ))
        .with_column(Column::new(
            "external_ids",
            ColumnType::map(
                BaseType::new(AtomicType::String),
                BaseType::new(AtomicType::String),
            ),
        ));
    vec![
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
    ]
}

fn sample_show_tables() -> Vec<ShowTable> {
    vec![
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
    ]
}

struct GlobalOptions {
    db: Option<String>,
    timeout: Option<Duration>,
    dry_run: bool,
    local_options: OptionMap,
}

fn usage(interp: &Interpreter) -> String {
    format!(
        "usage: rowctl [OPTIONS] COMMAND [ARG...] [-- COMMAND [ARG...]]...\n\
         \n{}\
         \nOptions:\n\
         \x20 --db=TARGET            database to contact (default: {})\n\
         \x20 --timeout=SECS         give up waiting after SECS seconds\n\
         \x20 --dry-run              parse the command stream without running it\n\
         \x20 --commands             print the command listing and exit\n\
         \x20 --options              print the option listing and exit\n\
         \x20 --help                 display this help\n",
        interp.db_cmd_usage(),
        interp.default_db()
    )
}

/// Splits leading option tokens into globals and first-command options.
fn parse_global_options(interp: &Interpreter, args: &mut Vec<String>) -> Result<GlobalOptions> {
    let mut globals = GlobalOptions {
        db: None,
        timeout: None,
        dry_run: false,
        local_options: HashMap::default(),
    };
    while let Some(arg) = args.first().cloned() {
        if !arg.starts_with('-') || arg == "--" {
            break;
        }
        let (key, value) = match arg.split_once('=') {
            Some((k, v)) => (k.to_string(), Some(v.to_string())),
            None => (arg.clone(), None),
        };
        match key.as_str() {
            "--db" => globals.db = value,
            "--timeout" => {
                let secs: u64 = value
                    .as_deref()
                    .unwrap_or("")
                    .parse()
                    .map_err(|_| {
                        rowctl::error::RowctlError::Usage(
                            "--timeout requires a number of seconds".into(),
                        )
                    })?;
                globals.timeout = Some(Duration::from_secs(secs));
            }
            "--dry-run" => globals.dry_run = true,
            "--commands" => {
                print!("{}", interp.command_listing());
                interp.exit(0);
            }
            "--options" => {
                print!("{}", interp.option_listing());
                interp.exit(0);
            }
            "--help" | "-h" => {
                print!("{}", usage(interp));
                interp.exit(0);
            }
            _ => {
                // Everything else belongs to the first command, as if it
                // followed a "--" separator.
                if globals.local_options.contains_key(&key) {
                    return Err(rowctl::error::RowctlError::Usage(format!(
                        "'{}' option specified multiple times",
                        arg
                    )));
                }
                globals.local_options.insert(key, value);
            }
        }
        args.remove(0);
    }
    Ok(globals)
}

fn run(interp: &Interpreter) -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let globals = parse_global_options(interp, &mut args)?;

    if interp.might_write_to_db(&args) {
        debug!("this invocation may write to the database");
    }

    let mut commands = parse_commands(interp, &args, globals.local_options)?;
    if globals.dry_run {
        return Ok(());
    }

    let db = globals
        .db
        .unwrap_or_else(|| interp.default_db().to_string());
    let mut idl = Idl::open(&db)?;
    idl.wait_timeout = globals.timeout;

    interp.run_commands(&mut idl, &mut commands, None)?;
    for command in &commands {
        print!("{}", command.output);
        if let Some(table) = &command.table {
            print!("{}", table);
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let interp = match Interpreter::new(sample_tables(), Some(sample_show_tables())) {
        Ok(interp) => interp.with_rundir(PathBuf::from("/var/run/rowctl")),
        Err(error) => {
            eprintln!("rowctl: {}", error);
            std::process::exit(1);
        }
    };

    if let Err(error) = run(&interp) {
        eprintln!("rowctl: {}", error);
        interp.exit(1);
    }
}
