//! The interpreter: registry, execution context and the driver loop.
//!
//! An [`Interpreter`] is an immutable value built once from the caller's
//! schema descriptors: tables, the optional `show` output format, and the
//! command registry. Nothing here is process-global; embedders may build
//! several interpreters with different schemas in one process.
//!
//! Execution follows a two-phase pipeline. The pre-pass walks every parsed
//! command and lets it declare the tables and columns it will need, so one
//! cache refresh fetches everything. The main pass then runs each command
//! inside a single transaction; a `wait-until` miss or an optimistic
//! concurrency failure discards the attempt, blocks until the store
//! changes, and reruns the whole stream from scratch. After a successful
//! commit, a post-pass lets `create` rewrite the provisional UUIDs it
//! printed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::commands::{db_commands, show_command, Command, CommandSyntax, Mode, OptionMap};
use crate::datum::{is_uuid_string, Atom, Cursor};
use crate::error::{Result, RowctlError};
use crate::idl::{Idl, Row, TxnStatus};
use crate::parse::{annotate_arguments, parse_commands};
use crate::schema::{Column, CtlTable, OtherHasher, RowId, Schema, ShowTable};
use crate::symtab::SymbolTable;
use crate::table::TextTable;

/// The immutable heart of the interpreter: schema, show format, commands.
pub struct Interpreter {
    schema: Schema,
    show_tables: Option<Vec<ShowTable>>,
    commands: Vec<CommandSyntax>,
    by_name: HashMap<String, usize, OtherHasher>,
    rundir: PathBuf,
    default_db: OnceLock<String>,
    exit_hook: Option<Box<dyn Fn(i32) + Send + Sync>>,
}

impl Interpreter {
    /// Builds an interpreter over the caller's tables, registering the
    /// built-in verbs plus `show` when a show format is supplied. Show and
    /// row-id declarations are validated here, once, so execution can
    /// treat dangling names as internal errors.
    pub fn new(tables: Vec<CtlTable>, cmd_show_tables: Option<Vec<ShowTable>>) -> Result<Self> {
        let schema = Schema::new(tables);
        validate_row_ids(&schema)?;
        if let Some(shows) = &cmd_show_tables {
            validate_show_tables(&schema, shows)?;
        }
        let mut interp = Self {
            schema,
            show_tables: cmd_show_tables,
            commands: Vec::new(),
            by_name: HashMap::default(),
            rundir: PathBuf::from("/var/run/rowctl"),
            default_db: OnceLock::new(),
            exit_hook: None,
        };
        interp.register_commands(db_commands())?;
        if interp.show_tables.is_some() {
            interp.register_commands(vec![show_command()])?;
        }
        Ok(interp)
    }

    /// Installs a hook the binary's fatal path invokes before exiting.
    pub fn with_exit_hook(mut self, hook: Box<dyn Fn(i32) + Send + Sync>) -> Self {
        self.exit_hook = Some(hook);
        self
    }

    /// Overrides the runtime directory used by [`Interpreter::default_db`].
    pub fn with_rundir(mut self, rundir: PathBuf) -> Self {
        self.rundir = rundir;
        self
    }

    /// Runs the exit hook, then terminates the process.
    pub fn exit(&self, status: i32) -> ! {
        if let Some(hook) = &self.exit_hook {
            hook(status);
        }
        std::process::exit(status);
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn show_tables(&self) -> Option<&[ShowTable]> {
        self.show_tables.as_deref()
    }

    pub fn show_table(&self, table: &str) -> Option<&ShowTable> {
        self.show_tables
            .as_ref()
            .and_then(|shows| shows.iter().find(|s| s.table == table))
    }

    /// Adds verbs to the registry; every name must be unique.
    pub fn register_commands(&mut self, commands: Vec<CommandSyntax>) -> Result<()> {
        for command in commands {
            if self.by_name.contains_key(command.name) {
                return Err(RowctlError::Internal(format!(
                    "command \"{}\" is registered twice",
                    command.name
                )));
            }
            self.by_name
                .insert(command.name.to_string(), self.commands.len());
            self.commands.push(command);
        }
        Ok(())
    }

    pub fn command(&self, name: &str) -> Option<&CommandSyntax> {
        self.by_name.get(name).map(|&i| &self.commands[i])
    }

    pub fn commands(&self) -> &[CommandSyntax] {
        &self.commands
    }

    /// Conservative hint: true when any token names a read-write verb.
    pub fn might_write_to_db(&self, args: &[String]) -> bool {
        args.iter().any(|arg| {
            self.command(arg)
                .map(|c| c.mode == Mode::ReadWrite)
                .unwrap_or(false)
        })
    }

    /// The default database target, `unix:<rundir>/db.sock`, memoized.
    pub fn default_db(&self) -> &str {
        self.default_db
            .get_or_init(|| format!("unix:{}/db.sock", self.rundir.display()))
    }

    /// One line per registered command in the form the shell completion
    /// script consumes: `[--opt] ,name, <annotated args>`.
    pub fn command_listing(&self) -> String {
        let mut out = String::new();
        for command in &self.commands {
            for item in command.options.split(',').filter(|s| !s.is_empty()) {
                out.push_str(&format!("[{}] ", item));
            }
            out.push_str(&format!(",{},", command.name));
            out.push_str(&annotate_arguments(command.arguments));
            out.push('\n');
        }
        out
    }

    /// Every option any command accepts, one `--name[=ARG]` per line.
    pub fn option_listing(&self) -> String {
        let mut seen = Vec::new();
        let mut out = String::new();
        for command in &self.commands {
            for name in command.options.split(',').filter(|s| !s.is_empty()) {
                let (name, takes_value) = match name.strip_suffix('=') {
                    Some(name) => (name, true),
                    None => (name, false),
                };
                if seen.contains(&name.to_string()) {
                    continue;
                }
                seen.push(name.to_string());
                out.push_str(name);
                if takes_value {
                    out.push_str("=ARG");
                }
                out.push('\n');
            }
        }
        out
    }

    /// Usage text for the database command set.
    pub fn db_cmd_usage(&self) -> &'static str {
        "Database commands:\n\
  list TBL [REC]              list RECord (or all records) in TBL\n\
  find TBL CONDITION...       list records satisfying CONDITION in TBL\n\
  get TBL REC COL[:KEY]       print values of COLumns in RECord in TBL\n\
  set TBL REC COL[:KEY]=VALUE set COLumn values in RECord in TBL\n\
  add TBL REC COL [KEY=]VALUE add (KEY=)VALUE to COLumn in RECord in TBL\n\
  remove TBL REC COL [KEY=]VALUE  remove (KEY=)VALUE from COLumn\n\
  clear TBL REC COL           clear values from COLumn in RECord in TBL\n\
  create TBL COL[:KEY]=VALUE  create and initialize new record\n\
  destroy TBL REC             delete RECord from TBL\n\
  wait-until TBL REC [COL[:KEY]=VALUE]  wait until condition is true\n"
    }

    // ------------- Driver -------------

    /// Runs a parsed command stream to completion: pre-pass, transaction
    /// attempts until one commits, then the post-pass.
    pub fn run_commands(
        &self,
        idl: &mut Idl,
        commands: &mut [Command],
        invalidate_cache: Option<&dyn Fn()>,
    ) -> Result<()> {
        {
            let mut symtab = SymbolTable::new();
            for command in commands.iter_mut() {
                if let Some(pre) = command.syntax.pre {
                    let mut ctx = CtlContext::new(self, idl, &mut symtab, command, invalidate_cache);
                    pre(&mut ctx)?;
                }
            }
        }

        loop {
            idl.run()?;
            let seqno = idl.seqno();
            idl.txn_begin();
            let mut symtab = SymbolTable::new();
            let mut try_again = false;

            for command in commands.iter_mut() {
                command.output.clear();
                command.table = None;
                if let Some(run) = command.syntax.run {
                    let mut ctx = CtlContext::new(self, idl, &mut symtab, command, invalidate_cache);
                    let result = run(&mut ctx);
                    let wants_retry = ctx.try_again;
                    if let Err(error) = result {
                        idl.txn_abort();
                        return Err(error);
                    }
                    if wants_retry {
                        try_again = true;
                        break;
                    }
                }
            }

            if try_again {
                debug!("a condition is not yet satisfied, waiting for a database change");
                idl.txn_abort();
                idl.wait_for_change(seqno)?;
                continue;
            }

            warn_unreferenced_symbols(&symtab);
            match idl.txn_commit(&self.schema)? {
                TxnStatus::Success => break,
                TxnStatus::TryAgain => {
                    debug!("commit raced with another writer, retrying");
                    idl.wait_for_change(seqno)?;
                    continue;
                }
            }
        }

        for command in commands.iter_mut() {
            if let Some(post) = command.syntax.post {
                let mut symtab = SymbolTable::new();
                let mut ctx = CtlContext::new(self, idl, &mut symtab, command, invalidate_cache);
                post(&mut ctx)?;
            }
        }
        if let Some(hook) = invalidate_cache {
            hook();
        }
        Ok(())
    }

    /// Parses and runs one command stream, returning the concatenated
    /// command outputs.
    pub fn execute(&self, idl: &mut Idl, args: &[&str]) -> Result<String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let mut commands = parse_commands(self, &args, OptionMap::default())?;
        self.run_commands(idl, &mut commands, None)?;
        let mut out = String::new();
        for command in &commands {
            out.push_str(&command.output);
            if let Some(table) = &command.table {
                out.push_str(&table.to_string());
            }
        }
        Ok(out)
    }
}

fn validate_row_ids(schema: &Schema) -> Result<()> {
    for table in schema.tables() {
        for id in &table.row_ids {
            let referrer = schema.table(&id.table).ok_or_else(|| {
                RowctlError::Schema(format!(
                    "row id of table {} names unknown table {}",
                    table.class.name, id.table
                ))
            })?;
            for column in [&id.name_column, &id.uuid_column].into_iter().flatten() {
                if referrer.class.column(column).is_none() {
                    return Err(RowctlError::Schema(format!(
                        "row id of table {} names unknown column {} in table {}",
                        table.class.name, column, id.table
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_show_tables(schema: &Schema, shows: &[ShowTable]) -> Result<()> {
    for show in shows {
        let table = schema.table(&show.table).ok_or_else(|| {
            RowctlError::Schema(format!("show format names unknown table {}", show.table))
        })?;
        for column in show.name_column.iter().chain(&show.columns) {
            if table.class.column(column).is_none() {
                return Err(RowctlError::Schema(format!(
                    "show format names unknown column {} in table {}",
                    column, show.table
                )));
            }
        }
        if let Some(wref) = &show.wref {
            let wref_table = schema.table(&wref.table).ok_or_else(|| {
                RowctlError::Schema(format!("show format names unknown table {}", wref.table))
            })?;
            for column in [&wref.name_column, &wref.wref_column] {
                if wref_table.class.column(column).is_none() {
                    return Err(RowctlError::Schema(format!(
                        "show format names unknown column {} in table {}",
                        column, wref.table
                    )));
                }
            }
        }
    }
    Ok(())
}

fn warn_unreferenced_symbols(symtab: &SymbolTable) {
    for (name, symbol) in symtab.iter() {
        if !symbol.created {
            warn!(
                "row id \"{}\" was referenced but never created (e.g. with \"-- --id={} \
                 create ...\")",
                name, name
            );
        } else if !symbol.strong_ref {
            warn!(
                "row id \"{}\" was created but no reference to it was inserted, so it \
                 will not actually appear in the database",
                name
            );
        }
    }
}

// ------------- Execution context -------------

/// Everything one command handler may touch, threaded through every pass.
pub struct CtlContext<'a> {
    pub interp: &'a Interpreter,
    pub idl: &'a mut Idl,
    pub symtab: &'a mut SymbolTable,
    pub argv: &'a [String],
    pub options: &'a OptionMap,
    pub output: &'a mut String,
    pub table: &'a mut Option<TextTable>,
    /// Set by `wait-until` when a condition is not yet satisfied; makes
    /// the driver discard the attempt and rerun the stream after the next
    /// store change.
    pub try_again: bool,
    invalidate: Option<&'a dyn Fn()>,
}

impl<'a> CtlContext<'a> {
    fn new(
        interp: &'a Interpreter,
        idl: &'a mut Idl,
        symtab: &'a mut SymbolTable,
        command: &'a mut Command<'_>,
        invalidate: Option<&'a dyn Fn()>,
    ) -> Self {
        let Command {
            argv,
            options,
            output,
            table,
            ..
        } = command;
        Self {
            interp,
            idl,
            symtab,
            argv: argv.as_slice(),
            options: &*options,
            output,
            table,
            try_again: false,
            invalidate,
        }
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    pub fn option_value(&self, name: &str) -> Option<&str> {
        self.options.get(name).and_then(|v| v.as_deref())
    }

    /// Called by read-write commands so the embedding can rebuild caches
    /// derived from database state.
    pub fn invalidate_cache(&self) {
        if let Some(hook) = self.invalidate {
            hook();
        }
    }

    /// Fuzzy table lookup against the interpreter's schema.
    pub fn get_table(&self, table_name: &str) -> Result<&'a CtlTable> {
        self.interp.schema.find_table(table_name)
    }

    /// Exact lookup for names that were validated when the interpreter was
    /// built.
    pub fn get_exact_table(&self, table_name: &str) -> Result<&'a CtlTable> {
        self.interp.schema.table(table_name).ok_or_else(|| {
            RowctlError::Internal(format!("table {} disappeared from the schema", table_name))
        })
    }

    /// Resolves a table and declares it, its row-id referrers and their
    /// columns, so the cache refresh covers record resolution.
    pub fn pre_get_table(&mut self, table_name: &str) -> Result<&'a CtlTable> {
        let table = self.get_table(table_name)?;
        self.idl.add_table(&table.class);
        for id in &table.row_ids {
            let referrer = self.get_exact_table(&id.table)?;
            self.idl.add_table(&referrer.class);
            if let Some(name_column) = &id.name_column {
                self.idl.add_column(&id.table, name_column);
            }
            if let Some(uuid_column) = &id.uuid_column {
                self.idl.add_column(&id.table, uuid_column);
            }
        }
        Ok(table)
    }

    /// Resolves a column fuzzily and declares it.
    pub fn pre_get_column(&mut self, table: &'a CtlTable, column_name: &str) -> Result<&'a Column> {
        let column = table.class.find_column(column_name)?;
        self.idl.add_column(&table.class.name, &column.name);
        Ok(column)
    }

    /// Pre-pass twin of the argument grammar: only the column name matters
    /// here, the rest of the argument is parsed again at run time.
    pub fn pre_parse_column_key_value(
        &mut self,
        arg: &str,
        table: &'a CtlTable,
    ) -> Result<&'a Column> {
        let mut cur = Cursor::new(arg);
        let column_name = cur.parse_token()?;
        if column_name.is_empty() {
            return Err(RowctlError::Usage(format!("{}: missing column name", arg)));
        }
        self.pre_get_column(table, &column_name)
    }

    pub fn check_mutable(&self, row: &Row, column: &Column) -> Result<()> {
        if !self.idl.is_mutable(row, column) {
            return Err(RowctlError::Semantic(format!(
                "cannot modify read-only column {} in table {}",
                column.name, row.table
            )));
        }
        Ok(())
    }

    // ------------- Record resolution -------------

    /// Resolves a record token to a row: first as a literal UUID, then
    /// through the table's row-id paths in declaration order.
    pub fn get_row(
        &mut self,
        table: &CtlTable,
        record_id: &str,
        must_exist: bool,
    ) -> Result<Option<Row>> {
        let mut row = None;
        if is_uuid_string(record_id) {
            if let Ok(uuid) = Uuid::parse_str(record_id) {
                row = self.idl.row_for_uuid(&table.class.name, &uuid);
            }
        }
        if row.is_none() {
            for id in &table.row_ids {
                row = self.get_row_by_id(table, id, record_id)?;
                if row.is_some() {
                    break;
                }
            }
        }
        if must_exist && row.is_none() {
            return Err(RowctlError::Resolution(format!(
                "no row \"{}\" in table {}",
                record_id, table.class.name
            )));
        }
        Ok(row)
    }

    fn get_row_by_id(
        &mut self,
        table: &CtlTable,
        id: &RowId,
        record_id: &str,
    ) -> Result<Option<Row>> {
        let referrer_table = self.get_exact_table(&id.table)?;

        let referrer = match &id.name_column {
            None => {
                // Without a name column the token "." names the single row
                // of the referrer table.
                if record_id != "." {
                    return Ok(None);
                }
                let rows = self.idl.rows(&referrer_table.class.name)?;
                if rows.len() == 1 {
                    Some(rows[0].clone())
                } else {
                    None
                }
            }
            Some(name_column) => {
                let column = referrer_table.class.column(name_column).ok_or_else(|| {
                    RowctlError::Internal(format!(
                        "row id names unknown column {} in table {}",
                        name_column, id.table
                    ))
                })?;
                let mut found = None;
                for row in self.idl.rows(&referrer_table.class.name)? {
                    let name = self.idl.read(&row, column)?;
                    let matches = name.n() == 1
                        && matches!(name.key(0), Atom::String(s) if s.as_str() == record_id);
                    if matches {
                        if found.is_some() {
                            return Err(RowctlError::Resolution(format!(
                                "multiple rows in {} match \"{}\"",
                                table.class.name, record_id
                            )));
                        }
                        found = Some(row);
                    }
                }
                found
            }
        };

        let referrer = match referrer {
            Some(referrer) => referrer,
            None => return Ok(None),
        };

        match &id.uuid_column {
            None => Ok(Some(referrer)),
            Some(uuid_column) => {
                let column = referrer_table.class.column(uuid_column).ok_or_else(|| {
                    RowctlError::Internal(format!(
                        "row id names unknown column {} in table {}",
                        uuid_column, id.table
                    ))
                })?;
                self.idl.txn_verify(&referrer, column)?;
                let datum = self.idl.read(&referrer, column)?;
                if datum.n() == 1 {
                    if let Atom::Uuid(uuid) = datum.key(0) {
                        return Ok(self.idl.row_for_uuid(&table.class.name, uuid));
                    }
                }
                Ok(None)
            }
        }
    }
}
