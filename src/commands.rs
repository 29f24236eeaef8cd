//! The command set: verb registry and the implementation of every verb.
//!
//! Each verb registers a [`CommandSyntax`]: argument bounds, a syntax
//! string for help and completion output, an option spec, a read-only or
//! read-write mode, and up to three handlers. `pre` runs before the cache
//! is populated and declares the schema fragments the command will touch;
//! `run` executes inside the transaction; `post` (only `create`) rewrites
//! provisional UUIDs in the output after commit.
//!
//! Handlers receive a [`CtlContext`](crate::engine::CtlContext) and report
//! failures as values; the driver aborts the whole transaction on the
//! first error, so a failed command never leaves partial writes behind.

use std::collections::HashMap;
use std::io::IsTerminal;

use tracing::warn;
use uuid::Uuid;

use crate::datum::{evaluate_relop, Atom, Datum, RELOPS};
use crate::engine::CtlContext;
use crate::error::{Result, RowctlError};
use crate::idl::Row;
use crate::parse::{parse_column_key_value, parse_column_names};
use crate::schema::{AtomicType, CtlTable, OtherHasher, ShowTable};
use crate::table::TextTable;

/// Per-command options: `--name` keys mapping to their `=value` part.
pub type OptionMap = HashMap<String, Option<String>, OtherHasher>;

pub type Handler = fn(&mut CtlContext) -> Result<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub name: String,
    pub takes_value: bool,
}

/// The registered shape of one verb.
pub struct CommandSyntax {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub arguments: &'static str,
    pub pre: Option<Handler>,
    pub run: Option<Handler>,
    pub post: Option<Handler>,
    /// Comma-separated `--name` / `--name=` declarations, kept verbatim for
    /// the completion listing.
    pub options: &'static str,
    pub mode: Mode,
    parsed_options: Vec<OptionSpec>,
}

impl CommandSyntax {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &'static str,
        min_args: usize,
        max_args: usize,
        arguments: &'static str,
        pre: Option<Handler>,
        run: Option<Handler>,
        post: Option<Handler>,
        options: &'static str,
        mode: Mode,
    ) -> Self {
        let parsed_options = options
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|decl| match decl.strip_suffix('=') {
                Some(name) => OptionSpec {
                    name: name.to_string(),
                    takes_value: true,
                },
                None => OptionSpec {
                    name: decl.to_string(),
                    takes_value: false,
                },
            })
            .collect();
        Self {
            name,
            min_args,
            max_args,
            arguments,
            pre,
            run,
            post,
            options,
            mode,
            parsed_options,
        }
    }

    pub fn option_spec(&self, name: &str) -> Option<&OptionSpec> {
        self.parsed_options.iter().find(|o| o.name == name)
    }
}

/// One command of a stream: its verb, options, arguments and the output it
/// accumulated. `argv[0]` is the verb name.
pub struct Command<'i> {
    pub syntax: &'i CommandSyntax,
    pub options: OptionMap,
    pub argv: Vec<String>,
    pub output: String,
    pub table: Option<TextTable>,
}

impl<'i> Command<'i> {
    pub fn new(syntax: &'i CommandSyntax, options: OptionMap, argv: Vec<String>) -> Self {
        Self {
            syntax,
            options,
            argv,
            output: String::new(),
            table: None,
        }
    }
}

/// The built-in database command set.
pub fn db_commands() -> Vec<CommandSyntax> {
    vec![
        CommandSyntax::new(
            "comment",
            0,
            usize::MAX,
            "[ARG]...",
            None,
            None,
            None,
            "",
            Mode::ReadOnly,
        ),
        CommandSyntax::new(
            "get",
            2,
            usize::MAX,
            "TABLE RECORD [COLUMN[:KEY]]...",
            Some(pre_cmd_get),
            Some(cmd_get),
            None,
            "--if-exists,--id=",
            Mode::ReadOnly,
        ),
        CommandSyntax::new(
            "list",
            1,
            usize::MAX,
            "TABLE [RECORD]...",
            Some(pre_cmd_list),
            Some(cmd_list),
            None,
            "--if-exists,--columns=",
            Mode::ReadOnly,
        ),
        CommandSyntax::new(
            "find",
            1,
            usize::MAX,
            "TABLE [COLUMN[:KEY]=VALUE]...",
            Some(pre_cmd_find),
            Some(cmd_find),
            None,
            "--columns=",
            Mode::ReadOnly,
        ),
        CommandSyntax::new(
            "set",
            3,
            usize::MAX,
            "TABLE RECORD COLUMN[:KEY]=VALUE...",
            Some(pre_cmd_set),
            Some(cmd_set),
            None,
            "--if-exists",
            Mode::ReadWrite,
        ),
        CommandSyntax::new(
            "add",
            4,
            usize::MAX,
            "TABLE RECORD COLUMN [KEY=]VALUE...",
            Some(pre_cmd_add),
            Some(cmd_add),
            None,
            "--if-exists",
            Mode::ReadWrite,
        ),
        CommandSyntax::new(
            "remove",
            4,
            usize::MAX,
            "TABLE RECORD COLUMN KEY|VALUE|KEY=VALUE...",
            Some(pre_cmd_remove),
            Some(cmd_remove),
            None,
            "--if-exists",
            Mode::ReadWrite,
        ),
        CommandSyntax::new(
            "clear",
            3,
            usize::MAX,
            "TABLE RECORD COLUMN...",
            Some(pre_cmd_clear),
            Some(cmd_clear),
            None,
            "--if-exists",
            Mode::ReadWrite,
        ),
        CommandSyntax::new(
            "create",
            2,
            usize::MAX,
            "TABLE COLUMN[:KEY]=VALUE...",
            Some(pre_create),
            Some(cmd_create),
            Some(post_create),
            "--id=",
            Mode::ReadWrite,
        ),
        CommandSyntax::new(
            "destroy",
            1,
            usize::MAX,
            "TABLE [RECORD]...",
            Some(pre_cmd_destroy),
            Some(cmd_destroy),
            None,
            "--if-exists,--all",
            Mode::ReadWrite,
        ),
        CommandSyntax::new(
            "wait-until",
            2,
            usize::MAX,
            "TABLE RECORD [COLUMN[:KEY]=VALUE]...",
            Some(pre_cmd_wait_until),
            Some(cmd_wait_until),
            None,
            "",
            Mode::ReadOnly,
        ),
    ]
}

pub fn show_command() -> CommandSyntax {
    CommandSyntax::new(
        "show",
        0,
        0,
        "",
        Some(pre_cmd_show),
        Some(cmd_show),
        None,
        "",
        Mode::ReadOnly,
    )
}

// ------------- Shared helpers -------------

fn is_uuid_pseudo_column(arg: &str) -> bool {
    arg.eq_ignore_ascii_case("_uuid") || arg.eq_ignore_ascii_case("-uuid")
}

/// Writes one column of `row` in `table` from a `COLUMN[:KEY]=VALUE`
/// argument. The key form overlays a single map entry onto the current
/// content; the plain form replaces the whole datum.
pub fn set_column(ctx: &mut CtlContext, table: &CtlTable, row: &Row, arg: &str) -> Result<()> {
    let parsed = parse_column_key_value(arg, table, None, true)?;
    let column = parsed.column;
    let value = parsed.value.as_deref().unwrap_or("");
    ctx.check_mutable(row, column)?;

    if let Some(key) = &parsed.key {
        let value_base = column.ty.value.as_ref().ok_or_else(|| {
            RowctlError::Datum(format!(
                "cannot specify key to set for non-map column {}",
                column.name
            ))
        })?;
        let key_atom = Atom::from_string(&column.ty.key, key, ctx.symtab)?;
        let value_atom = Atom::from_string(value_base, value, ctx.symtab)?;
        let mut datum = Datum::pair(key_atom, value_atom);
        datum.union_with(&ctx.idl.read(row, column)?);
        ctx.idl.txn_verify(row, column)?;
        ctx.idl.txn_write(row, column, datum)?;
    } else {
        let datum = Datum::from_string(&column.ty, value, ctx.symtab)?;
        ctx.idl.txn_write(row, column, datum)?;
    }
    Ok(())
}

/// Embedding entry point: like the `set` verb's per-argument step, with the
/// table resolved through the fuzzy matcher, so abbreviated table names are
/// accepted here as well.
pub fn set_column_by_name(
    ctx: &mut CtlContext,
    table_name: &str,
    row: &Row,
    arg: &str,
) -> Result<()> {
    let table = ctx.get_table(table_name)?;
    set_column(ctx, table, row, arg)
}

/// Evaluates one `COLUMN[:KEY] OP VALUE` condition against a row.
fn is_condition_satisfied(
    ctx: &mut CtlContext,
    table: &CtlTable,
    row: &Row,
    arg: &str,
) -> Result<bool> {
    let ops: Vec<&str> = RELOPS.iter().map(|(s, _)| *s).collect();
    let parsed = parse_column_key_value(arg, table, Some(&ops), true)?;
    let column = parsed.column;
    let value = parsed.value.as_deref().unwrap_or("");
    let (_, op) = RELOPS[parsed.op.unwrap_or(0)];

    let have = ctx.idl.read(row, column)?;
    if let Some(key) = &parsed.key {
        if column.ty.value.is_none() {
            return Err(RowctlError::Datum(format!(
                "cannot specify key to check for non-map column {}",
                column.name
            )));
        }
        let want_key = Atom::from_string(&column.ty.key, key, ctx.symtab)?;
        let b = Datum::from_string(&column.ty.value_set_type(), value, ctx.symtab)?;
        match have.find_key(&want_key) {
            None if !op.is_set_operator() => Ok(false),
            idx => {
                let a = match idx {
                    Some(i) => Datum::scalar(have.value(i).cloned().unwrap_or_else(|| {
                        Atom::default_for(column.ty.key.atomic)
                    })),
                    None => Datum::empty_set(),
                };
                Ok(evaluate_relop(&a, &b, op))
            }
        }
    } else {
        let want = Datum::from_string(&column.ty.widened(), value, ctx.symtab)?;
        Ok(evaluate_relop(&have, &want, op))
    }
}

fn list_record(
    ctx: &CtlContext,
    row: &Row,
    columns: &[Option<&crate::schema::Column>],
    out: &mut TextTable,
) -> Result<()> {
    let mut cells = Vec::with_capacity(columns.len());
    for column in columns {
        match column {
            None => cells.push(row.uuid.to_string()),
            Some(column) => {
                let datum = ctx.idl.read(row, column)?;
                cells.push(datum.to_string(&column.ty));
            }
        }
    }
    out.add_row(cells);
    Ok(())
}

fn make_output_table(columns: &[Option<&crate::schema::Column>]) -> TextTable {
    TextTable::new(
        columns
            .iter()
            .map(|c| c.map(|c| c.name.clone()).unwrap_or_else(|| "_uuid".into()))
            .collect(),
    )
}

// ------------- get -------------

fn pre_cmd_get(ctx: &mut CtlContext) -> Result<()> {
    let id = ctx.option_value("--id").map(|s| s.to_string());
    // "get" without column arguments or --id can make sense in a script
    // asserting that a row exists, but an interactive user almost certainly
    // forgot something.
    if id.is_none() && ctx.argv.len() <= 3 && std::io::stdout().is_terminal() {
        warn!("\"get\" command without row arguments or \"--id\" is possibly erroneous");
    }
    let table_name = ctx.argv[1].clone();
    let table = ctx.pre_get_table(&table_name)?;
    for i in 3..ctx.argv.len() {
        if is_uuid_pseudo_column(&ctx.argv[i]) {
            continue;
        }
        let arg = ctx.argv[i].clone();
        ctx.pre_parse_column_key_value(&arg, table)?;
    }
    Ok(())
}

fn cmd_get(ctx: &mut CtlContext) -> Result<()> {
    let id = ctx.option_value("--id").map(|s| s.to_string());
    let must_exist = !ctx.has_option("--if-exists");
    let table_name = ctx.argv[1].clone();
    let record_id = ctx.argv[2].clone();

    if id.is_some() && !must_exist {
        return Err(RowctlError::Usage(
            "--if-exists and --id may not be specified together".into(),
        ));
    }

    let table = ctx.get_table(&table_name)?;
    let row = match ctx.get_row(table, &record_id, must_exist)? {
        Some(row) => row,
        None => return Ok(()),
    };

    if let Some(id) = id {
        let mut new = false;
        let symbol = ctx.symtab.create_symbol(&id, Some(&mut new))?;
        if !new {
            return Err(RowctlError::Resolution(format!(
                "row id \"{}\" specified on \"get\" command was used before it was defined",
                id
            )));
        }
        symbol.uuid = row.uuid;
        // The symbol names a row that already exists, so it needs no
        // inserted reference to survive.
        symbol.strong_ref = true;
    }

    for i in 3..ctx.argv.len() {
        let arg = ctx.argv[i].clone();
        if is_uuid_pseudo_column(&arg) {
            ctx.output.push_str(&row.uuid.to_string());
            ctx.output.push('\n');
            continue;
        }

        let parsed = parse_column_key_value(&arg, table, None, false)?;
        let column = parsed.column;
        ctx.idl.txn_verify(&row, column)?;
        let datum = ctx.idl.read(&row, column)?;
        if let Some(key) = &parsed.key {
            if column.ty.value.is_none() {
                return Err(RowctlError::Datum(format!(
                    "cannot specify key to get for non-map column {}",
                    column.name
                )));
            }
            let want_key = Atom::from_string(&column.ty.key, key, ctx.symtab)?;
            match datum.find_key(&want_key) {
                Some(idx) => {
                    if let Some(value) = datum.value(idx) {
                        ctx.output.push_str(&value.to_string());
                    }
                }
                None => {
                    if must_exist {
                        return Err(RowctlError::Resolution(format!(
                            "no key \"{}\" in {} record \"{}\" column {}",
                            key, table.class.name, record_id, column.name
                        )));
                    }
                }
            }
        } else {
            ctx.output.push_str(&datum.to_string(&column.ty));
        }
        ctx.output.push('\n');
    }
    Ok(())
}

// ------------- list -------------

fn pre_cmd_list(ctx: &mut CtlContext) -> Result<()> {
    let column_names = ctx.option_value("--columns").map(|s| s.to_string());
    let table_name = ctx.argv[1].clone();
    let table = ctx.pre_get_table(&table_name)?;
    for column in parse_column_names(column_names.as_deref(), table)?.into_iter().flatten() {
        ctx.idl.add_column(&table.class.name, &column.name);
    }
    Ok(())
}

fn cmd_list(ctx: &mut CtlContext) -> Result<()> {
    let column_names = ctx.option_value("--columns").map(|s| s.to_string());
    let must_exist = !ctx.has_option("--if-exists");
    let table_name = ctx.argv[1].clone();

    let table = ctx.get_table(&table_name)?;
    let columns = parse_column_names(column_names.as_deref(), table)?;
    let mut out = make_output_table(&columns);
    if ctx.argv.len() > 2 {
        for i in 2..ctx.argv.len() {
            let record_id = ctx.argv[i].clone();
            if let Some(row) = ctx.get_row(table, &record_id, must_exist)? {
                list_record(ctx, &row, &columns, &mut out)?;
            }
        }
    } else {
        for row in ctx.idl.rows(&table.class.name)? {
            list_record(ctx, &row, &columns, &mut out)?;
        }
    }
    *ctx.table = Some(out);
    Ok(())
}

// ------------- find -------------

fn pre_cmd_find(ctx: &mut CtlContext) -> Result<()> {
    let column_names = ctx.option_value("--columns").map(|s| s.to_string());
    let table_name = ctx.argv[1].clone();
    let table = ctx.pre_get_table(&table_name)?;
    for column in parse_column_names(column_names.as_deref(), table)?.into_iter().flatten() {
        ctx.idl.add_column(&table.class.name, &column.name);
    }
    for i in 2..ctx.argv.len() {
        let arg = ctx.argv[i].clone();
        ctx.pre_parse_column_key_value(&arg, table)?;
    }
    Ok(())
}

fn cmd_find(ctx: &mut CtlContext) -> Result<()> {
    let column_names = ctx.option_value("--columns").map(|s| s.to_string());
    let table_name = ctx.argv[1].clone();

    let table = ctx.get_table(&table_name)?;
    let columns = parse_column_names(column_names.as_deref(), table)?;
    let mut out = make_output_table(&columns);
    'rows: for row in ctx.idl.rows(&table.class.name)? {
        for i in 2..ctx.argv.len() {
            let arg = ctx.argv[i].clone();
            if !is_condition_satisfied(ctx, table, &row, &arg)? {
                continue 'rows;
            }
        }
        list_record(ctx, &row, &columns, &mut out)?;
    }
    *ctx.table = Some(out);
    Ok(())
}

// ------------- set -------------

fn pre_cmd_set(ctx: &mut CtlContext) -> Result<()> {
    let table_name = ctx.argv[1].clone();
    let table = ctx.pre_get_table(&table_name)?;
    for i in 3..ctx.argv.len() {
        let arg = ctx.argv[i].clone();
        ctx.pre_parse_column_key_value(&arg, table)?;
    }
    Ok(())
}

fn cmd_set(ctx: &mut CtlContext) -> Result<()> {
    let must_exist = !ctx.has_option("--if-exists");
    let table_name = ctx.argv[1].clone();
    let record_id = ctx.argv[2].clone();

    let table = ctx.get_table(&table_name)?;
    let row = match ctx.get_row(table, &record_id, must_exist)? {
        Some(row) => row,
        None => return Ok(()),
    };
    for i in 3..ctx.argv.len() {
        let arg = ctx.argv[i].clone();
        set_column(ctx, table, &row, &arg)?;
    }
    ctx.invalidate_cache();
    Ok(())
}

// ------------- add -------------

fn pre_cmd_add(ctx: &mut CtlContext) -> Result<()> {
    let table_name = ctx.argv[1].clone();
    let column_name = ctx.argv[3].clone();
    let table = ctx.pre_get_table(&table_name)?;
    ctx.pre_get_column(table, &column_name)?;
    Ok(())
}

fn cmd_add(ctx: &mut CtlContext) -> Result<()> {
    let must_exist = !ctx.has_option("--if-exists");
    let table_name = ctx.argv[1].clone();
    let record_id = ctx.argv[2].clone();
    let column_name = ctx.argv[3].clone();

    let table = ctx.get_table(&table_name)?;
    let column = table.class.find_column(&column_name)?;
    let row = match ctx.get_row(table, &record_id, must_exist)? {
        Some(row) => row,
        None => return Ok(()),
    };
    ctx.check_mutable(&row, column)?;

    let ty = &column.ty;
    let mut old = ctx.idl.read(&row, column)?;
    for i in 4..ctx.argv.len() {
        let mut add_type = ty.clone();
        add_type.n_min = 1;
        add_type.n_max = usize::MAX;
        let add = Datum::from_string(&add_type, &ctx.argv[i].clone(), ctx.symtab)?;
        old.union_with(&add);
    }
    if old.n() > ty.n_max {
        return Err(RowctlError::Datum(format!(
            "\"add\" operation would put {} {} in column {} of table {} but the maximum \
             number is {}",
            old.n(),
            if ty.is_map() { "pairs" } else { "values" },
            column.name,
            table.class.name,
            ty.n_max
        )));
    }
    ctx.idl.txn_verify(&row, column)?;
    ctx.idl.txn_write(&row, column, old)?;

    ctx.invalidate_cache();
    Ok(())
}

// ------------- remove -------------

fn pre_cmd_remove(ctx: &mut CtlContext) -> Result<()> {
    let table_name = ctx.argv[1].clone();
    let column_name = ctx.argv[3].clone();
    let table = ctx.pre_get_table(&table_name)?;
    ctx.pre_get_column(table, &column_name)?;
    Ok(())
}

fn cmd_remove(ctx: &mut CtlContext) -> Result<()> {
    let must_exist = !ctx.has_option("--if-exists");
    let table_name = ctx.argv[1].clone();
    let record_id = ctx.argv[2].clone();
    let column_name = ctx.argv[3].clone();

    let table = ctx.get_table(&table_name)?;
    let column = table.class.find_column(&column_name)?;
    let row = match ctx.get_row(table, &record_id, must_exist)? {
        Some(row) => row,
        None => return Ok(()),
    };
    ctx.check_mutable(&row, column)?;

    let ty = &column.ty;
    let mut old = ctx.idl.read(&row, column)?;
    for i in 4..ctx.argv.len() {
        let arg = ctx.argv[i].clone();
        let mut rm_type = ty.clone();
        rm_type.n_min = 1;
        rm_type.n_max = usize::MAX;
        let rm = match Datum::from_string(&rm_type, &arg, ctx.symtab) {
            Ok(rm) => rm,
            Err(error) => {
                // A value that does not parse as the full map type may
                // still name keys to remove.
                if rm_type.is_map() {
                    rm_type.value = None;
                    Datum::from_string(&rm_type, &arg, ctx.symtab)?
                } else {
                    return Err(error);
                }
            }
        };
        old.subtract(&rm);
    }
    if old.n() < ty.n_min {
        return Err(RowctlError::Datum(format!(
            "\"remove\" operation would put {} {} in column {} of table {} but the minimum \
             number is {}",
            old.n(),
            if ty.is_map() { "pairs" } else { "values" },
            column.name,
            table.class.name,
            ty.n_min
        )));
    }
    ctx.idl.txn_verify(&row, column)?;
    ctx.idl.txn_write(&row, column, old)?;

    ctx.invalidate_cache();
    Ok(())
}

// ------------- clear -------------

fn pre_cmd_clear(ctx: &mut CtlContext) -> Result<()> {
    let table_name = ctx.argv[1].clone();
    let table = ctx.pre_get_table(&table_name)?;
    for i in 3..ctx.argv.len() {
        let column_name = ctx.argv[i].clone();
        ctx.pre_get_column(table, &column_name)?;
    }
    Ok(())
}

fn cmd_clear(ctx: &mut CtlContext) -> Result<()> {
    let must_exist = !ctx.has_option("--if-exists");
    let table_name = ctx.argv[1].clone();
    let record_id = ctx.argv[2].clone();

    let table = ctx.get_table(&table_name)?;
    let row = match ctx.get_row(table, &record_id, must_exist)? {
        Some(row) => row,
        None => return Ok(()),
    };
    for i in 3..ctx.argv.len() {
        let column = table.class.find_column(&ctx.argv[i].clone())?;
        ctx.check_mutable(&row, column)?;
        if column.ty.n_min > 0 {
            return Err(RowctlError::Semantic(format!(
                "\"clear\" operation cannot be applied to column {} of table {}, which is \
                 not allowed to be empty",
                column.name, table.class.name
            )));
        }
        ctx.idl
            .txn_write(&row, column, Datum::empty_for(&column.ty))?;
    }
    ctx.invalidate_cache();
    Ok(())
}

// ------------- create -------------

fn pre_create(ctx: &mut CtlContext) -> Result<()> {
    let id = ctx.option_value("--id").map(|s| s.to_string());
    let table_name = ctx.argv[1].clone();
    let table = ctx.get_table(&table_name)?;
    if id.is_none() && !table.class.is_root {
        warn!(
            "applying \"create\" command to table {} without --id option will have no effect",
            table.class.name
        );
    }
    Ok(())
}

fn cmd_create(ctx: &mut CtlContext) -> Result<()> {
    let id = ctx.option_value("--id").map(|s| s.to_string());
    let table_name = ctx.argv[1].clone();
    let table = ctx.get_table(&table_name)?;

    let uuid = match id {
        Some(id) => {
            let is_root = table.class.is_root;
            let symbol = ctx.symtab.create_symbol(&id, None)?;
            if is_root {
                // Root rows persist even when unreferenced, so the usual
                // unreferenced-symbol warning does not apply.
                symbol.strong_ref = true;
            }
            Some(symbol.uuid)
        }
        None => None,
    };

    let row = ctx.idl.txn_insert(&table.class, uuid)?;
    for i in 2..ctx.argv.len() {
        let arg = ctx.argv[i].clone();
        set_column(ctx, table, &row, &arg)?;
    }
    ctx.output.push_str(&row.uuid.to_string());
    Ok(())
}

/// Rewrites the provisional UUID printed by `cmd_create` to the one the
/// store assigned at commit, and terminates the line.
fn post_create(ctx: &mut CtlContext) -> Result<()> {
    let provisional = Uuid::parse_str(ctx.output.trim()).map_err(|_| {
        RowctlError::Internal("\"create\" output is not a row UUID".into())
    })?;
    if let Some(real) = ctx.idl.txn_get_insert_uuid(&provisional) {
        ctx.output.clear();
        ctx.output.push_str(&real.to_string());
    }
    ctx.output.push('\n');
    Ok(())
}

// ------------- destroy -------------

fn pre_cmd_destroy(ctx: &mut CtlContext) -> Result<()> {
    let table_name = ctx.argv[1].clone();
    ctx.pre_get_table(&table_name)?;
    Ok(())
}

fn cmd_destroy(ctx: &mut CtlContext) -> Result<()> {
    let must_exist = !ctx.has_option("--if-exists");
    let delete_all = ctx.has_option("--all");
    let table_name = ctx.argv[1].clone();

    let table = ctx.get_table(&table_name)?;

    if delete_all && ctx.argv.len() > 2 {
        return Err(RowctlError::Usage(
            "--all and records argument should not be specified together".into(),
        ));
    }
    if delete_all && !must_exist {
        return Err(RowctlError::Usage(
            "--all and --if-exists should not be specified together".into(),
        ));
    }

    if delete_all {
        for row in ctx.idl.rows(&table.class.name)? {
            ctx.idl.txn_delete(&row)?;
        }
    } else {
        for i in 2..ctx.argv.len() {
            let record_id = ctx.argv[i].clone();
            if let Some(row) = ctx.get_row(table, &record_id, must_exist)? {
                ctx.idl.txn_delete(&row)?;
            }
        }
    }
    ctx.invalidate_cache();
    Ok(())
}

// ------------- wait-until -------------

fn pre_cmd_wait_until(ctx: &mut CtlContext) -> Result<()> {
    let table_name = ctx.argv[1].clone();
    let table = ctx.pre_get_table(&table_name)?;
    for i in 3..ctx.argv.len() {
        let arg = ctx.argv[i].clone();
        ctx.pre_parse_column_key_value(&arg, table)?;
    }
    Ok(())
}

fn cmd_wait_until(ctx: &mut CtlContext) -> Result<()> {
    let table_name = ctx.argv[1].clone();
    let record_id = ctx.argv[2].clone();

    let table = ctx.get_table(&table_name)?;
    let row = match ctx.get_row(table, &record_id, false)? {
        Some(row) => row,
        None => {
            ctx.try_again = true;
            return Ok(());
        }
    };
    for i in 3..ctx.argv.len() {
        let arg = ctx.argv[i].clone();
        if !is_condition_satisfied(ctx, table, &row, &arg)? {
            ctx.try_again = true;
            return Ok(());
        }
    }
    Ok(())
}

// ------------- show -------------

fn pre_cmd_show(ctx: &mut CtlContext) -> Result<()> {
    let shows: Vec<ShowTable> = ctx.interp.show_tables().unwrap_or(&[]).to_vec();
    for show in &shows {
        let table = ctx.get_exact_table(&show.table)?;
        ctx.idl.add_table(&table.class);
        if let Some(name_column) = &show.name_column {
            ctx.idl.add_column(&show.table, name_column);
        }
        for column in &show.columns {
            ctx.idl.add_column(&show.table, column);
        }
        if let Some(wref) = &show.wref {
            let wref_table = ctx.get_exact_table(&wref.table)?;
            ctx.idl.add_table(&wref_table.class);
            ctx.idl.add_column(&wref.table, &wref.name_column);
            ctx.idl.add_column(&wref.table, &wref.wref_column);
        }
    }
    Ok(())
}

fn cmd_show(ctx: &mut CtlContext) -> Result<()> {
    let root = ctx
        .interp
        .show_tables()
        .and_then(|shows| shows.first())
        .ok_or_else(|| RowctlError::Internal("\"show\" command has no table list".into()))?
        .table
        .clone();
    let mut shown = std::collections::HashSet::new();
    for row in ctx.idl.rows(&root)? {
        cmd_show_row(ctx, &row, 0, &mut shown)?;
    }
    debug_assert!(shown.is_empty());
    Ok(())
}

fn indent(output: &mut String, level: usize) {
    for _ in 0..level * 4 {
        output.push(' ');
    }
}

/// `shown` holds the table names on the current recursion path, so a table
/// prints its full detail at most once per branch and reference cycles
/// terminate.
fn cmd_show_row(
    ctx: &mut CtlContext,
    row: &Row,
    level: usize,
    shown: &mut std::collections::HashSet<String>,
) -> Result<()> {
    let show = ctx.interp.show_table(&row.table).cloned();

    indent(ctx.output, level);
    match show.as_ref().and_then(|s| s.name_column.as_ref()) {
        Some(name_column) => {
            let table = ctx.get_exact_table(&row.table)?;
            let column = table.class.column(name_column).ok_or_else(|| {
                RowctlError::Internal(format!(
                    "show declaration names unknown column {} in table {}",
                    name_column, row.table
                ))
            })?;
            let datum = ctx.idl.read(row, column)?;
            ctx.output.push_str(&row.table);
            ctx.output.push(' ');
            ctx.output.push_str(&datum.to_string(&column.ty));
        }
        None => ctx.output.push_str(&row.uuid.to_string()),
    }
    ctx.output.push('\n');

    let show = match show {
        Some(show) if !shown.contains(&row.table) => show,
        _ => return Ok(()),
    };
    shown.insert(row.table.clone());

    let table = ctx.get_exact_table(&row.table)?;
    for column_name in &show.columns {
        let column = table.class.column(column_name).ok_or_else(|| {
            RowctlError::Internal(format!(
                "show declaration names unknown column {} in table {}",
                column_name, row.table
            ))
        })?;
        let datum = ctx.idl.read(row, column)?;

        if column.ty.key.atomic == AtomicType::Uuid && column.ty.key.ref_table.is_some() {
            let ref_table = column.ty.key.ref_table.clone().unwrap();
            if ctx.interp.show_table(&ref_table).is_some() {
                for atom in datum.keys().to_vec() {
                    if let Atom::Uuid(uuid) = atom {
                        if let Some(ref_row) = ctx.idl.row_for_uuid(&ref_table, &uuid) {
                            cmd_show_row(ctx, &ref_row, level + 1, shown)?;
                        }
                    }
                }
                continue;
            }
        } else if column.ty.is_map()
            && column
                .ty
                .value
                .as_ref()
                .map(|v| v.atomic == AtomicType::Uuid && v.ref_table.is_some())
                .unwrap_or(false)
        {
            let ref_table = column.ty.value.as_ref().unwrap().ref_table.clone().unwrap();
            let ref_show = ctx.interp.show_table(&ref_table).cloned();
            if let Some(ref_show) = ref_show {
                if let Some(ref_name_column) = &ref_show.name_column {
                    indent(ctx.output, level + 1);
                    ctx.output.push_str(&format!("{}:\n", column.name));
                    for i in 0..datum.n() {
                        indent(ctx.output, level + 2);
                        ctx.output.push_str(&datum.key(i).to_string());
                        ctx.output.push('=');
                        let ref_row = match datum.value(i) {
                            Some(Atom::Uuid(uuid)) => ctx.idl.row_for_uuid(&ref_table, uuid),
                            _ => None,
                        };
                        match ref_row {
                            Some(ref_row) => {
                                let ref_class = ctx.get_exact_table(&ref_table)?;
                                let name_col =
                                    ref_class.class.column(ref_name_column).ok_or_else(|| {
                                        RowctlError::Internal(format!(
                                            "show declaration names unknown column {} in table {}",
                                            ref_name_column, ref_table
                                        ))
                                    })?;
                                let name = ctx.idl.read(&ref_row, name_col)?;
                                ctx.output.push_str(&name.to_string(&name_col.ty));
                            }
                            None => ctx.output.push_str("\"<null>\""),
                        }
                        ctx.output.push('\n');
                    }
                    continue;
                }
            }
        }

        if !datum.is_default(&column.ty) {
            indent(ctx.output, level + 1);
            ctx.output.push_str(&column.name);
            ctx.output.push_str(": ");
            ctx.output.push_str(&datum.to_string(&column.ty));
            ctx.output.push('\n');
        }
    }

    cmd_show_weak_ref(ctx, &show, row, level)?;
    shown.remove(&row.table);
    Ok(())
}

/// Prints rows of the weak-reference table whose reference column points
/// back at `cur_row`.
fn cmd_show_weak_ref(
    ctx: &mut CtlContext,
    show: &ShowTable,
    cur_row: &Row,
    level: usize,
) -> Result<()> {
    let wref = match &show.wref {
        Some(wref) => wref.clone(),
        None => return Ok(()),
    };
    let wref_table = ctx.get_exact_table(&wref.table)?;
    let wref_column = wref_table.class.column(&wref.wref_column).ok_or_else(|| {
        RowctlError::Internal(format!(
            "show declaration names unknown column {} in table {}",
            wref.wref_column, wref.table
        ))
    })?;
    let name_column = wref_table.class.column(&wref.name_column).ok_or_else(|| {
        RowctlError::Internal(format!(
            "show declaration names unknown column {} in table {}",
            wref.name_column, wref.table
        ))
    })?;

    for row_wref in ctx.idl.rows(&wref.table)? {
        let wref_datum = ctx.idl.read(&row_wref, wref_column)?;
        if wref_datum.n() > 0 && *wref_datum.key(0) == Atom::Uuid(cur_row.uuid) {
            let name_datum = ctx.idl.read(&row_wref, name_column)?;
            indent(ctx.output, level + 1);
            ctx.output.push_str(&wref.table);
            ctx.output.push(' ');
            ctx.output.push_str(&name_datum.to_string(&name_column.ty));
            ctx.output.push('\n');
        }
    }
    Ok(())
}
