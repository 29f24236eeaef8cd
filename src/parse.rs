//! Argument and command-stream parsing.
//!
//! Two grammars live here. The argument grammar breaks one
//! `COLUMN[:KEY][OP VALUE]` string into a resolved column, an optional map
//! key, an operator and a raw value ([`parse_column_key_value`]). The
//! stream grammar splits a process argument vector into commands separated
//! by `--`, attaching leading `-…` tokens to each command as options and
//! validating them against the verb's option spec ([`parse_commands`]).
//!
//! The completion helpers ([`annotate_arguments`] and the listing functions
//! on the interpreter) derive the shell-completion annotations from the
//! same syntax strings users see in help output.

use crate::commands::{Command, OptionMap};
use crate::datum::Cursor;
use crate::engine::Interpreter;
use crate::error::{Result, RowctlError};
use crate::schema::{Column, CtlTable};

// ------------- Argument grammar -------------

/// One parsed `COLUMN[:KEY][OP VALUE]` argument. `key` and `value` are raw
/// tokens: quoted strings keep their quotes for the datum parser.
pub struct ParsedColumn<'t> {
    pub column: &'t Column,
    pub key: Option<String>,
    pub op: Option<usize>,
    pub value: Option<String>,
}

fn missing_operator_error(arg: &str, allowed_operators: &[&str]) -> String {
    let mut s = format!("{}: argument does not end in ", arg);
    s.push_str(&format!("\"{}\"", allowed_operators[0]));
    let n = allowed_operators.len();
    if n == 2 {
        s.push_str(&format!(" or \"{}\"", allowed_operators[1]));
    } else if n > 2 {
        for op in &allowed_operators[1..n - 1] {
            s.push_str(&format!(", \"{}\"", op));
        }
        s.push_str(&format!(", or \"{}\"", allowed_operators[n - 1]));
    }
    s.push_str(" followed by a value.");
    s
}

/// Breaks `arg` apart into a column of `table` (name possibly abbreviated),
/// an optional `:KEY`, and, when `want_value` is set, the longest operator
/// of `allowed_operators` (default `=`) followed by at least one character
/// of value.
pub fn parse_column_key_value<'t>(
    arg: &str,
    table: &'t CtlTable,
    allowed_operators: Option<&[&str]>,
    want_value: bool,
) -> Result<ParsedColumn<'t>> {
    let mut cur = Cursor::new(arg);

    let column_name = cur.parse_token()?;
    if column_name.is_empty() {
        return Err(RowctlError::Usage(format!("{}: missing column name", arg)));
    }
    let column = table.class.find_column(&column_name)?;

    let key = if cur.eat(':') {
        Some(cur.parse_token()?)
    } else {
        None
    };

    if want_value {
        let default_ops: &[&str] = &["="];
        let ops = allowed_operators.unwrap_or(default_ops);
        let rest = cur.rest();
        let mut best = None;
        let mut best_len = 0;
        for (idx, op) in ops.iter().enumerate() {
            if op.len() > best_len && rest.starts_with(op) && rest.len() > op.len() {
                best = Some(idx);
                best_len = op.len();
            }
        }
        match best {
            Some(idx) => Ok(ParsedColumn {
                column,
                key,
                op: Some(idx),
                value: Some(rest[best_len..].to_string()),
            }),
            None => Err(RowctlError::Usage(missing_operator_error(arg, ops))),
        }
    } else {
        if !cur.at_end() {
            return Err(RowctlError::Usage(format!(
                "{}: trailing garbage \"{}\" in argument",
                arg,
                cur.rest()
            )));
        }
        Ok(ParsedColumn {
            column,
            key,
            op: None,
            value: None,
        })
    }
}

/// Resolves a `--columns=` option value into a column list. `None` selects
/// every column with the row UUID first; inside the list, `_uuid` names the
/// UUID pseudo-column (returned as `None`).
pub fn parse_column_names<'t>(
    column_names: Option<&str>,
    table: &'t CtlTable,
) -> Result<Vec<Option<&'t Column>>> {
    match column_names {
        None => {
            let mut columns: Vec<Option<&Column>> = vec![None];
            columns.extend(table.class.columns.iter().map(Some));
            Ok(columns)
        }
        Some(names) => {
            let mut columns = Vec::new();
            for name in names.split([',', ' ']).filter(|s| !s.is_empty()) {
                if name.eq_ignore_ascii_case("_uuid") {
                    columns.push(None);
                } else {
                    columns.push(Some(table.class.find_column(name)?));
                }
            }
            if columns.is_empty() {
                return Err(RowctlError::Usage(
                    "must specify at least one column name".into(),
                ));
            }
            Ok(columns)
        }
    }
}

// ------------- Command stream -------------

/// Splits a process argument vector on `--` separators into commands.
/// Stream-wide options arrive through `local_options` and are merged into
/// the first command's option map.
pub fn parse_commands<'i>(
    interp: &'i Interpreter,
    args: &[String],
    mut local_options: OptionMap,
) -> Result<Vec<Command<'i>>> {
    let mut commands = Vec::new();
    let mut start = 0;
    for i in 0..=args.len() {
        if i == args.len() || args[i] == "--" {
            if i > start {
                commands.push(parse_command(interp, &args[start..i], &mut local_options)?);
            } else if !local_options.is_empty() {
                return Err(missing_command_name());
            }
            start = i + 1;
        }
    }
    if commands.is_empty() {
        return Err(missing_command_name());
    }
    Ok(commands)
}

fn missing_command_name() -> RowctlError {
    RowctlError::Usage("missing command name (use --help for help)".into())
}

/// Parses one command: leading `-…` tokens become options, the next token
/// names the verb, the rest are positional arguments.
fn parse_command<'i>(
    interp: &'i Interpreter,
    args: &[String],
    local_options: &mut OptionMap,
) -> Result<Command<'i>> {
    let mut options = std::mem::take(local_options);
    let mut i = 0;
    while i < args.len() {
        let option = &args[i];
        if !option.starts_with('-') {
            break;
        }
        let (key, value) = match option.split_once('=') {
            Some((k, v)) => (k.to_string(), Some(v.to_string())),
            None => (option.clone(), None),
        };
        if options.contains_key(&key) {
            return Err(RowctlError::Usage(format!(
                "'{}' option specified multiple times",
                option
            )));
        }
        options.insert(key, value);
        i += 1;
    }
    if i == args.len() {
        return Err(missing_command_name());
    }

    let syntax = interp.command(&args[i]).ok_or_else(|| {
        RowctlError::Usage(format!("unknown command '{}'; use --help for help", args[i]))
    })?;

    for (name, value) in &options {
        match syntax.option_spec(name) {
            None => {
                return Err(RowctlError::Usage(format!(
                    "'{}' command has no '{}' option",
                    syntax.name, name
                )));
            }
            Some(spec) => {
                if spec.takes_value && value.is_none() {
                    return Err(RowctlError::Usage(format!(
                        "missing argument to '{}' option on '{}' command",
                        name, syntax.name
                    )));
                }
                if !spec.takes_value && value.is_some() {
                    return Err(RowctlError::Usage(format!(
                        "'{}' option on '{}' does not accept an argument",
                        name, syntax.name
                    )));
                }
            }
        }
    }

    let n_arg = args.len() - i - 1;
    if n_arg < syntax.min_args {
        return Err(RowctlError::Usage(format!(
            "'{}' command requires at least {} arguments",
            syntax.name, syntax.min_args
        )));
    }
    if n_arg > syntax.max_args {
        if args[i + 1..].iter().any(|a| a.starts_with('-')) {
            return Err(RowctlError::Usage(format!(
                "'{}' command takes at most {} arguments (note that options must \
                 precede command names and follow a \"--\" argument)",
                syntax.name, syntax.max_args
            )));
        }
        return Err(RowctlError::Usage(format!(
            "'{}' command takes at most {} arguments",
            syntax.name, syntax.max_args
        )));
    }

    Ok(Command::new(syntax, options, args[i..].to_vec()))
}

// ------------- Completion annotations -------------

/// Converts a command's syntax string into the annotated form consumed by
/// the shell completion script: each argument word gains a leading `!`
/// (required), `?` (optional), `*` (zero or more) or `+` (one or more).
///
/// The string is scanned in reverse, tracking `[ ]` nesting in a bit stack
/// and a trailing `...` marker, so that an optional surrounding a whole
/// word suppresses the per-word sigil while a partial optional (as in
/// `[KEY=]VALUE`) does not.
pub fn annotate_arguments(arguments: &str) -> String {
    let bytes = arguments.as_bytes();
    if bytes.is_empty() {
        return String::new();
    }
    let mut out_rev: Vec<u8> = Vec::with_capacity(bytes.len() * 2);
    let mut oew_stack: u32 = 0;
    let mut in_repeated = false;
    let mut whole_word_is_optional = false;

    let mut idx = bytes.len();
    while idx > 0 {
        idx -= 1;
        match bytes[idx] {
            b']' => {
                oew_stack <<= 1;
                match bytes.get(idx + 1) {
                    None | Some(b' ') | Some(b'.') => oew_stack |= 1,
                    _ => {}
                }
            }
            b'[' => {
                if (idx == 0 || bytes[idx - 1] == b' ') && (oew_stack & 1) != 0 {
                    out_rev.push(if in_repeated { b'*' } else { b'?' });
                    whole_word_is_optional = true;
                } else {
                    out_rev.push(b'?');
                    whole_word_is_optional = false;
                }
                oew_stack >>= 1;
            }
            b' ' => {
                if !whole_word_is_optional {
                    out_rev.push(if in_repeated { b'+' } else { b'!' });
                }
                out_rev.push(b' ');
                in_repeated = false;
                whole_word_is_optional = false;
            }
            b'.' => in_repeated = true,
            c => out_rev.push(c),
        }
    }
    if bytes[0] != b'[' && !out_rev.is_empty() {
        out_rev.push(if in_repeated { b'+' } else { b'!' });
    }
    out_rev.reverse();
    String::from_utf8(out_rev).unwrap_or_default()
}
