//! Rowctl – a generic command interpreter for a schema-typed, row-oriented
//! configuration database.
//!
//! Users issue small imperative programs as a single argument vector:
//! sequences of commands such as `list`, `find`, `get`, `set`, `add`,
//! `remove`, `clear`, `create`, `destroy`, `wait-until` and `show`,
//! separated by `--`. The interpreter compiles each command into a
//! *pre-pass* that declares the schema fragments it will need, so the
//! caching client layer can populate itself in one refresh, and an
//! *execution pass* that reads and writes rows inside a single
//! transaction, producing textual output.
//!
//! Highlights:
//! * Fuzzy matching of table and column names: case-insensitive, `-` and
//!   `_` equivalent, unambiguous prefixes accepted ([`schema`]).
//! * Record identification by UUID or by schema-declared row-id paths,
//!   including indirection through a referrer row ([`engine`]).
//! * A typed datum algebra with twelve relational and set-relational
//!   condition operators ([`datum`]).
//! * Forward-referenced row identities: a `create` in one command can be
//!   referenced as `@name` by any other command of the same transaction
//!   ([`symtab`]).
//! * A cooperative retry loop: `wait-until` and optimistic-concurrency
//!   failures discard the attempt and rerun the whole stream once the
//!   store changes ([`engine`], [`idl`]).
//!
//! ## Modules
//! * [`schema`] – Table, column and show-format descriptors plus the name
//!   matcher.
//! * [`datum`] – Atoms, datums, parsing, rendering and the condition
//!   operators.
//! * [`symtab`] – `@name` symbols scoped to one transaction attempt.
//! * [`idl`] – The caching, transactional client layer.
//! * [`persist`] – SQLite row store with optimistic commits and garbage
//!   collection of unreferenced non-root rows.
//! * [`parse`] – Argument grammar, command-stream parsing, completion
//!   annotations.
//! * [`commands`] – The verb registry and every verb's implementation.
//! * [`engine`] – The interpreter value, execution context and driver.
//! * [`table`] – Text table output for `list` and `find`.
//! * [`error`] – The crate-wide error type.
//!
//! ## Quick Start
//! ```
//! use rowctl::engine::Interpreter;
//! use rowctl::idl::Idl;
//! use rowctl::schema::{AtomicType, Column, ColumnType, CtlTable, RowId, TableClass};
//!
//! let bridge = TableClass::new("Bridge", true)
//!     .with_column(Column::new("name", ColumnType::scalar(AtomicType::String)));
//! let tables = vec![CtlTable::new(bridge).with_row_id(RowId {
//!     table: "Bridge".into(),
//!     name_column: Some("name".into()),
//!     uuid_column: None,
//! })];
//! let interp = Interpreter::new(tables, None).unwrap();
//! let mut idl = Idl::open(":memory:").unwrap();
//! interp.execute(&mut idl, &["create", "Bridge", "name=br0"]).unwrap();
//! let out = interp
//!     .execute(&mut idl, &["--columns=name", "list", "Bridge", "br0"])
//!     .unwrap();
//! assert!(out.contains("br0"));
//! ```
//!
//! ## Status
//! The command set and argument grammar are stable; the store layout and
//! the embedding API (custom verbs through
//! [`engine::Interpreter::register_commands`]) may still evolve.

pub mod commands;
pub mod datum;
pub mod engine;
pub mod error;
pub mod idl;
pub mod parse;
pub mod persist;
pub mod schema;
pub mod symtab;
pub mod table;
