//! Persistence layer: SQLite-backed row store behind the client cache.
//!
//! The `Store` holds the durable state of the configuration database: rows,
//! their cells (one serialized datum per column), and a version counter that
//! advances on every applied transaction. The client layer reads snapshots
//! restricted to the tables and columns a command stream declared interest
//! in, stages changes, and hands them back here for an atomic,
//! optimistically-checked apply.
//!
//! # Schema Overview
//! * `DbRow(Tbl, Uuid)` – row existence.
//! * `DbCell(Tbl, Uuid, Col, Datum)` – one JSON-serialized datum per cell.
//! * `DbMeta(Id, Version)` – single-row version counter.
//!
//! # Concurrency
//! Several processes may open the same file-backed store; WAL mode and a
//! busy timeout keep concurrent commits safe. A commit re-checks every cell
//! the transaction verified and reports [`CommitOutcome::TryAgain`] when a
//! concurrent writer got there first.
//!
//! # Garbage Collection
//! After applying a transaction the store deletes rows of non-root tables
//! that no strong reference reaches, repeating until a fixpoint so chains
//! of unreferenced rows collapse in one commit.

use std::collections::{BTreeMap, HashMap, HashSet};

use bimap::BiMap;
use rusqlite::{params, Connection, TransactionBehavior};
use uuid::Uuid;

use crate::datum::{Atom, Datum};
use crate::error::{Result, RowctlError};
use crate::schema::{OtherHasher, Schema};

/// Tables and columns a command stream declared it will touch.
pub type Interest = HashMap<String, HashSet<String, OtherHasher>, OtherHasher>;

/// One column's content for every declared column of one row.
pub type RowCells = HashMap<String, Datum, OtherHasher>;

/// A consistent view of the declared part of the store.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub version: i64,
    pub tables: HashMap<String, BTreeMap<Uuid, RowCells>, OtherHasher>,
}

impl Snapshot {
    pub fn cell(&self, table: &str, uuid: &Uuid, column: &str) -> Option<&Datum> {
        self.tables.get(table)?.get(uuid)?.get(column)
    }
}

/// Staged changes of one transaction attempt, in store terms.
#[derive(Debug, Default)]
pub struct StagedChanges {
    /// `(table, provisional uuid, initial cells)` per inserted row.
    pub inserts: Vec<(String, Uuid, RowCells)>,
    /// `(table, uuid, column, datum)` per staged write.
    pub writes: Vec<(String, Uuid, String, Datum)>,
    /// `(table, uuid)` per staged delete.
    pub deletes: Vec<(String, Uuid)>,
    /// `(table, uuid, column, datum at snapshot)` for every cell marked as
    /// participating in optimistic concurrency. `None` records that the
    /// cell was unset when the snapshot was taken.
    pub verifies: Vec<(String, Uuid, String, Option<Datum>)>,
}

impl StagedChanges {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.writes.is_empty() && self.deletes.is_empty()
    }
}

/// What became of a commit attempt.
#[derive(Debug)]
pub enum CommitOutcome {
    /// Applied; provisional row ids map to their committed ones.
    Success { inserted: BiMap<Uuid, Uuid> },
    /// A concurrent writer invalidated the snapshot; rerun the stream.
    TryAgain,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens a store. `:memory:` opens a private in-memory database; a
    /// `unix:` prefix on a database target is stripped, everything else is
    /// treated as a file path.
    pub fn open(target: &str) -> Result<Store> {
        let conn = if target == ":memory:" {
            Connection::open_in_memory()?
        } else {
            let path = target.strip_prefix("unix:").unwrap_or(target);
            let conn = Connection::open(path)?;
            let _ = conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;");
            let _ = conn.busy_timeout(std::time::Duration::from_millis(5000));
            conn
        };
        conn.execute_batch(
            "
            create table if not exists DbRow (
                Tbl text not null,
                Uuid text not null,
                constraint unique_DbRow primary key (Tbl, Uuid)
            ) STRICT;
            create table if not exists DbCell (
                Tbl text not null,
                Uuid text not null,
                Col text not null,
                Datum text not null,
                constraint unique_DbCell primary key (Tbl, Uuid, Col)
            ) STRICT;
            create table if not exists DbMeta (
                Id integer not null check (Id = 1),
                Version integer not null,
                constraint unique_DbMeta primary key (Id)
            ) STRICT;
            insert or ignore into DbMeta (Id, Version) values (1, 0);
            ",
        )?;
        Ok(Store { conn })
    }

    /// The current version counter; advances on every applied transaction.
    pub fn version(&self) -> Result<i64> {
        let v = self
            .conn
            .prepare("select Version from DbMeta where Id = 1")?
            .query_row([], |r| r.get(0))?;
        Ok(v)
    }

    /// Loads a snapshot of exactly the declared tables and columns.
    pub fn load(&self, interest: &Interest) -> Result<Snapshot> {
        let mut snapshot = Snapshot {
            version: self.version()?,
            ..Default::default()
        };
        for (table, columns) in interest {
            let mut rows: BTreeMap<Uuid, RowCells> = BTreeMap::new();
            let mut stmt = self.conn.prepare("select Uuid from DbRow where Tbl = ?")?;
            let uuids = stmt.query_map(params![table], |r| r.get::<_, String>(0))?;
            for uuid in uuids {
                let uuid = parse_stored_uuid(&uuid?)?;
                rows.insert(uuid, RowCells::default());
            }
            let mut stmt = self
                .conn
                .prepare("select Uuid, Col, Datum from DbCell where Tbl = ?")?;
            let cells = stmt.query_map(params![table], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            })?;
            for cell in cells {
                let (uuid, col, text) = cell?;
                if !columns.contains(&col) {
                    continue;
                }
                let uuid = parse_stored_uuid(&uuid)?;
                let datum = decode_datum(&text)?;
                rows.entry(uuid).or_default().insert(col, datum);
            }
            snapshot.tables.insert(table.clone(), rows);
        }
        Ok(snapshot)
    }

    /// Applies a transaction's staged changes atomically.
    ///
    /// The snapshot the transaction ran against is identified by
    /// `base_version`. When the store has moved past it, every verified
    /// cell is re-read; any mismatch against its snapshot value aborts with
    /// `TryAgain`. Inserted rows receive fresh committed UUIDs and every
    /// staged datum is rewritten through the provisional map before the
    /// changes land.
    pub fn commit(
        &mut self,
        schema: &Schema,
        base_version: i64,
        changes: &StagedChanges,
    ) -> Result<CommitOutcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let version: i64 = tx
            .prepare("select Version from DbMeta where Id = 1")?
            .query_row([], |r| r.get(0))?;
        if version != base_version {
            for (table, uuid, column, expected) in &changes.verifies {
                let stored = read_cell(&tx, table, uuid, column)?;
                if stored != *expected {
                    return Ok(CommitOutcome::TryAgain);
                }
            }
            // Writes against rows a concurrent transaction removed cannot
            // be applied faithfully; rerun the stream on a fresh snapshot.
            for (table, uuid, _, _) in &changes.writes {
                if !changes.inserts.iter().any(|(_, p, _)| p == uuid)
                    && !row_exists(&tx, table, uuid)?
                {
                    return Ok(CommitOutcome::TryAgain);
                }
            }
        }

        if changes.is_empty() {
            return Ok(CommitOutcome::Success {
                inserted: BiMap::new(),
            });
        }

        let mut inserted: BiMap<Uuid, Uuid> = BiMap::new();
        for (_, provisional, _) in &changes.inserts {
            inserted.insert(*provisional, Uuid::new_v4());
        }
        let remap = |u: Uuid| *inserted.get_by_left(&u).unwrap_or(&u);

        for (table, uuid) in &changes.deletes {
            tx.execute(
                "delete from DbRow where Tbl = ? and Uuid = ?",
                params![table, uuid.to_string()],
            )?;
            tx.execute(
                "delete from DbCell where Tbl = ? and Uuid = ?",
                params![table, uuid.to_string()],
            )?;
        }
        for (table, provisional, cells) in &changes.inserts {
            let committed = remap(*provisional);
            tx.execute(
                "insert into DbRow (Tbl, Uuid) values (?, ?)",
                params![table, committed.to_string()],
            )?;
            for (column, datum) in cells {
                let mut datum = datum.clone();
                datum.map_uuids(&remap);
                upsert_cell(&tx, table, &committed, column, &datum)?;
            }
        }
        for (table, uuid, column, datum) in &changes.writes {
            let uuid = remap(*uuid);
            if !row_exists(&tx, table, &uuid)? {
                continue;
            }
            let mut datum = datum.clone();
            datum.map_uuids(&remap);
            upsert_cell(&tx, table, &uuid, column, &datum)?;
        }

        collect_garbage(&tx, schema)?;

        tx.execute("update DbMeta set Version = Version + 1 where Id = 1", [])?;
        tx.commit()?;
        Ok(CommitOutcome::Success { inserted })
    }
}

fn parse_stored_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s)
        .map_err(|_| RowctlError::Internal(format!("malformed stored uuid \"{}\"", s)))
}

fn decode_datum(text: &str) -> Result<Datum> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| RowctlError::Internal(format!("malformed stored datum: {}", e)))?;
    Datum::from_json(&value)
}

fn row_exists(tx: &rusqlite::Transaction, table: &str, uuid: &Uuid) -> Result<bool> {
    let n: i64 = tx
        .prepare("select count(*) from DbRow where Tbl = ? and Uuid = ?")?
        .query_row(params![table, uuid.to_string()], |r| r.get(0))?;
    Ok(n > 0)
}

fn read_cell(
    tx: &rusqlite::Transaction,
    table: &str,
    uuid: &Uuid,
    column: &str,
) -> Result<Option<Datum>> {
    let mut stmt = tx.prepare("select Datum from DbCell where Tbl = ? and Uuid = ? and Col = ?")?;
    let mut rows = stmt.query(params![table, uuid.to_string(), column])?;
    match rows.next()? {
        Some(row) => {
            let text: String = row.get(0)?;
            Ok(Some(decode_datum(&text)?))
        }
        None => Ok(None),
    }
}

fn upsert_cell(
    tx: &rusqlite::Transaction,
    table: &str,
    uuid: &Uuid,
    column: &str,
    datum: &Datum,
) -> Result<()> {
    tx.execute(
        "insert into DbCell (Tbl, Uuid, Col, Datum) values (?, ?, ?, ?)
         on conflict (Tbl, Uuid, Col) do update set Datum = excluded.Datum",
        params![table, uuid.to_string(), column, datum.to_json().to_string()],
    )?;
    Ok(())
}

/// Deletes rows of non-root tables that no strong reference reaches,
/// repeating until nothing more goes away.
fn collect_garbage(tx: &rusqlite::Transaction, schema: &Schema) -> Result<()> {
    loop {
        let mut referenced: HashMap<String, HashSet<Uuid, OtherHasher>, OtherHasher> =
            HashMap::default();
        for table in schema.tables() {
            for column in &table.class.columns {
                let key_target = if column.ty.key.is_strong_ref() {
                    Some(&column.ty.key)
                } else {
                    None
                };
                let value_target = column.ty.value.as_ref().filter(|v| v.is_strong_ref());
                if key_target.is_none() && value_target.is_none() {
                    continue;
                }
                let mut stmt = tx.prepare("select Datum from DbCell where Tbl = ? and Col = ?")?;
                let cells = stmt.query_map(params![table.class.name, column.name], |r| {
                    r.get::<_, String>(0)
                })?;
                for text in cells {
                    let datum = decode_datum(&text?)?;
                    if let Some(base) = key_target {
                        let target = base.ref_table.as_ref().unwrap();
                        for atom in datum.keys() {
                            if let Atom::Uuid(u) = atom {
                                referenced.entry(target.clone()).or_default().insert(*u);
                            }
                        }
                    }
                    if let Some(base) = value_target {
                        let target = base.ref_table.as_ref().unwrap();
                        for i in 0..datum.n() {
                            if let Some(Atom::Uuid(u)) = datum.value(i) {
                                referenced.entry(target.clone()).or_default().insert(*u);
                            }
                        }
                    }
                }
            }
        }

        let mut removed = false;
        for table in schema.tables() {
            if table.class.is_root {
                continue;
            }
            let name = &table.class.name;
            let mut stmt = tx.prepare("select Uuid from DbRow where Tbl = ?")?;
            let uuids = stmt
                .query_map(params![name], |r| r.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for uuid in uuids {
                let parsed = parse_stored_uuid(&uuid)?;
                let kept = referenced
                    .get(name)
                    .map(|set| set.contains(&parsed))
                    .unwrap_or(false);
                if !kept {
                    tx.execute(
                        "delete from DbRow where Tbl = ? and Uuid = ?",
                        params![name, uuid],
                    )?;
                    tx.execute(
                        "delete from DbCell where Tbl = ? and Uuid = ?",
                        params![name, uuid],
                    )?;
                    removed = true;
                }
            }
        }
        if !removed {
            return Ok(());
        }
    }
}
