//! The caching, transactional client layer over the row store.
//!
//! One `Idl` mediates every read and write of a command stream. Its life
//! cycle mirrors the two-phase execution pipeline:
//!
//! 1. During the pre-pass, commands declare the tables and columns they
//!    will touch ([`Idl::add_table`], [`Idl::add_column`]).
//! 2. [`Idl::run`] loads a snapshot of exactly the declared fragments.
//! 3. Inside a transaction ([`Idl::txn_begin`]), reads observe the snapshot
//!    through the pending write overlay, so a command sees the effects of
//!    the commands before it. Writes, inserts and deletes are staged.
//! 4. [`Idl::txn_commit`] hands the staged changes to the store. A
//!    [`TxnStatus::TryAgain`] outcome means a concurrent writer invalidated
//!    the snapshot; the driver discards everything and reruns the stream.
//!
//! Inserted rows carry provisional UUIDs until commit. After a successful
//! commit [`Idl::txn_get_insert_uuid`] maps a provisional UUID to the one
//! the store assigned.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use bimap::BiMap;
use uuid::Uuid;

use crate::datum::Datum;
use crate::error::{Result, RowctlError};
use crate::persist::{CommitOutcome, Interest, RowCells, Snapshot, StagedChanges, Store};
use crate::schema::{Column, OtherHasher, Schema, TableClass};

/// A handle on one row of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub table: String,
    pub uuid: Uuid,
}

/// Outcome of a commit, as the driver sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Success,
    TryAgain,
}

#[derive(Debug, Default)]
struct TxnState {
    /// Insertion order of `(table, provisional uuid)`, for deterministic
    /// commit application.
    inserts: Vec<(String, Uuid)>,
    insert_cells: HashMap<(String, Uuid), RowCells, OtherHasher>,
    writes: HashMap<(String, Uuid), RowCells, OtherHasher>,
    deletes: HashSet<(String, Uuid), OtherHasher>,
    verifies: HashSet<(String, Uuid, String), OtherHasher>,
}

pub struct Idl {
    store: Store,
    interest: Interest,
    snapshot: Snapshot,
    txn: Option<TxnState>,
    last_inserted: BiMap<Uuid, Uuid>,
    /// Upper bound on how long [`Idl::wait_for_change`] blocks. `None`
    /// waits forever.
    pub wait_timeout: Option<Duration>,
}

impl Idl {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            interest: Interest::default(),
            snapshot: Snapshot::default(),
            txn: None,
            last_inserted: BiMap::new(),
            wait_timeout: None,
        }
    }

    /// Convenience for `Store::open` + `Idl::new`.
    pub fn open(target: &str) -> Result<Self> {
        Ok(Self::new(Store::open(target)?))
    }

    // ------------- Interest declaration (pre-pass) -------------

    pub fn add_table(&mut self, table: &TableClass) {
        self.interest.entry(table.name.clone()).or_default();
    }

    pub fn add_column(&mut self, table: &str, column: &str) {
        self.interest
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string());
    }

    fn declared(&self, table: &str, column: &str) -> bool {
        self.interest
            .get(table)
            .map(|cols| cols.contains(column))
            .unwrap_or(false)
    }

    // ------------- Snapshot -------------

    /// Refreshes the cache with the declared part of the store. Must not be
    /// called while a transaction is open.
    pub fn run(&mut self) -> Result<()> {
        if self.txn.is_some() {
            return Err(RowctlError::Internal(
                "cache refresh inside an open transaction".into(),
            ));
        }
        self.snapshot = self.store.load(&self.interest)?;
        Ok(())
    }

    /// Sequence number of the snapshot the current attempt runs against.
    pub fn seqno(&self) -> i64 {
        self.snapshot.version
    }

    /// Blocks until the store moves past `seqno`.
    pub fn wait_for_change(&self, seqno: i64) -> Result<()> {
        let started = Instant::now();
        loop {
            if self.store.version()? != seqno {
                return Ok(());
            }
            if let Some(limit) = self.wait_timeout {
                if started.elapsed() > limit {
                    return Err(RowctlError::Transaction(
                        "timed out waiting for a database change".into(),
                    ));
                }
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    // ------------- Row access -------------

    fn key(&self, row: &Row) -> (String, Uuid) {
        (row.table.clone(), row.uuid)
    }

    /// Stable iteration over the rows of one table: snapshot rows in UUID
    /// order, minus staged deletes, plus rows inserted by this transaction
    /// in creation order.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        let cached = self.snapshot.tables.get(table).ok_or_else(|| {
            RowctlError::Internal(format!("table {} was not declared before use", table))
        })?;
        let mut out = Vec::new();
        for uuid in cached.keys() {
            let deleted = self
                .txn
                .as_ref()
                .map(|t| t.deletes.contains(&(table.to_string(), *uuid)))
                .unwrap_or(false);
            if !deleted {
                out.push(Row {
                    table: table.to_string(),
                    uuid: *uuid,
                });
            }
        }
        if let Some(txn) = &self.txn {
            for (tbl, uuid) in &txn.inserts {
                if tbl == table {
                    out.push(Row {
                        table: table.to_string(),
                        uuid: *uuid,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Looks one row up by UUID, honoring the transaction overlay.
    pub fn row_for_uuid(&self, table: &str, uuid: &Uuid) -> Option<Row> {
        if let Some(txn) = &self.txn {
            if txn.deletes.contains(&(table.to_string(), *uuid)) {
                return None;
            }
            if txn.insert_cells.contains_key(&(table.to_string(), *uuid)) {
                return Some(Row {
                    table: table.to_string(),
                    uuid: *uuid,
                });
            }
        }
        self.snapshot
            .tables
            .get(table)
            .and_then(|rows| rows.get(uuid))
            .map(|_| Row {
                table: table.to_string(),
                uuid: *uuid,
            })
    }

    /// Reads the current in-transaction content of one cell.
    ///
    /// Rows inserted by the open transaction are readable without a prior
    /// interest declaration; everything else must have been declared during
    /// the pre-pass.
    pub fn read(&self, row: &Row, column: &Column) -> Result<Datum> {
        let key = self.key(row);
        if let Some(txn) = &self.txn {
            if let Some(datum) = txn.writes.get(&key).and_then(|cells| cells.get(&column.name)) {
                return Ok(datum.clone());
            }
            if let Some(cells) = txn.insert_cells.get(&key) {
                return Ok(cells
                    .get(&column.name)
                    .cloned()
                    .unwrap_or_else(|| Datum::default_for(&column.ty)));
            }
        }
        if !self.declared(&row.table, &column.name) {
            return Err(RowctlError::Internal(format!(
                "column {} in table {} was not declared before use",
                column.name, row.table
            )));
        }
        Ok(self
            .snapshot
            .cell(&row.table, &row.uuid, &column.name)
            .cloned()
            .unwrap_or_else(|| Datum::default_for(&column.ty)))
    }

    /// Whether a column of this row accepts writes. Rows inserted by the
    /// open transaction are always mutable.
    pub fn is_mutable(&self, row: &Row, column: &Column) -> bool {
        if column.mutable {
            return true;
        }
        self.txn
            .as_ref()
            .map(|t| t.insert_cells.contains_key(&self.key(row)))
            .unwrap_or(false)
    }

    // ------------- Transactions -------------

    pub fn txn_begin(&mut self) {
        self.txn = Some(TxnState::default());
    }

    pub fn txn_active(&self) -> bool {
        self.txn.is_some()
    }

    fn txn_mut(&mut self) -> Result<&mut TxnState> {
        self.txn
            .as_mut()
            .ok_or_else(|| RowctlError::Internal("no open transaction".into()))
    }

    /// Marks a cell as participating in optimistic concurrency: commit
    /// fails with `TryAgain` when a concurrent writer changed it.
    pub fn txn_verify(&mut self, row: &Row, column: &Column) -> Result<()> {
        let key = (row.table.clone(), row.uuid, column.name.clone());
        self.txn_mut()?.verifies.insert(key);
        Ok(())
    }

    /// Stages one write.
    pub fn txn_write(&mut self, row: &Row, column: &Column, datum: Datum) -> Result<()> {
        let key = (row.table.clone(), row.uuid);
        self.txn_mut()?
            .writes
            .entry(key)
            .or_default()
            .insert(column.name.clone(), datum);
        Ok(())
    }

    /// Creates a provisional row. Every column starts at its default datum.
    pub fn txn_insert(&mut self, table: &TableClass, uuid: Option<Uuid>) -> Result<Row> {
        let uuid = uuid.unwrap_or_else(Uuid::new_v4);
        let mut cells = RowCells::default();
        for column in &table.columns {
            cells.insert(column.name.clone(), Datum::default_for(&column.ty));
        }
        let txn = self.txn_mut()?;
        txn.inserts.push((table.name.clone(), uuid));
        txn.insert_cells.insert((table.name.clone(), uuid), cells);
        Ok(Row {
            table: table.name.clone(),
            uuid,
        })
    }

    /// Stages a delete. Deleting a row inserted by this transaction undoes
    /// the insert.
    pub fn txn_delete(&mut self, row: &Row) -> Result<()> {
        let key = (row.table.clone(), row.uuid);
        let txn = self.txn_mut()?;
        if txn.insert_cells.remove(&key).is_some() {
            txn.inserts.retain(|k| *k != key);
            txn.writes.remove(&key);
        } else {
            txn.writes.remove(&key);
            txn.deletes.insert(key);
        }
        Ok(())
    }

    pub fn txn_abort(&mut self) {
        self.txn = None;
    }

    /// Commits the staged changes. On success the provisional→committed
    /// UUID map becomes available through [`Idl::txn_get_insert_uuid`].
    pub fn txn_commit(&mut self, schema: &Schema) -> Result<TxnStatus> {
        let txn = self
            .txn
            .take()
            .ok_or_else(|| RowctlError::Internal("no open transaction".into()))?;

        let mut changes = StagedChanges::default();
        for (table, uuid) in &txn.inserts {
            let cells = txn
                .insert_cells
                .get(&(table.clone(), *uuid))
                .cloned()
                .unwrap_or_default();
            changes.inserts.push((table.clone(), *uuid, cells));
        }
        for ((table, uuid), cells) in &txn.writes {
            if txn.insert_cells.contains_key(&(table.clone(), *uuid)) {
                // Writes to inserted rows ride along with the insert.
                continue;
            }
            for (column, datum) in cells {
                changes
                    .writes
                    .push((table.clone(), *uuid, column.clone(), datum.clone()));
            }
        }
        for (table, uuid) in &txn.deletes {
            changes.deletes.push((table.clone(), *uuid));
        }
        for (table, uuid, column) in &txn.verifies {
            let expected = self.snapshot.cell(table, uuid, column).cloned();
            changes
                .verifies
                .push((table.clone(), *uuid, column.clone(), expected));
        }
        // Fold writes on inserted rows into their initial cells.
        for (table, uuid, cells) in &mut changes.inserts {
            if let Some(written) = txn.writes.get(&(table.clone(), *uuid)) {
                for (column, datum) in written {
                    cells.insert(column.clone(), datum.clone());
                }
            }
        }

        match self.store.commit(schema, self.snapshot.version, &changes)? {
            CommitOutcome::Success { inserted } => {
                self.last_inserted = inserted;
                Ok(TxnStatus::Success)
            }
            CommitOutcome::TryAgain => Ok(TxnStatus::TryAgain),
        }
    }

    /// Maps the provisional UUID of a row inserted by the last committed
    /// transaction to the UUID the store assigned.
    pub fn txn_get_insert_uuid(&self, provisional: &Uuid) -> Option<Uuid> {
        self.last_inserted.get_by_left(provisional).copied()
    }
}
