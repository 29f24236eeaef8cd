//! Symbol table for forward-referenced row identities.
//!
//! A symbol binds a user-chosen `@name` to a row UUID for the duration of
//! one transaction attempt. `create` assigns a provisional UUID through it,
//! `get --id` copies the located row's UUID into it, and any uuid-typed
//! value may mention `@name` to refer to the row, even before the command
//! that creates it has run.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use uuid::Uuid;

use crate::error::{Result, RowctlError};
use crate::schema::OtherHasher;

#[derive(Debug)]
pub struct Symbol {
    pub uuid: Uuid,
    /// Set when `create --id` or `get --id` claimed the name. A name may be
    /// claimed at most once per command stream.
    pub created: bool,
    /// Set when a strong reference to the row was inserted, or when the row
    /// is known to persist on its own. Suppresses the unreferenced-symbol
    /// warning.
    pub strong_ref: bool,
}

/// Lives for one transaction attempt; discarded and rebuilt on retry.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, Symbol, OtherHasher>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// Returns the symbol for `name`, inserting one with a fresh provisional
    /// UUID if it does not exist yet.
    pub fn insert(&mut self, name: &str) -> &mut Symbol {
        match self.symbols.entry(name.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(Symbol {
                uuid: Uuid::new_v4(),
                created: false,
                strong_ref: false,
            }),
        }
    }

    /// Resolves a `@name` mention inside a datum to its UUID, creating the
    /// symbol on first sight. `strong` records that the mention is a strong
    /// reference.
    pub fn reference(&mut self, name: &str, strong: bool) -> Uuid {
        let symbol = self.insert(name);
        if strong {
            symbol.strong_ref = true;
        }
        symbol.uuid
    }

    /// Claims `id` for a row-producing command. Fails unless `id` starts
    /// with `@`, and fails when the name was already claimed. When
    /// `report_new` is given it receives whether the symbol did *not* exist
    /// before this call.
    pub fn create_symbol(
        &mut self,
        id: &str,
        report_new: Option<&mut bool>,
    ) -> Result<&mut Symbol> {
        if !id.starts_with('@') {
            return Err(RowctlError::Resolution(format!(
                "row id \"{}\" does not begin with \"@\"",
                id
            )));
        }
        if let Some(newp) = report_new {
            *newp = self.get(id).is_none();
        }
        if self.get(id).map(|s| s.created).unwrap_or(false) {
            return Err(RowctlError::Resolution(format!(
                "row id \"{}\" may only be specified on one --id option",
                id
            )));
        }
        let symbol = self.insert(id);
        symbol.created = true;
        Ok(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Symbol)> {
        self.symbols.iter()
    }
}
