//! Schema descriptors and name matching.
//!
//! The caller describes its database as a set of [`TableClass`] values, each
//! wrapped in a [`CtlTable`] that adds the record-identification paths
//! ([`RowId`]) users may name rows by. The descriptors are built once, handed
//! to the interpreter, and never mutated afterwards.
//!
//! User-supplied table and column names are matched fuzzily: matching is
//! case-insensitive, treats `-` and `_` as the same character, and accepts
//! unambiguous prefixes. See [`score_partial_match`].

use std::collections::HashMap;
use std::hash::BuildHasherDefault;

use seahash::SeaHasher;

use crate::error::{Result, RowctlError};

/// Hasher used for the interpreter's maps.
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

// ------------- Atomic types -------------

/// The scalar type of one atom inside a datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicType {
    Integer,
    Real,
    Boolean,
    String,
    Uuid,
}

impl AtomicType {
    pub fn name(&self) -> &'static str {
        match self {
            AtomicType::Integer => "integer",
            AtomicType::Real => "real",
            AtomicType::Boolean => "boolean",
            AtomicType::String => "string",
            AtomicType::Uuid => "uuid",
        }
    }
}

/// Whether a reference roots its target row.
///
/// Rows of non-root tables survive only while at least one strong reference
/// points at them; weak references are rendered by `show` as back-links
/// rather than recursive children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefMode {
    Strong,
    Weak,
}

/// One side (key or value) of a column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseType {
    pub atomic: AtomicType,
    /// Name of the referenced table, for uuid atoms that are references.
    pub ref_table: Option<String>,
    pub ref_mode: RefMode,
}

impl BaseType {
    pub fn new(atomic: AtomicType) -> Self {
        Self {
            atomic,
            ref_table: None,
            ref_mode: RefMode::Strong,
        }
    }

    pub fn reference(table: &str, mode: RefMode) -> Self {
        Self {
            atomic: AtomicType::Uuid,
            ref_table: Some(table.to_string()),
            ref_mode: mode,
        }
    }

    pub fn is_strong_ref(&self) -> bool {
        self.ref_table.is_some() && self.ref_mode == RefMode::Strong
    }
}

/// The structural type of a column: a scalar, a set, or a map.
///
/// A column is a scalar when `n_max == 1` and `value` is absent, a set when
/// `value` is absent and `n_max > 1`, and a map when `value` is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    pub key: BaseType,
    pub value: Option<BaseType>,
    pub n_min: usize,
    pub n_max: usize,
}

impl ColumnType {
    pub fn scalar(atomic: AtomicType) -> Self {
        Self {
            key: BaseType::new(atomic),
            value: None,
            n_min: 1,
            n_max: 1,
        }
    }

    pub fn optional_scalar(atomic: AtomicType) -> Self {
        Self {
            key: BaseType::new(atomic),
            value: None,
            n_min: 0,
            n_max: 1,
        }
    }

    pub fn set(key: BaseType, n_min: usize, n_max: usize) -> Self {
        Self {
            key,
            value: None,
            n_min,
            n_max,
        }
    }

    pub fn map(key: BaseType, value: BaseType) -> Self {
        Self {
            key,
            value: Some(value),
            n_min: 0,
            n_max: usize::MAX,
        }
    }

    pub fn is_map(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_scalar(&self) -> bool {
        self.value.is_none() && self.n_max == 1 && self.n_min == 1
    }

    /// The same type with its upper cardinality bound removed. Conditions
    /// compare a row datum against a user literal of any size.
    pub fn widened(&self) -> Self {
        let mut t = self.clone();
        t.n_max = usize::MAX;
        t
    }

    /// The type of the values stored under the keys of a map column,
    /// viewed as a set. Used for key-qualified reads and comparisons.
    pub fn value_set_type(&self) -> Self {
        Self {
            key: self.value.clone().unwrap_or_else(|| self.key.clone()),
            value: None,
            n_min: 0,
            n_max: usize::MAX,
        }
    }
}

// ------------- Columns and tables -------------

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    /// Read-only columns reject every mutation.
    pub mutable: bool,
}

impl Column {
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            mutable: true,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.mutable = false;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TableClass {
    pub name: String,
    pub columns: Vec<Column>,
    /// Rows of root tables persist even when nothing references them.
    pub is_root: bool,
}

impl TableClass {
    pub fn new(name: &str, is_root: bool) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            is_root,
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Exact column lookup.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Fuzzy column lookup over this table's columns.
    pub fn find_column(&self, column_name: &str) -> Result<&Column> {
        let mut best_match = None;
        let mut best_score = 0;
        for column in &self.columns {
            let score = score_partial_match(&column.name, column_name);
            if score > best_score {
                best_match = Some(column);
                best_score = score;
            } else if score == best_score {
                best_match = None;
            }
        }
        match best_match {
            Some(column) => Ok(column),
            None if best_score > 0 => Err(RowctlError::Schema(format!(
                "{} contains more than one column whose name matches \"{}\"",
                self.name, column_name
            ))),
            None => Err(RowctlError::Schema(format!(
                "{} does not contain a column whose name matches \"{}\"",
                self.name, column_name
            ))),
        }
    }
}

/// One way a user may name a row of a table without knowing its UUID.
///
/// The identifying string lives in `name_column` of `table` (the referrer,
/// which may be the target table itself). When `uuid_column` is set, the
/// referrer points at the target row through it; otherwise the referrer is
/// the target. When `name_column` is absent, the literal record token `"."`
/// names the single row of `table`.
#[derive(Debug, Clone)]
pub struct RowId {
    pub table: String,
    pub name_column: Option<String>,
    pub uuid_column: Option<String>,
}

/// A table plus its record-identification paths, tried in declaration order.
#[derive(Debug, Clone)]
pub struct CtlTable {
    pub class: TableClass,
    pub row_ids: Vec<RowId>,
}

impl CtlTable {
    pub fn new(class: TableClass) -> Self {
        Self {
            class,
            row_ids: Vec::new(),
        }
    }

    pub fn with_row_id(mut self, id: RowId) -> Self {
        self.row_ids.push(id);
        self
    }
}

// ------------- Show descriptors -------------

/// Weak back-reference declaration for the `show` renderer: rows of `table`
/// whose `wref_column` first key equals the current row's UUID are printed
/// as children.
#[derive(Debug, Clone)]
pub struct ShowWeakRef {
    pub table: String,
    pub name_column: String,
    pub wref_column: String,
}

/// One entry of the `show` output format. The first entry declared is the
/// root the renderer starts from.
#[derive(Debug, Clone)]
pub struct ShowTable {
    pub table: String,
    pub name_column: Option<String>,
    pub columns: Vec<String>,
    pub wref: Option<ShowWeakRef>,
}

// ------------- Schema -------------

/// The full set of tables the interpreter knows about.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: Vec<CtlTable>,
    by_name: HashMap<String, usize, OtherHasher>,
}

impl Schema {
    pub fn new(tables: Vec<CtlTable>) -> Self {
        let mut by_name = HashMap::default();
        for (i, t) in tables.iter().enumerate() {
            by_name.insert(t.class.name.clone(), i);
        }
        Self { tables, by_name }
    }

    pub fn tables(&self) -> &[CtlTable] {
        &self.tables
    }

    /// Exact table lookup.
    pub fn table(&self, name: &str) -> Option<&CtlTable> {
        self.by_name.get(name).map(|&i| &self.tables[i])
    }

    /// Fuzzy table lookup over the whole schema.
    pub fn find_table(&self, table_name: &str) -> Result<&CtlTable> {
        let mut best_match = None;
        let mut best_score = 0;
        for table in &self.tables {
            let score = score_partial_match(&table.class.name, table_name);
            if score > best_score {
                best_match = Some(table);
                best_score = score;
            } else if score == best_score {
                best_match = None;
            }
        }
        match best_match {
            Some(table) => Ok(table),
            None if best_score > 0 => Err(RowctlError::Schema(format!(
                "multiple table names match \"{}\"",
                table_name
            ))),
            None => Err(RowctlError::Schema(format!(
                "unknown table \"{}\"",
                table_name
            ))),
        }
    }
}

// ------------- Name matching -------------

fn to_lower_and_underscores(c: char) -> char {
    if c == '-' {
        '_'
    } else {
        c.to_ascii_lowercase()
    }
}

/// Scores how well the user token `s` matches the schema name `name`.
///
/// `u32::MAX` when the two are equal after normalization, `u32::MAX - 1`
/// when `s` is a proper prefix of `name`, and zero when it is no prefix at
/// all. Callers pick the strictly maximum scorer across a name set; any tie
/// on a non-zero score is ambiguous and must be reported, never resolved
/// silently.
pub fn score_partial_match(name: &str, s: &str) -> u32 {
    if name == s {
        return u32::MAX;
    }
    if s.is_empty() {
        return 0;
    }
    let mut name_chars = name.chars();
    for q in s.chars() {
        match name_chars.next() {
            Some(n) if to_lower_and_underscores(n) == to_lower_and_underscores(q) => {}
            _ => return 0,
        }
    }
    if name_chars.next().is_none() {
        u32::MAX
    } else {
        u32::MAX - 1
    }
}
