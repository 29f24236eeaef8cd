//! Typed datums: the value algebra for one column of one row.
//!
//! A [`Datum`] is a sorted, duplicate-free sequence of key [`Atom`]s,
//! optionally paired with value atoms (a map). A column's
//! [`ColumnType`](crate::schema::ColumnType) decides how a string parses
//! into a datum (scalar, set or map syntax), how a datum renders back to
//! text, and which cardinalities are legal.
//!
//! The twelve relational and set-relational operators used by `find` and
//! `wait-until` conditions live here as well ([`Relop`] and
//! [`evaluate_relop`]), operating on parsed datums only.

use std::cmp::Ordering;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, RowctlError};
use crate::schema::{AtomicType, BaseType, ColumnType};
use crate::symtab::SymbolTable;

// ------------- Atom -------------

/// One scalar value inside a datum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Atom {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    String(String),
    Uuid(Uuid),
}

impl Atom {
    pub fn default_for(atomic: AtomicType) -> Atom {
        match atomic {
            AtomicType::Integer => Atom::Integer(0),
            AtomicType::Real => Atom::Real(0.0),
            AtomicType::Boolean => Atom::Boolean(false),
            AtomicType::String => Atom::String(String::new()),
            AtomicType::Uuid => Atom::Uuid(Uuid::nil()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Atom::Integer(_) => 0,
            Atom::Real(_) => 1,
            Atom::Boolean(_) => 2,
            Atom::String(_) => 3,
            Atom::Uuid(_) => 4,
        }
    }

    /// Parses one raw token (quotes still present on quoted strings)
    /// against a base type. `@name` tokens in uuid position resolve through
    /// the symbol table, creating a forward reference on first sight.
    pub fn from_string(base: &BaseType, token: &str, symtab: &mut SymbolTable) -> Result<Atom> {
        match base.atomic {
            AtomicType::Integer => token.parse::<i64>().map(Atom::Integer).map_err(|_| {
                RowctlError::Datum(format!("\"{}\" is not a valid integer", token))
            }),
            AtomicType::Real => token.parse::<f64>().map(Atom::Real).map_err(|_| {
                RowctlError::Datum(format!("\"{}\" is not a valid real number", token))
            }),
            AtomicType::Boolean => match token {
                "true" => Ok(Atom::Boolean(true)),
                "false" => Ok(Atom::Boolean(false)),
                _ => Err(RowctlError::Datum(format!(
                    "\"{}\" is not a valid boolean (use \"true\" or \"false\")",
                    token
                ))),
            },
            AtomicType::Uuid => {
                if let Some(name) = token.strip_prefix('@') {
                    if name.is_empty() {
                        return Err(RowctlError::Datum(format!(
                            "\"{}\" is not a valid row id",
                            token
                        )));
                    }
                    Ok(Atom::Uuid(symtab.reference(token, base.is_strong_ref())))
                } else if RE_UUID.is_match(token) {
                    Uuid::parse_str(token).map(Atom::Uuid).map_err(|_| {
                        RowctlError::Datum(format!("\"{}\" is not a valid UUID", token))
                    })
                } else {
                    Err(RowctlError::Datum(format!(
                        "\"{}\" is not a valid UUID",
                        token
                    )))
                }
            }
            AtomicType::String => {
                if token.starts_with('"') {
                    serde_json::from_str::<String>(token).map(Atom::String).map_err(|_| {
                        RowctlError::Datum(format!("{}: quoted string is not valid JSON", token))
                    })
                } else {
                    Ok(Atom::String(token.to_string()))
                }
            }
        }
    }

    fn compare(&self, other: &Atom) -> Ordering {
        match (self, other) {
            (Atom::Integer(a), Atom::Integer(b)) => a.cmp(b),
            (Atom::Real(a), Atom::Real(b)) => a.total_cmp(b),
            (Atom::Boolean(a), Atom::Boolean(b)) => a.cmp(b),
            (Atom::String(a), Atom::String(b)) => a.cmp(b),
            (Atom::Uuid(a), Atom::Uuid(b)) => a.cmp(b),
            // Atoms of one datum share a type; mixed comparisons only occur
            // through schema misuse, and still need a total order.
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}
impl Eq for Atom {}
impl PartialOrd for Atom {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}
impl Ord for Atom {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

/// Plain words render bare; anything that could be confused with another
/// literal, or that contains lexer delimiters, renders as a JSON string.
fn string_needs_quotes(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        None => true,
        Some(c) if !c.is_ascii_alphabetic() && c != '_' => true,
        Some(_) => {
            s == "true"
                || s == "false"
                || !s
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Atom::Integer(i) => write!(f, "{}", i),
            Atom::Real(r) => write!(f, "{}", r),
            Atom::Boolean(b) => write!(f, "{}", b),
            Atom::Uuid(u) => write!(f, "{}", u),
            Atom::String(s) => {
                if string_needs_quotes(s) {
                    write!(f, "{}", serde_json::to_string(s).map_err(|_| fmt::Error)?)
                } else {
                    write!(f, "{}", s)
                }
            }
        }
    }
}

// ------------- Datum -------------

/// A column's value: sorted unique keys, with paired values for maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datum {
    keys: Vec<Atom>,
    values: Option<Vec<Atom>>,
}

impl Datum {
    pub fn empty_set() -> Self {
        Self {
            keys: Vec::new(),
            values: None,
        }
    }

    pub fn empty_map() -> Self {
        Self {
            keys: Vec::new(),
            values: Some(Vec::new()),
        }
    }

    pub fn empty_for(ty: &ColumnType) -> Self {
        if ty.is_map() {
            Self::empty_map()
        } else {
            Self::empty_set()
        }
    }

    pub fn scalar(atom: Atom) -> Self {
        Self {
            keys: vec![atom],
            values: None,
        }
    }

    pub fn pair(key: Atom, value: Atom) -> Self {
        Self {
            keys: vec![key],
            values: Some(vec![value]),
        }
    }

    /// The default content of a column that was never written: one default
    /// atom when the type requires a value, nothing otherwise.
    pub fn default_for(ty: &ColumnType) -> Self {
        if ty.n_min >= 1 {
            let key = Atom::default_for(ty.key.atomic);
            match &ty.value {
                Some(v) => Self::pair(key, Atom::default_for(v.atomic)),
                None => Self::scalar(key),
            }
        } else {
            Self::empty_for(ty)
        }
    }

    pub fn n(&self) -> usize {
        self.keys.len()
    }

    pub fn is_map(&self) -> bool {
        self.values.is_some()
    }

    pub fn keys(&self) -> &[Atom] {
        &self.keys
    }

    pub fn key(&self, i: usize) -> &Atom {
        &self.keys[i]
    }

    pub fn value(&self, i: usize) -> Option<&Atom> {
        self.values.as_ref().map(|v| &v[i])
    }

    pub fn find_key(&self, key: &Atom) -> Option<usize> {
        self.keys.binary_search_by(|k| k.cmp(key)).ok()
    }

    fn insert_sorted(&mut self, key: Atom, value: Option<Atom>) {
        let at = self.keys.partition_point(|k| k < &key);
        self.keys.insert(at, key);
        if let Some(v) = value {
            self.values.get_or_insert_with(Vec::new).insert(at, v);
        }
    }

    fn remove_at(&mut self, i: usize) {
        self.keys.remove(i);
        if let Some(values) = &mut self.values {
            values.remove(i);
        }
    }

    /// Adds every entry of `other` whose key is absent from `self`; present
    /// keys keep their current value, so duplicates are absorbed.
    pub fn union_with(&mut self, other: &Datum) {
        for i in 0..other.n() {
            if self.find_key(other.key(i)).is_none() {
                self.insert_sorted(other.key(i).clone(), other.value(i).cloned());
            }
        }
    }

    /// Removes entries of `self` named by `other`. When both sides carry
    /// values, an entry is removed only on an exact key/value match;
    /// otherwise removal is by key alone.
    pub fn subtract(&mut self, other: &Datum) {
        let by_pair = self.is_map() && other.is_map();
        for i in 0..other.n() {
            if let Some(at) = self.find_key(other.key(i)) {
                if !by_pair || self.value(at) == other.value(i) {
                    self.remove_at(at);
                }
            }
        }
    }

    /// Three-way lexicographic comparison: size first, then keys, then
    /// values. Both datums are sorted, so this doubles as an
    /// order-independent set comparison.
    pub fn compare_3way(&self, other: &Datum) -> Ordering {
        match self.n().cmp(&other.n()) {
            Ordering::Equal => {}
            ord => return ord,
        }
        for i in 0..self.n() {
            match self.key(i).cmp(other.key(i)) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        if self.is_map() && other.is_map() {
            for i in 0..self.n() {
                match self.value(i).cmp(&other.value(i)) {
                    Ordering::Equal => {}
                    ord => return ord,
                }
            }
        }
        Ordering::Equal
    }

    /// Whether every entry of `self` also appears in `other` (key and value
    /// for maps, key alone for sets).
    pub fn includes_all(&self, other: &Datum) -> bool {
        let by_pair = self.is_map() && other.is_map();
        (0..self.n()).all(|i| match other.find_key(self.key(i)) {
            Some(at) => !by_pair || other.value(at) == self.value(i),
            None => false,
        })
    }

    pub fn is_default(&self, ty: &ColumnType) -> bool {
        *self == Datum::default_for(ty)
    }

    /// Rewrites every uuid atom through `f`, then restores key order. The
    /// transaction layer uses this to map provisional row ids to their
    /// committed ones.
    pub fn map_uuids(&mut self, f: &dyn Fn(Uuid) -> Uuid) {
        let remap = |atoms: &mut Vec<Atom>| {
            for atom in atoms {
                if let Atom::Uuid(u) = atom {
                    *u = f(*u);
                }
            }
        };
        let mut keys = std::mem::take(&mut self.keys);
        let values = self.values.take();
        remap(&mut keys);
        let mut order: Vec<usize> = (0..keys.len()).collect();
        order.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
        self.keys = order.iter().map(|&i| keys[i].clone()).collect();
        self.values = values.map(|mut v| {
            remap(&mut v);
            order.iter().map(|&i| v[i].clone()).collect()
        });
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| RowctlError::Internal(format!("malformed stored datum: {}", e)))
    }

    // ------------- Parsing -------------

    /// Parses `s` against a column type, resolving `@name` mentions through
    /// the symbol table and enforcing the type's cardinality bounds.
    pub fn from_string(ty: &ColumnType, s: &str, symtab: &mut SymbolTable) -> Result<Datum> {
        let mut cur = Cursor::new(s);
        let mut datum = if ty.is_map() {
            parse_map(ty, &mut cur, symtab)?
        } else {
            parse_set(ty, &mut cur, symtab)?
        };
        cur.skip_separators();
        if !cur.at_end() {
            return Err(RowctlError::Datum(format!(
                "\"{}\": trailing garbage after value",
                s
            )));
        }
        sort_and_check(&mut datum, s)?;
        let what = if ty.is_map() { "pairs" } else { "values" };
        if datum.n() < ty.n_min {
            return Err(RowctlError::Datum(format!(
                "\"{}\": {} {} specified but the minimum number is {}",
                s,
                datum.n(),
                what,
                ty.n_min
            )));
        }
        if datum.n() > ty.n_max {
            return Err(RowctlError::Datum(format!(
                "\"{}\": {} {} specified but the maximum number is {}",
                s,
                datum.n(),
                what,
                ty.n_max
            )));
        }
        Ok(datum)
    }

    // ------------- Rendering -------------

    /// Renders the datum the way command output prints it: a lone atom for
    /// a present scalar, brackets for sets, braces for maps.
    pub fn to_string(&self, ty: &ColumnType) -> String {
        let mut out = String::new();
        let bracketed = ty.n_max > 1 || self.n() == 0;
        if bracketed {
            out.push(if ty.is_map() { '{' } else { '[' });
        }
        for i in 0..self.n() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&self.key(i).to_string());
            if let Some(value) = self.value(i) {
                out.push('=');
                out.push_str(&value.to_string());
            }
        }
        if bracketed {
            out.push(if ty.is_map() { '}' } else { ']' });
        }
        out
    }
}

fn sort_and_check(datum: &mut Datum, s: &str) -> Result<()> {
    let mut order: Vec<usize> = (0..datum.n()).collect();
    order.sort_by(|&a, &b| datum.key(a).cmp(datum.key(b)));
    let keys = order.iter().map(|&i| datum.keys[i].clone()).collect::<Vec<_>>();
    let values = datum
        .values
        .as_ref()
        .map(|v| order.iter().map(|&i| v[i].clone()).collect::<Vec<_>>());
    for w in keys.windows(2) {
        if w[0] == w[1] {
            return Err(RowctlError::Datum(if values.is_some() {
                format!("\"{}\": map contains duplicate key", s)
            } else {
                format!("\"{}\": set contains duplicate value", s)
            }));
        }
    }
    datum.keys = keys;
    datum.values = values;
    Ok(())
}

fn parse_set(ty: &ColumnType, cur: &mut Cursor, symtab: &mut SymbolTable) -> Result<Datum> {
    let mut datum = Datum::empty_set();
    let bracketed = cur.eat('[');
    loop {
        cur.skip_separators();
        if bracketed && cur.eat(']') {
            break;
        }
        if cur.at_end() {
            if bracketed {
                return Err(RowctlError::Datum(format!(
                    "\"{}\": missing \"]\" at end of value",
                    cur.original()
                )));
            }
            break;
        }
        let token = cur.parse_token()?;
        if token.is_empty() {
            return Err(RowctlError::Datum(format!(
                "\"{}\": syntax error in value",
                cur.original()
            )));
        }
        let atom = Atom::from_string(&ty.key, &token, symtab)?;
        datum.keys.push(atom);
    }
    Ok(datum)
}

fn parse_map(ty: &ColumnType, cur: &mut Cursor, symtab: &mut SymbolTable) -> Result<Datum> {
    let value_base = ty
        .value
        .as_ref()
        .ok_or_else(|| RowctlError::Internal("map parse on non-map type".into()))?;
    let mut datum = Datum::empty_map();
    let braced = cur.eat('{');
    loop {
        cur.skip_separators();
        if braced && cur.eat('}') {
            break;
        }
        if cur.at_end() {
            if braced {
                return Err(RowctlError::Datum(format!(
                    "\"{}\": missing \"}}\" at end of value",
                    cur.original()
                )));
            }
            break;
        }
        let key_token = cur.parse_token()?;
        if key_token.is_empty() {
            return Err(RowctlError::Datum(format!(
                "\"{}\": syntax error in value",
                cur.original()
            )));
        }
        cur.skip_spaces();
        if !cur.eat('=') {
            return Err(RowctlError::Datum(format!(
                "\"{}\": syntax error in value, expected \"=\" after map key",
                cur.original()
            )));
        }
        cur.skip_spaces();
        let value_token = cur.parse_token()?;
        if value_token.is_empty() {
            return Err(RowctlError::Datum(format!(
                "\"{}\": syntax error in value, missing value for map key",
                cur.original()
            )));
        }
        let key = Atom::from_string(&ty.key, &key_token, symtab)?;
        let value = Atom::from_string(value_base, &value_token, symtab)?;
        datum.keys.push(key);
        datum.values.as_mut().unwrap().push(value);
    }
    Ok(datum)
}

// ------------- Token lexer -------------

/// Characters that terminate a bare token.
pub fn is_delimiter(c: char) -> bool {
    matches!(
        c,
        ':' | '=' | ',' | ' ' | '[' | ']' | '{' | '}' | '!' | '<' | '>'
    )
}

/// A cursor over one argument string, shared by the datum parser and the
/// column/key/value argument grammar.
pub struct Cursor<'a> {
    original: &'a str,
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    pub fn new(s: &'a str) -> Self {
        Self {
            original: s,
            rest: s,
        }
    }

    pub fn original(&self) -> &'a str {
        self.original
    }

    pub fn rest(&self) -> &'a str {
        self.rest
    }

    pub fn at_end(&self) -> bool {
        self.rest.is_empty()
    }

    pub fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    pub fn eat(&mut self, c: char) -> bool {
        if self.rest.starts_with(c) {
            self.rest = &self.rest[c.len_utf8()..];
            true
        } else {
            false
        }
    }

    pub fn skip_spaces(&mut self) {
        self.rest = self.rest.trim_start_matches(' ');
    }

    fn skip_separators(&mut self) {
        self.rest = self.rest.trim_start_matches([' ', ',']);
    }

    /// Reads one token: a JSON-quoted string (returned with its quotes, so
    /// atom parsing can tell it apart from a bare word) or a run of
    /// non-delimiter characters, which may be empty.
    pub fn parse_token(&mut self) -> Result<String> {
        if self.rest.starts_with('"') {
            let mut escaped = false;
            for (i, c) in self.rest.char_indices().skip(1) {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    let token = &self.rest[..i + 1];
                    self.rest = &self.rest[i + 1..];
                    return Ok(token.to_string());
                }
            }
            Err(RowctlError::Datum(format!(
                "\"{}\": unterminated quoted string",
                self.original
            )))
        } else {
            let end = self
                .rest
                .find(is_delimiter)
                .unwrap_or(self.rest.len());
            let token = &self.rest[..end];
            self.rest = &self.rest[end..];
            Ok(token.to_string())
        }
    }
}

lazy_static! {
    static ref RE_UUID: Regex = Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$"
    )
    .unwrap();
}

/// Whether a record token looks like a literal UUID.
pub fn is_uuid_string(s: &str) -> bool {
    RE_UUID.is_match(s)
}

// ------------- Relational operators -------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relop {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    SetEq,
    SetNe,
    SetLt,
    SetGt,
    SetLe,
    SetGe,
}

/// Operator spellings in declaration order; condition parsing picks the
/// longest spelling that matches.
pub const RELOPS: [(&str, Relop); 12] = [
    ("=", Relop::Eq),
    ("!=", Relop::Ne),
    ("<", Relop::Lt),
    (">", Relop::Gt),
    ("<=", Relop::Le),
    (">=", Relop::Ge),
    ("{=}", Relop::SetEq),
    ("{!=}", Relop::SetNe),
    ("{<}", Relop::SetLt),
    ("{>}", Relop::SetGt),
    ("{<=}", Relop::SetLe),
    ("{>=}", Relop::SetGe),
];

impl Relop {
    pub fn is_set_operator(self) -> bool {
        matches!(
            self,
            Relop::SetEq | Relop::SetNe | Relop::SetLt | Relop::SetGt | Relop::SetLe | Relop::SetGe
        )
    }
}

/// Evaluates `a OP b` where `a` is the row's datum and `b` the user's.
pub fn evaluate_relop(a: &Datum, b: &Datum, op: Relop) -> bool {
    match op {
        Relop::Eq | Relop::SetEq => a.compare_3way(b) == Ordering::Equal,
        Relop::Ne | Relop::SetNe => a.compare_3way(b) != Ordering::Equal,
        Relop::Lt => a.compare_3way(b) == Ordering::Less,
        Relop::Gt => a.compare_3way(b) == Ordering::Greater,
        Relop::Le => a.compare_3way(b) != Ordering::Greater,
        Relop::Ge => a.compare_3way(b) != Ordering::Less,
        Relop::SetLt => b.n() > a.n() && a.includes_all(b),
        Relop::SetGt => a.n() > b.n() && b.includes_all(a),
        Relop::SetLe => a.includes_all(b),
        Relop::SetGe => b.includes_all(a),
    }
}
