use thiserror::Error;

/// Everything that can go wrong while parsing or running a command stream.
///
/// The interpreter never recovers from one of these inside a command: an
/// error aborts the whole transaction before any staged write is flushed.
/// The variants classify the failure the way the surrounding layers care
/// about it (usage text, schema mismatch, record resolution, datum typing,
/// semantic refusal, transaction machinery). Messages are written to stand
/// on their own, so `Display` carries no variant prefix.
#[derive(Error, Debug)]
pub enum RowctlError {
    /// Bad command line: unknown verb, bad option, wrong argument count.
    #[error("{0}")]
    Usage(String),
    /// Unknown or ambiguous table/column name.
    #[error("{0}")]
    Schema(String),
    /// A record token did not resolve to a unique row, or a symbol was
    /// redefined or used before it was defined.
    #[error("{0}")]
    Resolution(String),
    /// A value failed to parse against a column type, or a mutation would
    /// violate the column's cardinality bounds.
    #[error("{0}")]
    Datum(String),
    /// A structurally valid request the schema forbids, such as writing a
    /// read-only column.
    #[error("{0}")]
    Semantic(String),
    /// The transaction layer failed to commit.
    #[error("transaction error: {0}")]
    Transaction(String),
    /// An internal invariant did not hold.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RowctlError>;

impl From<rusqlite::Error> for RowctlError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Transaction(e.to_string())
    }
}
