//! Crate-wide error type.

use super::{SiteId, TxnId, VarId};

/// Errors surfaced by the parser and the coordinator.
///
/// `StaleRead` is internal: the coordinator answers it by trying another
/// replica (or parking the access); it never escapes a command.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DbError {
    /// Malformed command line. Aborts the run.
    #[error("line {line_no}: no command matches: {line}")]
    Parse { line_no: usize, line: String },

    /// A read or write names a transaction that was never begun (or was
    /// already reaped). `end` on an unknown transaction is *not* an error.
    #[error("unknown transaction T{0}")]
    UnknownTransaction(TxnId),

    /// A write issued by a read-only transaction.
    #[error("T{0} is read-only and cannot write")]
    ReadOnlyWrite(TxnId),

    /// Site index outside 1..=10.
    #[error("illegal site {0}, must be between 1 and 10")]
    IllegalSite(SiteId),

    /// Variable index outside 1..=20.
    #[error("illegal variable x{0}, must be between 1 and 20")]
    IllegalVariable(VarId),

    /// A snapshot read landed at or before the cell's fail version.
    #[error("snapshot read of x{0} falls behind the fail version")]
    StaleRead(VarId),

    /// IO error while reading the command stream.
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DbError {
    fn from(error: std::io::Error) -> Self {
        DbError::Io(error.to_string())
    }
}
