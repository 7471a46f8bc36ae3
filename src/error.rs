//! Error types for qail-pq.

use thiserror::Error;

use crate::protocol::EncodeError;

/// Error type for client operations.
///
/// Server-side statement errors are not here: they come back as
/// [`ExecutionOutcome::Failed`](crate::ExecutionOutcome::Failed).
#[derive(Debug, Error)]
pub enum PgError {
    /// Handshake, authentication or network failure while connecting.
    #[error("Connection error: {reason}")]
    Connect { reason: String },

    /// The stream failed during an execution. The connection is unusable
    /// afterwards.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Result set accessed outside its bounds.
    #[error(
        "Index out of bounds: row {row}, column {column} (result has {rows} rows, {columns} columns)"
    )]
    Index {
        row: usize,
        column: usize,
        rows: usize,
        columns: usize,
    },

    /// Invalid connection string or profile.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Statement text cannot be framed (e.g. contains a NUL byte).
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),
}

impl PgError {
    /// Create a connect error.
    pub fn connect(reason: impl Into<String>) -> Self {
        Self::Connect {
            reason: reason.into(),
        }
    }

    /// True for failures that leave the connection unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Transport(_))
    }
}

impl From<std::io::Error> for PgError {
    fn from(e: std::io::Error) -> Self {
        PgError::Transport(e.to_string())
    }
}

/// Result type for client operations.
pub type PgResult<T> = Result<T, PgError>;
