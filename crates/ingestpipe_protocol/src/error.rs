//! Error taxonomy (spec.md section 7).
//!
//! Kinds, not type names: every phase-local failure is classified into one
//! of these variants before it is attached to a `LoadResult`. Only
//! `ConfigurationError` is meant to escape to the CLI caller before
//! scheduling; everything else terminates the single file it belongs to.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error, Clone)]
pub enum IngestError {
    /// Missing/invalid configuration fields, or an unresolved file pattern.
    /// Fatal before scheduling — never attached to a single file's result.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// A declared file is absent on disk. Marks that file `Failed`; other
    /// files in the run proceed.
    #[error("input not found: {0}")]
    InputNotFound(String),

    /// Column-count mismatch, excessive date parse errors, or a duplicate-key
    /// set over threshold. Terminal for the file it belongs to.
    #[error("quality check failed: {reason}")]
    QualityCheckFailed { reason: String },

    /// Network-classified error. Retriable up to 3 times with exponential
    /// backoff before becoming terminal.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Server-returned error. `code` is propagated verbatim from the
    /// warehouse; not retried unless explicitly classified transient.
    #[error("warehouse error [{code}]: {message}")]
    WarehouseError { code: String, message: String },

    /// The async supervisor's wall-clock ceiling was hit. The server-side job
    /// is cancelled as a side effect; this is always terminal.
    #[error("async job exceeded wall-clock ceiling")]
    AsyncTimeout,

    /// Cooperative cancellation observed at a phase boundary or poll tick.
    #[error("operation cancelled")]
    Cancelled,

    /// Post-load validation found issues. Non-fatal: the load itself is
    /// `Succeeded-With-Warnings`, not `Failed`.
    #[error("validation failed: {}", .reasons.join("; "))]
    ValidationFailed { reasons: Vec<String> },

    /// The user declined confirmation, or the deletion's impact was zero.
    /// Not an error condition — surfaced so callers can report it cleanly.
    #[error("deletion aborted: {0}")]
    DeletionAborted(String),
}

impl IngestError {
    /// Whether this error's phase should be retried (transport-classified
    /// errors only; programming/warehouse errors are never retried here).
    pub fn is_retriable(&self) -> bool {
        matches!(self, IngestError::TransportError(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::ConfigurationError(_) => ErrorKind::ConfigurationError,
            IngestError::InputNotFound(_) => ErrorKind::InputNotFound,
            IngestError::QualityCheckFailed { .. } => ErrorKind::QualityCheckFailed,
            IngestError::TransportError(_) => ErrorKind::TransportError,
            IngestError::WarehouseError { .. } => ErrorKind::WarehouseError,
            IngestError::AsyncTimeout => ErrorKind::AsyncTimeout,
            IngestError::Cancelled => ErrorKind::Cancelled,
            IngestError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            IngestError::DeletionAborted(_) => ErrorKind::DeletionAborted,
        }
    }
}

/// Tag-only view of [`IngestError`], used on `LoadResult` so a failed file's
/// summary doesn't need to carry the full error (and its retry context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    ConfigurationError,
    InputNotFound,
    QualityCheckFailed,
    TransportError,
    WarehouseError,
    AsyncTimeout,
    Cancelled,
    ValidationFailed,
    DeletionAborted,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::ConfigurationError => "ConfigurationError",
            ErrorKind::InputNotFound => "InputNotFound",
            ErrorKind::QualityCheckFailed => "QualityCheckFailed",
            ErrorKind::TransportError => "TransportError",
            ErrorKind::WarehouseError => "WarehouseError",
            ErrorKind::AsyncTimeout => "AsyncTimeout",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::ValidationFailed => "ValidationFailed",
            ErrorKind::DeletionAborted => "DeletionAborted",
        };
        write!(f, "{}", label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_is_retriable() {
        assert!(IngestError::TransportError("timeout".into()).is_retriable());
        assert!(!IngestError::AsyncTimeout.is_retriable());
        assert!(!IngestError::WarehouseError {
            code: "42601".into(),
            message: "syntax error".into()
        }
        .is_retriable());
    }
}
