//! Error types and result handling for hexscan.

use std::path::PathBuf;
use thiserror::Error;

use crate::scanner::job::JobState;

/// Result type alias using our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for hexscan operations.
#[derive(Error, Debug)]
pub enum Error {
    // ===== I/O Errors =====
    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file: {path}")]
    FileDelete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to access directory: {path}")]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to overwrite existing file: {0}")]
    TargetExists(PathBuf),

    // ===== Configuration Errors =====
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    #[error("Failed to save configuration: {0}")]
    ConfigSave(String),

    #[error("Invalid configuration value: {field} - {message}")]
    ConfigInvalid { field: String, message: String },

    // ===== Database Errors =====
    #[error("Database error: {0}")]
    DatabaseSql(#[from] rusqlite::Error),

    #[error("Failed to load signatures: {0}")]
    SignatureLoad(String),

    // ===== Detection Errors =====
    #[error("{detector} index unavailable: {reason}")]
    IndexUnavailable { detector: String, reason: String },

    #[error("Rule '{rule}' failed to compile: {reason}")]
    RuleCompilation { rule: String, reason: String },

    #[error("Rule '{rule}' failed to evaluate: {reason}")]
    RuleEvaluation { rule: String, reason: String },

    // ===== Scanning Errors =====
    #[error("Failed to scan file: {path} - {reason}")]
    ScanError { path: PathBuf, reason: String },

    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    // ===== Quarantine Errors =====
    #[error("Quarantine item not found: {0}")]
    QuarantineItemNotFound(u64),

    #[error("File already quarantined: {path} (entry {existing_id})")]
    QuarantineConflict { path: PathBuf, existing_id: u64 },

    #[error("Quarantine entry {id} is {state}, expected active")]
    QuarantineState { id: u64, state: String },

    #[error("Integrity check failed for quarantine entry {id}: {reason}")]
    Integrity { id: String, reason: String },

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    // ===== Concurrency Errors =====
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },

    // ===== Serialization Errors =====
    #[error("JSON serialization error")]
    JsonSerialize(#[from] serde_json::Error),

    // ===== Generic Errors =====
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a file read error.
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Create a file write error.
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a file delete error.
    pub fn file_delete(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileDelete {
            path: path.into(),
            source,
        }
    }

    /// Create a scan error.
    pub fn scan_error(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ScanError {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an index unavailable error.
    pub fn index_unavailable(detector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IndexUnavailable {
            detector: detector.into(),
            reason: reason.into(),
        }
    }

    /// Create an integrity error for a quarantine payload.
    pub fn integrity(id: impl ToString, reason: impl Into<String>) -> Self {
        Self::Integrity {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a lock poisoned error.
    pub fn lock_poisoned(context: impl Into<String>) -> Self {
        Self::LockPoisoned {
            context: context.into(),
        }
    }

    /// Check if this error is recoverable (scan can continue).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::FileRead { .. }
                | Error::ScanError { .. }
                | Error::RuleEvaluation { .. }
                | Error::IndexUnavailable { .. }
        )
    }

    /// Get a user-friendly suggestion for how to resolve this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::FileRead { source, .. }
                if source.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                Some("Try running with elevated privileges (sudo/administrator)")
            }
            Error::ConfigLoad(_) | Error::ConfigInvalid { .. } => {
                Some("Check your configuration file for syntax errors or missing fields")
            }
            Error::IndexUnavailable { .. } | Error::SignatureLoad(_) => {
                Some("Check the signature and rule paths in the detection configuration")
            }
            Error::TargetExists(_) => Some("Move the existing file away or restore to another path"),
            Error::Integrity { .. } => {
                Some("The quarantine payload is damaged; the entry has been left untouched")
            }
            Error::LockPoisoned { .. } => Some("Internal error: restart the application"),
            Error::QuarantineItemNotFound(_) | Error::QuarantineState { .. } => {
                Some("The quarantine item may have been deleted or restored")
            }
            _ => None,
        }
    }

    /// Get the error category for logging.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::FileRead { .. }
            | Error::FileWrite { .. }
            | Error::FileDelete { .. }
            | Error::DirectoryAccess { .. }
            | Error::TargetExists(_)
            | Error::Io(_) => ErrorCategory::Io,

            Error::ConfigLoad(_) | Error::ConfigSave(_) | Error::ConfigInvalid { .. } => {
                ErrorCategory::Configuration
            }

            Error::DatabaseSql(_) | Error::SignatureLoad(_) => {
                ErrorCategory::Database
            }

            Error::IndexUnavailable { .. }
            | Error::RuleCompilation { .. }
            | Error::RuleEvaluation { .. } => ErrorCategory::Detection,

            Error::ScanError { .. } | Error::InvalidTransition { .. } => ErrorCategory::Scanning,

            Error::QuarantineItemNotFound(_)
            | Error::QuarantineConflict { .. }
            | Error::QuarantineState { .. }
            | Error::Integrity { .. }
            | Error::Encryption(_)
            | Error::Decryption(_) => ErrorCategory::Quarantine,

            Error::LockPoisoned { .. } => ErrorCategory::Concurrency,

            Error::JsonSerialize(_) => ErrorCategory::Serialization,

            Error::Internal(_) | Error::Other(_) => ErrorCategory::Other,
        }
    }
}

/// Error category for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Io,
    Configuration,
    Database,
    Detection,
    Scanning,
    Quarantine,
    Concurrency,
    Serialization,
    Other,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io => write!(f, "I/O"),
            Self::Configuration => write!(f, "Configuration"),
            Self::Database => write!(f, "Database"),
            Self::Detection => write!(f, "Detection"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Quarantine => write!(f, "Quarantine"),
            Self::Concurrency => write!(f, "Concurrency"),
            Self::Serialization => write!(f, "Serialization"),
            Self::Other => write!(f, "Other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::TargetExists(PathBuf::from("/test/path"));
        assert_eq!(
            err.to_string(),
            "Refusing to overwrite existing file: /test/path"
        );

        let err = Error::integrity(7, "digest mismatch");
        assert_eq!(
            err.to_string(),
            "Integrity check failed for quarantine entry 7: digest mismatch"
        );
    }

    #[test]
    fn test_recoverable_errors() {
        let err = Error::scan_error("/test", "test reason");
        assert!(err.is_recoverable());

        let err = Error::index_unavailable("signature", "missing file");
        assert!(err.is_recoverable());

        let err = Error::integrity(3, "tag mismatch");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            Error::integrity(1, "x").category(),
            ErrorCategory::Quarantine
        );
        assert_eq!(
            Error::InvalidTransition {
                from: JobState::Completed,
                to: JobState::Scanning
            }
            .category(),
            ErrorCategory::Scanning
        );
        assert_eq!(ErrorCategory::Detection.to_string(), "Detection");
    }
}
