//! Error types for the migration system
//!
//! Every failure is fatal to the current run. Apply and revert failures carry
//! the version of the unit that failed together with the store error verbatim.

use thiserror::Error;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A forward statement failed; the unit was rolled back
    #[error("migration {version} failed to apply: {cause}")]
    ApplyFailed { version: String, cause: StoreError },

    /// A reverse statement failed; the unit was left applied
    #[error("migration {version} failed to revert: {cause}")]
    RevertFailed { version: String, cause: StoreError },

    /// Apply on an applied unit, revert on a pending one, or an out-of-order request
    #[error("invalid migration state for {version}: {reason}")]
    InvalidState { version: String, reason: String },

    /// Ledger references an unknown version or records a gap
    #[error("ledger corruption: {0}")]
    LedgerCorruption(String),

    /// A requested version is not part of the known unit set
    #[error("unknown migration version '{0}'")]
    UnknownVersion(String),

    /// Version identifier does not carry a numeric prefix and a label
    #[error("invalid migration version '{value}': {reason}")]
    InvalidVersion { value: String, reason: String },

    /// Two units share a version
    #[error("duplicate migration version '{0}'")]
    DuplicateVersion(String),

    /// Revert refused because the unit's down procedure discards data
    #[error("migration {0} has a destructive rollback; rerun with data loss allowed")]
    DestructiveRevert(String),

    /// Store error outside of unit execution (ledger setup, reads)
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration file could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl MigrationError {
    /// Version of the unit the error is attributed to, if any
    pub fn version(&self) -> Option<&str> {
        match self {
            MigrationError::ApplyFailed { version, .. }
            | MigrationError::RevertFailed { version, .. }
            | MigrationError::InvalidState { version, .. }
            | MigrationError::DestructiveRevert(version) => Some(version),
            _ => None,
        }
    }
}

/// Errors raised by a [`crate::store::MigrationStore`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Statement at `index` (zero based, within the unit) was rejected
    #[error("statement #{index} failed: {message}")]
    Statement { index: usize, message: String },

    /// Reading or writing the ledger table failed
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Ledger changed underneath the runner
    #[error("ledger conflict: {0}")]
    Conflict(String),

    #[error("connection error: {0}")]
    Connection(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                StoreError::Connection(err.to_string())
            }
            other => StoreError::Ledger(other.to_string()),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {field}")]
    MissingField { field: String },

    #[error("invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_failed_reports_version_and_cause() {
        let err = MigrationError::ApplyFailed {
            version: "1763613529725-Add-Events".to_string(),
            cause: StoreError::Statement {
                index: 3,
                message: "relation \"user\" does not exist".to_string(),
            },
        };

        let text = err.to_string();
        assert!(text.contains("1763613529725-Add-Events"));
        assert!(text.contains("statement #3"));
        assert!(text.contains("relation \"user\" does not exist"));
        assert_eq!(err.version(), Some("1763613529725-Add-Events"));
    }

    #[test]
    fn test_ledger_corruption_has_no_version() {
        let err = MigrationError::LedgerCorruption("gap".to_string());
        assert_eq!(err.version(), None);
    }
}
