//! Migration Definitions - Core types shared across the migration system
//!
//! Defines versions, ledger records, run results and the per-unit state used
//! by the runner and the stores.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::MigrationError;

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{8}_\d{6}|\d+)[-_](.+)$").expect("version pattern is valid")
    })
}

/// Monotonically sortable migration identifier
///
/// Either `<unix-millis>-<Label>` or `<YYYYMMDD>_<HHMMSS>_<label>`. Ordering is
/// by the numeric stamp first and the raw text second.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    raw: String,
    stamp: u64,
    label_start: usize,
}

impl Version {
    /// Parse a version identifier
    pub fn parse(value: &str) -> Result<Self, MigrationError> {
        let invalid = |reason: &str| MigrationError::InvalidVersion {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let captures = version_pattern()
            .captures(value)
            .ok_or_else(|| invalid("expected a numeric prefix followed by a label"))?;
        let prefix = captures.get(1).ok_or_else(|| invalid("missing numeric prefix"))?;
        let label = captures.get(2).ok_or_else(|| invalid("missing label"))?;

        let digits: String = prefix.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
        let stamp = digits
            .parse::<u64>()
            .map_err(|_| invalid("numeric prefix does not fit in 64 bits"))?;

        Ok(Self {
            raw: value.to_string(),
            stamp,
            label_start: label.start(),
        })
    }

    /// Full identifier as stored in the ledger
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Numeric stamp used for ordering
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Human-readable part after the stamp
    pub fn label(&self) -> &str {
        &self.raw[self.label_start..]
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stamp
            .cmp(&other.stamp)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Version::parse(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.raw
    }
}

/// Ledger row for an applied migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration version (ledger primary key)
    pub version: String,
    /// Human-readable name at the time it was applied
    pub name: String,
    /// Batch number (one per forward run)
    pub batch: i32,
    /// When the migration was applied
    pub applied_at: DateTime<Utc>,
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationDirection {
    /// Apply the migration (run UP statements)
    Up,
    /// Rollback the migration (run DOWN statements)
    Down,
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDirection::Up => f.write_str("up"),
            MigrationDirection::Down => f.write_str("down"),
        }
    }
}

/// Migration status in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MigrationState {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied {
        /// When it was applied
        applied_at: DateTime<Utc>,
        /// Batch number
        batch: i32,
    },
}

impl MigrationState {
    pub fn is_applied(&self) -> bool {
        matches!(self, MigrationState::Applied { .. })
    }
}

/// Ledger mutation written in the same transaction as a unit's statements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerChange {
    /// Insert a row for the unit under the given batch
    Record { batch: i32 },
    /// Delete the unit's row
    Remove,
}

/// How far a revert should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertTarget {
    /// Revert the N most recently applied units
    Count(usize),
    /// Revert every unit newer than the given version; that version stays applied
    To(Version),
    /// Revert every unit of the most recent batch
    LastBatch,
    /// Revert everything
    All,
}

/// One line of `status` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub version: String,
    pub name: String,
    #[serde(flatten)]
    pub state: MigrationState,
    /// Whether rolling this unit back discards data
    pub destructive_down: bool,
}

/// Result of running migrations
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationRunResult {
    /// Number of migrations that were applied
    pub applied_count: usize,
    /// Versions of migrations that were applied, in order
    pub applied_migrations: Vec<String>,
    /// Number of migrations already applied before the run
    pub skipped_count: usize,
    /// Batch number used for this run, if anything was applied
    pub batch: Option<i32>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Result of rolling back migrations
#[derive(Debug, Clone, Default, Serialize)]
pub struct RollbackResult {
    /// Number of migrations that were rolled back
    pub rolled_back_count: usize,
    /// Versions of migrations that were rolled back, most recent first
    pub rolled_back_migrations: Vec<String>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_millis_version() {
        let version = Version::parse("1763613529725-Add-Events").unwrap();
        assert_eq!(version.stamp(), 1763613529725);
        assert_eq!(version.label(), "Add-Events");
        assert_eq!(version.as_str(), "1763613529725-Add-Events");
    }

    #[test]
    fn test_parse_date_time_version() {
        let version = Version::parse("20240101_120000_create_users").unwrap();
        assert_eq!(version.stamp(), 20240101120000);
        assert_eq!(version.label(), "create_users");
    }

    #[test]
    fn test_rejects_unprefixed_versions() {
        assert!(Version::parse("Add-Events").is_err());
        assert!(Version::parse("1763613529725").is_err());
        assert!(Version::parse("").is_err());
    }

    #[test]
    fn test_orders_by_stamp_then_text() {
        let a = Version::parse("9-b").unwrap();
        let b = Version::parse("10-a").unwrap();
        let c = Version::parse("10-b").unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_status_entry_serializes_state_inline() {
        let entry = StatusEntry {
            version: "1-a".to_string(),
            name: "a".to_string(),
            state: MigrationState::Pending,
            destructive_down: false,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["state"], "pending");
        assert_eq!(json["version"], "1-a");
    }
}
