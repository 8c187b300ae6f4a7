//! Store interface consumed by the migration runner

use async_trait::async_trait;

use crate::definitions::{LedgerChange, MigrationDirection, MigrationRecord};
use crate::error::StoreResult;
use crate::schema_builder::Statement;

/// The unit being executed, as seen by a store
#[derive(Debug, Clone, Copy)]
pub struct UnitRef<'a> {
    pub version: &'a str,
    pub name: &'a str,
    pub direction: MigrationDirection,
}

/// A relational store able to execute migration statements and keep the ledger
///
/// Implementations must execute `execute_unit` atomically: either every
/// statement and the ledger change take effect, or none of them do.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Create the ledger table if it does not exist yet
    async fn ensure_ledger(&self) -> StoreResult<()>;

    /// Ledger rows in application order (oldest first)
    async fn applied_migrations(&self) -> StoreResult<Vec<MigrationRecord>>;

    /// Execute a unit's statements and ledger change as one unit of work
    ///
    /// Returns [`crate::StoreError::Conflict`] when the ledger no longer matches
    /// the expected state (row already present for `Record`, missing for `Remove`).
    async fn execute_unit(
        &self,
        unit: UnitRef<'_>,
        statements: &[Statement],
        change: LedgerChange,
    ) -> StoreResult<()>;
}
