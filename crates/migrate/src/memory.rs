//! In-memory migration store
//!
//! Keeps the ledger and a log of executed statements without a database.
//! Statements are never interpreted; failures are injected with
//! [`MemoryStore::fail_on`].

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Mutex, MutexGuard};

use crate::definitions::{LedgerChange, MigrationDirection, MigrationRecord};
use crate::error::{StoreError, StoreResult};
use crate::schema_builder::Statement;
use crate::store::{MigrationStore, UnitRef};

/// A statement the store has committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    pub version: String,
    pub direction: MigrationDirection,
    pub sql: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    ledger_ready: bool,
    ledger: Vec<MigrationRecord>,
    executed: Vec<ExecutedStatement>,
    fail_markers: Vec<String>,
}

/// Store that keeps everything in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing ledger
    pub fn with_ledger(records: Vec<MigrationRecord>) -> Self {
        let store = Self::new();
        {
            let mut state = store.lock();
            state.ledger_ready = true;
            state.ledger = records;
        }
        store
    }

    /// Fail any statement whose SQL contains `marker`
    pub fn fail_on(&self, marker: &str) {
        self.lock().fail_markers.push(marker.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().fail_markers.clear();
    }

    /// Committed statements, in execution order
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.lock().executed.clone()
    }

    /// Current ledger rows
    pub fn ledger(&self) -> Vec<MigrationRecord> {
        self.lock().ledger.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means another test thread panicked mid-update
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn ensure_ledger(&self) -> StoreResult<()> {
        self.lock().ledger_ready = true;
        Ok(())
    }

    async fn applied_migrations(&self) -> StoreResult<Vec<MigrationRecord>> {
        let state = self.lock();
        if !state.ledger_ready {
            return Err(StoreError::Ledger("ledger table does not exist".to_string()));
        }
        Ok(state.ledger.clone())
    }

    async fn execute_unit(
        &self,
        unit: UnitRef<'_>,
        statements: &[Statement],
        change: LedgerChange,
    ) -> StoreResult<()> {
        let mut state = self.lock();

        let present = state.ledger.iter().any(|r| r.version == unit.version);
        match change {
            LedgerChange::Record { .. } if present => {
                return Err(StoreError::Conflict(format!("{} is already recorded", unit.version)));
            }
            LedgerChange::Remove if !present => {
                return Err(StoreError::Conflict(format!("{} is not recorded", unit.version)));
            }
            _ => {}
        }

        // Stage first so a failure leaves nothing behind
        let mut staged = Vec::with_capacity(statements.len());
        for (index, statement) in statements.iter().enumerate() {
            if let Some(marker) = state
                .fail_markers
                .iter()
                .find(|marker| statement.sql.contains(marker.as_str()))
            {
                return Err(StoreError::Statement {
                    index,
                    message: format!("injected failure on '{}'", marker),
                });
            }
            staged.push(ExecutedStatement {
                version: unit.version.to_string(),
                direction: unit.direction,
                sql: statement.sql.clone(),
            });
        }

        state.executed.extend(staged);
        match change {
            LedgerChange::Record { batch } => state.ledger.push(MigrationRecord {
                version: unit.version.to_string(),
                name: unit.name.to_string(),
                batch,
                applied_at: Utc::now(),
            }),
            LedgerChange::Remove => state.ledger.retain(|r| r.version != unit.version),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_ref(version: &str) -> UnitRef<'_> {
        UnitRef {
            version,
            name: "test",
            direction: MigrationDirection::Up,
        }
    }

    #[tokio::test]
    async fn test_failed_unit_leaves_nothing_behind() {
        let store = MemoryStore::new();
        store.ensure_ledger().await.unwrap();
        store.fail_on("boom");

        let statements = vec![Statement::raw("CREATE TABLE a ();"), Statement::raw("boom;")];
        let err = store
            .execute_unit(unit_ref("1-a"), &statements, LedgerChange::Record { batch: 1 })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StoreError::Statement {
                index: 1,
                message: "injected failure on 'boom'".to_string()
            }
        );
        assert!(store.executed().is_empty());
        assert!(store.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_ledger_change_is_rejected() {
        let store = MemoryStore::new();
        store.ensure_ledger().await.unwrap();

        let change = LedgerChange::Record { batch: 1 };
        store.execute_unit(unit_ref("1-a"), &[], change).await.unwrap();
        let err = store.execute_unit(unit_ref("1-a"), &[], change).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        store.execute_unit(unit_ref("1-a"), &[], LedgerChange::Remove).await.unwrap();
        let err = store
            .execute_unit(unit_ref("1-a"), &[], LedgerChange::Remove)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_reading_ledger_before_setup_fails() {
        let store = MemoryStore::new();
        assert!(store.applied_migrations().await.is_err());
    }
}
