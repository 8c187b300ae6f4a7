//! Migration Runner - Executes migrations against a store
//!
//! Applies and reverts units in version order, one store transaction per unit,
//! and keeps the ledger a prefix of the ordered unit list.

use std::collections::HashMap;
use std::time::Instant;

use crate::definitions::{
    LedgerChange, MigrationDirection, MigrationRecord, MigrationRunResult, MigrationState,
    RevertTarget, RollbackResult, StatusEntry, Version,
};
use crate::error::{MigrateResult, MigrationError, StoreError};
use crate::migration::{MigrationSet, MigrationUnit};
use crate::store::{MigrationStore, UnitRef};

/// Runner behaviour switches
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Permit reverting units whose down procedure drops tables or columns
    pub allow_destructive_revert: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            allow_destructive_revert: true,
        }
    }
}

/// Validated view of the ledger against the known units
#[derive(Debug)]
struct Ledger {
    /// Records ordered like the units they belong to
    records: Vec<MigrationRecord>,
}

impl Ledger {
    /// Number of applied units; they are always the first `head` units
    fn head(&self) -> usize {
        self.records.len()
    }

    fn next_batch(&self) -> i32 {
        self.records.iter().map(|r| r.batch).max().unwrap_or(0) + 1
    }

    fn last_batch_len(&self) -> usize {
        match self.records.last() {
            Some(last) => self
                .records
                .iter()
                .rev()
                .take_while(|r| r.batch == last.batch)
                .count(),
            None => 0,
        }
    }
}

/// Check that the ledger only names known units and has no gaps
fn validate_ledger(set: &MigrationSet, records: Vec<MigrationRecord>) -> MigrateResult<Ledger> {
    let mut positioned = Vec::with_capacity(records.len());
    for record in records {
        let position = set.position(&record.version).ok_or_else(|| {
            MigrationError::LedgerCorruption(format!(
                "ledger records '{}' which is not a known migration",
                record.version
            ))
        })?;
        positioned.push((position, record));
    }
    positioned.sort_by_key(|(position, _)| *position);

    for (expected, (position, record)) in positioned.iter().enumerate() {
        if *position != expected {
            return Err(MigrationError::LedgerCorruption(format!(
                "'{}' is applied but earlier migration '{}' is not",
                record.version,
                set.units()[expected].version
            )));
        }
    }

    Ok(Ledger {
        records: positioned.into_iter().map(|(_, record)| record).collect(),
    })
}

/// Lazy, ordered status of every known unit
///
/// Built from one ledger read; call [`MigrationRunner::status`] again for a
/// fresh view.
pub struct MigrationStatusIter<'a> {
    units: std::slice::Iter<'a, MigrationUnit>,
    applied: HashMap<String, MigrationRecord>,
    unknown: Vec<MigrationRecord>,
}

impl MigrationStatusIter<'_> {
    /// Ledger rows that match no known unit, in ledger order
    pub fn unknown_records(&self) -> &[MigrationRecord] {
        &self.unknown
    }
}

impl Iterator for MigrationStatusIter<'_> {
    type Item = StatusEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let unit = self.units.next()?;
        let state = match self.applied.get(unit.version.as_str()) {
            Some(record) => MigrationState::Applied {
                applied_at: record.applied_at,
                batch: record.batch,
            },
            None => MigrationState::Pending,
        };

        Some(StatusEntry {
            version: unit.version.to_string(),
            name: unit.name.clone(),
            state,
            destructive_down: unit.destructive_down(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.units.size_hint()
    }
}

impl ExactSizeIterator for MigrationStatusIter<'_> {}

/// Migration runner that executes migrations against a store
pub struct MigrationRunner<S> {
    store: S,
    migrations: MigrationSet,
    options: RunnerOptions,
}

impl<S: MigrationStore> MigrationRunner<S> {
    /// Create a new migration runner
    pub fn new(store: S, migrations: MigrationSet) -> Self {
        Self {
            store,
            migrations,
            options: RunnerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    /// Get the underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Known units in version order
    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    async fn ledger(&self) -> MigrateResult<Ledger> {
        self.store.ensure_ledger().await?;
        let records = self.store.applied_migrations().await?;
        validate_ledger(&self.migrations, records)
    }

    /// Fail with `LedgerCorruption` if the ledger does not match the known units
    pub async fn verify_ledger(&self) -> MigrateResult<Vec<MigrationRecord>> {
        Ok(self.ledger().await?.records)
    }

    /// Units that `apply_forward(target)` would apply, in order
    pub async fn pending(&self, target: Option<&Version>) -> MigrateResult<&[MigrationUnit]> {
        let ledger = self.ledger().await?;
        let end = self.forward_end(target)?;
        let head = ledger.head();
        Ok(if end > head {
            &self.migrations.units()[head..end]
        } else {
            &[]
        })
    }

    fn forward_end(&self, target: Option<&Version>) -> MigrateResult<usize> {
        match target {
            Some(version) => Ok(self
                .migrations
                .position(version.as_str())
                .ok_or_else(|| MigrationError::UnknownVersion(version.to_string()))?
                + 1),
            None => Ok(self.migrations.len()),
        }
    }

    /// Apply every pending unit up to and including `target` (all if `None`)
    ///
    /// All units applied by one call share a batch number. The run stops at
    /// the first failing unit; earlier units of the run stay applied.
    pub async fn apply_forward(&self, target: Option<&Version>) -> MigrateResult<MigrationRunResult> {
        let start_time = Instant::now();
        let ledger = self.ledger().await?;
        let head = ledger.head();
        let end = self.forward_end(target)?;

        if end <= head {
            tracing::info!(applied = head, "no pending migrations");
            return Ok(MigrationRunResult {
                skipped_count: head,
                execution_time_ms: start_time.elapsed().as_millis(),
                ..MigrationRunResult::default()
            });
        }

        let batch = ledger.next_batch();
        let mut applied_migrations = Vec::with_capacity(end - head);
        for unit in &self.migrations.units()[head..end] {
            self.apply_unit(unit, batch).await?;
            applied_migrations.push(unit.version.to_string());
        }

        Ok(MigrationRunResult {
            applied_count: applied_migrations.len(),
            applied_migrations,
            skipped_count: head,
            batch: Some(batch),
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Revert the most recently applied units, newest first
    pub async fn revert(&self, target: RevertTarget) -> MigrateResult<RollbackResult> {
        let start_time = Instant::now();
        let ledger = self.ledger().await?;
        let head = ledger.head();

        let count = match &target {
            RevertTarget::Count(n) => (*n).min(head),
            RevertTarget::To(version) => {
                let position = self
                    .migrations
                    .position(version.as_str())
                    .ok_or_else(|| MigrationError::UnknownVersion(version.to_string()))?;
                if position >= head {
                    return Err(MigrationError::InvalidState {
                        version: version.to_string(),
                        reason: "revert target is not applied".to_string(),
                    });
                }
                head - (position + 1)
            }
            RevertTarget::LastBatch => ledger.last_batch_len(),
            RevertTarget::All => head,
        };

        let to_revert: Vec<&MigrationUnit> = self.migrations.units()[head - count..head]
            .iter()
            .rev()
            .collect();
        self.check_destructive(&to_revert)?;

        let mut rolled_back_migrations = Vec::with_capacity(count);
        for unit in to_revert {
            self.revert_unit(unit).await?;
            rolled_back_migrations.push(unit.version.to_string());
        }

        if rolled_back_migrations.is_empty() {
            tracing::info!("nothing to revert");
        }

        Ok(RollbackResult {
            rolled_back_count: rolled_back_migrations.len(),
            rolled_back_migrations,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Apply exactly one unit, which must be the next pending one
    pub async fn apply_one(&self, version: &str) -> MigrateResult<()> {
        let unit = self.migrations.require(version)?;
        let position = self.migrations.position(version).unwrap_or_default();
        let ledger = self.ledger().await?;
        let head = ledger.head();

        if position < head {
            return Err(MigrationError::InvalidState {
                version: version.to_string(),
                reason: "migration is already applied".to_string(),
            });
        }
        if position > head {
            return Err(MigrationError::InvalidState {
                version: version.to_string(),
                reason: format!(
                    "out of order: '{}' must be applied first",
                    self.migrations.units()[head].version
                ),
            });
        }

        self.apply_unit(unit, ledger.next_batch()).await
    }

    /// Revert exactly one unit, which must be the most recently applied one
    pub async fn revert_one(&self, version: &str) -> MigrateResult<()> {
        let unit = self.migrations.require(version)?;
        let position = self.migrations.position(version).unwrap_or_default();
        let head = self.ledger().await?.head();

        if position >= head {
            return Err(MigrationError::InvalidState {
                version: version.to_string(),
                reason: "migration is not applied".to_string(),
            });
        }
        if position + 1 != head {
            return Err(MigrationError::InvalidState {
                version: version.to_string(),
                reason: format!(
                    "only the most recent migration '{}' can be reverted",
                    self.migrations.units()[head - 1].version
                ),
            });
        }

        self.check_destructive(&[unit])?;
        self.revert_unit(unit).await
    }

    /// Status of every known unit, read fresh from the ledger
    ///
    /// Unlike the other operations this does not fail on a corrupt ledger.
    /// Rows naming no known unit are logged and kept apart, see
    /// [`MigrationStatusIter::unknown_records`].
    pub async fn status(&self) -> MigrateResult<MigrationStatusIter<'_>> {
        self.store.ensure_ledger().await?;
        let (known, unknown): (Vec<_>, Vec<_>) = self
            .store
            .applied_migrations()
            .await?
            .into_iter()
            .partition(|record| self.migrations.position(&record.version).is_some());

        for record in &unknown {
            tracing::warn!(version = %record.version, "ledger row is not a known migration");
        }

        Ok(MigrationStatusIter {
            units: self.migrations.units().iter(),
            applied: known
                .into_iter()
                .map(|record| (record.version.clone(), record))
                .collect(),
            unknown,
        })
    }

    fn check_destructive(&self, units: &[&MigrationUnit]) -> MigrateResult<()> {
        if self.options.allow_destructive_revert {
            return Ok(());
        }
        match units.iter().find(|unit| unit.destructive_down()) {
            Some(unit) => Err(MigrationError::DestructiveRevert(unit.version.to_string())),
            None => Ok(()),
        }
    }

    async fn apply_unit(&self, unit: &MigrationUnit, batch: i32) -> MigrateResult<()> {
        let started = Instant::now();
        tracing::info!(version = %unit.version, name = %unit.name, batch, "applying migration");

        self.execute(unit, MigrationDirection::Up, LedgerChange::Record { batch })
            .await
            .map_err(|cause| match cause {
                StoreError::Conflict(reason) => MigrationError::InvalidState {
                    version: unit.version.to_string(),
                    reason,
                },
                cause => MigrationError::ApplyFailed {
                    version: unit.version.to_string(),
                    cause,
                },
            })?;

        tracing::info!(
            version = %unit.version,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "applied migration"
        );
        Ok(())
    }

    async fn revert_unit(&self, unit: &MigrationUnit) -> MigrateResult<()> {
        let started = Instant::now();
        if unit.destructive_down() {
            tracing::warn!(version = %unit.version, "reverting migration drops data");
        }
        tracing::info!(version = %unit.version, name = %unit.name, "reverting migration");

        self.execute(unit, MigrationDirection::Down, LedgerChange::Remove)
            .await
            .map_err(|cause| match cause {
                StoreError::Conflict(reason) => MigrationError::InvalidState {
                    version: unit.version.to_string(),
                    reason,
                },
                cause => MigrationError::RevertFailed {
                    version: unit.version.to_string(),
                    cause,
                },
            })?;

        tracing::info!(
            version = %unit.version,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reverted migration"
        );
        Ok(())
    }

    async fn execute(
        &self,
        unit: &MigrationUnit,
        direction: MigrationDirection,
        change: LedgerChange,
    ) -> Result<(), StoreError> {
        let unit_ref = UnitRef {
            version: unit.version.as_str(),
            name: &unit.name,
            direction,
        };
        self.store
            .execute_unit(unit_ref, unit.statements(direction), change)
            .await
    }
}
