//! PostgreSQL store backed by sqlx
//!
//! Every unit runs inside one transaction that holds an advisory lock keyed on
//! the ledger table, so two runners never interleave on the same database.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::definitions::{LedgerChange, MigrationRecord};
use crate::error::{StoreError, StoreResult};
use crate::schema_builder::{quote_ident, Statement};
use crate::store::{MigrationStore, UnitRef};

/// Migration store executing against a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgMigrationStore {
    pool: PgPool,
    table: String,
}

impl PgMigrationStore {
    /// Wrap an existing pool
    pub fn new(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
        }
    }

    /// Connect using the database configuration
    pub async fn connect(config: &DatabaseConfig, table: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to database: {}", e)))?;

        Ok(Self::new(pool, table))
    }

    /// Get the database pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether the ledger table exists, without creating it
    pub async fn ledger_exists(&self) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(quote_ident(&self.table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Ledger(format!("Failed to look up migrations table: {}", e)))?;
        Ok(exists)
    }

    /// Advisory lock key derived from the ledger table name (FNV-1a)
    pub fn lock_key(&self) -> i64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in self.table.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash as i64
    }

    /// SQL to create the migrations tracking table
    pub fn create_ledger_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  \
                \"version\" text PRIMARY KEY,\n  \
                \"name\" text NOT NULL,\n  \
                \"batch\" integer NOT NULL,\n  \
                \"applied_at\" timestamp with time zone NOT NULL DEFAULT now()\n\
            );",
            quote_ident(&self.table)
        )
    }

    fn applied_migrations_sql(&self) -> String {
        format!(
            "SELECT \"version\", \"name\", \"batch\", \"applied_at\" FROM {} ORDER BY \"batch\", \"applied_at\", \"version\"",
            quote_ident(&self.table)
        )
    }

    fn check_migration_sql(&self) -> String {
        format!("SELECT 1 FROM {} WHERE \"version\" = $1", quote_ident(&self.table))
    }

    fn record_migration_sql(&self) -> String {
        format!(
            "INSERT INTO {} (\"version\", \"name\", \"batch\") VALUES ($1, $2, $3)",
            quote_ident(&self.table)
        )
    }

    fn remove_migration_sql(&self) -> String {
        format!("DELETE FROM {} WHERE \"version\" = $1", quote_ident(&self.table))
    }
}

#[async_trait]
impl MigrationStore for PgMigrationStore {
    async fn ensure_ledger(&self) -> StoreResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|e| {
            StoreError::Connection(format!("Failed to start transaction: {}", e))
        })?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(self.lock_key())
            .execute(&mut *transaction)
            .await?;
        sqlx::query(&self.create_ledger_sql())
            .execute(&mut *transaction)
            .await
            .map_err(|e| StoreError::Ledger(format!("Failed to create migrations table: {}", e)))?;

        transaction.commit().await?;
        Ok(())
    }

    async fn applied_migrations(&self) -> StoreResult<Vec<MigrationRecord>> {
        let rows = sqlx::query(&self.applied_migrations_sql())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Ledger(format!("Failed to query applied migrations: {}", e)))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(MigrationRecord {
                version: row.try_get("version")?,
                name: row.try_get("name")?,
                batch: row.try_get("batch")?,
                applied_at: row.try_get("applied_at")?,
            });
        }

        Ok(records)
    }

    async fn execute_unit(
        &self,
        unit: UnitRef<'_>,
        statements: &[Statement],
        change: LedgerChange,
    ) -> StoreResult<()> {
        // Dropped without commit on every early return, which rolls back
        let mut transaction = self.pool.begin().await.map_err(|e| {
            StoreError::Connection(format!("Failed to start transaction: {}", e))
        })?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(self.lock_key())
            .execute(&mut *transaction)
            .await?;

        let present = sqlx::query_scalar::<_, i32>(&self.check_migration_sql())
            .bind(unit.version)
            .fetch_optional(&mut *transaction)
            .await?
            .is_some();
        match change {
            LedgerChange::Record { .. } if present => {
                return Err(StoreError::Conflict(format!("{} is already recorded", unit.version)));
            }
            LedgerChange::Remove if !present => {
                return Err(StoreError::Conflict(format!("{} is not recorded", unit.version)));
            }
            _ => {}
        }

        for (index, statement) in statements.iter().enumerate() {
            tracing::debug!(version = unit.version, direction = %unit.direction, index, "executing statement");
            sqlx::Executor::execute(&mut *transaction, statement.sql.as_str())
                .await
                .map_err(|e| StoreError::Statement {
                    index,
                    message: e.to_string(),
                })?;
        }

        match change {
            LedgerChange::Record { batch } => {
                sqlx::query(&self.record_migration_sql())
                    .bind(unit.version)
                    .bind(unit.name)
                    .bind(batch)
                    .execute(&mut *transaction)
                    .await
                    .map_err(|e| StoreError::Ledger(format!("Failed to record migration: {}", e)))?;
            }
            LedgerChange::Remove => {
                sqlx::query(&self.remove_migration_sql())
                    .bind(unit.version)
                    .execute(&mut *transaction)
                    .await
                    .map_err(|e| {
                        StoreError::Ledger(format!("Failed to remove migration record: {}", e))
                    })?;
            }
        }

        transaction
            .commit()
            .await
            .map_err(|e| StoreError::Ledger(format!("Failed to commit migration: {}", e)))?;

        Ok(())
    }
}
