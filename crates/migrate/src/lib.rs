//! # strata-migrate: Schema Migrations for PostgreSQL
//!
//! Ordered, reversible schema changes tracked in a ledger table.
//!
//! Units are built in Rust with the [`SchemaBuilder`] or loaded from SQL files
//! by the [`MigrationManager`], collected into a [`MigrationSet`], and executed
//! by a [`MigrationRunner`] against any [`MigrationStore`]. Each unit runs in
//! its own transaction together with its ledger row.

pub mod config;
pub mod definitions;
pub mod error;
pub mod manager;
pub mod memory;
pub mod migration;
pub mod postgres;
pub mod runner;
pub mod schema_builder;
pub mod store;
pub mod units;
pub mod validation;

pub use config::{mask_database_url, DatabaseConfig, LogConfig, LogFormat, MigrationConfig, StrataConfig};
pub use definitions::*;
pub use error::*;
pub use manager::MigrationManager;
pub use memory::MemoryStore;
pub use migration::{MigrationSet, MigrationUnit};
pub use postgres::PgMigrationStore;
pub use runner::{MigrationRunner, MigrationStatusIter, RunnerOptions};
pub use schema_builder::{ForeignKey, ReferentialAction, SchemaBuilder, SchemaObject, Statement};
pub use store::{MigrationStore, UnitRef};
pub use validation::{SchemaValidator, ValidationIssue, ValidationReport};
