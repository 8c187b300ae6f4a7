//! Shared PostgreSQL fixture for integration tests
//!
//! Tests run only when `TEST_DATABASE_URL` points at a disposable database.
//! The fixture drops and recreates a minimal base schema: the tables and
//! functions the built-in units depend on.

#![allow(dead_code)]

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use strata_migrate::{units, MigrationRunner, PgMigrationStore};

pub const LEDGER_TABLE: &str = "strata_migrations_test";

const RESET_SQL: &str = r#"
DROP TABLE IF EXISTS "events_audit", "event", "shared_link", "album", "asset", "user", "strata_migrations_test" CASCADE;
DROP FUNCTION IF EXISTS event_delete_audit() CASCADE;
DROP FUNCTION IF EXISTS user_delete_event_audit() CASCADE;
DROP FUNCTION IF EXISTS updated_at() CASCADE;
DROP FUNCTION IF EXISTS immich_uuid_v7() CASCADE;
DROP TABLE IF EXISTS "strata_scratch" CASCADE;
"#;

const BASE_SCHEMA_SQL: &str = r#"
CREATE EXTENSION IF NOT EXISTS "uuid-ossp";

CREATE OR REPLACE FUNCTION immich_uuid_v7()
  RETURNS uuid
  LANGUAGE sql
  AS $$ SELECT uuid_generate_v4() $$;

CREATE OR REPLACE FUNCTION updated_at()
  RETURNS trigger
  LANGUAGE plpgsql
  AS $$
BEGIN
  NEW."updatedAt" = now();
  NEW."updateId" = immich_uuid_v7();
  RETURN NEW;
END
$$;

CREATE TABLE "user" (
  "id" uuid NOT NULL DEFAULT uuid_generate_v4() PRIMARY KEY,
  "email" text NOT NULL
);

CREATE TABLE "asset" (
  "id" uuid NOT NULL DEFAULT uuid_generate_v4() PRIMARY KEY,
  "ownerId" uuid NOT NULL REFERENCES "user" ("id") ON DELETE CASCADE
);

CREATE TABLE "album" (
  "id" uuid NOT NULL DEFAULT uuid_generate_v4() PRIMARY KEY,
  "ownerId" uuid NOT NULL REFERENCES "user" ("id") ON DELETE CASCADE,
  "albumName" text NOT NULL DEFAULT ''
);

CREATE TABLE "shared_link" (
  "id" uuid NOT NULL DEFAULT uuid_generate_v4() PRIMARY KEY,
  "userId" uuid NOT NULL REFERENCES "user" ("id") ON DELETE CASCADE,
  "key" text NOT NULL
);
"#;

/// Connect and reset the base schema, or `None` when no test database is configured
pub async fn setup() -> Option<PgPool> {
    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping: TEST_DATABASE_URL is not set");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("connect to test database");
    pool.execute(RESET_SQL).await.expect("reset schema");
    pool.execute(BASE_SCHEMA_SQL).await.expect("create base schema");
    Some(pool)
}

pub fn runner(pool: &PgPool) -> MigrationRunner<PgMigrationStore> {
    let store = PgMigrationStore::new(pool.clone(), LEDGER_TABLE);
    MigrationRunner::new(store, units::builtin().expect("built-in units"))
}

pub async fn create_user(pool: &PgPool, email: &str) -> uuid::Uuid {
    sqlx::query_scalar(r#"INSERT INTO "user" ("email") VALUES ($1) RETURNING "id""#)
        .bind(email)
        .fetch_one(pool)
        .await
        .expect("insert user")
}

pub async fn create_asset(pool: &PgPool, owner: uuid::Uuid) -> uuid::Uuid {
    sqlx::query_scalar(r#"INSERT INTO "asset" ("ownerId") VALUES ($1) RETURNING "id""#)
        .bind(owner)
        .fetch_one(pool)
        .await
        .expect("insert asset")
}

pub async fn create_event(pool: &PgPool, owner: uuid::Uuid, thumbnail: Option<uuid::Uuid>) -> uuid::Uuid {
    sqlx::query_scalar(
        r#"INSERT INTO "event" ("ownerId", "eventThumbnailAssetId") VALUES ($1, $2) RETURNING "id""#,
    )
    .bind(owner)
    .bind(thumbnail)
    .fetch_one(pool)
    .await
    .expect("insert event")
}

pub async fn table_exists(pool: &PgPool, table: &str) -> bool {
    sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
        .bind(format!("public.\"{}\"", table))
        .fetch_one(pool)
        .await
        .expect("query to_regclass")
}

pub async fn column_exists(pool: &PgPool, table: &str, column: &str) -> bool {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM information_schema.columns \
         WHERE table_schema = 'public' AND table_name = $1 AND column_name = $2)",
    )
    .bind(table)
    .bind(column)
    .fetch_one(pool)
    .await
    .expect("query information_schema")
}

pub async fn count_functions(pool: &PgPool, names: &[&str]) -> i64 {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    sqlx::query_scalar("SELECT count(*) FROM pg_proc WHERE proname = ANY($1)")
        .bind(names)
        .fetch_one(pool)
        .await
        .expect("query pg_proc")
}

pub async fn count_triggers(pool: &PgPool, names: &[&str]) -> i64 {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    sqlx::query_scalar("SELECT count(*) FROM pg_trigger WHERE tgname = ANY($1) AND NOT tgisinternal")
        .bind(names)
        .fetch_one(pool)
        .await
        .expect("query pg_trigger")
}

pub async fn count_audit_rows(pool: &PgPool, event: uuid::Uuid) -> i64 {
    sqlx::query_scalar(r#"SELECT count(*) FROM "events_audit" WHERE "eventId" = $1"#)
        .bind(event)
        .fetch_one(pool)
        .await
        .expect("query events_audit")
}
