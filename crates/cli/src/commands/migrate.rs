use std::path::PathBuf;

use anyhow::{bail, Result};
use strata_migrate::{
    mask_database_url, units, MemoryStore, MigrationManager, MigrationRecord, MigrationRunner,
    MigrationSet, MigrationState, MigrationStore, PgMigrationStore, RevertTarget, RunnerOptions,
    SchemaValidator, StatusEntry, StrataConfig, Version,
};

const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Built-in units plus any SQL files from the configured directory
pub fn load_units(config: &StrataConfig) -> Result<MigrationSet> {
    let builtin = units::builtin()?;
    match &config.migrations.migrations_dir {
        Some(dir) => {
            let files = MigrationManager::new(dir).load_migrations()?;
            tracing::debug!(dir = %dir.display(), count = files.len(), "loaded migration files");
            Ok(builtin.merge(files)?)
        }
        None => Ok(builtin),
    }
}

async fn connect(config: &StrataConfig) -> Result<PgMigrationStore> {
    tracing::info!(database = %mask_database_url(&config.database.url), "connecting");
    let store = PgMigrationStore::connect(&config.database, &config.migrations.migrations_table).await?;
    Ok(store)
}

async fn runner(config: &StrataConfig, allow_data_loss: bool) -> Result<MigrationRunner<PgMigrationStore>> {
    let units = load_units(config)?;
    let store = connect(config).await?;
    Ok(MigrationRunner::new(store, units).with_options(RunnerOptions {
        allow_destructive_revert: allow_data_loss || config.migrations.allow_destructive_revert,
    }))
}

pub async fn up(config: &StrataConfig, to: Option<String>) -> Result<()> {
    let target = to.as_deref().map(Version::parse).transpose()?;
    let runner = runner(config, false).await?;
    let result = runner.apply_forward(target.as_ref()).await?;

    if result.applied_count == 0 {
        println!("Nothing to migrate");
    } else {
        for version in &result.applied_migrations {
            println!("✅ Applied {}", version);
        }
        println!(
            "Applied {} migration(s) in batch {} ({} ms)",
            result.applied_count,
            result.batch.unwrap_or_default(),
            result.execution_time_ms
        );
    }
    Ok(())
}

pub async fn down(config: &StrataConfig, target: RevertTarget, allow_data_loss: bool) -> Result<()> {
    let runner = runner(config, allow_data_loss).await?;
    let result = runner.revert(target).await?;

    if result.rolled_back_count == 0 {
        println!("Nothing to revert");
    } else {
        for version in &result.rolled_back_migrations {
            println!("↩️  Reverted {}", version);
        }
        println!(
            "Reverted {} migration(s) ({} ms)",
            result.rolled_back_count, result.execution_time_ms
        );
    }
    Ok(())
}

pub async fn status(config: &StrataConfig, json: bool) -> Result<()> {
    let runner = runner(config, false).await?;
    let status = runner.status().await?;
    let unknown = status.unknown_records().to_vec();
    let entries: Vec<StatusEntry> = status.collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print!("{}", render_status(&entries, &unknown));
    }
    Ok(())
}

fn render_status(entries: &[StatusEntry], unknown: &[MigrationRecord]) -> String {
    let mut output = String::from("Migration Status:\n================\n");
    if entries.is_empty() && unknown.is_empty() {
        output.push_str("No migrations found\n");
        return output;
    }

    for entry in entries {
        let line = match &entry.state {
            MigrationState::Applied { applied_at, batch } => format!(
                "  ✅ {}  (batch {}, {})",
                entry.version,
                batch,
                applied_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            MigrationState::Pending => format!("  ⏳ {}", entry.version),
        };
        output.push_str(&line);
        if entry.destructive_down {
            output.push_str("  [destructive rollback]");
        }
        output.push('\n');
    }
    for record in unknown {
        output.push_str(&format!("  ❓ {}  (not a known migration)\n", record.version));
    }

    let applied = entries.iter().filter(|e| e.state.is_applied()).count();
    output.push_str(&format!(
        "\n{} applied, {} pending\n",
        applied,
        entries.len() - applied
    ));
    output
}

pub async fn check(config: &StrataConfig) -> Result<()> {
    let units = load_units(config)?;
    let report = SchemaValidator::for_builtin().validate(&units);

    for issue in &report.issues {
        let marker = if issue.is_error() { "❌" } else { "⚠️ " };
        println!("{} {}", marker, issue);
    }

    if !report.is_valid() {
        bail!("validation failed with {} error(s)", report.errors().count());
    }
    println!("✅ {} migration(s) validated", units.len());
    Ok(())
}

/// Print the SQL `up` (or `down --to`) would execute, without writing anything
pub async fn plan(config: &StrataConfig, down_to: Option<String>) -> Result<()> {
    let units = load_units(config)?;
    let store = connect(config).await?;

    // A missing ledger table means nothing is applied yet
    let records = if store.ledger_exists().await? {
        store.applied_migrations().await?
    } else {
        Vec::new()
    };

    let preview = MigrationRunner::new(MemoryStore::with_ledger(records), units);
    match down_to {
        Some(version) => {
            preview.revert(RevertTarget::To(Version::parse(&version)?)).await?;
        }
        None => {
            preview.apply_forward(None).await?;
        }
    }

    let executed = preview.store().executed();
    if executed.is_empty() {
        println!("-- nothing to do");
        return Ok(());
    }

    let mut current: Option<(String, String)> = None;
    for statement in executed {
        let header = (statement.version.clone(), statement.direction.to_string());
        if current.as_ref() != Some(&header) {
            println!("-- {} ({})", header.0, header.1);
            current = Some(header);
        }
        println!("{}\n", statement.sql);
    }
    Ok(())
}

pub async fn create(config: &StrataConfig, name: &str) -> Result<()> {
    let dir = config
        .migrations
        .migrations_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MIGRATIONS_DIR));
    let path = MigrationManager::new(dir).create_migration(name)?;
    println!("Created migration: {}", path.display());
    Ok(())
}
