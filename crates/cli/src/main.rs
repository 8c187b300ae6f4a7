mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser, Subcommand};
use commands::migrate;
use strata_migrate::{MigrationError, RevertTarget, StrataConfig, Version};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Ordered, reversible PostgreSQL schema migrations")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database URL (overrides config and DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database migrations
    Migrate {
        #[command(subcommand)]
        migrate_command: MigrateCommands,
    },
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Apply pending migrations
    Up {
        /// Stop after this version
        #[arg(long)]
        to: Option<String>,
    },

    /// Revert applied migrations (the latest one by default)
    #[command(group(ArgGroup::new("target").args(["count", "to", "batch", "all"])))]
    Down {
        /// Number of migrations to revert
        #[arg(long)]
        count: Option<usize>,

        /// Revert everything newer than this version
        #[arg(long)]
        to: Option<String>,

        /// Revert the most recent batch
        #[arg(long)]
        batch: bool,

        /// Revert every applied migration
        #[arg(long)]
        all: bool,

        /// Allow rollbacks that drop tables or columns
        #[arg(long)]
        allow_data_loss: bool,
    },

    /// Show migration status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate migration ordering and reversibility
    Check,

    /// Print the SQL a run would execute
    Plan {
        /// Plan a revert down to this version instead
        #[arg(long)]
        down: Option<String>,
    },

    /// Create a new SQL migration file
    Create {
        /// Migration name
        name: String,
    },
}

fn revert_target(
    count: Option<usize>,
    to: Option<String>,
    batch: bool,
    all: bool,
) -> Result<RevertTarget, MigrationError> {
    Ok(match (count, to) {
        (Some(count), _) => RevertTarget::Count(count),
        (None, Some(to)) => RevertTarget::To(Version::parse(&to)?),
        (None, None) if batch => RevertTarget::LastBatch,
        (None, None) if all => RevertTarget::All,
        (None, None) => RevertTarget::Count(1),
    })
}

fn load_config(cli: &Cli) -> anyhow::Result<StrataConfig> {
    let mut config = StrataConfig::load(cli.config.as_deref())?;
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
        config.validate()?;
    }
    Ok(config)
}

/// `error: <version>: <cause>` when the failure belongs to a unit
fn render_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<MigrationError>() {
        Some(MigrationError::ApplyFailed { version, cause })
        | Some(MigrationError::RevertFailed { version, cause }) => {
            format!("error: {}: {}", version, cause)
        }
        Some(MigrationError::InvalidState { version, reason }) => {
            format!("error: {}: {}", version, reason)
        }
        Some(MigrationError::DestructiveRevert(version)) => format!(
            "error: {}: rollback drops data; pass --allow-data-loss to proceed",
            version
        ),
        _ => format!("error: {:#}", err),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    logging::init_logging(&logging::LoggingConfig::from(&config.logging))?;

    match cli.command {
        Commands::Migrate { migrate_command } => match migrate_command {
            MigrateCommands::Up { to } => {
                migrate::up(&config, to).await?;
            }
            MigrateCommands::Down {
                count,
                to,
                batch,
                all,
                allow_data_loss,
            } => {
                let target = revert_target(count, to, batch, all)?;
                migrate::down(&config, target, allow_data_loss).await?;
            }
            MigrateCommands::Status { json } => {
                migrate::status(&config, json).await?;
            }
            MigrateCommands::Check => {
                migrate::check(&config).await?;
            }
            MigrateCommands::Plan { down } => {
                migrate::plan(&config, down).await?;
            }
            MigrateCommands::Create { name } => {
                migrate::create(&config, &name).await?;
            }
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("{}", render_error(&err));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_migrate::StoreError;

    #[test]
    fn test_parse_down_targets() {
        let cli = Cli::try_parse_from(["strata", "migrate", "down", "--count", "2"]).unwrap();
        let Commands::Migrate {
            migrate_command: MigrateCommands::Down { count, to, batch, all, .. },
        } = cli.command
        else {
            panic!("expected down");
        };
        assert_eq!(revert_target(count, to, batch, all).unwrap(), RevertTarget::Count(2));

        assert_eq!(revert_target(None, None, false, false).unwrap(), RevertTarget::Count(1));
        assert_eq!(revert_target(None, None, true, false).unwrap(), RevertTarget::LastBatch);
        assert_eq!(revert_target(None, None, false, true).unwrap(), RevertTarget::All);
        assert!(revert_target(None, Some("nope".to_string()), false, false).is_err());
    }

    #[test]
    fn test_down_targets_are_exclusive() {
        assert!(Cli::try_parse_from(["strata", "migrate", "down", "--all", "--batch"]).is_err());
        assert!(Cli::try_parse_from(["strata", "migrate", "down", "--all", "--allow-data-loss"]).is_ok());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "strata",
            "migrate",
            "status",
            "--json",
            "--database-url",
            "postgres://localhost/other",
        ])
        .unwrap();
        assert_eq!(cli.database_url.as_deref(), Some("postgres://localhost/other"));
        assert!(matches!(
            cli.command,
            Commands::Migrate {
                migrate_command: MigrateCommands::Status { json: true }
            }
        ));
    }

    #[test]
    fn test_render_error_names_failing_version() {
        let err = anyhow::Error::from(MigrationError::ApplyFailed {
            version: "1763613529725-Add-Events".to_string(),
            cause: StoreError::Statement {
                index: 3,
                message: "relation \"user\" does not exist".to_string(),
            },
        });
        let rendered = render_error(&err);
        assert!(rendered.starts_with("error: 1763613529725-Add-Events: "));
        assert!(rendered.contains("relation \"user\" does not exist"));

        let other = anyhow::anyhow!("connection refused");
        assert_eq!(render_error(&other), "error: connection refused");
    }
}
