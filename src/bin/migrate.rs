//! Operator CLI for the SQL file migrations.
//!
//! ```text
//! migrate [--database-url URL] [--dir PATH] run
//! migrate rollback [STEPS]
//! migrate status
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use social_selling::{
    config::ConfigLoader,
    db,
    migrator::{MigrationRunner, MigrationState},
    telemetry,
};

#[derive(Debug, Parser)]
#[command(name = "migrate", version, about = "Apply, revert and inspect SQL migrations")]
struct Cli {
    /// Database URL; defaults to the configured SOCIAL_DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Directory holding the .sql files; defaults to SOCIAL_MIGRATIONS_DIR
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply every pending migration
    Run,
    /// Revert the most recently applied migrations
    Rollback {
        /// Number of migrations to revert
        #[arg(default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        steps: u32,
    },
    /// List migrations as applied or pending
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let mut config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    if let Some(dir) = cli.dir {
        config.migrations_dir = dir.to_string_lossy().into_owned();
    }

    // Per-file progress comes from the runner's info events.
    config.log_format = "pretty".to_string();
    config.log_level = "warn,social_selling::migrator=info".to_string();
    telemetry::init_tracing(&config).context("initializing telemetry")?;

    let db = db::init_pool(&config)
        .await
        .context("connecting to database")?;
    let runner = MigrationRunner::new(db, &config.migrations_dir);

    match cli.command {
        Command::Run => {
            println!("Applying migrations from {}", runner.dir().display());
            let applied = runner.run().await.context("migration run failed")?;
            for name in &applied {
                println!("  applied  {}", name);
            }
            println!("{} migration(s) applied", applied.len());
        }
        Command::Rollback { steps } => {
            let reverted = runner
                .rollback(steps as usize)
                .await
                .context("rollback failed")?;
            for name in &reverted {
                println!("  reverted {}", name);
            }
            println!("{} migration(s) rolled back", reverted.len());
        }
        Command::Status => {
            let report = runner.status().await.context("reading migration status")?;
            for entry in &report.migrations {
                match (entry.state, entry.executed_at) {
                    (MigrationState::Applied, Some(at)) => {
                        println!("{:<8} {}  ({})", entry.state, entry.name, at.to_rfc3339())
                    }
                    _ => println!("{:<8} {}", entry.state, entry.name),
                }
            }
            for name in &report.orphaned {
                println!("{:<8} {}  (file missing)", "ORPHANED", name);
            }
            println!(
                "{} applied, {} pending",
                report.applied_count(),
                report.pending_count()
            );
        }
    }

    Ok(())
}
