use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hollow_sync::RunOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "hollow-cli")]
#[command(about = "Hollow Pages content mirror")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Mirror the external feed into the local post store.
    Sync {
        /// Run against an in-memory store; nothing is written to Postgres.
        #[arg(long)]
        dry_run: bool,
        /// Replay a captured feed bundle instead of calling the live feed.
        #[arg(long)]
        fixture: Option<PathBuf>,
    },
    /// Apply the embedded schema migrations.
    Migrate,
    /// Print a digest of recent sync runs.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Sync { dry_run, fixture } => {
            let summary = hollow_sync::run_sync_once_from_env(RunOptions {
                dry_run,
                fixture_path: fixture,
            })
            .await?;
            println!("{summary}");
        }
        Commands::Migrate => {
            hollow_sync::migrate_from_env().await?;
            println!("migrations applied");
        }
        Commands::Report { runs } => {
            println!("{}", hollow_sync::report_from_env(runs)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Sync {
        dry_run: false,
        fixture: None,
    });

    match run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
