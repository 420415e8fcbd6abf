use anyhow::{bail, Context, Result};
use catsync_core::SyncKind;
use catsync_sync::{SyncConfig, SyncOutcome, SyncService};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "catsync")]
#[command(about = "Legacy catalog synchronizer")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile the normalized catalog with the legacy tables once.
    Sync {
        #[arg(value_enum, default_value_t = Target::All)]
        target: Target,
    },
    /// Serve the HTTP API, plus the cron scheduler when enabled.
    Serve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Target {
    Products,
    Prices,
    All,
}

impl Target {
    fn kinds(self) -> &'static [SyncKind] {
        match self {
            Target::Products => &[SyncKind::Products],
            Target::Prices => &[SyncKind::Prices],
            Target::All => &[SyncKind::Products, SyncKind::Prices],
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync { target: Target::All }) {
        Commands::Sync { target } => {
            let outcomes = catsync_sync::run_sync_once_from_env(target.kinds()).await?;
            let mut ok = outcomes.len() == target.kinds().len();
            for (kind, outcome) in &outcomes {
                let counts = outcome.counts();
                println!(
                    "{kind}: {} processed={} inserted={} updated={} deleted={}",
                    outcome_label(outcome),
                    counts.processed,
                    counts.inserted,
                    counts.updated,
                    counts.deleted
                );
                ok &= outcome.is_completed();
            }
            if !ok {
                bail!("sync did not complete");
            }
        }
        Commands::Serve => {
            let service = SyncService::connect(SyncConfig::from_env()).await?;
            let scheduler = service.maybe_build_scheduler().await?;
            if let Some(scheduler) = &scheduler {
                scheduler.start().await.context("starting scheduler")?;
                info!(cron = %service.config().sync_cron, "sync scheduler started");
            } else {
                warn!("sync scheduler disabled; syncs run only on demand");
            }
            catsync_web::serve(service).await?;
        }
    }

    Ok(())
}

fn outcome_label(outcome: &SyncOutcome) -> &'static str {
    match outcome {
        SyncOutcome::Completed(_) => "completed",
        SyncOutcome::Conflict => "conflict (another sync is running)",
        SyncOutcome::Failed => "failed",
    }
}
