//! Kumas CLI - Database migrations and operational jobs.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! kumas migrate
//!
//! # Re-apply stock for paid orders whose stock was never recorded
//! kumas reconcile-stock --older-than-minutes 15 --limit 100
//!
//! # Drop rate-limit counters from old windows
//! kumas prune-rate-limits --older-than-hours 24
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `reconcile-stock` - Stock reconciliation audit for paid orders
//! - `prune-rate-limits` - Delete expired rate-limit counters

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "kumas")]
#[command(author, version, about = "Kumas CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run storefront database migrations
    Migrate,
    /// Record missing stock movements for paid orders
    ReconcileStock {
        /// Only orders paid at least this many minutes ago
        #[arg(long, default_value_t = 15)]
        older_than_minutes: i64,

        /// Maximum orders to process in one run
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Delete rate-limit counters for old windows
    PruneRateLimits {
        /// Keep counters for windows newer than this many hours
        #[arg(long, default_value_t = 24)]
        older_than_hours: i64,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kumas_cli=info,kumas_storefront=info".into()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await?,
        Commands::ReconcileStock {
            older_than_minutes,
            limit,
        } => {
            let summary = commands::reconcile::run(older_than_minutes, limit).await?;
            if summary.incomplete > 0 {
                return Err(commands::CommandError::Incomplete(summary.incomplete));
            }
        }
        Commands::PruneRateLimits { older_than_hours } => {
            commands::prune::rate_limits(older_than_hours).await?;
        }
    }
    Ok(())
}
