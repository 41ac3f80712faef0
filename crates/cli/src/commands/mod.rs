//! CLI subcommands.
//!
//! # Environment Variables
//!
//! - `STOREFRONT_DATABASE_URL` (fallback `DATABASE_URL`) - `PostgreSQL`
//!   connection string for the storefront database

pub mod migrate;
pub mod prune;
pub mod reconcile;

use kumas_storefront::db::RepositoryError;
use kumas_storefront::middleware::RateLimitError;
use secrecy::SecretString;
use sqlx::PgPool;
use thiserror::Error;

/// Errors from CLI commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Rate limit store error: {0}")]
    RateLimit(#[from] RateLimitError),

    /// Some orders still have unrecorded stock after reconciliation.
    #[error("{0} order(s) still have unrecorded stock")]
    Incomplete(usize),
}

/// Connect to the storefront database.
pub async fn connect() -> Result<PgPool, CommandError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("STOREFRONT_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map_err(|_| CommandError::MissingEnvVar("STOREFRONT_DATABASE_URL"))?;

    tracing::info!("Connecting to storefront database...");
    Ok(kumas_storefront::db::create_pool(&SecretString::from(database_url)).await?)
}
