//! Rate-limit counter maintenance.

use chrono::{Duration, Utc};
use kumas_storefront::middleware::rate_limit::prune_counters;

use super::{CommandError, connect};

/// Delete counters whose window started more than `older_than_hours` ago.
pub async fn rate_limits(older_than_hours: i64) -> Result<u64, CommandError> {
    let pool = connect().await?;
    let cutoff = Utc::now() - Duration::hours(older_than_hours.max(1));

    let deleted = prune_counters(&pool, cutoff).await?;
    tracing::info!(deleted, %cutoff, "Pruned rate-limit counters");
    Ok(deleted)
}
