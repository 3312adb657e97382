//! Scheduled jobs
//!
//! Each job logs its own failures and returns normally so a bad run never
//! takes the scheduler down.

use seatkeeper_entitlements::{Engine, RefreshSummary};
use time::OffsetDateTime;
use tracing::{error, info};

/// Refresh the assigned users of the most overdue purchases
pub async fn run_refresh_pass(engine: &Engine) -> Option<RefreshSummary> {
    let limit = engine.settings.refresh_batch_limit;
    match engine.scheduler.run_pass(limit).await {
        Ok(summary) => Some(summary),
        Err(e) => {
            error!(error = %e, "Failed to select purchases for refresh");
            None
        }
    }
}

/// Hard-delete purchases whose cleanup delay has passed
pub async fn run_purge(engine: &Engine) -> Option<usize> {
    let today = OffsetDateTime::now_utc().date();
    match engine.purge.purge_expired(today).await {
        Ok(0) => Some(0),
        Ok(removed) => {
            info!(removed, "Expired add-on purchases purged");
            Some(removed)
        }
        Err(e) => {
            error!(error = %e, "Failed to purge expired add-on purchases");
            None
        }
    }
}
