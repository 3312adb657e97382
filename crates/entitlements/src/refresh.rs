//! Refresh Scheduler
//!
//! Decides which purchases need their assigned users recomputed and drives
//! the recomputation. A purchase is stale when it was never refreshed or was
//! refreshed longer ago than the staleness threshold. Selection is a pure
//! function; the worker's cron job supplies the timer.
//!
//! ## Mutual exclusion
//! Each purchase is processed under an exclusive lease keyed by its id. A
//! lease already held elsewhere is a skip, not an error.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::catalog::AddOnName;
use crate::cleanup::{CleanupProgress, EligibilityCleanupService};
use crate::error::EntitlementResult;
use crate::lease::{ExclusiveLease, LeaseKey};
use crate::purchase::AddOnPurchase;
use crate::settings::EngineSettings;
use crate::store::PurchaseStore;

/// Families eligible for scheduled assigned-user refresh
pub const REFRESHABLE_ADD_ONS: [AddOnName; 4] = [
    AddOnName::DuoPro,
    AddOnName::DuoEnterprise,
    AddOnName::DuoAmazonQ,
    AddOnName::DuoSelfHosted,
];

/// Upper bound on a single backoff delay
const RETRY_MAX_DELAY: StdDuration = StdDuration::from_secs(5);

/// Stale purchases of refreshable families, never-refreshed first, then
/// oldest refresh first. Ties break on id for a stable order.
pub fn select_candidates<'a>(
    purchases: impl IntoIterator<Item = &'a AddOnPurchase>,
    now: OffsetDateTime,
    threshold: Duration,
    limit: usize,
) -> Vec<AddOnPurchase> {
    let mut candidates: Vec<&AddOnPurchase> = purchases
        .into_iter()
        .filter(|p| p.add_on_name.is_refreshable())
        .filter(|p| p.needs_assigned_users_refresh(now, threshold))
        .collect();

    // None sorts before Some
    candidates.sort_by_key(|p| (p.last_assigned_users_refreshed_at, p.id));
    candidates.into_iter().take(limit).cloned().collect()
}

/// What happened to one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { removed: usize },
    /// Lease held by another worker, or no longer stale / gone
    Skipped,
}

/// Counts for one scheduler pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub removed_assignments: usize,
}

#[derive(Clone)]
pub struct RefreshScheduler {
    purchases: Arc<dyn PurchaseStore>,
    cleanup: EligibilityCleanupService,
    lease: Arc<dyn ExclusiveLease>,
    settings: EngineSettings,
}

impl RefreshScheduler {
    pub fn new(
        purchases: Arc<dyn PurchaseStore>,
        cleanup: EligibilityCleanupService,
        lease: Arc<dyn ExclusiveLease>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            purchases,
            cleanup,
            lease,
            settings,
        }
    }

    pub async fn select_candidates(&self, limit: usize) -> EntitlementResult<Vec<AddOnPurchase>> {
        self.select_candidates_at(OffsetDateTime::now_utc(), limit)
            .await
    }

    pub async fn select_candidates_at(
        &self,
        now: OffsetDateTime,
        limit: usize,
    ) -> EntitlementResult<Vec<AddOnPurchase>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.purchases
            .refresh_candidates(
                &REFRESHABLE_ADD_ONS,
                now,
                self.settings.staleness_threshold,
                limit,
            )
            .await
    }

    /// The single most overdue purchase
    pub async fn next_candidate(&self) -> EntitlementResult<Option<AddOnPurchase>> {
        Ok(self.select_candidates(1).await?.into_iter().next())
    }

    /// Refresh up to `limit` candidates. Each candidate is attempted at most
    /// once per pass; failures are logged and counted, never propagated.
    pub async fn run_pass(&self, limit: usize) -> EntitlementResult<RefreshSummary> {
        let candidates = self.select_candidates(limit).await?;
        let mut summary = RefreshSummary::default();

        for purchase in &candidates {
            let progress = CleanupProgress::new();
            match self.refresh_purchase_tracked(purchase, &progress).await {
                Ok(RefreshOutcome::Refreshed { removed }) => {
                    summary.refreshed += 1;
                    summary.removed_assignments += removed;
                }
                Ok(RefreshOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!(
                        add_on_purchase = %purchase.id,
                        add_on = %purchase.add_on_name,
                        removed = progress.removed(),
                        error = %e,
                        "Failed to refresh assigned users"
                    );
                    summary.failed += 1;
                    // Batches that committed before the failure still count
                    summary.removed_assignments += progress.removed();
                }
            }
        }

        if !candidates.is_empty() {
            tracing::info!(
                candidates = candidates.len(),
                refreshed = summary.refreshed,
                skipped = summary.skipped,
                failed = summary.failed,
                removed_assignments = summary.removed_assignments,
                "Refresh pass complete"
            );
        }

        Ok(summary)
    }

    /// Refresh one purchase under its lease
    pub async fn refresh_purchase(
        &self,
        purchase: &AddOnPurchase,
    ) -> EntitlementResult<RefreshOutcome> {
        self.refresh_purchase_tracked(purchase, &CleanupProgress::new())
            .await
    }

    async fn refresh_purchase_tracked(
        &self,
        purchase: &AddOnPurchase,
        progress: &CleanupProgress,
    ) -> EntitlementResult<RefreshOutcome> {
        let key = LeaseKey::for_purchase_refresh(purchase.id);
        let Some(token) = self.lease.try_obtain(&key, self.settings.lease_ttl).await? else {
            tracing::debug!(add_on_purchase = %purchase.id, "Refresh lease held elsewhere, skipping");
            return Ok(RefreshOutcome::Skipped);
        };

        let result = self.refresh_locked(purchase, progress).await;

        match self.lease.cancel(&key, &token).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                add_on_purchase = %purchase.id,
                "Refresh lease expired before release"
            ),
            Err(e) => tracing::warn!(
                add_on_purchase = %purchase.id,
                error = %e,
                "Failed to release refresh lease"
            ),
        }

        result
    }

    async fn refresh_locked(
        &self,
        candidate: &AddOnPurchase,
        progress: &CleanupProgress,
    ) -> EntitlementResult<RefreshOutcome> {
        // Another worker may have refreshed or removed it since selection
        let Some(purchase) = self.purchases.find_purchase(candidate.id).await? else {
            return Ok(RefreshOutcome::Skipped);
        };
        let now = OffsetDateTime::now_utc();
        if !purchase.needs_assigned_users_refresh(now, self.settings.staleness_threshold) {
            return Ok(RefreshOutcome::Skipped);
        }

        let removed = self.cleanup_with_retry(&purchase, progress).await?;
        self.purchases
            .mark_assigned_users_refreshed(purchase.id, OffsetDateTime::now_utc())
            .await?;

        tracing::debug!(
            add_on_purchase = %purchase.id,
            removed = removed,
            "Assigned users refreshed"
        );

        Ok(RefreshOutcome::Refreshed { removed })
    }

    /// Cleanup is idempotent, so transient failures rerun it from scratch.
    /// Returns the total removed across every attempt.
    async fn cleanup_with_retry(
        &self,
        purchase: &AddOnPurchase,
        progress: &CleanupProgress,
    ) -> EntitlementResult<usize> {
        use tokio_retry::strategy::{jitter, ExponentialBackoff};
        use tokio_retry::Retry;

        let retry_strategy = ExponentialBackoff::from_millis(2)
            .factor(self.settings.retry_base_millis)
            .max_delay(RETRY_MAX_DELAY)
            .take(self.settings.retry_attempts)
            .map(jitter);

        let batch_size = self.settings.cleanup_batch_size;

        Retry::spawn(retry_strategy, || async {
            let result = self
                .cleanup
                .delete_ineligible_assignments_tracked(purchase, batch_size, progress)
                .await;

            match &result {
                Ok(_) => Ok(result),
                Err(e) if e.is_transient() => {
                    tracing::debug!(
                        add_on_purchase = %purchase.id,
                        error = %e,
                        "Transient cleanup error - will retry"
                    );
                    Err(result)
                }
                Err(_) => Ok(result),
            }
        })
        .await
        .unwrap_or_else(|e| e)
        .map(|_| progress.removed())
    }
}
