//! Eligibility Cleanup Service
//!
//! Removes seat assignments held by users who no longer qualify for the
//! purchase. For a namespace purchase that means losing the minimum
//! qualifying membership in the namespace; for a self-managed purchase it
//! means dropping out of the instance's eligible users (blocked, deactivated).
//!
//! ## Batching
//! The ineligible set is computed once, then processed in chunks of
//! `batch_size`: each chunk re-fetches which of its users still hold a seat and
//! deletes exactly those. Deletions are monotonic within a run.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use seatkeeper_shared::UserId;

use crate::assignments::SeatAssignmentService;
use crate::error::{EntitlementError, EntitlementResult};
use crate::membership::{EligibleUsersFinder, MembershipDirectory, NamespaceDirectory};
use crate::purchase::AddOnPurchase;

#[derive(Clone)]
pub struct EligibilityCleanupService {
    assignments: SeatAssignmentService,
    membership: Arc<dyn MembershipDirectory>,
    eligible_users: Arc<dyn EligibleUsersFinder>,
    namespaces: Arc<dyn NamespaceDirectory>,
}

impl EligibilityCleanupService {
    pub fn new(
        assignments: SeatAssignmentService,
        membership: Arc<dyn MembershipDirectory>,
        eligible_users: Arc<dyn EligibleUsersFinder>,
        namespaces: Arc<dyn NamespaceDirectory>,
    ) -> Self {
        Self {
            assignments,
            membership,
            eligible_users,
            namespaces,
        }
    }

    /// Delete assignments of users outside the eligible set.
    /// Returns the number of assignments removed.
    pub async fn delete_ineligible_assignments(
        &self,
        purchase: &AddOnPurchase,
        batch_size: usize,
    ) -> EntitlementResult<usize> {
        self.delete_ineligible_assignments_tracked(purchase, batch_size, &CleanupProgress::new())
            .await
    }

    /// Like [`Self::delete_ineligible_assignments`], also adding every
    /// removed assignment to `progress` as soon as its batch commits.
    ///
    /// A failing batch does not hide earlier ones: users already removed are
    /// logged before the error is returned, and stay counted in `progress`.
    pub async fn delete_ineligible_assignments_tracked(
        &self,
        purchase: &AddOnPurchase,
        batch_size: usize,
        progress: &CleanupProgress,
    ) -> EntitlementResult<usize> {
        if batch_size == 0 {
            return Err(EntitlementError::InvalidInput(
                "batch_size must be greater than zero".to_string(),
            ));
        }

        let assigned = self.assignments.assigned_user_ids(purchase).await?;
        if assigned.is_empty() {
            return Ok(0);
        }

        let eligible = self.eligible_user_ids(purchase, &assigned).await?;
        let ineligible: Vec<UserId> = assigned.difference(&eligible).copied().collect();
        if ineligible.is_empty() {
            return Ok(0);
        }

        let mut removed_ids = Vec::with_capacity(ineligible.len());
        let mut removed = 0;
        let result = self
            .remove_in_batches(
                purchase,
                &ineligible,
                batch_size,
                progress,
                &mut removed_ids,
                &mut removed,
            )
            .await;

        if removed > 0 {
            let namespace = self.namespace_path(purchase).await;
            tracing::info!(
                user_ids = ?removed_ids,
                add_on = %purchase.add_on_name,
                add_on_purchase = %purchase.id,
                namespace = %namespace,
                "Ineligible users unassigned"
            );
        }

        result.map(|()| removed)
    }

    async fn remove_in_batches(
        &self,
        purchase: &AddOnPurchase,
        ineligible: &[UserId],
        batch_size: usize,
        progress: &CleanupProgress,
        removed_ids: &mut Vec<UserId>,
        removed: &mut usize,
    ) -> EntitlementResult<()> {
        for batch in ineligible.chunks(batch_size) {
            let still_assigned = self.assignments.filter_assigned(purchase, batch).await?;
            if still_assigned.is_empty() {
                continue;
            }
            let count = self
                .assignments
                .unassign_many(purchase, &still_assigned)
                .await?;
            *removed += count;
            progress.record(count);
            removed_ids.extend(still_assigned);
        }
        Ok(())
    }

    async fn eligible_user_ids(
        &self,
        purchase: &AddOnPurchase,
        assigned: &BTreeSet<UserId>,
    ) -> EntitlementResult<BTreeSet<UserId>> {
        match purchase.namespace_id {
            Some(namespace_id) => self.membership.eligible_user_ids(namespace_id, assigned).await,
            None => self.eligible_users.execute().await,
        }
    }

    /// Namespace path for log context; falls back to the id if the lookup fails
    async fn namespace_path(&self, purchase: &AddOnPurchase) -> String {
        let Some(namespace_id) = purchase.namespace_id else {
            return "none".to_string();
        };
        match self.namespaces.find_namespace(namespace_id).await {
            Ok(Some(namespace)) => namespace.path,
            Ok(None) => namespace_id.to_string(),
            Err(e) => {
                tracing::warn!(namespace_id = %namespace_id, error = %e, "Namespace lookup failed");
                namespace_id.to_string()
            }
        }
    }
}

/// Running count of assignments removed, shared across retries of one cleanup
#[derive(Debug, Default)]
pub struct CleanupProgress {
    removed: AtomicUsize,
}

impl CleanupProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, count: usize) {
        self.removed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::Relaxed)
    }
}
