//! Seat assignments
//!
//! Wraps the assignment store and the user entitlement cache so every seat
//! change drops the `(family, user)` cache entry in the same operation.

use std::collections::BTreeSet;
use std::sync::Arc;

use seatkeeper_shared::UserId;

use crate::cache::{UserAddOnCacheKey, UserEntitlementCache};
use crate::catalog::AddOnName;
use crate::error::{EntitlementError, EntitlementResult};
use crate::purchase::AddOnPurchase;
use crate::store::AssignmentStore;

#[derive(Clone)]
pub struct SeatAssignmentService {
    store: Arc<dyn AssignmentStore>,
    cache: Arc<dyn UserEntitlementCache>,
}

impl SeatAssignmentService {
    pub fn new(store: Arc<dyn AssignmentStore>, cache: Arc<dyn UserEntitlementCache>) -> Self {
        Self { store, cache }
    }

    /// Grant a seat. Quantity enforcement is the caller's job.
    pub async fn assign(&self, user_id: UserId, purchase: &AddOnPurchase) -> EntitlementResult<()> {
        if !self.store.insert_assignment(purchase.id, user_id).await? {
            return Err(EntitlementError::AlreadyAssigned {
                user_id,
                purchase_id: purchase.id,
            });
        }

        self.invalidate(purchase, &[user_id]).await?;

        tracing::info!(
            user_id = %user_id,
            add_on_purchase = %purchase.id,
            add_on = %purchase.add_on_name,
            "Seat assigned"
        );

        Ok(())
    }

    pub async fn unassign(&self, user_id: UserId, purchase: &AddOnPurchase) -> EntitlementResult<bool> {
        let removed = self.store.delete_assignment(purchase.id, user_id).await?;
        if removed {
            self.invalidate(purchase, &[user_id]).await?;
            tracing::info!(
                user_id = %user_id,
                add_on_purchase = %purchase.id,
                add_on = %purchase.add_on_name,
                "Seat unassigned"
            );
        }
        Ok(removed)
    }

    /// Remove several seats at once; returns how many existed
    pub async fn unassign_many(
        &self,
        purchase: &AddOnPurchase,
        user_ids: &[UserId],
    ) -> EntitlementResult<usize> {
        if user_ids.is_empty() {
            return Ok(0);
        }

        let removed = self.store.delete_assignments(purchase.id, user_ids).await?;
        self.invalidate(purchase, user_ids).await?;
        Ok(removed)
    }

    pub async fn is_assigned(&self, user_id: UserId, purchase: &AddOnPurchase) -> EntitlementResult<bool> {
        self.store.assignment_exists(purchase.id, user_id).await
    }

    pub async fn assigned_user_ids(&self, purchase: &AddOnPurchase) -> EntitlementResult<BTreeSet<UserId>> {
        self.store.assigned_user_ids(purchase.id).await
    }

    pub async fn assigned_count(&self, purchase: &AddOnPurchase) -> EntitlementResult<usize> {
        self.store.count_assignments(purchase.id).await
    }

    /// Which of `candidates` hold a seat on the purchase
    pub async fn filter_assigned(
        &self,
        purchase: &AddOnPurchase,
        candidates: &[UserId],
    ) -> EntitlementResult<Vec<UserId>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        self.store.filter_assigned_user_ids(purchase.id, candidates).await
    }

    /// Cached check whether `user_id` holds a seat of `family` on any of `purchases`
    pub async fn holds_seat(
        &self,
        user_id: UserId,
        family: AddOnName,
        purchases: &[AddOnPurchase],
    ) -> EntitlementResult<bool> {
        let key = UserAddOnCacheKey::new(family, user_id);
        if let Some(cached) = self.cache.get(&key).await? {
            return Ok(cached);
        }

        let mut holds = false;
        for purchase in purchases.iter().filter(|p| p.add_on_name == family) {
            if self.store.assignment_exists(purchase.id, user_id).await? {
                holds = true;
                break;
            }
        }

        self.cache.set(&key, holds).await?;
        Ok(holds)
    }

    /// Drop cache entries for `user_ids` in the purchase's add-on family
    pub async fn invalidate(&self, purchase: &AddOnPurchase, user_ids: &[UserId]) -> EntitlementResult<()> {
        let keys: Vec<UserAddOnCacheKey> = user_ids
            .iter()
            .map(|&user_id| UserAddOnCacheKey::new(purchase.add_on_name, user_id))
            .collect();
        self.cache.invalidate(&keys).await
    }
}
