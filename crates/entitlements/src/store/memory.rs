//! In-memory storage backend
//!
//! One lock guards add-ons, purchases and assignments together so that
//! deleting a purchase cascades to its seats atomically.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use seatkeeper_shared::{AddOnId, NamespaceId, PurchaseId, UserId};
use time::{Duration, OffsetDateTime};

use super::{AddOnStore, AssignmentStore, PurchaseStore};
use crate::catalog::{AddOn, AddOnName};
use crate::error::{EntitlementError, EntitlementResult};
use crate::purchase::{AddOnPurchase, PurchaseQuery};
use crate::refresh::select_candidates;

#[derive(Default)]
struct State {
    add_ons: HashMap<AddOnId, AddOn>,
    // BTreeMap keeps listing order stable across runs
    purchases: BTreeMap<PurchaseId, AddOnPurchase>,
    assignments: HashMap<PurchaseId, BTreeSet<UserId>>,
}

/// Thread-safe in-memory store
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> EntitlementResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| EntitlementError::Internal("store lock poisoned".to_string()))
    }

    fn write(&self) -> EntitlementResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| EntitlementError::Internal("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl AddOnStore for InMemoryStore {
    async fn find_add_on_by_name(&self, name: AddOnName) -> EntitlementResult<Option<AddOn>> {
        let state = self.read()?;
        Ok(state.add_ons.values().find(|a| a.name == name).cloned())
    }

    async fn insert_add_on(&self, add_on: &AddOn) -> EntitlementResult<AddOn> {
        let mut state = self.write()?;
        if state.add_ons.values().any(|a| a.name == add_on.name) {
            return Err(EntitlementError::AlreadyExists(format!(
                "Add-on {}",
                add_on.name
            )));
        }
        state.add_ons.insert(add_on.id, add_on.clone());
        Ok(add_on.clone())
    }

    async fn update_add_on_description(
        &self,
        name: AddOnName,
        description: &str,
    ) -> EntitlementResult<Option<AddOn>> {
        let mut state = self.write()?;
        let Some(add_on) = state.add_ons.values_mut().find(|a| a.name == name) else {
            return Ok(None);
        };
        add_on.description = description.to_string();
        add_on.updated_at = OffsetDateTime::now_utc();
        Ok(Some(add_on.clone()))
    }

    async fn list_add_ons(&self) -> EntitlementResult<Vec<AddOn>> {
        let state = self.read()?;
        let mut add_ons: Vec<AddOn> = state.add_ons.values().cloned().collect();
        add_ons.sort_by_key(|a| a.name);
        Ok(add_ons)
    }
}

#[async_trait]
impl PurchaseStore for InMemoryStore {
    async fn insert_purchase(&self, purchase: &AddOnPurchase) -> EntitlementResult<()> {
        let mut state = self.write()?;
        let taken = state.purchases.values().any(|p| {
            p.namespace_id == purchase.namespace_id && p.add_on_id == purchase.add_on_id
        });
        if taken || state.purchases.contains_key(&purchase.id) {
            return Err(EntitlementError::AlreadyExists(format!(
                "Add-on purchase for {} in namespace {:?}",
                purchase.add_on_name, purchase.namespace_id
            )));
        }
        state.purchases.insert(purchase.id, purchase.clone());
        Ok(())
    }

    async fn update_purchase(&self, purchase: &AddOnPurchase) -> EntitlementResult<()> {
        let mut state = self.write()?;
        match state.purchases.get_mut(&purchase.id) {
            Some(existing) => {
                *existing = purchase.clone();
                Ok(())
            }
            None => Err(EntitlementError::NotFound(format!(
                "Add-on purchase {}",
                purchase.id
            ))),
        }
    }

    async fn find_purchase(&self, id: PurchaseId) -> EntitlementResult<Option<AddOnPurchase>> {
        Ok(self.read()?.purchases.get(&id).cloned())
    }

    async fn find_purchase_for_slot(
        &self,
        namespace_id: Option<NamespaceId>,
        add_on: AddOnName,
    ) -> EntitlementResult<Option<AddOnPurchase>> {
        let state = self.read()?;
        Ok(state
            .purchases
            .values()
            .find(|p| p.namespace_id == namespace_id && p.add_on_name == add_on)
            .cloned())
    }

    async fn query_purchases(&self, query: &PurchaseQuery) -> EntitlementResult<Vec<AddOnPurchase>> {
        if query.is_unsatisfiable() {
            return Ok(Vec::new());
        }
        let state = self.read()?;
        Ok(state
            .purchases
            .values()
            .filter(|p| query.matches(p))
            .cloned()
            .collect())
    }

    async fn distinct_add_on_names(&self) -> EntitlementResult<BTreeSet<AddOnName>> {
        let state = self.read()?;
        Ok(state.purchases.values().map(|p| p.add_on_name).collect())
    }

    async fn distinct_namespace_ids(&self) -> EntitlementResult<BTreeSet<NamespaceId>> {
        let state = self.read()?;
        Ok(state
            .purchases
            .values()
            .filter_map(|p| p.namespace_id)
            .collect())
    }

    async fn refresh_candidates(
        &self,
        families: &[AddOnName],
        now: OffsetDateTime,
        threshold: Duration,
        limit: usize,
    ) -> EntitlementResult<Vec<AddOnPurchase>> {
        let state = self.read()?;
        let eligible = state
            .purchases
            .values()
            .filter(|p| families.contains(&p.add_on_name));
        Ok(select_candidates(eligible, now, threshold, limit))
    }

    async fn mark_assigned_users_refreshed(
        &self,
        id: PurchaseId,
        at: OffsetDateTime,
    ) -> EntitlementResult<()> {
        let mut state = self.write()?;
        let purchase = state
            .purchases
            .get_mut(&id)
            .ok_or_else(|| EntitlementError::NotFound(format!("Add-on purchase {}", id)))?;
        purchase.last_assigned_users_refreshed_at = Some(at);
        Ok(())
    }

    async fn delete_purchase(&self, id: PurchaseId) -> EntitlementResult<bool> {
        let mut state = self.write()?;
        let existed = state.purchases.remove(&id).is_some();
        state.assignments.remove(&id);
        Ok(existed)
    }
}

#[async_trait]
impl AssignmentStore for InMemoryStore {
    async fn insert_assignment(
        &self,
        purchase_id: PurchaseId,
        user_id: UserId,
    ) -> EntitlementResult<bool> {
        let mut state = self.write()?;
        if !state.purchases.contains_key(&purchase_id) {
            return Err(EntitlementError::NotFound(format!(
                "Add-on purchase {}",
                purchase_id
            )));
        }
        Ok(state
            .assignments
            .entry(purchase_id)
            .or_default()
            .insert(user_id))
    }

    async fn delete_assignment(
        &self,
        purchase_id: PurchaseId,
        user_id: UserId,
    ) -> EntitlementResult<bool> {
        let mut state = self.write()?;
        Ok(state
            .assignments
            .get_mut(&purchase_id)
            .is_some_and(|users| users.remove(&user_id)))
    }

    async fn assignment_exists(
        &self,
        purchase_id: PurchaseId,
        user_id: UserId,
    ) -> EntitlementResult<bool> {
        let state = self.read()?;
        Ok(state
            .assignments
            .get(&purchase_id)
            .is_some_and(|users| users.contains(&user_id)))
    }

    async fn assigned_user_ids(&self, purchase_id: PurchaseId) -> EntitlementResult<BTreeSet<UserId>> {
        let state = self.read()?;
        Ok(state
            .assignments
            .get(&purchase_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn count_assignments(&self, purchase_id: PurchaseId) -> EntitlementResult<usize> {
        let state = self.read()?;
        Ok(state.assignments.get(&purchase_id).map_or(0, |u| u.len()))
    }

    async fn filter_assigned_user_ids(
        &self,
        purchase_id: PurchaseId,
        candidates: &[UserId],
    ) -> EntitlementResult<Vec<UserId>> {
        let state = self.read()?;
        let Some(users) = state.assignments.get(&purchase_id) else {
            return Ok(Vec::new());
        };
        let wanted: BTreeSet<&UserId> = candidates.iter().collect();
        Ok(users.iter().filter(|u| wanted.contains(u)).copied().collect())
    }

    async fn delete_assignments(
        &self,
        purchase_id: PurchaseId,
        user_ids: &[UserId],
    ) -> EntitlementResult<usize> {
        let mut state = self.write()?;
        let Some(users) = state.assignments.get_mut(&purchase_id) else {
            return Ok(0);
        };
        Ok(user_ids.iter().filter(|u| users.remove(*u)).count())
    }
}
