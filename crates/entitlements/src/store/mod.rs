//! Storage seams for add-ons, purchases and seat assignments
//!
//! Two backends implement every trait: [`memory::InMemoryStore`] for tests and
//! embedded use, and [`postgres::PgStore`] for production.

pub mod memory;
pub mod postgres;

use std::collections::BTreeSet;

use async_trait::async_trait;
use seatkeeper_shared::{NamespaceId, PurchaseId, UserId};
use time::{Duration, OffsetDateTime};

use crate::catalog::{AddOn, AddOnName};
use crate::error::EntitlementResult;
use crate::purchase::{AddOnPurchase, PurchaseQuery};

/// Add-on catalog persistence
#[async_trait]
pub trait AddOnStore: Send + Sync {
    async fn find_add_on_by_name(&self, name: AddOnName) -> EntitlementResult<Option<AddOn>>;

    /// Fails with `AlreadyExists` when the (case-insensitive) name is taken
    async fn insert_add_on(&self, add_on: &AddOn) -> EntitlementResult<AddOn>;

    async fn update_add_on_description(
        &self,
        name: AddOnName,
        description: &str,
    ) -> EntitlementResult<Option<AddOn>>;

    async fn list_add_ons(&self) -> EntitlementResult<Vec<AddOn>>;
}

/// Purchase persistence
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    /// Fails with `AlreadyExists` when `(namespace_id, add_on_id)` is taken
    async fn insert_purchase(&self, purchase: &AddOnPurchase) -> EntitlementResult<()>;

    async fn update_purchase(&self, purchase: &AddOnPurchase) -> EntitlementResult<()>;

    async fn find_purchase(&self, id: PurchaseId) -> EntitlementResult<Option<AddOnPurchase>>;

    /// The purchase occupying the `(namespace_id, add_on)` slot, if any
    async fn find_purchase_for_slot(
        &self,
        namespace_id: Option<NamespaceId>,
        add_on: AddOnName,
    ) -> EntitlementResult<Option<AddOnPurchase>>;

    async fn query_purchases(&self, query: &PurchaseQuery) -> EntitlementResult<Vec<AddOnPurchase>>;

    /// Distinct add-on names present across all purchases
    async fn distinct_add_on_names(&self) -> EntitlementResult<BTreeSet<AddOnName>>;

    /// Distinct non-null namespace ids present across all purchases
    async fn distinct_namespace_ids(&self) -> EntitlementResult<BTreeSet<NamespaceId>>;

    /// Purchases of `families` whose assigned users are stale, most overdue first
    async fn refresh_candidates(
        &self,
        families: &[AddOnName],
        now: OffsetDateTime,
        threshold: Duration,
        limit: usize,
    ) -> EntitlementResult<Vec<AddOnPurchase>>;

    async fn mark_assigned_users_refreshed(
        &self,
        id: PurchaseId,
        at: OffsetDateTime,
    ) -> EntitlementResult<()>;

    /// Hard delete; seat assignments go with it. Returns whether a row existed.
    async fn delete_purchase(&self, id: PurchaseId) -> EntitlementResult<bool>;
}

/// Seat assignment persistence
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Returns `false` if the pairing already existed
    async fn insert_assignment(
        &self,
        purchase_id: PurchaseId,
        user_id: UserId,
    ) -> EntitlementResult<bool>;

    /// Returns `false` if there was nothing to delete
    async fn delete_assignment(
        &self,
        purchase_id: PurchaseId,
        user_id: UserId,
    ) -> EntitlementResult<bool>;

    async fn assignment_exists(
        &self,
        purchase_id: PurchaseId,
        user_id: UserId,
    ) -> EntitlementResult<bool>;

    async fn assigned_user_ids(
        &self,
        purchase_id: PurchaseId,
    ) -> EntitlementResult<BTreeSet<UserId>>;

    async fn count_assignments(&self, purchase_id: PurchaseId) -> EntitlementResult<usize>;

    /// The subset of `candidates` holding a seat on the purchase, ascending
    async fn filter_assigned_user_ids(
        &self,
        purchase_id: PurchaseId,
        candidates: &[UserId],
    ) -> EntitlementResult<Vec<UserId>>;

    /// Returns the number of rows removed
    async fn delete_assignments(
        &self,
        purchase_id: PurchaseId,
        user_ids: &[UserId],
    ) -> EntitlementResult<usize>;
}
