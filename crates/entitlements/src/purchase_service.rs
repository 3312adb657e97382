//! Purchase Service
//!
//! Creates and renews add-on purchases, enforcing the record invariants:
//! - `quantity` within `1..=i32::MAX`
//! - `purchase_xid` present and at most 255 characters
//! - `started_at`, `expires_on` and `organization_id` present
//! - one purchase per `(namespace, add-on)` slot
//! - on SaaS, a namespace that is a top-level group
//!
//! Every violated field is reported at once through
//! [`EntitlementError::Validation`].

use std::collections::BTreeSet;
use std::sync::Arc;

use seatkeeper_shared::{Deployment, NamespaceId, PurchaseId};
use time::OffsetDateTime;

use crate::assignments::SeatAssignmentService;
use crate::catalog::{AddOnCatalog, AddOnName};
use crate::error::{EntitlementError, EntitlementResult, ValidationErrorKind, ValidationErrors};
use crate::membership::NamespaceDirectory;
use crate::purchase::{
    AddOnPurchase, PurchaseParams, PurchaseQuery, PurchaseUpdate, PURCHASE_XID_MAX_LENGTH,
};
use crate::store::PurchaseStore;

const QUANTITY_MIN: i64 = 1;
const QUANTITY_MAX: i64 = i32::MAX as i64;

#[derive(Clone)]
pub struct PurchaseService {
    catalog: AddOnCatalog,
    purchases: Arc<dyn PurchaseStore>,
    assignments: SeatAssignmentService,
    namespaces: Arc<dyn NamespaceDirectory>,
    deployment: Deployment,
}

impl PurchaseService {
    pub fn new(
        catalog: AddOnCatalog,
        purchases: Arc<dyn PurchaseStore>,
        assignments: SeatAssignmentService,
        namespaces: Arc<dyn NamespaceDirectory>,
        deployment: Deployment,
    ) -> Self {
        Self {
            catalog,
            purchases,
            assignments,
            namespaces,
            deployment,
        }
    }

    /// Record a completed purchase
    pub async fn create(&self, params: PurchaseParams) -> EntitlementResult<AddOnPurchase> {
        let mut errors = ValidationErrors::new();

        validate_quantity(params.quantity, &mut errors);
        validate_purchase_xid(&params.purchase_xid, &mut errors);
        if params.started_at.is_none() {
            errors.add("started_at", ValidationErrorKind::Blank);
        }
        if params.expires_on.is_none() {
            errors.add("expires_on", ValidationErrorKind::Blank);
        }
        if params.organization_id.is_none() {
            errors.add("organization_id", ValidationErrorKind::Blank);
        }
        self.validate_namespace(params.namespace_id, &mut errors)
            .await?;

        if self
            .purchases
            .find_purchase_for_slot(params.namespace_id, params.add_on)
            .await?
            .is_some()
        {
            errors.add("add_on", ValidationErrorKind::Taken);
        }

        errors.into_result()?;

        let (Some(started_at), Some(expires_on), Some(organization_id)) =
            (params.started_at, params.expires_on, params.organization_id)
        else {
            return Err(EntitlementError::Internal(
                "validated purchase missing required fields".to_string(),
            ));
        };

        let add_on = self.catalog.find_or_create(params.add_on).await?;
        let now = OffsetDateTime::now_utc();
        let purchase = AddOnPurchase {
            id: PurchaseId::new(),
            add_on_id: add_on.id,
            add_on_name: add_on.name,
            namespace_id: params.namespace_id,
            organization_id,
            // Range checked above
            quantity: i32::try_from(params.quantity).unwrap_or(i32::MAX),
            purchase_xid: params.purchase_xid.trim().to_string(),
            started_at,
            expires_on,
            trial: params.trial,
            last_assigned_users_refreshed_at: None,
            created_at: now,
            updated_at: now,
        };

        match self.purchases.insert_purchase(&purchase).await {
            Ok(()) => {}
            // Lost a race for the slot
            Err(EntitlementError::AlreadyExists(_)) => {
                let mut errors = ValidationErrors::new();
                errors.add("add_on", ValidationErrorKind::Taken);
                return Err(EntitlementError::Validation(errors));
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            add_on_purchase = %purchase.id,
            add_on = %purchase.add_on_name,
            namespace_id = ?purchase.namespace_id,
            quantity = purchase.quantity,
            expires_on = %purchase.expires_on,
            trial = purchase.trial,
            "Add-on purchase created"
        );

        Ok(purchase)
    }

    /// Renewal or quantity change. The namespace and add-on never change.
    pub async fn update(
        &self,
        id: PurchaseId,
        update: PurchaseUpdate,
    ) -> EntitlementResult<AddOnPurchase> {
        let mut purchase = self.find(id).await?;
        if update.is_empty() {
            return Ok(purchase);
        }

        let mut errors = ValidationErrors::new();
        if let Some(quantity) = update.quantity {
            validate_quantity(quantity, &mut errors);
        }
        if let Some(xid) = &update.purchase_xid {
            validate_purchase_xid(xid, &mut errors);
        }
        errors.into_result()?;

        if let Some(quantity) = update.quantity {
            purchase.quantity = i32::try_from(quantity).unwrap_or(i32::MAX);
        }
        if let Some(xid) = update.purchase_xid {
            purchase.purchase_xid = xid.trim().to_string();
        }
        if let Some(started_at) = update.started_at {
            purchase.started_at = started_at;
        }
        if let Some(expires_on) = update.expires_on {
            purchase.expires_on = expires_on;
        }
        if let Some(trial) = update.trial {
            purchase.trial = trial;
        }
        purchase.updated_at = OffsetDateTime::now_utc();

        self.purchases.update_purchase(&purchase).await?;

        tracing::info!(
            add_on_purchase = %purchase.id,
            add_on = %purchase.add_on_name,
            quantity = purchase.quantity,
            expires_on = %purchase.expires_on,
            trial = purchase.trial,
            "Add-on purchase updated"
        );

        Ok(purchase)
    }

    /// Hard delete. Seats go with the purchase and their cache entries are dropped.
    pub async fn destroy(&self, purchase: &AddOnPurchase) -> EntitlementResult<bool> {
        let holders: Vec<_> = self
            .assignments
            .assigned_user_ids(purchase)
            .await?
            .into_iter()
            .collect();

        let existed = self.purchases.delete_purchase(purchase.id).await?;
        self.assignments.invalidate(purchase, &holders).await?;

        if existed {
            tracing::info!(
                add_on_purchase = %purchase.id,
                add_on = %purchase.add_on_name,
                namespace_id = ?purchase.namespace_id,
                released_seats = holders.len(),
                "Add-on purchase destroyed"
            );
        }

        Ok(existed)
    }

    pub async fn find(&self, id: PurchaseId) -> EntitlementResult<AddOnPurchase> {
        self.purchases
            .find_purchase(id)
            .await?
            .ok_or_else(|| EntitlementError::NotFound(format!("Add-on purchase {}", id)))
    }

    pub async fn query(&self, query: &PurchaseQuery) -> EntitlementResult<Vec<AddOnPurchase>> {
        self.purchases.query_purchases(query).await
    }

    pub async fn distinct_add_on_names(&self) -> EntitlementResult<BTreeSet<AddOnName>> {
        self.purchases.distinct_add_on_names().await
    }

    pub async fn distinct_namespace_ids(&self) -> EntitlementResult<BTreeSet<NamespaceId>> {
        self.purchases.distinct_namespace_ids().await
    }

    /// On SaaS the namespace must exist and be a top-level group
    async fn validate_namespace(
        &self,
        namespace_id: Option<NamespaceId>,
        errors: &mut ValidationErrors,
    ) -> EntitlementResult<()> {
        if !self.deployment.is_saas() {
            return Ok(());
        }

        let Some(namespace_id) = namespace_id else {
            errors.add("namespace", ValidationErrorKind::Blank);
            return Ok(());
        };

        let namespace = self
            .namespaces
            .find_namespace(namespace_id)
            .await?
            .ok_or_else(|| EntitlementError::NotFound(format!("Namespace {}", namespace_id)))?;

        if !namespace.is_top_level_group() {
            errors.add("namespace", ValidationErrorKind::NamespaceTypeMismatch);
        }

        Ok(())
    }
}

fn validate_quantity(quantity: i64, errors: &mut ValidationErrors) {
    if !(QUANTITY_MIN..=QUANTITY_MAX).contains(&quantity) {
        errors.add(
            "quantity",
            ValidationErrorKind::OutOfRange {
                min: QUANTITY_MIN,
                max: QUANTITY_MAX,
            },
        );
    }
}

fn validate_purchase_xid(xid: &str, errors: &mut ValidationErrors) {
    let xid = xid.trim();
    if xid.is_empty() {
        errors.add("purchase_xid", ValidationErrorKind::Blank);
    } else if xid.chars().count() > PURCHASE_XID_MAX_LENGTH {
        errors.add(
            "purchase_xid",
            ValidationErrorKind::TooLong {
                max: PURCHASE_XID_MAX_LENGTH,
            },
        );
    }
}
