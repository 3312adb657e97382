//! Add-on purchases
//!
//! A purchase grants an add-on to a namespace (or, with no namespace, to the
//! whole self-managed instance) for a date range.
//!
//! ## Activity
//! Only `expires_on` gates activity: a purchase is active while
//! `expires_on >= today`, including future-dated purchases whose `started_at`
//! has not arrived yet. `trial` is an independent flag.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use seatkeeper_shared::{AddOnId, NamespaceId, OrganizationId, PurchaseId};
use time::{Date, Duration, OffsetDateTime};

use crate::catalog::AddOnName;

/// Maximum length of the external purchase reference
pub const PURCHASE_XID_MAX_LENGTH: usize = 255;

/// Expired purchases are hard-deleted this long after `expires_on`
pub const CLEANUP_DELAY_PERIOD: Duration = Duration::days(14);

/// Add-on purchase record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOnPurchase {
    pub id: PurchaseId,
    pub add_on_id: AddOnId,
    pub add_on_name: AddOnName,
    /// `None` means self-managed / instance scope
    pub namespace_id: Option<NamespaceId>,
    pub organization_id: OrganizationId,
    pub quantity: i32,
    pub purchase_xid: String,
    pub started_at: Date,
    pub expires_on: Date,
    pub trial: bool,
    pub last_assigned_users_refreshed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl AddOnPurchase {
    pub fn is_active(&self, today: Date) -> bool {
        self.expires_on >= today
    }

    pub fn is_expired(&self, today: Date) -> bool {
        !self.is_active(today)
    }

    /// Expired for longer than `delay`
    pub fn is_ready_for_cleanup(&self, today: Date, delay: Duration) -> bool {
        today
            .checked_sub(delay)
            .is_some_and(|cutoff| self.expires_on < cutoff)
    }

    pub fn is_self_managed(&self) -> bool {
        self.namespace_id.is_none()
    }

    /// Whether the assigned-user set is due for recomputation
    pub fn needs_assigned_users_refresh(&self, now: OffsetDateTime, threshold: Duration) -> bool {
        match self.last_assigned_users_refreshed_at {
            None => true,
            Some(refreshed_at) => now - refreshed_at > threshold,
        }
    }
}

/// Activity filter applied relative to a reference date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Active { today: Date },
    Expired { today: Date },
    ReadyForCleanup { today: Date, delay: Duration },
}

impl Activity {
    pub fn matches(&self, purchase: &AddOnPurchase) -> bool {
        match *self {
            Self::Active { today } => purchase.is_active(today),
            Self::Expired { today } => purchase.is_expired(today),
            Self::ReadyForCleanup { today, delay } => purchase.is_ready_for_cleanup(today, delay),
        }
    }
}

/// Namespace restriction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NamespaceScope {
    #[default]
    Any,
    /// Only purchases without a namespace
    Instance,
    /// Only purchases owned by one of these namespaces
    In(BTreeSet<NamespaceId>),
}

impl NamespaceScope {
    /// Exact match; `None` means the explicit "no namespace" match
    pub fn exact(namespace_id: Option<NamespaceId>) -> Self {
        match namespace_id {
            None => Self::Instance,
            Some(id) => Self::In(BTreeSet::from([id])),
        }
    }

    pub fn matches(&self, namespace_id: Option<NamespaceId>) -> bool {
        match (self, namespace_id) {
            (Self::Any, _) => true,
            (Self::Instance, ns) => ns.is_none(),
            (Self::In(_), None) => false,
            (Self::In(ids), Some(id)) => ids.contains(&id),
        }
    }

    /// A scope that can never match anything
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::In(ids) if ids.is_empty())
    }
}

/// Composable purchase filter. Every set criterion must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurchaseQuery {
    pub add_on_names: Option<BTreeSet<AddOnName>>,
    pub namespace: NamespaceScope,
    pub activity: Option<Activity>,
    pub trial: Option<bool>,
}

impl PurchaseQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_add_on_name(self, name: AddOnName) -> Self {
        self.by_add_on_names([name])
    }

    pub fn by_add_on_names(mut self, names: impl IntoIterator<Item = AddOnName>) -> Self {
        self.add_on_names = Some(names.into_iter().collect());
        self
    }

    pub fn by_namespace(mut self, namespace_id: Option<NamespaceId>) -> Self {
        self.namespace = NamespaceScope::exact(namespace_id);
        self
    }

    pub fn in_scope(mut self, scope: NamespaceScope) -> Self {
        self.namespace = scope;
        self
    }

    pub fn for_self_managed(self) -> Self {
        self.in_scope(NamespaceScope::Instance)
    }

    pub fn active(mut self, today: Date) -> Self {
        self.activity = Some(Activity::Active { today });
        self
    }

    pub fn expired(mut self, today: Date) -> Self {
        self.activity = Some(Activity::Expired { today });
        self
    }

    pub fn ready_for_cleanup(mut self, today: Date, delay: Duration) -> Self {
        self.activity = Some(Activity::ReadyForCleanup { today, delay });
        self
    }

    pub fn trial(mut self) -> Self {
        self.trial = Some(true);
        self
    }

    pub fn non_trial(mut self) -> Self {
        self.trial = Some(false);
        self
    }

    pub fn matches(&self, purchase: &AddOnPurchase) -> bool {
        self.add_on_names
            .as_ref()
            .map_or(true, |names| names.contains(&purchase.add_on_name))
            && self.namespace.matches(purchase.namespace_id)
            && self.activity.map_or(true, |a| a.matches(purchase))
            && self.trial.map_or(true, |t| purchase.trial == t)
    }

    /// Whether the query is known to return nothing without touching storage
    pub fn is_unsatisfiable(&self) -> bool {
        self.namespace.is_empty() || self.add_on_names.as_ref().is_some_and(|n| n.is_empty())
    }
}

/// Input for creating a purchase (a completed billing event)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseParams {
    pub add_on: AddOnName,
    pub namespace_id: Option<NamespaceId>,
    pub organization_id: Option<OrganizationId>,
    pub quantity: i64,
    pub purchase_xid: String,
    pub started_at: Option<Date>,
    pub expires_on: Option<Date>,
    #[serde(default)]
    pub trial: bool,
}

/// Renewal or quantity change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseUpdate {
    pub quantity: Option<i64>,
    pub purchase_xid: Option<String>,
    pub started_at: Option<Date>,
    pub expires_on: Option<Date>,
    pub trial: Option<bool>,
}

impl PurchaseUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
