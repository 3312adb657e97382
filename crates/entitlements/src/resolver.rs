//! Entitlement Resolver
//!
//! Answers "which active purchases give resource R access to capability C?".
//!
//! ## Resolution
//! 1. Look the capability up in the registry (unknown capability: no access)
//! 2. Take the add-on names that grant it
//! 3. Derive the namespace scope from the resource
//! 4. Return active purchases of those add-ons inside the scope
//!
//! Scoping never walks the namespace hierarchy: a group sees only purchases
//! it owns, and a project sees its top-level namespace's purchases.

use std::collections::BTreeSet;
use std::sync::Arc;

use seatkeeper_shared::{Deployment, NamespaceId, Project, ProjectId, UserId};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::catalog::AddOnName;
use crate::error::{EntitlementError, EntitlementResult};
use crate::membership::MembershipDirectory;
use crate::purchase::{AddOnPurchase, NamespaceScope, PurchaseQuery};
use crate::registry::CapabilityRegistry;
use crate::store::PurchaseStore;

/// Something that can hold entitlements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// The whole (self-managed) instance
    Instance,
    User(UserId),
    /// A group namespace
    Namespace(NamespaceId),
    Project(Project),
}

impl Resource {
    /// Build a resource from a host-supplied kind string.
    ///
    /// `root_namespace_id` is only read for projects. Any kind other than
    /// `instance`, `user`, `namespace`/`group` or `project` fails with
    /// [`EntitlementError::UnsupportedResource`].
    pub fn from_kind(
        kind: &str,
        id: Option<Uuid>,
        root_namespace_id: Option<Uuid>,
    ) -> EntitlementResult<Self> {
        let require = |value: Option<Uuid>, field: &str| {
            value.ok_or_else(|| {
                EntitlementError::InvalidInput(format!("{} resource requires {}", kind, field))
            })
        };

        match kind.trim().to_ascii_lowercase().as_str() {
            "instance" => Ok(Self::Instance),
            "user" => Ok(Self::User(require(id, "id")?.into())),
            "namespace" | "group" => Ok(Self::Namespace(require(id, "id")?.into())),
            "project" => {
                let root = NamespaceId::from(require(root_namespace_id, "root_namespace_id")?);
                Ok(Self::Project(Project {
                    id: ProjectId::from(require(id, "id")?),
                    namespace_id: root,
                    root_namespace_id: root,
                }))
            }
            _ => Err(EntitlementError::UnsupportedResource(kind.to_string())),
        }
    }
}

/// Where a resource's purchases live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceScope {
    Fixed(NamespaceScope),
    /// Needs the membership directory
    MembershipsOf(UserId),
}

/// Pure scoping rule for a resource on a deployment
pub fn scope_for(resource: &Resource, deployment: Deployment) -> ResourceScope {
    match resource {
        Resource::Instance => ResourceScope::Fixed(NamespaceScope::Instance),
        Resource::Namespace(id) => ResourceScope::Fixed(NamespaceScope::exact(Some(*id))),
        Resource::Project(project) => {
            ResourceScope::Fixed(NamespaceScope::exact(Some(project.root_namespace_id)))
        }
        Resource::User(user) if deployment.is_saas() => ResourceScope::MembershipsOf(*user),
        Resource::User(_) => ResourceScope::Fixed(NamespaceScope::Instance),
    }
}

/// Duo purchases, highest tier first; ties break on name then id
pub fn rank_duo_purchases(mut purchases: Vec<AddOnPurchase>) -> Vec<AddOnPurchase> {
    purchases.retain(|p| p.add_on_name.duo_tier_rank().is_some());
    purchases.sort_by(|a, b| {
        b.add_on_name
            .duo_tier_rank()
            .cmp(&a.add_on_name.duo_tier_rank())
            .then_with(|| a.add_on_name.cmp(&b.add_on_name))
            .then_with(|| a.id.cmp(&b.id))
    });
    purchases
}

#[derive(Clone)]
pub struct EntitlementResolver {
    purchases: Arc<dyn PurchaseStore>,
    registry: Arc<dyn CapabilityRegistry>,
    membership: Arc<dyn MembershipDirectory>,
    deployment: Deployment,
}

impl EntitlementResolver {
    pub fn new(
        purchases: Arc<dyn PurchaseStore>,
        registry: Arc<dyn CapabilityRegistry>,
        membership: Arc<dyn MembershipDirectory>,
        deployment: Deployment,
    ) -> Self {
        Self {
            purchases,
            registry,
            membership,
            deployment,
        }
    }

    /// Active purchases granting `capability` to `resource`
    pub async fn resolve(
        &self,
        capability: &str,
        resource: &Resource,
    ) -> EntitlementResult<Vec<AddOnPurchase>> {
        self.resolve_at(capability, resource, today()).await
    }

    pub async fn resolve_at(
        &self,
        capability: &str,
        resource: &Resource,
        today: Date,
    ) -> EntitlementResult<Vec<AddOnPurchase>> {
        let Some(entry) = self.registry.find_capability(capability) else {
            tracing::debug!(capability = %capability, "Unknown capability, no access");
            return Ok(Vec::new());
        };

        self.active_purchases(entry.known_add_ons(), resource, today)
            .await
    }

    pub async fn exists_for_capability(
        &self,
        capability: &str,
        resource: &Resource,
    ) -> EntitlementResult<bool> {
        Ok(!self.resolve(capability, resource).await?.is_empty())
    }

    /// Active Duo purchases for the resource, highest tier first
    pub async fn resolve_duo(&self, resource: &Resource) -> EntitlementResult<Vec<AddOnPurchase>> {
        self.resolve_duo_at(resource, today()).await
    }

    pub async fn resolve_duo_at(
        &self,
        resource: &Resource,
        today: Date,
    ) -> EntitlementResult<Vec<AddOnPurchase>> {
        let family = AddOnName::all()
            .into_iter()
            .filter(|name| name.duo_tier_rank().is_some())
            .collect();

        let purchases = self.active_purchases(family, resource, today).await?;
        Ok(rank_duo_purchases(purchases))
    }

    /// The single top-ranked Duo purchase (enterprise over pro over core)
    pub async fn highest_duo_tier(
        &self,
        resource: &Resource,
    ) -> EntitlementResult<Option<AddOnPurchase>> {
        Ok(self.resolve_duo(resource).await?.into_iter().next())
    }

    /// Active purchases of one add-on visible to `resource`
    pub async fn purchases_of(
        &self,
        add_on: AddOnName,
        resource: &Resource,
    ) -> EntitlementResult<Vec<AddOnPurchase>> {
        self.active_purchases(BTreeSet::from([add_on]), resource, today())
            .await
    }

    async fn active_purchases(
        &self,
        add_ons: BTreeSet<AddOnName>,
        resource: &Resource,
        today: Date,
    ) -> EntitlementResult<Vec<AddOnPurchase>> {
        if add_ons.is_empty() {
            return Ok(Vec::new());
        }

        let scope = match scope_for(resource, self.deployment) {
            ResourceScope::Fixed(scope) => scope,
            ResourceScope::MembershipsOf(user) => {
                NamespaceScope::In(self.membership.namespaces_for(user).await?)
            }
        };

        let query = PurchaseQuery::new()
            .by_add_on_names(add_ons)
            .in_scope(scope)
            .active(today);

        self.purchases.query_purchases(&query).await
    }
}

fn today() -> Date {
    OffsetDateTime::now_utc().date()
}
