//! Add-on catalog
//!
//! The closed set of purchasable capability bundles. Each add-on knows whether
//! its seats are individually assignable, whether its assignments are
//! refreshed on a schedule, and where it ranks inside the Duo family.
//!
//! ## Catalog
//! - `duo_core`: flat entitlement, no seats
//! - `duo_pro`: per-seat
//! - `duo_enterprise`: per-seat, supersedes Pro
//! - `duo_amazon_q`: per-seat
//! - `duo_self_hosted`: per-seat, self-hosted models
//! - `product_analytics`: flat entitlement, no seats

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use seatkeeper_shared::AddOnId;
use time::OffsetDateTime;

use crate::error::{EntitlementError, EntitlementResult};
use crate::store::AddOnStore;

/// Supported add-on names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddOnName {
    DuoCore,
    DuoPro,
    DuoEnterprise,
    DuoAmazonQ,
    DuoSelfHosted,
    ProductAnalytics,
}

impl AddOnName {
    pub fn all() -> [Self; 6] {
        [
            Self::DuoCore,
            Self::DuoPro,
            Self::DuoEnterprise,
            Self::DuoAmazonQ,
            Self::DuoSelfHosted,
            Self::ProductAnalytics,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuoCore => "duo_core",
            Self::DuoPro => "duo_pro",
            Self::DuoEnterprise => "duo_enterprise",
            Self::DuoAmazonQ => "duo_amazon_q",
            Self::DuoSelfHosted => "duo_self_hosted",
            Self::ProductAnalytics => "product_analytics",
        }
    }

    /// Get the description seeded into the catalog for this add-on
    pub fn default_description(&self) -> &'static str {
        match self {
            Self::DuoCore => "Core AI features included with Premium and Ultimate",
            Self::DuoPro => "AI code suggestions and chat, per seat",
            Self::DuoEnterprise => "Full AI feature set, per seat",
            Self::DuoAmazonQ => "Amazon Q agent integration, per seat",
            Self::DuoSelfHosted => "AI features backed by self-hosted models, per seat",
            Self::ProductAnalytics => "Product analytics event storage",
        }
    }

    /// Whether individual users consume seats of this add-on
    pub fn is_seat_assignable(&self) -> bool {
        !matches!(self, Self::DuoCore | Self::ProductAnalytics)
    }

    /// Whether the refresh scheduler recomputes assigned users for this add-on
    pub fn is_refreshable(&self) -> bool {
        matches!(
            self,
            Self::DuoPro | Self::DuoEnterprise | Self::DuoAmazonQ | Self::DuoSelfHosted
        )
    }

    /// Rank inside the Duo tier ladder (higher supersedes lower).
    /// `None` for add-ons outside the ladder.
    pub fn duo_tier_rank(&self) -> Option<u8> {
        match self {
            Self::DuoCore => Some(0),
            Self::DuoPro => Some(1),
            Self::DuoEnterprise | Self::DuoAmazonQ => Some(2),
            Self::DuoSelfHosted | Self::ProductAnalytics => None,
        }
    }

    /// Family segment of per-user cache keys
    pub fn cache_family(&self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for AddOnName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AddOnName {
    type Err = EntitlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "duo_core" => Ok(Self::DuoCore),
            "duo_pro" => Ok(Self::DuoPro),
            "duo_enterprise" => Ok(Self::DuoEnterprise),
            "duo_amazon_q" => Ok(Self::DuoAmazonQ),
            "duo_self_hosted" => Ok(Self::DuoSelfHosted),
            "product_analytics" => Ok(Self::ProductAnalytics),
            _ => Err(EntitlementError::InvalidInput(format!(
                "Unknown add-on: {}",
                s
            ))),
        }
    }
}

/// Add-on catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOn {
    pub id: AddOnId,
    pub name: AddOnName,
    pub description: String,
    pub seat_assignable: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl AddOn {
    pub fn new(name: AddOnName) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: AddOnId::new(),
            name,
            description: name.default_description().to_string(),
            seat_assignable: name.is_seat_assignable(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Catalog service: bootstrap, lookup, lazy creation
#[derive(Clone)]
pub struct AddOnCatalog {
    store: Arc<dyn AddOnStore>,
}

impl AddOnCatalog {
    pub fn new(store: Arc<dyn AddOnStore>) -> Self {
        Self { store }
    }

    /// Create every known add-on that is missing. Safe to call repeatedly.
    pub async fn bootstrap(&self) -> EntitlementResult<Vec<AddOn>> {
        let mut add_ons = Vec::with_capacity(AddOnName::all().len());
        for name in AddOnName::all() {
            add_ons.push(self.find_or_create(name).await?);
        }

        tracing::info!(count = add_ons.len(), "Add-on catalog bootstrapped");

        Ok(add_ons)
    }

    pub async fn find_by_name(&self, name: AddOnName) -> EntitlementResult<Option<AddOn>> {
        self.store.find_add_on_by_name(name).await
    }

    /// Lookup by a raw (case-insensitive) name
    pub async fn find_by_raw_name(&self, name: &str) -> EntitlementResult<Option<AddOn>> {
        let name: AddOnName = name.parse()?;
        self.find_by_name(name).await
    }

    /// Return the catalog entry, creating it on first use
    pub async fn find_or_create(&self, name: AddOnName) -> EntitlementResult<AddOn> {
        if let Some(existing) = self.store.find_add_on_by_name(name).await? {
            return Ok(existing);
        }

        match self.store.insert_add_on(&AddOn::new(name)).await {
            Ok(add_on) => {
                tracing::info!(add_on = %name, add_on_id = %add_on.id, "Created add-on");
                Ok(add_on)
            }
            // Another worker created it first
            Err(EntitlementError::AlreadyExists(_)) => self
                .store
                .find_add_on_by_name(name)
                .await?
                .ok_or_else(|| EntitlementError::NotFound(format!("Add-on {}", name))),
            Err(e) => Err(e),
        }
    }

    /// Description is the only mutable attribute
    pub async fn update_description(
        &self,
        name: AddOnName,
        description: &str,
    ) -> EntitlementResult<AddOn> {
        self.store
            .update_add_on_description(name, description)
            .await?
            .ok_or_else(|| EntitlementError::NotFound(format!("Add-on {}", name)))
    }

    pub async fn list(&self) -> EntitlementResult<Vec<AddOn>> {
        self.store.list_add_ons().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    #[test]
    fn test_add_on_name_parse_is_case_insensitive() {
        assert_eq!("DUO_PRO".parse::<AddOnName>().unwrap(), AddOnName::DuoPro);
        assert_eq!(
            " Duo_Enterprise ".parse::<AddOnName>().unwrap(),
            AddOnName::DuoEnterprise
        );
        assert!("duo_platinum".parse::<AddOnName>().is_err());
        // Capability names are not add-on names
        assert!("code_suggestions".parse::<AddOnName>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_as_str() {
        for name in AddOnName::all() {
            assert_eq!(name.to_string().parse::<AddOnName>().unwrap(), name);
        }
    }

    #[test]
    fn test_seat_assignable_and_refreshable() {
        assert!(!AddOnName::DuoCore.is_seat_assignable());
        assert!(!AddOnName::DuoCore.is_refreshable());
        assert!(!AddOnName::ProductAnalytics.is_refreshable());
        assert!(AddOnName::DuoSelfHosted.is_refreshable());
        assert!(AddOnName::DuoAmazonQ.is_seat_assignable());
    }

    #[test]
    fn test_enterprise_supersedes_pro() {
        assert!(AddOnName::DuoEnterprise.duo_tier_rank() > AddOnName::DuoPro.duo_tier_rank());
        assert!(AddOnName::DuoPro.duo_tier_rank() > AddOnName::DuoCore.duo_tier_rank());
        assert_eq!(AddOnName::ProductAnalytics.duo_tier_rank(), None);
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let catalog = AddOnCatalog::new(Arc::new(InMemoryStore::new()));

        let first = catalog.bootstrap().await.unwrap();
        let second = catalog.bootstrap().await.unwrap();

        assert_eq!(first.len(), AddOnName::all().len());
        let first_ids: Vec<_> = first.iter().map(|a| a.id).collect();
        let second_ids: Vec<_> = second.iter().map(|a| a.id).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[tokio::test]
    async fn test_update_description_only() {
        let catalog = AddOnCatalog::new(Arc::new(InMemoryStore::new()));
        let created = catalog.find_or_create(AddOnName::DuoPro).await.unwrap();

        let updated = catalog
            .update_description(AddOnName::DuoPro, "Seats for AI assistance")
            .await
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.description, "Seats for AI assistance");
        assert!(updated.seat_assignable);
    }

    #[tokio::test]
    async fn test_update_description_missing_add_on() {
        let catalog = AddOnCatalog::new(Arc::new(InMemoryStore::new()));
        let result = catalog
            .update_description(AddOnName::DuoCore, "anything")
            .await;
        assert!(matches!(result, Err(EntitlementError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_by_raw_name() {
        let catalog = AddOnCatalog::new(Arc::new(InMemoryStore::new()));
        catalog.find_or_create(AddOnName::DuoAmazonQ).await.unwrap();

        let found = catalog.find_by_raw_name("Duo_Amazon_Q").await.unwrap();
        assert_eq!(found.map(|a| a.name), Some(AddOnName::DuoAmazonQ));
    }
}
