//! Seatkeeper entitlement engine
//!
//! Resolves which add-on purchases grant a resource access to a capability,
//! tracks per-user seat assignments, and keeps those assignments in line with
//! membership through scheduled refresh and cleanup.

pub mod assignments;
pub mod cache;
pub mod catalog;
pub mod cleanup;
pub mod engine;
pub mod error;
pub mod lease;
pub mod membership;
pub mod purchase;
pub mod purchase_service;
pub mod purge;
pub mod refresh;
pub mod registry;
pub mod resolver;
pub mod settings;
pub mod store;

pub use assignments::SeatAssignmentService;
pub use cache::{InMemoryUserCache, RedisUserCache, UserAddOnCacheKey, UserEntitlementCache};
pub use catalog::{AddOn, AddOnCatalog, AddOnName};
pub use cleanup::{CleanupProgress, EligibilityCleanupService};
pub use engine::{Backends, Collaborators, Engine};
pub use error::{
    EntitlementError, EntitlementResult, FieldError, ValidationErrorKind, ValidationErrors,
};
pub use lease::{ExclusiveLease, InMemoryLease, LeaseKey, LeaseToken, RedisLease};
pub use membership::{EligibleUsersFinder, InMemoryDirectory, MembershipDirectory, NamespaceDirectory};
pub use purchase::{
    AddOnPurchase, NamespaceScope, PurchaseParams, PurchaseQuery, PurchaseUpdate,
    CLEANUP_DELAY_PERIOD,
};
pub use purchase_service::PurchaseService;
pub use purge::ExpiredPurchasePurge;
pub use refresh::{RefreshOutcome, RefreshScheduler, RefreshSummary, REFRESHABLE_ADD_ONS};
pub use registry::{Capability, CapabilityRegistry, StaticCapabilityRegistry};
pub use resolver::{EntitlementResolver, Resource};
pub use settings::EngineSettings;
pub use store::memory::InMemoryStore;
pub use store::postgres::PgStore;
pub use store::{AddOnStore, AssignmentStore, PurchaseStore};
