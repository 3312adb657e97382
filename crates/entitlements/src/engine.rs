//! Service wiring
//!
//! Builds every service from one set of storage backends and host
//! collaborators so the worker and tests share the same assembly.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::assignments::SeatAssignmentService;
use crate::cache::{InMemoryUserCache, RedisUserCache, UserEntitlementCache, DEFAULT_CACHE_TTL};
use crate::catalog::AddOnCatalog;
use crate::cleanup::EligibilityCleanupService;
use crate::lease::{ExclusiveLease, InMemoryLease, RedisLease};
use crate::membership::{
    EligibleUsersFinder, InMemoryDirectory, MembershipDirectory, NamespaceDirectory,
};
use crate::purchase_service::PurchaseService;
use crate::purge::ExpiredPurchasePurge;
use crate::refresh::RefreshScheduler;
use crate::registry::CapabilityRegistry;
use crate::resolver::EntitlementResolver;
use crate::settings::EngineSettings;
use crate::store::memory::InMemoryStore;
use crate::store::postgres::PgStore;
use crate::store::{AddOnStore, AssignmentStore, PurchaseStore};

/// Storage the engine owns
#[derive(Clone)]
pub struct Backends {
    pub add_ons: Arc<dyn AddOnStore>,
    pub purchases: Arc<dyn PurchaseStore>,
    pub assignments: Arc<dyn AssignmentStore>,
    pub cache: Arc<dyn UserEntitlementCache>,
    pub lease: Arc<dyn ExclusiveLease>,
}

impl Backends {
    /// Everything in process memory
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            add_ons: store.clone(),
            purchases: store.clone(),
            assignments: store,
            cache: Arc::new(InMemoryUserCache::new()),
            lease: Arc::new(InMemoryLease::new()),
        }
    }

    /// Postgres for records, Redis for cache and leases
    pub fn production(pool: PgPool, redis: ConnectionManager) -> Self {
        Self::production_with_cache_ttl(pool, redis, DEFAULT_CACHE_TTL)
    }

    pub fn production_with_cache_ttl(
        pool: PgPool,
        redis: ConnectionManager,
        cache_ttl: Duration,
    ) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            add_ons: store.clone(),
            purchases: store.clone(),
            assignments: store,
            cache: Arc::new(RedisUserCache::new(redis.clone(), cache_ttl)),
            lease: Arc::new(RedisLease::new(redis)),
        }
    }
}

/// What the host application provides
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn CapabilityRegistry>,
    pub membership: Arc<dyn MembershipDirectory>,
    pub eligible_users: Arc<dyn EligibleUsersFinder>,
    pub namespaces: Arc<dyn NamespaceDirectory>,
}

impl Collaborators {
    /// One in-memory directory answering every lookup
    pub fn from_directory(
        registry: Arc<dyn CapabilityRegistry>,
        directory: Arc<InMemoryDirectory>,
    ) -> Self {
        Self {
            registry,
            membership: directory.clone(),
            eligible_users: directory.clone(),
            namespaces: directory,
        }
    }
}

/// Fully wired services
#[derive(Clone)]
pub struct Engine {
    pub settings: EngineSettings,
    pub catalog: AddOnCatalog,
    pub purchases: PurchaseService,
    pub assignments: SeatAssignmentService,
    pub resolver: EntitlementResolver,
    pub cleanup: EligibilityCleanupService,
    pub scheduler: RefreshScheduler,
    pub purge: ExpiredPurchasePurge,
}

impl Engine {
    pub fn new(backends: Backends, collaborators: Collaborators, settings: EngineSettings) -> Self {
        let catalog = AddOnCatalog::new(backends.add_ons);
        let assignments = SeatAssignmentService::new(backends.assignments, backends.cache);
        let purchases = PurchaseService::new(
            catalog.clone(),
            backends.purchases.clone(),
            assignments.clone(),
            collaborators.namespaces.clone(),
            settings.deployment,
        );
        let resolver = EntitlementResolver::new(
            backends.purchases.clone(),
            collaborators.registry,
            collaborators.membership.clone(),
            settings.deployment,
        );
        let cleanup = EligibilityCleanupService::new(
            assignments.clone(),
            collaborators.membership,
            collaborators.eligible_users,
            collaborators.namespaces,
        );
        let scheduler = RefreshScheduler::new(
            backends.purchases,
            cleanup.clone(),
            backends.lease,
            settings.clone(),
        );
        let purge = ExpiredPurchasePurge::new(purchases.clone(), settings.cleanup_delay);

        Self {
            settings,
            catalog,
            purchases,
            assignments,
            resolver,
            cleanup,
            scheduler,
            purge,
        }
    }
}
