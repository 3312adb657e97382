//! Shared fixtures

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use seatkeeper_entitlements::{
    AddOnName, AddOnPurchase, AssignmentStore, Backends, Collaborators, Engine, EngineSettings,
    EntitlementError, EntitlementResult, InMemoryDirectory, InMemoryLease, InMemoryStore,
    InMemoryUserCache, PurchaseParams, StaticCapabilityRegistry,
};
use seatkeeper_shared::{Deployment, NamespaceId, OrganizationId, PurchaseId, UserId};
use std::collections::BTreeSet;
use time::{Date, Duration, OffsetDateTime};

pub const CODE_SUGGESTIONS: &str = "code_suggestions";
pub const DUO_CHAT: &str = "duo_chat";
pub const PRODUCT_ANALYTICS: &str = "product_analytics";

pub fn registry() -> StaticCapabilityRegistry {
    StaticCapabilityRegistry::new()
        .with(
            CODE_SUGGESTIONS,
            &[AddOnName::DuoPro, AddOnName::DuoEnterprise, AddOnName::DuoAmazonQ],
        )
        .with(
            DUO_CHAT,
            &[
                AddOnName::DuoCore,
                AddOnName::DuoPro,
                AddOnName::DuoEnterprise,
                AddOnName::DuoAmazonQ,
                AddOnName::DuoSelfHosted,
            ],
        )
        .with(PRODUCT_ANALYTICS, &[AddOnName::ProductAnalytics])
}

pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

pub fn params(add_on: AddOnName, namespace_id: Option<NamespaceId>) -> PurchaseParams {
    PurchaseParams {
        add_on,
        namespace_id,
        organization_id: Some(OrganizationId::new()),
        quantity: 10,
        purchase_xid: format!("A-S{}", PurchaseId::new()),
        started_at: Some(today()),
        expires_on: Some(today() + Duration::days(365)),
        trial: false,
    }
}

pub fn expired_params(add_on: AddOnName, namespace_id: Option<NamespaceId>) -> PurchaseParams {
    PurchaseParams {
        started_at: Some(today() - Duration::days(365)),
        expires_on: Some(today() - Duration::days(1)),
        ..params(add_on, namespace_id)
    }
}

pub struct Harness {
    pub engine: Engine,
    pub directory: Arc<InMemoryDirectory>,
    pub backends: Backends,
}

impl Harness {
    pub fn new(deployment: Deployment) -> Self {
        Self::with_backends(Backends::in_memory(), deployment)
    }

    pub fn with_backends(backends: Backends, deployment: Deployment) -> Self {
        let mut settings = EngineSettings::for_deployment(deployment);
        settings.retry_base_millis = 1;
        Self::with_settings(backends, settings)
    }

    pub fn with_settings(backends: Backends, settings: EngineSettings) -> Self {
        let directory = Arc::new(InMemoryDirectory::new());
        let collaborators = Collaborators::from_directory(Arc::new(registry()), directory.clone());
        let engine = Engine::new(backends.clone(), collaborators, settings);
        Self {
            engine,
            directory,
            backends,
        }
    }

    pub async fn purchase(&self, params: PurchaseParams) -> AddOnPurchase {
        self.engine.purchases.create(params).await.unwrap()
    }
}

/// Assignment store that counts bulk fetches and can fail on demand
pub struct InstrumentedAssignments {
    inner: Arc<InMemoryStore>,
    pub fetches: AtomicUsize,
    /// Remaining calls to `assigned_user_ids` that fail with a database error
    pub failures_left: AtomicUsize,
    pub delete_calls: AtomicUsize,
    /// 1-based `delete_assignments` call that fails once; 0 for none
    pub failing_delete_call: AtomicUsize,
}

impl InstrumentedAssignments {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            fetches: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            failing_delete_call: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(&self, calls: usize) {
        self.failures_left.store(calls, Ordering::SeqCst);
    }

    /// Make the `call`-th bulk delete fail with a transient error
    pub fn fail_delete_call(&self, call: usize) {
        self.failing_delete_call.store(call, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

/// In-memory backends whose assignment store is instrumented
pub fn instrumented_backends() -> (Backends, Arc<InstrumentedAssignments>) {
    let store = Arc::new(InMemoryStore::new());
    let assignments = Arc::new(InstrumentedAssignments::new(store.clone()));
    let backends = Backends {
        add_ons: store.clone(),
        purchases: store,
        assignments: assignments.clone(),
        cache: Arc::new(InMemoryUserCache::new()),
        lease: Arc::new(InMemoryLease::new()),
    };
    (backends, assignments)
}

#[async_trait]
impl AssignmentStore for InstrumentedAssignments {
    async fn insert_assignment(
        &self,
        purchase_id: PurchaseId,
        user_id: UserId,
    ) -> EntitlementResult<bool> {
        self.inner.insert_assignment(purchase_id, user_id).await
    }

    async fn delete_assignment(
        &self,
        purchase_id: PurchaseId,
        user_id: UserId,
    ) -> EntitlementResult<bool> {
        self.inner.delete_assignment(purchase_id, user_id).await
    }

    async fn assignment_exists(
        &self,
        purchase_id: PurchaseId,
        user_id: UserId,
    ) -> EntitlementResult<bool> {
        self.inner.assignment_exists(purchase_id, user_id).await
    }

    async fn assigned_user_ids(&self, purchase_id: PurchaseId) -> EntitlementResult<BTreeSet<UserId>> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EntitlementError::Database("connection reset".to_string()));
        }
        self.inner.assigned_user_ids(purchase_id).await
    }

    async fn count_assignments(&self, purchase_id: PurchaseId) -> EntitlementResult<usize> {
        self.inner.count_assignments(purchase_id).await
    }

    async fn filter_assigned_user_ids(
        &self,
        purchase_id: PurchaseId,
        candidates: &[UserId],
    ) -> EntitlementResult<Vec<UserId>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.filter_assigned_user_ids(purchase_id, candidates).await
    }

    async fn delete_assignments(
        &self,
        purchase_id: PurchaseId,
        user_ids: &[UserId],
    ) -> EntitlementResult<usize> {
        let call = self.delete_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.failing_delete_call.load(Ordering::SeqCst) {
            return Err(EntitlementError::Database("connection reset".to_string()));
        }
        self.inner.delete_assignments(purchase_id, user_ids).await
    }
}

/// Captures JSON log lines written by a `tracing_subscriber` fmt layer
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn lines(&self) -> Vec<serde_json::Value> {
        let text = String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned();
        text.lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Captured events whose message equals `message`
    pub fn events(&self, message: &str) -> Vec<serde_json::Value> {
        self.lines()
            .into_iter()
            .filter(|line| line["fields"]["message"] == message)
            .collect()
    }

    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(self.clone())
            .finish()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
