use std::time::Duration as StdDuration;

use seatkeeper_entitlements::{AddOnName, EngineSettings, LeaseKey, RefreshSummary};
use seatkeeper_shared::{Deployment, UserId};
use time::{Duration, OffsetDateTime};

use crate::support::{instrumented_backends, params, Harness, LogCapture};

#[tokio::test]
async fn test_candidates_ordered_most_overdue_first() {
    let h = Harness::new(Deployment::SelfManaged);
    let now = OffsetDateTime::now_utc();

    let never = h.purchase(params(AddOnName::DuoPro, None)).await;
    let stale = h.purchase(params(AddOnName::DuoEnterprise, None)).await;
    let fresh = h.purchase(params(AddOnName::DuoAmazonQ, None)).await;
    h.backends
        .purchases
        .mark_assigned_users_refreshed(stale.id, now - Duration::hours(21))
        .await
        .unwrap();
    h.backends
        .purchases
        .mark_assigned_users_refreshed(fresh.id, now - Duration::hours(1))
        .await
        .unwrap();

    let ids: Vec<_> = h
        .engine
        .scheduler
        .select_candidates_at(now, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, vec![never.id, stale.id]);

    let next = h.engine.scheduler.next_candidate().await.unwrap().unwrap();
    assert_eq!(next.id, never.id);
}

#[tokio::test]
async fn test_non_refreshable_families_never_selected() {
    let h = Harness::new(Deployment::SelfManaged);
    h.purchase(params(AddOnName::DuoCore, None)).await;
    h.purchase(params(AddOnName::ProductAnalytics, None)).await;

    assert!(h.engine.scheduler.select_candidates(10).await.unwrap().is_empty());
    assert!(h.engine.scheduler.next_candidate().await.unwrap().is_none());
}

#[tokio::test]
async fn test_run_pass_refreshes_and_stamps() {
    let h = Harness::new(Deployment::SelfManaged);
    let purchase = h.purchase(params(AddOnName::DuoPro, None)).await;
    let (active, blocked) = (UserId::new(), UserId::new());
    h.directory.activate_user(active).unwrap();
    h.engine.assignments.assign(active, &purchase).await.unwrap();
    h.engine.assignments.assign(blocked, &purchase).await.unwrap();

    let summary = h.engine.scheduler.run_pass(10).await.unwrap();
    assert_eq!(
        summary,
        RefreshSummary {
            refreshed: 1,
            skipped: 0,
            failed: 0,
            removed_assignments: 1,
        }
    );

    let stored = h.engine.purchases.find(purchase.id).await.unwrap();
    assert!(stored.last_assigned_users_refreshed_at.is_some());
    assert!(!h.engine.assignments.is_assigned(blocked, &purchase).await.unwrap());

    // Fresh now; the next pass has nothing to do
    assert_eq!(
        h.engine.scheduler.run_pass(10).await.unwrap(),
        RefreshSummary::default()
    );
}

#[tokio::test]
async fn test_lease_contention_is_a_skip() {
    let h = Harness::new(Deployment::SelfManaged);
    let contended = h.purchase(params(AddOnName::DuoPro, None)).await;
    let free = h.purchase(params(AddOnName::DuoEnterprise, None)).await;

    let key = LeaseKey::for_purchase_refresh(contended.id);
    let token = h
        .backends
        .lease
        .try_obtain(&key, StdDuration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let summary = h.engine.scheduler.run_pass(10).await.unwrap();
    assert_eq!(summary.refreshed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);

    let contended = h.engine.purchases.find(contended.id).await.unwrap();
    let free = h.engine.purchases.find(free.id).await.unwrap();
    assert!(contended.last_assigned_users_refreshed_at.is_none());
    assert!(free.last_assigned_users_refreshed_at.is_some());

    // Once released the other worker's purchase is picked up
    h.backends.lease.cancel(&key, &token).await.unwrap();
    let summary = h.engine.scheduler.run_pass(10).await.unwrap();
    assert_eq!(summary.refreshed, 1);
}

#[tokio::test]
async fn test_transient_cleanup_failure_is_retried() {
    let (backends, instrumented) = instrumented_backends();
    let h = Harness::with_backends(backends, Deployment::SelfManaged);
    let purchase = h.purchase(params(AddOnName::DuoPro, None)).await;
    h.engine
        .assignments
        .assign(UserId::new(), &purchase)
        .await
        .unwrap();

    instrumented.fail_next(2);
    let summary = h.engine.scheduler.run_pass(10).await.unwrap();

    assert_eq!(summary.refreshed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.removed_assignments, 1);
}

#[tokio::test]
async fn test_exhausted_retries_leave_marker_unstamped() {
    let (backends, instrumented) = instrumented_backends();
    let mut settings = EngineSettings::for_deployment(Deployment::SelfManaged);
    settings.retry_attempts = 2;
    settings.retry_base_millis = 1;
    let h = Harness::with_settings(backends, settings);
    let purchase = h.purchase(params(AddOnName::DuoPro, None)).await;
    h.engine
        .assignments
        .assign(UserId::new(), &purchase)
        .await
        .unwrap();

    instrumented.fail_next(10);
    let summary = h.engine.scheduler.run_pass(10).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.refreshed, 0);

    let stored = h.engine.purchases.find(purchase.id).await.unwrap();
    assert!(stored.last_assigned_users_refreshed_at.is_none());

    // The lease was released, so the next pass can try again
    instrumented.fail_next(0);
    assert_eq!(h.engine.scheduler.run_pass(10).await.unwrap().refreshed, 1);
}

#[tokio::test]
async fn test_batch_failure_keeps_earlier_removals_logged_and_counted() {
    let (backends, instrumented) = instrumented_backends();
    let mut settings = EngineSettings::for_deployment(Deployment::SelfManaged);
    settings.cleanup_batch_size = 1;
    settings.retry_base_millis = 1;
    let h = Harness::with_settings(backends, settings);
    let purchase = h.purchase(params(AddOnName::DuoPro, None)).await;

    let (first, second) = (UserId::new(), UserId::new());
    h.engine.assignments.assign(first, &purchase).await.unwrap();
    h.engine.assignments.assign(second, &purchase).await.unwrap();

    // First batch commits, second batch hits a dropped connection
    instrumented.fail_delete_call(2);

    let logs = LogCapture::default();
    let summary = {
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        h.engine.scheduler.run_pass(10).await.unwrap()
    };

    assert_eq!(summary.refreshed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.removed_assignments, 2);
    assert_eq!(h.engine.assignments.assigned_count(&purchase).await.unwrap(), 0);

    let logged: String = logs
        .events("Ineligible users unassigned")
        .iter()
        .map(|event| event["fields"]["user_ids"].as_str().unwrap().to_string())
        .collect();
    assert!(logged.contains(&first.to_string()));
    assert!(logged.contains(&second.to_string()));
}
