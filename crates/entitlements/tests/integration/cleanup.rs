use std::collections::BTreeSet;

use seatkeeper_entitlements::{AddOnName, CleanupProgress, EntitlementError, UserAddOnCacheKey};
use seatkeeper_shared::{Deployment, Namespace, UserId};

use crate::support::{instrumented_backends, params, Harness, LogCapture};

#[tokio::test]
async fn test_removes_ineligible_user_and_logs_once() {
    let h = Harness::new(Deployment::SaaS);
    let group = Namespace::group("acme");
    h.directory.add_namespace(group.clone()).unwrap();
    let purchase = h.purchase(params(AddOnName::DuoPro, Some(group.id))).await;

    let (eligible, ineligible) = (UserId::new(), UserId::new());
    h.directory.add_member(group.id, eligible).unwrap();
    h.engine.assignments.assign(eligible, &purchase).await.unwrap();
    h.engine.assignments.assign(ineligible, &purchase).await.unwrap();

    let logs = LogCapture::default();
    let removed = {
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        h.engine
            .cleanup
            .delete_ineligible_assignments(&purchase, 50)
            .await
            .unwrap()
    };
    assert_eq!(removed, 1);
    assert_eq!(
        h.engine.assignments.assigned_user_ids(&purchase).await.unwrap(),
        BTreeSet::from([eligible])
    );

    let events = logs.events("Ineligible users unassigned");
    assert_eq!(events.len(), 1);
    let fields = &events[0]["fields"];
    let user_ids = fields["user_ids"].as_str().unwrap();
    assert!(user_ids.contains(&ineligible.to_string()));
    assert!(!user_ids.contains(&eligible.to_string()));
    assert_eq!(fields["add_on"], "duo_pro");
    assert_eq!(fields["add_on_purchase"], purchase.id.to_string());
    assert_eq!(fields["namespace"], "acme");

    // Rerun finds nothing and stays quiet
    let logs = LogCapture::default();
    let rerun = {
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        h.engine
            .cleanup
            .delete_ineligible_assignments(&purchase, 50)
            .await
            .unwrap()
    };
    assert_eq!(rerun, 0);
    assert!(logs.events("Ineligible users unassigned").is_empty());
}

#[tokio::test]
async fn test_self_managed_log_reports_no_namespace() {
    let h = Harness::new(Deployment::SelfManaged);
    let purchase = h.purchase(params(AddOnName::DuoEnterprise, None)).await;
    let blocked = UserId::new();
    h.engine.assignments.assign(blocked, &purchase).await.unwrap();

    let logs = LogCapture::default();
    let removed = {
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        h.engine
            .cleanup
            .delete_ineligible_assignments(&purchase, 10)
            .await
            .unwrap()
    };

    assert_eq!(removed, 1);
    let events = logs.events("Ineligible users unassigned");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["fields"]["namespace"], "none");
    assert_eq!(events[0]["fields"]["add_on"], "duo_enterprise");
}

#[tokio::test]
async fn test_batch_size_one_fetches_once_per_ineligible_user() {
    let (backends, instrumented) = instrumented_backends();
    let h = Harness::with_backends(backends, Deployment::SelfManaged);
    let purchase = h.purchase(params(AddOnName::DuoPro, None)).await;

    let active = UserId::new();
    h.directory.activate_user(active).unwrap();
    for user in [active, UserId::new(), UserId::new()] {
        h.engine.assignments.assign(user, &purchase).await.unwrap();
    }

    let removed = h
        .engine
        .cleanup
        .delete_ineligible_assignments(&purchase, 1)
        .await
        .unwrap();

    assert_eq!(removed, 2);
    assert_eq!(instrumented.fetch_count(), 2);
}

#[tokio::test]
async fn test_no_assigned_users_skips_eligibility_and_logging() {
    let (backends, instrumented) = instrumented_backends();
    let h = Harness::with_backends(backends, Deployment::SelfManaged);
    let purchase = h.purchase(params(AddOnName::DuoPro, None)).await;

    let logs = LogCapture::default();
    let removed = {
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        h.engine
            .cleanup
            .delete_ineligible_assignments(&purchase, 5)
            .await
            .unwrap()
    };

    assert_eq!(removed, 0);
    assert_eq!(instrumented.fetch_count(), 0);
    assert!(logs.events("Ineligible users unassigned").is_empty());
}

#[tokio::test]
async fn test_removed_users_cache_entries_invalidated() {
    let h = Harness::new(Deployment::SelfManaged);
    let purchase = h.purchase(params(AddOnName::DuoPro, None)).await;
    let user = UserId::new();
    h.engine.assignments.assign(user, &purchase).await.unwrap();

    // Warm the cache through the reader path
    let purchases = [purchase.clone()];
    assert!(h
        .engine
        .assignments
        .holds_seat(user, AddOnName::DuoPro, &purchases)
        .await
        .unwrap());

    h.engine
        .cleanup
        .delete_ineligible_assignments(&purchase, 10)
        .await
        .unwrap();

    let key = UserAddOnCacheKey::new(AddOnName::DuoPro, user);
    assert_eq!(h.backends.cache.get(&key).await.unwrap(), None);
    assert!(!h
        .engine
        .assignments
        .holds_seat(user, AddOnName::DuoPro, &purchases)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_zero_batch_size_is_invalid_input() {
    let h = Harness::new(Deployment::SelfManaged);
    let purchase = h.purchase(params(AddOnName::DuoPro, None)).await;

    let err = h
        .engine
        .cleanup
        .delete_ineligible_assignments(&purchase, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, EntitlementError::InvalidInput(_)));
}

#[tokio::test]
async fn test_failed_batch_still_logs_users_already_removed() {
    let (backends, instrumented) = instrumented_backends();
    let h = Harness::with_backends(backends, Deployment::SelfManaged);
    let purchase = h.purchase(params(AddOnName::DuoPro, None)).await;
    let users = [UserId::new(), UserId::new()];
    for user in users {
        h.engine.assignments.assign(user, &purchase).await.unwrap();
    }
    instrumented.fail_delete_call(2);

    let logs = LogCapture::default();
    let progress = CleanupProgress::new();
    let result = {
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        h.engine
            .cleanup
            .delete_ineligible_assignments_tracked(&purchase, 1, &progress)
            .await
    };

    assert!(matches!(result, Err(EntitlementError::Database(_))));
    assert_eq!(progress.removed(), 1);

    let remaining = h.engine.assignments.assigned_user_ids(&purchase).await.unwrap();
    assert_eq!(remaining.len(), 1);

    let events = logs.events("Ineligible users unassigned");
    assert_eq!(events.len(), 1);
    let user_ids = events[0]["fields"]["user_ids"].as_str().unwrap();
    for user in users {
        assert_eq!(
            user_ids.contains(&user.to_string()),
            !remaining.contains(&user),
            "only the committed batch is logged"
        );
    }
}
