use seatkeeper_entitlements::{AddOnName, EntitlementError, Resource};
use seatkeeper_shared::{Deployment, Namespace, Project, UserId};
use uuid::Uuid;

use crate::support::{
    expired_params, params, Harness, CODE_SUGGESTIONS, DUO_CHAT, PRODUCT_ANALYTICS,
};

#[tokio::test]
async fn test_group_sees_only_active_purchases_for_capability() {
    let h = Harness::new(Deployment::SaaS);
    let group = Namespace::group("acme");
    h.directory.add_namespace(group.clone()).unwrap();

    let pro = h.purchase(params(AddOnName::DuoPro, Some(group.id))).await;
    h.purchase(expired_params(AddOnName::ProductAnalytics, Some(group.id)))
        .await;

    let resource = Resource::Namespace(group.id);
    let analytics = h
        .engine
        .resolver
        .resolve(PRODUCT_ANALYTICS, &resource)
        .await
        .unwrap();
    assert!(analytics.is_empty());

    let suggestions = h
        .engine
        .resolver
        .resolve(CODE_SUGGESTIONS, &resource)
        .await
        .unwrap();
    assert_eq!(suggestions, vec![pro]);
}

#[tokio::test]
async fn test_self_managed_purchase_only_visible_to_instance() {
    let h = Harness::new(Deployment::SelfManaged);
    let enterprise = h.purchase(params(AddOnName::DuoEnterprise, None)).await;
    let any_group = Namespace::group("somewhere");

    let instance = h
        .engine
        .resolver
        .resolve(DUO_CHAT, &Resource::Instance)
        .await
        .unwrap();
    assert_eq!(instance, vec![enterprise]);

    let group = h
        .engine
        .resolver
        .resolve(DUO_CHAT, &Resource::Namespace(any_group.id))
        .await
        .unwrap();
    assert!(group.is_empty());
}

#[tokio::test]
async fn test_instance_never_sees_namespace_purchases() {
    let h = Harness::new(Deployment::SelfManaged);
    let group = Namespace::group("acme");
    let scoped = h.purchase(params(AddOnName::DuoPro, Some(group.id))).await;

    let instance = h
        .engine
        .resolver
        .resolve(CODE_SUGGESTIONS, &Resource::Instance)
        .await
        .unwrap();
    assert!(instance.is_empty());

    let namespaced = h
        .engine
        .resolver
        .resolve(CODE_SUGGESTIONS, &Resource::Namespace(group.id))
        .await
        .unwrap();
    assert_eq!(namespaced, vec![scoped]);
}

#[tokio::test]
async fn test_unknown_capability_resolves_to_nothing() {
    let h = Harness::new(Deployment::SelfManaged);
    h.purchase(params(AddOnName::DuoEnterprise, None)).await;

    let resolver = &h.engine.resolver;
    assert!(resolver
        .resolve("explain_vulnerability", &Resource::Instance)
        .await
        .unwrap()
        .is_empty());
    assert!(!resolver
        .exists_for_capability("explain_vulnerability", &Resource::Instance)
        .await
        .unwrap());
    assert!(resolver
        .exists_for_capability(CODE_SUGGESTIONS, &Resource::Instance)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_project_resolves_through_top_level_namespace() {
    let h = Harness::new(Deployment::SaaS);
    let group = Namespace::group("acme");
    let subgroup = Namespace::subgroup(&group, "platform");
    h.directory.add_namespace(group.clone()).unwrap();
    h.directory.add_namespace(subgroup.clone()).unwrap();
    let pro = h.purchase(params(AddOnName::DuoPro, Some(group.id))).await;

    let project = Project::new(subgroup.id, group.id);
    let resolved = h
        .engine
        .resolver
        .resolve(CODE_SUGGESTIONS, &Resource::Project(project))
        .await
        .unwrap();
    assert_eq!(resolved, vec![pro]);

    // The subgroup itself owns nothing; no ancestor walk
    assert!(h
        .engine
        .resolver
        .resolve(CODE_SUGGESTIONS, &Resource::Namespace(subgroup.id))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_saas_user_resolves_through_memberships() {
    let h = Harness::new(Deployment::SaaS);
    let acme = Namespace::group("acme");
    let globex = Namespace::group("globex");
    h.directory.add_namespace(acme.clone()).unwrap();
    h.directory.add_namespace(globex.clone()).unwrap();

    let acme_pro = h.purchase(params(AddOnName::DuoPro, Some(acme.id))).await;
    h.purchase(params(AddOnName::DuoPro, Some(globex.id))).await;

    let user = UserId::new();
    h.directory.add_member(acme.id, user).unwrap();

    let resolved = h
        .engine
        .resolver
        .resolve(CODE_SUGGESTIONS, &Resource::User(user))
        .await
        .unwrap();
    assert_eq!(resolved, vec![acme_pro]);

    let outsider = h
        .engine
        .resolver
        .resolve(CODE_SUGGESTIONS, &Resource::User(UserId::new()))
        .await
        .unwrap();
    assert!(outsider.is_empty());
}

#[tokio::test]
async fn test_self_managed_user_resolves_to_instance() {
    let h = Harness::new(Deployment::SelfManaged);
    let enterprise = h.purchase(params(AddOnName::DuoEnterprise, None)).await;

    let resolved = h
        .engine
        .resolver
        .resolve(CODE_SUGGESTIONS, &Resource::User(UserId::new()))
        .await
        .unwrap();
    assert_eq!(resolved, vec![enterprise]);
}

#[tokio::test]
async fn test_future_dated_purchase_grants_access() {
    let h = Harness::new(Deployment::SelfManaged);
    let mut future = params(AddOnName::DuoPro, None);
    future.started_at = Some(crate::support::today() + time::Duration::days(30));
    let purchase = h.purchase(future).await;

    let resolved = h
        .engine
        .resolver
        .resolve(CODE_SUGGESTIONS, &Resource::Instance)
        .await
        .unwrap();
    assert_eq!(resolved, vec![purchase]);
}

#[tokio::test]
async fn test_highest_duo_tier() {
    let h = Harness::new(Deployment::SelfManaged);
    let core = h.purchase(params(AddOnName::DuoCore, None)).await;
    let pro = h.purchase(params(AddOnName::DuoPro, None)).await;
    let enterprise = h.purchase(params(AddOnName::DuoEnterprise, None)).await;
    h.purchase(params(AddOnName::ProductAnalytics, None)).await;

    let ranked = h.engine.resolver.resolve_duo(&Resource::Instance).await.unwrap();
    assert_eq!(ranked, vec![enterprise.clone(), pro, core]);

    let top = h
        .engine
        .resolver
        .highest_duo_tier(&Resource::Instance)
        .await
        .unwrap();
    assert_eq!(top, Some(enterprise));

    let none = h
        .engine
        .resolver
        .highest_duo_tier(&Resource::Namespace(Namespace::group("empty").id))
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn test_unsupported_resource_kind() {
    let err = Resource::from_kind("issue", Some(Uuid::new_v4()), None).unwrap_err();
    assert!(matches!(err, EntitlementError::UnsupportedResource(_)));
}
