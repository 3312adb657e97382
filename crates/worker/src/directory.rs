//! Host directory backed by Postgres
//!
//! The host application exposes its namespaces, memberships and active
//! accounts through three relations (tables or views) in the same database:
//!
//! - `seatkeeper_namespaces(id uuid, kind text, parent_id uuid, path text)`
//! - `seatkeeper_memberships(namespace_id uuid, user_id uuid, access_level int)`
//! - `seatkeeper_active_users(id uuid)`
//!
//! The worker only reads them.

use std::collections::BTreeSet;

use async_trait::async_trait;
use seatkeeper_entitlements::{
    EligibleUsersFinder, EntitlementError, EntitlementResult, MembershipDirectory,
    NamespaceDirectory,
};
use seatkeeper_shared::{Namespace, NamespaceId, NamespaceKind, SharedError, UserId};
use sqlx::PgPool;
use uuid::Uuid;

fn collaborator(err: sqlx::Error) -> EntitlementError {
    EntitlementError::Collaborator(err.to_string())
}

/// Membership, eligibility and namespace lookups against host relations
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
    min_access_level: i32,
}

impl PgDirectory {
    pub fn new(pool: PgPool, min_access_level: i32) -> Self {
        Self {
            pool,
            min_access_level,
        }
    }
}

#[async_trait]
impl MembershipDirectory for PgDirectory {
    async fn has_minimum_access(
        &self,
        user: UserId,
        namespace: NamespaceId,
    ) -> EntitlementResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM seatkeeper_memberships
                WHERE namespace_id = $1 AND user_id = $2 AND access_level >= $3
            )
            "#,
        )
        .bind(namespace.0)
        .bind(user.0)
        .bind(self.min_access_level)
        .fetch_one(&self.pool)
        .await
        .map_err(collaborator)?;

        Ok(exists)
    }

    async fn namespaces_for(&self, user: UserId) -> EntitlementResult<BTreeSet<NamespaceId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT namespace_id FROM seatkeeper_memberships
            WHERE user_id = $1 AND access_level >= $2
            "#,
        )
        .bind(user.0)
        .bind(self.min_access_level)
        .fetch_all(&self.pool)
        .await
        .map_err(collaborator)?;

        Ok(ids.into_iter().map(NamespaceId).collect())
    }

    async fn eligible_user_ids(
        &self,
        namespace: NamespaceId,
        candidates: &BTreeSet<UserId>,
    ) -> EntitlementResult<BTreeSet<UserId>> {
        if candidates.is_empty() {
            return Ok(BTreeSet::new());
        }

        let candidates: Vec<Uuid> = candidates.iter().map(|u| u.0).collect();
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT user_id FROM seatkeeper_memberships
            WHERE namespace_id = $1 AND user_id = ANY($2) AND access_level >= $3
            "#,
        )
        .bind(namespace.0)
        .bind(&candidates)
        .bind(self.min_access_level)
        .fetch_all(&self.pool)
        .await
        .map_err(collaborator)?;

        Ok(ids.into_iter().map(UserId).collect())
    }
}

#[async_trait]
impl EligibleUsersFinder for PgDirectory {
    async fn execute(&self) -> EntitlementResult<BTreeSet<UserId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM seatkeeper_active_users")
            .fetch_all(&self.pool)
            .await
            .map_err(collaborator)?;

        Ok(ids.into_iter().map(UserId).collect())
    }
}

#[async_trait]
impl NamespaceDirectory for PgDirectory {
    async fn find_namespace(&self, id: NamespaceId) -> EntitlementResult<Option<Namespace>> {
        let row: Option<(Uuid, String, Option<Uuid>, String)> = sqlx::query_as(
            "SELECT id, kind, parent_id, path FROM seatkeeper_namespaces WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(collaborator)?;

        let Some((id, kind, parent_id, path)) = row else {
            return Ok(None);
        };
        let kind: NamespaceKind = kind
            .parse()
            .map_err(|e: SharedError| EntitlementError::Collaborator(e.to_string()))?;

        Ok(Some(Namespace {
            id: NamespaceId(id),
            kind,
            parent_id: parent_id.map(NamespaceId),
            path,
        }))
    }
}
