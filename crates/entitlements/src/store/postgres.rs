//! Postgres storage backend

use std::collections::BTreeSet;

use async_trait::async_trait;
use seatkeeper_shared::{AddOnId, NamespaceId, OrganizationId, PurchaseId, UserId};
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::{Date, Duration, OffsetDateTime};
use uuid::Uuid;

use super::{AddOnStore, AssignmentStore, PurchaseStore};
use crate::catalog::{AddOn, AddOnName};
use crate::error::{EntitlementError, EntitlementResult};
use crate::purchase::{Activity, AddOnPurchase, NamespaceScope, PurchaseQuery};

const SELECT_PURCHASES: &str = r#"
    SELECT
        p.id,
        p.add_on_id,
        a.name AS add_on_name,
        p.namespace_id,
        p.organization_id,
        p.quantity,
        p.purchase_xid,
        p.started_at,
        p.expires_on,
        p.trial,
        p.last_assigned_users_refreshed_at,
        p.created_at,
        p.updated_at
    FROM add_on_purchases p
    JOIN add_ons a ON a.id = p.add_on_id
"#;

/// Postgres-backed store for add-ons, purchases and seat assignments
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn name_strings(names: impl IntoIterator<Item = AddOnName>) -> Vec<String> {
    names.into_iter().map(|n| n.as_str().to_string()).collect()
}

fn uuids(ids: &[UserId]) -> Vec<Uuid> {
    ids.iter().map(|id| id.0).collect()
}

#[async_trait]
impl AddOnStore for PgStore {
    async fn find_add_on_by_name(&self, name: AddOnName) -> EntitlementResult<Option<AddOn>> {
        let add_on: Option<AddOn> = sqlx::query_as(
            r#"
            SELECT id, name, description, seat_assignable, created_at, updated_at
            FROM add_ons
            WHERE LOWER(name) = $1
            "#,
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(add_on)
    }

    async fn insert_add_on(&self, add_on: &AddOn) -> EntitlementResult<AddOn> {
        let inserted: AddOn = sqlx::query_as(
            r#"
            INSERT INTO add_ons (id, name, description, seat_assignable, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, name, description, seat_assignable, created_at, updated_at
            "#,
        )
        .bind(add_on.id)
        .bind(add_on.name.as_str())
        .bind(&add_on.description)
        .bind(add_on.seat_assignable)
        .bind(add_on.created_at)
        .bind(add_on.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(inserted)
    }

    async fn update_add_on_description(
        &self,
        name: AddOnName,
        description: &str,
    ) -> EntitlementResult<Option<AddOn>> {
        let updated: Option<AddOn> = sqlx::query_as(
            r#"
            UPDATE add_ons
            SET description = $2, updated_at = NOW()
            WHERE LOWER(name) = $1
            RETURNING id, name, description, seat_assignable, created_at, updated_at
            "#,
        )
        .bind(name.as_str())
        .bind(description)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }

    async fn list_add_ons(&self) -> EntitlementResult<Vec<AddOn>> {
        let add_ons: Vec<AddOn> = sqlx::query_as(
            r#"
            SELECT id, name, description, seat_assignable, created_at, updated_at
            FROM add_ons
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(add_ons)
    }
}

#[async_trait]
impl PurchaseStore for PgStore {
    async fn insert_purchase(&self, purchase: &AddOnPurchase) -> EntitlementResult<()> {
        sqlx::query(
            r#"
            INSERT INTO add_on_purchases (
                id, add_on_id, namespace_id, organization_id, quantity, purchase_xid,
                started_at, expires_on, trial, last_assigned_users_refreshed_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(purchase.id)
        .bind(purchase.add_on_id)
        .bind(purchase.namespace_id)
        .bind(purchase.organization_id)
        .bind(purchase.quantity)
        .bind(&purchase.purchase_xid)
        .bind(purchase.started_at)
        .bind(purchase.expires_on)
        .bind(purchase.trial)
        .bind(purchase.last_assigned_users_refreshed_at)
        .bind(purchase.created_at)
        .bind(purchase.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_purchase(&self, purchase: &AddOnPurchase) -> EntitlementResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE add_on_purchases
            SET quantity = $2,
                purchase_xid = $3,
                started_at = $4,
                expires_on = $5,
                trial = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(purchase.id)
        .bind(purchase.quantity)
        .bind(&purchase.purchase_xid)
        .bind(purchase.started_at)
        .bind(purchase.expires_on)
        .bind(purchase.trial)
        .bind(purchase.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EntitlementError::NotFound(format!(
                "Add-on purchase {}",
                purchase.id
            )));
        }

        Ok(())
    }

    async fn find_purchase(&self, id: PurchaseId) -> EntitlementResult<Option<AddOnPurchase>> {
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_PURCHASES);
        qb.push(" WHERE p.id = ").push_bind(id);

        let purchase = qb
            .build_query_as::<AddOnPurchase>()
            .fetch_optional(&self.pool)
            .await?;

        Ok(purchase)
    }

    async fn find_purchase_for_slot(
        &self,
        namespace_id: Option<NamespaceId>,
        add_on: AddOnName,
    ) -> EntitlementResult<Option<AddOnPurchase>> {
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_PURCHASES);
        qb.push(" WHERE LOWER(a.name) = ").push_bind(add_on.as_str());
        match namespace_id {
            Some(id) => qb.push(" AND p.namespace_id = ").push_bind(id),
            None => qb.push(" AND p.namespace_id IS NULL"),
        };

        let purchase = qb
            .build_query_as::<AddOnPurchase>()
            .fetch_optional(&self.pool)
            .await?;

        Ok(purchase)
    }

    async fn query_purchases(&self, query: &PurchaseQuery) -> EntitlementResult<Vec<AddOnPurchase>> {
        if query.is_unsatisfiable() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Postgres>::new(SELECT_PURCHASES);
        qb.push(" WHERE TRUE");

        if let Some(names) = &query.add_on_names {
            qb.push(" AND LOWER(a.name) = ANY(")
                .push_bind(name_strings(names.iter().copied()))
                .push(")");
        }

        match &query.namespace {
            NamespaceScope::Any => {}
            NamespaceScope::Instance => {
                qb.push(" AND p.namespace_id IS NULL");
            }
            NamespaceScope::In(ids) => {
                let ids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
                qb.push(" AND p.namespace_id = ANY(").push_bind(ids).push(")");
            }
        }

        match query.activity {
            None => {}
            Some(Activity::Active { today }) => {
                qb.push(" AND p.expires_on >= ").push_bind(today);
            }
            Some(Activity::Expired { today }) => {
                qb.push(" AND p.expires_on < ").push_bind(today);
            }
            Some(Activity::ReadyForCleanup { today, delay }) => {
                let Some(cutoff) = today.checked_sub(delay) else {
                    return Ok(Vec::new());
                };
                qb.push(" AND p.expires_on < ").push_bind(cutoff);
            }
        }

        if let Some(trial) = query.trial {
            qb.push(" AND p.trial = ").push_bind(trial);
        }

        qb.push(" ORDER BY p.created_at, p.id");

        let purchases = qb
            .build_query_as::<AddOnPurchase>()
            .fetch_all(&self.pool)
            .await?;

        Ok(purchases)
    }

    async fn distinct_add_on_names(&self) -> EntitlementResult<BTreeSet<AddOnName>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT a.name
            FROM add_on_purchases p
            JOIN add_ons a ON a.id = p.add_on_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|(name,)| name.parse()).collect()
    }

    async fn distinct_namespace_ids(&self) -> EntitlementResult<BTreeSet<NamespaceId>> {
        let rows: Vec<(NamespaceId,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT namespace_id
            FROM add_on_purchases
            WHERE namespace_id IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn refresh_candidates(
        &self,
        families: &[AddOnName],
        now: OffsetDateTime,
        threshold: Duration,
        limit: usize,
    ) -> EntitlementResult<Vec<AddOnPurchase>> {
        let stale_before = now - threshold;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut qb = QueryBuilder::<Postgres>::new(SELECT_PURCHASES);
        qb.push(" WHERE LOWER(a.name) = ANY(")
            .push_bind(name_strings(families.iter().copied()))
            .push(")")
            .push(" AND (p.last_assigned_users_refreshed_at IS NULL OR p.last_assigned_users_refreshed_at < ")
            .push_bind(stale_before)
            .push(")")
            .push(" ORDER BY p.last_assigned_users_refreshed_at ASC NULLS FIRST, p.id")
            .push(" LIMIT ")
            .push_bind(limit);

        let purchases = qb
            .build_query_as::<AddOnPurchase>()
            .fetch_all(&self.pool)
            .await?;

        Ok(purchases)
    }

    async fn mark_assigned_users_refreshed(
        &self,
        id: PurchaseId,
        at: OffsetDateTime,
    ) -> EntitlementResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE add_on_purchases
            SET last_assigned_users_refreshed_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EntitlementError::NotFound(format!("Add-on purchase {}", id)));
        }

        Ok(())
    }

    async fn delete_purchase(&self, id: PurchaseId) -> EntitlementResult<bool> {
        // user_add_on_assignments rows go via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM add_on_purchases WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AssignmentStore for PgStore {
    async fn insert_assignment(
        &self,
        purchase_id: PurchaseId,
        user_id: UserId,
    ) -> EntitlementResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_add_on_assignments (user_id, add_on_purchase_id)
            VALUES ($1, $2)
            ON CONFLICT (add_on_purchase_id, user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(purchase_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            // 23503 = foreign_key_violation
            let missing_purchase = e
                .as_database_error()
                .and_then(|d| d.code())
                .is_some_and(|code| code == "23503");
            if missing_purchase {
                EntitlementError::NotFound(format!("Add-on purchase {}", purchase_id))
            } else {
                EntitlementError::from(e)
            }
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_assignment(
        &self,
        purchase_id: PurchaseId,
        user_id: UserId,
    ) -> EntitlementResult<bool> {
        let result = sqlx::query(
            "DELETE FROM user_add_on_assignments WHERE add_on_purchase_id = $1 AND user_id = $2",
        )
        .bind(purchase_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn assignment_exists(
        &self,
        purchase_id: PurchaseId,
        user_id: UserId,
    ) -> EntitlementResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM user_add_on_assignments
                WHERE add_on_purchase_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(purchase_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn assigned_user_ids(&self, purchase_id: PurchaseId) -> EntitlementResult<BTreeSet<UserId>> {
        let rows: Vec<(UserId,)> = sqlx::query_as(
            "SELECT user_id FROM user_add_on_assignments WHERE add_on_purchase_id = $1",
        )
        .bind(purchase_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn count_assignments(&self, purchase_id: PurchaseId) -> EntitlementResult<usize> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM user_add_on_assignments WHERE add_on_purchase_id = $1",
        )
        .bind(purchase_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn filter_assigned_user_ids(
        &self,
        purchase_id: PurchaseId,
        candidates: &[UserId],
    ) -> EntitlementResult<Vec<UserId>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(UserId,)> = sqlx::query_as(
            r#"
            SELECT user_id
            FROM user_add_on_assignments
            WHERE add_on_purchase_id = $1 AND user_id = ANY($2)
            ORDER BY user_id
            "#,
        )
        .bind(purchase_id)
        .bind(uuids(candidates))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn delete_assignments(
        &self,
        purchase_id: PurchaseId,
        user_ids: &[UserId],
    ) -> EntitlementResult<usize> {
        if user_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            DELETE FROM user_add_on_assignments
            WHERE add_on_purchase_id = $1 AND user_id = ANY($2)
            "#,
        )
        .bind(purchase_id)
        .bind(uuids(user_ids))
        .execute(&self.pool)
        .await?;

        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}

// Implement FromRow for AddOn
impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for AddOn {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let name: String = row.try_get("name")?;
        Ok(Self {
            id: row.try_get::<AddOnId, _>("id")?,
            name: parse_add_on_name(&name)?,
            description: row.try_get("description")?,
            seat_assignable: row.try_get("seat_assignable")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

// Implement FromRow for AddOnPurchase
impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for AddOnPurchase {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let add_on_name: String = row.try_get("add_on_name")?;
        Ok(Self {
            id: row.try_get::<PurchaseId, _>("id")?,
            add_on_id: row.try_get::<AddOnId, _>("add_on_id")?,
            add_on_name: parse_add_on_name(&add_on_name)?,
            namespace_id: row.try_get::<Option<NamespaceId>, _>("namespace_id")?,
            organization_id: row.try_get::<OrganizationId, _>("organization_id")?,
            quantity: row.try_get("quantity")?,
            purchase_xid: row.try_get("purchase_xid")?,
            started_at: row.try_get::<Date, _>("started_at")?,
            expires_on: row.try_get::<Date, _>("expires_on")?,
            trial: row.try_get("trial")?,
            last_assigned_users_refreshed_at: row.try_get("last_assigned_users_refreshed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn parse_add_on_name(name: &str) -> Result<AddOnName, sqlx::Error> {
    name.parse().map_err(|e: EntitlementError| sqlx::Error::Decode(Box::new(e)))
}
