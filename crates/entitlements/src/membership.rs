//! Membership and eligibility collaborators
//!
//! The host application owns memberships and user accounts. The engine only
//! asks boolean questions: does this user hold at least the minimum
//! qualifying membership in a namespace, which namespaces qualify for a user,
//! and (self-managed) which accounts are active.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use seatkeeper_shared::{Namespace, NamespaceId, UserId};

use crate::error::{EntitlementError, EntitlementResult};

/// Membership lookups. The minimum qualifying role is the host's policy.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    async fn has_minimum_access(
        &self,
        user: UserId,
        namespace: NamespaceId,
    ) -> EntitlementResult<bool>;

    /// Namespaces in which `user` holds at least the minimum qualifying membership
    async fn namespaces_for(&self, user: UserId) -> EntitlementResult<BTreeSet<NamespaceId>>;

    /// Bulk form of [`Self::has_minimum_access`]
    async fn eligible_user_ids(
        &self,
        namespace: NamespaceId,
        candidates: &BTreeSet<UserId>,
    ) -> EntitlementResult<BTreeSet<UserId>> {
        let mut eligible = BTreeSet::new();
        for &user in candidates {
            if self.has_minimum_access(user, namespace).await? {
                eligible.insert(user);
            }
        }
        Ok(eligible)
    }
}

/// Active (non-blocked) accounts on a self-managed instance
#[async_trait]
pub trait EligibleUsersFinder: Send + Sync {
    async fn execute(&self) -> EntitlementResult<BTreeSet<UserId>>;
}

/// Namespace lookup for validation and log context
#[async_trait]
pub trait NamespaceDirectory: Send + Sync {
    async fn find_namespace(&self, id: NamespaceId) -> EntitlementResult<Option<Namespace>>;
}

fn poisoned() -> EntitlementError {
    EntitlementError::Internal("directory lock poisoned".to_string())
}

/// In-process directory backing all three collaborators
#[derive(Default)]
pub struct InMemoryDirectory {
    namespaces: RwLock<HashMap<NamespaceId, Namespace>>,
    members: RwLock<HashMap<NamespaceId, BTreeSet<UserId>>>,
    active_users: RwLock<BTreeSet<UserId>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_namespace(&self, namespace: Namespace) -> EntitlementResult<()> {
        self.namespaces
            .write()
            .map_err(|_| poisoned())?
            .insert(namespace.id, namespace);
        Ok(())
    }

    /// Grant `user` a qualifying membership in `namespace`
    pub fn add_member(&self, namespace: NamespaceId, user: UserId) -> EntitlementResult<()> {
        self.members
            .write()
            .map_err(|_| poisoned())?
            .entry(namespace)
            .or_default()
            .insert(user);
        Ok(())
    }

    pub fn remove_member(&self, namespace: NamespaceId, user: UserId) -> EntitlementResult<()> {
        if let Some(users) = self
            .members
            .write()
            .map_err(|_| poisoned())?
            .get_mut(&namespace)
        {
            users.remove(&user);
        }
        Ok(())
    }

    pub fn activate_user(&self, user: UserId) -> EntitlementResult<()> {
        self.active_users.write().map_err(|_| poisoned())?.insert(user);
        Ok(())
    }

    pub fn block_user(&self, user: UserId) -> EntitlementResult<()> {
        self.active_users.write().map_err(|_| poisoned())?.remove(&user);
        Ok(())
    }
}

#[async_trait]
impl MembershipDirectory for InMemoryDirectory {
    async fn has_minimum_access(
        &self,
        user: UserId,
        namespace: NamespaceId,
    ) -> EntitlementResult<bool> {
        let members = self.members.read().map_err(|_| poisoned())?;
        Ok(members.get(&namespace).is_some_and(|u| u.contains(&user)))
    }

    async fn namespaces_for(&self, user: UserId) -> EntitlementResult<BTreeSet<NamespaceId>> {
        let members = self.members.read().map_err(|_| poisoned())?;
        Ok(members
            .iter()
            .filter(|(_, users)| users.contains(&user))
            .map(|(ns, _)| *ns)
            .collect())
    }

    async fn eligible_user_ids(
        &self,
        namespace: NamespaceId,
        candidates: &BTreeSet<UserId>,
    ) -> EntitlementResult<BTreeSet<UserId>> {
        let members = self.members.read().map_err(|_| poisoned())?;
        Ok(members
            .get(&namespace)
            .map(|users| users.intersection(candidates).copied().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl EligibleUsersFinder for InMemoryDirectory {
    async fn execute(&self) -> EntitlementResult<BTreeSet<UserId>> {
        Ok(self.active_users.read().map_err(|_| poisoned())?.clone())
    }
}

#[async_trait]
impl NamespaceDirectory for InMemoryDirectory {
    async fn find_namespace(&self, id: NamespaceId) -> EntitlementResult<Option<Namespace>> {
        Ok(self
            .namespaces
            .read()
            .map_err(|_| poisoned())?
            .get(&id)
            .cloned())
    }
}
