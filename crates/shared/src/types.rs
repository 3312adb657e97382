//! Common types used across Seatkeeper

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SharedError;

// =============================================================================
// ID Wrappers
// =============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// User ID wrapper
    UserId
);
id_type!(
    /// Namespace (group, user or project namespace) ID wrapper
    NamespaceId
);
id_type!(
    /// Project ID wrapper
    ProjectId
);
id_type!(
    /// Organization ID wrapper
    OrganizationId
);
id_type!(
    /// Add-on catalog entry ID wrapper
    AddOnId
);
id_type!(
    /// Add-on purchase ID wrapper
    PurchaseId
);

// =============================================================================
// Deployment
// =============================================================================

/// How the host application is deployed.
///
/// Multi-tenant (SaaS) deployments scope every purchase to a top-level group,
/// self-managed deployments hold instance-wide purchases without a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Deployment {
    #[serde(rename = "saas")]
    SaaS,
    #[default]
    SelfManaged,
}

impl Deployment {
    pub fn is_saas(&self) -> bool {
        matches!(self, Self::SaaS)
    }
}

impl std::fmt::Display for Deployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SaaS => write!(f, "saas"),
            Self::SelfManaged => write!(f, "self_managed"),
        }
    }
}

impl std::str::FromStr for Deployment {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "saas" | "multi_tenant" => Ok(Self::SaaS),
            "self_managed" | "self-managed" | "single_tenant" => Ok(Self::SelfManaged),
            _ => Err(SharedError::InvalidValue {
                field: "deployment",
                value: s.to_string(),
            }),
        }
    }
}

// =============================================================================
// Tenancy
// =============================================================================

/// Kind of namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    Group,
    User,
    Project,
}

impl std::fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Group => write!(f, "group"),
            Self::User => write!(f, "user"),
            Self::Project => write!(f, "project"),
        }
    }
}

impl std::str::FromStr for NamespaceKind {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "group" => Ok(Self::Group),
            "user" => Ok(Self::User),
            "project" => Ok(Self::Project),
            _ => Err(SharedError::InvalidValue {
                field: "namespace kind",
                value: s.to_string(),
            }),
        }
    }
}

/// A namespace as seen by the entitlement engine. Owned by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: NamespaceId,
    pub kind: NamespaceKind,
    pub parent_id: Option<NamespaceId>,
    /// Full path, e.g. `acme/platform`
    pub path: String,
}

impl Namespace {
    /// Top-level group with no parent
    pub fn group(path: impl Into<String>) -> Self {
        Self {
            id: NamespaceId::new(),
            kind: NamespaceKind::Group,
            parent_id: None,
            path: path.into(),
        }
    }

    /// Subgroup nested under `parent`
    pub fn subgroup(parent: &Namespace, name: &str) -> Self {
        Self {
            id: NamespaceId::new(),
            kind: NamespaceKind::Group,
            parent_id: Some(parent.id),
            path: format!("{}/{}", parent.path, name),
        }
    }

    /// Personal namespace of a user
    pub fn user(path: impl Into<String>) -> Self {
        Self {
            id: NamespaceId::new(),
            kind: NamespaceKind::User,
            parent_id: None,
            path: path.into(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Only top-level groups may own purchases on SaaS
    pub fn is_top_level_group(&self) -> bool {
        self.kind == NamespaceKind::Group && self.is_root()
    }
}

/// A project reference carrying its top-level namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub namespace_id: NamespaceId,
    pub root_namespace_id: NamespaceId,
}

impl Project {
    pub fn new(namespace_id: NamespaceId, root_namespace_id: NamespaceId) -> Self {
        Self {
            id: ProjectId::new(),
            namespace_id,
            root_namespace_id,
        }
    }

    /// Project sitting directly in a top-level group
    pub fn in_root(root: &Namespace) -> Self {
        Self::new(root.id, root.id)
    }
}
