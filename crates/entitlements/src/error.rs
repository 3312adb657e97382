//! Entitlement error types

use seatkeeper_shared::{PurchaseId, SharedError, UserId};
use serde::Serialize;
use thiserror::Error;

/// Entitlement-specific errors
#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// Caller handed the resolver a resource kind it cannot scope
    #[error("Unsupported resource type: {0}")]
    UnsupportedResource(String),

    #[error("User {user_id} is already assigned to add-on purchase {purchase_id}")]
    AlreadyAssigned {
        user_id: UserId,
        purchase_id: PurchaseId,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Lease error: {0}")]
    Lease(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EntitlementError {
    /// Errors worth retrying: the backing store or a collaborator hiccuped
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Cache(_) | Self::Lease(_) | Self::Collaborator(_)
        )
    }

    /// Per-field errors, if this is a validation failure
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for EntitlementError {
    fn from(err: sqlx::Error) -> Self {
        // 23505 = unique_violation
        if let Some(db_err) = err.as_database_error() {
            if db_err.code().as_deref() == Some("23505") {
                return EntitlementError::AlreadyExists(db_err.message().to_string());
            }
        }
        EntitlementError::Database(err.to_string())
    }
}

impl From<redis::RedisError> for EntitlementError {
    fn from(err: redis::RedisError) -> Self {
        EntitlementError::Cache(err.to_string())
    }
}

impl From<SharedError> for EntitlementError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::NotFound(what) => EntitlementError::NotFound(what),
            other => EntitlementError::InvalidInput(other.to_string()),
        }
    }
}

pub type EntitlementResult<T> = Result<T, EntitlementError>;

/// What went wrong with a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    Blank,
    TooLong { max: usize },
    OutOfRange { min: i64, max: i64 },
    Taken,
    NamespaceTypeMismatch,
}

/// A violated invariant on one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub kind: ValidationErrorKind,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ValidationErrorKind::Blank => write!(f, "{} can't be blank", self.field),
            ValidationErrorKind::TooLong { max } => {
                write!(f, "{} is too long (maximum is {} characters)", self.field, max)
            }
            ValidationErrorKind::OutOfRange { min, max } => {
                write!(f, "{} must be between {} and {}", self.field, min, max)
            }
            ValidationErrorKind::Taken => write!(f, "{} has already been taken", self.field),
            ValidationErrorKind::NamespaceTypeMismatch => {
                write!(f, "{} must be a top-level group", self.field)
            }
        }
    }
}

/// Collected validation failures, in the order they were found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, kind: ValidationErrorKind) {
        self.0.push(FieldError { field, kind });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// Whether `field` failed with `kind`
    pub fn has(&self, field: &str, kind: ValidationErrorKind) -> bool {
        self.0.iter().any(|e| e.field == field && e.kind == kind)
    }

    /// Whether `field` failed at all
    pub fn on(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// `Ok(())` when nothing was collected
    pub fn into_result(self) -> EntitlementResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(EntitlementError::Validation(self))
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let messages: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", messages.join(", "))
    }
}
