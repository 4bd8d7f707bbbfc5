//! Error types for the synchronization engine and admin services.

use std::time::Duration;

use idsync_database::{DatabaseError, RoleError, UserError};
use idsync_identity::IdentityError;
use thiserror::Error;
use uuid::Uuid;

use super::outcomes::Disposition;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The provider call failed before any local change was committed.
    #[error("identity provider call failed, no changes were kept: {0}")]
    RemoteTransport(#[source] IdentityError),

    /// Local change committed, provider did not follow.
    #[error("user {user_id} was updated locally but the identity provider was not: {reason}")]
    Diverged { user_id: Uuid, reason: String },

    #[error("operation exceeded its {0:?} budget")]
    TimedOut(Duration),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ServiceError {
    pub fn user_not_found(key: impl ToString) -> Self {
        ServiceError::NotFound {
            entity: "user",
            key: key.to_string(),
        }
    }

    pub fn role_not_found(key: impl ToString) -> Self {
        ServiceError::NotFound {
            entity: "role",
            key: key.to_string(),
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            ServiceError::Diverged { .. } => Disposition::Diverged,
            _ => Disposition::Rejected,
        }
    }
}

impl From<UserError> for ServiceError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::UserNotFound => ServiceError::user_not_found("requested user"),
            UserError::EmailAlreadyExists => ServiceError::Conflict("email already exists".into()),
            UserError::UsernameAlreadyExists => {
                ServiceError::Conflict("username already exists".into())
            }
            UserError::RemoteRefAlreadyLinked => {
                ServiceError::Conflict("remote identity is already linked to another user".into())
            }
            UserError::ConstraintViolation(message) => ServiceError::InvariantViolation(message),
            UserError::CorruptRow(message) | UserError::DatabaseError(message) => {
                ServiceError::Storage(message)
            }
        }
    }
}

impl From<RoleError> for ServiceError {
    fn from(err: RoleError) -> Self {
        match err {
            RoleError::RoleNotFound => ServiceError::role_not_found("requested role"),
            RoleError::CodeAlreadyExists => ServiceError::Conflict("role code already exists".into()),
            RoleError::CorruptRow(message) | RoleError::DatabaseError(message) => {
                ServiceError::Storage(message)
            }
        }
    }
}

impl From<DatabaseError> for ServiceError {
    fn from(err: DatabaseError) -> Self {
        ServiceError::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        UserError::from(err).into()
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
