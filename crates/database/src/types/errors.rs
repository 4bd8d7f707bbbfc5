//! Error types for the database layer

use thiserror::Error;

/// General database error
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    #[error("Database migration error: {0}")]
    MigrationError(String),

    #[error("Database query error: {0}")]
    QueryError(String),
}

/// User-specific database errors
#[derive(Debug, Error)]
pub enum UserError {
    #[error("User not found")]
    UserNotFound,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Username already exists")]
    UsernameAlreadyExists,

    #[error("Remote reference already linked to another user")]
    RemoteRefAlreadyLinked,

    #[error("Corrupt user row: {0}")]
    CorruptRow(String),

    #[error("User row violates a state constraint: {0}")]
    ConstraintViolation(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Role-specific database errors
#[derive(Debug, Error)]
pub enum RoleError {
    #[error("Role not found")]
    RoleNotFound,

    #[error("Role code already exists")]
    CodeAlreadyExists,

    #[error("Corrupt role row: {0}")]
    CorruptRow(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) if db_err.message().contains("UNIQUE constraint failed") => {
            Some(db_err.message().to_string())
        }
        _ => None,
    }
}

impl From<sqlx::Error> for UserError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(message) = unique_violation(&err) {
            return if message.contains("users.email") {
                UserError::EmailAlreadyExists
            } else if message.contains("users.username") {
                UserError::UsernameAlreadyExists
            } else if message.contains("users.remote_ref") {
                UserError::RemoteRefAlreadyLinked
            } else {
                UserError::DatabaseError(message)
            };
        }
        match err {
            sqlx::Error::Database(db_err) if db_err.message().contains("CHECK constraint failed") => {
                UserError::ConstraintViolation(db_err.message().to_string())
            }
            sqlx::Error::RowNotFound => UserError::UserNotFound,
            other => UserError::DatabaseError(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        DatabaseError::QueryError(err.to_string())
    }
}

impl From<sqlx::Error> for RoleError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(message) = unique_violation(&err) {
            return if message.contains("roles.code") {
                RoleError::CodeAlreadyExists
            } else {
                RoleError::DatabaseError(message)
            };
        }
        match err {
            sqlx::Error::RowNotFound => RoleError::RoleNotFound,
            other => RoleError::DatabaseError(other.to_string()),
        }
    }
}

impl From<RoleError> for UserError {
    fn from(err: RoleError) -> Self {
        match err {
            RoleError::DatabaseError(message) | RoleError::CorruptRow(message) => {
                UserError::DatabaseError(message)
            }
            other => UserError::DatabaseError(other.to_string()),
        }
    }
}
