//! Local identity store
//!
//! Connection management, migrations, and repositories for users and roles.

use idsync_config::DatabaseConfig;
use sqlx::SqlitePool;

pub mod connection;
pub mod entities;
pub mod migrations;
pub mod repos;
pub mod types;

pub use connection::prepare_database;
pub use migrations::run_migrations;

pub use repos::{ClaimRepository, RoleRepository, UserRepository};

pub use entities::{
    NewUser, Page, Role, RoleFilter, RoleSortField, SortOrder, User, UserFilter, UserSortField,
    DEFAULT_PAGE_SIZE, DEFAULT_ROLE_CODE, MAX_PAGE_SIZE, SYSTEM_ROLE_CODES,
};

pub use types::{
    errors::{DatabaseError, RoleError, UserError},
    DatabaseResult, RoleResult, UserResult,
};

pub use sqlx::{Sqlite, SqliteConnection, SqlitePool as Pool, Transaction};

/// Connect and bring the schema up to date.
pub async fn initialize_database(config: &DatabaseConfig) -> DatabaseResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| DatabaseError::ConnectionError(format!("{e:#}")))?;

    run_migrations(&pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("{e:#}")))?;

    Ok(pool)
}
