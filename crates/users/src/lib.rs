//! # idsync users
//!
//! Keeps local user records and their identity-provider counterparts in step.
//!
//! ## Architecture
//!
//! - **Services**: [`SyncEngine`] for every operation that crosses the provider
//!   boundary, [`AdminService`] and [`RoleService`] for local-only administration
//! - **Types**: requests, outcomes and the [`ServiceError`] taxonomy
//! - **Utils**: input validation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use idsync_users::{Actor, RecordLocks, SyncEngine, SyncSettings};
//!
//! let engine = SyncEngine::new(pool, provider, RecordLocks::new(), SyncSettings::default());
//! let outcome = engine.deactivate(&Actor::new("ops"), user_id).await?;
//! println!("{:?}", outcome.disposition());
//! ```

pub mod services;
pub mod types;
pub mod utils;

pub use idsync_database::{Page, Role, RoleFilter, SortOrder, User, UserFilter, UserSortField};

pub use services::{
    AdminService, Provisioned, RecordGuard, RecordLocks, RoleService, SyncEngine, SyncSettings,
};
pub use types::{
    Actor, CreateUserRequest, Disposition, IdentityClaims, NoOpReason, ProfileChanges,
    ReactivateRequest, RemoteSync, ServiceError, ServiceResult, SyncOutcome, SyncResult,
};
