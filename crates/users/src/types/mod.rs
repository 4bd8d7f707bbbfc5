//! Shared types for the synchronization engine and admin services.

pub mod actor;
pub mod errors;
pub mod outcomes;
pub mod requests;

pub use actor::Actor;
pub use errors::{ServiceError, ServiceResult};
pub use outcomes::{Disposition, NoOpReason, RemoteSync, SyncOutcome, SyncResult};
pub use requests::{CreateUserRequest, IdentityClaims, ProfileChanges, ReactivateRequest};
