//! Remote identity provider access.
//!
//! [`IdentityProvider`] is the functional contract the synchronization engine
//! depends on. [`ManagementClient`] implements it against an Auth0-style
//! management API; [`InMemoryIdentityProvider`] implements it in process.

use async_trait::async_trait;

pub mod client;
pub mod error;
pub mod memory;
pub mod models;

pub use client::ManagementClient;
pub use error::{IdentityError, IdentityResult};
pub use memory::{CallCounts, InMemoryIdentityProvider};
pub use models::{
    CreateIdentityRequest, IdentityFlags, RemoteIdentity, ServiceToken, UpdateIdentityRequest,
};

/// Operations against the identity provider.
///
/// Every call is bounded by the implementation's request timeout. A missing
/// identity is reported as `Ok(None)` by the lookups, never as an error.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn acquire_service_token(&self) -> IdentityResult<ServiceToken>;

    async fn create_identity(&self, request: &CreateIdentityRequest)
        -> IdentityResult<RemoteIdentity>;

    async fn get_identity_by_reference(
        &self,
        remote_ref: &str,
    ) -> IdentityResult<Option<RemoteIdentity>>;

    async fn get_identity_by_email(&self, email: &str) -> IdentityResult<Option<RemoteIdentity>>;

    async fn update_identity(
        &self,
        remote_ref: &str,
        changes: &UpdateIdentityRequest,
    ) -> IdentityResult<RemoteIdentity>;

    async fn set_blocked(&self, remote_ref: &str, blocked: bool) -> IdentityResult<()>;

    async fn delete_identity(&self, remote_ref: &str) -> IdentityResult<()>;
}
