//! In-process identity provider for local development and tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::{IdentityError, IdentityResult};
use crate::models::{CreateIdentityRequest, RemoteIdentity, ServiceToken, UpdateIdentityRequest};
use crate::IdentityProvider;

/// Number of calls made to each provider operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub token: usize,
    pub create: usize,
    pub get_by_reference: usize,
    pub get_by_email: usize,
    pub update: usize,
    pub set_blocked: usize,
    pub delete: usize,
}

#[derive(Debug, Default)]
struct Failures {
    creates: usize,
    lookups: bool,
    updates: bool,
    blocking: bool,
    deletes: bool,
}

#[derive(Debug, Default)]
struct State {
    identities: HashMap<String, RemoteIdentity>,
    calls: CallCounts,
    failures: Failures,
    latency: Option<Duration>,
}

/// Identity provider that keeps identities in memory.
///
/// Supports failure injection and artificial latency so callers can exercise
/// their partial-failure handling without a network.
#[derive(Debug, Default)]
pub struct InMemoryIdentityProvider {
    state: Mutex<State>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    /// Fail the next `count` create calls with a transport error.
    pub fn fail_next_creates(&self, count: usize) {
        self.state().failures.creates = count;
    }

    pub fn fail_lookups(&self, enabled: bool) {
        self.state().failures.lookups = enabled;
    }

    pub fn fail_updates(&self, enabled: bool) {
        self.state().failures.updates = enabled;
    }

    pub fn fail_blocking(&self, enabled: bool) {
        self.state().failures.blocking = enabled;
    }

    pub fn fail_deletes(&self, enabled: bool) {
        self.state().failures.deletes = enabled;
    }

    /// Register an identity that exists before the test starts.
    pub fn insert_identity(&self, identity: RemoteIdentity) {
        self.state()
            .identities
            .insert(identity.user_id.clone(), identity);
    }

    /// Drop an identity without going through the provider API, as if an
    /// operator deleted it on the provider side.
    pub fn remove_out_of_band(&self, remote_ref: &str) -> Option<RemoteIdentity> {
        self.state().identities.remove(remote_ref)
    }

    pub fn identity(&self, remote_ref: &str) -> Option<RemoteIdentity> {
        self.state().identities.get(remote_ref).cloned()
    }

    pub fn identity_count(&self) -> usize {
        self.state().identities.len()
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    async fn delay(&self) {
        let latency = self.state().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn injected(operation: &str) -> IdentityError {
    IdentityError::Transport(format!("injected {operation} failure"))
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn acquire_service_token(&self) -> IdentityResult<ServiceToken> {
        self.state().calls.token += 1;
        Ok(ServiceToken::new("in-memory", Duration::from_secs(3600)))
    }

    async fn create_identity(
        &self,
        request: &CreateIdentityRequest,
    ) -> IdentityResult<RemoteIdentity> {
        self.state().calls.create += 1;
        self.delay().await;

        let mut state = self.state();
        if state.failures.creates > 0 {
            state.failures.creates -= 1;
            return Err(injected("create"));
        }

        let taken = state
            .identities
            .values()
            .any(|identity| identity.email.as_deref() == Some(request.email.as_str()));
        if taken {
            return Err(IdentityError::Status {
                status: 409,
                body: "The user already exists.".to_string(),
            });
        }

        let key = Uuid::new_v4().simple().to_string();
        let identity = RemoteIdentity {
            user_id: format!("memory|{key}"),
            email: Some(request.email.clone()),
            email_verified: request.flags.email_verified,
            blocked: request.flags.blocked,
            picture: Some(format!("https://avatars.invalid/{key}.png")),
            name: request.name.clone(),
        };
        state
            .identities
            .insert(identity.user_id.clone(), identity.clone());

        debug!(remote_ref = %identity.user_id, "in-memory identity created");
        Ok(identity)
    }

    async fn get_identity_by_reference(
        &self,
        remote_ref: &str,
    ) -> IdentityResult<Option<RemoteIdentity>> {
        self.state().calls.get_by_reference += 1;
        self.delay().await;

        let state = self.state();
        if state.failures.lookups {
            return Err(injected("lookup"));
        }
        Ok(state.identities.get(remote_ref).cloned())
    }

    async fn get_identity_by_email(&self, email: &str) -> IdentityResult<Option<RemoteIdentity>> {
        self.state().calls.get_by_email += 1;
        self.delay().await;

        let state = self.state();
        if state.failures.lookups {
            return Err(injected("lookup"));
        }
        Ok(state
            .identities
            .values()
            .find(|identity| identity.email.as_deref() == Some(email))
            .cloned())
    }

    async fn update_identity(
        &self,
        remote_ref: &str,
        changes: &UpdateIdentityRequest,
    ) -> IdentityResult<RemoteIdentity> {
        self.state().calls.update += 1;
        self.delay().await;

        let mut state = self.state();
        if state.failures.updates {
            return Err(injected("update"));
        }

        let identity = state
            .identities
            .get_mut(remote_ref)
            .ok_or_else(|| IdentityError::Status {
                status: 404,
                body: "The user does not exist.".to_string(),
            })?;

        if let Some(name) = &changes.name {
            identity.name = Some(name.clone());
        }
        if let Some(picture) = &changes.picture {
            identity.picture = Some(picture.clone());
        }
        if let Some(blocked) = changes.blocked {
            identity.blocked = blocked;
        }

        Ok(identity.clone())
    }

    async fn set_blocked(&self, remote_ref: &str, blocked: bool) -> IdentityResult<()> {
        self.state().calls.set_blocked += 1;
        self.delay().await;

        let mut state = self.state();
        if state.failures.blocking {
            return Err(injected("block"));
        }

        match state.identities.get_mut(remote_ref) {
            Some(identity) => {
                identity.blocked = blocked;
                Ok(())
            }
            None => Err(IdentityError::Status {
                status: 404,
                body: "The user does not exist.".to_string(),
            }),
        }
    }

    async fn delete_identity(&self, remote_ref: &str) -> IdentityResult<()> {
        self.state().calls.delete += 1;
        self.delay().await;

        let mut state = self.state();
        if state.failures.deletes {
            return Err(injected("delete"));
        }
        state.identities.remove(remote_ref);
        Ok(())
    }
}
