//! Identity synchronization engine.
//!
//! Keeps local user rows and provider identities consistent. Every entry point
//! holds an exclusive claim on the affected record for its whole duration
//! (shared with other processes through the database), runs against a single
//! deadline, and applies its own remote-failure policy:
//!
//! | operation           | remote failure                                   |
//! |---------------------|--------------------------------------------------|
//! | `sync_default_user` | no local change, `RemoteTransport`               |
//! | `create_user`       | no local change, `RemoteTransport`               |
//! | `reactivate`        | local commit kept, `Diverged` error              |
//! | `deactivate`        | local commit kept, `RemoteSync::Diverged` result |
//! | `update_profile`    | local commit kept, `Diverged` error              |
//!
//! Local writes run in short transactions that never span a provider call.
//! On the create paths the row is written only once the provider has answered,
//! so an aborted create leaves nothing behind locally.

use std::sync::Arc;
use std::time::Duration;

use idsync_config::{IdentityProviderConfig, SyncConfig, DEFAULT_CONNECTION};
use idsync_database::{NewUser, RoleRepository, User, UserRepository, DEFAULT_ROLE_CODE};
use idsync_identity::{
    CreateIdentityRequest, IdentityFlags, IdentityProvider, RemoteIdentity, UpdateIdentityRequest,
};
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::claims::{RecordClaim, RecordClaims};
use super::deadline::Deadline;
use super::locks::RecordLocks;
use crate::types::{
    Actor, CreateUserRequest, NoOpReason, ProfileChanges, ReactivateRequest, RemoteSync,
    ServiceError, ServiceResult, SyncOutcome, SyncResult,
};
use crate::utils::{validate_display_name, validate_email, validate_password, validate_username};

/// Extra lease time past the operation budget for the final local write.
const LEASE_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Provider connection new identities are created in.
    pub connection: String,
    /// Budget for one entry point, from claiming the record to the last remote call.
    pub operation_timeout: Duration,
}

impl SyncSettings {
    pub fn from_config(provider: &IdentityProviderConfig, sync: &SyncConfig) -> Self {
        Self {
            connection: provider.connection.clone(),
            operation_timeout: Duration::from_secs(sync.operation_timeout_seconds),
        }
    }

    /// How long a record claim outlives a holder that never releases it.
    pub fn claim_lease(&self) -> Duration {
        self.operation_timeout + LEASE_GRACE
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            connection: DEFAULT_CONNECTION.to_string(),
            operation_timeout: Duration::from_secs(30),
        }
    }
}

/// Provider-side result of reconciling a reactivated user.
enum RemoteStep {
    Unblocked(String),
    Recreated(RemoteIdentity),
    Failed(String),
}

#[derive(Clone)]
pub struct SyncEngine {
    users: UserRepository,
    roles: RoleRepository,
    provider: Arc<dyn IdentityProvider>,
    claims: RecordClaims,
    settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(
        pool: SqlitePool,
        provider: Arc<dyn IdentityProvider>,
        locks: RecordLocks,
        settings: SyncSettings,
    ) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            roles: RoleRepository::new(pool.clone()),
            claims: RecordClaims::new(pool, locks, settings.claim_lease()),
            provider,
            settings,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Link the pre-seeded local user `local_id` to a new provider identity.
    ///
    /// Safe to call concurrently and repeatedly, from any number of processes:
    /// the already-synced check runs after the row is claimed, so at most one
    /// caller creates an identity and the others get
    /// [`NoOpReason::AlreadySynced`].
    pub async fn sync_default_user(
        &self,
        local_id: Uuid,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> ServiceResult<SyncResult> {
        validate_email(email)?;
        validate_password(password)?;

        let deadline = Deadline::start(self.settings.operation_timeout);
        let claim = self.claims.user(local_id, &deadline).await?;
        let result = self
            .sync_claimed(&claim, local_id, email, password, display_name, &deadline)
            .await;
        claim.release().await;
        result
    }

    async fn sync_claimed(
        &self,
        claim: &RecordClaim,
        local_id: Uuid,
        email: &str,
        password: &str,
        display_name: Option<&str>,
        deadline: &Deadline,
    ) -> ServiceResult<SyncResult> {
        let Some(user) = deadline.local(self.users.find_by_id(local_id)).await? else {
            info!(user_id = %local_id, "no local user to sync");
            return Ok(SyncResult::NoOp(NoOpReason::UserMissing));
        };

        if let Some(remote_ref) = user.remote_ref.clone() {
            debug!(user_id = %local_id, %remote_ref, "user already synced");
            return Ok(SyncResult::NoOp(NoOpReason::AlreadySynced { remote_ref }));
        }

        let name = display_name.or(user.display_name.as_deref());
        let request = self.identity_request(email, password, name, IdentityFlags::verified());

        let identity = match deadline.remote(self.provider.create_identity(&request)).await {
            Ok(identity) => identity,
            Err(err) => {
                error!(user_id = %local_id, %email, error = %err, "remote create failed, sync aborted");
                return Err(ServiceError::RemoteTransport(err));
            }
        };

        self.link_remote(claim, local_id, &identity, &Actor::identity_sync())
            .await?;
        info!(user_id = %local_id, remote_ref = %identity.user_id, "default user synced");
        Ok(SyncResult::Synced(identity))
    }

    /// Create a user and its provider identity, or resurrect a soft-deleted
    /// user that owns the email.
    pub async fn create_user(
        &self,
        actor: &Actor,
        request: CreateUserRequest,
    ) -> ServiceResult<SyncOutcome> {
        validate_username(&request.username)?;
        validate_email(&request.email)?;
        validate_password(&request.password)?;
        if let Some(name) = request.display_name.as_deref() {
            validate_display_name(name)?;
        }

        let deadline = Deadline::start(self.settings.operation_timeout);
        let claim = self.claims.email(&request.email, &deadline).await?;
        let result = self.create_claimed(actor, request, &claim, &deadline).await;
        claim.release().await;
        result
    }

    async fn create_claimed(
        &self,
        actor: &Actor,
        request: CreateUserRequest,
        email_claim: &RecordClaim,
        deadline: &Deadline,
    ) -> ServiceResult<SyncOutcome> {
        let existing = deadline
            .local(self.users.find_by_email(&request.email))
            .await?;

        match existing {
            Some(user) if !user.deleted => {
                warn!(email = %request.email, user_id = %user.id, "email already in use");
                Err(email_conflict(&request.email))
            }
            Some(user) => {
                info!(user_id = %user.id, email = %request.email, "email belongs to a deleted user, reactivating");
                let reactivate = ReactivateRequest {
                    password: Some(request.password),
                    display_name: request.display_name,
                };
                self.resurrect(actor, user.id, &request.email, &reactivate, deadline)
                    .await
            }
            None => self.create_fresh(actor, &request, email_claim, deadline).await,
        }
    }

    async fn create_fresh(
        &self,
        actor: &Actor,
        request: &CreateUserRequest,
        email_claim: &RecordClaim,
        deadline: &Deadline,
    ) -> ServiceResult<SyncOutcome> {
        let role = deadline
            .local(self.roles.find_by_code(DEFAULT_ROLE_CODE))
            .await?
            .filter(|role| !role.deleted)
            .ok_or_else(|| ServiceError::role_not_found(DEFAULT_ROLE_CODE))?;
        if deadline
            .local(self.users.exists_by_username(&request.username))
            .await?
        {
            return Err(ServiceError::Conflict(format!(
                "username already exists: {}",
                request.username
            )));
        }

        let create = self.identity_request(
            &request.email,
            &request.password,
            request.display_name.as_deref(),
            IdentityFlags::unverified(),
        );
        let identity = match deadline.remote(self.provider.create_identity(&create)).await {
            Ok(identity) => identity,
            Err(err) => {
                error!(email = %request.email, error = %err, "remote create failed, nothing stored");
                return Err(ServiceError::RemoteTransport(err));
            }
        };

        let new_user = NewUser {
            username: request.username.clone(),
            email: Some(request.email.clone()),
            display_name: request.display_name.clone(),
            remote_ref: Some(identity.user_id.clone()),
            avatar_url: identity.picture.clone(),
            activated: true,
            role_ids: vec![role.id],
        };
        let user = match self.insert_linked(email_claim, &new_user, actor).await {
            Ok(user) => user,
            Err(err) => {
                warn!(email = %request.email, remote_ref = %identity.user_id, error = %err, "new user could not be stored");
                self.delete_created_identity(&identity.user_id, &err).await;
                return Err(err);
            }
        };

        info!(user_id = %user.id, remote_ref = %identity.user_id, "user created");
        Ok(SyncOutcome::new(user, RemoteSync::Applied, "user created"))
    }

    async fn insert_linked(
        &self,
        email_claim: &RecordClaim,
        new_user: &NewUser,
        actor: &Actor,
    ) -> ServiceResult<User> {
        let mut tx = self.users.begin().await?;
        email_claim.verify(&mut tx).await?;
        let user = self.users.insert(&mut tx, new_user, actor.as_str()).await?;
        tx.commit().await?;
        Ok(user)
    }

    /// Reactivate the soft-deleted owner of `email` on behalf of a create.
    async fn resurrect(
        &self,
        actor: &Actor,
        user_id: Uuid,
        email: &str,
        request: &ReactivateRequest,
        deadline: &Deadline,
    ) -> ServiceResult<SyncOutcome> {
        let claim = self.claims.user(user_id, deadline).await?;

        // Restored by a concurrent reactivate since the email lookup.
        let result = match deadline.local(self.users.find_by_id(user_id)).await {
            Ok(Some(user)) if !user.deleted => Err(email_conflict(email)),
            Ok(_) => {
                self.reactivate_claimed(actor, user_id, request, &claim, deadline)
                    .await
            }
            Err(err) => Err(err),
        };

        claim.release().await;
        result
    }

    /// Restore a soft-deleted user and bring its provider identity back to
    /// unblocked, recreating it if it no longer exists.
    ///
    /// Provider failures after the local restore are returned as
    /// [`ServiceError::Diverged`]; the local restore stays committed.
    pub async fn reactivate(
        &self,
        actor: &Actor,
        user_id: Uuid,
        request: ReactivateRequest,
    ) -> ServiceResult<SyncOutcome> {
        if let Some(name) = request.display_name.as_deref() {
            validate_display_name(name)?;
        }
        if let Some(password) = request.password.as_deref() {
            validate_password(password)?;
        }

        let deadline = Deadline::start(self.settings.operation_timeout);
        let claim = self.claims.user(user_id, &deadline).await?;
        let result = self
            .reactivate_claimed(actor, user_id, &request, &claim, &deadline)
            .await;
        claim.release().await;
        result
    }

    async fn reactivate_claimed(
        &self,
        actor: &Actor,
        user_id: Uuid,
        request: &ReactivateRequest,
        claim: &RecordClaim,
        deadline: &Deadline,
    ) -> ServiceResult<SyncOutcome> {
        let mut tx = deadline.local(self.users.begin()).await?;
        deadline.within(claim.verify(&mut tx)).await??;
        let mut user = deadline
            .local(self.users.find_by_id_in(&mut tx, user_id))
            .await?
            .ok_or_else(|| ServiceError::user_not_found(user_id))?;

        if !user.deleted {
            return Err(ServiceError::InvariantViolation(format!(
                "user {user_id} is already active"
            )));
        }

        user.mark_restored();
        if let Some(name) = &request.display_name {
            user.display_name = Some(name.clone());
        }
        let user = deadline
            .local(self.users.save(&mut tx, &user, actor.as_str()))
            .await?;
        tx.commit().await?;
        info!(user_id = %user.id, "user restored locally");

        match self.unblock_or_recreate(&user, request, deadline).await {
            RemoteStep::Unblocked(remote_ref) => {
                info!(user_id = %user.id, %remote_ref, "user reactivated and unblocked");
                Ok(SyncOutcome::new(
                    user,
                    RemoteSync::Applied,
                    "user reactivated and unblocked",
                ))
            }
            RemoteStep::Recreated(identity) => {
                match self.link_remote(claim, user.id, &identity, actor).await {
                    Ok(user) => {
                        info!(user_id = %user.id, remote_ref = %identity.user_id, "user reactivated with a new remote identity");
                        Ok(SyncOutcome::new(
                            user,
                            RemoteSync::Applied,
                            "user reactivated with a new remote identity",
                        ))
                    }
                    Err(err) => Err(self.diverged(
                        &user,
                        format!("failed to link the new remote identity: {err}"),
                    )),
                }
            }
            RemoteStep::Failed(reason) => Err(self.diverged(&user, reason)),
        }
    }

    fn diverged(&self, user: &User, reason: String) -> ServiceError {
        error!(
            user_id = %user.id,
            remote_ref = ?user.remote_ref,
            %reason,
            "user reactivated locally but the identity provider diverged"
        );
        ServiceError::Diverged {
            user_id: user.id,
            reason,
        }
    }

    async fn unblock_or_recreate(
        &self,
        user: &User,
        request: &ReactivateRequest,
        deadline: &Deadline,
    ) -> RemoteStep {
        if let Some(remote_ref) = user.remote_ref.as_deref() {
            match deadline
                .remote(self.provider.get_identity_by_reference(remote_ref))
                .await
            {
                Ok(Some(_)) => {
                    return match deadline
                        .remote(self.provider.set_blocked(remote_ref, false))
                        .await
                    {
                        Ok(()) => RemoteStep::Unblocked(remote_ref.to_string()),
                        Err(err) => RemoteStep::Failed(format!(
                            "failed to unblock remote identity {remote_ref}: {err}"
                        )),
                    };
                }
                Ok(None) => {
                    warn!(user_id = %user.id, %remote_ref, "remote identity missing, recreating it");
                }
                Err(err) => {
                    return RemoteStep::Failed(format!(
                        "failed to look up remote identity {remote_ref}: {err}"
                    ));
                }
            }
        }

        let Some(password) = request.password.as_deref() else {
            return RemoteStep::Failed(
                "remote identity has to be created but no password was supplied".to_string(),
            );
        };
        let Some(email) = user.email.as_deref() else {
            return RemoteStep::Failed(
                "remote identity has to be created but the user has no email".to_string(),
            );
        };

        let create = self.identity_request(
            email,
            password,
            user.display_name.as_deref(),
            IdentityFlags::unverified(),
        );
        match deadline.remote(self.provider.create_identity(&create)).await {
            Ok(identity) => RemoteStep::Recreated(identity),
            Err(err) => RemoteStep::Failed(format!("failed to create remote identity: {err}")),
        }
    }

    /// Soft-delete a user and block its provider identity on a best-effort
    /// basis. A failed block is reported in the outcome, not as an error.
    pub async fn deactivate(&self, actor: &Actor, user_id: Uuid) -> ServiceResult<SyncOutcome> {
        let deadline = Deadline::start(self.settings.operation_timeout);
        let claim = self.claims.user(user_id, &deadline).await?;
        let result = self
            .deactivate_claimed(actor, user_id, &claim, &deadline)
            .await;
        claim.release().await;
        result
    }

    async fn deactivate_claimed(
        &self,
        actor: &Actor,
        user_id: Uuid,
        claim: &RecordClaim,
        deadline: &Deadline,
    ) -> ServiceResult<SyncOutcome> {
        let mut tx = deadline.local(self.users.begin()).await?;
        deadline.within(claim.verify(&mut tx)).await??;
        let mut user = deadline
            .local(self.users.find_by_id_in(&mut tx, user_id))
            .await?
            .ok_or_else(|| ServiceError::user_not_found(user_id))?;

        if user.deleted {
            return Err(ServiceError::InvariantViolation(format!(
                "user {user_id} is already deleted"
            )));
        }

        user.mark_deleted();
        let user = deadline
            .local(self.users.save(&mut tx, &user, actor.as_str()))
            .await?;
        tx.commit().await?;
        info!(user_id = %user.id, "user deactivated");

        let Some(remote_ref) = user.remote_ref.clone() else {
            return Ok(SyncOutcome::new(
                user,
                RemoteSync::Skipped,
                "user deactivated; no remote identity to block",
            ));
        };

        match deadline
            .remote(self.provider.set_blocked(&remote_ref, true))
            .await
        {
            Ok(()) => Ok(SyncOutcome::new(
                user,
                RemoteSync::Applied,
                "user deactivated and blocked",
            )),
            Err(err) => {
                warn!(
                    user_id = %user.id,
                    %remote_ref,
                    error = %err,
                    "user deactivated locally but the remote block failed"
                );
                let reason = format!("failed to block remote identity {remote_ref}: {err}");
                Ok(SyncOutcome::new(
                    user,
                    RemoteSync::Diverged { reason },
                    "user deactivated; remote block failed, retry recommended",
                ))
            }
        }
    }

    /// Update the profile of the user linked to `remote_ref`.
    ///
    /// The local change commits first. A provider failure afterwards is
    /// returned as [`ServiceError::Diverged`]: partially applied, retry.
    pub async fn update_profile(
        &self,
        actor: &Actor,
        remote_ref: &str,
        changes: ProfileChanges,
    ) -> ServiceResult<SyncOutcome> {
        if changes.is_empty() {
            return Err(ServiceError::InvalidInput(
                "no profile changes supplied".to_string(),
            ));
        }
        if let Some(name) = changes.display_name.as_deref() {
            validate_display_name(name)?;
        }
        if let Some(password) = changes.password.as_deref() {
            validate_password(password)?;
        }

        let deadline = Deadline::start(self.settings.operation_timeout);
        let target = deadline
            .local(self.users.find_by_remote_ref(remote_ref))
            .await?
            .ok_or_else(|| ServiceError::user_not_found(remote_ref))?;

        let claim = self.claims.user(target.id, &deadline).await?;
        let result = self
            .update_claimed(actor, target.id, remote_ref, changes, &claim, &deadline)
            .await;
        claim.release().await;
        result
    }

    async fn update_claimed(
        &self,
        actor: &Actor,
        user_id: Uuid,
        remote_ref: &str,
        changes: ProfileChanges,
        claim: &RecordClaim,
        deadline: &Deadline,
    ) -> ServiceResult<SyncOutcome> {
        let mut tx = deadline.local(self.users.begin()).await?;
        deadline.within(claim.verify(&mut tx)).await??;
        // Relinked since the lookup: the reference no longer names this user.
        let mut user = deadline
            .local(self.users.find_by_id_in(&mut tx, user_id))
            .await?
            .filter(|user| user.remote_ref.as_deref() == Some(remote_ref))
            .ok_or_else(|| ServiceError::user_not_found(remote_ref))?;

        if user.deleted {
            return Err(ServiceError::InvariantViolation(format!(
                "user {} is deleted",
                user.id
            )));
        }

        if let Some(name) = &changes.display_name {
            user.display_name = Some(name.clone());
        }
        let user = deadline
            .local(self.users.save(&mut tx, &user, actor.as_str()))
            .await?;
        tx.commit().await?;

        let update = UpdateIdentityRequest {
            name: changes.display_name,
            password: changes.password,
            ..UpdateIdentityRequest::default()
        };
        match deadline
            .remote(self.provider.update_identity(remote_ref, &update))
            .await
        {
            Ok(_) => {
                info!(user_id = %user.id, %remote_ref, "profile updated");
                Ok(SyncOutcome::new(user, RemoteSync::Applied, "profile updated"))
            }
            Err(err) => {
                error!(
                    user_id = %user.id,
                    %remote_ref,
                    error = %err,
                    "profile updated locally but the remote update failed"
                );
                Err(ServiceError::Diverged {
                    user_id: user.id,
                    reason: format!("failed to update remote identity {remote_ref}: {err}"),
                })
            }
        }
    }

    fn identity_request(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
        flags: IdentityFlags,
    ) -> CreateIdentityRequest {
        CreateIdentityRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: name.map(str::to_string),
            connection: self.settings.connection.clone(),
            flags,
        }
    }

    /// Stamp a freshly created remote identity onto `user_id`. If that fails
    /// the remote identity is deleted again so no orphan is left behind.
    async fn link_remote(
        &self,
        claim: &RecordClaim,
        user_id: Uuid,
        identity: &RemoteIdentity,
        actor: &Actor,
    ) -> ServiceResult<User> {
        let linked = self.stamp_remote(claim, user_id, identity, actor).await;
        if let Err(err) = &linked {
            warn!(%user_id, remote_ref = %identity.user_id, error = %err, "remote identity could not be stored");
            self.delete_created_identity(&identity.user_id, err).await;
        }
        linked
    }

    async fn stamp_remote(
        &self,
        claim: &RecordClaim,
        user_id: Uuid,
        identity: &RemoteIdentity,
        actor: &Actor,
    ) -> ServiceResult<User> {
        let mut tx = self.users.begin().await?;
        claim.verify(&mut tx).await?;
        let user = self
            .users
            .attach_remote(
                &mut tx,
                user_id,
                &identity.user_id,
                identity.picture.as_deref(),
                actor.as_str(),
            )
            .await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn delete_created_identity(&self, remote_ref: &str, cause: &ServiceError) {
        warn!(%remote_ref, %cause, "deleting remote identity that was not stored locally");
        match self.provider.delete_identity(remote_ref).await {
            Ok(()) => info!(%remote_ref, "compensating delete succeeded"),
            Err(err) => error!(
                %remote_ref,
                error = %err,
                "compensating delete failed, remote identity is orphaned"
            ),
        }
    }
}

fn email_conflict(email: &str) -> ServiceError {
    ServiceError::Conflict(format!("email already exists: {email}"))
}
