//! User administration: lookups, search, role assignment and first-login
//! provisioning. None of these calls touch the identity provider.

use std::collections::HashSet;
use std::time::Duration;

use idsync_database::{
    NewUser, Page, RoleRepository, User, UserFilter, UserRepository, DEFAULT_ROLE_CODE,
};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use super::claims::{RecordClaim, RecordClaims};
use super::deadline::Deadline;
use super::locks::RecordLocks;
use crate::types::{Actor, IdentityClaims, ServiceError, ServiceResult};
use crate::utils::validate_email;

/// How long an admin call waits for a record another operation holds.
const CLAIM_WAIT: Duration = Duration::from_secs(30);
const CLAIM_LEASE: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AdminService {
    users: UserRepository,
    roles: RoleRepository,
    claims: RecordClaims,
}

/// Result of [`AdminService::provision_from_identity`].
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub user: User,
    /// `false` when a user was already linked to the identity.
    pub created: bool,
}

impl AdminService {
    pub fn new(pool: SqlitePool, locks: RecordLocks) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            roles: RoleRepository::new(pool.clone()),
            claims: RecordClaims::new(pool, locks, CLAIM_LEASE),
        }
    }

    pub async fn search_users(&self, filter: &UserFilter) -> ServiceResult<Page<User>> {
        Ok(self.users.search(filter).await?)
    }

    /// Full user record, including soft-deleted users.
    pub async fn get_user_detail(&self, id: Uuid) -> ServiceResult<User> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::user_not_found(id))
    }

    /// Profile of the user linked to `remote_ref`. Deleted users have none.
    pub async fn get_profile(&self, remote_ref: &str) -> ServiceResult<User> {
        let user = self
            .users
            .find_by_remote_ref(remote_ref)
            .await?
            .ok_or_else(|| ServiceError::user_not_found(remote_ref))?;

        if user.deleted {
            return Err(ServiceError::InvariantViolation(format!(
                "user {} is deleted",
                user.id
            )));
        }
        Ok(user)
    }

    /// Replace the role set of a live user.
    pub async fn update_user_roles(
        &self,
        actor: &Actor,
        user_id: Uuid,
        role_ids: &[Uuid],
    ) -> ServiceResult<User> {
        let wanted: Vec<Uuid> = {
            let mut seen = HashSet::new();
            role_ids.iter().copied().filter(|id| seen.insert(*id)).collect()
        };
        if wanted.is_empty() {
            return Err(ServiceError::InvalidInput(
                "at least one role is required".to_string(),
            ));
        }

        let roles = self.roles.find_by_ids(&wanted).await?;
        let missing: Vec<String> = wanted
            .iter()
            .filter(|id| !roles.iter().any(|role| role.id == **id))
            .map(Uuid::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(ServiceError::role_not_found(missing.join(", ")));
        }
        if let Some(role) = roles.iter().find(|role| role.deleted) {
            return Err(ServiceError::InvariantViolation(format!(
                "role {} is deleted",
                role.code
            )));
        }

        let claim = self
            .claims
            .user(user_id, &Deadline::start(CLAIM_WAIT))
            .await?;
        let result = self
            .replace_roles_claimed(actor, user_id, &wanted, &claim)
            .await;
        claim.release().await;
        result
    }

    async fn replace_roles_claimed(
        &self,
        actor: &Actor,
        user_id: Uuid,
        role_ids: &[Uuid],
        claim: &RecordClaim,
    ) -> ServiceResult<User> {
        let mut tx = self.users.begin().await?;
        claim.verify(&mut tx).await?;
        let user = self
            .users
            .find_by_id_in(&mut tx, user_id)
            .await?
            .ok_or_else(|| ServiceError::user_not_found(user_id))?;

        if user.deleted {
            return Err(ServiceError::InvariantViolation(format!(
                "user {user_id} is deleted"
            )));
        }

        self.users.replace_roles(&mut tx, user_id, role_ids).await?;
        let user = self.users.save(&mut tx, &user, actor.as_str()).await?;
        tx.commit().await?;

        info!(%user_id, roles = role_ids.len(), %actor, "user roles replaced");
        Ok(user)
    }

    /// Return the local user for an authenticated identity, creating it on
    /// first login.
    pub async fn provision_from_identity(
        &self,
        claims: &IdentityClaims,
    ) -> ServiceResult<Provisioned> {
        if claims.sub.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "identity subject is required".to_string(),
            ));
        }
        validate_email(&claims.email)?;

        if let Some(user) = self.users.find_by_remote_ref(&claims.sub).await? {
            debug!(user_id = %user.id, remote_ref = %claims.sub, "identity already provisioned");
            return Ok(Provisioned {
                user,
                created: false,
            });
        }

        let claim = self
            .claims
            .email(&claims.email, &Deadline::start(CLAIM_WAIT))
            .await?;
        let result = self.provision_claimed(claims, &claim).await;
        claim.release().await;
        result
    }

    async fn provision_claimed(
        &self,
        claims: &IdentityClaims,
        claim: &RecordClaim,
    ) -> ServiceResult<Provisioned> {
        let mut tx = self.users.begin().await?;
        claim.verify(&mut tx).await?;

        // A concurrent first login for the same identity got here first.
        if let Some(user) = self.users.find_by_remote_ref_in(&mut tx, &claims.sub).await? {
            debug!(user_id = %user.id, remote_ref = %claims.sub, "identity provisioned concurrently");
            return Ok(Provisioned {
                user,
                created: false,
            });
        }

        let role = self
            .roles
            .find_by_code_in(&mut tx, DEFAULT_ROLE_CODE)
            .await?
            .filter(|role| !role.deleted)
            .ok_or_else(|| ServiceError::role_not_found(DEFAULT_ROLE_CODE))?;

        let new_user = NewUser {
            username: claims.email.clone(),
            email: Some(claims.email.clone()),
            display_name: claims.name.clone(),
            remote_ref: Some(claims.sub.clone()),
            avatar_url: claims.picture.clone(),
            activated: true,
            role_ids: vec![role.id],
        };
        let user = self
            .users
            .insert(&mut tx, &new_user, Actor::system().as_str())
            .await?;
        tx.commit().await?;

        info!(user_id = %user.id, remote_ref = %claims.sub, "user provisioned from identity");
        Ok(Provisioned {
            user,
            created: true,
        })
    }
}
