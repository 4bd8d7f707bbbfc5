//! Role catalogue management.

use idsync_database::{Page, Role, RoleFilter, RoleRepository};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{Actor, ServiceError, ServiceResult};
use crate::utils::normalize_role_code;

#[derive(Clone)]
pub struct RoleService {
    roles: RoleRepository,
}

impl RoleService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            roles: RoleRepository::new(pool),
        }
    }

    /// Create a role. The code is trimmed and upper-cased; codes are unique
    /// regardless of case.
    pub async fn create_role(
        &self,
        actor: &Actor,
        code: &str,
        description: Option<&str>,
    ) -> ServiceResult<Role> {
        let code = normalize_role_code(code)?;
        if self.roles.exists_by_code(&code).await? {
            return Err(ServiceError::Conflict(format!("role code already exists: {code}")));
        }

        let role = self.roles.insert(&code, description, actor.as_str()).await?;
        info!(role_id = %role.id, code = %role.code, "role created");
        Ok(role)
    }

    pub async fn update_description(
        &self,
        actor: &Actor,
        id: Uuid,
        description: Option<&str>,
    ) -> ServiceResult<Role> {
        let mut role = self.find(id).await?;
        if role.deleted {
            return Err(ServiceError::InvariantViolation(format!(
                "role {} is deleted",
                role.code
            )));
        }

        role.description = description.map(str::to_string);
        Ok(self.roles.save(&role, actor.as_str()).await?)
    }

    /// A live role. Soft-deleted roles are reported as missing.
    pub async fn get_role(&self, id: Uuid) -> ServiceResult<Role> {
        let role = self.find(id).await?;
        if role.deleted {
            return Err(ServiceError::role_not_found(id));
        }
        Ok(role)
    }

    pub async fn search_roles(&self, filter: &RoleFilter) -> ServiceResult<Page<Role>> {
        Ok(self.roles.search(filter).await?)
    }

    /// Soft-delete one role.
    pub async fn delete_role(&self, actor: &Actor, id: Uuid) -> ServiceResult<Role> {
        let mut role = self.find(id).await?;
        if role.deleted {
            return Err(ServiceError::InvariantViolation(format!(
                "role {} is already deleted",
                role.code
            )));
        }
        if role.is_system() {
            warn!(code = %role.code, %actor, "deleting a system role");
        }

        role.deleted = true;
        let role = self.roles.save(&role, actor.as_str()).await?;
        info!(role_id = %role.id, code = %role.code, "role deleted");
        Ok(role)
    }

    /// Soft-delete several roles at once, skipping system and already deleted
    /// roles. Returns the number of roles deleted.
    pub async fn bulk_delete_roles(&self, actor: &Actor, ids: &[Uuid]) -> ServiceResult<usize> {
        let doomed: Vec<Role> = self
            .roles
            .find_by_ids(ids)
            .await?
            .into_iter()
            .filter(|role| !role.deleted && !role.is_system())
            .map(|mut role| {
                role.deleted = true;
                role
            })
            .collect();

        if doomed.is_empty() {
            return Ok(0);
        }

        self.roles.save_all(&doomed, actor.as_str()).await?;
        info!(count = doomed.len(), "roles bulk deleted");
        Ok(doomed.len())
    }

    pub async fn list_active_roles(&self) -> ServiceResult<Vec<Role>> {
        Ok(self.roles.list_active().await?)
    }

    async fn find(&self, id: Uuid) -> ServiceResult<Role> {
        self.roles
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::role_not_found(id))
    }
}
