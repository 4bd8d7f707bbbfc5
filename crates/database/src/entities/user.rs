//! User entity definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::role::Role;

/// A locally registered user, optionally linked to a provider identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    /// Identifier assigned by the identity provider. `None` until synced.
    pub remote_ref: Option<String>,
    pub avatar_url: Option<String>,
    pub activated: bool,
    pub deleted: bool,
    pub roles: Vec<Role>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_modified_by: Option<String>,
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_synced(&self) -> bool {
        self.remote_ref.is_some()
    }

    pub fn has_role(&self, code: &str) -> bool {
        self.roles.iter().any(|role| role.code.eq_ignore_ascii_case(code))
    }

    /// Flip to the soft-deleted state. Deleted users are never activated.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
        self.activated = false;
    }

    pub fn mark_restored(&mut self) {
        self.deleted = false;
        self.activated = true;
    }
}

/// Fields for inserting a new user row.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub remote_ref: Option<String>,
    pub avatar_url: Option<String>,
    pub activated: bool,
    pub role_ids: Vec<Uuid>,
}

/// Sortable user columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSortField {
    #[default]
    Email,
    Username,
    CreatedAt,
    Status,
}

impl UserSortField {
    pub fn column(&self) -> &'static str {
        match self {
            UserSortField::Email => "u.email",
            UserSortField::Username => "u.username",
            UserSortField::CreatedAt => "u.created_at",
            UserSortField::Status => "u.is_deleted",
        }
    }
}

/// Search criteria for listing users.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserFilter {
    /// Matched case-insensitively against email and username.
    pub search: Option<String>,
    /// `Some(true)` for soft-deleted users only, `Some(false)` for live users only.
    pub deleted: Option<bool>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub role_ids: Vec<Uuid>,
    pub sort_by: UserSortField,
    pub order: super::SortOrder,
    pub page: Option<u32>,
    pub size: Option<u32>,
}
