//! Role entity definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role codes that ship with every installation and cannot be bulk deleted.
pub const SYSTEM_ROLE_CODES: &[&str] = &["USER", "ADMIN"];

/// Role assigned to newly created users.
pub const DEFAULT_ROLE_CODE: &str = "USER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub code: String,
    pub description: Option<String>,
    pub deleted: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_modified_by: Option<String>,
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl Role {
    pub fn is_system(&self) -> bool {
        SYSTEM_ROLE_CODES
            .iter()
            .any(|code| self.code.eq_ignore_ascii_case(code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSortField {
    #[default]
    Code,
    Description,
    CreatedAt,
    Status,
}

impl RoleSortField {
    pub fn column(&self) -> &'static str {
        match self {
            RoleSortField::Code => "code",
            RoleSortField::Description => "description",
            RoleSortField::CreatedAt => "created_at",
            RoleSortField::Status => "is_deleted",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleFilter {
    pub search: Option<String>,
    pub deleted: Option<bool>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub sort_by: RoleSortField,
    pub order: super::SortOrder,
    pub page: Option<u32>,
    pub size: Option<u32>,
}
