//! Entity definitions for the local identity store

pub mod role;
pub mod user;

use serde::{Deserialize, Serialize};

pub use role::{Role, RoleFilter, RoleSortField, DEFAULT_ROLE_CODE, SYSTEM_ROLE_CODES};
pub use user::{NewUser, User, UserFilter, UserSortField};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.size))
    }
}

/// Resolve requested page/size into `(page, size, offset)`.
pub(crate) fn page_window(page: Option<u32>, size: Option<u32>) -> (u32, u32, i64) {
    let page = page.unwrap_or(0);
    let size = size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = i64::from(page) * i64::from(size);
    (page, size, offset)
}
