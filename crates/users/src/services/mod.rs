//! Service layer: the synchronization engine plus the administrative services
//! that only touch the local store.

pub mod admin_service;
mod claims;
mod deadline;
pub mod locks;
pub mod role_service;
pub mod sync_engine;

pub use admin_service::{AdminService, Provisioned};
pub use locks::{RecordGuard, RecordLocks};
pub use role_service::RoleService;
pub use sync_engine::{SyncEngine, SyncSettings};
