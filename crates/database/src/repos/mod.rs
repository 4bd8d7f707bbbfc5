//! Repository implementations for the local identity store.

pub mod claim_repository;
pub mod role_repository;
pub mod user_repository;

pub use claim_repository::ClaimRepository;
pub use role_repository::RoleRepository;
pub use user_repository::UserRepository;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp {value:?}: {e}"))
}

pub(crate) fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>, String> {
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_id(value: &str) -> Result<Uuid, String> {
    Uuid::parse_str(value).map_err(|e| format!("invalid id {value:?}: {e}"))
}
