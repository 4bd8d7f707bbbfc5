//! Wire models for the management API.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Deserializer, Serialize};

/// Refresh a cached token this long before the provider says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Identity as reported by the provider. Only a few fields are projected onto
/// the local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIdentity {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub email_verified: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub blocked: bool,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or_default())
}

/// Verification and block state requested for a new identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IdentityFlags {
    pub email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_email: Option<bool>,
    pub blocked: bool,
}

impl IdentityFlags {
    /// Identity for an address the backend already trusts.
    pub const fn verified() -> Self {
        Self {
            email_verified: true,
            verify_email: Some(true),
            blocked: false,
        }
    }

    /// Identity whose owner still has to confirm the address.
    pub const fn unverified() -> Self {
        Self {
            email_verified: false,
            verify_email: None,
            blocked: false,
        }
    }
}

#[derive(Clone, Serialize)]
pub struct CreateIdentityRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub connection: String,
    #[serde(flatten)]
    pub flags: IdentityFlags,
}

impl fmt::Debug for CreateIdentityRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateIdentityRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("connection", &self.connection)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Partial update; unset fields are left untouched by the provider.
#[derive(Clone, Default, Serialize)]
pub struct UpdateIdentityRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
}

impl UpdateIdentityRequest {
    pub fn blocked(blocked: bool) -> Self {
        Self {
            blocked: Some(blocked),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.password.is_none() && self.picture.is_none() && self.blocked.is_none()
    }
}

impl fmt::Debug for UpdateIdentityRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateIdentityRequest")
            .field("name", &self.name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("picture", &self.picture)
            .field("blocked", &self.blocked)
            .finish()
    }
}

/// Bearer token for the management API.
#[derive(Clone)]
pub struct ServiceToken {
    access_token: String,
    refresh_at: Instant,
}

impl ServiceToken {
    pub fn new(access_token: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        }
    }

    pub fn secret(&self) -> &str {
        &self.access_token
    }

    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.refresh_at
    }
}

impl fmt::Debug for ServiceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceToken")
            .field("access_token", &"<redacted>")
            .field("refresh_at", &self.refresh_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_request_flattens_flags() {
        let request = CreateIdentityRequest {
            email: "a@x.com".into(),
            password: "pw".into(),
            name: Some("A".into()),
            connection: "Username-Password-Authentication".into(),
            flags: IdentityFlags::verified(),
        };

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            json!({
                "email": "a@x.com",
                "password": "pw",
                "name": "A",
                "connection": "Username-Password-Authentication",
                "email_verified": true,
                "verify_email": true,
                "blocked": false
            })
        );
        assert!(!format!("{request:?}").contains("\"pw\""));
    }

    #[test]
    fn update_request_skips_unset_fields() {
        let body = serde_json::to_value(UpdateIdentityRequest::blocked(true)).unwrap();
        assert_eq!(body, json!({ "blocked": true }));
        assert!(UpdateIdentityRequest::default().is_empty());
    }

    #[test]
    fn remote_identity_tolerates_nulls_and_extra_fields() {
        let identity: RemoteIdentity = serde_json::from_value(json!({
            "user_id": "auth0-1",
            "email": "a@x.com",
            "email_verified": null,
            "logins_count": 3,
            "picture": "https://pics/a.png"
        }))
        .unwrap();

        assert_eq!(identity.user_id, "auth0-1");
        assert!(!identity.email_verified);
        assert!(!identity.blocked);
        assert_eq!(identity.picture.as_deref(), Some("https://pics/a.png"));
    }

    #[test]
    fn short_lived_tokens_are_never_fresh() {
        assert!(!ServiceToken::new("t", Duration::from_secs(10)).is_fresh());
        assert!(ServiceToken::new("t", Duration::from_secs(3600)).is_fresh());
    }
}
