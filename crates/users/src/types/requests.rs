//! Inputs accepted by the synchronization engine and the admin service.

use std::fmt;

use serde::Deserialize;

/// Administrative creation of a user and its provider identity.
#[derive(Clone, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl fmt::Debug for CreateUserRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateUserRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Optional inputs for reactivating a soft-deleted user.
///
/// The password is only used when the provider identity has to be recreated.
#[derive(Clone, Default, Deserialize)]
pub struct ReactivateRequest {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl fmt::Debug for ReactivateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactivateRequest")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Mutable profile fields. Unset fields are left untouched.
#[derive(Clone, Default, Deserialize)]
pub struct ProfileChanges {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProfileChanges {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.password.is_none()
    }
}

impl fmt::Debug for ProfileChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileChanges")
            .field("display_name", &self.display_name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Claims of an authenticated provider identity, used for first-login provisioning.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaims {
    /// Provider subject, stored as the remote reference.
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}
