use std::fmt;

use serde::{Deserialize, Serialize};

/// Principal recorded in the audit columns of every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor(String);

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Principal used by the startup default-user sync.
    pub fn identity_sync() -> Self {
        Self::new("identity-sync")
    }

    pub fn system() -> Self {
        Self::new("system")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
