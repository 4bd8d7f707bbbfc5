use std::fmt;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "idsync.toml",
    "config/idsync.toml",
    "crates/config/idsync.toml",
    "../idsync.toml",
    "../config/idsync.toml",
    "../crates/config/idsync.toml",
];

/// Connection name used for username/password identities on the provider.
pub const DEFAULT_CONNECTION: &str = "Username-Password-Authentication";

/// Id of the local admin row seeded by the database migrations.
pub const DEFAULT_ADMIN_USER_ID: &str = "550e8400-e29b-41d4-a716-446655440100";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub identity_provider: IdentityProviderConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub admin: AdminUserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    #[serde(default = "DatabaseConfig::default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    const fn default_busy_timeout() -> u64 {
        5_000
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://idsync.db".to_string(),
            max_connections: 10,
            busy_timeout_ms: Self::default_busy_timeout(),
        }
    }
}

/// Which identity provider implementation the backend talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    /// The hosted management API.
    #[default]
    Remote,
    /// An in-process provider, for local development only.
    Memory,
}

/// Machine-to-machine credentials and endpoints for the identity provider.
///
/// ```
/// use idsync_config::IdentityProviderConfig;
///
/// let provider = IdentityProviderConfig::default();
/// assert_eq!(provider.connection, "Username-Password-Authentication");
/// assert_eq!(provider.request_timeout_seconds, 10);
/// assert!(provider.client_secret.is_none());
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityProviderConfig {
    #[serde(default)]
    pub mode: ProviderMode,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "IdentityProviderConfig::default_connection")]
    pub connection: String,
    #[serde(default = "IdentityProviderConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl IdentityProviderConfig {
    fn default_connection() -> String {
        DEFAULT_CONNECTION.to_string()
    }

    const fn default_request_timeout() -> u64 {
        10
    }
}

impl Default for IdentityProviderConfig {
    fn default() -> Self {
        Self {
            mode: ProviderMode::default(),
            domain: None,
            client_id: None,
            client_secret: None,
            audience: None,
            connection: Self::default_connection(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

impl fmt::Debug for IdentityProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityProviderConfig")
            .field("mode", &self.mode)
            .field("domain", &self.domain)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("audience", &self.audience)
            .field("connection", &self.connection)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "SyncConfig::default_operation_timeout")]
    pub operation_timeout_seconds: u64,
}

impl SyncConfig {
    const fn default_operation_timeout() -> u64 {
        30
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            operation_timeout_seconds: Self::default_operation_timeout(),
        }
    }
}

/// The default administrator that is linked to the provider at startup.
#[derive(Clone, Serialize, Deserialize)]
pub struct AdminUserConfig {
    #[serde(default = "AdminUserConfig::default_user_id")]
    pub user_id: String,
    #[serde(default = "AdminUserConfig::default_name")]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl AdminUserConfig {
    fn default_user_id() -> String {
        DEFAULT_ADMIN_USER_ID.to_string()
    }

    fn default_name() -> String {
        "Administrator".to_string()
    }
}

impl Default for AdminUserConfig {
    fn default() -> Self {
        Self {
            user_id: Self::default_user_id(),
            name: Self::default_name(),
            email: None,
            password: None,
        }
    }
}

impl fmt::Debug for AdminUserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminUserConfig")
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use idsync_config::load;
///
/// std::env::remove_var("IDSYNC_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.database.url.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder()
        .set_default("database.url", defaults.database.url.clone())?
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )?
        .set_default(
            "database.busy_timeout_ms",
            i64::try_from(defaults.database.busy_timeout_ms).unwrap_or(i64::MAX),
        )?
        .set_default(
            "identity_provider.connection",
            defaults.identity_provider.connection.clone(),
        )?
        .set_default(
            "identity_provider.request_timeout_seconds",
            i64::try_from(defaults.identity_provider.request_timeout_seconds).unwrap_or(i64::MAX),
        )?
        .set_default(
            "sync.operation_timeout_seconds",
            i64::try_from(defaults.sync.operation_timeout_seconds).unwrap_or(i64::MAX),
        )?
        .set_default("admin.user_id", defaults.admin.user_id.clone())?
        .set_default("admin.name", defaults.admin.name.clone())?;

    let environment_overrides = config::Environment::with_prefix("IDSYNC").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("IDSYNC_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via IDSYNC_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    if config.sync.operation_timeout_seconds == 0 {
        anyhow::bail!("sync.operation_timeout_seconds must be greater than zero");
    }

    debug!(?config, "loaded backend configuration");
    Ok(config)
}
