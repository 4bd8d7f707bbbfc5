use std::sync::Arc;

use anyhow::{Context, Result};
use idsync_config::{AdminUserConfig, AppConfig, IdentityProviderConfig, ProviderMode};
use idsync_database::initialize_database;
use idsync_identity::{IdentityProvider, InMemoryIdentityProvider, ManagementClient};
use idsync_users::{AdminService, RecordLocks, RoleService, SyncEngine, SyncResult, SyncSettings};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::TRACE)
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

#[derive(Clone)]
pub struct BackendServices {
    pub db_pool: SqlitePool,
    pub provider: Arc<dyn IdentityProvider>,
    pub sync: SyncEngine,
    pub admin: AdminService,
    pub roles: RoleService,
}

impl BackendServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        let db_pool = initialize_database(&config.database).await?;
        let provider = build_provider(&config.identity_provider)?;
        Ok(Self::from_parts(db_pool, provider, config))
    }

    /// Wire the services around an existing pool and provider.
    pub fn from_parts(
        db_pool: SqlitePool,
        provider: Arc<dyn IdentityProvider>,
        config: &AppConfig,
    ) -> Self {
        // One registry for every service so they serialize on the same keys.
        let locks = RecordLocks::new();
        let settings = SyncSettings::from_config(&config.identity_provider, &config.sync);

        Self {
            sync: SyncEngine::new(db_pool.clone(), provider.clone(), locks.clone(), settings),
            admin: AdminService::new(db_pool.clone(), locks),
            roles: RoleService::new(db_pool.clone()),
            db_pool,
            provider,
        }
    }

    /// Link the configured default administrator to the identity provider.
    pub async fn sync_default_admin(&self, admin: &AdminUserConfig) -> Result<SyncResult> {
        let user_id = Uuid::parse_str(&admin.user_id)
            .with_context(|| format!("admin.user_id {} is not a valid uuid", admin.user_id))?;
        let email = admin
            .email
            .as_deref()
            .context("admin.email must be configured to sync the default admin")?;
        let password = admin
            .password
            .as_deref()
            .context("admin.password must be configured to sync the default admin")?;

        let result = self
            .sync
            .sync_default_user(user_id, email, password, Some(&admin.name))
            .await
            .context("default admin sync failed")?;
        Ok(result)
    }
}

/// Build the identity provider selected by `identity_provider.mode`.
pub fn build_provider(config: &IdentityProviderConfig) -> Result<Arc<dyn IdentityProvider>> {
    match config.mode {
        ProviderMode::Remote => {
            let client = ManagementClient::from_config(config)
                .context("failed to configure the identity provider client")?;
            info!(domain = ?config.domain, "using the management API identity provider");
            Ok(Arc::new(client))
        }
        ProviderMode::Memory => {
            warn!("using the in-memory identity provider; identities are lost on exit");
            Ok(Arc::new(InMemoryIdentityProvider::new()))
        }
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
