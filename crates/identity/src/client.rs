//! Management API client.

use std::time::Duration;

use async_trait::async_trait;
use idsync_config::IdentityProviderConfig;
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthType, AuthUrl, ClientId, ClientSecret, TokenResponse, TokenUrl};
use reqwest::{Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{IdentityError, IdentityResult};
use crate::models::{CreateIdentityRequest, RemoteIdentity, ServiceToken, UpdateIdentityRequest};
use crate::IdentityProvider;

/// Used when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

pub struct ManagementClient {
    oauth: BasicClient,
    audience: String,
    users_url: Url,
    http: reqwest::Client,
    request_timeout: Duration,
    token: Mutex<Option<ServiceToken>>,
}

impl ManagementClient {
    /// Build a client from machine-to-machine settings.
    ///
    /// Fails with [`IdentityError::Configuration`] if the domain, client id,
    /// client secret or audience is missing or blank.
    pub fn from_config(config: &IdentityProviderConfig) -> IdentityResult<Self> {
        let domain = required("domain", config.domain.as_deref())?;
        let client_id = required("client_id", config.client_id.as_deref())?;
        let client_secret = required("client_secret", config.client_secret.as_deref())?;
        let audience = required("audience", config.audience.as_deref())?;

        let base = tenant_base_url(domain)?;
        let join = |path: &str| {
            base.join(path)
                .map_err(|e| IdentityError::Configuration(format!("invalid domain {domain}: {e}")))
        };

        let auth_url = AuthUrl::new(join("authorize")?.to_string())
            .map_err(|e| IdentityError::Configuration(e.to_string()))?;
        let token_url = TokenUrl::new(join("oauth/token")?.to_string())
            .map_err(|e| IdentityError::Configuration(e.to_string()))?;

        let oauth = BasicClient::new(
            ClientId::new(client_id.to_string()),
            Some(ClientSecret::new(client_secret.to_string())),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::RequestBody);

        let request_timeout = Duration::from_secs(config.request_timeout_seconds.max(1));
        let http = reqwest::Client::builder()
            .user_agent("idsync")
            .timeout(request_timeout)
            .build()
            .map_err(|e| IdentityError::Configuration(format!("failed to build http client: {e}")))?;

        Ok(Self {
            oauth,
            audience: audience.to_string(),
            users_url: join("api/v2/users")?,
            http,
            request_timeout,
            token: Mutex::new(None),
        })
    }

    fn user_url(&self, remote_ref: &str) -> IdentityResult<Url> {
        let mut url = self.users_url.clone();
        url.path_segments_mut()
            .map_err(|_| IdentityError::Configuration("domain cannot be a base url".into()))?
            .push(remote_ref);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> IdentityResult<Response> {
        let token = self.acquire_service_token().await?;
        debug!(%method, %url, "calling management api");

        let mut request = self.http.request(method, url).bearer_auth(token.secret());
        if let Some(body) = body {
            request = request.json(&body);
        }

        Ok(request.send().await?)
    }
}

#[async_trait]
impl IdentityProvider for ManagementClient {
    async fn acquire_service_token(&self) -> IdentityResult<ServiceToken> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh()) {
            return Ok(token.clone());
        }

        let exchange = self
            .oauth
            .exchange_client_credentials()
            .add_extra_param("audience", self.audience.clone())
            .request_async(async_http_client);

        let response = tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| IdentityError::Timeout)?
            .map_err(|e| IdentityError::Token(e.to_string()))?;

        let lifetime = response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let token = ServiceToken::new(response.access_token().secret().clone(), lifetime);
        debug!(lifetime_secs = lifetime.as_secs(), "acquired management api token");

        *cached = Some(token.clone());
        Ok(token)
    }

    async fn create_identity(
        &self,
        request: &CreateIdentityRequest,
    ) -> IdentityResult<RemoteIdentity> {
        info!(email = %request.email, "creating remote identity");
        let body = to_body(request)?;
        let response = self
            .send(Method::POST, self.users_url.clone(), Some(body))
            .await?;

        let identity: RemoteIdentity = decode(success(response).await?).await?;
        info!(remote_ref = %identity.user_id, "remote identity created");
        Ok(identity)
    }

    async fn get_identity_by_reference(
        &self,
        remote_ref: &str,
    ) -> IdentityResult<Option<RemoteIdentity>> {
        let response = self
            .send(Method::GET, self.user_url(remote_ref)?, None)
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(%remote_ref, "remote identity not found");
            return Ok(None);
        }

        decode(success(response).await?).await.map(Some)
    }

    async fn get_identity_by_email(&self, email: &str) -> IdentityResult<Option<RemoteIdentity>> {
        let mut url = self.users_url.clone();
        url.query_pairs_mut()
            .append_pair("q", &format!("email:\"{email}\""))
            .append_pair("search_engine", "v3");

        let response = self.send(Method::GET, url, None).await?;
        let matches: Vec<RemoteIdentity> = decode(success(response).await?).await?;

        if matches.is_empty() {
            debug!(%email, "no remote identity for email");
        }
        Ok(matches.into_iter().next())
    }

    async fn update_identity(
        &self,
        remote_ref: &str,
        changes: &UpdateIdentityRequest,
    ) -> IdentityResult<RemoteIdentity> {
        info!(%remote_ref, "updating remote identity");
        let body = to_body(changes)?;
        let response = self
            .send(Method::PATCH, self.user_url(remote_ref)?, Some(body))
            .await?;

        decode(success(response).await?).await
    }

    async fn set_blocked(&self, remote_ref: &str, blocked: bool) -> IdentityResult<()> {
        info!(%remote_ref, blocked, "changing remote block state");
        let body = to_body(&UpdateIdentityRequest::blocked(blocked))?;
        let response = self
            .send(Method::PATCH, self.user_url(remote_ref)?, Some(body))
            .await?;

        success(response).await.map(|_| ())
    }

    async fn delete_identity(&self, remote_ref: &str) -> IdentityResult<()> {
        info!(%remote_ref, "deleting remote identity");
        let response = self
            .send(Method::DELETE, self.user_url(remote_ref)?, None)
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            warn!(%remote_ref, "remote identity already gone");
            return Ok(());
        }

        success(response).await.map(|_| ())
    }
}

fn required<'a>(field: &str, value: Option<&'a str>) -> IdentityResult<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| IdentityError::Configuration(format!("identity_provider.{field} is required")))
}

/// Normalise the tenant domain into an absolute base url ending in `/`.
fn tenant_base_url(domain: &str) -> IdentityResult<Url> {
    let mut base = if domain.contains("://") {
        domain.to_string()
    } else {
        format!("https://{domain}")
    };
    if !base.ends_with('/') {
        base.push('/');
    }

    Url::parse(&base).map_err(|e| IdentityError::Configuration(format!("invalid domain {domain}: {e}")))
}

fn to_body(value: &impl serde::Serialize) -> IdentityResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| IdentityError::Decode(e.to_string()))
}

async fn success(response: Response) -> IdentityResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), %body, "management api call failed");
    Err(IdentityError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> IdentityResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| IdentityError::Decode(e.to_string()))
}
