//! Authenticated platform API client
//!
//! One client per installation, carrying that installation's bearer
//! token. A 401 from the platform triggers a single refresh-token
//! redemption — serialized on the installation mutex so concurrent
//! handlers can't race two refreshes — after which the request is
//! retried once and the rotated tokens are persisted back through the
//! context store.

use crate::error::{DispatchError, Result};
use crate::store::{ContextPatch, ContextStore};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Platform endpoints and app credentials for API access
#[derive(Debug, Clone, Default)]
pub struct ApiSettings {
    /// Base URL for platform REST calls
    pub api_url: String,

    /// Token refresh endpoint
    pub refresh_url: String,

    /// App client id, required for token refresh
    pub client_id: Option<String>,

    /// App client secret, required for token refresh
    pub client_secret: Option<String>,
}

impl ApiSettings {
    pub fn new(api_url: impl Into<String>, refresh_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            refresh_url: refresh_url.into(),
            client_id: None,
            client_secret: None,
        }
    }

    /// Attach app credentials enabling token refresh
    pub fn with_client_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }
}

struct Credentials {
    auth_token: String,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
}

/// Bearer-authenticated JSON client for one installation
pub struct ApiClient {
    http: reqwest::Client,
    settings: ApiSettings,
    installed_app_id: String,
    /// Shared with the owning context so location updates propagate
    location_id: Arc<RwLock<Option<String>>>,
    credentials: RwLock<Credentials>,
    store: Option<Arc<dyn ContextStore>>,
    mutex: Arc<Mutex<()>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("installed_app_id", &self.installed_app_id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        settings: ApiSettings,
        installed_app_id: impl Into<String>,
        auth_token: impl Into<String>,
        refresh_token: Option<String>,
        location_id: Arc<RwLock<Option<String>>>,
        store: Option<Arc<dyn ContextStore>>,
        mutex: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
            installed_app_id: installed_app_id.into(),
            location_id,
            credentials: RwLock::new(Credentials {
                auth_token: auth_token.into(),
                refresh_token,
            }),
            store,
            mutex,
        }
    }

    pub fn installed_app_id(&self) -> &str {
        &self.installed_app_id
    }

    /// Current location id — tracks the owning context
    pub async fn location_id(&self) -> Option<String> {
        self.location_id.read().await.clone()
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        self.request(reqwest::Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.request(reqwest::Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value> {
        self.request(reqwest::Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.request(reqwest::Method::DELETE, path, None).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.settings.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let response = self.send(method.clone(), path, body.as_ref()).await?;

        let response = if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.refresh_tokens().await?;
            self.send(method, path, body.as_ref()).await?
        } else {
            response
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Api {
                path: path.to_string(),
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| DispatchError::Connection(e.to_string()))?;
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(Into::into)
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let token = self.credentials.read().await.auth_token.clone();
        let mut request = self
            .http
            .request(method, self.endpoint(path))
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        request
            .send()
            .await
            .map_err(|e| DispatchError::Connection(e.to_string()))
    }

    /// Redeem the refresh token for a new token pair
    async fn refresh_tokens(&self) -> Result<()> {
        let _guard = self.mutex.lock().await;

        let refresh_token = self
            .credentials
            .read()
            .await
            .refresh_token
            .clone()
            .ok_or_else(|| {
                DispatchError::Config("No refresh token available for this installation".into())
            })?;
        let client_id = self.settings.client_id.clone().ok_or_else(|| {
            DispatchError::Config("Client credentials required for token refresh".into())
        })?;
        let client_secret = self.settings.client_secret.clone().unwrap_or_default();

        let response = self
            .http
            .post(&self.settings.refresh_url)
            .basic_auth(&client_id, Some(&client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DispatchError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Api {
                path: self.settings.refresh_url.clone(),
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Connection(e.to_string()))?;

        {
            let mut credentials = self.credentials.write().await;
            credentials.auth_token = tokens.access_token.clone();
            credentials.refresh_token = Some(tokens.refresh_token.clone());
        }

        if let Some(store) = &self.store {
            store
                .update(
                    &self.installed_app_id,
                    ContextPatch::tokens(tokens.access_token, tokens.refresh_token),
                )
                .await?;
        }

        tracing::info!(
            installed_app_id = %self.installed_app_id,
            "Access tokens refreshed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> ApiClient {
        ApiClient::new(
            ApiSettings::new("https://api.example.com/v1/", "https://auth.example.com/token"),
            "ia1",
            "token",
            None,
            Arc::new(RwLock::new(Some("loc-1".to_string()))),
            None,
            Arc::new(Mutex::new(())),
        )
    }

    #[test]
    fn test_endpoint_joins_cleanly() {
        let client = test_client();
        assert_eq!(
            client.endpoint("/devices/d-1/status"),
            "https://api.example.com/v1/devices/d-1/status"
        );
        assert_eq!(
            client.endpoint("locations"),
            "https://api.example.com/v1/locations"
        );
    }

    #[tokio::test]
    async fn test_location_id_tracks_shared_handle() {
        let location = Arc::new(RwLock::new(Some("loc-1".to_string())));
        let client = ApiClient::new(
            ApiSettings::new("https://api.example.com", "https://auth.example.com/token"),
            "ia1",
            "token",
            None,
            location.clone(),
            None,
            Arc::new(Mutex::new(())),
        );

        assert_eq!(client.location_id().await.as_deref(), Some("loc-1"));
        *location.write().await = Some("loc-2".to_string());
        assert_eq!(client.location_id().await.as_deref(), Some("loc-2"));
    }

    #[test]
    fn test_settings_builder() {
        let settings = ApiSettings::new("a", "b").with_client_credentials("id", "secret");
        assert_eq!(settings.client_id.as_deref(), Some("id"));
        assert_eq!(settings.client_secret.as_deref(), Some("secret"));
    }
}
