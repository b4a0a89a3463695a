//! Per-installation context
//!
//! An `InstalledAppContext` represents one installed instance of the
//! app for the duration of a dispatch. It is built either directly
//! from an inbound envelope (which carries credentials) or from a
//! context store record, and hands handlers everything scoped to that
//! installation: an authenticated API client, dot-path state, and the
//! mutex that linearizes state mutations.
//!
//! The API client is materialized lazily and memoized; credentials
//! missing from the envelope are resolved from the store at most
//! once. `set_location_id` writes through a handle shared with the
//! client, so an already-built client never sees a stale location.

use crate::api::{ApiClient, ApiSettings};
use crate::error::{DispatchError, Result};
use crate::state::InstalledState;
use crate::store::{ContextRecord, ContextStore};
use crate::types::EventData;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};

/// Process-wide table of per-installation mutexes
///
/// Every dispatch for the same installation gets the same mutex, so
/// state mutations are linearized across concurrent envelopes, not
/// just within one. Entries are dropped when an installation is
/// uninstalled.
#[derive(Default)]
pub(crate) struct MutexRegistry {
    inner: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MutexRegistry {
    pub(crate) fn for_installation(&self, installed_app_id: &str) -> Arc<Mutex<()>> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner
            .entry(installed_app_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub(crate) fn remove(&self, installed_app_id: &str) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.remove(installed_app_id);
    }
}

/// One installation's context for the duration of a dispatch
pub struct InstalledAppContext {
    installed_app_id: String,
    location_id: Arc<RwLock<Option<String>>>,
    auth_token: Option<String>,
    refresh_token: Option<String>,
    config: Option<serde_json::Value>,
    store: Option<Arc<dyn ContextStore>>,
    api_settings: Option<ApiSettings>,
    api: OnceCell<Arc<ApiClient>>,
    mutex: Arc<Mutex<()>>,
    state: InstalledState,
}

impl std::fmt::Debug for InstalledAppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstalledAppContext")
            .field("installed_app_id", &self.installed_app_id)
            .finish_non_exhaustive()
    }
}

impl InstalledAppContext {
    #[allow(clippy::too_many_arguments)]
    fn build(
        installed_app_id: String,
        location_id: Option<String>,
        auth_token: Option<String>,
        refresh_token: Option<String>,
        config: Option<serde_json::Value>,
        store: Option<Arc<dyn ContextStore>>,
        api_settings: Option<ApiSettings>,
        mutex: Arc<Mutex<()>>,
    ) -> Arc<Self> {
        let state = InstalledState::new(installed_app_id.clone(), store.clone(), mutex.clone());

        Arc::new(Self {
            installed_app_id,
            location_id: Arc::new(RwLock::new(location_id)),
            auth_token,
            refresh_token,
            config,
            store,
            api_settings,
            api: OnceCell::new(),
            mutex,
            state,
        })
    }

    /// Direct construction from an `EVENT` envelope body
    pub(crate) fn from_event_data(
        event_data: &EventData,
        store: Option<Arc<dyn ContextStore>>,
        api_settings: Option<ApiSettings>,
        mutex: Arc<Mutex<()>>,
    ) -> Arc<Self> {
        Self::build(
            event_data.installed_app.installed_app_id.clone(),
            event_data.installed_app.location_id.clone(),
            event_data.auth_token.clone(),
            event_data.refresh_token.clone(),
            event_data.installed_app.config.clone(),
            store,
            api_settings,
            mutex,
        )
    }

    /// Construction from a persisted store record
    pub(crate) fn from_record(
        record: ContextRecord,
        store: Option<Arc<dyn ContextStore>>,
        api_settings: Option<ApiSettings>,
        mutex: Arc<Mutex<()>>,
    ) -> Arc<Self> {
        Self::build(
            record.installed_app_id,
            record.location_id,
            record.auth_token,
            record.refresh_token,
            record.config,
            store,
            api_settings,
            mutex,
        )
    }

    pub fn installed_app_id(&self) -> &str {
        &self.installed_app_id
    }

    pub async fn location_id(&self) -> Option<String> {
        self.location_id.read().await.clone()
    }

    /// Set the location id, propagating to any existing API client
    ///
    /// The client reads location through the same shared handle, so
    /// there is no window where it holds the old value.
    pub async fn set_location_id(&self, location_id: impl Into<String>) {
        *self.location_id.write().await = Some(location_id.into());
    }

    /// Installed configuration values from the envelope or record
    pub fn config(&self) -> Option<&serde_json::Value> {
        self.config.as_ref()
    }

    /// Scoped durable state for this installation
    pub fn state(&self) -> &InstalledState {
        &self.state
    }

    /// The mutex linearizing this installation's state mutations
    pub fn mutex(&self) -> Arc<Mutex<()>> {
        self.mutex.clone()
    }

    /// The authenticated API client, built on first use
    ///
    /// Credentials absent from the envelope are resolved from the
    /// context store; the store is consulted at most once however many
    /// callers race here.
    pub async fn api(&self) -> Result<Arc<ApiClient>> {
        self.api
            .get_or_try_init(|| self.build_api_client())
            .await
            .cloned()
    }

    async fn build_api_client(&self) -> Result<Arc<ApiClient>> {
        let settings = self.api_settings.clone().ok_or_else(|| {
            DispatchError::Config("Platform API settings are not configured".to_string())
        })?;

        let (auth_token, refresh_token) = match &self.auth_token {
            Some(token) => (token.clone(), self.refresh_token.clone()),
            None => {
                let store = self.store.as_ref().ok_or_else(|| {
                    DispatchError::Config(
                        "No credentials in message and no context store configured".to_string(),
                    )
                })?;
                let record = store
                    .get(&self.installed_app_id)
                    .await?
                    .ok_or_else(|| {
                        DispatchError::UnknownInstallation(self.installed_app_id.clone())
                    })?;

                if self.location_id.read().await.is_none() {
                    *self.location_id.write().await = record.location_id.clone();
                }

                let auth_token = record.auth_token.ok_or_else(|| {
                    DispatchError::Config(format!(
                        "Stored context for '{}' has no auth token",
                        self.installed_app_id
                    ))
                })?;
                (auth_token, record.refresh_token)
            }
        };

        tracing::debug!(
            installed_app_id = %self.installed_app_id,
            "API client materialized"
        );

        Ok(Arc::new(ApiClient::new(
            settings,
            self.installed_app_id.clone(),
            auth_token,
            refresh_token,
            self.location_id.clone(),
            self.store.clone(),
            self.mutex.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryContextStore;
    use crate::store::ContextPatch;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        inner: MemoryContextStore,
        gets: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: MemoryContextStore::new(),
                gets: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ContextStore for CountingStore {
        async fn get(&self, id: &str) -> Result<Option<ContextRecord>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(id).await
        }

        async fn put(&self, record: ContextRecord) -> Result<()> {
            self.inner.put(record).await
        }

        async fn update(&self, id: &str, patch: ContextPatch) -> Result<()> {
            self.inner.update(id, patch).await
        }

        async fn delete(&self, id: &str) -> Result<()> {
            self.inner.delete(id).await
        }
    }

    fn stored_record() -> ContextRecord {
        let mut record = ContextRecord::new("ia1");
        record.location_id = Some("loc-1".to_string());
        record.auth_token = Some("stored-token".to_string());
        record.refresh_token = Some("stored-refresh".to_string());
        record
    }

    fn settings() -> ApiSettings {
        ApiSettings::new("https://api.example.com", "https://auth.example.com/token")
    }

    fn test_mutex() -> Arc<Mutex<()>> {
        Arc::new(Mutex::new(()))
    }

    #[test]
    fn test_mutex_registry_shares_per_installation() {
        let registry = MutexRegistry::default();
        let first = registry.for_installation("ia1");
        let again = registry.for_installation("ia1");
        let other = registry.for_installation("ia2");

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));

        registry.remove("ia1");
        let fresh = registry.for_installation("ia1");
        assert!(!Arc::ptr_eq(&first, &fresh));
    }

    #[tokio::test]
    async fn test_from_record() {
        let context = InstalledAppContext::from_record(stored_record(), None, None, test_mutex());
        assert_eq!(context.installed_app_id(), "ia1");
        assert_eq!(context.location_id().await.as_deref(), Some("loc-1"));
    }

    #[tokio::test]
    async fn test_api_client_memoized_single_store_fetch() {
        let store = Arc::new(CountingStore::new());
        store.put(stored_record()).await.unwrap();

        // No credentials in the record-less direct path: force a store fetch
        let event_data: EventData = serde_json::from_value(serde_json::json!({
            "installedApp": {"installedAppId": "ia1"}
        }))
        .unwrap();
        let context = InstalledAppContext::from_event_data(
            &event_data,
            Some(store.clone() as Arc<dyn ContextStore>),
            Some(settings()),
            test_mutex(),
        );

        let first = context.api().await.unwrap();
        let second = context.api().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);

        // Location came from the stored record
        assert_eq!(context.location_id().await.as_deref(), Some("loc-1"));
    }

    #[tokio::test]
    async fn test_api_client_from_envelope_credentials_skips_store() {
        let store = Arc::new(CountingStore::new());
        let event_data: EventData = serde_json::from_value(serde_json::json!({
            "installedApp": {"installedAppId": "ia1", "locationId": "loc-9"},
            "authToken": "envelope-token",
            "refreshToken": "envelope-refresh"
        }))
        .unwrap();
        let context = InstalledAppContext::from_event_data(
            &event_data,
            Some(store.clone() as Arc<dyn ContextStore>),
            Some(settings()),
            test_mutex(),
        );

        context.api().await.unwrap();
        assert_eq!(store.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_location_id_propagates_to_existing_client() {
        let context = InstalledAppContext::from_record(stored_record(), None, Some(settings()), test_mutex());
        let api = context.api().await.unwrap();
        assert_eq!(api.location_id().await.as_deref(), Some("loc-1"));

        context.set_location_id("loc-2").await;
        assert_eq!(api.location_id().await.as_deref(), Some("loc-2"));
    }

    #[tokio::test]
    async fn test_api_without_settings_fails() {
        let context = InstalledAppContext::from_record(stored_record(), None, None, test_mutex());
        assert!(context.api().await.is_err());
    }

    #[tokio::test]
    async fn test_api_unknown_installation() {
        let store: Arc<dyn ContextStore> = Arc::new(MemoryContextStore::new());
        let event_data: EventData = serde_json::from_value(serde_json::json!({
            "installedApp": {"installedAppId": "ghost"}
        }))
        .unwrap();
        let context =
            InstalledAppContext::from_event_data(&event_data, Some(store), Some(settings()), test_mutex());

        let err = context.api().await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownInstallation(_)));
    }
}
