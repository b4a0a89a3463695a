//! Scoped per-installation state
//!
//! `InstalledState` gives handlers read/update/save access to an
//! installation's durable state mapping. The mapping is loaded from
//! the context store on first access and cached for the rest of the
//! dispatch; values are addressed by dot-path (`"a.b.c"`). Every
//! mutation goes through the installation mutex, so concurrent
//! handlers in one envelope cannot interleave read-modify-write
//! cycles.

use crate::error::{DispatchError, Result};
use crate::store::{ContextPatch, ContextStore};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Handle for an installation's durable state mapping
pub struct InstalledState {
    installed_app_id: String,
    store: Option<Arc<dyn ContextStore>>,
    mutex: Arc<Mutex<()>>,
    cache: RwLock<Option<Map<String, Value>>>,
}

impl InstalledState {
    pub(crate) fn new(
        installed_app_id: impl Into<String>,
        store: Option<Arc<dyn ContextStore>>,
        mutex: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            installed_app_id: installed_app_id.into(),
            store,
            mutex,
            cache: RwLock::new(None),
        }
    }

    fn store(&self) -> Result<&Arc<dyn ContextStore>> {
        self.store.as_ref().ok_or_else(|| {
            DispatchError::Config(
                "Installation state requires a configured context store".to_string(),
            )
        })
    }

    /// Read the whole state mapping
    pub async fn all(&self) -> Result<Map<String, Value>> {
        let _guard = self.mutex.lock().await;
        self.load_locked().await?;
        let cache = self.cache.read().await;
        Ok(cache.as_ref().cloned().unwrap_or_default())
    }

    /// Read the value at a dot-path, if present
    pub async fn get(&self, name: &str) -> Result<Option<Value>> {
        let _guard = self.mutex.lock().await;
        self.load_locked().await?;
        let cache = self.cache.read().await;
        let map = match cache.as_ref() {
            Some(map) => map,
            None => return Ok(None),
        };
        Ok(lookup_path(map, name).cloned())
    }

    /// Write a value at a dot-path, creating intermediate levels
    ///
    /// Persists the full resulting mapping to the store exactly once
    /// and updates the in-memory cache, so a subsequent `get` on the
    /// same handle sees the new value without another store fetch.
    pub async fn update(&self, name: &str, value: Value) -> Result<()> {
        let _guard = self.mutex.lock().await;
        self.load_locked().await?;

        let snapshot = {
            let mut cache = self.cache.write().await;
            let map = cache.get_or_insert_with(Map::new);
            insert_path(map, name, value);
            map.clone()
        };

        self.store()?
            .update(&self.installed_app_id, ContextPatch::state(snapshot))
            .await?;

        tracing::debug!(
            installed_app_id = %self.installed_app_id,
            path = %name,
            "State updated"
        );
        Ok(())
    }

    /// Persist the entire in-memory mapping back to the store
    ///
    /// A no-op if state was never loaded or written — saving an
    /// untouched handle must not wipe durable state.
    pub async fn save(&self) -> Result<()> {
        let _guard = self.mutex.lock().await;
        let snapshot = {
            let cache = self.cache.read().await;
            match cache.as_ref() {
                Some(map) => map.clone(),
                None => {
                    tracing::debug!(
                        installed_app_id = %self.installed_app_id,
                        "State never loaded, skipping save"
                    );
                    return Ok(());
                }
            }
        };

        self.store()?
            .update(&self.installed_app_id, ContextPatch::state(snapshot))
            .await
    }

    /// Load the mapping from the store if not already cached.
    /// Caller must hold the installation mutex.
    async fn load_locked(&self) -> Result<()> {
        {
            let cache = self.cache.read().await;
            if cache.is_some() {
                return Ok(());
            }
        }

        let record = self.store()?.get(&self.installed_app_id).await?;
        let state = record.map(|r| r.state).unwrap_or_default();
        *self.cache.write().await = Some(state);
        Ok(())
    }
}

/// Walk a dot-path through nested objects
fn lookup_path<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = map.get(first)?;

    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Insert at a dot-path, creating intermediate objects as needed.
/// A non-object intermediate is replaced by an object.
fn insert_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = map;

    for segment in &segments[..segments.len() - 1] {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry.as_object_mut().unwrap();
    }

    current.insert(segments[segments.len() - 1].to_string(), value);
}
