//! In-memory context store for development and testing

use crate::error::Result;
use crate::store::{ContextPatch, ContextRecord, ContextStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory context store
///
/// Stores records in a `HashMap` protected by `RwLock`.
/// Records are lost on drop — use a durable store in production.
#[derive(Default)]
pub struct MemoryContextStore {
    records: RwLock<HashMap<String, ContextRecord>>,
}

impl MemoryContextStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn get(&self, installed_app_id: &str) -> Result<Option<ContextRecord>> {
        let records = self.records.read().await;
        Ok(records.get(installed_app_id).cloned())
    }

    async fn put(&self, record: ContextRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(record.installed_app_id.clone(), record);
        Ok(())
    }

    async fn update(&self, installed_app_id: &str, patch: ContextPatch) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .entry(installed_app_id.to_string())
            .or_insert_with(|| ContextRecord::new(installed_app_id));
        record.apply(patch);
        Ok(())
    }

    async fn delete(&self, installed_app_id: &str) -> Result<()> {
        let mut records = self.records.write().await;
        records.remove(installed_app_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ContextRecord {
        let mut record = ContextRecord::new("ia1");
        record.location_id = Some("loc-1".to_string());
        record.auth_token = Some("token".to_string());
        record.refresh_token = Some("refresh".to_string());
        record
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryContextStore::new();
        store.put(sample_record()).await.unwrap();

        let record = store.get("ia1").await.unwrap().unwrap();
        assert_eq!(record.location_id.as_deref(), Some("loc-1"));
        assert_eq!(record.auth_token.as_deref(), Some("token"));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryContextStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_existing() {
        let store = MemoryContextStore::new();
        store.put(sample_record()).await.unwrap();

        let mut state = serde_json::Map::new();
        state.insert("armed".to_string(), serde_json::json!(true));
        store
            .update("ia1", ContextPatch::state(state))
            .await
            .unwrap();

        let record = store.get("ia1").await.unwrap().unwrap();
        assert_eq!(record.state["armed"], true);
        // Credentials survive a state update
        assert_eq!(record.auth_token.as_deref(), Some("token"));
    }

    #[tokio::test]
    async fn test_update_upserts_missing_record() {
        let store = MemoryContextStore::new();
        store
            .update("fresh", ContextPatch::tokens("t", "r"))
            .await
            .unwrap();

        let record = store.get("fresh").await.unwrap().unwrap();
        assert_eq!(record.installed_app_id, "fresh");
        assert_eq!(record.auth_token.as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryContextStore::new();
        store.put(sample_record()).await.unwrap();
        assert_eq!(store.len().await, 1);

        store.delete("ia1").await.unwrap();
        assert!(store.get("ia1").await.unwrap().is_none());
        assert!(store.is_empty().await);

        // Deleting a missing record is not an error
        store.delete("ia1").await.unwrap();
    }
}
