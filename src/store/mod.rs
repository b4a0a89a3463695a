//! Context store trait — durable persistence for installation data
//!
//! All storage backends (in-memory, file, DynamoDB, Redis, etc.)
//! implement `ContextStore` to provide a uniform CRUD API keyed by
//! installation id. The dispatcher and installation contexts use a
//! store to resolve credentials and persist application state.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod file;
pub mod memory;

/// Persisted record for one installation
///
/// Everything a context needs to come back to life after the original
/// install: credentials, location, and the app's own state mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRecord {
    pub installed_app_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Installed configuration values, passed through untyped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,

    /// Arbitrary app state, dot-path addressable via `InstalledState`
    #[serde(default)]
    pub state: serde_json::Map<String, serde_json::Value>,
}

impl ContextRecord {
    /// Create an empty record for an installation id
    pub fn new(installed_app_id: impl Into<String>) -> Self {
        Self {
            installed_app_id: installed_app_id.into(),
            location_id: None,
            auth_token: None,
            refresh_token: None,
            config: None,
            state: serde_json::Map::new(),
        }
    }

    /// Apply a partial update in place
    pub fn apply(&mut self, patch: ContextPatch) {
        if let Some(auth_token) = patch.auth_token {
            self.auth_token = Some(auth_token);
        }
        if let Some(refresh_token) = patch.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        if let Some(location_id) = patch.location_id {
            self.location_id = Some(location_id);
        }
        if let Some(state) = patch.state {
            self.state = state;
        }
    }
}

/// Partial update for a stored record
///
/// `None` fields are left untouched; `state` replaces the whole
/// mapping when present.
#[derive(Debug, Clone, Default)]
pub struct ContextPatch {
    pub auth_token: Option<String>,
    pub refresh_token: Option<String>,
    pub location_id: Option<String>,
    pub state: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ContextPatch {
    /// Patch that replaces only the state mapping
    pub fn state(state: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Patch that replaces only the credentials
    pub fn tokens(auth_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            auth_token: Some(auth_token.into()),
            refresh_token: Some(refresh_token.into()),
            ..Self::default()
        }
    }
}

/// Core trait for durable installation storage
///
/// `update` upserts: patching an id with no record starts from an
/// empty one, so token rotation and state writes never race deletes
/// into hard failures.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Fetch the record for an installation, if one exists
    async fn get(&self, installed_app_id: &str) -> Result<Option<ContextRecord>>;

    /// Store a full record, replacing any existing one
    async fn put(&self, record: ContextRecord) -> Result<()>;

    /// Apply a partial update to an installation's record
    async fn update(&self, installed_app_id: &str, patch: ContextPatch) -> Result<()>;

    /// Remove an installation's record
    async fn delete(&self, installed_app_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_apply_patch() {
        let mut record = ContextRecord::new("ia1");
        record.auth_token = Some("old".to_string());

        record.apply(ContextPatch::tokens("new", "refresh"));
        assert_eq!(record.auth_token.as_deref(), Some("new"));
        assert_eq!(record.refresh_token.as_deref(), Some("refresh"));

        let mut state = serde_json::Map::new();
        state.insert("count".to_string(), serde_json::json!(3));
        record.apply(ContextPatch::state(state));
        assert_eq!(record.state["count"], 3);
        // Tokens untouched by a state-only patch
        assert_eq!(record.auth_token.as_deref(), Some("new"));
    }

    #[test]
    fn test_record_serialization_defaults() {
        let json = r#"{"installedAppId": "ia1"}"#;
        let record: ContextRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.installed_app_id, "ia1");
        assert!(record.auth_token.is_none());
        assert!(record.state.is_empty());
    }

    #[test]
    fn test_record_roundtrip() {
        let mut record = ContextRecord::new("ia1");
        record.location_id = Some("loc-1".to_string());
        record
            .state
            .insert("mode".to_string(), serde_json::json!("away"));

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"installedAppId\":\"ia1\""));
        assert!(json.contains("\"locationId\":\"loc-1\""));

        let parsed: ContextRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.state["mode"], "away");
    }
}
