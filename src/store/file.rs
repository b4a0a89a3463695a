//! JSON file-based context store
//!
//! Persists one JSON file per installation under a configured
//! directory. Atomic writes via temp file + rename to prevent
//! corruption. Suitable for development and single-process
//! deployments.

use crate::error::{DispatchError, Result};
use crate::store::{ContextPatch, ContextRecord, ContextStore};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// File-backed context store
pub struct FileContextStore {
    dir: PathBuf,
}

impl FileContextStore {
    /// Create a store rooted at the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the storage directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, installed_app_id: &str) -> Result<PathBuf> {
        // Installation ids are opaque strings from the platform; refuse
        // anything that would escape the storage directory.
        if installed_app_id.is_empty()
            || installed_app_id.contains(['/', '\\'])
            || installed_app_id.contains("..")
        {
            return Err(DispatchError::Store(format!(
                "Invalid installation id for file storage: '{}'",
                installed_app_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", installed_app_id)))
    }

    fn write_record(&self, record: &ContextRecord) -> Result<()> {
        let path = self.record_path(&record.installed_app_id)?;
        let json = serde_json::to_string_pretty(record)?;

        std::fs::create_dir_all(&self.dir).map_err(|e| {
            DispatchError::Store(format!(
                "Failed to create context directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        // Atomic write: write to temp file, then rename
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, json).map_err(|e| {
            DispatchError::Store(format!(
                "Failed to write context file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        std::fs::rename(&tmp_path, &path).map_err(|e| {
            DispatchError::Store(format!(
                "Failed to rename context file {} → {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %path.display(), "Context saved");
        Ok(())
    }

    fn read_record(&self, installed_app_id: &str) -> Result<Option<ContextRecord>> {
        let path = self.record_path(installed_app_id)?;
        if !path.exists() {
            return Ok(None);
        }

        let json = std::fs::read_to_string(&path).map_err(|e| {
            DispatchError::Store(format!(
                "Failed to read context file {}: {}",
                path.display(),
                e
            ))
        })?;

        let record: ContextRecord = serde_json::from_str(&json).map_err(|e| {
            DispatchError::Store(format!(
                "Failed to parse context file {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(Some(record))
    }
}

#[async_trait]
impl ContextStore for FileContextStore {
    async fn get(&self, installed_app_id: &str) -> Result<Option<ContextRecord>> {
        self.read_record(installed_app_id)
    }

    async fn put(&self, record: ContextRecord) -> Result<()> {
        self.write_record(&record)
    }

    async fn update(&self, installed_app_id: &str, patch: ContextPatch) -> Result<()> {
        let mut record = self
            .read_record(installed_app_id)?
            .unwrap_or_else(|| ContextRecord::new(installed_app_id));
        record.apply(patch);
        self.write_record(&record)
    }

    async fn delete(&self, installed_app_id: &str) -> Result<()> {
        let path = self.record_path(installed_app_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DispatchError::Store(format!(
                "Failed to delete context file {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
