//! Single JSON document on disk, one top-level member per key.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::store::KvStore;

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Missing or unparsable files read as an empty document.
    async fn read_document(&self) -> Result<Map<String, Value>, StoreError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(StoreError::Read {
                    key: self.path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };
        match serde_json::from_str::<Value>(&data) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                tracing::warn!(path = %self.path.display(), "Store file is corrupt, treating as empty");
                Ok(Map::new())
            }
        }
    }

    async fn write_document(&self, key: &str, doc: &Map<String, Value>) -> Result<(), StoreError> {
        let write_err = |reason: String| StoreError::Write {
            key: key.to_string(),
            reason,
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_err(format!("create {}: {e}", parent.display())))?;
        }
        let body = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| write_err(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| write_err(e.to_string()))
    }
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let doc = self.read_document().await?;
        Ok(doc.get(key).map(|value| match value {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        }))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut doc = self.read_document().await?;
        // Keep structured values readable in the file.
        let stored = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        doc.insert(key.to_string(), stored);
        self.write_document(key, &doc).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut doc = self.read_document().await?;
        if doc.remove(key).is_some() {
            self.write_document(key, &doc).await?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}
