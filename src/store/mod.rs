//! Durable persistence for deployment and verification records.
//!
//! Backends implement the small [`KvStore`] trait; [`RecordStore`] layers
//! the two record collections on top, serializing every read-modify-write
//! behind one async mutex so concurrent tasks never lose updates.

mod file;
#[cfg(feature = "libsql")]
mod libsql;
mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use crate::records::{DeploymentRecord, VerificationRecord, normalize_address, sort_newest_first};

pub use self::file::JsonFileStore;
#[cfg(feature = "libsql")]
pub use self::libsql::LibSqlStore;
pub use self::memory::MemoryStore;

/// Key holding the deployment collection (JSON array).
pub const DEPLOYMENTS_KEY: &str = "contract-studio-deployments";
/// Key holding the verification collection (JSON object keyed by lowercase address).
pub const VERIFICATIONS_KEY: &str = "contract-studio-verifications";

/// Verification records keyed by lowercase contract address.
pub type VerificationMap = BTreeMap<String, VerificationRecord>;

/// Minimal async key-value persistence.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Human-readable location, for diagnostics.
    fn describe(&self) -> String;
}

/// Open the backend selected by configuration.
pub async fn open_kv_store(config: &StoreConfig) -> Result<Arc<dyn KvStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::File => Ok(Arc::new(JsonFileStore::new(config.path.clone()))),
        #[cfg(feature = "libsql")]
        StoreBackend::LibSql => Ok(Arc::new(LibSqlStore::open(&config.path).await?)),
        #[cfg(not(feature = "libsql"))]
        StoreBackend::LibSql => Err(StoreError::Open {
            path: config.path.display().to_string(),
            reason: "built without the libsql feature".to_string(),
        }),
    }
}

/// The two record collections over a [`KvStore`].
pub struct RecordStore {
    kv: Arc<dyn KvStore>,
    write_lock: Mutex<()>,
    deployment_cap: usize,
}

impl RecordStore {
    pub fn new(kv: Arc<dyn KvStore>, deployment_cap: usize) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
            deployment_cap: deployment_cap.max(1),
        }
    }

    /// In-memory store, mostly for tests and dry runs.
    pub fn in_memory(deployment_cap: usize) -> Self {
        Self::new(Arc::new(MemoryStore::new()), deployment_cap)
    }

    pub fn describe(&self) -> String {
        self.kv.describe()
    }

    pub fn deployment_cap(&self) -> usize {
        self.deployment_cap
    }

    pub async fn load_deployments(&self) -> Result<Vec<DeploymentRecord>, StoreError> {
        let mut records: Vec<DeploymentRecord> = self.read_collection(DEPLOYMENTS_KEY).await?;
        dedupe_by_address(&mut records);
        sort_newest_first(&mut records);
        Ok(records)
    }

    /// Replace the deployment collection, keeping only the newest entries.
    pub async fn save_deployments(
        &self,
        records: Vec<DeploymentRecord>,
    ) -> Result<Vec<DeploymentRecord>, StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_deployments(records).await
    }

    /// Read-modify-write of the deployment collection.
    pub async fn update_deployments<F, R>(&self, mutate: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Vec<DeploymentRecord>) -> R + Send,
        R: Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load_deployments().await?;
        let result = mutate(&mut records);
        self.write_deployments(records).await?;
        Ok(result)
    }

    pub async fn load_verifications(&self) -> Result<VerificationMap, StoreError> {
        let raw: VerificationMap = self.read_collection(VERIFICATIONS_KEY).await?;
        let mut map = VerificationMap::new();
        for (address, mut record) in raw {
            record.normalize();
            map.insert(normalize_address(&address), record);
        }
        Ok(map)
    }

    /// Read-modify-write of the verification collection.
    pub async fn update_verifications<F, R>(&self, mutate: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut VerificationMap) -> R + Send,
        R: Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load_verifications().await?;
        let result = mutate(&mut map);
        self.write_collection(VERIFICATIONS_KEY, &map).await?;
        Ok(result)
    }

    /// Delete both collections.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.kv.remove(DEPLOYMENTS_KEY).await?;
        self.kv.remove(VERIFICATIONS_KEY).await?;
        tracing::info!(store = %self.kv.describe(), "Cleared deployment and verification records");
        Ok(())
    }

    async fn write_deployments(
        &self,
        mut records: Vec<DeploymentRecord>,
    ) -> Result<Vec<DeploymentRecord>, StoreError> {
        dedupe_by_address(&mut records);
        sort_newest_first(&mut records);
        if records.len() > self.deployment_cap {
            tracing::debug!(
                evicted = records.len() - self.deployment_cap,
                cap = self.deployment_cap,
                "Evicting oldest deployment records"
            );
            records.truncate(self.deployment_cap);
        }
        self.write_collection(DEPLOYMENTS_KEY, &records).await?;
        Ok(records)
    }

    async fn read_collection<T>(&self, key: &str) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Default,
    {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(T::default());
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Stored collection is corrupt, starting empty");
                Ok(T::default())
            }
        }
    }

    async fn write_collection<T>(&self, key: &str, value: &T) -> Result<(), StoreError>
    where
        T: Serialize + Sync,
    {
        let raw = serde_json::to_string(value)?;
        self.kv.set(key, &raw).await
    }
}

/// Keep the first record for each normalized address.
fn dedupe_by_address(records: &mut Vec<DeploymentRecord>) {
    let mut seen = std::collections::HashSet::new();
    records.retain(|record| seen.insert(record.normalized_address()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::VerificationStatus;
    use pretty_assertions::assert_eq;

    fn deployment(address: &str, timestamp: i64) -> DeploymentRecord {
        DeploymentRecord::discovered(address, 84_532, format!("0x{timestamp:x}"), 1, timestamp)
    }

    #[tokio::test]
    async fn corrupt_collections_load_empty() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(DEPLOYMENTS_KEY, "{not json").await.unwrap();
        kv.set(VERIFICATIONS_KEY, "[1,2,3]").await.unwrap();
        let store = RecordStore::new(kv, 50);

        assert!(store.load_deployments().await.unwrap().is_empty());
        assert!(store.load_verifications().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_collection_is_overwritten_by_next_save() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(DEPLOYMENTS_KEY, "garbage").await.unwrap();
        let store = RecordStore::new(kv, 50);

        store
            .update_deployments(|records| records.push(deployment("0xaa", 1)))
            .await
            .unwrap();

        assert_eq!(store.load_deployments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deployments_are_capped_keeping_newest() {
        let store = RecordStore::in_memory(50);
        let records: Vec<_> = (0..60)
            .map(|i| deployment(&format!("0x{i:040x}"), i))
            .collect();

        let saved = store.save_deployments(records).await.unwrap();

        assert_eq!(saved.len(), 50);
        assert_eq!(saved.first().map(|r| r.timestamp), Some(59));
        assert_eq!(saved.last().map(|r| r.timestamp), Some(10));
        assert_eq!(store.load_deployments().await.unwrap(), saved);
    }

    #[tokio::test]
    async fn duplicate_addresses_collapse_case_insensitively() {
        let store = RecordStore::in_memory(50);
        store
            .save_deployments(vec![deployment("0xAA", 2), deployment("0xaa", 1)])
            .await
            .unwrap();

        let loaded = store.load_deployments().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].contract_address, "0xAA");
    }

    #[tokio::test]
    async fn verification_keys_are_normalized_on_load() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(
            VERIFICATIONS_KEY,
            r#"{"0xABCDEF":{"status":"failed","message":"boom"}}"#,
        )
        .await
        .unwrap();
        let store = RecordStore::new(kv, 50);

        let map = store.load_verifications().await.unwrap();
        assert_eq!(map["0xabcdef"].status, VerificationStatus::Failed);
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() {
        let store = Arc::new(RecordStore::in_memory(50));
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .update_verifications(|map| {
                        map.insert(format!("0x{i:02x}"), VerificationRecord::idle());
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.load_verifications().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn clear_all_removes_both_collections() {
        let store = RecordStore::in_memory(50);
        store
            .save_deployments(vec![deployment("0xaa", 1)])
            .await
            .unwrap();
        store
            .update_verifications(|map| {
                map.insert("0xaa".to_string(), VerificationRecord::idle());
            })
            .await
            .unwrap();

        store.clear_all().await.unwrap();

        assert!(store.load_deployments().await.unwrap().is_empty());
        assert!(store.load_verifications().await.unwrap().is_empty());
    }
}
