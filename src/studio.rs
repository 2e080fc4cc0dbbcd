//! Runtime wiring: one record store shared by discovery, verification and
//! hydration, plus the background tasks that keep it current.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::chains::Chain;
use crate::config::{Config, VerificationConfig};
use crate::discovery::{ChainFailure, DiscoveryEngine, reconcile};
use crate::error::{Error, StoreError};
use crate::explorer::{EtherscanClient, ExplorerApi};
use crate::hydration::{HydrationReport, Hydrator};
use crate::records::{DeploymentRecord, VerificationRecord, normalize_address};
use crate::rpc::{ChainConnector, HttpChainConnector};
use crate::store::{self, RecordStore};
use crate::verification::{
    CancellationFlag, FileSourceProvider, SourceProvider, VerificationEngine,
};

/// Where a deployment listing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingSource {
    Cache,
    Discovery,
}

/// A deployment with derived explorer links and its verification state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentView {
    #[serde(flatten)]
    pub record: DeploymentRecord,
    pub explorer_contract_url: String,
    pub explorer_tx_url: String,
    pub verification: VerificationRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentListing {
    pub source: ListingSource,
    pub deployments: Vec<DeploymentView>,
    pub failures: Vec<ChainFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncReport {
    pub discovered: usize,
    pub added: usize,
    pub total: usize,
    pub failures: Vec<ChainFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStats {
    pub total: usize,
    pub by_chain: BTreeMap<String, usize>,
    pub verified: usize,
}

pub struct Studio {
    store: Arc<RecordStore>,
    discovery: DiscoveryEngine,
    verification: Arc<VerificationEngine>,
    hydrator: Arc<Hydrator>,
    background: CancellationFlag,
}

impl Studio {
    pub fn new(
        store: Arc<RecordStore>,
        explorer: Arc<dyn ExplorerApi>,
        connector: Arc<dyn ChainConnector>,
        source: Option<Arc<dyn SourceProvider>>,
        chains: Vec<&'static Chain>,
        verification: VerificationConfig,
    ) -> Self {
        let discovery = DiscoveryEngine::new(Arc::clone(&explorer), chains);
        let verification = Arc::new(VerificationEngine::new(
            Arc::clone(&store),
            explorer,
            source,
            verification,
        ));
        let hydrator = Arc::new(Hydrator::new(Arc::clone(&store), connector));
        Self {
            store,
            discovery,
            verification,
            hydrator,
            background: CancellationFlag::new(),
        }
    }

    /// Build the production stack from configuration.
    ///
    /// Submissions interrupted by a previous run are failed here so they can
    /// be retried.
    pub async fn from_config(config: &Config) -> Result<Self, Error> {
        let kv = store::open_kv_store(&config.store).await?;
        let store = Arc::new(RecordStore::new(kv, config.store.deployment_cap));
        let explorer: Arc<dyn ExplorerApi> = Arc::new(EtherscanClient::new(&config.explorer)?);
        let connector: Arc<dyn ChainConnector> =
            Arc::new(HttpChainConnector::new(config.explorer.http_timeout));
        let source = FileSourceProvider::from_config(&config.verification.source)
            .map(|provider| Arc::new(provider) as Arc<dyn SourceProvider>);

        let studio = Self::new(
            store,
            explorer,
            connector,
            source,
            config.explorer.chains.clone(),
            config.verification.clone(),
        );
        studio.verification.recover_interrupted().await?;
        tracing::info!(
            store = %studio.store.describe(),
            chains = studio.discovery.chains().len(),
            "Contract studio ready"
        );
        Ok(studio)
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn verification(&self) -> &Arc<VerificationEngine> {
        &self.verification
    }

    pub fn chains(&self) -> &[&'static Chain] {
        self.discovery.chains()
    }

    /// Cache-first deployment listing.
    ///
    /// A non-empty cache is returned as is. Otherwise the wallet's history is
    /// scanned, saved, and unnamed records are hydrated in the background.
    pub async fn deployments(&self, wallet: &str) -> Result<DeploymentListing, StoreError> {
        let cached = self.store.load_deployments().await?;
        if !cached.is_empty() {
            return Ok(DeploymentListing {
                source: ListingSource::Cache,
                deployments: self.views(cached).await?,
                failures: Vec::new(),
            });
        }

        let discovery = self.discovery.discover_all(wallet).await;
        let saved = self.save_reconciled(&discovery.records).await?;
        self.spawn_hydration(saved.clone());
        Ok(DeploymentListing {
            source: ListingSource::Discovery,
            deployments: self.views(saved).await?,
            failures: discovery.failures,
        })
    }

    /// Operator resync: scan again and reconcile against the cache.
    pub async fn resync(&self, wallet: &str) -> Result<ResyncReport, StoreError> {
        let before = self.store.load_deployments().await?.len();
        let discovery = self.discovery.discover_all(wallet).await;
        let saved = self.save_reconciled(&discovery.records).await?;
        let total = saved.len();
        self.spawn_hydration(saved);
        Ok(ResyncReport {
            discovered: discovery.records.len(),
            added: total.saturating_sub(before),
            total,
            failures: discovery.failures,
        })
    }

    async fn save_reconciled(
        &self,
        discovered: &[DeploymentRecord],
    ) -> Result<Vec<DeploymentRecord>, StoreError> {
        let discovered = discovered.to_vec();
        let merged = self
            .store
            .update_deployments(move |existing| {
                *existing = reconcile(existing, &discovered);
                existing.clone()
            })
            .await?;
        // The store applies the history cap on write.
        Ok(merged
            .into_iter()
            .take(self.store.deployment_cap())
            .collect())
    }

    /// Store a confirmed live deployment. An existing record keeps everything
    /// except name and symbol, which the receipt may correct.
    pub async fn record_live_deployment(
        &self,
        record: DeploymentRecord,
    ) -> Result<DeploymentRecord, StoreError> {
        let key = record.normalized_address();
        let stored = self
            .store
            .update_deployments(move |records| {
                match records.iter_mut().find(|r| r.normalized_address() == key) {
                    Some(existing) => {
                        existing.merge_live_metadata(&record.contract_name, &record.symbol);
                        existing.clone()
                    }
                    None => {
                        records.push(record.clone());
                        record
                    }
                }
            })
            .await?;
        tracing::info!(
            contract = %stored.contract_address,
            chain_id = stored.chain_id,
            name = %stored.contract_name,
            "Recorded deployment"
        );
        Ok(stored)
    }

    pub async fn clear_all(&self) -> Result<(), StoreError> {
        self.store.clear_all().await
    }

    pub async fn stats(&self) -> Result<DeploymentStats, StoreError> {
        let deployments = self.store.load_deployments().await?;
        let verifications = self.store.load_verifications().await?;
        let mut stats = DeploymentStats {
            total: deployments.len(),
            ..DeploymentStats::default()
        };
        for record in &deployments {
            *stats.by_chain.entry(record.chain_name.clone()).or_default() += 1;
            if verifications
                .get(&record.normalized_address())
                .is_some_and(VerificationRecord::is_verified)
            {
                stats.verified += 1;
            }
        }
        Ok(stats)
    }

    /// Newest cached deployments on one chain, at most `limit` of them.
    pub async fn deployments_on_chain(
        &self,
        chain_id: u64,
        limit: usize,
    ) -> Result<Vec<DeploymentView>, StoreError> {
        let records = self
            .store
            .load_deployments()
            .await?
            .into_iter()
            .filter(|record| record.chain_id == chain_id)
            .take(limit)
            .collect();
        self.views(records).await
    }

    /// Case-insensitive match on name, symbol or address of cached records.
    pub async fn search(&self, query: &str) -> Result<Vec<DeploymentView>, StoreError> {
        let needle = query.trim().to_lowercase();
        let matches = self
            .store
            .load_deployments()
            .await?
            .into_iter()
            .filter(|record| {
                needle.is_empty()
                    || record.contract_name.to_lowercase().contains(&needle)
                    || record.symbol.to_lowercase().contains(&needle)
                    || record.normalized_address().contains(&needle)
            })
            .collect();
        self.views(matches).await
    }

    async fn views(&self, records: Vec<DeploymentRecord>) -> Result<Vec<DeploymentView>, StoreError> {
        let verifications = self.store.load_verifications().await?;
        Ok(records
            .into_iter()
            .map(|record| {
                let verification = verifications
                    .get(&normalize_address(&record.contract_address))
                    .cloned()
                    .unwrap_or_else(VerificationRecord::idle);
                DeploymentView {
                    explorer_contract_url: record.explorer_contract_url(),
                    explorer_tx_url: record.explorer_tx_url(),
                    verification,
                    record,
                }
            })
            .collect())
    }

    /// Hydrate unnamed records without blocking the caller.
    pub fn spawn_hydration(&self, records: Vec<DeploymentRecord>) -> Option<JoinHandle<HydrationReport>> {
        if !records.iter().any(DeploymentRecord::needs_hydration) {
            return None;
        }
        let hydrator = Arc::clone(&self.hydrator);
        let cancel = self.background.clone();
        Some(tokio::spawn(async move {
            hydrator.hydrate(&records, &cancel).await
        }))
    }

    /// Hydrate every stored unnamed record and wait for the result.
    pub async fn hydrate_now(&self, cancel: &CancellationFlag) -> Result<HydrationReport, StoreError> {
        self.hydrator.hydrate_stored(cancel).await
    }

    /// Run the already-verified sweep, then the poll loop, until `cancel`
    /// fires or this studio is dropped.
    pub fn spawn_verification_watch(&self, cancel: CancellationFlag) -> JoinHandle<()> {
        let engine = Arc::clone(&self.verification);
        let background = self.background.clone();
        tokio::spawn(async move {
            let watch = async {
                let report = engine.sweep_already_verified(&cancel).await;
                tracing::info!(
                    checked = report.checked,
                    verified = report.verified,
                    "Already-verified sweep finished"
                );
                if !report.cancelled {
                    engine.run_poll_loop(&cancel).await;
                }
            };
            tokio::select! {
                _ = watch => {}
                _ = background.cancelled() => cancel.cancel(),
            }
        })
    }

    /// Stop background hydration and verification watches.
    pub fn shutdown(&self) {
        self.background.cancel();
    }
}

impl Drop for Studio {
    fn drop(&mut self) {
        self.background.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::SUPPORTED_CHAINS;
    use crate::error::{ExplorerError, RpcError};
    use crate::explorer::{
        SubmitResponse, TokenMetadata, TxListEntry, VerificationCheck, VerificationSubmission,
    };
    use crate::records::VerificationStatus;
    use crate::rpc::ChainReader;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::Duration;

    const WALLET: &str = "0x52908400098527886e0f7030069857d2e4169ee7";

    #[derive(Default)]
    struct FixedExplorer {
        history: Mutex<Vec<TxListEntry>>,
        scans: Mutex<usize>,
    }

    #[async_trait]
    impl ExplorerApi for FixedExplorer {
        async fn transaction_history(
            &self,
            chain_id: u64,
            _wallet: &str,
        ) -> Result<Vec<TxListEntry>, ExplorerError> {
            *self.scans.lock().unwrap() += 1;
            if chain_id != SUPPORTED_CHAINS[0].id {
                return Ok(Vec::new());
            }
            Ok(self.history.lock().unwrap().clone())
        }

        async fn token_metadata(
            &self,
            _chain_id: u64,
            _address: &str,
        ) -> Result<Option<TokenMetadata>, ExplorerError> {
            Ok(None)
        }

        async fn transaction_input(
            &self,
            _chain_id: u64,
            _tx_hash: &str,
        ) -> Result<Option<String>, ExplorerError> {
            Ok(None)
        }

        async fn submit_verification(
            &self,
            _chain_id: u64,
            _submission: &VerificationSubmission,
        ) -> Result<SubmitResponse, ExplorerError> {
            Ok(SubmitResponse::AlreadyVerified {
                message: "Already Verified".to_string(),
            })
        }

        async fn check_verification_status(
            &self,
            _chain_id: u64,
            _guid: &str,
        ) -> Result<VerificationCheck, ExplorerError> {
            Ok(VerificationCheck::Pending {
                message: "Pending in queue".to_string(),
            })
        }

        async fn is_verified(&self, _chain_id: u64, _address: &str) -> Result<bool, ExplorerError> {
            Ok(true)
        }
    }

    struct NamingReader;

    #[async_trait]
    impl ChainReader for NamingReader {
        async fn name(&self, _address: &str) -> Result<String, RpcError> {
            Ok("Hydrated".to_string())
        }

        async fn symbol(&self, _address: &str) -> Result<String, RpcError> {
            Ok("HYD".to_string())
        }
    }

    struct NamingConnector;

    impl ChainConnector for NamingConnector {
        fn connect(&self, _chain: &Chain) -> Result<Arc<dyn ChainReader>, RpcError> {
            Ok(Arc::new(NamingReader))
        }
    }

    fn creation(contract: &str, timestamp_secs: i64) -> TxListEntry {
        TxListEntry {
            hash: format!("0xhash{timestamp_secs}"),
            from: WALLET.to_string(),
            contract_address: contract.to_string(),
            input: "0x6080".to_string(),
            block_number: "7".to_string(),
            time_stamp: timestamp_secs.to_string(),
            is_error: "0".to_string(),
            ..TxListEntry::default()
        }
    }

    fn studio_with(explorer: Arc<FixedExplorer>) -> Studio {
        Studio::new(
            Arc::new(RecordStore::in_memory(50)),
            explorer,
            Arc::new(NamingConnector),
            None,
            SUPPORTED_CHAINS.iter().collect(),
            VerificationConfig::default(),
        )
    }

    #[tokio::test]
    async fn first_listing_discovers_then_serves_from_cache() {
        let explorer = Arc::new(FixedExplorer::default());
        explorer
            .history
            .lock()
            .unwrap()
            .push(creation("0x00000000000000000000000000000000000000a1", 100));
        let studio = studio_with(Arc::clone(&explorer));

        let first = studio.deployments(WALLET).await.unwrap();
        assert_eq!(first.source, ListingSource::Discovery);
        assert_eq!(first.deployments.len(), 1);
        assert_eq!(first.deployments[0].verification.status, VerificationStatus::Idle);
        assert!(first.deployments[0].explorer_contract_url.contains("0x00000000000000000000000000000000000000a1"));
        let scans_after_discovery = *explorer.scans.lock().unwrap();

        let second = studio.deployments(WALLET).await.unwrap();
        assert_eq!(second.source, ListingSource::Cache);
        assert_eq!(*explorer.scans.lock().unwrap(), scans_after_discovery);
    }

    #[tokio::test]
    async fn discovery_hydrates_in_background() {
        let explorer = Arc::new(FixedExplorer::default());
        explorer
            .history
            .lock()
            .unwrap()
            .push(creation("0x00000000000000000000000000000000000000a1", 100));
        let studio = studio_with(explorer);

        studio.deployments(WALLET).await.unwrap();

        let mut named = false;
        for _ in 0..50 {
            let records = studio.store().load_deployments().await.unwrap();
            if records[0].contract_name == "Hydrated" {
                named = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(named);
    }

    #[tokio::test]
    async fn resync_reconciles_without_overwriting() {
        let explorer = Arc::new(FixedExplorer::default());
        let studio = studio_with(Arc::clone(&explorer));

        let mut live = DeploymentRecord::discovered(
            "0x00000000000000000000000000000000000000A1",
            SUPPORTED_CHAINS[0].id,
            "0xlive",
            5,
            100_000,
        );
        live.contract_name = "Live Token".to_string();
        live.symbol = "LIVE".to_string();
        live.features = vec!["mintable".to_string()];
        studio.record_live_deployment(live.clone()).await.unwrap();

        explorer.history.lock().unwrap().extend([
            creation("0x00000000000000000000000000000000000000a1", 100),
            creation("0x00000000000000000000000000000000000000b2", 200),
        ]);
        let report = studio.resync(WALLET).await.unwrap();

        assert_eq!(report.discovered, 2);
        assert_eq!(report.added, 1);
        assert_eq!(report.total, 2);
        let stored = studio.store().load_deployments().await.unwrap();
        assert_eq!(stored[1], live);

        let again = studio.resync(WALLET).await.unwrap();
        assert_eq!(again.added, 0);
    }

    #[tokio::test]
    async fn live_receipt_upgrades_names_only() {
        let studio = studio_with(Arc::new(FixedExplorer::default()));
        let discovered = DeploymentRecord::discovered("0xAbC", 84_532, "0xscan", 3, 10);
        studio.record_live_deployment(discovered.clone()).await.unwrap();

        let mut receipt = DeploymentRecord::discovered("0xabc", 421_614, "0xother", 9, 99);
        receipt.contract_name = "Real Name".to_string();
        receipt.symbol = "REAL".to_string();
        let stored = studio.record_live_deployment(receipt).await.unwrap();

        assert_eq!(stored.contract_name, "Real Name");
        assert_eq!(stored.symbol, "REAL");
        assert_eq!(stored.chain_id, 84_532);
        assert_eq!(stored.tx_hash, "0xscan");
        assert_eq!(stored.contract_address, "0xAbC");
    }

    #[tokio::test]
    async fn stats_and_search() {
        let studio = studio_with(Arc::new(FixedExplorer::default()));
        let mut token = DeploymentRecord::discovered("0x01", 84_532, "0xa", 1, 2);
        token.contract_name = "Galaxy Token".to_string();
        token.symbol = "GLX".to_string();
        studio.record_live_deployment(token).await.unwrap();
        studio
            .record_live_deployment(DeploymentRecord::discovered("0x02", 421_614, "0xb", 1, 1))
            .await
            .unwrap();
        studio
            .store()
            .update_verifications(|map| {
                let mut record = VerificationRecord::idle();
                record.mark_verified("Verified on Etherscan ✓", 0);
                map.insert("0x01".to_string(), record);
            })
            .await
            .unwrap();

        let stats = studio.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.verified, 1);
        assert_eq!(stats.by_chain.values().sum::<usize>(), 2);

        let hits = studio.search("glx").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].verification.is_verified());
        assert_eq!(studio.search("0X02").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chain_filter_is_newest_first_and_limited() {
        let studio = studio_with(Arc::new(FixedExplorer::default()));
        for i in 0..4i64 {
            studio
                .record_live_deployment(DeploymentRecord::discovered(
                    format!("0x0{i}"),
                    84_532,
                    format!("0xt{i}"),
                    1,
                    i,
                ))
                .await
                .unwrap();
        }
        studio
            .record_live_deployment(DeploymentRecord::discovered("0x99", 421_614, "0xo", 1, 99))
            .await
            .unwrap();

        let base: Vec<String> = studio
            .deployments_on_chain(84_532, 3)
            .await
            .unwrap()
            .into_iter()
            .map(|view| view.record.contract_address)
            .collect();
        assert_eq!(base, vec!["0x03", "0x02", "0x01"]);

        assert_eq!(studio.deployments_on_chain(421_614, 20).await.unwrap().len(), 1);
        assert!(studio.deployments_on_chain(11_155_111, 20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_all_empties_both_collections() {
        let studio = studio_with(Arc::new(FixedExplorer::default()));
        studio
            .record_live_deployment(DeploymentRecord::discovered("0x01", 84_532, "0xa", 1, 2))
            .await
            .unwrap();

        studio.clear_all().await.unwrap();

        assert!(studio.store().load_deployments().await.unwrap().is_empty());
        assert!(studio.store().load_verifications().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn verification_watch_sweeps_and_stops_on_cancel() {
        let studio = studio_with(Arc::new(FixedExplorer::default()));
        studio
            .record_live_deployment(DeploymentRecord::discovered("0x01", 84_532, "0xa", 1, 2))
            .await
            .unwrap();

        let cancel = CancellationFlag::new();
        let handle = studio.spawn_verification_watch(cancel.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;

        let record = studio.verification().status("0x01").await.unwrap();
        assert_eq!(record.status, VerificationStatus::Verified);

        cancel.cancel();
        handle.await.unwrap();
    }
}
