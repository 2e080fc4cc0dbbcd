//! Background name/symbol recovery for deployments discovery left unnamed.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use crate::chains;
use crate::error::StoreError;
use crate::records::DeploymentRecord;
use crate::rpc::{ChainConnector, ChainReader};
use crate::store::RecordStore;
use crate::verification::CancellationFlag;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationReport {
    pub attempted: usize,
    /// Records whose name or symbol changed, as persisted.
    pub updated: Vec<DeploymentRecord>,
    pub cancelled: bool,
}

pub struct Hydrator {
    store: Arc<RecordStore>,
    connector: Arc<dyn ChainConnector>,
}

impl Hydrator {
    pub fn new(store: Arc<RecordStore>, connector: Arc<dyn ChainConnector>) -> Self {
        Self { store, connector }
    }

    /// Hydrate every stored record still carrying the placeholder name.
    pub async fn hydrate_stored(&self, cancel: &CancellationFlag) -> Result<HydrationReport, StoreError> {
        let records = self.store.load_deployments().await?;
        Ok(self.hydrate(&records, cancel).await)
    }

    /// Read `name()`/`symbol()` for unnamed records, one connection per chain.
    ///
    /// Read failures leave the placeholder in place for a later pass. Each
    /// contract's result is written to the store as soon as it arrives.
    pub async fn hydrate(
        &self,
        records: &[DeploymentRecord],
        cancel: &CancellationFlag,
    ) -> HydrationReport {
        let mut by_chain: BTreeMap<u64, Vec<&DeploymentRecord>> = BTreeMap::new();
        for record in records.iter().filter(|r| r.needs_hydration()) {
            by_chain.entry(record.chain_id).or_default().push(record);
        }
        if by_chain.is_empty() {
            return HydrationReport::default();
        }

        let passes = by_chain
            .into_iter()
            .map(|(chain_id, pending)| self.hydrate_chain(chain_id, pending, cancel));

        let mut report = HydrationReport::default();
        for chain_report in join_all(passes).await {
            report.attempted += chain_report.attempted;
            report.updated.extend(chain_report.updated);
            report.cancelled |= chain_report.cancelled;
        }
        tracing::info!(
            attempted = report.attempted,
            updated = report.updated.len(),
            "Hydration pass finished"
        );
        report
    }

    async fn hydrate_chain(
        &self,
        chain_id: u64,
        pending: Vec<&DeploymentRecord>,
        cancel: &CancellationFlag,
    ) -> HydrationReport {
        let mut report = HydrationReport::default();
        let Some(chain) = chains::chain_by_id(chain_id) else {
            tracing::debug!(chain_id, "Skipping hydration for unregistered chain");
            return report;
        };
        let reader = match self.connector.connect(chain) {
            Ok(reader) => reader,
            Err(e) => {
                tracing::warn!(chain_id, error = %e, "Cannot open RPC connection for hydration");
                return report;
            }
        };

        for record in pending {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.attempted += 1;
            let (name, symbol) = read_metadata(reader.as_ref(), &record.contract_address).await;
            if name.is_none() && symbol.is_none() {
                continue;
            }
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let key = record.normalized_address();
            let persisted = self
                .store
                .update_deployments(|records| {
                    let stored = records
                        .iter_mut()
                        .find(|r| r.normalized_address() == key)?;
                    stored
                        .upgrade_metadata(name.as_deref(), symbol.as_deref())
                        .then(|| stored.clone())
                })
                .await;
            match persisted {
                Ok(Some(updated)) => {
                    tracing::debug!(
                        chain_id,
                        contract = %updated.contract_address,
                        name = %updated.contract_name,
                        "Hydrated contract metadata"
                    );
                    report.updated.push(updated);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(contract = %record.contract_address, error = %e, "Cannot persist hydrated metadata");
                }
            }
        }
        report
    }
}

/// Independent `name()` and `symbol()` reads; either may fail alone.
async fn read_metadata(reader: &dyn ChainReader, address: &str) -> (Option<String>, Option<String>) {
    let (name, symbol) = tokio::join!(reader.name(address), reader.symbol(address));
    let keep = |result: Result<String, crate::error::RpcError>, call: &str| match result {
        Ok(value) if !value.trim().is_empty() => Some(value),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(contract = address, call, error = %e, "Contract read failed");
            None
        }
    };
    (keep(name, "name()"), keep(symbol, "symbol()"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{Chain, SUPPORTED_CHAINS};
    use crate::error::RpcError;
    use crate::records::{UNKNOWN_CONTRACT_NAME, UNKNOWN_SYMBOL};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeReader {
        names: HashMap<String, String>,
        symbols: HashMap<String, String>,
    }

    #[async_trait]
    impl ChainReader for FakeReader {
        async fn name(&self, address: &str) -> Result<String, RpcError> {
            self.names.get(address).cloned().ok_or(RpcError::Decode {
                call: "name()",
                reason: "execution reverted".to_string(),
            })
        }

        async fn symbol(&self, address: &str) -> Result<String, RpcError> {
            self.symbols.get(address).cloned().ok_or(RpcError::Decode {
                call: "symbol()",
                reason: "execution reverted".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        readers: HashMap<u64, Arc<FakeReader>>,
        connects: Mutex<Vec<u64>>,
    }

    impl ChainConnector for FakeConnector {
        fn connect(&self, chain: &Chain) -> Result<Arc<dyn ChainReader>, RpcError> {
            self.connects.lock().unwrap().push(chain.id);
            match self.readers.get(&chain.id) {
                Some(reader) => Ok(Arc::clone(reader) as Arc<dyn ChainReader>),
                None => Err(RpcError::InvalidEndpoint {
                    url: chain.rpc_url.to_string(),
                    reason: "offline".to_string(),
                }),
            }
        }
    }

    fn unnamed(address: &str, chain_id: u64, timestamp: i64) -> DeploymentRecord {
        DeploymentRecord::discovered(address, chain_id, "0xhash", 1, timestamp)
    }

    #[tokio::test]
    async fn hydrates_per_chain_and_persists_partial_results() {
        let base = SUPPORTED_CHAINS[0].id;
        let arbitrum = SUPPORTED_CHAINS[1].id;
        let mut base_reader = FakeReader::default();
        base_reader.names.insert("0xA1".to_string(), "Alpha".to_string());
        base_reader.symbols.insert("0xA1".to_string(), "ALP".to_string());
        base_reader.names.insert("0xA2".to_string(), "Beta".to_string());
        let connector = FakeConnector {
            readers: HashMap::from([(base, Arc::new(base_reader))]),
            ..FakeConnector::default()
        };

        let mut named = unnamed("0xA3", base, 1);
        named.contract_name = "Already".to_string();
        let records = vec![
            unnamed("0xA1", base, 4),
            unnamed("0xA2", base, 3),
            named,
            unnamed("0xB1", arbitrum, 2),
        ];
        let store = Arc::new(RecordStore::in_memory(50));
        store.save_deployments(records.clone()).await.unwrap();

        let connector = Arc::new(connector);
        let hydrator = Hydrator::new(Arc::clone(&store), Arc::clone(&connector) as Arc<dyn ChainConnector>);
        let report = hydrator.hydrate(&records, &CancellationFlag::new()).await;

        assert_eq!(report.attempted, 2);
        assert_eq!(report.updated.len(), 2);

        let mut connects = connector.connects.lock().unwrap().clone();
        connects.sort_unstable();
        assert_eq!(connects, vec![base, arbitrum]);

        let stored = store.load_deployments().await.unwrap();
        let by_address: HashMap<&str, (&str, &str)> = stored
            .iter()
            .map(|r| (r.contract_address.as_str(), (r.contract_name.as_str(), r.symbol.as_str())))
            .collect();
        assert_eq!(by_address["0xA1"], ("Alpha", "ALP"));
        assert_eq!(by_address["0xA2"], ("Beta", UNKNOWN_SYMBOL));
        assert_eq!(by_address["0xA3"], ("Already", UNKNOWN_SYMBOL));
        assert_eq!(by_address["0xB1"], (UNKNOWN_CONTRACT_NAME, UNKNOWN_SYMBOL));
    }

    #[tokio::test]
    async fn cancelled_pass_writes_nothing() {
        let base = SUPPORTED_CHAINS[0].id;
        let mut reader = FakeReader::default();
        reader.names.insert("0xA1".to_string(), "Alpha".to_string());
        let connector = FakeConnector {
            readers: HashMap::from([(base, Arc::new(reader))]),
            ..FakeConnector::default()
        };
        let records = vec![unnamed("0xA1", base, 1)];
        let store = Arc::new(RecordStore::in_memory(50));
        store.save_deployments(records.clone()).await.unwrap();

        let cancel = CancellationFlag::new();
        cancel.cancel();
        let report = Hydrator::new(Arc::clone(&store), Arc::new(connector))
            .hydrate(&records, &cancel)
            .await;

        assert!(report.cancelled);
        assert!(report.updated.is_empty());
        assert!(store.load_deployments().await.unwrap()[0].needs_hydration());
    }

    #[tokio::test]
    async fn nothing_to_hydrate_opens_no_connections() {
        let connector = Arc::new(FakeConnector::default());
        let store = Arc::new(RecordStore::in_memory(50));
        let mut named = unnamed("0xA1", SUPPORTED_CHAINS[0].id, 1);
        named.contract_name = "Named".to_string();

        let report = Hydrator::new(store, Arc::clone(&connector) as Arc<dyn ChainConnector>)
            .hydrate(&[named], &CancellationFlag::new())
            .await;

        assert_eq!(report, HydrationReport::default());
        assert!(connector.connects.lock().unwrap().is_empty());
    }
}
