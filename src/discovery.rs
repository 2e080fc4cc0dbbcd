//! Deployment discovery and reconciliation.
//!
//! Rebuilds the wallet's deployment list from explorer transaction history
//! across every configured chain and merges it into the cached records.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;

use crate::chains::Chain;
use crate::decoder;
use crate::error::ExplorerError;
use crate::explorer::{ExplorerApi, TxListEntry};
use crate::records::{DeploymentRecord, normalize_address, sort_newest_first};

/// Name and symbol recovered for a discovered contract. Either half may be
/// missing; the record keeps its placeholder for that half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub name: Option<String>,
    pub symbol: Option<String>,
}

/// One strategy for naming a contract found in history. Strategies run in
/// order and the first `Some` wins.
#[async_trait]
pub trait NameResolver: Send + Sync {
    fn label(&self) -> &'static str;

    async fn resolve(&self, chain_id: u64, tx: &TxListEntry) -> Option<ResolvedName>;
}

/// Decodes `(string, string, uint256)` constructor arguments from the deploy input.
pub struct ConstructorArgsResolver;

#[async_trait]
impl NameResolver for ConstructorArgsResolver {
    fn label(&self) -> &'static str {
        "constructor_args"
    }

    async fn resolve(&self, _chain_id: u64, tx: &TxListEntry) -> Option<ResolvedName> {
        decoder::decode_token_constructor(&tx.input).map(|args| ResolvedName {
            name: Some(args.name),
            symbol: Some(args.symbol),
        })
    }
}

/// Asks the explorer's token-info endpoint.
pub struct TokenMetadataResolver {
    explorer: Arc<dyn ExplorerApi>,
}

impl TokenMetadataResolver {
    pub fn new(explorer: Arc<dyn ExplorerApi>) -> Self {
        Self { explorer }
    }
}

#[async_trait]
impl NameResolver for TokenMetadataResolver {
    fn label(&self) -> &'static str {
        "token_metadata"
    }

    async fn resolve(&self, chain_id: u64, tx: &TxListEntry) -> Option<ResolvedName> {
        match self
            .explorer
            .token_metadata(chain_id, &tx.contract_address)
            .await
        {
            Ok(Some(metadata)) => {
                let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
                let name = present(metadata.name);
                let symbol = present(metadata.symbol);
                (name.is_some() || symbol.is_some()).then_some(ResolvedName { name, symbol })
            }
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(
                    chain_id,
                    contract = %tx.contract_address,
                    error = %e,
                    "Token metadata lookup failed"
                );
                None
            }
        }
    }
}

/// A chain whose scan failed; other chains are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainFailure {
    pub chain_id: u64,
    pub chain_name: String,
    pub error: String,
}

/// Output of [`DiscoveryEngine::discover_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    /// Newest first.
    pub records: Vec<DeploymentRecord>,
    pub failures: Vec<ChainFailure>,
}

pub struct DiscoveryEngine {
    explorer: Arc<dyn ExplorerApi>,
    chains: Vec<&'static Chain>,
    resolvers: Vec<Arc<dyn NameResolver>>,
}

impl DiscoveryEngine {
    /// Engine with the default resolver order: constructor args, then token metadata.
    pub fn new(explorer: Arc<dyn ExplorerApi>, chains: Vec<&'static Chain>) -> Self {
        let resolvers: Vec<Arc<dyn NameResolver>> = vec![
            Arc::new(ConstructorArgsResolver),
            Arc::new(TokenMetadataResolver::new(Arc::clone(&explorer))),
        ];
        Self::with_resolvers(explorer, chains, resolvers)
    }

    pub fn with_resolvers(
        explorer: Arc<dyn ExplorerApi>,
        chains: Vec<&'static Chain>,
        resolvers: Vec<Arc<dyn NameResolver>>,
    ) -> Self {
        Self {
            explorer,
            chains,
            resolvers,
        }
    }

    pub fn chains(&self) -> &[&'static Chain] {
        &self.chains
    }

    /// Scan every chain concurrently and merge the results newest first.
    pub async fn discover_all(&self, wallet: &str) -> Discovery {
        let scans = self.chains.iter().map(|chain| async move {
            (*chain, self.scan_chain(chain, wallet).await)
        });

        let mut discovery = Discovery::default();
        for (chain, result) in join_all(scans).await {
            match result {
                Ok(records) => {
                    tracing::debug!(chain_id = chain.id, found = records.len(), "Chain scan finished");
                    discovery.records.extend(records);
                }
                Err(e) => {
                    tracing::warn!(chain_id = chain.id, error = %e, "Chain scan failed");
                    discovery.failures.push(ChainFailure {
                        chain_id: chain.id,
                        chain_name: chain.name.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        discovery.records = reconcile(&[], &discovery.records);
        tracing::info!(
            wallet,
            found = discovery.records.len(),
            failed_chains = discovery.failures.len(),
            "Deployment discovery finished"
        );
        discovery
    }

    /// Contract creations by `wallet` on one chain.
    pub async fn scan_chain(
        &self,
        chain: &Chain,
        wallet: &str,
    ) -> Result<Vec<DeploymentRecord>, ExplorerError> {
        let history = self.explorer.transaction_history(chain.id, wallet).await?;
        let wallet = normalize_address(wallet);

        let mut records = Vec::new();
        for tx in history.iter().filter(|tx| is_deployment_by(tx, &wallet)) {
            let mut record = DeploymentRecord::discovered(
                tx.contract_address.trim(),
                chain.id,
                tx.hash.trim(),
                tx.block_number(),
                tx.timestamp_ms(),
            );
            if let Some(resolved) = self.resolve_name(chain.id, tx).await {
                record.upgrade_metadata(resolved.name.as_deref(), resolved.symbol.as_deref());
            }
            records.push(record);
        }
        Ok(records)
    }

    async fn resolve_name(&self, chain_id: u64, tx: &TxListEntry) -> Option<ResolvedName> {
        for resolver in &self.resolvers {
            if let Some(resolved) = resolver.resolve(chain_id, tx).await {
                tracing::debug!(
                    chain_id,
                    contract = %tx.contract_address,
                    resolver = resolver.label(),
                    name = ?resolved.name,
                    symbol = ?resolved.symbol,
                    "Resolved contract name"
                );
                return Some(resolved);
            }
        }
        None
    }
}

/// Successful contract creation sent from `wallet` (already normalized).
fn is_deployment_by(tx: &TxListEntry, wallet: &str) -> bool {
    normalize_address(&tx.from) == wallet
        && tx.to.trim().is_empty()
        && !tx.contract_address.trim().is_empty()
        && !tx.reverted()
}

/// Merge discovered records into existing ones.
///
/// Existing records are kept as they are; a discovered record is added only
/// when its address is not already present. Output is newest first with ties
/// ordered by address, so the merge is deterministic and idempotent.
pub fn reconcile(
    existing: &[DeploymentRecord],
    discovered: &[DeploymentRecord],
) -> Vec<DeploymentRecord> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(existing.len() + discovered.len());
    for record in existing.iter().chain(discovered) {
        if seen.insert(record.normalized_address()) {
            merged.push(record.clone());
        }
    }
    sort_newest_first(&mut merged);
    merged
}
