//! Deployment history and verification tools.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::chains;
use crate::error::WalletError;
use crate::records::{DeploymentRecord, normalize_address};
use crate::studio::Studio;
use crate::tools::tool::{
    Tool, ToolContext, ToolError, ToolOutput, parse_params, require_address, to_result,
};
use crate::verification::SubmitRefusal;

pub const LIST_DEPLOYMENTS: &str = "list_deployments";
pub const RESYNC_DEPLOYMENTS: &str = "resync_deployments";
pub const DEPLOYMENTS_BY_CHAIN: &str = "deployments_by_chain";
pub const DEPLOYMENT_STATS: &str = "deployment_stats";
pub const SEARCH_CONTRACTS: &str = "search_contracts";
pub const VERIFY_CONTRACT: &str = "verify_contract";
pub const VERIFICATION_STATUS: &str = "verification_status";
pub const RECORD_DEPLOYMENT: &str = "record_deployment";

const CHAIN_LISTING_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletParams {
    wallet_address: String,
}

fn wallet_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "walletAddress": {"type": "string", "description": "Deployer wallet address."}
        },
        "required": ["walletAddress"]
    })
}

/// Cached deployments, discovering from chain history when the cache is empty.
pub struct ListDeploymentsTool {
    studio: Arc<Studio>,
}

impl ListDeploymentsTool {
    pub fn new(studio: Arc<Studio>) -> Self {
        Self { studio }
    }
}

#[async_trait]
impl Tool for ListDeploymentsTool {
    fn name(&self) -> &str {
        LIST_DEPLOYMENTS
    }

    fn description(&self) -> &str {
        "Lists the wallet's deployed contracts with verification state and explorer links."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        wallet_schema()
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let parsed: WalletParams = parse_params(LIST_DEPLOYMENTS, params)?;
        let wallet = require_address("walletAddress", &parsed.wallet_address)?;

        let listing = self.studio.deployments(&wallet).await?;
        Ok(ToolOutput::success(to_result(&listing)?, start.elapsed()))
    }

    fn execution_timeout(&self) -> Duration {
        Duration::from_secs(60)
    }
}

/// Rescan chain history and merge into the cache.
pub struct ResyncDeploymentsTool {
    studio: Arc<Studio>,
}

impl ResyncDeploymentsTool {
    pub fn new(studio: Arc<Studio>) -> Self {
        Self { studio }
    }
}

#[async_trait]
impl Tool for ResyncDeploymentsTool {
    fn name(&self) -> &str {
        RESYNC_DEPLOYMENTS
    }

    fn description(&self) -> &str {
        "Rescans every chain for contracts deployed by the wallet and merges them into the saved list."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        wallet_schema()
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let parsed: WalletParams = parse_params(RESYNC_DEPLOYMENTS, params)?;
        let wallet = require_address("walletAddress", &parsed.wallet_address)?;

        let report = self.studio.resync(&wallet).await?;
        Ok(ToolOutput::success(to_result(&report)?, start.elapsed()))
    }

    fn execution_timeout(&self) -> Duration {
        Duration::from_secs(60)
    }
}

pub struct DeploymentStatsTool {
    studio: Arc<Studio>,
}

impl DeploymentStatsTool {
    pub fn new(studio: Arc<Studio>) -> Self {
        Self { studio }
    }
}

#[async_trait]
impl Tool for DeploymentStatsTool {
    fn name(&self) -> &str {
        DEPLOYMENT_STATS
    }

    fn description(&self) -> &str {
        "Counts saved deployments in total, per chain, and verified."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(
        &self,
        _params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let stats = self.studio.stats().await?;
        Ok(ToolOutput::success(to_result(&stats)?, start.elapsed()))
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
}

pub struct SearchContractsTool {
    studio: Arc<Studio>,
}

impl SearchContractsTool {
    pub fn new(studio: Arc<Studio>) -> Self {
        Self { studio }
    }
}

#[async_trait]
impl Tool for SearchContractsTool {
    fn name(&self) -> &str {
        SEARCH_CONTRACTS
    }

    fn description(&self) -> &str {
        "Finds saved deployments whose name, symbol or address contains the query (case-insensitive)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Text to match."}
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let parsed: SearchParams = parse_params(SEARCH_CONTRACTS, params)?;
        if parsed.query.trim().is_empty() {
            return Err(ToolError::InvalidParameters(
                "query cannot be empty".to_string(),
            ));
        }

        let matches = self.studio.search(&parsed.query).await?;
        let result = json!({
            "query": parsed.query,
            "count": matches.len(),
            "matches": to_result(&matches)?,
        });
        Ok(ToolOutput::success(result, start.elapsed()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainParams {
    chain_id: u64,
}

/// Newest saved deployments on a single chain.
pub struct DeploymentsByChainTool {
    studio: Arc<Studio>,
}

impl DeploymentsByChainTool {
    pub fn new(studio: Arc<Studio>) -> Self {
        Self { studio }
    }
}

#[async_trait]
impl Tool for DeploymentsByChainTool {
    fn name(&self) -> &str {
        DEPLOYMENTS_BY_CHAIN
    }

    fn description(&self) -> &str {
        "Lists the 20 most recent saved deployments on one chain."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "chainId": {"type": "integer", "description": "Chain to filter by."}
            },
            "required": ["chainId"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let parsed: ChainParams = parse_params(DEPLOYMENTS_BY_CHAIN, params)?;
        if chains::chain_by_id(parsed.chain_id).is_none() {
            return Err(ToolError::InvalidParameters(format!(
                "chainId {} is not a supported chain",
                parsed.chain_id
            )));
        }

        let deployments = self
            .studio
            .deployments_on_chain(parsed.chain_id, CHAIN_LISTING_LIMIT)
            .await?;
        let result = json!({
            "chainId": parsed.chain_id,
            "count": deployments.len(),
            "deployments": to_result(&deployments)?,
        });
        Ok(ToolOutput::success(result, start.elapsed()))
    }
}

#[derive(Debug, Deserialize)]
struct AddressParams {
    address: String,
}

/// Submit source verification for a saved deployment.
pub struct VerifyContractTool {
    studio: Arc<Studio>,
}

impl VerifyContractTool {
    pub fn new(studio: Arc<Studio>) -> Self {
        Self { studio }
    }
}

#[async_trait]
impl Tool for VerifyContractTool {
    fn name(&self) -> &str {
        VERIFY_CONTRACT
    }

    fn description(&self) -> &str {
        "Submits a saved deployment's source to the block explorer for verification."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "address": {"type": "string", "description": "Deployed contract address."}
            },
            "required": ["address"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let parsed: AddressParams = parse_params(VERIFY_CONTRACT, params)?;
        let address = require_address("address", &parsed.address)?;

        let result = match self.studio.verification().submit(&address).await {
            Ok(record) => json!({
                "submitted": true,
                "address": address,
                "verification": to_result(&record)?,
            }),
            Err(SubmitRefusal::Storage(reason)) => {
                return Err(ToolError::ExecutionFailed(reason));
            }
            Err(refusal) => {
                let current = self.studio.verification().status(&address).await?;
                json!({
                    "submitted": false,
                    "address": address,
                    "refusal": {"code": refusal.code(), "message": refusal.to_string()},
                    "verification": to_result(&current)?,
                })
            }
        };
        Ok(ToolOutput::success(result, start.elapsed()))
    }

    fn execution_timeout(&self) -> Duration {
        Duration::from_secs(60)
    }
}

#[derive(Debug, Deserialize)]
struct OptionalAddressParams {
    #[serde(default)]
    address: Option<String>,
}

pub struct VerificationStatusTool {
    studio: Arc<Studio>,
}

impl VerificationStatusTool {
    pub fn new(studio: Arc<Studio>) -> Self {
        Self { studio }
    }
}

#[async_trait]
impl Tool for VerificationStatusTool {
    fn name(&self) -> &str {
        VERIFICATION_STATUS
    }

    fn description(&self) -> &str {
        "Returns the verification record for one address, or every record when no address is given."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "address": {"type": "string", "description": "Contract address (optional)."}
            }
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let parsed: OptionalAddressParams = parse_params(VERIFICATION_STATUS, params)?;
        let engine = self.studio.verification();

        let result = match parsed.address {
            Some(address) => {
                let address = require_address("address", &address)?;
                let record = engine.status(&address).await?;
                json!({"address": normalize_address(&address), "verification": to_result(&record)?})
            }
            None => json!({"verifications": to_result(&engine.all().await?)?}),
        };
        Ok(ToolOutput::success(result, start.elapsed()))
    }
}

#[derive(Debug, Deserialize)]
struct WalletFailure {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordParams {
    #[serde(default)]
    contract_address: Option<String>,
    #[serde(default)]
    contract_name: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    chain_id: Option<u64>,
    #[serde(default)]
    tx_hash: Option<String>,
    #[serde(default)]
    block_number: Option<u64>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    features: Vec<String>,
    /// Failure reported by the wallet instead of a receipt.
    #[serde(default)]
    error: Option<WalletFailure>,
}

/// Record a confirmed live deployment, or classify a wallet failure.
pub struct RecordDeploymentTool {
    studio: Arc<Studio>,
}

impl RecordDeploymentTool {
    pub fn new(studio: Arc<Studio>) -> Self {
        Self { studio }
    }
}

fn required(field: &str, value: Option<String>) -> Result<String, ToolError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ToolError::InvalidParameters(format!("{field} is required")))
}

#[async_trait]
impl Tool for RecordDeploymentTool {
    fn name(&self) -> &str {
        RECORD_DEPLOYMENT
    }

    fn description(&self) -> &str {
        "Saves a confirmed deployment receipt, or reports a wallet failure as user cancellation or error."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "contractAddress": {"type": "string"},
                "contractName": {"type": "string"},
                "symbol": {"type": "string"},
                "chainId": {"type": "integer"},
                "txHash": {"type": "string"},
                "blockNumber": {"type": "integer"},
                "timestamp": {"type": "integer", "description": "Milliseconds since the epoch."},
                "features": {"type": "array", "items": {"type": "string"}},
                "error": {
                    "type": "object",
                    "description": "Wallet failure in place of a receipt.",
                    "properties": {
                        "code": {"type": ["integer", "string"]},
                        "message": {"type": "string"}
                    }
                }
            }
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let parsed: RecordParams = parse_params(RECORD_DEPLOYMENT, params)?;

        if let Some(failure) = parsed.error {
            let classified = WalletError::classify(failure.code.as_ref(), &failure.message);
            tracing::info!(error = %classified, "Deployment reported a wallet failure");
            return Err(classified.into());
        }

        let address = required("contractAddress", parsed.contract_address)?;
        let address = require_address("contractAddress", &address)?;
        let tx_hash = required("txHash", parsed.tx_hash)?;
        let chain_id = parsed.chain_id.unwrap_or(ctx.default_chain_id);
        if chains::chain_by_id(chain_id).is_none() {
            return Err(ToolError::InvalidParameters(format!(
                "chainId {chain_id} is not a supported chain"
            )));
        }

        let record = DeploymentRecord {
            contract_address: address,
            contract_name: required("contractName", parsed.contract_name)?,
            symbol: required("symbol", parsed.symbol)?,
            chain_id,
            chain_name: chains::chain_name(chain_id),
            tx_hash,
            block_number: parsed.block_number.unwrap_or_default(),
            timestamp: parsed
                .timestamp
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
            features: parsed.features,
        };
        let stored = self.studio.record_live_deployment(record).await?;
        let result = json!({
            "recorded": true,
            "deployment": to_result(&stored)?,
            "explorerContractUrl": stored.explorer_contract_url(),
            "explorerTxUrl": stored.explorer_tx_url(),
        });
        Ok(ToolOutput::success(result, start.elapsed()))
    }
}

/// All deployment tools sharing one studio.
pub fn deployment_tools(studio: Arc<Studio>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ListDeploymentsTool::new(Arc::clone(&studio))),
        Arc::new(ResyncDeploymentsTool::new(Arc::clone(&studio))),
        Arc::new(DeploymentsByChainTool::new(Arc::clone(&studio))),
        Arc::new(DeploymentStatsTool::new(Arc::clone(&studio))),
        Arc::new(SearchContractsTool::new(Arc::clone(&studio))),
        Arc::new(VerifyContractTool::new(Arc::clone(&studio))),
        Arc::new(VerificationStatusTool::new(Arc::clone(&studio))),
        Arc::new(RecordDeploymentTool::new(studio)),
    ]
}
