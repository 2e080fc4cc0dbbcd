//! Read-only block-explorer tools.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::explorer::{EtherscanClient, ExplorerApi};
use crate::tools::tool::{
    Tool, ToolContext, ToolError, ToolOutput, parse_params, require_address, to_result,
};

pub const GET_CONTRACT_INFO: &str = "get_contract_info";
pub const GET_TOKEN_INFO: &str = "get_token_info";
pub const GET_GAS_PRICE: &str = "get_gas_price";
pub const GET_TRANSACTION_STATUS: &str = "get_transaction_status";
pub const GET_ACCOUNT_BALANCE: &str = "get_account_balance";

const EXPLORER_TOOL_TIMEOUT: Duration = Duration::from_secs(20);

fn chain_id_schema() -> serde_json::Value {
    json!({
        "type": "integer",
        "description": "Chain id. Defaults to Ethereum Sepolia (11155111)."
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressParams {
    address: String,
    #[serde(default)]
    chain_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainParams {
    #[serde(default)]
    chain_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxParams {
    tx_hash: String,
    #[serde(default)]
    chain_id: Option<u64>,
}

fn require_tx_hash(value: &str) -> Result<String, ToolError> {
    let trimmed = value.trim();
    let valid = trimmed.len() == 66
        && trimmed.starts_with("0x")
        && trimmed[2..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(ToolError::InvalidParameters(format!(
            "txHash must be a 0x-prefixed 32-byte hex hash, got '{value}'"
        )))
    }
}

/// Verification status and compiler settings of a contract.
pub struct ContractInfoTool {
    client: Arc<EtherscanClient>,
}

impl ContractInfoTool {
    pub fn new(client: Arc<EtherscanClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for ContractInfoTool {
    fn name(&self) -> &str {
        GET_CONTRACT_INFO
    }

    fn description(&self) -> &str {
        "Returns whether a contract's source is verified, with its name, compiler, optimization and license."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "address": {"type": "string", "description": "Contract address."},
                "chainId": chain_id_schema()
            },
            "required": ["address"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let parsed: AddressParams = parse_params(GET_CONTRACT_INFO, params)?;
        let address = require_address("address", &parsed.address)?;
        let chain_id = parsed.chain_id.unwrap_or(ctx.default_chain_id);

        let info = self.client.contract_info(chain_id, &address).await?;
        Ok(ToolOutput::success(to_result(&info)?, start.elapsed()))
    }

    fn execution_timeout(&self) -> Duration {
        EXPLORER_TOOL_TIMEOUT
    }
}

/// ERC-20 name, symbol, decimals and supply.
pub struct TokenInfoTool {
    client: Arc<EtherscanClient>,
}

impl TokenInfoTool {
    pub fn new(client: Arc<EtherscanClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for TokenInfoTool {
    fn name(&self) -> &str {
        GET_TOKEN_INFO
    }

    fn description(&self) -> &str {
        "Returns token name, symbol, decimals and total supply for a token contract."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "address": {"type": "string", "description": "Token contract address."},
                "chainId": chain_id_schema()
            },
            "required": ["address"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let parsed: AddressParams = parse_params(GET_TOKEN_INFO, params)?;
        let address = require_address("address", &parsed.address)?;
        let chain_id = parsed.chain_id.unwrap_or(ctx.default_chain_id);

        let metadata = self.client.token_metadata(chain_id, &address).await?;
        let result = match metadata {
            Some(metadata) => json!({
                "found": true,
                "address": address,
                "chainId": chain_id,
                "name": metadata.name,
                "symbol": metadata.symbol,
                "decimals": metadata.decimals,
                "totalSupply": metadata.total_supply,
            }),
            None => json!({"found": false, "address": address, "chainId": chain_id}),
        };
        Ok(ToolOutput::success(result, start.elapsed()))
    }

    fn execution_timeout(&self) -> Duration {
        EXPLORER_TOOL_TIMEOUT
    }
}

/// Low/average/high gas price in gwei.
pub struct GasPriceTool {
    client: Arc<EtherscanClient>,
}

impl GasPriceTool {
    pub fn new(client: Arc<EtherscanClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for GasPriceTool {
    fn name(&self) -> &str {
        GET_GAS_PRICE
    }

    fn description(&self) -> &str {
        "Returns current low, average and high gas prices in gwei."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {"chainId": chain_id_schema()}
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let parsed: ChainParams = parse_params(GET_GAS_PRICE, params)?;
        let chain_id = parsed.chain_id.unwrap_or(ctx.default_chain_id);

        let oracle = self.client.gas_oracle(chain_id).await?;
        Ok(ToolOutput::success(to_result(&oracle)?, start.elapsed()))
    }

    fn execution_timeout(&self) -> Duration {
        EXPLORER_TOOL_TIMEOUT
    }
}

/// Receipt status of a transaction.
pub struct TransactionStatusTool {
    client: Arc<EtherscanClient>,
}

impl TransactionStatusTool {
    pub fn new(client: Arc<EtherscanClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for TransactionStatusTool {
    fn name(&self) -> &str {
        GET_TRANSACTION_STATUS
    }

    fn description(&self) -> &str {
        "Returns whether a transaction succeeded or failed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "txHash": {"type": "string", "description": "Transaction hash."},
                "chainId": chain_id_schema()
            },
            "required": ["txHash"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let parsed: TxParams = parse_params(GET_TRANSACTION_STATUS, params)?;
        let tx_hash = require_tx_hash(&parsed.tx_hash)?;
        let chain_id = parsed.chain_id.unwrap_or(ctx.default_chain_id);

        let status = self.client.receipt_status(chain_id, &tx_hash).await?;
        let result = json!({
            "txHash": tx_hash,
            "chainId": chain_id,
            "status": status,
            "explorerUrl": crate::chains::explorer_tx_url(chain_id, &tx_hash),
        });
        Ok(ToolOutput::success(result, start.elapsed()))
    }

    fn execution_timeout(&self) -> Duration {
        EXPLORER_TOOL_TIMEOUT
    }
}

/// Native balance of an account.
pub struct AccountBalanceTool {
    client: Arc<EtherscanClient>,
}

impl AccountBalanceTool {
    pub fn new(client: Arc<EtherscanClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for AccountBalanceTool {
    fn name(&self) -> &str {
        GET_ACCOUNT_BALANCE
    }

    fn description(&self) -> &str {
        "Returns the native-currency balance of an address, rounded to six decimals."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "address": {"type": "string", "description": "Account address."},
                "chainId": chain_id_schema()
            },
            "required": ["address"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let parsed: AddressParams = parse_params(GET_ACCOUNT_BALANCE, params)?;
        let address = require_address("address", &parsed.address)?;
        let chain_id = parsed.chain_id.unwrap_or(ctx.default_chain_id);

        let balance = self.client.native_balance(chain_id, &address).await?;
        Ok(ToolOutput::success(to_result(&balance)?, start.elapsed()))
    }

    fn execution_timeout(&self) -> Duration {
        EXPLORER_TOOL_TIMEOUT
    }
}

/// All explorer tools sharing one client.
pub fn explorer_tools(client: Arc<EtherscanClient>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ContractInfoTool::new(Arc::clone(&client))),
        Arc::new(TokenInfoTool::new(Arc::clone(&client))),
        Arc::new(GasPriceTool::new(Arc::clone(&client))),
        Arc::new(TransactionStatusTool::new(Arc::clone(&client))),
        Arc::new(AccountBalanceTool::new(client)),
    ]
}
