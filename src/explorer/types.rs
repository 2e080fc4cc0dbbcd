//! Wire types for Etherscan-compatible explorer APIs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{status, message, result}` envelope shared by most explorer modules.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default, deserialize_with = "string_or_number")]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub result: Value,
}

impl Envelope {
    pub fn is_ok(&self) -> bool {
        self.status == "1"
    }

    /// Result as text, for endpoints that report outcomes as strings.
    pub fn result_text(&self) -> String {
        match &self.result {
            Value::String(s) => s.clone(),
            Value::Null => self.message.clone(),
            other => other.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// One entry from `module=account&action=txlist`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxListEntry {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub contract_address: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub block_number: String,
    /// Seconds since the epoch, as a decimal string.
    #[serde(default)]
    pub time_stamp: String,
    #[serde(default)]
    pub is_error: String,
    #[serde(default, rename = "txreceipt_status")]
    pub receipt_status: String,
}

impl TxListEntry {
    pub fn reverted(&self) -> bool {
        self.is_error == "1" || self.receipt_status == "0"
    }

    pub fn block_number(&self) -> u64 {
        self.block_number.trim().parse().unwrap_or(0)
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.time_stamp
            .trim()
            .parse::<i64>()
            .map(|secs| secs.saturating_mul(1000))
            .unwrap_or(0)
    }
}

/// Token metadata from `module=token&action=tokeninfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u32>,
    pub total_supply: Option<String>,
}

impl TokenMetadata {
    /// Accepts both the array and the single-object result shapes.
    pub(crate) fn from_result(result: &Value) -> Option<Self> {
        let entry = match result {
            Value::Array(items) => items.first()?,
            Value::Object(_) => result,
            _ => return None,
        };
        let metadata = Self {
            name: first_text(entry, &["tokenName", "name"]),
            symbol: first_text(entry, &["symbol", "tokenSymbol"]),
            decimals: first_text(entry, &["divisor", "decimals"]).and_then(|d| d.parse().ok()),
            total_supply: first_text(entry, &["totalSupply"]),
        };
        if metadata.name.is_none() && metadata.symbol.is_none() {
            return None;
        }
        Some(metadata)
    }
}

fn first_text(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| entry.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Form body for `action=verifysourcecode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationSubmission {
    pub contract_address: String,
    pub source_code: String,
    pub contract_name: String,
    pub compiler_version: String,
    pub optimization_used: bool,
    pub runs: u32,
    /// Hex without `0x`; empty when unknown.
    pub constructor_arguments: String,
    pub license_type: u32,
}

/// Explorer reply to a verification submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResponse {
    Accepted { guid: String },
    AlreadyVerified { message: String },
    Rejected { message: String },
}

/// Explorer reply to `checkverifystatus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationCheck {
    Pending { message: String },
    Verified { message: String },
    Failed { message: String },
}

/// Verification details from `getsourcecode`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    pub address: String,
    pub chain_id: u64,
    pub verified: bool,
    pub contract_name: Option<String>,
    pub compiler_version: Option<String>,
    pub optimization_used: bool,
    pub runs: Option<u32>,
    pub license_type: Option<String>,
    pub proxy: bool,
}

const NOT_VERIFIED_ABI: &str = "Contract source code not verified";

impl ContractInfo {
    pub(crate) fn from_result(chain_id: u64, address: &str, result: &Value) -> Self {
        let Some(entry) = result.as_array().and_then(|items| items.first()) else {
            return Self {
                address: address.to_string(),
                chain_id,
                ..Self::default()
            };
        };
        let text = |key: &str| {
            entry
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let abi = text("ABI").unwrap_or_default();
        let source = text("SourceCode").unwrap_or_default();
        let verified = !abi.is_empty() && abi != NOT_VERIFIED_ABI && !source.is_empty();
        Self {
            address: address.to_string(),
            chain_id,
            verified,
            contract_name: text("ContractName").filter(|_| verified),
            compiler_version: text("CompilerVersion").filter(|_| verified),
            optimization_used: text("OptimizationUsed").as_deref() == Some("1"),
            runs: text("Runs").and_then(|r| r.parse().ok()),
            license_type: text("LicenseType"),
            proxy: text("Proxy").as_deref() == Some("1"),
        }
    }
}

/// Gas price tiers in gwei.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GasOracle {
    pub chain_id: u64,
    pub low: String,
    pub average: String,
    pub high: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub address: String,
    pub chain_id: u64,
    pub wei: String,
    /// Native balance rounded to six decimals.
    pub balance: String,
    pub symbol: String,
}
