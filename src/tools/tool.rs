//! Tool trait and call types.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::chains::DEFAULT_CHAIN_ID;

pub use crate::error::ToolError;

/// Per-call context supplied by the caller.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Chain used when a call omits `chainId`.
    pub default_chain_id: u64,
    /// Opaque caller metadata, echoed into logs.
    pub metadata: serde_json::Value,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            default_chain_id: DEFAULT_CHAIN_ID,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Successful tool result.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    pub result: serde_json::Value,
    #[serde(skip)]
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self { result, duration }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    fn execution_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// Deserialize tool parameters, naming the tool on failure.
pub(crate) fn parse_params<T: serde::de::DeserializeOwned>(
    tool: &str,
    params: serde_json::Value,
) -> Result<T, ToolError> {
    // Tools without parameters accept a missing/null body.
    let params = if params.is_null() {
        serde_json::json!({})
    } else {
        params
    };
    serde_json::from_value(params)
        .map_err(|e| ToolError::InvalidParameters(format!("invalid {tool} parameters: {e}")))
}

/// Reject anything that is not a 20-byte hex address.
pub(crate) fn require_address(field: &str, value: &str) -> Result<String, ToolError> {
    let trimmed = value.trim();
    if crate::records::is_valid_address(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(ToolError::InvalidParameters(format!(
            "{field} must be a 0x-prefixed 20-byte hex address, got '{value}'"
        )))
    }
}

/// Serialize a tool result.
pub(crate) fn to_result<T: Serialize>(value: &T) -> Result<serde_json::Value, ToolError> {
    serde_json::to_value(value)
        .map_err(|e| ToolError::ExecutionFailed(format!("failed to encode result: {e}")))
}
