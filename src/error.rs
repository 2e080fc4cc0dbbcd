//! Error types for contract-studio.

use std::time::Duration;

use serde::Serialize;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Explorer error: {0}")]
    Explorer(#[from] ExplorerError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),
}

/// Failure domains for structured error payloads.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDomain {
    Config,
    Storage,
    Explorer,
    Rpc,
    Wallet,
    Tool,
}

/// Structured failure reason handed back to tool callers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub domain: ErrorDomain,
    pub code: &'static str,
    pub retryable: bool,
    pub message: String,
}

impl ErrorPayload {
    fn new(
        domain: ErrorDomain,
        code: &'static str,
        retryable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            domain,
            code,
            retryable,
            message: message.into(),
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Record store errors.
///
/// Corrupt collections are not errors: they load as empty. These variants
/// cover the backend failing to read or write at all.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open store at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Failed to read key {key}: {reason}")]
    Read { key: String, reason: String },

    #[error("Failed to write key {key}: {reason}")]
    Write { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "libsql")]
    #[error("LibSQL error: {0}")]
    LibSql(#[from] libsql::Error),
}

/// Block-explorer API errors.
#[derive(Debug, thiserror::Error)]
pub enum ExplorerError {
    #[error("Chain {0} is not registered")]
    UnknownChain(u64),

    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("Explorer returned HTTP {status} for {endpoint}")]
    HttpStatus { endpoint: String, status: u16 },

    #[error("Malformed explorer response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("Explorer rejected {action}: {message}")]
    Rejected { action: String, message: String },

    #[error("Explorer rate limited {action}")]
    RateLimited { action: String },
}

impl ExplorerError {
    /// Transient failures leave state unchanged and are retried next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. }
                | Self::HttpStatus { .. }
                | Self::InvalidResponse { .. }
                | Self::RateLimited { .. }
        )
    }
}

/// Direct contract-read (JSON-RPC) errors.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("RPC error {code} from {url}: {message}")]
    Node {
        url: String,
        code: i64,
        message: String,
    },

    #[error("Could not decode {call} return data: {reason}")]
    Decode { call: &'static str, reason: String },

    #[error("Invalid RPC endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Invalid contract address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// Wallet/signing-provider failures reported by collaborating components.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("Request rejected in wallet")]
    UserRejected,

    #[error("Wallet provider error: {0}")]
    Provider(String),
}

const USER_REJECTION_PHRASES: &[&str] = &[
    "user rejected",
    "user denied",
    "rejected by user",
    "action_rejected",
];

impl WalletError {
    /// Classify a provider failure into user cancellation vs everything else.
    ///
    /// Recognises EIP-1193 code 4001, the `ACTION_REJECTED` string code and
    /// the common "user rejected/denied" phrasings.
    pub fn classify(code: Option<&serde_json::Value>, message: &str) -> Self {
        let code_rejected = match code {
            Some(serde_json::Value::Number(n)) => n.as_i64() == Some(4001),
            Some(serde_json::Value::String(s)) => {
                s.eq_ignore_ascii_case("ACTION_REJECTED") || s.trim() == "4001"
            }
            _ => false,
        };
        let lowered = message.to_ascii_lowercase();
        if code_rejected
            || USER_REJECTION_PHRASES
                .iter()
                .any(|phrase| lowered.contains(phrase))
        {
            Self::UserRejected
        } else if message.trim().is_empty() {
            Self::Provider("unknown provider error".to_string())
        } else {
            Self::Provider(message.trim().to_string())
        }
    }
}

/// Tool execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    /// A failure from the explorer, RPC, store or wallet layer.
    #[error(transparent)]
    Backend(Box<Error>),
}

macro_rules! tool_backend_from {
    ($($source:ty),+ $(,)?) => {
        $(
            impl From<$source> for ToolError {
                fn from(err: $source) -> Self {
                    Self::Backend(Box::new(err.into()))
                }
            }
        )+
    };
}

tool_backend_from!(ExplorerError, StoreError, RpcError, WalletError, ConfigError);

impl Error {
    /// Map an error into the structured surface returned to tool callers.
    pub fn to_error_payload(&self) -> ErrorPayload {
        match self {
            Self::Config(err) => ErrorPayload::new(
                ErrorDomain::Config,
                "config.invalid",
                false,
                err.to_string(),
            ),
            Self::Store(err) => ErrorPayload::new(
                ErrorDomain::Storage,
                "storage.backend_failed",
                true,
                err.to_string(),
            ),
            Self::Explorer(err) => match err {
                ExplorerError::UnknownChain(_) => ErrorPayload::new(
                    ErrorDomain::Explorer,
                    "explorer.unknown_chain",
                    false,
                    err.to_string(),
                ),
                ExplorerError::Rejected { .. } => ErrorPayload::new(
                    ErrorDomain::Explorer,
                    "explorer.rejected",
                    false,
                    err.to_string(),
                ),
                ExplorerError::RateLimited { .. } => ErrorPayload::new(
                    ErrorDomain::Explorer,
                    "explorer.rate_limited",
                    true,
                    err.to_string(),
                ),
                ExplorerError::RequestFailed { .. }
                | ExplorerError::HttpStatus { .. }
                | ExplorerError::InvalidResponse { .. } => ErrorPayload::new(
                    ErrorDomain::Explorer,
                    "explorer.unreachable",
                    true,
                    err.to_string(),
                ),
            },
            Self::Rpc(err) => match err {
                RpcError::Decode { .. } => ErrorPayload::new(
                    ErrorDomain::Rpc,
                    "rpc.decode_failed",
                    false,
                    err.to_string(),
                ),
                RpcError::InvalidEndpoint { .. } => ErrorPayload::new(
                    ErrorDomain::Rpc,
                    "rpc.invalid_endpoint",
                    false,
                    err.to_string(),
                ),
                RpcError::InvalidAddress { .. } => ErrorPayload::new(
                    ErrorDomain::Rpc,
                    "rpc.invalid_address",
                    false,
                    err.to_string(),
                ),
                RpcError::RequestFailed { .. } | RpcError::Node { .. } => ErrorPayload::new(
                    ErrorDomain::Rpc,
                    "rpc.unreachable",
                    true,
                    err.to_string(),
                ),
            },
            Self::Wallet(err) => match err {
                WalletError::UserRejected => ErrorPayload::new(
                    ErrorDomain::Wallet,
                    "wallet.user_rejected",
                    false,
                    err.to_string(),
                ),
                WalletError::Provider(_) => ErrorPayload::new(
                    ErrorDomain::Wallet,
                    "wallet.provider_failed",
                    true,
                    err.to_string(),
                ),
            },
            Self::Tool(err) => match err {
                ToolError::NotFound { .. } => ErrorPayload::new(
                    ErrorDomain::Tool,
                    "tool.not_found",
                    false,
                    err.to_string(),
                ),
                ToolError::InvalidParameters(_) => ErrorPayload::new(
                    ErrorDomain::Tool,
                    "tool.invalid_parameters",
                    false,
                    err.to_string(),
                ),
                ToolError::ExecutionFailed(_) => ErrorPayload::new(
                    ErrorDomain::Tool,
                    "tool.execution_failed",
                    true,
                    err.to_string(),
                ),
                ToolError::Timeout { .. } => ErrorPayload::new(
                    ErrorDomain::Tool,
                    "tool.timeout",
                    true,
                    err.to_string(),
                ),
                ToolError::Backend(inner) => inner.to_error_payload(),
            },
        }
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_eip1193_user_rejection() {
        let code = serde_json::json!(4001);
        assert_eq!(
            WalletError::classify(Some(&code), "MetaMask Tx Signature: User denied"),
            WalletError::UserRejected
        );

        let code = serde_json::json!("ACTION_REJECTED");
        assert_eq!(
            WalletError::classify(Some(&code), "whatever"),
            WalletError::UserRejected
        );
    }

    #[test]
    fn classifies_rejection_phrasing_without_code() {
        assert_eq!(
            WalletError::classify(None, "Rejected by user"),
            WalletError::UserRejected
        );
    }

    #[test]
    fn other_provider_failures_stay_generic() {
        let code = serde_json::json!(-32603);
        assert_eq!(
            WalletError::classify(Some(&code), "insufficient funds for gas"),
            WalletError::Provider("insufficient funds for gas".to_string())
        );
    }

    #[test]
    fn user_rejection_payload_is_terminal() {
        let payload = Error::from(WalletError::UserRejected).to_error_payload();

        assert_eq!(payload.domain, ErrorDomain::Wallet);
        assert_eq!(payload.code, "wallet.user_rejected");
        assert!(!payload.retryable);
    }

    #[test]
    fn explorer_network_failures_are_retryable() {
        let err = Error::from(ExplorerError::RequestFailed {
            endpoint: "https://api-sepolia.etherscan.io/api".to_string(),
            reason: "connection reset".to_string(),
        });
        let payload = err.to_error_payload();

        assert_eq!(payload.code, "explorer.unreachable");
        assert!(payload.retryable);
    }

    #[test]
    fn tool_backend_errors_keep_their_domain() {
        let err = Error::from(ToolError::from(ExplorerError::UnknownChain(1)));
        let payload = err.to_error_payload();

        assert_eq!(payload.domain, ErrorDomain::Explorer);
        assert_eq!(payload.code, "explorer.unknown_chain");
    }

    #[test]
    fn transient_classification_excludes_rejections() {
        assert!(
            !ExplorerError::Rejected {
                action: "verifysourcecode".to_string(),
                message: "Invalid API Key".to_string(),
            }
            .is_transient()
        );
        assert!(
            ExplorerError::InvalidResponse {
                endpoint: "x".to_string(),
                reason: "expected value".to_string(),
            }
            .is_transient()
        );
    }
}
