//! Read-only contract calls over JSON-RPC.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use alloy::sol_types::SolCall;
use alloy::transports::http::Http;
use alloy::transports::{RpcError as TransportRpcError, TransportError};
use async_trait::async_trait;

use crate::chains::Chain;
use crate::error::RpcError;

type HttpProvider = RootProvider<Http<reqwest::Client>>;

alloy::sol! {
    interface IERC20Metadata {
        function name() external view returns (string);
        function symbol() external view returns (string);
    }
}

/// Minimal read surface needed to recover token metadata.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn name(&self, address: &str) -> Result<String, RpcError>;

    async fn symbol(&self, address: &str) -> Result<String, RpcError>;
}

/// Opens one read-only connection per chain.
pub trait ChainConnector: Send + Sync {
    fn connect(&self, chain: &Chain) -> Result<Arc<dyn ChainReader>, RpcError>;
}

/// [`ChainConnector`] using each chain's public RPC endpoint.
#[derive(Debug, Clone)]
pub struct HttpChainConnector {
    timeout: Duration,
    endpoint_override: Option<String>,
}

impl HttpChainConnector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            endpoint_override: None,
        }
    }

    /// Route every chain to one endpoint (local nodes, test servers).
    pub fn with_endpoint_override(mut self, url: impl Into<String>) -> Self {
        self.endpoint_override = Some(url.into());
        self
    }
}

impl ChainConnector for HttpChainConnector {
    fn connect(&self, chain: &Chain) -> Result<Arc<dyn ChainReader>, RpcError> {
        let url = self
            .endpoint_override
            .clone()
            .unwrap_or_else(|| chain.rpc_url.to_string());
        Ok(Arc::new(ProviderReader::new(url, self.timeout)?))
    }
}

/// Alloy HTTP provider bound to a single RPC endpoint.
pub struct ProviderReader {
    provider: HttpProvider,
    url: String,
    timeout: Duration,
}

impl ProviderReader {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let url = url.into();
        let parsed = url::Url::parse(&url).map_err(|e| RpcError::InvalidEndpoint {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            provider: ProviderBuilder::new().on_http(parsed),
            url,
            timeout,
        })
    }

    /// Chain id reported by the node, for reachability checks.
    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        tokio::time::timeout(self.timeout, self.provider.get_chain_id())
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| self.transport_error(e))
    }

    async fn call<C: SolCall>(
        &self,
        address: &str,
        call: C,
        label: &'static str,
    ) -> Result<C::Return, RpcError> {
        let to: Address = address.trim().parse().map_err(|e| RpcError::InvalidAddress {
            address: address.to_string(),
            reason: format!("{e}"),
        })?;
        let tx = TransactionRequest::default()
            .to(to)
            .input(TransactionInput::new(Bytes::from(call.abi_encode())));

        let raw = tokio::time::timeout(self.timeout, self.provider.call(&tx))
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| self.transport_error(e))?;

        C::abi_decode_returns(&raw, true).map_err(|e| RpcError::Decode {
            call: label,
            reason: e.to_string(),
        })
    }

    fn timed_out(&self) -> RpcError {
        RpcError::RequestFailed {
            url: self.url.clone(),
            reason: format!("timed out after {}ms", self.timeout.as_millis()),
        }
    }

    fn transport_error(&self, err: TransportError) -> RpcError {
        match err {
            TransportRpcError::ErrorResp(payload) => RpcError::Node {
                url: self.url.clone(),
                code: payload.code,
                message: payload.message.to_string(),
            },
            other => RpcError::RequestFailed {
                url: self.url.clone(),
                reason: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl ChainReader for ProviderReader {
    async fn name(&self, address: &str) -> Result<String, RpcError> {
        let decoded = self
            .call(address, IERC20Metadata::nameCall {}, "name()")
            .await?;
        Ok(decoded._0)
    }

    async fn symbol(&self, address: &str) -> Result<String, RpcError> {
        let decoded = self
            .call(address, IERC20Metadata::symbolCall {}, "symbol()")
            .await?;
        Ok(decoded._0)
    }
}
