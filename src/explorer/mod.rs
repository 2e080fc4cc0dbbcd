//! Etherscan-compatible block-explorer client.
//!
//! Every request carries `chainid`, so the same client talks to per-chain
//! API hosts and to multichain gateways selected via `EXPLORER_API_BASE_URL`.

mod types;

use alloy::primitives::U256;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::chains::{self, Chain};
use crate::config::ExplorerConfig;
use crate::error::ExplorerError;

use self::types::Envelope;
pub use self::types::{
    AccountBalance, ContractInfo, GasOracle, ReceiptStatus, SubmitResponse, TokenMetadata,
    TxListEntry, VerificationCheck, VerificationSubmission,
};

/// Explorer operations used by discovery and verification.
#[async_trait]
pub trait ExplorerApi: Send + Sync {
    /// Wallet transactions, newest first. An empty history is not an error.
    async fn transaction_history(
        &self,
        chain_id: u64,
        wallet: &str,
    ) -> Result<Vec<TxListEntry>, ExplorerError>;

    async fn token_metadata(
        &self,
        chain_id: u64,
        address: &str,
    ) -> Result<Option<TokenMetadata>, ExplorerError>;

    /// Raw calldata of a transaction, if the explorer knows it.
    async fn transaction_input(
        &self,
        chain_id: u64,
        tx_hash: &str,
    ) -> Result<Option<String>, ExplorerError>;

    async fn submit_verification(
        &self,
        chain_id: u64,
        submission: &VerificationSubmission,
    ) -> Result<SubmitResponse, ExplorerError>;

    async fn check_verification_status(
        &self,
        chain_id: u64,
        guid: &str,
    ) -> Result<VerificationCheck, ExplorerError>;

    async fn is_verified(&self, chain_id: u64, address: &str) -> Result<bool, ExplorerError>;
}

/// True when an explorer message says the source is already verified.
pub fn mentions_already_verified(text: &str) -> bool {
    text.to_ascii_lowercase().contains("already verified")
}

fn mentions_rate_limit(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    lowered.contains("rate limit") || lowered.contains("too many requests")
}

/// Reqwest-backed [`ExplorerApi`] for Etherscan-style APIs.
pub struct EtherscanClient {
    http: reqwest::Client,
    api_key: Option<SecretString>,
    base_url_override: Option<String>,
    txlist_page_size: u32,
}

impl EtherscanClient {
    pub fn new(config: &ExplorerConfig) -> Result<Self, ExplorerError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| ExplorerError::RequestFailed {
                endpoint: "client".to_string(),
                reason: format!("cannot construct HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url_override: config.api_base_url.clone(),
            txlist_page_size: config.txlist_page_size,
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// API endpoint used for a chain.
    pub fn endpoint_for(&self, chain_id: u64) -> Result<String, ExplorerError> {
        if let Some(base) = &self.base_url_override {
            return Ok(base.clone());
        }
        chains::chain_by_id(chain_id)
            .map(|chain| chain.explorer_api_url.to_string())
            .ok_or(ExplorerError::UnknownChain(chain_id))
    }

    fn query_params(&self, chain_id: u64, params: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut query: Vec<(String, String)> = vec![("chainid".to_string(), chain_id.to_string())];
        query.extend(params.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        if let Some(key) = &self.api_key {
            query.push(("apikey".to_string(), key.expose_secret().to_string()));
        }
        query
    }

    async fn get_json(
        &self,
        chain_id: u64,
        params: &[(&str, &str)],
    ) -> Result<Value, ExplorerError> {
        let endpoint = self.endpoint_for(chain_id)?;
        let query = self.query_params(chain_id, params);
        tracing::debug!(chain_id, endpoint = %endpoint, action = action_of(params), "Explorer GET");
        let response = self
            .http
            .get(&endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|e| transport_error(&endpoint, &e))?;
        read_json(&endpoint, action_of(params), response).await
    }

    async fn post_form(
        &self,
        chain_id: u64,
        form: &[(&str, &str)],
    ) -> Result<Value, ExplorerError> {
        let endpoint = self.endpoint_for(chain_id)?;
        let body = self.query_params(chain_id, form);
        tracing::debug!(chain_id, endpoint = %endpoint, action = action_of(form), "Explorer POST");
        let response = self
            .http
            .post(&endpoint)
            .form(&body)
            .send()
            .await
            .map_err(|e| transport_error(&endpoint, &e))?;
        read_json(&endpoint, action_of(form), response).await
    }

    async fn get_envelope(
        &self,
        chain_id: u64,
        params: &[(&str, &str)],
    ) -> Result<Envelope, ExplorerError> {
        let action = action_of(params);
        let value = self.get_json(chain_id, params).await?;
        parse_envelope(action, value)
    }

    /// Verification and compiler details for a contract.
    pub async fn contract_info(
        &self,
        chain_id: u64,
        address: &str,
    ) -> Result<ContractInfo, ExplorerError> {
        let envelope = self
            .get_envelope(
                chain_id,
                &[
                    ("module", "contract"),
                    ("action", "getsourcecode"),
                    ("address", address),
                ],
            )
            .await?;
        if !envelope.is_ok() {
            return Err(rejection("getsourcecode", &envelope));
        }
        Ok(ContractInfo::from_result(chain_id, address, &envelope.result))
    }

    pub async fn gas_oracle(&self, chain_id: u64) -> Result<GasOracle, ExplorerError> {
        let envelope = self
            .get_envelope(chain_id, &[("module", "gastracker"), ("action", "gasoracle")])
            .await?;
        if !envelope.is_ok() {
            return Err(rejection("gasoracle", &envelope));
        }
        let field = |key: &str| {
            envelope
                .result
                .get(key)
                .and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .unwrap_or_else(|| "unknown".to_string())
        };
        Ok(GasOracle {
            chain_id,
            low: field("SafeGasPrice"),
            average: field("ProposeGasPrice"),
            high: field("FastGasPrice"),
        })
    }

    pub async fn receipt_status(
        &self,
        chain_id: u64,
        tx_hash: &str,
    ) -> Result<ReceiptStatus, ExplorerError> {
        let envelope = self
            .get_envelope(
                chain_id,
                &[
                    ("module", "transaction"),
                    ("action", "gettxreceiptstatus"),
                    ("txhash", tx_hash),
                ],
            )
            .await?;
        if !envelope.is_ok() {
            return Err(rejection("gettxreceiptstatus", &envelope));
        }
        Ok(
            match envelope.result.get("status").and_then(Value::as_str) {
                Some("1") => ReceiptStatus::Success,
                Some("0") => ReceiptStatus::Failed,
                _ => ReceiptStatus::Unknown,
            },
        )
    }

    pub async fn native_balance(
        &self,
        chain_id: u64,
        address: &str,
    ) -> Result<AccountBalance, ExplorerError> {
        let envelope = self
            .get_envelope(
                chain_id,
                &[
                    ("module", "account"),
                    ("action", "balance"),
                    ("address", address),
                    ("tag", "latest"),
                ],
            )
            .await?;
        if !envelope.is_ok() {
            return Err(rejection("balance", &envelope));
        }
        let wei = envelope.result_text();
        let balance = format_native_units(&wei, 6).ok_or_else(|| ExplorerError::InvalidResponse {
            endpoint: "balance".to_string(),
            reason: format!("balance '{wei}' is not a decimal integer"),
        })?;
        let symbol = chains::chain_by_id(chain_id)
            .map(|chain: &Chain| chain.native_currency.symbol)
            .unwrap_or("ETH")
            .to_string();
        Ok(AccountBalance {
            address: address.to_string(),
            chain_id,
            wei,
            balance,
            symbol,
        })
    }
}

#[async_trait]
impl ExplorerApi for EtherscanClient {
    async fn transaction_history(
        &self,
        chain_id: u64,
        wallet: &str,
    ) -> Result<Vec<TxListEntry>, ExplorerError> {
        let page_size = self.txlist_page_size.to_string();
        let envelope = self
            .get_envelope(
                chain_id,
                &[
                    ("module", "account"),
                    ("action", "txlist"),
                    ("address", wallet),
                    ("startblock", "0"),
                    ("endblock", "99999999"),
                    ("page", "1"),
                    ("offset", page_size.as_str()),
                    ("sort", "desc"),
                ],
            )
            .await?;
        parse_txlist(envelope)
    }

    async fn token_metadata(
        &self,
        chain_id: u64,
        address: &str,
    ) -> Result<Option<TokenMetadata>, ExplorerError> {
        let envelope = self
            .get_envelope(
                chain_id,
                &[
                    ("module", "token"),
                    ("action", "tokeninfo"),
                    ("contractaddress", address),
                ],
            )
            .await?;
        if !envelope.is_ok() {
            // Token info is unavailable on many plans and for non-token contracts.
            tracing::debug!(chain_id, address, message = %envelope.result_text(), "tokeninfo unavailable");
            return Ok(None);
        }
        Ok(TokenMetadata::from_result(&envelope.result))
    }

    async fn transaction_input(
        &self,
        chain_id: u64,
        tx_hash: &str,
    ) -> Result<Option<String>, ExplorerError> {
        let value = self
            .get_json(
                chain_id,
                &[
                    ("module", "proxy"),
                    ("action", "eth_getTransactionByHash"),
                    ("txhash", tx_hash),
                ],
            )
            .await?;
        parse_proxy_input(value)
    }

    async fn submit_verification(
        &self,
        chain_id: u64,
        submission: &VerificationSubmission,
    ) -> Result<SubmitResponse, ExplorerError> {
        let optimization = if submission.optimization_used { "1" } else { "0" };
        let runs = submission.runs.to_string();
        let license = submission.license_type.to_string();
        let value = self
            .post_form(
                chain_id,
                &[
                    ("module", "contract"),
                    ("action", "verifysourcecode"),
                    ("contractaddress", submission.contract_address.as_str()),
                    ("sourceCode", submission.source_code.as_str()),
                    ("codeformat", "solidity-single-file"),
                    ("contractname", submission.contract_name.as_str()),
                    ("compilerversion", submission.compiler_version.as_str()),
                    ("optimizationUsed", optimization),
                    ("runs", runs.as_str()),
                    // Field name is misspelled in the explorer API.
                    ("constructorArguements", submission.constructor_arguments.as_str()),
                    ("licenseType", license.as_str()),
                ],
            )
            .await?;
        let envelope = parse_envelope("verifysourcecode", value)?;
        Ok(interpret_submission(&envelope))
    }

    async fn check_verification_status(
        &self,
        chain_id: u64,
        guid: &str,
    ) -> Result<VerificationCheck, ExplorerError> {
        let envelope = self
            .get_envelope(
                chain_id,
                &[
                    ("module", "contract"),
                    ("action", "checkverifystatus"),
                    ("guid", guid),
                ],
            )
            .await?;
        Ok(interpret_verification_status(&envelope))
    }

    async fn is_verified(&self, chain_id: u64, address: &str) -> Result<bool, ExplorerError> {
        Ok(self.contract_info(chain_id, address).await?.verified)
    }
}

fn action_of<'a>(params: &[(&str, &'a str)]) -> &'a str {
    params
        .iter()
        .find(|(k, _)| *k == "action")
        .map(|(_, v)| *v)
        .unwrap_or("request")
}

fn transport_error(endpoint: &str, error: &reqwest::Error) -> ExplorerError {
    let reason = if error.is_timeout() {
        format!("timed out: {error}")
    } else {
        error.to_string()
    };
    ExplorerError::RequestFailed {
        endpoint: endpoint.to_string(),
        reason,
    }
}

async fn read_json(
    endpoint: &str,
    action: &str,
    response: reqwest::Response,
) -> Result<Value, ExplorerError> {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ExplorerError::RateLimited {
            action: action.to_string(),
        });
    }
    if !status.is_success() {
        return Err(ExplorerError::HttpStatus {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        });
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| ExplorerError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
}

fn parse_envelope(action: &str, value: Value) -> Result<Envelope, ExplorerError> {
    let envelope: Envelope =
        serde_json::from_value(value).map_err(|e| ExplorerError::InvalidResponse {
            endpoint: action.to_string(),
            reason: e.to_string(),
        })?;
    if !envelope.is_ok() && mentions_rate_limit(&envelope.result_text()) {
        return Err(ExplorerError::RateLimited {
            action: action.to_string(),
        });
    }
    Ok(envelope)
}

fn rejection(action: &str, envelope: &Envelope) -> ExplorerError {
    ExplorerError::Rejected {
        action: action.to_string(),
        message: envelope.result_text(),
    }
}

fn parse_txlist(envelope: Envelope) -> Result<Vec<TxListEntry>, ExplorerError> {
    match &envelope.result {
        Value::Array(_) => serde_json::from_value(envelope.result.clone()).map_err(|e| {
            ExplorerError::InvalidResponse {
                endpoint: "txlist".to_string(),
                reason: e.to_string(),
            }
        }),
        _ if !envelope.is_ok()
            && envelope
                .message
                .to_ascii_lowercase()
                .contains("no transactions found") =>
        {
            Ok(Vec::new())
        }
        _ => Err(rejection("txlist", &envelope)),
    }
}

fn parse_proxy_input(value: Value) -> Result<Option<String>, ExplorerError> {
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("proxy error")
            .to_string();
        return Err(ExplorerError::Rejected {
            action: "eth_getTransactionByHash".to_string(),
            message,
        });
    }
    match value.get("result") {
        Some(Value::Object(tx)) => Ok(tx
            .get("input")
            .and_then(Value::as_str)
            .filter(|input| !input.is_empty() && *input != "0x")
            .map(str::to_string)),
        Some(Value::Null) | None => Ok(None),
        Some(other) => {
            let text = other.as_str().unwrap_or_default();
            if mentions_rate_limit(text) {
                Err(ExplorerError::RateLimited {
                    action: "eth_getTransactionByHash".to_string(),
                })
            } else {
                Err(ExplorerError::Rejected {
                    action: "eth_getTransactionByHash".to_string(),
                    message: text.to_string(),
                })
            }
        }
    }
}

fn interpret_submission(envelope: &Envelope) -> SubmitResponse {
    let text = envelope.result_text();
    if mentions_already_verified(&text) || mentions_already_verified(&envelope.message) {
        return SubmitResponse::AlreadyVerified { message: text };
    }
    if envelope.is_ok() && !text.trim().is_empty() {
        return SubmitResponse::Accepted {
            guid: text.trim().to_string(),
        };
    }
    let message = if text.trim().is_empty() {
        "Submission failed".to_string()
    } else {
        text
    };
    SubmitResponse::Rejected { message }
}

fn interpret_verification_status(envelope: &Envelope) -> VerificationCheck {
    let text = envelope.result_text();
    let lowered = text.to_ascii_lowercase();
    if lowered.contains("pass") || lowered.contains("already verified") {
        VerificationCheck::Verified { message: text }
    } else if lowered.contains("pending") || lowered.contains("in queue") {
        VerificationCheck::Pending { message: text }
    } else if envelope.is_ok() {
        VerificationCheck::Verified { message: text }
    } else {
        VerificationCheck::Failed { message: text }
    }
}

/// Format a wei amount as native units rounded to `decimals` places.
fn format_native_units(wei: &str, decimals: u32) -> Option<String> {
    let wei = U256::from_str_radix(wei.trim(), 10).ok()?;
    let unit = U256::from(10u64).pow(U256::from(18 - decimals));
    let half = unit / U256::from(2u64);
    let scaled = (wei + half) / unit;
    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let whole = scaled / divisor;
    let frac = scaled % divisor;
    Some(format!(
        "{whole}.{frac:0>width$}",
        frac = frac.to_string(),
        width = decimals as usize
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn envelope(value: Value) -> Envelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn already_verified_submission_is_success() {
        let response = interpret_submission(&envelope(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Already Verified"
        })));
        assert_eq!(
            response,
            SubmitResponse::AlreadyVerified {
                message: "Already Verified".to_string()
            }
        );
    }

    #[test]
    fn accepted_submission_carries_guid() {
        let response = interpret_submission(&envelope(json!({
            "status": "1",
            "message": "OK",
            "result": "abc123"
        })));
        assert_eq!(
            response,
            SubmitResponse::Accepted {
                guid: "abc123".to_string()
            }
        );
    }

    #[test]
    fn other_submission_failures_are_rejections() {
        let response = interpret_submission(&envelope(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Fail - Unable to verify"
        })));
        assert_eq!(
            response,
            SubmitResponse::Rejected {
                message: "Fail - Unable to verify".to_string()
            }
        );
    }

    #[test]
    fn verification_status_mapping() {
        let check = |status: &str, result: &str| {
            interpret_verification_status(&envelope(json!({"status": status, "result": result})))
        };
        assert!(matches!(check("0", "Pending in queue"), VerificationCheck::Pending { .. }));
        assert!(matches!(check("1", "Pass - Verified"), VerificationCheck::Verified { .. }));
        assert!(matches!(check("0", "Already Verified"), VerificationCheck::Verified { .. }));
        assert_eq!(
            check("0", "Fail - Unable to verify"),
            VerificationCheck::Failed {
                message: "Fail - Unable to verify".to_string()
            }
        );
    }

    #[test]
    fn empty_history_is_not_an_error() {
        let entries = parse_txlist(envelope(json!({
            "status": "0",
            "message": "No transactions found",
            "result": []
        })))
        .unwrap();
        assert!(entries.is_empty());

        let entries = parse_txlist(envelope(json!({
            "status": "0",
            "message": "No transactions found",
            "result": "No transactions found"
        })))
        .unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn txlist_string_result_is_rejection() {
        let err = parse_txlist(envelope(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Invalid API Key"
        })))
        .unwrap_err();
        assert!(matches!(err, ExplorerError::Rejected { .. }));
    }

    #[test]
    fn rate_limit_replies_are_transient() {
        let err = parse_envelope(
            "txlist",
            json!({"status": "0", "message": "NOTOK", "result": "Max rate limit reached"}),
        )
        .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn proxy_input_handles_missing_transactions() {
        assert_eq!(
            parse_proxy_input(json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap(),
            None
        );
        assert_eq!(
            parse_proxy_input(json!({"result": {"input": "0x6080"}})).unwrap(),
            Some("0x6080".to_string())
        );
    }

    #[test]
    fn native_units_round_to_six_places() {
        assert_eq!(
            format_native_units("1234567890123456789", 6).as_deref(),
            Some("1.234568")
        );
        assert_eq!(format_native_units("0", 6).as_deref(), Some("0.000000"));
        assert_eq!(format_native_units("abc", 6), None);
    }

    #[test]
    fn override_endpoint_applies_to_every_chain() {
        let config = ExplorerConfig {
            api_base_url: Some("http://127.0.0.1:9/api".to_string()),
            ..ExplorerConfig::default()
        };
        let client = EtherscanClient::new(&config).unwrap();
        assert_eq!(client.endpoint_for(84_532).unwrap(), "http://127.0.0.1:9/api");
        assert_eq!(client.endpoint_for(1).unwrap(), "http://127.0.0.1:9/api");

        let client = EtherscanClient::new(&ExplorerConfig::default()).unwrap();
        assert!(matches!(
            client.endpoint_for(1),
            Err(ExplorerError::UnknownChain(1))
        ));
    }
}
