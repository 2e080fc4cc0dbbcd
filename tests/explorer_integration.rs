//! End-to-end tests against a mock Etherscan-compatible explorer.
//!
//! A real Axum server on a random port stands in for both the explorer API
//! (`/api`) and a chain RPC node (`/rpc`), so discovery, hydration and
//! verification run over real HTTP through the production clients.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{U256, hex};
use alloy::sol_types::SolValue;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use contract_studio::chains::{self, Chain};
use contract_studio::config::{ExplorerConfig, SourceConfig, VerificationConfig};
use contract_studio::explorer::{EtherscanClient, ExplorerApi};
use contract_studio::records::VerificationStatus;
use contract_studio::rpc::{ChainConnector, HttpChainConnector};
use contract_studio::store::RecordStore;
use contract_studio::studio::{ListingSource, Studio};
use contract_studio::tools::{ToolContext, default_registry};
use contract_studio::verification::{
    CancellationFlag, SourceProvider, StaticSourceProvider,
};

const WALLET: &str = "0x52908400098527886E0F7030069857D2E4169EE7";
const TOKEN: &str = "0x1111111111111111111111111111111111111111";
const UNNAMED: &str = "0x2222222222222222222222222222222222222222";
const REVERTED: &str = "0x3333333333333333333333333333333333333333";
const TOKEN_TX: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const UNNAMED_TX: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const BYTECODE: &str = "608060405234801561001057600080fd5b50";
const BASE_SEPOLIA: u64 = 84_532;
const TIMEOUT: Duration = Duration::from_secs(5);

fn is_bind_permission_error<E: std::fmt::Display>(err: &E) -> bool {
    err.to_string().contains("Operation not permitted")
        || err.to_string().contains("failed to bind")
}

fn token_constructor_args() -> String {
    let encoded = ("GLX Token".to_string(), "GLX".to_string(), U256::from(1_000_000u64))
        .abi_encode_params();
    hex::encode(encoded)
}

#[derive(Default)]
struct MockExplorer {
    submissions: Mutex<Vec<HashMap<String, String>>>,
    status_checks: AtomicUsize,
}

fn tx(hash: &str, to: &str, contract: &str, input: &str, ts: u64, is_error: &str) -> Value {
    let receipt_status = if is_error == "1" { "0" } else { "1" };
    json!({
        "hash": hash,
        "from": WALLET.to_ascii_lowercase(),
        "to": to,
        "contractAddress": contract,
        "input": input,
        "blockNumber": (ts / 10).to_string(),
        "timeStamp": ts.to_string(),
        "isError": is_error,
        "txreceipt_status": receipt_status,
    })
}

fn token_deploy_input() -> String {
    format!("0x{BYTECODE}{}", token_constructor_args())
}

async fn explorer_get(
    State(state): State<Arc<MockExplorer>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let action = query.get("action").map(String::as_str).unwrap_or_default();
    let body = match action {
        "txlist" => json!({
            "status": "1",
            "message": "OK",
            "result": [
                tx(TOKEN_TX, "", TOKEN, &token_deploy_input(), 1_700_000_200, "0"),
                tx("0xcc", TOKEN, "", "0xa9059cbb", 1_700_000_150, "0"),
                tx(UNNAMED_TX, "", UNNAMED, &format!("0x{BYTECODE}"), 1_700_000_100, "0"),
                tx("0xdd", "", REVERTED, &format!("0x{BYTECODE}"), 1_700_000_050, "1"),
            ]
        }),
        "tokeninfo" => json!({"status": "0", "message": "NOTOK", "result": "Token info unavailable"}),
        "eth_getTransactionByHash" => {
            let input = if query.get("txhash").map(String::as_str) == Some(TOKEN_TX) {
                token_deploy_input()
            } else {
                format!("0x{BYTECODE}")
            };
            json!({"jsonrpc": "2.0", "id": 1, "result": {"hash": query.get("txhash"), "input": input}})
        }
        "checkverifystatus" => {
            if state.status_checks.fetch_add(1, Ordering::SeqCst) == 0 {
                json!({"status": "0", "message": "NOTOK", "result": "Pending in queue"})
            } else {
                json!({"status": "1", "message": "OK", "result": "Pass - Verified"})
            }
        }
        "getsourcecode" => json!({
            "status": "1",
            "message": "OK",
            "result": [{"SourceCode": "", "ABI": "Contract source code not verified"}]
        }),
        _ => json!({"status": "0", "message": "NOTOK", "result": format!("unknown action {action}")}),
    };
    Json(body)
}

async fn explorer_post(
    State(state): State<Arc<MockExplorer>>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    let address = form.get("contractaddress").cloned().unwrap_or_default();
    if let Ok(mut submissions) = state.submissions.lock() {
        submissions.push(form);
    }
    if address.eq_ignore_ascii_case(UNNAMED) {
        Json(json!({"status": "0", "message": "NOTOK", "result": "Contract source code already verified"}))
    } else {
        Json(json!({"status": "1", "message": "OK", "result": "abc123"}))
    }
}

async fn rpc(Json(request): Json<Value>) -> Json<Value> {
    let call = &request["params"][0];
    let data = call["input"]
        .as_str()
        .or_else(|| call["data"].as_str())
        .unwrap_or_default();
    let encoded = if data.starts_with("0x06fdde03") {
        ("Hydrated Token".to_string(),).abi_encode_params()
    } else if data.starts_with("0x95d89b41") {
        ("HYD".to_string(),).abi_encode_params()
    } else {
        return Json(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": -32601, "message": "method not found"}
        }));
    };
    Json(json!({
        "jsonrpc": "2.0",
        "id": request["id"],
        "result": format!("0x{}", hex::encode(encoded)),
    }))
}

async fn start_mock() -> Option<(SocketAddr, Arc<MockExplorer>)> {
    let state = Arc::new(MockExplorer::default());
    let app = Router::new()
        .route("/api", get(explorer_get).post(explorer_post))
        .route("/rpc", post(rpc))
        .with_state(Arc::clone(&state));

    let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(e) if is_bind_permission_error(&e) => return None,
        Err(e) => panic!("Failed to bind mock explorer: {e}"),
    };
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Some((addr, state))
}

struct Harness {
    studio: Arc<Studio>,
    client: Arc<EtherscanClient>,
    mock: Arc<MockExplorer>,
}

async fn harness() -> Option<Harness> {
    let (addr, mock) = start_mock().await?;
    let base_sepolia: &'static Chain = chains::chain_by_id(BASE_SEPOLIA).unwrap();

    let explorer_config = ExplorerConfig {
        api_base_url: Some(format!("http://{addr}/api")),
        http_timeout: TIMEOUT,
        chains: vec![base_sepolia],
        ..ExplorerConfig::default()
    };
    let client = Arc::new(EtherscanClient::new(&explorer_config).unwrap());
    let connector: Arc<dyn ChainConnector> = Arc::new(
        HttpChainConnector::new(TIMEOUT).with_endpoint_override(format!("http://{addr}/rpc")),
    );
    let source: Arc<dyn SourceProvider> = Arc::new(StaticSourceProvider::new(
        "contract DeployableToken {}",
        &SourceConfig::default(),
    ));
    let verification = VerificationConfig {
        sweep_spacing: Duration::from_millis(10),
        poll_spacing: Duration::from_millis(10),
        poll_interval: Duration::from_millis(50),
        poll_initial_delay: Duration::from_millis(10),
        ..VerificationConfig::default()
    };

    let studio = Arc::new(Studio::new(
        Arc::new(RecordStore::in_memory(50)),
        Arc::clone(&client) as Arc<dyn ExplorerApi>,
        connector,
        Some(source),
        vec![base_sepolia],
        verification,
    ));
    Some(Harness {
        studio,
        client,
        mock,
    })
}

async fn wait_for_name(studio: &Studio, address: &str, expected: &str) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let records = studio.store().load_deployments().await.unwrap();
        if records
            .iter()
            .any(|r| r.contract_address == address && r.contract_name == expected)
        {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{address} never hydrated to {expected}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn discovery_hydration_and_cache() {
    let Some(h) = harness().await else {
        return;
    };

    let listing = h.studio.deployments(WALLET).await.unwrap();
    assert_eq!(listing.source, ListingSource::Discovery);
    assert!(listing.failures.is_empty());

    let found: Vec<(&str, &str, &str)> = listing
        .deployments
        .iter()
        .map(|view| {
            (
                view.record.contract_address.as_str(),
                view.record.contract_name.as_str(),
                view.record.symbol.as_str(),
            )
        })
        .collect();
    assert_eq!(
        found,
        vec![
            (TOKEN, "GLX Token", "GLX"),
            (UNNAMED, "Unknown Contract", "???"),
        ]
    );
    assert_eq!(listing.deployments[0].record.chain_name, "Base Sepolia");
    assert_eq!(listing.deployments[0].record.block_number, 170_000_020);
    assert_eq!(listing.deployments[0].record.timestamp, 1_700_000_200_000);
    assert!(listing.deployments[0]
        .explorer_contract_url
        .ends_with(&format!("/address/{TOKEN}")));

    wait_for_name(&h.studio, UNNAMED, "Hydrated Token").await;

    let cached = h.studio.deployments(WALLET).await.unwrap();
    assert_eq!(cached.source, ListingSource::Cache);
    assert_eq!(cached.deployments[1].record.symbol, "HYD");
    assert_eq!(cached.deployments[0].record.contract_name, "GLX Token");
}

#[tokio::test]
async fn submit_poll_and_already_verified() {
    let Some(h) = harness().await else {
        return;
    };
    h.studio.resync(WALLET).await.unwrap();
    let engine = h.studio.verification();

    // Accepted job goes pending with the explorer's guid.
    let pending = engine.submit(TOKEN).await.unwrap();
    assert_eq!(pending.status, VerificationStatus::Pending);
    assert_eq!(pending.guid.as_deref(), Some("abc123"));
    assert_eq!(pending.attempts, 1);

    {
        let submissions = h.mock.submissions.lock().unwrap();
        let form = &submissions[0];
        assert_eq!(form["module"], "contract");
        assert_eq!(form["action"], "verifysourcecode");
        assert_eq!(form["contractname"], "DeployableToken");
        assert_eq!(form["compilerversion"], "v0.8.20+commit.a1b79de6");
        assert_eq!(form["optimizationUsed"], "0");
        assert_eq!(form["licenseType"], "2");
        assert_eq!(form["constructorArguements"], token_constructor_args());
        assert_eq!(form["chainid"], BASE_SEPOLIA.to_string());
    }

    let cancel = CancellationFlag::new();
    let first = engine.poll_pending_cycle(&cancel).await;
    assert_eq!((first.checked, first.still_pending), (1, 1));
    assert_eq!(engine.status(TOKEN).await.unwrap().status, VerificationStatus::Pending);

    let second = engine.poll_pending_cycle(&cancel).await;
    assert_eq!((second.checked, second.verified), (1, 1));
    let verified = engine.status(TOKEN).await.unwrap();
    assert_eq!(verified.status, VerificationStatus::Verified);
    assert_eq!(verified.message, "Pass - Verified");
    assert_eq!(verified.guid, None);
    assert_eq!(verified.last_guid.as_deref(), Some("abc123"));

    // An "already verified" rejection counts as success.
    let already = engine.submit(UNNAMED).await.unwrap();
    assert_eq!(already.status, VerificationStatus::Verified);
    assert_eq!(already.message, "Already Verified ✓");

    let stats = h.studio.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.verified, 2);
    assert_eq!(h.mock.submissions.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn tool_surface_over_http() {
    let Some(h) = harness().await else {
        return;
    };
    let registry = default_registry(Arc::clone(&h.studio), Arc::clone(&h.client));
    let ctx = ToolContext {
        default_chain_id: BASE_SEPOLIA,
        ..ToolContext::default()
    };

    let names: Vec<String> = registry.catalog().into_iter().map(|d| d.name).collect();
    assert_eq!(names.len(), 13);
    assert!(names.contains(&"list_deployments".to_string()));
    assert!(names.contains(&"get_contract_info".to_string()));

    let resync = registry
        .call_structured("resync_deployments", json!({"walletAddress": WALLET}), &ctx)
        .await;
    let resync = serde_json::to_value(&resync).unwrap();
    assert_eq!(resync["ok"], true);
    assert_eq!(resync["result"]["added"], 2);

    let info = registry
        .call_structured("get_contract_info", json!({"address": TOKEN}), &ctx)
        .await;
    let info = serde_json::to_value(&info).unwrap();
    assert_eq!(info["ok"], true);
    assert_eq!(info["result"]["verified"], false);

    let refused = registry
        .call_structured("verify_contract", json!({"address": REVERTED}), &ctx)
        .await;
    let refused = serde_json::to_value(&refused).unwrap();
    assert_eq!(refused["result"]["submitted"], false);
    assert_eq!(refused["result"]["refusal"]["code"], "unknown_deployment");
    assert!(h.mock.submissions.lock().unwrap().is_empty());
}
