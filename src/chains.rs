//! Static registry of supported networks.
//!
//! Explorer links are always derived from a chain id plus an address or
//! hash; they are never persisted as the source of truth.

use serde::Serialize;

use crate::error::ConfigError;

/// Chain id used when a caller omits one.
pub const DEFAULT_CHAIN_ID: u64 = 11_155_111;

/// Returned by the link helpers for an unregistered chain.
pub const UNKNOWN_CHAIN_LINK: &str = "#";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NativeCurrency {
    pub name: &'static str,
    pub symbol: &'static str,
    pub decimals: u8,
}

/// One supported network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    pub id: u64,
    pub name: &'static str,
    pub short_name: &'static str,
    pub rpc_url: &'static str,
    pub explorer_url: &'static str,
    pub explorer_api_url: &'static str,
    pub native_currency: NativeCurrency,
    pub testnet: bool,
}

const ETHER: NativeCurrency = NativeCurrency {
    name: "Ether",
    symbol: "ETH",
    decimals: 18,
};

/// Every network the studio knows about, in display order.
pub const SUPPORTED_CHAINS: &[Chain] = &[
    Chain {
        id: 84_532,
        name: "Base Sepolia",
        short_name: "Base",
        rpc_url: "https://sepolia.base.org",
        explorer_url: "https://sepolia.basescan.org",
        explorer_api_url: "https://api-sepolia.basescan.org/api",
        native_currency: ETHER,
        testnet: true,
    },
    Chain {
        id: 421_614,
        name: "Arbitrum Sepolia",
        short_name: "Arb",
        rpc_url: "https://sepolia-rollup.arbitrum.io/rpc",
        explorer_url: "https://sepolia.arbiscan.io",
        explorer_api_url: "https://api-sepolia.arbiscan.io/api",
        native_currency: ETHER,
        testnet: true,
    },
    Chain {
        id: 11_155_111,
        name: "Ethereum Sepolia",
        short_name: "ETH",
        rpc_url: "https://rpc.sepolia.org",
        explorer_url: "https://sepolia.etherscan.io",
        explorer_api_url: "https://api-sepolia.etherscan.io/api",
        native_currency: ETHER,
        testnet: true,
    },
];

/// Look up a registered chain by id.
pub fn chain_by_id(chain_id: u64) -> Option<&'static Chain> {
    SUPPORTED_CHAINS.iter().find(|chain| chain.id == chain_id)
}

/// Display name for a chain id, falling back to `Chain <id>`.
pub fn chain_name(chain_id: u64) -> String {
    chain_by_id(chain_id)
        .map(|chain| chain.name.to_string())
        .unwrap_or_else(|| format!("Chain {chain_id}"))
}

pub fn explorer_tx_url(chain_id: u64, tx_hash: &str) -> String {
    match chain_by_id(chain_id) {
        Some(chain) => format!("{}/tx/{}", chain.explorer_url, tx_hash),
        None => UNKNOWN_CHAIN_LINK.to_string(),
    }
}

pub fn explorer_address_url(chain_id: u64, address: &str) -> String {
    match chain_by_id(chain_id) {
        Some(chain) => format!("{}/address/{}", chain.explorer_url, address),
        None => UNKNOWN_CHAIN_LINK.to_string(),
    }
}

/// Parse a comma-separated chain selection (`84532,base_sepolia,...`).
///
/// Accepts numeric ids, display names and short names, case-insensitively.
/// Duplicates are dropped; order follows the input.
pub fn parse_chain_selection(raw: &str, key: &str) -> Result<Vec<&'static Chain>, ConfigError> {
    let mut selected: Vec<&'static Chain> = Vec::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let chain = resolve_chain_token(token).ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("unknown chain '{token}'"),
        })?;
        if !selected.iter().any(|c| c.id == chain.id) {
            selected.push(chain);
        }
    }
    if selected.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must name at least one chain".to_string(),
        });
    }
    Ok(selected)
}

fn resolve_chain_token(token: &str) -> Option<&'static Chain> {
    if let Ok(id) = token.parse::<u64>() {
        return chain_by_id(id);
    }
    let wanted = token.to_ascii_lowercase().replace(['-', ' '], "_");
    SUPPORTED_CHAINS.iter().find(|chain| {
        chain.name.to_ascii_lowercase().replace(' ', "_") == wanted
            || chain.short_name.eq_ignore_ascii_case(&wanted)
    })
}
