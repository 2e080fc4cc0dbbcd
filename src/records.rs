//! Deployment and verification records.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chains;

/// Name shown until a contract's real name is resolved.
pub const UNKNOWN_CONTRACT_NAME: &str = "Unknown Contract";
/// Symbol shown until a contract's real symbol is resolved.
pub const UNKNOWN_SYMBOL: &str = "???";

static ADDRESS_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").ok());

/// Addresses are compared case-insensitively; display case is kept on the record.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// `0x` followed by 40 hex digits, any case.
pub fn is_valid_address(address: &str) -> bool {
    ADDRESS_RE
        .as_ref()
        .is_some_and(|re| re.is_match(address.trim()))
}

fn is_placeholder_name(name: &str) -> bool {
    let trimmed = name.trim();
    trimmed.is_empty() || trimmed == UNKNOWN_CONTRACT_NAME
}

fn is_placeholder_symbol(symbol: &str) -> bool {
    let trimmed = symbol.trim();
    trimmed.is_empty() || trimmed == UNKNOWN_SYMBOL
}

/// A contract deployed by the operator's wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub contract_address: String,
    #[serde(default = "default_contract_name")]
    pub contract_name: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    pub chain_id: u64,
    #[serde(default)]
    pub chain_name: String,
    #[serde(default)]
    pub tx_hash: String,
    #[serde(default)]
    pub block_number: u64,
    /// Creation block time in milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub features: Vec<String>,
}

fn default_contract_name() -> String {
    UNKNOWN_CONTRACT_NAME.to_string()
}

fn default_symbol() -> String {
    UNKNOWN_SYMBOL.to_string()
}

impl DeploymentRecord {
    /// Record reconstructed from history, carrying placeholders until resolved.
    pub fn discovered(
        contract_address: impl Into<String>,
        chain_id: u64,
        tx_hash: impl Into<String>,
        block_number: u64,
        timestamp: i64,
    ) -> Self {
        Self {
            contract_address: contract_address.into(),
            contract_name: default_contract_name(),
            symbol: default_symbol(),
            chain_id,
            chain_name: chains::chain_name(chain_id),
            tx_hash: tx_hash.into(),
            block_number,
            timestamp,
            features: Vec::new(),
        }
    }

    pub fn normalized_address(&self) -> String {
        normalize_address(&self.contract_address)
    }

    /// Still waiting for a name from decoding, metadata or a contract read.
    pub fn needs_hydration(&self) -> bool {
        is_placeholder_name(&self.contract_name)
    }

    /// Apply newly observed metadata, upgrading only away from placeholders.
    ///
    /// Returns `true` when anything changed. A placeholder or empty value
    /// never replaces a resolved one.
    pub fn upgrade_metadata(&mut self, name: Option<&str>, symbol: Option<&str>) -> bool {
        let mut changed = false;
        if let Some(name) = name.map(str::trim)
            && !is_placeholder_name(name)
            && name != self.contract_name
            && is_placeholder_name(&self.contract_name)
        {
            self.contract_name = name.to_string();
            changed = true;
        }
        if let Some(symbol) = symbol.map(str::trim)
            && !is_placeholder_symbol(symbol)
            && symbol != self.symbol
            && is_placeholder_symbol(&self.symbol)
        {
            self.symbol = symbol.to_string();
            changed = true;
        }
        changed
    }

    /// Same as [`upgrade_metadata`](Self::upgrade_metadata) but a live deploy
    /// receipt may also correct an already-resolved name.
    pub fn merge_live_metadata(&mut self, name: &str, symbol: &str) -> bool {
        let mut changed = false;
        let name = name.trim();
        if !is_placeholder_name(name) && name != self.contract_name {
            self.contract_name = name.to_string();
            changed = true;
        }
        let symbol = symbol.trim();
        if !is_placeholder_symbol(symbol) && symbol != self.symbol {
            self.symbol = symbol.to_string();
            changed = true;
        }
        changed
    }

    pub fn explorer_contract_url(&self) -> String {
        chains::explorer_address_url(self.chain_id, &self.contract_address)
    }

    pub fn explorer_tx_url(&self) -> String {
        chains::explorer_tx_url(self.chain_id, &self.tx_hash)
    }
}

/// Sort newest first; ties are broken by normalized address.
pub fn sort_newest_first(records: &mut [DeploymentRecord]) {
    records.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.normalized_address().cmp(&b.normalized_address()))
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Idle,
    Submitting,
    Pending,
    Verified,
    Failed,
}

impl VerificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Submitting | Self::Pending)
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verification state for one contract, keyed by lowercase address.
///
/// Transitions go through the `mark_*` methods, which keep `guid` present
/// exactly while pending and never leave `verified`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    #[serde(default)]
    pub status: VerificationStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    /// Job id of the most recent accepted submission, kept after it resolves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_guid: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub updated_at: i64,
}

impl VerificationRecord {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn is_verified(&self) -> bool {
        self.status == VerificationStatus::Verified
    }

    pub fn mark_submitting(&mut self, message: &str, now_ms: i64) -> bool {
        if self.is_verified() {
            return false;
        }
        self.status = VerificationStatus::Submitting;
        self.message = message.to_string();
        self.guid = None;
        self.attempts = self.attempts.saturating_add(1);
        self.updated_at = now_ms;
        true
    }

    /// Ignored for an empty job id so `guid` is never blank while pending.
    pub fn mark_pending(&mut self, guid: &str, message: &str, now_ms: i64) -> bool {
        let guid = guid.trim();
        if self.is_verified() || guid.is_empty() {
            return false;
        }
        self.status = VerificationStatus::Pending;
        self.message = message.to_string();
        self.guid = Some(guid.to_string());
        self.last_guid = Some(guid.to_string());
        self.updated_at = now_ms;
        true
    }

    pub fn mark_verified(&mut self, message: &str, now_ms: i64) -> bool {
        if self.is_verified() {
            return false;
        }
        self.status = VerificationStatus::Verified;
        self.message = message.to_string();
        self.guid = None;
        self.updated_at = now_ms;
        true
    }

    pub fn mark_failed(&mut self, message: &str, now_ms: i64) -> bool {
        if self.is_verified() {
            return false;
        }
        self.status = VerificationStatus::Failed;
        self.message = message.to_string();
        self.guid = None;
        self.updated_at = now_ms;
        true
    }

    /// Repair a record loaded from storage so the pending/guid pairing holds.
    pub(crate) fn normalize(&mut self) {
        if let Some(guid) = &self.guid
            && guid.trim().is_empty()
        {
            self.guid = None;
        }
        match self.status {
            VerificationStatus::Pending if self.guid.is_none() => {
                self.status = VerificationStatus::Failed;
                if self.message.is_empty() {
                    self.message = "Lost verification job id".to_string();
                }
            }
            VerificationStatus::Pending => {}
            _ => self.guid = None,
        }
    }
}
