//! User settings persistence.
//!
//! Stores operator preferences in ~/.contract-studio/settings.json, with an
//! optional ~/.contract-studio/config.toml overlay. Env vars win over both.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Operator settings persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub explorer: ExplorerSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub verification: VerificationSettings,
}

/// Explorer API access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExplorerSettings {
    /// Single API base URL used for every chain (multichain gateways).
    #[serde(default)]
    pub api_base_url: Option<String>,

    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    #[serde(default = "default_txlist_page_size")]
    pub txlist_page_size: u32,

    /// Chains to scan; empty means every registered chain.
    #[serde(default)]
    pub chains: Vec<String>,
}

fn default_http_timeout_ms() -> u64 {
    15_000
}

fn default_txlist_page_size() -> u32 {
    1_000
}

impl Default for ExplorerSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            http_timeout_ms: default_http_timeout_ms(),
            txlist_page_size: default_txlist_page_size(),
            chains: Vec::new(),
        }
    }
}

/// Record store location and limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreSettings {
    /// "file", "memory" or "libsql".
    #[serde(default = "default_store_backend")]
    pub backend: String,

    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_deployment_history_cap")]
    pub deployment_history_cap: usize,
}

fn default_store_backend() -> String {
    "file".to_string()
}

fn default_deployment_history_cap() -> usize {
    50
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
            deployment_history_cap: default_deployment_history_cap(),
        }
    }
}

/// Verification pacing and source settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationSettings {
    #[serde(default = "default_sweep_spacing_ms")]
    pub sweep_spacing_ms: u64,

    #[serde(default = "default_poll_spacing_ms")]
    pub poll_spacing_ms: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_poll_initial_delay_ms")]
    pub poll_initial_delay_ms: u64,

    /// Cap on submissions per contract; unset means unlimited.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Flattened Solidity source submitted for verification.
    #[serde(default)]
    pub source_path: Option<PathBuf>,

    #[serde(default = "default_contract_name")]
    pub contract_name: String,

    #[serde(default = "default_compiler_version")]
    pub compiler_version: String,

    /// Optimizer runs; unset means the optimizer was off.
    #[serde(default)]
    pub optimization_runs: Option<u32>,

    #[serde(default = "default_license_type")]
    pub license_type: u32,
}

fn default_sweep_spacing_ms() -> u64 {
    1_500
}

fn default_poll_spacing_ms() -> u64 {
    2_000
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_poll_initial_delay_ms() -> u64 {
    3_000
}

fn default_contract_name() -> String {
    "DeployableToken".to_string()
}

fn default_compiler_version() -> String {
    "v0.8.20+commit.a1b79de6".to_string()
}

fn default_license_type() -> u32 {
    2
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            sweep_spacing_ms: default_sweep_spacing_ms(),
            poll_spacing_ms: default_poll_spacing_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_initial_delay_ms: default_poll_initial_delay_ms(),
            max_attempts: None,
            source_path: None,
            contract_name: default_contract_name(),
            compiler_version: default_compiler_version(),
            optimization_runs: None,
            license_type: default_license_type(),
        }
    }
}

impl Settings {
    /// Get the default settings file path (~/.contract-studio/settings.json).
    pub fn default_path() -> PathBuf {
        crate::bootstrap::studio_home().join("settings.json")
    }

    /// Load settings from disk, returning default if not found.
    pub fn load() -> Self {
        Self::load_from(&Self::default_path())
    }

    /// Unreadable or malformed files fall back to defaults.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed settings file {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Default TOML config file path (~/.contract-studio/config.toml).
    pub fn default_toml_path() -> PathBuf {
        crate::bootstrap::studio_home().join("config.toml")
    }

    /// Load settings from a TOML file.
    ///
    /// Returns `None` if the file doesn't exist. Returns an error only
    /// if the file exists but can't be parsed.
    pub fn load_toml(path: &Path) -> Result<Option<Self>, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e)),
        };

        toml::from_str(&data)
            .map(Some)
            .map_err(|e| format!("invalid TOML in {}: {}", path.display(), e))
    }

    /// Merge values from `other` into `self`, preferring `other` for
    /// fields that differ from the default.
    pub fn merge_from(&mut self, other: &Self) {
        let (Ok(default_json), Ok(other_json), Ok(mut self_json)) = (
            serde_json::to_value(Self::default()),
            serde_json::to_value(other),
            serde_json::to_value(&*self),
        ) else {
            return;
        };

        merge_non_default(&mut self_json, &other_json, &default_json);

        if let Ok(merged) = serde_json::from_value(self_json) {
            *self = merged;
        }
    }
}

fn merge_non_default(
    target: &mut serde_json::Value,
    other: &serde_json::Value,
    defaults: &serde_json::Value,
) {
    match (target, other, defaults) {
        (
            serde_json::Value::Object(t),
            serde_json::Value::Object(o),
            serde_json::Value::Object(d),
        ) => {
            for (key, other_val) in o {
                let default_val = d.get(key).cloned().unwrap_or(serde_json::Value::Null);
                if let Some(target_val) = t.get_mut(key) {
                    merge_non_default(target_val, other_val, &default_val);
                } else if other_val != &default_val {
                    t.insert(key.clone(), other_val.clone());
                }
            }
        }
        (target, other, defaults) => {
            if other != defaults {
                *target = other.clone();
            }
        }
    }
}
