//! Configuration for contract-studio.
//!
//! Settings are loaded with priority: env var > config.toml > settings.json >
//! default. `~/.contract-studio/.env` is loaded via dotenvy early in startup.

pub(crate) mod helpers;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::chains::{self, Chain, SUPPORTED_CHAINS};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Lowest spacing accepted between consecutive already-verified checks.
pub const MIN_SWEEP_SPACING_MS: u64 = 1_500;
/// Lowest spacing accepted between consecutive status polls.
pub const MIN_POLL_SPACING_MS: u64 = 2_000;

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub explorer: ExplorerConfig,
    pub store: StoreConfig,
    pub verification: VerificationConfig,
}

/// Explorer API access.
#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    pub api_key: Option<SecretString>,
    pub api_base_url: Option<String>,
    pub http_timeout: Duration,
    pub txlist_page_size: u32,
    pub chains: Vec<&'static Chain>,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: None,
            http_timeout: Duration::from_millis(15_000),
            txlist_page_size: 1_000,
            chains: SUPPORTED_CHAINS.iter().collect(),
        }
    }
}

impl ExplorerConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let api_key = helpers::optional_env("ETHERSCAN_API_KEY")?.map(SecretString::from);

        let api_base_url = helpers::optional_env("EXPLORER_API_BASE_URL")?
            .or_else(|| settings.explorer.api_base_url.clone());
        if let Some(url) = &api_base_url {
            url::Url::parse(url).map_err(|e| ConfigError::InvalidValue {
                key: "EXPLORER_API_BASE_URL".to_string(),
                message: format!("must be a valid URL: {e}"),
            })?;
        }

        let timeout_ms = helpers::parse_env_or(
            "HTTP_TIMEOUT_MS",
            settings.explorer.http_timeout_ms,
            "a positive integer",
        )?;
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HTTP_TIMEOUT_MS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let txlist_page_size = helpers::parse_env_or(
            "TXLIST_PAGE_SIZE",
            settings.explorer.txlist_page_size,
            "a positive integer",
        )?;
        if txlist_page_size == 0 || txlist_page_size > 10_000 {
            return Err(ConfigError::InvalidValue {
                key: "TXLIST_PAGE_SIZE".to_string(),
                message: "must be between 1 and 10000".to_string(),
            });
        }

        let chains = match helpers::optional_env("STUDIO_CHAINS")? {
            Some(raw) => chains::parse_chain_selection(&raw, "STUDIO_CHAINS")?,
            None if settings.explorer.chains.is_empty() => SUPPORTED_CHAINS.iter().collect(),
            None => chains::parse_chain_selection(
                &settings.explorer.chains.join(","),
                "explorer.chains",
            )?,
        };

        Ok(Self {
            api_key,
            api_base_url,
            http_timeout: Duration::from_millis(timeout_ms),
            txlist_page_size,
            chains,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    File,
    Memory,
    LibSql,
}

impl StoreBackend {
    fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match normalize_variant(value).as_str() {
            "file" | "json" => Ok(Self::File),
            "memory" | "mem" => Ok(Self::Memory),
            "libsql" | "sqlite" => Ok(Self::LibSql),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected 'file', 'memory', or 'libsql', got '{value}'"),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Memory => "memory",
            Self::LibSql => "libsql",
        }
    }
}

/// Record store selection.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
    pub deployment_cap: usize,
}

impl StoreConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let backend = StoreBackend::parse(
            &helpers::optional_env("STORE_BACKEND")?
                .unwrap_or_else(|| settings.store.backend.clone()),
            "STORE_BACKEND",
        )?;

        let path = helpers::optional_env("STORE_PATH")?
            .map(PathBuf::from)
            .or_else(|| settings.store.path.clone())
            .unwrap_or_else(|| {
                crate::bootstrap::default_store_path(backend == StoreBackend::LibSql)
            });

        let deployment_cap = helpers::parse_env_or(
            "DEPLOYMENT_HISTORY_CAP",
            settings.store.deployment_history_cap,
            "a positive integer",
        )?;
        if deployment_cap == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DEPLOYMENT_HISTORY_CAP".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        Ok(Self {
            backend,
            path,
            deployment_cap,
        })
    }
}

/// Compiler settings and source location for verification submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub source_path: Option<PathBuf>,
    pub contract_name: String,
    pub compiler_version: String,
    pub optimization_used: bool,
    pub runs: u32,
    pub license_type: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            source_path: None,
            contract_name: "DeployableToken".to_string(),
            compiler_version: "v0.8.20+commit.a1b79de6".to_string(),
            optimization_used: false,
            runs: 200,
            license_type: 2,
        }
    }
}

/// Verification pacing and retry policy.
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub sweep_spacing: Duration,
    pub poll_spacing: Duration,
    pub poll_interval: Duration,
    pub poll_initial_delay: Duration,
    pub max_attempts: Option<u32>,
    pub source: SourceConfig,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            sweep_spacing: Duration::from_millis(MIN_SWEEP_SPACING_MS),
            poll_spacing: Duration::from_millis(MIN_POLL_SPACING_MS),
            poll_interval: Duration::from_secs(15),
            poll_initial_delay: Duration::from_millis(3_000),
            max_attempts: None,
            source: SourceConfig::default(),
        }
    }
}

impl VerificationConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let v = &settings.verification;

        let sweep_spacing_ms = helpers::parse_env_or(
            "VERIFY_SWEEP_SPACING_MS",
            v.sweep_spacing_ms,
            "a non-negative integer",
        )?;
        if sweep_spacing_ms < MIN_SWEEP_SPACING_MS {
            return Err(ConfigError::InvalidValue {
                key: "VERIFY_SWEEP_SPACING_MS".to_string(),
                message: format!("must be >= {MIN_SWEEP_SPACING_MS}"),
            });
        }

        let poll_spacing_ms = helpers::parse_env_or(
            "VERIFY_POLL_SPACING_MS",
            v.poll_spacing_ms,
            "a non-negative integer",
        )?;
        if poll_spacing_ms < MIN_POLL_SPACING_MS {
            return Err(ConfigError::InvalidValue {
                key: "VERIFY_POLL_SPACING_MS".to_string(),
                message: format!("must be >= {MIN_POLL_SPACING_MS}"),
            });
        }

        let poll_interval_secs = helpers::parse_env_or(
            "VERIFY_POLL_INTERVAL_SECS",
            v.poll_interval_secs,
            "a positive integer",
        )?;
        if poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "VERIFY_POLL_INTERVAL_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let poll_initial_delay_ms = helpers::parse_env_or(
            "VERIFY_POLL_INITIAL_DELAY_MS",
            v.poll_initial_delay_ms,
            "a non-negative integer",
        )?;

        let max_attempts = helpers::optional_env("VERIFY_MAX_ATTEMPTS")?
            .map(|s| s.parse::<u32>())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "VERIFY_MAX_ATTEMPTS".to_string(),
                message: format!("must be a positive integer: {e}"),
            })?
            .or(v.max_attempts);
        if max_attempts == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "VERIFY_MAX_ATTEMPTS".to_string(),
                message: "must be > 0 (unset for unlimited)".to_string(),
            });
        }

        let optimization_runs = helpers::optional_env("VERIFY_OPTIMIZATION_RUNS")?
            .map(|s| s.parse::<u32>())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "VERIFY_OPTIMIZATION_RUNS".to_string(),
                message: format!("must be a non-negative integer: {e}"),
            })?
            .or(v.optimization_runs);

        let license_type =
            helpers::parse_env_or("VERIFY_LICENSE_TYPE", v.license_type, "an integer 1-14")?;
        if !(1..=14).contains(&license_type) {
            return Err(ConfigError::InvalidValue {
                key: "VERIFY_LICENSE_TYPE".to_string(),
                message: "must be between 1 and 14".to_string(),
            });
        }

        let source = SourceConfig {
            source_path: helpers::optional_env("VERIFY_SOURCE_PATH")?
                .map(PathBuf::from)
                .or_else(|| v.source_path.clone()),
            contract_name: helpers::optional_env("VERIFY_CONTRACT_NAME")?
                .unwrap_or_else(|| v.contract_name.clone()),
            compiler_version: helpers::optional_env("VERIFY_COMPILER_VERSION")?
                .unwrap_or_else(|| v.compiler_version.clone()),
            optimization_used: optimization_runs.is_some(),
            runs: optimization_runs.unwrap_or(200),
            license_type,
        };

        Ok(Self {
            sweep_spacing: Duration::from_millis(sweep_spacing_ms),
            poll_spacing: Duration::from_millis(poll_spacing_ms),
            poll_interval: Duration::from_secs(poll_interval_secs),
            poll_initial_delay: Duration::from_millis(poll_initial_delay_ms),
            max_attempts,
            source,
        })
    }
}

fn normalize_variant(value: &str) -> String {
    value.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

impl Config {
    /// Load configuration from env vars, the TOML overlay and settings.json.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_toml(None)
    }

    /// Load with an explicit TOML config file overlay.
    pub fn from_env_with_toml(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        crate::bootstrap::load_studio_env();
        let mut settings = Settings::load();

        // Overlay TOML config file (values win over JSON settings)
        Self::apply_toml_overlay(&mut settings, toml_path)?;

        Self::build(&settings)
    }

    /// Load and merge a TOML config file into settings.
    ///
    /// If `explicit_path` is `Some`, loads from that path (errors are fatal).
    /// If `None`, tries the default path `~/.contract-studio/config.toml`
    /// (missing file is silently ignored).
    fn apply_toml_overlay(
        settings: &mut Settings,
        explicit_path: Option<&Path>,
    ) -> Result<(), ConfigError> {
        let path = explicit_path
            .map(PathBuf::from)
            .unwrap_or_else(Settings::default_toml_path);

        match Settings::load_toml(&path) {
            Ok(Some(toml_settings)) => {
                settings.merge_from(&toml_settings);
                tracing::debug!("Loaded TOML config from {}", path.display());
            }
            Ok(None) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
            }
            Err(e) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Failed to load config file {}: {}",
                        path.display(),
                        e
                    )));
                }
                tracing::warn!("Failed to load default config file: {}", e);
            }
        }
        Ok(())
    }

    /// Build config from already-merged settings.
    pub fn build(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            explorer: ExplorerConfig::resolve(settings)?,
            store: StoreConfig::resolve(settings)?,
            verification: VerificationConfig::resolve(settings)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const KEYS: &[&str] = &[
        "ETHERSCAN_API_KEY",
        "EXPLORER_API_BASE_URL",
        "STUDIO_CHAINS",
        "HTTP_TIMEOUT_MS",
        "TXLIST_PAGE_SIZE",
        "STORE_BACKEND",
        "STORE_PATH",
        "DEPLOYMENT_HISTORY_CAP",
        "VERIFY_SWEEP_SPACING_MS",
        "VERIFY_POLL_SPACING_MS",
        "VERIFY_POLL_INTERVAL_SECS",
        "VERIFY_POLL_INITIAL_DELAY_MS",
        "VERIFY_MAX_ATTEMPTS",
        "VERIFY_SOURCE_PATH",
        "VERIFY_CONTRACT_NAME",
        "VERIFY_COMPILER_VERSION",
        "VERIFY_OPTIMIZATION_RUNS",
        "VERIFY_LICENSE_TYPE",
    ];

    fn clear_studio_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            for key in KEYS {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn resolvers_use_documented_defaults() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_studio_env();

        let config = Config::build(&Settings::default()).expect("config");

        assert!(config.explorer.api_key.is_none());
        assert_eq!(config.explorer.http_timeout, Duration::from_millis(15_000));
        assert_eq!(config.explorer.txlist_page_size, 1_000);
        assert_eq!(config.explorer.chains.len(), SUPPORTED_CHAINS.len());
        assert_eq!(config.store.backend, StoreBackend::File);
        assert!(config.store.path.ends_with("store.json"));
        assert_eq!(config.store.deployment_cap, 50);
        assert_eq!(config.verification.sweep_spacing, Duration::from_millis(1_500));
        assert_eq!(config.verification.poll_spacing, Duration::from_millis(2_000));
        assert_eq!(config.verification.poll_interval, Duration::from_secs(15));
        assert_eq!(config.verification.max_attempts, None);
        assert_eq!(config.verification.source, SourceConfig::default());
    }

    #[test]
    fn env_overrides_settings() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_studio_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("ETHERSCAN_API_KEY", "key-123");
            std::env::set_var("STUDIO_CHAINS", "84532");
            std::env::set_var("STORE_BACKEND", "libsql");
            std::env::set_var("VERIFY_MAX_ATTEMPTS", "3");
            std::env::set_var("VERIFY_OPTIMIZATION_RUNS", "1000");
        }

        let mut settings = Settings::default();
        settings.verification.max_attempts = Some(9);
        settings.store.deployment_history_cap = 10;

        let config = Config::build(&settings).expect("config");

        assert_eq!(
            config.explorer.api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("key-123".to_string())
        );
        assert_eq!(config.explorer.chains.len(), 1);
        assert_eq!(config.explorer.chains[0].id, 84_532);
        assert_eq!(config.store.backend, StoreBackend::LibSql);
        assert!(config.store.path.ends_with("store.db"));
        assert_eq!(config.store.deployment_cap, 10);
        assert_eq!(config.verification.max_attempts, Some(3));
        assert!(config.verification.source.optimization_used);
        assert_eq!(config.verification.source.runs, 1_000);

        clear_studio_env();
    }

    #[test]
    fn spacing_below_minimum_is_rejected() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_studio_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("VERIFY_POLL_SPACING_MS", "500");
        }

        let err = VerificationConfig::resolve(&Settings::default()).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "VERIFY_POLL_SPACING_MS"),
            other => panic!("unexpected error: {other}"),
        }

        clear_studio_env();
    }

    #[test]
    fn invalid_values_name_their_key() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_studio_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("STORE_BACKEND", "postgres");
        }
        let err = StoreConfig::resolve(&Settings::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "STORE_BACKEND"));

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::remove_var("STORE_BACKEND");
            std::env::set_var("HTTP_TIMEOUT_MS", "soon");
        }
        let err = ExplorerConfig::resolve(&Settings::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "HTTP_TIMEOUT_MS"));

        clear_studio_env();
    }

    #[test]
    fn explicit_missing_toml_is_fatal() {
        let mut settings = Settings::default();
        let err = Config::apply_toml_overlay(
            &mut settings,
            Some(Path::new("/tmp/contract-studio-missing-config.toml")),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn toml_overlay_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[store]\ndeployment_history_cap = 7\n").unwrap();

        let mut settings = Settings::default();
        Config::apply_toml_overlay(&mut settings, Some(&path)).unwrap();
        assert_eq!(settings.store.deployment_history_cap, 7);
    }
}
