//! Flattened contract source and compiler settings for verification.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::SourceConfig;
use crate::records::DeploymentRecord;

/// Everything the explorer needs besides the address and constructor args.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationSource {
    pub source_code: String,
    pub contract_name: String,
    pub compiler_version: String,
    pub optimization_used: bool,
    pub runs: u32,
    pub license_type: u32,
}

/// Resolves the source a deployment was compiled from.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// `None` when no source is known for this deployment.
    async fn source_for(&self, deployment: &DeploymentRecord) -> Option<VerificationSource>;
}

/// Reads one flattened source file, re-read on every call so edits apply.
pub struct FileSourceProvider {
    path: PathBuf,
    settings: SourceConfig,
}

impl FileSourceProvider {
    pub fn new(path: PathBuf, settings: SourceConfig) -> Self {
        Self { path, settings }
    }

    /// Provider for the configured source path, if any.
    pub fn from_config(settings: &SourceConfig) -> Option<Self> {
        settings
            .source_path
            .clone()
            .map(|path| Self::new(path, settings.clone()))
    }
}

#[async_trait]
impl SourceProvider for FileSourceProvider {
    async fn source_for(&self, deployment: &DeploymentRecord) -> Option<VerificationSource> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(source) if !source.trim().is_empty() => {
                Some(source_with(&self.settings, source))
            }
            Ok(_) => {
                tracing::warn!(path = %self.path.display(), "Verification source file is empty");
                None
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    contract = %deployment.contract_address,
                    error = %e,
                    "Cannot read verification source"
                );
                None
            }
        }
    }
}

/// Fixed in-memory source, for embedding callers and tests.
pub struct StaticSourceProvider {
    source: VerificationSource,
}

impl StaticSourceProvider {
    pub fn new(source_code: impl Into<String>, settings: &SourceConfig) -> Self {
        Self {
            source: source_with(settings, source_code.into()),
        }
    }
}

#[async_trait]
impl SourceProvider for StaticSourceProvider {
    async fn source_for(&self, _deployment: &DeploymentRecord) -> Option<VerificationSource> {
        Some(self.source.clone())
    }
}

fn source_with(settings: &SourceConfig, source_code: String) -> VerificationSource {
    VerificationSource {
        source_code,
        contract_name: settings.contract_name.clone(),
        compiler_version: settings.compiler_version.clone(),
        optimization_used: settings.optimization_used,
        runs: settings.runs,
        license_type: settings.license_type,
    }
}
