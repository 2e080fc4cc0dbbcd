//! Verification state engine.
//!
//! Drives each deployment through submit → poll → terminal state against the
//! explorer's verification API. Every transition goes through the record
//! store before it is observable, and all explorer traffic from the sweep and
//! the poll loop is spaced by one shared [`Pacer`].

mod schedule;
mod source;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::Notify;

use crate::config::VerificationConfig;
use crate::decoder;
use crate::error::StoreError;
use crate::explorer::{
    ExplorerApi, SubmitResponse, VerificationCheck, VerificationSubmission,
    mentions_already_verified,
};
use crate::records::{
    DeploymentRecord, VerificationRecord, VerificationStatus, normalize_address,
};
use crate::store::{RecordStore, VerificationMap};

pub use self::schedule::{CancellationFlag, Pacer};
pub use self::source::{
    FileSourceProvider, SourceProvider, StaticSourceProvider, VerificationSource,
};

pub const MSG_SUBMITTING: &str = "Submitting to Etherscan...";
pub const MSG_SUBMITTED: &str = "Submitted! Waiting for Etherscan...";
pub const MSG_ALREADY_VERIFIED: &str = "Already Verified ✓";
pub const MSG_SWEEP_VERIFIED: &str = "Verified on Etherscan ✓";
pub const MSG_SUBMISSION_FAILED: &str = "Submission failed";
pub const MSG_VERIFICATION_FAILED: &str = "Verification failed";
pub const MSG_INTERRUPTED: &str = "Submission interrupted; retry";

/// Why a submission was not attempted. No state changes when refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitRefusal {
    #[error("No deployment recorded for {address}")]
    UnknownDeployment { address: String },

    #[error("Verification already {status} for {address}")]
    InFlight {
        address: String,
        status: VerificationStatus,
    },

    #[error("{address} is already verified")]
    AlreadyVerified { address: String },

    #[error("Retry limit reached for {address} ({attempts}/{max_attempts} attempts)")]
    RetryCapReached {
        address: String,
        attempts: u32,
        max_attempts: u32,
    },

    #[error("No verification source configured for {address}")]
    NoSource { address: String },

    #[error("Record store unavailable: {0}")]
    Storage(String),
}

impl SubmitRefusal {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownDeployment { .. } => "unknown_deployment",
            Self::InFlight { .. } => "in_flight",
            Self::AlreadyVerified { .. } => "already_verified",
            Self::RetryCapReached { .. } => "retry_cap_reached",
            Self::NoSource { .. } => "no_source",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<StoreError> for SubmitRefusal {
    fn from(e: StoreError) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Result of one status check against the explorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    Pending { message: String },
    Verified { message: String },
    Failed { message: String },
    /// Explorer unreachable or answered garbage; the job stays pending.
    Unreachable { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub checked: usize,
    pub verified: usize,
    pub errors: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollReport {
    pub checked: usize,
    pub verified: usize,
    pub failed: usize,
    pub still_pending: usize,
    pub cancelled: bool,
}

/// How the poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollLoopExit {
    Cancelled,
    AlreadyRunning,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Terminal or pending outcome of one submission, applied to the stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Settlement {
    Pending { guid: String },
    Verified,
    Failed { message: String },
}

impl Settlement {
    fn apply(&self, record: &mut VerificationRecord, now: i64) -> bool {
        match self {
            Self::Pending { guid } => record.mark_pending(guid, MSG_SUBMITTED, now),
            Self::Verified => record.mark_verified(MSG_ALREADY_VERIFIED, now),
            Self::Failed { message } => record.mark_failed(message, now),
        }
    }
}

/// Owns verification state for one record store. Engines share nothing, so
/// several can coexist in one process.
pub struct VerificationEngine {
    store: Arc<RecordStore>,
    explorer: Arc<dyn ExplorerApi>,
    source: Option<Arc<dyn SourceProvider>>,
    config: VerificationConfig,
    pacer: Pacer,
    swept: std::sync::Mutex<HashSet<String>>,
    /// Submission outcomes the store refused to write, retried on next access.
    unsettled: std::sync::Mutex<HashMap<String, Settlement>>,
    poll_loop_running: AtomicBool,
    pending_detected: Notify,
}

impl VerificationEngine {
    pub fn new(
        store: Arc<RecordStore>,
        explorer: Arc<dyn ExplorerApi>,
        source: Option<Arc<dyn SourceProvider>>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            store,
            explorer,
            source,
            config,
            pacer: Pacer::new(),
            swept: std::sync::Mutex::new(HashSet::new()),
            unsettled: std::sync::Mutex::new(HashMap::new()),
            poll_loop_running: AtomicBool::new(false),
            pending_detected: Notify::new(),
        }
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Current record for `address`; `idle` when never touched.
    pub async fn status(&self, address: &str) -> Result<VerificationRecord, StoreError> {
        self.settle_unpersisted().await;
        let map = self.store.load_verifications().await?;
        Ok(map
            .get(&normalize_address(address))
            .cloned()
            .unwrap_or_else(VerificationRecord::idle))
    }

    pub async fn all(&self) -> Result<VerificationMap, StoreError> {
        self.settle_unpersisted().await;
        self.store.load_verifications().await
    }

    /// Fail records left `submitting` by a previous process so they can be
    /// resubmitted. A duplicate submit settles via the already-verified path.
    pub async fn recover_interrupted(&self) -> Result<usize, StoreError> {
        self.settle_unpersisted().await;
        let now = now_ms();
        let recovered = self
            .store
            .update_verifications(|map| {
                map.values_mut()
                    .filter(|record| record.status == VerificationStatus::Submitting)
                    .map(|record| record.mark_failed(MSG_INTERRUPTED, now))
                    .filter(|changed| *changed)
                    .count()
            })
            .await?;
        if recovered > 0 {
            tracing::info!(recovered, "Marked interrupted submissions as failed");
        }
        Ok(recovered)
    }

    /// Submit a deployment's source for verification.
    pub async fn submit(&self, address: &str) -> Result<VerificationRecord, SubmitRefusal> {
        let key = normalize_address(address);
        let deployment = self
            .store
            .load_deployments()
            .await?
            .into_iter()
            .find(|record| record.normalized_address() == key)
            .ok_or_else(|| SubmitRefusal::UnknownDeployment {
                address: address.to_string(),
            })?;

        let current = self.status(&key).await?;
        self.check_submittable(&deployment.contract_address, &current)?;

        let source = match &self.source {
            Some(provider) => provider.source_for(&deployment).await,
            None => None,
        };
        let Some(source) = source else {
            return Err(SubmitRefusal::NoSource {
                address: deployment.contract_address.clone(),
            });
        };

        self.claim(&key, &deployment.contract_address).await?;
        tracing::info!(
            contract = %deployment.contract_address,
            chain_id = deployment.chain_id,
            "Submitting source for verification"
        );

        let constructor_arguments = self.constructor_arguments(&deployment).await;
        let submission = VerificationSubmission {
            contract_address: deployment.contract_address.clone(),
            source_code: source.source_code,
            contract_name: source.contract_name,
            compiler_version: source.compiler_version,
            optimization_used: source.optimization_used,
            runs: source.runs,
            constructor_arguments,
            license_type: source.license_type,
        };

        let response = self
            .explorer
            .submit_verification(deployment.chain_id, &submission)
            .await;
        let settlement = match response {
            Ok(SubmitResponse::Accepted { guid }) => {
                tracing::info!(contract = %deployment.contract_address, %guid, "Verification job accepted");
                Settlement::Pending { guid }
            }
            Ok(SubmitResponse::AlreadyVerified { .. }) => {
                tracing::info!(contract = %deployment.contract_address, "Source already verified");
                Settlement::Verified
            }
            Ok(SubmitResponse::Rejected { message }) => {
                tracing::warn!(contract = %deployment.contract_address, %message, "Verification rejected");
                let message = if message.trim().is_empty() {
                    MSG_SUBMISSION_FAILED.to_string()
                } else {
                    message
                };
                Settlement::Failed { message }
            }
            Err(e) if mentions_already_verified(&e.to_string()) => Settlement::Verified,
            Err(e) => {
                tracing::warn!(contract = %deployment.contract_address, error = %e, "Verification submission failed");
                Settlement::Failed {
                    message: e.to_string(),
                }
            }
        };

        let record = match self.persist_settlement(&key, &settlement).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    contract = %deployment.contract_address,
                    error = %e,
                    "Cannot persist submission outcome; keeping it for the next store access"
                );
                self.unsettled_map().insert(key, settlement);
                return Err(e.into());
            }
        };

        if record.status == VerificationStatus::Pending {
            self.pending_detected.notify_one();
        }
        Ok(record)
    }

    fn check_submittable(
        &self,
        address: &str,
        record: &VerificationRecord,
    ) -> Result<(), SubmitRefusal> {
        if record.is_verified() {
            return Err(SubmitRefusal::AlreadyVerified {
                address: address.to_string(),
            });
        }
        if record.status.is_in_flight() {
            return Err(SubmitRefusal::InFlight {
                address: address.to_string(),
                status: record.status,
            });
        }
        if let Some(max_attempts) = self.config.max_attempts
            && record.attempts >= max_attempts
        {
            return Err(SubmitRefusal::RetryCapReached {
                address: address.to_string(),
                attempts: record.attempts,
                max_attempts,
            });
        }
        Ok(())
    }

    /// Atomically move the record to `submitting`, re-checking the refusal
    /// rules inside the store's write lock.
    async fn claim(&self, key: &str, address: &str) -> Result<(), SubmitRefusal> {
        let now = now_ms();
        self.store
            .update_verifications(|map| {
                let record = map
                    .entry(key.to_string())
                    .or_insert_with(VerificationRecord::idle);
                self.check_submittable(address, record)?;
                record.mark_submitting(MSG_SUBMITTING, now);
                Ok(())
            })
            .await?
    }

    /// Constructor arguments re-derived from the deploy transaction input.
    async fn constructor_arguments(&self, deployment: &DeploymentRecord) -> String {
        if deployment.tx_hash.trim().is_empty() {
            return String::new();
        }
        match self
            .explorer
            .transaction_input(deployment.chain_id, &deployment.tx_hash)
            .await
        {
            Ok(Some(input)) => decoder::constructor_args_hex(&input).unwrap_or_default(),
            Ok(None) => String::new(),
            Err(e) => {
                tracing::debug!(tx = %deployment.tx_hash, error = %e, "Cannot fetch deploy input");
                String::new()
            }
        }
    }

    async fn persist_settlement(
        &self,
        key: &str,
        settlement: &Settlement,
    ) -> Result<VerificationRecord, StoreError> {
        self.transition(key, |record, now| settlement.apply(record, now))
            .await
    }

    fn unsettled_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Settlement>> {
        match self.unsettled.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Write back outcomes from submissions whose final store write failed.
    async fn settle_unpersisted(&self) {
        let outstanding: Vec<(String, Settlement)> = {
            let map = self.unsettled_map();
            if map.is_empty() {
                return;
            }
            map.iter()
                .map(|(key, settlement)| (key.clone(), settlement.clone()))
                .collect()
        };

        for (key, settlement) in outstanding {
            match self.persist_settlement(&key, &settlement).await {
                Ok(record) => {
                    {
                        let mut map = self.unsettled_map();
                        if map.get(&key) == Some(&settlement) {
                            map.remove(&key);
                        }
                    }
                    tracing::info!(contract = %key, status = %record.status, "Persisted deferred submission outcome");
                    if record.status == VerificationStatus::Pending {
                        self.pending_detected.notify_one();
                    }
                }
                Err(e) => {
                    tracing::debug!(contract = %key, error = %e, "Store still refusing deferred outcome");
                }
            }
        }
    }

    /// Apply `mutate` to the stored record and persist it.
    async fn transition<F>(&self, key: &str, mutate: F) -> Result<VerificationRecord, StoreError>
    where
        F: FnOnce(&mut VerificationRecord, i64) -> bool + Send,
    {
        let now = now_ms();
        self.store
            .update_verifications(|map| {
                let record = map
                    .entry(key.to_string())
                    .or_insert_with(VerificationRecord::idle);
                if !mutate(record, now) {
                    tracing::debug!(contract = key, status = %record.status, "Transition skipped");
                }
                record.clone()
            })
            .await
    }

    /// Ask the explorer about one job.
    pub async fn poll_once(&self, chain_id: u64, guid: &str) -> PollOutcome {
        match self.explorer.check_verification_status(chain_id, guid).await {
            Ok(VerificationCheck::Pending { message }) => PollOutcome::Pending { message },
            Ok(VerificationCheck::Verified { message }) => PollOutcome::Verified { message },
            Ok(VerificationCheck::Failed { message }) => PollOutcome::Failed { message },
            Err(e) => PollOutcome::Unreachable {
                reason: e.to_string(),
            },
        }
    }

    /// `(address, chain_id, guid)` for every pending job with a known deployment.
    async fn pending_jobs(&self) -> Result<Vec<(String, u64, String)>, StoreError> {
        self.settle_unpersisted().await;
        let verifications = self.store.load_verifications().await?;
        let deployments = self.store.load_deployments().await?;
        Ok(verifications
            .into_iter()
            .filter(|(_, record)| record.status == VerificationStatus::Pending)
            .filter_map(|(address, record)| {
                let guid = record.guid?;
                match deployments
                    .iter()
                    .find(|d| d.normalized_address() == address)
                {
                    Some(deployment) => Some((address, deployment.chain_id, guid)),
                    None => {
                        tracing::warn!(contract = %address, "Pending job has no deployment record");
                        None
                    }
                }
            })
            .collect())
    }

    /// Poll every pending job once, spacing calls by the poll spacing.
    pub async fn poll_pending_cycle(&self, cancel: &CancellationFlag) -> PollReport {
        let mut report = PollReport::default();
        let jobs = match self.pending_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot load pending verification jobs");
                return report;
            }
        };

        for (address, chain_id, guid) in jobs {
            if !self.pacer.ready(self.config.poll_spacing, cancel).await {
                report.cancelled = true;
                break;
            }
            report.checked += 1;
            let outcome = self.poll_once(chain_id, &guid).await;
            tracing::debug!(contract = %address, %guid, ?outcome, "Polled verification job");

            let applied = match outcome {
                PollOutcome::Verified { message } => {
                    let message = if message.trim().is_empty() {
                        MSG_SWEEP_VERIFIED.to_string()
                    } else {
                        message
                    };
                    self.resolve_job(&address, &guid, |record, now| {
                        record.mark_verified(&message, now)
                    })
                    .await
                }
                PollOutcome::Failed { message } => {
                    let message = if message.trim().is_empty() {
                        MSG_VERIFICATION_FAILED.to_string()
                    } else {
                        message
                    };
                    self.resolve_job(&address, &guid, |record, now| {
                        record.mark_failed(&message, now)
                    })
                    .await
                }
                PollOutcome::Pending { .. } => {
                    report.still_pending += 1;
                    continue;
                }
                PollOutcome::Unreachable { reason } => {
                    tracing::warn!(contract = %address, %reason, "Verification status check failed");
                    report.still_pending += 1;
                    continue;
                }
            };

            match applied {
                Ok(Some(record)) if record.is_verified() => {
                    tracing::info!(contract = %address, "Verification completed");
                    report.verified += 1;
                }
                Ok(Some(record)) => {
                    tracing::info!(contract = %address, message = %record.message, "Verification failed");
                    report.failed += 1;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(contract = %address, error = %e, "Cannot persist poll result"),
            }
        }
        report
    }

    /// Resolve a job only if the record is still pending on the same guid.
    async fn resolve_job<F>(
        &self,
        key: &str,
        guid: &str,
        mutate: F,
    ) -> Result<Option<VerificationRecord>, StoreError>
    where
        F: FnOnce(&mut VerificationRecord, i64) -> bool + Send,
    {
        let now = now_ms();
        self.store
            .update_verifications(|map| {
                let record = map.get_mut(key)?;
                if record.status != VerificationStatus::Pending
                    || record.guid.as_deref() != Some(guid)
                {
                    return None;
                }
                mutate(record, now).then(|| record.clone())
            })
            .await
    }

    /// Check idle and failed contracts once per session for an existing
    /// verification on the explorer.
    pub async fn sweep_already_verified(&self, cancel: &CancellationFlag) -> SweepReport {
        let mut report = SweepReport::default();
        let (deployments, verifications) = match tokio::try_join!(
            self.store.load_deployments(),
            self.store.load_verifications()
        ) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot load records for verification sweep");
                return report;
            }
        };

        for deployment in deployments {
            let key = deployment.normalized_address();
            let status = verifications
                .get(&key)
                .map(|record| record.status)
                .unwrap_or_default();
            if !matches!(status, VerificationStatus::Idle | VerificationStatus::Failed) {
                continue;
            }
            if !self.mark_swept(&key) {
                continue;
            }
            if !self.pacer.ready(self.config.sweep_spacing, cancel).await {
                self.unmark_swept(&key);
                report.cancelled = true;
                break;
            }

            report.checked += 1;
            match self
                .explorer
                .is_verified(deployment.chain_id, &deployment.contract_address)
                .await
            {
                Ok(true) => {
                    let now = now_ms();
                    let result = self
                        .store
                        .update_verifications(|map| {
                            let record = map
                                .entry(key.clone())
                                .or_insert_with(VerificationRecord::idle);
                            if record.status.is_in_flight() {
                                return false;
                            }
                            record.mark_verified(MSG_SWEEP_VERIFIED, now)
                        })
                        .await;
                    match result {
                        Ok(true) => {
                            tracing::info!(contract = %deployment.contract_address, "Found existing verification");
                            report.verified += 1;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(contract = %deployment.contract_address, error = %e, "Cannot persist sweep result");
                            report.errors += 1;
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(contract = %deployment.contract_address, error = %e, "Already-verified check failed");
                    if e.is_transient() {
                        self.unmark_swept(&key);
                    }
                    report.errors += 1;
                }
            }
        }
        report
    }

    fn mark_swept(&self, key: &str) -> bool {
        match self.swept.lock() {
            Ok(mut swept) => swept.insert(key.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(key.to_string()),
        }
    }

    fn unmark_swept(&self, key: &str) {
        match self.swept.lock() {
            Ok(mut swept) => swept.remove(key),
            Err(poisoned) => poisoned.into_inner().remove(key),
        };
    }

    /// Poll pending jobs every interval until cancelled.
    ///
    /// Waits the initial delay when pending jobs first show up. Only one
    /// loop runs per engine; a second call returns immediately.
    pub async fn run_poll_loop(&self, cancel: &CancellationFlag) -> PollLoopExit {
        if self
            .poll_loop_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return PollLoopExit::AlreadyRunning;
        }
        let _running = RunningGuard(&self.poll_loop_running);

        let mut armed = false;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let has_pending = match self.pending_jobs().await {
                Ok(jobs) => !jobs.is_empty(),
                Err(e) => {
                    tracing::warn!(error = %e, "Cannot load pending verification jobs");
                    false
                }
            };

            if !has_pending {
                armed = false;
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = self.pending_detected.notified() => {}
                    _ = cancel.cancelled() => break,
                }
                continue;
            }

            if !armed {
                armed = true;
                if !cancel.sleep(self.config.poll_initial_delay).await {
                    break;
                }
            }

            let report = self.poll_pending_cycle(cancel).await;
            if report.cancelled {
                break;
            }
            if report.checked > 0 {
                tracing::debug!(?report, "Verification poll cycle finished");
            }
            if !cancel.sleep(self.config.poll_interval).await {
                break;
            }
        }
        tracing::debug!("Verification poll loop stopped");
        PollLoopExit::Cancelled
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
