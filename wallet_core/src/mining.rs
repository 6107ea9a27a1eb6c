//! Mining orchestration.
//!
//! The authority runs proof-of-work; the wallet submits a job, polls its
//! progress on a fixed period and reconciles what it sees into a local
//! [`MiningJob`]. Reconciliation is monotonic: a report can move the job
//! forward (`starting` -> `mining` -> `completed | error`) but never back,
//! and once the job is terminal every later report is ignored.
//!
//! Completion clears the transaction selection and re-reads the mempool and
//! the miner's balance exactly once, then publishes the finished job on the
//! orchestrator's `watch` channel.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tessera_types::WalletAddress;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::authority::{
    AuthorityError, LedgerAuthority, MinedBlock, MiningOutcome, MiningRequest, ProgressReport,
};
use crate::balance::BalanceView;
use crate::error::WalletError;
use crate::mempool::MempoolView;
use crate::scheduler::{PeriodicTask, Tick};
use crate::selection::MAX_SELECTED;

/// Default period of the progress poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MiningStatus {
    #[default]
    NotStarted,
    Starting,
    Mining,
    Completed,
    Error,
}

impl MiningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::Mining => "mining",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// A job in flight: submissions are refused and reset is not allowed.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Mining)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for MiningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who detected a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    /// Reported by the authority (an `error` progress report or a rejected
    /// submission).
    Authority,
    /// Detected by the wallet: the authority could not be reached.
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobError {
    pub origin: FailureOrigin,
    pub message: String,
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            FailureOrigin::Authority => write!(f, "authority reported: {}", self.message),
            FailureOrigin::Local => write!(f, "lost contact with authority: {}", self.message),
        }
    }
}

/// What applying one observation did to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Ignored,
    Progress,
    Completed,
    Failed,
}

/// Client-side view of the current mining job.
#[derive(Debug, Clone, PartialEq)]
pub struct MiningJob {
    /// Incremented on every submission; polls of an older job are dropped.
    pub generation: u64,
    pub status: MiningStatus,
    pub miner: Option<WalletAddress>,
    pub selected_transaction_indices: Vec<usize>,
    pub nonce: Option<u64>,
    pub hash: Option<String>,
    pub final_nonce: Option<u64>,
    pub final_hash: Option<String>,
    pub error: Option<JobError>,
    pub started_at: Option<Instant>,
    /// Hash of the last block this wallet saw completed. The authority keeps
    /// reporting it until the next job starts, so it never completes a new job.
    previous_final_hash: Option<String>,
}

impl Default for MiningJob {
    fn default() -> Self {
        Self::idle(0, None)
    }
}

impl MiningJob {
    fn idle(generation: u64, previous_final_hash: Option<String>) -> Self {
        Self {
            generation,
            status: MiningStatus::NotStarted,
            miner: None,
            selected_transaction_indices: Vec::new(),
            nonce: None,
            hash: None,
            final_nonce: None,
            final_hash: None,
            error: None,
            started_at: None,
            previous_final_hash,
        }
    }

    /// A fresh job in `starting`, carrying over what it must not confuse
    /// with its own result.
    pub fn start(previous: &MiningJob, miner: WalletAddress, indices: Vec<usize>) -> Self {
        let previous_final_hash = previous
            .final_hash
            .clone()
            .or_else(|| previous.previous_final_hash.clone());
        Self {
            status: MiningStatus::Starting,
            miner: Some(miner),
            selected_transaction_indices: indices,
            started_at: Some(Instant::now()),
            ..Self::idle(previous.generation + 1, previous_final_hash)
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|t| t.elapsed())
    }

    /// Fold one progress report into the job.
    pub fn apply(&mut self, report: &ProgressReport) -> Applied {
        if !self.status.is_active() {
            return Applied::Ignored;
        }
        match report.status {
            MiningStatus::NotStarted | MiningStatus::Starting => Applied::Ignored,
            MiningStatus::Mining => {
                self.status = MiningStatus::Mining;
                if report.nonce.is_some() {
                    self.nonce = report.nonce;
                }
                if let Some(hash) = non_empty(&report.hash) {
                    self.hash = Some(hash);
                }
                Applied::Progress
            }
            MiningStatus::Completed => {
                let final_nonce = report.final_nonce.or(report.nonce);
                let final_hash = non_empty(&report.final_hash).or_else(|| non_empty(&report.hash));
                let (Some(final_nonce), Some(final_hash)) = (final_nonce, final_hash) else {
                    tracing::warn!("completion report without nonce or hash; ignoring");
                    return Applied::Ignored;
                };
                if self.previous_final_hash.as_deref() == Some(final_hash.as_str()) {
                    tracing::debug!(hash = %final_hash, "ignoring completion of previous job");
                    return Applied::Ignored;
                }
                self.complete(final_nonce, final_hash);
                Applied::Completed
            }
            MiningStatus::Error => {
                let message = non_empty(&report.error)
                    .unwrap_or_else(|| "mining failed".to_string());
                self.fail(FailureOrigin::Authority, message);
                Applied::Failed
            }
        }
    }

    /// Fold a block returned directly by the mining request.
    pub fn apply_mined(&mut self, block: &MinedBlock) -> Applied {
        if !self.status.is_active() {
            return Applied::Ignored;
        }
        self.complete(block.nonce, block.hash.clone());
        Applied::Completed
    }

    /// Fail an active job. Terminal jobs keep their outcome.
    pub fn fail(&mut self, origin: FailureOrigin, message: impl Into<String>) -> Applied {
        if !self.status.is_active() {
            return Applied::Ignored;
        }
        self.status = MiningStatus::Error;
        self.error = Some(JobError {
            origin,
            message: message.into(),
        });
        Applied::Failed
    }

    fn complete(&mut self, final_nonce: u64, final_hash: String) {
        self.status = MiningStatus::Completed;
        self.nonce = Some(final_nonce);
        self.hash = Some(final_hash.clone());
        self.final_nonce = Some(final_nonce);
        self.final_hash = Some(final_hash);
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiningConfig {
    pub poll_interval: Duration,
    /// Consecutive failed polls tolerated before the job is failed locally.
    pub max_poll_failures: u32,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_failures: 1,
        }
    }
}

struct Inner {
    authority: Arc<dyn LedgerAuthority>,
    mempool: Arc<MempoolView>,
    balance: Arc<BalanceView>,
    config: MiningConfig,
    job: Mutex<MiningJob>,
    events: watch::Sender<MiningJob>,
    poller: Mutex<Option<PeriodicTask>>,
    poll_failures: AtomicU32,
}

/// Drives one mining job at a time.
///
/// Cloning yields another handle to the same orchestrator.
#[derive(Clone)]
pub struct MiningOrchestrator {
    inner: Arc<Inner>,
}

impl MiningOrchestrator {
    pub fn new(
        authority: Arc<dyn LedgerAuthority>,
        mempool: Arc<MempoolView>,
        balance: Arc<BalanceView>,
        config: MiningConfig,
    ) -> Self {
        let (events, _) = watch::channel(MiningJob::default());
        Self {
            inner: Arc::new(Inner {
                authority,
                mempool,
                balance,
                config,
                job: Mutex::new(MiningJob::default()),
                events,
                poller: Mutex::new(None),
                poll_failures: AtomicU32::new(0),
            }),
        }
    }

    /// Current job state.
    pub fn job(&self) -> MiningJob {
        self.inner.lock_job().clone()
    }

    /// Receive every published job state. The receiver starts at the latest one.
    pub fn subscribe(&self) -> watch::Receiver<MiningJob> {
        self.inner.events.subscribe()
    }

    /// Wait until the current job has been published as terminal, including
    /// the refreshes that follow completion.
    pub async fn wait_for_terminal(&self) -> MiningJob {
        let mut rx = self.subscribe();
        let result = rx.wait_for(|job| job.status.is_terminal()).await;
        match result {
            Ok(job) => job.clone(),
            Err(_) => self.job(),
        }
    }

    /// Submit the mempool view's current selection.
    pub async fn submit_selected(&self, miner: &WalletAddress) -> Result<MiningJob, WalletError> {
        let selected = self.inner.mempool.selected().await;
        self.submit(miner, &selected).await
    }

    /// Start mining a block with `selected` mempool indices for `miner`.
    ///
    /// Returns once the authority has answered the mining request. That job
    /// may still be running; follow it through [`Self::subscribe`].
    pub async fn submit(
        &self,
        miner: &WalletAddress,
        selected: &[usize],
    ) -> Result<MiningJob, WalletError> {
        validate_submission(miner, selected)?;

        let generation = {
            let mut job = self.inner.lock_job();
            if job.status.is_active() {
                return Err(WalletError::JobInProgress(job.status));
            }
            *job = MiningJob::start(&job, miner.clone(), selected.to_vec());
            job.generation
        };
        self.inner.poll_failures.store(0, Ordering::SeqCst);
        self.inner.publish();
        tracing::info!(
            generation,
            miner = %miner.short(),
            selected = ?selected,
            "mining job submitted"
        );

        self.start_poller(generation);

        let request = MiningRequest {
            miner_address: miner.clone(),
            selected_indices: selected.to_vec(),
        };
        match self.inner.authority.submit_mining_job(&request).await {
            Ok(MiningOutcome::Mined(block)) => {
                let applied = self.inner.apply_if_current(generation, |job| job.apply_mined(&block));
                if applied == Applied::Completed {
                    self.inner.stop_poller();
                    self.inner.on_completed().await;
                }
                Ok(self.job())
            }
            Ok(MiningOutcome::Accepted) => {
                tracing::debug!(generation, "mining job accepted; awaiting progress");
                Ok(self.job())
            }
            Err(e) => {
                let origin = match e {
                    AuthorityError::Rejected(_) => FailureOrigin::Authority,
                    AuthorityError::Transport(_) => FailureOrigin::Local,
                };
                let message = e.to_string();
                let applied =
                    self.inner.apply_if_current(generation, |job| job.fail(origin, message.as_str()));
                if applied == Applied::Failed {
                    self.inner.stop_poller();
                    tracing::warn!(generation, error = %e, "mining request failed");
                    self.inner.publish();
                    return Err(e.into());
                }
                // The poll already saw this job complete; its refreshes may
                // still be running and must not be cut short.
                let job = self.job();
                if job.generation == generation && job.status == MiningStatus::Completed {
                    tracing::debug!(generation, error = %e, "mining request failed after completion");
                    return Ok(job);
                }
                Err(e.into())
            }
        }
    }

    /// Return to `not_started`, dismissing a finished job.
    pub async fn reset(&self) -> Result<(), WalletError> {
        {
            let mut job = self.inner.lock_job();
            if job.status.is_active() {
                return Err(WalletError::ResetNotAllowed(job.status));
            }
            let previous = job
                .final_hash
                .clone()
                .or_else(|| job.previous_final_hash.clone());
            *job = MiningJob::idle(job.generation, previous);
        }
        self.inner.stop_poller();
        self.inner.mempool.clear_selection().await;
        self.inner.publish();
        tracing::debug!("mining job reset");
        Ok(())
    }

    fn start_poller(&self, generation: u64) {
        let weak = Arc::downgrade(&self.inner);
        let task = PeriodicTask::spawn_delayed(
            "mining-progress",
            self.inner.config.poll_interval,
            move || {
                let weak = Weak::clone(&weak);
                async move {
                    match weak.upgrade() {
                        Some(inner) => inner.poll_once(generation).await,
                        None => Tick::Stop,
                    }
                }
            },
        );
        let previous = self
            .inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        // A poller of a terminal job may still be finishing its completion
        // refreshes.
        if let Some(previous) = previous {
            previous.stop();
        }
    }
}

fn validate_submission(miner: &WalletAddress, selected: &[usize]) -> Result<(), WalletError> {
    if miner.is_empty() {
        return Err(WalletError::Validation("miner address is required".into()));
    }
    if selected.is_empty() {
        return Err(WalletError::Validation(
            "select at least one transaction to mine".into(),
        ));
    }
    if selected.len() > MAX_SELECTED {
        return Err(WalletError::Validation(format!(
            "a block holds at most {MAX_SELECTED} selected transactions"
        )));
    }
    for (i, index) in selected.iter().enumerate() {
        if selected[..i].contains(index) {
            return Err(WalletError::Validation(format!(
                "transaction {index} selected twice"
            )));
        }
    }
    Ok(())
}

impl Inner {
    fn lock_job(&self) -> MutexGuard<'_, MiningJob> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self) {
        let job = self.lock_job().clone();
        self.events.send_replace(job);
    }

    fn apply_if_current(&self, generation: u64, f: impl FnOnce(&mut MiningJob) -> Applied) -> Applied {
        let mut job = self.lock_job();
        if job.generation != generation {
            return Applied::Ignored;
        }
        f(&mut job)
    }

    /// End the poll loop. A tick in flight, such as completion refreshes,
    /// runs to the end.
    fn stop_poller(&self) {
        let task = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.stop();
        }
    }

    async fn poll_once(&self, generation: u64) -> Tick {
        {
            let job = self.lock_job();
            if job.generation != generation || !job.status.is_active() {
                return Tick::Stop;
            }
        }

        let report = match self.authority.mining_progress().await {
            Ok(report) => {
                self.poll_failures.store(0, Ordering::SeqCst);
                report
            }
            Err(e) => {
                let failures = self.poll_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures < self.config.max_poll_failures {
                    tracing::warn!(generation, failures, error = %e, "mining progress poll failed");
                    return Tick::Continue;
                }
                let applied = self.apply_if_current(generation, |job| {
                    job.fail(FailureOrigin::Local, e.to_string())
                });
                if applied == Applied::Failed {
                    tracing::warn!(generation, error = %e, "mining progress unavailable; job failed");
                    self.publish();
                }
                return Tick::Stop;
            }
        };

        tracing::debug!(
            generation,
            status = %report.status,
            nonce = ?report.nonce,
            "mining progress"
        );
        match self.apply_if_current(generation, |job| job.apply(&report)) {
            Applied::Ignored => Tick::Continue,
            Applied::Progress => {
                self.publish();
                Tick::Continue
            }
            Applied::Completed => {
                self.on_completed().await;
                Tick::Stop
            }
            Applied::Failed => {
                tracing::warn!(generation, error = ?report.error, "authority reported mining failure");
                self.publish();
                Tick::Stop
            }
        }
    }

    /// Runs once per job, on whichever path observed completion first.
    async fn on_completed(&self) {
        self.mempool.clear_selection().await;
        if let Err(e) = self.mempool.refresh().await {
            tracing::warn!(error = %e, "mempool refresh after mining failed");
        }
        if let Err(e) = self.balance.refresh().await {
            tracing::warn!(error = %e, "balance refresh after mining failed");
        }
        let job = self.lock_job().clone();
        tracing::info!(
            generation = job.generation,
            nonce = ?job.final_nonce,
            hash = ?job.final_hash,
            elapsed_ms = job.elapsed().map(|d| d.as_millis() as u64),
            "block mined"
        );
        self.events.send_replace(job);
    }
}
