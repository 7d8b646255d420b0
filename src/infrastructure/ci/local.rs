//! Local git-only CI provider.
//!
//! Reference implementation of the [`CiProvider`] port for single-host
//! operation: run ids and PR numbers are fabricated monotonically, builds
//! are simulated (RUNNING → SUCCESS after a fixed delay), PR descriptors
//! persist as per-PR JSON files in a state directory, and merges are real
//! git merges. Every transition is mirrored on the shared event bus.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::{
    BuildState, BuildStatus, CiEvent, CiEventType, PrDescriptor, PrInfo, PrRequest, PrState,
};
use crate::domain::ports::CiProvider;
use crate::infrastructure::git;
use crate::services::event_bus::CiEventBus;

const PROVIDER_NAME: &str = "local";

/// Tuning knobs for the local provider.
#[derive(Debug, Clone)]
pub struct LocalCiConfig {
    /// Simulated build duration.
    pub build_delay: Duration,
    /// Poll cadence for the bounded waits.
    pub poll_interval: Duration,
}

impl Default for LocalCiConfig {
    fn default() -> Self {
        Self {
            build_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Git-backed local CI provider.
pub struct LocalCiProvider {
    repo: PathBuf,
    state_dir: PathBuf,
    events: Arc<CiEventBus>,
    config: LocalCiConfig,
    builds: Arc<Mutex<HashMap<u64, BuildStatus>>>,
    next_run: AtomicU64,
    next_pr: AtomicU64,
}

impl LocalCiProvider {
    /// Create the provider, re-seeding the PR counter from any descriptors
    /// already in the state directory so numbers stay monotonic across
    /// restarts.
    pub async fn new(
        repo: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
        events: Arc<CiEventBus>,
        config: LocalCiConfig,
    ) -> OrchestrationResult<Self> {
        let state_dir = state_dir.into();
        tokio::fs::create_dir_all(&state_dir)
            .await
            .map_err(|e| OrchestrationError::ci(PROVIDER_NAME, "init", e.to_string()))?;

        let mut highest = 0u64;
        let mut entries = tokio::fs::read_dir(&state_dir)
            .await
            .map_err(|e| OrchestrationError::ci(PROVIDER_NAME, "init", e.to_string()))?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(number) = pr_number_from_file(&entry.path()) {
                highest = highest.max(number);
            }
        }
        if highest > 0 {
            debug!(highest, "resuming PR numbering from state directory");
        }

        Ok(Self {
            repo: repo.into(),
            state_dir,
            events,
            config,
            builds: Arc::new(Mutex::new(HashMap::new())),
            next_run: AtomicU64::new(1),
            next_pr: AtomicU64::new(highest + 1),
        })
    }

    pub fn pr_url(number: u64) -> String {
        format!("local://pr/{number}")
    }

    /// The event bus this provider publishes transitions on.
    pub fn event_bus(&self) -> &Arc<CiEventBus> {
        &self.events
    }

    fn descriptor_path(&self, number: u64) -> PathBuf {
        self.state_dir.join(format!("pr-{number}.json"))
    }

    async fn load_descriptor(&self, number: u64) -> OrchestrationResult<PrDescriptor> {
        let path = self.descriptor_path(number);
        let bytes = tokio::fs::read(&path).await.map_err(|_| {
            OrchestrationError::ci(
                PROVIDER_NAME,
                "pr_status",
                format!("unknown pull request {number}"),
            )
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| OrchestrationError::ci(PROVIDER_NAME, "pr_status", e.to_string()))
    }

    async fn store_descriptor(&self, descriptor: &PrDescriptor) -> OrchestrationResult<()> {
        let path = self.descriptor_path(descriptor.info.number);
        let bytes = serde_json::to_vec_pretty(descriptor)
            .map_err(|e| OrchestrationError::ci(PROVIDER_NAME, "persist_pr", e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| OrchestrationError::ci(PROVIDER_NAME, "persist_pr", e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| OrchestrationError::ci(PROVIDER_NAME, "persist_pr", e.to_string()))
    }

    async fn require_branch(&self, branch: &str, operation: &str) -> OrchestrationResult<()> {
        if git::branch_exists(&self.repo, branch).await {
            Ok(())
        } else {
            Err(OrchestrationError::ci(
                PROVIDER_NAME,
                operation,
                format!("branch {branch} does not exist"),
            ))
        }
    }
}

#[async_trait]
impl CiProvider for LocalCiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn trigger_build(&self, branch: &str) -> OrchestrationResult<BuildStatus> {
        self.require_branch(branch, "trigger_build").await?;

        let run_id = self.next_run.fetch_add(1, Ordering::SeqCst);
        let status = BuildStatus {
            run_id,
            branch: branch.to_string(),
            state: BuildState::Running,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.builds.lock().await.insert(run_id, status.clone());
        self.events
            .emit(CiEvent::build(CiEventType::BuildStarted, run_id, branch));
        info!(run_id, branch, "build started");

        // Simulated build: flips to SUCCESS after the configured delay.
        let delay = self.config.build_delay;
        let events = self.events.clone();
        let branch = branch.to_string();
        let builds = self.builds.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut builds = builds.lock().await;
                if let Some(status) = builds.get_mut(&run_id) {
                    status.state = BuildState::Success;
                    status.finished_at = Some(Utc::now());
                }
            }
            events.emit(CiEvent::build(CiEventType::BuildSuccess, run_id, &branch));
            info!(run_id, branch = %branch, "build succeeded");
        });

        Ok(status)
    }

    async fn build_status(&self, run_id: u64) -> OrchestrationResult<BuildStatus> {
        self.builds.lock().await.get(&run_id).cloned().ok_or_else(|| {
            OrchestrationError::ci(
                PROVIDER_NAME,
                "build_status",
                format!("unknown build run {run_id}"),
            )
        })
    }

    async fn wait_for_build(
        &self,
        run_id: u64,
        timeout: Duration,
    ) -> OrchestrationResult<BuildStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.build_status(run_id).await?;
            if status.state.is_terminal() {
                return Ok(status);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(OrchestrationError::timeout(
                    "wait_for_build",
                    timeout.as_millis() as u64,
                ));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn create_pr(&self, request: PrRequest) -> OrchestrationResult<PrInfo> {
        self.require_branch(&request.source_branch, "create_pr").await?;
        self.require_branch(&request.target_branch, "create_pr").await?;

        let number = self.next_pr.fetch_add(1, Ordering::SeqCst);
        let info = PrInfo {
            number,
            title: request.title,
            source_branch: request.source_branch.clone(),
            target_branch: request.target_branch,
            state: PrState::Open,
            url: Self::pr_url(number),
            created_at: Utc::now(),
            merged_at: None,
        };
        self.store_descriptor(&PrDescriptor {
            info: info.clone(),
            body: request.body,
        })
        .await?;
        self.events.emit(CiEvent::pull_request(
            CiEventType::PrOpened,
            number,
            &request.source_branch,
        ));
        info!(number, source = %info.source_branch, target = %info.target_branch, "pull request opened");
        Ok(info)
    }

    async fn pr_status(&self, number: u64) -> OrchestrationResult<PrInfo> {
        Ok(self.load_descriptor(number).await?.info)
    }

    async fn merge_pr(&self, number: u64) -> OrchestrationResult<PrInfo> {
        let mut descriptor = self.load_descriptor(number).await?;
        if descriptor.info.state == PrState::Merged {
            return Ok(descriptor.info);
        }
        if descriptor.info.state == PrState::Closed {
            return Err(OrchestrationError::ci(
                PROVIDER_NAME,
                "merge_pr",
                format!("pull request {number} is closed"),
            ));
        }

        // Real merge into the target branch.
        git::run_git(&self.repo, "merge_pr", &["checkout", &descriptor.info.target_branch])
            .await
            .map_err(|e| OrchestrationError::ci(PROVIDER_NAME, "merge_pr", e.to_string()))?;
        git::run_git(
            &self.repo,
            "merge_pr",
            &[
                "merge",
                "--no-ff",
                "--no-edit",
                "-m",
                &format!("Merge pull request #{number}"),
                &descriptor.info.source_branch,
            ],
        )
        .await
        .map_err(|e| OrchestrationError::ci(PROVIDER_NAME, "merge_pr", e.to_string()))?;

        descriptor.info.state = PrState::Merged;
        descriptor.info.merged_at = Some(Utc::now());
        self.store_descriptor(&descriptor).await?;
        self.events.emit(CiEvent::pull_request(
            CiEventType::PrMerged,
            number,
            &descriptor.info.source_branch,
        ));
        info!(number, "pull request merged");
        Ok(descriptor.info)
    }

    async fn wait_for_pr_merge(
        &self,
        number: u64,
        timeout: Duration,
    ) -> OrchestrationResult<PrInfo> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Re-read from disk every cycle: the merge may happen in
            // another process sharing the state directory.
            let info = self.pr_status(number).await?;
            if info.is_merged() {
                return Ok(info);
            }
            if info.state == PrState::Closed {
                return Err(OrchestrationError::ci(
                    PROVIDER_NAME,
                    "wait_for_pr_merge",
                    format!("pull request {number} was closed without merging"),
                ));
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(number, "pr merge wait expired");
                return Err(OrchestrationError::timeout(
                    "wait_for_pr_merge",
                    timeout.as_millis() as u64,
                ));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

fn pr_number_from_file(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_prefix("pr-")?.strip_suffix(".json")?;
    stem.parse().ok()
}
