//! Per-agent lifecycle loop.
//!
//! Drives one agent through snapshot → fresh spawn → breakpoint →
//! dispatch cycles until its role runs out of tasks, its retry budget is
//! exhausted, or the orchestrator shuts down. Every spawn is a new
//! process with new context: nothing survives a respawn except the
//! snapshot and the comm document, which is what defeats context
//! degradation in long-running agents.

use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::{
    AgentCommandConfig, AgentInstance, AgentState, Breakpoint, BreakpointType, LifecycleState,
    LoopResult,
};
use crate::domain::ports::CiProvider;
use crate::infrastructure::git::BranchManager;
use crate::infrastructure::process::{AgentCommand, ProcessSupervisor};
use crate::infrastructure::templates::InstructionGenerator;
use crate::infrastructure::workspace::Workspace;
use crate::services::comm_bus::CommBus;
use crate::services::event_bus::{CiEventBus, EventFilter};
use crate::services::persona_matcher::PersonaMatcher;
use crate::services::snapshot::SnapshotStore;

/// Loop tuning, usually derived from
/// [`crate::domain::models::OrchestrationConfig`].
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub breakpoint_check_interval: Duration,
    pub retry_interval: Duration,
    pub max_retries: u32,
    pub pr_merge_timeout: Duration,
    pub process_timeout: Duration,
    pub terminate_grace: Duration,
    pub agent_command: AgentCommandConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            breakpoint_check_interval: Duration::from_millis(2_000),
            retry_interval: Duration::from_millis(5_000),
            max_retries: 100,
            pr_merge_timeout: Duration::from_millis(600_000),
            process_timeout: Duration::from_millis(300_000),
            terminate_grace: Duration::from_millis(5_000),
            agent_command: AgentCommandConfig::default(),
        }
    }
}

/// Shared collaborators the loop drives.
pub struct LoopContext {
    pub bus: Arc<CommBus>,
    pub matcher: Arc<PersonaMatcher>,
    pub ci: Arc<dyn CiProvider>,
    pub events: Arc<CiEventBus>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub workspace: Arc<Workspace>,
    pub branches: Arc<BranchManager>,
    pub snapshots: Arc<SnapshotStore>,
    pub instructions: Arc<InstructionGenerator>,
}

enum Cycle {
    /// Respawn: same task after error/unblock, or a freshly claimed one.
    Continue,
    Finished(LoopResult),
}

/// One agent's finite-state driver. Owns the [`AgentInstance`] for its
/// lifetime and hands it back with the loop result.
pub struct LifecycleLoop {
    agent: AgentInstance,
    ctx: LoopContext,
    config: LifecycleConfig,
    running: Arc<AtomicBool>,
    tasks_completed: u32,
}

impl LifecycleLoop {
    pub fn new(
        agent: AgentInstance,
        ctx: LoopContext,
        config: LifecycleConfig,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            agent,
            ctx,
            config,
            running,
            tasks_completed: 0,
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Drive the agent to a terminal result.
    #[instrument(skip(self), fields(agent_id = %self.agent.agent_id, role = %self.agent.role))]
    pub async fn run(mut self) -> (AgentInstance, LoopResult) {
        loop {
            if !self.is_running() {
                self.terminate_process().await;
                return self.finish(LoopResult::Shutdown);
            }
            let Some(task_id) = self.agent.current_task_id.clone() else {
                let result = LoopResult::Error {
                    message: "loop started without a current task".into(),
                };
                return self.finish(result);
            };

            match self.work_cycle(&task_id).await {
                Ok(Cycle::Continue) => continue,
                Ok(Cycle::Finished(result)) => return self.finish(result),
                Err(e) => {
                    self.terminate_process().await;
                    self.agent.retry_count += 1;
                    warn!(
                        agent_id = %self.agent.agent_id,
                        task_id = %task_id,
                        retry_count = self.agent.retry_count,
                        error = %e,
                        "lifecycle cycle failed, retrying"
                    );
                    if self.agent.retry_count >= self.config.max_retries {
                        let result = LoopResult::MaxRetries {
                            retry_count: self.agent.retry_count,
                        };
                        return self.finish(result);
                    }
                }
            }
        }
    }

    fn finish(mut self, result: LoopResult) -> (AgentInstance, LoopResult) {
        self.agent.touch();
        info!(agent_id = %self.agent.agent_id, result = ?result, "lifecycle loop finished");
        (self.agent, result)
    }

    /// snapshot → sandbox → spawn → breakpoint → dispatch.
    async fn work_cycle(&mut self, task_id: &str) -> OrchestrationResult<Cycle> {
        let summary = self.capture_snapshot(task_id).await;
        self.prepare_and_spawn(task_id, summary.as_deref()).await?;

        let breakpoint = match self.await_breakpoint(task_id).await? {
            Some(bp) => bp,
            None => return Ok(Cycle::Finished(LoopResult::Shutdown)),
        };

        self.agent.breakpoint = Some(breakpoint.clone());
        match breakpoint.kind {
            BreakpointType::TaskComplete => self.on_task_complete(task_id).await,
            BreakpointType::Blocked => self.on_blocked(task_id, breakpoint).await,
            BreakpointType::PrCreated => self.on_pr_created(task_id, breakpoint).await,
        }
    }

    /// Best effort: a failed capture costs the next spawn its summary, not
    /// the whole cycle.
    async fn capture_snapshot(&self, task_id: &str) -> Option<String> {
        match self
            .ctx
            .snapshots
            .capture(
                &self.agent.agent_id,
                task_id,
                &self.agent.branch,
                self.ctx.branches.repo(),
                &self.ctx.bus,
            )
            .await
        {
            Ok(snapshot) => {
                if let Err(e) = self.ctx.snapshots.save(&snapshot).await {
                    warn!(agent_id = %self.agent.agent_id, error = %e, "snapshot save failed");
                }
                Some(snapshot.summary).filter(|s| !s.is_empty())
            }
            Err(e) => {
                warn!(agent_id = %self.agent.agent_id, error = %e, "snapshot capture failed");
                None
            }
        }
    }

    async fn prepare_and_spawn(
        &mut self,
        task_id: &str,
        fresh_summary: Option<&str>,
    ) -> OrchestrationResult<()> {
        let agent_id = self.agent.agent_id.clone();
        let task = self
            .ctx
            .matcher
            .plan()
            .get_task_by_id(task_id)
            .ok_or_else(|| {
                OrchestrationError::lifecycle(
                    Some(&agent_id),
                    Some(self.agent.state.as_str()),
                    format!("current task {task_id} is not in the plan"),
                )
            })?;

        let sandbox = self.ctx.workspace.create_sandbox(&agent_id, false).await?;

        // The freshest summary wins: the one captured now, else the last
        // persisted snapshot for this (agent, task).
        let stored = match fresh_summary {
            Some(_) => None,
            None => self
                .ctx
                .snapshots
                .latest(&agent_id, task_id)
                .await
                .ok()
                .flatten()
                .map(|s| s.summary),
        };
        let summary = fresh_summary.or(stored.as_deref().filter(|s| !s.is_empty()));

        let content = self.ctx.instructions.render(
            &agent_id,
            &self.agent.persona,
            &task,
            &self.agent.branch,
            summary,
        );
        self.ctx.workspace.inject_claude_md(&agent_id, &content).await?;

        // Reset the comm record so the poller never reads a stale
        // breakpoint from the previous cycle.
        let mut record = self
            .ctx
            .bus
            .get_agent(&agent_id)
            .await?
            .unwrap_or_default();
        record.lifecycle_state = LifecycleState::Working;
        record.breakpoint = None;
        self.ctx.bus.update_agent(&agent_id, record).await?;

        let mut env = HashMap::new();
        env.insert(
            "ORCHESTRATION_COMM_FILE".to_string(),
            self.ctx.bus.path().display().to_string(),
        );
        env.insert("ORCHESTRATION_AGENT_ID".to_string(), agent_id.clone());
        env.insert("ORCHESTRATION_TASK_ID".to_string(), task_id.to_string());
        env.insert(
            "ORCHESTRATION_BRANCH".to_string(),
            self.agent.branch.clone(),
        );

        self.ctx
            .supervisor
            .spawn(
                &agent_id,
                AgentCommand {
                    program: self.config.agent_command.program.clone(),
                    args: self.config.agent_command.args.clone(),
                    workdir: sandbox,
                    prompt: content,
                    env,
                },
                None,
            )
            .await?;

        self.agent.spawn_count += 1;
        self.agent.state = AgentState::Working;
        self.agent.touch();
        // Claimed → InProgress on the first spawn; later spawns find the
        // task already in progress.
        if let Err(e) = self.ctx.matcher.plan().mark_in_progress(task_id) {
            debug!(agent_id = %agent_id, task_id, error = %e, "task already past claimed");
        }
        debug!(agent_id = %agent_id, task_id, spawn_count = self.agent.spawn_count, "agent spawned");
        Ok(())
    }

    /// Poll the agent's comm record until it presents a breakpoint.
    /// `Ok(None)` means shutdown was requested.
    async fn await_breakpoint(&mut self, task_id: &str) -> OrchestrationResult<Option<Breakpoint>> {
        let started = Instant::now();
        loop {
            if !self.is_running() {
                self.terminate_process().await;
                return Ok(None);
            }

            let record = self.ctx.bus.get_agent(&self.agent.agent_id).await?;
            if let Some(record) = record {
                if record.has_breakpoint() {
                    // has_breakpoint guarantees the field is set
                    if let Some(bp) = record.breakpoint {
                        debug!(agent_id = %self.agent.agent_id, kind = ?bp.kind, "breakpoint observed");
                        return Ok(Some(bp));
                    }
                }
            }

            if !self.ctx.supervisor.is_running(&self.agent.agent_id) {
                return Err(OrchestrationError::lifecycle(
                    Some(&self.agent.agent_id),
                    Some(self.agent.state.as_str()),
                    format!(
                        "agent process exited without a breakpoint (task {task_id}, exit code {:?})",
                        self.ctx.supervisor.exit_code(&self.agent.agent_id)
                    ),
                ));
            }

            if started.elapsed() >= self.config.process_timeout {
                self.terminate_process().await;
                return Err(OrchestrationError::timeout(
                    "await_breakpoint",
                    self.config.process_timeout.as_millis() as u64,
                ));
            }

            tokio::time::sleep(self.config.breakpoint_check_interval).await;
        }
    }

    async fn on_task_complete(&mut self, task_id: &str) -> OrchestrationResult<Cycle> {
        self.terminate_process().await;
        self.ctx.matcher.complete_task(task_id)?;
        self.tasks_completed += 1;
        info!(agent_id = %self.agent.agent_id, task_id, "task completed");

        self.next_task_or_finish(LoopResult::TaskComplete {
            tasks_completed: self.tasks_completed,
        })
        .await
    }

    async fn on_blocked(
        &mut self,
        task_id: &str,
        breakpoint: Breakpoint,
    ) -> OrchestrationResult<Cycle> {
        if breakpoint.blocked_on.is_empty() {
            return Err(OrchestrationError::lifecycle(
                Some(&self.agent.agent_id),
                Some("blocked"),
                "blocked breakpoint without blockers",
            ));
        }
        self.terminate_process().await;

        self.agent.state = AgentState::Blocked;
        self.agent.blocked_on = breakpoint.blocked_on.clone();
        info!(
            agent_id = %self.agent.agent_id,
            task_id,
            blocked_on = ?self.agent.blocked_on,
            "agent blocked, waiting for blockers"
        );

        // CI events are only consulted here: any event wakes the loop for
        // a recheck ahead of the retry interval.
        let mut subscription = self.ctx.events.subscribe(EventFilter::all());
        let result = loop {
            if !self.is_running() {
                break Cycle::Finished(LoopResult::Shutdown);
            }
            if self.blockers_resolved() {
                break Cycle::Continue;
            }

            tokio::select! {
                event = subscription.receiver.recv() => {
                    if let Some(event) = event {
                        debug!(agent_id = %self.agent.agent_id, event = %event.event_type, "ci event during unblock wait");
                    }
                }
                _ = tokio::time::sleep(self.config.retry_interval) => {}
            }

            if self.blockers_resolved() {
                break Cycle::Continue;
            }
            self.agent.retry_count += 1;
            debug!(
                agent_id = %self.agent.agent_id,
                retry_count = self.agent.retry_count,
                "blockers unresolved after wait cycle"
            );
            if self.agent.retry_count >= self.config.max_retries {
                break Cycle::Finished(LoopResult::MaxRetries {
                    retry_count: self.agent.retry_count,
                });
            }
        };
        self.ctx.events.unsubscribe(subscription.id);

        if matches!(result, Cycle::Continue) {
            info!(agent_id = %self.agent.agent_id, task_id, "blockers resolved, resuming");
            self.agent.state = AgentState::Working;
            self.agent.blocked_on.clear();
        }
        Ok(result)
    }

    fn blockers_resolved(&self) -> bool {
        let completed = self.ctx.matcher.plan().completed_task_ids();
        self.agent
            .blocked_on
            .iter()
            .all(|id| completed.contains(id))
    }

    async fn on_pr_created(
        &mut self,
        task_id: &str,
        breakpoint: Breakpoint,
    ) -> OrchestrationResult<Cycle> {
        let Some(pr_url) = breakpoint.pr_url else {
            return Err(OrchestrationError::lifecycle(
                Some(&self.agent.agent_id),
                Some("pr_pending"),
                "pr_created breakpoint without a pr url",
            ));
        };
        self.terminate_process().await;

        self.agent.state = AgentState::PrPending;
        self.agent.pr_url = Some(pr_url.clone());
        self.ctx.matcher.set_task_pr(task_id, &pr_url)?;

        let Some(number) = extract_pr_number(&pr_url) else {
            warn!(agent_id = %self.agent.agent_id, pr_url = %pr_url, "cannot extract pr number");
            return Ok(Cycle::Finished(LoopResult::PrCreated {
                pr_url,
                merged: false,
            }));
        };

        info!(agent_id = %self.agent.agent_id, task_id, number, "waiting for pr merge");
        match self
            .ctx
            .ci
            .wait_for_pr_merge(number, self.config.pr_merge_timeout)
            .await
        {
            Ok(info) if info.is_merged() => {
                self.ctx.matcher.complete_task(task_id)?;
                self.tasks_completed += 1;
                self.next_task_or_finish(LoopResult::PrCreated {
                    pr_url,
                    merged: true,
                })
                .await
            }
            Ok(_) | Err(OrchestrationError::Timeout { .. }) => {
                warn!(agent_id = %self.agent.agent_id, number, "pr not merged in time");
                Ok(Cycle::Finished(LoopResult::PrCreated {
                    pr_url,
                    merged: false,
                }))
            }
            Err(e) => {
                warn!(agent_id = %self.agent.agent_id, number, error = %e, "pr merge wait failed");
                Ok(Cycle::Finished(LoopResult::PrCreated {
                    pr_url,
                    merged: false,
                }))
            }
        }
    }

    /// Claim the next available task for this role, or finish with
    /// `result` and a COMPLETE agent state.
    async fn next_task_or_finish(&mut self, result: LoopResult) -> OrchestrationResult<Cycle> {
        let agent_id = self.agent.agent_id.clone();
        for candidate in self.ctx.matcher.get_claimable_tasks(&self.agent.role) {
            let branch = self
                .ctx
                .branches
                .create_agent_branch(&agent_id, &candidate.id)
                .await?;
            match self
                .ctx
                .matcher
                .claim_task(&candidate.id, &agent_id, &branch.name)
            {
                Ok(task) => {
                    info!(agent_id = %agent_id, task_id = %task.id, "continuing with next task");
                    self.agent.current_task_id = Some(task.id);
                    self.agent.branch = branch.name;
                    self.agent.state = AgentState::Working;
                    self.agent.blocked_on.clear();
                    self.agent.pr_url = None;
                    self.agent.breakpoint = None;
                    return Ok(Cycle::Continue);
                }
                Err(e) => {
                    // Lost the race to another loop; try the next one.
                    debug!(agent_id = %agent_id, task_id = %candidate.id, error = %e, "claim lost");
                }
            }
        }

        self.agent.state = AgentState::Complete;
        self.agent.current_task_id = None;
        Ok(Cycle::Finished(result))
    }

    async fn terminate_process(&self) {
        if let Err(e) = self
            .ctx
            .supervisor
            .terminate(&self.agent.agent_id, self.config.terminate_grace)
            .await
        {
            warn!(agent_id = %self.agent.agent_id, error = %e, "terminate failed");
        }
    }
}

/// Extract a PR number from a PR URL: hosted `/pull/<N>` paths and the
/// local provider's `local://pr/<N>` scheme.
pub fn extract_pr_number(url: &str) -> Option<u64> {
    static HOSTED: OnceLock<Regex> = OnceLock::new();
    static LOCAL: OnceLock<Regex> = OnceLock::new();
    let hosted = HOSTED.get_or_init(|| Regex::new(r"/pull/(\d+)").unwrap());
    let local = LOCAL.get_or_init(|| Regex::new(r"^local://pr/(\d+)$").unwrap());

    hosted
        .captures(url)
        .or_else(|| local.captures(url))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
