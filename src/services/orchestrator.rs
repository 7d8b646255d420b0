//! Composition root.
//!
//! Builds the shared services from configuration, spawns one lifecycle
//! loop per claimed task, reacts to loop results (milestone PRs,
//! replacement spawns, claim release), and owns shutdown. Loop results
//! flow back over a channel so the orchestrator never holds a lock across
//! a long wait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::{
    AgentInstance, LoopResult, OrchestrationConfig, PrRequest, ProjectPlan,
};
use crate::domain::ports::CiProvider;
use crate::infrastructure::git::BranchManager;
use crate::infrastructure::process::ProcessSupervisor;
use crate::infrastructure::templates::InstructionGenerator;
use crate::infrastructure::workspace::Workspace;
use crate::services::comm_bus::CommBus;
use crate::services::event_bus::CiEventBus;
use crate::services::lifecycle::{LifecycleConfig, LifecycleLoop, LoopContext};
use crate::services::persona_matcher::PersonaMatcher;
use crate::services::plan_model::PlanModel;
use crate::services::snapshot::SnapshotStore;

type LoopOutput = (AgentInstance, LoopResult);

/// Drives the whole fleet against one plan.
pub struct Orchestrator {
    config: OrchestrationConfig,
    plan: Arc<PlanModel>,
    matcher: Arc<PersonaMatcher>,
    bus: Arc<CommBus>,
    events: Arc<CiEventBus>,
    ci: Arc<dyn CiProvider>,
    supervisor: Arc<ProcessSupervisor>,
    workspace: Arc<Workspace>,
    branches: Arc<BranchManager>,
    snapshots: Arc<SnapshotStore>,
    instructions: Arc<InstructionGenerator>,
    running: Arc<AtomicBool>,
    active_count: AtomicUsize,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
    results_tx: mpsc::UnboundedSender<LoopOutput>,
    results_rx: Mutex<mpsc::UnboundedReceiver<LoopOutput>>,
    spawn_seq: AtomicU64,
}

impl Orchestrator {
    /// Assemble the fleet services from a validated plan and a CI provider.
    pub fn new(
        config: OrchestrationConfig,
        plan: ProjectPlan,
        ci: Arc<dyn CiProvider>,
        events: Arc<CiEventBus>,
    ) -> Self {
        let plan = Arc::new(PlanModel::new(plan));
        let matcher = Arc::new(PersonaMatcher::new(plan.clone()));
        let bus = Arc::new(CommBus::new(config.comm_file.clone()));
        let supervisor = Arc::new(ProcessSupervisor::new(config.output_capture_limit));
        let workspace = Arc::new(Workspace::new(config.sandbox_base_dir.clone()));
        let branches = Arc::new(BranchManager::new(
            config.repo_path.clone(),
            config.integration_branch.clone(),
        ));
        let snapshots = Arc::new(SnapshotStore::new(config.snapshot_dir.clone()));
        let instructions = Arc::new(InstructionGenerator::new(&config.comm_file));
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        Self {
            config,
            plan,
            matcher,
            bus,
            events,
            ci,
            supervisor,
            workspace,
            branches,
            snapshots,
            instructions,
            running: Arc::new(AtomicBool::new(false)),
            active_count: AtomicUsize::new(0),
            handles: Mutex::new(HashMap::new()),
            results_tx,
            results_rx: Mutex::new(results_rx),
            spawn_seq: AtomicU64::new(1),
        }
    }

    pub fn plan(&self) -> &Arc<PlanModel> {
        &self.plan
    }

    pub fn matcher(&self) -> &Arc<PersonaMatcher> {
        &self.matcher
    }

    pub fn bus(&self) -> &Arc<CommBus> {
        &self.bus
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn active_agents(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            breakpoint_check_interval: self.config.breakpoint_check_interval(),
            retry_interval: self.config.retry_interval(),
            max_retries: self.config.max_retries,
            pr_merge_timeout: self.config.pr_merge_timeout(),
            process_timeout: self.config.process_timeout(),
            terminate_grace: std::time::Duration::from_millis(5_000),
            agent_command: self.config.agent.clone(),
        }
    }

    /// Mark the fleet running and, when auto-spawn is on, start one agent
    /// per persona role from the head of its claimable queue.
    #[instrument(skip(self))]
    pub async fn start(&self) -> OrchestrationResult<()> {
        self.running.store(true, Ordering::SeqCst);
        info!(auto_spawn = self.config.auto_spawn, "orchestrator started");

        if !self.config.auto_spawn {
            return Ok(());
        }
        for persona in self.plan.personas() {
            if self.active_agents() >= self.config.max_concurrent_agents {
                info!("concurrency cap reached during auto-spawn");
                break;
            }
            let Some(task) = self.matcher.get_claimable_tasks(&persona.role).into_iter().next()
            else {
                continue;
            };
            if let Err(e) = self.spawn_agent(&persona.role, &task.id).await {
                // A failed spawn leaves the role idle; the next completed
                // loop triggers a replacement attempt.
                warn!(role = %persona.role, task_id = %task.id, error = %e, "auto-spawn failed");
            }
        }
        Ok(())
    }

    /// Launch one lifecycle loop for (role, task).
    #[instrument(skip(self))]
    pub async fn spawn_agent(&self, role: &str, task_id: &str) -> OrchestrationResult<String> {
        if self.active_agents() >= self.config.max_concurrent_agents {
            return Err(OrchestrationError::AgentSpawn {
                agent_id: None,
                task_id: Some(task_id.to_string()),
                message: format!(
                    "concurrency cap {} reached",
                    self.config.max_concurrent_agents
                ),
            });
        }
        let persona = self.plan.get_persona_by_role(role).ok_or_else(|| {
            OrchestrationError::AgentSpawn {
                agent_id: None,
                task_id: Some(task_id.to_string()),
                message: format!("no persona for role {role}"),
            }
        })?;
        if self.plan.get_task_by_id(task_id).is_none() {
            return Err(OrchestrationError::AgentSpawn {
                agent_id: None,
                task_id: Some(task_id.to_string()),
                message: "task is not in the plan".into(),
            });
        }

        let agent_id = format!("{role}-{}", self.spawn_seq.fetch_add(1, Ordering::SeqCst));
        let branch = self.branches.create_agent_branch(&agent_id, task_id).await?;
        self.matcher.claim_task(task_id, &agent_id, &branch.name)?;

        let agent = AgentInstance::new(&agent_id, persona, &branch.name, task_id);
        let lifecycle = LifecycleLoop::new(
            agent,
            LoopContext {
                bus: self.bus.clone(),
                matcher: self.matcher.clone(),
                ci: self.ci.clone(),
                events: self.events.clone(),
                supervisor: self.supervisor.clone(),
                workspace: self.workspace.clone(),
                branches: self.branches.clone(),
                snapshots: self.snapshots.clone(),
                instructions: self.instructions.clone(),
            },
            self.lifecycle_config(),
            self.running.clone(),
        );

        let results_tx = self.results_tx.clone();
        let handle = tokio::spawn(async move {
            let output = lifecycle.run().await;
            let _ = results_tx.send(output);
        });

        self.active_count.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().await.insert(agent_id.clone(), handle);
        info!(agent_id = %agent_id, task_id, "agent spawned");
        Ok(agent_id)
    }

    /// Await every active loop, reacting to each result as it lands.
    pub async fn wait_for_completion(&self) {
        while self.active_agents() > 0 {
            let output = {
                let mut rx = self.results_rx.lock().await;
                rx.recv().await
            };
            let Some((agent, result)) = output else {
                break;
            };
            self.active_count.fetch_sub(1, Ordering::SeqCst);
            self.handle_loop_result(agent, result).await;
        }
    }

    async fn handle_loop_result(&self, agent: AgentInstance, result: LoopResult) {
        info!(agent_id = %agent.agent_id, result = ?result, "lifecycle loop result");
        self.handles.lock().await.remove(&agent.agent_id);
        self.supervisor.forget(&agent.agent_id);

        let successful = matches!(
            result,
            LoopResult::TaskComplete { .. } | LoopResult::PrCreated { merged: true, .. }
        );

        match &result {
            LoopResult::TaskComplete { .. } | LoopResult::PrCreated { merged: true, .. } => {
                self.check_milestones().await;
            }
            LoopResult::MaxRetries { .. }
            | LoopResult::Error { .. }
            | LoopResult::PrCreated { merged: false, .. } => {
                // Release the claim so another agent can pick the task up;
                // a wedged plan is worse than a retried task.
                if let Some(task_id) = &agent.current_task_id {
                    match self.matcher.release_task(task_id) {
                        Ok(()) => info!(task_id = %task_id, "claim released after failed loop"),
                        Err(e) => warn!(task_id = %task_id, error = %e, "claim release failed"),
                    }
                }
            }
            LoopResult::Shutdown => return,
        }

        // Replacement spawns follow successful loops only: respawning a
        // role whose loop just burned its retry budget on a released task
        // would cycle forever.
        if successful && self.is_running() {
            self.try_replacement_spawn(&agent.role).await;
        }
    }

    /// Spawn a fresh agent for a role that just lost one, when there is
    /// claimable work left.
    async fn try_replacement_spawn(&self, role: &str) {
        let Some(task) = self.matcher.get_claimable_tasks(role).into_iter().next() else {
            return;
        };
        match self.spawn_agent(role, &task.id).await {
            Ok(agent_id) => {
                info!(agent_id = %agent_id, role, task_id = %task.id, "replacement agent spawned");
            }
            Err(e) => {
                warn!(role, error = %e, "replacement spawn failed");
            }
        }
    }

    /// Raise integration → main PRs for milestones that just completed.
    async fn check_milestones(&self) {
        for milestone in self.plan.milestones() {
            if milestone.completed || !self.plan.is_milestone_complete(&milestone.id) {
                continue;
            }
            info!(milestone = %milestone.id, "milestone complete, opening pr");
            let title = if milestone.title.is_empty() {
                format!("Milestone {}", milestone.id)
            } else {
                format!("Milestone {}: {}", milestone.id, milestone.title)
            };
            let request = PrRequest {
                title,
                body: format!(
                    "All epics for milestone {} are complete: {}.",
                    milestone.id,
                    milestone
                        .epic_ids
                        .join(", ")
                ),
                source_branch: self.config.integration_branch.clone(),
                target_branch: self.config.main_branch.clone(),
            };
            match self.ci.create_pr(request).await {
                Ok(info) => {
                    if let Err(e) = self
                        .plan
                        .mark_milestone_complete(&milestone.id, Some(info.url.clone()))
                    {
                        error!(milestone = %milestone.id, error = %e, "failed to record milestone");
                    }
                }
                Err(e) => {
                    error!(milestone = %milestone.id, error = %e, "milestone pr failed");
                }
            }
        }
    }

    /// Stop the fleet: flag every loop down, terminate processes, clean
    /// sandboxes, clear bookkeeping.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.supervisor
            .terminate_all(std::time::Duration::from_millis(5_000))
            .await;
        if let Err(e) = self.workspace.cleanup_all().await {
            warn!(error = %e, "sandbox cleanup failed");
        }

        let mut handles = self.handles.lock().await;
        for (agent_id, handle) in handles.drain() {
            handle.abort();
            tracing::debug!(agent_id = %agent_id, "lifecycle task aborted");
        }
        self.active_count.store(0, Ordering::SeqCst);
        info!("orchestrator stopped");
    }
}
