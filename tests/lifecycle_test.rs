//! End-to-end lifecycle scenarios.
//!
//! The agent program is a plain `sleep`: a long-lived black box the tests
//! puppet by writing breakpoints into the comm document, exactly the way
//! a real agent would.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

use common::{init_git_repo, plan_with_tasks, test_config, wait_until};
use orchestrate::domain::models::{
    AgentInstance, Breakpoint, CiEvent, CiEventType, LifecycleState, LoopResult, Task, TaskStatus,
};
use orchestrate::domain::ports::CiProvider;
use orchestrate::infrastructure::ci::{LocalCiConfig, LocalCiProvider};
use orchestrate::infrastructure::git::BranchManager;
use orchestrate::infrastructure::process::ProcessSupervisor;
use orchestrate::infrastructure::templates::InstructionGenerator;
use orchestrate::infrastructure::workspace::Workspace;
use orchestrate::services::{
    AgentHandle, CiEventBus, CommBus, LifecycleConfig, LifecycleLoop, LoopContext, Orchestrator,
    PersonaMatcher, PlanModel, SnapshotStore,
};

const WAIT: Duration = Duration::from_secs(10);

struct Fleet {
    orchestrator: Arc<Orchestrator>,
    events: Arc<CiEventBus>,
    ci: Arc<LocalCiProvider>,
    _dir: TempDir,
}

async fn fleet(tasks: Vec<Task>) -> Fleet {
    fleet_with(tasks, |_| {}).await
}

async fn fleet_with(
    tasks: Vec<Task>,
    tweak: impl FnOnce(&mut orchestrate::domain::models::OrchestrationConfig),
) -> Fleet {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    tweak(&mut config);
    std::fs::create_dir_all(&config.repo_path).unwrap();
    init_git_repo(&config.repo_path);

    let events = Arc::new(CiEventBus::new(config.event_history_limit));
    let ci = Arc::new(
        LocalCiProvider::new(
            config.repo_path.clone(),
            config.ci_state_dir.clone(),
            events.clone(),
            LocalCiConfig {
                build_delay: Duration::from_millis(50),
                poll_interval: Duration::from_millis(20),
            },
        )
        .await
        .unwrap(),
    );

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        plan_with_tasks(tasks),
        ci.clone(),
        events.clone(),
    ));
    Fleet {
        orchestrator,
        events,
        ci,
        _dir: dir,
    }
}

/// Wait until an agent's record shows a freshly spawned cycle.
async fn wait_for_working(bus: &Arc<CommBus>, agent: &str) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if let Ok(Some(record)) = bus.get_agent(agent).await {
            if record.lifecycle_state == LifecycleState::Working && record.breakpoint.is_none() {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "agent {agent} never reached a working cycle"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// S2: one task, the agent reports completion, the loop completes the
/// task and exits; the milestone PR is raised.
#[tokio::test]
async fn claim_and_complete() {
    let fleet = fleet(vec![Task::new("T001", "scaffold", "developer")]).await;
    let orchestrator = fleet.orchestrator.clone();

    orchestrator.start().await.unwrap();
    assert_eq!(orchestrator.active_agents(), 1);

    let claimed = orchestrator.plan().get_task_by_id("T001").unwrap();
    assert!(claimed.status.is_assigned(), "status: {}", claimed.status);
    assert_eq!(claimed.assigned_agent.as_deref(), Some("developer-1"));
    assert_eq!(claimed.branch.as_deref(), Some("agent/developer-1/T001"));

    let waiter = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.wait_for_completion().await })
    };

    let bus = orchestrator.bus().clone();
    wait_for_working(&bus, "developer-1").await;

    let agent = AgentHandle::new("developer-1", bus);
    agent.set_done("scaffolding finished").await.unwrap();
    agent
        .announce_breakpoint(
            LifecycleState::Complete,
            Breakpoint::task_complete("T001", "scaffold landed"),
        )
        .await
        .unwrap();

    timeout(WAIT, waiter).await.expect("fleet should drain").unwrap();

    let task = orchestrator.plan().get_task_by_id("T001").unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert!(task.completed_at.is_some());

    // All tasks of the milestone are complete: an integration → main PR
    // must have been raised and recorded.
    let milestone = &orchestrator.plan().milestones()[0];
    assert!(milestone.completed);
    let pr_url = milestone.pr_url.as_deref().expect("milestone pr url");
    assert!(pr_url.starts_with("local://pr/"));

    orchestrator.stop().await;
}

/// S3: an agent blocked on another task resumes after the blocker
/// completes and a CI event arrives.
#[tokio::test]
async fn blocked_agent_unblocks_on_ci_event() {
    let fleet = fleet(vec![
        Task::new("T001", "scaffold", "developer"),
        Task::new("T002", "build on scaffold", "builder"),
    ])
    .await;
    let orchestrator = fleet.orchestrator.clone();

    orchestrator.start().await.unwrap();
    assert_eq!(orchestrator.active_agents(), 2);

    let waiter = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.wait_for_completion().await })
    };

    let bus = orchestrator.bus().clone();
    // Personas are spawned in sorted role order: builder-1, developer-2.
    wait_for_working(&bus, "builder-1").await;
    wait_for_working(&bus, "developer-2").await;

    // The builder discovers at runtime it needs T001 first.
    let builder = AgentHandle::new("builder-1", bus.clone());
    builder
        .announce_breakpoint(
            LifecycleState::Blocked,
            Breakpoint::blocked("T002", vec!["T001".into()], "needs the scaffold"),
        )
        .await
        .unwrap();

    // The developer finishes the blocker.
    let developer = AgentHandle::new("developer-2", bus.clone());
    developer
        .announce_breakpoint(
            LifecycleState::Complete,
            Breakpoint::task_complete("T001", "scaffold done"),
        )
        .await
        .unwrap();

    let plan = fleet.orchestrator.plan().clone();
    let done = wait_until(WAIT, || {
        plan.get_task_by_id("T001")
            .map(|t| t.status == TaskStatus::Complete)
            .unwrap_or(false)
    })
    .await;
    assert!(done, "T001 never completed");

    // A CI event wakes the blocked loop ahead of its retry interval.
    fleet
        .events
        .emit(CiEvent::build(CiEventType::BuildSuccess, 1, "integration"));

    // The builder gets a fresh process for T002.
    wait_for_working(&bus, "builder-1").await;
    builder
        .announce_breakpoint(
            LifecycleState::Complete,
            Breakpoint::task_complete("T002", "built"),
        )
        .await
        .unwrap();

    timeout(WAIT, waiter).await.expect("fleet should drain").unwrap();

    for id in ["T001", "T002"] {
        let task = orchestrator.plan().get_task_by_id(id).unwrap();
        assert_eq!(task.status, TaskStatus::Complete, "{id}");
    }
    orchestrator.stop().await;
}

/// S4: a PR breakpoint holds the loop until the PR merges, then the task
/// completes.
#[tokio::test]
async fn pr_created_and_merged() {
    let fleet = fleet(vec![Task::new("T001", "scaffold", "developer")]).await;
    let orchestrator = fleet.orchestrator.clone();

    orchestrator.start().await.unwrap();
    let waiter = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.wait_for_completion().await })
    };

    let bus = orchestrator.bus().clone();
    wait_for_working(&bus, "developer-1").await;

    // The agent opened PR #1 for its branch before stopping.
    let info = fleet
        .ci
        .create_pr(orchestrate::domain::models::PrRequest {
            title: "T001".into(),
            body: String::new(),
            source_branch: "agent/developer-1/T001".into(),
            target_branch: "integration".into(),
        })
        .await
        .unwrap();
    assert_eq!(info.url, "local://pr/1");

    let agent = AgentHandle::new("developer-1", bus);
    agent
        .announce_breakpoint(
            LifecycleState::PrPending,
            Breakpoint::pr_created("T001", "local://pr/1"),
        )
        .await
        .unwrap();

    // Wait until the loop has registered the PR, then merge externally.
    let plan = fleet.orchestrator.plan().clone();
    let pending = wait_until(WAIT, || {
        plan.get_task_by_id("T001")
            .map(|t| t.status == TaskStatus::PrPending)
            .unwrap_or(false)
    })
    .await;
    assert!(pending, "task never reached pr_pending");

    fleet.ci.merge_pr(1).await.unwrap();

    timeout(WAIT, waiter).await.expect("fleet should drain").unwrap();

    let task = orchestrator.plan().get_task_by_id("T001").unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.pr_url.as_deref(), Some("local://pr/1"));
    orchestrator.stop().await;
}

struct LoopParts {
    lifecycle: LifecycleLoop,
    running: Arc<AtomicBool>,
    bus: Arc<CommBus>,
    _dir: TempDir,
}

/// Build a lifecycle loop directly so tests can inspect its result.
async fn direct_loop(agent_program: &str, agent_args: &[&str], max_retries: u32) -> LoopParts {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    std::fs::create_dir_all(&config.repo_path).unwrap();
    init_git_repo(&config.repo_path);

    let plan = Arc::new(PlanModel::new(plan_with_tasks(vec![Task::new(
        "T001",
        "scaffold",
        "developer",
    )])));
    let matcher = Arc::new(PersonaMatcher::new(plan.clone()));
    let bus = Arc::new(CommBus::new(config.comm_file.clone()));
    let events = Arc::new(CiEventBus::default());
    let ci = Arc::new(
        LocalCiProvider::new(
            config.repo_path.clone(),
            config.ci_state_dir.clone(),
            events.clone(),
            LocalCiConfig::default(),
        )
        .await
        .unwrap(),
    );
    let branches = Arc::new(BranchManager::new(
        config.repo_path.clone(),
        config.integration_branch.clone(),
    ));

    let branch = branches.create_agent_branch("developer-1", "T001").await.unwrap();
    matcher.claim_task("T001", "developer-1", &branch.name).unwrap();

    let persona = plan.get_persona_by_role("developer").unwrap();
    let agent = AgentInstance::new("developer-1", persona, &branch.name, "T001");

    let running = Arc::new(AtomicBool::new(true));
    let lifecycle = LifecycleLoop::new(
        agent,
        LoopContext {
            bus: bus.clone(),
            matcher,
            ci,
            events,
            supervisor: Arc::new(ProcessSupervisor::new(100)),
            workspace: Arc::new(Workspace::new(config.sandbox_base_dir.clone())),
            branches,
            snapshots: Arc::new(SnapshotStore::new(config.snapshot_dir.clone())),
            instructions: Arc::new(InstructionGenerator::new(&config.comm_file)),
        },
        LifecycleConfig {
            breakpoint_check_interval: Duration::from_millis(50),
            retry_interval: Duration::from_millis(100),
            max_retries,
            pr_merge_timeout: Duration::from_secs(5),
            process_timeout: Duration::from_secs(30),
            terminate_grace: Duration::from_millis(500),
            agent_command: orchestrate::domain::models::AgentCommandConfig {
                program: agent_program.into(),
                args: agent_args.iter().map(|s| s.to_string()).collect(),
            },
        },
        running.clone(),
    );
    LoopParts {
        lifecycle,
        running,
        bus,
        _dir: dir,
    }
}

/// S5: an agent that keeps exiting without a breakpoint exhausts its
/// retry budget.
#[tokio::test]
async fn max_retries_exhausted() {
    let parts = direct_loop("true", &[], 3).await;
    let (agent, result) = timeout(WAIT, parts.lifecycle.run())
        .await
        .expect("loop should exit");

    assert_eq!(result, LoopResult::MaxRetries { retry_count: 3 });
    assert_eq!(agent.retry_count, 3);
    assert_eq!(agent.spawn_count, 3, "one spawn per retry cycle");
}

/// Boundary: a zero retry budget fails after the first attempt.
#[tokio::test]
async fn zero_max_retries_fails_immediately() {
    let parts = direct_loop("true", &[], 0).await;
    let (agent, result) = timeout(WAIT, parts.lifecycle.run())
        .await
        .expect("loop should exit");

    assert_eq!(result, LoopResult::MaxRetries { retry_count: 1 });
    assert_eq!(agent.spawn_count, 1);
}

/// The concurrency cap is enforced at spawn time.
#[tokio::test]
async fn concurrency_cap_bounds_spawns() {
    let fleet = fleet_with(
        vec![
            Task::new("T001", "scaffold", "developer"),
            Task::new("T002", "ci", "developer"),
        ],
        |config| config.max_concurrent_agents = 1,
    )
    .await;
    let orchestrator = fleet.orchestrator.clone();

    orchestrator.start().await.unwrap();
    assert_eq!(orchestrator.active_agents(), 1);

    let err = orchestrator.spawn_agent("developer", "T002").await.unwrap_err();
    assert!(matches!(
        err,
        orchestrate::domain::OrchestrationError::AgentSpawn { .. }
    ));

    orchestrator.stop().await;
}

/// After a loop exhausts its retries, the orchestrator releases the
/// claim so the task is not wedged forever.
#[tokio::test]
async fn failed_loop_releases_claim() {
    let fleet = fleet_with(vec![Task::new("T001", "scaffold", "developer")], |config| {
        // The agent exits instantly without a breakpoint.
        config.agent.program = "true".into();
        config.agent.args = vec![];
        config.max_retries = 2;
    })
    .await;
    let orchestrator = fleet.orchestrator.clone();

    orchestrator.start().await.unwrap();
    timeout(WAIT, orchestrator.wait_for_completion())
        .await
        .expect("failing fleet should drain");

    let task = orchestrator.plan().get_task_by_id("T001").unwrap();
    assert_eq!(task.status, TaskStatus::Available);
    assert!(task.assigned_agent.is_none());
    orchestrator.stop().await;
}

/// An external shutdown is honored at the next checkpoint.
#[tokio::test]
async fn shutdown_exits_cleanly() {
    let parts = direct_loop("sleep", &["300"], 100).await;
    let running = parts.running.clone();
    let bus = parts.bus.clone();

    let handle = tokio::spawn(parts.lifecycle.run());
    wait_for_working(&bus, "developer-1").await;

    running.store(false, Ordering::SeqCst);

    let (_, result) = timeout(WAIT, handle)
        .await
        .expect("loop should observe shutdown")
        .unwrap();
    assert_eq!(result, LoopResult::Shutdown);
}
