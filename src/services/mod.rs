//! Application services: the coordination core.

pub mod agent_handle;
pub mod comm_bus;
pub mod event_bus;
pub mod lifecycle;
pub mod orchestrator;
pub mod persona_matcher;
pub mod plan_model;
pub mod snapshot;
pub mod watcher;

pub use agent_handle::AgentHandle;
pub use comm_bus::CommBus;
pub use event_bus::{CiEventBus, EventFilter, EventSubscription};
pub use lifecycle::{extract_pr_number, LifecycleConfig, LifecycleLoop, LoopContext};
pub use orchestrator::Orchestrator;
pub use persona_matcher::{PersonaMatcher, TaskStats};
pub use plan_model::PlanModel;
pub use snapshot::SnapshotStore;
pub use watcher::{ChangeNotice, CommWatcher};
