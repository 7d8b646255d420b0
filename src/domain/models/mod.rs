//! Domain models
//!
//! Pure domain entities with business logic and validation rules. These
//! models are framework-agnostic and contain no infrastructure concerns.

pub mod agent;
pub mod ci;
pub mod comms;
pub mod config;
pub mod plan;
pub mod snapshot;

pub use agent::{AgentInstance, AgentState, Breakpoint, BreakpointType, LoopResult};
pub use ci::{
    BuildState, BuildStatus, CiEvent, CiEventType, PrDescriptor, PrInfo, PrRequest, PrState,
};
pub use comms::{
    AgentRecord, CommDocument, Delivery, DeliveryEntry, LifecycleState, Meta, PendingRequest,
    RequestEntry, COMM_DOC_VERSION,
};
pub use config::{AgentCommandConfig, LoggingConfig, OrchestrationConfig};
pub use plan::{Epic, Milestone, Persona, ProjectPlan, Story, Task, TaskStatus};
pub use snapshot::ContextSnapshot;
