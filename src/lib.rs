//! Orchestrate - agent fleet coordination core
//!
//! Coordinates a fleet of externally-spawned code-authoring agent
//! processes against a hierarchically decomposed project plan:
//! - Plan graph with role-typed task claiming and dependency gating
//! - Persona lifecycle loops that respawn fresh agent processes at every
//!   natural breakpoint, seeded from written snapshots
//! - A shared JSON communications document with atomic writes and
//!   change fanout
//! - CI event routing that unblocks waiting agents

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export the most commonly used types for convenience.
pub use domain::errors::{OrchestrationError, OrchestrationResult};
pub use domain::models::OrchestrationConfig;
pub use services::{AgentHandle, CommBus, Orchestrator};
