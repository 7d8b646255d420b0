//! Subprocess supervision.

pub mod supervisor;

pub use supervisor::{AgentCommand, OutputLine, OutputStream, ProcessSupervisor};
