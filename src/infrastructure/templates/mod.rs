//! Text assembly for agent-facing files.

pub mod instructions;

pub use instructions::InstructionGenerator;
