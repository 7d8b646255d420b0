//! CI provider implementations.

pub mod local;

pub use local::{LocalCiConfig, LocalCiProvider};
