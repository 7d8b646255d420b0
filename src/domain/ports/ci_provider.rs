//! CI provider port.
//!
//! The orchestration core drives builds and pull requests through this
//! trait; the crate ships a local git-only implementation in
//! `infrastructure::ci`. A hosted integration would implement the same
//! surface.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::errors::OrchestrationResult;
use crate::domain::models::{BuildStatus, PrInfo, PrRequest};

/// Operations a CI backend must support.
///
/// Bounded waits fail with [`crate::domain::errors::OrchestrationError::Timeout`]
/// without discarding the run or PR, so callers may retry. Every state
/// transition must be mirrored as a [`crate::domain::models::CiEvent`] on
/// the provider's event bus.
#[async_trait]
pub trait CiProvider: Send + Sync {
    /// Provider name used in error context.
    fn name(&self) -> &str;

    /// Start a build for a branch. The branch must exist.
    async fn trigger_build(&self, branch: &str) -> OrchestrationResult<BuildStatus>;

    /// Current status of a build run.
    async fn build_status(&self, run_id: u64) -> OrchestrationResult<BuildStatus>;

    /// Wait for a build to reach a terminal state.
    async fn wait_for_build(&self, run_id: u64, timeout: Duration)
        -> OrchestrationResult<BuildStatus>;

    /// Open a pull request.
    async fn create_pr(&self, request: PrRequest) -> OrchestrationResult<PrInfo>;

    /// Current status of a pull request.
    async fn pr_status(&self, number: u64) -> OrchestrationResult<PrInfo>;

    /// Merge a pull request into its target branch.
    async fn merge_pr(&self, number: u64) -> OrchestrationResult<PrInfo>;

    /// Wait for a pull request to be merged (possibly by someone else).
    async fn wait_for_pr_merge(
        &self,
        number: u64,
        timeout: Duration,
    ) -> OrchestrationResult<PrInfo>;
}
