//! Agent-side facade over the comm bus.
//!
//! Wraps a [`CommBus`] with the operations a single agent performs under
//! its own name: status fields, outbound requests, deliveries, and
//! breakpoint announcements. The interactive REPL and the test harnesses
//! drive agents through this handle.

use std::sync::Arc;

use crate::domain::errors::OrchestrationResult;
use crate::domain::models::{
    AgentRecord, Breakpoint, Delivery, LifecycleState, PendingRequest,
};
use crate::services::comm_bus::CommBus;

/// One agent's view of the shared document.
#[derive(Clone)]
pub struct AgentHandle {
    name: String,
    bus: Arc<CommBus>,
}

impl AgentHandle {
    pub fn new(name: impl Into<String>, bus: Arc<CommBus>) -> Self {
        Self {
            name: name.into(),
            bus,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Arc<CommBus> {
        &self.bus
    }

    pub async fn set_mission(&self, text: &str) -> OrchestrationResult<()> {
        self.bus.update_field(&self.name, "mission", text).await
    }

    pub async fn set_working_on(&self, text: &str) -> OrchestrationResult<()> {
        self.bus.update_field(&self.name, "workingOn", text).await
    }

    pub async fn set_done(&self, text: &str) -> OrchestrationResult<()> {
        self.bus.update_field(&self.name, "done", text).await
    }

    pub async fn set_next(&self, text: &str) -> OrchestrationResult<()> {
        self.bus.update_field(&self.name, "next", text).await
    }

    /// Ask another agent for something.
    pub async fn request(&self, to: &str, text: &str) -> OrchestrationResult<()> {
        self.bus.add_request(&self.name, to, text).await
    }

    /// Requests other agents have addressed to this one.
    pub async fn pending_requests(&self) -> OrchestrationResult<Vec<PendingRequest>> {
        self.bus.get_requests_for_agent(&self.name).await
    }

    /// Fulfil a request this agent received from `requester`.
    pub async fn complete_request(
        &self,
        requester: &str,
        original: &str,
        description: &str,
    ) -> OrchestrationResult<()> {
        self.bus
            .complete_request(&self.name, requester, original, description)
            .await
    }

    /// Deliveries other agents have completed for this one.
    pub async fn my_deliveries(&self) -> OrchestrationResult<Vec<Delivery>> {
        let record = self.record().await?;
        Ok(record
            .added
            .iter()
            .map(|d| Delivery {
                from_agent: d.from_agent().to_string(),
                description: d.description().to_string(),
                original_request: d.original_request().to_string(),
            })
            .collect())
    }

    /// Acknowledge (and drop) all received deliveries.
    pub async fn acknowledge_deliveries(&self) -> OrchestrationResult<()> {
        self.bus.clear_added(&self.name).await
    }

    /// Publish a breakpoint: lifecycle state and breakpoint value land in
    /// one record update so pollers never see them half-written.
    pub async fn announce_breakpoint(
        &self,
        state: LifecycleState,
        breakpoint: Breakpoint,
    ) -> OrchestrationResult<()> {
        let mut record = self.record().await?;
        record.lifecycle_state = state;
        record.breakpoint = Some(breakpoint);
        self.bus.update_agent(&self.name, record).await
    }

    /// This agent's record, defaulted if it does not exist yet.
    pub async fn record(&self) -> OrchestrationResult<AgentRecord> {
        Ok(self.bus.get_agent(&self.name).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::BreakpointType;
    use tempfile::TempDir;

    fn handles(dir: &TempDir) -> (AgentHandle, AgentHandle) {
        let bus = Arc::new(CommBus::new(dir.path().join("comms.json")));
        (
            AgentHandle::new("designer", bus.clone()),
            AgentHandle::new("builder", bus),
        )
    }

    #[tokio::test]
    async fn test_request_deliver_flow() {
        let dir = TempDir::new().unwrap();
        let (designer, builder) = handles(&dir);

        builder.set_mission("Build UI").await.unwrap();
        builder
            .request("designer", "Please create the UI design mockups")
            .await
            .unwrap();

        let pending = designer.pending_requests().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].from_agent, "builder");
        assert_eq!(pending[0].request, "Please create the UI design mockups");

        designer
            .complete_request(
                "builder",
                "Please create the UI design mockups",
                "Mockups completed! See designs/ui-mockups.pdf",
            )
            .await
            .unwrap();

        let deliveries = builder.my_deliveries().await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].from_agent, "designer");
        assert_eq!(
            deliveries[0].description,
            "Mockups completed! See designs/ui-mockups.pdf"
        );
        assert_eq!(
            deliveries[0].original_request,
            "Please create the UI design mockups"
        );
        assert!(builder.pending_requests().await.unwrap().is_empty());

        builder.acknowledge_deliveries().await.unwrap();
        assert!(builder.my_deliveries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_announce_breakpoint_sets_both_fields() {
        let dir = TempDir::new().unwrap();
        let (_, builder) = handles(&dir);

        builder.set_working_on("T001").await.unwrap();
        builder
            .announce_breakpoint(
                LifecycleState::Complete,
                Breakpoint::task_complete("T001", "scaffold landed"),
            )
            .await
            .unwrap();

        let record = builder.record().await.unwrap();
        assert!(record.has_breakpoint());
        assert_eq!(record.working_on, "T001");
        assert_eq!(
            record.breakpoint.unwrap().kind,
            BreakpointType::TaskComplete
        );
    }
}
