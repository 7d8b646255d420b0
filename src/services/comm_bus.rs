//! Shared communications bus.
//!
//! Serialized, last-writer-wins access to the on-disk communications
//! document, plus the mailbox helpers the agents use to exchange requests
//! and deliveries. Every mutation runs read-modify-write under a single
//! in-process mutex and lands on disk through a sibling temp file renamed
//! over the real path, so readers never observe a torn document.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::{
    AgentRecord, CommDocument, DeliveryEntry, PendingRequest, RequestEntry,
};

/// Handle to the shared communications document.
///
/// Cheap to clone behind an `Arc`; all instances sharing one `CommBus`
/// value serialize their mutations through its mutex.
pub struct CommBus {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CommBus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole document, materializing a fresh one on first access.
    pub async fn read_raw(&self) -> OrchestrationResult<CommDocument> {
        let _guard = self.lock.lock().await;
        self.load_or_init("read_raw").await
    }

    /// Fetch one agent's record, if present.
    pub async fn get_agent(&self, name: &str) -> OrchestrationResult<Option<AgentRecord>> {
        let doc = self.read_raw().await?;
        Ok(doc.agents.get(name).cloned())
    }

    /// All agent records keyed by name (`_meta` excluded by construction).
    pub async fn get_all_agents(
        &self,
    ) -> OrchestrationResult<std::collections::BTreeMap<String, AgentRecord>> {
        let doc = self.read_raw().await?;
        Ok(doc.agents)
    }

    /// Replace an agent's record wholesale.
    pub async fn update_agent(&self, name: &str, record: AgentRecord) -> OrchestrationResult<()> {
        self.mutate(name, "update_agent", |doc| {
            doc.agents.insert(name.to_string(), record);
            true
        })
        .await
    }

    /// Update one field of an agent's record, creating the agent with
    /// defaults if absent.
    pub async fn update_field(
        &self,
        name: &str,
        field: &str,
        value: &str,
    ) -> OrchestrationResult<()> {
        let field_name = field.to_string();
        let value = value.to_string();
        self.mutate(name, "update_field", move |doc| {
            let record = doc.agents.entry(name.to_string()).or_default();
            match field_name.as_str() {
                "mission" => record.mission = value.clone(),
                "workingOn" | "working_on" => record.working_on = value.clone(),
                "done" => record.done = value.clone(),
                "next" => record.next = value.clone(),
                other => {
                    warn!(agent = name, field = other, "ignoring unknown comm field");
                    return false;
                }
            }
            true
        })
        .await
    }

    /// Record a request from one agent to another.
    pub async fn add_request(&self, from: &str, to: &str, text: &str) -> OrchestrationResult<()> {
        let entry = RequestEntry(to.to_string(), text.to_string());
        self.mutate(from, "add_request", move |doc| {
            doc.agents
                .entry(from.to_string())
                .or_default()
                .requests
                .push(entry.clone());
            true
        })
        .await
    }

    /// Every request addressed to `target`, across all senders.
    pub async fn get_requests_for_agent(
        &self,
        target: &str,
    ) -> OrchestrationResult<Vec<PendingRequest>> {
        let doc = self.read_raw().await?;
        let mut pending = Vec::new();
        for (sender, record) in &doc.agents {
            for request in &record.requests {
                if request.to_agent() == target {
                    pending.push(PendingRequest {
                        from_agent: sender.clone(),
                        request: request.text().to_string(),
                    });
                }
            }
        }
        Ok(pending)
    }

    /// Mark a request fulfilled: remove it from the requester's outbound
    /// queue and record the delivery in the requester's `added` list.
    ///
    /// Idempotent: when no matching entry remains, nothing is written.
    pub async fn complete_request(
        &self,
        completer: &str,
        requester: &str,
        original: &str,
        description: &str,
    ) -> OrchestrationResult<()> {
        self.mutate(completer, "complete_request", move |doc| {
            let Some(record) = doc.agents.get_mut(requester) else {
                debug!(requester, "complete_request: requester has no record");
                return false;
            };
            let before = record.requests.len();
            record
                .requests
                .retain(|r| !(r.to_agent() == completer && r.text() == original));
            if record.requests.len() == before {
                debug!(
                    completer,
                    requester, "complete_request: no matching request, skipping"
                );
                return false;
            }
            record.added.push(DeliveryEntry(
                completer.to_string(),
                description.to_string(),
                original.to_string(),
            ));
            true
        })
        .await
    }

    /// Drop all acknowledged deliveries for an agent.
    pub async fn clear_added(&self, name: &str) -> OrchestrationResult<()> {
        self.mutate(name, "clear_added", move |doc| {
            match doc.agents.get_mut(name) {
                Some(record) if !record.added.is_empty() => {
                    record.added.clear();
                    true
                }
                _ => false,
            }
        })
        .await
    }

    /// Withdraw a previously issued request.
    pub async fn remove_request(&self, from: &str, to: &str, text: &str) -> OrchestrationResult<()> {
        self.mutate(from, "remove_request", move |doc| {
            let Some(record) = doc.agents.get_mut(from) else {
                return false;
            };
            let before = record.requests.len();
            record
                .requests
                .retain(|r| !(r.to_agent() == to && r.text() == text));
            record.requests.len() != before
        })
        .await
    }

    /// Remove an agent's record entirely.
    pub async fn remove_agent(&self, name: &str) -> OrchestrationResult<()> {
        self.mutate(name, "remove_agent", move |doc| {
            doc.agents.remove(name).is_some()
        })
        .await
    }

    /// Reset the document to its pristine state.
    pub async fn reset(&self) -> OrchestrationResult<()> {
        let _guard = self.lock.lock().await;
        let doc = CommDocument::default();
        self.write_document(&doc, "reset", None).await
    }

    /// Content hash of the serialized document, for change detection.
    pub async fn file_hash(&self) -> OrchestrationResult<String> {
        let _guard = self.lock.lock().await;
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Hash the document a first access would materialize.
                let doc = CommDocument::default();
                serde_json::to_vec_pretty(&doc).map_err(|e| {
                    OrchestrationError::communication("file_hash", None, e.to_string())
                })?
            }
            Err(e) => {
                return Err(OrchestrationError::communication(
                    "file_hash",
                    None,
                    e.to_string(),
                ))
            }
        };
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }

    /// Run one read-modify-write cycle. The closure returns whether it
    /// changed the document; unchanged documents are not rewritten and the
    /// meta block is left untouched.
    async fn mutate<F>(&self, author: &str, operation: &str, apply: F) -> OrchestrationResult<()>
    where
        F: FnOnce(&mut CommDocument) -> bool,
    {
        let _guard = self.lock.lock().await;
        let mut doc = self.load_or_init(operation).await?;
        if !apply(&mut doc) {
            return Ok(());
        }
        doc.stamp(author);
        self.write_document(&doc, operation, Some(author)).await
    }

    /// Load the document, creating it with defaults when absent. A file
    /// that exists but does not parse is a hard error, never truncated.
    async fn load_or_init(&self, operation: &str) -> OrchestrationResult<CommDocument> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                OrchestrationError::communication(
                    operation,
                    None,
                    format!("malformed comm document at {}: {e}", self.path.display()),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let doc = CommDocument::default();
                self.write_document(&doc, operation, None).await?;
                Ok(doc)
            }
            Err(e) => Err(OrchestrationError::communication(
                operation,
                None,
                e.to_string(),
            )),
        }
    }

    /// Scoped write: serialize to a sibling temp file, then rename over
    /// the real path so concurrent readers see old-or-new, never partial.
    async fn write_document(
        &self,
        doc: &CommDocument,
        operation: &str,
        agent: Option<&str>,
    ) -> OrchestrationResult<()> {
        let comm_err =
            |msg: String| OrchestrationError::communication(operation, agent, msg);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| comm_err(e.to_string()))?;
            }
        }

        let bytes = serde_json::to_vec_pretty(doc).map_err(|e| comm_err(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| comm_err(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| comm_err(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bus(dir: &TempDir) -> CommBus {
        CommBus::new(dir.path().join("comms.json"))
    }

    #[tokio::test]
    async fn test_first_access_materializes_document() {
        let dir = TempDir::new().unwrap();
        let bus = bus(&dir);

        let doc = bus.read_raw().await.unwrap();
        assert_eq!(doc.meta.version, "1.0");
        assert!(doc.meta.last_updated.is_none());
        assert!(doc.meta.last_updated_by.is_none());
        assert!(bus.path().exists());
    }

    #[tokio::test]
    async fn test_update_field_creates_agent_and_stamps_meta() {
        let dir = TempDir::new().unwrap();
        let bus = bus(&dir);

        bus.update_field("builder", "workingOn", "the UI").await.unwrap();

        let doc = bus.read_raw().await.unwrap();
        assert_eq!(doc.agents["builder"].working_on, "the UI");
        assert_eq!(doc.meta.last_updated_by.as_deref(), Some("builder"));
        assert!(doc.meta.last_updated.is_some());
        assert!(doc.agents["builder"].last_updated.is_some());
    }

    #[tokio::test]
    async fn test_request_flow_and_idempotent_completion() {
        let dir = TempDir::new().unwrap();
        let bus = bus(&dir);

        bus.add_request("builder", "designer", "mockups please")
            .await
            .unwrap();

        let pending = bus.get_requests_for_agent("designer").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].from_agent, "builder");
        assert_eq!(pending[0].request, "mockups please");

        bus.complete_request("designer", "builder", "mockups please", "done, see designs/")
            .await
            .unwrap();

        let builder = bus.get_agent("builder").await.unwrap().unwrap();
        assert!(builder.requests.is_empty());
        assert_eq!(builder.added.len(), 1);
        assert_eq!(builder.added[0].from_agent(), "designer");
        assert_eq!(builder.added[0].original_request(), "mockups please");

        let doc = bus.read_raw().await.unwrap();
        assert_eq!(doc.meta.last_updated_by.as_deref(), Some("designer"));

        // A second identical completion finds no matching entry and must
        // not append another delivery.
        bus.complete_request("designer", "builder", "mockups please", "done, see designs/")
            .await
            .unwrap();
        let builder = bus.get_agent("builder").await.unwrap().unwrap();
        assert_eq!(builder.added.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_request_and_agent() {
        let dir = TempDir::new().unwrap();
        let bus = bus(&dir);

        bus.add_request("builder", "designer", "a").await.unwrap();
        bus.add_request("builder", "designer", "b").await.unwrap();
        bus.remove_request("builder", "designer", "a").await.unwrap();

        let builder = bus.get_agent("builder").await.unwrap().unwrap();
        assert_eq!(builder.requests.len(), 1);
        assert_eq!(builder.requests[0].text(), "b");

        bus.remove_agent("builder").await.unwrap();
        assert!(bus.get_agent("builder").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_restores_pristine_document() {
        let dir = TempDir::new().unwrap();
        let bus = bus(&dir);

        bus.update_field("builder", "mission", "build").await.unwrap();
        bus.reset().await.unwrap();

        let doc = bus.read_raw().await.unwrap();
        assert!(doc.agents.is_empty());
        assert!(doc.meta.last_updated_by.is_none());
    }

    #[tokio::test]
    async fn test_file_hash_changes_with_content() {
        let dir = TempDir::new().unwrap();
        let bus = bus(&dir);

        let h1 = bus.file_hash().await.unwrap();
        bus.update_field("builder", "done", "scaffolding").await.unwrap();
        let h2 = bus.file_hash().await.unwrap();
        assert_ne!(h1, h2);

        let h3 = bus.file_hash().await.unwrap();
        assert_eq!(h2, h3);
    }

    #[tokio::test]
    async fn test_malformed_document_is_fatal_not_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("comms.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let bus = CommBus::new(&path);
        let err = bus.read_raw().await.unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::Communication { .. }
        ));

        // The broken file must survive untouched.
        let bytes = tokio::fs::read(&path).await.unwrap();
        assert_eq!(bytes, b"{ not json");
    }

    #[tokio::test]
    async fn test_get_all_agents_excludes_meta() {
        let dir = TempDir::new().unwrap();
        let bus = bus(&dir);

        bus.update_field("builder", "mission", "build").await.unwrap();
        bus.update_field("designer", "mission", "design").await.unwrap();

        let agents = bus.get_all_agents().await.unwrap();
        assert_eq!(agents.len(), 2);
        assert!(agents.contains_key("builder"));
        assert!(!agents.contains_key("_meta"));
    }

    #[tokio::test]
    async fn test_legacy_keys_rewritten_camel_case() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("comms.json");
        let legacy = serde_json::json!({
            "_meta": {"version": "1.0", "last_updated": null, "last_updated_by": null},
            "builder": {"mission": "m", "working_on": "legacy", "lifecycle_state": "working"}
        });
        tokio::fs::write(&path, serde_json::to_vec(&legacy).unwrap())
            .await
            .unwrap();

        let bus = CommBus::new(&path);
        let record = bus.get_agent("builder").await.unwrap().unwrap();
        assert_eq!(record.working_on, "legacy");

        bus.update_field("builder", "done", "x").await.unwrap();
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(text.contains("\"workingOn\""));
        assert!(!text.contains("\"working_on\""));
    }
}
