//! Comm document change watcher.
//!
//! Watches the comm file through filesystem notifications, debounces
//! bursts, and fans each real change out to registered listeners — except
//! the agent that authored the change, identified by `_meta.lastUpdatedBy`.
//! Listeners are unbounded channels, so delivery per listener is FIFO and
//! a slow listener never stalls the fanout.

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::CommDocument;
use crate::services::comm_bus::CommBus;

/// What listeners receive for each observed change.
#[derive(Debug, Clone)]
pub struct ChangeNotice {
    /// Author of the change, from `_meta.lastUpdatedBy`.
    pub updated_by: Option<String>,
    /// The document version that triggered the notice (or a later one).
    pub document: CommDocument,
}

struct Shared {
    bus: Arc<CommBus>,
    listeners: StdMutex<HashMap<String, mpsc::UnboundedSender<ChangeNotice>>>,
}

impl Shared {
    fn fan_out(&self, notice: &ChangeNotice) {
        let mut dead = Vec::new();
        {
            let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            for (name, tx) in listeners.iter() {
                if notice.updated_by.as_deref() == Some(name.as_str()) {
                    debug!(agent = %name, "suppressing self-notification");
                    continue;
                }
                if tx.send(notice.clone()).is_err() {
                    dead.push(name.clone());
                }
            }
        }
        if !dead.is_empty() {
            let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            for name in dead {
                warn!(agent = %name, "listener channel closed, unregistering");
                listeners.remove(&name);
            }
        }
    }
}

/// Filesystem-driven change watcher over the comm document.
pub struct CommWatcher {
    shared: Arc<Shared>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    // Keeps the notify backend alive for the watcher's lifetime.
    _fs_watcher: RecommendedWatcher,
}

impl CommWatcher {
    /// Start watching. The comm file is materialized first so its parent
    /// directory exists and the initial hash is well defined.
    pub async fn start(
        bus: Arc<CommBus>,
        debounce: std::time::Duration,
    ) -> OrchestrationResult<Self> {
        bus.read_raw().await?;
        let initial_hash = bus.file_hash().await?;

        let (raw_tx, raw_rx) = mpsc::channel::<()>(32);
        let watch_dir = bus
            .path()
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| std::path::PathBuf::from("."));
        let file_name = bus.path().file_name().map(|n| n.to_os_string());

        let mut fs_watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                let Ok(event) = res else { return };
                // Only the comm file itself is interesting; events with no
                // paths are passed through and squelched by the hash check.
                let relevant = event.paths.is_empty()
                    || event.paths.iter().any(|p| {
                        p.file_name() == file_name.as_deref()
                    });
                if relevant {
                    let _ = raw_tx.blocking_send(());
                }
            })
            .map_err(|e| {
                OrchestrationError::communication("watch", None, e.to_string())
            })?;
        fs_watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| OrchestrationError::communication("watch", None, e.to_string()))?;

        let shared = Arc::new(Shared {
            bus,
            listeners: StdMutex::new(HashMap::new()),
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(watch_loop(
            shared.clone(),
            raw_rx,
            shutdown_rx,
            debounce.max(std::time::Duration::from_millis(20)),
            initial_hash,
        ));

        Ok(Self {
            shared,
            shutdown: Some(shutdown_tx),
            task: Some(task),
            _fs_watcher: fs_watcher,
        })
    }

    /// Register a listener. Changes authored under `name` are not echoed
    /// back to it.
    pub fn register(&self, name: &str) -> mpsc::UnboundedReceiver<ChangeNotice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), tx);
        rx
    }

    pub fn unregister(&self, name: &str) {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }

    /// Stop the watcher task and wait for it to wind down.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn watch_loop(
    shared: Arc<Shared>,
    mut raw_rx: mpsc::Receiver<()>,
    mut shutdown_rx: oneshot::Receiver<()>,
    debounce: std::time::Duration,
    mut last_hash: String,
) {
    loop {
        tokio::select! {
            maybe = raw_rx.recv() => {
                if maybe.is_none() {
                    debug!("notify channel closed, watcher loop exiting");
                    return;
                }
                // Debounce: keep absorbing events until the file has been
                // quiet for the debounce window.
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(debounce) => break,
                        more = raw_rx.recv() => {
                            if more.is_none() {
                                break;
                            }
                        }
                    }
                }
                process_change(&shared, &mut last_hash).await;
            }
            _ = &mut shutdown_rx => {
                debug!("watcher shutdown requested");
                return;
            }
        }
    }
}

async fn process_change(shared: &Arc<Shared>, last_hash: &mut String) {
    let hash = match shared.bus.file_hash().await {
        Ok(hash) => hash,
        Err(e) => {
            warn!(error = %e, "failed to hash comm document, skipping change");
            return;
        }
    };
    if hash == *last_hash {
        return;
    }
    *last_hash = hash;

    let document = match shared.bus.read_raw().await {
        Ok(doc) => doc,
        Err(e) => {
            warn!(error = %e, "failed to read comm document, skipping change");
            return;
        }
    };
    let notice = ChangeNotice {
        updated_by: document.meta.last_updated_by.clone(),
        document,
    };
    debug!(updated_by = ?notice.updated_by, "comm document changed");
    shared.fan_out(&notice);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    const RECV_WAIT: Duration = Duration::from_secs(5);

    async fn setup(dir: &TempDir) -> (Arc<CommBus>, CommWatcher) {
        let bus = Arc::new(CommBus::new(dir.path().join("comms.json")));
        let watcher = CommWatcher::start(bus.clone(), Duration::from_millis(30))
            .await
            .unwrap();
        (bus, watcher)
    }

    #[tokio::test]
    async fn test_author_is_suppressed_others_notified() {
        let dir = TempDir::new().unwrap();
        let (bus, watcher) = setup(&dir).await;

        let mut rx_a = watcher.register("A");
        let mut rx_b = watcher.register("B");

        bus.update_field("A", "workingOn", "x").await.unwrap();

        let notice = timeout(RECV_WAIT, rx_b.recv())
            .await
            .expect("B should be notified")
            .unwrap();
        assert_eq!(notice.updated_by.as_deref(), Some("A"));
        assert_eq!(notice.document.agents["A"].working_on, "x");

        // A authored the change and must not hear about it.
        assert!(
            timeout(Duration::from_millis(300), rx_a.recv()).await.is_err(),
            "author must not be notified of its own change"
        );

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let dir = TempDir::new().unwrap();
        let (bus, watcher) = setup(&dir).await;

        let mut rx_b = watcher.register("B");
        watcher.unregister("B");

        bus.update_field("A", "done", "y").await.unwrap();

        assert!(
            timeout(Duration::from_millis(300), rx_b.recv())
                .await
                .map(|m| m.is_none())
                .unwrap_or(true),
            "unregistered listener must not receive notices"
        );

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_successive_changes_arrive_in_order() {
        let dir = TempDir::new().unwrap();
        let (bus, watcher) = setup(&dir).await;

        let mut rx = watcher.register("observer");

        bus.update_field("A", "workingOn", "first").await.unwrap();
        let first = timeout(RECV_WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.document.agents["A"].working_on, "first");

        bus.update_field("A", "workingOn", "second").await.unwrap();
        let second = timeout(RECV_WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(second.document.agents["A"].working_on, "second");

        watcher.stop().await;
    }
}
