//! Debounced background persistence of workflow snapshots.

use autoflow_core::Workflow;
use autoflow_core::storage::WorkflowStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    Saved { workflow_id: Uuid },
    SaveFailed { workflow_id: Uuid, error: String },
}

/// Writes the latest scheduled snapshot once no new snapshot has arrived for
/// the debounce period. Intermediate snapshots are dropped.
pub struct AutoSaver {
    tx: watch::Sender<Option<Workflow>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl AutoSaver {
    /// Start the save loop on the current tokio runtime.
    pub fn spawn(
        store: Arc<dyn WorkflowStore>,
        debounce: Duration,
        event_tx: mpsc::Sender<EditorEvent>,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let task = SaveLoop {
            store,
            debounce,
            rx,
            event_tx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());
        Self {
            tx,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn schedule(&self, workflow: Workflow) {
        self.tx.send_replace(Some(workflow));
    }

    /// Stop the loop, writing any snapshot still waiting out its debounce.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Auto-save task failed: {}", e);
            }
        }
    }
}

impl Drop for AutoSaver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct SaveLoop {
    store: Arc<dyn WorkflowStore>,
    debounce: Duration,
    rx: watch::Receiver<Option<Workflow>>,
    event_tx: mpsc::Sender<EditorEvent>,
    cancel: CancellationToken,
}

impl SaveLoop {
    async fn run(mut self) {
        debug!(debounce_ms = self.debounce.as_millis() as u64, "Auto-save started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    if self.rx.has_changed().unwrap_or(false) {
                        self.save_latest().await;
                    }
                    break;
                }
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            // Restart the quiet period on every new snapshot.
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.debounce) => break,
                    _ = self.cancel.cancelled() => break,
                    changed = self.rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            self.save_latest().await;
            if self.cancel.is_cancelled() {
                break;
            }
        }
        debug!("Auto-save stopped");
    }

    async fn save_latest(&mut self) {
        let snapshot = Option::clone(&self.rx.borrow_and_update());
        let Some(workflow) = snapshot else {
            return;
        };
        let workflow_id = workflow.id;
        let event = match self.store.save(&workflow).await {
            Ok(()) => {
                info!(%workflow_id, name = %workflow.name, "Workflow saved");
                EditorEvent::Saved { workflow_id }
            }
            Err(e) => {
                warn!(%workflow_id, "Auto-save failed: {:#}", e);
                EditorEvent::SaveFailed {
                    workflow_id,
                    error: format!("{:#}", e),
                }
            }
        };
        if let Err(e) = self.event_tx.try_send(event) {
            error!("Failed to send editor event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Vec<Workflow>>,
    }

    impl MemoryStore {
        fn names(&self) -> Vec<String> {
            self.saved.lock().unwrap().iter().map(|w| w.name.clone()).collect()
        }
    }

    #[async_trait]
    impl WorkflowStore for MemoryStore {
        async fn save(&self, workflow: &Workflow) -> Result<()> {
            self.saved.lock().unwrap().push(workflow.clone());
            Ok(())
        }

        async fn load(&self, id: Uuid) -> Result<Workflow> {
            let saved = self.saved.lock().unwrap();
            match saved.iter().rev().find(|w| w.id == id) {
                Some(w) => Ok(w.clone()),
                None => bail!("workflow {} not saved", id),
            }
        }
    }

    struct FailingStore;

    #[async_trait]
    impl WorkflowStore for FailingStore {
        async fn save(&self, _workflow: &Workflow) -> Result<()> {
            bail!("disk full")
        }

        async fn load(&self, id: Uuid) -> Result<Workflow> {
            bail!("workflow {} not saved", id)
        }
    }

    const DEBOUNCE: Duration = Duration::from_millis(1500);

    fn renamed(base: &Workflow, name: &str) -> Workflow {
        let mut workflow = base.clone();
        workflow.name = name.to_string();
        workflow
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_changes_saves_once() {
        let store = Arc::new(MemoryStore::default());
        let (tx, mut rx) = mpsc::channel(8);
        let saver = AutoSaver::spawn(store.clone(), DEBOUNCE, tx);

        let base = Workflow::new("Draft");
        for name in ["a", "b", "c"] {
            saver.schedule(renamed(&base, name));
        }
        tokio::time::sleep(Duration::from_millis(2000)).await;

        assert_eq!(store.names(), vec!["c"]);
        assert_eq!(
            rx.try_recv().unwrap(),
            EditorEvent::Saved {
                workflow_id: base.id
            }
        );
        saver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn new_change_restarts_quiet_period() {
        let store = Arc::new(MemoryStore::default());
        let (tx, _rx) = mpsc::channel(8);
        let saver = AutoSaver::spawn(store.clone(), DEBOUNCE, tx);
        let base = Workflow::new("Draft");

        saver.schedule(renamed(&base, "first"));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        saver.schedule(renamed(&base, "second"));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(store.names().is_empty());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(store.names(), vec!["second"]);
        saver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_is_reported() {
        let (tx, mut rx) = mpsc::channel(8);
        let saver = AutoSaver::spawn(Arc::new(FailingStore), DEBOUNCE, tx);
        let workflow = Workflow::new("Doomed");

        saver.schedule(workflow.clone());
        tokio::time::sleep(Duration::from_millis(2000)).await;

        match rx.try_recv().unwrap() {
            EditorEvent::SaveFailed { workflow_id, error } => {
                assert_eq!(workflow_id, workflow.id);
                assert!(error.contains("disk full"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        saver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_pending_snapshot() {
        let store = Arc::new(MemoryStore::default());
        let (tx, _rx) = mpsc::channel(8);
        let saver = AutoSaver::spawn(store.clone(), DEBOUNCE, tx);

        saver.schedule(Workflow::new("Pending"));
        saver.shutdown().await;

        assert_eq!(store.names(), vec!["Pending"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_shutdown_writes_nothing() {
        let store = Arc::new(MemoryStore::default());
        let (tx, _rx) = mpsc::channel(8);
        let saver = AutoSaver::spawn(store.clone(), DEBOUNCE, tx);
        saver.shutdown().await;
        assert!(store.names().is_empty());
        assert!(store.load(Uuid::new_v4()).await.is_err());
    }
}
