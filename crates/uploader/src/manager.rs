//! Client session registry: start, pause, resume, cancel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use chunkferry_protocol::ResumeQuery;

use crate::error::UploaderError;
use crate::pump::{ChunkPump, EventSender, PumpConfig};
use crate::task::{TaskState, UploadEvent, UploadTask};
use crate::transport::{ChunkTransport, SessionControl};

struct ActiveTask {
    task: Arc<UploadTask>,
    cancel: CancellationToken,
    handle: Option<tokio::task::JoinHandle<TaskState>>,
}

impl ActiveTask {
    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Owns all upload tasks of one client and the pump that drives them.
///
/// Presentation layers consume the event receiver returned by
/// [`UploadManager::new`]; every event is tagged with its session id.
pub struct UploadManager {
    pump: Arc<ChunkPump>,
    control: Arc<dyn SessionControl>,
    events: EventSender,
    tasks: Mutex<HashMap<String, ActiveTask>>,
}

impl UploadManager {
    pub fn new(
        transport: Arc<dyn ChunkTransport>,
        control: Arc<dyn SessionControl>,
        config: PumpConfig,
    ) -> (Arc<Self>, mpsc::Receiver<(String, UploadEvent)>) {
        let (tx, rx) = mpsc::channel(256);
        let pump = Arc::new(ChunkPump::new(
            transport,
            Arc::clone(&control),
            config,
            tx.clone(),
        ));
        (
            Arc::new(Self {
                pump,
                control,
                events: tx,
                tasks: Mutex::new(HashMap::new()),
            }),
            rx,
        )
    }

    /// Begins (or restarts) the transfer for `task`. A no-op while the
    /// task is already running or after it completed or was cancelled.
    pub async fn start(self: &Arc<Self>, task: Arc<UploadTask>) {
        let id = task.session_id().to_string();
        let mut tasks = self.tasks.lock().await;

        if let Some(existing) = tasks.get(&id) {
            if existing.is_running() || existing.task.state().is_terminal() {
                tracing::debug!(session = %id, "start ignored");
                return;
            }
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let pump = Arc::clone(&self.pump);
            let task = Arc::clone(&task);
            let cancel = cancel.clone();
            async move { pump.run(task, cancel).await }
        });

        tasks.insert(
            id,
            ActiveTask {
                task,
                cancel,
                handle: Some(handle),
            },
        );
    }

    /// Requests cooperative cancellation of in-flight sends and halts
    /// further dispatch; the session stays resumable. No new chunk send
    /// is initiated once this returns.
    pub async fn pause(&self, session_id: &str) -> Result<(), UploaderError> {
        let tasks = self.tasks.lock().await;
        let entry = tasks
            .get(session_id)
            .ok_or_else(|| UploaderError::UnknownTask(session_id.to_string()))?;
        entry.task.set_paused(true);
        entry.cancel.cancel();
        tracing::info!(session = %session_id, "upload paused");
        Ok(())
    }

    /// Clears the paused flag, refreshes the missing set from the
    /// server, and re-enters the dispatch loop.
    pub async fn resume(self: &Arc<Self>, session_id: &str) -> Result<(), UploaderError> {
        let mut tasks = self.tasks.lock().await;
        let entry = tasks
            .get_mut(session_id)
            .ok_or_else(|| UploaderError::UnknownTask(session_id.to_string()))?;

        if entry.is_running() && !entry.task.is_paused() {
            return Ok(());
        }

        // Let the paused pump wind down before restarting.
        entry.cancel.cancel();
        if let Some(handle) = entry.handle.take() {
            let _ = handle.await;
        }

        if let Some(snapshot) = self.control.status(session_id).await? {
            entry.task.sync_received(&snapshot.received_chunks);
        }
        entry.task.set_paused(false);

        let cancel = CancellationToken::new();
        entry.cancel = cancel.clone();
        entry.handle = Some(tokio::spawn({
            let pump = Arc::clone(&self.pump);
            let task = Arc::clone(&entry.task);
            async move { pump.run(task, cancel).await }
        }));
        tracing::info!(session = %session_id, "upload resumed");
        Ok(())
    }

    /// Pauses, deletes the server-side session, and discards the task.
    pub async fn cancel(&self, session_id: &str) -> Result<(), UploaderError> {
        let entry = self.tasks.lock().await.remove(session_id);
        let Some(mut entry) = entry else {
            // Already gone; cancel is idempotent.
            return Ok(());
        };

        entry.task.set_paused(false);
        entry.cancel.cancel();
        if let Some(handle) = entry.handle.take() {
            let _ = handle.await;
        }

        self.control.cancel(session_id).await?;
        entry.task.set_state(TaskState::Cancelled);
        let _ = self
            .events
            .send((
                session_id.to_string(),
                UploadEvent::StateChanged(TaskState::Cancelled),
            ))
            .await;
        tracing::info!(session = %session_id, "upload cancelled");
        Ok(())
    }

    /// Reattaches to a server session after a client restart: performs
    /// the resume handshake, seeds the task with the server's received
    /// set, and starts pumping the rest.
    pub async fn attach(
        self: &Arc<Self>,
        session_id: &str,
        path: impl AsRef<std::path::Path>,
        chunk_size: u64,
    ) -> Result<Arc<UploadTask>, UploaderError> {
        let task = Arc::new(UploadTask::open(session_id, path, chunk_size)?);
        let record = self
            .control
            .resume(
                session_id,
                &ResumeQuery {
                    total_chunks: task.total_chunks(),
                    file_name: task.file_name().map(String::from),
                    file_size: Some(task.total_bytes()),
                    chunk_size: Some(chunk_size),
                },
            )
            .await?;
        task.sync_received(&record.received_chunks);

        self.start(Arc::clone(&task)).await;
        Ok(task)
    }

    /// Ids of every known (not yet discarded) task.
    pub async fn active_ids(&self) -> Vec<String> {
        self.tasks.lock().await.keys().cloned().collect()
    }

    pub async fn task(&self, session_id: &str) -> Option<Arc<UploadTask>> {
        self.tasks
            .lock()
            .await
            .get(session_id)
            .map(|e| Arc::clone(&e.task))
    }

    /// Waits for the running pump of `session_id` to settle and returns
    /// the resulting state.
    pub async fn wait(&self, session_id: &str) -> Result<TaskState, UploaderError> {
        let handle = {
            let mut tasks = self.tasks.lock().await;
            let entry = tasks
                .get_mut(session_id)
                .ok_or_else(|| UploaderError::UnknownTask(session_id.to_string()))?;
            entry.handle.take()
        };
        match handle {
            Some(handle) => handle.await.map_err(|e| {
                UploaderError::Io(std::io::Error::other(format!("pump task failed: {e}")))
            }),
            None => {
                let tasks = self.tasks.lock().await;
                let entry = tasks
                    .get(session_id)
                    .ok_or_else(|| UploaderError::UnknownTask(session_id.to_string()))?;
                Ok(entry.task.state())
            }
        }
    }
}
