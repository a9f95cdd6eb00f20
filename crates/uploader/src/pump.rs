//! The chunk pump: bounded-concurrency dispatch of missing chunks.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use chunkferry_protocol::ChunkMeta;

use crate::error::{SendFailure, UploaderError};
use crate::retry::RetryPolicy;
use crate::task::{TaskState, UploadEvent, UploadTask};
use crate::transport::{ChunkTransport, SessionControl};

/// Pump tuning.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Chunk sends in flight at once (typically 1–5).
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            retry: RetryPolicy::default(),
        }
    }
}

/// Event stream handed to the presentation layer.
pub type EventSender = mpsc::Sender<(String, UploadEvent)>;

/// Transfers all missing chunks of a task to the server and finalizes.
pub struct ChunkPump {
    transport: Arc<dyn ChunkTransport>,
    control: Arc<dyn SessionControl>,
    config: PumpConfig,
    events: EventSender,
}

impl ChunkPump {
    pub fn new(
        transport: Arc<dyn ChunkTransport>,
        control: Arc<dyn SessionControl>,
        config: PumpConfig,
        events: EventSender,
    ) -> Self {
        Self {
            transport,
            control,
            config,
            events,
        }
    }

    /// Runs the transfer until completion, pause, cancellation or
    /// failure, and returns the resulting task state.
    ///
    /// The missing set is taken from the task; callers refresh it from
    /// the server (resume handshake) before re-entering.
    pub async fn run(&self, task: Arc<UploadTask>, cancel: CancellationToken) -> TaskState {
        let session_id = task.session_id().to_string();
        task.set_state(TaskState::Uploading);
        self.emit(&session_id, UploadEvent::StateChanged(TaskState::Uploading))
            .await;

        let queue: Arc<Mutex<VecDeque<u32>>> =
            Arc::new(Mutex::new(task.missing_chunks().into()));

        let mut workers = JoinSet::new();
        for _ in 0..self.config.concurrency.max(1) {
            workers.spawn(worker_loop(
                Arc::clone(&self.transport),
                Arc::clone(&task),
                Arc::clone(&queue),
                self.config.retry.clone(),
                cancel.clone(),
                self.events.clone(),
            ));
        }

        let mut failure: Option<UploaderError> = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    // First failure wins; stop the other workers.
                    if failure.is_none() {
                        cancel.cancel();
                        failure = Some(e);
                    }
                }
                Err(e) => {
                    if failure.is_none() {
                        cancel.cancel();
                        failure = Some(UploaderError::Io(std::io::Error::other(format!(
                            "pump worker panicked: {e}"
                        ))));
                    }
                }
            }
        }

        if let Some(e) = failure {
            tracing::warn!(session = %session_id, error = %e, "upload failed");
            return self.fail(&task, &session_id, e.to_string()).await;
        }

        if task.is_paused() || cancel.is_cancelled() {
            let state = if task.is_paused() {
                TaskState::Paused
            } else {
                TaskState::Cancelled
            };
            task.set_state(state);
            self.emit(&session_id, UploadEvent::StateChanged(state)).await;
            return state;
        }

        if !task.is_complete() {
            // Queue drained without error or cancel but chunks are
            // still missing; treat as a failed transfer.
            return self
                .fail(&task, &session_id, "chunks missing after dispatch".into())
                .await;
        }

        task.set_state(TaskState::Completing);
        self.emit(&session_id, UploadEvent::StateChanged(TaskState::Completing))
            .await;

        match self.control.finalize(&session_id).await {
            Ok(()) => {
                task.set_state(TaskState::Completed);
                self.emit(&session_id, UploadEvent::StateChanged(TaskState::Completed))
                    .await;
                tracing::info!(session = %session_id, "upload completed");
                TaskState::Completed
            }
            // Received state survives on the server; finalize can be
            // retried by resuming the task.
            Err(e) => self.fail(&task, &session_id, e.to_string()).await,
        }
    }

    async fn fail(&self, task: &UploadTask, session_id: &str, message: String) -> TaskState {
        task.set_state(TaskState::Failed);
        self.emit(session_id, UploadEvent::TaskFailed { message }).await;
        self.emit(session_id, UploadEvent::StateChanged(TaskState::Failed))
            .await;
        TaskState::Failed
    }

    async fn emit(&self, session_id: &str, event: UploadEvent) {
        let _ = self.events.send((session_id.to_string(), event)).await;
    }
}

async fn worker_loop(
    transport: Arc<dyn ChunkTransport>,
    task: Arc<UploadTask>,
    queue: Arc<Mutex<VecDeque<u32>>>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    events: EventSender,
) -> Result<(), UploaderError> {
    loop {
        // Pause halts dispatch of further chunks; in-flight sends are
        // stopped by the token.
        if cancel.is_cancelled() || task.is_paused() {
            return Ok(());
        }
        let Some(index) = pop(&queue) else {
            return Ok(());
        };

        let slicer = Arc::clone(task.slicer());
        let chunk_size = task.chunk_size();
        let data =
            tokio::task::spawn_blocking(move || slicer.read_chunk(index, chunk_size))
                .await
                .map_err(|e| std::io::Error::other(format!("chunk read failed: {e}")))??;
        let byte_len = data.len() as u64;

        let meta = ChunkMeta {
            session_id: task.session_id().to_string(),
            chunk_index: index,
            total_chunks: task.total_chunks(),
            file_name: task.file_name().map(String::from),
        };

        match send_with_retry(&*transport, &retry, meta, data, &cancel).await {
            Ok(()) => {}
            // Cooperative stop; pause/cancel is not a chunk failure.
            Err(UploaderError::Cancelled) => return Ok(()),
            Err(e) => return Err(e),
        }

        task.mark_received(index, byte_len);
        let session = task.session_id().to_string();
        let _ = events.try_send((session.clone(), UploadEvent::ChunkAccepted { chunk_index: index }));
        let _ = events.try_send((session, UploadEvent::Progress(task.progress())));
    }
}

fn pop(queue: &Mutex<VecDeque<u32>>) -> Option<u32> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}

/// Sends one chunk, retrying per policy with cancel-aware backoff.
async fn send_with_retry(
    transport: &dyn ChunkTransport,
    retry: &RetryPolicy,
    meta: ChunkMeta,
    data: Vec<u8>,
    cancel: &CancellationToken,
) -> Result<(), UploaderError> {
    let chunk = meta.chunk_index;
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SendFailure::Cancelled),
            r = transport.send_chunk(meta.clone(), data.clone()) => r,
        };

        let failure = match result {
            Ok(()) => return Ok(()),
            Err(SendFailure::Cancelled) => return Err(UploaderError::Cancelled),
            Err(f) => f,
        };

        attempt += 1;
        if !retry.is_retryable(&failure) || attempt >= retry.max_attempts {
            return Err(UploaderError::RetriesExhausted {
                chunk,
                attempts: attempt,
                reason: failure.to_string(),
            });
        }

        let delay = retry.delay_for(attempt - 1);
        tracing::debug!(
            session = %meta.session_id,
            chunk,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "retrying chunk"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploaderError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
