//! Client-side upload task: the mirror of a server session.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::UploaderError;
use crate::slicer::ChunkSlicer;

/// Client task lifecycle.
///
/// ```text
/// Pending -> Uploading <-> Paused
///               |  \
///               |   -> Completing -> Completed
///               v            v
///             Failed       Failed
/// ```
///
/// `Cancelled` is reachable from any non-terminal state; resume from
/// `Failed` re-enters `Uploading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Uploading,
    Paused,
    Completing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Progress figures emitted with every chunk completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    /// 0.0 to 100.0.
    pub percentage: f64,
    /// Bytes per second since the task started.
    pub speed_bps: f64,
    pub estimated_remaining: Option<Duration>,
}

/// Events delivered to the presentation layer as `(session_id, event)`.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    StateChanged(TaskState),
    ChunkAccepted { chunk_index: u32 },
    Progress(ProgressReport),
    TaskFailed { message: String },
}

/// One upload in progress on the client.
///
/// The open file handle is exclusively owned here; pump workers read
/// positional ranges through the shared slicer.
pub struct UploadTask {
    session_id: String,
    file_path: PathBuf,
    slicer: Arc<ChunkSlicer>,
    chunk_size: u64,
    total_chunks: u32,
    file_name: Option<String>,
    received: Mutex<BTreeSet<u32>>,
    uploaded_bytes: AtomicU64,
    state: Mutex<TaskState>,
    paused: AtomicBool,
    started_at: Instant,
}

impl std::fmt::Debug for UploadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadTask")
            .field("session_id", &self.session_id)
            .field("file_path", &self.file_path)
            .field("total_chunks", &self.total_chunks)
            .field("state", &self.state())
            .finish()
    }
}

impl UploadTask {
    /// Opens `path` and derives the chunk geometry from its length.
    pub fn open(
        session_id: impl Into<String>,
        path: impl AsRef<Path>,
        chunk_size: u64,
    ) -> Result<Self, UploaderError> {
        let path = path.as_ref().to_path_buf();
        let slicer = ChunkSlicer::open(&path)?;
        let total_chunks = slicer.chunk_count(chunk_size);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        Ok(Self {
            session_id: session_id.into(),
            file_path: path,
            slicer: Arc::new(slicer),
            chunk_size,
            total_chunks,
            file_name,
            received: Mutex::new(BTreeSet::new()),
            uploaded_bytes: AtomicU64::new(0),
            state: Mutex::new(TaskState::Pending),
            paused: AtomicBool::new(false),
            started_at: Instant::now(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn total_bytes(&self) -> u64 {
        self.slicer.len()
    }

    pub fn slicer(&self) -> &Arc<ChunkSlicer> {
        &self.slicer
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_state(&self, state: TaskState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Records a server-accepted chunk; byte counters move only on
    /// first acceptance of an index.
    pub fn mark_received(&self, chunk_index: u32, byte_len: u64) -> bool {
        let newly = self
            .received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chunk_index);
        if newly {
            self.uploaded_bytes.fetch_add(byte_len, Ordering::Relaxed);
        }
        newly
    }

    /// Replaces the received set with the server's view (resume path)
    /// and re-derives the uploaded-byte counter from the chunk geometry.
    pub fn sync_received(&self, server_received: &[u32]) {
        let mut received = self
            .received
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        received.clear();
        received.extend(server_received.iter().copied());

        let mut bytes = 0u64;
        for &index in received.iter() {
            let start = u64::from(index) * self.chunk_size;
            let end = (start + self.chunk_size).min(self.slicer.len());
            bytes += end.saturating_sub(start);
        }
        self.uploaded_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn received_count(&self) -> u32 {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len() as u32
    }

    pub fn missing_chunks(&self) -> Vec<u32> {
        let received = self
            .received
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        (0..self.total_chunks)
            .filter(|i| !received.contains(i))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.received_count() == self.total_chunks
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes.load(Ordering::Relaxed)
    }

    pub fn progress(&self) -> ProgressReport {
        let uploaded = self.uploaded_bytes();
        let total = self.slicer.len();
        let percentage = if total > 0 {
            uploaded as f64 / total as f64 * 100.0
        } else if self.total_chunks > 0 {
            f64::from(self.received_count()) / f64::from(self.total_chunks) * 100.0
        } else {
            0.0
        };

        let elapsed = self.started_at.elapsed().as_secs_f64();
        let speed_bps = if uploaded > 0 && elapsed > 0.0 {
            uploaded as f64 / elapsed
        } else {
            0.0
        };

        let estimated_remaining = if speed_bps > 0.0 {
            let remaining = total.saturating_sub(uploaded);
            Some(Duration::from_secs_f64(remaining as f64 / speed_bps))
        } else {
            None
        };

        ProgressReport {
            uploaded_bytes: uploaded,
            total_bytes: total,
            percentage,
            speed_bps,
            estimated_remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn task_with(content: &[u8], chunk_size: u64) -> (tempfile::TempDir, UploadTask) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content).unwrap();
        let task = UploadTask::open("sess-1", &path, chunk_size).unwrap();
        (dir, task)
    }

    #[test]
    fn geometry_from_file_length() {
        let (_d, task) = task_with(&[0u8; 2500], 1024);
        assert_eq!(task.total_chunks(), 3);
        assert_eq!(task.total_bytes(), 2500);
        assert_eq!(task.file_name(), Some("upload.bin"));
        assert_eq!(task.state(), TaskState::Pending);
        assert_eq!(task.missing_chunks(), vec![0, 1, 2]);
    }

    #[test]
    fn mark_received_is_idempotent() {
        let (_d, task) = task_with(&[0u8; 100], 50);
        assert!(task.mark_received(0, 50));
        assert!(!task.mark_received(0, 50));
        assert_eq!(task.uploaded_bytes(), 50);
        assert_eq!(task.missing_chunks(), vec![1]);
        assert!(!task.is_complete());
        task.mark_received(1, 50);
        assert!(task.is_complete());
    }

    #[test]
    fn sync_received_rederives_bytes_with_short_tail() {
        let (_d, task) = task_with(&[0u8; 2500], 1024);
        // Server has chunks 0 and 2; chunk 2 is the 452-byte tail.
        task.sync_received(&[0, 2]);
        assert_eq!(task.uploaded_bytes(), 1024 + 452);
        assert_eq!(task.missing_chunks(), vec![1]);
    }

    #[test]
    fn progress_math() {
        let (_d, task) = task_with(&[0u8; 1000], 250);
        task.mark_received(0, 250);
        task.mark_received(1, 250);
        let report = task.progress();
        assert_eq!(report.uploaded_bytes, 500);
        assert_eq!(report.total_bytes, 1000);
        assert!((report.percentage - 50.0).abs() < 1e-9);
        assert!(report.speed_bps > 0.0);
        assert!(report.estimated_remaining.is_some());
    }

    #[test]
    fn progress_without_bytes_has_no_eta() {
        let (_d, task) = task_with(&[0u8; 1000], 250);
        let report = task.progress();
        assert_eq!(report.percentage, 0.0);
        assert_eq!(report.speed_bps, 0.0);
        assert!(report.estimated_remaining.is_none());
    }

    #[test]
    fn state_transitions() {
        let (_d, task) = task_with(&[1u8; 10], 10);
        task.set_state(TaskState::Uploading);
        task.set_state(TaskState::Paused);
        assert_eq!(task.state(), TaskState::Paused);
        assert!(!task.state().is_terminal());
        task.set_state(TaskState::Completed);
        assert!(task.state().is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Failed.is_terminal());
    }
}
