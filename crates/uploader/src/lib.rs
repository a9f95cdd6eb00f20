//! Client-side uploader.
//!
//! Slices a local file into chunks, pumps them to the receiver with
//! bounded concurrency and retry, and survives pauses, cancellations
//! and full client restarts (via the resume handshake and the refresh
//! bridge).

pub mod error;
pub mod manager;
pub mod pump;
pub mod refresh;
pub mod retry;
pub mod slicer;
pub mod task;
pub mod transport;

pub use error::{SendFailure, UploaderError};
pub use manager::UploadManager;
pub use pump::{ChunkPump, PumpConfig};
pub use refresh::RefreshBridge;
pub use retry::RetryPolicy;
pub use slicer::ChunkSlicer;
pub use task::{ProgressReport, TaskState, UploadEvent, UploadTask};
pub use transport::{BinaryTransport, ChunkTransport, MultipartTransport, ServerApi, SessionControl};
