//! Wire types shared by the chunkferry client and server.
//!
//! Both sides of the transfer speak the same small vocabulary: chunk
//! metadata, session snapshots, the resume record, and the uniform
//! error envelope. Everything here is plain serde data; no I/O.

pub mod error;
pub mod messages;
pub mod types;

pub use error::{ErrorCode, ErrorEnvelope};
pub use messages::{ChunkMeta, ResumeQuery};
pub use types::{ResumeRecord, SessionSnapshot, SessionState, UploadStatistics};

/// Header carrying the session id on the binary upload endpoint.
pub const HEADER_SESSION_ID: &str = "X-File-Id";

/// Header carrying the 0-based chunk index on the binary upload endpoint.
pub const HEADER_CHUNK_INDEX: &str = "X-Chunk-Number";

/// Header carrying the total chunk count on the binary upload endpoint.
pub const HEADER_TOTAL_CHUNKS: &str = "X-Total-Chunks";

/// Header carrying the original file name on the binary upload endpoint.
pub const HEADER_FILE_NAME: &str = "X-File-Name";

/// Multipart part name for the chunk bytes.
pub const PART_FILE: &str = "file";

/// Multipart part name for the session id.
pub const PART_SESSION_ID: &str = "sessionId";

/// Multipart part name for the chunk index.
pub const PART_CHUNK_INDEX: &str = "chunkIndex";

/// Multipart part name for the total chunk count.
pub const PART_TOTAL_CHUNKS: &str = "totalChunks";

/// Multipart part name for the original file name.
pub const PART_FILE_NAME: &str = "fileName";

/// Default chunk size used by clients when slicing (5 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Largest chunk payload the server accepts (100 MiB).
pub const MAX_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// Largest chunk count the server accepts per session.
pub const MAX_CHUNK_COUNT: u32 = 10_000;

/// Largest assembled file the server accepts (50 GiB).
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024 * 1024;

/// Longest accepted session id, in bytes.
pub const MAX_SESSION_ID_LEN: usize = 255;

/// Longest accepted file name, in bytes.
pub const MAX_FILE_NAME_LEN: usize = 255;
