//! Request-shape validation.
//!
//! Rejects malformed chunk submissions before they reach the store,
//! collecting every offending field into one error.

use crate::config::{ChunkConfig, FileConfig, ValidationConfig};
use crate::error::{ReceiveError, ValidationErrors};
use chunkferry_protocol::{ChunkMeta, MAX_FILE_NAME_LEN, MAX_SESSION_ID_LEN, ResumeQuery};

/// Windows device names that must not appear as a file stem.
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Clone)]
pub struct ChunkValidator {
    chunk: ChunkConfig,
    file: FileConfig,
    validation: ValidationConfig,
}

impl ChunkValidator {
    pub fn new(chunk: ChunkConfig, file: FileConfig, validation: ValidationConfig) -> Self {
        Self {
            chunk,
            file,
            validation,
        }
    }

    /// Validates one chunk submission.
    pub fn validate_chunk(&self, meta: &ChunkMeta, payload_len: u64) -> Result<(), ReceiveError> {
        let mut errors = ValidationErrors::new();

        self.check_session_id(&meta.session_id, &mut errors);
        self.check_geometry(meta.chunk_index, meta.total_chunks, &mut errors);

        if payload_len == 0 && meta.total_chunks != 1 {
            errors.push("chunk", "chunk payload cannot be empty");
        }
        if payload_len > self.chunk.max_size {
            errors.push(
                "chunk",
                format!(
                    "chunk size {payload_len} exceeds maximum allowed {}",
                    self.chunk.max_size
                ),
            );
        }
        // Geometry-based ceiling on the assembled size.
        if u64::from(meta.total_chunks).saturating_mul(payload_len) > self.file.max_size {
            errors.push(
                "fileSize",
                format!(
                    "estimated file size exceeds maximum allowed {}",
                    self.file.max_size
                ),
            );
        }

        if let Some(name) = meta.file_name.as_deref().filter(|n| !n.is_empty()) {
            self.check_file_name(name, &mut errors);
        }

        errors.into_result()
    }

    /// Validates a resume handshake.
    pub fn validate_resume(&self, session_id: &str, query: &ResumeQuery) -> Result<(), ReceiveError> {
        let mut errors = ValidationErrors::new();

        self.check_session_id(session_id, &mut errors);
        if query.total_chunks == 0 {
            errors.push("totalChunks", "totalChunks must be positive");
        } else if query.total_chunks > self.chunk.max_count {
            errors.push(
                "totalChunks",
                format!("totalChunks exceeds maximum allowed {}", self.chunk.max_count),
            );
        }
        if let Some(name) = query.file_name.as_deref().filter(|n| !n.is_empty()) {
            self.check_file_name(name, &mut errors);
        }

        errors.into_result()
    }

    /// Validates a bare session id (status, finalize, cancel paths).
    pub fn validate_session_id(&self, session_id: &str) -> Result<(), ReceiveError> {
        let mut errors = ValidationErrors::new();
        self.check_session_id(session_id, &mut errors);
        errors.into_result()
    }

    fn check_session_id(&self, session_id: &str, errors: &mut ValidationErrors) {
        if session_id.trim().is_empty() {
            errors.push("sessionId", "sessionId is required and cannot be empty");
            return;
        }
        if session_id.len() > MAX_SESSION_ID_LEN {
            errors.push(
                "sessionId",
                format!("sessionId cannot exceed {MAX_SESSION_ID_LEN} characters"),
            );
        }
        // Session ids become path components, so printable also means
        // no separators or traversal sequences.
        if !session_id
            .chars()
            .all(|c| c.is_ascii_graphic() && c != '/' && c != '\\')
            || session_id.contains("..")
        {
            errors.push("sessionId", "sessionId contains invalid characters");
        }
    }

    fn check_geometry(&self, chunk_index: u32, total_chunks: u32, errors: &mut ValidationErrors) {
        if total_chunks == 0 {
            errors.push("totalChunks", "totalChunks must be positive");
            return;
        }
        if total_chunks > self.chunk.max_count {
            errors.push(
                "totalChunks",
                format!("totalChunks exceeds maximum allowed {}", self.chunk.max_count),
            );
        }
        if chunk_index >= total_chunks {
            errors.push("chunkIndex", "chunkIndex must be less than totalChunks");
        }
    }

    fn check_file_name(&self, name: &str, errors: &mut ValidationErrors) {
        if name.len() > MAX_FILE_NAME_LEN {
            errors.push(
                "fileName",
                format!("fileName cannot exceed {MAX_FILE_NAME_LEN} characters"),
            );
        }
        if name.contains("..")
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0')
            || name.chars().any(char::is_control)
        {
            errors.push("fileName", "fileName contains invalid characters");
            return;
        }

        let stem = name.split('.').next().unwrap_or(name);
        if RESERVED_NAMES
            .iter()
            .any(|r| r.eq_ignore_ascii_case(stem))
        {
            errors.push("fileName", "fileName is a reserved device name");
        }

        if let Some(ext) = extension(name) {
            let ext = ext.to_ascii_lowercase();
            if self
                .validation
                .blocked_extensions
                .iter()
                .any(|b| b.eq_ignore_ascii_case(&ext))
            {
                errors.push("fileName", format!("file extension '{ext}' is not allowed"));
            } else if !self.validation.allowed_extensions.is_empty()
                && !self
                    .validation
                    .allowed_extensions
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(&ext))
            {
                errors.push(
                    "fileName",
                    format!("file extension '{ext}' is not in the allowed list"),
                );
            }
        }
    }
}

fn extension(name: &str) -> Option<&str> {
    let idx = name.rfind('.')?;
    if idx == 0 || idx + 1 == name.len() {
        return None;
    }
    Some(&name[idx + 1..])
}
