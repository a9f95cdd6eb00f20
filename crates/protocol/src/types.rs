use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Accepting chunks.
    Active,
    /// Assembled and finalized.
    Completed,
    /// Terminal failure; `error_message` carries the cause.
    Failed,
}

/// Point-in-time view of one upload session.
///
/// Produced by the server's status registry; derived fields
/// (`missing_chunks`, `progress_percentage`, …) are computed at
/// snapshot time and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub total_chunks: u32,
    /// Received chunk indices in ascending order.
    pub received_chunks: Vec<u32>,
    /// `[0, total_chunks)` minus `received_chunks`, ascending.
    pub missing_chunks: Vec<u32>,
    /// Smallest missing index, or `total_chunks` when none are missing.
    pub next_expected_chunk: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    pub uploaded_bytes: u64,
    /// 0.0 to 100.0.
    pub progress_percentage: f64,
    pub can_resume: bool,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Bytes per second since the session was created.
    pub upload_speed: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_millis: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Completed
            || self.received_chunks.len() as u32 == self.total_chunks
    }
}

/// Response body of the resume handshake.
///
/// Flattens the session state into `completed`/`failed` booleans so a
/// restarted client can branch without knowing the state enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRecord {
    pub session_id: String,
    pub total_chunks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    pub received_chunks: Vec<u32>,
    pub missing_chunks: Vec<u32>,
    pub next_expected_chunk: u32,
    pub uploaded_bytes: u64,
    pub progress_percentage: f64,
    pub can_resume: bool,
    pub completed: bool,
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl From<SessionSnapshot> for ResumeRecord {
    fn from(s: SessionSnapshot) -> Self {
        Self {
            completed: s.state == SessionState::Completed,
            failed: s.state == SessionState::Failed,
            session_id: s.session_id,
            total_chunks: s.total_chunks,
            file_name: s.file_name,
            file_size: s.file_size,
            chunk_size: s.chunk_size,
            received_chunks: s.received_chunks,
            missing_chunks: s.missing_chunks,
            next_expected_chunk: s.next_expected_chunk,
            uploaded_bytes: s.uploaded_bytes,
            progress_percentage: s.progress_percentage,
            can_resume: s.can_resume,
            error_message: s.error_message,
            created_at: s.created_at,
            last_updated_at: s.last_updated_at,
        }
    }
}

/// Registry-wide counters, grouped by session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatistics {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            session_id: "s-1".into(),
            total_chunks: 4,
            received_chunks: vec![0, 2],
            missing_chunks: vec![1, 3],
            next_expected_chunk: 1,
            file_name: Some("movie.mkv".into()),
            file_size: Some(4096),
            chunk_size: Some(1024),
            uploaded_bytes: 2048,
            progress_percentage: 50.0,
            can_resume: true,
            state: SessionState::Active,
            error_message: None,
            upload_speed: 1024.0,
            estimated_remaining_millis: Some(2000),
            created_at: Utc::now(),
            last_updated_at: Utc::now(),
        }
    }

    #[test]
    fn snapshot_json_is_camel_case() {
        let json = serde_json::to_string(&snapshot()).unwrap();
        assert!(json.contains("\"sessionId\""));
        assert!(json.contains("\"totalChunks\""));
        assert!(json.contains("\"receivedChunks\""));
        assert!(json.contains("\"nextExpectedChunk\""));
        assert!(json.contains("\"canResume\""));
        assert!(!json.contains("\"session_id\""));
    }

    #[test]
    fn snapshot_roundtrip() {
        let s = snapshot();
        let json = serde_json::to_string(&s).unwrap();
        let back: SessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn snapshot_omits_absent_options() {
        let mut s = snapshot();
        s.file_name = None;
        s.error_message = None;
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("fileName"));
        assert!(!json.contains("errorMessage"));
    }

    #[test]
    fn state_serializes_camel_case() {
        assert_eq!(
            serde_json::to_string(&SessionState::Active).unwrap(),
            "\"active\""
        );
        assert_eq!(
            serde_json::to_string(&SessionState::Completed).unwrap(),
            "\"completed\""
        );
    }

    #[test]
    fn resume_record_flattens_state() {
        let mut s = snapshot();
        s.state = SessionState::Failed;
        s.error_message = Some("disk died".into());
        let record = ResumeRecord::from(s);
        assert!(record.failed);
        assert!(!record.completed);
        assert_eq!(record.error_message.as_deref(), Some("disk died"));
        assert_eq!(record.missing_chunks, vec![1, 3]);
    }

    #[test]
    fn is_complete_by_count_or_state() {
        let mut s = snapshot();
        assert!(!s.is_complete());
        s.received_chunks = vec![0, 1, 2, 3];
        assert!(s.is_complete());
    }
}
