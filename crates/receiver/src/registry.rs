//! In-memory session registry.
//!
//! The registry is the single owner of session records; everything it
//! hands out is a snapshot. Critical sections are short (map lookup
//! plus field updates), so one `RwLock` over the map is enough — chunk
//! payload I/O never happens under the lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use chunkferry_protocol::{SessionSnapshot, SessionState, UploadStatistics};

#[derive(Debug, Clone)]
struct SessionRecord {
    id: String,
    total_chunks: u32,
    received: BTreeSet<u32>,
    file_name: Option<String>,
    file_size: Option<u64>,
    chunk_size: Option<u64>,
    uploaded_bytes: u64,
    state: SessionState,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
}

impl SessionRecord {
    fn new(id: &str, total_chunks: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            total_chunks,
            received: BTreeSet::new(),
            file_name: None,
            file_size: None,
            chunk_size: None,
            uploaded_bytes: 0,
            state: SessionState::Active,
            error_message: None,
            created_at: now,
            last_updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }

    fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::Completed | SessionState::Failed)
    }

    fn snapshot(&self) -> SessionSnapshot {
        let missing: Vec<u32> = (0..self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect();
        let next_expected_chunk = missing.first().copied().unwrap_or(self.total_chunks);

        let progress_percentage = match self.file_size {
            Some(size) if size > 0 => self.uploaded_bytes as f64 / size as f64 * 100.0,
            _ if self.total_chunks > 0 => {
                self.received.len() as f64 / self.total_chunks as f64 * 100.0
            }
            _ => 0.0,
        };

        let elapsed_ms = (Utc::now() - self.created_at).num_milliseconds().max(0) as u64;
        let upload_speed = if self.uploaded_bytes == 0 || elapsed_ms == 0 {
            0.0
        } else {
            self.uploaded_bytes as f64 / elapsed_ms as f64 * 1000.0
        };

        let estimated_remaining_millis = match self.file_size {
            Some(size) if self.uploaded_bytes > 0 => {
                let remaining = size.saturating_sub(self.uploaded_bytes);
                if remaining == 0 {
                    Some(0)
                } else if upload_speed > 0.0 {
                    Some((remaining as f64 / upload_speed * 1000.0) as u64)
                } else {
                    None
                }
            }
            _ => None,
        };

        let can_resume = self.state == SessionState::Active
            && (self.received.len() as u32) < self.total_chunks;

        SessionSnapshot {
            session_id: self.id.clone(),
            total_chunks: self.total_chunks,
            received_chunks: self.received.iter().copied().collect(),
            missing_chunks: missing,
            next_expected_chunk,
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            chunk_size: self.chunk_size,
            uploaded_bytes: self.uploaded_bytes,
            progress_percentage,
            can_resume,
            state: self.state,
            error_message: self.error_message.clone(),
            upload_speed,
            estimated_remaining_millis,
            created_at: self.created_at,
            last_updated_at: self.last_updated_at,
        }
    }
}

/// Thread-safe map of session id to session record.
#[derive(Debug, Default)]
pub struct StatusRegistry {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionRecord>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionRecord>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the session, creating it when absent.
    ///
    /// A differing `total_chunks` on an existing session is a protocol
    /// violation; the first value wins and the mismatch is logged.
    pub fn get_or_create(&self, id: &str, total_chunks: u32) -> SessionSnapshot {
        let mut sessions = self.write();
        let record = sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session = %id, total_chunks, "session created");
                SessionRecord::new(id, total_chunks)
            });
        if record.total_chunks != total_chunks {
            tracing::warn!(
                session = %id,
                stored = record.total_chunks,
                requested = total_chunks,
                "totalChunks mismatch, keeping stored value"
            );
        }
        record.snapshot()
    }

    /// As [`get_or_create`](Self::get_or_create), also recording any
    /// supplied metadata (first non-empty value wins for the name).
    pub fn get_or_create_with_meta(
        &self,
        id: &str,
        total_chunks: u32,
        file_name: Option<&str>,
        file_size: Option<u64>,
        chunk_size: Option<u64>,
    ) -> SessionSnapshot {
        let mut sessions = self.write();
        let record = sessions
            .entry(id.to_string())
            .or_insert_with(|| SessionRecord::new(id, total_chunks));
        if record.total_chunks != total_chunks {
            tracing::warn!(
                session = %id,
                stored = record.total_chunks,
                requested = total_chunks,
                "totalChunks mismatch, keeping stored value"
            );
        }
        if record.file_name.is_none()
            && let Some(name) = file_name.filter(|n| !n.is_empty())
        {
            record.file_name = Some(name.to_string());
        }
        if let Some(size) = file_size {
            record.file_size = Some(size);
        }
        if let Some(size) = chunk_size {
            record.chunk_size = Some(size);
        }
        record.touch();
        record.snapshot()
    }

    pub fn get(&self, id: &str) -> Option<SessionSnapshot> {
        self.read().get(id).map(SessionRecord::snapshot)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Records a received chunk. Returns `true` when the index was new;
    /// the byte counter only moves on first receipt, so replays never
    /// double-count.
    pub fn add_chunk(&self, id: &str, chunk_index: u32, byte_len: u64) -> bool {
        let mut sessions = self.write();
        let Some(record) = sessions.get_mut(id) else {
            tracing::warn!(session = %id, chunk = chunk_index, "chunk for unknown session");
            return false;
        };
        if chunk_index >= record.total_chunks {
            tracing::warn!(
                session = %id,
                chunk = chunk_index,
                total = record.total_chunks,
                "chunk index out of range, ignoring"
            );
            return false;
        }
        let newly = record.received.insert(chunk_index);
        if newly {
            record.uploaded_bytes += byte_len;
        }
        record.touch();
        newly
    }

    /// First non-empty value wins.
    pub fn set_file_name(&self, id: &str, file_name: &str) {
        if file_name.is_empty() {
            return;
        }
        let mut sessions = self.write();
        if let Some(record) = sessions.get_mut(id)
            && record.file_name.is_none()
        {
            record.file_name = Some(file_name.to_string());
            record.touch();
        }
    }

    pub fn mark_completed(&self, id: &str) {
        let mut sessions = self.write();
        if let Some(record) = sessions.get_mut(id) {
            record.state = SessionState::Completed;
            record.touch();
            tracing::info!(session = %id, "session completed");
        }
    }

    pub fn mark_failed(&self, id: &str, message: &str) {
        let mut sessions = self.write();
        if let Some(record) = sessions.get_mut(id) {
            record.state = SessionState::Failed;
            record.error_message = Some(message.to_string());
            record.touch();
            tracing::warn!(session = %id, error = %message, "session failed");
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        self.write().remove(id).is_some()
    }

    pub fn list_all(&self) -> Vec<SessionSnapshot> {
        self.read().values().map(SessionRecord::snapshot).collect()
    }

    pub fn list_resumable(&self) -> Vec<SessionSnapshot> {
        self.read()
            .values()
            .map(SessionRecord::snapshot)
            .filter(|s| s.can_resume)
            .collect()
    }

    pub fn statistics(&self) -> UploadStatistics {
        let sessions = self.read();
        let mut stats = UploadStatistics {
            total: sessions.len(),
            ..Default::default()
        };
        for record in sessions.values() {
            match record.state {
                SessionState::Active => stats.active += 1,
                SessionState::Completed => stats.completed += 1,
                SessionState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Evicts terminal sessions not updated within `max_age`; returns
    /// the evicted ids so the caller can remove their temp directories.
    pub fn cleanup_older_than(&self, max_age: Duration) -> Vec<String> {
        let max_age = chrono::TimeDelta::from_std(max_age).unwrap_or(chrono::TimeDelta::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let mut sessions = self.write();
        let expired: Vec<String> = sessions
            .values()
            .filter(|r| r.is_terminal() && r.last_updated_at <= cutoff)
            .map(|r| r.id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "evicted stale sessions");
        }
        expired
    }
}
