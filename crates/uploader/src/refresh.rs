//! Refresh bridge: survive a client restart.
//!
//! The host writes the active session ids here when it is about to go
//! away (navigation, visibility-hidden, shutdown) and reads them back
//! on startup. Stale state is discarded so a long-dead client does not
//! resurrect week-old sessions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State older than this is ignored on restore.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSessions {
    saved_at: DateTime<Utc>,
    session_ids: Vec<String>,
}

/// Persists the active session ids in an ephemeral host-scoped file.
#[derive(Debug, Clone)]
pub struct RefreshBridge {
    path: PathBuf,
    max_age: Duration,
}

impl RefreshBridge {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_age: DEFAULT_MAX_AGE,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the current session ids with a freshness timestamp.
    pub fn persist(&self, session_ids: &[String]) -> std::io::Result<()> {
        let state = PersistedSessions {
            saved_at: Utc::now(),
            session_ids: session_ids.to_vec(),
        };
        let json = serde_json::to_vec(&state)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)
    }

    /// Reads back the persisted ids. Missing, corrupt or stale state
    /// restores to empty; the stored file is removed either way so the
    /// ids are consumed at most once.
    pub fn restore(&self) -> Vec<String> {
        let Ok(bytes) = std::fs::read(&self.path) else {
            return Vec::new();
        };
        self.clear();

        let Ok(state) = serde_json::from_slice::<PersistedSessions>(&bytes) else {
            tracing::warn!(path = %self.path.display(), "discarding corrupt refresh state");
            return Vec::new();
        };

        let age = Utc::now() - state.saved_at;
        if age > chrono::TimeDelta::from_std(self.max_age).unwrap_or(chrono::TimeDelta::MAX) {
            tracing::info!(
                age_secs = age.num_seconds(),
                "discarding stale refresh state"
            );
            return Vec::new();
        }

        state.session_ids
    }

    pub fn clear(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge_in(dir: &Path) -> RefreshBridge {
        RefreshBridge::new(dir.join("state/active-sessions.json"))
    }

    #[test]
    fn persist_restore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge_in(dir.path());

        let ids = vec!["a".to_string(), "b".to_string()];
        bridge.persist(&ids).unwrap();
        assert_eq!(bridge.restore(), ids);
    }

    #[test]
    fn restore_consumes_the_state() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge_in(dir.path());

        bridge.persist(&["a".to_string()]).unwrap();
        assert_eq!(bridge.restore().len(), 1);
        assert!(bridge.restore().is_empty());
    }

    #[test]
    fn missing_file_restores_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(bridge_in(dir.path()).restore().is_empty());
    }

    #[test]
    fn corrupt_file_restores_empty() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge_in(dir.path());
        std::fs::create_dir_all(bridge.path().parent().unwrap()).unwrap();
        std::fs::write(bridge.path(), b"not json at all").unwrap();
        assert!(bridge.restore().is_empty());
    }

    #[test]
    fn stale_state_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge_in(dir.path()).with_max_age(Duration::ZERO);

        bridge.persist(&["a".to_string()]).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(bridge.restore().is_empty());
    }

    #[test]
    fn empty_id_list_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge_in(dir.path());
        bridge.persist(&[]).unwrap();
        assert!(bridge.restore().is_empty());
    }
}
