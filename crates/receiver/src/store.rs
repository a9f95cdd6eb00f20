//! On-disk chunk persistence.
//!
//! # Layout
//!
//! ```text
//! <base>/<prefix><session>/<session>.part<index>    while transferring
//! <base>/<final name>                               after assembly
//! ```
//!
//! Writes to different sessions never touch the same directory, and
//! writes to different indices of one session target distinct files,
//! so the store needs no locking of its own.

use std::path::{Path, PathBuf};

use crate::diskspace::DiskGuard;
use crate::error::ReceiveError;

#[derive(Debug, Clone)]
pub struct ChunkStore {
    base_dir: PathBuf,
    temp_prefix: String,
    guard: DiskGuard,
}

impl ChunkStore {
    /// Opens the store, creating the base directory if needed.
    pub fn open(
        base_dir: impl Into<PathBuf>,
        temp_prefix: impl Into<String>,
        guard: DiskGuard,
    ) -> Result<Self, ReceiveError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(|source| ReceiveError::Storage {
            session: String::new(),
            operation: "create_base_dir",
            source,
        })?;
        tracing::info!(base = %base_dir.display(), "chunk store ready");
        Ok(Self {
            base_dir,
            temp_prefix: temp_prefix.into(),
            guard,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Temp directory of one session.
    pub fn temp_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}{session_id}", self.temp_prefix))
    }

    /// Path of one chunk file.
    pub fn chunk_path(&self, session_id: &str, chunk_index: u32) -> PathBuf {
        self.temp_dir(session_id)
            .join(format!("{session_id}.part{chunk_index}"))
    }

    /// Persists one chunk, creating the session temp directory on first
    /// use. Re-writing an index truncates and replaces the same file.
    pub async fn write(
        &self,
        session_id: &str,
        chunk_index: u32,
        data: &[u8],
    ) -> Result<(), ReceiveError> {
        let dir = self.temp_dir(session_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ReceiveError::Storage {
                session: session_id.to_string(),
                operation: "create_temp_dir",
                source,
            })?;

        self.guard.ensure(&self.base_dir, data.len() as u64)?;

        let path = self.chunk_path(session_id, chunk_index);
        tokio::fs::write(&path, data)
            .await
            .map_err(|source| ReceiveError::Storage {
                session: session_id.to_string(),
                operation: "write_chunk",
                source,
            })?;

        tracing::debug!(
            session = %session_id,
            chunk = chunk_index,
            bytes = data.len(),
            "chunk written"
        );
        Ok(())
    }

    pub async fn exists(&self, session_id: &str, chunk_index: u32) -> bool {
        tokio::fs::try_exists(self.chunk_path(session_id, chunk_index))
            .await
            .unwrap_or(false)
    }

    /// Size of one chunk file in bytes.
    pub async fn size(&self, session_id: &str, chunk_index: u32) -> Result<u64, ReceiveError> {
        let path = self.chunk_path(session_id, chunk_index);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|source| ReceiveError::Storage {
                session: session_id.to_string(),
                operation: "stat_chunk",
                source,
            })?;
        Ok(meta.len())
    }

    /// Paths of chunks `0..total_chunks` in index order; fails naming
    /// the first missing index.
    pub async fn list_all(
        &self,
        session_id: &str,
        total_chunks: u32,
    ) -> Result<Vec<PathBuf>, ReceiveError> {
        let mut paths = Vec::with_capacity(total_chunks as usize);
        for index in 0..total_chunks {
            let path = self.chunk_path(session_id, index);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(ReceiveError::Storage {
                    session: session_id.to_string(),
                    operation: "list_chunks",
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("missing chunk file {index}"),
                    ),
                });
            }
            paths.push(path);
        }
        Ok(paths)
    }

    /// Sum of all chunk sizes for a session.
    pub async fn total_size(
        &self,
        session_id: &str,
        total_chunks: u32,
    ) -> Result<u64, ReceiveError> {
        let mut total = 0u64;
        for index in 0..total_chunks {
            total += self.size(session_id, index).await?;
        }
        Ok(total)
    }

    /// Best-effort removal of the session temp directory. Errors are
    /// logged and swallowed; a half-removed directory is retried by the
    /// next cleanup pass.
    pub async fn cleanup(&self, session_id: &str) {
        let dir = self.temp_dir(session_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!(session = %session_id, "temp directory removed");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    session = %session_id,
                    dir = %dir.display(),
                    error = %e,
                    "temp directory cleanup failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiskConfig;
    use std::sync::Arc;

    fn open_store(dir: &Path) -> ChunkStore {
        let guard = DiskGuard::with_probe(&DiskConfig::default(), Arc::new(|_| None));
        ChunkStore::open(dir.join("uploads"), "temp_", guard).unwrap()
    }

    #[tokio::test]
    async fn write_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        store.write("sess", 0, b"hello").await.unwrap();

        let expected = dir.path().join("uploads/temp_sess/sess.part0");
        assert!(expected.is_file());
        assert_eq!(std::fs::read(expected).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn rewrite_truncates_same_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        store.write("sess", 3, b"a longer payload").await.unwrap();
        store.write("sess", 3, b"short").await.unwrap();

        assert_eq!(store.size("sess", 3).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn exists_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        assert!(!store.exists("sess", 0).await);
        store.write("sess", 0, b"abcd").await.unwrap();
        assert!(store.exists("sess", 0).await);
        assert_eq!(store.size("sess", 0).await.unwrap(), 4);
        assert!(store.size("sess", 1).await.is_err());
    }

    #[tokio::test]
    async fn list_all_requires_every_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        store.write("sess", 0, b"a").await.unwrap();
        store.write("sess", 2, b"c").await.unwrap();

        let err = store.list_all("sess", 3).await.unwrap_err();
        assert!(err.to_string().contains("missing chunk file 1"));

        store.write("sess", 1, b"b").await.unwrap();
        let paths = store.list_all("sess", 3).await.unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths[2].ends_with("sess.part2"));
    }

    #[tokio::test]
    async fn total_size_sums_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        store.write("sess", 0, b"12345").await.unwrap();
        store.write("sess", 1, b"678").await.unwrap();
        assert_eq!(store.total_size("sess", 2).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn cleanup_removes_dir_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        store.write("sess", 0, b"x").await.unwrap();
        assert!(store.temp_dir("sess").is_dir());

        store.cleanup("sess").await;
        assert!(!store.temp_dir("sess").exists());

        // Second cleanup on an absent directory is a no-op.
        store.cleanup("sess").await;
    }

    #[tokio::test]
    async fn write_refuses_when_disk_guard_fails() {
        let dir = tempfile::tempdir().unwrap();
        let guard = DiskGuard::with_probe(&DiskConfig::default(), Arc::new(|_| Some(0)));
        let store = ChunkStore::open(dir.path().join("uploads"), "temp_", guard).unwrap();

        let err = store.write("sess", 0, b"data").await.unwrap_err();
        assert!(matches!(err, ReceiveError::InsufficientDiskSpace { .. }));
        assert!(!store.exists("sess", 0).await);
    }

    #[tokio::test]
    async fn sessions_are_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        store.write("a", 0, b"aaa").await.unwrap();
        store.write("b", 0, b"bbb").await.unwrap();
        store.cleanup("a").await;

        assert!(!store.exists("a", 0).await);
        assert!(store.exists("b", 0).await);
    }
}
