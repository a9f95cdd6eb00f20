//! Upload coordinator — the single mutator of server state.
//!
//! Transport adapters call only this type. It validates, persists,
//! registers, and finalizes; the registry and the chunk store never
//! see a request that has not passed through here.

use std::sync::Arc;

use crate::assembler::{AssembledFile, Assembler};
use crate::config::ReceiverConfig;
use crate::diskspace::DiskGuard;
use crate::error::ReceiveError;
use crate::registry::StatusRegistry;
use crate::store::ChunkStore;
use crate::validator::ChunkValidator;
use chunkferry_protocol::{
    ChunkMeta, ResumeQuery, ResumeRecord, SessionSnapshot, UploadStatistics,
};

pub struct UploadCoordinator {
    registry: Arc<StatusRegistry>,
    store: ChunkStore,
    assembler: Assembler,
    validator: ChunkValidator,
}

impl UploadCoordinator {
    pub fn new(
        registry: Arc<StatusRegistry>,
        store: ChunkStore,
        assembler: Assembler,
        validator: ChunkValidator,
    ) -> Self {
        Self {
            registry,
            store,
            assembler,
            validator,
        }
    }

    /// Builds a coordinator with the default component wiring.
    pub fn from_config(config: &ReceiverConfig) -> Result<Self, ReceiveError> {
        Self::from_config_with_guard(config, DiskGuard::new(&config.disk))
    }

    /// As [`from_config`](Self::from_config) with a caller-supplied
    /// disk guard (tests inject a fake probe here).
    pub fn from_config_with_guard(
        config: &ReceiverConfig,
        guard: DiskGuard,
    ) -> Result<Self, ReceiveError> {
        let store = ChunkStore::open(
            config.storage.base_directory.clone(),
            config.storage.temp_dir_prefix.clone(),
            guard.clone(),
        )?;
        let assembler = Assembler::new(store.clone(), guard);
        let validator = ChunkValidator::new(
            config.chunk.clone(),
            config.file.clone(),
            config.validation.clone(),
        );
        Ok(Self::new(
            Arc::new(StatusRegistry::new()),
            store,
            assembler,
            validator,
        ))
    }

    pub fn registry(&self) -> &Arc<StatusRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Validates, persists and records one chunk. Creates the session
    /// on first receipt. Replays overwrite the same artifact and leave
    /// the session unchanged. Never auto-finalizes.
    pub async fn save_chunk(&self, meta: &ChunkMeta, data: &[u8]) -> Result<(), ReceiveError> {
        self.validator.validate_chunk(meta, data.len() as u64)?;

        self.registry.get_or_create(&meta.session_id, meta.total_chunks);

        // Chunk bytes are on disk before the index enters the set.
        self.store
            .write(&meta.session_id, meta.chunk_index, data)
            .await?;

        let newly = self
            .registry
            .add_chunk(&meta.session_id, meta.chunk_index, data.len() as u64);
        if let Some(name) = meta.file_name.as_deref() {
            self.registry.set_file_name(&meta.session_id, name);
        }

        tracing::debug!(
            session = %meta.session_id,
            chunk = meta.chunk_index,
            total = meta.total_chunks,
            replay = !newly,
            "chunk accepted"
        );
        Ok(())
    }

    /// Assembles a complete session into its final file, then removes
    /// the session's temp data and registry record.
    ///
    /// Fails with [`ReceiveError::IncompleteUpload`] while chunks are
    /// missing. On assembly failure the session is marked failed and
    /// the temp directory is preserved for inspection.
    pub async fn finalize(&self, session_id: &str) -> Result<AssembledFile, ReceiveError> {
        self.validator.validate_session_id(session_id)?;

        let snapshot = self
            .registry
            .get(session_id)
            .ok_or_else(|| ReceiveError::NotFound(session_id.to_string()))?;

        if !snapshot.missing_chunks.is_empty() {
            return Err(ReceiveError::IncompleteUpload {
                session: session_id.to_string(),
                missing: snapshot.missing_chunks,
            });
        }

        let assembled = match self
            .assembler
            .assemble(session_id, snapshot.total_chunks, snapshot.file_name.as_deref())
            .await
        {
            Ok(out) => out,
            Err(e) => {
                // Temp data stays on disk for post-mortem.
                self.registry.mark_failed(session_id, &e.to_string());
                return Err(e);
            }
        };

        self.registry.mark_completed(session_id);
        self.store.cleanup(session_id).await;
        self.registry.remove(session_id);

        tracing::info!(
            session = %session_id,
            destination = %assembled.path.display(),
            bytes = assembled.bytes,
            "upload finalized"
        );
        Ok(assembled)
    }

    /// Drops the session's temp data and record. Safe to call for
    /// unknown sessions and safe to repeat.
    pub async fn cancel(&self, session_id: &str) -> Result<(), ReceiveError> {
        self.validator.validate_session_id(session_id)?;
        self.store.cleanup(session_id).await;
        let existed = self.registry.remove(session_id);
        tracing::info!(session = %session_id, existed, "upload cancelled");
        Ok(())
    }

    /// Resume handshake: returns (creating if necessary) the server's
    /// view of the session so the client can send only missing chunks.
    pub fn resume(
        &self,
        session_id: &str,
        query: &ResumeQuery,
    ) -> Result<ResumeRecord, ReceiveError> {
        self.validator.validate_resume(session_id, query)?;

        let snapshot = self.registry.get_or_create_with_meta(
            session_id,
            query.total_chunks,
            query.file_name.as_deref(),
            query.file_size,
            query.chunk_size,
        );
        Ok(ResumeRecord::from(snapshot))
    }

    pub fn status(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.registry.get(session_id)
    }

    pub fn status_all(&self) -> Vec<SessionSnapshot> {
        self.registry.list_all()
    }

    pub fn status_resumable(&self) -> Vec<SessionSnapshot> {
        self.registry.list_resumable()
    }

    pub fn statistics(&self) -> UploadStatistics {
        self.registry.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiskConfig, StorageConfig};
    use chunkferry_protocol::SessionState;
    use std::path::Path;

    fn coordinator_in(dir: &Path) -> UploadCoordinator {
        let config = ReceiverConfig {
            storage: StorageConfig {
                base_directory: dir.join("uploads"),
                temp_dir_prefix: "temp_".into(),
            },
            ..ReceiverConfig::default()
        };
        let guard = DiskGuard::with_probe(&DiskConfig::default(), Arc::new(|_| None));
        UploadCoordinator::from_config_with_guard(&config, guard).unwrap()
    }

    fn meta(session: &str, index: u32, total: u32) -> ChunkMeta {
        ChunkMeta {
            session_id: session.into(),
            chunk_index: index,
            total_chunks: total,
            file_name: Some("hello.txt".into()),
        }
    }

    #[tokio::test]
    async fn save_creates_session_and_records_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator_in(dir.path());

        c.save_chunk(&meta("s", 0, 3), b"Hello ").await.unwrap();

        let snap = c.status("s").unwrap();
        assert_eq!(snap.received_chunks, vec![0]);
        assert_eq!(snap.uploaded_bytes, 6);
        assert_eq!(snap.file_name.as_deref(), Some("hello.txt"));
        assert!(c.store().exists("s", 0).await);
    }

    #[tokio::test]
    async fn replayed_chunk_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator_in(dir.path());

        c.save_chunk(&meta("s", 1, 3), b"World ").await.unwrap();
        c.save_chunk(&meta("s", 1, 3), b"World ").await.unwrap();
        c.save_chunk(&meta("s", 1, 3), b"World ").await.unwrap();

        let snap = c.status("s").unwrap();
        assert_eq!(snap.received_chunks, vec![1]);
        assert_eq!(snap.uploaded_bytes, 6);
    }

    #[tokio::test]
    async fn save_rejects_invalid_meta() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator_in(dir.path());

        let err = c.save_chunk(&meta("s", 3, 3), b"x").await.unwrap_err();
        assert!(matches!(err, ReceiveError::Validation(_)));
        assert!(c.status("s").is_none());
    }

    #[tokio::test]
    async fn finalize_happy_path_out_of_order() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator_in(dir.path());

        c.save_chunk(&meta("s", 2, 3), b"!").await.unwrap();
        c.save_chunk(&meta("s", 0, 3), b"Hello ").await.unwrap();
        c.save_chunk(&meta("s", 1, 3), b"World ").await.unwrap();

        let out = c.finalize("s").await.unwrap();
        assert_eq!(std::fs::read(&out.path).unwrap(), b"Hello World !");

        // Session and temp data are gone.
        assert!(c.status("s").is_none());
        assert!(!c.store().temp_dir("s").exists());
    }

    #[tokio::test]
    async fn finalize_refuses_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator_in(dir.path());

        c.save_chunk(&meta("s", 0, 4), b"a").await.unwrap();
        c.save_chunk(&meta("s", 2, 4), b"c").await.unwrap();
        c.save_chunk(&meta("s", 3, 4), b"d").await.unwrap();

        let err = c.finalize("s").await.unwrap_err();
        match err {
            ReceiveError::IncompleteUpload { missing, .. } => assert_eq!(missing, vec![1]),
            other => panic!("expected IncompleteUpload, got {other:?}"),
        }
        // Session remains active and resumable.
        let snap = c.status("s").unwrap();
        assert_eq!(snap.state, SessionState::Active);
        assert!(snap.can_resume);
    }

    #[tokio::test]
    async fn finalize_unknown_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator_in(dir.path());
        assert!(matches!(
            c.finalize("ghost").await.unwrap_err(),
            ReceiveError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn second_finalize_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator_in(dir.path());

        c.save_chunk(&meta("s", 0, 1), b"only").await.unwrap();
        c.finalize("s").await.unwrap();

        assert!(matches!(
            c.finalize("s").await.unwrap_err(),
            ReceiveError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn failed_assembly_marks_failed_and_keeps_temp() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReceiverConfig {
            storage: StorageConfig {
                base_directory: dir.path().join("uploads"),
                temp_dir_prefix: "temp_".into(),
            },
            ..ReceiverConfig::default()
        };
        // Store writes succeed (plenty of space) until assembly, which
        // sees a full disk.
        let roomy = DiskGuard::with_probe(&DiskConfig::default(), Arc::new(|_| None));
        let store = ChunkStore::open(
            config.storage.base_directory.clone(),
            "temp_",
            roomy,
        )
        .unwrap();
        let full = DiskGuard::with_probe(&DiskConfig::default(), Arc::new(|_| Some(0)));
        let assembler = Assembler::new(store.clone(), full);
        let validator = ChunkValidator::new(
            config.chunk.clone(),
            config.file.clone(),
            config.validation.clone(),
        );
        let c = UploadCoordinator::new(Arc::new(StatusRegistry::new()), store, assembler, validator);

        c.save_chunk(&meta("s", 0, 1), b"payload").await.unwrap();
        let err = c.finalize("s").await.unwrap_err();
        assert!(matches!(err, ReceiveError::InsufficientDiskSpace { .. }));

        let snap = c.status("s").unwrap();
        assert_eq!(snap.state, SessionState::Failed);
        assert!(snap.error_message.is_some());
        assert!(c.store().temp_dir("s").exists());
    }

    #[tokio::test]
    async fn cancel_removes_everything_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator_in(dir.path());

        c.save_chunk(&meta("s", 0, 2), b"a").await.unwrap();
        c.cancel("s").await.unwrap();

        assert!(c.status("s").is_none());
        assert!(!c.store().temp_dir("s").exists());

        c.cancel("s").await.unwrap();
        c.cancel("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn resume_reports_missing_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator_in(dir.path());

        for i in 0..5 {
            c.save_chunk(&meta("s", i, 10), b"x").await.unwrap();
        }

        let record = c
            .resume(
                "s",
                &ResumeQuery {
                    total_chunks: 10,
                    file_name: None,
                    file_size: None,
                    chunk_size: None,
                },
            )
            .unwrap();

        assert_eq!(record.received_chunks, vec![0, 1, 2, 3, 4]);
        assert_eq!(record.missing_chunks, vec![5, 6, 7, 8, 9]);
        assert_eq!(record.next_expected_chunk, 5);
        assert!(record.can_resume);
        assert!(!record.completed);
    }

    #[tokio::test]
    async fn resume_creates_fresh_session_with_meta() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator_in(dir.path());

        let record = c
            .resume(
                "new",
                &ResumeQuery {
                    total_chunks: 4,
                    file_name: Some("video.mp4".into()),
                    file_size: Some(4096),
                    chunk_size: Some(1024),
                },
            )
            .unwrap();

        assert_eq!(record.total_chunks, 4);
        assert_eq!(record.file_name.as_deref(), Some("video.mp4"));
        assert_eq!(record.missing_chunks, vec![0, 1, 2, 3]);
        assert_eq!(record.uploaded_bytes, 0);
    }

    #[tokio::test]
    async fn permutation_independence() {
        // Any submission order yields the same assembled bytes.
        let orders: [[u32; 4]; 3] = [[0, 1, 2, 3], [3, 1, 0, 2], [2, 0, 3, 1]];
        let parts: [&[u8]; 4] = [b"aa", b"bb", b"cc", b"dd"];

        for (n, order) in orders.iter().enumerate() {
            let dir = tempfile::tempdir().unwrap();
            let c = coordinator_in(dir.path());
            let session = format!("perm-{n}");
            for &i in order {
                c.save_chunk(
                    &ChunkMeta {
                        session_id: session.clone(),
                        chunk_index: i,
                        total_chunks: 4,
                        file_name: Some("out.bin".into()),
                    },
                    parts[i as usize],
                )
                .await
                .unwrap();
            }
            let out = c.finalize(&session).await.unwrap();
            assert_eq!(std::fs::read(&out.path).unwrap(), b"aabbccdd");
        }
    }

    #[tokio::test]
    async fn statistics_reflect_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator_in(dir.path());

        c.save_chunk(&meta("a", 0, 2), b"x").await.unwrap();
        c.save_chunk(&meta("b", 0, 1), b"y").await.unwrap();
        c.finalize("b").await.unwrap();

        let stats = c.statistics();
        // "b" was removed on successful finalize.
        assert_eq!(stats.total, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.completed, 0);
    }
}
