//! Streaming assembly of received chunks into the final file.
//!
//! Chunks are transferred file-to-file with `std::io::copy`, which the
//! kernel turns into `copy_file_range`/`sendfile` where supported, so
//! no chunk is ever fully materialized in user-space memory.

use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use crate::diskspace::DiskGuard;
use crate::error::ReceiveError;
use crate::store::ChunkStore;

/// Result of a successful assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFile {
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct Assembler {
    store: ChunkStore,
    guard: DiskGuard,
}

impl Assembler {
    pub fn new(store: ChunkStore, guard: DiskGuard) -> Self {
        Self { store, guard }
    }

    /// Concatenates chunks `0..total_chunks` in index order into a file
    /// under the base directory.
    ///
    /// The destination name comes from `file_name`, falling back to
    /// `<session_id>.bin`; an existing file of that name is never
    /// overwritten — `_1`, `_2`, … suffixes are tried instead. A failed
    /// assembly deletes the partial destination and leaves the chunk
    /// files untouched for inspection.
    pub async fn assemble(
        &self,
        session_id: &str,
        total_chunks: u32,
        file_name: Option<&str>,
    ) -> Result<AssembledFile, ReceiveError> {
        let chunk_paths = self.store.list_all(session_id, total_chunks).await?;
        let expected = self.store.total_size(session_id, total_chunks).await?;

        self.guard.ensure(self.store.base_dir(), expected)?;

        let destination =
            resolve_destination(self.store.base_dir(), file_name, session_id);
        tracing::info!(
            session = %session_id,
            chunks = total_chunks,
            bytes = expected,
            destination = %destination.display(),
            "assembling"
        );

        let session = session_id.to_string();
        let dest = destination.clone();
        let written = tokio::task::spawn_blocking(move || {
            concat_chunks(&chunk_paths, &dest, &session)
        })
        .await
        .map_err(|e| ReceiveError::Assembly {
            session: session_id.to_string(),
            reason: format!("assembly task failed: {e}"),
        })??;

        if written != expected {
            remove_partial(&destination);
            return Err(ReceiveError::Assembly {
                session: session_id.to_string(),
                reason: format!("assembled {written} bytes, expected {expected}"),
            });
        }

        tracing::info!(
            session = %session_id,
            bytes = written,
            "assembly complete"
        );
        Ok(AssembledFile {
            path: destination,
            bytes: written,
        })
    }

    /// Re-checks that an assembled file has the expected size.
    pub async fn verify(&self, file: &AssembledFile) -> Result<(), ReceiveError> {
        let meta = tokio::fs::metadata(&file.path).await?;
        if meta.len() != file.bytes {
            return Err(ReceiveError::Assembly {
                session: String::new(),
                reason: format!(
                    "size mismatch for {}: expected {}, found {}",
                    file.path.display(),
                    file.bytes,
                    meta.len()
                ),
            });
        }
        Ok(())
    }
}

/// Sequentially transfers every chunk into `dest`, verifying per-chunk
/// byte counts. Runs on the blocking pool.
fn concat_chunks(
    chunk_paths: &[PathBuf],
    dest: &Path,
    session: &str,
) -> Result<u64, ReceiveError> {
    let result = (|| -> std::io::Result<u64> {
        let mut out = std::fs::File::create(dest)?;
        let mut written = 0u64;

        for (index, chunk_path) in chunk_paths.iter().enumerate() {
            let mut chunk = std::fs::File::open(chunk_path)?;
            let chunk_len = chunk.seek(std::io::SeekFrom::End(0))?;
            chunk.seek(std::io::SeekFrom::Start(0))?;

            // Concrete File-to-File copy takes the kernel fast path.
            let copied = std::io::copy(&mut chunk, &mut out)?;
            if copied != chunk_len {
                return Err(std::io::Error::other(format!(
                    "incomplete transfer of chunk {index}: expected {chunk_len} bytes, copied {copied}"
                )));
            }
            written += copied;
        }

        out.flush()?;
        Ok(written)
    })();

    result.map_err(|e| {
        remove_partial(dest);
        ReceiveError::Assembly {
            session: session.to_string(),
            reason: e.to_string(),
        }
    })
}

fn remove_partial(dest: &Path) {
    if let Err(e) = std::fs::remove_file(dest)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(
            destination = %dest.display(),
            error = %e,
            "failed to remove partial destination"
        );
    }
}

/// Picks a destination path that does not collide with an existing file.
fn resolve_destination(base: &Path, file_name: Option<&str>, session_id: &str) -> PathBuf {
    let name = match file_name.filter(|n| !n.trim().is_empty()) {
        Some(n) => n.to_string(),
        None => format!("{session_id}.bin"),
    };

    let mut candidate = base.join(&name);
    let (stem, ext) = split_name(&name);
    let mut counter = 1;
    while candidate.exists() {
        let next = match ext {
            Some(ext) => format!("{stem}_{counter}.{ext}"),
            None => format!("{stem}_{counter}"),
        };
        candidate = base.join(next);
        counter += 1;
    }
    candidate
}

/// Splits `name` into stem and extension; dot-files have no extension.
fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => {
            (&name[..idx], Some(&name[idx + 1..]))
        }
        _ => (name, None),
    }
}
