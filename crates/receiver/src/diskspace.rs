//! Free-space preflight checks.
//!
//! Allocation paths ask the guard before writing so the server fails a
//! request with a distinct error instead of filling the disk mid-write.

use std::path::Path;
use std::sync::Arc;

use sysinfo::Disks;

use crate::config::DiskConfig;
use crate::error::ReceiveError;

/// Probe returning usable bytes on the filesystem containing `path`,
/// or `None` when it cannot be determined.
pub type SpaceProbe = Arc<dyn Fn(&Path) -> Option<u64> + Send + Sync>;

/// Preflight guard over a [`SpaceProbe`] and the configured thresholds.
#[derive(Clone)]
pub struct DiskGuard {
    safety_buffer: u64,
    min_free: u64,
    probe: SpaceProbe,
}

impl std::fmt::Debug for DiskGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskGuard")
            .field("safety_buffer", &self.safety_buffer)
            .field("min_free", &self.min_free)
            .finish()
    }
}

impl DiskGuard {
    /// Guard backed by the system disk list.
    pub fn new(cfg: &DiskConfig) -> Self {
        Self::with_probe(cfg, Arc::new(available_space))
    }

    /// Guard with a custom probe. Tests use this to simulate a full disk.
    pub fn with_probe(cfg: &DiskConfig, probe: SpaceProbe) -> Self {
        Self {
            safety_buffer: cfg.safety_buffer,
            min_free: cfg.min_free,
            probe,
        }
    }

    /// Fails with [`ReceiveError::InsufficientDiskSpace`] unless the
    /// filesystem holding `path` can absorb `required` bytes while
    /// keeping the safety buffer and the absolute minimum free.
    ///
    /// An undeterminable probe result is treated as permitted; refusing
    /// every write on a filesystem the probe cannot name would brick
    /// otherwise healthy setups (containers, network mounts).
    pub fn ensure(&self, path: &Path, required: u64) -> Result<(), ReceiveError> {
        let Some(available) = (self.probe)(path) else {
            tracing::debug!(path = %path.display(), "free space unknown, allowing write");
            return Ok(());
        };

        let needed = required.saturating_add(self.safety_buffer);
        if available >= needed && available >= self.min_free {
            return Ok(());
        }

        tracing::warn!(
            path = %path.display(),
            required,
            available = %format_bytes(available),
            "insufficient disk space"
        );
        Err(ReceiveError::InsufficientDiskSpace {
            required,
            available,
        })
    }
}

/// Usable bytes on the filesystem containing `path`.
///
/// Matches the disk whose mount point is the deepest prefix of `path`.
pub fn available_space(path: &Path) -> Option<u64> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    let mut best: Option<(usize, u64)> = None;

    for disk in &disks {
        let mount = disk.mount_point();
        if !canonical.starts_with(mount) {
            continue;
        }
        let depth = mount.components().count();
        match best {
            Some((d, _)) if d >= depth => {}
            _ => best = Some((depth, disk.available_space())),
        }
    }

    best.map(|(_, available)| available)
}

/// Human-readable byte count for log and error messages.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}
