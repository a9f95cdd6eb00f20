//! Receiver configuration.
//!
//! Every knob has a default; a bare `ReceiverConfig::default()` yields
//! a working server writing to `./uploads`.

use std::path::PathBuf;
use std::time::Duration;

use chunkferry_protocol::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_COUNT, MAX_CHUNK_SIZE, MAX_FILE_SIZE};

#[derive(Debug, Clone, Default)]
pub struct ReceiverConfig {
    pub storage: StorageConfig,
    pub chunk: ChunkConfig,
    pub file: FileConfig,
    pub cleanup: CleanupConfig,
    pub validation: ValidationConfig,
    pub performance: PerformanceConfig,
    pub cors: CorsConfig,
    pub disk: DiskConfig,
}

/// Where chunks and assembled files live.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Base directory for assembled files and per-session temp dirs.
    pub base_directory: PathBuf,
    /// Prefix of per-session temporary directories.
    pub temp_dir_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_directory: PathBuf::from("uploads"),
            temp_dir_prefix: "temp_".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Chunk size clients are advised to use.
    pub default_size: u64,
    /// Largest accepted chunk payload.
    pub max_size: u64,
    /// Largest accepted chunk count per session.
    pub max_count: u32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            default_size: DEFAULT_CHUNK_SIZE,
            max_size: MAX_CHUNK_SIZE,
            max_count: MAX_CHUNK_COUNT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileConfig {
    /// Ceiling on the assembled file size, estimated from chunk geometry.
    pub max_size: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            max_size: MAX_FILE_SIZE,
        }
    }
}

/// Periodic eviction of terminal sessions.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub auto_cleanup_enabled: bool,
    /// Terminal sessions older than this are evicted.
    pub cleanup_delay: Duration,
    /// How often the janitor sweeps.
    pub sweep_interval: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            auto_cleanup_enabled: true,
            cleanup_delay: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Empty list permits any extension not on the block list.
    pub allowed_extensions: Vec<String>,
    pub blocked_extensions: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: Vec::new(),
            blocked_extensions: ["exe", "bat", "cmd", "scr", "com", "pif"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    /// Chunk requests in flight beyond this are shed with a retryable status.
    pub max_concurrent_uploads: usize,
    /// Upper bound on the blocking pool that runs disk writes and assembly.
    pub io_pool_size: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 10,
            io_pool_size: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:4200".into(),
                "http://localhost:4201".into(),
            ],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_headers: vec!["*".into()],
            allow_credentials: true,
            max_age: Duration::from_secs(3600),
        }
    }
}

/// Free-space thresholds for write and assembly preflight checks.
#[derive(Debug, Clone)]
pub struct DiskConfig {
    /// Added to every requested allocation before comparing to free space.
    pub safety_buffer: u64,
    /// Absolute floor of usable space that must remain.
    pub min_free: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            safety_buffer: 50 * 1024 * 1024,
            min_free: 100 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ReceiverConfig::default();
        assert_eq!(cfg.storage.base_directory, PathBuf::from("uploads"));
        assert_eq!(cfg.storage.temp_dir_prefix, "temp_");
        assert_eq!(cfg.chunk.max_size, 100 * 1024 * 1024);
        assert_eq!(cfg.chunk.max_count, 10_000);
        assert_eq!(cfg.file.max_size, 50 * 1024 * 1024 * 1024);
        assert_eq!(cfg.performance.max_concurrent_uploads, 10);
        assert_eq!(cfg.performance.io_pool_size, 4);
        assert_eq!(cfg.disk.safety_buffer, 50 * 1024 * 1024);
        assert_eq!(cfg.disk.min_free, 100 * 1024 * 1024);
        assert!(cfg.cleanup.auto_cleanup_enabled);
        assert_eq!(cfg.cleanup.cleanup_delay, Duration::from_secs(86_400));
    }

    #[test]
    fn default_block_list_covers_executables() {
        let cfg = ValidationConfig::default();
        assert!(cfg.allowed_extensions.is_empty());
        assert!(cfg.blocked_extensions.iter().any(|e| e == "exe"));
        assert!(cfg.blocked_extensions.iter().any(|e| e == "bat"));
    }
}
