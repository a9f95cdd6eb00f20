//! Positional chunk reads from the source file.
//!
//! One open handle serves all pump workers: positional reads take
//! `&self` and never move a shared cursor, so concurrent chunk reads
//! cannot race.

use std::fs::File;
use std::path::Path;

/// Produces chunk byte ranges from an open file on demand.
#[derive(Debug)]
pub struct ChunkSlicer {
    file: File,
    len: u64,
}

impl ChunkSlicer {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    /// Source file length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of chunks for a given chunk size. An empty file is one
    /// (empty) chunk so that zero-byte uploads still round-trip.
    pub fn chunk_count(&self, chunk_size: u64) -> u32 {
        if self.len == 0 {
            return 1;
        }
        self.len.div_ceil(chunk_size) as u32
    }

    /// Reads chunk `index`: bytes `[index * chunk_size, min((index + 1)
    /// * chunk_size, len))`.
    pub fn read_chunk(&self, index: u32, chunk_size: u64) -> std::io::Result<Vec<u8>> {
        let start = u64::from(index) * chunk_size;
        if self.len == 0 && index == 0 {
            return Ok(Vec::new());
        }
        if start >= self.len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("chunk {index} starts past end of file"),
            ));
        }

        let end = (start + chunk_size).min(self.len);
        let mut buf = vec![0u8; (end - start) as usize];
        self.read_exact_at(&mut buf, start)?;
        Ok(buf)
    }

    #[cfg(unix)]
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)
    }

    #[cfg(windows)]
    fn read_exact_at(&self, buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
        use std::os::windows::fs::FileExt;
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.seek_read(&mut buf[filled..], offset)?;
            if n == 0 {
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            filled += n;
            offset += n as u64;
        }
        Ok(())
    }
}
