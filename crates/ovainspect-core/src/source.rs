//! Range-addressable byte sources.
//!
//! The archive walker never holds an OVA in memory. It asks a [`ByteSource`]
//! for a sub-range view and materializes only that view, so the same walker
//! runs over an in-memory buffer, a memory-mapped file, or an async file
//! handle.
//!
//! Views clamp to the end of the underlying medium: a range that starts past
//! the end reads as empty and a range that runs past the end reads short.

use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// A lazily-read, sliceable view over a byte stream.
pub trait ByteSource: Sized {
    /// Length of this view in bytes. Zero when unknown.
    fn size(&self) -> u64;

    /// Returns a new view over `[start, end)`, relative to this view.
    ///
    /// This does no I/O.
    fn slice(&self, start: u64, end: u64) -> Self;

    /// Materializes the bytes of this view.
    fn read(&self) -> impl Future<Output = Result<Vec<u8>>>;
}

/// Narrows `[base_start, base_end)` to the relative range `[start, end)`.
fn narrow(base_start: u64, base_end: u64, start: u64, end: u64) -> (u64, u64) {
    let new_start = base_start.saturating_add(start).min(base_end);
    let new_end = base_start.saturating_add(end).min(base_end).max(new_start);
    (new_start, new_end)
}

/// A byte source over a shared in-memory buffer.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
    start: u64,
    end: u64,
}

impl MemorySource {
    /// Wraps a buffer.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        let end = data.len() as u64;
        Self {
            data,
            start: 0,
            end,
        }
    }
}

impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.end - self.start
    }

    fn slice(&self, start: u64, end: u64) -> Self {
        let (start, end) = narrow(self.start, self.end, start, end);
        Self {
            data: Arc::clone(&self.data),
            start,
            end,
        }
    }

    async fn read(&self) -> Result<Vec<u8>> {
        Ok(self.data[self.start as usize..self.end as usize].to_vec())
    }
}

/// A byte source over a memory-mapped file.
///
/// Pages are faulted in by the operating system only when a view is read.
#[derive(Clone)]
pub struct MmapSource {
    mmap: Arc<Mmap>,
    start: u64,
    end: u64,
}

impl MmapSource {
    /// Opens and maps a file read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| Error::io(e, path))?;

        // Safety: the mapping is read-only and the file handle outlives the call.
        // Concurrent truncation of the file by another process is not guarded against.
        let mmap = unsafe { Mmap::map(&file).map_err(|e| Error::io(e, path))? };
        let end = mmap.len() as u64;

        Ok(Self {
            mmap: Arc::new(mmap),
            start: 0,
            end,
        })
    }
}

impl ByteSource for MmapSource {
    fn size(&self) -> u64 {
        self.end - self.start
    }

    fn slice(&self, start: u64, end: u64) -> Self {
        let (start, end) = narrow(self.start, self.end, start, end);
        Self {
            mmap: Arc::clone(&self.mmap),
            start,
            end,
        }
    }

    async fn read(&self) -> Result<Vec<u8>> {
        Ok(self.mmap[self.start as usize..self.end as usize].to_vec())
    }
}

/// A byte source over an async file handle.
///
/// Every read seeks and materializes only the requested range. Views share
/// one handle; reads are serialized through it.
#[derive(Clone)]
pub struct FileSource {
    file: Arc<Mutex<File>>,
    path: Arc<PathBuf>,
    start: u64,
    end: u64,
}

impl FileSource {
    /// Opens a file for range reads.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await.map_err(|e| Error::io(e, path))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| Error::io(e, path))?
            .len();

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: Arc::new(path.to_path_buf()),
            start: 0,
            end: len,
        })
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.end - self.start
    }

    fn slice(&self, start: u64, end: u64) -> Self {
        let (start, end) = narrow(self.start, self.end, start, end);
        Self {
            file: Arc::clone(&self.file),
            path: Arc::clone(&self.path),
            start,
            end,
        }
    }

    async fn read(&self) -> Result<Vec<u8>> {
        let len = self.end - self.start;
        let mut buf = Vec::with_capacity(len as usize);
        if len == 0 {
            return Ok(buf);
        }

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(self.start))
            .await
            .map_err(|e| Error::io(e, self.path.as_path()))?;
        (&mut *file)
            .take(len)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| Error::io(e, self.path.as_path()))?;

        Ok(buf)
    }
}
