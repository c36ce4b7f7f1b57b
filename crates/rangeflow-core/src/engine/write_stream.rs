//! Write adapter contract and the built-in destinations
//!
//! Chunks complete in arbitrary order, so every adapter must accept
//! concurrent, out-of-order writes addressed by absolute offset.

use async_trait::async_trait;
use std::io;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A destination that persists buffers at absolute offsets
#[async_trait]
pub trait WriteStream: Send + Sync {
    /// Size the destination before the first write
    async fn prepare(&self, _total_size: u64) -> io::Result<()> {
        Ok(())
    }

    /// Persist `bytes` starting at `offset`
    async fn write(&self, offset: u64, bytes: &[u8]) -> io::Result<()>;

    /// Flush and release the destination. Must be idempotent.
    async fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes into a file on disk, pre-sized to the transfer length
pub struct FileWriteStream {
    path: PathBuf,
    file: Mutex<Option<File>>,
    closed: Mutex<bool>,
}

impl FileWriteStream {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
            closed: Mutex::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> io::Result<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .await
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "write stream is closed")
}

#[async_trait]
impl WriteStream for FileWriteStream {
    async fn prepare(&self, total_size: u64) -> io::Result<()> {
        if *self.closed.lock().await {
            return Err(closed_error());
        }

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        if let Some(file) = guard.as_mut() {
            file.set_len(total_size).await?;
        }

        info!("Prepared {:?} ({} bytes)", self.path, total_size);
        Ok(())
    }

    async fn write(&self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        if *self.closed.lock().await {
            return Err(closed_error());
        }

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let file = guard.as_mut().ok_or_else(closed_error)?;

        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        debug!("Wrote {} bytes at offset {} to {:?}", bytes.len(), offset, self.path);
        Ok(())
    }

    async fn close(&self) -> io::Result<()> {
        let mut closed = self.closed.lock().await;
        if *closed {
            return Ok(());
        }
        *closed = true;

        if let Some(mut file) = self.file.lock().await.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }
}

type WriteCallback = Box<dyn Fn(u64, &[u8]) + Send + Sync>;

/// Forwards every write to a closure, for in-memory or custom sinks
pub struct CallbackWriteStream {
    callback: WriteCallback,
}

impl CallbackWriteStream {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(u64, &[u8]) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl WriteStream for CallbackWriteStream {
    async fn write(&self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        (self.callback)(offset, bytes);
        Ok(())
    }
}
