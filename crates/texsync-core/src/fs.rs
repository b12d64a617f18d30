//! Storage trait abstraction for the document backing store.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in texsync-daemon) - Uses tokio::fs under a confined root
//!
//! Reads and writes are async so that slow disks run off the event loop.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Backing store for document content, keyed by filename relative to a root.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents as UTF-8 text
    async fn read(&self, path: &str) -> Result<String>;

    /// Write file contents (creates parent directories if needed)
    async fn write(&self, path: &str, content: &str) -> Result<()>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// In-memory filesystem for testing
pub struct InMemoryFs {
    files: RwLock<HashMap<String, String>>,
    /// Makes every write fail, to exercise storage error paths
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    /// Number of successful writes, for asserting batching behavior
    write_count: RwLock<usize>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            write_count: RwLock::new(0),
        }
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent reads fail. `exists` is unaffected.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Peek at stored content without going through the trait.
    pub fn contents(&self, path: &str) -> Option<String> {
        let files = self.files.read().unwrap();
        files.get(&Self::normalize_path(path)).cloned()
    }

    /// Total successful writes so far.
    pub fn write_count(&self) -> usize {
        *self.write_count.read().unwrap()
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<String> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(FsError::Io(format!("read of {} refused", path)));
        }

        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap();
        files
            .get(&path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path))
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FsError::Io(format!("write to {} refused", path)));
        }

        let path = Self::normalize_path(path);
        let mut files = self.files.write().unwrap();
        files.insert(path, content.to_string());
        drop(files);

        *self.write_count.write().unwrap() += 1;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap();
        Ok(files.contains_key(&path))
    }
}
