//! File entity: one document's in-memory / on-disk duality.
//!
//! A file can either live only on disk (`Closed`) or be staged into memory for
//! reads and edits. Edits are applied to the in-memory snapshot immediately
//! and persisted later by `commit()`, which lets the command queue collapse a
//! burst of keystroke-level edits into one write.
//!
//! ```text
//! CLOSED --stage--> STAGED --edit--> MODIFIED --commit--> STAGED --close--> CLOSED
//! ```

use crate::diff::{self, DiffOp};
use crate::error::{Result, SyncError};
use crate::fs::{FileSystem, FsError};
use std::fmt;
use tracing::debug;

/// Lifecycle state of a file entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Only the backing store is authoritative
    Closed,
    /// In memory and identical to the last committed content
    Staged,
    /// In memory with edits not yet persisted
    Modified,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileStatus::Closed => "CLOSED",
            FileStatus::Staged => "STAGED",
            FileStatus::Modified => "MODIFIED",
        };
        f.write_str(name)
    }
}

/// A single document tracked by the registry.
#[derive(Debug)]
pub struct FileEntity {
    filename: String,
    content: String,
    /// Patches applied since the last successful commit
    diffs: Vec<Vec<DiffOp>>,
    status: FileStatus,
    /// Bumped on every successful edit or write
    revision: u64,
}

impl FileEntity {
    /// Create a closed entity for `filename`. Nothing is read until `stage()`.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: String::new(),
            diffs: Vec::new(),
            status: FileStatus::Closed,
            revision: 0,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Patches applied since the last commit, oldest first.
    pub fn pending_diffs(&self) -> &[Vec<DiffOp>] {
        &self.diffs
    }

    pub fn is_open(&self) -> bool {
        self.status != FileStatus::Closed
    }

    fn require_open(&self, operation: &'static str) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SyncError::InvalidFileState {
                filename: self.filename.clone(),
                status: self.status,
                operation,
            })
        }
    }

    fn storage_error(&self, source: FsError) -> SyncError {
        SyncError::StorageIo {
            filename: self.filename.clone(),
            source,
        }
    }

    /// Load content from storage, creating an empty backing file if none exists.
    ///
    /// No-op when already staged, so a repeated create never discards edits.
    pub async fn stage(&mut self, fs: &dyn FileSystem) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        let exists = fs
            .exists(&self.filename)
            .await
            .map_err(|e| self.storage_error(e))?;

        let content = if exists {
            fs.read(&self.filename)
                .await
                .map_err(|e| self.storage_error(e))?
        } else {
            debug!("Creating empty backing file for {}", self.filename);
            fs.write(&self.filename, "")
                .await
                .map_err(|e| self.storage_error(e))?;
            String::new()
        };

        self.content = content;
        self.diffs.clear();
        self.status = FileStatus::Staged;
        Ok(())
    }

    /// Current in-memory snapshot.
    pub fn read(&self) -> Result<&str> {
        self.require_open("read")?;
        Ok(&self.content)
    }

    /// Apply a patch to the snapshot.
    ///
    /// On conflict the entity is left exactly as it was.
    pub fn edit(&mut self, ops: Vec<DiffOp>) -> Result<()> {
        self.require_open("edit")?;

        let updated = diff::apply(&self.content, &ops).map_err(|conflict| {
            SyncError::PatchConflict {
                filename: self.filename.clone(),
                conflict,
            }
        })?;

        self.content = updated;
        self.diffs.push(ops);
        self.status = FileStatus::Modified;
        self.revision += 1;
        Ok(())
    }

    /// Overwrite the snapshot wholesale.
    ///
    /// Recorded as a diff against the previous snapshot like any other edit.
    pub fn write(&mut self, content: impl Into<String>) -> Result<()> {
        self.require_open("write")?;

        let content = content.into();
        let ops = diff::compute(&self.content, &content);
        self.content = content;
        self.diffs.push(ops);
        self.status = FileStatus::Modified;
        self.revision += 1;
        Ok(())
    }

    /// Persist the snapshot if it has been modified.
    ///
    /// Returns whether anything was written. A failed write leaves the entity
    /// `Modified` so a later commit can retry.
    pub async fn commit(&mut self, fs: &dyn FileSystem) -> Result<bool> {
        self.require_open("commit")?;

        if self.status == FileStatus::Staged {
            return Ok(false);
        }

        fs.write(&self.filename, &self.content)
            .await
            .map_err(|e| self.storage_error(e))?;

        debug!(
            "Committed {} ({} pending diff(s), revision {})",
            self.filename,
            self.diffs.len(),
            self.revision
        );
        self.diffs.clear();
        self.status = FileStatus::Staged;
        Ok(true)
    }

    /// Drop the in-memory snapshot. Uncommitted edits are lost.
    pub fn close(&mut self) {
        self.content.clear();
        self.diffs.clear();
        self.status = FileStatus::Closed;
    }
}
