//! Error taxonomy for the synchronization core.
//!
//! None of these are process-fatal. The worst outcome of any of them is that a
//! single command is rejected or a single channel is dropped.

use crate::diff::PatchConflict;
use crate::file::FileStatus;
use crate::fs::FsError;
use crate::path::PathError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Cannot {operation} {filename}: file is {status}")]
    InvalidFileState {
        filename: String,
        status: FileStatus,
        operation: &'static str,
    },

    #[error("Patch conflict on {filename}: {conflict}")]
    PatchConflict {
        filename: String,
        #[source]
        conflict: PatchConflict,
    },

    #[error("Malformed message: {0}")]
    ProtocolDecode(String),

    #[error("Storage error on {filename}: {source}")]
    StorageIo {
        filename: String,
        #[source]
        source: FsError,
    },

    #[error("Invalid filename {filename:?}: {source}")]
    InvalidPath {
        filename: String,
        #[source]
        source: PathError,
    },
}

impl SyncError {
    /// Stable identifier used as `error.body.kind` on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::InvalidFileState { .. } => "invalid_file_state",
            SyncError::PatchConflict { .. } => "patch_conflict",
            SyncError::ProtocolDecode(_) => "protocol_decode",
            SyncError::StorageIo { .. } => "storage_io",
            SyncError::InvalidPath { .. } => "invalid_path",
        }
    }

    /// The file the error is about, if any.
    pub fn filename(&self) -> Option<&str> {
        match self {
            SyncError::InvalidFileState { filename, .. }
            | SyncError::PatchConflict { filename, .. }
            | SyncError::StorageIo { filename, .. }
            | SyncError::InvalidPath { filename, .. } => Some(filename),
            SyncError::ProtocolDecode(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
