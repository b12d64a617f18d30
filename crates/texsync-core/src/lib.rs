//! texsync-core: server-side synchronization core for collaborative LaTeX editing.
//!
//! This crate provides:
//! - Character-level diffs and strict patch application
//! - File entities with a CLOSED / STAGED / MODIFIED lifecycle
//! - A registry, command queue and batch-tick `Editor` service
//! - The JSON message envelope and per-client `Session` handling
//! - FileSystem and Compiler trait abstractions

pub mod command;
pub mod compile;
pub mod diff;
pub mod editor;
pub mod error;
pub mod file;
pub mod fs;
pub mod path;
pub mod protocol;
pub mod queue;
pub mod ready;
pub mod registry;
pub mod session;

pub use command::{Command, CommandKind};
pub use compile::{CompileError, CompileOutput, Compiler, GatedCompiler, compile_open_files};
pub use diff::{DiffOp, OpKind, PatchConflict};
pub use editor::{BatchReport, DEFAULT_BATCH_INTERVAL, Editor};
pub use error::SyncError;
pub use file::{FileEntity, FileStatus};
pub use fs::{FileSystem, FsError, InMemoryFs};
pub use path::{PathError, validate_filename};
pub use protocol::{Message, ProtocolError};
pub use queue::CommandQueue;
pub use ready::ReadyGate;
pub use registry::{FileHandle, FileRegistry};
pub use session::{Session, SessionId};
