//! File registry: filename -> file entity, with auto-registration.
//!
//! The registry is the de-duplication point for documents. However many
//! commands or sessions reference a filename, they all resolve to the same
//! entity, which is what keeps concurrent edits from racing each other into
//! lost updates.
//!
//! Removing a file only unlists it. Backing storage is never deleted here.

use crate::file::FileEntity;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Shared handle to a registered entity.
///
/// The entity lock is async because staging and committing hold it across
/// storage I/O.
pub type FileHandle = Arc<tokio::sync::Mutex<FileEntity>>;

/// Registry of active files.
#[derive(Default)]
pub struct FileRegistry {
    files: Mutex<HashMap<String, FileHandle>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the entity for `filename`, registering a closed one if needed.
    pub fn resolve(&self, filename: &str) -> FileHandle {
        let mut files = self.files.lock().unwrap();
        files
            .entry(filename.to_string())
            .or_insert_with(|| {
                debug!("Registering {}", filename);
                Arc::new(tokio::sync::Mutex::new(FileEntity::new(filename)))
            })
            .clone()
    }

    /// Look up an entity without registering it.
    pub fn get(&self, filename: &str) -> Option<FileHandle> {
        let files = self.files.lock().unwrap();
        files.get(filename).cloned()
    }

    /// Unlist `filename`. Returns the entity that was removed, if any.
    pub fn remove(&self, filename: &str) -> Option<FileHandle> {
        let mut files = self.files.lock().unwrap();
        let removed = files.remove(filename);
        if removed.is_some() {
            debug!("Unlisted {}", filename);
        }
        removed
    }

    /// Snapshot of all registered entities.
    pub fn handles(&self) -> Vec<(String, FileHandle)> {
        let files = self.files.lock().unwrap();
        files
            .iter()
            .map(|(name, handle)| (name.clone(), Arc::clone(handle)))
            .collect()
    }

    pub fn filenames(&self) -> Vec<String> {
        let files = self.files.lock().unwrap();
        let mut names: Vec<String> = files.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
