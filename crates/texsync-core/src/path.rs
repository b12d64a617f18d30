//! Filename validation against the storage root.
//!
//! Filenames arrive from clients, so they are checked before they are ever used
//! as registry keys or joined onto the storage root.

use std::path::{Component, Path};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("Filename is empty")]
    Empty,

    #[error("Path contains directory traversal")]
    DirectoryTraversal,

    #[error("Path is absolute")]
    AbsolutePath,

    #[error("Path contains a NUL byte")]
    NulByte,
}

/// Validate a client-supplied filename and return its normalized form.
///
/// A single leading `/` is stripped, `.` segments are dropped and any `..`
/// segment is rejected outright rather than resolved.
pub fn validate_filename(filename: &str) -> Result<String, PathError> {
    if filename.contains('\0') {
        return Err(PathError::NulByte);
    }

    let clean = filename.strip_prefix('/').unwrap_or(filename);

    let mut parts = Vec::new();
    for component in Path::new(clean).components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => return Err(PathError::DirectoryTraversal),
            },
            Component::CurDir => {}
            Component::ParentDir => return Err(PathError::DirectoryTraversal),
            Component::RootDir | Component::Prefix(_) => return Err(PathError::AbsolutePath),
        }
    }

    if parts.is_empty() {
        return Err(PathError::Empty);
    }

    Ok(parts.join("/"))
}
