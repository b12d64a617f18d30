//! Native filesystem implementation using tokio::fs, confined to a root.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use texsync_core::fs::{FileSystem, FsError, Result};
use texsync_core::path::validate_filename;
use tokio::fs;
use tracing::warn;

/// Native filesystem implementation for the daemon
pub struct NativeFs {
    /// Canonical storage root; every resolved path must stay under it
    base_path: PathBuf,
}

impl NativeFs {
    /// Open (creating if needed) the storage root.
    pub async fn open(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref();
        fs::create_dir_all(base_path)
            .await
            .map_err(|e| FsError::Io(format!("Cannot create storage root: {}", e)))?;
        let base_path = fs::canonicalize(base_path)
            .await
            .map_err(|e| FsError::Io(format!("Invalid storage root: {}", e)))?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve `path` under the root, refusing anything that would escape it.
    ///
    /// The target may not exist yet, so the nearest existing ancestor is
    /// canonicalized and compared against the canonical root. This catches
    /// symlinks inside the root that point outside it.
    async fn full_path(&self, path: &str) -> Result<PathBuf> {
        let invalid = |reason: String| FsError::InvalidPath {
            path: path.to_string(),
            reason,
        };

        let clean = validate_filename(path).map_err(|e| invalid(e.to_string()))?;
        let full_path = self.base_path.join(&clean);

        for ancestor in full_path.ancestors() {
            match fs::canonicalize(ancestor).await {
                Ok(resolved) => {
                    if !resolved.starts_with(&self.base_path) {
                        warn!("Refusing {}: resolves to {:?}", path, resolved);
                        return Err(invalid("resolves outside the storage root".to_string()));
                    }
                    return Ok(full_path);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(FsError::Io(e.to_string())),
            }
        }

        Err(invalid("storage root is missing".to_string()))
    }
}

fn io_error(path: &str, e: std::io::Error) -> FsError {
    if e.kind() == ErrorKind::NotFound {
        FsError::NotFound(path.to_string())
    } else {
        FsError::Io(e.to_string())
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<String> {
        let full_path = self.full_path(path).await?;
        fs::read_to_string(&full_path)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        let full_path = self.full_path(path).await?;

        // Create parent directories if needed
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FsError::Io(e.to_string()))?;
        }

        fs::write(&full_path, content)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path).await?;
        fs::try_exists(&full_path)
            .await
            .map_err(|e| FsError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::open(dir.path()).await.unwrap();

        fs.write("chapters/one.tex", "Hello").await.unwrap();
        assert!(fs.exists("chapters/one.tex").await.unwrap());
        assert_eq!(fs.read("chapters/one.tex").await.unwrap(), "Hello");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("chapters/one.tex")).unwrap(),
            "Hello"
        );
    }

    #[tokio::test]
    async fn test_open_creates_missing_root() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::open(dir.path().join("fresh")).await.unwrap();
        assert!(fs.base_path().is_dir());
        assert!(fs.base_path().is_absolute());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::open(dir.path()).await.unwrap();

        assert!(!fs.exists("nope.tex").await.unwrap());
        assert!(matches!(
            fs.read("nope.tex").await,
            Err(FsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_traversal_is_refused() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::open(dir.path().join("root")).await.unwrap();

        let err = fs.write("../escape.tex", "x").await.unwrap_err();
        assert!(matches!(err, FsError::InvalidPath { .. }));
        assert!(!dir.path().join("escape.tex").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_directory_cannot_escape_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        let secret = dir.path().join("secret");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&secret).unwrap();
        std::os::unix::fs::symlink(&secret, root.join("link")).unwrap();

        let fs = NativeFs::open(&root).await.unwrap();

        let err = fs.write("link/pwned.tex", "escaped").await.unwrap_err();
        assert!(matches!(err, FsError::InvalidPath { .. }));
        assert!(!secret.join("pwned.tex").exists());

        let err = fs.write("link/new/deeper.tex", "escaped").await.unwrap_err();
        assert!(matches!(err, FsError::InvalidPath { .. }));
        assert!(!secret.join("new").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_file_cannot_be_read_outside_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(dir.path().join("passwd"), "secret").unwrap();
        std::os::unix::fs::symlink(dir.path().join("passwd"), root.join("main.tex")).unwrap();

        let fs = NativeFs::open(&root).await.unwrap();
        assert!(matches!(
            fs.read("main.tex").await,
            Err(FsError::InvalidPath { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_inside_root_is_allowed() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir_all(root.join("chapters")).unwrap();
        std::os::unix::fs::symlink(root.join("chapters"), root.join("ch")).unwrap();

        let fs = NativeFs::open(&root).await.unwrap();
        fs.write("ch/one.tex", "inside").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(root.join("chapters/one.tex")).unwrap(),
            "inside"
        );
    }

    #[tokio::test]
    async fn test_leading_slash_stays_under_root() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::open(dir.path()).await.unwrap();

        fs.write("/main.tex", "x").await.unwrap();
        assert!(dir.path().join("main.tex").exists());
    }
}
