//! File-backed storage rooted at a configured directory.
//!
//! Every requested name is reduced to its final path component before it is
//! joined to the root, so resolved paths are always direct children of the
//! root. Writes are not serialized: concurrent writers to the same name race
//! and the last one to finish wins.

use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Result of a storage operation
#[derive(Debug)]
pub enum StoreError {
    /// Name has no usable final component (empty, `.` or `..`)
    InvalidName(String),
    /// File does not exist
    NotFound(PathBuf),
    /// File exists but could not be read
    Read(PathBuf, io::Error),
    /// File could not be created or written
    Write(PathBuf, io::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::InvalidName(name) => write!(f, "Invalid file name '{}'", name),
            StoreError::NotFound(path) => write!(f, "File '{}' not found", path.display()),
            StoreError::Read(path, e) => {
                write!(f, "Failed to read '{}': {}", path.display(), e)
            }
            StoreError::Write(path, e) => {
                write!(f, "Failed to write '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Read/write access to files directly beneath the storage root
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client-supplied name to a path beneath the root.
    ///
    /// Only the final component survives; both `/` and `\` act as separators.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, StoreError> {
        let trimmed = name.trim_end_matches(['/', '\\']);
        let base = trimmed.rsplit(['/', '\\']).next().unwrap_or_default();

        if base.is_empty() || base == "." || base == ".." {
            return Err(StoreError::InvalidName(name.to_string()));
        }

        Ok(self.root.join(base))
    }

    /// Read a file's full contents
    pub async fn read(&self, name: &str) -> Result<Bytes, StoreError> {
        let path = self.resolve(name)?;
        trace!(path = %path.display(), "Reading file");

        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(Bytes::from(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(path)),
            Err(e) => Err(StoreError::Read(path, e)),
        }
    }

    /// Create or truncate a file and write `contents` to it
    pub async fn write(&self, name: &str, contents: &[u8]) -> Result<(), StoreError> {
        let path = self.resolve(name)?;
        debug!(path = %path.display(), bytes = contents.len(), "Writing file");

        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| StoreError::Write(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_plain_name() {
        let store = FileStore::new("/srv/files");
        assert_eq!(
            store.resolve("notes.txt").unwrap(),
            PathBuf::from("/srv/files/notes.txt")
        );
    }

    #[test]
    fn test_resolve_strips_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        for name in [
            "../../etc/passwd",
            "/etc/passwd",
            "a/b/../../../passwd",
            "..\\..\\windows\\passwd",
            "nested/dir/passwd/",
            "./passwd",
        ] {
            let path = store.resolve(name).unwrap();
            assert_eq!(path.parent(), Some(dir.path()), "name {:?}", name);
            assert_eq!(path.file_name().unwrap(), "passwd", "name {:?}", name);
        }
    }

    #[test]
    fn test_resolve_rejects_dot_components() {
        let store = FileStore::new("/srv/files");
        for name in ["", "/", ".", "..", "a/..", "../", "//"] {
            assert!(
                matches!(store.resolve(name), Err(StoreError::InvalidName(_))),
                "name {:?}",
                name
            );
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        store.write("new.txt", b"hello").await.unwrap();
        assert_eq!(&store.read("new.txt").await.unwrap()[..], b"hello");

        store.write("new.txt", b"hi").await.unwrap();
        assert_eq!(&store.read("new.txt").await.unwrap()[..], b"hi");
    }

    #[tokio::test]
    async fn test_traversal_write_stays_in_root() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        store.write("../escape.txt", b"x").await.unwrap();
        assert!(dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_read_missing() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        assert!(matches!(
            store.read("missing.txt").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_write_into_missing_root() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("absent"));

        assert!(matches!(
            store.write("a.txt", b"x").await,
            Err(StoreError::Write(_, _))
        ));
    }
}
