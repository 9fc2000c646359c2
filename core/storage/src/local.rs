//! Local filesystem container store.
//!
//! Writes go to a temporary file in the target's directory, are flushed to
//! disk, and then renamed over the target. A crash at any point leaves either
//! the old or the new container in place.

use async_trait::async_trait;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, warn};

use crate::provider::ContainerStore;
use credvault_common::{Error, Result};

/// Container store backed by a single file.
#[derive(Debug, Clone)]
pub struct LocalContainerStore {
    path: PathBuf,
}

impl LocalContainerStore {
    /// Create a store for the container file at `path`.
    ///
    /// The file does not need to exist yet, but its parent directory must
    /// exist before the first write.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the container file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Write `data` to a temporary file next to the container.
    ///
    /// Nothing is visible at the container path until the returned
    /// [`StagedContainer`] is committed. Dropping it deletes the temp file.
    ///
    /// # Errors
    /// - Parent directory missing or not writable
    pub fn stage(&self, data: &[u8]) -> Result<StagedContainer> {
        let mut temp = tempfile::Builder::new()
            .prefix(".credvault-")
            .suffix(".tmp")
            .tempfile_in(self.parent_dir())?;

        temp.write_all(data)?;
        temp.as_file().sync_all()?;

        debug!(temp = %temp.path().display(), size = data.len(), "Container staged");
        Ok(StagedContainer {
            temp,
            target: self.path.clone(),
        })
    }
}

/// A fully written temporary container awaiting the final rename.
pub struct StagedContainer {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedContainer {
    /// Path of the temporary file.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Rename the temporary file over the target.
    ///
    /// # Errors
    /// - Rename failed; the temp file is removed and the target is unchanged
    pub fn commit(self) -> Result<()> {
        let target = self.target;
        self.temp.persist(&target).map_err(|e| Error::Io(e.error))?;
        if let Err(e) = sync_parent(&target) {
            warn!(path = %target.display(), error = %e, "Failed to sync vault directory");
        }
        debug!(path = %target.display(), "Container replaced");
        Ok(())
    }
}

/// Flush the directory entry so the rename itself survives a power loss.
#[cfg(unix)]
fn sync_parent(target: &Path) -> io::Result<()> {
    match target.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => std::fs::File::open(parent)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_target: &Path) -> io::Result<()> {
    Ok(())
}

#[async_trait]
impl ContainerStore for LocalContainerStore {
    fn name(&self) -> &str {
        "local"
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn exists(&self) -> Result<bool> {
        Ok(fs::try_exists(&self.path).await?)
    }

    async fn load(&self) -> Result<Vec<u8>> {
        if fs::metadata(&self.path).await?.is_dir() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", self.path.display()),
            )));
        }
        Ok(fs::read(&self.path).await?)
    }

    async fn replace(&self, data: Vec<u8>) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.stage(&data)?.commit())
            .await
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn test_sync_parent_reports_errors() {
        let temp = TempDir::new().unwrap();
        assert!(sync_parent(&temp.path().join("vault.cvault")).is_ok());
        assert!(sync_parent(Path::new("vault.cvault")).is_ok());

        let missing = temp.path().join("gone").join("vault.cvault");
        assert!(sync_parent(&missing).is_err());
    }

    #[tokio::test]
    async fn test_local_replace_load() {
        let temp = TempDir::new().unwrap();
        let store = LocalContainerStore::new(temp.path().join("vault.cvault"));

        assert!(!store.exists().await.unwrap());
        store.replace(b"first".to_vec()).await.unwrap();
        assert!(store.exists().await.unwrap());
        assert_eq!(store.load().await.unwrap(), b"first");

        store.replace(b"second".to_vec()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_load_missing_is_io_not_found() {
        let temp = TempDir::new().unwrap();
        let store = LocalContainerStore::new(temp.path().join("missing.cvault"));
        match store.load().await {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
        }
    }

    #[tokio::test]
    async fn test_staged_without_commit_leaves_target() {
        let temp = TempDir::new().unwrap();
        let store = LocalContainerStore::new(temp.path().join("vault.cvault"));
        store.replace(b"original".to_vec()).await.unwrap();

        let staged = store.stage(b"replacement").unwrap();
        let temp_path = staged.temp_path().to_path_buf();
        assert!(temp_path.exists());
        assert_eq!(store.load().await.unwrap(), b"original");

        // Crash before rename: the staged file goes away, the target stays.
        drop(staged);
        assert!(!temp_path.exists());
        assert_eq!(store.load().await.unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_missing_parent_fails_and_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let store = LocalContainerStore::new(temp.path().join("nope").join("vault.cvault"));
        assert!(matches!(
            store.replace(b"data".to_vec()).await,
            Err(Error::Io(_))
        ));
        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let temp = TempDir::new().unwrap();
        let store = LocalContainerStore::new(temp.path().join("vault.cvault"));
        store.replace(b"one".to_vec()).await.unwrap();
        store.replace(b"two".to_vec()).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["vault.cvault".to_string()]);
    }
}
