//! In-memory container store for testing.

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::provider::ContainerStore;
use credvault_common::{Error, Result};

/// In-memory container store.
///
/// Useful for testing and development. The container is lost on drop.
/// Clones share the same underlying container.
#[derive(Clone, Default)]
pub struct MemoryContainerStore {
    data: Arc<RwLock<Option<Vec<u8>>>>,
    fail_replace: Arc<AtomicBool>,
}

impl MemoryContainerStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `replace` fail with an I/O error, simulating a
    /// full disk or a failed rename.
    pub fn set_fail_on_replace(&self, fail: bool) {
        self.fail_replace.store(fail, Ordering::SeqCst);
    }

    /// Overwrite the stored bytes directly, bypassing `replace`.
    pub fn set_raw(&self, data: Vec<u8>) {
        *self.data.write().unwrap_or_else(|e| e.into_inner()) = Some(data);
    }

    /// Snapshot of the stored bytes, if any.
    pub fn raw(&self) -> Option<Vec<u8>> {
        self.data.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ContainerStore for MemoryContainerStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn location(&self) -> String {
        "memory".to_string()
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.data.read().unwrap_or_else(|e| e.into_inner()).is_some())
    }

    async fn load(&self) -> Result<Vec<u8>> {
        self.raw().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no container in memory store",
            ))
        })
    }

    async fn replace(&self, data: Vec<u8>) -> Result<()> {
        if self.fail_replace.load(Ordering::SeqCst) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "simulated replace failure",
            )));
        }
        self.set_raw(data);
        Ok(())
    }
}
