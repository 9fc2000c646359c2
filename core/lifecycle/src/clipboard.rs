//! Clipboard backend abstraction.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use zeroize::Zeroize;

use credvault_common::{Result, SecretString};

/// System clipboard as seen by the lifecycle manager.
///
/// Host applications implement this over their platform clipboard. Every
/// method is synchronous and expected to return quickly.
pub trait ClipboardBackend: Send + Sync {
    /// Replace the clipboard content with `text`.
    fn set_text(&self, text: &str) -> Result<()>;

    /// Read the current clipboard content.
    fn read_text(&self) -> Result<SecretString>;

    /// Overwrite the clipboard with an empty value.
    fn clear(&self) -> Result<()> {
        self.set_text("")
    }
}

/// In-process clipboard.
///
/// Used by tests and headless hosts. Clones share the same content, so a
/// test can keep one handle and give another to the lifecycle manager.
#[derive(Clone, Default)]
pub struct MemoryClipboard {
    content: Arc<Mutex<SecretString>>,
    clears: Arc<AtomicUsize>,
}

impl MemoryClipboard {
    /// Create an empty clipboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `clear` has been called.
    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    fn store(&self, text: &str) {
        let mut content = self.content.lock().unwrap_or_else(|e| e.into_inner());
        content.zeroize();
        *content = SecretString::from(text);
    }
}

impl ClipboardBackend for MemoryClipboard {
    fn set_text(&self, text: &str) -> Result<()> {
        self.store(text);
        Ok(())
    }

    fn read_text(&self) -> Result<SecretString> {
        Ok(self
            .content
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn clear(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.store("");
        Ok(())
    }
}
