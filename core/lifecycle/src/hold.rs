//! Bounded-lifetime clipboard holds.
//!
//! At most one secret is on the clipboard at a time. Each copy starts a
//! single timer task; when it fires the clipboard is overwritten with an
//! empty value. A new copy purges the previous hold first. A hold is only
//! released once the clipboard has actually been cleared.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clipboard::ClipboardBackend;
use credvault_common::{EntryId, Error, Result, SecretString};

/// Default lifetime of a copied secret.
pub const DEFAULT_CLIPBOARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay before an expired hold retries a failed clear.
const CLEAR_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// The currently outstanding copy-to-clipboard operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipboardHold {
    /// Entry whose secret was copied.
    pub entry_id: EntryId,
    /// When the copy happened.
    pub copied_at: Instant,
    /// When the clipboard will be purged.
    pub deadline: Instant,
}

struct ActiveHold {
    hold: ClipboardHold,
    generation: u64,
    timer: JoinHandle<()>,
}

type HoldSlot = Arc<Mutex<Option<ActiveHold>>>;

/// Owner of the clipboard expiry timer.
pub struct SecretLifecycle {
    backend: Arc<dyn ClipboardBackend>,
    timeout: Duration,
    active: HoldSlot,
    generation: AtomicU64,
}

impl SecretLifecycle {
    /// Create a lifecycle manager over `backend`.
    pub fn new(backend: Arc<dyn ClipboardBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            active: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    /// Lifetime applied to each new hold.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Copy `secret` to the clipboard and start its expiry timer.
    ///
    /// # Postconditions
    /// - Any previous hold has been purged and its timer cancelled
    /// - The clipboard holds `secret` until the returned deadline
    ///
    /// # Errors
    /// - Clipboard backend failure. If the previous hold could not be
    ///   purged it stays active with its original deadline.
    pub async fn copy(&self, entry_id: EntryId, secret: &SecretString) -> Result<ClipboardHold> {
        let mut active = self.active.lock().await;

        if let Some(previous) = active.as_ref() {
            debug!(entry = %previous.hold.entry_id, "Purging previous clipboard hold");
            on_backend(&self.backend, |b| b.clear()).await?;
        }
        if let Some(previous) = active.take() {
            previous.timer.abort();
        }

        let text = secret.clone();
        on_backend(&self.backend, move |b| b.set_text(text.expose())).await?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let copied_at = Instant::now();
        let deadline = copied_at + self.timeout;
        let timer = tokio::spawn(expire(
            self.backend.clone(),
            self.active.clone(),
            generation,
            deadline,
        ));

        let hold = ClipboardHold {
            entry_id,
            copied_at,
            deadline,
        };
        *active = Some(ActiveHold {
            hold,
            generation,
            timer,
        });

        info!(
            entry = %entry_id,
            timeout_secs = self.timeout.as_secs(),
            "Secret copied to clipboard"
        );
        Ok(hold)
    }

    /// The active hold, if any.
    pub async fn current_hold(&self) -> Option<ClipboardHold> {
        self.active.lock().await.as_ref().map(|a| a.hold)
    }

    /// Clear the clipboard now and cancel the timer.
    ///
    /// Returns `true` if a hold was active. Idempotent. On failure the hold
    /// and its timer are left in place.
    pub async fn purge(&self) -> Result<bool> {
        let mut active = self.active.lock().await;
        if active.is_none() {
            return Ok(false);
        }

        on_backend(&self.backend, |b| b.clear()).await?;
        if let Some(previous) = active.take() {
            previous.timer.abort();
            info!(entry = %previous.hold.entry_id, "Clipboard hold purged");
        }
        Ok(true)
    }

    /// Exit hook: purge any outstanding hold before the process ends.
    pub async fn shutdown(&self) -> Result<()> {
        self.purge().await.map(|_| ())
    }
}

impl fmt::Debug for SecretLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretLifecycle")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Drop for SecretLifecycle {
    fn drop(&mut self) {
        // Best effort: if the slot is busy or the clear fails, the timer
        // task keeps its own handles and still clears at the deadline.
        if let Ok(mut active) = self.active.try_lock() {
            if active.is_none() {
                return;
            }
            match self.backend.clear() {
                Ok(()) => {
                    if let Some(previous) = active.take() {
                        previous.timer.abort();
                    }
                }
                Err(e) => warn!(error = %e, "Failed to clear clipboard on shutdown"),
            }
        }
    }
}

/// Run a backend call off the async worker threads.
async fn on_backend<F>(backend: &Arc<dyn ClipboardBackend>, op: F) -> Result<()>
where
    F: FnOnce(&dyn ClipboardBackend) -> Result<()> + Send + 'static,
{
    let backend = backend.clone();
    tokio::task::spawn_blocking(move || op(backend.as_ref()))
        .await
        .map_err(|e| Error::Clipboard(format!("Clipboard task failed: {}", e)))?
}

async fn expire(
    backend: Arc<dyn ClipboardBackend>,
    active: HoldSlot,
    generation: u64,
    deadline: Instant,
) {
    let mut deadline = deadline;
    loop {
        tokio::time::sleep_until(deadline).await;

        let mut slot = active.lock().await;
        if slot.as_ref().map(|a| a.generation) != Some(generation) {
            return;
        }

        match on_backend(&backend, |b| b.clear()).await {
            Ok(()) => {
                if let Some(expired) = slot.take() {
                    info!(entry = %expired.hold.entry_id, "Clipboard hold expired, clipboard cleared");
                }
                return;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retry_secs = CLEAR_RETRY_INTERVAL.as_secs(),
                    "Failed to clear clipboard after hold expiry"
                );
                deadline = Instant::now() + CLEAR_RETRY_INTERVAL;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::MemoryClipboard;
    use tokio::time::sleep;

    fn manager(timeout: Duration) -> (SecretLifecycle, MemoryClipboard) {
        let clipboard = MemoryClipboard::new();
        let lifecycle = SecretLifecycle::new(Arc::new(clipboard.clone()), timeout);
        (lifecycle, clipboard)
    }

    fn clipboard_text(clipboard: &MemoryClipboard) -> String {
        clipboard.read_text().unwrap().expose().to_string()
    }

    /// Clipboard whose next `failures` clears are refused.
    struct FlakyClipboard {
        inner: MemoryClipboard,
        failures: Arc<AtomicU64>,
    }

    impl ClipboardBackend for FlakyClipboard {
        fn set_text(&self, text: &str) -> Result<()> {
            self.inner.set_text(text)
        }

        fn read_text(&self) -> Result<SecretString> {
            self.inner.read_text()
        }

        fn clear(&self) -> Result<()> {
            let refused = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(credvault_common::Error::Clipboard("clipboard busy".to_string()));
            }
            self.inner.clear()
        }
    }

    fn flaky_manager(
        timeout: Duration,
        failures: u64,
    ) -> (SecretLifecycle, MemoryClipboard, Arc<AtomicU64>) {
        let clipboard = MemoryClipboard::new();
        let failures = Arc::new(AtomicU64::new(failures));
        let backend = FlakyClipboard {
            inner: clipboard.clone(),
            failures: failures.clone(),
        };
        (
            SecretLifecycle::new(Arc::new(backend), timeout),
            clipboard,
            failures,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_then_expire() {
        let (lifecycle, clipboard) = manager(DEFAULT_CLIPBOARD_TIMEOUT);
        let id = EntryId::generate();

        let hold = lifecycle.copy(id, &SecretString::from("p@ss1")).await.unwrap();
        assert_eq!(hold.entry_id, id);
        assert_eq!(hold.deadline - hold.copied_at, DEFAULT_CLIPBOARD_TIMEOUT);
        assert_eq!(clipboard_text(&clipboard), "p@ss1");

        sleep(Duration::from_secs(29)).await;
        assert_eq!(clipboard_text(&clipboard), "p@ss1");
        assert!(lifecycle.current_hold().await.is_some());

        sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(clipboard_text(&clipboard), "");
        assert!(lifecycle.current_hold().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_clears_even_after_user_overwrite() {
        let (lifecycle, clipboard) = manager(Duration::from_secs(10));
        lifecycle
            .copy(EntryId::generate(), &SecretString::from("secret"))
            .await
            .unwrap();

        clipboard.set_text("something the user copied").unwrap();

        sleep(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;
        assert_eq!(clipboard_text(&clipboard), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_copy_replaces_and_restarts_timer() {
        let (lifecycle, clipboard) = manager(Duration::from_secs(30));
        let first = EntryId::generate();
        let second = EntryId::generate();

        lifecycle.copy(first, &SecretString::from("one")).await.unwrap();
        sleep(Duration::from_secs(20)).await;

        lifecycle.copy(second, &SecretString::from("two")).await.unwrap();
        assert_eq!(clipboard.clear_count(), 1);
        assert_eq!(clipboard_text(&clipboard), "two");
        assert_eq!(lifecycle.current_hold().await.unwrap().entry_id, second);

        // The first hold's deadline passes without clearing the second value.
        sleep(Duration::from_secs(15)).await;
        tokio::task::yield_now().await;
        assert_eq!(clipboard_text(&clipboard), "two");

        sleep(Duration::from_secs(16)).await;
        tokio::task::yield_now().await;
        assert_eq!(clipboard_text(&clipboard), "");
        assert!(lifecycle.current_hold().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_is_immediate_and_idempotent() {
        let (lifecycle, clipboard) = manager(DEFAULT_CLIPBOARD_TIMEOUT);
        lifecycle
            .copy(EntryId::generate(), &SecretString::from("gone"))
            .await
            .unwrap();

        assert!(lifecycle.purge().await.unwrap());
        assert_eq!(clipboard_text(&clipboard), "");
        assert!(!lifecycle.purge().await.unwrap());

        // The cancelled timer must not fire later.
        clipboard.set_text("unrelated").unwrap();
        sleep(Duration::from_secs(60)).await;
        assert_eq!(clipboard_text(&clipboard), "unrelated");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_and_drop_purge() {
        let (lifecycle, clipboard) = manager(DEFAULT_CLIPBOARD_TIMEOUT);
        lifecycle
            .copy(EntryId::generate(), &SecretString::from("a"))
            .await
            .unwrap();
        lifecycle.shutdown().await.unwrap();
        assert_eq!(clipboard_text(&clipboard), "");

        let (lifecycle, clipboard) = manager(DEFAULT_CLIPBOARD_TIMEOUT);
        lifecycle
            .copy(EntryId::generate(), &SecretString::from("b"))
            .await
            .unwrap();
        drop(lifecycle);
        assert_eq!(clipboard_text(&clipboard), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_purge_keeps_hold_until_deadline() {
        let (lifecycle, clipboard, _) = flaky_manager(Duration::from_secs(30), 1);
        let id = EntryId::generate();
        lifecycle.copy(id, &SecretString::from("p@ss1")).await.unwrap();

        assert!(lifecycle.purge().await.is_err());
        assert_eq!(lifecycle.current_hold().await.unwrap().entry_id, id);
        assert_eq!(clipboard_text(&clipboard), "p@ss1");

        sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert_eq!(clipboard_text(&clipboard), "");
        assert!(lifecycle.current_hold().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_purge_can_be_retried() {
        let (lifecycle, clipboard, _) = flaky_manager(DEFAULT_CLIPBOARD_TIMEOUT, 1);
        lifecycle
            .copy(EntryId::generate(), &SecretString::from("p@ss1"))
            .await
            .unwrap();

        assert!(lifecycle.purge().await.is_err());
        assert!(lifecycle.purge().await.unwrap());
        assert_eq!(clipboard_text(&clipboard), "");
        assert!(lifecycle.current_hold().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_expiry_clear_is_retried() {
        let (lifecycle, clipboard, _) = flaky_manager(Duration::from_secs(10), 2);
        lifecycle
            .copy(EntryId::generate(), &SecretString::from("p@ss1"))
            .await
            .unwrap();

        sleep(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;
        assert_eq!(clipboard_text(&clipboard), "p@ss1");
        assert!(lifecycle.current_hold().await.is_some());

        sleep(CLEAR_RETRY_INTERVAL * 3).await;
        tokio::task::yield_now().await;
        assert_eq!(clipboard_text(&clipboard), "");
        assert!(lifecycle.current_hold().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_keeps_previous_hold_when_clear_fails() {
        let (lifecycle, clipboard, failures) = flaky_manager(Duration::from_secs(30), 0);
        let first = EntryId::generate();
        let hold = lifecycle.copy(first, &SecretString::from("one")).await.unwrap();

        failures.store(1, Ordering::SeqCst);
        assert!(lifecycle
            .copy(EntryId::generate(), &SecretString::from("two"))
            .await
            .is_err());
        assert_eq!(lifecycle.current_hold().await, Some(hold));
        assert_eq!(clipboard_text(&clipboard), "one");

        sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert_eq!(clipboard_text(&clipboard), "");
        assert!(lifecycle.current_hold().await.is_none());
    }
}
