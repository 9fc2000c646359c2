//! Secret lifecycle management for CredVault.
//!
//! Bounds how long a copied secret may stay on the system clipboard and
//! provides the exit hook that clears it.
//!
//! # Guarantees
//! - At most one clipboard hold is active
//! - Every hold is purged at its deadline, on replacement, on `purge`,
//!   on `shutdown`, or when the manager is dropped
//! - If the process is killed without running any of these, the clipboard
//!   is left as is; this is a platform limitation, not a recoverable error

pub mod clipboard;
pub mod hold;

pub use clipboard::{ClipboardBackend, MemoryClipboard};
pub use hold::{ClipboardHold, SecretLifecycle, DEFAULT_CLIPBOARD_TIMEOUT};
