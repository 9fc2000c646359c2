//! Common utilities and types shared across CredVault modules.
//!
//! This module provides the error taxonomy and the small value types
//! (entry identifiers, zeroizing strings) used by every other crate.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{EntryId, Passphrase, SecretString};
