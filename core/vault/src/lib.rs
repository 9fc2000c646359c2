//! Vault engine for CredVault.
//!
//! This module provides:
//! - The binary container format and its sealing and opening
//! - The entry model
//! - The vault store with its lock state machine, persistence, export and
//!   import
//!
//! # Architecture
//! The vault module sits between the user interface and the container
//! store. Plaintext exists only inside an unlocked `VaultStore`; everything
//! handed to storage is an encrypted container.

pub mod config;
pub mod container;
pub mod entry;
pub mod store;

pub use config::VaultConfig;
pub use container::{inspect, ContainerInfo, VaultContainer, VaultPayload};
pub use entry::{EntryUpdate, NewEntry, VaultEntry};
pub use store::{ImportReport, VaultStore};
