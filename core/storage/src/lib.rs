//! Container storage for CredVault.
//!
//! A vault lives in a single container blob. This module provides a
//! trait-based interface for where that blob is kept, plus a local file
//! implementation with atomic replace and an in-memory one for tests.
//!
//! # Design Principles
//! - Atomic replace: readers never observe a half-written container
//! - Opaque bytes: no format or crypto knowledge lives here
//! - Async operations: all I/O is async

pub mod local;
pub mod memory;
pub mod provider;

pub use local::{LocalContainerStore, StagedContainer};
pub use memory::MemoryContainerStore;
pub use provider::ContainerStore;
