//! Container store trait definition.

use async_trait::async_trait;

use credvault_common::Result;

/// Durable home of a single vault container.
///
/// A store holds exactly one opaque byte blob. Implementations must make
/// `replace` atomic: a reader either sees the previous container or the new
/// one, never a mix, and a failed replace leaves the previous container
/// untouched.
#[async_trait]
pub trait ContainerStore: Send + Sync {
    /// Get the store name (e.g., "local", "memory").
    fn name(&self) -> &str;

    /// Human-readable location, used in logs and error messages.
    fn location(&self) -> String;

    /// Check whether a container has been written.
    async fn exists(&self) -> Result<bool>;

    /// Read the complete container.
    ///
    /// # Errors
    /// - I/O error (including "not found") if no container can be read
    async fn load(&self) -> Result<Vec<u8>>;

    /// Atomically replace the container with `data`.
    ///
    /// # Postconditions
    /// - On `Ok`, subsequent loads return `data`
    /// - On `Err`, subsequent loads return the previous container
    async fn replace(&self, data: Vec<u8>) -> Result<()>;
}
