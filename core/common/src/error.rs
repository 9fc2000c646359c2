//! Common error types for CredVault.

use thiserror::Error;

/// Top-level error type for CredVault operations.
///
/// `AuthenticationFailure` deliberately covers both a wrong passphrase and a
/// tampered or corrupted ciphertext. Callers must not be able to tell the two
/// apart.
#[derive(Debug, Error)]
pub enum Error {
    /// Wrong passphrase or tampered/corrupted ciphertext.
    #[error("Incorrect passphrase or corrupted vault")]
    AuthenticationFailure,

    /// Container bytes are structurally invalid (magic, version, lengths).
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation is not valid in the current vault state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Referenced entry does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Cryptographic primitive failed for a reason other than authentication.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization of the vault payload failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Clipboard backend failed.
    #[error("Clipboard error: {0}")]
    Clipboard(String),
}

impl Error {
    /// True for errors that mean "this container cannot be opened with this
    /// passphrase", as opposed to operational failures.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::AuthenticationFailure | Error::MalformedContainer(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_failure_message_is_generic() {
        let msg = Error::AuthenticationFailure.to_string();
        assert_eq!(msg, "Incorrect passphrase or corrupted vault");
        assert!(!msg.to_lowercase().contains("tag"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_rejection());
    }

    #[test]
    fn test_rejection_kinds() {
        assert!(Error::AuthenticationFailure.is_rejection());
        assert!(Error::MalformedContainer("bad magic".into()).is_rejection());
        assert!(!Error::InvalidState("locked".into()).is_rejection());
    }
}
