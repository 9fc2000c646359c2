//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation. The tag is
//! detached so the container codec can place it after the ciphertext.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, AeadCore, AeadInPlace, KeyInit, OsRng},
    XChaCha20Poly1305,
};
use zeroize::Zeroizing;

use crate::keys::VaultKey;
use credvault_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Detached Poly1305 authentication tag.
pub type Tag = [u8; TAG_SIZE];

/// Generate a fresh random nonce.
///
/// Every seal with a given key must use a new nonce; 192 random bits make a
/// collision negligible.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let mut out = [0u8; NONCE_SIZE];
    out.copy_from_slice(&nonce);
    out
}

/// Encrypt and authenticate `plaintext`, binding `associated_data`.
///
/// # Postconditions
/// - Returns the ciphertext (same length as plaintext) and a detached tag
/// - The tag covers the ciphertext and `associated_data`
///
/// # Errors
/// - Returns error if encryption fails
pub fn seal(
    key: &VaultKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<(Vec<u8>, Tag)> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), associated_data, &mut buffer)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(&tag);
    Ok((buffer, tag_bytes))
}

/// Verify and decrypt `ciphertext`.
///
/// # Postconditions
/// - Returns the plaintext in a buffer that zeroizes on drop
/// - Nothing is returned unless the tag verifies
///
/// # Errors
/// - `AuthenticationFailure` on any mismatch of key, nonce, ciphertext, tag
///   or associated data. The cause is deliberately not reported.
pub fn open(
    key: &VaultKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    tag: &Tag,
    associated_data: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            associated_data,
            buffer.as_mut_slice(),
            GenericArray::from_slice(tag),
        )
        .map_err(|_| Error::AuthenticationFailure)?;

    Ok(buffer)
}
