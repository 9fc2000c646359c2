//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks. The parameters
//! are stored in every container so they can be raised later without a
//! format break.

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroize;

use crate::keys::{Salt, VaultKey, KEY_LENGTH};
use credvault_common::{Error, Result};

/// Largest accepted memory cost in KiB (4 GiB).
pub const MAX_MEMORY_COST: u32 = 4 * 1024 * 1024;

/// Largest accepted iteration count.
pub const MAX_TIME_COST: u32 = 64;

/// Largest accepted degree of parallelism.
pub const MAX_PARALLELISM: u32 = 64;

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create validated parameters.
    ///
    /// # Errors
    /// - Returns `InvalidInput` if any value is outside the accepted bounds
    pub fn new(memory_cost: u32, time_cost: u32, parallelism: u32) -> Result<Self> {
        let params = Self {
            memory_cost,
            time_cost,
            parallelism,
        };
        params.validate()?;
        Ok(params)
    }

    /// Create parameters suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for constrained machines.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Check the structural bounds of the parameters.
    ///
    /// Memory must be at least 8 KiB per lane (an Argon2 requirement) and at
    /// most [`MAX_MEMORY_COST`].
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(Error::InvalidInput(format!(
                "KDF parallelism must be within 1..={}, got {}",
                MAX_PARALLELISM, self.parallelism
            )));
        }
        if self.time_cost == 0 || self.time_cost > MAX_TIME_COST {
            return Err(Error::InvalidInput(format!(
                "KDF time cost must be within 1..={}, got {}",
                MAX_TIME_COST, self.time_cost
            )));
        }
        let min_memory = 8 * self.parallelism;
        if self.memory_cost < min_memory || self.memory_cost > MAX_MEMORY_COST {
            return Err(Error::InvalidInput(format!(
                "KDF memory cost must be within {}..={} KiB, got {}",
                min_memory, MAX_MEMORY_COST, self.memory_cost
            )));
        }
        Ok(())
    }

    /// Whether these parameters are cheaper than `other` in memory or time.
    ///
    /// Parallelism is not a cost dimension for an attacker and is ignored.
    pub fn is_weaker_than(&self, other: &KdfParams) -> bool {
        self.memory_cost < other.memory_cost || self.time_cost < other.time_cost
    }

    /// Component-wise maximum of `self` and `policy`.
    ///
    /// Used when upgrading a container so that no dimension is lowered.
    pub fn strengthened_to(&self, policy: &KdfParams) -> KdfParams {
        KdfParams {
            memory_cost: self.memory_cost.max(policy.memory_cost),
            time_cost: self.time_cost.max(policy.time_cost),
            parallelism: self.parallelism.max(policy.parallelism),
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a vault key from a passphrase and salt using Argon2id.
///
/// # Preconditions
/// - `params` must pass [`KdfParams::validate`]
///
/// # Postconditions
/// - Returns a VaultKey derived from the passphrase
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - Returns error if Argon2id parameters are invalid
///
/// A wrong passphrase is never detected here; it surfaces as an
/// authentication failure when the container is opened.
pub fn derive_key(passphrase: &[u8], salt: &Salt, params: &KdfParams) -> Result<VaultKey> {
    params
        .validate()
        .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_LENGTH];
    let derived = argon2.hash_password_into(passphrase, salt.as_bytes(), &mut key_bytes);
    if let Err(e) = derived {
        key_bytes.zeroize();
        return Err(Error::Crypto(format!("Key derivation failed: {}", e)));
    }

    let key = VaultKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}
