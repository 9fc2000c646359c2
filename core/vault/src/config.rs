//! Runtime configuration for a vault store.

use std::time::Duration;
use tracing::warn;

use credvault_common::{Error, Result};
use credvault_crypto::KdfParams;
use credvault_lifecycle::DEFAULT_CLIPBOARD_TIMEOUT;

/// Environment variable overriding the Argon2 memory cost (KiB).
pub const ENV_KDF_MEMORY_KIB: &str = "CREDVAULT_KDF_MEMORY_KIB";

/// Environment variable overriding the Argon2 iteration count.
pub const ENV_KDF_TIME_COST: &str = "CREDVAULT_KDF_TIME_COST";

/// Environment variable overriding the Argon2 parallelism.
pub const ENV_KDF_PARALLELISM: &str = "CREDVAULT_KDF_PARALLELISM";

/// Environment variable overriding the clipboard hold lifetime (seconds).
pub const ENV_CLIPBOARD_TIMEOUT_SECS: &str = "CREDVAULT_CLIPBOARD_TIMEOUT_SECS";

/// Vault store configuration.
///
/// `kdf` is the policy applied when a vault is created, re-keyed, or
/// upgraded on unlock. Existing containers keep whatever parameters they
/// were written with until then.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultConfig {
    /// KDF cost policy.
    pub kdf: KdfParams,
    /// Lifetime of a secret copied to the clipboard.
    pub clipboard_timeout: Duration,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            clipboard_timeout: DEFAULT_CLIPBOARD_TIMEOUT,
        }
    }
}

impl VaultConfig {
    /// Replace the KDF policy.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Replace the clipboard timeout.
    pub fn with_clipboard_timeout(mut self, timeout: Duration) -> Self {
        self.clipboard_timeout = timeout;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        self.kdf.validate()?;
        if self.clipboard_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "Clipboard timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the default configuration with overrides from the process
    /// environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the default configuration with overrides from `lookup`.
    ///
    /// KDF overrides that lower the cost below the default policy are only
    /// honoured in debug builds, and always logged. Release builds ignore
    /// them with a warning.
    ///
    /// # Errors
    /// - `InvalidInput` if a variable is set but not a valid value
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let policy = config.kdf;

        let requested = KdfParams {
            memory_cost: parse_var(&lookup, ENV_KDF_MEMORY_KIB)?.unwrap_or(policy.memory_cost),
            time_cost: parse_var(&lookup, ENV_KDF_TIME_COST)?.unwrap_or(policy.time_cost),
            parallelism: parse_var(&lookup, ENV_KDF_PARALLELISM)?.unwrap_or(policy.parallelism),
        };
        requested.validate()?;
        config.kdf = apply_kdf_override(policy, requested);

        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_CLIPBOARD_TIMEOUT_SECS)? {
            config.clipboard_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }
}

fn apply_kdf_override(policy: KdfParams, requested: KdfParams) -> KdfParams {
    if !requested.is_weaker_than(&policy) {
        return requested;
    }

    if cfg!(debug_assertions) {
        warn!(
            memory_cost = requested.memory_cost,
            time_cost = requested.time_cost,
            "KDF cost lowered by environment override (debug build only)"
        );
        requested
    } else {
        warn!(
            memory_cost = requested.memory_cost,
            time_cost = requested.time_cost,
            "Ignoring environment override that lowers KDF cost in a release build"
        );
        policy
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidInput(format!("{} has an invalid value: '{}'", name, raw))),
    }
}
