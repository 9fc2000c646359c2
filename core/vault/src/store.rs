//! The vault store: lock state machine and entry operations.
//!
//! A store is either locked (no key, no entries in memory) or unlocked
//! (key and decrypted entries held in memory). Every public operation takes
//! the state lock for its whole duration, so operations on one store are
//! applied one at a time and never observe each other half-done.

use chrono::Utc;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::VaultConfig;
use crate::container::{self, ContainerInfo, PayloadRef, VaultContainer, VaultPayload};
use crate::entry::{EntryUpdate, NewEntry, VaultEntry};
use credvault_common::{EntryId, Error, Passphrase, Result};
use credvault_crypto::{derive_key, KdfParams, Salt, VaultKey};
use credvault_lifecycle::{ClipboardHold, SecretLifecycle};
use credvault_storage::{ContainerStore, LocalContainerStore};

/// Outcome of merging another container into this vault.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Entries whose id was not present here.
    pub added: usize,
    /// Existing entries replaced by a newer imported version.
    pub updated: usize,
    /// Imported entries that were older, identical in age, or retired here.
    pub skipped: usize,
    /// Retired ids newly learned from the source.
    pub retired: usize,
}

impl ImportReport {
    /// Whether the import changed anything.
    pub fn changed(&self) -> bool {
        self.added > 0 || self.updated > 0 || self.retired > 0
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct UnlockedVault {
    key: VaultKey,
    salt: Salt,
    #[zeroize(skip)]
    kdf: KdfParams,
    entries: Vec<VaultEntry>,
    #[zeroize(skip)]
    retired: BTreeSet<EntryId>,
    #[zeroize(skip)]
    dirty: bool,
}

impl UnlockedVault {
    fn new(key: VaultKey, salt: Salt, kdf: KdfParams, payload: VaultPayload) -> Self {
        Self {
            key,
            salt,
            kdf,
            entries: payload.entries,
            retired: payload.retired,
            dirty: false,
        }
    }

    fn payload(&self) -> PayloadRef<'_> {
        PayloadRef {
            entries: &self.entries,
            retired: &self.retired,
        }
    }

    fn position(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    fn find(&self, id: EntryId) -> Result<&VaultEntry> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| not_found(id))
    }

    fn next_id(&self) -> EntryId {
        loop {
            let id = EntryId::generate();
            if !self.retired.contains(&id) && self.position(id).is_none() {
                return id;
            }
        }
    }

    fn merge(&mut self, incoming: VaultPayload) -> ImportReport {
        let mut report = ImportReport::default();

        for id in incoming.retired {
            if self.position(id).is_none() && self.retired.insert(id) {
                report.retired += 1;
            }
        }

        for entry in incoming.entries {
            if self.retired.contains(&entry.id) {
                report.skipped += 1;
                continue;
            }
            match self.position(entry.id) {
                None => {
                    self.entries.push(entry);
                    report.added += 1;
                }
                Some(idx) if entry.modified_at > self.entries[idx].modified_at => {
                    self.entries[idx] = entry;
                    report.updated += 1;
                }
                Some(_) => report.skipped += 1,
            }
        }

        if report.changed() {
            self.dirty = true;
        }
        report
    }
}

enum VaultState {
    Locked,
    Unlocked(UnlockedVault),
}

impl VaultState {
    fn unlocked(&self) -> Result<&UnlockedVault> {
        match self {
            VaultState::Unlocked(vault) => Ok(vault),
            VaultState::Locked => Err(locked()),
        }
    }

    fn unlocked_mut(&mut self) -> Result<&mut UnlockedVault> {
        match self {
            VaultState::Unlocked(vault) => Ok(vault),
            VaultState::Locked => Err(locked()),
        }
    }
}

/// Encrypted credential vault bound to one container.
pub struct VaultStore {
    container: Arc<dyn ContainerStore>,
    lifecycle: Arc<SecretLifecycle>,
    config: VaultConfig,
    state: RwLock<VaultState>,
}

impl VaultStore {
    /// Create a locked store over `container`.
    ///
    /// # Errors
    /// - `InvalidInput` if the configuration is invalid
    pub fn new(
        container: Arc<dyn ContainerStore>,
        lifecycle: Arc<SecretLifecycle>,
        config: VaultConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            container,
            lifecycle,
            config,
            state: RwLock::new(VaultState::Locked),
        })
    }

    /// Create a locked store over a container file at `path`.
    pub fn open_local(
        path: impl AsRef<Path>,
        lifecycle: Arc<SecretLifecycle>,
        config: VaultConfig,
    ) -> Result<Self> {
        Self::new(Arc::new(LocalContainerStore::new(path)), lifecycle, config)
    }

    /// Store configuration.
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Clipboard lifecycle manager used by `copy_to_clipboard`.
    pub fn lifecycle(&self) -> &Arc<SecretLifecycle> {
        &self.lifecycle
    }

    /// Where the container lives.
    pub fn location(&self) -> String {
        self.container.location()
    }

    /// Whether a container exists.
    pub async fn exists(&self) -> Result<bool> {
        self.container.exists().await
    }

    /// Whether the store is unlocked.
    pub async fn is_unlocked(&self) -> bool {
        matches!(&*self.state.read().await, VaultState::Unlocked(_))
    }

    /// Whether there are changes not yet saved. Always false when locked.
    pub async fn is_dirty(&self) -> bool {
        match &*self.state.read().await {
            VaultState::Unlocked(vault) => vault.dirty,
            VaultState::Locked => false,
        }
    }

    /// Create a new empty vault and leave it unlocked.
    ///
    /// # Preconditions
    /// - No container exists yet
    /// - The store is locked
    ///
    /// # Postconditions
    /// - An empty container sealed under `passphrase` has been written
    /// - The store is unlocked and clean
    ///
    /// # Errors
    /// - `InvalidInput` for an empty passphrase
    /// - `InvalidState` if a container already exists or the store is unlocked
    /// - Storage failure
    pub async fn create(&self, passphrase: &Passphrase) -> Result<()> {
        let mut state = self.state.write().await;
        if state.unlocked().is_ok() {
            return Err(Error::InvalidState("Vault is already unlocked".to_string()));
        }
        if passphrase.is_empty() {
            return Err(Error::InvalidInput("Passphrase must not be empty".to_string()));
        }
        if self.container.exists().await? {
            return Err(Error::InvalidState(format!(
                "A vault already exists at {}",
                self.container.location()
            )));
        }

        let salt = Salt::generate();
        let key = derive_in_background(passphrase, &salt, self.config.kdf).await?;
        let vault = UnlockedVault::new(key, salt, self.config.kdf, VaultPayload::default());
        self.persist(&vault).await?;

        *state = VaultState::Unlocked(vault);
        info!(location = %self.container.location(), "Vault created");
        Ok(())
    }

    /// Decrypt the container and hold its entries in memory.
    ///
    /// If the container's KDF parameters are weaker than the configured
    /// policy, the key is re-derived under stronger parameters with a fresh
    /// salt and the vault is marked dirty; the next save writes the upgrade.
    ///
    /// # Errors
    /// - `AuthenticationFailure` for a wrong passphrase or tampered container
    /// - `MalformedContainer` if the container is structurally invalid
    /// - `InvalidState` if already unlocked
    /// - Storage failure, including a missing container
    pub async fn unlock(&self, passphrase: &Passphrase) -> Result<()> {
        let mut state = self.state.write().await;
        if state.unlocked().is_ok() {
            return Err(Error::InvalidState("Vault is already unlocked".to_string()));
        }

        let bytes = self.container.load().await?;
        let container = VaultContainer::decode(&bytes)?;
        let key = derive_in_background(passphrase, &container.salt, container.kdf).await?;
        let payload = container.open(&key)?;
        let mut vault = UnlockedVault::new(key, container.salt.clone(), container.kdf, payload);

        if container.kdf.is_weaker_than(&self.config.kdf) {
            let upgraded = container.kdf.strengthened_to(&self.config.kdf);
            info!(
                from_memory = container.kdf.memory_cost,
                from_time = container.kdf.time_cost,
                to_memory = upgraded.memory_cost,
                to_time = upgraded.time_cost,
                "Upgrading KDF parameters; the next save re-keys the container"
            );
            let salt = Salt::generate();
            vault.key = derive_in_background(passphrase, &salt, upgraded).await?;
            vault.salt = salt;
            vault.kdf = upgraded;
            vault.dirty = true;
        }

        info!(entries = vault.entries.len(), "Vault unlocked");
        *state = VaultState::Unlocked(vault);
        Ok(())
    }

    /// Unlock the vault, creating it first if no container exists.
    ///
    /// Returns `true` if a new vault was created.
    pub async fn unlock_or_create(&self, passphrase: &Passphrase) -> Result<bool> {
        if self.container.exists().await? {
            self.unlock(passphrase).await.map(|_| false)
        } else {
            self.create(passphrase).await.map(|_| true)
        }
    }

    /// Discard the key and all decrypted entries.
    ///
    /// Unsaved changes are lost. Any clipboard hold is purged. Locking a
    /// locked store is a no-op apart from the purge.
    pub async fn lock(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if let VaultState::Unlocked(mut vault) = std::mem::replace(&mut *state, VaultState::Locked)
        {
            if vault.dirty {
                warn!("Locking vault with unsaved changes; they are discarded");
            }
            vault.zeroize();
            info!("Vault locked");
        }
        drop(state);

        self.lifecycle.purge().await?;
        Ok(())
    }

    /// Snapshot of all entries in insertion order.
    pub async fn list_entries(&self) -> Result<Vec<VaultEntry>> {
        let state = self.state.read().await;
        Ok(state.unlocked()?.entries.clone())
    }

    /// Copy of one entry.
    pub async fn get_entry(&self, id: EntryId) -> Result<VaultEntry> {
        let state = self.state.read().await;
        state.unlocked()?.find(id).cloned()
    }

    /// Add an entry and return its new id.
    ///
    /// # Postconditions
    /// - The id differs from every live and every deleted id
    /// - `created_at == modified_at`
    /// - The vault is dirty
    ///
    /// # Errors
    /// - `InvalidState` if locked
    /// - `InvalidInput` if the title is blank
    pub async fn add_entry(&self, new: NewEntry) -> Result<EntryId> {
        let mut state = self.state.write().await;
        let vault = state.unlocked_mut()?;

        let id = vault.next_id();
        let entry = VaultEntry::create(id, new, Utc::now())?;
        vault.entries.push(entry);
        vault.dirty = true;

        debug!(entry = %id, "Entry added");
        Ok(id)
    }

    /// Apply a partial update to an entry.
    ///
    /// # Errors
    /// - `InvalidState` if locked
    /// - `NotFound` for an unknown id
    /// - `InvalidInput` if the update sets a blank title
    pub async fn update_entry(&self, id: EntryId, update: EntryUpdate) -> Result<()> {
        let mut state = self.state.write().await;
        let vault = state.unlocked_mut()?;

        let idx = vault.position(id).ok_or_else(|| not_found(id))?;
        if update.is_empty() {
            return Ok(());
        }
        vault.entries[idx].apply(update, Utc::now())?;
        vault.dirty = true;

        debug!(entry = %id, "Entry updated");
        Ok(())
    }

    /// Remove an entry. Its id is retired and never reissued.
    ///
    /// # Errors
    /// - `InvalidState` if locked
    /// - `NotFound` for an unknown id
    pub async fn delete_entry(&self, id: EntryId) -> Result<()> {
        let mut state = self.state.write().await;
        let vault = state.unlocked_mut()?;

        let idx = vault.position(id).ok_or_else(|| not_found(id))?;
        let mut removed = vault.entries.remove(idx);
        removed.zeroize();
        vault.retired.insert(id);
        vault.dirty = true;

        debug!(entry = %id, "Entry deleted");
        Ok(())
    }

    /// Seal the in-memory state into a new container and replace the old
    /// one atomically.
    ///
    /// # Postconditions
    /// - On success the container holds exactly the current entries, under
    ///   a fresh nonce, and the vault is clean
    /// - On failure the previous container is intact and the vault stays
    ///   dirty
    ///
    /// # Errors
    /// - `InvalidState` if locked
    /// - Serialization, crypto or storage failure
    pub async fn save(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let vault = state.unlocked_mut()?;

        self.persist(vault).await?;
        vault.dirty = false;
        Ok(())
    }

    /// Re-key the vault under a new passphrase.
    ///
    /// The change only reaches disk on the next `save`.
    ///
    /// # Errors
    /// - `InvalidState` if locked
    /// - `AuthenticationFailure` if `current` is not the vault passphrase
    /// - `InvalidInput` if `new` is empty
    pub async fn change_passphrase(&self, current: &Passphrase, new: &Passphrase) -> Result<()> {
        let mut state = self.state.write().await;
        let vault = state.unlocked_mut()?;

        if new.is_empty() {
            return Err(Error::InvalidInput("Passphrase must not be empty".to_string()));
        }

        let check = derive_in_background(current, &vault.salt, vault.kdf).await?;
        if !check.ct_eq(&vault.key) {
            return Err(Error::AuthenticationFailure);
        }

        let kdf = vault.kdf.strengthened_to(&self.config.kdf);
        let salt = Salt::generate();
        vault.key = derive_in_background(new, &salt, kdf).await?;
        vault.salt = salt;
        vault.kdf = kdf;
        vault.dirty = true;

        info!("Passphrase changed; save to persist");
        Ok(())
    }

    /// Copy an entry's secret to the clipboard with a bounded lifetime.
    ///
    /// # Errors
    /// - `InvalidState` if locked
    /// - `NotFound` for an unknown id
    /// - Clipboard backend failure
    pub async fn copy_to_clipboard(&self, id: EntryId) -> Result<ClipboardHold> {
        // The read guard stays held so a concurrent lock purges after us.
        let state = self.state.read().await;
        let entry = state.unlocked()?.find(id)?;
        self.lifecycle.copy(id, &entry.secret).await
    }

    /// Copy the last saved container to `destination`.
    ///
    /// The export is the encrypted container byte for byte; it opens with
    /// the passphrase that was current at the last save. Works in any
    /// state. Unsaved changes are not included.
    ///
    /// # Errors
    /// - Storage failure, including a missing container
    /// - `MalformedContainer` if the stored container is not valid
    pub async fn export_vault(&self, destination: impl AsRef<Path>) -> Result<()> {
        let state = self.state.read().await;
        if let VaultState::Unlocked(vault) = &*state {
            if vault.dirty {
                warn!("Exporting the last saved container; unsaved changes are not included");
            }
        }

        let bytes = self.container.load().await?;
        VaultContainer::decode(&bytes)?;

        let target = LocalContainerStore::new(destination.as_ref());
        target.replace(bytes).await?;

        info!(destination = %target.location(), "Vault exported");
        Ok(())
    }

    /// Merge the entries of another container into this vault.
    ///
    /// Unknown ids are added. An existing id is replaced only when the
    /// imported entry was modified later. Ids retired in either vault are
    /// never resurrected. The vault is marked dirty if anything changed.
    ///
    /// # Errors
    /// - `InvalidState` if locked
    /// - `AuthenticationFailure` or `MalformedContainer` for the source;
    ///   the vault is left unchanged
    /// - Storage failure reading the source
    pub async fn import_vault(
        &self,
        source: impl AsRef<Path>,
        passphrase: &Passphrase,
    ) -> Result<ImportReport> {
        let mut state = self.state.write().await;
        let vault = state.unlocked_mut()?;

        let source = LocalContainerStore::new(source.as_ref());
        let bytes = source.load().await?;
        let container = VaultContainer::decode(&bytes)?;
        let key = derive_in_background(passphrase, &container.salt, container.kdf).await?;
        let payload = container.open(&key)?;

        let report = vault.merge(payload);
        info!(
            source = %source.location(),
            added = report.added,
            updated = report.updated,
            skipped = report.skipped,
            retired = report.retired,
            "Vault imported"
        );
        Ok(report)
    }

    /// Header summary of the stored container. Needs no passphrase.
    pub async fn inspect(&self) -> Result<ContainerInfo> {
        let bytes = self.container.load().await?;
        container::inspect(&bytes)
    }

    async fn persist(&self, vault: &UnlockedVault) -> Result<()> {
        let sealed = VaultContainer::seal(&vault.key, &vault.salt, vault.kdf, vault.payload())?;
        let bytes = sealed.encode()?;
        self.container.replace(bytes).await?;

        info!(
            entries = vault.entries.len(),
            location = %self.container.location(),
            "Vault saved"
        );
        Ok(())
    }
}

impl std::fmt::Debug for VaultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultStore")
            .field("container", &self.container.location())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn derive_in_background(
    passphrase: &Passphrase,
    salt: &Salt,
    params: KdfParams,
) -> Result<VaultKey> {
    let passphrase = passphrase.clone();
    let salt = salt.clone();
    tokio::task::spawn_blocking(move || derive_key(passphrase.expose().as_bytes(), &salt, &params))
        .await
        .map_err(|e| Error::Crypto(format!("Key derivation task failed: {}", e)))?
}

fn locked() -> Error {
    Error::InvalidState("Vault is locked".to_string())
}

fn not_found(id: EntryId) -> Error {
    Error::NotFound(format!("Entry {}", id))
}
