//! Vault entry model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use credvault_common::{EntryId, Error, Result, SecretString};

/// One stored credential.
///
/// All text fields are wiped when the entry is dropped. `Debug` never
/// prints the secret or the notes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct VaultEntry {
    /// Stable identifier.
    #[zeroize(skip)]
    pub id: EntryId,
    /// Display title. Never empty.
    pub title: String,
    /// Account name, may be empty.
    pub username: String,
    /// The credential itself.
    pub secret: SecretString,
    /// Free-form notes.
    pub notes: Option<String>,
    /// When the entry was added.
    #[zeroize(skip)]
    pub created_at: DateTime<Utc>,
    /// Last content change. Never earlier than `created_at`.
    #[zeroize(skip)]
    pub modified_at: DateTime<Utc>,
}

impl VaultEntry {
    /// Build a fresh entry from user input.
    ///
    /// # Errors
    /// - `InvalidInput` if the title is blank
    pub fn create(id: EntryId, new: NewEntry, now: DateTime<Utc>) -> Result<Self> {
        validate_title(&new.title)?;
        Ok(Self {
            id,
            title: new.title,
            username: new.username,
            secret: new.secret,
            notes: new.notes,
            created_at: now,
            modified_at: now,
        })
    }

    /// Apply a partial update.
    ///
    /// Fields left as `None` keep their value. `modified_at` moves forward
    /// when anything changed and never drops below `created_at`.
    ///
    /// # Errors
    /// - `InvalidInput` if the update sets a blank title; the entry is left
    ///   untouched
    pub fn apply(&mut self, update: EntryUpdate, now: DateTime<Utc>) -> Result<()> {
        if let Some(title) = &update.title {
            validate_title(title)?;
        }
        if update.is_empty() {
            return Ok(());
        }

        if let Some(title) = update.title {
            self.title.zeroize();
            self.title = title;
        }
        if let Some(username) = update.username {
            self.username.zeroize();
            self.username = username;
        }
        if let Some(secret) = update.secret {
            self.secret = secret;
        }
        if let Some(notes) = update.notes {
            self.notes.zeroize();
            self.notes = notes;
        }

        self.modified_at = now.max(self.created_at);
        Ok(())
    }

    /// Check the invariants of an entry read from outside this process.
    ///
    /// # Errors
    /// - `InvalidInput` if the title is blank or `modified_at` precedes
    ///   `created_at`
    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        if self.modified_at < self.created_at {
            return Err(Error::InvalidInput(
                "Entry modified before it was created".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for VaultEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultEntry")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .field("notes", &self.notes.as_ref().map(|_| "[REDACTED]"))
            .field("created_at", &self.created_at)
            .field("modified_at", &self.modified_at)
            .finish()
    }
}

/// Input for adding an entry.
#[derive(Clone, Default)]
pub struct NewEntry {
    pub title: String,
    pub username: String,
    pub secret: SecretString,
    pub notes: Option<String>,
}

impl NewEntry {
    /// Entry with a title, username and secret and no notes.
    pub fn new(
        title: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<SecretString>,
    ) -> Self {
        Self {
            title: title.into(),
            username: username.into(),
            secret: secret.into(),
            notes: None,
        }
    }

    /// Attach notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

impl fmt::Debug for NewEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewEntry")
            .field("title", &self.title)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Partial update of an entry.
///
/// `notes` is doubly optional: `Some(None)` clears the notes.
#[derive(Clone, Default)]
pub struct EntryUpdate {
    pub title: Option<String>,
    pub username: Option<String>,
    pub secret: Option<SecretString>,
    pub notes: Option<Option<String>>,
}

impl EntryUpdate {
    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.username.is_none()
            && self.secret.is_none()
            && self.notes.is_none()
    }
}

impl fmt::Debug for EntryUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryUpdate")
            .field("title", &self.title)
            .field("username", &self.username)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("notes", &self.notes.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::InvalidInput("Entry title must not be empty".to_string()));
    }
    Ok(())
}
