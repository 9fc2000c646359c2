//! CredVault CLI - Command line interface for the credential vault.
//!
//! Every command opens the vault file, prompts for the passphrase where
//! needed, performs one operation, saves if anything changed, and locks
//! again before exiting.

mod clipboard;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use credvault_common::{EntryId, Passphrase, SecretString};
use credvault_crypto::KdfParams;
use credvault_lifecycle::{ClipboardBackend, MemoryClipboard, SecretLifecycle};
use credvault_vault::{EntryUpdate, NewEntry, VaultConfig, VaultEntry, VaultStore};

use crate::clipboard::CommandClipboard;

#[derive(Parser)]
#[command(name = "credvault")]
#[command(about = "CredVault - Local encrypted credential vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the vault file.
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    /// Keep copied secrets in process memory instead of the system
    /// clipboard.
    #[arg(long, global = true)]
    headless: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault.
    Init {
        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long)]
        strength: Option<String>,
    },

    /// List entries (secrets are never printed).
    List {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show one entry's details (the secret is never printed).
    Show {
        /// Entry id, unique id prefix, or exact title.
        entry: String,
    },

    /// Add an entry. The secret is prompted for.
    Add {
        /// Entry title.
        title: String,

        /// Account name.
        #[arg(short, long, default_value = "")]
        username: String,

        /// Free-form notes.
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Edit an entry.
    Edit {
        /// Entry id, unique id prefix, or exact title.
        entry: String,

        /// New title.
        #[arg(short, long)]
        title: Option<String>,

        /// New account name.
        #[arg(short, long)]
        username: Option<String>,

        /// New notes.
        #[arg(short, long, conflicts_with = "clear_notes")]
        notes: Option<String>,

        /// Remove the notes.
        #[arg(long)]
        clear_notes: bool,

        /// Prompt for a new secret.
        #[arg(long)]
        secret: bool,
    },

    /// Remove an entry.
    Remove {
        /// Entry id, unique id prefix, or exact title.
        entry: String,
    },

    /// Copy an entry's secret to the clipboard until the timeout elapses.
    Copy {
        /// Entry id, unique id prefix, or exact title.
        entry: String,
    },

    /// Write a copy of the encrypted vault file.
    Export {
        /// Destination file.
        dest: PathBuf,
    },

    /// Merge entries from another vault file.
    Import {
        /// Source vault file.
        source: PathBuf,
    },

    /// Show container information without unlocking.
    Info,

    /// Change the vault passphrase.
    ChangePassphrase,

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "credvault", &mut std::io::stdout());
        return Ok(());
    }

    let vault_path = match cli.vault {
        Some(path) => path,
        None => default_vault_path()?,
    };
    let mut config = VaultConfig::from_env().context("Invalid CredVault environment settings")?;
    if let Commands::Init {
        strength: Some(strength),
    } = &cli.command
    {
        config = config.with_kdf(parse_strength(strength)?);
    }
    let store = open_store(&vault_path, config, cli.headless)?;

    match cli.command {
        Commands::Init { .. } => cmd_init(&store, &vault_path).await,
        Commands::List { json } => cmd_list(&store, json).await,
        Commands::Show { entry } => cmd_show(&store, &entry).await,
        Commands::Add {
            title,
            username,
            notes,
        } => cmd_add(&store, title, username, notes).await,
        Commands::Edit {
            entry,
            title,
            username,
            notes,
            clear_notes,
            secret,
        } => {
            let notes = if clear_notes { Some(None) } else { notes.map(Some) };
            cmd_edit(&store, &entry, title, username, notes, secret).await
        }
        Commands::Remove { entry } => cmd_remove(&store, &entry).await,
        Commands::Copy { entry } => cmd_copy(&store, &entry).await,
        Commands::Export { dest } => cmd_export(&store, &dest).await,
        Commands::Import { source } => cmd_import(&store, &source).await,
        Commands::Info => cmd_info(&store).await,
        Commands::ChangePassphrase => cmd_change_passphrase(&store).await,
        Commands::Completions { .. } => Ok(()),
    }
}

fn default_vault_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context("Cannot determine a data directory; use --vault")?;
    Ok(data_dir.join("credvault").join("vault.cvault"))
}

fn parse_strength(strength: &str) -> Result<KdfParams> {
    Ok(match strength {
        "interactive" => KdfParams::interactive(),
        "moderate" => KdfParams::moderate(),
        "sensitive" => KdfParams::sensitive(),
        _ => bail!("Invalid strength. Use: interactive, moderate, or sensitive"),
    })
}

fn open_store(path: &Path, config: VaultConfig, headless: bool) -> Result<VaultStore> {
    let backend: Arc<dyn ClipboardBackend> = if headless {
        Arc::new(MemoryClipboard::new())
    } else {
        match CommandClipboard::detect() {
            Some(clipboard) => {
                tracing::debug!(program = clipboard.program(), "Using system clipboard");
                Arc::new(clipboard)
            }
            None => {
                warn!("No clipboard program found; copied secrets stay inside this process");
                Arc::new(MemoryClipboard::new())
            }
        }
    };

    let lifecycle = Arc::new(SecretLifecycle::new(backend, config.clipboard_timeout));
    VaultStore::open_local(path, lifecycle, config).context("Failed to set up vault")
}

/// Prompt for a passphrase securely.
fn prompt_secret(prompt: &str) -> Result<SecretString> {
    let value = rpassword::prompt_password(prompt).context("Failed to read passphrase")?;
    Ok(SecretString::new(value))
}

fn prompt_new_secret(prompt: &str, confirm: &str) -> Result<SecretString> {
    let value = prompt_secret(prompt)?;
    let again = prompt_secret(confirm)?;
    if value != again {
        bail!("Values do not match");
    }
    Ok(value)
}

/// Prompt for the passphrase and unlock. Returns the passphrase used.
async fn unlock(store: &VaultStore) -> Result<Passphrase> {
    if !store.exists().await? {
        bail!(
            "No vault at {}. Run `credvault init` first.",
            store.location()
        );
    }
    let passphrase: Passphrase = prompt_secret("Enter passphrase: ")?;
    store
        .unlock(&passphrase)
        .await
        .context("Failed to unlock vault")?;
    Ok(passphrase)
}

async fn save_and_lock(store: &VaultStore) -> Result<()> {
    if store.is_dirty().await {
        store.save().await.context("Failed to save vault")?;
    }
    store.lock().await.context("Failed to lock vault")
}

/// Resolve a user-supplied reference to exactly one entry.
async fn resolve_entry(store: &VaultStore, reference: &str) -> Result<EntryId> {
    if let Ok(id) = reference.parse::<EntryId>() {
        return Ok(id);
    }

    let entries = store.list_entries().await?;
    let matches = matching_entries(&entries, reference);

    match matches.as_slice() {
        [id] => Ok(*id),
        [] => bail!("No entry matches '{}'", reference),
        _ => bail!(
            "'{}' matches {} entries; use a longer id prefix",
            reference,
            matches.len()
        ),
    }
}

/// Entries whose id starts with `reference` or whose title equals it exactly.
fn matching_entries(entries: &[VaultEntry], reference: &str) -> Vec<EntryId> {
    let prefix = reference.trim().to_lowercase();
    entries
        .iter()
        .filter(|e| {
            (!prefix.is_empty() && e.id.to_string().starts_with(&prefix)) || e.title == reference
        })
        .map(|e| e.id)
        .collect()
}

/// Create a new vault.
async fn cmd_init(store: &VaultStore, path: &Path) -> Result<()> {
    info!("Creating new vault at {}", path.display());

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create vault directory")?;
        }
    }

    let passphrase = prompt_new_secret("Choose a passphrase: ", "Confirm passphrase: ")?;
    if passphrase.is_empty() {
        bail!("Passphrase cannot be empty");
    }

    store
        .create(&passphrase)
        .await
        .context("Failed to create vault")?;
    let kdf = store.config().kdf;
    store.lock().await?;

    println!("Vault created successfully!");
    println!("  Location: {}", path.display());
    println!(
        "  KDF: Argon2id, {} KiB, {} iterations, {} lanes",
        kdf.memory_cost, kdf.time_cost, kdf.parallelism
    );

    Ok(())
}

#[derive(Serialize)]
struct EntrySummary<'a> {
    id: String,
    title: &'a str,
    username: &'a str,
    has_notes: bool,
    created_at: String,
    modified_at: String,
}

impl<'a> From<&'a VaultEntry> for EntrySummary<'a> {
    fn from(entry: &'a VaultEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            title: &entry.title,
            username: &entry.username,
            has_notes: entry.notes.is_some(),
            created_at: entry.created_at.to_rfc3339(),
            modified_at: entry.modified_at.to_rfc3339(),
        }
    }
}

/// List entries.
async fn cmd_list(store: &VaultStore, json: bool) -> Result<()> {
    unlock(store).await?;
    let entries = store.list_entries().await?;
    store.lock().await?;

    if json {
        let summaries: Vec<EntrySummary<'_>> = entries.iter().map(EntrySummary::from).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Vault is empty.");
    } else {
        println!("{} entries:", entries.len());
        for entry in &entries {
            let id = entry.id.to_string();
            println!("  {}  {:<24} {}", &id[..8], entry.title, entry.username);
        }
    }

    Ok(())
}

/// Show one entry.
async fn cmd_show(store: &VaultStore, reference: &str) -> Result<()> {
    unlock(store).await?;
    let id = resolve_entry(store, reference).await?;
    let entry = store.get_entry(id).await?;
    store.lock().await?;

    println!("Entry {}", entry.id);
    println!("  Title:    {}", entry.title);
    println!("  Username: {}", entry.username);
    println!("  Secret:   ({} characters, use `credvault copy`)", entry.secret.chars().count());
    if let Some(notes) = &entry.notes {
        println!("  Notes:    {}", notes);
    }
    println!("  Created:  {}", entry.created_at);
    println!("  Modified: {}", entry.modified_at);

    Ok(())
}

/// Add an entry.
async fn cmd_add(
    store: &VaultStore,
    title: String,
    username: String,
    notes: Option<String>,
) -> Result<()> {
    unlock(store).await?;
    let secret = prompt_new_secret("Secret: ", "Confirm secret: ")?;

    let mut new = NewEntry::new(title, username, secret);
    new.notes = notes;
    let id = store.add_entry(new).await.context("Failed to add entry")?;
    save_and_lock(store).await?;

    println!("Entry added: {}", id);
    Ok(())
}

/// Edit an entry.
async fn cmd_edit(
    store: &VaultStore,
    reference: &str,
    title: Option<String>,
    username: Option<String>,
    notes: Option<Option<String>>,
    new_secret: bool,
) -> Result<()> {
    unlock(store).await?;
    let id = resolve_entry(store, reference).await?;

    let secret = if new_secret {
        Some(prompt_new_secret("New secret: ", "Confirm secret: ")?)
    } else {
        None
    };
    let update = EntryUpdate {
        title,
        username,
        secret,
        notes,
    };
    if update.is_empty() {
        store.lock().await?;
        bail!("Nothing to change; pass --title, --username, --notes, --clear-notes or --secret");
    }

    store
        .update_entry(id, update)
        .await
        .context("Failed to update entry")?;
    save_and_lock(store).await?;

    println!("Entry updated: {}", id);
    Ok(())
}

/// Remove an entry.
async fn cmd_remove(store: &VaultStore, reference: &str) -> Result<()> {
    unlock(store).await?;
    let id = resolve_entry(store, reference).await?;
    store
        .delete_entry(id)
        .await
        .context("Failed to remove entry")?;
    save_and_lock(store).await?;

    println!("Entry removed: {}", id);
    Ok(())
}

/// Copy a secret and hold it until the timeout or Ctrl-C.
async fn cmd_copy(store: &VaultStore, reference: &str) -> Result<()> {
    unlock(store).await?;
    let id = resolve_entry(store, reference).await?;
    let hold = store
        .copy_to_clipboard(id)
        .await
        .context("Failed to copy to clipboard")?;

    println!(
        "Secret copied. The clipboard is cleared in {} seconds; press Ctrl-C to clear it now.",
        (hold.deadline - hold.copied_at).as_secs()
    );

    tokio::select! {
        _ = tokio::time::sleep_until(hold.deadline) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    store.lifecycle().shutdown().await?;
    store.lock().await?;
    println!("Clipboard cleared.");
    Ok(())
}

/// Export the encrypted container.
async fn cmd_export(store: &VaultStore, dest: &Path) -> Result<()> {
    store
        .export_vault(dest)
        .await
        .context("Failed to export vault")?;

    println!("Vault exported to {}", dest.display());
    println!("The copy opens with the vault passphrase.");
    Ok(())
}

/// Import entries from another vault file.
async fn cmd_import(store: &VaultStore, source: &Path) -> Result<()> {
    unlock(store).await?;
    let source_passphrase = prompt_secret("Passphrase of the vault being imported: ")?;

    let report = match store.import_vault(source, &source_passphrase).await {
        Ok(report) => report,
        Err(e) => {
            store.lock().await?;
            return Err(e).context("Failed to import vault");
        }
    };
    save_and_lock(store).await?;

    println!("Import complete:");
    println!("  Added:   {}", report.added);
    println!("  Updated: {}", report.updated);
    println!("  Skipped: {}", report.skipped);
    println!("  Retired: {}", report.retired);
    Ok(())
}

/// Show container information.
async fn cmd_info(store: &VaultStore) -> Result<()> {
    let info = store.inspect().await.context("Failed to read vault")?;

    println!("Vault Information:");
    println!("  Location: {}", store.location());
    println!("  Format version: {}", info.version);
    println!("  Size: {} bytes", info.total_len);
    println!("  KDF Parameters:");
    println!("    Memory: {} KiB", info.kdf.memory_cost);
    println!("    Time: {} iterations", info.kdf.time_cost);
    println!("    Parallelism: {}", info.kdf.parallelism);
    if info.kdf.is_weaker_than(&store.config().kdf) {
        println!("  (weaker than the current policy; upgraded on next unlock and save)");
    }

    Ok(())
}

/// Change the vault passphrase.
async fn cmd_change_passphrase(store: &VaultStore) -> Result<()> {
    let current = unlock(store).await?;
    let new = prompt_new_secret("Enter new passphrase: ", "Confirm new passphrase: ")?;
    if new.is_empty() {
        store.lock().await?;
        bail!("Passphrase cannot be empty");
    }

    if let Err(e) = store.change_passphrase(&current, &new).await {
        store.lock().await?;
        return Err(e).context("Failed to change passphrase");
    }
    save_and_lock(store).await?;

    println!("Passphrase changed successfully!");
    Ok(())
}
