//! labjournal CLI - Command line interface for a local record store.
//!
//! Every invocation opens the store, which starts a new session: the
//! quarantine of the previous session is purged and overviews and ledgers
//! are repaired before the command runs.

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use labjournal_common::RecordId;
use labjournal_document::{Overview, SensorSpec};
use labjournal_store::{RecordStore, StoreConfig};

#[derive(Parser)]
#[command(name = "labjournal")]
#[command(about = "labjournal - Local experiment record store")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Store root (default: the platform data directory).
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Directory holding deleted data (default: the store root).
    #[arg(long, global = true)]
    deleted_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store if needed and report where it lives.
    Init,

    /// List records.
    List {
        /// Include archived records.
        #[arg(short, long)]
        all: bool,
    },

    /// Create an empty record.
    Create {
        /// Record title.
        #[arg(short, long)]
        title: String,
    },

    /// Print a record as JSON.
    Show {
        /// Record ID.
        id: String,
    },

    /// Move a record into quarantine until the next session.
    Delete {
        /// Record ID.
        id: String,
    },

    /// Archive a record.
    Archive {
        /// Record ID.
        id: String,

        /// Unarchive instead.
        #[arg(long)]
        undo: bool,
    },

    /// Copy a file into a record's assets.
    AddAsset {
        /// Record ID.
        id: String,

        /// Source file to add.
        #[arg(short, long)]
        source: PathBuf,

        /// Asset file name (default: the source file name).
        #[arg(short, long)]
        name: Option<String>,

        /// Also make the asset the record's cover.
        #[arg(long)]
        cover: bool,
    },

    /// Set or clear a record's cover image.
    SetCover {
        /// Record ID.
        id: String,

        /// Asset path relative to the record, e.g. assets/photo.jpg.
        #[arg(short, long, conflicts_with = "clear")]
        asset: Option<String>,

        /// Remove the cover.
        #[arg(long)]
        clear: bool,
    },

    /// Quarantine asset files no longer referenced by a record.
    CleanupAssets {
        /// Record ID.
        id: String,
    },

    /// List paired sensor specs.
    Sensors,

    /// Show sync bookkeeping.
    Status,
}

fn main() -> Result<()> {
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
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = store_config(cli.root, cli.deleted_root)?;

    match cli.command {
        Commands::Init => cmd_init(config),
        Commands::List { all } => cmd_list(config, all),
        Commands::Create { title } => cmd_create(config, &title),
        Commands::Show { id } => cmd_show(config, &id),
        Commands::Delete { id } => cmd_delete(config, &id),
        Commands::Archive { id, undo } => cmd_archive(config, &id, !undo),
        Commands::AddAsset {
            id,
            source,
            name,
            cover,
        } => cmd_add_asset(config, &id, &source, name, cover),
        Commands::SetCover { id, asset, clear } => {
            if asset.is_none() && !clear {
                anyhow::bail!("Pass --asset <path> or --clear");
            }
            cmd_set_cover(config, &id, asset)
        }
        Commands::CleanupAssets { id } => cmd_cleanup_assets(config, &id),
        Commands::Sensors => cmd_sensors(config),
        Commands::Status => cmd_status(config),
    }
}

fn store_config(root: Option<PathBuf>, deleted_root: Option<PathBuf>) -> Result<StoreConfig> {
    let root = match root {
        Some(root) => root,
        None => dirs::data_dir()
            .context("No platform data directory; pass --root")?
            .join("labjournal"),
    };
    let mut config = StoreConfig::new(root);
    if let Some(deleted_root) = deleted_root {
        config = config.with_deleted_root(deleted_root);
    }
    Ok(config)
}

fn open(config: StoreConfig) -> Result<RecordStore> {
    let root = config.root.clone();
    RecordStore::open(config)
        .with_context(|| format!("Failed to open store at {}", root.display()))
}

fn parse_id(id: &str) -> Result<RecordId> {
    RecordId::new(id).context("Invalid record ID")
}

fn format_time(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_overview(overview: &Overview) {
    let archived = if overview.is_archived { " [archived]" } else { "" };
    println!(
        "  {}  {}{} ({} trials, used {})",
        overview.record_id,
        overview.title,
        archived,
        overview.trial_count,
        format_time(overview.last_used_ms)
    );
}

/// Create the store.
fn cmd_init(config: StoreConfig) -> Result<()> {
    let store = open(config)?;

    println!("Store ready!");
    println!("  Location: {}", store.config().root.display());
    println!("  Deleted data: {}", store.quarantine().root().display());
    println!("  Version: {}", store.current_version());
    println!("  Records: {}", store.overviews().len());

    Ok(())
}

/// List records.
fn cmd_list(config: StoreConfig, all: bool) -> Result<()> {
    let store = open(config)?;
    let mut overviews = store.overviews();
    overviews.retain(|o| all || !o.is_archived);
    overviews.sort_by(|a, b| b.last_used_ms.cmp(&a.last_used_ms));

    if overviews.is_empty() {
        println!("No records.");
    } else {
        println!("Records:");
        for overview in &overviews {
            print_overview(overview);
        }
    }

    Ok(())
}

/// Create a record.
fn cmd_create(config: StoreConfig, title: &str) -> Result<()> {
    info!("Creating record: {}", title);

    let store = open(config)?;
    let record = store
        .create_record(title)
        .context("Failed to create record")?;

    println!("Record created successfully!");
    println!("  ID: {}", record.id);
    println!("  Title: {}", record.title);

    Ok(())
}

/// Print a record.
fn cmd_show(config: StoreConfig, id: &str) -> Result<()> {
    let store = open(config)?;
    let id = parse_id(id)?;
    let record = store.load_record(&id).context("Failed to load record")?;

    println!("{}", serde_json::to_string_pretty(&record)?);

    Ok(())
}

/// Delete a record.
fn cmd_delete(config: StoreConfig, id: &str) -> Result<()> {
    info!("Deleting record: {}", id);

    let store = open(config)?;
    let id = parse_id(id)?;
    store.delete_record(&id).context("Failed to delete record")?;

    println!("Record deleted: {}", id);
    println!("  It is purged when the store is next opened.");

    Ok(())
}

/// Archive or unarchive a record.
fn cmd_archive(config: StoreConfig, id: &str, archived: bool) -> Result<()> {
    let store = open(config)?;
    let id = parse_id(id)?;
    store
        .set_archived(&id, archived)
        .context("Failed to change archive state")?;

    if archived {
        println!("Record archived: {}", id);
    } else {
        println!("Record unarchived: {}", id);
    }

    Ok(())
}

/// Add an asset file.
fn cmd_add_asset(
    config: StoreConfig,
    id: &str,
    source: &Path,
    name: Option<String>,
    cover: bool,
) -> Result<()> {
    info!("Adding asset {} to {}", source.display(), id);

    let name = match name {
        Some(name) => name,
        None => source
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from)
            .context("Source has no usable file name; pass --name")?,
    };
    let content = std::fs::read(source).context("Failed to read source file")?;

    let store = open(config)?;
    let id = parse_id(id)?;
    let asset = store
        .add_asset(&id, &name, &content)
        .context("Failed to add asset")?;

    if cover {
        let mut record = store.load_record(&id).context("Failed to load record")?;
        store
            .set_cover(&mut record, Some(asset.clone()))
            .context("Failed to set cover")?;
    }

    println!("Asset added: {} ({} bytes)", asset, content.len());

    Ok(())
}

/// Set or clear the cover.
fn cmd_set_cover(config: StoreConfig, id: &str, asset: Option<String>) -> Result<()> {
    let store = open(config)?;
    let id = parse_id(id)?;
    let mut record = store.load_record(&id).context("Failed to load record")?;

    store
        .set_cover(&mut record, asset.clone())
        .context("Failed to set cover")?;

    match asset {
        Some(asset) => println!("Cover set: {}", asset),
        None => println!("Cover cleared."),
    }

    Ok(())
}

/// Quarantine unreferenced assets.
fn cmd_cleanup_assets(config: StoreConfig, id: &str) -> Result<()> {
    let store = open(config)?;
    let id = parse_id(id)?;
    let record = store.load_record(&id).context("Failed to load record")?;

    let staged = store
        .cleanup_orphan_assets(&record)
        .context("Failed to clean up assets")?;

    if staged.is_empty() {
        println!("No orphan assets.");
    } else {
        println!("Quarantined {} asset(s):", staged.len());
        for path in staged {
            println!("  {}", path);
        }
    }

    Ok(())
}

/// List sensor specs.
fn cmd_sensors(config: StoreConfig) -> Result<()> {
    let store = open(config)?;
    let specs: Vec<SensorSpec> = store.sensor_specs().context("Failed to list sensors")?;

    if specs.is_empty() {
        println!("No paired sensors.");
    } else {
        println!("Sensors:");
        for spec in specs {
            println!("  {} {} {}", spec.provider_id, spec.address, spec.name);
        }
    }

    Ok(())
}

/// Show sync bookkeeping.
fn cmd_status(config: StoreConfig) -> Result<()> {
    let store = open(config)?;
    let library = store.ledgers().library();
    let status = store.ledgers().sync_status();

    println!("Sync status:");
    println!("  Library entries: {}", library.len());
    println!("  Tracked records: {}", status.len());

    let dirty: Vec<&RecordId> = status.dirty_ids().collect();
    if dirty.is_empty() {
        println!("  Nothing to upload.");
    } else {
        println!("  Dirty records:");
        for id in dirty {
            let deleted = library.entry(id).map(|e| e.is_deleted).unwrap_or(false);
            let marker = if deleted { " [deleted]" } else { "" };
            println!("    {}{}", id, marker);
        }
    }

    Ok(())
}
