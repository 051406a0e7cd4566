use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use saveslot_core::{RecordCodec, SaveRecord, TaggedPayload};
use saveslot_store_fs::{IntegrityMode, SaveStore, StoreConfig};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Vec3 {
    x: f32,
    y: f32,
    z: f32,
}

/// Demo variant: the classic player slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PlayerData {
    health: u32,
    mana: u32,
    position: Vec3,
    num_hints: u32,
    is_premium: bool,
}

impl TaggedPayload for PlayerData {
    const TYPE_TAG: &'static str = "player";
}

/// Demo variant: a named progress checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointData {
    label: String,
    progress: f32,
}

impl TaggedPayload for CheckpointData {
    const TYPE_TAG: &'static str = "checkpoint";
}

#[derive(Debug, Parser)]
#[command(name = "saveslot")]
#[command(about = "Typed save-record store CLI")]
struct Cli {
    /// Directory holding one file per record.
    #[arg(long, default_value = "./save")]
    dir: PathBuf,

    /// Filename extension appended to record ids, e.g. `.json`.
    #[arg(long, default_value = "")]
    extension: String,

    #[arg(long, value_enum, default_value = "verify")]
    integrity: IntegrityArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IntegrityArg {
    Off,
    Stamp,
    Verify,
}

impl From<IntegrityArg> for IntegrityMode {
    fn from(value: IntegrityArg) -> Self {
        match value {
            IntegrityArg::Off => Self::Off,
            IntegrityArg::Stamp => Self::Stamp,
            IntegrityArg::Verify => Self::Verify,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load every stored record and report how many were loaded.
    Init,
    /// Save a player record.
    Save(SaveArgs),
    /// Save a checkpoint record.
    Checkpoint(CheckpointArgs),
    /// Look up one record by id.
    Get(IdArgs),
    /// Delete one record by id.
    Delete(IdArgs),
    /// Print every loaded record, keyed by id.
    List,
}

#[derive(Debug, Args)]
struct SaveArgs {
    #[arg(long, default_value = "")]
    id: String,
    #[arg(long, default_value_t = 100)]
    health: u32,
    #[arg(long, default_value_t = 100)]
    mana: u32,
    #[arg(long, default_value_t = 0.0)]
    x: f32,
    #[arg(long, default_value_t = 0.0)]
    y: f32,
    #[arg(long, default_value_t = 0.0)]
    z: f32,
    #[arg(long, default_value_t = 0)]
    num_hints: u32,
    #[arg(long, default_value_t = false)]
    is_premium: bool,
    /// Replace an existing record instead of suffixing the id.
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

#[derive(Debug, Args)]
struct CheckpointArgs {
    #[arg(long, default_value = "")]
    id: String,
    #[arg(long)]
    label: String,
    #[arg(long, default_value_t = 0.0)]
    progress: f32,
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

#[derive(Debug, Args)]
struct IdArgs {
    #[arg(long)]
    id: String,
}

fn demo_codec() -> RecordCodec {
    let mut codec = RecordCodec::new();
    codec.register::<PlayerData>();
    codec.register::<CheckpointData>();
    codec
}

fn record_json(record: &SaveRecord) -> Result<Value> {
    let payload = record
        .payload()
        .to_value()
        .with_context(|| format!("failed to render record {}", record.id()))?;
    Ok(json!({
        "id": record.id(),
        "type_tag": record.type_tag(),
        "integrity_digest": record.integrity_digest(),
        "payload": payload,
    }))
}

fn print_json(value: &Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = StoreConfig::new(cli.dir)
        .with_extension(cli.extension)
        .with_integrity(cli.integrity.into());
    let store = SaveStore::open(config, demo_codec());

    match cli.command {
        Command::Init => {
            let loaded = store.initialize().context("initialization failed")?;
            print_json(&json!({ "loaded": loaded }))
        }
        Command::Save(args) => {
            store.initialize().context("initialization failed")?;
            let record = SaveRecord::new(
                args.id,
                PlayerData {
                    health: args.health,
                    mana: args.mana,
                    position: Vec3 { x: args.x, y: args.y, z: args.z },
                    num_hints: args.num_hints,
                    is_premium: args.is_premium,
                },
            );
            let stored = store.save_new(&record, args.overwrite).context("save failed")?;
            print_json(&record_json(&stored)?)
        }
        Command::Checkpoint(args) => {
            store.initialize().context("initialization failed")?;
            let record = SaveRecord::new(
                args.id,
                CheckpointData { label: args.label, progress: args.progress },
            );
            let stored = store.save_new(&record, args.overwrite).context("save failed")?;
            print_json(&record_json(&stored)?)
        }
        Command::Get(args) => {
            store.initialize().context("initialization failed")?;
            match store.get_by_id(&args.id) {
                Some(record) => print_json(&record_json(&record)?),
                None => print_json(&json!({ "id": args.id, "found": false })),
            }
        }
        Command::Delete(args) => {
            store.initialize().context("initialization failed")?;
            let deleted = store.delete_by_id(&args.id).context("delete failed")?;
            print_json(&json!({ "id": args.id, "deleted": deleted }))
        }
        Command::List => {
            store.initialize().context("initialization failed")?;
            let mut listing = serde_json::Map::new();
            let mut records: Vec<_> = store.snapshot().into_values().collect();
            records.sort_by(|a, b| a.id().cmp(b.id()));
            for record in records {
                listing.insert(record.id().to_owned(), record_json(&record)?);
            }
            print_json(&Value::Object(listing))
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse())
}
