use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use herb_inventory_core::{
    apply_base_threshold, apply_dynamic_threshold, auto_check, response_time_hours,
    update_all_warnings, InventoryStore, MedicineCategory, MedicineRecord, MAX_MEDICINES,
};
use herb_inventory_store_file::{load_catalog_csv, load_usage_csv, restore_snapshot, save_snapshot};
use serde_json::Value;
use time::OffsetDateTime;

const CLI_CONTRACT_VERSION: &str = "herbinv.v1";

#[derive(Debug, Parser)]
#[command(name = "herbinv")]
#[command(about = "Herbal medicine inventory CLI")]
struct Cli {
    #[arg(long, default_value = "./herb_inventory.bin")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an empty snapshot with the given capacity.
    Init(InitArgs),
    Add(AddArgs),
    Remove(IdArgs),
    Update(UpdateArgs),
    Show,
    Find(IdArgs),
    LoadCatalog(CsvArgs),
    LoadUsage(CsvArgs),
    Threshold {
        #[command(subcommand)]
        command: ThresholdCommand,
    },
    /// Recompute every dynamic threshold for the date, then scan for
    /// warning transitions.
    Check(DateArgs),
    /// Scan for warning transitions against current thresholds.
    Scan,
    Status,
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, default_value_t = MAX_MEDICINES)]
    capacity: usize,
}

#[derive(Debug, Args)]
struct AddArgs {
    #[arg(long)]
    id: i32,
    #[arg(long)]
    name: String,
    #[arg(long)]
    origin: String,
    #[arg(long)]
    spec: String,
    #[arg(long)]
    stock: i32,
    #[arg(long, default_value_t = 0)]
    warning_threshold: i32,
}

#[derive(Debug, Args)]
struct IdArgs {
    #[arg(long)]
    id: i32,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    #[arg(long)]
    id: i32,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    origin: Option<String>,
    #[arg(long)]
    spec: Option<String>,
    #[arg(long)]
    stock: Option<i32>,
    #[arg(long)]
    warning_threshold: Option<i32>,
}

#[derive(Debug, Args)]
struct CsvArgs {
    #[arg(long)]
    csv: PathBuf,
}

#[derive(Debug, Subcommand)]
enum ThresholdCommand {
    /// Raise the threshold from the three-day usage average.
    Base(IdArgs),
    /// Recompute the threshold with seasonal and volatility multipliers.
    Dynamic(DynamicArgs),
}

#[derive(Debug, Args)]
struct DynamicArgs {
    #[arg(long)]
    id: i32,
    #[arg(long)]
    date: String,
}

#[derive(Debug, Args)]
struct DateArgs {
    #[arg(long)]
    date: String,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn open_store(path: &Path) -> Result<InventoryStore> {
    if path.exists() {
        restore_snapshot(path)
            .with_context(|| format!("failed to restore snapshot {}", path.display()))
    } else {
        InventoryStore::new(MAX_MEDICINES).map_err(Into::into)
    }
}

fn persist(store: &InventoryStore, path: &Path) -> Result<()> {
    save_snapshot(store, path)
        .with_context(|| format!("failed to save snapshot {}", path.display()))
}

fn record_value(record: &MedicineRecord) -> Result<Value> {
    let mut value = serde_json::to_value(record).context("failed to serialize record")?;
    if let Value::Object(object) = &mut value {
        object.insert(
            "category".to_string(),
            Value::String(MedicineCategory::for_id(record.id).as_str().to_string()),
        );
    }
    Ok(value)
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Init(args) => run_init(&args, &cli.store),
        Command::Add(args) => run_add(args, &cli.store),
        Command::Remove(args) => run_remove(&args, &cli.store),
        Command::Update(args) => run_update(args, &cli.store),
        Command::Show => run_show(&cli.store),
        Command::Find(args) => run_find(&args, &cli.store),
        Command::LoadCatalog(args) => run_load_catalog(&args, &cli.store),
        Command::LoadUsage(args) => run_load_usage(&args, &cli.store),
        Command::Threshold { command } => run_threshold(command, &cli.store),
        Command::Check(args) => run_check(&args, &cli.store),
        Command::Scan => run_scan(&cli.store),
        Command::Status => run_status(&cli.store),
    }
}

fn run_init(args: &InitArgs, store_path: &Path) -> Result<()> {
    let store = InventoryStore::new(args.capacity)?;
    persist(&store, store_path)?;
    emit_json(serde_json::json!({
        "store": store_path,
        "capacity": store.capacity(),
        "records": store.len()
    }))
}

fn run_add(args: AddArgs, store_path: &Path) -> Result<()> {
    let mut store = open_store(store_path)?;
    let record = MedicineRecord::new(
        args.id,
        &args.name,
        &args.origin,
        &args.spec,
        args.stock,
        args.warning_threshold,
    )?;
    let emitted = record_value(&record)?;
    store.insert(record)?;
    persist(&store, store_path)?;
    emit_json(emitted)
}

fn run_remove(args: &IdArgs, store_path: &Path) -> Result<()> {
    let mut store = open_store(store_path)?;
    let removed = store.delete(args.id)?;
    persist(&store, store_path)?;
    emit_json(serde_json::json!({
        "removed": record_value(&removed)?,
        "records": store.len()
    }))
}

fn run_update(args: UpdateArgs, store_path: &Path) -> Result<()> {
    let mut store = open_store(store_path)?;
    {
        let record = store
            .find_mut(args.id)
            .ok_or_else(|| anyhow!("medicine id {} not found", args.id))?;
        if let Some(name) = args.name {
            record.name = name;
        }
        if let Some(origin) = args.origin {
            record.origin = origin;
        }
        if let Some(spec) = args.spec {
            record.spec = spec;
        }
        if let Some(stock) = args.stock {
            record.stock = stock;
        }
        if let Some(warning_threshold) = args.warning_threshold {
            record.warning_threshold = warning_threshold;
        }
        record.validate()?;
    }
    persist(&store, store_path)?;

    let updated = store.find(args.id).ok_or_else(|| anyhow!("record vanished after update"))?;
    emit_json(record_value(updated)?)
}

fn run_show(store_path: &Path) -> Result<()> {
    let store = open_store(store_path)?;
    let records = store
        .records()
        .iter()
        .map(record_value)
        .collect::<Result<Vec<_>>>()?;
    emit_json(serde_json::json!({
        "capacity": store.capacity(),
        "records": records
    }))
}

fn run_find(args: &IdArgs, store_path: &Path) -> Result<()> {
    let store = open_store(store_path)?;
    let record =
        store.find(args.id).ok_or_else(|| anyhow!("medicine id {} not found", args.id))?;
    emit_json(record_value(record)?)
}

fn run_load_catalog(args: &CsvArgs, store_path: &Path) -> Result<()> {
    let mut store = open_store(store_path)?;
    let summary = load_catalog_csv(&mut store, &args.csv)
        .with_context(|| format!("failed to load catalog {}", args.csv.display()))?;
    persist(&store, store_path)?;
    emit_json(serde_json::json!({
        "csv": args.csv,
        "applied": summary.applied,
        "skipped": summary.skipped,
        "records": store.len()
    }))
}

fn run_load_usage(args: &CsvArgs, store_path: &Path) -> Result<()> {
    let mut store = open_store(store_path)?;
    let summary = load_usage_csv(&mut store, &args.csv)
        .with_context(|| format!("failed to load usage history {}", args.csv.display()))?;
    persist(&store, store_path)?;
    emit_json(serde_json::json!({
        "csv": args.csv,
        "applied": summary.applied,
        "skipped": summary.skipped
    }))
}

fn run_threshold(command: ThresholdCommand, store_path: &Path) -> Result<()> {
    let mut store = open_store(store_path)?;
    match command {
        ThresholdCommand::Base(args) => {
            let record = store
                .find_mut(args.id)
                .ok_or_else(|| anyhow!("medicine id {} not found", args.id))?;
            apply_base_threshold(record);
            let threshold = record.warning_threshold;
            persist(&store, store_path)?;
            emit_json(serde_json::json!({
                "id": args.id,
                "warning_threshold": threshold
            }))
        }
        ThresholdCommand::Dynamic(args) => {
            let record = store
                .find_mut(args.id)
                .ok_or_else(|| anyhow!("medicine id {} not found", args.id))?;
            apply_dynamic_threshold(record, &args.date);
            let threshold = record.warning_threshold;
            persist(&store, store_path)?;
            emit_json(serde_json::json!({
                "id": args.id,
                "date": args.date,
                "warning_threshold": threshold
            }))
        }
    }
}

fn run_check(args: &DateArgs, store_path: &Path) -> Result<()> {
    let mut store = open_store(store_path)?;
    let triggered = auto_check(&mut store, &args.date, now_unix());
    persist(&store, store_path)?;
    let active = store.records().iter().filter(|record| record.is_warning).count();
    emit_json(serde_json::json!({
        "date": args.date,
        "triggered": triggered,
        "active_warnings": active
    }))
}

fn run_scan(store_path: &Path) -> Result<()> {
    let mut store = open_store(store_path)?;
    let triggered = update_all_warnings(&mut store, now_unix());
    persist(&store, store_path)?;
    let active = store.records().iter().filter(|record| record.is_warning).count();
    emit_json(serde_json::json!({
        "triggered": triggered,
        "active_warnings": active
    }))
}

fn run_status(store_path: &Path) -> Result<()> {
    let store = open_store(store_path)?;
    let entries = store
        .records()
        .iter()
        .map(|record| {
            serde_json::json!({
                "id": record.id,
                "name": record.name,
                "category": MedicineCategory::for_id(record.id).as_str(),
                "stock": record.stock,
                "warning_threshold": record.warning_threshold,
                "is_warning": record.is_warning,
                "response_hours": response_time_hours(record)
            })
        })
        .collect::<Vec<_>>();
    let active = store.records().iter().filter(|record| record.is_warning).count();
    emit_json(serde_json::json!({
        "records": store.len(),
        "active_warnings": active,
        "entries": entries
    }))
}
