//! ringgraph: headless runner for the fraud-ring pipeline.
//!
//! Usage:
//!   ringgraph simulate --seed 42 --bronze-dir data/bronze
//!   ringgraph setup
//!   ringgraph load --config pipeline.json
//!   ringgraph run --seed 7
//!
//! Graph store connection comes from RINGGRAPH_GRAPH_URI, _USER,
//! _PASSWORD and _DATABASE.

use anyhow::{bail, Result};
use ringgraph_core::{
    bronze::{BronzeDir, Dataset},
    config::{PipelineConfig, StoreConfig},
    graph_loader::{load_bronze, GraphCounts, LoadReport},
    pipeline::Pipeline,
    rng::StageSlot,
    stage::StageReport,
    store::{GraphStore, SqliteGraphStore},
};
use std::env;

const USAGE: &str = "usage: ringgraph <generate|enrich|inject|simulate|setup|load|run|validate|stats|config> \
[--seed N] [--bronze-dir DIR] [--config FILE]";

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1).filter(|a| !a.starts_with("--")) else {
        bail!("{USAGE}");
    };
    let config = resolve_config(&args)?;
    let store_cfg = StoreConfig::from_env();

    println!("ringgraph {command}");
    println!("  seed:        {}", config.seed);
    println!("  bronze_dir:  {}", config.bronze_dir.display());
    println!("  graph:       {} (database '{}')", store_cfg.uri, store_cfg.database);
    println!();

    match command.as_str() {
        "generate" => run_stage(&config, StageSlot::EntityGenerator)?,
        "enrich" => run_stage(&config, StageSlot::ReuseSampler)?,
        "inject" => run_stage(&config, StageSlot::RingInjector)?,
        "simulate" => simulate(&config)?,
        "setup" => setup(&store_cfg)?,
        "load" => load(&config, &store_cfg)?,
        "run" => {
            simulate(&config)?;
            load(&config, &store_cfg)?;
        }
        "validate" => validate(&config)?,
        "stats" => stats(&store_cfg)?,
        "config" => println!("{}", serde_json::to_string_pretty(&config)?),
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }
    log::info!("{command} finished");
    Ok(())
}

/// Defaults, then the JSON file, then command-line overrides.
fn resolve_config(args: &[String]) -> Result<PipelineConfig> {
    let mut config = match flag_value(args, "--config") {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    config.seed = parse_arg(args, "--seed", config.seed)?;
    if let Some(dir) = flag_value(args, "--bronze-dir") {
        config.bronze_dir = dir.into();
    }
    config.validate()?;
    Ok(config)
}

fn run_stage(config: &PipelineConfig, slot: StageSlot) -> Result<()> {
    let pipeline = Pipeline::build(config)?;
    let report = pipeline.run_stage(slot)?;
    print_stage(&report);
    Ok(())
}

fn simulate(config: &PipelineConfig) -> Result<()> {
    let pipeline = Pipeline::build(config)?;
    for report in pipeline.run_all()? {
        print_stage(&report);
    }
    Ok(())
}

fn setup(store_cfg: &StoreConfig) -> Result<()> {
    let store = SqliteGraphStore::create(store_cfg)?;
    store.migrate()?;
    store.register_principal(&store_cfg.user, &store_cfg.password)?;
    store.verify_connectivity()?;
    println!("=== SCHEMA READY ===");
    println!("  store:     {}", store_cfg.path());
    println!("  version:   {}", store.schema_version()?.unwrap_or_default());
    println!("  principal: {}", store_cfg.user);
    Ok(())
}

fn load(config: &PipelineConfig, store_cfg: &StoreConfig) -> Result<()> {
    let bronze = BronzeDir::new(&config.bronze_dir);
    let mut store = SqliteGraphStore::open(store_cfg)?;
    let report = load_bronze(&bronze, &mut store, config.load.clone())?;
    print_load(&report);
    Ok(())
}

fn validate(config: &PipelineConfig) -> Result<()> {
    let dataset = Dataset::read(&BronzeDir::new(&config.bronze_dir))?;
    dataset.check_integrity()?;
    println!("=== BRONZE VALID ===");
    println!("  people:        {}", dataset.people.len());
    println!("  merchants:     {}", dataset.merchants.len());
    println!("  devices:       {}", dataset.devices.len());
    println!("  ips:           {}", dataset.ips.len());
    println!("  cards:         {}", dataset.cards.len());
    println!("  addresses:     {}", dataset.addresses.len());
    println!("  transactions:  {}", dataset.transactions.len());
    println!("  fraud rows:    {}", dataset.fraud_count());
    Ok(())
}

fn stats(store_cfg: &StoreConfig) -> Result<()> {
    let store = SqliteGraphStore::open(store_cfg)?;
    store.verify_connectivity()?;
    print_counts(&GraphCounts::read(&store)?);

    println!();
    println!("=== LOAD HISTORY ===");
    let runs = store.load_runs()?;
    if runs.is_empty() {
        println!("  (no loads recorded)");
    }
    for run in runs {
        match run.detail {
            Some(detail) => println!("  {} | {} | {detail}", run.load_id, run.status),
            None => println!("  {} | {}", run.load_id, run.status),
        }
    }
    Ok(())
}

fn print_stage(report: &StageReport) {
    println!("=== STAGE {} ===", report.stage);
    for (table, rows) in &report.tables {
        println!("  {:<14} {rows}", table.file_name());
    }
    for note in &report.notes {
        println!("  {note}");
    }
}

fn print_load(report: &LoadReport) {
    println!("=== LOAD SUMMARY ===");
    println!("  load_id:       {}", report.load_id);
    for (label, rows) in &report.node_rows {
        println!("  {label:<12} {rows} rows");
    }
    println!("  node batches:  {}", report.node_batches);
    println!(
        "  transactions:  {} rows in {} batches",
        report.transaction_rows, report.transaction_batches
    );
    println!();
    print_counts(&report.counts);
}

fn print_counts(counts: &GraphCounts) {
    println!("=== GRAPH COUNTS ===");
    for (label, n) in &counts.nodes {
        println!("  ({label:<11}) {n}");
    }
    for (rel, n) in &counts.relationships {
        println!("  [{rel:<11}] {n}");
    }
    println!(
        "  total: {} nodes, {} relationships",
        counts.total_nodes(),
        counts.total_relationships()
    );
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

/// `default` when the flag is absent; a value that does not parse is an error.
fn parse_arg<T>(args: &[String], flag: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match flag_value(args, flag) {
        Some(raw) => match raw.parse() {
            Ok(value) => Ok(value),
            Err(e) => bail!("invalid value '{raw}' for {flag}: {e}"),
        },
        None => Ok(default),
    }
}
