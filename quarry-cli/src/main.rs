//! Quarry CLI — ingestion, curation and checkpoint inspection.
//!
//! Commands:
//! - `init` — write a starter `quarry.toml`
//! - `ingest` — fetch due instruments from Yahoo Finance into the raw layer
//! - `curate` — fold raw snapshots into the curated layer
//! - `status` — report checkpoints and snapshot counts per instrument

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use quarry_core::source::{MarketDataSource, Pacer};
use quarry_core::{CheckpointLedger, FileLedger, InstrumentKey, Layer, SystemClock};
use quarry_runner::{
    CurationEngine, CurationReport, CurationStatus, IngestMode, IngestStatus, IngestionEngine,
    PipelineConfig, StdoutProgress,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "quarry",
    about = "Quarry — incremental market-data ingestion and curation"
)]
struct Cli {
    /// Pipeline configuration file.
    #[arg(long, global = true, default_value = "quarry.toml")]
    config: PathBuf,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Fetch new bars for every due instrument and write raw snapshots.
    Ingest {
        /// Write one combined raw snapshot instead of one per instrument.
        #[arg(long, default_value_t = false)]
        batch: bool,

        /// Do not pause between source calls.
        #[arg(long, default_value_t = false)]
        no_pause: bool,
    },
    /// Fold raw snapshots into the curated layer.
    Curate {
        /// Curate only this instrument (group/instrument).
        #[arg(long)]
        instrument: Option<InstrumentKey>,

        /// Curate instruments in parallel.
        #[arg(long, default_value_t = false)]
        parallel: bool,
    },
    /// Show checkpoints and snapshot counts.
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    let ok = match cli.command {
        Commands::Init { force } => run_init(&cli.config, force)?,
        Commands::Ingest { batch, no_pause } => run_ingest(&cli.config, batch, no_pause)?,
        Commands::Curate {
            instrument,
            parallel,
        } => run_curate(&cli.config, instrument, parallel)?,
        Commands::Status => run_status(&cli.config)?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    let config = PipelineConfig::from_file(path)
        .with_context(|| format!("load configuration {}", path.display()))?;
    debug!(
        config = %path.display(),
        instruments = config.universe.instrument_count(),
        "loaded configuration"
    );
    Ok(config)
}

fn run_init(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let content = PipelineConfig::starter().to_toml()?;
    std::fs::write(path, content).with_context(|| format!("write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(true)
}

fn run_ingest(config_path: &Path, batch: bool, no_pause: bool) -> Result<bool> {
    let config = load_config(config_path)?;
    if config.universe.instrument_count() == 0 {
        bail!("universe in {} is empty", config_path.display());
    }

    let store = config.build_store();
    let source = config.build_source().context("build Yahoo Finance client")?;
    let ledger_path = config.checkpoint_path(source.name());
    let mut ledger = FileLedger::load(&ledger_path, &config.universe.keys())
        .with_context(|| format!("load checkpoints {}", ledger_path.display()))?;

    let mut options = config.ingest_options();
    if batch {
        options.mode = IngestMode::Batch;
    }
    let pacer = if no_pause {
        Pacer::disabled()
    } else {
        config.pacer()
    };

    let clock = SystemClock;
    let progress = StdoutProgress;
    let report = IngestionEngine::new(&source, store.as_ref(), &mut ledger, &clock, options)
        .with_pacer(pacer)
        .with_progress(&progress)
        .run(&config.universe)?;

    println!(
        "\n{} ingested, {} skipped, {} failed",
        report.ingested(),
        report.skipped(),
        report.failed()
    );
    if let Some(snapshot) = &report.batch_snapshot {
        println!("Batch snapshot: {snapshot}");
    }
    for outcome in &report.outcomes {
        if let IngestStatus::Failed { reason } = &outcome.status {
            eprintln!("Error for {}: {reason}", outcome.key);
        }
    }
    Ok(!report.has_failures())
}

fn run_curate(config_path: &Path, instrument: Option<InstrumentKey>, parallel: bool) -> Result<bool> {
    let config = load_config(config_path)?;
    let store = config.build_store();
    let engine = CurationEngine::new(store.as_ref(), config.curation_policy());

    if let Some(key) = instrument {
        let curated = engine
            .curate(&key)
            .with_context(|| format!("curate {key}"))?;
        match &curated.snapshot {
            Some(snapshot) if !curated.passed_through => {
                println!("{key}: {} rows -> {snapshot}", curated.records.len())
            }
            _ => println!("{key}: {} rows (unchanged)", curated.records.len()),
        }
        return Ok(true);
    }

    let report = if parallel || config.curation.parallel {
        engine.curate_all_parallel()?
    } else {
        engine.curate_all()?
    };
    print_curation(&report);
    Ok(!report.has_failures())
}

fn print_curation(report: &CurationReport) {
    for outcome in &report.outcomes {
        match &outcome.status {
            CurationStatus::Curated { rows, snapshot, .. } => match snapshot {
                Some(snapshot) => println!("  {:<24} {rows:>7} rows -> {snapshot}", outcome.key.to_string()),
                None => println!("  {:<24} {rows:>7} rows", outcome.key.to_string()),
            },
            CurationStatus::PassedThrough { rows } => {
                println!("  {:<24} {rows:>7} rows (no raw data)", outcome.key.to_string())
            }
            CurationStatus::Failed { reason } => {
                eprintln!("Error for {}: {reason}", outcome.key)
            }
        }
    }
    println!(
        "\n{} curated, {} passed through, {} failed",
        report.curated(),
        report.passed_through(),
        report.failed()
    );
}

fn run_status(config_path: &Path) -> Result<bool> {
    let config = load_config(config_path)?;
    let store = config.build_store();
    let format = config.storage.format;
    let ledger_path = config.checkpoint_path(quarry_core::source::YahooSource::NAME);
    let ledger = FileLedger::load(&ledger_path, &config.universe.keys())
        .with_context(|| format!("load checkpoints {}", ledger_path.display()))?;

    println!("Backend:     {}", store.backend());
    println!("Format:      {format}");
    println!("Checkpoints: {}", ledger_path.display());
    println!();
    println!(
        "  {:<24} {:>12} {:>6} {:>8}",
        "Instrument", "Checkpoint", "Raw", "Curated"
    );

    for (key, checkpoint) in ledger.entries() {
        let raw = store.list_snapshots(Layer::Raw, &key, format)?.len();
        let curated = store.list_snapshots(Layer::Curated, &key, format)?.len();
        let date = checkpoint
            .date()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<24} {date:>12} {raw:>6} {curated:>8}", key.to_string());
    }
    Ok(true)
}
