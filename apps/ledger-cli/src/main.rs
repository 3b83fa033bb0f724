mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use ledger_common::{Snapshot, normalize_json};
use ledger_kernel::Timestamp;
use ledger_persist::{FileStorage, Ledger, Storage};
use ledger_source::{Source, sync};
use ledger_tools::LedgerInspector;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ledger", about = "Track keyed record sets and restore them to any past instant")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML config naming the store and its sources
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store directory, overriding the config
    #[arg(short, long)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version, store location and known labels
    Info,
    /// Record a JSON snapshot as the new state of a label
    Update {
        label: String,
        /// JSON object of record ID to string or object of strings
        input: PathBuf,
    },
    /// Print the state of a label just before a point in time
    Restore {
        label: String,
        /// RFC 3339 timestamp
        #[arg(short, long)]
        at: Timestamp,
        /// Also store the result as the label's archive table
        #[arg(long)]
        archive: bool,
    },
    /// List recorded changes, oldest first
    Changes {
        label: String,
        /// Only changes at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<Timestamp>,
    },
    /// Show every change that touched one record
    History { label: String, record: String },
    /// Summarize a label: sizes, history span, inferred field types
    Inspect { label: String },
    /// Check table hashes and the changelog hash chain
    Verify {
        /// Labels to check; all labels when empty
        labels: Vec<String>,
    },
    /// Pull every configured source once
    Sync {
        /// Only sync this label
        #[arg(short, long)]
        label: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let store_dir = config.store_dir(cli.store.as_deref());
    let storage = FileStorage::open(&store_dir)
        .with_context(|| format!("opening store at {}", store_dir.display()))?;
    let mut ledger = Ledger::new(storage);

    match cli.command {
        Commands::Info => {
            println!("ledger v{}", env!("CARGO_PKG_VERSION"));
            println!("store: {}", store_dir.display());
            let labels = ledger.storage().labels()?;
            if labels.is_empty() {
                println!("labels: none");
            }
            for label in labels {
                let meta = ledger.storage().meta(&label)?;
                println!(
                    "label {label}: schema=v{} generation={} change_segments={}",
                    meta.schema_version,
                    meta.generation,
                    meta.changes.entries.len()
                );
            }
            println!("sources configured: {}", config.sources.len());
        }
        Commands::Update { label, input } => {
            let incoming = read_snapshot(&input)?;
            let report = ledger.update(&label, &incoming)?;
            if report.changed() {
                println!("{label}: {} at {}", report.stats, report.timestamp);
            } else {
                println!("{label}: unchanged");
            }
        }
        Commands::Restore { label, at, archive } => {
            let snapshot = if archive {
                ledger.restore_into_archive(&label, at)?
            } else {
                ledger.restore(&label, at)?
            };
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Changes { label, since } => {
            for change in ledger.changes(&label)? {
                if since.is_some_and(|since| change.timestamp() < since) {
                    continue;
                }
                println!("{change}");
            }
        }
        Commands::History { label, record } => {
            print!("{}", LedgerInspector::history(&ledger, &label, &record)?);
        }
        Commands::Inspect { label } => {
            print!("{}", LedgerInspector::summary(&ledger, &label)?);
        }
        Commands::Verify { labels } => {
            let labels = if labels.is_empty() {
                ledger.storage().labels()?
            } else {
                labels
            };
            let mut failed = 0;
            for label in &labels {
                match ledger.storage().verify_integrity(label) {
                    Ok(()) => println!("{label}: OK"),
                    Err(e) => {
                        println!("{label}: FAILED ({e})");
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} labels failed verification", labels.len());
            }
        }
        Commands::Sync { label } => {
            let sources = config.json_sources();
            if sources.is_empty() {
                anyhow::bail!("no sources configured; pass --config");
            }
            for source in sources
                .iter()
                .filter(|s| label.as_deref().is_none_or(|l| s.label() == l))
            {
                let report = sync(source, &mut ledger)?;
                println!(
                    "{}: {} records, {} at {}",
                    report.label, report.records, report.stats, report.timestamp
                );
            }
        }
    }

    Ok(())
}

fn read_snapshot(path: &Path) -> anyhow::Result<Snapshot> {
    let file = std::fs::File::open(path).with_context(|| format!("reading {}", path.display()))?;
    let raw: serde_json::Value = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(normalize_json(&raw)?)
}
