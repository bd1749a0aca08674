use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use tracing::info;

use powerscore::cancel::CancelFlag;
use powerscore::config::EngineConfig;
use powerscore::input::load_input;
use powerscore::logging::init_logging;
use powerscore::pipeline::run_pipeline;
use powerscore::residual_model::load_for_run;
use powerscore::snapshot::SnapshotStore;

/// Compute a full ratings snapshot and publish it as current.
#[derive(Debug, Parser)]
#[command(name = "powerscore", version)]
struct Args {
    /// Input games/teams, either a SQLite db or a .json file.
    #[arg(long, env = "POWERSCORE_INPUT")]
    input: PathBuf,

    /// Snapshot store (SQLite). Created if missing.
    #[arg(long, env = "POWERSCORE_STORE", default_value = "powerscore_snapshots.sqlite")]
    store: PathBuf,

    /// Residual model artifact. The residual layer is skipped when absent.
    #[arg(long, env = "POWERSCORE_MODEL")]
    model: Option<PathBuf>,

    /// JSON config overriding the defaults.
    #[arg(long, env = "POWERSCORE_CONFIG")]
    config: Option<PathBuf>,

    /// Reference date for the lookback window (defaults to today, UTC).
    #[arg(long)]
    as_of: Option<NaiveDate>,

    /// Compute and print the summary without publishing.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let cfg = EngineConfig::load(args.config.as_deref()).context("load engine config")?;
    let as_of = args.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let input = load_input(&args.input)?;
    let model = load_for_run(args.model.as_deref());

    let snapshot = run_pipeline(&input, &model, &cfg, as_of, &CancelFlag::new())
        .context("rating run failed; current snapshot left unchanged")?;

    let counts = snapshot.meta.counts;
    println!("PowerScore run as of {as_of}");
    println!(
        "Teams: {} rated, {} ranked, {} excluded",
        counts.teams, counts.ranked, counts.excluded
    );
    println!(
        "Games: {} perspectives, {} quarantined, {} residuals",
        counts.games, counts.quarantined, counts.residuals_scored
    );
    println!("Fingerprint: {}", snapshot.meta.content_fingerprint);

    if args.dry_run {
        info!("dry run; snapshot not published");
        return Ok(());
    }

    let mut store = SnapshotStore::open(&args.store)
        .with_context(|| format!("open snapshot store {}", args.store.display()))?;
    let id = store.publish(&snapshot).context("publish snapshot")?;
    println!("Published snapshot {id} to {}", args.store.display());
    Ok(())
}
