use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::Parser;

use powerscore::config::EngineConfig;
use powerscore::game::TeamId;
use powerscore::input::load_input;
use powerscore::logging::init_logging;
use powerscore::prepare::prepare_games;
use powerscore::residual_model::{
    BoostingParams, FeatureSource, save_artifact, train_model, training_samples,
};
use powerscore::snapshot::SnapshotStore;

/// Offline training of the expected-margin model from a published snapshot.
#[derive(Debug, Parser)]
#[command(name = "fit_residual_model")]
struct Args {
    #[arg(long, env = "POWERSCORE_INPUT")]
    input: PathBuf,

    #[arg(long, env = "POWERSCORE_STORE", default_value = "powerscore_snapshots.sqlite")]
    store: PathBuf,

    /// Snapshot providing team ratings; defaults to the current one.
    #[arg(long)]
    snapshot: Option<i64>,

    #[arg(long, env = "POWERSCORE_MODEL", default_value = "residual_model.json")]
    out: PathBuf,

    #[arg(long, env = "POWERSCORE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 150)]
    rounds: usize,

    #[arg(long, default_value_t = 0.05)]
    learning_rate: f64,

    #[arg(long, default_value_t = 3)]
    max_depth: usize,

    #[arg(long, default_value_t = 7)]
    seed: u64,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let cfg = EngineConfig::load(args.config.as_deref()).context("load engine config")?;

    let store = SnapshotStore::open(&args.store)
        .with_context(|| format!("open snapshot store {}", args.store.display()))?;
    let snapshot = match args.snapshot {
        Some(id) => store.load(id).with_context(|| format!("load snapshot {id}"))?,
        None => store
            .current()
            .context("load current snapshot")?
            .ok_or_else(|| anyhow!("no published snapshot in {}", args.store.display()))?,
    };
    let as_of = snapshot.meta.as_of;

    let sources: BTreeMap<TeamId, FeatureSource> = snapshot
        .teams
        .iter()
        .map(|t| {
            (
                t.team_id.clone(),
                FeatureSource {
                    power_score: t.power_score,
                    sos: t.sos,
                    cohort: t.cohort,
                },
            )
        })
        .collect();

    let input = load_input(&args.input)?;
    let prepared = prepare_games(&input, as_of, snapshot.meta.lookback_days);
    let samples = training_samples(&sources, &prepared.histories, as_of, cfg.rating.max_goal_diff);
    println!("Training samples: {}", samples.len());

    let params = BoostingParams {
        rounds: args.rounds,
        learning_rate: args.learning_rate,
        max_depth: args.max_depth,
        seed: args.seed,
        ..BoostingParams::default()
    };
    let artifact = train_model(&samples, &params, &Utc::now().to_rfc3339())
        .context("train residual model")?;
    save_artifact(&artifact, &args.out)
        .with_context(|| format!("write model artifact {}", args.out.display()))?;

    let m = &artifact.metrics;
    println!("Trees: {}", artifact.trees.len());
    println!(
        "RMSE train={:.3} val={:.3} baseline={:.3} (train={} val={})",
        m.train_rmse, m.val_rmse, m.baseline_val_rmse, m.train_samples, m.val_samples
    );
    println!("Wrote {}", args.out.display());
    Ok(())
}
