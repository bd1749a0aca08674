use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;

use powerscore::game::{AgeGroup, CohortKey, Gender};
use powerscore::logging::init_logging;
use powerscore::snapshot::SnapshotStore;

/// Print the current snapshot's rankings for one cohort.
#[derive(Debug, Parser)]
#[command(name = "show_rankings")]
struct Args {
    #[arg(long, env = "POWERSCORE_STORE", default_value = "powerscore_snapshots.sqlite")]
    store: PathBuf,

    /// Age group, e.g. U14.
    #[arg(long)]
    age: Option<String>,

    /// M or F.
    #[arg(long)]
    gender: Option<String>,

    /// Restrict to one state and show state ranks.
    #[arg(long)]
    state: Option<String>,

    #[arg(long, default_value_t = 25)]
    limit: usize,

    /// List snapshot history instead.
    #[arg(long)]
    history: bool,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let store = SnapshotStore::open(&args.store)
        .with_context(|| format!("open snapshot store {}", args.store.display()))?;

    if args.history {
        for h in store.history().context("load snapshot history")? {
            println!(
                "{}{:>5}  {}  as_of={}  teams={}  {}",
                if h.is_current { "*" } else { " " },
                h.snapshot_id,
                h.meta.calculated_at.to_rfc3339(),
                h.meta.as_of,
                h.meta.counts.teams,
                &h.meta.content_fingerprint[..12.min(h.meta.content_fingerprint.len())]
            );
        }
        return Ok(());
    }

    let age = args.age.as_deref().context("--age is required")?;
    let gender = args.gender.as_deref().context("--gender is required")?;
    let cohort = CohortKey {
        age_group: AgeGroup::parse(age).ok_or_else(|| anyhow!("bad age group {age}"))?,
        gender: Gender::parse(gender).ok_or_else(|| anyhow!("bad gender {gender}"))?,
    };
    let state = args.state.as_deref().map(|s| s.trim().to_ascii_uppercase());
    let snapshot = store
        .current()
        .context("load current snapshot")?
        .ok_or_else(|| anyhow!("no published snapshot"))?;

    let mut rows: Vec<_> = snapshot
        .cohort(&cohort)
        .filter(|t| state.is_none() || t.state == state)
        .filter(|t| {
            if state.is_some() {
                t.state_rank.is_some()
            } else {
                t.national_rank.is_some()
            }
        })
        .collect();
    rows.sort_by_key(|t| {
        (
            if state.is_some() { t.state_rank } else { t.national_rank },
            t.team_id.clone(),
        )
    });

    println!(
        "{cohort}{} as of {} ({} ranked)",
        state.as_deref().map(|s| format!(" {s}")).unwrap_or_default(),
        snapshot.meta.as_of,
        rows.len()
    );
    println!(
        "{:>4}  {:<24} {:>7} {:>6} {:>6} {:>6} {:>5} {:>8}",
        "rank", "team", "power", "off", "def", "sos", "gp", "momentum"
    );
    for t in rows.into_iter().take(args.limit) {
        let rank = if state.is_some() { t.state_rank } else { t.national_rank };
        println!(
            "{:>4}  {:<24} {:>7.4} {:>6.2} {:>6.2} {:>6.3} {:>5} {:>8}",
            rank.map(|r| r.to_string()).unwrap_or_default(),
            t.team_id,
            t.power_score,
            t.offense_rating,
            t.defense_rating,
            t.sos,
            t.games_played,
            t.momentum_score
                .map(|m| format!("{m:.0}"))
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}
