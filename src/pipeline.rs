//! One batch run: input rows in, a sealed [`Snapshot`] out.
//!
//! Stages run strictly in order and each consumes only the previous stage's
//! output. Cancellation is honoured between stages and between SOS passes;
//! a cancelled run returns an error and produces nothing.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, info_span};

use crate::adjust::GameAdjustments;
use crate::cancel::CancelFlag;
use crate::composite::build_scores;
use crate::config::{EngineConfig, NormalizationMode};
use crate::error::{EngineError, Result};
use crate::game::TeamId;
use crate::league::League;
use crate::momentum::{compute_momentum, game_residuals};
use crate::prepare::{EngineInput, prepare_games};
use crate::ranking::{RankCandidate, assign_ranks};
use crate::ratings::estimate_ratings;
use crate::residual_model::{FeatureSource, ModelAvailability};
use crate::snapshot::{ModelStatus, Snapshot, SnapshotCounts, SnapshotMeta, TeamRating};
use crate::sos::{NEUTRAL_STRENGTH, compute_sos};

fn build_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|err| EngineError::ThreadPool(err.to_string()))
}

/// Run every stage inside a dedicated pool sized by `cfg.parallelism`.
pub fn run_pipeline(
    input: &EngineInput,
    model: &ModelAvailability,
    cfg: &EngineConfig,
    as_of: NaiveDate,
    cancel: &CancelFlag,
) -> Result<Snapshot> {
    cfg.validate()?;
    let pool = build_pool(cfg.parallelism)?;
    pool.install(|| run_stages(input, model, cfg, as_of, cancel))
}

fn run_stages(
    input: &EngineInput,
    model: &ModelAvailability,
    cfg: &EngineConfig,
    as_of: NaiveDate,
    cancel: &CancelFlag,
) -> Result<Snapshot> {
    let _span = info_span!("run", %as_of, lookback_days = cfg.lookback_days).entered();
    let max_goal_diff = cfg.rating.max_goal_diff;

    let prepared = prepare_games(input, as_of, cfg.lookback_days);
    cancel.check("prepare")?;

    let adjustments = GameAdjustments::from_config(&cfg.adjustments);
    let league = League::build(&prepared, as_of, cfg, &adjustments);
    cancel.check("weighting")?;

    let ratings = estimate_ratings(&league, &cfg.rating, &cfg.composite);
    cancel.check("ratings")?;

    let sos = compute_sos(&league, &ratings, &cfg.sos, cancel)?;
    cancel.check("sos")?;
    let percentile_cohorts = sos
        .cohort_modes
        .values()
        .filter(|m| **m == NormalizationMode::Percentile)
        .count();
    debug!(
        rating_passes = ratings.passes,
        sos_passes = sos.passes,
        percentile_cohorts,
        "strength stages done"
    );

    let scores = build_scores(&league, &ratings, &sos.sos, &cfg.composite, &cfg.provisional);
    cancel.check("composite")?;

    let sources: BTreeMap<TeamId, FeatureSource> = league
        .schedules
        .iter()
        .filter_map(|(id, schedule)| {
            let score = scores.get(id)?;
            Some((
                id.clone(),
                FeatureSource {
                    power_score: score.power_score,
                    sos: sos.sos.get(id).copied().unwrap_or(NEUTRAL_STRENGTH),
                    cohort: schedule.team.cohort,
                },
            ))
        })
        .collect();
    let residuals = game_residuals(&league, &sources, model.model(), max_goal_diff);
    let momentum = compute_momentum(&league, &residuals, &cfg.momentum, max_goal_diff);
    let model_status = match model {
        ModelAvailability::Ready(m) => ModelStatus::Applied {
            version: m.version_tag(),
        },
        ModelAvailability::Unavailable(reason) => ModelStatus::Unavailable {
            reason: reason.clone(),
        },
    };
    cancel.check("residuals")?;

    let candidates: Vec<RankCandidate> = league
        .schedules
        .iter()
        .filter_map(|(id, schedule)| {
            let score = scores.get(id)?;
            Some(RankCandidate {
                team_id: id.clone(),
                cohort: schedule.team.cohort,
                state: schedule.team.state.clone(),
                power_score: score.power_score,
                games_played: schedule.games_played(),
            })
        })
        .collect();
    let ranks = assign_ranks(&candidates, cfg.ranking.min_games);

    let mut teams: Vec<TeamRating> = Vec::with_capacity(league.schedules.len());
    for (id, schedule) in &league.schedules {
        let (Some(score), Some(rating)) = (scores.get(id), ratings.ratings.get(id)) else {
            continue;
        };
        let record = schedule.record();
        let rank = ranks.get(id).copied().unwrap_or_default();
        teams.push(TeamRating {
            team_id: id.clone(),
            cohort: schedule.team.cohort,
            state: schedule.team.state.clone(),
            games_played: schedule.games_played(),
            wins: record.wins,
            losses: record.losses,
            draws: record.draws,
            win_percentage: record.win_percentage(),
            goals_for: record.goals_for,
            goals_against: record.goals_against,
            offense_rating: rating.offense,
            defense_rating: rating.defense,
            abs_strength: sos.abs_strength.get(id).copied().unwrap_or(NEUTRAL_STRENGTH),
            sos: sos.sos.get(id).copied().unwrap_or(NEUTRAL_STRENGTH),
            sos_provisional: sos.provisional.contains(id),
            power_score: score.power_score,
            provisional_multiplier: score.provisional_multiplier,
            national_rank: rank.national,
            state_rank: rank.state,
            momentum_score: momentum.get(id).copied(),
        });
    }
    teams.sort_by(|a, b| {
        a.cohort
            .cmp(&b.cohort)
            .then(
                a.national_rank
                    .unwrap_or(u32::MAX)
                    .cmp(&b.national_rank.unwrap_or(u32::MAX)),
            )
            .then(a.team_id.cmp(&b.team_id))
    });

    let residual_rows: Vec<_> = residuals.into_values().flatten().collect();
    let counts = SnapshotCounts {
        teams: teams.len(),
        ranked: teams.iter().filter(|t| t.national_rank.is_some()).count(),
        excluded: league.excluded.len(),
        games: residual_rows.len(),
        quarantined: prepared.quarantined.len(),
        residuals_scored: residual_rows.iter().filter(|r| r.residual.is_some()).count(),
    };
    info!(
        teams = counts.teams,
        ranked = counts.ranked,
        excluded = counts.excluded,
        quarantined = counts.quarantined,
        residuals = counts.residuals_scored,
        model_applied = model_status.is_applied(),
        "run complete"
    );

    Snapshot {
        meta: SnapshotMeta {
            calculated_at: Utc::now(),
            as_of,
            lookback_days: cfg.lookback_days,
            config_fingerprint: cfg.fingerprint(),
            content_fingerprint: String::new(),
            model_status,
            counts,
        },
        teams,
        residuals: residual_rows,
        quarantined: prepared.quarantined,
        excluded: league.excluded.clone(),
    }
    .seal()
}
