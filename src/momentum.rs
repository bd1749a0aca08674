use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::MomentumConfig;
use crate::game::{CohortKey, TeamId};
use crate::league::League;
use crate::residual_model::{FeatureSource, GameFeatures, ResidualModel};

/// Per-game-perspective residual row. `predicted_margin` and `residual` stay
/// `None` when no model was applied or the opponent has no rating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameResidual {
    pub game_id: String,
    pub team_id: TeamId,
    pub opponent_id: TeamId,
    pub date: NaiveDate,
    pub actual_margin: i64,
    pub predicted_margin: Option<f64>,
    pub residual: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceClass {
    Over,
    Under,
    Neutral,
}

pub fn classify(residual: f64, threshold: f64) -> PerformanceClass {
    if residual >= threshold {
        PerformanceClass::Over
    } else if residual <= -threshold {
        PerformanceClass::Under
    } else {
        PerformanceClass::Neutral
    }
}

/// Over/under threshold for a cohort, proportional to its typical margin so
/// low-scoring age groups are not suppressed by a fixed goal count.
pub fn momentum_threshold(cohort_mean_abs_margin: f64, cfg: &MomentumConfig) -> f64 {
    (cfg.threshold_fraction * cohort_mean_abs_margin).max(cfg.min_threshold)
}

/// 0..=100 score centred at 50 from the newest `window` residuals.
pub fn momentum_score(
    residuals_newest_first: &[f64],
    threshold: f64,
    cfg: &MomentumConfig,
) -> Option<f64> {
    if residuals_newest_first.is_empty() || cfg.points_cap == 0 {
        return None;
    }
    let cap = cfg.points_cap as i64;
    let points: i64 = residuals_newest_first
        .iter()
        .take(cfg.window)
        .map(|r| match classify(*r, threshold) {
            PerformanceClass::Over => 1,
            PerformanceClass::Under => -1,
            PerformanceClass::Neutral => 0,
        })
        .sum::<i64>()
        .clamp(-cap, cap);
    Some(50.0 + 50.0 * points as f64 / cap as f64)
}

/// Score every game perspective in the league. Histories are newest first, so
/// each team's residual list is too.
pub fn game_residuals(
    league: &League,
    sources: &BTreeMap<TeamId, FeatureSource>,
    model: Option<&ResidualModel>,
    max_goal_diff: u32,
) -> BTreeMap<TeamId, Vec<GameResidual>> {
    league
        .schedules
        .par_iter()
        .map(|(id, schedule)| {
            let team = sources.get(id);
            let rows = schedule
                .games
                .iter()
                .map(|wg| {
                    let g = &wg.game;
                    let predicted = match (model, team, sources.get(&g.opponent_id)) {
                        (Some(m), Some(t), Some(o)) => {
                            Some(m.predict(&GameFeatures::build(t, o, g.date, league.as_of)))
                        }
                        _ => None,
                    };
                    GameResidual {
                        game_id: g.game_id.clone(),
                        team_id: g.team_id.clone(),
                        opponent_id: g.opponent_id.clone(),
                        date: g.date,
                        actual_margin: g.margin(),
                        predicted_margin: predicted,
                        residual: predicted.map(|p| g.clipped_margin(max_goal_diff) - p),
                    }
                })
                .collect::<Vec<_>>();
            (id.clone(), rows)
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect()
}

/// Momentum per team. Teams with no scored residuals are left out, so callers
/// report the field as absent rather than neutral.
pub fn compute_momentum(
    league: &League,
    residuals: &BTreeMap<TeamId, Vec<GameResidual>>,
    cfg: &MomentumConfig,
    max_goal_diff: u32,
) -> BTreeMap<TeamId, f64> {
    let thresholds: BTreeMap<CohortKey, f64> = league
        .cohorts
        .keys()
        .map(|c| (*c, momentum_threshold(league.mean_abs_margin(c, max_goal_diff), cfg)))
        .collect();

    let mut out = BTreeMap::new();
    for (id, rows) in residuals {
        let Some(cohort) = league.cohort_of(id) else {
            continue;
        };
        let scored: Vec<f64> = rows.iter().filter_map(|r| r.residual).collect();
        let threshold = thresholds
            .get(&cohort)
            .copied()
            .unwrap_or(cfg.min_threshold);
        if let Some(score) = momentum_score(&scored, threshold, cfg) {
            out.insert(id.clone(), score);
        }
    }
    out
}
