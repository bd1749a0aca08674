use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::debug;

use crate::config::{CompositeConfig, RatingConfig};
use crate::game::{CohortKey, TeamId};
use crate::league::{League, TeamSchedule};

/// Floor for a cohort's goals-per-game anchor.
const MIN_ANCHOR: f64 = 0.25;
/// Opponent ratings below this share of their anchor are treated as this share.
const MIN_RATE_FRACTION: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffDef {
    /// Expected goals scored per game.
    pub offense: f64,
    /// Expected goals conceded per game.
    pub defense: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RatingTable {
    pub ratings: BTreeMap<TeamId, OffDef>,
    /// Goals per team-game baseline per cohort.
    pub anchors: BTreeMap<CohortKey, f64>,
    /// Refinement passes actually run.
    pub passes: usize,
}

impl RatingTable {
    pub fn anchor_for(&self, cohort: &CohortKey) -> f64 {
        self.anchors.get(cohort).copied().unwrap_or(1.0)
    }
}

/// Scoring baseline per cohort: a configured override for the age group, or
/// the recency-weighted mean of goals scored per game.
pub fn cohort_anchors(league: &League, cfg: &CompositeConfig) -> BTreeMap<CohortKey, f64> {
    let mut out = BTreeMap::new();
    for (cohort, ids) in &league.cohorts {
        if let Some(fixed) = cfg.anchor_override(cohort.age_group) {
            out.insert(*cohort, fixed);
            continue;
        }
        let mut num = 0.0;
        let mut den = 0.0;
        for id in ids {
            for wg in &league.schedules[id].games {
                num += wg.weight * wg.goals_for;
                den += wg.weight;
            }
        }
        let baseline = if den > 0.0 { num / den } else { 0.0 };
        out.insert(*cohort, baseline.max(MIN_ANCHOR));
    }
    out
}

fn clip_rating(value: f64, anchor: f64, cfg: &RatingConfig) -> f64 {
    value.clamp(0.0, cfg.clip_multiple * anchor)
}

/// Recency-weighted goals for/against, clipped against the cohort anchor.
pub fn raw_rating(schedule: &TeamSchedule, anchor: f64, cfg: &RatingConfig) -> OffDef {
    let mut gf = 0.0;
    let mut ga = 0.0;
    let mut w = 0.0;
    for wg in &schedule.games {
        gf += wg.weight * wg.goals_for;
        ga += wg.weight * wg.goals_against;
        w += wg.weight;
    }
    if w <= 0.0 {
        return OffDef {
            offense: anchor,
            defense: anchor,
        };
    }
    OffDef {
        offense: clip_rating(gf / w, anchor, cfg),
        defense: clip_rating(ga / w, anchor, cfg),
    }
}

/// One opponent-adjustment pass for a single team, reading only `prev`.
///
/// Goals scored are scaled by how stingy the opponent is relative to its own
/// cohort baseline; goals conceded by how potent the opponent's attack is.
pub fn adjusted_rating(
    schedule: &TeamSchedule,
    league: &League,
    anchors: &BTreeMap<CohortKey, f64>,
    prev: &BTreeMap<TeamId, OffDef>,
    cfg: &RatingConfig,
) -> OffDef {
    let own_anchor = anchors.get(&schedule.team.cohort).copied().unwrap_or(1.0);
    let max_f = cfg.max_adjust_factor;
    let min_f = 1.0 / max_f;

    let mut gf = 0.0;
    let mut ga = 0.0;
    let mut w = 0.0;
    for wg in &schedule.games {
        let (f_off, f_def) = match (
            prev.get(&wg.game.opponent_id),
            league.cohort_of(&wg.game.opponent_id),
        ) {
            (Some(opp), Some(opp_cohort)) => {
                let opp_anchor = anchors.get(&opp_cohort).copied().unwrap_or(own_anchor);
                let floor = MIN_RATE_FRACTION * opp_anchor;
                let f_off = (opp_anchor / opp.defense.max(floor)).clamp(min_f, max_f);
                let f_def = (opp_anchor / opp.offense.max(floor)).clamp(min_f, max_f);
                (f_off, f_def)
            }
            _ => (1.0, 1.0),
        };
        gf += wg.weight * wg.goals_for * f_off;
        ga += wg.weight * wg.goals_against * f_def;
        w += wg.weight;
    }
    if w <= 0.0 {
        return prev.get(&schedule.team.team_id).copied().unwrap_or(OffDef {
            offense: own_anchor,
            defense: own_anchor,
        });
    }
    OffDef {
        offense: clip_rating(gf / w, own_anchor, cfg),
        defense: clip_rating(ga / w, own_anchor, cfg),
    }
}

fn max_change(a: &BTreeMap<TeamId, OffDef>, b: &BTreeMap<TeamId, OffDef>) -> f64 {
    a.iter()
        .filter_map(|(id, x)| {
            b.get(id)
                .map(|y| (x.offense - y.offense).abs().max((x.defense - y.defense).abs()))
        })
        .fold(0.0, f64::max)
}

/// Raw ratings followed by a small fixed number of opponent-adjustment passes.
///
/// Each pass reads the previous pass's table and builds a fresh one; the loop
/// stops early once no rating moves by more than `adjust_tolerance`.
pub fn estimate_ratings(
    league: &League,
    rating_cfg: &RatingConfig,
    composite_cfg: &CompositeConfig,
) -> RatingTable {
    let anchors = cohort_anchors(league, composite_cfg);
    let ids = league.team_ids();

    let mut current: BTreeMap<TeamId, OffDef> = ids
        .par_iter()
        .map(|id| {
            let schedule = &league.schedules[id];
            let anchor = anchors.get(&schedule.team.cohort).copied().unwrap_or(1.0);
            (id.clone(), raw_rating(schedule, anchor, rating_cfg))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect();

    let mut passes = 0usize;
    for pass in 0..rating_cfg.adjust_iterations {
        let next: BTreeMap<TeamId, OffDef> = ids
            .par_iter()
            .map(|id| {
                let schedule = &league.schedules[id];
                (
                    id.clone(),
                    adjusted_rating(schedule, league, &anchors, &current, rating_cfg),
                )
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect();
        let delta = max_change(&current, &next);
        current = next;
        passes = pass + 1;
        debug!(pass = passes, delta, "opponent adjustment pass");
        if delta < rating_cfg.adjust_tolerance {
            break;
        }
    }

    RatingTable {
        ratings: current,
        anchors,
        passes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjust::GameAdjustments;
    use crate::config::EngineConfig;
    use crate::game::{RawGameRecord, RawTeamRecord};
    use crate::prepare::{EngineInput, prepare_games};
    use chrono::NaiveDate;

    fn rec(id: usize, a: &str, b: &str, gf: i64, ga: i64) -> RawGameRecord {
        RawGameRecord {
            game_id: format!("g{id}"),
            team_id: a.into(),
            opponent_id: b.into(),
            age_group: Some("U12".into()),
            gender: Some("M".into()),
            goals_for: gf,
            goals_against: ga,
            date: format!("2025-05-{:02}", 1 + id % 28),
            venue: None,
            forfeit: false,
            neutral_site: false,
        }
    }

    fn league_from(games: Vec<RawGameRecord>) -> (League, EngineConfig) {
        let cfg = EngineConfig::default();
        let as_of = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let input = EngineInput {
            games,
            teams: Vec::<RawTeamRecord>::new(),
        };
        let prepared = prepare_games(&input, as_of, cfg.lookback_days);
        let league = League::build(&prepared, as_of, &cfg, &GameAdjustments::default());
        (league, cfg)
    }

    #[test]
    fn scoring_against_stingy_defense_counts_more() {
        // "wall" concedes little; "sieve" concedes a lot. "x" and "y" both score 2
        // per game, x against wall, y against sieve.
        let mut games = Vec::new();
        let mut id = 0;
        for _ in 0..4 {
            games.push(rec(id, "x", "wall", 2, 1));
            id += 1;
            games.push(rec(id, "y", "sieve", 2, 1));
            id += 1;
            games.push(rec(id, "wall", "z", 1, 0));
            id += 1;
            games.push(rec(id, "sieve", "z", 2, 6));
            id += 1;
        }
        let (league, cfg) = league_from(games);
        let table = estimate_ratings(&league, &cfg.rating, &cfg.composite);
        let x = table.ratings["x"];
        let y = table.ratings["y"];
        assert!(x.offense > y.offense, "x={x:?} y={y:?}");
        assert!(table.passes >= 1 && table.passes <= cfg.rating.adjust_iterations);
    }

    #[test]
    fn ratings_stay_within_clip_bounds() {
        let mut games = Vec::new();
        for id in 0..10 {
            games.push(rec(id, "bully", "victim", 30, 0));
        }
        let (league, cfg) = league_from(games);
        let table = estimate_ratings(&league, &cfg.rating, &cfg.composite);
        for (id, r) in &table.ratings {
            let anchor = table.anchor_for(&league.schedules[id].team.cohort);
            assert!(r.offense >= 0.0 && r.offense <= cfg.rating.clip_multiple * anchor);
            assert!(r.defense >= 0.0 && r.defense <= cfg.rating.clip_multiple * anchor);
        }
    }

    #[test]
    fn anchor_override_wins_over_observed_baseline() {
        let (league, mut cfg) = league_from(vec![rec(0, "a", "b", 5, 5)]);
        let observed = cohort_anchors(&league, &cfg.composite);
        assert!((observed.values().next().copied().unwrap() - 5.0).abs() < 1e-9);
        cfg.composite.anchor_overrides.insert("U12".into(), 2.5);
        let fixed = cohort_anchors(&league, &cfg.composite);
        assert_eq!(fixed.values().next().copied(), Some(2.5));
    }

    #[test]
    fn lowercase_anchor_override_still_applies() {
        let (league, mut cfg) = league_from(vec![rec(0, "a", "b", 1, 2)]);
        cfg.composite.anchor_overrides.insert("u12".into(), 9.0);
        assert!(cfg.validate().is_ok());
        let anchors = cohort_anchors(&league, &cfg.composite);
        assert_eq!(anchors.values().next().copied(), Some(9.0));
    }
}
