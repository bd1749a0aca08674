//! Strength of schedule with anti-gaming dampers.
//!
//! Propagation works on immutable generations: pass N+1 reads only pass N's
//! strength table. Connectivity damping and the isolation cap are applied
//! inside every pass, and the next pass's strength is always re-derived from
//! the seed, so those corrections never wash out over iterations.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cancel::CancelFlag;
use crate::config::{NormalizationMode, SosConfig};
use crate::error::Result;
use crate::game::{CohortKey, TeamId};
use crate::league::{League, TeamSchedule};
use crate::normalize::{logistic, percentile_unit, zscore_unit};
use crate::ratings::RatingTable;

/// Strength assigned to opponents the run cannot rate.
pub const NEUTRAL_STRENGTH: f64 = 0.5;

/// Gap kept between capped isolated teams and the connected teams' mean.
const ISOLATION_MARGIN: f64 = 1e-3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Connectivity {
    /// Distinct rated opponents.
    pub unique_opponents: usize,
    /// Distinct rated opponents from outside the team's home state.
    pub out_of_state_opponents: usize,
    /// Games against opponents the run could not rate.
    pub unresolved_games: usize,
}

impl Connectivity {
    pub fn is_isolated(&self, cfg: &SosConfig) -> bool {
        self.unique_opponents < cfg.isolation_min_opponents
    }

    pub fn has_resolvable_opponents(&self) -> bool {
        self.unique_opponents > 0
    }
}

/// One propagation generation.
#[derive(Debug, Clone)]
pub struct StrengthGeneration {
    pub pass: usize,
    pub strength: BTreeMap<TeamId, f64>,
}

#[derive(Debug, Clone, Default)]
pub struct SosResult {
    /// Continuous seed strength from OFF/DEF, never bucketed.
    pub abs_strength: BTreeMap<TeamId, f64>,
    /// Last pass's damped SOS, before cohort normalization.
    pub raw_sos: BTreeMap<TeamId, f64>,
    /// Final cohort-normalized SOS in [0, 1].
    pub sos: BTreeMap<TeamId, f64>,
    pub connectivity: BTreeMap<TeamId, Connectivity>,
    /// Teams with no rated opponents; they carry the neutral SOS.
    pub provisional: BTreeSet<TeamId>,
    pub cohort_modes: BTreeMap<CohortKey, NormalizationMode>,
    pub passes: usize,
}

/// `logistic(steepness * (offense - defense) / anchor)`.
pub fn seed_strength(
    league: &League,
    ratings: &RatingTable,
    cfg: &SosConfig,
) -> BTreeMap<TeamId, f64> {
    league
        .schedules
        .iter()
        .filter_map(|(id, schedule)| {
            let r = ratings.ratings.get(id)?;
            let anchor = ratings.anchor_for(&schedule.team.cohort);
            let x = cfg.strength_steepness * (r.offense - r.defense) / anchor;
            Some((id.clone(), logistic(x)))
        })
        .collect()
}

pub fn team_connectivity(schedule: &TeamSchedule, league: &League) -> Connectivity {
    let mut opponents: BTreeSet<&str> = BTreeSet::new();
    let mut unresolved_games = 0usize;
    for wg in &schedule.games {
        if league.schedules.contains_key(&wg.game.opponent_id) {
            opponents.insert(wg.game.opponent_id.as_str());
        } else {
            unresolved_games += 1;
        }
    }

    let opponent_states: Vec<Option<&str>> = opponents
        .iter()
        .map(|id| league.schedules[*id].team.state.as_deref())
        .collect();
    let home_state = schedule
        .team
        .state
        .as_deref()
        .or_else(|| most_common_state(&opponent_states));
    let out_of_state_opponents = match home_state {
        Some(home) => opponent_states
            .iter()
            .filter(|s| matches!(s, Some(st) if *st != home))
            .count(),
        None => 0,
    };

    Connectivity {
        unique_opponents: opponents.len(),
        out_of_state_opponents,
        unresolved_games,
    }
}

fn most_common_state<'a>(states: &[Option<&'a str>]) -> Option<&'a str> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for s in states.iter().flatten() {
        *counts.entry(*s).or_default() += 1;
    }
    // BTreeMap order makes the lexicographically smallest state win ties.
    let mut best: Option<(&str, usize)> = None;
    for (state, n) in counts {
        if best.is_none_or(|(_, m)| n > m) {
            best = Some((state, n));
        }
    }
    best.map(|(s, _)| s)
}

/// Schedule connectivity factor in `[scf_floor, 1]`.
///
/// Breadth rewards many distinct opponents; reach rewards opponents from
/// outside the team's own state. A closed regional bubble scores low on both.
pub fn schedule_connectivity_factor(conn: &Connectivity, cfg: &SosConfig) -> f64 {
    let breadth = (conn.unique_opponents as f64 / cfg.scf_full_opponents as f64).min(1.0);
    let out_of_state = conn.out_of_state_opponents as f64 / cfg.scf_full_out_of_state as f64;
    let reach = 0.5 + 0.5 * out_of_state.min(1.0);
    cfg.scf_floor + (1.0 - cfg.scf_floor) * breadth * reach
}

/// Damped SOS for one team against one strength generation.
pub fn team_sos(
    schedule: &TeamSchedule,
    strength: &BTreeMap<TeamId, f64>,
    conn: &Connectivity,
    cfg: &SosConfig,
) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for wg in &schedule.games {
        let s = strength
            .get(&wg.game.opponent_id)
            .copied()
            .unwrap_or(NEUTRAL_STRENGTH);
        num += wg.weight * s;
        den += wg.weight;
    }
    let raw = if den > 0.0 { num / den } else { NEUTRAL_STRENGTH };
    let mut sos = raw * schedule_connectivity_factor(conn, cfg);
    if conn.is_isolated(cfg) {
        sos = sos.min(cfg.isolation_cap);
    }
    sos.clamp(0.0, 1.0)
}

/// Strength for the next generation, always re-derived from the seed.
pub fn next_generation(
    seed: &BTreeMap<TeamId, f64>,
    sos: &BTreeMap<TeamId, f64>,
    pass: usize,
    cfg: &SosConfig,
) -> StrengthGeneration {
    let a = cfg.propagation_weight;
    let strength = seed
        .iter()
        .map(|(id, s0)| {
            let s = sos.get(id).copied().unwrap_or(NEUTRAL_STRENGTH);
            (id.clone(), ((1.0 - a) * s0 + a * s).clamp(0.0, 1.0))
        })
        .collect();
    StrengthGeneration { pass, strength }
}

/// Run the fixed number of propagation passes and return the last pass's
/// damped SOS. Every team in a pass is computed from the same generation.
pub fn propagate(
    league: &League,
    seed: &BTreeMap<TeamId, f64>,
    connectivity: &BTreeMap<TeamId, Connectivity>,
    cfg: &SosConfig,
    cancel: &CancelFlag,
) -> Result<(BTreeMap<TeamId, f64>, usize)> {
    let ids = league.team_ids();
    let mut generation = StrengthGeneration {
        pass: 0,
        strength: seed.clone(),
    };
    let mut sos: BTreeMap<TeamId, f64> = BTreeMap::new();

    for pass in 0..cfg.iterations {
        cancel.check("sos propagation")?;
        let current = &generation;
        sos = ids
            .par_iter()
            .map(|id| {
                let schedule = &league.schedules[id];
                let conn = connectivity.get(id).copied().unwrap_or_default();
                (id.clone(), team_sos(schedule, &current.strength, &conn, cfg))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect();
        generation = next_generation(seed, &sos, pass + 1, cfg);
        debug!(pass = generation.pass, teams = sos.len(), "sos propagation pass");
    }

    Ok((sos, generation.pass))
}

fn choose_mode(cohort: &CohortKey, values: &[f64], cfg: &SosConfig) -> NormalizationMode {
    let n = values.len();
    if n == 0 {
        return NormalizationMode::ZScore;
    }
    let saturated = values
        .iter()
        .filter(|v| **v >= 1.0 - cfg.saturation_epsilon)
        .count();
    if saturated as f64 / n as f64 > cfg.saturation_share {
        warn!(%cohort, saturated, teams = n, "sos saturated; using z-score normalization");
        return NormalizationMode::ZScore;
    }
    match cfg.normalization {
        NormalizationMode::Percentile if n < cfg.min_percentile_cohort => {
            info!(
                %cohort,
                teams = n,
                min = cfg.min_percentile_cohort,
                "cohort too small for percentile; falling back to z-score"
            );
            NormalizationMode::ZScore
        }
        mode => mode,
    }
}

/// Normalized-scale cap for isolated teams: the configured cap, lowered to
/// sit strictly under the connected teams' mean when that mean is lower.
fn isolation_cap_for(normalized: &[f64], isolated: &[bool], cfg: &SosConfig) -> f64 {
    let connected: Vec<f64> = normalized
        .iter()
        .zip(isolated)
        .filter(|(_, iso)| !**iso)
        .map(|(v, _)| v.clamp(0.0, 1.0))
        .collect();
    if connected.is_empty() {
        return cfg.isolation_cap;
    }
    let mean = connected.iter().sum::<f64>() / connected.len() as f64;
    cfg.isolation_cap.min((mean - ISOLATION_MARGIN).max(0.0))
}

/// Spread damped SOS onto [0, 1] within each cohort.
///
/// Isolated teams are re-capped on the normalized scale; teams without rated
/// opponents get the neutral value and stay out of the cohort statistics.
pub fn normalize_by_cohort(
    league: &League,
    raw_sos: &BTreeMap<TeamId, f64>,
    connectivity: &BTreeMap<TeamId, Connectivity>,
    cfg: &SosConfig,
) -> (BTreeMap<TeamId, f64>, BTreeMap<CohortKey, NormalizationMode>, BTreeSet<TeamId>) {
    let mut out = BTreeMap::new();
    let mut modes = BTreeMap::new();
    let mut provisional = BTreeSet::new();

    for (cohort, ids) in &league.cohorts {
        let mut members: Vec<&TeamId> = Vec::with_capacity(ids.len());
        for id in ids {
            let conn = connectivity.get(id).copied().unwrap_or_default();
            if conn.has_resolvable_opponents() {
                members.push(id);
            } else {
                provisional.insert(id.clone());
                out.insert(id.clone(), NEUTRAL_STRENGTH);
            }
        }

        let values: Vec<f64> = members
            .iter()
            .map(|id| raw_sos.get(*id).copied().unwrap_or(NEUTRAL_STRENGTH))
            .collect();
        let mode = choose_mode(cohort, &values, cfg);
        modes.insert(*cohort, mode);
        let normalized = match mode {
            NormalizationMode::ZScore => zscore_unit(&values, cfg.zscore_spread),
            NormalizationMode::Percentile => percentile_unit(&values),
        };

        let isolated: Vec<bool> = members
            .iter()
            .map(|id| connectivity.get(*id).copied().unwrap_or_default().is_isolated(cfg))
            .collect();
        let cap = isolation_cap_for(&normalized, &isolated, cfg);
        for ((id, v), is_isolated) in members.into_iter().zip(normalized).zip(isolated) {
            let v = if is_isolated { v.min(cap) } else { v };
            out.insert(id.clone(), v.clamp(0.0, 1.0));
        }
    }

    (out, modes, provisional)
}

/// Full SOS stage: seed, connectivity, propagation, normalization.
pub fn compute_sos(
    league: &League,
    ratings: &RatingTable,
    cfg: &SosConfig,
    cancel: &CancelFlag,
) -> Result<SosResult> {
    let abs_strength = seed_strength(league, ratings, cfg);
    let connectivity: BTreeMap<TeamId, Connectivity> = league
        .schedules
        .par_iter()
        .map(|(id, schedule)| (id.clone(), team_connectivity(schedule, league)))
        .collect::<Vec<_>>()
        .into_iter()
        .collect();

    let (raw_sos, passes) = propagate(league, &abs_strength, &connectivity, cfg, cancel)?;
    cancel.check("sos normalization")?;
    let (sos, cohort_modes, provisional) =
        normalize_by_cohort(league, &raw_sos, &connectivity, cfg);

    let isolated = connectivity.values().filter(|c| c.is_isolated(cfg)).count();
    let unresolved_games: usize = connectivity.values().map(|c| c.unresolved_games).sum();
    info!(
        teams = sos.len(),
        isolated,
        unresolved_games,
        provisional = provisional.len(),
        passes,
        "sos computed"
    );

    Ok(SosResult {
        abs_strength,
        raw_sos,
        sos,
        connectivity,
        provisional,
        cohort_modes,
        passes,
    })
}
