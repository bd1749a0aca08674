use std::collections::BTreeMap;

use crate::config::{CompositeConfig, ProvisionalConfig};
use crate::game::{CohortKey, TeamId};
use crate::league::{League, TeamSchedule};
use crate::normalize::logistic;
use crate::ratings::{OffDef, RatingTable};
use crate::recency::provisional_multiplier;

/// Inputs to one team's composite, already anchor-scaled where it matters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeInputs {
    pub offense: f64,
    pub defense: f64,
    /// Cohort-normalized SOS in [0, 1].
    pub sos: f64,
    /// Weighted mean of actual minus expected goal margin.
    pub performance: f64,
    /// Cohort goals-per-game anchor.
    pub anchor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentScores {
    pub offense: f64,
    pub defense: f64,
    pub sos: f64,
    pub performance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TeamScore {
    pub components: ComponentScores,
    pub performance: f64,
    pub raw_composite: f64,
    pub provisional_multiplier: f64,
    pub power_score: f64,
}

/// Map each input onto [0, 1]. Goal-based terms are divided by the cohort
/// anchor first, so a U10 side and a U17 side scoring at the same multiple of
/// their own baselines land on the same component value.
pub fn component_scores(inputs: &CompositeInputs, cfg: &CompositeConfig) -> ComponentScores {
    let k = cfg.component_steepness;
    let anchor = inputs.anchor.max(f64::EPSILON);
    ComponentScores {
        offense: logistic(k * (inputs.offense / anchor - 1.0)),
        defense: logistic(k * (1.0 - inputs.defense / anchor)),
        sos: inputs.sos.clamp(0.0, 1.0),
        performance: logistic(k * inputs.performance / anchor),
    }
}

pub fn raw_composite(inputs: &CompositeInputs, cfg: &CompositeConfig) -> f64 {
    let c = component_scores(inputs, cfg);
    cfg.off_weight * c.offense
        + cfg.def_weight * c.defense
        + cfg.sos_weight * c.sos
        + cfg.perf_weight * c.performance
}

/// Pull a low-sample score toward the cohort mean.
pub fn shrink(raw: f64, multiplier: f64, cohort_mean: f64) -> f64 {
    let m = multiplier.clamp(0.0, 1.0);
    m * raw + (1.0 - m) * cohort_mean
}

/// Margin a cohort-average side would expect against `opp`: it scores the
/// average of the anchor and `opp`'s leakiness, and concedes the average of
/// `opp`'s attack and the anchor. The anchor cancels out.
pub fn baseline_expected_margin(opp: &OffDef) -> f64 {
    (opp.defense - opp.offense) / 2.0
}

/// Recency-weighted mean of actual margin minus the baseline expectation
/// against each opponent. Only opponent ratings enter, so a team's own offense
/// never feeds back into this term. Unrated opponents are skipped; no rated
/// games means 0.
pub fn performance_term(schedule: &TeamSchedule, ratings: &RatingTable) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for wg in &schedule.games {
        let Some(opp) = ratings.ratings.get(&wg.game.opponent_id) else {
            continue;
        };
        let actual = wg.goals_for - wg.goals_against;
        num += wg.weight * (actual - baseline_expected_margin(opp));
        den += wg.weight;
    }
    if den > 0.0 { num / den } else { 0.0 }
}

/// Composite for every team: weighted components, then shrinkage toward the
/// cohort's mean raw composite by the provisional multiplier.
pub fn build_scores(
    league: &League,
    ratings: &RatingTable,
    sos: &BTreeMap<TeamId, f64>,
    composite_cfg: &CompositeConfig,
    provisional_cfg: &ProvisionalConfig,
) -> BTreeMap<TeamId, TeamScore> {
    let mut staged: BTreeMap<TeamId, (CohortKey, ComponentScores, f64, f64, f64)> =
        BTreeMap::new();
    let mut cohort_sums: BTreeMap<CohortKey, (f64, usize)> = BTreeMap::new();

    for (id, schedule) in &league.schedules {
        let Some(r) = ratings.ratings.get(id) else {
            continue;
        };
        let cohort = schedule.team.cohort;
        let performance = performance_term(schedule, ratings);
        let inputs = CompositeInputs {
            offense: r.offense,
            defense: r.defense,
            sos: sos.get(id).copied().unwrap_or(0.5),
            performance,
            anchor: ratings.anchor_for(&cohort),
        };
        let components = component_scores(&inputs, composite_cfg);
        let raw = raw_composite(&inputs, composite_cfg);
        let multiplier = provisional_multiplier(schedule.games_played(), provisional_cfg);
        let entry = cohort_sums.entry(cohort).or_insert((0.0, 0));
        entry.0 += raw;
        entry.1 += 1;
        staged.insert(id.clone(), (cohort, components, performance, raw, multiplier));
    }

    staged
        .into_iter()
        .map(|(id, (cohort, components, performance, raw, multiplier))| {
            let (sum, n) = cohort_sums[&cohort];
            let mean = sum / n as f64;
            (
                id,
                TeamScore {
                    components,
                    performance,
                    raw_composite: raw,
                    provisional_multiplier: multiplier,
                    power_score: shrink(raw, multiplier, mean),
                },
            )
        })
        .collect()
}
