use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};
use crate::game::AgeGroup;

/// How SOS values are spread onto [0, 1] inside a cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationMode {
    /// Mean maps to 0.5, distances preserved. Safe for any cohort size.
    ZScore,
    /// Average-rank percentile. Only used for cohorts of at least
    /// `SosConfig::min_percentile_cohort` teams.
    Percentile,
}

impl NormalizationMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "zscore" | "z-score" | "z" => Some(Self::ZScore),
            "percentile" | "pct" => Some(Self::Percentile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForfeitMode {
    /// Forfeits count as ordinary results.
    Keep,
    /// Forfeit games are dropped before any rating math.
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecencyConfig {
    /// Most recent games that keep a full rank factor.
    pub recent_k: usize,
    /// Per-rank exponential decay applied past `recent_k`.
    pub rank_decay: f64,
    /// Age half-life in days.
    pub half_life_days: f64,
    /// Floor so that old games are never discarded.
    pub min_weight: f64,
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            recent_k: 15,
            rank_decay: 0.08,
            half_life_days: 180.0,
            min_weight: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionalConfig {
    /// Games played at which the provisional multiplier reaches 1.
    pub full_confidence_games: u32,
}

impl Default for ProvisionalConfig {
    fn default() -> Self {
        Self {
            full_confidence_games: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    /// Per-game goal margin cap applied before any rating math.
    pub max_goal_diff: u32,
    /// Opponent-adjustment refinement passes.
    pub adjust_iterations: usize,
    /// Early stop when no rating moves more than this between passes.
    pub adjust_tolerance: f64,
    /// Bound on the per-game opponent adjustment factor (and its inverse).
    pub max_adjust_factor: f64,
    /// Ratings are clipped to `[0, clip_multiple * cohort anchor]`.
    pub clip_multiple: f64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            max_goal_diff: 6,
            adjust_iterations: 3,
            adjust_tolerance: 1e-4,
            max_adjust_factor: 3.0,
            clip_multiple: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SosConfig {
    /// Propagation passes. Three is the validated baseline.
    pub iterations: usize,
    /// Logistic steepness for seeding absolute strength from OFF/DEF.
    pub strength_steepness: f64,
    /// Share of a pass's SOS blended onto the seed strength for the next pass.
    pub propagation_weight: f64,
    /// Lowest schedule connectivity factor.
    pub scf_floor: f64,
    /// Unique opponents needed for full schedule breadth.
    pub scf_full_opponents: usize,
    /// Out-of-state opponents needed for full schedule reach.
    pub scf_full_out_of_state: usize,
    /// Teams with fewer unique opponents than this are isolation-capped.
    pub isolation_min_opponents: usize,
    /// SOS ceiling for isolated teams. Must sit below the 0.5 midpoint.
    pub isolation_cap: f64,
    pub normalization: NormalizationMode,
    /// Minimum cohort size for percentile normalization.
    pub min_percentile_cohort: usize,
    /// Width of one standard deviation on the normalized [0, 1] scale.
    pub zscore_spread: f64,
    /// Distance from 1.0 that counts as saturated.
    pub saturation_epsilon: f64,
    /// Saturated share of a cohort that forces z-score normalization.
    pub saturation_share: f64,
}

impl Default for SosConfig {
    fn default() -> Self {
        Self {
            iterations: 3,
            strength_steepness: 1.5,
            propagation_weight: 0.35,
            scf_floor: 0.4,
            scf_full_opponents: 10,
            scf_full_out_of_state: 3,
            isolation_min_opponents: 5,
            isolation_cap: 0.40,
            normalization: NormalizationMode::ZScore,
            min_percentile_cohort: 30,
            zscore_spread: 0.15,
            saturation_epsilon: 1e-3,
            saturation_share: 1.0 / 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeConfig {
    pub off_weight: f64,
    pub def_weight: f64,
    pub sos_weight: f64,
    pub perf_weight: f64,
    /// Logistic steepness mapping anchor-scaled components onto [0, 1].
    pub component_steepness: f64,
    /// Fixed goals-per-game anchors keyed by age group label ("U12").
    /// Cohorts without an override use their observed scoring baseline.
    pub anchor_overrides: BTreeMap<String, f64>,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            off_weight: 0.25,
            def_weight: 0.25,
            sos_weight: 0.40,
            perf_weight: 0.10,
            component_steepness: 2.0,
            anchor_overrides: BTreeMap::new(),
        }
    }
}

impl CompositeConfig {
    /// Override for `age`, whichever spelling of the label the config used.
    pub fn anchor_override(&self, age: AgeGroup) -> Option<f64> {
        self.anchor_overrides
            .iter()
            .find(|(label, _)| AgeGroup::parse(label) == Some(age))
            .map(|(_, anchor)| *anchor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    /// Most recent games considered.
    pub window: usize,
    /// Over/under threshold as a share of the cohort's mean absolute margin.
    pub threshold_fraction: f64,
    /// Threshold floor in goals.
    pub min_threshold: f64,
    /// Momentum points are clamped to `[-points_cap, points_cap]`.
    pub points_cap: u32,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            window: 8,
            threshold_fraction: 0.5,
            min_threshold: 0.25,
            points_cap: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Teams below this many games are published without ranks.
    pub min_games: u32,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self { min_games: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjustmentConfig {
    pub forfeits: ForfeitMode,
    /// Goals of home edge removed from the home side's margin (split evenly
    /// between goals for and against). 0 disables home-field adjustment.
    pub home_advantage_goals: f64,
}

impl Default for AdjustmentConfig {
    fn default() -> Self {
        Self {
            forfeits: ForfeitMode::Keep,
            home_advantage_goals: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub lookback_days: i64,
    /// Worker threads for per-team work inside an iteration.
    pub parallelism: usize,
    pub recency: RecencyConfig,
    pub provisional: ProvisionalConfig,
    pub rating: RatingConfig,
    pub sos: SosConfig,
    pub composite: CompositeConfig,
    pub momentum: MomentumConfig,
    pub ranking: RankingConfig,
    pub adjustments: AdjustmentConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookback_days: 365,
            parallelism: 4,
            recency: RecencyConfig::default(),
            provisional: ProvisionalConfig::default(),
            rating: RatingConfig::default(),
            sos: SosConfig::default(),
            composite: CompositeConfig::default(),
            momentum: MomentumConfig::default(),
            ranking: RankingConfig::default(),
            adjustments: AdjustmentConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults or the given JSON file, then `POWERSCORE_*` overrides.
    /// `.env.local` and `.env` are read first.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        load_dotenv();
        let mut cfg = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)?;
                serde_json::from_str::<Self>(&raw)?
            }
            None => Self::default(),
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<i64>("POWERSCORE_LOOKBACK_DAYS")? {
            self.lookback_days = v;
        }
        if let Some(v) = env_parse::<usize>("POWERSCORE_SOS_ITERATIONS")? {
            self.sos.iterations = v;
        }
        if let Some(v) = env_parse::<usize>("POWERSCORE_PARALLELISM")? {
            self.parallelism = v;
        }
        if let Ok(raw) = env::var("POWERSCORE_NORMALIZATION") {
            self.sos.normalization = NormalizationMode::parse(&raw).ok_or_else(|| {
                EngineError::config(format!("POWERSCORE_NORMALIZATION: unknown mode {raw:?}"))
            })?;
        }
        Ok(())
    }

    /// Rejects inconsistent values and knobs that would silently do nothing.
    pub fn validate(&self) -> Result<()> {
        if self.lookback_days <= 0 {
            return Err(EngineError::config("lookback_days must be positive"));
        }
        if self.parallelism == 0 || self.parallelism > 64 {
            return Err(EngineError::config("parallelism must be within 1..=64"));
        }

        let r = &self.recency;
        if r.recent_k == 0 {
            return Err(EngineError::config("recency.recent_k must be at least 1"));
        }
        if !(r.rank_decay.is_finite() && r.rank_decay >= 0.0) {
            return Err(EngineError::config("recency.rank_decay must be >= 0"));
        }
        if !(r.half_life_days.is_finite() && r.half_life_days > 0.0) {
            return Err(EngineError::config("recency.half_life_days must be > 0"));
        }
        if !(r.min_weight > 0.0 && r.min_weight <= 1.0) {
            return Err(EngineError::config("recency.min_weight must be within (0, 1]"));
        }

        if self.provisional.full_confidence_games == 0 {
            return Err(EngineError::config(
                "provisional.full_confidence_games must be at least 1",
            ));
        }

        let rt = &self.rating;
        if rt.max_goal_diff == 0 {
            return Err(EngineError::config("rating.max_goal_diff must be at least 1"));
        }
        if rt.adjust_iterations == 0 {
            return Err(EngineError::config("rating.adjust_iterations must be at least 1"));
        }
        if !(rt.adjust_tolerance.is_finite() && rt.adjust_tolerance > 0.0) {
            return Err(EngineError::config("rating.adjust_tolerance must be > 0"));
        }
        if !(rt.max_adjust_factor.is_finite() && rt.max_adjust_factor > 1.0) {
            return Err(EngineError::config("rating.max_adjust_factor must be > 1"));
        }
        if !(rt.clip_multiple.is_finite() && rt.clip_multiple > 1.0) {
            return Err(EngineError::config("rating.clip_multiple must be > 1"));
        }

        let s = &self.sos;
        if s.iterations == 0 {
            return Err(EngineError::config("sos.iterations must be at least 1"));
        }
        if !(s.propagation_weight >= 0.0 && s.propagation_weight < 1.0) {
            return Err(EngineError::config("sos.propagation_weight must be within [0, 1)"));
        }
        if s.iterations > 1 && s.propagation_weight == 0.0 {
            return Err(EngineError::config(
                "sos.iterations > 1 has no effect with sos.propagation_weight = 0",
            ));
        }
        if !(s.strength_steepness.is_finite() && s.strength_steepness > 0.0) {
            return Err(EngineError::config("sos.strength_steepness must be > 0"));
        }
        if !(s.scf_floor >= 0.0 && s.scf_floor < 1.0) {
            return Err(EngineError::config("sos.scf_floor must be within [0, 1)"));
        }
        if s.scf_full_opponents == 0 || s.scf_full_out_of_state == 0 {
            return Err(EngineError::config(
                "sos.scf_full_opponents and sos.scf_full_out_of_state must be at least 1",
            ));
        }
        if s.isolation_min_opponents < 2 {
            return Err(EngineError::config("sos.isolation_min_opponents must be at least 2"));
        }
        if !(s.isolation_cap > 0.0 && s.isolation_cap < 0.5) {
            return Err(EngineError::config(
                "sos.isolation_cap must be within (0, 0.5) to sit below the neutral midpoint",
            ));
        }
        if s.min_percentile_cohort < 2 {
            return Err(EngineError::config("sos.min_percentile_cohort must be at least 2"));
        }
        if !(s.zscore_spread > 0.0 && s.zscore_spread <= 0.5) {
            return Err(EngineError::config("sos.zscore_spread must be within (0, 0.5]"));
        }
        if !(s.saturation_epsilon > 0.0 && s.saturation_epsilon < 0.5) {
            return Err(EngineError::config("sos.saturation_epsilon must be within (0, 0.5)"));
        }
        if !(s.saturation_share > 0.0 && s.saturation_share < 1.0) {
            return Err(EngineError::config("sos.saturation_share must be within (0, 1)"));
        }

        let c = &self.composite;
        let weights = [c.off_weight, c.def_weight, c.sos_weight, c.perf_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(EngineError::config("composite weights must be finite and >= 0"));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::config(format!(
                "composite weights must sum to 1 (got {sum:.6})"
            )));
        }
        if !(c.component_steepness.is_finite() && c.component_steepness > 0.0) {
            return Err(EngineError::config("composite.component_steepness must be > 0"));
        }
        let mut seen_ages = BTreeSet::new();
        for (age, anchor) in &c.anchor_overrides {
            let Some(parsed) = AgeGroup::parse(age) else {
                return Err(EngineError::config(format!(
                    "composite.anchor_overrides: unknown age group {age:?}"
                )));
            };
            if !seen_ages.insert(parsed) {
                return Err(EngineError::config(format!(
                    "composite.anchor_overrides: {parsed} listed more than once"
                )));
            }
            if !(anchor.is_finite() && *anchor > 0.0) {
                return Err(EngineError::config(format!(
                    "composite.anchor_overrides[{age}] must be > 0"
                )));
            }
        }

        let m = &self.momentum;
        if m.window == 0 {
            return Err(EngineError::config("momentum.window must be at least 1"));
        }
        if !(m.threshold_fraction.is_finite() && m.threshold_fraction > 0.0) {
            return Err(EngineError::config("momentum.threshold_fraction must be > 0"));
        }
        if !(m.min_threshold.is_finite() && m.min_threshold > 0.0) {
            return Err(EngineError::config("momentum.min_threshold must be > 0"));
        }
        if m.points_cap == 0 || m.points_cap as usize > m.window {
            return Err(EngineError::config(
                "momentum.points_cap must be within 1..=momentum.window",
            ));
        }

        if self.ranking.min_games == 0 {
            return Err(EngineError::config("ranking.min_games must be at least 1"));
        }

        let h = self.adjustments.home_advantage_goals;
        if !(h.is_finite() && (0.0..2.0).contains(&h)) {
            return Err(EngineError::config(
                "adjustments.home_advantage_goals must be within [0, 2)",
            ));
        }

        Ok(())
    }

    /// Stable hash of the effective configuration, stored with each snapshot.
    pub fn fingerprint(&self) -> String {
        let raw = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&raw);
        format!("{digest:x}")
    }
}

fn load_dotenv() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| EngineError::config(format!("{key}: cannot parse {raw:?}"))),
        _ => Ok(None),
    }
}
