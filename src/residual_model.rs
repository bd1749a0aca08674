//! Expected-margin model behind the per-game residual signal.
//!
//! Gradient-boosted regression trees on squared loss, trained offline and
//! shipped as a versioned JSON artifact. A run only ever reads the artifact.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::game::{CohortKey, Game, TeamId};

pub const ARTIFACT_VERSION: u32 = 1;

pub const RESIDUAL_FEATURE_NAMES: [&str; 7] = [
    "team_power",
    "opp_power",
    "team_sos",
    "opp_sos",
    "age_gap",
    "cross_gender",
    "recency_days",
];

pub const FEATURE_COUNT: usize = RESIDUAL_FEATURE_NAMES.len();

/// What the model needs to know about one side of a game.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureSource {
    pub power_score: f64,
    pub sos: f64,
    pub cohort: CohortKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GameFeatures {
    pub team_power: f64,
    pub opp_power: f64,
    pub team_sos: f64,
    pub opp_sos: f64,
    /// Opponent age group minus own, in years.
    pub age_gap: f64,
    pub cross_gender: bool,
    /// Days between the game and the run's reference date.
    pub recency_days: f64,
}

impl GameFeatures {
    pub fn build(
        team: &FeatureSource,
        opp: &FeatureSource,
        date: NaiveDate,
        as_of: NaiveDate,
    ) -> Self {
        Self {
            team_power: team.power_score,
            opp_power: opp.power_score,
            team_sos: team.sos,
            opp_sos: opp.sos,
            age_gap: opp.cohort.age_group.years() as f64 - team.cohort.age_group.years() as f64,
            cross_gender: team.cohort.gender != opp.cohort.gender,
            recency_days: (as_of - date).num_days().max(0) as f64,
        }
    }

    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.team_power,
            self.opp_power,
            self.team_sos,
            self.opp_sos,
            self.age_gap,
            if self.cross_gender { 1.0 } else { 0.0 },
            self.recency_days,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn predict(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    fn is_well_formed(&self) -> bool {
        match self {
            TreeNode::Leaf { value } => value.is_finite(),
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                *feature < FEATURE_COUNT
                    && threshold.is_finite()
                    && left.is_well_formed()
                    && right.is_well_formed()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Share of training rows drawn for each tree.
    pub subsample: f64,
    /// Most recent share of samples held out for validation.
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            rounds: 150,
            learning_rate: 0.05,
            max_depth: 3,
            min_samples_leaf: 20,
            subsample: 0.8,
            validation_fraction: 0.2,
            seed: 7,
        }
    }
}

impl BoostingParams {
    pub fn validate(&self) -> Result<()> {
        if self.rounds == 0 {
            return Err(EngineError::config("boosting rounds must be at least 1"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(EngineError::config("learning_rate must be within (0, 1]"));
        }
        if self.max_depth == 0 || self.min_samples_leaf == 0 {
            return Err(EngineError::config(
                "max_depth and min_samples_leaf must be at least 1",
            ));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(EngineError::config("subsample must be within (0, 1]"));
        }
        if !(0.0..0.9).contains(&self.validation_fraction) {
            return Err(EngineError::config("validation_fraction must be within [0, 0.9)"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub train_rmse: f64,
    pub val_rmse: f64,
    /// RMSE of always predicting the training mean, on the validation split.
    pub baseline_val_rmse: f64,
    pub train_samples: usize,
    pub val_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualModelArtifact {
    pub version: u32,
    pub generated_at: String,
    pub feature_names: Vec<String>,
    pub base_prediction: f64,
    pub learning_rate: f64,
    pub trees: Vec<TreeNode>,
    #[serde(default)]
    pub params: BoostingParams,
    #[serde(default)]
    pub metrics: TrainingMetrics,
}

#[derive(Debug, Clone)]
pub struct ResidualModel {
    artifact: ResidualModelArtifact,
}

impl ResidualModel {
    pub fn from_artifact(artifact: ResidualModelArtifact) -> Result<Self> {
        if artifact.version != ARTIFACT_VERSION {
            return Err(EngineError::ModelUnavailable(format!(
                "artifact version {} (expected {ARTIFACT_VERSION})",
                artifact.version
            )));
        }
        let names_match = artifact.feature_names.len() == FEATURE_COUNT
            && artifact
                .feature_names
                .iter()
                .zip(RESIDUAL_FEATURE_NAMES)
                .all(|(a, b)| a == b);
        if !names_match {
            return Err(EngineError::ModelUnavailable(format!(
                "feature mismatch: {:?}",
                artifact.feature_names
            )));
        }
        if !artifact.base_prediction.is_finite()
            || !artifact.learning_rate.is_finite()
            || !artifact.trees.iter().all(TreeNode::is_well_formed)
        {
            return Err(EngineError::ModelUnavailable("malformed trees".into()));
        }
        Ok(Self { artifact })
    }

    pub fn predict(&self, features: &GameFeatures) -> f64 {
        let x = features.to_array();
        let boost: f64 = self.artifact.trees.iter().map(|t| t.predict(&x)).sum();
        self.artifact.base_prediction + self.artifact.learning_rate * boost
    }

    pub fn artifact(&self) -> &ResidualModelArtifact {
        &self.artifact
    }

    /// Short tag stored with each snapshot.
    pub fn version_tag(&self) -> String {
        format!(
            "v{}@{} ({} trees)",
            self.artifact.version,
            self.artifact.generated_at,
            self.artifact.trees.len()
        )
    }
}

/// Outcome of looking for a model at run start.
#[derive(Debug, Clone)]
pub enum ModelAvailability {
    Ready(ResidualModel),
    Unavailable(String),
}

impl ModelAvailability {
    pub fn model(&self) -> Option<&ResidualModel> {
        match self {
            Self::Ready(m) => Some(m),
            Self::Unavailable(_) => None,
        }
    }
}

pub fn load_model(path: &Path) -> Result<ResidualModel> {
    let raw = fs::read_to_string(path).map_err(|err| {
        EngineError::ModelUnavailable(format!("read {}: {err}", path.display()))
    })?;
    let artifact = serde_json::from_str::<ResidualModelArtifact>(&raw).map_err(|err| {
        EngineError::ModelUnavailable(format!("parse {}: {err}", path.display()))
    })?;
    ResidualModel::from_artifact(artifact)
}

/// Never fails: a missing or broken artifact only disables the residual layer.
pub fn load_for_run(path: Option<&Path>) -> ModelAvailability {
    let Some(path) = path else {
        return ModelAvailability::Unavailable("no model path configured".into());
    };
    match load_model(path) {
        Ok(model) => {
            info!(model = %model.version_tag(), "residual model loaded");
            ModelAvailability::Ready(model)
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                %err,
                "residual model unavailable; skipping residual layer"
            );
            ModelAvailability::Unavailable(err.to_string())
        }
    }
}

/// Write via a temp file and rename so readers never see a partial artifact.
pub fn save_artifact(artifact: &ResidualModelArtifact, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(artifact)?;
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingSample {
    pub features: GameFeatures,
    pub date: NaiveDate,
    /// Clipped actual goal margin.
    pub target: f64,
}

/// One sample per game perspective against a rated opponent.
pub fn training_samples(
    sources: &BTreeMap<TeamId, FeatureSource>,
    histories: &BTreeMap<TeamId, Vec<Game>>,
    as_of: NaiveDate,
    max_goal_diff: u32,
) -> Vec<TrainingSample> {
    let mut out = Vec::new();
    for (team_id, games) in histories {
        let Some(team) = sources.get(team_id) else {
            continue;
        };
        for game in games {
            let Some(opp) = sources.get(&game.opponent_id) else {
                continue;
            };
            out.push(TrainingSample {
                features: GameFeatures::build(team, opp, game.date, as_of),
                date: game.date,
                target: game.clipped_margin(max_goal_diff),
            });
        }
    }
    out
}

fn rmse(pred: &[f64], target: &[f64]) -> f64 {
    if pred.is_empty() {
        return 0.0;
    }
    let sse: f64 = pred.iter().zip(target).map(|(p, y)| (p - y).powi(2)).sum();
    (sse / pred.len() as f64).sqrt()
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

fn best_split(
    xs: &[[f64; FEATURE_COUNT]],
    residuals: &[f64],
    rows: &[usize],
    min_leaf: usize,
) -> Option<SplitCandidate> {
    let n = rows.len();
    let total: f64 = rows.iter().map(|r| residuals[*r]).sum();
    let parent_score = total * total / n as f64;
    let mut best: Option<SplitCandidate> = None;

    let mut sorted: Vec<(f64, f64)> = Vec::with_capacity(n);
    for feature in 0..FEATURE_COUNT {
        sorted.clear();
        sorted.extend(rows.iter().map(|r| (xs[*r][feature], residuals[*r])));
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_sum = 0.0;
        for i in 1..n {
            left_sum += sorted[i - 1].1;
            if i < min_leaf || n - i < min_leaf {
                continue;
            }
            if sorted[i - 1].0 == sorted[i].0 {
                continue;
            }
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / i as f64 + right_sum * right_sum / (n - i) as f64
                - parent_score;
            if gain > 1e-12 && best.as_ref().is_none_or(|b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: (sorted[i - 1].0 + sorted[i].0) / 2.0,
                    gain,
                });
            }
        }
    }
    best
}

fn build_tree(
    xs: &[[f64; FEATURE_COUNT]],
    residuals: &[f64],
    rows: Vec<usize>,
    depth: usize,
    params: &BoostingParams,
) -> TreeNode {
    let mean = if rows.is_empty() {
        0.0
    } else {
        rows.iter().map(|r| residuals[*r]).sum::<f64>() / rows.len() as f64
    };
    if depth >= params.max_depth || rows.len() < 2 * params.min_samples_leaf {
        return TreeNode::Leaf { value: mean };
    }
    let Some(split) = best_split(xs, residuals, &rows, params.min_samples_leaf) else {
        return TreeNode::Leaf { value: mean };
    };
    let (left, right): (Vec<usize>, Vec<usize>) = rows
        .into_iter()
        .partition(|r| xs[*r][split.feature] <= split.threshold);
    TreeNode::Split {
        feature: split.feature,
        threshold: split.threshold,
        left: Box::new(build_tree(xs, residuals, left, depth + 1, params)),
        right: Box::new(build_tree(xs, residuals, right, depth + 1, params)),
    }
}

/// Fit the boosted ensemble. The most recent `validation_fraction` of samples
/// (by date) is held out for the reported metrics; row subsampling uses a
/// seeded RNG so identical inputs give identical artifacts.
pub fn train_model(
    samples: &[TrainingSample],
    params: &BoostingParams,
    generated_at: &str,
) -> Result<ResidualModelArtifact> {
    params.validate()?;
    if samples.len() < 2 * params.min_samples_leaf.max(5) {
        return Err(EngineError::Input(format!(
            "need at least {} training samples, got {}",
            2 * params.min_samples_leaf.max(5),
            samples.len()
        )));
    }

    let mut ordered: Vec<&TrainingSample> = samples.iter().collect();
    ordered.sort_by_key(|s| s.date);
    let n = ordered.len();
    let n_val = ((n as f64) * params.validation_fraction).round() as usize;
    let n_train = (n - n_val).max(1);

    let xs: Vec<[f64; FEATURE_COUNT]> = ordered.iter().map(|s| s.features.to_array()).collect();
    let ys: Vec<f64> = ordered.iter().map(|s| s.target).collect();

    let base = ys[..n_train].iter().sum::<f64>() / n_train as f64;
    let mut pred = vec![base; n];
    let mut residuals = vec![0.0; n];
    let mut trees = Vec::with_capacity(params.rounds);
    let mut rng = StdRng::seed_from_u64(params.seed);

    for _ in 0..params.rounds {
        for i in 0..n_train {
            residuals[i] = ys[i] - pred[i];
        }
        let mut rows: Vec<usize> = if params.subsample >= 1.0 {
            (0..n_train).collect()
        } else {
            (0..n_train)
                .filter(|_| rng.gen_range(0.0..1.0) < params.subsample)
                .collect()
        };
        if rows.len() < 2 {
            rows = (0..n_train).collect();
        }
        let tree = build_tree(&xs, &residuals, rows, 0, params);
        for i in 0..n {
            pred[i] += params.learning_rate * tree.predict(&xs[i]);
        }
        trees.push(tree);
    }

    let metrics = TrainingMetrics {
        train_rmse: rmse(&pred[..n_train], &ys[..n_train]),
        val_rmse: rmse(&pred[n_train..], &ys[n_train..]),
        baseline_val_rmse: rmse(&vec![base; n - n_train], &ys[n_train..]),
        train_samples: n_train,
        val_samples: n - n_train,
    };
    info!(
        train_rmse = metrics.train_rmse,
        val_rmse = metrics.val_rmse,
        baseline_val_rmse = metrics.baseline_val_rmse,
        trees = trees.len(),
        "residual model trained"
    );

    Ok(ResidualModelArtifact {
        version: ARTIFACT_VERSION,
        generated_at: generated_at.to_string(),
        feature_names: RESIDUAL_FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        base_prediction: base,
        learning_rate: params.learning_rate,
        trees,
        params: params.clone(),
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{AgeGroup, Gender};

    fn cohort() -> CohortKey {
        CohortKey {
            age_group: AgeGroup(14),
            gender: Gender::Female,
        }
    }

    fn synthetic(n: usize) -> Vec<TrainingSample> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        (0..n)
            .map(|i| {
                let team_power = (i % 17) as f64 / 17.0;
                let opp_power = (i % 13) as f64 / 13.0;
                let team = FeatureSource {
                    power_score: team_power,
                    sos: 0.5,
                    cohort: cohort(),
                };
                let opp = FeatureSource {
                    power_score: opp_power,
                    sos: 0.5,
                    cohort: cohort(),
                };
                let date = start + chrono::Duration::days((i % 150) as i64);
                TrainingSample {
                    features: GameFeatures::build(
                        &team,
                        &opp,
                        date,
                        start + chrono::Duration::days(160),
                    ),
                    date,
                    target: 4.0 * (team_power - opp_power),
                }
            })
            .collect()
    }

    #[test]
    fn boosted_trees_beat_the_mean() {
        let samples = synthetic(600);
        let artifact = train_model(&samples, &BoostingParams::default(), "test").expect("train");
        assert!(artifact.metrics.val_rmse < artifact.metrics.baseline_val_rmse);
        let model = ResidualModel::from_artifact(artifact).expect("valid artifact");
        let strong = GameFeatures {
            team_power: 0.9,
            opp_power: 0.1,
            team_sos: 0.5,
            opp_sos: 0.5,
            age_gap: 0.0,
            cross_gender: false,
            recency_days: 30.0,
        };
        let weak = GameFeatures {
            team_power: 0.1,
            opp_power: 0.9,
            ..strong
        };
        assert!(model.predict(&strong) > model.predict(&weak));
    }

    #[test]
    fn training_is_deterministic() {
        let samples = synthetic(300);
        let params = BoostingParams {
            rounds: 20,
            ..BoostingParams::default()
        };
        let a = train_model(&samples, &params, "t").expect("train");
        let b = train_model(&samples, &params, "t").expect("train");
        assert_eq!(a, b);
    }

    #[test]
    fn too_few_samples_is_an_error() {
        assert!(train_model(&synthetic(5), &BoostingParams::default(), "t").is_err());
    }

    #[test]
    fn feature_mismatch_is_rejected() {
        let mut artifact = train_model(
            &synthetic(200),
            &BoostingParams {
                rounds: 3,
                ..BoostingParams::default()
            },
            "t",
        )
        .expect("train");
        artifact.feature_names.swap(0, 1);
        assert!(matches!(
            ResidualModel::from_artifact(artifact),
            Err(EngineError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn tree_json_uses_tagged_nodes() {
        let tree = TreeNode::Split {
            feature: 0,
            threshold: 0.5,
            left: Box::new(TreeNode::Leaf { value: -1.0 }),
            right: Box::new(TreeNode::Leaf { value: 1.0 }),
        };
        let json = serde_json::to_string(&tree).expect("serialize");
        assert!(json.contains("\"kind\":\"split\""));
        let back: TreeNode = serde_json::from_str(&json).expect("parse");
        let mut x = [0.0; FEATURE_COUNT];
        assert_eq!(back.predict(&x), -1.0);
        x[0] = 0.7;
        assert_eq!(back.predict(&x), 1.0);
    }

    #[test]
    fn missing_artifact_disables_layer() {
        let path = std::env::temp_dir().join("powerscore_no_such_model.json");
        let _ = fs::remove_file(&path);
        assert!(matches!(load_for_run(Some(&path)), ModelAvailability::Unavailable(_)));
        assert!(matches!(load_for_run(None), ModelAvailability::Unavailable(_)));
    }
}
