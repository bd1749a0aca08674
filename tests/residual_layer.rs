mod common;

use std::collections::BTreeMap;
use std::fs;

use powerscore::config::EngineConfig;
use powerscore::game::TeamId;
use powerscore::prepare::prepare_games;
use powerscore::residual_model::{
    BoostingParams, FeatureSource, ModelAvailability, ResidualModelArtifact, load_for_run,
    load_model, save_artifact, train_model, training_samples,
};
use powerscore::snapshot::ModelStatus;

use common::{as_of, run, run_with_model, synthetic_league};

fn trained_artifact() -> (ResidualModelArtifact, powerscore::EngineInput) {
    let input = synthetic_league(30, 16, 21);
    let cfg = EngineConfig::default();
    let snapshot = run(&input, &cfg);
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
    let prepared = prepare_games(&input, as_of(), cfg.lookback_days);
    let samples =
        training_samples(&sources, &prepared.histories, as_of(), cfg.rating.max_goal_diff);
    let params = BoostingParams {
        rounds: 40,
        min_samples_leaf: 10,
        ..BoostingParams::default()
    };
    let artifact = train_model(&samples, &params, "2025-06-30T00:00:00Z").expect("train");
    (artifact, input)
}

#[test]
fn model_round_trips_through_disk_and_scores_a_run() {
    let (artifact, input) = trained_artifact();
    let dir = std::env::temp_dir().join(format!("powerscore_model_{}", std::process::id()));
    let path = dir.join("residual_model.json");
    save_artifact(&artifact, &path).expect("save");
    let loaded = load_model(&path).expect("load");
    assert_eq!(loaded.artifact().trees.len(), artifact.trees.len());
    assert_eq!(loaded.artifact().feature_names, artifact.feature_names);

    let model = load_for_run(Some(&path));
    assert!(matches!(model, ModelAvailability::Ready(_)));
    let snapshot = run_with_model(&input, &EngineConfig::default(), &model);
    assert!(matches!(snapshot.meta.model_status, ModelStatus::Applied { .. }));
    assert!(snapshot.meta.counts.residuals_scored > 0);
    for r in &snapshot.residuals {
        if let (Some(p), Some(res)) = (r.predicted_margin, r.residual) {
            assert!(p.is_finite() && res.is_finite());
        }
    }
    let with_momentum: Vec<f64> = snapshot.teams.iter().filter_map(|t| t.momentum_score).collect();
    assert!(!with_momentum.is_empty());
    assert!(with_momentum.iter().all(|m| (0.0..=100.0).contains(m)));

    // The model only adds residuals; ratings and ranks are unchanged.
    let plain = run(&input, &EngineConfig::default());
    for (a, b) in snapshot.teams.iter().zip(&plain.teams) {
        assert_eq!(a.team_id, b.team_id);
        assert_eq!(a.power_score, b.power_score);
        assert_eq!(a.national_rank, b.national_rank);
    }
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn corrupt_or_mismatched_artifact_disables_residuals() {
    let (mut artifact, input) = trained_artifact();
    let dir = std::env::temp_dir().join(format!("powerscore_bad_model_{}", std::process::id()));
    fs::create_dir_all(&dir).expect("dir");

    let garbled = dir.join("garbled.json");
    fs::write(&garbled, "{ not json").expect("write");
    assert!(matches!(load_for_run(Some(&garbled)), ModelAvailability::Unavailable(_)));

    artifact.feature_names[4] = "age_delta".into();
    let renamed = dir.join("renamed.json");
    save_artifact(&artifact, &renamed).expect("save");
    let model = load_for_run(Some(&renamed));
    assert!(matches!(model, ModelAvailability::Unavailable(_)));

    let snapshot = run_with_model(&input, &EngineConfig::default(), &model);
    assert!(snapshot.teams.iter().all(|t| t.momentum_score.is_none()));
    assert_eq!(snapshot.meta.counts.residuals_scored, 0);
    let _ = fs::remove_dir_all(&dir);
}
