use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use powerscore::adjust::GameAdjustments;
use powerscore::cancel::CancelFlag;
use powerscore::config::EngineConfig;
use powerscore::game::{RawGameRecord, RawTeamRecord};
use powerscore::league::League;
use powerscore::pipeline::run_pipeline;
use powerscore::prepare::{EngineInput, prepare_games};
use powerscore::ratings::estimate_ratings;
use powerscore::residual_model::ModelAvailability;
use powerscore::sos::compute_sos;

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
}

fn generated_input(teams_per_cohort: usize, games_per_team: usize) -> EngineInput {
    let mut rng = StdRng::seed_from_u64(42);
    let states = ["CA", "NV", "TX", "AZ", "OR"];
    let mut teams = Vec::new();
    let mut games = Vec::new();
    for age in ["U10", "U12", "U14", "U16"] {
        for gender in ["M", "F"] {
            let base = teams.len();
            for i in 0..teams_per_cohort {
                teams.push(RawTeamRecord {
                    team_id: format!("{age}{gender}-{i:04}"),
                    age_group: Some(age.to_string()),
                    gender: Some(gender.to_string()),
                    state: Some(states[i % states.len()].to_string()),
                });
            }
            for i in 0..teams_per_cohort {
                for _ in 0..games_per_team / 2 {
                    let j = rng.gen_range(0..teams_per_cohort);
                    if j == i {
                        continue;
                    }
                    let date = as_of() - Duration::days(rng.gen_range(1..360));
                    games.push(RawGameRecord {
                        game_id: format!("g{}", games.len()),
                        team_id: teams[base + i].team_id.clone(),
                        opponent_id: teams[base + j].team_id.clone(),
                        age_group: Some(age.to_string()),
                        gender: Some(gender.to_string()),
                        goals_for: rng.gen_range(0..6),
                        goals_against: rng.gen_range(0..6),
                        date: date.format("%Y-%m-%d").to_string(),
                        ..Default::default()
                    });
                }
            }
        }
    }
    EngineInput { games, teams }
}

fn bench_full_pipeline(c: &mut Criterion) {
    let input = generated_input(250, 20);
    let cfg = EngineConfig::default();
    let model = ModelAvailability::Unavailable("bench".into());
    c.bench_function("full_pipeline_2000_teams", |b| {
        b.iter(|| {
            let snapshot = run_pipeline(
                black_box(&input),
                &model,
                &cfg,
                as_of(),
                &CancelFlag::new(),
            )
            .unwrap();
            black_box(snapshot.teams.len());
        })
    });
}

fn bench_sos_propagation(c: &mut Criterion) {
    let input = generated_input(250, 20);
    let cfg = EngineConfig::default();
    let prepared = prepare_games(&input, as_of(), cfg.lookback_days);
    let league = League::build(&prepared, as_of(), &cfg, &GameAdjustments::default());
    let ratings = estimate_ratings(&league, &cfg.rating, &cfg.composite);
    let cancel = CancelFlag::new();
    c.bench_function("sos_propagation", |b| {
        b.iter(|| {
            let sos = compute_sos(black_box(&league), &ratings, &cfg.sos, &cancel).unwrap();
            black_box(sos.passes);
        })
    });
}

criterion_group!(benches, bench_full_pipeline, bench_sos_propagation);
criterion_main!(benches);
