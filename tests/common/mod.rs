#![allow(dead_code)]

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use powerscore::cancel::CancelFlag;
use powerscore::config::EngineConfig;
use powerscore::game::{RawGameRecord, RawTeamRecord};
use powerscore::pipeline::run_pipeline;
use powerscore::prepare::EngineInput;
use powerscore::residual_model::ModelAvailability;
use powerscore::snapshot::Snapshot;

pub fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 30).expect("valid date")
}

/// Builds input tables one perspective per game; the engine mirrors them.
#[derive(Debug, Default)]
pub struct InputBuilder {
    teams: BTreeMap<String, RawTeamRecord>,
    games: Vec<RawGameRecord>,
}

impl InputBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn team(&mut self, id: &str, age: &str, gender: &str, state: Option<&str>) -> &mut Self {
        self.teams.insert(
            id.to_string(),
            RawTeamRecord {
                team_id: id.to_string(),
                age_group: Some(age.to_string()),
                gender: Some(gender.to_string()),
                state: state.map(str::to_string),
            },
        );
        self
    }

    pub fn game(&mut self, team: &str, opp: &str, gf: i64, ga: i64, days_ago: i64) -> &mut Self {
        let desc = &self.teams[team];
        let record = RawGameRecord {
            game_id: format!("g{:05}", self.games.len()),
            team_id: team.to_string(),
            opponent_id: opp.to_string(),
            age_group: desc.age_group.clone(),
            gender: desc.gender.clone(),
            goals_for: gf,
            goals_against: ga,
            date: (as_of() - Duration::days(days_ago)).format("%Y-%m-%d").to_string(),
            venue: Some(if self.games.len() % 2 == 0 { "home" } else { "away" }.to_string()),
            ..Default::default()
        };
        self.games.push(record);
        self
    }

    pub fn raw(&mut self, record: RawGameRecord) -> &mut Self {
        self.games.push(record);
        self
    }

    pub fn build(&self) -> EngineInput {
        EngineInput {
            games: self.games.clone(),
            teams: self.teams.values().cloned().collect(),
        }
    }
}

/// Two cohorts across three states with latent team strengths; scores are
/// drawn from the strength gap so ratings have something to find.
pub fn synthetic_league(teams_per_cohort: usize, games_per_team: usize, seed: u64) -> EngineInput {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut b = InputBuilder::new();
    let states = ["CA", "NV", "TX"];
    for (age, gender) in [("U12", "M"), ("U14", "F")] {
        let ids: Vec<String> = (0..teams_per_cohort)
            .map(|i| format!("{age}{gender}-{i:03}"))
            .collect();
        let strength: Vec<f64> = (0..teams_per_cohort).map(|_| rng.gen_range(0.0..3.0)).collect();
        for (i, id) in ids.iter().enumerate() {
            b.team(id, age, gender, Some(states[i % states.len()]));
        }
        for (i, id) in ids.iter().enumerate() {
            for _ in 0..games_per_team / 2 {
                let j = rng.gen_range(0..teams_per_cohort);
                if j == i {
                    continue;
                }
                let gap = strength[i] - strength[j];
                let gf = (1.5 + gap + rng.gen_range(-1.0..1.0)).round().max(0.0) as i64;
                let ga = (1.5 - gap + rng.gen_range(-1.0..1.0)).round().max(0.0) as i64;
                let days_ago = rng.gen_range(1..300);
                b.game(id, &ids[j], gf, ga, days_ago);
            }
        }
    }
    b.build()
}

pub fn run(input: &EngineInput, cfg: &EngineConfig) -> Snapshot {
    run_pipeline(
        input,
        &ModelAvailability::Unavailable("no model in test".into()),
        cfg,
        as_of(),
        &CancelFlag::new(),
    )
    .expect("pipeline run should succeed")
}

pub fn run_with_model(
    input: &EngineInput,
    cfg: &EngineConfig,
    model: &ModelAvailability,
) -> Snapshot {
    run_pipeline(input, model, cfg, as_of(), &CancelFlag::new())
        .expect("pipeline run should succeed")
}

pub fn cohort_mean_sos(snapshot: &Snapshot, team_id: &str) -> f64 {
    let cohort = snapshot.team(team_id).expect("team rated").cohort;
    let values: Vec<f64> = snapshot.cohort(&cohort).map(|t| t.sos).collect();
    values.iter().sum::<f64>() / values.len() as f64
}
