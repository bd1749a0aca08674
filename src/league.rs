use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::adjust::GameAdjustments;
use crate::config::EngineConfig;
use crate::game::{CohortKey, Game, GameOutcome, TeamDescriptor, TeamId};
use crate::prepare::PreparedGames;
use crate::recency::game_weights;

/// One game as the rating math sees it.
#[derive(Debug, Clone)]
pub struct WeightedGame {
    pub game: Game,
    pub weight: f64,
    /// Clipped, home-adjusted goals.
    pub goals_for: f64,
    pub goals_against: f64,
}

#[derive(Debug, Clone)]
pub struct TeamSchedule {
    pub team: TeamDescriptor,
    /// Newest first.
    pub games: Vec<WeightedGame>,
}

impl TeamSchedule {
    pub fn games_played(&self) -> u32 {
        self.games.len() as u32
    }

    pub fn record(&self) -> WinLossDraw {
        let mut out = WinLossDraw::default();
        for wg in &self.games {
            match wg.game.outcome() {
                GameOutcome::Win => out.wins += 1,
                GameOutcome::Loss => out.losses += 1,
                GameOutcome::Draw => out.draws += 1,
            }
            out.goals_for = out.goals_for.saturating_add(wg.game.goals_for);
            out.goals_against = out.goals_against.saturating_add(wg.game.goals_against);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WinLossDraw {
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub goals_for: u32,
    pub goals_against: u32,
}

impl WinLossDraw {
    /// Draws count as half a win.
    pub fn win_percentage(&self) -> f64 {
        let n = self.wins + self.losses + self.draws;
        if n == 0 {
            return 0.0;
        }
        (self.wins as f64 + 0.5 * self.draws as f64) / n as f64 * 100.0
    }
}

/// The rated population of one run: every team with at least one usable game.
#[derive(Debug, Clone, Default)]
pub struct League {
    pub as_of: NaiveDate,
    pub schedules: BTreeMap<TeamId, TeamSchedule>,
    pub cohorts: BTreeMap<CohortKey, Vec<TeamId>>,
    /// Teams known to the run that ended up with no usable games.
    pub excluded: Vec<TeamId>,
}

impl League {
    pub fn build(
        prepared: &PreparedGames,
        as_of: NaiveDate,
        cfg: &EngineConfig,
        adjustments: &GameAdjustments,
    ) -> Self {
        let mut league = League {
            as_of,
            ..Default::default()
        };

        for (team_id, team) in &prepared.teams {
            let history: Vec<Game> = prepared
                .histories
                .get(team_id)
                .map(|h| h.iter().filter(|g| adjustments.include(g)).cloned().collect())
                .unwrap_or_default();
            if history.is_empty() {
                league.excluded.push(team_id.clone());
                continue;
            }

            let weights = game_weights(&history, as_of, &cfg.recency);
            let games = history
                .into_iter()
                .zip(weights)
                .map(|(game, weight)| {
                    let (goals_for, goals_against) =
                        adjustments.effective_goals(&game, cfg.rating.max_goal_diff);
                    WeightedGame {
                        game,
                        weight,
                        goals_for,
                        goals_against,
                    }
                })
                .collect();

            league
                .cohorts
                .entry(team.cohort)
                .or_default()
                .push(team_id.clone());
            league.schedules.insert(
                team_id.clone(),
                TeamSchedule {
                    team: team.clone(),
                    games,
                },
            );
        }

        debug!(
            teams = league.schedules.len(),
            cohorts = league.cohorts.len(),
            excluded = league.excluded.len(),
            "league built"
        );
        league
    }

    pub fn cohort_of(&self, team_id: &str) -> Option<CohortKey> {
        self.schedules.get(team_id).map(|s| s.team.cohort)
    }

    pub fn team_ids(&self) -> Vec<TeamId> {
        self.schedules.keys().cloned().collect()
    }

    /// Mean absolute clipped goal margin over every game perspective in a cohort.
    pub fn mean_abs_margin(&self, cohort: &CohortKey, max_goal_diff: u32) -> f64 {
        let Some(ids) = self.cohorts.get(cohort) else {
            return 0.0;
        };
        let mut sum = 0.0;
        let mut n = 0usize;
        for id in ids {
            for wg in &self.schedules[id].games {
                sum += wg.game.clipped_margin(max_goal_diff).abs();
                n += 1;
            }
        }
        if n == 0 { 0.0 } else { sum / n as f64 }
    }
}
