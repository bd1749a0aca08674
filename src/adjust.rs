//! Pluggable treatment of forfeits and home-field advantage.
//!
//! The engine never assumes every game is a fully competitive neutral-site
//! result; it asks these policies instead.

use crate::config::{AdjustmentConfig, ForfeitMode};
use crate::game::{Game, Venue};

/// Decides whether a game feeds the ratings at all.
pub trait ForfeitPolicy: Send + Sync {
    fn include(&self, game: &Game) -> bool;
}

/// Goals of home edge removed from one side's observed margin.
pub trait HomeFieldModel: Send + Sync {
    /// Positive values mean the team in `game` enjoyed an edge worth that many goals.
    fn home_edge(&self, game: &Game) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeepForfeits;

impl ForfeitPolicy for KeepForfeits {
    fn include(&self, _game: &Game) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExcludeForfeits;

impl ForfeitPolicy for ExcludeForfeits {
    fn include(&self, game: &Game) -> bool {
        !game.context.forfeit
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHomeAdvantage;

impl HomeFieldModel for NoHomeAdvantage {
    fn home_edge(&self, _game: &Game) -> f64 {
        0.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConstantHomeAdvantage {
    pub goals: f64,
}

impl HomeFieldModel for ConstantHomeAdvantage {
    fn home_edge(&self, game: &Game) -> f64 {
        if game.context.neutral_site {
            return 0.0;
        }
        match game.venue {
            Venue::Home => self.goals,
            Venue::Away => -self.goals,
            Venue::Neutral => 0.0,
        }
    }
}

/// The policies in force for one run.
pub struct GameAdjustments {
    forfeits: Box<dyn ForfeitPolicy>,
    home_field: Box<dyn HomeFieldModel>,
}

impl GameAdjustments {
    pub fn new(forfeits: Box<dyn ForfeitPolicy>, home_field: Box<dyn HomeFieldModel>) -> Self {
        Self {
            forfeits,
            home_field,
        }
    }

    pub fn from_config(cfg: &AdjustmentConfig) -> Self {
        let forfeits: Box<dyn ForfeitPolicy> = match cfg.forfeits {
            ForfeitMode::Keep => Box::new(KeepForfeits),
            ForfeitMode::Exclude => Box::new(ExcludeForfeits),
        };
        let home_field: Box<dyn HomeFieldModel> = if cfg.home_advantage_goals > 0.0 {
            Box::new(ConstantHomeAdvantage {
                goals: cfg.home_advantage_goals,
            })
        } else {
            Box::new(NoHomeAdvantage)
        };
        Self::new(forfeits, home_field)
    }

    pub fn include(&self, game: &Game) -> bool {
        self.forfeits.include(game)
    }

    /// Goals for/against after margin clipping and home-edge removal.
    ///
    /// The margin is capped at `max_goal_diff` by trimming the winner's goals;
    /// the home edge is split evenly across both sides and neither side goes
    /// below zero.
    pub fn effective_goals(&self, game: &Game, max_goal_diff: u32) -> (f64, f64) {
        let cap = max_goal_diff;
        let (mut gf, mut ga) = (game.goals_for, game.goals_against);
        if gf > ga.saturating_add(cap) {
            gf = ga.saturating_add(cap);
        } else if ga > gf.saturating_add(cap) {
            ga = gf.saturating_add(cap);
        }
        let half_edge = self.home_field.home_edge(game) / 2.0;
        let gf = (gf as f64 - half_edge).max(0.0);
        let ga = (ga as f64 + half_edge).max(0.0);
        (gf, ga)
    }
}

impl Default for GameAdjustments {
    fn default() -> Self {
        Self::new(Box::new(KeepForfeits), Box::new(NoHomeAdvantage))
    }
}

impl std::fmt::Debug for GameAdjustments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameAdjustments").finish_non_exhaustive()
    }
}
