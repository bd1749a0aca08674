use chrono::NaiveDate;

use crate::config::{ProvisionalConfig, RecencyConfig};
use crate::game::Game;

/// Per-game weights in (0, 1] for a history ordered newest first.
///
/// The `recent_k` newest games keep a full rank factor; older ones decay
/// exponentially by rank. An age half-life multiplies in, and the product is
/// floored at `min_weight` so that no game is dropped outright.
pub fn game_weights(history: &[Game], as_of: NaiveDate, cfg: &RecencyConfig) -> Vec<f64> {
    history
        .iter()
        .enumerate()
        .map(|(idx, game)| {
            let age_days = (as_of - game.date).num_days().max(0) as f64;
            game_weight(idx, age_days, cfg)
        })
        .collect()
}

pub fn game_weight(rank_idx: usize, age_days: f64, cfg: &RecencyConfig) -> f64 {
    let rank_factor = if rank_idx < cfg.recent_k {
        1.0
    } else {
        let past = (rank_idx + 1 - cfg.recent_k) as f64;
        (-cfg.rank_decay * past).exp()
    };
    let age_factor = 0.5_f64.powf(age_days.max(0.0) / cfg.half_life_days);
    (rank_factor * age_factor).clamp(cfg.min_weight, 1.0)
}

/// Confidence in a rating given its sample size.
///
/// Smoothstep on `games / full_confidence_games`: 0 with no games, close to 0
/// for one or two, exactly 1 from the threshold on, with no jumps anywhere.
pub fn provisional_multiplier(games_played: u32, cfg: &ProvisionalConfig) -> f64 {
    let full = cfg.full_confidence_games.max(1) as f64;
    let x = (games_played as f64 / full).clamp(0.0, 1.0);
    x * x * (3.0 - 2.0 * x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_games_get_full_rank_factor() {
        let cfg = RecencyConfig::default();
        assert_eq!(game_weight(0, 0.0, &cfg), 1.0);
        assert_eq!(game_weight(cfg.recent_k - 1, 0.0, &cfg), 1.0);
        assert!(game_weight(cfg.recent_k, 0.0, &cfg) < 1.0);
    }

    #[test]
    fn weights_decay_but_never_vanish() {
        let cfg = RecencyConfig::default();
        let mut prev = f64::INFINITY;
        for idx in 0..60 {
            let w = game_weight(idx, idx as f64 * 7.0, &cfg);
            assert!(w > 0.0 && w <= 1.0);
            assert!(w <= prev);
            prev = w;
        }
        assert!(prev >= cfg.min_weight);
    }

    #[test]
    fn provisional_multiplier_is_smooth_and_bounded() {
        let cfg = ProvisionalConfig::default();
        assert_eq!(provisional_multiplier(0, &cfg), 0.0);
        assert!(provisional_multiplier(1, &cfg) < 0.05);
        assert_eq!(provisional_multiplier(cfg.full_confidence_games, &cfg), 1.0);
        assert_eq!(provisional_multiplier(40, &cfg), 1.0);

        // No step bigger than what the smoothstep slope allows.
        let full = cfg.full_confidence_games as f64;
        let max_step = 1.5 / full + 1e-9;
        for g in 0..cfg.full_confidence_games {
            let a = provisional_multiplier(g, &cfg);
            let b = provisional_multiplier(g + 1, &cfg);
            assert!(b >= a);
            assert!(b - a <= max_step);
        }
    }
}
