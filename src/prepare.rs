use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::game::{
    Game, QuarantineReason, QuarantinedRecord, RawGameRecord, RawTeamRecord, TeamDescriptor,
    TeamId, validate_record,
};

/// Everything handed to the engine for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineInput {
    pub games: Vec<RawGameRecord>,
    #[serde(default)]
    pub teams: Vec<RawTeamRecord>,
}

/// Validated, windowed, mirrored game histories.
#[derive(Debug, Clone, Default)]
pub struct PreparedGames {
    pub teams: BTreeMap<TeamId, TeamDescriptor>,
    /// Newest first; ties broken by game id.
    pub histories: BTreeMap<TeamId, Vec<Game>>,
    pub quarantined: Vec<QuarantinedRecord>,
    pub out_of_window: usize,
    pub mirrored: usize,
}

/// Validate, window, and mirror the raw input.
///
/// A game inside `(as_of - lookback_days, as_of]` is kept. Missing opponent
/// perspectives are synthesised only for opponents the run knows about (a
/// team row or any record of their own); games against unknown opponents
/// stay in the team's history with no mirror.
pub fn prepare_games(input: &EngineInput, as_of: NaiveDate, lookback_days: i64) -> PreparedGames {
    let mut out = PreparedGames::default();

    for raw in &input.teams {
        match raw.to_descriptor() {
            Some(desc) => {
                out.teams.insert(desc.team_id.clone(), desc);
            }
            None => warn!(team_id = %raw.team_id, "skipping team row with invalid cohort fields"),
        }
    }

    let window_start = as_of - Duration::days(lookback_days);
    let mut valid: Vec<(usize, Game)> = Vec::with_capacity(input.games.len());
    for (idx, raw) in input.games.iter().enumerate() {
        match validate_record(raw) {
            Ok(game) => {
                if game.date <= window_start || game.date > as_of {
                    out.out_of_window += 1;
                    continue;
                }
                valid.push((idx, game));
            }
            Err(reason) => {
                debug!(game_id = %raw.game_id, %reason, "quarantined game record");
                out.quarantined.push(QuarantinedRecord {
                    record: raw.clone(),
                    reason,
                });
            }
        }
    }

    // Teams with a row of their own in the input are known even without a descriptor.
    let mut known: BTreeSet<TeamId> = out.teams.keys().cloned().collect();
    known.extend(valid.iter().map(|(_, g)| g.team_id.clone()));

    let mut by_key: BTreeMap<(String, TeamId), Game> = BTreeMap::new();
    let mut rejected: BTreeSet<String> = BTreeSet::new();
    for (idx, game) in &valid {
        let key = (game.game_id.clone(), game.team_id.clone());
        match by_key.get(&key) {
            Some(existing) if existing.is_same_result(game) => {}
            Some(_) => {
                rejected.insert(game.game_id.clone());
                out.quarantined.push(QuarantinedRecord {
                    record: input.games[*idx].clone(),
                    reason: QuarantineReason::MirrorMismatch,
                });
            }
            None => {
                by_key.insert(key, game.clone());
            }
        }
    }

    // A perspective that contradicts its mirror poisons the whole game.
    for (idx, game) in &valid {
        let mirror_key = (game.game_id.clone(), game.opponent_id.clone());
        let Some(mirror) = by_key.get(&mirror_key) else {
            continue;
        };
        let consistent = mirror.goals_for == game.goals_against
            && mirror.goals_against == game.goals_for
            && mirror.opponent_id == game.team_id
            && mirror.date == game.date;
        if !consistent && rejected.insert(game.game_id.clone()) {
            out.quarantined.push(QuarantinedRecord {
                record: input.games[*idx].clone(),
                reason: QuarantineReason::MirrorMismatch,
            });
        }
    }
    by_key.retain(|(game_id, _), _| !rejected.contains(game_id));

    let mut mirrors = Vec::new();
    for ((game_id, _), game) in &by_key {
        if !known.contains(&game.opponent_id) {
            continue;
        }
        if by_key.contains_key(&(game_id.clone(), game.opponent_id.clone())) {
            continue;
        }
        let opponent_cohort = out
            .teams
            .get(&game.opponent_id)
            .map(|d| d.cohort)
            .unwrap_or(game.cohort);
        mirrors.push(game.mirror(opponent_cohort));
    }
    out.mirrored = mirrors.len();
    for m in mirrors {
        by_key.insert((m.game_id.clone(), m.team_id.clone()), m);
    }

    for (_, game) in by_key {
        if !out.teams.contains_key(&game.team_id) {
            out.teams.insert(
                game.team_id.clone(),
                TeamDescriptor {
                    team_id: game.team_id.clone(),
                    cohort: game.cohort,
                    state: None,
                },
            );
        }
        out.histories.entry(game.team_id.clone()).or_default().push(game);
    }

    for history in out.histories.values_mut() {
        history.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.game_id.cmp(&b.game_id)));
    }

    debug!(
        teams = out.teams.len(),
        histories = out.histories.len(),
        quarantined = out.quarantined.len(),
        out_of_window = out.out_of_window,
        mirrored = out.mirrored,
        "prepared games"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(game_id: &str, team: &str, opp: &str, gf: i64, ga: i64, date: &str) -> RawGameRecord {
        RawGameRecord {
            game_id: game_id.into(),
            team_id: team.into(),
            opponent_id: opp.into(),
            age_group: Some("U14".into()),
            gender: Some("F".into()),
            goals_for: gf,
            goals_against: ga,
            date: date.into(),
            venue: None,
            forfeit: false,
            neutral_site: false,
        }
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[test]
    fn mirrors_single_perspective_games() {
        let input = EngineInput {
            games: vec![
                rec("g1", "a", "b", 2, 1, "2025-05-01"),
                rec("g2", "b", "a", 0, 0, "2025-05-02"),
            ],
            teams: Vec::new(),
        };
        let p = prepare_games(&input, as_of(), 365);
        assert_eq!(p.mirrored, 2);
        let b = &p.histories["b"];
        assert_eq!(b.len(), 2);
        // Newest first.
        assert_eq!(b[0].game_id, "g2");
        assert_eq!(b[1].goals_for, 1);
    }

    #[test]
    fn duplicate_perspectives_collapse() {
        let input = EngineInput {
            games: vec![
                rec("g1", "a", "b", 2, 1, "2025-05-01"),
                rec("g1", "b", "a", 1, 2, "2025-05-01"),
                rec("g1", "a", "b", 2, 1, "2025-05-01"),
            ],
            teams: Vec::new(),
        };
        let p = prepare_games(&input, as_of(), 365);
        assert_eq!(p.mirrored, 0);
        assert_eq!(p.histories["a"].len(), 1);
        assert_eq!(p.histories["b"].len(), 1);
        assert!(p.quarantined.is_empty());
    }

    #[test]
    fn contradicting_mirror_quarantines_game() {
        let input = EngineInput {
            games: vec![
                rec("g1", "a", "b", 2, 1, "2025-05-01"),
                rec("g1", "b", "a", 3, 0, "2025-05-01"),
                rec("g2", "a", "b", 1, 1, "2025-05-03"),
            ],
            teams: Vec::new(),
        };
        let p = prepare_games(&input, as_of(), 365);
        assert!(p.quarantined.iter().all(|q| q.reason == QuarantineReason::MirrorMismatch));
        assert!(!p.quarantined.is_empty());
        assert_eq!(p.histories["a"].len(), 1);
        assert_eq!(p.histories["a"][0].game_id, "g2");
    }

    #[test]
    fn bad_rows_are_quarantined_not_fatal() {
        let mut bad = rec("g9", "a", "c", -2, 1, "2025-05-01");
        bad.gender = None;
        let input = EngineInput {
            games: vec![bad, rec("g1", "a", "b", 2, 1, "2025-05-01")],
            teams: Vec::new(),
        };
        let p = prepare_games(&input, as_of(), 365);
        assert_eq!(p.quarantined.len(), 1);
        assert_eq!(p.histories["a"].len(), 1);
    }

    #[test]
    fn lookback_window_drops_old_and_future_games() {
        let input = EngineInput {
            games: vec![
                rec("old", "a", "b", 2, 1, "2023-01-01"),
                rec("future", "a", "b", 2, 1, "2025-07-01"),
                rec("ok", "a", "b", 2, 1, "2025-01-01"),
            ],
            teams: Vec::new(),
        };
        let p = prepare_games(&input, as_of(), 365);
        assert_eq!(p.out_of_window, 2);
        assert_eq!(p.histories["a"].len(), 1);
    }

    #[test]
    fn unknown_opponents_get_no_mirror() {
        let input = EngineInput {
            games: vec![rec("g1", "a", "ghost", 2, 1, "2025-05-01")],
            teams: vec![RawTeamRecord {
                team_id: "a".into(),
                age_group: Some("U14".into()),
                gender: Some("F".into()),
                state: Some("ca".into()),
            }],
        };
        let p = prepare_games(&input, as_of(), 365);
        assert!(!p.histories.contains_key("ghost"));
        assert_eq!(p.teams["a"].state.as_deref(), Some("CA"));
    }
}
