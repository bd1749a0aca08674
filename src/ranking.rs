//! Dense rank assignment within cohort and state partitions.
//!
//! Ordering key: power score descending, then games played descending, then
//! team id ascending. Two teams share a rank only when both power score and
//! games played are exactly equal; team id only fixes the listing order.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::game::{CohortKey, StateCohortKey, TeamId};

#[derive(Debug, Clone, PartialEq)]
pub struct RankCandidate {
    pub team_id: TeamId,
    pub cohort: CohortKey,
    pub state: Option<String>,
    pub power_score: f64,
    pub games_played: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ranks {
    pub national: Option<u32>,
    pub state: Option<u32>,
}

pub fn rank_order(a: &RankCandidate, b: &RankCandidate) -> Ordering {
    b.power_score
        .total_cmp(&a.power_score)
        .then(b.games_played.cmp(&a.games_played))
        .then(a.team_id.cmp(&b.team_id))
}

fn same_rank(a: &RankCandidate, b: &RankCandidate) -> bool {
    a.power_score.total_cmp(&b.power_score) == Ordering::Equal && a.games_played == b.games_played
}

/// Dense ranks for one partition, in rank order.
pub fn dense_ranks(mut members: Vec<&RankCandidate>) -> Vec<(TeamId, u32)> {
    members.sort_by(|a, b| rank_order(a, b));
    let mut out = Vec::with_capacity(members.len());
    let mut rank = 0u32;
    let mut prev: Option<&RankCandidate> = None;
    for c in members {
        if prev.is_none_or(|p| !same_rank(p, c)) {
            rank += 1;
        }
        out.push((c.team_id.clone(), rank));
        prev = Some(c);
    }
    out
}

/// National ranks within (age, gender) and state ranks within (age, gender,
/// state). Candidates below `min_games` get no rank; teams without a state get
/// no state rank.
pub fn assign_ranks(candidates: &[RankCandidate], min_games: u32) -> BTreeMap<TeamId, Ranks> {
    let mut out: BTreeMap<TeamId, Ranks> = candidates
        .iter()
        .map(|c| (c.team_id.clone(), Ranks::default()))
        .collect();

    let eligible = candidates
        .iter()
        .filter(|c| c.games_played > 0 && c.games_played >= min_games);

    let mut national: BTreeMap<CohortKey, Vec<&RankCandidate>> = BTreeMap::new();
    let mut by_state: BTreeMap<StateCohortKey, Vec<&RankCandidate>> = BTreeMap::new();
    for c in eligible {
        national.entry(c.cohort).or_default().push(c);
        if let Some(state) = &c.state {
            by_state
                .entry(StateCohortKey {
                    cohort: c.cohort,
                    state: state.clone(),
                })
                .or_default()
                .push(c);
        }
    }

    for members in national.into_values() {
        for (id, rank) in dense_ranks(members) {
            if let Some(r) = out.get_mut(&id) {
                r.national = Some(rank);
            }
        }
    }
    for members in by_state.into_values() {
        for (id, rank) in dense_ranks(members) {
            if let Some(r) = out.get_mut(&id) {
                r.state = Some(rank);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{AgeGroup, Gender};

    fn cand(id: &str, power: f64, games: u32, state: Option<&str>) -> RankCandidate {
        RankCandidate {
            team_id: id.to_string(),
            cohort: CohortKey {
                age_group: AgeGroup(14),
                gender: Gender::Female,
            },
            state: state.map(str::to_string),
            power_score: power,
            games_played: games,
        }
    }

    #[test]
    fn tie_on_power_broken_by_games_played() {
        let ranks = assign_ranks(
            &[
                cand("a", 0.7, 10, Some("CA")),
                cand("b", 0.7, 12, Some("CA")),
                cand("c", 0.9, 5, Some("CA")),
            ],
            1,
        );
        assert_eq!(ranks["c"].national, Some(1));
        assert_eq!(ranks["b"].national, Some(2));
        assert_eq!(ranks["a"].national, Some(3));
    }

    #[test]
    fn exact_ties_share_a_dense_rank() {
        let ranks = assign_ranks(
            &[
                cand("x", 0.6, 8, None),
                cand("y", 0.6, 8, None),
                cand("z", 0.5, 8, None),
            ],
            1,
        );
        assert_eq!(ranks["x"].national, Some(1));
        assert_eq!(ranks["y"].national, Some(1));
        assert_eq!(ranks["z"].national, Some(2));
        assert_eq!(ranks["x"].state, None);
    }

    #[test]
    fn state_ranks_are_partitioned() {
        let ranks = assign_ranks(
            &[
                cand("a", 0.9, 10, Some("CA")),
                cand("b", 0.8, 10, Some("TX")),
                cand("c", 0.7, 10, Some("CA")),
            ],
            1,
        );
        assert_eq!(ranks["b"].national, Some(2));
        assert_eq!(ranks["b"].state, Some(1));
        assert_eq!(ranks["c"].state, Some(2));
    }

    #[test]
    fn below_min_games_is_unranked() {
        let ranks = assign_ranks(&[cand("a", 0.9, 2, Some("CA")), cand("b", 0.1, 0, None)], 3);
        assert_eq!(ranks["a"], Ranks::default());
        assert_eq!(ranks["b"], Ranks::default());
    }

    #[test]
    fn order_is_input_independent() {
        let mut list = vec![
            cand("a", 0.5, 3, None),
            cand("b", 0.5, 3, None),
            cand("c", 0.4, 9, None),
        ];
        let first = assign_ranks(&list, 1);
        list.reverse();
        assert_eq!(first, assign_ranks(&list, 1));
    }
}
