mod common;

use powerscore::config::EngineConfig;

use common::{InputBuilder, cohort_mean_sos, run};

fn connected_pool(b: &mut InputBuilder) -> Vec<String> {
    let states = ["CA", "NV", "TX", "AZ"];
    let ids: Vec<String> = (0..16).map(|i| format!("open-{i:02}")).collect();
    for (i, id) in ids.iter().enumerate() {
        b.team(id, "U14", "F", Some(states[i % states.len()]));
    }
    for i in 0..16 {
        for step in 1..=8 {
            let j = (i + step) % 16;
            let gf = ((i * 7 + j * 3) % 4) as i64;
            let ga = ((i * 5 + j) % 3) as i64;
            b.game(&ids[i], &ids[j], gf, ga, (3 + i * 11 + step * 17) as i64);
        }
    }
    ids
}

#[test]
fn closed_cluster_cannot_inflate_its_schedule() {
    let mut b = InputBuilder::new();
    connected_pool(&mut b);
    for id in ["bubble-a", "bubble-b", "bubble-c"] {
        b.team(id, "U14", "F", Some("OR"));
    }
    // High-scoring games among themselves make all three look strong.
    let pairs = [("bubble-a", "bubble-b"), ("bubble-b", "bubble-c"), ("bubble-c", "bubble-a")];
    for round in 0..6 {
        for (k, (x, y)) in pairs.iter().enumerate() {
            b.game(x, y, 6, 5, (4 + round * 20 + k * 3) as i64);
        }
    }

    let cfg = EngineConfig::default();
    let snapshot = run(&b.build(), &cfg);
    let mean = cohort_mean_sos(&snapshot, "bubble-a");
    for id in ["bubble-a", "bubble-b", "bubble-c"] {
        let t = snapshot.team(id).expect("bubble team rated");
        assert!(t.sos <= cfg.sos.isolation_cap, "{id} sos {}", t.sos);
        assert!(t.sos < mean, "{id} sos {} vs cohort mean {mean}", t.sos);
    }
}

#[test]
fn isolation_cap_holds_with_more_propagation_passes() {
    let mut b = InputBuilder::new();
    let ids = connected_pool(&mut b);
    b.team("pair-x", "U14", "F", Some("CA"))
        .team("pair-y", "U14", "F", Some("CA"));
    for round in 0..8 {
        b.game("pair-x", "pair-y", 7, 6, (2 + round * 9) as i64);
    }
    // One game against the pool is not enough connectivity.
    b.game("pair-x", &ids[0], 3, 0, 40);

    let mut cfg = EngineConfig::default();
    cfg.sos.iterations = 8;
    let snapshot = run(&b.build(), &cfg);
    for id in ["pair-x", "pair-y"] {
        let t = snapshot.team(id).expect("rated");
        assert!(t.sos <= cfg.sos.isolation_cap);
        assert!(t.sos < cohort_mean_sos(&snapshot, id));
    }
}

#[test]
fn stronger_schedule_wins_on_equal_results() {
    let mut b = InputBuilder::new();
    let strong: Vec<String> = (0..6).map(|i| format!("s{i}")).collect();
    let weak: Vec<String> = (0..6).map(|i| format!("w{i}")).collect();
    for id in strong.iter().chain(weak.iter()) {
        b.team(id, "U14", "F", Some("CA"));
    }
    b.team("team-a", "U14", "F", Some("CA"))
        .team("team-b", "U14", "F", Some("CA"));

    let mut day = 3;
    for i in 0..6 {
        for j in (i + 1)..6 {
            b.game(&strong[i], &strong[j], 1, 1, day);
            b.game(&weak[i], &weak[j], 1, 1, day + 1);
            day += 2;
        }
        for w in &weak {
            b.game(&strong[i], w, 4, 0, day);
            day += 1;
        }
    }

    let results = [(2, 1), (1, 1), (1, 2), (3, 1), (0, 1)];
    for k in 0..20 {
        let (gf, ga) = results[k % results.len()];
        let days_ago = (5 + 7 * k) as i64;
        b.game("team-a", &strong[k % 6], gf, ga, days_ago);
        b.game("team-b", &weak[k % 6], gf, ga, days_ago);
    }

    let snapshot = run(&b.build(), &EngineConfig::default());
    let a = snapshot.team("team-a").expect("a rated");
    let bb = snapshot.team("team-b").expect("b rated");
    assert_eq!(a.games_played, 20);
    assert_eq!(bb.games_played, 20);
    assert_eq!((a.goals_for, a.goals_against), (bb.goals_for, bb.goals_against));
    assert!(a.sos > bb.sos, "sos {} vs {}", a.sos, bb.sos);
    assert!(a.power_score > bb.power_score);
    assert!(a.national_rank < bb.national_rank);
}

#[test]
fn unknown_opponents_are_neutral_not_penalised() {
    let mut b = InputBuilder::new();
    connected_pool(&mut b);
    b.team("newcomer", "U14", "F", Some("CA"));
    for k in 0..6 {
        // Opponents with no team row and no records of their own.
        b.game("newcomer", &format!("unlisted-{k}"), 2, 2, (10 + k * 5) as i64);
    }
    let snapshot = run(&b.build(), &EngineConfig::default());
    let t = snapshot.team("newcomer").expect("rated");
    assert_eq!(t.sos, 0.5);
    assert!(t.sos_provisional);
    assert!(snapshot.team("unlisted-0").is_none());
}

#[test]
fn small_samples_shrink_toward_the_cohort() {
    let mut b = InputBuilder::new();
    let ids = connected_pool(&mut b);
    b.team("one-game", "U14", "F", Some("CA"))
        .team("veteran", "U14", "F", Some("CA"));
    // Same opponent, same scoreline every time: identical raw composites.
    b.game("one-game", &ids[3], 9, 0, 8);
    for k in 0..20 {
        b.game("veteran", &ids[3], 9, 0, (8 + 6 * k) as i64);
    }
    let snapshot = run(&b.build(), &EngineConfig::default());
    let rookie = snapshot.team("one-game").expect("rated");
    let veteran = snapshot.team("veteran").expect("rated");
    assert!(rookie.provisional_multiplier < 0.05);
    assert_eq!(veteran.provisional_multiplier, 1.0);
    assert!((rookie.offense_rating - veteran.offense_rating).abs() < 1e-9);
    assert!((rookie.sos - veteran.sos).abs() < 1e-9);

    let cohort: Vec<f64> = snapshot.cohort(&rookie.cohort).map(|r| r.power_score).collect();
    let mean = cohort.iter().sum::<f64>() / cohort.len() as f64;
    assert!(veteran.power_score > mean);
    assert!((rookie.power_score - mean).abs() < (veteran.power_score - mean).abs());
    assert!(rookie.power_score < veteran.power_score);
}
