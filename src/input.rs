//! Loading the per-run input tables.
//!
//! The engine reads a games table and a teams table that upstream identity
//! resolution has already deduplicated. Both SQLite and JSON are accepted.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, params};
use tracing::info;

use crate::game::{RawGameRecord, RawTeamRecord};
use crate::prepare::EngineInput;

pub fn open_input_db(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("open input db {}", path.display()))
}

/// Schema expected by [`load_sqlite_input`]; also used to build fixtures.
pub fn init_input_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS games (
            game_id TEXT NOT NULL,
            team_id TEXT NOT NULL,
            opponent_id TEXT NOT NULL,
            age_group TEXT NULL,
            gender TEXT NULL,
            goals_for INTEGER NOT NULL,
            goals_against INTEGER NOT NULL,
            game_date TEXT NOT NULL,
            venue TEXT NULL,
            forfeit INTEGER NOT NULL DEFAULT 0,
            neutral_site INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_games_team ON games(team_id);
        CREATE INDEX IF NOT EXISTS idx_games_date ON games(game_date);

        CREATE TABLE IF NOT EXISTS teams (
            team_id TEXT PRIMARY KEY,
            age_group TEXT NULL,
            gender TEXT NULL,
            state TEXT NULL
        );
        "#,
    )
    .context("create input schema")?;
    Ok(())
}

pub fn insert_input(conn: &mut Connection, input: &EngineInput) -> Result<()> {
    let tx = conn.transaction().context("begin input transaction")?;
    {
        let mut games = tx
            .prepare(
                r#"
                INSERT INTO games (
                    game_id, team_id, opponent_id, age_group, gender,
                    goals_for, goals_against, game_date, venue, forfeit, neutral_site
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )
            .context("prepare game insert")?;
        for g in &input.games {
            games
                .execute(params![
                    g.game_id,
                    g.team_id,
                    g.opponent_id,
                    g.age_group,
                    g.gender,
                    g.goals_for,
                    g.goals_against,
                    g.date,
                    g.venue,
                    g.forfeit as i64,
                    g.neutral_site as i64,
                ])
                .with_context(|| format!("insert game {}", g.game_id))?;
        }

        let mut teams = tx
            .prepare(
                "INSERT OR REPLACE INTO teams (team_id, age_group, gender, state) VALUES (?1, ?2, ?3, ?4)",
            )
            .context("prepare team insert")?;
        for t in &input.teams {
            teams
                .execute(params![t.team_id, t.age_group, t.gender, t.state])
                .with_context(|| format!("insert team {}", t.team_id))?;
        }
    }
    tx.commit().context("commit input transaction")?;
    Ok(())
}

/// Read every row once, before any computation starts. Malformed values are
/// kept as-is so validation can quarantine them per record.
pub fn load_sqlite_input(conn: &Connection) -> Result<EngineInput> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT game_id, team_id, opponent_id, age_group, gender,
                   goals_for, goals_against, game_date, venue, forfeit, neutral_site
            FROM games
            ORDER BY game_id ASC, team_id ASC
            "#,
        )
        .context("prepare load games query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(RawGameRecord {
                game_id: row.get(0)?,
                team_id: row.get(1)?,
                opponent_id: row.get(2)?,
                age_group: row.get(3)?,
                gender: row.get(4)?,
                goals_for: row.get(5)?,
                goals_against: row.get(6)?,
                date: row.get(7)?,
                venue: row.get(8)?,
                forfeit: row.get::<_, i64>(9)? != 0,
                neutral_site: row.get::<_, i64>(10)? != 0,
            })
        })
        .context("query load games")?;
    let mut games = Vec::new();
    for row in rows {
        games.push(row.context("decode game row")?);
    }

    let mut stmt = conn
        .prepare("SELECT team_id, age_group, gender, state FROM teams ORDER BY team_id ASC")
        .context("prepare load teams query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(RawTeamRecord {
                team_id: row.get(0)?,
                age_group: row.get(1)?,
                gender: row.get(2)?,
                state: row.get(3)?,
            })
        })
        .context("query load teams")?;
    let mut teams = Vec::new();
    for row in rows {
        teams.push(row.context("decode team row")?);
    }

    info!(games = games.len(), teams = teams.len(), "input loaded");
    Ok(EngineInput { games, teams })
}

pub fn load_input(path: &Path) -> Result<EngineInput> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        load_json_input(path)
    } else {
        let conn = open_input_db(path)?;
        load_sqlite_input(&conn)
    }
}

pub fn load_json_input(path: &Path) -> Result<EngineInput> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read input file {}", path.display()))?;
    let input: EngineInput = serde_json::from_str(&raw)
        .with_context(|| format!("parse input file {}", path.display()))?;
    info!(
        games = input.games.len(),
        teams = input.teams.len(),
        "input loaded"
    );
    Ok(input)
}
