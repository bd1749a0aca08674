use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{EngineError, Result};
use crate::game::{AgeGroup, CohortKey, Gender, QuarantinedRecord, TeamId};
use crate::momentum::GameResidual;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    Applied { version: String },
    Unavailable { reason: String },
}

impl ModelStatus {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// One published row per rated team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRating {
    pub team_id: TeamId,
    pub cohort: CohortKey,
    pub state: Option<String>,
    pub games_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub win_percentage: f64,
    pub goals_for: u32,
    pub goals_against: u32,
    pub offense_rating: f64,
    pub defense_rating: f64,
    pub abs_strength: f64,
    pub sos: f64,
    pub sos_provisional: bool,
    pub power_score: f64,
    pub provisional_multiplier: f64,
    pub national_rank: Option<u32>,
    pub state_rank: Option<u32>,
    pub momentum_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCounts {
    pub teams: usize,
    pub ranked: usize,
    pub excluded: usize,
    pub games: usize,
    pub quarantined: usize,
    pub residuals_scored: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub calculated_at: DateTime<Utc>,
    pub as_of: NaiveDate,
    pub lookback_days: i64,
    pub config_fingerprint: String,
    pub content_fingerprint: String,
    pub model_status: ModelStatus,
    pub counts: SnapshotCounts,
}

/// Complete output of one run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub teams: Vec<TeamRating>,
    pub residuals: Vec<GameResidual>,
    pub quarantined: Vec<QuarantinedRecord>,
    /// Teams with input rows but no usable games in the window.
    pub excluded: Vec<TeamId>,
}

#[derive(Serialize)]
struct FingerprintView<'a> {
    as_of: NaiveDate,
    lookback_days: i64,
    config_fingerprint: &'a str,
    model_status: &'a ModelStatus,
    teams: &'a [TeamRating],
    residuals: &'a [GameResidual],
    quarantined: &'a [QuarantinedRecord],
    excluded: &'a [TeamId],
}

impl Snapshot {
    /// SHA-256 over everything except the calculation timestamp, so identical
    /// input and config produce identical fingerprints.
    pub fn content_digest(&self) -> Result<String> {
        let view = FingerprintView {
            as_of: self.meta.as_of,
            lookback_days: self.meta.lookback_days,
            config_fingerprint: &self.meta.config_fingerprint,
            model_status: &self.meta.model_status,
            teams: &self.teams,
            residuals: &self.residuals,
            quarantined: &self.quarantined,
            excluded: &self.excluded,
        };
        let raw = serde_json::to_vec(&view)?;
        Ok(format!("{:x}", Sha256::digest(&raw)))
    }

    pub fn seal(mut self) -> Result<Self> {
        self.meta.content_fingerprint = self.content_digest()?;
        Ok(self)
    }

    pub fn team(&self, team_id: &str) -> Option<&TeamRating> {
        self.teams.iter().find(|t| t.team_id == team_id)
    }

    pub fn cohort(&self, cohort: &CohortKey) -> impl Iterator<Item = &TeamRating> {
        self.teams.iter().filter(move |t| t.cohort == *cohort)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub snapshot_id: i64,
    pub meta: SnapshotMeta,
    pub is_current: bool,
}

/// Append-only snapshot history with a single current pointer.
pub struct SnapshotStore {
    conn: Connection,
}

impl SnapshotStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Insert every row of the snapshot and move the current pointer to it in
    /// one transaction. Prior snapshots are never touched.
    pub fn publish(&mut self, snapshot: &Snapshot) -> Result<i64> {
        let tx = self.conn.transaction()?;
        let id = insert_snapshot(&tx, snapshot)?;
        tx.execute(
            "INSERT INTO current_snapshot (slot, snapshot_id) VALUES (0, ?1)
             ON CONFLICT(slot) DO UPDATE SET snapshot_id = excluded.snapshot_id",
            params![id],
        )?;
        tx.commit()?;
        info!(
            snapshot_id = id,
            teams = snapshot.teams.len(),
            fingerprint = %snapshot.meta.content_fingerprint,
            "snapshot published"
        );
        Ok(id)
    }

    pub fn current_id(&self) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT snapshot_id FROM current_snapshot WHERE slot = 0",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn current(&self) -> Result<Option<Snapshot>> {
        match self.current_id()? {
            Some(id) => self.load(id).map(Some),
            None => Ok(None),
        }
    }

    pub fn history(&self) -> Result<Vec<SnapshotHeader>> {
        let current = self.current_id()?;
        let mut stmt = self.conn.prepare(
            "SELECT snapshot_id, meta_json FROM snapshots ORDER BY snapshot_id ASC",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            let (snapshot_id, meta_json) = row?;
            out.push(SnapshotHeader {
                snapshot_id,
                meta: serde_json::from_str(&meta_json)?,
                is_current: current == Some(snapshot_id),
            });
        }
        Ok(out)
    }

    pub fn load(&self, snapshot_id: i64) -> Result<Snapshot> {
        let meta_json: String = self
            .conn
            .query_row(
                "SELECT meta_json FROM snapshots WHERE snapshot_id = ?1",
                params![snapshot_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| EngineError::Input(format!("snapshot {snapshot_id} not found")))?;
        let meta: SnapshotMeta = serde_json::from_str(&meta_json)?;

        Ok(Snapshot {
            meta,
            teams: self.load_teams(snapshot_id)?,
            residuals: self.load_residuals(snapshot_id)?,
            quarantined: self.load_quarantined(snapshot_id)?,
            excluded: self.load_excluded(snapshot_id)?,
        })
    }

    fn load_teams(&self, snapshot_id: i64) -> Result<Vec<TeamRating>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT team_id, age_group, gender, state, games_played, wins, losses, draws,
                   win_percentage, goals_for, goals_against, offense_rating, defense_rating,
                   abs_strength, sos, sos_provisional, power_score, provisional_multiplier,
                   national_rank, state_rank, momentum_score
            FROM team_ratings
            WHERE snapshot_id = ?1
            ORDER BY position ASC
            "#,
        )?;
        let rows = stmt.query_map(params![snapshot_id], |row| {
            let gender_code: String = row.get(2)?;
            let gender = Gender::parse(&gender_code).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    format!("unknown gender {gender_code:?}").into(),
                )
            })?;
            Ok(TeamRating {
                team_id: row.get(0)?,
                cohort: CohortKey {
                    age_group: AgeGroup(row.get(1)?),
                    gender,
                },
                state: row.get(3)?,
                games_played: row.get(4)?,
                wins: row.get(5)?,
                losses: row.get(6)?,
                draws: row.get(7)?,
                win_percentage: row.get(8)?,
                goals_for: row.get(9)?,
                goals_against: row.get(10)?,
                offense_rating: row.get(11)?,
                defense_rating: row.get(12)?,
                abs_strength: row.get(13)?,
                sos: row.get(14)?,
                sos_provisional: row.get::<_, i64>(15)? != 0,
                power_score: row.get(16)?,
                provisional_multiplier: row.get(17)?,
                national_rank: row.get(18)?,
                state_rank: row.get(19)?,
                momentum_score: row.get(20)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn load_residuals(&self, snapshot_id: i64) -> Result<Vec<GameResidual>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT game_id, team_id, opponent_id, game_date, actual_margin,
                   predicted_margin, residual
            FROM game_residuals
            WHERE snapshot_id = ?1
            ORDER BY position ASC
            "#,
        )?;
        let rows = stmt.query_map(params![snapshot_id], |row| {
            Ok(GameResidual {
                game_id: row.get(0)?,
                team_id: row.get(1)?,
                opponent_id: row.get(2)?,
                date: row.get(3)?,
                actual_margin: row.get(4)?,
                predicted_margin: row.get(5)?,
                residual: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn load_quarantined(&self, snapshot_id: i64) -> Result<Vec<QuarantinedRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_json FROM quarantined_games WHERE snapshot_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![snapshot_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    fn load_excluded(&self, snapshot_id: i64) -> Result<Vec<TeamId>> {
        let mut stmt = self.conn.prepare(
            "SELECT team_id FROM excluded_teams WHERE snapshot_id = ?1 ORDER BY team_id ASC",
        )?;
        let rows = stmt.query_map(params![snapshot_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
            calculated_at TEXT NOT NULL,
            as_of TEXT NOT NULL,
            config_fingerprint TEXT NOT NULL,
            content_fingerprint TEXT NOT NULL,
            model_applied INTEGER NOT NULL,
            meta_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS team_ratings (
            snapshot_id INTEGER NOT NULL REFERENCES snapshots(snapshot_id),
            position INTEGER NOT NULL,
            team_id TEXT NOT NULL,
            age_group INTEGER NOT NULL,
            gender TEXT NOT NULL,
            state TEXT NULL,
            games_played INTEGER NOT NULL,
            wins INTEGER NOT NULL,
            losses INTEGER NOT NULL,
            draws INTEGER NOT NULL,
            win_percentage REAL NOT NULL,
            goals_for INTEGER NOT NULL,
            goals_against INTEGER NOT NULL,
            offense_rating REAL NOT NULL,
            defense_rating REAL NOT NULL,
            abs_strength REAL NOT NULL,
            sos REAL NOT NULL,
            sos_provisional INTEGER NOT NULL,
            power_score REAL NOT NULL,
            provisional_multiplier REAL NOT NULL,
            national_rank INTEGER NULL,
            state_rank INTEGER NULL,
            momentum_score REAL NULL,
            PRIMARY KEY (snapshot_id, team_id)
        );
        CREATE INDEX IF NOT EXISTS idx_team_ratings_cohort
            ON team_ratings(snapshot_id, age_group, gender, national_rank);

        CREATE TABLE IF NOT EXISTS game_residuals (
            snapshot_id INTEGER NOT NULL REFERENCES snapshots(snapshot_id),
            position INTEGER NOT NULL,
            game_id TEXT NOT NULL,
            team_id TEXT NOT NULL,
            opponent_id TEXT NOT NULL,
            game_date TEXT NOT NULL,
            actual_margin INTEGER NOT NULL,
            predicted_margin REAL NULL,
            residual REAL NULL,
            PRIMARY KEY (snapshot_id, game_id, team_id)
        );

        CREATE TABLE IF NOT EXISTS quarantined_games (
            snapshot_id INTEGER NOT NULL REFERENCES snapshots(snapshot_id),
            position INTEGER NOT NULL,
            game_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            record_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS excluded_teams (
            snapshot_id INTEGER NOT NULL REFERENCES snapshots(snapshot_id),
            team_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS current_snapshot (
            slot INTEGER PRIMARY KEY CHECK (slot = 0),
            snapshot_id INTEGER NOT NULL REFERENCES snapshots(snapshot_id)
        );
        "#,
    )?;
    Ok(())
}

fn insert_snapshot(tx: &Transaction<'_>, snapshot: &Snapshot) -> Result<i64> {
    let meta = &snapshot.meta;
    tx.execute(
        r#"
        INSERT INTO snapshots (
            calculated_at, as_of, config_fingerprint, content_fingerprint,
            model_applied, meta_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            meta.calculated_at.to_rfc3339(),
            meta.as_of.to_string(),
            meta.config_fingerprint,
            meta.content_fingerprint,
            meta.model_status.is_applied() as i64,
            serde_json::to_string(meta)?,
        ],
    )?;
    let id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare(
            r#"
            INSERT INTO team_ratings (
                snapshot_id, position, team_id, age_group, gender, state,
                games_played, wins, losses, draws, win_percentage, goals_for, goals_against,
                offense_rating, defense_rating, abs_strength, sos, sos_provisional,
                power_score, provisional_multiplier, national_rank, state_rank, momentum_score
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                ?14, ?15, ?16, ?17, ?18,
                ?19, ?20, ?21, ?22, ?23
            )
            "#,
        )?;
        for (pos, t) in snapshot.teams.iter().enumerate() {
            stmt.execute(params![
                id,
                pos as i64,
                t.team_id,
                t.cohort.age_group.years(),
                t.cohort.gender.code(),
                t.state,
                t.games_played,
                t.wins,
                t.losses,
                t.draws,
                t.win_percentage,
                t.goals_for,
                t.goals_against,
                t.offense_rating,
                t.defense_rating,
                t.abs_strength,
                t.sos,
                t.sos_provisional as i64,
                t.power_score,
                t.provisional_multiplier,
                t.national_rank,
                t.state_rank,
                t.momentum_score,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            r#"
            INSERT INTO game_residuals (
                snapshot_id, position, game_id, team_id, opponent_id, game_date,
                actual_margin, predicted_margin, residual
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )?;
        for (pos, r) in snapshot.residuals.iter().enumerate() {
            stmt.execute(params![
                id,
                pos as i64,
                r.game_id,
                r.team_id,
                r.opponent_id,
                r.date,
                r.actual_margin,
                r.predicted_margin,
                r.residual,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            r#"
            INSERT INTO quarantined_games (snapshot_id, position, game_id, reason, record_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )?;
        for (pos, q) in snapshot.quarantined.iter().enumerate() {
            stmt.execute(params![
                id,
                pos as i64,
                q.record.game_id,
                q.reason.to_string(),
                serde_json::to_string(q)?,
            ])?;
        }
    }

    {
        let mut stmt =
            tx.prepare("INSERT INTO excluded_teams (snapshot_id, team_id) VALUES (?1, ?2)")?;
        for team_id in &snapshot.excluded {
            stmt.execute(params![id, team_id])?;
        }
    }

    Ok(id)
}
