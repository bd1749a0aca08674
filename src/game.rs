use std::fmt;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

pub type TeamId = String;

/// Highest goal count one side may report before the row is quarantined.
pub const MAX_GOALS: u32 = 99;

/// Youth age group, stored as the "under" number (U14 -> 14).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgeGroup(pub u8);

impl AgeGroup {
    /// Accepts "U14", "u14", "U-14", "14", "2010"-style birth years are rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim().to_ascii_uppercase();
        let digits = s
            .strip_prefix('U')
            .map(|rest| rest.trim_start_matches(['-', ' ']))
            .unwrap_or(s.as_str());
        let n = digits.parse::<u8>().ok()?;
        if (6..=23).contains(&n) {
            Some(Self(n))
        } else {
            None
        }
    }

    pub fn years(self) -> u8 {
        self.0
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "m" | "male" | "boys" | "boy" | "b" => Some(Self::Male),
            "f" | "female" | "girls" | "girl" | "g" => Some(Self::Female),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
        }
    }
}

/// Partition key for normalization and national ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CohortKey {
    pub age_group: AgeGroup,
    pub gender: Gender,
}

impl fmt::Display for CohortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.age_group, self.gender.code())
    }
}

/// Partition key for state ranks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateCohortKey {
    pub cohort: CohortKey,
    pub state: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Venue {
    Home,
    Away,
    Neutral,
}

impl Venue {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "home" | "h" => Some(Self::Home),
            "away" | "a" => Some(Self::Away),
            "neutral" | "n" => Some(Self::Neutral),
            _ => None,
        }
    }

    pub fn mirrored(self) -> Self {
        match self {
            Self::Home => Self::Away,
            Self::Away => Self::Home,
            Self::Neutral => Self::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameContext {
    pub forfeit: bool,
    pub neutral_site: bool,
}

/// One validated game from one team's perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub game_id: String,
    pub team_id: TeamId,
    pub opponent_id: TeamId,
    pub cohort: CohortKey,
    pub goals_for: u32,
    pub goals_against: u32,
    pub date: NaiveDate,
    pub venue: Venue,
    pub context: GameContext,
}

impl Game {
    /// The same game seen from the opponent's side.
    pub fn mirror(&self, opponent_cohort: CohortKey) -> Self {
        Self {
            game_id: self.game_id.clone(),
            team_id: self.opponent_id.clone(),
            opponent_id: self.team_id.clone(),
            cohort: opponent_cohort,
            goals_for: self.goals_against,
            goals_against: self.goals_for,
            date: self.date,
            venue: self.venue.mirrored(),
            context: self.context,
        }
    }

    pub fn margin(&self) -> i64 {
        self.goals_for as i64 - self.goals_against as i64
    }

    /// Goal margin clipped to `±max_goal_diff`.
    pub fn clipped_margin(&self, max_goal_diff: u32) -> f64 {
        let cap = max_goal_diff as i64;
        self.margin().clamp(-cap, cap) as f64
    }

    pub fn outcome(&self) -> GameOutcome {
        match self.goals_for.cmp(&self.goals_against) {
            std::cmp::Ordering::Greater => GameOutcome::Win,
            std::cmp::Ordering::Less => GameOutcome::Loss,
            std::cmp::Ordering::Equal => GameOutcome::Draw,
        }
    }

    pub fn is_same_result(&self, other: &Game) -> bool {
        self.goals_for == other.goals_for
            && self.goals_against == other.goals_against
            && self.opponent_id == other.opponent_id
            && self.date == other.date
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    Win,
    Loss,
    Draw,
}

/// Loosely typed input row as handed over by identity resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGameRecord {
    pub game_id: String,
    pub team_id: String,
    pub opponent_id: String,
    #[serde(default)]
    pub age_group: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    pub goals_for: i64,
    pub goals_against: i64,
    pub date: String,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub forfeit: bool,
    #[serde(default)]
    pub neutral_site: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamDescriptor {
    pub team_id: TeamId,
    pub cohort: CohortKey,
    #[serde(default)]
    pub state: Option<String>,
}

/// Team row as it arrives from upstream, before cohort fields are checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTeamRecord {
    pub team_id: String,
    #[serde(default)]
    pub age_group: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl RawTeamRecord {
    pub fn to_descriptor(&self) -> Option<TeamDescriptor> {
        if self.team_id.trim().is_empty() {
            return None;
        }
        let age_group = AgeGroup::parse(self.age_group.as_deref()?)?;
        let gender = Gender::parse(self.gender.as_deref()?)?;
        let state = self
            .state
            .as_deref()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty());
        Some(TeamDescriptor {
            team_id: self.team_id.trim().to_string(),
            cohort: CohortKey { age_group, gender },
            state,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuarantineReason {
    MissingField(String),
    NegativeGoals,
    GoalsOutOfRange,
    InvalidAgeGroup(String),
    InvalidGender(String),
    InvalidDate(String),
    InvalidVenue(String),
    SelfPlay,
    /// The opponent's perspective reports a different result.
    MirrorMismatch,
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(name) => write!(f, "missing field {name}"),
            Self::NegativeGoals => write!(f, "negative goals"),
            Self::GoalsOutOfRange => write!(f, "goal count out of range"),
            Self::InvalidAgeGroup(raw) => write!(f, "invalid age group {raw:?}"),
            Self::InvalidGender(raw) => write!(f, "invalid gender {raw:?}"),
            Self::InvalidDate(raw) => write!(f, "invalid date {raw:?}"),
            Self::InvalidVenue(raw) => write!(f, "invalid venue {raw:?}"),
            Self::SelfPlay => write!(f, "team listed as its own opponent"),
            Self::MirrorMismatch => write!(f, "mirrored perspective disagrees"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedRecord {
    pub record: RawGameRecord,
    pub reason: QuarantineReason,
}

/// Turn one raw row into a game, or explain why it can't be used.
pub fn validate_record(raw: &RawGameRecord) -> Result<Game, QuarantineReason> {
    let game_id = raw.game_id.trim();
    if game_id.is_empty() {
        return Err(QuarantineReason::MissingField("game_id".into()));
    }
    let team_id = raw.team_id.trim();
    if team_id.is_empty() {
        return Err(QuarantineReason::MissingField("team_id".into()));
    }
    let opponent_id = raw.opponent_id.trim();
    if opponent_id.is_empty() {
        return Err(QuarantineReason::MissingField("opponent_id".into()));
    }
    if team_id == opponent_id {
        return Err(QuarantineReason::SelfPlay);
    }
    if raw.goals_for < 0 || raw.goals_against < 0 {
        return Err(QuarantineReason::NegativeGoals);
    }
    let goals_for = u32::try_from(raw.goals_for)
        .ok()
        .filter(|g| *g <= MAX_GOALS)
        .ok_or(QuarantineReason::GoalsOutOfRange)?;
    let goals_against = u32::try_from(raw.goals_against)
        .ok()
        .filter(|g| *g <= MAX_GOALS)
        .ok_or(QuarantineReason::GoalsOutOfRange)?;

    let age_raw = raw
        .age_group
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| QuarantineReason::MissingField("age_group".into()))?;
    let age_group =
        AgeGroup::parse(age_raw).ok_or_else(|| QuarantineReason::InvalidAgeGroup(age_raw.into()))?;
    let gender_raw = raw
        .gender
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| QuarantineReason::MissingField("gender".into()))?;
    let gender = Gender::parse(gender_raw)
        .ok_or_else(|| QuarantineReason::InvalidGender(gender_raw.into()))?;

    let date = parse_game_date(&raw.date)
        .ok_or_else(|| QuarantineReason::InvalidDate(raw.date.clone()))?;

    let mut venue = match raw.venue.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(v) => Venue::parse(v).ok_or_else(|| QuarantineReason::InvalidVenue(v.into()))?,
        None => Venue::Neutral,
    };
    if raw.neutral_site {
        venue = Venue::Neutral;
    }

    Ok(Game {
        game_id: game_id.to_string(),
        team_id: team_id.to_string(),
        opponent_id: opponent_id.to_string(),
        cohort: CohortKey { age_group, gender },
        goals_for,
        goals_against,
        date,
        venue,
        context: GameContext {
            forfeit: raw.forfeit,
            neutral_site: raw.neutral_site,
        },
    })
}

/// Plain dates, or RFC 3339 timestamps truncated to their date.
pub fn parse_game_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    let prefix = s.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}
