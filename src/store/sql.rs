//! SQL statements shared by the SQLite and Turso backends.
//!
//! Both speak the same dialect; keeping the text and the parameter order in
//! one place is what makes their read semantics provably identical.

use super::MatchFilter;

/// A positional statement parameter, backend-neutral.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Null,
}

impl SqlValue {
    pub fn opt_text(v: Option<&str>) -> SqlValue {
        match v {
            Some(s) => SqlValue::Text(s.to_string()),
            None => SqlValue::Null,
        }
    }

    pub fn opt_integer(v: Option<i64>) -> SqlValue {
        match v {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Null,
        }
    }
}

/// Schema bootstrap statements, in execution order.
pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT,
        updated_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS seasons (
        id TEXT PRIMARY KEY,
        name TEXT,
        start_date TEXT,
        end_date TEXT,
        data TEXT
    )",
    "CREATE TABLE IF NOT EXISTS competitions (
        id TEXT PRIMARY KEY,
        season_id TEXT,
        name TEXT,
        data TEXT
    )",
    "CREATE TABLE IF NOT EXISTS groups (
        id TEXT PRIMARY KEY,
        competition_id TEXT,
        season_id TEXT,
        name TEXT,
        type TEXT,
        data TEXT
    )",
    "CREATE TABLE IF NOT EXISTS matches (
        id TEXT PRIMARY KEY,
        season_id TEXT,
        group_id TEXT,
        competition_name TEXT,
        group_name TEXT,
        home_team_id TEXT,
        home_team_name TEXT,
        away_team_id TEXT,
        away_team_name TEXT,
        date TEXT,
        status TEXT,
        home_score INTEGER,
        away_score INTEGER,
        venue TEXT,
        venue_address TEXT,
        data TEXT
    )",
    "CREATE TABLE IF NOT EXISTS teams (
        id TEXT PRIMARY KEY,
        name TEXT,
        logo TEXT
    )",
    "CREATE TABLE IF NOT EXISTS standings (
        group_id TEXT,
        team_id TEXT,
        position INTEGER,
        data TEXT,
        PRIMARY KEY (group_id, team_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_competitions_season ON competitions(season_id)",
    "CREATE INDEX IF NOT EXISTS idx_groups_season ON groups(season_id)",
    "CREATE INDEX IF NOT EXISTS idx_groups_competition ON groups(competition_id)",
    "CREATE INDEX IF NOT EXISTS idx_matches_season ON matches(season_id)",
    "CREATE INDEX IF NOT EXISTS idx_matches_group ON matches(group_id)",
    "CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(date)",
    "CREATE INDEX IF NOT EXISTS idx_matches_status ON matches(status)",
    "CREATE INDEX IF NOT EXISTS idx_matches_home_team ON matches(home_team_id)",
    "CREATE INDEX IF NOT EXISTS idx_matches_away_team ON matches(away_team_id)",
];

/// Data tables, in clear order. Schema objects are untouched by `clear_all`.
pub const DATA_TABLES: &[&str] = &[
    "matches",
    "standings",
    "teams",
    "groups",
    "competitions",
    "seasons",
    "metadata",
];

pub const UPSERT_SEASON: &str =
    "INSERT OR REPLACE INTO seasons (id, name, start_date, end_date, data) VALUES (?, ?, ?, ?, ?)";

pub const UPSERT_COMPETITION: &str =
    "INSERT OR REPLACE INTO competitions (id, season_id, name, data) VALUES (?, ?, ?, ?)";

pub const UPSERT_GROUP: &str =
    "INSERT OR REPLACE INTO groups (id, competition_id, season_id, name, type, data) \
     VALUES (?, ?, ?, ?, ?, ?)";

pub const UPSERT_MATCH: &str = "INSERT OR REPLACE INTO matches \
    (id, season_id, group_id, competition_name, group_name, \
     home_team_id, home_team_name, away_team_id, away_team_name, \
     date, status, home_score, away_score, venue, venue_address, data) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

pub const UPSERT_TEAM: &str = "INSERT OR REPLACE INTO teams (id, name, logo) VALUES (?, ?, ?)";

pub const UPSERT_STANDING: &str =
    "INSERT OR REPLACE INTO standings (group_id, team_id, position, data) VALUES (?, ?, ?, ?)";

pub const UPSERT_METADATA: &str =
    "INSERT OR REPLACE INTO metadata (key, value, updated_at) VALUES (?, ?, ?)";

pub const SELECT_METADATA: &str = "SELECT value FROM metadata WHERE key = ?";

pub const SELECT_SEASONS: &str =
    "SELECT id, name, start_date, end_date, data FROM seasons ORDER BY name DESC, id";

pub const SELECT_COMPETITIONS: &str =
    "SELECT id, season_id, data FROM competitions WHERE season_id = ? ORDER BY name, id";

pub const SELECT_ALL_COMPETITIONS: &str =
    "SELECT id, season_id, data FROM competitions ORDER BY name, id";

pub const SELECT_GROUP_CONTEXT: &str =
    "SELECT competition_id, season_id, name FROM groups WHERE id = ?";

pub const SELECT_COMPETITION_NAME: &str = "SELECT name FROM competitions WHERE id = ?";

pub const SELECT_TEAMS: &str = "SELECT id, name, logo FROM teams ORDER BY name, id";

pub const SELECT_TEAMS_BY_SEASON: &str = "SELECT DISTINCT t.id, t.name, t.logo FROM teams t \
     JOIN matches m ON (m.home_team_id = t.id OR m.away_team_id = t.id) \
     WHERE m.season_id = ? ORDER BY t.name, t.id";

pub const SELECT_TEAMS_BY_GROUP: &str = "SELECT DISTINCT t.id, t.name, t.logo FROM teams t \
     JOIN matches m ON (m.home_team_id = t.id OR m.away_team_id = t.id) \
     WHERE m.group_id = ? ORDER BY t.name, t.id";

pub const SEARCH_TEAMS: &str =
    "SELECT id, name, logo FROM teams WHERE name LIKE ? ORDER BY name, id";

pub const SEARCH_TEAMS_BY_SEASON: &str = "SELECT DISTINCT t.id, t.name, t.logo FROM teams t \
     JOIN matches m ON (m.home_team_id = t.id OR m.away_team_id = t.id) \
     WHERE t.name LIKE ? AND m.season_id = ? ORDER BY t.name, t.id";

pub const SELECT_STANDINGS: &str = "SELECT group_id, team_id, position, data FROM standings \
     WHERE group_id = ? ORDER BY position, team_id";

pub const SELECT_GROUP_IDS: &str = "SELECT id FROM groups ORDER BY id";

pub const SELECT_TEAM_IDS: &str = "SELECT id FROM teams ORDER BY id";

pub const MATCH_COLUMNS: &str = "id, season_id, group_id, competition_name, group_name, \
     home_team_id, home_team_name, away_team_id, away_team_name, \
     date, status, home_score, away_score, venue, venue_address, data";

pub fn like_pattern(needle: &str) -> String {
    format!("%{}%", needle)
}

/// Translates a [`MatchFilter`] into one SELECT with positional parameters.
///
/// ASC puts NULL dates first, which is the contract's ordering for undated
/// matches; id breaks ties deterministically.
pub fn build_match_query(filter: &MatchFilter) -> (String, Vec<SqlValue>) {
    let mut sql = format!("SELECT {} FROM matches WHERE 1=1", MATCH_COLUMNS);
    let mut params: Vec<SqlValue> = Vec::new();

    if let Some(season_id) = &filter.season_id {
        sql.push_str(" AND season_id = ?");
        params.push(SqlValue::Text(season_id.clone()));
    }
    if let Some(name) = &filter.competition_name {
        sql.push_str(" AND competition_name LIKE ?");
        params.push(SqlValue::Text(like_pattern(name)));
    }
    if let Some(team_id) = &filter.team_id {
        sql.push_str(" AND (home_team_id = ? OR away_team_id = ?)");
        params.push(SqlValue::Text(team_id.clone()));
        params.push(SqlValue::Text(team_id.clone()));
    } else if let Some(team_name) = filter.effective_team_name() {
        sql.push_str(" AND (home_team_name LIKE ? OR away_team_name LIKE ?)");
        let pattern = like_pattern(team_name);
        params.push(SqlValue::Text(pattern.clone()));
        params.push(SqlValue::Text(pattern));
    }
    if let Some(group_id) = &filter.group_id {
        sql.push_str(" AND group_id = ?");
        params.push(SqlValue::Text(group_id.clone()));
    }
    if let Some(status) = &filter.status {
        sql.push_str(" AND status = ?");
        params.push(SqlValue::Text(status.as_str().to_string()));
    }
    if let Some(from) = &filter.date_from {
        sql.push_str(" AND date >= ?");
        params.push(SqlValue::Text(from.clone()));
    }
    if let Some(to) = &filter.date_to {
        sql.push_str(" AND date <= ?");
        params.push(SqlValue::Text(to.clone()));
    }

    sql.push_str(" ORDER BY date ASC, id ASC");

    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(limit as i64));
    }

    (sql, params)
}
