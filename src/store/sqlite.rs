//! Embedded SQLite backend: the reference implementation of the contract.
//!
//! File-backed with WAL journaling; batch writes run inside one transaction.
//! Also opens in-memory databases for tests.

use super::sql::{self, SqlValue};
use super::{CacheInfo, CacheTtls, MatchFilter, Store, TableStats};
use super::{META_LAST_MATCH_SCRAPE, META_LAST_SCRAPE};
use crate::error::StoreError;
use crate::model::{
    Calendar, Competition, CompetitionRecord, Match, MatchStatus, Season, Standing, StandingEntry,
    Team,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::ToSqlOutput;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlValue::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
            SqlValue::Integer(i) => Ok(ToSqlOutput::from(*i)),
            SqlValue::Null => Ok(ToSqlOutput::Owned(rusqlite::types::Value::Null)),
        }
    }
}

/// SQLite-backed store. The connection is serialized behind a mutex; every
/// operation is short-lived, so contention is not a concern at this scale.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) a file-backed database in WAL mode.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        // journal_mode returns a row; the value is "memory" for :memory: dbs
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
        info!(path = %path.display(), "opened sqlite store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private throwaway database, used by tests and conformance checks.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn set_metadata(conn: &Connection, key: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        conn.execute(sql::UPSERT_METADATA, params![key, now, now])?;
        Ok(())
    }

    fn get_metadata_time(
        conn: &Connection,
        key: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let value: Option<String> = conn
            .query_row(sql::SELECT_METADATA, params![key], |row| row.get(0))
            .optional()?;
        match value {
            Some(v) => {
                let parsed = DateTime::parse_from_rfc3339(&v).map_err(|e| {
                    StoreError::Query(format!("corrupt timestamp under {}: {}", key, e))
                })?;
                Ok(Some(parsed.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }

    fn count(conn: &Connection, table: &str) -> Result<u64, StoreError> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })?;
        Ok(n as u64)
    }

    fn write_calendar(
        conn: &mut Connection,
        group_id: &str,
        calendar: &Calendar,
        competition_name: &str,
        group_name: &str,
        season_id: &str,
    ) -> Result<usize, StoreError> {
        let extracted = calendar.extract(group_id, competition_name, group_name, season_id);
        let tx = conn.transaction()?;
        for team in &extracted.teams {
            tx.execute(
                sql::UPSERT_TEAM,
                params![team.id, team.name, team.logo],
            )?;
        }
        for m in &extracted.matches {
            let payload = serde_json::to_string(&m.payload)?;
            tx.execute(
                sql::UPSERT_MATCH,
                params![
                    m.id,
                    m.season_id,
                    m.group_id,
                    m.competition_name,
                    m.group_name,
                    m.home_team_id,
                    m.home_team_name,
                    m.away_team_id,
                    m.away_team_name,
                    m.date,
                    m.status.map(|s| s.as_str()),
                    m.home_score,
                    m.away_score,
                    m.venue,
                    m.venue_address,
                    payload,
                ],
            )?;
        }
        tx.commit()?;
        debug!(
            group_id,
            matches = extracted.matches.len(),
            teams = extracted.teams.len(),
            "wrote calendar"
        );
        Ok(extracted.matches.len())
    }

    fn teams_from_rows(
        conn: &Connection,
        query: &str,
        params: &[SqlValue],
    ) -> Result<Vec<Team>, StoreError> {
        let mut stmt = conn.prepare(query)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            Ok(Team {
                id: row.get(0)?,
                name: row.get(1)?,
                logo: row.get(2)?,
            })
        })?;
        let mut teams = Vec::new();
        for row in rows {
            teams.push(row?);
        }
        Ok(teams)
    }
}

fn match_from_columns(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<(Match, Option<String>, Option<String>)> {
    let m = Match {
        id: row.get(0)?,
        season_id: row.get(1)?,
        group_id: row.get(2)?,
        competition_name: row.get(3)?,
        group_name: row.get(4)?,
        home_team_id: row.get(5)?,
        home_team_name: row.get(6)?,
        away_team_id: row.get(7)?,
        away_team_name: row.get(8)?,
        date: row.get(9)?,
        status: None,
        home_score: row.get(11)?,
        away_score: row.get(12)?,
        venue: row.get(13)?,
        venue_address: row.get(14)?,
        payload: Value::Null,
    };
    let status: Option<String> = row.get(10)?;
    let data: Option<String> = row.get(15)?;
    Ok((m, status, data))
}

#[async_trait]
impl Store for SqliteStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        for stmt in sql::SCHEMA {
            conn.execute(stmt, [])?;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    async fn save_seasons(&self, seasons: &[Season]) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for season in seasons {
            let data = serde_json::to_string(season)?;
            tx.execute(
                sql::UPSERT_SEASON,
                params![season.id, season.name, season.start_date, season.end_date, data],
            )?;
        }
        tx.commit()?;
        Ok(seasons.len())
    }

    async fn save_competitions(
        &self,
        season_id: &str,
        competitions: &[Competition],
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for comp in competitions {
            let comp_id = comp.storage_id(season_id);
            let data = serde_json::to_string(comp)?;
            tx.execute(
                sql::UPSERT_COMPETITION,
                params![comp_id, season_id, comp.name, data],
            )?;
            for group in &comp.groups {
                let group_data = serde_json::to_string(group)?;
                tx.execute(
                    sql::UPSERT_GROUP,
                    params![group.id, comp_id, season_id, group.name, group.kind, group_data],
                )?;
            }
        }
        tx.commit()?;
        Ok(competitions.len())
    }

    async fn save_matches(
        &self,
        group_id: &str,
        calendar: &Calendar,
        competition_name: &str,
        group_name: &str,
        season_id: &str,
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        Self::write_calendar(
            &mut conn,
            group_id,
            calendar,
            competition_name,
            group_name,
            season_id,
        )
    }

    async fn save_matches_only(
        &self,
        group_id: &str,
        calendar: &Calendar,
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let context: Option<(Option<String>, Option<String>, Option<String>)> = conn
            .query_row(sql::SELECT_GROUP_CONTEXT, params![group_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .optional()?;
        let (competition_id, season_id, group_name) = context
            .ok_or_else(|| StoreError::Query(format!("unknown group: {}", group_id)))?;

        let competition_name: Option<String> = match &competition_id {
            Some(id) => conn
                .query_row(sql::SELECT_COMPETITION_NAME, params![id], |row| row.get(0))
                .optional()?,
            None => None,
        };

        Self::write_calendar(
            &mut conn,
            group_id,
            calendar,
            competition_name.as_deref().unwrap_or_default(),
            group_name.as_deref().unwrap_or_default(),
            season_id.as_deref().unwrap_or_default(),
        )
    }

    async fn save_standings(
        &self,
        group_id: &str,
        entries: &[StandingEntry],
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut written = 0;
        for entry in entries {
            let Some(team_id) = &entry.team_id else {
                continue;
            };
            let data = serde_json::to_string(entry)?;
            tx.execute(
                sql::UPSERT_STANDING,
                params![group_id, team_id, entry.position, data],
            )?;
            written += 1;
        }
        tx.commit()?;
        Ok(written)
    }

    async fn update_scrape_timestamp(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        Self::set_metadata(&conn, META_LAST_SCRAPE)
    }

    async fn update_match_scrape_timestamp(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        Self::set_metadata(&conn, META_LAST_MATCH_SCRAPE)
    }

    async fn get_seasons(&self) -> Result<Vec<Season>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql::SELECT_SEASONS)?;
        let rows = stmt.query_map([], |row| {
            let data: Option<String> = row.get(4)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                data,
            ))
        })?;
        let mut seasons = Vec::new();
        for row in rows {
            let (id, name, start_date, end_date, data) = row?;
            let season = match data {
                Some(json) => serde_json::from_str(&json)?,
                None => Season {
                    id,
                    name: name.unwrap_or_default(),
                    start_date,
                    end_date,
                    extra: Default::default(),
                },
            };
            seasons.push(season);
        }
        Ok(seasons)
    }

    async fn get_competitions(&self, season_id: &str) -> Result<Vec<Competition>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql::SELECT_COMPETITIONS)?;
        let rows = stmt.query_map(params![season_id], |row| {
            row.get::<_, Option<String>>(2)
        })?;
        let mut competitions = Vec::new();
        for row in rows {
            if let Some(json) = row? {
                competitions.push(serde_json::from_str(&json)?);
            }
        }
        Ok(competitions)
    }

    async fn get_all_competitions(&self) -> Result<Vec<CompetitionRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql::SELECT_ALL_COMPETITIONS)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (season_id, data) = row?;
            if let Some(json) = data {
                records.push(CompetitionRecord {
                    season_id: season_id.unwrap_or_default(),
                    competition: serde_json::from_str(&json)?,
                });
            }
        }
        Ok(records)
    }

    async fn get_matches(&self, filter: &MatchFilter) -> Result<Vec<Match>, StoreError> {
        let (query, params) = sql::build_match_query(filter);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), match_from_columns)?;
        let mut matches = Vec::new();
        for row in rows {
            let (mut m, status, data) = row?;
            m.status = status.as_deref().and_then(MatchStatus::parse);
            if let Some(json) = data {
                m.payload = serde_json::from_str(&json)?;
            }
            matches.push(m);
        }
        Ok(matches)
    }

    async fn get_teams(&self, season_id: Option<&str>) -> Result<Vec<Team>, StoreError> {
        let conn = self.conn.lock();
        match season_id {
            Some(season_id) => Self::teams_from_rows(
                &conn,
                sql::SELECT_TEAMS_BY_SEASON,
                &[SqlValue::Text(season_id.to_string())],
            ),
            None => Self::teams_from_rows(&conn, sql::SELECT_TEAMS, &[]),
        }
    }

    async fn get_teams_by_group(&self, group_id: &str) -> Result<Vec<Team>, StoreError> {
        let conn = self.conn.lock();
        Self::teams_from_rows(
            &conn,
            sql::SELECT_TEAMS_BY_GROUP,
            &[SqlValue::Text(group_id.to_string())],
        )
    }

    async fn search_teams(
        &self,
        query: &str,
        season_id: Option<&str>,
    ) -> Result<Vec<Team>, StoreError> {
        let conn = self.conn.lock();
        let pattern = sql::like_pattern(query);
        match season_id {
            Some(season_id) => Self::teams_from_rows(
                &conn,
                sql::SEARCH_TEAMS_BY_SEASON,
                &[
                    SqlValue::Text(pattern),
                    SqlValue::Text(season_id.to_string()),
                ],
            ),
            None => Self::teams_from_rows(&conn, sql::SEARCH_TEAMS, &[SqlValue::Text(pattern)]),
        }
    }

    async fn get_standings(&self, group_id: &str) -> Result<Vec<Standing>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql::SELECT_STANDINGS)?;
        let rows = stmt.query_map(params![group_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;
        let mut standings = Vec::new();
        for row in rows {
            let (group_id, team_id, position, data) = row?;
            let payload = match data {
                Some(json) => serde_json::from_str(&json)?,
                None => Value::Null,
            };
            standings.push(Standing {
                group_id,
                team_id,
                position,
                payload,
            });
        }
        Ok(standings)
    }

    async fn get_cache_info(&self, ttls: &CacheTtls) -> Result<CacheInfo, StoreError> {
        let conn = self.conn.lock();
        let last_updated = Self::get_metadata_time(&conn, META_LAST_SCRAPE)?;
        let match_last_updated = Self::get_metadata_time(&conn, META_LAST_MATCH_SCRAPE)?;
        let stats = TableStats {
            seasons: Self::count(&conn, "seasons")?,
            competitions: Self::count(&conn, "competitions")?,
            groups: Self::count(&conn, "groups")?,
            matches: Self::count(&conn, "matches")?,
            teams: Self::count(&conn, "teams")?,
            standings: Self::count(&conn, "standings")?,
        };
        Ok(CacheInfo::build(
            Utc::now(),
            last_updated,
            match_last_updated,
            ttls,
            stats,
        ))
    }

    async fn get_all_group_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql::SELECT_GROUP_IDS)?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    async fn get_all_team_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql::SELECT_TEAM_IDS)?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for table in sql::DATA_TABLES {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }
        tx.commit()?;
        info!("cleared all stored data");
        Ok(())
    }

    async fn vacuum(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("VACUUM", [])?;
        Ok(())
    }

    async fn get_database_size(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let size: i64 = conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )?;
        Ok(size.max(0) as u64)
    }
}
