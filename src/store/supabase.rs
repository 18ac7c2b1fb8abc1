//! Supabase backend: the storage contract over PostgREST.
//!
//! Writes are batched upserts chunked at 500 rows with
//! `Prefer: resolution=merge-duplicates`; reads translate the filter
//! vocabulary into PostgREST query parameters (`ilike`, `or=(...)`,
//! `order=date.asc.nullsfirst`). The schema is provisioned out-of-band;
//! `initialize` only verifies that every table answers.

use super::{CacheInfo, CacheTtls, MatchFilter, Store, TableStats};
use super::{META_LAST_MATCH_SCRAPE, META_LAST_SCRAPE};
use crate::config::SupabaseConfig;
use crate::error::StoreError;
use crate::model::{
    Calendar, Competition, CompetitionRecord, Match, MatchStatus, Season, Standing, StandingEntry,
    Team,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info};

/// PostgREST rejects oversized request bodies; the original service settled
/// on this chunk size.
const BATCH_SIZE: usize = 500;
const ESTIMATED_ROW_BYTES: u64 = 500;
const DATA_TABLES: &[&str] = &["matches", "standings", "teams", "groups", "competitions", "seasons"];

#[derive(Debug, Serialize, Deserialize)]
struct MatchRow {
    id: String,
    season_id: String,
    group_id: String,
    competition_name: String,
    group_name: String,
    home_team_id: Option<String>,
    home_team_name: Option<String>,
    away_team_id: Option<String>,
    away_team_name: Option<String>,
    date: Option<String>,
    status: Option<String>,
    home_score: Option<i64>,
    away_score: Option<i64>,
    venue: Option<String>,
    venue_address: Option<String>,
    data: Value,
}

impl From<&Match> for MatchRow {
    fn from(m: &Match) -> Self {
        MatchRow {
            id: m.id.clone(),
            season_id: m.season_id.clone(),
            group_id: m.group_id.clone(),
            competition_name: m.competition_name.clone(),
            group_name: m.group_name.clone(),
            home_team_id: m.home_team_id.clone(),
            home_team_name: m.home_team_name.clone(),
            away_team_id: m.away_team_id.clone(),
            away_team_name: m.away_team_name.clone(),
            date: m.date.clone(),
            status: m.status.map(|s| s.as_str().to_string()),
            home_score: m.home_score,
            away_score: m.away_score,
            venue: m.venue.clone(),
            venue_address: m.venue_address.clone(),
            data: m.payload.clone(),
        }
    }
}

impl From<MatchRow> for Match {
    fn from(r: MatchRow) -> Self {
        Match {
            id: r.id,
            season_id: r.season_id,
            group_id: r.group_id,
            competition_name: r.competition_name,
            group_name: r.group_name,
            home_team_id: r.home_team_id,
            home_team_name: r.home_team_name,
            away_team_id: r.away_team_id,
            away_team_name: r.away_team_name,
            date: r.date,
            status: r.status.as_deref().and_then(MatchStatus::parse),
            home_score: r.home_score,
            away_score: r.away_score,
            venue: r.venue,
            venue_address: r.venue_address,
            payload: r.data,
        }
    }
}

fn ilike_pattern(needle: &str) -> String {
    format!("*{}*", needle)
}

pub struct SupabaseStore {
    client: reqwest::Client,
    base_url: String,
    key: String,
}

impl SupabaseStore {
    pub fn new(cfg: &SupabaseConfig) -> Result<Self, StoreError> {
        if cfg.url.is_empty() || cfg.key.is_empty() {
            return Err(StoreError::Configuration(
                "supabase backend requires url and key".to_string(),
            ));
        }
        let base = cfg.url.trim_end_matches('/').to_string();
        info!(url = %base, "configured supabase store");
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: format!("{}/rest/v1", base),
            key: cfg.key.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, table))
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let text = resp.text().await.unwrap_or_default();
            Err(StoreError::Query(format!(
                "postgrest returned {}: {}",
                status, text
            )))
        }
    }

    /// Chunked upsert; `on_conflict` names the key columns.
    async fn upsert(
        &self,
        table: &str,
        on_conflict: &str,
        rows: &[Value],
    ) -> Result<(), StoreError> {
        for chunk in rows.chunks(BATCH_SIZE) {
            let resp = self
                .request(reqwest::Method::POST, table)
                .query(&[("on_conflict", on_conflict)])
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(&chunk)
                .send()
                .await?;
            Self::check(resp).await?;
        }
        debug!(table, rows = rows.len(), "upserted rows");
        Ok(())
    }

    async fn select(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<Value>, StoreError> {
        let resp = self
            .request(reqwest::Method::GET, table)
            .query(query)
            .send()
            .await?;
        let rows: Vec<Value> = Self::check(resp).await?.json().await?;
        Ok(rows)
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let resp = self
            .request(reqwest::Method::GET, table)
            .query(&[("select", "id"), ("limit", "1")])
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        let total = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(total)
    }

    async fn set_metadata(&self, key: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.upsert(
            "metadata",
            "key",
            &[json!({"key": key, "value": now, "updated_at": now})],
        )
        .await
    }

    async fn get_metadata_time(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let rows = self
            .select(
                "metadata",
                &[("select", "value".to_string()), ("key", format!("eq.{}", key))],
            )
            .await?;
        match rows.first().and_then(|r| r.get("value")).and_then(Value::as_str) {
            Some(v) => {
                let parsed = DateTime::parse_from_rfc3339(v).map_err(|e| {
                    StoreError::Query(format!("corrupt timestamp under {}: {}", key, e))
                })?;
                Ok(Some(parsed.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }

    async fn write_calendar(
        &self,
        group_id: &str,
        calendar: &Calendar,
        competition_name: &str,
        group_name: &str,
        season_id: &str,
    ) -> Result<usize, StoreError> {
        let extracted = calendar.extract(group_id, competition_name, group_name, season_id);

        let team_rows: Vec<Value> = extracted
            .teams
            .iter()
            .map(|t| json!({"id": t.id, "name": t.name, "logo": t.logo}))
            .collect();
        self.upsert("teams", "id", &team_rows).await?;

        let match_rows = extracted
            .matches
            .iter()
            .map(|m| serde_json::to_value(MatchRow::from(m)))
            .collect::<Result<Vec<Value>, _>>()?;
        self.upsert("matches", "id", &match_rows).await?;

        Ok(extracted.matches.len())
    }

    /// Team ids seen in the matches satisfying `query`, deduped.
    async fn team_ids_in_matches(
        &self,
        query: &[(&str, String)],
    ) -> Result<HashSet<String>, StoreError> {
        let mut params = vec![("select", "home_team_id,away_team_id".to_string())];
        params.extend_from_slice(query);
        let rows = self.select("matches", &params).await?;
        let mut ids = HashSet::new();
        for row in rows {
            for col in ["home_team_id", "away_team_id"] {
                if let Some(id) = row.get(col).and_then(Value::as_str) {
                    ids.insert(id.to_string());
                }
            }
        }
        Ok(ids)
    }

    /// Looks up team rows by id, name ascending. PostgREST cannot join on an
    /// OR condition, so the two-step fetch replaces the SQL backends' join.
    async fn teams_by_ids(&self, ids: &HashSet<String>) -> Result<Vec<Team>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut sorted: Vec<&str> = ids.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        let rows = self
            .select(
                "teams",
                &[
                    ("select", "*".to_string()),
                    ("id", format!("in.({})", sorted.join(","))),
                    ("order", "name.asc,id.asc".to_string()),
                ],
            )
            .await?;
        rows.into_iter()
            .map(|r| serde_json::from_value(r).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl Store for SupabaseStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        // Provisioned out-of-band; verify every table answers.
        for table in DATA_TABLES.iter().chain(std::iter::once(&"metadata")) {
            let resp = self
                .request(reqwest::Method::GET, table)
                .query(&[("select", "*"), ("limit", "1")])
                .send()
                .await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(StoreError::Schema(format!(
                    "table {} not reachable: {} {}",
                    table, status, text
                )));
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let resp = self
            .request(reqwest::Method::GET, "metadata")
            .query(&[("select", "key"), ("limit", "1")])
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn save_seasons(&self, seasons: &[Season]) -> Result<usize, StoreError> {
        let rows = seasons
            .iter()
            .map(|s| {
                Ok(json!({
                    "id": s.id,
                    "name": s.name,
                    "start_date": s.start_date,
                    "end_date": s.end_date,
                    "data": serde_json::to_value(s)?,
                }))
            })
            .collect::<Result<Vec<Value>, StoreError>>()?;
        self.upsert("seasons", "id", &rows).await?;
        Ok(seasons.len())
    }

    async fn save_competitions(
        &self,
        season_id: &str,
        competitions: &[Competition],
    ) -> Result<usize, StoreError> {
        let mut comp_rows = Vec::new();
        let mut group_rows = Vec::new();
        for comp in competitions {
            let comp_id = comp.storage_id(season_id);
            comp_rows.push(json!({
                "id": comp_id,
                "season_id": season_id,
                "name": comp.name,
                "data": serde_json::to_value(comp)?,
            }));
            for group in &comp.groups {
                group_rows.push(json!({
                    "id": group.id,
                    "competition_id": comp_id,
                    "season_id": season_id,
                    "name": group.name,
                    "type": group.kind,
                    "data": serde_json::to_value(group)?,
                }));
            }
        }
        self.upsert("competitions", "id", &comp_rows).await?;
        self.upsert("groups", "id", &group_rows).await?;
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
        self.write_calendar(group_id, calendar, competition_name, group_name, season_id)
            .await
    }

    async fn save_matches_only(
        &self,
        group_id: &str,
        calendar: &Calendar,
    ) -> Result<usize, StoreError> {
        let rows = self
            .select(
                "groups",
                &[
                    ("select", "competition_id,season_id,name".to_string()),
                    ("id", format!("eq.{}", group_id)),
                ],
            )
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| StoreError::Query(format!("unknown group: {}", group_id)))?;
        let season_id = row
            .get("season_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let group_name = row
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let competition_name = match row.get("competition_id").and_then(Value::as_str) {
            Some(comp_id) => {
                let comps = self
                    .select(
                        "competitions",
                        &[
                            ("select", "name".to_string()),
                            ("id", format!("eq.{}", comp_id)),
                        ],
                    )
                    .await?;
                comps
                    .first()
                    .and_then(|c| c.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            }
            None => String::new(),
        };

        self.write_calendar(group_id, calendar, &competition_name, &group_name, &season_id)
            .await
    }

    async fn save_standings(
        &self,
        group_id: &str,
        entries: &[StandingEntry],
    ) -> Result<usize, StoreError> {
        let mut rows = Vec::new();
        for entry in entries {
            let Some(team_id) = &entry.team_id else {
                continue;
            };
            rows.push(json!({
                "group_id": group_id,
                "team_id": team_id,
                "position": entry.position,
                "data": serde_json::to_value(entry)?,
            }));
        }
        let written = rows.len();
        self.upsert("standings", "group_id,team_id", &rows).await?;
        Ok(written)
    }

    async fn update_scrape_timestamp(&self) -> Result<(), StoreError> {
        self.set_metadata(META_LAST_SCRAPE).await
    }

    async fn update_match_scrape_timestamp(&self) -> Result<(), StoreError> {
        self.set_metadata(META_LAST_MATCH_SCRAPE).await
    }

    async fn get_seasons(&self) -> Result<Vec<Season>, StoreError> {
        let rows = self
            .select(
                "seasons",
                &[
                    ("select", "data".to_string()),
                    ("order", "name.desc,id.asc".to_string()),
                ],
            )
            .await?;
        rows.into_iter()
            .filter_map(|mut r| r.get_mut("data").map(Value::take))
            .map(|data| serde_json::from_value(data).map_err(StoreError::from))
            .collect()
    }

    async fn get_competitions(&self, season_id: &str) -> Result<Vec<Competition>, StoreError> {
        let rows = self
            .select(
                "competitions",
                &[
                    ("select", "data".to_string()),
                    ("season_id", format!("eq.{}", season_id)),
                    ("order", "name.asc,id.asc".to_string()),
                ],
            )
            .await?;
        rows.into_iter()
            .filter_map(|mut r| r.get_mut("data").map(Value::take))
            .map(|data| serde_json::from_value(data).map_err(StoreError::from))
            .collect()
    }

    async fn get_all_competitions(&self) -> Result<Vec<CompetitionRecord>, StoreError> {
        let rows = self
            .select(
                "competitions",
                &[
                    ("select", "season_id,data".to_string()),
                    ("order", "name.asc,id.asc".to_string()),
                ],
            )
            .await?;
        let mut records = Vec::new();
        for mut row in rows {
            let season_id = row
                .get("season_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if let Some(data) = row.get_mut("data").map(Value::take) {
                records.push(CompetitionRecord {
                    season_id,
                    competition: serde_json::from_value(data)?,
                });
            }
        }
        Ok(records)
    }

    async fn get_matches(&self, filter: &MatchFilter) -> Result<Vec<Match>, StoreError> {
        let mut params: Vec<(&str, String)> = vec![("select", "*".to_string())];

        if let Some(season_id) = &filter.season_id {
            params.push(("season_id", format!("eq.{}", season_id)));
        }
        if let Some(name) = &filter.competition_name {
            params.push(("competition_name", format!("ilike.{}", ilike_pattern(name))));
        }
        if let Some(team_id) = &filter.team_id {
            params.push((
                "or",
                format!("(home_team_id.eq.{id},away_team_id.eq.{id})", id = team_id),
            ));
        } else if let Some(team_name) = filter.effective_team_name() {
            let pattern = ilike_pattern(team_name);
            params.push((
                "or",
                format!(
                    "(home_team_name.ilike.{p},away_team_name.ilike.{p})",
                    p = pattern
                ),
            ));
        }
        if let Some(group_id) = &filter.group_id {
            params.push(("group_id", format!("eq.{}", group_id)));
        }
        if let Some(status) = &filter.status {
            params.push(("status", format!("eq.{}", status.as_str())));
        }
        if let Some(from) = &filter.date_from {
            params.push(("date", format!("gte.{}", from)));
        }
        if let Some(to) = &filter.date_to {
            params.push(("date", format!("lte.{}", to)));
        }

        params.push(("order", "date.asc.nullsfirst,id.asc".to_string()));
        if let Some(limit) = filter.limit {
            params.push(("limit", limit.to_string()));
        }

        let rows = self.select("matches", &params).await?;
        rows.into_iter()
            .map(|r| {
                serde_json::from_value::<MatchRow>(r)
                    .map(Match::from)
                    .map_err(StoreError::from)
            })
            .collect()
    }

    async fn get_teams(&self, season_id: Option<&str>) -> Result<Vec<Team>, StoreError> {
        match season_id {
            Some(season_id) => {
                let ids = self
                    .team_ids_in_matches(&[("season_id", format!("eq.{}", season_id))])
                    .await?;
                self.teams_by_ids(&ids).await
            }
            None => {
                let rows = self
                    .select(
                        "teams",
                        &[
                            ("select", "*".to_string()),
                            ("order", "name.asc,id.asc".to_string()),
                        ],
                    )
                    .await?;
                rows.into_iter()
                    .map(|r| serde_json::from_value(r).map_err(StoreError::from))
                    .collect()
            }
        }
    }

    async fn get_teams_by_group(&self, group_id: &str) -> Result<Vec<Team>, StoreError> {
        let ids = self
            .team_ids_in_matches(&[("group_id", format!("eq.{}", group_id))])
            .await?;
        self.teams_by_ids(&ids).await
    }

    async fn search_teams(
        &self,
        query: &str,
        season_id: Option<&str>,
    ) -> Result<Vec<Team>, StoreError> {
        let rows = self
            .select(
                "teams",
                &[
                    ("select", "*".to_string()),
                    ("name", format!("ilike.{}", ilike_pattern(query))),
                    ("order", "name.asc,id.asc".to_string()),
                ],
            )
            .await?;
        let teams: Vec<Team> = rows
            .into_iter()
            .map(|r| serde_json::from_value(r).map_err(StoreError::from))
            .collect::<Result<_, _>>()?;

        match season_id {
            Some(season_id) => {
                let in_season = self
                    .team_ids_in_matches(&[("season_id", format!("eq.{}", season_id))])
                    .await?;
                Ok(teams
                    .into_iter()
                    .filter(|t| in_season.contains(&t.id))
                    .collect())
            }
            None => Ok(teams),
        }
    }

    async fn get_standings(&self, group_id: &str) -> Result<Vec<Standing>, StoreError> {
        let rows = self
            .select(
                "standings",
                &[
                    ("select", "*".to_string()),
                    ("group_id", format!("eq.{}", group_id)),
                    ("order", "position.asc.nullsfirst,team_id.asc".to_string()),
                ],
            )
            .await?;
        let mut standings = Vec::new();
        for mut row in rows {
            standings.push(Standing {
                group_id: row
                    .get("group_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                team_id: row
                    .get("team_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                position: row.get("position").and_then(Value::as_i64),
                payload: row.get_mut("data").map(Value::take).unwrap_or(Value::Null),
            });
        }
        Ok(standings)
    }

    async fn get_cache_info(&self, ttls: &CacheTtls) -> Result<CacheInfo, StoreError> {
        let last_updated = self.get_metadata_time(META_LAST_SCRAPE).await?;
        let match_last_updated = self.get_metadata_time(META_LAST_MATCH_SCRAPE).await?;
        let stats = TableStats {
            seasons: self.count("seasons").await?,
            competitions: self.count("competitions").await?,
            groups: self.count("groups").await?,
            matches: self.count("matches").await?,
            teams: self.count("teams").await?,
            standings: self.count("standings").await?,
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
        let rows = self
            .select(
                "groups",
                &[("select", "id".to_string()), ("order", "id.asc".to_string())],
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.get("id").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    async fn get_all_team_ids(&self) -> Result<Vec<String>, StoreError> {
        let rows = self
            .select(
                "teams",
                &[("select", "id".to_string()), ("order", "id.asc".to_string())],
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.get("id").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        // PostgREST refuses unfiltered deletes; a never-matching neq filter
        // selects every row.
        for table in DATA_TABLES {
            let key = if *table == "standings" { "group_id" } else { "id" };
            let resp = self
                .request(reqwest::Method::DELETE, table)
                .query(&[(key, "neq.__none__")])
                .send()
                .await?;
            Self::check(resp).await?;
        }
        let resp = self
            .request(reqwest::Method::DELETE, "metadata")
            .query(&[("key", "neq.__none__")])
            .send()
            .await?;
        Self::check(resp).await?;
        info!("cleared all stored data");
        Ok(())
    }

    async fn vacuum(&self) -> Result<(), StoreError> {
        // Postgres autovacuum handles this on the managed service.
        debug!("vacuum requested on supabase backend; no-op");
        Ok(())
    }

    async fn get_database_size(&self) -> Result<u64, StoreError> {
        let mut rows = 0u64;
        for table in DATA_TABLES {
            rows += self.count(table).await?;
        }
        Ok(rows * ESTIMATED_ROW_BYTES)
    }
}
