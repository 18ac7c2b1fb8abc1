//! Storage contract and backend factory.
//!
//! One `Store` trait over six entity kinds plus metadata, implemented by four
//! interchangeable backends. The contract promise: identical input sequences
//! into any two backends yield identical results from every read operation.

use crate::config::{AppConfig, BackendKind, CacheConfig};
use crate::error::StoreError;
use crate::model::{
    Calendar, Competition, CompetitionRecord, Match, MatchStatus, Season, Standing, StandingEntry,
    Team,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod memory;
pub mod sql;
pub mod sqlite;
pub mod supabase;
pub mod turso;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use supabase::SupabaseStore;
pub use turso::TursoStore;

/// Metadata key for the full-refresh clock.
pub const META_LAST_SCRAPE: &str = "last_scrape";
/// Metadata key for the matches-only refresh clock.
pub const META_LAST_MATCH_SCRAPE: &str = "last_match_scrape";

/// AND-combined match filters. Every field is optional; an empty filter
/// selects everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchFilter {
    /// Exact season id
    pub season_id: Option<String>,
    /// Case-insensitive substring against the competition name
    pub competition_name: Option<String>,
    /// Case-insensitive substring against home OR away team name
    pub team_name: Option<String>,
    /// Exact team id, home or away; takes precedence over `team_name`
    pub team_id: Option<String>,
    /// Exact group id
    pub group_id: Option<String>,
    pub status: Option<MatchStatus>,
    /// Inclusive ISO-8601 lower bound; undated matches never satisfy it
    pub date_from: Option<String>,
    /// Inclusive ISO-8601 upper bound
    pub date_to: Option<String>,
    pub limit: Option<usize>,
}

impl MatchFilter {
    /// The team-name selector that actually applies: suppressed entirely
    /// when a team id is present.
    pub fn effective_team_name(&self) -> Option<&str> {
        if self.team_id.is_some() {
            None
        } else {
            self.team_name.as_deref()
        }
    }

    /// Predicate form of the filter, shared by the in-memory backend and by
    /// tests cross-checking the SQL translation.
    pub fn accepts(&self, m: &Match) -> bool {
        if let Some(season_id) = &self.season_id {
            if &m.season_id != season_id {
                return false;
            }
        }
        if let Some(needle) = &self.competition_name {
            if !contains_ci(&m.competition_name, needle) {
                return false;
            }
        }
        if let Some(team_id) = &self.team_id {
            let home = m.home_team_id.as_deref() == Some(team_id.as_str());
            let away = m.away_team_id.as_deref() == Some(team_id.as_str());
            if !home && !away {
                return false;
            }
        } else if let Some(needle) = &self.team_name {
            let home = m
                .home_team_name
                .as_deref()
                .map(|n| contains_ci(n, needle))
                .unwrap_or(false);
            let away = m
                .away_team_name
                .as_deref()
                .map(|n| contains_ci(n, needle))
                .unwrap_or(false);
            if !home && !away {
                return false;
            }
        }
        if let Some(group_id) = &self.group_id {
            if &m.group_id != group_id {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if m.status.as_ref() != Some(status) {
                return false;
            }
        }
        if let Some(from) = &self.date_from {
            match &m.date {
                Some(d) if d.as_str() >= from.as_str() => {}
                _ => return false,
            }
        }
        if let Some(to) = &self.date_to {
            match &m.date {
                Some(d) if d.as_str() <= to.as_str() => {}
                _ => return false,
            }
        }
        true
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Per-table row counts reported by `get_cache_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub seasons: u64,
    pub competitions: u64,
    pub groups: u64,
    pub matches: u64,
    pub teams: u64,
    pub standings: u64,
}

/// Staleness thresholds for the two refresh classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub full: Duration,
    pub matches: Duration,
}

impl CacheTtls {
    pub fn from_config(cache: &CacheConfig) -> Self {
        Self {
            full: Duration::minutes(cache.ttl_minutes as i64),
            matches: Duration::minutes(cache.match_ttl_minutes as i64),
        }
    }
}

/// Snapshot freshness report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheInfo {
    /// Whether a full snapshot has ever been stored
    pub exists: bool,
    /// Full snapshot older than its TTL (or absent)
    pub stale: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub age_minutes: Option<i64>,
    /// Match data older than its TTL; falls back to the full clock when the
    /// match clock has never been set
    pub match_stale: bool,
    pub match_last_updated: Option<DateTime<Utc>>,
    pub match_age_minutes: Option<i64>,
    pub stats: TableStats,
}

impl CacheInfo {
    /// Pure staleness computation shared by every backend. Ages are compared
    /// at second resolution so the TTL boundary is exact.
    pub fn build(
        now: DateTime<Utc>,
        last_updated: Option<DateTime<Utc>>,
        match_last_updated: Option<DateTime<Utc>>,
        ttls: &CacheTtls,
        stats: TableStats,
    ) -> Self {
        let exists = last_updated.is_some();
        let age = last_updated.map(|t| now.signed_duration_since(t));
        let stale = match age {
            Some(age) => age.num_seconds() > ttls.full.num_seconds(),
            None => true,
        };

        let match_clock = match_last_updated.or(last_updated);
        let match_age = match_clock.map(|t| now.signed_duration_since(t));
        let match_stale = match match_age {
            Some(age) => age.num_seconds() > ttls.matches.num_seconds(),
            None => true,
        };

        CacheInfo {
            exists,
            stale,
            last_updated,
            age_minutes: age.map(|a| a.num_minutes()),
            match_stale,
            match_last_updated,
            match_age_minutes: match_age.map(|a| a.num_minutes()),
            stats,
        }
    }
}

/// The storage contract.
///
/// All writes are upserts keyed on the entity id (`(group_id, team_id)` for
/// standings); repeating a write with identical input is a no-op on row
/// counts. Save operations return the number of rows written.
#[async_trait]
pub trait Store: Send + Sync {
    /// Idempotent schema bootstrap; safe to call on every startup.
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Cheap reachability probe.
    async fn health_check(&self) -> Result<(), StoreError>;

    async fn save_seasons(&self, seasons: &[Season]) -> Result<usize, StoreError>;

    /// Upserts competitions and their nested groups under `season_id`.
    async fn save_competitions(
        &self,
        season_id: &str,
        competitions: &[Competition],
    ) -> Result<usize, StoreError>;

    /// Extracts matches and teams from `calendar`, denormalizing the given
    /// names onto every match row.
    async fn save_matches(
        &self,
        group_id: &str,
        calendar: &Calendar,
        competition_name: &str,
        group_name: &str,
        season_id: &str,
    ) -> Result<usize, StoreError>;

    /// Like `save_matches`, but resolves the denormalized names from the
    /// stored group row. Fails when the group is unknown.
    async fn save_matches_only(
        &self,
        group_id: &str,
        calendar: &Calendar,
    ) -> Result<usize, StoreError>;

    /// Entries without a team id are skipped, not errors.
    async fn save_standings(
        &self,
        group_id: &str,
        entries: &[StandingEntry],
    ) -> Result<usize, StoreError>;

    async fn update_scrape_timestamp(&self) -> Result<(), StoreError>;
    async fn update_match_scrape_timestamp(&self) -> Result<(), StoreError>;

    /// All seasons, name descending (most recent league year first).
    async fn get_seasons(&self) -> Result<Vec<Season>, StoreError>;

    /// Competitions of one season, name ascending.
    async fn get_competitions(&self, season_id: &str) -> Result<Vec<Competition>, StoreError>;

    /// Competitions across all seasons, name ascending.
    async fn get_all_competitions(&self) -> Result<Vec<CompetitionRecord>, StoreError>;

    /// Filtered matches, date ascending with undated matches first and id as
    /// the deterministic tie-break.
    async fn get_matches(&self, filter: &MatchFilter) -> Result<Vec<Match>, StoreError>;

    /// Teams, name ascending. With a season id, only teams appearing in that
    /// season's matches.
    async fn get_teams(&self, season_id: Option<&str>) -> Result<Vec<Team>, StoreError>;

    async fn get_teams_by_group(&self, group_id: &str) -> Result<Vec<Team>, StoreError>;

    /// Case-insensitive substring search over team names.
    async fn search_teams(
        &self,
        query: &str,
        season_id: Option<&str>,
    ) -> Result<Vec<Team>, StoreError>;

    /// Standings of one group, position ascending.
    async fn get_standings(&self, group_id: &str) -> Result<Vec<Standing>, StoreError>;

    async fn get_cache_info(&self, ttls: &CacheTtls) -> Result<CacheInfo, StoreError>;

    async fn get_all_group_ids(&self) -> Result<Vec<String>, StoreError>;
    async fn get_all_team_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Deletes all data (both refresh clocks included); schema stays.
    async fn clear_all(&self) -> Result<(), StoreError>;

    /// Space reclamation; a documented no-op on service-managed backends.
    async fn vacuum(&self) -> Result<(), StoreError>;

    /// Bytes on disk, or a row-count estimate where no file exists.
    async fn get_database_size(&self) -> Result<u64, StoreError>;
}

/// Opens and initializes the backend selected by the configuration.
///
/// Missing cloud credentials fail here, at startup, not on first use.
pub async fn open_store(cfg: &AppConfig) -> Result<Arc<dyn Store>, StoreError> {
    cfg.validate()?;

    let store: Arc<dyn Store> = match cfg.backend {
        BackendKind::Sqlite => {
            let path = cfg.sqlite.db_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Configuration(format!(
                        "cannot create data directory {:?}: {}",
                        parent, e
                    ))
                })?;
            }
            Arc::new(SqliteStore::open(&path)?)
        }
        BackendKind::Turso => Arc::new(TursoStore::new(&cfg.turso)?),
        BackendKind::Supabase => Arc::new(SupabaseStore::new(&cfg.supabase)?),
    };

    store.initialize().await?;
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample_match() -> Match {
        Match {
            id: "m1".to_string(),
            season_id: "s1".to_string(),
            group_id: "g1".to_string(),
            competition_name: "Premier League".to_string(),
            group_name: "North".to_string(),
            home_team_id: Some("t1".to_string()),
            home_team_name: Some("Lions".to_string()),
            away_team_id: Some("t2".to_string()),
            away_team_name: Some("Tigers".to_string()),
            date: Some("2026-01-10T18:00:00Z".to_string()),
            status: Some(MatchStatus::Closed),
            home_score: Some(85),
            away_score: Some(78),
            venue: None,
            venue_address: None,
            payload: Value::Null,
        }
    }

    #[test]
    fn team_id_takes_precedence_over_team_name() {
        let m = sample_match();
        let filter = MatchFilter {
            team_id: Some("t2".to_string()),
            team_name: Some("no such team".to_string()),
            ..Default::default()
        };
        // The name selector disagrees but is suppressed by the id.
        assert_eq!(filter.effective_team_name(), None);
        assert!(filter.accepts(&m));
    }

    #[test]
    fn team_name_matches_either_side_case_insensitively() {
        let m = sample_match();
        let filter = MatchFilter {
            team_name: Some("tigers".to_string()),
            ..Default::default()
        };
        assert!(filter.accepts(&m));

        let filter = MatchFilter {
            team_name: Some("bears".to_string()),
            ..Default::default()
        };
        assert!(!filter.accepts(&m));
    }

    #[test]
    fn date_bounds_are_inclusive_and_exclude_undated() {
        let mut m = sample_match();
        let filter = MatchFilter {
            date_from: Some("2026-01-10T18:00:00Z".to_string()),
            date_to: Some("2026-01-10T18:00:00Z".to_string()),
            ..Default::default()
        };
        assert!(filter.accepts(&m));

        m.date = None;
        assert!(!filter.accepts(&m));
    }

    #[test]
    fn staleness_boundary_is_exact_at_second_resolution() {
        let ttls = CacheTtls {
            full: Duration::minutes(10),
            matches: Duration::minutes(5),
        };
        let now = Utc::now();

        let info = CacheInfo::build(
            now,
            Some(now - Duration::minutes(10) + Duration::seconds(1)),
            None,
            &ttls,
            TableStats::default(),
        );
        assert!(info.exists);
        assert!(!info.stale, "one second inside the TTL is fresh");

        let info = CacheInfo::build(
            now,
            Some(now - Duration::minutes(10) - Duration::seconds(1)),
            None,
            &ttls,
            TableStats::default(),
        );
        assert!(info.stale, "one second past the TTL is stale");
    }

    #[test]
    fn match_clock_falls_back_to_full_clock() {
        let ttls = CacheTtls {
            full: Duration::minutes(100),
            matches: Duration::minutes(5),
        };
        let now = Utc::now();

        let info = CacheInfo::build(
            now,
            Some(now - Duration::minutes(30)),
            None,
            &ttls,
            TableStats::default(),
        );
        assert!(!info.stale);
        assert!(info.match_stale, "match TTL judged against the full clock");

        let info = CacheInfo::build(
            now,
            Some(now - Duration::minutes(30)),
            Some(now - Duration::minutes(1)),
            &ttls,
            TableStats::default(),
        );
        assert!(!info.match_stale);
    }

    #[test]
    fn missing_snapshot_is_stale_on_both_clocks() {
        let ttls = CacheTtls {
            full: Duration::minutes(10),
            matches: Duration::minutes(5),
        };
        let info = CacheInfo::build(Utc::now(), None, None, &ttls, TableStats::default());
        assert!(!info.exists);
        assert!(info.stale);
        assert!(info.match_stale);
        assert_eq!(info.age_minutes, None);
    }
}
