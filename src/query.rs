//! Read-only query façade.
//!
//! Translates the caller-facing vocabulary (names, day windows) into the
//! storage contract's filter and passes reads straight through. No caching,
//! no write access; a refresh running in the background never blocks these.

use crate::error::StoreError;
use crate::model::{
    Competition, CompetitionRecord, Match, MatchStatus, Season, Standing, Team,
};
use crate::store::{CacheInfo, CacheTtls, MatchFilter, Store};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Caller-facing match selection. `days_behind`/`days_ahead` describe a
/// window around now instead of absolute dates.
#[derive(Debug, Clone, Default)]
pub struct MatchQuery {
    pub season_id: Option<String>,
    /// Competition name fragment, case-insensitive
    pub competition: Option<String>,
    /// Team name fragment, case-insensitive; ignored when `team_id` is set
    pub team: Option<String>,
    pub team_id: Option<String>,
    pub group_id: Option<String>,
    pub status: Option<MatchStatus>,
    pub days_behind: Option<i64>,
    pub days_ahead: Option<i64>,
    pub limit: Option<usize>,
}

impl MatchQuery {
    /// Translation into the storage filter. Day windows become inclusive
    /// ISO-8601 bounds: from midnight `days_behind` days back to the last
    /// second of the day `days_ahead` days out.
    pub fn to_filter(&self, now: DateTime<Utc>) -> MatchFilter {
        let team_name = if self.team_id.is_some() {
            None
        } else {
            self.team.clone()
        };

        MatchFilter {
            season_id: self.season_id.clone(),
            competition_name: self.competition.clone(),
            team_name,
            team_id: self.team_id.clone(),
            group_id: self.group_id.clone(),
            status: self.status,
            date_from: self
                .days_behind
                .map(|d| (now - Duration::days(d)).format("%Y-%m-%d").to_string()),
            date_to: self.days_ahead.map(|d| {
                (now + Duration::days(d))
                    .format("%Y-%m-%dT23:59:59Z")
                    .to_string()
            }),
            limit: self.limit,
        }
    }
}

/// Read side of the engine, shared by the CLI and any embedding caller.
pub struct QueryService {
    store: Arc<dyn Store>,
    ttls: CacheTtls,
}

impl QueryService {
    pub fn new(store: Arc<dyn Store>, ttls: CacheTtls) -> Self {
        Self { store, ttls }
    }

    pub async fn matches(&self, query: &MatchQuery) -> Result<Vec<Match>, StoreError> {
        self.store.get_matches(&query.to_filter(Utc::now())).await
    }

    pub async fn seasons(&self) -> Result<Vec<Season>, StoreError> {
        self.store.get_seasons().await
    }

    pub async fn competitions(&self, season_id: &str) -> Result<Vec<Competition>, StoreError> {
        self.store.get_competitions(season_id).await
    }

    pub async fn all_competitions(&self) -> Result<Vec<CompetitionRecord>, StoreError> {
        self.store.get_all_competitions().await
    }

    pub async fn teams(&self, season_id: Option<&str>) -> Result<Vec<Team>, StoreError> {
        self.store.get_teams(season_id).await
    }

    pub async fn teams_by_group(&self, group_id: &str) -> Result<Vec<Team>, StoreError> {
        self.store.get_teams_by_group(group_id).await
    }

    pub async fn search_teams(
        &self,
        query: &str,
        season_id: Option<&str>,
    ) -> Result<Vec<Team>, StoreError> {
        self.store.search_teams(query, season_id).await
    }

    pub async fn standings(&self, group_id: &str) -> Result<Vec<Standing>, StoreError> {
        self.store.get_standings(group_id).await
    }

    pub async fn cache_info(&self) -> Result<CacheInfo, StoreError> {
        self.store.get_cache_info(&self.ttls).await
    }
}
