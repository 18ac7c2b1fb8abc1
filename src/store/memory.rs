//! In-memory backend.
//!
//! Hash-map tables behind one `RwLock`. Structurally nothing like the SQL
//! backends, which is the point: the conformance suite runs the same input
//! sequences through this store and the SQLite one and demands identical
//! reads. Also handy for downstream consumers' tests.

use super::{CacheInfo, CacheTtls, MatchFilter, Store, TableStats};
use super::{META_LAST_MATCH_SCRAPE, META_LAST_SCRAPE};
use crate::error::StoreError;
use crate::model::{
    Calendar, Competition, CompetitionRecord, Group, Match, Season, Standing, StandingEntry, Team,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct GroupRow {
    competition_id: String,
    season_id: String,
    name: String,
    #[allow(dead_code)]
    group: Group,
}

#[derive(Debug, Default)]
struct Tables {
    seasons: HashMap<String, Season>,
    // keyed by storage id; value keeps the owning season
    competitions: HashMap<String, (String, Competition)>,
    groups: HashMap<String, GroupRow>,
    matches: HashMap<String, Match>,
    teams: HashMap<String, Team>,
    standings: HashMap<(String, String), Standing>,
    metadata: HashMap<String, DateTime<Utc>>,
}

/// Rough per-row footprint used for the size estimate, matching what the
/// service-managed backends report.
const ESTIMATED_ROW_BYTES: u64 = 500;

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_calendar(
        tables: &mut Tables,
        group_id: &str,
        calendar: &Calendar,
        competition_name: &str,
        group_name: &str,
        season_id: &str,
    ) -> usize {
        let extracted = calendar.extract(group_id, competition_name, group_name, season_id);
        for team in extracted.teams {
            tables.teams.insert(team.id.clone(), team);
        }
        let written = extracted.matches.len();
        for m in extracted.matches {
            tables.matches.insert(m.id.clone(), m);
        }
        written
    }

    fn sorted_teams(mut teams: Vec<Team>) -> Vec<Team> {
        teams.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        teams
    }

    fn teams_in_matches<F>(tables: &Tables, mut pred: F) -> Vec<Team>
    where
        F: FnMut(&Match) -> bool,
    {
        let mut out: HashMap<&str, Team> = HashMap::new();
        for m in tables.matches.values().filter(|m| pred(m)) {
            for side in [&m.home_team_id, &m.away_team_id] {
                if let Some(id) = side {
                    if let Some(team) = tables.teams.get(id) {
                        out.insert(id, team.clone());
                    }
                }
            }
        }
        Self::sorted_teams(out.into_values().collect())
    }
}

fn compare_dates(a: &Option<String>, b: &Option<String>) -> Ordering {
    // Undated matches sort first, matching SQL's NULLs-first ASC order.
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(b),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save_seasons(&self, seasons: &[Season]) -> Result<usize, StoreError> {
        let mut tables = self.tables.write();
        for season in seasons {
            tables.seasons.insert(season.id.clone(), season.clone());
        }
        Ok(seasons.len())
    }

    async fn save_competitions(
        &self,
        season_id: &str,
        competitions: &[Competition],
    ) -> Result<usize, StoreError> {
        let mut tables = self.tables.write();
        for comp in competitions {
            let comp_id = comp.storage_id(season_id);
            for group in &comp.groups {
                tables.groups.insert(
                    group.id.clone(),
                    GroupRow {
                        competition_id: comp_id.clone(),
                        season_id: season_id.to_string(),
                        name: group.name.clone(),
                        group: group.clone(),
                    },
                );
            }
            tables
                .competitions
                .insert(comp_id, (season_id.to_string(), comp.clone()));
        }
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
        let mut tables = self.tables.write();
        Ok(Self::write_calendar(
            &mut tables,
            group_id,
            calendar,
            competition_name,
            group_name,
            season_id,
        ))
    }

    async fn save_matches_only(
        &self,
        group_id: &str,
        calendar: &Calendar,
    ) -> Result<usize, StoreError> {
        let mut tables = self.tables.write();
        let (competition_id, season_id, group_name) = match tables.groups.get(group_id) {
            Some(row) => (
                row.competition_id.clone(),
                row.season_id.clone(),
                row.name.clone(),
            ),
            None => return Err(StoreError::Query(format!("unknown group: {}", group_id))),
        };
        let competition_name = tables
            .competitions
            .get(&competition_id)
            .map(|(_, c)| c.name.clone())
            .unwrap_or_default();
        Ok(Self::write_calendar(
            &mut tables,
            group_id,
            calendar,
            &competition_name,
            &group_name,
            &season_id,
        ))
    }

    async fn save_standings(
        &self,
        group_id: &str,
        entries: &[StandingEntry],
    ) -> Result<usize, StoreError> {
        let mut tables = self.tables.write();
        let mut written = 0;
        for entry in entries {
            let Some(team_id) = &entry.team_id else {
                continue;
            };
            let payload = serde_json::to_value(entry)?;
            tables.standings.insert(
                (group_id.to_string(), team_id.clone()),
                Standing {
                    group_id: group_id.to_string(),
                    team_id: team_id.clone(),
                    position: entry.position,
                    payload,
                },
            );
            written += 1;
        }
        Ok(written)
    }

    async fn update_scrape_timestamp(&self) -> Result<(), StoreError> {
        self.tables
            .write()
            .metadata
            .insert(META_LAST_SCRAPE.to_string(), Utc::now());
        Ok(())
    }

    async fn update_match_scrape_timestamp(&self) -> Result<(), StoreError> {
        self.tables
            .write()
            .metadata
            .insert(META_LAST_MATCH_SCRAPE.to_string(), Utc::now());
        Ok(())
    }

    async fn get_seasons(&self) -> Result<Vec<Season>, StoreError> {
        let tables = self.tables.read();
        let mut seasons: Vec<Season> = tables.seasons.values().cloned().collect();
        seasons.sort_by(|a, b| b.name.cmp(&a.name).then_with(|| a.id.cmp(&b.id)));
        Ok(seasons)
    }

    async fn get_competitions(&self, season_id: &str) -> Result<Vec<Competition>, StoreError> {
        let tables = self.tables.read();
        let mut rows: Vec<(&String, &Competition)> = tables
            .competitions
            .iter()
            .filter(|(_, (sid, _))| sid == season_id)
            .map(|(id, (_, comp))| (id, comp))
            .collect();
        rows.sort_by(|a, b| a.1.name.cmp(&b.1.name).then_with(|| a.0.cmp(b.0)));
        Ok(rows.into_iter().map(|(_, c)| c.clone()).collect())
    }

    async fn get_all_competitions(&self) -> Result<Vec<CompetitionRecord>, StoreError> {
        let tables = self.tables.read();
        let mut rows: Vec<(&String, &(String, Competition))> =
            tables.competitions.iter().collect();
        rows.sort_by(|a, b| a.1 .1.name.cmp(&b.1 .1.name).then_with(|| a.0.cmp(b.0)));
        Ok(rows
            .into_iter()
            .map(|(_, (season_id, comp))| CompetitionRecord {
                season_id: season_id.clone(),
                competition: comp.clone(),
            })
            .collect())
    }

    async fn get_matches(&self, filter: &MatchFilter) -> Result<Vec<Match>, StoreError> {
        let tables = self.tables.read();
        let mut matches: Vec<Match> = tables
            .matches
            .values()
            .filter(|m| filter.accepts(m))
            .cloned()
            .collect();
        matches.sort_by(|a, b| compare_dates(&a.date, &b.date).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn get_teams(&self, season_id: Option<&str>) -> Result<Vec<Team>, StoreError> {
        let tables = self.tables.read();
        match season_id {
            Some(season_id) => Ok(Self::teams_in_matches(&tables, |m| {
                m.season_id == season_id
            })),
            None => Ok(Self::sorted_teams(
                tables.teams.values().cloned().collect(),
            )),
        }
    }

    async fn get_teams_by_group(&self, group_id: &str) -> Result<Vec<Team>, StoreError> {
        let tables = self.tables.read();
        Ok(Self::teams_in_matches(&tables, |m| m.group_id == group_id))
    }

    async fn search_teams(
        &self,
        query: &str,
        season_id: Option<&str>,
    ) -> Result<Vec<Team>, StoreError> {
        let tables = self.tables.read();
        let needle = query.to_lowercase();
        match season_id {
            Some(season_id) => {
                let in_season = Self::teams_in_matches(&tables, |m| m.season_id == season_id);
                Ok(in_season
                    .into_iter()
                    .filter(|t| t.name.to_lowercase().contains(&needle))
                    .collect())
            }
            None => Ok(Self::sorted_teams(
                tables
                    .teams
                    .values()
                    .filter(|t| t.name.to_lowercase().contains(&needle))
                    .cloned()
                    .collect(),
            )),
        }
    }

    async fn get_standings(&self, group_id: &str) -> Result<Vec<Standing>, StoreError> {
        let tables = self.tables.read();
        let mut standings: Vec<Standing> = tables
            .standings
            .values()
            .filter(|s| s.group_id == group_id)
            .cloned()
            .collect();
        standings.sort_by(|a, b| {
            // NULL positions first, matching SQL ASC ordering on INTEGER
            match (&a.position, &b.position) {
                (None, None) => a.team_id.cmp(&b.team_id),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => x.cmp(y).then_with(|| a.team_id.cmp(&b.team_id)),
            }
        });
        Ok(standings)
    }

    async fn get_cache_info(&self, ttls: &CacheTtls) -> Result<CacheInfo, StoreError> {
        let tables = self.tables.read();
        let stats = TableStats {
            seasons: tables.seasons.len() as u64,
            competitions: tables.competitions.len() as u64,
            groups: tables.groups.len() as u64,
            matches: tables.matches.len() as u64,
            teams: tables.teams.len() as u64,
            standings: tables.standings.len() as u64,
        };
        Ok(CacheInfo::build(
            Utc::now(),
            tables.metadata.get(META_LAST_SCRAPE).copied(),
            tables.metadata.get(META_LAST_MATCH_SCRAPE).copied(),
            ttls,
            stats,
        ))
    }

    async fn get_all_group_ids(&self) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read();
        let mut ids: Vec<String> = tables.groups.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_all_team_ids(&self) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read();
        let mut ids: Vec<String> = tables.teams.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        *tables = Tables::default();
        Ok(())
    }

    async fn vacuum(&self) -> Result<(), StoreError> {
        // Nothing to reclaim
        Ok(())
    }

    async fn get_database_size(&self) -> Result<u64, StoreError> {
        let tables = self.tables.read();
        let rows = tables.seasons.len()
            + tables.competitions.len()
            + tables.groups.len()
            + tables.matches.len()
            + tables.teams.len()
            + tables.standings.len();
        Ok(rows as u64 * ESTIMATED_ROW_BYTES)
    }
}
