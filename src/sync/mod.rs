//! Refresh orchestration.
//!
//! One orchestrator owns the refresh lifecycle: `Idle -> Running(mode) ->
//! Idle`, with at most one refresh in flight. Requests that arrive while a
//! refresh runs are rejected, never queued; a cooldown gate in front keeps
//! eager callers from hammering the upstream provider.

pub mod rest;
pub mod source;

pub use rest::RestScheduleSource;
pub use source::{
    FetchOutcome, FullSnapshot, GroupDelta, GroupSnapshot, ScheduleSource, SeasonCompetitions,
    SourceError,
};

use crate::error::StoreError;
use crate::store::{CacheTtls, Store};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    Full,
    MatchesOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Running(RefreshMode),
}

/// What one completed refresh did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshSummary {
    pub mode: Option<RefreshMode>,
    pub seasons: usize,
    pub competitions: usize,
    pub matches: usize,
    pub standings: usize,
    /// Groups whose delta could not be fetched or written; the run went on
    /// without them.
    pub failed_groups: Vec<String>,
    /// Team ids seen in fresh match data but unknown before the run. Data
    /// for the caller, never an error.
    pub missing_teams: Vec<String>,
}

/// Orchestrator state as seen from outside.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub state: SyncState,
    pub last_result: Option<RefreshSummary>,
    pub last_error: Option<String>,
}

/// Outcome of asking for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStart {
    Started,
    AlreadyRunning,
    RateLimited { retry_after: u64 },
}

#[derive(Debug, Error)]
pub enum RefreshError {
    /// The provider returned no seasons; stored data and clocks stay as
    /// they were.
    #[error("upstream returned an empty snapshot")]
    EmptySnapshot,

    #[error("every group failed during matches-only refresh")]
    AllGroupsFailed,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Cooldown gate between accepted refresh requests.
pub struct RateLimiter {
    cooldown: Duration,
    last_accepted: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_accepted: Mutex::new(None),
        }
    }

    /// Accepts the request, or reports how many whole seconds remain of the
    /// cooldown.
    pub fn try_acquire(&self) -> Result<(), u64> {
        let mut last = self.last_accepted.lock();
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.cooldown {
                let remaining = self.cooldown - elapsed;
                let mut secs = remaining.as_secs();
                if remaining.subsec_nanos() > 0 {
                    secs += 1;
                }
                return Err(secs);
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }

    pub fn reset(&self) {
        *self.last_accepted.lock() = None;
    }
}

struct Shared {
    state: SyncState,
    last_result: Option<RefreshSummary>,
    last_error: Option<String>,
}

/// Drives refreshes against one store via one acquisition source.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    source: Arc<dyn ScheduleSource>,
    ttls: CacheTtls,
    limiter: RateLimiter,
    shared: Mutex<Shared>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn ScheduleSource>,
        ttls: CacheTtls,
        cooldown: Duration,
    ) -> Self {
        Self {
            store,
            source,
            ttls,
            limiter: RateLimiter::new(cooldown),
            shared: Mutex::new(Shared {
                state: SyncState::Idle,
                last_result: None,
                last_error: None,
            }),
        }
    }

    pub fn status(&self) -> SyncStatus {
        let shared = self.shared.lock();
        SyncStatus {
            state: shared.state,
            last_result: shared.last_result.clone(),
            last_error: shared.last_error.clone(),
        }
    }

    /// Resets the cooldown gate; test and operator escape hatch.
    pub fn reset_rate_limit(&self) {
        self.limiter.reset();
    }

    /// Which refresh the cache state calls for, if any. A store with no
    /// snapshot yields `None`: first population is an explicit operator
    /// action, not something to trigger behind the caller's back.
    pub async fn plan(&self) -> Result<Option<RefreshMode>, StoreError> {
        let info = self.store.get_cache_info(&self.ttls).await?;
        if !info.exists {
            return Ok(None);
        }
        if info.stale {
            Ok(Some(RefreshMode::Full))
        } else if info.match_stale {
            Ok(Some(RefreshMode::MatchesOnly))
        } else {
            Ok(None)
        }
    }

    /// Spawns the refresh on a background task. Reads never wait on it.
    pub fn spawn(self: &Arc<Self>, mode: RefreshMode, force: bool) -> RefreshStart {
        let start = self.try_begin(mode, force);
        if start == RefreshStart::Started {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.run(mode).await;
            });
        }
        start
    }

    /// Runs the refresh on the caller's task. Same admission rules as
    /// `spawn`; the outcome lands in `status()` either way.
    pub async fn run_blocking(&self, mode: RefreshMode, force: bool) -> RefreshStart {
        let start = self.try_begin(mode, force);
        if start == RefreshStart::Started {
            self.run(mode).await;
        }
        start
    }

    /// Admission control: the running check comes first so a concurrent
    /// request is reported as such even when the cooldown would also block
    /// it. `force` bypasses the cooldown, never the single-flight flag.
    fn try_begin(&self, mode: RefreshMode, force: bool) -> RefreshStart {
        let mut shared = self.shared.lock();
        if let SyncState::Running(running) = shared.state {
            warn!(?running, requested = ?mode, "refresh already in flight, rejecting");
            return RefreshStart::AlreadyRunning;
        }
        if !force {
            if let Err(retry_after) = self.limiter.try_acquire() {
                return RefreshStart::RateLimited { retry_after };
            }
        }
        shared.state = SyncState::Running(mode);
        RefreshStart::Started
    }

    async fn run(&self, mode: RefreshMode) {
        info!(?mode, "refresh started");
        let result = match mode {
            RefreshMode::Full => self.refresh_full().await,
            RefreshMode::MatchesOnly => self.refresh_matches_only().await,
        };

        let mut shared = self.shared.lock();
        shared.state = SyncState::Idle;
        match result {
            Ok(summary) => {
                info!(
                    matches = summary.matches,
                    failed_groups = summary.failed_groups.len(),
                    "refresh finished"
                );
                shared.last_result = Some(summary);
                shared.last_error = None;
            }
            Err(e) => {
                error!(error = %e, "refresh failed");
                shared.last_error = Some(e.to_string());
            }
        }
    }

    async fn refresh_full(&self) -> Result<RefreshSummary, RefreshError> {
        let snapshot = self.source.fetch_full_snapshot().await?;
        if snapshot.seasons.is_empty() {
            return Err(RefreshError::EmptySnapshot);
        }

        let mut summary = RefreshSummary {
            mode: Some(RefreshMode::Full),
            ..Default::default()
        };

        summary.seasons = self.store.save_seasons(&snapshot.seasons).await?;
        for sc in &snapshot.competitions {
            summary.competitions += self
                .store
                .save_competitions(&sc.season_id, &sc.competitions)
                .await?;
        }
        for g in &snapshot.groups {
            summary.matches += self
                .store
                .save_matches(
                    &g.group_id,
                    &g.calendar,
                    &g.competition_name,
                    &g.group_name,
                    &g.season_id,
                )
                .await?;
            summary.standings += self.store.save_standings(&g.group_id, &g.standings).await?;
        }

        // A full pass rewrote match data too, so both clocks advance.
        self.store.update_scrape_timestamp().await?;
        self.store.update_match_scrape_timestamp().await?;
        Ok(summary)
    }

    async fn refresh_matches_only(&self) -> Result<RefreshSummary, RefreshError> {
        let group_ids = self.store.get_all_group_ids().await?;
        let known_teams: HashSet<String> =
            self.store.get_all_team_ids().await?.into_iter().collect();

        let mut summary = RefreshSummary {
            mode: Some(RefreshMode::MatchesOnly),
            ..Default::default()
        };
        let mut missing: HashSet<String> = HashSet::new();

        for group_id in &group_ids {
            let delta = match self.source.fetch_group_delta(group_id).await {
                Ok(delta) => delta,
                Err(e) => {
                    warn!(group_id, error = %e, "group delta fetch failed, continuing");
                    summary.failed_groups.push(group_id.clone());
                    continue;
                }
            };

            for team_id in delta.calendar.referenced_team_ids() {
                if !known_teams.contains(&team_id) {
                    missing.insert(team_id);
                }
            }

            let written = async {
                let matches = self
                    .store
                    .save_matches_only(group_id, &delta.calendar)
                    .await?;
                let standings = self.store.save_standings(group_id, &delta.standings).await?;
                Ok::<(usize, usize), StoreError>((matches, standings))
            }
            .await;

            match written {
                Ok((matches, standings)) => {
                    summary.matches += matches;
                    summary.standings += standings;
                }
                Err(e) => {
                    warn!(group_id, error = %e, "group write failed, continuing");
                    summary.failed_groups.push(group_id.clone());
                }
            }
        }

        if !group_ids.is_empty() && summary.failed_groups.len() == group_ids.len() {
            return Err(RefreshError::AllGroupsFailed);
        }

        summary.missing_teams = missing.into_iter().collect();
        summary.missing_teams.sort();

        // Only the match clock; the full snapshot is no fresher than before.
        self.store.update_match_scrape_timestamp().await?;
        Ok(summary)
    }
}
