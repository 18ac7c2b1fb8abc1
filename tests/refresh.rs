//! Orchestrator behavior against scripted acquisition sources.

use courtside::model::Calendar;
use courtside::store::{CacheTtls, MatchFilter, MemoryStore, Store};
use courtside::sync::{
    FullSnapshot, GroupDelta, GroupSnapshot, Orchestrator, RefreshMode, RefreshStart,
    ScheduleSource, SeasonCompetitions, SourceError, SyncState,
};
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn snapshot() -> FullSnapshot {
    let seasons = serde_json::from_value(json!([
        {"_id": "s1", "name": "2025/2026"}
    ]))
    .unwrap();
    let competitions = serde_json::from_value(json!([
        {
            "id": "c1",
            "name": "Premier League",
            "groups": [
                {"id": "g1", "name": "North", "type": "league"},
                {"id": "g2", "name": "South", "type": "league"}
            ]
        }
    ]))
    .unwrap();
    let calendar_g1: Calendar = serde_json::from_value(json!({
        "rounds": [{"matches": [
            {
                "id": "m1",
                "date": "2026-01-10T18:00:00Z",
                "status": "NOT_STARTED",
                "homeTeam": {"id": "t1", "name": "Lions"},
                "awayTeam": {"id": "t2", "name": "Tigers"}
            }
        ]}]
    }))
    .unwrap();
    let calendar_g2: Calendar = serde_json::from_value(json!({
        "rounds": [{"matches": [
            {
                "id": "m2",
                "date": "2026-01-11T18:00:00Z",
                "status": "NOT_STARTED",
                "homeTeam": {"id": "t3", "name": "Bears"},
                "awayTeam": {"id": "t1", "name": "Lions"}
            }
        ]}]
    }))
    .unwrap();

    FullSnapshot {
        seasons,
        competitions: vec![SeasonCompetitions {
            season_id: "s1".to_string(),
            competitions,
        }],
        groups: vec![
            GroupSnapshot {
                group_id: "g1".to_string(),
                season_id: "s1".to_string(),
                competition_name: "Premier League".to_string(),
                group_name: "North".to_string(),
                calendar: calendar_g1,
                standings: serde_json::from_value(json!([
                    {"teamId": "t1", "position": 1},
                    {"teamId": "t2", "position": 2}
                ]))
                .unwrap(),
            },
            GroupSnapshot {
                group_id: "g2".to_string(),
                season_id: "s1".to_string(),
                competition_name: "Premier League".to_string(),
                group_name: "South".to_string(),
                calendar: calendar_g2,
                standings: Vec::new(),
            },
        ],
    }
}

/// Delta for g1 where m1 finished and a previously unseen team appears.
fn delta_g1() -> GroupDelta {
    GroupDelta {
        calendar: serde_json::from_value(json!({
            "rounds": [{"matches": [
                {
                    "id": "m1",
                    "date": "2026-01-10T18:00:00Z",
                    "status": "CLOSED",
                    "homeTeam": {"id": "t1", "name": "Lions"},
                    "awayTeam": {"id": "t2", "name": "Tigers"},
                    "score": {"totals": [
                        {"teamId": "t1", "total": 70},
                        {"teamId": "t2", "total": 64}
                    ]}
                },
                {
                    "id": "m9",
                    "date": "2026-01-20T18:00:00Z",
                    "status": "NOT_STARTED",
                    "homeTeam": {"id": "t9", "name": "Newcomers"},
                    "awayTeam": {"id": "t1", "name": "Lions"}
                }
            ]}]
        }))
        .unwrap(),
        standings: Vec::new(),
    }
}

#[derive(Default)]
struct ScriptedSource {
    snapshot: Mutex<Option<FullSnapshot>>,
    deltas: Mutex<HashMap<String, GroupDelta>>,
    failing_groups: Mutex<HashSet<String>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedSource {
    fn with_snapshot(snapshot: FullSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            ..Default::default()
        }
    }

    fn set_delta(&self, group_id: &str, delta: GroupDelta) {
        self.deltas.lock().insert(group_id.to_string(), delta);
    }

    fn fail_group(&self, group_id: &str) {
        self.failing_groups.lock().insert(group_id.to_string());
    }
}

#[async_trait]
impl ScheduleSource for ScriptedSource {
    async fn fetch_full_snapshot(&self) -> Result<FullSnapshot, SourceError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.snapshot
            .lock()
            .clone()
            .ok_or_else(|| SourceError::Transport("no snapshot scripted".to_string()))
    }

    async fn fetch_group_delta(&self, group_id: &str) -> Result<GroupDelta, SourceError> {
        if self.failing_groups.lock().contains(group_id) {
            return Err(SourceError::Transport(format!("scripted failure: {}", group_id)));
        }
        self.deltas
            .lock()
            .get(group_id)
            .cloned()
            .ok_or_else(|| SourceError::Transport(format!("no delta scripted: {}", group_id)))
    }
}

fn ttls() -> CacheTtls {
    CacheTtls {
        full: ChronoDuration::minutes(60),
        matches: ChronoDuration::minutes(60),
    }
}

fn orchestrator(store: Arc<dyn Store>, source: Arc<dyn ScheduleSource>) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(store, source, ttls(), Duration::ZERO))
}

#[tokio::test]
async fn full_refresh_populates_store_and_both_clocks() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let source = Arc::new(ScriptedSource::with_snapshot(snapshot()));
    let orch = orchestrator(Arc::clone(&store), source);

    assert_eq!(
        orch.run_blocking(RefreshMode::Full, false).await,
        RefreshStart::Started
    );

    let status = orch.status();
    assert_eq!(status.state, SyncState::Idle);
    assert!(status.last_error.is_none());
    let result = status.last_result.unwrap();
    assert_eq!(result.seasons, 1);
    assert_eq!(result.competitions, 1);
    assert_eq!(result.matches, 2);
    assert_eq!(result.standings, 2);

    let info = store.get_cache_info(&ttls()).await.unwrap();
    assert!(info.exists && !info.stale && !info.match_stale);
    assert!(info.match_last_updated.is_some(), "full pass advances the match clock too");

    // Fresh on both clocks, so nothing more to do.
    assert_eq!(orch.plan().await.unwrap(), None);
}

#[tokio::test]
async fn empty_snapshot_is_rejected_without_touching_data() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let source = Arc::new(ScriptedSource::with_snapshot(snapshot()));
    let orch = orchestrator(Arc::clone(&store), Arc::clone(&source) as Arc<dyn ScheduleSource>);
    orch.run_blocking(RefreshMode::Full, false).await;
    let populated = store.get_cache_info(&ttls()).await.unwrap();

    // Second run delivers an empty snapshot.
    *source.snapshot.lock() = Some(FullSnapshot::default());
    orch.run_blocking(RefreshMode::Full, true).await;

    let status = orch.status();
    assert!(status.last_error.unwrap().contains("empty snapshot"));
    // Previous successful summary stays visible next to the error.
    assert!(status.last_result.is_some());

    let after = store.get_cache_info(&ttls()).await.unwrap();
    assert_eq!(after.stats, populated.stats);
    assert_eq!(after.last_updated, populated.last_updated);
    assert_eq!(after.match_last_updated, populated.match_last_updated);
}

#[tokio::test]
async fn concurrent_refresh_is_rejected_not_queued() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let gate = Arc::new(Notify::new());
    let source = Arc::new(ScriptedSource {
        snapshot: Mutex::new(Some(snapshot())),
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    });
    let orch = orchestrator(Arc::clone(&store), source);

    assert_eq!(orch.spawn(RefreshMode::Full, false), RefreshStart::Started);
    // Let the spawned task reach the gate.
    tokio::task::yield_now().await;

    assert_eq!(
        orch.spawn(RefreshMode::Full, true),
        RefreshStart::AlreadyRunning
    );
    assert_eq!(
        orch.spawn(RefreshMode::MatchesOnly, true),
        RefreshStart::AlreadyRunning,
        "both modes share the single-flight flag"
    );

    gate.notify_one();
    for _ in 0..100 {
        if orch.status().state == SyncState::Idle {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let status = orch.status();
    assert_eq!(status.state, SyncState::Idle);
    assert!(status.last_error.is_none());
    // Exactly one run executed.
    assert_eq!(store.get_cache_info(&ttls()).await.unwrap().stats.matches, 2);
}

#[tokio::test]
async fn matches_only_touches_match_data_and_match_clock_only() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let source = Arc::new(ScriptedSource::with_snapshot(snapshot()));
    let orch = orchestrator(Arc::clone(&store), Arc::clone(&source) as Arc<dyn ScheduleSource>);
    orch.run_blocking(RefreshMode::Full, false).await;
    let before = store.get_cache_info(&ttls()).await.unwrap();

    source.set_delta("g1", delta_g1());
    source.set_delta("g2", GroupDelta::default());
    tokio::time::sleep(Duration::from_millis(20)).await;
    orch.run_blocking(RefreshMode::MatchesOnly, true).await;

    let status = orch.status();
    assert!(status.last_error.is_none());
    let result = status.last_result.unwrap();
    assert!(result.failed_groups.is_empty());
    assert_eq!(result.missing_teams, vec!["t9".to_string()]);

    // m1 now carries the final score; the new match landed.
    let m1 = &store
        .get_matches(&MatchFilter {
            team_id: Some("t2".to_string()),
            ..Default::default()
        })
        .await
        .unwrap()[0];
    assert_eq!(m1.home_score, Some(70));

    let after = store.get_cache_info(&ttls()).await.unwrap();
    assert_eq!(after.stats.seasons, before.stats.seasons);
    assert_eq!(after.stats.competitions, before.stats.competitions);
    assert_eq!(after.last_updated, before.last_updated, "full clock untouched");
    assert!(after.match_last_updated > before.match_last_updated);
}

#[tokio::test]
async fn one_failing_group_does_not_abort_the_rest() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let source = Arc::new(ScriptedSource::with_snapshot(snapshot()));
    let orch = orchestrator(Arc::clone(&store), Arc::clone(&source) as Arc<dyn ScheduleSource>);
    orch.run_blocking(RefreshMode::Full, false).await;

    source.set_delta("g1", delta_g1());
    source.fail_group("g2");
    orch.run_blocking(RefreshMode::MatchesOnly, true).await;

    let status = orch.status();
    assert!(status.last_error.is_none(), "partial failure is a result, not an error");
    let result = status.last_result.unwrap();
    assert_eq!(result.failed_groups, vec!["g2".to_string()]);
    assert!(result.matches >= 2, "g1 delta was written");
}

#[tokio::test]
async fn all_groups_failing_fails_the_run_and_keeps_the_clock() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let source = Arc::new(ScriptedSource::with_snapshot(snapshot()));
    let orch = orchestrator(Arc::clone(&store), Arc::clone(&source) as Arc<dyn ScheduleSource>);
    orch.run_blocking(RefreshMode::Full, false).await;
    let before = store.get_cache_info(&ttls()).await.unwrap();

    source.fail_group("g1");
    source.fail_group("g2");
    orch.run_blocking(RefreshMode::MatchesOnly, true).await;

    assert!(orch.status().last_error.is_some());
    let after = store.get_cache_info(&ttls()).await.unwrap();
    assert_eq!(after.match_last_updated, before.match_last_updated);
}

#[tokio::test]
async fn cooldown_rejects_with_retry_hint_and_force_bypasses() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let source = Arc::new(ScriptedSource::with_snapshot(snapshot()));
    let orch = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        source,
        ttls(),
        Duration::from_secs(300),
    ));

    assert_eq!(
        orch.run_blocking(RefreshMode::Full, false).await,
        RefreshStart::Started
    );

    match orch.run_blocking(RefreshMode::Full, false).await {
        RefreshStart::RateLimited { retry_after } => assert!(retry_after <= 300),
        other => panic!("expected RateLimited, got {:?}", other),
    }

    assert_eq!(
        orch.run_blocking(RefreshMode::Full, true).await,
        RefreshStart::Started,
        "force bypasses the cooldown"
    );

    orch.reset_rate_limit();
    assert_eq!(
        orch.run_blocking(RefreshMode::Full, false).await,
        RefreshStart::Started,
        "reset reopens the gate"
    );
}

#[tokio::test]
async fn plan_never_auto_runs_on_an_empty_store() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let source = Arc::new(ScriptedSource::default());
    let orch = orchestrator(store, source);
    assert_eq!(orch.plan().await.unwrap(), None);
}

#[tokio::test]
async fn plan_distinguishes_the_refresh_classes() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    store.update_scrape_timestamp().await.unwrap();
    let source: Arc<dyn ScheduleSource> = Arc::new(ScriptedSource::default());

    // Negative TTLs force staleness without waiting out real time.
    let full_stale = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&source),
        CacheTtls {
            full: ChronoDuration::seconds(-1),
            matches: ChronoDuration::seconds(-1),
        },
        Duration::ZERO,
    ));
    assert_eq!(full_stale.plan().await.unwrap(), Some(RefreshMode::Full));

    let match_stale = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&source),
        CacheTtls {
            full: ChronoDuration::minutes(60),
            matches: ChronoDuration::seconds(-1),
        },
        Duration::ZERO,
    ));
    assert_eq!(
        match_stale.plan().await.unwrap(),
        Some(RefreshMode::MatchesOnly)
    );
}
