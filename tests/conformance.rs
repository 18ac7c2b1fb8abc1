//! Cross-backend conformance suite.
//!
//! Feeds the same write sequence into structurally different backends and
//! asserts every read operation answers identically. The cloud backends
//! cannot run hermetically, so the suite covers file-backed SQLite,
//! in-memory SQLite, and the hash-map store; the SQL text itself is shared
//! with the Turso backend.

use courtside::model::{Calendar, Competition, MatchStatus, Season, StandingEntry};
use courtside::store::{CacheTtls, MatchFilter, MemoryStore, SqliteStore, Store};
use chrono::Duration;
use serde_json::json;

fn seasons() -> Vec<Season> {
    serde_json::from_value(json!([
        {"_id": "s1", "name": "2025/2026", "startDate": "2025-09-01", "endDate": "2026-06-30"},
        {"_id": "s2", "name": "2024/2025"}
    ]))
    .unwrap()
}

fn competitions_s1() -> Vec<Competition> {
    serde_json::from_value(json!([
        {
            "id": "c1",
            "name": "Premier League",
            "groups": [
                {"id": "g1", "name": "North", "type": "league"},
                {"id": "g2", "name": "South", "type": "league"}
            ]
        },
        {
            "name": "National Cup",
            "groups": [{"id": "g3", "name": "Bracket", "type": "playoff"}]
        }
    ]))
    .unwrap()
}

fn calendar_g1() -> Calendar {
    serde_json::from_value(json!({
        "rounds": [
            {"matches": [
                {
                    "id": "m1",
                    "date": "2026-01-10T18:00:00Z",
                    "status": "CLOSED",
                    "homeTeam": {"id": "t1", "name": "Lions", "logo": "lions.png"},
                    "awayTeam": {"id": "t2", "name": "Tigers"},
                    "court": {"place": "Main Arena", "address": "1 Court St"},
                    "score": {"totals": [
                        {"teamId": "t1", "total": 85},
                        {"teamId": "t2", "total": 78}
                    ]}
                },
                {
                    "id": "m2",
                    "date": "2026-01-17T18:00:00Z",
                    "status": "NOT_STARTED",
                    "homeTeam": {"id": "t2", "name": "Tigers"},
                    "awayTeam": {"id": "t3", "name": "Bears"}
                }
            ]},
            {"matches": [
                {
                    "id": "m3",
                    "status": "LIVE",
                    "homeTeam": {"id": "t1", "name": "Lions"},
                    "awayTeam": {"id": "t3", "name": "Bears"}
                }
            ]}
        ]
    }))
    .unwrap()
}

fn calendar_g2() -> Calendar {
    serde_json::from_value(json!({
        "rounds": [{"matches": [
            {
                "id": "m4",
                "date": "2026-01-12T19:00:00Z",
                "status": "CLOSED",
                "homeTeam": {"id": "t4", "name": "Red Lions"},
                "awayTeam": {"id": "t5", "name": "Wolves"}
            }
        ]}]
    }))
    .unwrap()
}

fn calendar_g3() -> Calendar {
    serde_json::from_value(json!({
        "rounds": [{"matches": [
            {
                "id": "m5",
                "date": "2025-03-01T20:00:00Z",
                "status": "CLOSED",
                "homeTeam": {"id": "t1", "name": "Lions"},
                "awayTeam": {"id": "t4", "name": "Red Lions"}
            }
        ]}]
    }))
    .unwrap()
}

fn standings_g1() -> Vec<StandingEntry> {
    serde_json::from_value(json!([
        {"teamId": "t2", "position": 2, "wins": 5},
        {"teamId": "t1", "position": 1, "wins": 7},
        {"position": 3}
    ]))
    .unwrap()
}

/// The canonical write sequence every backend under test receives.
async fn populate(store: &dyn Store) {
    store.initialize().await.unwrap();
    store.save_seasons(&seasons()).await.unwrap();
    store
        .save_competitions("s1", &competitions_s1())
        .await
        .unwrap();
    store
        .save_matches("g1", &calendar_g1(), "Premier League", "North", "s1")
        .await
        .unwrap();
    store
        .save_matches("g2", &calendar_g2(), "Premier League", "South", "s1")
        .await
        .unwrap();
    store
        .save_matches("g3", &calendar_g3(), "National Cup", "Bracket", "s2")
        .await
        .unwrap();
    store.save_standings("g1", &standings_g1()).await.unwrap();
}

fn filter_battery() -> Vec<MatchFilter> {
    vec![
        MatchFilter::default(),
        MatchFilter {
            season_id: Some("s1".to_string()),
            ..Default::default()
        },
        MatchFilter {
            competition_name: Some("premier".to_string()),
            ..Default::default()
        },
        MatchFilter {
            competition_name: Some("PREMIER".to_string()),
            ..Default::default()
        },
        MatchFilter {
            team_name: Some("lions".to_string()),
            ..Default::default()
        },
        MatchFilter {
            team_id: Some("t1".to_string()),
            ..Default::default()
        },
        MatchFilter {
            team_id: Some("t1".to_string()),
            team_name: Some("no such team".to_string()),
            ..Default::default()
        },
        MatchFilter {
            group_id: Some("g1".to_string()),
            ..Default::default()
        },
        MatchFilter {
            status: Some(MatchStatus::Closed),
            ..Default::default()
        },
        MatchFilter {
            date_from: Some("2026-01-10T18:00:00Z".to_string()),
            date_to: Some("2026-01-12T19:00:00Z".to_string()),
            ..Default::default()
        },
        MatchFilter {
            limit: Some(2),
            ..Default::default()
        },
        MatchFilter {
            season_id: Some("s1".to_string()),
            status: Some(MatchStatus::Closed),
            team_name: Some("lions".to_string()),
            ..Default::default()
        },
    ]
}

async fn match_ids(store: &dyn Store, filter: &MatchFilter) -> Vec<String> {
    store
        .get_matches(filter)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect()
}

async fn assert_reads_identical(a: &dyn Store, b: &dyn Store, label: &str) {
    let season_ids = |s: Vec<Season>| s.into_iter().map(|x| x.id).collect::<Vec<_>>();
    assert_eq!(
        season_ids(a.get_seasons().await.unwrap()),
        season_ids(b.get_seasons().await.unwrap()),
        "{}: get_seasons",
        label
    );

    let comp_names = |c: Vec<Competition>| c.into_iter().map(|x| x.name).collect::<Vec<_>>();
    assert_eq!(
        comp_names(a.get_competitions("s1").await.unwrap()),
        comp_names(b.get_competitions("s1").await.unwrap()),
        "{}: get_competitions",
        label
    );
    assert_eq!(
        a.get_all_competitions()
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.season_id, r.competition.name))
            .collect::<Vec<_>>(),
        b.get_all_competitions()
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.season_id, r.competition.name))
            .collect::<Vec<_>>(),
        "{}: get_all_competitions",
        label
    );

    for (i, filter) in filter_battery().iter().enumerate() {
        assert_eq!(
            match_ids(a, filter).await,
            match_ids(b, filter).await,
            "{}: filter #{} ({:?})",
            label,
            i,
            filter
        );
    }

    let team_ids = |t: Vec<courtside::model::Team>| t.into_iter().map(|x| x.id).collect::<Vec<_>>();
    for season in [None, Some("s1"), Some("s2"), Some("missing")] {
        assert_eq!(
            team_ids(a.get_teams(season).await.unwrap()),
            team_ids(b.get_teams(season).await.unwrap()),
            "{}: get_teams({:?})",
            label,
            season
        );
    }
    for group in ["g1", "g2", "g3", "missing"] {
        assert_eq!(
            team_ids(a.get_teams_by_group(group).await.unwrap()),
            team_ids(b.get_teams_by_group(group).await.unwrap()),
            "{}: get_teams_by_group({})",
            label,
            group
        );
    }
    for (query, season) in [("lion", None), ("LION", None), ("lion", Some("s1")), ("zzz", None)] {
        assert_eq!(
            team_ids(a.search_teams(query, season).await.unwrap()),
            team_ids(b.search_teams(query, season).await.unwrap()),
            "{}: search_teams({}, {:?})",
            label,
            query,
            season
        );
    }

    assert_eq!(
        a.get_standings("g1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| (s.team_id, s.position))
            .collect::<Vec<_>>(),
        b.get_standings("g1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| (s.team_id, s.position))
            .collect::<Vec<_>>(),
        "{}: get_standings",
        label
    );

    assert_eq!(
        a.get_all_group_ids().await.unwrap(),
        b.get_all_group_ids().await.unwrap(),
        "{}: get_all_group_ids",
        label
    );
    assert_eq!(
        a.get_all_team_ids().await.unwrap(),
        b.get_all_team_ids().await.unwrap(),
        "{}: get_all_team_ids",
        label
    );
}

#[tokio::test]
async fn sqlite_memory_and_hashmap_stores_agree() {
    let dir = tempfile::TempDir::new().unwrap();
    let file_store = SqliteStore::open(&dir.path().join("conformance.db")).unwrap();
    let mem_sqlite = SqliteStore::open_in_memory().unwrap();
    let mem_store = MemoryStore::new();

    populate(&file_store).await;
    populate(&mem_sqlite).await;
    populate(&mem_store).await;

    assert_reads_identical(&file_store, &mem_sqlite, "file vs :memory:").await;
    assert_reads_identical(&file_store, &mem_store, "file vs hashmap").await;
}

#[tokio::test]
async fn repeated_writes_are_idempotent() {
    let ttls = CacheTtls {
        full: Duration::minutes(60),
        matches: Duration::minutes(60),
    };
    let store = SqliteStore::open_in_memory().unwrap();

    populate(&store).await;
    let first = store.get_cache_info(&ttls).await.unwrap().stats;

    populate(&store).await;
    let second = store.get_cache_info(&ttls).await.unwrap().stats;

    assert_eq!(first, second);
    assert_eq!(second.seasons, 2);
    assert_eq!(second.matches, 5);
    assert_eq!(second.teams, 5);
    assert_eq!(second.standings, 2, "entry without teamId is skipped");
}

#[tokio::test]
async fn matches_only_reuses_stored_group_context() {
    let store = SqliteStore::open_in_memory().unwrap();
    populate(&store).await;

    // Rewrite g1 through the context-resolving path; denormalized names
    // must come out the same as the explicit save.
    store.save_matches_only("g1", &calendar_g1()).await.unwrap();
    let m1 = &store
        .get_matches(&MatchFilter {
            group_id: Some("g1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap()[0];
    assert_eq!(m1.competition_name, "Premier League");
    assert_eq!(m1.group_name, "North");
    assert_eq!(m1.season_id, "s1");
}

#[tokio::test]
async fn synthesized_competition_ids_survive_refreshes() {
    let store = MemoryStore::new();
    populate(&store).await;

    // The cup has no upstream id; a second save must hit the same row.
    store
        .save_competitions("s1", &competitions_s1())
        .await
        .unwrap();
    let comps = store.get_competitions("s1").await.unwrap();
    assert_eq!(comps.len(), 2);
}

#[tokio::test]
async fn end_to_end_scenario() {
    let store = SqliteStore::open_in_memory().unwrap();
    populate(&store).await;

    // Status filter: three CLOSED matches, chronological order.
    let closed = store
        .get_matches(&MatchFilter {
            status: Some(MatchStatus::Closed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(
        closed.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
        vec!["m5", "m1", "m4"]
    );
    assert_eq!(closed[1].home_score, Some(85));
    assert_eq!(closed[1].away_score, Some(78));

    // Team filter by id spans home and away appearances.
    let t1_matches = store
        .get_matches(&MatchFilter {
            team_id: Some("t1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(
        t1_matches.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
        vec!["m3", "m5", "m1"],
        "undated LIVE match sorts first"
    );

    // Freshness transitions around the clock update.
    let ttls = CacheTtls {
        full: Duration::minutes(60),
        matches: Duration::minutes(60),
    };
    let before = store.get_cache_info(&ttls).await.unwrap();
    assert!(!before.exists);
    assert!(before.stale);

    store.update_scrape_timestamp().await.unwrap();
    let after = store.get_cache_info(&ttls).await.unwrap();
    assert!(after.exists);
    assert!(!after.stale);
    assert!(!after.match_stale, "match staleness falls back to the full clock");
}

mod idempotence_property {
    use super::*;
    use proptest::prelude::*;

    fn season_strategy() -> impl Strategy<Value = Vec<Season>> {
        proptest::collection::vec(
            ("[a-z0-9]{1,8}", "[A-Za-z0-9 /]{0,16}").prop_map(|(id, name)| Season {
                id,
                name,
                start_date: None,
                end_date: None,
                extra: Default::default(),
            }),
            0..8,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn saving_seasons_twice_changes_nothing(seasons in season_strategy()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let store = MemoryStore::new();
                store.initialize().await.unwrap();

                store.save_seasons(&seasons).await.unwrap();
                let once = store.get_seasons().await.unwrap();

                store.save_seasons(&seasons).await.unwrap();
                let twice = store.get_seasons().await.unwrap();

                prop_assert_eq!(once, twice);
                Ok(())
            })?;
        }
    }
}
