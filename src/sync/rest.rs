//! REST-backed schedule source.
//!
//! Adapts the upstream provider's HTTP API to `ScheduleSource` given a
//! pre-captured bearer token. Match lists are page-numbered; everything else
//! is a single fetch. Group fetches are paced to stay under the provider's
//! radar.

use super::source::{
    drain_pages, FetchOutcome, FullSnapshot, GroupDelta, GroupSnapshot, ScheduleSource,
    SeasonCompetitions, SourceError,
};
use crate::config::UpstreamConfig;
use crate::model::{Calendar, Competition, RawMatch, Round, Season, StandingEntry};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

const PER_PAGE: usize = 100;

pub struct RestScheduleSource {
    client: reqwest::Client,
    base_url: String,
    token: String,
    pacing: Duration,
    max_retries: u32,
}

impl RestScheduleSource {
    pub fn new(cfg: &UpstreamConfig) -> Result<Self, SourceError> {
        if cfg.token.is_empty() {
            return Err(SourceError::Rejected(
                "no bearer token configured".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
            pacing: Duration::from_secs(cfg.fetch_pacing_secs),
            max_retries: cfg.max_retries,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if status.is_client_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SourceError::Rejected(format!("{}: {}", status, text)));
        }
        if !status.is_success() {
            return Err(SourceError::Transport(format!("{} from {}", status, path)));
        }
        Ok(resp.json().await?)
    }

    async fn fetch_seasons(&self) -> Result<Vec<Season>, SourceError> {
        self.get_json("/v1/seasons", &[]).await
    }

    async fn fetch_competitions(&self, season_id: &str) -> Result<Vec<Competition>, SourceError> {
        self.get_json(&format!("/v1/seasons/{}/competitions", season_id), &[])
            .await
    }

    /// Pages through a group's match list. A short page marks the end; the
    /// next call reports it so the driver stops cleanly.
    async fn fetch_calendar(&self, group_id: &str) -> Result<Calendar, SourceError> {
        let exhausted = AtomicBool::new(false);
        let exhausted = &exhausted;
        let matches: Vec<RawMatch> = drain_pages(
            move |page| async move {
                if exhausted.load(Ordering::Relaxed) {
                    return Ok(FetchOutcome::End);
                }
                let result: Result<Vec<RawMatch>, SourceError> = self
                    .get_json(
                        &format!("/v1/groups/{}/matches", group_id),
                        &[
                            ("page", page.to_string()),
                            ("perPage", PER_PAGE.to_string()),
                        ],
                    )
                    .await;
                match result {
                    Ok(items) => {
                        if items.len() < PER_PAGE {
                            exhausted.store(true, Ordering::Relaxed);
                        }
                        if items.is_empty() {
                            Ok(FetchOutcome::End)
                        } else {
                            Ok(FetchOutcome::Data(items))
                        }
                    }
                    Err(SourceError::Transport(reason)) => Ok(FetchOutcome::Transient(reason)),
                    Err(other) => Err(other),
                }
            },
            |m: &RawMatch| m.id.clone().unwrap_or_default(),
            self.max_retries,
        )
        .await?;

        debug!(group_id, matches = matches.len(), "fetched calendar");
        Ok(Calendar {
            rounds: vec![Round {
                matches,
                extra: Default::default(),
            }],
            extra: Default::default(),
        })
    }

    async fn fetch_standings(&self, group_id: &str) -> Result<Vec<StandingEntry>, SourceError> {
        self.get_json(&format!("/v1/groups/{}/standings", group_id), &[])
            .await
    }
}

#[async_trait]
impl ScheduleSource for RestScheduleSource {
    async fn fetch_full_snapshot(&self) -> Result<FullSnapshot, SourceError> {
        let seasons = self.fetch_seasons().await?;
        info!(seasons = seasons.len(), "fetching full snapshot");

        let mut snapshot = FullSnapshot {
            seasons,
            ..Default::default()
        };

        for season in &snapshot.seasons {
            let competitions = self.fetch_competitions(&season.id).await?;

            for comp in &competitions {
                for group in &comp.groups {
                    tokio::time::sleep(self.pacing).await;
                    let calendar = self.fetch_calendar(&group.id).await?;
                    let standings = self.fetch_standings(&group.id).await?;
                    snapshot.groups.push(GroupSnapshot {
                        group_id: group.id.clone(),
                        season_id: season.id.clone(),
                        competition_name: comp.name.clone(),
                        group_name: group.name.clone(),
                        calendar,
                        standings,
                    });
                }
            }

            snapshot.competitions.push(SeasonCompetitions {
                season_id: season.id.clone(),
                competitions,
            });
        }

        Ok(snapshot)
    }

    async fn fetch_group_delta(&self, group_id: &str) -> Result<GroupDelta, SourceError> {
        let calendar = self.fetch_calendar(group_id).await?;
        let standings = self.fetch_standings(group_id).await?;
        Ok(GroupDelta {
            calendar,
            standings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_a_token() {
        let cfg = UpstreamConfig {
            token: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            RestScheduleSource::new(&cfg),
            Err(SourceError::Rejected(_))
        ));
    }

    // The orchestrator polls these futures from a spawned task, so they must
    // stay Send even while the pagination state is borrowed across awaits.
    #[test]
    fn fetch_futures_are_send() {
        fn assert_send<F: Send>(_: F) {}
        let cfg = UpstreamConfig {
            base_url: "https://api.example.com".to_string(),
            token: "tok".to_string(),
            ..Default::default()
        };
        let source = RestScheduleSource::new(&cfg).unwrap();
        assert_send(source.fetch_calendar("g1"));
        assert_send(source.fetch_full_snapshot());
        assert_send(source.fetch_group_delta("g1"));
    }

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let cfg = UpstreamConfig {
            base_url: "https://api.example.com/".to_string(),
            token: "tok".to_string(),
            ..Default::default()
        };
        let source = RestScheduleSource::new(&cfg).unwrap();
        assert_eq!(source.base_url, "https://api.example.com");
    }
}
