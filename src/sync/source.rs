//! Acquisition collaborator contract.
//!
//! The orchestrator never talks to the upstream provider directly; it goes
//! through `ScheduleSource`, which tests replace with scripted fakes. The
//! pagination driver lives here too, shared by any source that reads
//! page-numbered collections.

use crate::model::{Calendar, Competition, Season, StandingEntry};
use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    /// The provider understood the request and said no (bad token, gone
    /// resource). Retrying will not help.
    #[error("upstream rejected request: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::Decode(err.to_string())
        } else {
            SourceError::Transport(err.to_string())
        }
    }
}

/// Outcome of fetching one page of a collection.
#[derive(Debug)]
pub enum FetchOutcome<T> {
    /// A page of records; more may follow.
    Data(Vec<T>),
    /// The collection is exhausted.
    End,
    /// A failure worth retrying (timeout, 5xx, throttle).
    Transient(String),
}

/// Everything a full refresh writes, fetched up front so an upstream failure
/// midway never leaves half a snapshot behind.
#[derive(Debug, Clone, Default)]
pub struct FullSnapshot {
    pub seasons: Vec<Season>,
    pub competitions: Vec<SeasonCompetitions>,
    pub groups: Vec<GroupSnapshot>,
}

#[derive(Debug, Clone)]
pub struct SeasonCompetitions {
    pub season_id: String,
    pub competitions: Vec<Competition>,
}

/// One group's calendar and standings plus the names denormalized onto its
/// match rows.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub group_id: String,
    pub season_id: String,
    pub competition_name: String,
    pub group_name: String,
    pub calendar: Calendar,
    pub standings: Vec<StandingEntry>,
}

/// Fresh match and standings data for one already-known group.
#[derive(Debug, Clone, Default)]
pub struct GroupDelta {
    pub calendar: Calendar,
    pub standings: Vec<StandingEntry>,
}

#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn fetch_full_snapshot(&self) -> Result<FullSnapshot, SourceError>;

    async fn fetch_group_delta(&self, group_id: &str) -> Result<GroupDelta, SourceError>;
}

/// Drains a page-numbered collection, retrying transient failures with
/// linear backoff and deduplicating by key.
///
/// Page boundaries upstream are not stable between requests, so a record can
/// appear on two consecutive pages; the first occurrence wins. `fetch_page`
/// is called with 1-based page numbers.
pub async fn drain_pages<T, K, F, Fut>(
    mut fetch_page: F,
    key: K,
    max_retries: u32,
) -> Result<Vec<T>, SourceError>
where
    K: Fn(&T) -> String,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<FetchOutcome<T>, SourceError>>,
{
    let mut out = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut page = 1usize;
    let mut attempt = 0u32;

    loop {
        match fetch_page(page).await? {
            FetchOutcome::Data(items) => {
                for item in items {
                    if seen.insert(key(&item)) {
                        out.push(item);
                    }
                }
                page += 1;
                attempt = 0;
            }
            FetchOutcome::End => return Ok(out),
            FetchOutcome::Transient(reason) => {
                attempt += 1;
                if attempt > max_retries {
                    return Err(SourceError::Transport(format!(
                        "page {} failed after {} retries: {}",
                        page, max_retries, reason
                    )));
                }
                warn!(page, attempt, reason, "transient fetch failure, retrying");
                tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn drains_until_end_and_dedups_across_pages() {
        let result = drain_pages(
            |page| async move {
                Ok(match page {
                    1 => FetchOutcome::Data(vec!["a", "b"]),
                    2 => FetchOutcome::Data(vec!["b", "c"]),
                    _ => FetchOutcome::End,
                })
            },
            |s: &&str| s.to_string(),
            3,
        )
        .await
        .unwrap();
        assert_eq!(result, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_then_succeed() {
        let failures = AtomicU32::new(0);
        let failures = &failures;
        let result = drain_pages(
            move |page| async move {
                if page == 1 && failures.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Ok(FetchOutcome::Transient("503".to_string()));
                }
                Ok(match page {
                    1 => FetchOutcome::Data(vec!["a"]),
                    _ => FetchOutcome::End,
                })
            },
            |s: &&str| s.to_string(),
            3,
        )
        .await
        .unwrap();
        assert_eq!(result, vec!["a"]);
        assert_eq!(failures.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let err = drain_pages(
            |_page| async { Ok(FetchOutcome::Transient::<&str>("boom".to_string())) },
            |s: &&str| s.to_string(),
            2,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SourceError::Transport(_)));
    }

    #[tokio::test]
    async fn hard_errors_propagate_immediately() {
        let calls = AtomicU32::new(0);
        let err = drain_pages(
            |_page| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<FetchOutcome<&str>, _>(SourceError::Rejected("401".to_string())) }
            },
            |s: &&str| s.to_string(),
            5,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SourceError::Rejected(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
