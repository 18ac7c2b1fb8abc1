//! Entity records and upstream calendar shapes.
//!
//! Every record is a typed struct with named fields plus one `extra` bag
//! (`#[serde(flatten)]`) so unknown upstream fields survive the round trip
//! into the stored `payload` column and back out to the export renderer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A league season as delivered by the upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Season {
    /// Upstream id (the provider emits `_id`)
    #[serde(alias = "_id")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "startDate")]
    pub start_date: Option<String>,

    #[serde(default, rename = "endDate")]
    pub end_date: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A competition within a season, carrying its nested groups.
///
/// The upstream id is optional; storage synthesizes a deterministic id from
/// `season_id` and `name` when it is absent (see [`Competition::storage_id`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Competition {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub groups: Vec<Group>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Competition {
    /// Id the competition is stored under. Synthesized ids must be stable
    /// across refreshes, so the fallback is a pure function of the inputs.
    pub fn storage_id(&self, season_id: &str) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{}_{}", season_id, self.name),
        }
    }
}

/// A competition group (division); `kind` is `league` or `playoff` upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A competition together with the season it was stored under.
///
/// Returned by `get_all_competitions`, where rows from every season are mixed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompetitionRecord {
    pub season_id: String,
    pub competition: Competition,
}

/// Match lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    NotStarted,
    Live,
    Closed,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::NotStarted => "NOT_STARTED",
            MatchStatus::Live => "LIVE",
            MatchStatus::Closed => "CLOSED",
        }
    }

    /// Lenient parse; unknown upstream statuses become `None` rather than
    /// failing the row.
    pub fn parse(s: &str) -> Option<MatchStatus> {
        match s {
            "NOT_STARTED" => Some(MatchStatus::NotStarted),
            "LIVE" => Some(MatchStatus::Live),
            "CLOSED" => Some(MatchStatus::Closed),
            _ => None,
        }
    }
}

/// A stored match row: flat denormalized columns plus the full upstream
/// payload, so the export renderer never needs a join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Match {
    pub id: String,
    pub season_id: String,
    pub group_id: String,
    pub competition_name: String,
    pub group_name: String,
    pub home_team_id: Option<String>,
    pub home_team_name: Option<String>,
    pub away_team_id: Option<String>,
    pub away_team_name: Option<String>,
    /// ISO-8601; lexicographic order is chronological order
    pub date: Option<String>,
    pub status: Option<MatchStatus>,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub venue: Option<String>,
    pub venue_address: Option<String>,
    /// Full upstream record, retained for forward-compatible export
    pub payload: Value,
}

/// A team as reconstructed from match rows. Not independently authoritative:
/// the tuple from the most recently written match wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub logo: Option<String>,
}

/// A stored standings row, keyed by (group_id, team_id).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Standing {
    pub group_id: String,
    pub team_id: String,
    pub position: Option<i64>,
    pub payload: Value,
}

/// A standings entry as delivered by the upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StandingEntry {
    #[serde(default)]
    pub team_id: Option<String>,

    #[serde(default)]
    pub position: Option<i64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Upstream calendar shapes (camelCase on the wire)
// ---------------------------------------------------------------------------

/// A group calendar: rounds of matches as returned by the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Calendar {
    #[serde(default)]
    pub rounds: Vec<Round>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Round {
    #[serde(default)]
    pub matches: Vec<RawMatch>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One match as delivered upstream, before denormalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawMatch {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub date: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub home_team: Option<TeamRef>,

    #[serde(default)]
    pub away_team: Option<TeamRef>,

    #[serde(default)]
    pub court: Option<Court>,

    #[serde(default)]
    pub score: Option<Score>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TeamRef {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub logo: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Court {
    #[serde(default)]
    pub place: Option<String>,

    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub town: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Score {
    #[serde(default)]
    pub totals: Vec<ScoreTotal>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreTotal {
    #[serde(default)]
    pub team_id: Option<String>,

    #[serde(default)]
    pub total: Option<i64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Matches and teams extracted from one calendar, ready for upsert.
#[derive(Debug, Clone, Default)]
pub struct ExtractedCalendar {
    pub matches: Vec<Match>,
    pub teams: Vec<Team>,
}

impl Calendar {
    /// Flatten rounds into denormalized match rows and the team tuples seen
    /// in them. Matches without an upstream id are skipped. Team entries are
    /// deduped by id with the last occurrence winning.
    pub fn extract(
        &self,
        group_id: &str,
        competition_name: &str,
        group_name: &str,
        season_id: &str,
    ) -> ExtractedCalendar {
        let mut matches = Vec::new();
        let mut team_order: Vec<String> = Vec::new();
        let mut teams: std::collections::HashMap<String, Team> = std::collections::HashMap::new();

        for round in &self.rounds {
            for raw in &round.matches {
                let Some(id) = raw.id.clone() else {
                    continue;
                };

                let home = raw.home_team.as_ref();
                let away = raw.away_team.as_ref();
                let (home_score, away_score) = raw.score_totals(home, away);

                for side in [home, away].into_iter().flatten() {
                    if let Some(team_id) = &side.id {
                        if !teams.contains_key(team_id) {
                            team_order.push(team_id.clone());
                        }
                        teams.insert(
                            team_id.clone(),
                            Team {
                                id: team_id.clone(),
                                name: side.name.clone().unwrap_or_default(),
                                logo: side.logo.clone(),
                            },
                        );
                    }
                }

                matches.push(Match {
                    id,
                    season_id: season_id.to_string(),
                    group_id: group_id.to_string(),
                    competition_name: competition_name.to_string(),
                    group_name: group_name.to_string(),
                    home_team_id: home.and_then(|t| t.id.clone()),
                    home_team_name: home.and_then(|t| t.name.clone()),
                    away_team_id: away.and_then(|t| t.id.clone()),
                    away_team_name: away.and_then(|t| t.name.clone()),
                    date: raw.date.clone(),
                    status: raw.status.as_deref().and_then(MatchStatus::parse),
                    home_score,
                    away_score,
                    venue: raw.court.as_ref().and_then(|c| c.place.clone()),
                    venue_address: raw.court.as_ref().and_then(|c| c.address.clone()),
                    payload: serde_json::to_value(raw).unwrap_or(Value::Null),
                });
            }
        }

        let teams = team_order
            .into_iter()
            .filter_map(|id| teams.remove(&id))
            .collect();

        ExtractedCalendar { matches, teams }
    }

    /// All team ids referenced by home/away fields, in first-seen order.
    pub fn referenced_team_ids(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut ids = Vec::new();
        for round in &self.rounds {
            for raw in &round.matches {
                for side in [&raw.home_team, &raw.away_team].into_iter().flatten() {
                    if let Some(id) = &side.id {
                        if seen.insert(id.clone()) {
                            ids.push(id.clone());
                        }
                    }
                }
            }
        }
        ids
    }
}

impl RawMatch {
    /// Score totals keyed back to the home/away team ids.
    fn score_totals(
        &self,
        home: Option<&TeamRef>,
        away: Option<&TeamRef>,
    ) -> (Option<i64>, Option<i64>) {
        let mut home_score = None;
        let mut away_score = None;
        if let Some(score) = &self.score {
            for total in &score.totals {
                if total.team_id.is_some() && total.team_id == home.and_then(|t| t.id.clone()) {
                    home_score = total.total;
                } else if total.team_id.is_some()
                    && total.team_id == away.and_then(|t| t.id.clone())
                {
                    away_score = total.total;
                }
            }
        }
        (home_score, away_score)
    }
}
