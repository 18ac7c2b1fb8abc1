//! Persistence, synchronization, and query engine for sports-league
//! scheduling data.
//!
//! Schedule data (seasons, competitions, groups, matches, teams, standings)
//! is harvested from an upstream provider, cached in one of several
//! interchangeable storage backends, and served back through a filtered
//! read API that feeds calendar exports.
//!
//! The pieces:
//! - [`store`]: the storage contract and its backends (embedded SQLite,
//!   Turso over Hrana, Supabase over PostgREST, plus an in-memory store)
//! - [`sync`]: the refresh orchestrator and the acquisition source it
//!   pulls from
//! - [`query`]: the read-only façade callers talk to
//! - [`model`]: entity records and the upstream calendar shapes
//! - [`config`] / [`logging`] / [`error`]: the surrounding plumbing

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod query;
pub mod store;
pub mod sync;

pub use config::{AppConfig, BackendKind};
pub use error::StoreError;
pub use query::{MatchQuery, QueryService};
pub use store::{open_store, CacheInfo, CacheTtls, MatchFilter, MemoryStore, SqliteStore, Store};
pub use sync::{Orchestrator, RefreshMode, RefreshStart, ScheduleSource, SyncState};
