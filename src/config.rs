//! Configuration system.
//!
//! Hierarchical configuration: a TOML file (optional) layered under
//! `COURTSIDE_*` environment variable overrides, validated before the
//! first backend connection is opened.

use crate::error::StoreError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which storage backend the application talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Turso,
    Supabase,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Sqlite
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Selected storage backend
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default)]
    pub sqlite: SqliteConfig,

    #[serde(default)]
    pub turso: TursoConfig,

    #[serde(default)]
    pub supabase: SupabaseConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Embedded SQLite backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Directory the database file lives in
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Database file name
    #[serde(default = "default_db_file")]
    pub file: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_db_file() -> String {
    "courtside.db".to_string()
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            file: default_db_file(),
        }
    }
}

impl SqliteConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.file)
    }
}

/// Turso (Hrana-over-HTTP) backend settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TursoConfig {
    /// Database URL (libsql:// or https://)
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub auth_token: String,
}

/// Supabase (PostgREST) backend settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupabaseConfig {
    /// Project URL, e.g. https://xyz.supabase.co
    #[serde(default)]
    pub url: String,

    /// Service or anon API key
    #[serde(default)]
    pub key: String,
}

/// Upstream schedule provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Pre-captured bearer token
    #[serde(default)]
    pub token: String,

    /// Seconds to pause between per-group fetches
    #[serde(default = "default_fetch_pacing_secs")]
    pub fetch_pacing_secs: u64,

    /// Retry attempts per page on transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_base_url() -> String {
    "https://api.example.invalid".to_string()
}

fn default_fetch_pacing_secs() -> u64 {
    1
}

fn default_max_retries() -> u32 {
    3
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: String::new(),
            fetch_pacing_secs: default_fetch_pacing_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Staleness and rate-limit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Full-snapshot TTL in minutes (default: one week)
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,

    /// Match-data TTL in minutes (default: three hours)
    #[serde(default = "default_match_ttl_minutes")]
    pub match_ttl_minutes: u64,

    /// Minimum seconds between accepted refresh requests
    #[serde(default = "default_refresh_cooldown_seconds")]
    pub refresh_cooldown_seconds: u64,
}

fn default_ttl_minutes() -> u64 {
    10080
}

fn default_match_ttl_minutes() -> u64 {
    180
}

fn default_refresh_cooldown_seconds() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
            match_ttl_minutes: default_match_ttl_minutes(),
            refresh_cooldown_seconds: default_refresh_cooldown_seconds(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file layered under
    /// `COURTSIDE_*` environment overrides (e.g. `COURTSIDE_BACKEND=turso`,
    /// `COURTSIDE_TURSO__AUTH_TOKEN=...`).
    pub fn load(file: Option<&Path>) -> Result<Self, StoreError> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        } else {
            builder = builder.add_source(config::File::with_name("courtside").required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("COURTSIDE")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder
            .build()
            .map_err(|e| StoreError::Configuration(format!("failed to read config: {}", e)))?;

        let cfg: AppConfig = raw
            .try_deserialize()
            .map_err(|e| StoreError::Configuration(format!("invalid config: {}", e)))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Fail fast on parameters the selected backend cannot run without.
    pub fn validate(&self) -> Result<(), StoreError> {
        match self.backend {
            BackendKind::Sqlite => {
                if self.sqlite.file.is_empty() {
                    return Err(StoreError::Configuration(
                        "sqlite.file cannot be empty".to_string(),
                    ));
                }
            }
            BackendKind::Turso => {
                if self.turso.url.is_empty() {
                    return Err(StoreError::Configuration(
                        "turso.url is required for the turso backend".to_string(),
                    ));
                }
                if self.turso.auth_token.is_empty() {
                    return Err(StoreError::Configuration(
                        "turso.auth_token is required for the turso backend".to_string(),
                    ));
                }
            }
            BackendKind::Supabase => {
                if self.supabase.url.is_empty() {
                    return Err(StoreError::Configuration(
                        "supabase.url is required for the supabase backend".to_string(),
                    ));
                }
                if self.supabase.key.is_empty() {
                    return Err(StoreError::Configuration(
                        "supabase.key is required for the supabase backend".to_string(),
                    ));
                }
            }
        }

        if self.cache.ttl_minutes == 0 || self.cache.match_ttl_minutes == 0 {
            return Err(StoreError::Configuration(
                "cache TTLs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
