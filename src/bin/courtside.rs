//! Courtside CLI Binary
//!
//! Operational interface for the schedule cache: inspect freshness, run
//! refreshes, clear data, reclaim space.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use courtside::config::AppConfig;
use courtside::logging::init_logging;
use courtside::query::QueryService;
use courtside::store::{open_store, CacheTtls};
use courtside::sync::{Orchestrator, RefreshMode, RefreshStart, RestScheduleSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "courtside", version, about = "Sports-league schedule cache")]
struct Cli {
    /// Configuration file (default: courtside.toml in the working directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show cache freshness, table counts, and database size
    Status,
    /// Fetch fresh data from the upstream provider
    Refresh {
        /// What to refresh; auto picks based on cache staleness
        #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
        mode: ModeArg,
        /// Bypass the refresh cooldown
        #[arg(long)]
        force: bool,
    },
    /// Delete all stored data (the schema stays)
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Reclaim storage space where the backend supports it
    Vacuum,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Auto,
    Full,
    Matches,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(Some(&config.logging)).context("initializing logging")?;
    info!(backend = ?config.backend, "courtside starting");

    let store = open_store(&config).await.context("opening store")?;
    let ttls = CacheTtls::from_config(&config.cache);

    match cli.command {
        Command::Status => {
            let queries = QueryService::new(Arc::clone(&store), ttls);
            let info = queries.cache_info().await?;
            let size = store.get_database_size().await?;

            println!("backend:        {:?}", config.backend);
            println!("snapshot:       {}", if info.exists { "present" } else { "none" });
            if let Some(age) = info.age_minutes {
                println!(
                    "last refresh:   {} minutes ago ({})",
                    age,
                    if info.stale { "stale" } else { "fresh" }
                );
            }
            if let Some(age) = info.match_age_minutes {
                println!(
                    "match data:     {} minutes ago ({})",
                    age,
                    if info.match_stale { "stale" } else { "fresh" }
                );
            }
            println!(
                "rows:           {} seasons, {} competitions, {} groups, {} matches, {} teams, {} standings",
                info.stats.seasons,
                info.stats.competitions,
                info.stats.groups,
                info.stats.matches,
                info.stats.teams,
                info.stats.standings
            );
            println!("database size:  {} bytes", size);

            if !info.exists {
                println!();
                println!("no snapshot stored yet; run `courtside refresh --mode full`");
            }
        }

        Command::Refresh { mode, force } => {
            let source = Arc::new(
                RestScheduleSource::new(&config.upstream)
                    .map_err(|e| anyhow::anyhow!("upstream source: {}", e))?,
            );
            let orchestrator = Orchestrator::new(
                Arc::clone(&store),
                source,
                ttls,
                Duration::from_secs(config.cache.refresh_cooldown_seconds),
            );

            let mode = match mode {
                ModeArg::Full => RefreshMode::Full,
                ModeArg::Matches => RefreshMode::MatchesOnly,
                ModeArg::Auto => {
                    let info = store.get_cache_info(&ttls).await?;
                    if !info.exists {
                        // Explicit operator request; populate from scratch.
                        RefreshMode::Full
                    } else {
                        match orchestrator.plan().await? {
                            Some(mode) => mode,
                            None => {
                                println!("cache is fresh; nothing to refresh");
                                return Ok(());
                            }
                        }
                    }
                }
            };

            match orchestrator.run_blocking(mode, force).await {
                RefreshStart::Started => {
                    let status = orchestrator.status();
                    if let Some(error) = status.last_error {
                        bail!("refresh failed: {}", error);
                    }
                    if let Some(result) = status.last_result {
                        println!(
                            "refreshed: {} seasons, {} competitions, {} matches, {} standings",
                            result.seasons, result.competitions, result.matches, result.standings
                        );
                        if !result.failed_groups.is_empty() {
                            println!("failed groups: {}", result.failed_groups.join(", "));
                        }
                        if !result.missing_teams.is_empty() {
                            println!("unknown team ids seen: {}", result.missing_teams.join(", "));
                        }
                    }
                }
                RefreshStart::AlreadyRunning => bail!("a refresh is already running"),
                RefreshStart::RateLimited { retry_after } => {
                    bail!("rate limited; retry in {} seconds (or pass --force)", retry_after)
                }
            }
        }

        Command::Clear { yes } => {
            if !yes {
                bail!("refusing to delete all data without --yes");
            }
            store.clear_all().await?;
            println!("all data cleared");
        }

        Command::Vacuum => {
            let before = store.get_database_size().await?;
            store.vacuum().await?;
            let after = store.get_database_size().await?;
            println!("vacuum done: {} -> {} bytes", before, after);
        }
    }

    Ok(())
}
