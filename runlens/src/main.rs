//! runlens - CLI for the reporting side of CI run telemetry
//!
//! This tool provides commands for:
//! - Validating and showing the effective analytics configuration
//! - Classifying a failure message
//! - Aggregating stored run events and merging aggregates
//! - Inspecting, clearing and pruning the analytics cache
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/runlens/config.toml (~/.config/runlens/config.toml)
//! - Cache: $XDG_STATE_HOME/runlens/cache/ (~/.local/state/runlens/cache/)

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use runlens_core::analytics::{aggregate_events, merge_aggregated_analytics};
use runlens_core::collector::classify;
use runlens_core::config::LogLevel;
use runlens_core::storage::{CacheBackend, FsBackend, HttpBackend, HttpBackendConfig};
use runlens_core::{AggregatedAnalytics, AnalyticsCache, AnalyticsConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Bearer token for `--cache-url`
const CACHE_TOKEN_ENV: &str = "RUNLENS_CACHE_TOKEN";

#[derive(Parser)]
#[command(name = "runlens")]
#[command(about = "Aggregate and manage CI run telemetry")]
#[command(version)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/runlens/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use a cache directory instead of the default location
    #[arg(long, global = true, conflicts_with = "cache_url")]
    cache_dir: Option<PathBuf>,

    /// Use a remote HTTP cache service
    #[arg(long, global = true)]
    cache_url: Option<String>,

    /// Verbose output (debug logging on stderr)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate and show the effective configuration
    Config,

    /// Classify a failure message into category and type
    Classify {
        /// The error message to classify
        message: String,
    },

    /// Aggregate stored events of a repository over a date range
    Aggregate {
        /// Repository as owner/name
        #[arg(short, long)]
        repo: String,

        /// First day (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,

        /// Last day, inclusive (YYYY-MM-DD, default: today)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Also store the aggregate in the cache
        #[arg(long)]
        store: bool,
    },

    /// Merge aggregate JSON files into one
    Merge {
        /// Aggregate files as written by `aggregate`
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List stored keys of a repository
    Keys {
        /// Repository as owner/name
        #[arg(short, long)]
        repo: String,
    },

    /// Show storage statistics
    Stats {
        /// Limit to one repository (owner/name)
        #[arg(short, long)]
        repo: Option<String>,
    },

    /// Delete every stored entry of a repository
    Clear {
        /// Repository as owner/name
        #[arg(short, long)]
        repo: String,
    },

    /// Delete entries older than the configured retention
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AnalyticsConfig::load_from(path),
        None => AnalyticsConfig::load(),
    }
    .context("failed to load configuration")?;

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        config.log_level()
    };
    let _log_guard =
        runlens_core::logging::init(level, false).context("failed to initialize logging")?;

    let config = Arc::new(config);

    match args.command {
        Command::Config => cmd_config(&config, args.config.as_deref()),
        Command::Classify { ref message } => cmd_classify(message),
        Command::Merge { ref files } => cmd_merge(files),
        ref command => {
            let cache = open_cache(&args, Arc::clone(&config))?;
            match command {
                Command::Aggregate {
                    repo,
                    from,
                    to,
                    store,
                } => cmd_aggregate(&cache, repo, *from, *to, *store).await,
                Command::Keys { repo } => cmd_keys(&cache, repo).await,
                Command::Stats { repo } => cmd_stats(&cache, repo.as_deref()).await,
                Command::Clear { repo } => cmd_clear(&cache, repo).await,
                Command::Prune => cmd_prune(&cache).await,
                Command::Config | Command::Classify { .. } | Command::Merge { .. } => Ok(()),
            }
        }
    }
}

fn open_cache(args: &Args, config: Arc<AnalyticsConfig>) -> Result<AnalyticsCache> {
    let backend: Arc<dyn CacheBackend> = match (&args.cache_url, &args.cache_dir) {
        (Some(url), _) => {
            let token = std::env::var(CACHE_TOKEN_ENV).ok();
            let backend = HttpBackend::new(HttpBackendConfig::new(url).with_token(token))
                .context("failed to create HTTP cache backend")?;
            Arc::new(backend)
        }
        (None, Some(dir)) => Arc::new(FsBackend::new(dir)),
        (None, None) => Arc::new(FsBackend::default_location()),
    };
    tracing::debug!(backend = backend.name(), "Using cache backend");
    Ok(AnalyticsCache::new(backend, config))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}

fn midnight(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn cmd_config(config: &AnalyticsConfig, path: Option<&Path>) -> Result<()> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(AnalyticsConfig::config_path);

    println!("Analytics Configuration");
    println!("=======================");
    println!();
    println!(
        "Config file:      {}{}",
        path.display(),
        if path.exists() { "" } else { " (not found)" }
    );
    println!("Enabled:          {}", config.enabled());
    println!("Log level:        {}", config.log_level());
    println!("Collect cache:    {}", config.collect_cache());
    println!("Collect docker:   {}", config.collect_docker());
    println!("Collect api:      {}", config.collect_api());
    println!("Collect failures: {}", config.collect_failures());
    println!("Sample rate:      {}", config.sample_rate());
    println!("Key prefix:       {}", config.cache_key_prefix());
    println!("Max data size:    {} bytes", config.max_data_size());
    println!("Retention:        {} days", config.retention_days());
    println!("Sanitize:         {}", config.sanitize_patterns().join(","));
    Ok(())
}

fn cmd_classify(message: &str) -> Result<()> {
    print_json(&classify(message))
}

async fn cmd_aggregate(
    cache: &AnalyticsCache,
    repo: &str,
    from: NaiveDate,
    to: Option<NaiveDate>,
    store: bool,
) -> Result<()> {
    let to = to.unwrap_or_else(|| Utc::now().date_naive());
    if to < from {
        anyhow::bail!("--to ({to}) is before --from ({from})");
    }

    let mut events = Vec::new();
    for day in from.iter_days().take_while(|d| *d <= to) {
        let outcome = cache.retrieve_events(repo, midnight(day)).await;
        if outcome.unavailable {
            anyhow::bail!("cache backend '{}' is unavailable", cache.backend_name());
        }
        if let Some(error) = outcome.error {
            eprintln!("Skipping {day}: {error}");
            continue;
        }
        events.extend(outcome.data.unwrap_or_default());
    }

    if events.is_empty() {
        anyhow::bail!("no events stored for {repo} between {from} and {to}");
    }

    let aggregate = aggregate_events(&events, midnight(from), midnight(to) + Duration::days(1))
        .context("failed to aggregate events")?;

    if store {
        let outcome = cache.store_aggregated(repo, &aggregate).await;
        if !outcome.success {
            anyhow::bail!(
                "failed to store aggregate: {}",
                outcome.error.as_deref().unwrap_or("cache unavailable")
            );
        }
        tracing::info!(key = outcome.key.as_deref().unwrap_or_default(), "Stored aggregate");
    }

    print_json(&aggregate)
}

fn cmd_merge(files: &[PathBuf]) -> Result<()> {
    let aggregates = files
        .iter()
        .map(|path| {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str::<AggregatedAnalytics>(&content)
                .with_context(|| format!("failed to parse {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let merged = merge_aggregated_analytics(&aggregates).context("failed to merge aggregates")?;
    print_json(&merged)
}

async fn cmd_keys(cache: &AnalyticsCache, repo: &str) -> Result<()> {
    for key in cache.list_keys(repo).await {
        println!("{}", key);
    }
    Ok(())
}

async fn cmd_stats(cache: &AnalyticsCache, repo: Option<&str>) -> Result<()> {
    let stats = cache.storage_stats(repo).await;
    if let Some(error) = &stats.error {
        anyhow::bail!("failed to read storage stats: {error}");
    }
    print_json(&stats)
}

async fn cmd_clear(cache: &AnalyticsCache, repo: &str) -> Result<()> {
    let outcome = cache.clear_repository(repo).await;
    print_json(&outcome)?;
    if let Some(error) = &outcome.error {
        anyhow::bail!("failed to clear {repo}: {error}");
    }
    Ok(())
}

async fn cmd_prune(cache: &AnalyticsCache) -> Result<()> {
    let outcome = cache.prune_expired(Utc::now()).await;
    print_json(&outcome)?;
    if let Some(error) = &outcome.error {
        anyhow::bail!("failed to prune expired entries: {error}");
    }
    Ok(())
}
