//! fedi-crawler main entry point
//!
//! This is the command-line interface for the fediverse crawl orchestrator.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use fedi_crawler::config::{load_config_with_hash, Config};
use fedi_crawler::output::{load_statistics, print_statistics};
use fedi_crawler::policy::TimingPolicy;
use fedi_crawler::storage::{connect_with_retry, ReconnectPolicy, SqliteConnector};
use fedi_crawler::{Category, CrawlTarget, CrawlerError, Dispatcher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// fedi-crawler: crawl orchestration for a fediverse directory
///
/// Schedules per-target crawls of instances, communities, federated nodes
/// and magazines, keeps their freshness in a shared store, and backs off
/// from targets that recently failed.
#[derive(Parser, Debug)]
#[command(name = "fedi-crawler")]
#[command(version)]
#[command(about = "Crawl orchestration for a fediverse directory", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One-off maintenance tasks
    Task {
        #[command(subcommand)]
        task: Task,
    },

    /// Run queue workers until interrupted
    Worker {
        /// Category to work on, or `cron` for the periodic scheduler
        #[arg(value_name = "CATEGORY|cron")]
        role: String,

        /// Concurrent jobs, overriding the configured value
        #[arg(short, long)]
        concurrency: Option<u32>,
    },

    /// Crawl one target now, bypassing timing and error suppression
    Manual {
        /// instance, community, fediverse or magazine
        category: Category,

        /// Base URL of the server
        base_url: String,

        /// Community or magazine name
        sub_key: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum Task {
    /// Submit every due target once
    Scan {
        /// Only scan this category
        #[arg(long)]
        category: Option<Category>,
    },

    /// Show per-category statistics from the store
    Stats,

    /// Validate the configuration and print it
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Task { task: Task::Check } => handle_check(&config),
        Command::Task { task: Task::Stats } => handle_stats(&config).await,
        Command::Task {
            task: Task::Scan { category },
        } => handle_scan(&config, category).await,
        Command::Worker { role, concurrency } => handle_worker(&config, &role, concurrency).await,
        Command::Manual {
            category,
            base_url,
            sub_key,
        } => handle_manual(&config, category, &base_url, sub_key.as_deref()).await,
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("fedi_crawler=info,warn"),
            1 => EnvFilter::new("fedi_crawler=debug,info"),
            2 => EnvFilter::new("fedi_crawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Turns ctrl-c into a shutdown signal for workers
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        tracing::info!("Shutdown requested, finishing running jobs");
        let _ = tx.send(true);
    });
    rx
}

/// Handles `task check`: prints the effective configuration
fn handle_check(config: &Config) -> anyhow::Result<()> {
    println!("=== fedi-crawler Configuration ===\n");

    println!("Store:");
    println!("  Path: {}", config.store.path);
    println!(
        "  Reconnect: {} attempts, {}ms apart",
        config.store.reconnect_attempts, config.store.reconnect_delay_ms
    );

    println!("\nFetch:");
    println!(
        "  User agent: {}/{}",
        config.fetch.crawler_name, config.fetch.crawler_version
    );
    println!("  Attribution: {}", config.fetch.attribution_url);
    println!(
        "  Retries: {} (backoff unit {}ms), request timeout {}s",
        config.fetch.max_retries, config.fetch.backoff_unit_ms, config.fetch.request_timeout_secs
    );

    println!("\nWorker:");
    println!("  Concurrency: {}", config.worker.concurrency);
    println!("  Scan interval: {}s", config.worker.scan_interval_secs);

    println!("\nTiming:");
    for &category in Category::ALL.iter() {
        let timing = config.timing.for_category(category);
        let delete = timing
            .delete_hours
            .map(|h| format!("{}h", h))
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {}: timeout {}s, aged {}h, delete {}, error TTL {}h",
            category, timing.timeout_secs, timing.aged_hours, delete, timing.error_ttl_hours
        );
    }

    println!("\nOutput: {}", config.output.path);

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  - {}", seed);
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles `task stats`
async fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Store: {}\n", config.store.path);

    let reconnect = ReconnectPolicy {
        attempts: config.store.reconnect_attempts,
        delay: Duration::from_millis(config.store.reconnect_delay_ms),
    };
    let connector = SqliteConnector::new(&config.store.path);
    let store = connect_with_retry(&connector, reconnect).await?;

    let policy = TimingPolicy::from_config(&config.timing);
    let stats = load_statistics(store.as_ref(), &policy, Utc::now())?;
    print_statistics(&stats);

    Ok(())
}

/// Handles `task scan`
async fn handle_scan(config: &Config, category: Option<Category>) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::from_config(config)?;
    let now = Utc::now();

    let report = match category {
        Some(category) => dispatcher.scan(category, now).await?,
        None => dispatcher.scan_all(now).await?,
    };

    println!(
        "Submitted {} jobs and {} confirmation crawls ({} already queued, {} fresh, {} suppressed)",
        report.submitted, report.deletion_checks, report.duplicates, report.fresh, report.suppressed
    );
    Ok(())
}

/// Handles `worker <category>` and `worker cron`
async fn handle_worker(config: &Config, role: &str, concurrency: Option<u32>) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::from_config(config)?;
    let shutdown = shutdown_signal();

    if role == "cron" {
        let interval = Duration::from_secs(config.worker.scan_interval_secs);
        dispatcher.run_scheduler(interval, shutdown).await?;
        return Ok(());
    }

    let category: Category = role
        .parse()
        .with_context(|| format!("Unknown worker role '{}'", role))?;
    let concurrency = concurrency.unwrap_or(config.worker.concurrency);
    dispatcher.run_workers(category, concurrency, shutdown).await?;
    Ok(())
}

/// Handles `manual`: crawls one target and reports the raw outcome
async fn handle_manual(
    config: &Config,
    category: Category,
    base_url: &str,
    sub_key: Option<&str>,
) -> anyhow::Result<()> {
    let target = CrawlTarget::new(category, base_url, sub_key)?;
    let dispatcher = Dispatcher::from_config(config)?;

    tracing::info!("Manual crawl of {}", target);
    match dispatcher.run_manual(target.clone()).await {
        Ok(payload) => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        Err(e @ CrawlerError::AlreadyScheduled { .. }) => {
            tracing::warn!("{}", e);
            Err(e.into())
        }
        Err(e) => {
            tracing::error!("Manual crawl of {} failed: {}", target, e);
            Err(e.into())
        }
    }
}
