//! Dorkhound: distributed search-engine scraper core
//!
//! Thin entry point: loads the TOML configuration, wires the components,
//! and runs the scheduler to completion.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dorkhound::{
    config::Config,
    ledger::DomainLedger,
    proxy::{parse_proxy_list, ProxyPool},
    queue::{parse_dork_list, TaskQueue},
    scheduler::{HttpExecutor, Scheduler, SchedulerState},
    UrlFilter,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "dorkhound")]
#[command(about = "Distributed search-engine scraper core")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scrape over a dork list
    Run {
        /// Path to the dork list (one per line, # comments)
        #[arg(short, long)]
        dorks: PathBuf,

        /// Path to the proxy list
        #[arg(short, long)]
        proxies: PathBuf,
    },

    /// Parse a proxy list and report what the pool would accept
    CheckProxies {
        /// Path to the proxy list
        proxies: PathBuf,
    },

    /// Write a default configuration file
    Init {
        /// Output directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { dorks, proxies } => run_scrape(&cli.config, &dorks, &proxies).await,
        Commands::CheckProxies { proxies } => check_proxies(&proxies),
        Commands::Init { path } => init_config(&path),
    }
}

async fn run_scrape(
    config_path: &std::path::Path,
    dorks_path: &std::path::Path,
    proxies_path: &std::path::Path,
) -> Result<()> {
    let config = if config_path.exists() {
        Config::load(config_path)?
    } else {
        info!("no config file found, using defaults");
        Config::default()
    };

    let dorks_text = std::fs::read_to_string(dorks_path)
        .with_context(|| format!("failed to read dork list '{}'", dorks_path.display()))?;
    let dorks = parse_dork_list(&dorks_text);
    if dorks.is_empty() {
        anyhow::bail!("no dorks found in '{}'", dorks_path.display());
    }

    let pool = Arc::new(ProxyPool::new(config.pool.to_pool_config()));
    let (added, parse_errors) = pool
        .load_from_file(proxies_path)
        .with_context(|| format!("failed to read proxy list '{}'", proxies_path.display()))?;
    for err in &parse_errors {
        warn!("proxy line skipped: {err}");
    }
    if added == 0 {
        anyhow::bail!("no usable proxies in '{}'", proxies_path.display());
    }
    info!(proxies = added, dorks = dorks.len(), "inputs loaded");

    let queue = Arc::new(TaskQueue::new(
        config.queue.to_queue_config(&config.scheduler, &config.engine),
    ));
    let filter = Arc::new(UrlFilter::new(config.filter.to_filter_config()));
    let executor = Arc::new(HttpExecutor::new(config.engine.user_agent.clone()));

    let mut scheduler = Scheduler::new(
        config.scheduler.to_scheduler_config(),
        Arc::clone(&pool),
        queue,
        filter,
        executor,
    );
    if config.ledger.enabled {
        let ledger = DomainLedger::open(&config.ledger.path)
            .await
            .with_context(|| {
                format!("failed to open domain ledger '{}'", config.ledger.path.display())
            })?;
        scheduler = scheduler.with_ledger(Arc::new(ledger));
    }
    let scheduler = Arc::new(scheduler);

    let health_check = pool.start_health_check();
    scheduler.start(&dorks, config.engine.to_engine_options())?;

    // Run until the queue drains or the user interrupts
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping");
                scheduler.stop();
            }
            _ = tokio::time::sleep(Duration::from_secs(5)) => {
                let stats = scheduler.stats();
                info!(
                    state = stats.state.as_str(),
                    completed = stats.completed_dorks,
                    failed = stats.failed_dorks,
                    pending = stats.pending_dorks,
                    unique_urls = stats.unique_urls,
                    concurrency = stats.current_concurrency,
                    eta = stats.eta.as_str(),
                    "progress"
                );
            }
        }

        match scheduler.state() {
            SchedulerState::Completed | SchedulerState::Stopped => break,
            _ => {}
        }
    }

    pool.stop_health_check();
    health_check.abort();

    let stats = scheduler.stats();
    let pool_stats = pool.stats();
    info!(
        completed = stats.completed_dorks,
        failed = stats.failed_dorks,
        total_urls = stats.total_urls,
        unique_urls = stats.unique_urls,
        captchas = stats.captcha_count,
        blocks = stats.block_count,
        proxies_alive = pool_stats.alive,
        proxies_quarantined = pool_stats.quarantined,
        elapsed_secs = stats.elapsed.as_secs(),
        "run finished"
    );
    Ok(())
}

fn check_proxies(path: &std::path::Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read proxy list '{}'", path.display()))?;
    let (proxies, errors) = parse_proxy_list(&text);

    for proxy in &proxies {
        println!("{proxy}");
    }
    for err in &errors {
        eprintln!("skipped: {err}");
    }
    println!("{} parsed, {} skipped", proxies.len(), errors.len());
    Ok(())
}

fn init_config(dir: &std::path::Path) -> Result<()> {
    let path = dir.join("config.toml");
    if path.exists() {
        anyhow::bail!("'{}' already exists", path.display());
    }
    let config = Config::default();
    let rendered = toml::to_string_pretty(&config)?;
    std::fs::write(&path, rendered)?;
    println!("wrote {}", path.display());
    Ok(())
}
