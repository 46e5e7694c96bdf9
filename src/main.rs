//! Sitewalk main entry point
//!
//! This is the command-line interface for the Sitewalk crawler.

use anyhow::Context;
use clap::Parser;
use sitewalk::config::{load_config_with_hash, Config};
use sitewalk::crawler::crawl;
use sitewalk::output::{load_all_statistics, print_statistics, CrawlStatistics};
use sitewalk::storage::open_storage;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Sitewalk: a polite crawl-and-discovery engine
///
/// Sitewalk crawls the configured sites for auditing while respecting
/// robots.txt, crawl delays and server back-pressure. Pages are seeded from
/// sitemaps and recorded in a SQLite database as they complete.
#[derive(Parser, Debug)]
#[command(name = "sitewalk")]
#[command(version)]
#[command(about = "A polite crawl-and-discovery engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, &config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sitewalk=info,warn"),
            1 => EnvFilter::new("sitewalk=debug,info"),
            2 => EnvFilter::new("sitewalk=trace,debug"),
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

/// Handles the --dry-run mode: shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Sitewalk Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Max pages: {}", config.crawler.max_pages);
    println!("  Max depth: {}", config.crawler.max_depth);
    println!("  Max queue size: {}", config.crawler.max_queue_size);
    println!("  Request delay: {}ms", config.crawler.delay_ms);
    println!("  Workers: {}", config.crawler.workers);
    println!("  Render mode: {:?}", config.crawler.render_mode);

    println!("\nFetcher:");
    println!("  Timeout: {}s", config.fetcher.timeout_secs);
    println!("  Retry budget: {}", config.fetcher.retry_budget);
    println!("  Backoff base: {}ms", config.fetcher.backoff_base_ms);

    println!("\nUser Agent:");
    println!("  Primary: {}", config.user_agent.primary);
    println!("  Fallback: {}", config.user_agent.fallback);

    println!("\nRendering:");
    println!("  Local Chrome: {}", config.render.chrome);
    println!(
        "  Render service: {}",
        config.render.service_url.as_deref().unwrap_or("none")
    );

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nSites ({}):", config.sites.len());
    for site in &config.sites {
        println!("  - {}", site.homepage);
        for pattern in &site.scope {
            println!("    * {}", pattern);
        }
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))
        .context("Failed to open database")?;
    let all_stats = load_all_statistics(&storage)?;

    if all_stats.is_empty() {
        println!("No crawl runs recorded yet");
    }
    for stats in &all_stats {
        print_statistics(stats);
        println!();
    }

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str) -> anyhow::Result<()> {
    tracing::info!(
        "Crawling {} site(s), up to {} pages each",
        config.sites.len(),
        config.crawler.max_pages
    );

    let reports = crawl(config, config_hash).await.context("Crawl failed")?;

    for report in &reports {
        print_statistics(&CrawlStatistics::from_report(report));
        println!();
    }

    tracing::info!("Crawl completed successfully");
    Ok(())
}
