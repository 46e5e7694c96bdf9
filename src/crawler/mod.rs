//! Crawler module for web page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with retry, backoff and rendering fallback
//! - HTML parsing and link extraction
//! - Per-host rate limiting
//! - The frontier queue and overall crawl coordination

mod coordinator;
mod fetcher;
mod frontier;
mod parser;
mod rate_limiter;

pub use coordinator::{run_crawl, Coordinator, CrawlReport, DropCounts, PageRecord};
pub use fetcher::{
    build_http_client, Delay, FetchFailure, FetchResult, FetchStatus, Fetcher, RedirectGuard,
    RenderOutcome, RetryPolicy, TokioDelay,
};
pub use frontier::{CrawlTask, EnqueueOutcome, FrontierLimits, FrontierState};
pub use parser::{looks_like_spa_shell, parse_html, ParsedPage};
pub use rate_limiter::RateLimiter;

use crate::config::Config;
use crate::CrawlError;

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. For every configured
/// site it will:
/// 1. Create a run in the database
/// 2. Load robots.txt and discover sitemaps
/// 3. Fetch pages breadth-first, following in-scope links
/// 4. Record each page as it completes
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration file, stored with each run
pub async fn crawl(config: Config, config_hash: &str) -> Result<Vec<CrawlReport>, CrawlError> {
    run_crawl(config, config_hash).await
}
