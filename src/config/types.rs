use crate::url::{NormalizePolicy, TrailingSlash};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sitewalk
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub render: RenderConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "site")]
    pub sites: Vec<SiteEntry>,
}

/// How the fetcher decides whether to run the rendering chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderMode {
    /// Render only pages whose static HTML looks like a JavaScript shell
    Auto,
    /// Never render
    ForceStatic,
    /// Render every HTML page
    ForceRender,
}

/// Crawl loop limits
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Maximum number of pages fetched per site
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Maximum link depth from the seeds
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum number of pending tasks in the frontier
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Minimum time between requests to the same host (milliseconds)
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Ceiling applied to a robots.txt Crawl-delay (seconds)
    #[serde(default = "default_max_crawl_delay_secs")]
    pub max_crawl_delay_secs: u64,

    /// Number of concurrent fetch workers
    #[serde(default = "default_workers")]
    pub workers: u32,

    #[serde(default = "default_render_mode")]
    pub render_mode: RenderMode,
}

impl CrawlerConfig {
    /// The configured per-host delay
    pub fn configured_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// The largest per-host delay a Crawl-delay may impose; never below the
    /// configured delay
    pub fn max_crawl_delay(&self) -> Duration {
        Duration::from_secs(self.max_crawl_delay_secs).max(self.configured_delay())
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            max_queue_size: default_max_queue_size(),
            delay_ms: default_delay_ms(),
            max_crawl_delay_secs: default_max_crawl_delay_secs(),
            workers: default_workers(),
            render_mode: default_render_mode(),
        }
    }
}

/// HTTP fetch and retry settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FetcherConfig {
    /// Per-request timeout ceiling
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Timeout used for robots.txt requests
    #[serde(default = "default_robots_timeout_secs")]
    pub robots_timeout_secs: u64,

    /// Additional attempts after the first one for retryable failures
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// First backoff delay; doubles on every retry (milliseconds)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on any single wait between attempts
    #[serde(default = "default_max_retry_wait_secs")]
    pub max_retry_wait_secs: u64,
}

impl FetcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn robots_timeout(&self) -> Duration {
        Duration::from_secs(self.robots_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn max_retry_wait(&self) -> Duration {
        Duration::from_secs(self.max_retry_wait_secs)
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            robots_timeout_secs: default_robots_timeout_secs(),
            retry_budget: default_retry_budget(),
            backoff_base_ms: default_backoff_base_ms(),
            max_retry_wait_secs: default_max_retry_wait_secs(),
        }
    }
}

/// User agent identification
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// User agent sent on every request
    pub primary: String,

    /// User agent used once after an HTTP 403
    pub fallback: String,
}

/// URL normalization policy settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NormalizeConfig {
    #[serde(default = "default_true")]
    pub upgrade_https: bool,

    #[serde(default)]
    pub trailing_slash: TrailingSlash,

    #[serde(default)]
    pub strip_www: bool,
}

impl NormalizeConfig {
    pub fn policy(&self) -> NormalizePolicy {
        NormalizePolicy {
            upgrade_https: self.upgrade_https,
            trailing_slash: self.trailing_slash,
            strip_www: self.strip_www,
        }
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            upgrade_https: true,
            trailing_slash: TrailingSlash::default(),
            strip_www: false,
        }
    }
}

/// Rendering fallback chain settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RenderConfig {
    /// Try a local headless Chrome first
    #[serde(default)]
    pub chrome: bool,

    /// Remote rendering endpoint tried after Chrome
    #[serde(default)]
    pub service_url: Option<String>,

    #[serde(default = "default_render_timeout_secs")]
    pub timeout_secs: u64,

    /// Visible text length below which a page is treated as a JavaScript shell
    #[serde(default = "default_spa_text_threshold")]
    pub spa_text_threshold: usize,
}

impl RenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            chrome: false,
            service_url: None,
            timeout_secs: default_render_timeout_secs(),
            spa_text_threshold: default_spa_text_threshold(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// A site to crawl
#[derive(Debug, Clone, Deserialize)]
pub struct SiteEntry {
    /// Homepage URL; always seeded first
    pub homepage: String,

    /// Host patterns considered in scope (e.g., "*.example.com").
    /// Empty means the homepage host only.
    #[serde(default)]
    pub scope: Vec<String>,
}

fn default_max_pages() -> u32 {
    200
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_queue_size() -> usize {
    10_000
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_max_crawl_delay_secs() -> u64 {
    60
}

fn default_workers() -> u32 {
    1
}

fn default_render_mode() -> RenderMode {
    RenderMode::Auto
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_robots_timeout_secs() -> u64 {
    5
}

fn default_retry_budget() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_max_retry_wait_secs() -> u64 {
    120
}

fn default_render_timeout_secs() -> u64 {
    20
}

fn default_spa_text_threshold() -> usize {
    500
}

fn default_true() -> bool {
    true
}
