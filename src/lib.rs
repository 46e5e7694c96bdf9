//! Sitewalk: a polite crawl-and-discovery engine
//!
//! This crate crawls a site for SEO auditing while respecting robots.txt,
//! crawl delays and server back-pressure. Pages are seeded from sitemaps,
//! fetched with retry and an optional headless-rendering fallback, and
//! recorded one by one as the crawl progresses.

pub mod config;
pub mod crawler;
pub mod output;
pub mod render;
pub mod robots;
pub mod sitemap;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Sitewalk operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] UrlError),

    #[error("Transient fetch failure for {url}: {reason}")]
    RetryableFetch { url: String, reason: String },

    #[error("Fetch failed for {url}: {reason}")]
    FatalFetch { url: String, reason: String },

    #[error("robots.txt unavailable for {origin}: {reason}")]
    RobotsUnavailable { origin: String, reason: String },

    #[error("Sitemap parse error at {url}: {reason}")]
    SitemapParse { url: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Sitewalk operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{crawl, Coordinator, CrawlReport, FetchResult, FetchStatus, PageRecord};
pub use crate::url::{normalize, NormalizePolicy, NormalizedUrl, TrailingSlash};
