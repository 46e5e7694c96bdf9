//! Robots.txt handling module
//!
//! This module fetches and parses robots.txt once per host and answers
//! "may this path be fetched" for the crawler's own user agent.

mod cache;
mod parser;

pub use cache::RobotsCache;
pub use parser::{RobotsPolicy, RobotsRule, RuleKind};

use crate::crawler::RateLimiter;
use crate::url::NormalizedUrl;
use crate::CrawlError;
use reqwest::header::{LOCATION, USER_AGENT};
use reqwest::Client;
use std::time::Duration;

/// Maximum number of redirects followed for robots.txt
const MAX_ROBOTS_REDIRECTS: usize = 5;

/// Loads the robots.txt policy for the origin of `url`
///
/// Any failure (network error, timeout, non-2xx status) yields an allow-all
/// policy with no crawl delay; the failure is logged but never propagated.
pub async fn load(
    client: &Client,
    limiter: &RateLimiter,
    url: &NormalizedUrl,
    user_agent: &str,
    timeout: Duration,
) -> RobotsPolicy {
    match fetch_robots(client, limiter, url, user_agent, timeout).await {
        Ok(body) => {
            let policy = RobotsPolicy::parse(&body, user_agent);
            tracing::debug!(
                "Loaded robots.txt for {}: {} rules, crawl-delay {:?}, {} sitemaps",
                url.origin(),
                policy.rules().len(),
                policy.crawl_delay(),
                policy.sitemaps().len()
            );
            policy
        }
        Err(e) => {
            tracing::warn!("{}; allowing all paths", e);
            RobotsPolicy::allow_all()
        }
    }
}

/// Fetches the raw robots.txt body for the origin of `url`
///
/// Redirects are followed here, each hop waiting for its host's rate limit
/// slot.
pub async fn fetch_robots(
    client: &Client,
    limiter: &RateLimiter,
    url: &NormalizedUrl,
    user_agent: &str,
    timeout: Duration,
) -> Result<String, CrawlError> {
    let unavailable = |reason: String| CrawlError::RobotsUnavailable {
        origin: url.origin(),
        reason,
    };

    let mut robots_url = url
        .origin_join("/robots.txt")
        .map_err(|e| unavailable(e.to_string()))?;

    for _ in 0..=MAX_ROBOTS_REDIRECTS {
        limiter
            .acquire(&robots_url.origin().ascii_serialization())
            .await;

        let response = client
            .get(robots_url.clone())
            .header(USER_AGENT, user_agent)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| unavailable(format!("HTTP {} without Location", status.as_u16())))?;
            robots_url = robots_url
                .join(location)
                .map_err(|e| unavailable(e.to_string()))?;
            continue;
        }

        if !status.is_success() {
            return Err(unavailable(format!("HTTP {}", status.as_u16())));
        }

        return response.text().await.map_err(|e| unavailable(e.to_string()));
    }

    Err(unavailable("too many redirects".to_string()))
}
