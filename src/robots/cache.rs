//! Per-run robots.txt cache
//!
//! Each origin's robots.txt is loaded at most once per crawl run. Loading a
//! policy also installs its effective delay in the rate limiter, so later
//! requests to that host are spaced by the larger of the configured delay
//! and the Crawl-delay, capped at the configured ceiling.

use crate::crawler::RateLimiter;
use crate::robots::{load, RobotsPolicy};
use crate::url::NormalizedUrl;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;

type PolicyCell = Arc<OnceCell<Arc<RobotsPolicy>>>;

/// Robots policies keyed by origin
pub struct RobotsCache {
    client: Client,
    user_agent: String,
    timeout: Duration,
    configured_delay: Duration,
    max_delay: Duration,
    limiter: Arc<RateLimiter>,
    entries: Mutex<HashMap<String, PolicyCell>>,
}

impl RobotsCache {
    pub fn new(
        client: Client,
        user_agent: impl Into<String>,
        timeout: Duration,
        configured_delay: Duration,
        max_delay: Duration,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            timeout,
            configured_delay,
            max_delay,
            limiter,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the policy for the origin of `url`, loading it on first use
    ///
    /// Concurrent callers for a new origin share a single robots.txt request.
    /// The map lock is only held to find the origin's cell, so a slow origin
    /// never blocks lookups for other origins.
    pub async fn policy_for(&self, url: &NormalizedUrl) -> Arc<RobotsPolicy> {
        let origin = url.origin();
        let cell = self
            .entries
            .lock()
            .unwrap()
            .entry(origin.clone())
            .or_default()
            .clone();

        cell.get_or_init(|| self.load_policy(url, &origin))
            .await
            .clone()
    }

    async fn load_policy(&self, url: &NormalizedUrl, origin: &str) -> Arc<RobotsPolicy> {
        let policy = load(
            &self.client,
            &self.limiter,
            url,
            &self.user_agent,
            self.timeout,
        )
        .await;

        let mut delay = policy.effective_delay(self.configured_delay);
        if delay > self.max_delay {
            tracing::warn!(
                "Crawl-delay {:?} for {} exceeds the ceiling, using {:?}",
                delay,
                origin,
                self.max_delay
            );
            delay = self.max_delay;
        }
        self.limiter.set_delay(origin, delay).await;
        tracing::info!("robots.txt for {} loaded, request delay {:?}", origin, delay);

        Arc::new(policy)
    }

    /// Checks a URL against its origin's policy
    pub async fn is_allowed(&self, url: &NormalizedUrl) -> bool {
        self.policy_for(url).await.is_allowed(&url.path_and_query())
    }

    #[cfg(test)]
    pub fn insert(&self, origin: impl Into<String>, policy: RobotsPolicy) {
        let cell = Arc::new(OnceCell::from(Arc::new(policy)));
        self.entries.lock().unwrap().insert(origin.into(), cell);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
