//! Per-host request spacing
//!
//! Every request to a host, including robots.txt and sitemap fetches, goes
//! through [`RateLimiter::acquire`]. Grants for the same host are at least
//! the host's delay apart no matter how many workers ask at once; different
//! hosts never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Spacing state for one host
#[derive(Debug)]
struct HostState {
    /// When the last request was granted
    last_grant: Option<Instant>,

    /// Minimum spacing between grants
    delay: Duration,

    /// Number of grants handed out
    grants: u64,
}

impl HostState {
    fn new(delay: Duration) -> Self {
        Self {
            last_grant: None,
            delay,
            grants: 0,
        }
    }

    /// Time to wait before the next grant may be issued
    ///
    /// A delay too large to add to the clock still yields a wait of that
    /// delay rather than overflowing.
    fn time_until_ready(&self, now: Instant) -> Duration {
        match self.last_grant {
            Some(last) => match last.checked_add(self.delay) {
                Some(ready) => ready.saturating_duration_since(now),
                None => self.delay,
            },
            None => Duration::ZERO,
        }
    }
}

/// Rate limiter keyed by host origin
#[derive(Debug)]
pub struct RateLimiter {
    default_delay: Duration,
    hosts: Mutex<HashMap<String, Arc<tokio::sync::Mutex<HostState>>>>,
}

impl RateLimiter {
    /// Creates a limiter where unknown hosts use `default_delay`
    pub fn new(default_delay: Duration) -> Self {
        Self {
            default_delay,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    fn host_state(&self, host: &str) -> Arc<tokio::sync::Mutex<HostState>> {
        let mut hosts = self.hosts.lock().unwrap();
        hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(HostState::new(self.default_delay))))
            .clone()
    }

    /// Waits until a request to `host` is allowed and records the grant
    ///
    /// The per-host lock is held while sleeping, so concurrent callers for the
    /// same host queue up behind each other and are granted one delay apart.
    pub async fn acquire(&self, host: &str) {
        let state = self.host_state(host);
        let mut state = state.lock().await;

        let wait = state.time_until_ready(Instant::now());
        if !wait.is_zero() {
            tracing::trace!("Waiting {:?} before next request to {}", wait, host);
            tokio::time::sleep(wait).await;
        }

        state.last_grant = Some(Instant::now());
        state.grants += 1;
    }

    /// Overrides the spacing for a host (e.g. from a robots.txt Crawl-delay)
    pub async fn set_delay(&self, host: &str, delay: Duration) {
        let state = self.host_state(host);
        let mut state = state.lock().await;
        if state.delay != delay {
            tracing::debug!("Request delay for {} set to {:?}", host, delay);
        }
        state.delay = delay;
    }

    /// Current spacing for a host
    pub async fn delay_for(&self, host: &str) -> Duration {
        let state = self.host_state(host);
        let state = state.lock().await;
        state.delay
    }

    /// Number of grants issued for a host so far
    #[cfg(test)]
    pub async fn grants(&self, host: &str) -> u64 {
        let state = self.host_state(host);
        let state = state.lock().await;
        state.grants
    }
}
