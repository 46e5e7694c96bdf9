//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for page content, including:
//! - Building the shared HTTP client
//! - Per-host spacing through the rate limiter
//! - Retry with exponential backoff and `Retry-After` for 429/5xx/network errors
//! - One User-Agent rotation after a 403
//! - Following redirects hop by hop, each hop checked and rate limited
//! - The rendering fallback for JavaScript-heavy pages
//! - Error classification

use crate::config::{Config, FetcherConfig, RenderMode};
use crate::crawler::parser::looks_like_spa_shell;
use crate::crawler::RateLimiter;
use crate::render::{RenderChain, RendererKind};
use crate::url::{normalize, NormalizePolicy, NormalizedUrl};
use crate::CrawlError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, LOCATION, RETRY_AFTER, USER_AGENT};
use reqwest::{redirect::Policy, Client, Response, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Maximum number of redirects followed for one request
const MAX_REDIRECTS: usize = 10;

/// Overall status of a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Ok,
    /// Transient failure; only produced by a single attempt
    RetryableError,
    FatalError,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::RetryableError => "retryable_error",
            Self::FatalError => "fatal_error",
        }
    }
}

/// Why a fetch did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    #[error("HTTP {0}")]
    Status(u16),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("failed to read body: {0}")]
    Body(String),

    #[error("redirected to an unusable URL: {0}")]
    InvalidRedirect(String),

    #[error("redirect to {0} not allowed")]
    RedirectBlocked(String),
}

/// Whether and how the body was rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Rendering was not needed (or not possible for this content)
    NotAttempted,
    /// Body is the DOM produced by a renderer
    Rendered(RendererKind),
    /// Rendering was needed but every strategy failed; body is the static HTML
    StaticFallback,
}

impl RenderOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAttempted => "static",
            Self::Rendered(RendererKind::Chrome) => "chrome",
            Self::Rendered(RendererKind::Service) => "service",
            Self::StaticFallback => "static_fallback",
        }
    }
}

/// Result of a fetch operation
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: FetchStatus,
    pub http_status: Option<u16>,
    pub body: Option<String>,
    pub content_type: Option<String>,
    /// URL of the last request made, after any redirects
    pub final_url: NormalizedUrl,
    pub elapsed: Duration,
    /// Number of HTTP requests made
    pub attempts: u32,
    pub failure: Option<FetchFailure>,
    /// Server-requested wait from a `Retry-After` header
    pub retry_after: Option<Duration>,
    pub render: RenderOutcome,
}

impl FetchResult {
    pub fn is_ok(&self) -> bool {
        self.status == FetchStatus::Ok
    }

    /// True when the body came from the raw HTTP response rather than a
    /// rendered DOM, so links injected by scripts may be missing
    pub fn is_static(&self) -> bool {
        !matches!(self.render, RenderOutcome::Rendered(_))
    }

    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map_or(true, |ct| ct.to_ascii_lowercase().contains("html"))
    }

    /// The failure as a crate error
    pub fn error(&self) -> Option<CrawlError> {
        let failure = self.failure.as_ref()?;
        let url = self.final_url.to_string();
        let reason = failure.to_string();
        Some(match self.status {
            FetchStatus::RetryableError => CrawlError::RetryableFetch { url, reason },
            _ => CrawlError::FatalFetch { url, reason },
        })
    }

    fn failed(url: &NormalizedUrl, failure: FetchFailure, retryable: bool) -> Self {
        Self {
            status: if retryable {
                FetchStatus::RetryableError
            } else {
                FetchStatus::FatalError
            },
            http_status: match failure {
                FetchFailure::Status(code) => Some(code),
                _ => None,
            },
            body: None,
            content_type: None,
            final_url: url.clone(),
            elapsed: Duration::ZERO,
            attempts: 1,
            failure: Some(failure),
            retry_after: None,
            render: RenderOutcome::NotAttempted,
        }
    }
}

/// Pause between attempts
#[async_trait]
pub trait Delay: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Decides whether a redirect target may be requested
#[async_trait]
pub trait RedirectGuard: Send + Sync {
    async fn allows(&self, target: &NormalizedUrl) -> bool;
}

/// Outcome of a single request
enum Attempt {
    Done(FetchResult),
    Redirect { status: u16, target: NormalizedUrl },
}

/// Retry settings
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub retry_budget: u32,
    pub backoff_base: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetcherConfig) -> Self {
        Self {
            retry_budget: config.retry_budget,
            backoff_base: config.backoff_base(),
            max_wait: config.max_retry_wait(),
        }
    }

    /// Wait before retry number `retry` (0 for the first retry)
    ///
    /// Exponential backoff, replaced by `retry_after` when the server asked
    /// for longer, never more than `max_wait`.
    pub fn wait_before(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self
            .backoff_base
            .saturating_mul(2u32.saturating_pow(retry));
        let wait = match retry_after {
            Some(requested) if requested > backoff => requested,
            _ => backoff,
        };
        wait.min(self.max_wait)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetcherConfig::default())
    }
}

/// Builds the HTTP client shared by the fetcher, robots and sitemap loading
///
/// No default User-Agent is set; every request carries its own so the 403
/// rotation can switch agents per request. Redirects are not followed by the
/// client; callers follow them so each hop is rate limited.
pub fn build_http_client(config: &FetcherConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(config.timeout())
        .connect_timeout(config.timeout().min(Duration::from_secs(10)))
        .redirect(Policy::none())
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches pages politely
pub struct Fetcher {
    client: Client,
    limiter: Arc<RateLimiter>,
    primary_agent: String,
    fallback_agent: String,
    retry: RetryPolicy,
    normalize_policy: NormalizePolicy,
    render_mode: RenderMode,
    render_chain: RenderChain,
    spa_text_threshold: usize,
    delay: Arc<dyn Delay>,
    redirect_guard: Option<Arc<dyn RedirectGuard>>,
}

impl Fetcher {
    /// Creates a fetcher from the configuration
    pub fn new(config: &Config, client: Client, limiter: Arc<RateLimiter>) -> Self {
        Self {
            render_chain: RenderChain::from_config(&config.render, client.clone()),
            client,
            limiter,
            primary_agent: config.user_agent.primary.clone(),
            fallback_agent: config.user_agent.fallback.clone(),
            retry: RetryPolicy::from_config(&config.fetcher),
            normalize_policy: config.normalize.policy(),
            render_mode: config.crawler.render_mode,
            spa_text_threshold: config.render.spa_text_threshold,
            delay: Arc::new(TokioDelay),
            redirect_guard: None,
        }
    }

    /// Replaces the pause used between attempts
    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    /// Checks every redirect target before it is requested
    pub fn with_redirect_guard(mut self, guard: Arc<dyn RedirectGuard>) -> Self {
        self.redirect_guard = Some(guard);
        self
    }

    /// Replaces the rendering chain
    pub fn with_render_chain(mut self, chain: RenderChain) -> Self {
        self.render_chain = chain;
        self
    }

    pub fn primary_agent(&self) -> &str {
        &self.primary_agent
    }

    /// Fetches a URL with retry, User-Agent rotation and rendering
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | 2xx | Done |
    /// | 429, 5xx | Retry within budget, backoff or `Retry-After` |
    /// | Network error, timeout | Retry within budget |
    /// | First 403 | Retry once immediately with the fallback User-Agent |
    /// | 3xx with Location | Request the target if the guard allows it |
    /// | Second 403, other 4xx, refused or too many redirects | Fatal |
    /// | Budget exhausted | Fatal |
    pub async fn fetch(&self, url: &NormalizedUrl) -> FetchResult {
        let started = Instant::now();
        let (mut result, user_agent) = self.fetch_with_retry(url).await;

        if result.status == FetchStatus::Ok && result.is_html() {
            self.maybe_render(&mut result, user_agent).await;
        }

        result.elapsed = started.elapsed();
        result
    }

    /// Fetches a URL with the same retry rules but never renders it
    ///
    /// Used for documents that are not pages, such as sitemaps.
    pub async fn fetch_static(&self, url: &NormalizedUrl) -> FetchResult {
        let started = Instant::now();
        let (mut result, _) = self.fetch_with_retry(url).await;
        result.elapsed = started.elapsed();
        result
    }

    /// Runs the attempt loop; returns the result and the User-Agent that
    /// produced it
    async fn fetch_with_retry(&self, url: &NormalizedUrl) -> (FetchResult, &str) {
        let mut user_agent = self.primary_agent.as_str();
        let mut current = url.clone();
        let mut rotated = false;
        let mut retries = 0;
        let mut redirects = 0;
        let mut attempts = 0;

        let mut result = loop {
            let attempt = self.attempt(&current, user_agent).await;
            attempts += 1;

            let mut result = match attempt {
                Attempt::Done(result) => result,
                Attempt::Redirect { status, target } => {
                    if redirects >= MAX_REDIRECTS {
                        break FetchResult::failed(&current, FetchFailure::TooManyRedirects, false);
                    }
                    if !self.redirect_allowed(&target).await {
                        tracing::info!("Not following redirect from {} to {}", current, target);
                        let failure = FetchFailure::RedirectBlocked(target.to_string());
                        let mut result = FetchResult::failed(&current, failure, false);
                        result.http_status = Some(status);
                        break result;
                    }
                    tracing::debug!("{} redirects to {}", current, target);
                    redirects += 1;
                    current = target;
                    continue;
                }
            };

            if result.status == FetchStatus::Ok {
                break result;
            }

            if result.http_status == Some(StatusCode::FORBIDDEN.as_u16()) && !rotated {
                tracing::info!("HTTP 403 for {}, retrying with fallback User-Agent", current);
                user_agent = self.fallback_agent.as_str();
                rotated = true;
                continue;
            }

            if result.status == FetchStatus::RetryableError {
                if retries < self.retry.retry_budget {
                    let wait = self.retry.wait_before(retries, result.retry_after);
                    retries += 1;
                    tracing::debug!(
                        "Retry {}/{} for {} in {:?}: {}",
                        retries,
                        self.retry.retry_budget,
                        current,
                        wait,
                        result.failure.as_ref().map(|f| f.to_string()).unwrap_or_default()
                    );
                    self.delay.sleep(wait).await;
                    continue;
                }
                tracing::warn!("Giving up on {} after {} attempts", current, attempts);
            }

            result.status = FetchStatus::FatalError;
            break result;
        };

        result.attempts = attempts;
        (result, user_agent)
    }

    async fn redirect_allowed(&self, target: &NormalizedUrl) -> bool {
        match &self.redirect_guard {
            Some(guard) => guard.allows(target).await,
            None => true,
        }
    }

    /// Performs a single request, waiting for the host's rate limit slot
    async fn attempt(&self, url: &NormalizedUrl, user_agent: &str) -> Attempt {
        self.limiter.acquire(&url.origin()).await;

        let started = Instant::now();
        let response = self
            .client
            .get(url.as_str())
            .header(USER_AGENT, user_agent)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let (failure, retryable) = classify_error(&e);
                let mut result = FetchResult::failed(url, failure, retryable);
                result.elapsed = started.elapsed();
                return Attempt::Done(result);
            }
        };

        if let Some(location) = redirect_location(&response) {
            let status = response.status().as_u16();
            return match response
                .url()
                .join(location)
                .map_err(|e| e.to_string())
                .and_then(|joined| {
                    normalize(joined.as_str(), None, &self.normalize_policy)
                        .map_err(|e| e.to_string())
                }) {
                Ok(target) => Attempt::Redirect { status, target },
                Err(reason) => {
                    let mut result =
                        FetchResult::failed(url, FetchFailure::InvalidRedirect(reason), false);
                    result.http_status = Some(status);
                    Attempt::Done(result)
                }
            };
        }

        let mut result = self.read_response(url, response).await;
        result.elapsed = started.elapsed();
        Attempt::Done(result)
    }

    async fn read_response(&self, url: &NormalizedUrl, response: Response) -> FetchResult {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));

        if !status.is_success() {
            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            let mut result = FetchResult::failed(url, FetchFailure::Status(status.as_u16()), retryable);
            result.retry_after = retry_after;
            return result;
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        match response.text().await {
            Ok(body) => FetchResult {
                status: FetchStatus::Ok,
                http_status: Some(status.as_u16()),
                body: Some(body),
                content_type,
                final_url: url.clone(),
                elapsed: Duration::ZERO,
                attempts: 1,
                failure: None,
                retry_after,
                render: RenderOutcome::NotAttempted,
            },
            Err(e) => {
                let mut result = FetchResult::failed(url, FetchFailure::Body(e.to_string()), true);
                result.http_status = Some(status.as_u16());
                result
            }
        }
    }

    async fn maybe_render(&self, result: &mut FetchResult, user_agent: &str) {
        let wants_render = match self.render_mode {
            RenderMode::ForceStatic => false,
            RenderMode::ForceRender => true,
            RenderMode::Auto => result
                .body
                .as_deref()
                .map_or(false, |body| looks_like_spa_shell(body, self.spa_text_threshold)),
        };

        if !wants_render {
            return;
        }

        match self
            .render_chain
            .render(result.final_url.as_url(), user_agent, &self.limiter)
            .await
        {
            Some((kind, html)) => {
                result.body = Some(html);
                result.render = RenderOutcome::Rendered(kind);
            }
            None => {
                tracing::debug!(
                    "No renderer produced {}; keeping static HTML",
                    result.final_url
                );
                result.render = RenderOutcome::StaticFallback;
            }
        }
    }
}

/// Location of a redirect response, if it is one
fn redirect_location(response: &Response) -> Option<&str> {
    if !response.status().is_redirection() {
        return None;
    }
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
}

/// Classifies a transport error as (failure, retryable)
fn classify_error(error: &reqwest::Error) -> (FetchFailure, bool) {
    if error.is_timeout() {
        (FetchFailure::Timeout, true)
    } else if error.is_builder() {
        (FetchFailure::Network(error.to_string()), false)
    } else if error.is_body() || error.is_decode() {
        (FetchFailure::Body(error.to_string()), true)
    } else {
        (FetchFailure::Network(error.to_string()), true)
    }
}

/// Parses a `Retry-After` value: delta-seconds or an HTTP-date
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingDelay;
    use super::*;
    use crate::config::{OutputConfig, UserAgentConfig};
    use crate::render::testing::FakeRenderer;
    use crate::render::RenderAttempt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PRIMARY: &str = "sitewalk/0.1";
    const FALLBACK: &str = "Mozilla/5.0 (X11; Linux x86_64)";

    fn test_config() -> Config {
        let mut config = Config {
            crawler: Default::default(),
            fetcher: Default::default(),
            user_agent: UserAgentConfig {
                primary: PRIMARY.to_string(),
                fallback: FALLBACK.to_string(),
            },
            normalize: Default::default(),
            render: Default::default(),
            output: OutputConfig {
                database_path: ":memory:".to_string(),
            },
            sites: vec![],
        };
        config.normalize.upgrade_https = false;
        config.crawler.render_mode = RenderMode::ForceStatic;
        config
    }

    fn fetcher(config: &Config) -> (Fetcher, Arc<RecordingDelay>) {
        spaced_fetcher(config, Duration::ZERO)
    }

    fn spaced_fetcher(config: &Config, spacing: Duration) -> (Fetcher, Arc<RecordingDelay>) {
        let delay = Arc::new(RecordingDelay::default());
        let client = build_http_client(&config.fetcher).unwrap();
        let fetcher = Fetcher::new(config, client, Arc::new(RateLimiter::new(spacing)))
            .with_delay(delay.clone());
        (fetcher, delay)
    }

    fn page(server: &MockServer, p: &str) -> NormalizedUrl {
        let policy = NormalizePolicy {
            upgrade_https: false,
            ..NormalizePolicy::default()
        };
        normalize(&format!("{}{}", server.uri(), p), None, &policy).unwrap()
    }

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8")
    }

    fn redirect(to: &str) -> ResponseTemplate {
        ResponseTemplate::new(301).insert_header("location", to)
    }

    /// Refuses targets whose path starts with a prefix
    struct RefusePrefix(&'static str);

    #[async_trait]
    impl RedirectGuard for RefusePrefix {
        async fn allows(&self, target: &NormalizedUrl) -> bool {
            !target.path().starts_with(self.0)
        }
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&FetcherConfig::default()).is_ok());
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.wait_before(0, None), Duration::from_millis(500));
        assert_eq!(retry.wait_before(1, None), Duration::from_secs(1));
        assert_eq!(retry.wait_before(2, None), Duration::from_secs(2));
    }

    #[test]
    fn test_retry_after_used_only_when_larger() {
        let retry = RetryPolicy::default();
        assert_eq!(
            retry.wait_before(2, Some(Duration::from_secs(10))),
            Duration::from_secs(10)
        );
        assert_eq!(
            retry.wait_before(2, Some(Duration::from_secs(1))),
            Duration::from_secs(2)
        );
        assert_eq!(
            retry.wait_before(0, Some(Duration::from_secs(100_000))),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_parse_retry_after() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2015 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(parse_retry_after("10", now), Some(Duration::from_secs(10)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("user-agent", PRIMARY))
            .respond_with(html("<html><title>Home</title></html>"))
            .mount(&server)
            .await;

        let (fetcher, delay) = fetcher(&test_config());
        let result = fetcher.fetch(&page(&server, "/")).await;

        assert_eq!(result.status, FetchStatus::Ok);
        assert_eq!(result.http_status, Some(200));
        assert_eq!(result.attempts, 1);
        assert!(result.is_html());
        assert!(result.body.as_deref().unwrap().contains("Home"));
        assert!(result.is_static());
        assert!(delay.waits().is_empty());
    }

    #[tokio::test]
    async fn test_429s_within_budget_then_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(200).set_body_string("finally"))
            .mount(&server)
            .await;

        let (fetcher, delay) = fetcher(&test_config());
        let result = fetcher.fetch(&page(&server, "/busy")).await;

        assert_eq!(result.status, FetchStatus::Ok);
        assert_eq!(result.attempts, 4);
        assert_eq!(
            delay.waits(),
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2)
            ]
        );
    }

    #[tokio::test]
    async fn test_one_429_too_many_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(4)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let (fetcher, delay) = fetcher(&test_config());
        let result = fetcher.fetch(&page(&server, "/busy")).await;

        assert_eq!(result.status, FetchStatus::FatalError);
        assert_eq!(result.http_status, Some(429));
        assert_eq!(result.failure, Some(FetchFailure::Status(429)));
        assert_eq!(result.attempts, 4);
        assert_eq!(delay.waits().len(), 3);
        assert!(matches!(result.error(), Some(CrawlError::FatalFetch { .. })));
    }

    #[tokio::test]
    async fn test_retry_after_beats_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "10"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let (fetcher, delay) = fetcher(&test_config());
        let result = fetcher.fetch(&page(&server, "/slow")).await;

        assert_eq!(result.status, FetchStatus::Ok);
        // Third retry would back off 2s; the server asked for 10s
        assert_eq!(
            delay.waits(),
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(10)
            ]
        );
    }

    #[tokio::test]
    async fn test_403_rotates_user_agent_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guarded"))
            .and(header("user-agent", PRIMARY))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/guarded"))
            .and(header("user-agent", FALLBACK))
            .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
            .mount(&server)
            .await;

        let (fetcher, delay) = fetcher(&test_config());
        let result = fetcher.fetch(&page(&server, "/guarded")).await;

        assert_eq!(result.status, FetchStatus::Ok);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.body.as_deref(), Some("welcome"));
        assert!(delay.waits().is_empty());
    }

    #[tokio::test]
    async fn test_second_403_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guarded"))
            .respond_with(ResponseTemplate::new(403))
            .expect(2)
            .mount(&server)
            .await;

        let (fetcher, _) = fetcher(&test_config());
        let result = fetcher.fetch(&page(&server, "/guarded")).await;

        assert_eq!(result.status, FetchStatus::FatalError);
        assert_eq!(result.http_status, Some(403));
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_404_is_fatal_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let (fetcher, delay) = fetcher(&test_config());
        let result = fetcher.fetch(&page(&server, "/gone")).await;

        assert_eq!(result.status, FetchStatus::FatalError);
        assert_eq!(result.failure, Some(FetchFailure::Status(404)));
        assert!(delay.waits().is_empty());
    }

    #[tokio::test]
    async fn test_single_attempt_reports_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let (fetcher, _) = fetcher(&test_config());
        let Attempt::Done(result) = fetcher.attempt(&page(&server, "/"), PRIMARY).await else {
            panic!("502 is not a redirect");
        };
        assert_eq!(result.status, FetchStatus::RetryableError);
        assert!(matches!(result.error(), Some(CrawlError::RetryableFetch { .. })));
    }

    #[tokio::test]
    async fn test_connection_error_uses_budget() {
        let mut config = test_config();
        config.fetcher.retry_budget = 2;
        let (fetcher, delay) = fetcher(&config);

        let policy = NormalizePolicy {
            upgrade_https: false,
            ..NormalizePolicy::default()
        };
        let url = normalize("http://127.0.0.1:9/", None, &policy).unwrap();
        let result = fetcher.fetch(&url).await;

        assert_eq!(result.status, FetchStatus::FatalError);
        assert_eq!(result.attempts, 3);
        assert_eq!(delay.waits().len(), 2);
        assert!(matches!(result.failure, Some(FetchFailure::Network(_))));
    }

    #[tokio::test]
    async fn test_redirect_sets_final_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(redirect(&format!("{}/new/", server.uri())))
            .mount(&server)
            .await;
        // The target is requested in its normalized form
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;

        let (fetcher, _) = fetcher(&test_config());
        let result = fetcher.fetch(&page(&server, "/old")).await;

        assert_eq!(result.status, FetchStatus::Ok);
        assert_eq!(result.final_url, page(&server, "/new"));
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_redirect_hops_are_spaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(redirect("/home"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/home"))
            .respond_with(html("<p>home</p>"))
            .mount(&server)
            .await;

        let (fetcher, _) = spaced_fetcher(&test_config(), Duration::from_millis(300));
        let started = Instant::now();
        let result = fetcher.fetch(&page(&server, "/")).await;

        assert_eq!(result.status, FetchStatus::Ok);
        assert_eq!(result.final_url, page(&server, "/home"));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_refused_redirect_is_not_requested() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/go"))
            .respond_with(redirect("/private/area"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/private/area"))
            .respond_with(html("<p>secret</p>"))
            .expect(0)
            .mount(&server)
            .await;

        let (fetcher, _) = fetcher(&test_config());
        let fetcher = fetcher.with_redirect_guard(Arc::new(RefusePrefix("/private")));
        let result = fetcher.fetch(&page(&server, "/go")).await;

        assert_eq!(result.status, FetchStatus::FatalError);
        assert_eq!(result.http_status, Some(301));
        assert_eq!(result.final_url, page(&server, "/go"));
        assert!(matches!(result.failure, Some(FetchFailure::RedirectBlocked(_))));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_redirect_loop_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(redirect("/loop"))
            .mount(&server)
            .await;

        let (fetcher, _) = fetcher(&test_config());
        let result = fetcher.fetch(&page(&server, "/loop")).await;

        assert_eq!(result.status, FetchStatus::FatalError);
        assert_eq!(result.failure, Some(FetchFailure::TooManyRedirects));
        assert_eq!(result.attempts, MAX_REDIRECTS as u32 + 1);
    }

    #[tokio::test]
    async fn test_auto_mode_renders_spa_shell() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html(r#"<html><body><div id="root"></div></body></html>"#))
            .mount(&server)
            .await;

        let mut config = test_config();
        config.crawler.render_mode = RenderMode::Auto;
        let mut chain = RenderChain::new();
        chain.push(FakeRenderer::new(
            RendererKind::Chrome,
            RenderAttempt::Unavailable("no browser".to_string()),
        ));
        chain.push(FakeRenderer::new(
            RendererKind::Service,
            RenderAttempt::Rendered(r#"<html><body><a href="/js-link">x</a></body></html>"#.to_string()),
        ));
        let (fetcher, _) = fetcher(&config);
        let fetcher = fetcher.with_render_chain(chain);

        let result = fetcher.fetch(&page(&server, "/")).await;
        assert_eq!(result.render, RenderOutcome::Rendered(RendererKind::Service));
        assert!(!result.is_static());
        assert!(result.body.as_deref().unwrap().contains("/js-link"));
    }

    #[tokio::test]
    async fn test_render_waits_for_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html("<html><body><p>short</p></body></html>"))
            .mount(&server)
            .await;

        let mut config = test_config();
        config.crawler.render_mode = RenderMode::ForceRender;
        let mut chain = RenderChain::new();
        chain.push(FakeRenderer::new(
            RendererKind::Chrome,
            RenderAttempt::Rendered("<html><body>rendered</body></html>".to_string()),
        ));
        let (fetcher, _) = spaced_fetcher(&config, Duration::from_millis(300));
        let fetcher = fetcher.with_render_chain(chain);

        let started = Instant::now();
        let result = fetcher.fetch(&page(&server, "/")).await;

        assert_eq!(result.render, RenderOutcome::Rendered(RendererKind::Chrome));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_failed_render_falls_back_to_static() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html("<html><body><p>short</p></body></html>"))
            .mount(&server)
            .await;

        let mut config = test_config();
        config.crawler.render_mode = RenderMode::ForceRender;
        let mut chain = RenderChain::new();
        chain.push(FakeRenderer::new(
            RendererKind::Chrome,
            RenderAttempt::Failed("crashed".to_string()),
        ));
        let (fetcher, _) = fetcher(&config);
        let fetcher = fetcher.with_render_chain(chain);

        let result = fetcher.fetch(&page(&server, "/")).await;
        assert_eq!(result.status, FetchStatus::Ok);
        assert_eq!(result.render, RenderOutcome::StaticFallback);
        assert!(result.is_static());
        assert!(result.body.as_deref().unwrap().contains("short"));
    }

    #[tokio::test]
    async fn test_force_static_never_renders() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html(r#"<html><body><div id="app"></div></body></html>"#))
            .mount(&server)
            .await;

        let renderer = FakeRenderer::new(
            RendererKind::Chrome,
            RenderAttempt::Rendered("<html></html>".to_string()),
        );
        let calls = renderer.calls.clone();
        let mut chain = RenderChain::new();
        chain.push(renderer);

        let (fetcher, _) = fetcher(&test_config());
        let fetcher = fetcher.with_render_chain(chain);

        let result = fetcher.fetch(&page(&server, "/")).await;
        assert_eq!(result.render, RenderOutcome::NotAttempted);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
