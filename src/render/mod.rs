//! Rendering fallback chain
//!
//! When a page's static HTML looks like a JavaScript shell, the fetcher asks
//! the chain for a rendered DOM. Strategies are tried in order (local headless
//! Chrome first, then a remote render service); the first one that produces
//! HTML wins. If none does, the caller keeps the static body.
//!
//! Every strategy loads the page from its origin again, so each attempt
//! waits for that origin's rate limit slot first.

mod chrome;
mod service;

pub use chrome::ChromeRenderer;
pub use service::RenderServiceRenderer;

use crate::config::RenderConfig;
use crate::crawler::RateLimiter;
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use url::Url;

/// Identifies which strategy produced a rendered body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RendererKind {
    Chrome,
    Service,
}

impl RendererKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Service => "service",
        }
    }
}

impl fmt::Display for RendererKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one rendering strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderAttempt {
    /// Rendered DOM as HTML
    Rendered(String),
    /// The strategy cannot run here (no browser installed, service down)
    Unavailable(String),
    /// The strategy ran but did not produce a page
    Failed(String),
}

/// A strategy that turns a URL into rendered HTML
#[async_trait]
pub trait Renderer: Send + Sync {
    fn kind(&self) -> RendererKind;

    async fn render(&self, url: &Url, user_agent: &str) -> RenderAttempt;
}

/// Ordered list of rendering strategies
#[derive(Default)]
pub struct RenderChain {
    renderers: Vec<Box<dyn Renderer>>,
}

impl RenderChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the chain described by the configuration
    ///
    /// Chrome comes first when enabled; the render service follows when a
    /// URL is configured. An empty chain means pages are never rendered.
    pub fn from_config(config: &RenderConfig, client: Client) -> Self {
        let mut chain = Self::new();
        if config.chrome {
            chain.push(ChromeRenderer::new(config.timeout()));
        }
        if let Some(service_url) = &config.service_url {
            chain.push(RenderServiceRenderer::new(
                client,
                service_url.clone(),
                config.timeout(),
            ));
        }
        chain
    }

    pub fn push(&mut self, renderer: impl Renderer + 'static) {
        self.renderers.push(Box::new(renderer));
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    /// Tries each strategy in order and returns the first rendered page
    pub async fn render(
        &self,
        url: &Url,
        user_agent: &str,
        limiter: &RateLimiter,
    ) -> Option<(RendererKind, String)> {
        let origin = url.origin().ascii_serialization();
        for renderer in &self.renderers {
            limiter.acquire(&origin).await;
            match renderer.render(url, user_agent).await {
                RenderAttempt::Rendered(html) => {
                    tracing::debug!("Rendered {} with {}", url, renderer.kind());
                    return Some((renderer.kind(), html));
                }
                RenderAttempt::Unavailable(reason) => {
                    tracing::debug!("{} renderer unavailable for {}: {}", renderer.kind(), url, reason);
                }
                RenderAttempt::Failed(reason) => {
                    tracing::warn!("{} renderer failed for {}: {}", renderer.kind(), url, reason);
                }
            }
        }
        None
    }
}
