use crate::render::{RenderAttempt, Renderer, RendererKind};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

/// Renders pages in a local headless Chrome
///
/// The browser is launched on first use. A failed launch is remembered, so a
/// machine without Chrome pays for the attempt once per run.
pub struct ChromeRenderer {
    browser: OnceCell<Result<Arc<Browser>, String>>,
    timeout: Duration,
}

impl ChromeRenderer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            browser: OnceCell::new(),
            timeout,
        }
    }

    async fn launch() -> Result<Arc<Browser>, String> {
        let config = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .build()
            .map_err(|e| format!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
            format!(
                "Failed to launch browser: {}. Is Chrome or Chromium installed and in PATH?",
                e
            )
        })?;

        tokio::spawn(async move { while handler.next().await.is_some() {} });

        tracing::info!("Launched headless Chrome for rendering");
        Ok(Arc::new(browser))
    }

    async fn render_page(
        browser: &Browser,
        url: &Url,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<String, String> {
        let page = tokio::time::timeout(timeout, browser.new_page("about:blank"))
            .await
            .map_err(|_| format!("timed out after {:?}", timeout))?
            .map_err(|e| format!("Failed to create page: {}", e))?;

        let steps = async {
            page.set_user_agent(user_agent.to_string())
                .await
                .map_err(|e| format!("Failed to set user agent: {}", e))?;

            page.goto(url.as_str())
                .await
                .map_err(|e| format!("Navigation failed: {}", e))?;

            page.wait_for_navigation()
                .await
                .map_err(|e| format!("Navigation failed: {}", e))?;

            page.content()
                .await
                .map_err(|e| format!("Failed to read content: {}", e))
        };

        let tab = page.clone();
        let close = async move {
            if let Err(e) = tab.close().await {
                tracing::debug!("Failed to close page for {}: {}", url, e);
            }
        };

        close_after(timeout, steps, close).await
    }
}

/// Runs `steps` within `timeout`, then runs `close` on every outcome
async fn close_after<T, S, C>(timeout: Duration, steps: S, close: C) -> Result<T, String>
where
    S: Future<Output = Result<T, String>>,
    C: Future<Output = ()>,
{
    let outcome = match tokio::time::timeout(timeout, steps).await {
        Ok(outcome) => outcome,
        Err(_) => Err(format!("timed out after {:?}", timeout)),
    };
    close.await;
    outcome
}

#[async_trait]
impl Renderer for ChromeRenderer {
    fn kind(&self) -> RendererKind {
        RendererKind::Chrome
    }

    async fn render(&self, url: &Url, user_agent: &str) -> RenderAttempt {
        let browser = match self.browser.get_or_init(Self::launch).await {
            Ok(browser) => browser.clone(),
            Err(e) => return RenderAttempt::Unavailable(e.clone()),
        };

        match Self::render_page(&browser, url, user_agent, self.timeout).await {
            Ok(html) if !html.trim().is_empty() => RenderAttempt::Rendered(html),
            Ok(_) => RenderAttempt::Failed("rendered page is empty".to_string()),
            Err(e) => RenderAttempt::Failed(e),
        }
    }
}
