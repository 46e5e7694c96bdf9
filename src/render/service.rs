use crate::render::{RenderAttempt, Renderer, RendererKind};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use url::Url;

/// Renders pages through a remote HTTP rendering service
///
/// The service receives `{"url": ..., "userAgent": ...}` as a JSON POST and
/// answers with the rendered HTML as the response body.
pub struct RenderServiceRenderer {
    client: Client,
    service_url: String,
    timeout: Duration,
}

impl RenderServiceRenderer {
    pub fn new(client: Client, service_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            service_url: service_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Renderer for RenderServiceRenderer {
    fn kind(&self) -> RendererKind {
        RendererKind::Service
    }

    async fn render(&self, url: &Url, user_agent: &str) -> RenderAttempt {
        let response = match self
            .client
            .post(&self.service_url)
            .timeout(self.timeout)
            .json(&json!({ "url": url.as_str(), "userAgent": user_agent }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_connect() => return RenderAttempt::Unavailable(e.to_string()),
            Err(e) => return RenderAttempt::Failed(e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return RenderAttempt::Failed(format!("render service returned HTTP {}", status.as_u16()));
        }

        match response.text().await {
            Ok(html) if !html.trim().is_empty() => RenderAttempt::Rendered(html),
            Ok(_) => RenderAttempt::Failed("render service returned an empty body".to_string()),
            Err(e) => RenderAttempt::Failed(e.to_string()),
        }
    }
}
