use super::matcher::matches_wildcard;
use super::NormalizedUrl;

/// Set of hosts a crawl is allowed to follow links into
#[derive(Debug, Clone)]
pub struct SiteScope {
    patterns: Vec<String>,
}

impl SiteScope {
    /// Builds a scope from configured patterns
    ///
    /// An empty list limits the crawl to the homepage host and its `www.`
    /// twin, so a homepage that redirects between the two stays in scope.
    /// Any other host change needs explicit patterns.
    pub fn new(homepage: &NormalizedUrl, patterns: &[String]) -> Self {
        let patterns = if patterns.is_empty() {
            let host = homepage.host();
            let twin = match host.strip_prefix("www.") {
                Some(bare) => bare.to_string(),
                None => format!("www.{}", host),
            };
            vec![host.to_string(), twin]
        } else {
            patterns.iter().map(|p| p.to_ascii_lowercase()).collect()
        };

        Self { patterns }
    }

    pub fn contains(&self, url: &NormalizedUrl) -> bool {
        self.patterns
            .iter()
            .any(|pattern| matches_wildcard(pattern, url.host()))
    }
}
