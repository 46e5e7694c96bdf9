//! Sitemap discovery module
//!
//! Finds a site's sitemaps (robots.txt `Sitemap:` lines first, then a list of
//! conventional paths) and walks sitemap indexes down to page URLs. Every
//! failure is per document: a sitemap that cannot be fetched or parsed is
//! logged and skipped while the others are still used.

mod parser;

pub use parser::{parse_sitemap, SitemapDocument};

use crate::crawler::Fetcher;
use crate::robots::RobotsPolicy;
use crate::url::{normalize, NormalizePolicy, NormalizedUrl};
use crate::CrawlError;
use std::collections::{HashSet, VecDeque};

/// Paths probed, in order, when robots.txt declares no sitemap
pub const FALLBACK_SITEMAP_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap-index.xml",
    "/sitemap-posts.xml",
    "/sitemap1.xml",
    "/sitemap/sitemap.xml",
];

/// Deepest level of sitemap index nesting followed
pub const MAX_SITEMAP_DEPTH: u32 = 3;

/// Outcome of a discovery pass
#[derive(Debug, Default)]
pub struct SitemapDiscovery {
    /// Unique page URLs in discovery order
    pub urls: Vec<NormalizedUrl>,
    /// Sitemap documents fetched and parsed
    pub sitemaps_read: usize,
    /// Per-document failures
    pub errors: Vec<CrawlError>,
}

/// Walks sitemaps for one site
pub struct SitemapDiscoverer<'a> {
    fetcher: &'a Fetcher,
    policy: NormalizePolicy,
}

impl<'a> SitemapDiscoverer<'a> {
    pub fn new(fetcher: &'a Fetcher, policy: NormalizePolicy) -> Self {
        Self { fetcher, policy }
    }

    /// Discovers page URLs for the site at `origin`
    ///
    /// 1. Sitemaps declared in robots.txt are read if there are any
    /// 2. Otherwise (or if they yield nothing) the conventional paths are
    ///    probed in order, stopping at the first one that returns a valid
    ///    sitemap document
    pub async fn discover(&self, origin: &NormalizedUrl, robots: &RobotsPolicy) -> SitemapDiscovery {
        let mut discovery = SitemapDiscovery::default();
        let mut visited = HashSet::new();

        let declared: Vec<NormalizedUrl> = robots
            .sitemaps()
            .iter()
            .filter_map(|raw| match normalize(raw, Some(origin.as_url()), &self.policy) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::debug!("Ignoring robots.txt sitemap '{}': {}", raw, e);
                    None
                }
            })
            .collect();

        if !declared.is_empty() {
            tracing::info!("robots.txt declares {} sitemap(s)", declared.len());
            for sitemap in declared {
                self.walk(sitemap, None, &mut visited, &mut discovery).await;
            }
            if !discovery.urls.is_empty() {
                return discovery;
            }
            tracing::info!("Declared sitemaps yielded no URLs; probing conventional paths");
        }

        for path in FALLBACK_SITEMAP_PATHS {
            let candidate = match origin
                .origin_join(path)
                .and_then(|url| normalize(url.as_str(), None, &self.policy))
            {
                Ok(candidate) => candidate,
                Err(_) => continue,
            };

            if visited.contains(candidate.as_str()) {
                continue;
            }

            let result = self.fetcher.fetch_static(&candidate).await;
            let document = match result.body.as_deref().filter(|_| result.is_ok()) {
                Some(body) => parse_sitemap(body),
                None => {
                    tracing::debug!("No sitemap at {}", candidate);
                    continue;
                }
            };

            match document {
                Ok(document) => {
                    tracing::info!("Found sitemap at {}", candidate);
                    self.walk(candidate, Some(document), &mut visited, &mut discovery)
                        .await;
                    break;
                }
                Err(reason) => {
                    tracing::debug!("{} is not a sitemap: {}", candidate, reason);
                }
            }
        }

        discovery
    }

    /// Reads a sitemap and every index below it, breadth first
    ///
    /// `prefetched` is the already-parsed root document, if the caller has it.
    async fn walk(
        &self,
        root: NormalizedUrl,
        prefetched: Option<SitemapDocument>,
        visited: &mut HashSet<String>,
        discovery: &mut SitemapDiscovery,
    ) {
        let mut pending: VecDeque<(NormalizedUrl, u32, Option<SitemapDocument>)> = VecDeque::new();
        pending.push_back((root, 0, prefetched));
        let mut seen_pages: HashSet<String> = discovery
            .urls
            .iter()
            .map(|url| url.key().to_string())
            .collect();

        while let Some((sitemap_url, depth, prefetched)) = pending.pop_front() {
            if !visited.insert(sitemap_url.as_str().to_string()) {
                tracing::debug!("Skipping already visited sitemap {}", sitemap_url);
                continue;
            }

            let document = match prefetched {
                Some(document) => document,
                None => match self.load(&sitemap_url).await {
                    Ok(document) => document,
                    Err(e) => {
                        tracing::warn!("{}", e);
                        discovery.errors.push(e);
                        continue;
                    }
                },
            };
            discovery.sitemaps_read += 1;

            match document {
                SitemapDocument::UrlSet(locations) => {
                    let before = discovery.urls.len();
                    for loc in locations {
                        match normalize(&loc, None, &self.policy) {
                            Ok(url) => {
                                if seen_pages.insert(url.key().to_string()) {
                                    discovery.urls.push(url);
                                }
                            }
                            Err(e) => tracing::debug!("Skipping sitemap entry '{}': {}", loc, e),
                        }
                    }
                    tracing::debug!(
                        "{}: {} new page URLs",
                        sitemap_url,
                        discovery.urls.len() - before
                    );
                }
                SitemapDocument::Index(locations) => {
                    if depth >= MAX_SITEMAP_DEPTH {
                        tracing::warn!(
                            "Sitemap index {} is nested deeper than {}; not following its {} children",
                            sitemap_url,
                            MAX_SITEMAP_DEPTH,
                            locations.len()
                        );
                        continue;
                    }
                    for loc in locations {
                        match normalize(&loc, None, &self.policy) {
                            Ok(child) => pending.push_back((child, depth + 1, None)),
                            Err(e) => tracing::debug!("Skipping child sitemap '{}': {}", loc, e),
                        }
                    }
                }
            }
        }
    }

    async fn load(&self, url: &NormalizedUrl) -> Result<SitemapDocument, CrawlError> {
        let sitemap_error = |reason: String| CrawlError::SitemapParse {
            url: url.to_string(),
            reason,
        };

        let result = self.fetcher.fetch_static(url).await;
        if let Some(failure) = &result.failure {
            return Err(sitemap_error(failure.to_string()));
        }

        let body = result.body.unwrap_or_default();
        parse_sitemap(&body).map_err(sitemap_error)
    }
}
