//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the crawl loop for one site:
//! - Loading the homepage robots policy and discovering sitemaps
//! - Seeding the frontier
//! - Running the worker pool over the shared frontier
//! - Filtering discovered links by scope and robots policy
//! - Recording every page outcome

use crate::config::{Config, SiteEntry};
use crate::crawler::frontier::{CrawlTask, EnqueueOutcome, FrontierLimits, FrontierState};
use crate::crawler::parser::{parse_html, ParsedPage};
use crate::crawler::{
    build_http_client, FetchResult, FetchStatus, Fetcher, RateLimiter, RedirectGuard,
};
use crate::render::RenderChain;
use crate::robots::RobotsCache;
use crate::sitemap::SitemapDiscoverer;
use crate::storage::{open_storage, RunStatus, SqliteStorage, Storage};
use crate::url::{normalize, NormalizePolicy, NormalizedUrl, SiteScope};
use crate::CrawlError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;

/// Outcome of one crawled page
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub task: CrawlTask,
    pub result: FetchResult,
    /// Extracted fields, present for successful HTML responses
    pub page: Option<ParsedPage>,
}

/// Links that were discovered but never queued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropCounts {
    /// Could not be normalized (bad syntax, unsupported scheme)
    pub invalid: u64,
    pub out_of_scope: u64,
    /// Disallowed by robots.txt
    pub disallowed: u64,
    pub duplicate: u64,
    pub too_deep: u64,
    pub queue_full: u64,
}

impl DropCounts {
    pub fn total(&self) -> u64 {
        self.invalid
            + self.out_of_scope
            + self.disallowed
            + self.duplicate
            + self.too_deep
            + self.queue_full
    }
}

/// Everything a finished site crawl produced
#[derive(Debug, Clone)]
pub struct CrawlReport {
    /// Homepage of the crawled site
    pub site: String,
    /// Page outcomes in completion order
    pub records: Vec<PageRecord>,
    pub drops: DropCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CrawlReport {
    pub fn iter(&self) -> std::slice::Iter<'_, PageRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Finds the record for a URL by its dedup key
    pub fn get(&self, url: &NormalizedUrl) -> Option<&PageRecord> {
        self.records.iter().find(|r| r.task.url == *url)
    }

    pub fn count_status(&self, status: FetchStatus) -> usize {
        self.records.iter().filter(|r| r.result.status == status).count()
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at).to_std().unwrap_or_default()
    }
}

impl IntoIterator for CrawlReport {
    type Item = PageRecord;
    type IntoIter = std::vec::IntoIter<PageRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a CrawlReport {
    type Item = &'a PageRecord;
    type IntoIter = std::slice::Iter<'a, PageRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Follows a redirect only into the site's scope and only where robots.txt
/// allows it
struct SiteRedirects {
    scope: SiteScope,
    robots: Arc<RobotsCache>,
}

#[async_trait]
impl RedirectGuard for SiteRedirects {
    async fn allows(&self, target: &NormalizedUrl) -> bool {
        self.scope.contains(target) && self.robots.is_allowed(target).await
    }
}

/// Where finished pages are persisted
struct RunStorage {
    storage: Arc<Mutex<SqliteStorage>>,
    run_id: i64,
}

#[derive(Default)]
struct Progress {
    records: Vec<PageRecord>,
    drops: DropCounts,
}

/// Main crawler coordinator structure
///
/// One coordinator crawls one site. Workers share the frontier under a
/// single mutex that is never held across an `.await`; idle workers park on
/// a [`Notify`] until new work arrives or the crawl is finished.
pub struct Coordinator {
    config: Arc<Config>,
    site: String,
    homepage: NormalizedUrl,
    scope: SiteScope,
    policy: NormalizePolicy,
    fetcher: Fetcher,
    robots: Arc<RobotsCache>,
    frontier: Mutex<FrontierState>,
    work_ready: Notify,
    progress: Mutex<Progress>,
    storage: Option<RunStorage>,
}

impl Coordinator {
    /// Creates a coordinator for one configured site
    ///
    /// Builds the HTTP client, rate limiter, robots cache, fetcher and render
    /// chain. Fails if the homepage does not normalize or the client cannot
    /// be built.
    pub fn new(config: Arc<Config>, site: &SiteEntry) -> Result<Self, CrawlError> {
        let policy = config.normalize.policy();
        let homepage = normalize(&site.homepage, None, &policy)?;
        let scope = SiteScope::new(&homepage, &site.scope);

        let client = build_http_client(&config.fetcher)?;
        let configured_delay = config.crawler.configured_delay();
        let limiter = Arc::new(RateLimiter::new(configured_delay));

        let robots = Arc::new(RobotsCache::new(
            client.clone(),
            config.user_agent.primary.clone(),
            config.fetcher.robots_timeout(),
            configured_delay,
            config.crawler.max_crawl_delay(),
            limiter.clone(),
        ));
        let fetcher = Fetcher::new(&config, client, limiter).with_redirect_guard(Arc::new(
            SiteRedirects {
                scope: scope.clone(),
                robots: robots.clone(),
            },
        ));

        Ok(Self {
            scope,
            frontier: Mutex::new(FrontierState::new(FrontierLimits::from(&config.crawler))),
            site: site.homepage.clone(),
            homepage,
            policy,
            fetcher,
            robots,
            work_ready: Notify::new(),
            progress: Mutex::new(Progress::default()),
            storage: None,
            config,
        })
    }

    /// Persists every finished page into `run_id`
    pub fn with_storage(mut self, storage: Arc<Mutex<SqliteStorage>>, run_id: i64) -> Self {
        self.storage = Some(RunStorage { storage, run_id });
        self
    }

    /// Replaces the rendering chain built from the configuration
    pub fn with_render_chain(self, chain: RenderChain) -> Self {
        Self {
            fetcher: self.fetcher.with_render_chain(chain),
            ..self
        }
    }

    pub fn homepage(&self) -> &NormalizedUrl {
        &self.homepage
    }

    /// Runs the crawl to completion
    ///
    /// Terminates when the queue is empty with nothing in flight, or when
    /// `max_pages` tasks have been dispatched. Page failures are recorded,
    /// never propagated.
    pub async fn run(self) -> CrawlReport {
        let started_at = Utc::now();
        tracing::info!("Starting crawl of {}", self.site);

        self.seed().await;

        let workers = self.config.crawler.workers.max(1);
        let coordinator = Arc::new(self);

        let mut tasks = JoinSet::new();
        for worker_id in 0..workers {
            let coordinator = coordinator.clone();
            tasks.spawn(async move { coordinator.worker(worker_id).await });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Crawl worker failed: {}", e);
            }
        }

        let progress = std::mem::take(&mut *coordinator.progress.lock().unwrap());
        let report = CrawlReport {
            site: coordinator.site.clone(),
            records: progress.records,
            drops: progress.drops,
            started_at,
            finished_at: Utc::now(),
        };

        tracing::info!(
            "Crawl of {} completed: {} pages ({} ok) in {:?}, {} links dropped",
            report.site,
            report.len(),
            report.count_status(FetchStatus::Ok),
            report.duration(),
            report.drops.total()
        );

        report
    }

    /// Seeds the frontier with the homepage and sitemap URLs
    ///
    /// The homepage goes first at depth 0, subject only to robots.txt.
    /// In-scope sitemap URLs follow, also at depth 0.
    async fn seed(&self) {
        let robots = self.robots.policy_for(&self.homepage).await;

        if robots.is_allowed(&self.homepage.path_and_query()) {
            let outcome = self
                .frontier
                .lock()
                .unwrap()
                .enqueue(CrawlTask::new(self.homepage.clone(), 0));
            tracing::debug!("Seeded homepage {}: {:?}", self.homepage, outcome);
        } else {
            tracing::warn!("Homepage {} is disallowed by robots.txt", self.homepage);
            self.progress.lock().unwrap().drops.disallowed += 1;
        }

        let discovery = SitemapDiscoverer::new(&self.fetcher, self.policy)
            .discover(&self.homepage, &robots)
            .await;
        for error in &discovery.errors {
            tracing::warn!("{}", error);
        }
        tracing::info!(
            "Sitemaps for {}: {} read, {} URLs",
            self.site,
            discovery.sitemaps_read,
            discovery.urls.len()
        );

        for url in discovery.urls {
            self.offer(url, 0).await;
        }
    }

    async fn worker(&self, worker_id: u32) {
        tracing::debug!("Worker {} started", worker_id);

        loop {
            // Created before checking the frontier so a wakeup sent in
            // between is not lost
            let notified = self.work_ready.notified();

            let task = {
                let mut frontier = self.frontier.lock().unwrap();
                if frontier.is_finished() {
                    break;
                }
                frontier.dequeue()
            };

            match task {
                Some(task) => {
                    self.process(task).await;
                    self.frontier.lock().unwrap().complete();
                    self.work_ready.notify_waiters();
                }
                None => notified.await,
            }
        }

        // Let parked workers observe the finished state
        self.work_ready.notify_waiters();
        tracing::debug!("Worker {} finished", worker_id);
    }

    /// Fetches one task, follows its links and records the outcome
    async fn process(&self, task: CrawlTask) {
        tracing::debug!("Fetching {} (depth {})", task.url, task.depth);
        let result = self.fetcher.fetch(&task.url).await;

        if result.final_url != task.url {
            self.frontier.lock().unwrap().mark_seen(&result.final_url);
        }

        let page = match (&result.status, &result.body) {
            (FetchStatus::Ok, Some(body)) if result.is_html() => Some(parse_html(body)),
            _ => None,
        };

        match (&page, result.error()) {
            (_, Some(error)) => tracing::warn!("{}", error),
            (Some(page), None) => {
                tracing::info!(
                    "Fetched {} [{}] {} links",
                    task.url,
                    result.render.as_str(),
                    page.links.len()
                );
                self.follow_links(&task, &result, page).await;
            }
            (None, None) => tracing::debug!(
                "Fetched {} ({}), not HTML",
                task.url,
                result.content_type.as_deref().unwrap_or("no content type")
            ),
        }

        let record = PageRecord { task, result, page };
        self.persist(&record);
        self.progress.lock().unwrap().records.push(record);
    }

    /// Resolves, filters and enqueues the links of a fetched page
    async fn follow_links(&self, task: &CrawlTask, result: &FetchResult, page: &ParsedPage) {
        let final_url = result.final_url.as_url();
        let base = page
            .base_href
            .as_deref()
            .and_then(|href| final_url.join(href).ok())
            .unwrap_or_else(|| final_url.clone());

        for href in &page.links {
            match normalize(href, Some(&base), &self.policy) {
                Ok(url) => {
                    self.offer(url, task.depth + 1).await;
                }
                Err(e) => {
                    tracing::debug!("Dropping link {} on {}: {}", href, task.url, e);
                    self.progress.lock().unwrap().drops.invalid += 1;
                }
            }
        }
    }

    /// Queues a URL if it is in scope, unseen and allowed by robots.txt
    async fn offer(&self, url: NormalizedUrl, depth: u32) -> bool {
        if !self.scope.contains(&url) {
            self.progress.lock().unwrap().drops.out_of_scope += 1;
            return false;
        }

        // Skip the robots lookup for URLs we already have
        let seen = self.frontier.lock().unwrap().is_seen(&url);
        if seen {
            self.progress.lock().unwrap().drops.duplicate += 1;
            return false;
        }

        if !self.robots.is_allowed(&url).await {
            tracing::debug!("{} disallowed by robots.txt", url);
            self.progress.lock().unwrap().drops.disallowed += 1;
            return false;
        }

        let outcome = self
            .frontier
            .lock()
            .unwrap()
            .enqueue(CrawlTask::new(url, depth));

        let mut progress = self.progress.lock().unwrap();
        match outcome {
            EnqueueOutcome::Queued => {
                drop(progress);
                self.work_ready.notify_waiters();
                return true;
            }
            EnqueueOutcome::AlreadySeen => progress.drops.duplicate += 1,
            EnqueueOutcome::TooDeep => progress.drops.too_deep += 1,
            EnqueueOutcome::QueueFull => progress.drops.queue_full += 1,
        }
        false
    }

    fn persist(&self, record: &PageRecord) {
        let Some(run) = &self.storage else {
            return;
        };

        let mut storage = run.storage.lock().unwrap();
        if let Err(e) = storage.record_page(run.run_id, record) {
            tracing::error!("Failed to store {}: {}", record.task.url, e);
        }
    }
}

/// Runs the crawl for every configured site
///
/// Opens the database, then crawls the sites in turn, one run each. A site
/// whose coordinator cannot be built is marked failed and skipped.
///
/// # Example
///
/// ```no_run
/// use sitewalk::config::load_config_with_hash;
/// use sitewalk::crawler::run_crawl;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("sitewalk.toml"))?;
/// let reports = run_crawl(config, &hash).await?;
/// println!("{} sites crawled", reports.len());
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(config: Config, config_hash: &str) -> Result<Vec<CrawlReport>, CrawlError> {
    let config = Arc::new(config);
    let storage = open_storage(Path::new(&config.output.database_path))?;
    let storage = Arc::new(Mutex::new(storage));

    let mut reports = Vec::with_capacity(config.sites.len());
    for site in &config.sites {
        let run_id = storage
            .lock()
            .unwrap()
            .create_run(&site.homepage, config_hash)?;

        let coordinator = match Coordinator::new(config.clone(), site) {
            Ok(coordinator) => coordinator.with_storage(storage.clone(), run_id),
            Err(e) => {
                tracing::error!("Cannot crawl {}: {}", site.homepage, e);
                storage.lock().unwrap().complete_run(run_id, RunStatus::Failed)?;
                continue;
            }
        };

        let report = coordinator.run().await;
        storage
            .lock()
            .unwrap()
            .complete_run(run_id, RunStatus::Completed)?;
        reports.push(report);
    }

    Ok(reports)
}
