//! Statistics generation from crawl results
//!
//! Statistics can be computed from a finished [`CrawlReport`] or loaded
//! back from the database for any recorded run.

use crate::crawler::{CrawlReport, DropCounts};
use crate::storage::{RunRecord, Storage, StorageResult};
use std::collections::BTreeMap;

/// Crawl statistics summary for one site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlStatistics {
    pub site: String,

    /// Total number of pages fetched
    pub total_pages: u64,

    /// Count of pages by fetch status
    pub pages_by_status: BTreeMap<String, u64>,

    /// Count of pages by link depth from the seeds
    pub pages_by_depth: BTreeMap<u32, u64>,

    /// Count of pages by render outcome
    pub pages_by_render: BTreeMap<String, u64>,

    /// Count of failed pages by HTTP status
    pub http_errors: BTreeMap<u16, u64>,

    /// Successful pages without a <title>
    pub missing_titles: u64,

    /// Total number of links found on fetched pages
    pub total_links: u64,

    /// Links that were not queued; only known for a live report
    pub drops: Option<DropCounts>,

    pub duration_secs: Option<u64>,
}

impl CrawlStatistics {
    /// Computes statistics from a finished crawl
    pub fn from_report(report: &CrawlReport) -> Self {
        let mut stats = Self::empty(&report.site);

        for record in report {
            let result = &record.result;
            stats.add_page(
                result.status.as_str(),
                record.task.depth,
                result.render.as_str(),
                result.http_status.filter(|_| !result.is_ok()),
            );

            if let Some(page) = &record.page {
                stats.total_links += page.links.len() as u64;
                if page.title.is_none() {
                    stats.missing_titles += 1;
                }
            }
        }

        stats.drops = Some(report.drops);
        stats.duration_secs = Some(report.duration().as_secs());
        stats
    }

    fn empty(site: &str) -> Self {
        Self {
            site: site.to_string(),
            total_pages: 0,
            pages_by_status: BTreeMap::new(),
            pages_by_depth: BTreeMap::new(),
            pages_by_render: BTreeMap::new(),
            http_errors: BTreeMap::new(),
            missing_titles: 0,
            total_links: 0,
            drops: None,
            duration_secs: None,
        }
    }

    fn add_page(&mut self, status: &str, depth: u32, render: &str, http_error: Option<u16>) {
        self.total_pages += 1;
        *self.pages_by_status.entry(status.to_string()).or_default() += 1;
        *self.pages_by_depth.entry(depth).or_default() += 1;
        *self.pages_by_render.entry(render.to_string()).or_default() += 1;
        if let Some(code) = http_error {
            *self.http_errors.entry(code).or_default() += 1;
        }
    }

    pub fn ok_pages(&self) -> u64 {
        self.pages_by_status.get("ok").copied().unwrap_or(0)
    }

    /// Share of pages fetched successfully, in percent
    pub fn success_rate(&self) -> f64 {
        if self.total_pages == 0 {
            return 0.0;
        }
        self.ok_pages() as f64 / self.total_pages as f64 * 100.0
    }
}

/// Loads statistics for a recorded run
pub fn load_statistics(storage: &dyn Storage, run: &RunRecord) -> StorageResult<CrawlStatistics> {
    let mut stats = CrawlStatistics::empty(&run.site);

    stats.total_pages = storage.count_pages(run.id)?;
    stats.pages_by_status = storage.count_pages_by_status(run.id)?;
    stats.pages_by_depth = storage.depth_breakdown(run.id)?;
    stats.pages_by_render = storage.render_breakdown(run.id)?;

    for page in storage.load_pages(run.id)? {
        if page.status == "ok" {
            stats.total_links += page.link_count;
            if page.title.is_none() {
                stats.missing_titles += 1;
            }
        } else if let Some(code) = page.http_status {
            *stats.http_errors.entry(code).or_default() += 1;
        }
    }

    if let (Ok(started), Some(Ok(finished))) = (
        run.started_at.parse::<chrono::DateTime<chrono::Utc>>(),
        run.finished_at
            .as_deref()
            .map(str::parse::<chrono::DateTime<chrono::Utc>>),
    ) {
        stats.duration_secs = Some((finished - started).num_seconds().max(0) as u64);
    }

    Ok(stats)
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics: {} ===\n", stats.site);

    println!("Overview:");
    println!("  Pages fetched: {}", stats.total_pages);
    println!("  Links found: {}", stats.total_links);
    if let Some(secs) = stats.duration_secs {
        println!("  Duration: {}s", secs);
    }
    println!();

    println!("Pages by Status:");
    for (status, count) in &stats.pages_by_status {
        println!("  {}: {} ({:.1}%)", status, count, percentage(*count, stats.total_pages));
    }
    println!();

    println!("Pages by Depth:");
    for (depth, count) in &stats.pages_by_depth {
        println!("  {}: {}", depth, count);
    }
    println!();

    println!("Rendering:");
    for (render, count) in &stats.pages_by_render {
        println!("  {}: {}", render, count);
    }
    println!();

    if !stats.http_errors.is_empty() {
        println!("HTTP Errors:");
        let mut errors: Vec<_> = stats.http_errors.iter().collect();
        errors.sort_by(|a, b| b.1.cmp(a.1));
        for (code, count) in errors {
            println!("  {}: {}", code, count);
        }
        println!();
    }

    if let Some(drops) = &stats.drops {
        println!("Links Not Queued ({}):", drops.total());
        println!("  Invalid: {}", drops.invalid);
        println!("  Out of scope: {}", drops.out_of_scope);
        println!("  Disallowed by robots.txt: {}", drops.disallowed);
        println!("  Duplicate: {}", drops.duplicate);
        println!("  Too deep: {}", drops.too_deep);
        println!("  Queue full: {}", drops.queue_full);
        println!();
    }

    if stats.missing_titles > 0 {
        println!("Pages missing a <title>: {}", stats.missing_titles);
    }

    println!(
        "Success Rate: {:.1}% ({} / {} pages fetched successfully)",
        stats.success_rate(),
        stats.ok_pages(),
        stats.total_pages
    );
}

fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count as f64 / total as f64 * 100.0
}
