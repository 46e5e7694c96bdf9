//! Frontier queue for the crawl
//!
//! Breadth-first FIFO of crawl tasks, deduplicated by normalized URL and
//! bounded by depth, queue size and total pages dispatched. The state is
//! shared by all workers behind one mutex held by the coordinator.

use crate::config::CrawlerConfig;
use crate::url::NormalizedUrl;
use std::collections::{HashSet, VecDeque};

/// A URL waiting to be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTask {
    pub url: NormalizedUrl,
    /// Link distance from the seeds
    pub depth: u32,
}

impl CrawlTask {
    pub fn new(url: NormalizedUrl, depth: u32) -> Self {
        Self { url, depth }
    }
}

/// What happened to a task offered to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    AlreadySeen,
    TooDeep,
    QueueFull,
}

/// Limits applied by the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontierLimits {
    pub max_pages: u32,
    pub max_depth: u32,
    pub max_queue_size: usize,
}

impl From<&CrawlerConfig> for FrontierLimits {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            max_depth: config.max_depth,
            max_queue_size: config.max_queue_size,
        }
    }
}

/// Pending work and everything already seen
#[derive(Debug)]
pub struct FrontierState {
    queue: VecDeque<CrawlTask>,
    seen: HashSet<String>,
    pages_dispatched: u32,
    in_flight: usize,
    limits: FrontierLimits,
}

impl FrontierState {
    pub fn new(limits: FrontierLimits) -> Self {
        Self {
            queue: VecDeque::new(),
            seen: HashSet::new(),
            pages_dispatched: 0,
            in_flight: 0,
            limits,
        }
    }

    /// Offers a task to the queue
    ///
    /// The task is dropped if its URL was seen before, it is deeper than
    /// `max_depth`, or the queue already holds `max_queue_size` tasks.
    /// Otherwise it goes to the tail and its URL is marked seen.
    pub fn enqueue(&mut self, task: CrawlTask) -> EnqueueOutcome {
        if self.seen.contains(task.url.key()) {
            return EnqueueOutcome::AlreadySeen;
        }
        if task.depth > self.limits.max_depth {
            return EnqueueOutcome::TooDeep;
        }
        if self.queue.len() >= self.limits.max_queue_size {
            return EnqueueOutcome::QueueFull;
        }

        self.seen.insert(task.url.key().to_string());
        self.queue.push_back(task);
        EnqueueOutcome::Queued
    }

    /// Pops the head of the queue
    ///
    /// Returns `None` when the queue is empty or `max_pages` tasks have
    /// already been handed out. A returned task counts as dispatched and in
    /// flight until [`FrontierState::complete`] is called.
    pub fn dequeue(&mut self) -> Option<CrawlTask> {
        if self.page_limit_reached() {
            return None;
        }

        let task = self.queue.pop_front()?;
        self.pages_dispatched += 1;
        self.in_flight += 1;
        Some(task)
    }

    /// Marks a dispatched task as finished
    pub fn complete(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Records a URL as seen without queueing it (e.g. a redirect target)
    ///
    /// Returns `true` if the URL was new.
    pub fn mark_seen(&mut self, url: &NormalizedUrl) -> bool {
        self.seen.insert(url.key().to_string())
    }

    pub fn is_seen(&self, url: &NormalizedUrl) -> bool {
        self.seen.contains(url.key())
    }

    pub fn page_limit_reached(&self) -> bool {
        self.pages_dispatched >= self.limits.max_pages
    }

    /// True when no more work can ever be handed out
    pub fn is_finished(&self) -> bool {
        self.page_limit_reached() || (self.queue.is_empty() && self.in_flight == 0)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pages_dispatched(&self) -> u32 {
        self.pages_dispatched
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn limits(&self) -> FrontierLimits {
        self.limits
    }
}
