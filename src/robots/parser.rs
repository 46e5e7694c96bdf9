//! Robots.txt parser implementation
//!
//! Line tokenizing is delegated to the robotstxt crate; this module collects
//! its callbacks into groups and evaluates rules for a single user agent.

use robotstxt::{parse_robotstxt, RobotsParseHandler};
use std::time::Duration;

/// Whether a rule permits or forbids matching paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Allow,
    Disallow,
}

/// A single Allow/Disallow line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsRule {
    pub kind: RuleKind,
    pub pattern: String,
}

impl RobotsRule {
    /// Checks if this rule's pattern matches a path
    ///
    /// `*` matches any run of characters and a trailing `$` anchors the
    /// pattern to the end of the path. Everything else is a prefix match.
    pub fn matches(&self, path: &str) -> bool {
        pattern_matches(self.pattern.as_bytes(), path.as_bytes())
    }
}

/// Policy for one user agent on one host
#[derive(Debug, Clone, Default)]
pub struct RobotsPolicy {
    rules: Vec<RobotsRule>,
    crawl_delay: Option<Duration>,
    sitemaps: Vec<String>,
}

impl RobotsPolicy {
    /// Parses a robots.txt body and selects the group for `user_agent`
    ///
    /// The group whose User-agent token matches the crawler's product token
    /// (case-insensitive) wins; otherwise the `*` group applies. Several
    /// groups naming the same agent are merged. Sitemap lines are collected
    /// regardless of group.
    pub fn parse(body: &str, user_agent: &str) -> Self {
        let mut collector = GroupCollector::default();
        parse_robotstxt(body, &mut collector);

        let token = product_token(user_agent);
        let specific: Vec<&Group> = collector
            .groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a == &token))
            .collect();

        let selected = if specific.is_empty() {
            collector
                .groups
                .iter()
                .filter(|g| g.agents.iter().any(|a| a == "*"))
                .collect()
        } else {
            specific
        };

        let mut rules = Vec::new();
        let mut crawl_delay = None;
        for group in selected {
            rules.extend(group.rules.iter().cloned());
            if crawl_delay.is_none() {
                crawl_delay = group.crawl_delay;
            }
        }

        Self {
            rules,
            crawl_delay,
            sitemaps: collector.sitemaps,
        }
    }

    /// Creates a permissive policy that allows everything
    ///
    /// This is used when robots.txt cannot be fetched.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Checks if a path (with query) may be fetched
    ///
    /// The longest matching pattern decides; on a tie Allow wins. A path no
    /// rule matches is allowed.
    pub fn is_allowed(&self, path: &str) -> bool {
        let mut best: Option<&RobotsRule> = None;

        for rule in self.rules.iter().filter(|r| r.matches(path)) {
            best = match best {
                None => Some(rule),
                Some(current) => {
                    let longer = rule.pattern.len() > current.pattern.len();
                    let tie_to_allow = rule.pattern.len() == current.pattern.len()
                        && rule.kind == RuleKind::Allow;
                    if longer || tie_to_allow {
                        Some(rule)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        best.map_or(true, |rule| rule.kind == RuleKind::Allow)
    }

    /// Crawl-delay of the selected group
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }

    /// Delay to use for this host: the larger of the configured delay and
    /// the Crawl-delay
    pub fn effective_delay(&self, configured: Duration) -> Duration {
        match self.crawl_delay {
            Some(delay) => configured.max(delay),
            None => configured,
        }
    }

    /// Sitemap URLs declared anywhere in the file, in file order
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    pub fn rules(&self) -> &[RobotsRule] {
        &self.rules
    }
}

/// Rules that apply to a run of consecutive User-agent lines
#[derive(Debug, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<RobotsRule>,
    crawl_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct GroupCollector {
    groups: Vec<Group>,
    sitemaps: Vec<String>,
    /// Whether the previous directive was User-agent
    reading_agents: bool,
}

impl GroupCollector {
    fn push_rule(&mut self, kind: RuleKind, value: &str) {
        self.reading_agents = false;
        let pattern = value.trim();
        // An empty Disallow allows everything; an empty Allow says nothing
        if pattern.is_empty() {
            return;
        }
        if let Some(group) = self.groups.last_mut() {
            group.rules.push(RobotsRule {
                kind,
                pattern: pattern.to_string(),
            });
        }
    }
}

impl RobotsParseHandler for GroupCollector {
    fn handle_robots_start(&mut self) {}

    fn handle_robots_end(&mut self) {}

    fn handle_user_agent(&mut self, _line_num: u32, user_agent: &str) {
        if !self.reading_agents || self.groups.is_empty() {
            self.groups.push(Group::default());
        }
        self.reading_agents = true;

        if let Some(group) = self.groups.last_mut() {
            group.agents.push(product_token(user_agent));
        }
    }

    fn handle_allow(&mut self, _line_num: u32, value: &str) {
        self.push_rule(RuleKind::Allow, value);
    }

    fn handle_disallow(&mut self, _line_num: u32, value: &str) {
        self.push_rule(RuleKind::Disallow, value);
    }

    fn handle_sitemap(&mut self, _line_num: u32, value: &str) {
        let value = value.trim();
        if !value.is_empty() {
            self.sitemaps.push(value.to_string());
        }
    }

    fn handle_unknown_action(&mut self, _line_num: u32, action: &str, value: &str) {
        if !action.trim().eq_ignore_ascii_case("crawl-delay") {
            return;
        }
        self.reading_agents = false;

        let delay = value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());

        if let (Some(delay), Some(group)) = (delay, self.groups.last_mut()) {
            group.crawl_delay = Some(delay);
        }
    }
}

/// Extracts the lowercase product token, e.g. "sitewalk" from
/// "Sitewalk/0.1 (+https://example.com/bot)"
fn product_token(user_agent: &str) -> String {
    let trimmed = user_agent.trim();
    if trimmed == "*" {
        return "*".to_string();
    }
    trimmed
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Matches a robots.txt pattern against a path
///
/// Tracks every position in the path the pattern prefix could have reached,
/// which handles `*` without backtracking.
fn pattern_matches(pattern: &[u8], path: &[u8]) -> bool {
    let mut positions: Vec<usize> = vec![0];

    for (i, &c) in pattern.iter().enumerate() {
        if c == b'$' && i + 1 == pattern.len() {
            return positions.contains(&path.len());
        }

        if c == b'*' {
            let start = positions[0];
            positions = (start..=path.len()).collect();
            continue;
        }

        positions = positions
            .iter()
            .filter(|&&p| p < path.len() && path[p] == c)
            .map(|&p| p + 1)
            .collect();

        if positions.is_empty() {
            return false;
        }
    }

    true
}
