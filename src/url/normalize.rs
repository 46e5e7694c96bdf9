use crate::UrlError;
use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use url::Url;

/// Query parameters that only carry campaign tracking data
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "msclkid"];

/// How a trailing slash on a non-root path is treated
///
/// Crawlers disagree on whether `/about/` and `/about` are the same resource,
/// so this is a policy choice rather than a fixed rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrailingSlash {
    /// `/about/` and `/about` are the same page
    #[default]
    Strip,
    /// `/about/` and `/about` are distinct pages
    Preserve,
}

/// Normalization rules applied by [`normalize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizePolicy {
    /// Rewrite `http` to `https` when the URL uses the default port
    pub upgrade_https: bool,
    pub trailing_slash: TrailingSlash,
    /// Drop a leading `www.` from the host
    pub strip_www: bool,
}

impl Default for NormalizePolicy {
    fn default() -> Self {
        Self {
            upgrade_https: true,
            trailing_slash: TrailingSlash::Strip,
            strip_www: false,
        }
    }
}

/// A canonicalized URL
///
/// Holds two forms: the fetch URL (cleaned query and fragment retained) and
/// the dedup key (query and fragment dropped). Equality, hashing and ordering
/// all go through the dedup key.
#[derive(Debug, Clone)]
pub struct NormalizedUrl {
    url: Url,
    key: String,
}

impl NormalizedUrl {
    /// The URL to request
    pub fn as_url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// The deduplication key (no query, no fragment)
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The lowercase host
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Path plus query, as matched by robots.txt rules
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    /// Per-host key shared by the robots cache and the rate limiter,
    /// e.g. `https://example.com` or `http://127.0.0.1:8080`
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    /// Joins an absolute path onto this URL's origin
    pub fn origin_join(&self, path: &str) -> Result<Url, UrlError> {
        let mut root = self.url.clone();
        root.set_query(None);
        root.set_fragment(None);
        root.set_path("/");
        root.join(path).map_err(|e| UrlError::Parse(e.to_string()))
    }
}

impl PartialEq for NormalizedUrl {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for NormalizedUrl {}

impl Hash for NormalizedUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl Ord for NormalizedUrl {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for NormalizedUrl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Normalizes a URL according to the given policy
///
/// # Normalization Steps
///
/// 1. Resolve against `base` (if any) and parse; reject if malformed
/// 2. Reject anything that is not `http`/`https` (`javascript:`, `mailto:`, ...)
/// 3. Upgrade `http` to `https` when the policy allows and no explicit port is set
/// 4. Lowercase the host, optionally removing `www.`
/// 5. Normalize path:
///    - Remove dot segments and duplicate slashes
///    - Apply the trailing slash policy (root `/` is always kept)
/// 6. Remove tracking query parameters and sort the remaining ones
///
/// Default ports are dropped by the parser itself.
///
/// # Examples
///
/// ```
/// use sitewalk::url::{normalize, NormalizePolicy};
///
/// let url = normalize("http://EXAMPLE.COM/page/", None, &NormalizePolicy::default()).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/page");
/// ```
pub fn normalize(
    raw_url: &str,
    base_url: Option<&Url>,
    policy: &NormalizePolicy,
) -> Result<NormalizedUrl, UrlError> {
    let raw_url = raw_url.trim();
    if raw_url.is_empty() {
        return Err(UrlError::Parse("empty URL".to_string()));
    }

    // Step 1: Parse, resolving relative references
    let parsed = match base_url {
        Some(base) => base.join(raw_url),
        None => Url::parse(raw_url),
    };
    let mut url = parsed.map_err(|e| UrlError::Parse(format!("{}: {}", raw_url, e)))?;

    // Step 2: Validate scheme
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::UnsupportedScheme(url.scheme().to_string()));
    }

    let host = url.host_str().ok_or(UrlError::MissingHost)?.to_lowercase();
    if host.is_empty() {
        return Err(UrlError::MissingHost);
    }

    // Step 3: Upgrade scheme
    if policy.upgrade_https && url.scheme() == "http" && url.port().is_none() {
        url.set_scheme("https")
            .map_err(|_| UrlError::Parse(format!("cannot upgrade scheme of {}", raw_url)))?;
    }

    // Step 4: Host
    let host = match host.strip_prefix("www.") {
        Some(bare) if policy.strip_www && !bare.is_empty() => bare.to_string(),
        _ => host,
    };
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Parse(format!("invalid host '{}': {}", host, e)))?;

    // Step 5: Path
    let normalized_path = normalize_path(url.path(), policy.trailing_slash);
    url.set_path(&normalized_path);

    // Step 6: Query
    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    let mut key_url = url.clone();
    key_url.set_query(None);
    key_url.set_fragment(None);

    Ok(NormalizedUrl {
        key: key_url.to_string(),
        url,
    })
}

/// Normalizes a URL path by removing dot segments and duplicate slashes
fn normalize_path(path: &str, trailing_slash: TrailingSlash) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut result = format!("/{}", segments.join("/"));

    if trailing_slash == TrailingSlash::Preserve && path.ends_with('/') {
        result.push('/');
    }

    result
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
