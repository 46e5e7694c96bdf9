//! HTML parser for extracting links and page fields
//!
//! This module handles parsing HTML content to extract:
//! - Links to follow (raw hrefs from <a> tags and canonical links)
//! - Page title, meta description, canonical and <h1> headings
//! - Image and structured data counts for the audit
//!
//! Links are returned exactly as written; resolving them against
//! `base_href` or the final URL is the normalizer's job.

use scraper::{ElementRef, Html, Selector};

/// Elements whose text is never shown to a visitor
const HIDDEN_TEXT_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Mount points used by common single-page application frameworks
const SPA_MOUNT_SELECTORS: &[&str] = &["#root", "#app", "#__next", "#__nuxt", "[data-reactroot]"];

/// Extracted information from an HTML page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPage {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    pub meta_description: Option<String>,

    /// `<link rel="canonical">` target, as written
    pub canonical: Option<String>,

    pub h1s: Vec<String>,

    pub image_count: usize,

    /// Images with a missing or empty `alt` attribute
    pub images_missing_alt: usize,

    /// Whether the page carries JSON-LD structured data
    pub has_structured_data: bool,

    /// `<base href>` if present
    pub base_href: Option<String>,

    /// Candidate links (raw href strings)
    pub links: Vec<String>,
}

/// Parses HTML content and extracts links and page fields
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags anywhere in the document
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - Empty and fragment-only hrefs
///
/// Scheme filtering (`javascript:`, `mailto:`, ...) happens during
/// normalization. `rel="nofollow"` links are followed.
///
/// # Example
///
/// ```
/// use sitewalk::crawler::parse_html;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let parsed = parse_html(html);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links, vec!["/page".to_string()]);
/// ```
pub fn parse_html(html: &str) -> ParsedPage {
    let document = Html::parse_document(html);

    let canonical = first_attr(&document, "link[rel='canonical'][href]", "href");

    let mut links = extract_links(&document);
    if let Some(canonical) = &canonical {
        links.push(canonical.clone());
    }

    let (image_count, images_missing_alt) = count_images(&document);

    ParsedPage {
        title: extract_title(&document),
        meta_description: first_attr(&document, "meta[name='description'][content]", "content")
            .filter(|s| !s.is_empty()),
        canonical,
        h1s: extract_h1s(&document),
        image_count,
        images_missing_alt,
        has_structured_data: has_selector(&document, "script[type='application/ld+json']"),
        base_href: first_attr(&document, "base[href]", "href").filter(|s| !s.is_empty()),
        links,
    }
}

/// Checks whether static HTML looks like a client-rendered application shell
///
/// A page qualifies when its visible text is shorter than `text_threshold`
/// characters, or when it has an empty framework mount point and no anchors.
pub fn looks_like_spa_shell(html: &str, text_threshold: usize) -> bool {
    let document = Html::parse_document(html);

    if visible_text_len(&document) < text_threshold {
        return true;
    }

    let has_anchors = has_selector(&document, "a[href]");
    !has_anchors && has_empty_mount_point(&document)
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .filter(|s| !s.is_empty())
}

fn extract_h1s(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("h1") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Extracts all followable hrefs from the HTML document
fn extract_links(document: &Html) -> Vec<String> {
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            // Skip if it has the download attribute
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(href) = element.value().attr("href") {
                let href = href.trim();
                if !href.is_empty() && !href.starts_with('#') {
                    links.push(href.to_string());
                }
            }
        }
    }

    links
}

fn count_images(document: &Html) -> (usize, usize) {
    let Ok(selector) = Selector::parse("img") else {
        return (0, 0);
    };

    let mut total = 0;
    let mut missing_alt = 0;
    for element in document.select(&selector) {
        total += 1;
        let alt = element.value().attr("alt").map(str::trim).unwrap_or_default();
        if alt.is_empty() {
            missing_alt += 1;
        }
    }
    (total, missing_alt)
}

fn first_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|element| element.value().attr(attr))
        .map(|value| value.trim().to_string())
}

fn has_selector(document: &Html, selector: &str) -> bool {
    Selector::parse(selector)
        .map(|selector| document.select(&selector).next().is_some())
        .unwrap_or(false)
}

fn has_empty_mount_point(document: &Html) -> bool {
    SPA_MOUNT_SELECTORS.iter().any(|selector| {
        Selector::parse(selector)
            .map(|selector| {
                document
                    .select(&selector)
                    .any(|element| element.text().all(|t| t.trim().is_empty()))
            })
            .unwrap_or(false)
    })
}

/// Counts the characters of text a visitor would see in <body>
fn visible_text_len(document: &Html) -> usize {
    let Ok(body_selector) = Selector::parse("body") else {
        return 0;
    };

    document
        .select(&body_selector)
        .next()
        .map(|body| {
            body.descendants()
                .filter_map(|node| node.value().as_text().map(|text| (node, text)))
                .filter(|(node, _)| {
                    !node.ancestors().filter_map(ElementRef::wrap).any(|el| {
                        HIDDEN_TEXT_ELEMENTS.contains(&el.value().name())
                    })
                })
                .map(|(_, text)| {
                    text.split_whitespace()
                        .map(|word| word.chars().count())
                        .sum::<usize>()
                })
                .sum()
        })
        .unwrap_or(0)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
