//! Sitemap XML parser
//!
//! Streams the document with quick-xml and keeps only `<loc>` values whose
//! parent is `<url>` (in a urlset) or `<sitemap>` (in a sitemap index).
//! Namespace prefixes are ignored.

use quick_xml::events::Event;
use quick_xml::Reader;

/// A parsed sitemap document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDocument {
    /// `<urlset>`: page locations
    UrlSet(Vec<String>),
    /// `<sitemapindex>`: child sitemap locations
    Index(Vec<String>),
}

impl SitemapDocument {
    pub fn locations(&self) -> &[String] {
        match self {
            Self::UrlSet(locs) | Self::Index(locs) => locs,
        }
    }
}

/// Parses a sitemap document
///
/// Fails if the XML is malformed, truncated, or its root is neither
/// `urlset` nor `sitemapindex`.
pub fn parse_sitemap(xml: &str) -> Result<SitemapDocument, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut root: Option<String> = None;
    let mut path: Vec<String> = Vec::new();
    let mut current_loc: Option<String> = None;
    let mut locations = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
                if root.is_none() {
                    root = Some(name.clone());
                }
                if name == "loc" && is_entry(path.last(), root.as_deref()) {
                    current_loc = Some(String::new());
                }
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                if root.is_none() {
                    root = Some(
                        String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase(),
                    );
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(loc) = current_loc.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| format!("bad text at byte {}: {}", reader.buffer_position(), e))?;
                    loc.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(loc) = current_loc.as_mut() {
                    loc.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if path.pop().as_deref() == Some("loc") {
                    if let Some(loc) = current_loc.take() {
                        let loc = loc.trim();
                        if !loc.is_empty() {
                            locations.push(loc.to_string());
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "malformed XML at byte {}: {}",
                    reader.error_position(),
                    e
                ))
            }
            _ => {}
        }
    }

    if !path.is_empty() {
        return Err(format!("document ends inside <{}>", path.join("><")));
    }

    match root.as_deref() {
        Some("urlset") => Ok(SitemapDocument::UrlSet(locations)),
        Some("sitemapindex") => Ok(SitemapDocument::Index(locations)),
        Some(other) => Err(format!("unexpected root element <{}>", other)),
        None => Err("document has no root element".to_string()),
    }
}

/// Whether a `<loc>` under `parent` is an entry for this kind of document
fn is_entry(parent: Option<&String>, root: Option<&str>) -> bool {
    matches!(
        (parent.map(String::as_str), root),
        (Some("url"), Some("urlset")) | (Some("sitemap"), Some("sitemapindex"))
    )
}
