//! URL handling module for Sitewalk
//!
//! This module provides URL normalization, the dedup key used by the
//! frontier, and host scope matching.

mod matcher;
mod normalize;
mod scope;

pub use matcher::matches_wildcard;
pub use normalize::{normalize, NormalizePolicy, NormalizedUrl, TrailingSlash};
pub use scope::SiteScope;
