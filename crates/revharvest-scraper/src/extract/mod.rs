//! Field extraction: raw page or payload to [`CanonicalReview`] records.
//!
//! Extraction is pure. The same raw content always yields the same records in
//! document (or array) order, whichever strategy fetched it.

pub mod json;
mod markup;
pub mod normalize;

use revharvest_core::CanonicalReview;

use crate::strategy::{RawContent, SourceKind};

/// Records found on one page plus what the page said about pagination.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Vec<CanonicalReview>,
    /// Selector family (or `"json"`) that located the records; `None` when
    /// nothing matched.
    pub family: Option<&'static str>,
    /// Elements that matched a container but carried neither title nor body.
    pub dropped: usize,
    /// Explicit "more pages" signal, when the page carries one.
    pub more_pages: Option<bool>,
}

impl Extraction {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl IntoIterator for Extraction {
    type Item = CanonicalReview;
    type IntoIter = std::vec::IntoIter<CanonicalReview>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

/// What a raw page shows about its own shape, judged with the same selectors
/// and key paths the extractor uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PageMarkers {
    /// At least one review container or record is present.
    pub reviews: bool,
    /// The listing shell rendered (markup only).
    pub shell: bool,
}

pub(crate) fn page_markers(raw: &RawContent) -> PageMarkers {
    match raw.source {
        SourceKind::Markup => {
            let document = scraper::Html::parse_document(&raw.body);
            PageMarkers {
                reviews: markup::has_review_container(&document),
                shell: markup::has_listing_shell(&document),
            }
        }
        SourceKind::Json => PageMarkers {
            reviews: raw.payload.as_ref().is_some_and(json::has_records),
            shell: false,
        },
    }
}

/// Extracts reviews from `raw`, resolving relative links against `origin`.
#[must_use]
pub fn extract(raw: &RawContent, origin: &reqwest::Url) -> Extraction {
    match raw.source {
        SourceKind::Markup => markup::extract(&raw.body, origin),
        SourceKind::Json => {
            if let Some(payload) = raw.payload.as_ref() {
                return json::extract(payload, origin);
            }
            match serde_json::from_str::<serde_json::Value>(&raw.body) {
                Ok(payload) => json::extract(&payload, origin),
                Err(e) => {
                    tracing::debug!(error = %e, "json source without a parseable body");
                    Extraction::default()
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "extract_test.rs"]
mod tests;
