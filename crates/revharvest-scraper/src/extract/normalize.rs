//! Value cleanup shared by the markup and JSON extractors.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use regex::Regex;

use revharvest_core::RATING_SCALE_MAX;

static REVIEW_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-(\d+)/?(?:[?#].*)?$").expect("valid review id regex"));
static SURVEY_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)(\d+)$").expect("valid survey id regex"));
static LEADING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid number regex"));

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%B %d, %Y", "%b %d, %Y", "%d %B %Y"];

/// Collapses runs of whitespace to single spaces and trims. Returns `None`
/// for strings that are empty afterwards.
#[must_use]
pub fn clean_text(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Parses a rating such as `"4.5"`, `"4.5 out of 5"`, or `"Rated 4 stars"`.
/// Values outside the site's scale yield `None`.
#[must_use]
pub fn parse_rating(raw: &str) -> Option<f64> {
    let number = LEADING_NUMBER_RE.find(raw)?.as_str().parse::<f64>().ok()?;
    bound_rating(number)
}

#[must_use]
pub fn bound_rating(value: f64) -> Option<f64> {
    if value.is_finite() && (0.0..=RATING_SCALE_MAX).contains(&value) {
        Some(value)
    } else {
        None
    }
}

/// Normalizes a publish date to ISO-8601.
///
/// RFC 3339 timestamps are kept with their offset; bare dates in any of the
/// site's display formats become `YYYY-MM-DD`.
#[must_use]
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.to_rfc3339());
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    // "2024-03-07 10:22:01 UTC" and similar.
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
}

/// Numeric review id from a permalink ending in `-<digits>`.
#[must_use]
pub fn id_from_link(link: &str) -> Option<i64> {
    REVIEW_ID_RE
        .captures(link)
        .and_then(|caps| caps[1].parse::<i64>().ok())
}

/// Numeric id from values like `"survey-response-8812"` or `"8812"`.
#[must_use]
pub fn id_from_token(token: &str) -> Option<i64> {
    SURVEY_ID_RE
        .captures(token.trim())
        .and_then(|caps| caps[1].parse::<i64>().ok())
}

/// Resolves `href` against the site origin. Fragment-only and script links
/// are discarded.
#[must_use]
pub fn absolutize(origin: &reqwest::Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    origin.join(href).ok().map(|url| url.to_string())
}
