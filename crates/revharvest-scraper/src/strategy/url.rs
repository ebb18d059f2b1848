//! Page URL rendering from `{base}`/`{product}`/`{page}`/`{cursor}` templates.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::error::ScraperError;

use super::PageToken;

/// Characters that must be escaped inside a single path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Renders the URL for `page` of `product`.
///
/// When the page token carries an absolute cursor URL (as handed out by a
/// `links.next` field), that URL is used as-is.
///
/// # Errors
///
/// Returns [`ScraperError::InvalidUrl`] if the rendered string does not parse.
pub fn render_url(
    template: &str,
    base_url: &str,
    product: &str,
    page: &PageToken,
) -> Result<reqwest::Url, ScraperError> {
    if let Some(cursor) = page.cursor.as_deref() {
        if cursor.starts_with("http://") || cursor.starts_with("https://") {
            return parse(cursor);
        }
    }

    let product = utf8_percent_encode(product, PATH_SEGMENT).to_string();
    let cursor = page
        .cursor
        .as_deref()
        .map(|c| utf8_percent_encode(c, PATH_SEGMENT).to_string())
        .unwrap_or_default();
    let rendered = template
        .replace("{base}", base_url.trim_end_matches('/'))
        .replace("{product}", &product)
        .replace("{page}", &page.number.to_string())
        .replace("{cursor}", &cursor);
    parse(&rendered)
}

fn parse(raw: &str) -> Result<reqwest::Url, ScraperError> {
    reqwest::Url::parse(raw).map_err(|e| ScraperError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}
