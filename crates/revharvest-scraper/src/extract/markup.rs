//! Review extraction from server-rendered or browser-rendered HTML.
//!
//! Review containers are located by trying selector families in order until
//! one matches. Inside a container every field has its own ordered fallback
//! list; the first selector producing a non-empty value wins.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use revharvest_core::{CanonicalReview, QuestionAnswer, Reviewer};

use super::normalize::{
    absolutize, clean_text, id_from_link, id_from_token, normalize_date, parse_rating,
};
use super::Extraction;

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

/// Review container families, newest layout first.
const CONTAINER_FAMILIES: &[&str] = &[
    r#"[data-test="review-card"]"#,
    r#"[itemprop="review"]"#,
    r#"div[id^="survey-response-"]"#,
    "article.review-card, div.review-card",
];

static CONTAINERS: LazyLock<Vec<(&'static str, Selector)>> = LazyLock::new(|| {
    CONTAINER_FAMILIES
        .iter()
        .map(|css| (*css, sel(css)))
        .collect()
});

/// Elements showing the listing shell rendered even when it holds no reviews.
static LISTING_SHELL: LazyLock<Selector> = LazyLock::new(|| {
    sel(concat!(
        r#"[data-test="pagination"], [data-test="product-header"], "#,
        r#"[itemprop="aggregateRating"], [itemprop="aggregaterating"], "#,
        "#reviews, .pagination",
    ))
});

/// Whether any review container family matches in `document`.
pub(crate) fn has_review_container(document: &Html) -> bool {
    CONTAINERS
        .iter()
        .any(|(_, selector)| document.select(selector).next().is_some())
}

pub(crate) fn has_listing_shell(document: &Html) -> bool {
    document.select(&LISTING_SHELL).next().is_some()
}

/// How a fallback reads its matched element.
#[derive(Clone, Copy)]
enum Read {
    Text,
    Attr(&'static str),
    /// `stars-N` class token on a half-star scale.
    StarsClass,
}

struct Fallback {
    selector: Selector,
    read: Read,
}

impl Fallback {
    fn apply(&self, root: ElementRef<'_>) -> Option<String> {
        root.select(&self.selector).find_map(|el| match self.read {
            Read::Text => clean_text(&el.text().collect::<String>()),
            Read::Attr(name) => el.value().attr(name).and_then(clean_text),
            Read::StarsClass => el
                .value()
                .classes()
                .find_map(|class| class.strip_prefix("stars-"))
                .and_then(|n| n.parse::<f64>().ok())
                .map(|half_stars| (half_stars / 2.0).to_string()),
        })
    }
}

fn chain(fallbacks: &[(&str, Read)]) -> Vec<Fallback> {
    fallbacks
        .iter()
        .map(|(css, read)| Fallback {
            selector: sel(css),
            read: *read,
        })
        .collect()
}

/// First non-empty value across the chain.
fn first(chain: &[Fallback], root: ElementRef<'_>) -> Option<String> {
    chain.iter().find_map(|fallback| fallback.apply(root))
}

static TITLE: LazyLock<Vec<Fallback>> = LazyLock::new(|| {
    chain(&[
        (r#"[data-test="review-card-title"]"#, Read::Text),
        (r#"h3[itemprop="name"], div[itemprop="name"]"#, Read::Text),
        (".review-card__title", Read::Text),
        (".review-title", Read::Text),
        ("h3", Read::Text),
    ])
});

static CONTENT: LazyLock<Vec<Fallback>> = LazyLock::new(|| {
    chain(&[
        (r#"[data-test="review-card-content"]"#, Read::Text),
        (r#"[itemprop="reviewBody"]"#, Read::Text),
        (".review-card__body", Read::Text),
        (".review-content", Read::Text),
        ("p.formatted-text", Read::Text),
    ])
});

static RATING: LazyLock<Vec<Fallback>> = LazyLock::new(|| {
    chain(&[
        (r#"[data-test="star-rating"]"#, Read::Attr("data-rating")),
        (r#"[itemprop="ratingValue"]"#, Read::Attr("content")),
        (r#"[itemprop="ratingValue"]"#, Read::Text),
        (r#"[class*="stars-"]"#, Read::StarsClass),
        (".rating", Read::Attr("aria-label")),
    ])
});

static PUBLISH_DATE: LazyLock<Vec<Fallback>> = LazyLock::new(|| {
    chain(&[
        ("time", Read::Attr("datetime")),
        (r#"meta[itemprop="datePublished"]"#, Read::Attr("content")),
        (r#"[itemprop="datePublished"]"#, Read::Text),
        (".review-date", Read::Text),
        ("time", Read::Text),
    ])
});

static REVIEWER_NAME: LazyLock<Vec<Fallback>> = LazyLock::new(|| {
    chain(&[
        (r#"[data-test="reviewer-display-name"]"#, Read::Text),
        (r#"[itemprop="author"] meta[itemprop="name"]"#, Read::Attr("content")),
        (r#"[itemprop="author"] [itemprop="name"]"#, Read::Text),
        (".reviewer-name", Read::Text),
    ])
});

static REVIEWER_JOB_TITLE: LazyLock<Vec<Fallback>> = LazyLock::new(|| {
    chain(&[
        (r#"[data-test="reviewer-job-title"]"#, Read::Text),
        (r#"[itemprop="jobTitle"]"#, Read::Text),
        (".reviewer-job-title", Read::Text),
    ])
});

static REVIEWER_LINK: LazyLock<Vec<Fallback>> = LazyLock::new(|| {
    chain(&[
        (r#"a[data-test="reviewer-display-name"]"#, Read::Attr("href")),
        (r#"[data-test="reviewer-display-name"] a"#, Read::Attr("href")),
        (r#"[itemprop="author"] a[href]"#, Read::Attr("href")),
        (r#"a[href*="/users/"]"#, Read::Attr("href")),
    ])
});

static COMPANY_SIZE: LazyLock<Vec<Fallback>> = LazyLock::new(|| {
    chain(&[
        (r#"[data-test="reviewer-company-size"]"#, Read::Text),
        (r#"[data-test="company-size"]"#, Read::Text),
        (".reviewer-company-size", Read::Text),
    ])
});

static VIDEO_LINK: LazyLock<Vec<Fallback>> = LazyLock::new(|| {
    chain(&[
        (r#"a[data-test="review-video-link"]"#, Read::Attr("href")),
        (r#"a[href*="youtube.com"], a[href*="youtu.be"]"#, Read::Attr("href")),
        (r#"a[href*="vimeo.com"]"#, Read::Attr("href")),
        ("video source", Read::Attr("src")),
        ("video", Read::Attr("src")),
    ])
});

static REVIEW_LINK: LazyLock<Vec<Fallback>> = LazyLock::new(|| {
    chain(&[
        (r#"a[data-test="review-card-link"]"#, Read::Attr("href")),
        (r#"[data-test="review-card-title"] a"#, Read::Attr("href")),
        (r#"a[itemprop="url"]"#, Read::Attr("href")),
        (r#"meta[itemprop="url"]"#, Read::Attr("content")),
        ("a.review-link", Read::Attr("href")),
    ])
});

/// Question/answer families: (pair container, question, answer).
static QA_FAMILIES: LazyLock<Vec<(Selector, Selector, Selector)>> = LazyLock::new(|| {
    [
        (
            r#"[data-test="review-answer"]"#,
            r#"[data-test="review-question"]"#,
            r#"[data-test="review-text"]"#,
        ),
        (r#"[itemprop="reviewBody"] > div"#, "h5", "p"),
        (".review-qa", ".question", ".answer"),
    ]
    .iter()
    .map(|(pair, q, a)| (sel(pair), sel(q), sel(a)))
    .collect()
});

static NEXT_PAGE: LazyLock<Selector> = LazyLock::new(|| {
    sel(r#"a[rel="next"], link[rel="next"], [data-test="pagination-next"], .pagination__next"#)
});
static PAGINATION: LazyLock<Selector> =
    LazyLock::new(|| sel(r#"[data-test="pagination"], nav.pagination, ul.pagination"#));

fn question_answers(root: ElementRef<'_>) -> Vec<QuestionAnswer> {
    for (pair, question, answer) in QA_FAMILIES.iter() {
        let pairs: Vec<QuestionAnswer> = root
            .select(pair)
            .filter_map(|el| {
                let text_of = |s: &Selector| {
                    el.select(s)
                        .next()
                        .and_then(|n| clean_text(&n.text().collect::<String>()))
                };
                Some(QuestionAnswer {
                    question: text_of(question)?,
                    answer: text_of(answer)?,
                })
            })
            .collect();
        if !pairs.is_empty() {
            return pairs;
        }
    }
    Vec::new()
}

fn review_from_element(el: ElementRef<'_>, origin: &reqwest::Url) -> CanonicalReview {
    let link = |chain: &[Fallback]| first(chain, el).and_then(|href| absolutize(origin, &href));

    let review_link = link(REVIEW_LINK.as_slice());
    let review_id = review_link
        .as_deref()
        .and_then(id_from_link)
        .or_else(|| el.value().attr("data-review-id").and_then(id_from_token))
        .or_else(|| {
            el.value()
                .attr("id")
                .filter(|id| id.starts_with("survey-response-"))
                .and_then(id_from_token)
        });

    CanonicalReview {
        review_id,
        review_title: first(&TITLE, el),
        review_content: first(&CONTENT, el),
        review_question_answers: question_answers(el),
        review_rating: first(&RATING, el).as_deref().and_then(parse_rating),
        reviewer: Reviewer {
            reviewer_name: first(&REVIEWER_NAME, el),
            reviewer_job_title: first(&REVIEWER_JOB_TITLE, el),
            reviewer_link: link(REVIEWER_LINK.as_slice()),
        },
        publish_date: first(&PUBLISH_DATE, el)
            .as_deref()
            .and_then(normalize_date),
        reviewer_company_size: first(&COMPANY_SIZE, el),
        video_link: link(VIDEO_LINK.as_slice()),
        review_link,
    }
}

/// Whether the page advertises another page: `Some(true)` for an enabled
/// "next" control, `Some(false)` for a pagination bar without one, `None`
/// when the page carries no pagination at all.
fn more_pages(document: &Html) -> Option<bool> {
    if let Some(next) = document.select(&NEXT_PAGE).next() {
        let attrs = next.value();
        let disabled = attrs.attr("aria-disabled") == Some("true")
            || attrs.attr("disabled").is_some()
            || attrs.classes().any(|c| c == "disabled" || c.ends_with("--disabled"));
        return Some(!disabled);
    }
    document.select(&PAGINATION).next().map(|_| false)
}

pub(crate) fn extract(html: &str, origin: &reqwest::Url) -> Extraction {
    let document = Html::parse_document(html);

    let Some((family, elements)) = CONTAINERS.iter().find_map(|(name, selector)| {
        let found: Vec<ElementRef<'_>> = document.select(selector).collect();
        (!found.is_empty()).then_some((*name, found))
    }) else {
        tracing::debug!("no review container family matched");
        return Extraction {
            records: Vec::new(),
            family: None,
            dropped: 0,
            more_pages: more_pages(&document),
        };
    };

    let total = elements.len();
    let records: Vec<CanonicalReview> = elements
        .into_iter()
        .map(|el| review_from_element(el, origin))
        .filter(CanonicalReview::has_text)
        .collect();
    let dropped = total - records.len();
    tracing::debug!(family, found = total, kept = records.len(), dropped, "markup extraction");

    Extraction {
        records,
        family: Some(family),
        dropped,
        more_pages: more_pages(&document),
    }
}
