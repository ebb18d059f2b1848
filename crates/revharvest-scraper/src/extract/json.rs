//! Review extraction from the JSON endpoint.
//!
//! Payload shapes differ between API generations, so every canonical field is
//! resolved through an ordered list of dotted key paths. Each path is tried
//! on the record itself and then on its `attributes` object (JSON:API style).

use serde_json::Value;

use revharvest_core::{CanonicalReview, QuestionAnswer, Reviewer};

use super::normalize::{
    absolutize, clean_text, id_from_link, id_from_token, normalize_date, parse_rating,
};
use super::Extraction;

/// Where the record array may live, in order.
const RECORD_ARRAYS: &[&str] = &[
    "reviews",
    "data",
    "results",
    "items",
    "survey_responses",
    "data.reviews",
];

const ID: &[&str] = &["id", "review_id", "reviewId", "survey_response_id"];
const TITLE: &[&str] = &["title", "review_title", "headline", "name"];
const CONTENT: &[&str] = &[
    "comment_text",
    "content",
    "text",
    "body",
    "review_content",
    "review_body",
];
const RATING: &[&str] = &["star_rating", "rating", "review_rating", "stars", "rating.value"];
const PUBLISH_DATE: &[&str] = &[
    "submitted_at",
    "published_at",
    "publish_date",
    "date",
    "created_at",
];
const REVIEWER_NAME: &[&str] = &[
    "reviewer.name",
    "reviewer.reviewer_name",
    "user.name",
    "author.name",
    "reviewer_name",
    "user_name",
];
const REVIEWER_JOB_TITLE: &[&str] = &[
    "reviewer.job_title",
    "reviewer.reviewer_job_title",
    "user.title",
    "author.job_title",
    "reviewer_job_title",
    "job_title",
];
const REVIEWER_LINK: &[&str] = &[
    "reviewer.url",
    "reviewer.reviewer_link",
    "user.url",
    "author.url",
    "reviewer_link",
    "user_url",
];
const COMPANY_SIZE: &[&str] = &[
    "reviewer.company_size",
    "reviewer_company_size",
    "company_segment",
    "company_size",
];
const VIDEO_LINK: &[&str] = &["video_link", "video_url", "video.url"];
const REVIEW_LINK: &[&str] = &["review_link", "url", "permalink", "share_link", "links.self"];
const QUESTION_ANSWERS: &[&str] = &[
    "review_question_answers",
    "question_answers",
    "answers",
    "comment_answers",
    "secondary_answers",
];

const TOTAL_PAGES: &[&str] = &[
    "meta.total_pages",
    "meta.pagination.total_pages",
    "pagination.total_pages",
    "total_pages",
    "meta.page_count",
    "last_page",
];
const NEXT_CURSOR: &[&str] = &[
    "meta.next_cursor",
    "meta.pagination.next",
    "links.next",
    "pagination.next_cursor",
    "next_cursor",
    "paging.next",
];
const HAS_MORE: &[&str] = &[
    "meta.has_more",
    "meta.pagination.has_more",
    "pagination.has_more",
    "has_more",
    "has_next_page",
];

/// Walks a dotted path through nested objects. `null` counts as absent.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, key| current.get(key))
        .filter(|v| !v.is_null())
}

/// First present value across `paths`, checking the record then its
/// `attributes`.
fn first<'a>(record: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    let attributes = record.get("attributes");
    paths.iter().find_map(|path| {
        lookup(record, path).or_else(|| attributes.and_then(|a| lookup(a, path)))
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => clean_text(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text(record: &Value, paths: &[&str]) -> Option<String> {
    let attributes = record.get("attributes");
    paths.iter().find_map(|path| {
        lookup(record, path)
            .and_then(scalar_text)
            .or_else(|| attributes.and_then(|a| lookup(a, path)).and_then(scalar_text))
    })
}

fn record_id(record: &Value) -> Option<i64> {
    let attributes = record.get("attributes");
    ID.iter().find_map(|path| {
        let value = lookup(record, path).or_else(|| attributes.and_then(|a| lookup(a, path)))?;
        match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => id_from_token(s),
            _ => None,
        }
    })
}

fn pair_from_object(entry: &Value) -> Option<QuestionAnswer> {
    let question = ["question", "title", "label", "text"]
        .iter()
        .find_map(|k| entry.get(*k).and_then(scalar_text))?;
    let answer = ["answer", "value", "response"]
        .iter()
        .find_map(|k| entry.get(*k).and_then(scalar_text))?;
    Some(QuestionAnswer { question, answer })
}

/// Accepts an array of `{question, answer}`-like objects, or a map whose
/// values are either answer strings (keyed by question) or such objects.
fn question_answers(record: &Value) -> Vec<QuestionAnswer> {
    let Some(raw) = first(record, QUESTION_ANSWERS) else {
        return Vec::new();
    };
    match raw {
        Value::Array(entries) => entries.iter().filter_map(pair_from_object).collect(),
        Value::Object(map) => map
            .iter()
            .filter_map(|(key, value)| match value {
                Value::Object(_) => pair_from_object(value),
                other => Some(QuestionAnswer {
                    question: clean_text(key)?,
                    answer: scalar_text(other)?,
                }),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn review_from_record(record: &Value, origin: &reqwest::Url) -> CanonicalReview {
    let link = |paths: &[&str]| text(record, paths).and_then(|href| absolutize(origin, &href));

    let review_link = link(REVIEW_LINK);
    let review_id = record_id(record).or_else(|| review_link.as_deref().and_then(id_from_link));

    CanonicalReview {
        review_id,
        review_title: text(record, TITLE),
        review_content: text(record, CONTENT),
        review_question_answers: question_answers(record),
        review_rating: text(record, RATING).as_deref().and_then(parse_rating),
        reviewer: Reviewer {
            reviewer_name: text(record, REVIEWER_NAME),
            reviewer_job_title: text(record, REVIEWER_JOB_TITLE),
            reviewer_link: link(REVIEWER_LINK),
        },
        publish_date: text(record, PUBLISH_DATE).as_deref().and_then(normalize_date),
        reviewer_company_size: text(record, COMPANY_SIZE),
        video_link: link(VIDEO_LINK),
        review_link,
    }
}

fn record_array(payload: &Value) -> Option<&Vec<Value>> {
    if let Value::Array(records) = payload {
        return Some(records);
    }
    RECORD_ARRAYS
        .iter()
        .find_map(|path| lookup(payload, path).and_then(Value::as_array))
}

/// Whether the payload carries at least one record object.
pub(crate) fn has_records(payload: &Value) -> bool {
    record_array(payload).is_some_and(|records| records.iter().any(Value::is_object))
}

/// Total page count advertised by the payload.
#[must_use]
pub fn total_pages(payload: &Value) -> Option<u32> {
    TOTAL_PAGES.iter().find_map(|path| {
        let value = lookup(payload, path)?;
        value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .and_then(|n| u32::try_from(n).ok())
    })
}

/// Opaque cursor or absolute URL of the next page, if the payload has one.
#[must_use]
pub fn next_cursor(payload: &Value) -> Option<String> {
    NEXT_CURSOR
        .iter()
        .find_map(|path| lookup(payload, path).and_then(Value::as_str).and_then(clean_text))
}

fn has_more(payload: &Value) -> Option<bool> {
    HAS_MORE
        .iter()
        .find_map(|path| lookup(payload, path).and_then(Value::as_bool))
}

pub(crate) fn extract(payload: &Value, origin: &reqwest::Url) -> Extraction {
    let more_pages = has_more(payload);
    let Some(records) = record_array(payload) else {
        tracing::debug!("no review array in json payload");
        return Extraction {
            records: Vec::new(),
            family: None,
            dropped: 0,
            more_pages,
        };
    };

    let reviews: Vec<CanonicalReview> = records
        .iter()
        .filter(|r| r.is_object())
        .map(|r| review_from_record(r, origin))
        .filter(CanonicalReview::has_text)
        .collect();
    let dropped = records.len() - reviews.len();
    tracing::debug!(found = records.len(), kept = reviews.len(), dropped, "json extraction");

    Extraction {
        records: reviews,
        family: Some("json"),
        dropped,
        more_pages,
    }
}
