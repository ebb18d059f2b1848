use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound of the target site's star rating.
pub const RATING_SCALE_MAX: f64 = 5.0;

/// A review normalized to the same shape regardless of which acquisition
/// strategy produced it.
///
/// At least one of `review_title` / `review_content` is always present; the
/// extractor drops elements that have neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalReview {
    /// Numeric review id parsed from the permalink, if available.
    pub review_id: Option<i64>,
    pub review_title: Option<String>,
    pub review_content: Option<String>,
    pub review_question_answers: Vec<QuestionAnswer>,
    /// Star rating on a 0–5 scale.
    pub review_rating: Option<f64>,
    pub reviewer: Reviewer,
    /// ISO-8601 date (`YYYY-MM-DD`) or RFC 3339 timestamp.
    pub publish_date: Option<String>,
    /// Free-text bucket such as `"Small-Business (50 or fewer emp.)"`.
    pub reviewer_company_size: Option<String>,
    pub video_link: Option<String>,
    /// Absolute permalink to the review.
    pub review_link: Option<String>,
}

impl CanonicalReview {
    /// Returns `true` when the record carries a title or body.
    #[must_use]
    pub fn has_text(&self) -> bool {
        self.review_title.is_some() || self.review_content.is_some()
    }

    /// Identity used to merge the same review seen twice within one run:
    /// the numeric id when present, otherwise the permalink.
    #[must_use]
    pub fn dedup_key(&self) -> Option<String> {
        self.review_id
            .map(|id| format!("id:{id}"))
            .or_else(|| self.review_link.as_ref().map(|l| format!("link:{l}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    pub reviewer_name: Option<String>,
    pub reviewer_job_title: Option<String>,
    /// Absolute link to the reviewer's profile.
    pub reviewer_link: Option<String>,
}

/// One survey question and the reviewer's answer to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question: String,
    pub answer: String,
}

/// Summary handed to the persistence layer after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub company: String,
    pub total_reviews: usize,
    pub success: bool,
    pub scraped_at: DateTime<Utc>,
}
