//! Scripted strategy and page fixtures shared by the pagination and session
//! unit tests.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use revharvest_core::{StrategyKind, Target};

use crate::identity::Identity;
use crate::pagination::PipelineSettings;
use crate::strategy::{AcquisitionStrategy, FetchAttempt, FetchOutcome, PageToken, RawContent};

/// Replays queued outcomes in order; once the queue is drained every call
/// returns `fallback`.
pub(crate) struct ScriptedStrategy {
    kind: StrategyKind,
    script: Mutex<VecDeque<FetchOutcome>>,
    fallback: FetchOutcome,
    pub(crate) calls: Mutex<Vec<(u32, Uuid)>>,
    pub(crate) forgotten: Mutex<Vec<Uuid>>,
    pub(crate) shutdowns: AtomicUsize,
}

impl ScriptedStrategy {
    pub(crate) fn new(kind: StrategyKind, script: Vec<FetchOutcome>) -> Self {
        Self {
            kind,
            script: Mutex::new(script.into()),
            fallback: FetchOutcome::Failed("script exhausted".to_string()),
            calls: Mutex::new(Vec::new()),
            forgotten: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_fallback(mut self, fallback: FetchOutcome) -> Self {
        self.fallback = fallback;
        self
    }

    /// Page numbers requested, in call order.
    pub(crate) fn pages(&self) -> Vec<u32> {
        self.calls.lock().unwrap().iter().map(|(p, _)| *p).collect()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AcquisitionStrategy for ScriptedStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn fetch(&self, _target: &Target, page: &PageToken, identity: &Identity) -> FetchAttempt {
        self.calls
            .lock()
            .unwrap()
            .push((page.number, identity.session()));
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        FetchAttempt {
            strategy: self.kind,
            page: page.clone(),
            identity: identity.session(),
            outcome,
        }
    }

    async fn forget(&self, session: Uuid) {
        self.forgotten.lock().unwrap().push(session);
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Settings with every delay zeroed so tests run instantly.
pub(crate) fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        max_soft_blocks: 2,
        inter_request_delay: Duration::ZERO,
        retry_backoff_base_ms: 0,
        max_pages: 50,
        run_deadline: None,
        max_concurrent_targets: 2,
    }
}

/// Review-card page holding one card per id. `more` controls the
/// pagination bar: `Some(true)` renders a live next link, `Some(false)` a
/// bar without one, `None` no bar at all.
pub(crate) fn review_page(ids: std::ops::Range<i64>, more: Option<bool>) -> FetchOutcome {
    let mut html = String::from("<html><body><div id=\"reviews\">");
    for id in ids {
        let _ = write!(
            html,
            r#"<div data-test="review-card">
                 <a data-test="review-card-link" href="/products/acme-crm/reviews/acme-crm-review-{id}">link</a>
                 <h3 data-test="review-card-title">Review {id}</h3>
               </div>"#
        );
    }
    html.push_str("</div>");
    match more {
        Some(true) => html.push_str(
            r#"<nav data-test="pagination"><a rel="next" href="?page=next">Next</a></nav>"#,
        ),
        Some(false) => html.push_str(r#"<nav data-test="pagination"><span>1</span></nav>"#),
        None => {}
    }
    html.push_str("</body></html>");
    FetchOutcome::Success(RawContent::markup(200, html))
}

/// Listing shell that rendered but holds no reviews.
pub(crate) fn empty_page() -> FetchOutcome {
    FetchOutcome::Success(RawContent::markup(
        200,
        r#"<html><body><div id="reviews"></div></body></html>"#.to_string(),
    ))
}

pub(crate) fn blocked(status: u16) -> FetchOutcome {
    FetchOutcome::Blocked {
        reason: format!("HTTP {status}"),
        content: RawContent::markup(
            status,
            "<html><body>We have detected unusual traffic from your network.</body></html>"
                .to_string(),
        ),
    }
}
