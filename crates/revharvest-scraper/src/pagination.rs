//! Pagination controller: drives one strategy across pages for one target.
//!
//! ```text
//! Start ─▶ Fetch ──success──▶ Extract ──more──▶ Advance ─▶ Fetch …
//!           │  ▲                 │
//!           │  └──soft block─────┤(same page, new identity)
//!           │                    └──quota met / exhausted / empty page 1──▶ Done
//!           └──hard block / deadline / cancelled──────────────────────────▶ Aborted
//! ```
//!
//! Pages are fetched strictly in increasing order, one request in flight.

use std::sync::Arc;
use std::time::Duration;

use revharvest_core::{CanonicalReview, HarvestConfig, Target};

use crate::block::{BlockDetector, BlockReason, BlockTracker, Verdict};
use crate::diagnostics::{
    DiagnosticSink, DiagnosticSnapshot, Diagnostics, ReviewCollection, SnapshotKind,
};
use crate::extract::extract;
use crate::identity::{Identity, IdentityRotator};
use crate::rate_limit::{backoff_delay, jittered, pause};
use crate::session::RunControl;
use crate::strategy::{AcquisitionStrategy, FetchAttempt, FetchOutcome, PageToken, RawContent};

/// Tunables shared by every pagination run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Consecutive soft blocks tolerated before escalating to a hard block.
    pub max_soft_blocks: u32,
    pub inter_request_delay: Duration,
    pub retry_backoff_base_ms: u64,
    pub max_pages: u32,
    /// Wall-clock budget per target; `None` means unbounded.
    pub run_deadline: Option<Duration>,
    pub max_concurrent_targets: usize,
}

impl From<&HarvestConfig> for PipelineSettings {
    fn from(config: &HarvestConfig) -> Self {
        Self {
            max_soft_blocks: config.max_soft_blocks,
            inter_request_delay: Duration::from_millis(config.inter_request_delay_ms),
            retry_backoff_base_ms: config.retry_backoff_base_ms,
            max_pages: config.max_pages.max(1),
            run_deadline: (config.run_deadline_secs > 0)
                .then(|| Duration::from_secs(config.run_deadline_secs)),
            max_concurrent_targets: config.max_concurrent_targets.max(1),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&HarvestConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoneReason {
    QuotaMet,
    /// The last page said there is nothing further, or yielded nothing new.
    Exhausted,
    /// Page 1 matched no reviews: either the product has none or the page
    /// structure changed. The body is captured either way.
    EmptyFirstPage,
    PageLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    HardBlock(BlockReason),
    Deadline,
    Cancelled,
    IdentityPool(String),
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::HardBlock(reason) => write!(f, "hard block ({reason})"),
            AbortReason::Deadline => f.write_str("run deadline exceeded"),
            AbortReason::Cancelled => f.write_str("run cancelled"),
            AbortReason::IdentityPool(err) => write!(f, "identity pool unavailable: {err}"),
        }
    }
}

#[derive(Debug)]
pub enum PageState {
    Start,
    Fetch(PageToken),
    Extract(PageToken, RawContent),
    Advance(PageToken, Option<String>),
    Done(DoneReason),
    Aborted(AbortReason),
}

/// Terminal state of one pagination run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Done(DoneReason),
    Aborted(AbortReason),
}

/// Records extracted from one page.
#[derive(Debug, Clone)]
pub struct PageResult {
    pub page: PageToken,
    pub records: Vec<CanonicalReview>,
    pub has_more: bool,
}

#[derive(Debug, Clone)]
pub struct PaginationReport {
    pub end: Termination,
    /// First page not yet successfully extracted; where a fallback strategy
    /// resumes.
    pub next_page: u32,
    /// Soft blocks retried with a fresh identity.
    pub retries: u32,
    pub pages_fetched: u32,
}

/// Shared run context handed to each pagination run.
pub struct PaginationController<'a> {
    pub strategy: &'a dyn AcquisitionStrategy,
    /// Other strategies sharing `rotator`. Sessions retired during this run
    /// are dropped from them too.
    pub peers: &'a [Arc<dyn AcquisitionStrategy>],
    pub rotator: &'a IdentityRotator,
    pub detector: &'a BlockDetector,
    pub settings: &'a PipelineSettings,
    pub control: &'a RunControl,
    pub origin: &'a reqwest::Url,
    pub sink: &'a dyn DiagnosticSink,
}

struct RunState<'r> {
    collection: &'r mut ReviewCollection,
    diagnostics: &'r mut Diagnostics,
    tracker: BlockTracker,
    next_page: u32,
    retries: u32,
    pages_fetched: u32,
}

impl PaginationController<'_> {
    /// Runs the state machine from `start_page` until it reaches `Done` or
    /// `Aborted`, merging records into `collection`.
    pub async fn run(
        &self,
        target: &Target,
        start_page: u32,
        collection: &mut ReviewCollection,
        diagnostics: &mut Diagnostics,
    ) -> PaginationReport {
        let mut run = RunState {
            collection,
            diagnostics,
            tracker: BlockTracker::new(self.settings.max_soft_blocks),
            next_page: start_page.max(1),
            retries: 0,
            pages_fetched: 0,
        };

        let mut state = PageState::Start;
        loop {
            state = match state {
                PageState::Start => PageState::Fetch(PageToken::at(run.next_page)),
                PageState::Fetch(page) => self.fetch(target, page, &mut run).await,
                PageState::Extract(page, raw) => self.extract(target, page, &raw, &mut run),
                PageState::Advance(page, cursor) => self.advance(page, cursor).await,
                PageState::Done(reason) => {
                    return self.finish(target, Termination::Done(reason), &run);
                }
                PageState::Aborted(reason) => {
                    return self.finish(target, Termination::Aborted(reason), &run);
                }
            };
        }
    }

    fn finish(&self, target: &Target, end: Termination, run: &RunState<'_>) -> PaginationReport {
        tracing::info!(
            product = target.product_id(),
            strategy = %self.strategy.kind(),
            end = ?end,
            collected = run.collection.len(),
            pages = run.pages_fetched,
            retries = run.retries,
            "pagination finished"
        );
        PaginationReport {
            end,
            next_page: run.next_page,
            retries: run.retries,
            pages_fetched: run.pages_fetched,
        }
    }

    async fn fetch(&self, target: &Target, page: PageToken, run: &mut RunState<'_>) -> PageState {
        if let Some(reason) = self.control.stop_reason() {
            return PageState::Aborted(reason);
        }

        let identity = match self.rotator.acquire().await {
            Ok(identity) => identity,
            Err(e) => return PageState::Aborted(AbortReason::IdentityPool(e.to_string())),
        };

        let attempt = self.strategy.fetch(target, &page, &identity).await;
        run.pages_fetched += 1;

        match run.tracker.observe(self.detector.classify(&attempt)) {
            Verdict::Success => {
                if self.rotator.release(identity) {
                    self.sweep_retired().await;
                }
                match into_content(attempt.outcome) {
                    Some(raw) => PageState::Extract(page, raw),
                    None => PageState::Fetch(page),
                }
            }
            Verdict::SoftBlock(reason) => {
                run.retries += 1;
                tracing::warn!(
                    product = target.product_id(),
                    strategy = %self.strategy.kind(),
                    page = page.number,
                    reason = %reason,
                    consecutive = run.tracker.consecutive(),
                    "soft block; rotating identity"
                );
                self.capture(target, &attempt, &reason, run);
                self.retire(identity).await;
                let delay = backoff_delay(self.settings.retry_backoff_base_ms, run.tracker.consecutive());
                pause(self.control.clamp(delay), "soft block back-off").await;
                PageState::Fetch(page)
            }
            Verdict::HardBlock(reason) => {
                tracing::warn!(
                    product = target.product_id(),
                    strategy = %self.strategy.kind(),
                    page = page.number,
                    reason = %reason,
                    "hard block; abandoning strategy"
                );
                self.capture(target, &attempt, &reason, run);
                self.retire(identity).await;
                PageState::Aborted(AbortReason::HardBlock(reason))
            }
        }
    }

    fn extract(
        &self,
        target: &Target,
        page: PageToken,
        raw: &RawContent,
        run: &mut RunState<'_>,
    ) -> PageState {
        let extraction = extract(raw, self.origin);
        let has_more = raw
            .total_pages
            .map(|total| page.number < total)
            .or(extraction.more_pages)
            .or_else(|| raw.next_cursor.as_ref().map(|_| true));

        if extraction.is_empty() {
            if page.number == 1 {
                tracing::warn!(
                    product = target.product_id(),
                    strategy = %self.strategy.kind(),
                    "page 1 yielded no reviews; product may have none or the page structure changed"
                );
                run.diagnostics.capture(
                    self.sink,
                    DiagnosticSnapshot::new(
                        target.product_id(),
                        page.number,
                        self.strategy.kind(),
                        SnapshotKind::EmptyFirstPage,
                        Some(raw.status),
                        "no reviews matched on first page".to_string(),
                        raw.body.clone(),
                    ),
                );
                return PageState::Done(DoneReason::EmptyFirstPage);
            }
            run.next_page = page.number.saturating_add(1);
            if has_more == Some(true) {
                return PageState::Advance(page, raw.next_cursor.clone());
            }
            return PageState::Done(DoneReason::Exhausted);
        }

        let result = PageResult {
            page,
            records: extraction.records,
            has_more: has_more.unwrap_or(true),
        };
        let found = result.records.len();
        let added = run.collection.merge(result.records, target.quota());
        run.next_page = result.page.number.saturating_add(1);
        tracing::debug!(
            product = target.product_id(),
            page = result.page.number,
            found,
            added,
            collected = run.collection.len(),
            "page merged"
        );

        if run.collection.len() >= target.quota() {
            return PageState::Done(DoneReason::QuotaMet);
        }
        if added == 0 || !result.has_more {
            return PageState::Done(DoneReason::Exhausted);
        }
        PageState::Advance(result.page, raw.next_cursor.clone())
    }

    async fn advance(&self, page: PageToken, cursor: Option<String>) -> PageState {
        if page.number >= self.settings.max_pages {
            return PageState::Done(DoneReason::PageLimit);
        }
        pause(
            self.control.clamp(jittered(duration_ms(self.settings.inter_request_delay))),
            "inter-request delay",
        )
        .await;
        PageState::Fetch(page.next(cursor))
    }

    async fn retire(&self, identity: Identity) {
        self.rotator.retire(identity);
        self.sweep_retired().await;
    }

    /// Drops per-session state for every identity retired so far, whichever
    /// run retired it.
    async fn sweep_retired(&self) {
        let kind = self.strategy.kind();
        for session in self.rotator.take_retired() {
            self.strategy.forget(session).await;
            for peer in self.peers.iter().filter(|p| p.kind() != kind) {
                peer.forget(session).await;
            }
        }
    }

    /// Records the rejected attempt: `BLOCKED_PAGE` when a page came back,
    /// `FAILED_PAGE` when nothing did.
    fn capture(
        &self,
        target: &Target,
        attempt: &FetchAttempt,
        reason: &BlockReason,
        run: &mut RunState<'_>,
    ) {
        let (kind, status, body) = attempt.content().map_or(
            (SnapshotKind::Failed, None, String::new()),
            |c| (SnapshotKind::Blocked, Some(c.status), c.body.clone()),
        );
        run.diagnostics.capture(
            self.sink,
            DiagnosticSnapshot::new(
                target.product_id(),
                attempt.page.number,
                attempt.strategy,
                kind,
                status,
                reason.to_string(),
                body,
            ),
        );
    }
}

fn into_content(outcome: FetchOutcome) -> Option<RawContent> {
    match outcome {
        FetchOutcome::Success(content) | FetchOutcome::Blocked { content, .. } => Some(content),
        FetchOutcome::Failed(_) => None,
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[path = "pagination_test.rs"]
mod tests;
