//! Session orchestrator: strategy fallback and run termination for one
//! target, and a bounded worker pool across many targets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use tokio::time::Instant;

use revharvest_core::{CanonicalReview, HarvestConfig, RunSummary, StrategyKind, Target};

use crate::block::BlockDetector;
use crate::diagnostics::{
    DiagnosticSink, DiagnosticSnapshot, Diagnostics, NoopSink, ReviewCollection,
};
use crate::error::ScraperError;
use crate::identity::IdentityRotator;
use crate::pagination::{
    AbortReason, DoneReason, PaginationController, PipelineSettings, Termination,
};
use crate::strategy::{build_strategies, AcquisitionStrategy};

/// Cooperative cancellation and wall-clock deadline for a run.
///
/// Cancellation takes effect before the next fetch; an in-flight fetch is
/// allowed to complete. Clones share the cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl RunControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + deadline),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Same cancellation flag, with the deadline tightened to at most
    /// `budget` from now.
    #[must_use]
    pub fn bounded(&self, budget: Option<Duration>) -> Self {
        let from_budget = budget.map(|b| Instant::now() + b);
        let deadline = match (self.deadline, from_budget) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            deadline,
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Why the run must stop now, if it must.
    #[must_use]
    pub fn stop_reason(&self) -> Option<AbortReason> {
        if self.is_cancelled() {
            return Some(AbortReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(AbortReason::Deadline),
            _ => None,
        }
    }

    /// Time left before the deadline; `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Shortens `delay` so a sleep never overshoots the deadline.
    #[must_use]
    pub fn clamp(&self, delay: Duration) -> Duration {
        self.remaining().map_or(delay, |left| delay.min(left))
    }
}

/// Terminal artifact of one target run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub product: String,
    pub records: Vec<CanonicalReview>,
    pub success: bool,
    /// Human-readable explanation when `success` is false, or a note on an
    /// ambiguous result.
    pub reason: Option<String>,
    pub retries: u32,
    pub strategies_tried: Vec<StrategyKind>,
    pub diagnostics: Vec<DiagnosticSnapshot>,
    pub scraped_at: DateTime<Utc>,
}

impl RunOutcome {
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            company: self.product.clone(),
            total_reviews: self.records.len(),
            success: self.success,
            scraped_at: self.scraped_at,
        }
    }
}

/// State accumulated across strategies for one target.
#[derive(Default)]
struct Progress {
    collection: ReviewCollection,
    diagnostics: Diagnostics,
    retries: u32,
    strategies_tried: Vec<StrategyKind>,
}

impl Progress {
    fn finish(self, target: &Target, success: bool, reason: Option<String>) -> RunOutcome {
        let outcome = RunOutcome {
            product: target.product_id().to_string(),
            records: self.collection.into_records(),
            success,
            reason,
            retries: self.retries,
            strategies_tried: self.strategies_tried,
            diagnostics: self.diagnostics.into_vec(),
            scraped_at: Utc::now(),
        };
        tracing::info!(
            product = %outcome.product,
            total_reviews = outcome.records.len(),
            success = outcome.success,
            retries = outcome.retries,
            diagnostics = outcome.diagnostics.len(),
            reason = outcome.reason.as_deref().unwrap_or(""),
            "harvest finished"
        );
        outcome
    }
}

pub struct SessionOrchestrator {
    strategies: Vec<Arc<dyn AcquisitionStrategy>>,
    rotator: Arc<IdentityRotator>,
    detector: BlockDetector,
    settings: PipelineSettings,
    origin: reqwest::Url,
    sink: Arc<dyn DiagnosticSink>,
}

impl SessionOrchestrator {
    /// Builds strategies and the identity pool from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::InvalidUrl`] if the base URL or a URL template
    /// does not produce a valid URL, or [`ScraperError::Configuration`] if no
    /// configured strategy is usable in this build.
    pub fn from_config(config: &HarvestConfig) -> Result<Self, ScraperError> {
        let strategies = build_strategies(config)?;
        Self::new(
            strategies,
            Arc::new(IdentityRotator::from_config(config)),
            PipelineSettings::from(config),
            &config.base_url,
        )
    }

    /// # Errors
    ///
    /// Returns [`ScraperError::InvalidUrl`] if `base_url` does not parse.
    pub fn new(
        strategies: Vec<Arc<dyn AcquisitionStrategy>>,
        rotator: Arc<IdentityRotator>,
        settings: PipelineSettings,
        base_url: &str,
    ) -> Result<Self, ScraperError> {
        let origin = reqwest::Url::parse(base_url).map_err(|e| ScraperError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            strategies,
            rotator,
            detector: BlockDetector::default(),
            settings,
            origin,
            sink: Arc::new(NoopSink),
        })
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn rotator(&self) -> &Arc<IdentityRotator> {
        &self.rotator
    }

    /// Harvests `target` using the configured strategy order.
    pub async fn run(&self, target: &Target, control: &RunControl) -> RunOutcome {
        self.run_with_order(target, None, control).await
    }

    /// Harvests `target`, optionally restricting and reordering strategies.
    ///
    /// Each strategy runs at most once. When one aborts (hard block) or finds
    /// nothing on page 1, the next takes over: from page 1 if nothing was
    /// collected yet, otherwise from the first page not yet extracted.
    pub async fn run_with_order(
        &self,
        target: &Target,
        order: Option<&[StrategyKind]>,
        control: &RunControl,
    ) -> RunOutcome {
        let control = control.bounded(self.settings.run_deadline);
        let mut progress = Progress::default();
        let mut failures: Vec<String> = Vec::new();
        let mut next_page = 1;

        if target.quota() == 0 {
            return progress.finish(target, true, None);
        }

        for strategy in self.ordered(order) {
            let kind = strategy.kind();
            progress.strategies_tried.push(kind);
            let start_page = if progress.collection.is_empty() { 1 } else { next_page };
            tracing::info!(
                product = target.product_id(),
                strategy = %kind,
                start_page,
                "starting strategy"
            );

            let controller = PaginationController {
                strategy: strategy.as_ref(),
                peers: &self.strategies,
                rotator: &self.rotator,
                detector: &self.detector,
                settings: &self.settings,
                control: &control,
                origin: &self.origin,
                sink: self.sink.as_ref(),
            };
            let report = controller
                .run(
                    target,
                    start_page,
                    &mut progress.collection,
                    &mut progress.diagnostics,
                )
                .await;
            progress.retries += report.retries;
            next_page = report.next_page;

            match report.end {
                Termination::Done(DoneReason::EmptyFirstPage) => {
                    failures.push(format!(
                        "{kind}: no reviews on page 1 (product has none, or page structure changed)"
                    ));
                }
                Termination::Done(_) => return progress.finish(target, true, None),
                Termination::Aborted(reason @ (AbortReason::Deadline | AbortReason::Cancelled)) => {
                    return progress.finish(target, false, Some(reason.to_string()));
                }
                Termination::Aborted(reason) => failures.push(format!("{kind}: {reason}")),
            }
        }

        let reason = if failures.is_empty() {
            "no strategies configured".to_string()
        } else {
            format!("all strategies exhausted: {}", failures.join("; "))
        };
        progress.finish(target, false, Some(reason))
    }

    fn ordered(&self, order: Option<&[StrategyKind]>) -> Vec<Arc<dyn AcquisitionStrategy>> {
        match order {
            None => self.strategies.clone(),
            Some(order) => {
                let mut picked: Vec<Arc<dyn AcquisitionStrategy>> = Vec::new();
                for kind in order {
                    let already = picked.iter().any(|s| s.kind() == *kind);
                    if already {
                        continue;
                    }
                    if let Some(strategy) = self.strategies.iter().find(|s| s.kind() == *kind) {
                        picked.push(Arc::clone(strategy));
                    } else {
                        tracing::warn!(strategy = %kind, "requested strategy is not configured");
                    }
                }
                picked
            }
        }
    }

    /// Closes every session the strategies still hold (HTTP clients, browser
    /// processes). Strategies rebuild them lazily if used again.
    pub async fn shutdown(&self) {
        for session in self.rotator.take_retired() {
            for strategy in &self.strategies {
                strategy.forget(session).await;
            }
        }
        for strategy in &self.strategies {
            strategy.shutdown().await;
        }
        tracing::debug!(strategies = self.strategies.len(), "strategy sessions closed");
    }

    /// Harvests several targets with at most `max_concurrent_targets` runs in
    /// flight. Targets share only the identity pool. Outcomes are returned in
    /// completion order.
    pub async fn harvest_many(&self, targets: &[Target], control: &RunControl) -> Vec<RunOutcome> {
        let concurrency = self.settings.max_concurrent_targets.max(1);
        stream::iter(targets)
            .map(|target| self.run(target, control))
            .buffer_unordered(concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
