//! Harvest command handlers.
//!
//! Failed targets are logged and written out like successful ones, so their
//! partial records and diagnostics survive; the command only errors when
//! every target failed.

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use revharvest_core::{CanonicalReview, HarvestConfig, RunSummary, StrategyKind, Target};
use revharvest_scraper::{DiagnosticSink, RunControl, RunOutcome, SessionOrchestrator};

use crate::sink::FileSink;

/// JSON document written per target.
#[derive(Debug, Serialize)]
pub(crate) struct HarvestReport<'a> {
    #[serde(flatten)]
    pub summary: RunSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'a str>,
    pub retries: u32,
    pub strategies_tried: &'a [StrategyKind],
    /// Keys of captured diagnostic snapshots.
    pub diagnostics: Vec<String>,
    pub reviews: &'a [CanonicalReview],
}

impl<'a> From<&'a RunOutcome> for HarvestReport<'a> {
    fn from(outcome: &'a RunOutcome) -> Self {
        Self {
            summary: outcome.summary(),
            reason: outcome.reason.as_deref(),
            retries: outcome.retries,
            strategies_tried: &outcome.strategies_tried,
            diagnostics: outcome.diagnostics.iter().map(|d| d.key()).collect(),
            reviews: &outcome.records,
        }
    }
}

/// Orchestrator plus the sink it writes diagnostics through.
struct Pipeline {
    orchestrator: SessionOrchestrator,
    sink: Arc<FileSink>,
}

impl Pipeline {
    fn build(config: &HarvestConfig) -> anyhow::Result<Self> {
        let sink = Arc::new(FileSink::new(&config.diagnostics_dir)?);
        let orchestrator = SessionOrchestrator::from_config(config)
            .map_err(|e| anyhow::anyhow!("failed to build harvest pipeline: {e}"))?
            .with_sink(Arc::clone(&sink) as Arc<dyn DiagnosticSink>);
        Ok(Self { orchestrator, sink })
    }

    /// Waits for diagnostic writes and closes strategy sessions.
    async fn close(&self) {
        self.sink.flush().await;
        self.orchestrator.shutdown().await;
    }
}

fn log_outcome(outcome: &RunOutcome) {
    if outcome.success {
        tracing::info!(
            product = %outcome.product,
            total_reviews = outcome.records.len(),
            retries = outcome.retries,
            "harvest succeeded"
        );
    } else {
        tracing::error!(
            product = %outcome.product,
            total_reviews = outcome.records.len(),
            reason = outcome.reason.as_deref().unwrap_or("unknown"),
            diagnostics = outcome.diagnostics.len(),
            "harvest failed"
        );
    }
}

fn write_report(outcome: &RunOutcome, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(&HarvestReport::from(outcome))?;
    std::fs::write(path, json)
        .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", path.display()))
}

/// Harvests one product and prints or writes its report.
///
/// # Errors
///
/// Returns an error if the target is invalid, the pipeline cannot be built,
/// output cannot be written, or the run did not succeed.
pub(crate) async fn run_single(
    config: &HarvestConfig,
    product: &str,
    quota: usize,
    strategies: Option<&[StrategyKind]>,
    output: Option<&Path>,
    control: &RunControl,
) -> anyhow::Result<()> {
    let target = Target::new(product, quota)?;
    let pipeline = Pipeline::build(config)?;

    let outcome = pipeline
        .orchestrator
        .run_with_order(&target, strategies, control)
        .await;
    pipeline.close().await;
    log_outcome(&outcome);

    match output {
        Some(path) => write_report(&outcome, path)?,
        None => {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &HarvestReport::from(&outcome))?;
            writeln!(stdout)?;
        }
    }

    if !outcome.success {
        anyhow::bail!(
            "harvest of '{}' failed: {}",
            outcome.product,
            outcome.reason.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

/// Harvests every target in `targets_path`, writing `<product>.json` reports
/// into `output_dir`.
///
/// # Errors
///
/// Returns an error if the targets file is invalid, the output directory
/// cannot be created, or every target failed.
pub(crate) async fn run_batch(
    config: &HarvestConfig,
    targets_path: &Path,
    output_dir: &Path,
    control: &RunControl,
) -> anyhow::Result<()> {
    let targets = revharvest_core::load_targets(targets_path)?.into_targets()?;
    std::fs::create_dir_all(output_dir)
        .map_err(|e| anyhow::anyhow!("failed to create {}: {e}", output_dir.display()))?;
    let pipeline = Pipeline::build(config)?;

    tracing::info!(
        targets = targets.len(),
        concurrency = config.max_concurrent_targets,
        "starting batch"
    );
    let outcomes = pipeline.orchestrator.harvest_many(&targets, control).await;
    pipeline.close().await;

    let mut failed = 0usize;
    for outcome in &outcomes {
        log_outcome(outcome);
        if !outcome.success {
            failed += 1;
        }
        let path = output_dir.join(format!("{}.json", outcome.product));
        if let Err(e) = write_report(outcome, &path) {
            tracing::error!(product = %outcome.product, error = %e, "failed to write report");
            failed += usize::from(outcome.success);
        }
    }

    if failed > 0 {
        tracing::warn!(
            failed_targets = failed,
            total_targets = outcomes.len(),
            "some targets failed"
        );
    }
    if failed == outcomes.len() {
        anyhow::bail!("all {failed} targets failed");
    }
    Ok(())
}
