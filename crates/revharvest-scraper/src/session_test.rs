use std::sync::atomic::Ordering;
use std::sync::Mutex;

use revharvest_core::ProxyPoolConfig;
use uuid::Uuid;

use super::*;
use crate::diagnostics::SnapshotKind;
use crate::strategy::FetchOutcome;
use crate::test_support::{blocked, empty_page, fast_settings, review_page, ScriptedStrategy};

fn scripted(kind: StrategyKind, script: Vec<FetchOutcome>) -> Arc<ScriptedStrategy> {
    Arc::new(ScriptedStrategy::new(kind, script))
}

fn always(kind: StrategyKind, outcome: FetchOutcome) -> Arc<ScriptedStrategy> {
    Arc::new(ScriptedStrategy::new(kind, vec![]).with_fallback(outcome))
}

fn orchestrator(
    strategies: &[Arc<ScriptedStrategy>],
    settings: PipelineSettings,
) -> SessionOrchestrator {
    let strategies = strategies
        .iter()
        .map(|s| Arc::clone(s) as Arc<dyn AcquisitionStrategy>)
        .collect();
    let rotator = Arc::new(IdentityRotator::new(1, &ProxyPoolConfig::default(), 0));
    SessionOrchestrator::new(strategies, rotator, settings, "https://www.g2.com").unwrap()
}

fn target(quota: usize) -> Target {
    Target::new("acme-crm", quota).unwrap()
}

// -----------------------------------------------------------------------
// fallback
// -----------------------------------------------------------------------

#[tokio::test]
async fn first_strategy_success_skips_the_rest() {
    let static_http = scripted(
        StrategyKind::StaticHttp,
        vec![review_page(1..6, Some(false))],
    );
    let json = always(StrategyKind::JsonEndpoint, review_page(1..2, None));
    let orch = orchestrator(&[static_http.clone(), json.clone()], fast_settings());

    let outcome = orch.run(&target(5), &RunControl::new()).await;

    assert!(outcome.success);
    assert!(outcome.reason.is_none());
    assert_eq!(outcome.records.len(), 5);
    assert_eq!(outcome.retries, 0);
    assert!(outcome.diagnostics.is_empty());
    assert_eq!(outcome.strategies_tried, vec![StrategyKind::StaticHttp]);
    assert_eq!(json.call_count(), 0);
}

#[tokio::test]
async fn hard_block_falls_back_in_order_and_never_retries_blocked_strategy() {
    let static_http = always(StrategyKind::StaticHttp, blocked(403));
    let json = scripted(
        StrategyKind::JsonEndpoint,
        vec![review_page(1..4, Some(false))],
    );
    let browser = always(StrategyKind::RenderedBrowser, review_page(1..2, None));
    let orch = orchestrator(
        &[static_http.clone(), json.clone(), browser.clone()],
        fast_settings(),
    );

    let outcome = orch.run(&target(20), &RunControl::new()).await;

    assert!(outcome.success);
    assert_eq!(outcome.records.len(), 3);
    assert_eq!(
        outcome.strategies_tried,
        vec![StrategyKind::StaticHttp, StrategyKind::JsonEndpoint]
    );
    // max_soft_blocks = 2, so the third consecutive block escalates.
    assert_eq!(static_http.call_count(), 3);
    assert_eq!(json.call_count(), 1);
    assert_eq!(browser.call_count(), 0);
    assert_eq!(outcome.retries, 2);
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(outcome.diagnostics[0].key(), "BLOCKED_PAGE_acme-crm_p1_static");
}

#[tokio::test]
async fn every_strategy_hard_blocked_fails_with_one_snapshot_each() {
    let strategies = [
        always(StrategyKind::StaticHttp, blocked(403)),
        always(StrategyKind::JsonEndpoint, blocked(429)),
        always(StrategyKind::RenderedBrowser, blocked(503)),
    ];
    let orch = orchestrator(&strategies, fast_settings());

    let outcome = orch.run(&target(20), &RunControl::new()).await;

    assert!(!outcome.success);
    assert!(outcome.records.is_empty());
    let reason = outcome.reason.as_deref().unwrap();
    assert!(reason.starts_with("all strategies exhausted"), "{reason}");
    assert!(reason.contains("HTTP 429"), "{reason}");
    assert_eq!(outcome.diagnostics.len(), 3);
    assert!(outcome
        .diagnostics
        .iter()
        .all(|d| d.kind == SnapshotKind::Blocked && d.status.is_some()));
    for strategy in &strategies {
        assert_eq!(strategy.call_count(), 3, "{:?}", strategy.kind());
    }
}

#[tokio::test]
async fn empty_first_page_is_captured_and_next_strategy_tried() {
    let static_http = scripted(StrategyKind::StaticHttp, vec![empty_page()]);
    let json = scripted(
        StrategyKind::JsonEndpoint,
        vec![review_page(1..3, Some(false))],
    );
    let orch = orchestrator(&[static_http.clone(), json.clone()], fast_settings());

    let outcome = orch.run(&target(20), &RunControl::new()).await;

    assert!(outcome.success);
    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(outcome.diagnostics[0].key(), "EMPTY_PAGE_acme-crm_p1_static");
}

#[tokio::test]
async fn empty_everywhere_is_reported_as_ambiguous_failure() {
    let strategies = [
        always(StrategyKind::StaticHttp, empty_page()),
        always(StrategyKind::JsonEndpoint, empty_page()),
    ];
    let orch = orchestrator(&strategies, fast_settings());

    let outcome = orch.run(&target(20), &RunControl::new()).await;

    assert!(!outcome.success);
    let reason = outcome.reason.as_deref().unwrap();
    assert!(reason.contains("no reviews on page 1"), "{reason}");
    assert_eq!(outcome.diagnostics.len(), 2);
    assert!(outcome
        .diagnostics
        .iter()
        .all(|d| d.kind == SnapshotKind::EmptyFirstPage));
}

#[tokio::test]
async fn fallback_resumes_from_first_unfinished_page() {
    let static_http = Arc::new(
        ScriptedStrategy::new(
            StrategyKind::StaticHttp,
            vec![review_page(1..3, Some(true))],
        )
        .with_fallback(blocked(403)),
    );
    let json = scripted(
        StrategyKind::JsonEndpoint,
        vec![review_page(3..5, Some(false))],
    );
    let orch = orchestrator(&[static_http.clone(), json.clone()], fast_settings());

    let outcome = orch.run(&target(20), &RunControl::new()).await;

    assert!(outcome.success);
    assert_eq!(static_http.pages(), vec![1, 2, 2, 2]);
    assert_eq!(json.pages(), vec![2]);
    let ids: Vec<_> = outcome.records.iter().filter_map(|r| r.review_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn identity_retired_by_one_strategy_is_forgotten_by_all() {
    // Pool of one: the static run uses the only identity, then the json run
    // burns it on its first blocked attempt.
    let static_http = scripted(StrategyKind::StaticHttp, vec![empty_page()]);
    let json = always(StrategyKind::JsonEndpoint, blocked(429));
    let orch = orchestrator(&[static_http.clone(), json.clone()], fast_settings());

    let outcome = orch.run(&target(5), &RunControl::new()).await;
    assert!(!outcome.success);

    let shared = static_http.calls.lock().unwrap()[0].1;
    assert_eq!(json.calls.lock().unwrap()[0].1, shared);

    let retired: Vec<Uuid> = json.calls.lock().unwrap().iter().map(|c| c.1).collect();
    assert_eq!(retired.len(), 3);
    assert_eq!(*json.forgotten.lock().unwrap(), retired);
    assert_eq!(*static_http.forgotten.lock().unwrap(), retired);
    assert!(orch.rotator().take_retired().is_empty());
}

#[tokio::test]
async fn shutdown_closes_every_strategy() {
    let static_http = scripted(StrategyKind::StaticHttp, vec![]);
    let json = scripted(StrategyKind::JsonEndpoint, vec![]);
    let orch = orchestrator(&[static_http.clone(), json.clone()], fast_settings());

    let held = orch.rotator().acquire().await.unwrap();
    let session = held.session();
    orch.rotator().retire(held);
    orch.shutdown().await;

    for strategy in [&static_http, &json] {
        assert_eq!(strategy.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(*strategy.forgotten.lock().unwrap(), vec![session]);
    }
}

#[tokio::test]
async fn soft_block_then_success_counts_one_retry() {
    let static_http = scripted(
        StrategyKind::StaticHttp,
        vec![blocked(403), review_page(1..4, Some(false))],
    );
    let orch = orchestrator(&[static_http], fast_settings());

    let outcome = orch.run(&target(20), &RunControl::new()).await;

    assert!(outcome.success);
    assert_eq!(outcome.retries, 1);
    assert_eq!(outcome.records.len(), 3);
    assert_eq!(outcome.diagnostics[0].kind, SnapshotKind::Blocked);
}

#[tokio::test]
async fn explicit_order_restricts_and_reorders() {
    let static_http = always(StrategyKind::StaticHttp, review_page(1..2, Some(false)));
    let json = always(StrategyKind::JsonEndpoint, review_page(1..2, Some(false)));
    let orch = orchestrator(&[static_http.clone(), json.clone()], fast_settings());

    let order = [
        StrategyKind::JsonEndpoint,
        StrategyKind::JsonEndpoint,
        StrategyKind::RenderedBrowser,
    ];
    let outcome = orch
        .run_with_order(&target(20), Some(&order), &RunControl::new())
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.strategies_tried, vec![StrategyKind::JsonEndpoint]);
    assert_eq!(static_http.call_count(), 0);
}

#[tokio::test]
async fn no_configured_strategy_fails() {
    let orch = orchestrator(&[], fast_settings());
    let outcome = orch.run(&target(20), &RunControl::new()).await;
    assert!(!outcome.success);
    assert_eq!(outcome.reason.as_deref(), Some("no strategies configured"));
}

// -----------------------------------------------------------------------
// termination
// -----------------------------------------------------------------------

#[tokio::test]
async fn zero_quota_succeeds_without_fetching() {
    let static_http = always(StrategyKind::StaticHttp, review_page(1..2, None));
    let orch = orchestrator(&[static_http.clone()], fast_settings());

    let outcome = orch.run(&target(0), &RunControl::new()).await;

    assert!(outcome.success);
    assert!(outcome.records.is_empty());
    assert!(outcome.strategies_tried.is_empty());
    assert_eq!(static_http.call_count(), 0);
}

#[tokio::test]
async fn cancellation_stops_without_fallback() {
    let static_http = always(StrategyKind::StaticHttp, review_page(1..2, None));
    let json = always(StrategyKind::JsonEndpoint, review_page(1..2, None));
    let orch = orchestrator(&[static_http.clone(), json.clone()], fast_settings());
    let control = RunControl::new();
    control.cancel();

    let outcome = orch.run(&target(20), &control).await;

    assert!(!outcome.success);
    assert_eq!(outcome.reason.as_deref(), Some("run cancelled"));
    assert_eq!(outcome.strategies_tried, vec![StrategyKind::StaticHttp]);
    assert_eq!(json.call_count(), 0);
}

#[tokio::test]
async fn per_target_deadline_ends_run() {
    let static_http = always(StrategyKind::StaticHttp, review_page(1..2, None));
    let settings = PipelineSettings {
        run_deadline: Some(Duration::ZERO),
        ..fast_settings()
    };
    let orch = orchestrator(&[static_http.clone()], settings);

    let outcome = orch.run(&target(20), &RunControl::new()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.reason.as_deref(), Some("run deadline exceeded"));
    assert_eq!(static_http.call_count(), 0);
}

#[tokio::test]
async fn outcome_summary_reflects_run() {
    let static_http = scripted(
        StrategyKind::StaticHttp,
        vec![review_page(1..3, Some(false))],
    );
    let orch = orchestrator(&[static_http], fast_settings());
    let outcome = orch.run(&target(20), &RunControl::new()).await;

    let summary = outcome.summary();
    assert_eq!(summary.company, "acme-crm");
    assert_eq!(summary.total_reviews, 2);
    assert!(summary.success);
    assert_eq!(summary.scraped_at, outcome.scraped_at);
}

#[tokio::test]
async fn sink_receives_every_capture() {
    #[derive(Default)]
    struct Keys(Mutex<Vec<String>>);
    impl DiagnosticSink for Keys {
        fn persist(&self, key: &str, _snapshot: &DiagnosticSnapshot) {
            self.0.lock().unwrap().push(key.to_string());
        }
    }

    let sink = Arc::new(Keys::default());
    let static_http = scripted(
        StrategyKind::StaticHttp,
        vec![blocked(403), review_page(1..2, Some(false))],
    );
    let orch = orchestrator(&[static_http], fast_settings())
        .with_sink(Arc::clone(&sink) as Arc<dyn DiagnosticSink>);
    orch.run(&target(20), &RunControl::new()).await;

    assert_eq!(
        *sink.0.lock().unwrap(),
        vec!["BLOCKED_PAGE_acme-crm_p1_static".to_string()]
    );
}

// -----------------------------------------------------------------------
// many targets
// -----------------------------------------------------------------------

#[tokio::test]
async fn harvest_many_shares_single_identity_pool() {
    let static_http = always(StrategyKind::StaticHttp, review_page(1..3, Some(false)));
    let orch = orchestrator(&[static_http.clone()], fast_settings());
    let targets: Vec<Target> = ["acme-crm", "globex-hr", "initech-erp"]
        .iter()
        .map(|p| Target::new(p, 10).unwrap())
        .collect();

    let outcomes = orch.harvest_many(&targets, &RunControl::new()).await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.success && o.records.len() == 2));
    let mut products: Vec<_> = outcomes.iter().map(|o| o.product.as_str()).collect();
    products.sort_unstable();
    assert_eq!(products, vec!["acme-crm", "globex-hr", "initech-erp"]);
    assert_eq!(static_http.call_count(), 3);
    assert_eq!(orch.rotator().provisioned_count(), 1);
}

// -----------------------------------------------------------------------
// run control
// -----------------------------------------------------------------------

#[tokio::test]
async fn bounded_control_keeps_tighter_deadline_and_shared_flag() {
    let outer = RunControl::with_deadline(Duration::from_secs(1));
    let inner = outer.bounded(Some(Duration::from_secs(3600)));
    assert!(inner.remaining().unwrap() <= Duration::from_secs(1));

    outer.cancel();
    assert!(inner.is_cancelled());
    assert_eq!(inner.stop_reason(), Some(AbortReason::Cancelled));
}

#[tokio::test]
async fn clamp_never_exceeds_remaining_time() {
    let control = RunControl::with_deadline(Duration::from_millis(50));
    assert!(control.clamp(Duration::from_secs(30)) <= Duration::from_millis(50));
    assert_eq!(
        RunControl::new().clamp(Duration::from_secs(30)),
        Duration::from_secs(30)
    );
}
