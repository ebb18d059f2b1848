use clap::Parser;

use revharvest_core::{CanonicalReview, Reviewer};
use revharvest_scraper::{DiagnosticSink, DiagnosticSnapshot, RunOutcome, SnapshotKind};

use super::*;
use crate::harvest::HarvestReport;
use crate::sink::FileSink;

fn sample_outcome() -> RunOutcome {
    let review = CanonicalReview {
        review_id: Some(7),
        review_title: Some("Great CRM".to_string()),
        review_content: None,
        review_question_answers: vec![],
        review_rating: Some(4.5),
        reviewer: Reviewer::default(),
        publish_date: Some("2024-03-07".to_string()),
        reviewer_company_size: None,
        video_link: None,
        review_link: None,
    };
    let snapshot = DiagnosticSnapshot::new(
        "acme-crm",
        1,
        StrategyKind::StaticHttp,
        SnapshotKind::Blocked,
        Some(403),
        "HTTP 403".to_string(),
        "<html>unusual traffic</html>".to_string(),
    );
    RunOutcome {
        product: "acme-crm".to_string(),
        records: vec![review],
        success: true,
        reason: None,
        retries: 1,
        strategies_tried: vec![StrategyKind::StaticHttp],
        diagnostics: vec![snapshot],
        scraped_at: "2024-05-01T12:00:00Z".parse().unwrap(),
    }
}

// ---------------------------------------------------------------------------
// argument parsing
// ---------------------------------------------------------------------------

#[test]
fn harvest_defaults_quota_and_strategies() {
    let cli = Cli::try_parse_from(["revharvest", "harvest", "--product", "acme-crm"]).unwrap();
    match cli.command {
        Commands::Harvest {
            product,
            quota,
            strategies,
            output,
        } => {
            assert_eq!(product, "acme-crm");
            assert_eq!(quota, DEFAULT_QUOTA);
            assert!(strategies.is_none());
            assert!(output.is_none());
        }
        Commands::Batch { .. } => panic!("expected harvest"),
    }
}

#[test]
fn harvest_parses_strategy_order() {
    let cli = Cli::try_parse_from([
        "revharvest",
        "harvest",
        "--product",
        "acme-crm",
        "--quota",
        "5",
        "--strategies",
        "json,browser,json",
    ])
    .unwrap();
    assert!(matches!(
        cli.command,
        Commands::Harvest {
            quota: 5,
            strategies: Some(StrategyOrder(ref order)),
            ..
        } if order == &[StrategyKind::JsonEndpoint, StrategyKind::RenderedBrowser]
    ));
}

#[test]
fn harvest_rejects_unknown_strategy() {
    let err = Cli::try_parse_from([
        "revharvest",
        "harvest",
        "--product",
        "acme-crm",
        "--strategies",
        "carrier-pigeon",
    ])
    .unwrap_err();
    assert!(err.to_string().contains("unknown strategy"));
}

#[test]
fn help_is_served_before_any_configuration_is_read() {
    let err = Cli::try_parse_from(["revharvest", "--help"]).unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
}

#[test]
fn harvest_requires_product() {
    assert!(Cli::try_parse_from(["revharvest", "harvest"]).is_err());
}

#[test]
fn batch_parses_paths() {
    let cli = Cli::try_parse_from([
        "revharvest",
        "batch",
        "--targets",
        "targets.yaml",
        "--output-dir",
        "out",
    ])
    .unwrap();
    assert!(matches!(
        cli.command,
        Commands::Batch { ref targets, ref output_dir }
            if targets == &PathBuf::from("targets.yaml") && output_dir == &PathBuf::from("out")
    ));
}

// ---------------------------------------------------------------------------
// output
// ---------------------------------------------------------------------------

#[test]
fn report_flattens_summary_and_lists_diagnostic_keys() {
    let outcome = sample_outcome();
    let json = serde_json::to_value(HarvestReport::from(&outcome)).unwrap();

    assert_eq!(json["company"], "acme-crm");
    assert_eq!(json["total_reviews"], 1);
    assert_eq!(json["success"], true);
    assert_eq!(json["scraped_at"], "2024-05-01T12:00:00Z");
    assert!(json.get("reason").is_none());
    assert_eq!(json["retries"], 1);
    assert_eq!(json["strategies_tried"][0], "static_http");
    assert_eq!(json["diagnostics"][0], "BLOCKED_PAGE_acme-crm_p1_static");
    assert_eq!(json["reviews"][0]["review_id"], 7);
    assert_eq!(json["reviews"][0]["review_rating"], 4.5);
}

#[test]
fn file_sink_writes_body_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FileSink::new(&dir.path().join("diag")).unwrap();
    let outcome = sample_outcome();
    let snapshot = &outcome.diagnostics[0];

    sink.persist(&snapshot.key(), snapshot);

    let base = dir.path().join("diag");
    let body = std::fs::read_to_string(base.join("BLOCKED_PAGE_acme-crm_p1_static.html")).unwrap();
    assert_eq!(body, "<html>unusual traffic</html>");

    let meta: serde_json::Value = serde_json::from_slice(
        &std::fs::read(base.join("BLOCKED_PAGE_acme-crm_p1_static.meta.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(meta["status"], 403);
    assert_eq!(meta["kind"], "blocked");
    assert_eq!(meta["digest"], snapshot.digest.as_str());
    assert_eq!(meta["bytes"], body.len());
}

#[tokio::test]
async fn file_sink_writes_off_the_runtime_and_flushes() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FileSink::new(dir.path()).unwrap();
    let outcome = sample_outcome();
    let snapshot = &outcome.diagnostics[0];

    sink.persist(&snapshot.key(), snapshot);
    sink.flush().await;

    let body = std::fs::read_to_string(dir.path().join("BLOCKED_PAGE_acme-crm_p1_static.html"))
        .unwrap();
    assert_eq!(body, "<html>unusual traffic</html>");
    assert!(dir
        .path()
        .join("BLOCKED_PAGE_acme-crm_p1_static.meta.json")
        .exists());
}

#[test]
fn file_sink_swallows_write_errors() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FileSink::new(dir.path()).unwrap();
    let outcome = sample_outcome();
    // A key with a missing parent directory cannot be written.
    sink.persist("missing/BLOCKED_PAGE_x", &outcome.diagnostics[0]);
}
