//! Diagnostic snapshots of blocked, empty, or failed pages, and the
//! within-run review collection.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use revharvest_core::{CanonicalReview, StrategyKind};

/// Why a page body was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Blocked,
    EmptyFirstPage,
    Failed,
}

impl SnapshotKind {
    #[must_use]
    pub fn key_prefix(self) -> &'static str {
        match self {
            SnapshotKind::Blocked => "BLOCKED_PAGE",
            SnapshotKind::EmptyFirstPage => "EMPTY_PAGE",
            SnapshotKind::Failed => "FAILED_PAGE",
        }
    }
}

/// Raw response body captured for offline inspection.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticSnapshot {
    pub product: String,
    pub page: u32,
    pub strategy: StrategyKind,
    pub kind: SnapshotKind,
    /// HTTP status, when a response was received at all.
    pub status: Option<u16>,
    pub reason: String,
    pub body: String,
    /// Hex SHA-256 of `body`.
    pub digest: String,
    pub captured_at: DateTime<Utc>,
}

impl DiagnosticSnapshot {
    #[must_use]
    pub fn new(
        product: &str,
        page: u32,
        strategy: StrategyKind,
        kind: SnapshotKind,
        status: Option<u16>,
        reason: String,
        body: String,
    ) -> Self {
        let digest = format!("{:x}", Sha256::digest(body.as_bytes()));
        Self {
            product: product.to_string(),
            page,
            strategy,
            kind,
            status,
            reason,
            body,
            digest,
            captured_at: Utc::now(),
        }
    }

    /// Storage key, e.g. `BLOCKED_PAGE_acme-crm_p3_static`.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}_{}_p{}_{}",
            self.kind.key_prefix(),
            self.product,
            self.page,
            self.strategy.label()
        )
    }
}

/// Fire-and-forget destination for snapshots. Implementations must not fail
/// the run; they log and move on.
pub trait DiagnosticSink: Send + Sync {
    fn persist(&self, key: &str, snapshot: &DiagnosticSnapshot);
}

/// Discards snapshots. They are still kept on the run outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn persist(&self, _key: &str, _snapshot: &DiagnosticSnapshot) {}
}

/// Snapshots captured during one run, one per (strategy, page); a later
/// capture of the same page replaces the earlier one.
#[derive(Default)]
pub struct Diagnostics {
    snapshots: BTreeMap<(StrategyKind, u32), DiagnosticSnapshot>,
}

impl Diagnostics {
    pub fn capture(&mut self, sink: &dyn DiagnosticSink, snapshot: DiagnosticSnapshot) {
        let key = snapshot.key();
        tracing::info!(
            key,
            kind = ?snapshot.kind,
            status = snapshot.status,
            bytes = snapshot.body.len(),
            "captured diagnostic snapshot"
        );
        sink.persist(&key, &snapshot);
        self.snapshots
            .insert((snapshot.strategy, snapshot.page), snapshot);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Snapshots ordered by strategy then page.
    #[must_use]
    pub fn into_vec(self) -> Vec<DiagnosticSnapshot> {
        self.snapshots.into_values().collect()
    }
}

/// Records collected across pages and strategies for one target, in the
/// order they were first seen.
#[derive(Debug, Default)]
pub struct ReviewCollection {
    records: Vec<CanonicalReview>,
    seen: HashSet<String>,
}

impl ReviewCollection {
    /// Appends records until `quota` is reached, skipping any already seen
    /// in this run. Returns how many were added.
    pub fn merge(&mut self, records: Vec<CanonicalReview>, quota: usize) -> usize {
        let before = self.records.len();
        for record in records {
            if self.records.len() >= quota {
                break;
            }
            if let Some(key) = record.dedup_key() {
                if !self.seen.insert(key) {
                    continue;
                }
            }
            self.records.push(record);
        }
        self.records.len() - before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn into_records(self) -> Vec<CanonicalReview> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use revharvest_core::Reviewer;

    use super::*;

    fn review(id: Option<i64>, title: &str) -> CanonicalReview {
        CanonicalReview {
            review_id: id,
            review_title: Some(title.to_string()),
            review_content: None,
            review_question_answers: vec![],
            review_rating: None,
            reviewer: Reviewer::default(),
            publish_date: None,
            reviewer_company_size: None,
            video_link: None,
            review_link: None,
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<String>>);

    impl DiagnosticSink for RecordingSink {
        fn persist(&self, key: &str, _snapshot: &DiagnosticSnapshot) {
            self.0.lock().unwrap().push(key.to_string());
        }
    }

    #[test]
    fn snapshot_key_and_digest() {
        let snap = DiagnosticSnapshot::new(
            "acme-crm",
            1,
            StrategyKind::StaticHttp,
            SnapshotKind::EmptyFirstPage,
            Some(200),
            "no reviews".to_string(),
            "abc".to_string(),
        );
        assert_eq!(snap.key(), "EMPTY_PAGE_acme-crm_p1_static");
        assert_eq!(
            snap.digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn later_capture_of_same_page_replaces_earlier() {
        let sink = RecordingSink::default();
        let mut diagnostics = Diagnostics::default();
        for body in ["first", "second"] {
            diagnostics.capture(
                &sink,
                DiagnosticSnapshot::new(
                    "acme-crm",
                    2,
                    StrategyKind::JsonEndpoint,
                    SnapshotKind::Blocked,
                    Some(403),
                    "HTTP 403".to_string(),
                    body.to_string(),
                ),
            );
        }
        assert_eq!(sink.0.lock().unwrap().len(), 2, "sink sees every capture");
        let snaps = diagnostics.into_vec();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].body, "second");
    }

    #[test]
    fn merge_respects_quota_and_dedupes() {
        let mut collection = ReviewCollection::default();
        let added = collection.merge(vec![review(Some(1), "a"), review(Some(2), "b")], 3);
        assert_eq!(added, 2);

        let added = collection.merge(
            vec![review(Some(2), "b again"), review(None, "c"), review(Some(4), "d")],
            3,
        );
        assert_eq!(added, 1);
        assert_eq!(collection.len(), 3);
        let titles: Vec<_> = collection
            .into_records()
            .into_iter()
            .filter_map(|r| r.review_title)
            .collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
    }

    #[test]
    fn merge_with_zero_quota_adds_nothing() {
        let mut collection = ReviewCollection::default();
        assert_eq!(collection.merge(vec![review(Some(1), "a")], 0), 0);
        assert!(collection.is_empty());
    }
}
