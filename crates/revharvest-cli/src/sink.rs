//! Diagnostic snapshots written to disk.
//!
//! Each snapshot becomes two files under the diagnostics directory: the raw
//! body as `<key>.<ext>` and its metadata as `<key>.meta.json`. Inside a tokio
//! runtime the writes run on the blocking pool; call [`FileSink::flush`]
//! before exiting so none are lost.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::task::JoinSet;

use revharvest_core::StrategyKind;
use revharvest_scraper::{DiagnosticSink, DiagnosticSnapshot, SnapshotKind};

pub(crate) struct FileSink {
    dir: Arc<PathBuf>,
    pending: Mutex<JoinSet<()>>,
}

#[derive(Serialize)]
struct SnapshotMeta<'a> {
    product: &'a str,
    page: u32,
    strategy: StrategyKind,
    kind: SnapshotKind,
    status: Option<u16>,
    reason: &'a str,
    digest: &'a str,
    bytes: usize,
    captured_at: String,
}

fn write_snapshot(dir: &Path, key: &str, snapshot: &DiagnosticSnapshot) -> std::io::Result<()> {
    let ext = match snapshot.strategy {
        StrategyKind::JsonEndpoint => "json",
        StrategyKind::StaticHttp | StrategyKind::RenderedBrowser => "html",
    };
    std::fs::write(dir.join(format!("{key}.{ext}")), &snapshot.body)?;

    let meta = SnapshotMeta {
        product: &snapshot.product,
        page: snapshot.page,
        strategy: snapshot.strategy,
        kind: snapshot.kind,
        status: snapshot.status,
        reason: &snapshot.reason,
        digest: &snapshot.digest,
        bytes: snapshot.body.len(),
        captured_at: snapshot.captured_at.to_rfc3339(),
    };
    let json = serde_json::to_vec_pretty(&meta).map_err(std::io::Error::other)?;
    std::fs::write(dir.join(format!("{key}.meta.json")), json)
}

fn write_logged(dir: &Path, key: &str, snapshot: &DiagnosticSnapshot) {
    if let Err(e) = write_snapshot(dir, key, snapshot) {
        tracing::warn!(key, error = %e, dir = %dir.display(), "failed to write diagnostic snapshot");
    }
}

impl FileSink {
    /// Creates the directory if needed.
    pub(crate) fn new(dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            anyhow::anyhow!("failed to create diagnostics dir {}: {e}", dir.display())
        })?;
        Ok(Self {
            dir: Arc::new(dir.to_path_buf()),
            pending: Mutex::new(JoinSet::new()),
        })
    }

    /// Waits for every queued write to finish.
    pub(crate) async fn flush(&self) {
        let mut pending = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "diagnostic write task failed");
            }
        }
    }
}

impl DiagnosticSink for FileSink {
    fn persist(&self, key: &str, snapshot: &DiagnosticSnapshot) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            write_logged(&self.dir, key, snapshot);
            return;
        };
        let dir = Arc::clone(&self.dir);
        let key = key.to_string();
        let snapshot = snapshot.clone();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .spawn_blocking_on(move || write_logged(&dir, &key, &snapshot), &runtime);
    }
}
