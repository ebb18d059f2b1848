//! Multi-strategy review harvesting: acquisition strategies, block detection,
//! identity rotation, pagination, and the per-target session orchestrator.

pub mod block;
pub mod diagnostics;
pub mod error;
pub mod extract;
pub mod identity;
pub mod pagination;
pub mod rate_limit;
pub mod session;
pub mod strategy;

pub use block::{BlockDetector, BlockReason, Verdict};
pub use diagnostics::{DiagnosticSink, DiagnosticSnapshot, NoopSink, SnapshotKind};
pub use error::ScraperError;
pub use extract::{extract, Extraction};
pub use identity::{FingerprintProfile, Identity, IdentityRotator};
pub use pagination::{AbortReason, DoneReason, PipelineSettings, Termination};
pub use session::{RunControl, RunOutcome, SessionOrchestrator};
pub use strategy::{
    build_strategies, AcquisitionStrategy, FetchAttempt, FetchOutcome, JsonEndpoint, PageToken,
    RawContent, RenderedBrowser, SourceKind, StaticHttp,
};

#[cfg(test)]
mod test_support;
