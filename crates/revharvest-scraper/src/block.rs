//! Classification of fetch attempts into success, soft block, or hard block.
//!
//! [`BlockDetector::classify`] looks at a single attempt and never returns
//! [`Verdict::HardBlock`]; escalation from repeated soft blocks is tracked
//! separately by [`BlockTracker`] because it depends on history.

use crate::extract::{page_markers, PageMarkers};
use crate::strategy::{FetchAttempt, FetchOutcome, RawContent, SourceKind};

/// Phrases that only appear on automated-traffic, challenge, or
/// access-denial pages.
const BLOCK_SIGNATURES: &[&str] = &[
    "unusual traffic",
    "automated queries",
    "are you a robot",
    "verify you are human",
    "access denied",
    "attention required! | cloudflare",
    "/cdn-cgi/challenge-platform/",
    "pardon our interruption",
    "request blocked",
    "px-captcha",
    "captcha-delivery.com",
];

/// Why an attempt was not usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    Status(u16),
    Signature(&'static str),
    NoContentMarkers,
    NotJson,
    Network(String),
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::Status(status) => write!(f, "HTTP {status}"),
            BlockReason::Signature(sig) => write!(f, "block page signature \"{sig}\""),
            BlockReason::NoContentMarkers => f.write_str("no content markers in loaded page"),
            BlockReason::NotJson => f.write_str("non-json payload"),
            BlockReason::Network(err) => write!(f, "network failure: {err}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success,
    SoftBlock(BlockReason),
    HardBlock(BlockReason),
}

/// Returns the first block-page signature found in `body`, if any.
///
/// Cloudflare's "Just a moment..." interstitial is only treated as a block
/// when it comes with its cookie gate or `cf-chl-` challenge tokens, since
/// the phrase alone shows up in ordinary prose.
#[must_use]
pub fn block_signature(body: &str) -> Option<&'static str> {
    let lowered = body.to_ascii_lowercase();
    if let Some(sig) = BLOCK_SIGNATURES.iter().find(|sig| lowered.contains(*sig)) {
        return Some(sig);
    }
    let has_just_a_moment = lowered.contains("just a moment...");
    if has_just_a_moment
        && (lowered.contains("please enable cookies") || lowered.contains("cf-chl-"))
    {
        return Some("just a moment...");
    }
    None
}

#[derive(Debug, Clone)]
pub struct BlockDetector {
    /// Non-2xx statuses that mean "nothing here" rather than "go away".
    allowed_statuses: Vec<u16>,
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self {
            allowed_statuses: vec![404, 410],
        }
    }
}

impl BlockDetector {
    #[must_use]
    pub fn new(allowed_statuses: Vec<u16>) -> Self {
        Self { allowed_statuses }
    }

    /// Classifies one attempt. Pure: the same attempt always yields the same
    /// verdict.
    ///
    /// Rules, first match wins:
    /// 1. transport failure, or a status outside 2xx and the allow-list
    /// 2. a block-page signature in a body where no review container matched
    /// 3. a markup page with neither review containers nor the listing shell, or a
    ///    JSON attempt without a parsed payload
    #[must_use]
    pub fn classify(&self, attempt: &FetchAttempt) -> Verdict {
        let (content, allowed) = match &attempt.outcome {
            FetchOutcome::Failed(err) => {
                return Verdict::SoftBlock(BlockReason::Network(err.clone()));
            }
            FetchOutcome::Blocked { content, .. } => {
                let is_2xx = (200..300).contains(&content.status);
                if !is_2xx && !self.allowed_statuses.contains(&content.status) {
                    return Verdict::SoftBlock(BlockReason::Status(content.status));
                }
                (content, !is_2xx)
            }
            FetchOutcome::Success(content) => (content, false),
        };

        let markers = page_markers(content);
        if !markers.reviews {
            if let Some(sig) = block_signature(&content.body) {
                return Verdict::SoftBlock(BlockReason::Signature(sig));
            }
        }

        if allowed {
            return Verdict::Success;
        }
        check_shape(content, markers)
    }
}

fn check_shape(content: &RawContent, markers: PageMarkers) -> Verdict {
    match content.source {
        SourceKind::Json if content.payload.is_none() => Verdict::SoftBlock(BlockReason::NotJson),
        SourceKind::Json => Verdict::Success,
        SourceKind::Markup if markers.reviews || markers.shell => Verdict::Success,
        SourceKind::Markup => Verdict::SoftBlock(BlockReason::NoContentMarkers),
    }
}

/// Escalates consecutive soft blocks to a hard block once they exceed the
/// budget. Any success resets the count.
#[derive(Debug, Clone)]
pub struct BlockTracker {
    budget: u32,
    consecutive: u32,
}

impl BlockTracker {
    #[must_use]
    pub fn new(budget: u32) -> Self {
        Self {
            budget,
            consecutive: 0,
        }
    }

    pub fn observe(&mut self, verdict: Verdict) -> Verdict {
        match verdict {
            Verdict::Success => {
                self.consecutive = 0;
                Verdict::Success
            }
            Verdict::SoftBlock(reason) => {
                self.consecutive += 1;
                if self.consecutive > self.budget {
                    Verdict::HardBlock(reason)
                } else {
                    Verdict::SoftBlock(reason)
                }
            }
            hard @ Verdict::HardBlock(_) => hard,
        }
    }

    #[must_use]
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

#[cfg(test)]
#[path = "block_test.rs"]
mod tests;
