//! Acquisition strategies: interchangeable ways of fetching one page of raw
//! review content.
//!
//! Every strategy returns a [`FetchAttempt`] rather than an error. Transport
//! failures become [`FetchOutcome::Failed`], non-2xx responses and recognized
//! challenge pages become [`FetchOutcome::Blocked`], and everything else is a
//! [`FetchOutcome::Success`] for the block detector to judge.

pub mod browser;
pub mod json_api;
pub mod static_http;
mod stealth;
pub mod url;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use uuid::Uuid;

use revharvest_core::{ConfigError, HarvestConfig, StrategyKind, Target};

use crate::error::ScraperError;
use crate::identity::Identity;

pub use browser::RenderedBrowser;
pub use json_api::JsonEndpoint;
pub use static_http::StaticHttp;

/// How the raw body should be interpreted by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Markup,
    Json,
}

/// Position in a target's pagination: a 1-based page number, plus an opaque
/// cursor when the source supplied one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageToken {
    pub number: u32,
    pub cursor: Option<String>,
}

impl PageToken {
    #[must_use]
    pub fn first() -> Self {
        Self::at(1)
    }

    #[must_use]
    pub fn at(number: u32) -> Self {
        Self {
            number: number.max(1),
            cursor: None,
        }
    }

    /// The following page, carrying `cursor` if the source handed one out.
    #[must_use]
    pub fn next(&self, cursor: Option<String>) -> Self {
        Self {
            number: self.number.saturating_add(1),
            cursor,
        }
    }
}

/// Raw response as returned by a strategy, before classification.
#[derive(Debug, Clone)]
pub struct RawContent {
    pub status: u16,
    pub body: String,
    pub source: SourceKind,
    /// Parsed payload for JSON sources; `None` when the body was not JSON.
    pub payload: Option<serde_json::Value>,
    pub total_pages: Option<u32>,
    pub next_cursor: Option<String>,
}

impl RawContent {
    #[must_use]
    pub fn markup(status: u16, body: String) -> Self {
        Self {
            status,
            body,
            source: SourceKind::Markup,
            payload: None,
            total_pages: None,
            next_cursor: None,
        }
    }
}

/// A page that loaded: `Success` for 2xx, `Blocked` otherwise.
pub(crate) fn markup_outcome(content: RawContent) -> FetchOutcome {
    if (200..300).contains(&content.status) {
        FetchOutcome::Success(content)
    } else {
        FetchOutcome::Blocked {
            reason: format!("HTTP {}", content.status),
            content,
        }
    }
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success(RawContent),
    /// The response loaded but was rejected: non-2xx status or a payload that
    /// is not what the endpoint should serve.
    Blocked { reason: String, content: RawContent },
    /// Transport-level failure: DNS, connect, timeout, or body read.
    Failed(String),
}

/// Result of one strategy invocation for one page with one identity.
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub strategy: StrategyKind,
    pub page: PageToken,
    pub identity: Uuid,
    pub outcome: FetchOutcome,
}

impl FetchAttempt {
    /// Raw content carried by the outcome, if any was received.
    #[must_use]
    pub fn content(&self) -> Option<&RawContent> {
        match &self.outcome {
            FetchOutcome::Success(content) | FetchOutcome::Blocked { content, .. } => {
                Some(content)
            }
            FetchOutcome::Failed(_) => None,
        }
    }
}

#[async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Fetches one page of `target` using `identity`'s connection parameters.
    async fn fetch(&self, target: &Target, page: &PageToken, identity: &Identity) -> FetchAttempt;

    /// Drops any per-session state (clients, browser processes) held for a
    /// retired identity.
    async fn forget(&self, _session: Uuid) {}

    /// Drops per-session state for every identity.
    async fn shutdown(&self) {}
}

/// Whether this build can drive a real browser.
const BROWSER_SUPPORTED: bool = cfg!(feature = "browser");

fn order_error(reason: &str) -> ScraperError {
    ConfigError::InvalidEnvVar {
        var: "REVHARVEST_STRATEGY_ORDER".to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Builds the configured strategies in fallback order.
///
/// Without the `browser` feature the rendered-browser strategy is left out
/// with a warning, since every fetch it made would fail.
///
/// # Errors
///
/// Returns [`ScraperError::Configuration`] if no usable strategy is
/// configured, or [`ScraperError::InvalidUrl`] if a URL template cannot
/// render a valid URL for a placeholder product.
pub fn build_strategies(
    config: &HarvestConfig,
) -> Result<Vec<Arc<dyn AcquisitionStrategy>>, ScraperError> {
    if config.strategy_order.is_empty() {
        return Err(order_error("empty strategy list"));
    }
    url::render_url(&config.static_url_template, &config.base_url, "sample", &PageToken::first())?;
    url::render_url(&config.json_url_template, &config.base_url, "sample", &PageToken::first())?;

    let usable: Vec<StrategyKind> = config
        .strategy_order
        .iter()
        .copied()
        .filter(|kind| {
            let skip = *kind == StrategyKind::RenderedBrowser && !BROWSER_SUPPORTED;
            if skip {
                tracing::warn!(
                    strategy = %kind,
                    "skipping strategy: built without the `browser` feature"
                );
            }
            !skip
        })
        .collect();
    if usable.is_empty() {
        return Err(order_error(
            "only rendered_browser configured, but this build lacks the `browser` feature",
        ));
    }

    let timeout = Duration::from_secs(config.request_timeout_secs);
    Ok(usable
        .iter()
        .map(|kind| -> Arc<dyn AcquisitionStrategy> {
            match kind {
                StrategyKind::StaticHttp => Arc::new(StaticHttp::new(
                    &config.base_url,
                    &config.static_url_template,
                    timeout,
                )),
                StrategyKind::JsonEndpoint => Arc::new(JsonEndpoint::new(
                    &config.base_url,
                    &config.json_url_template,
                    timeout,
                )),
                StrategyKind::RenderedBrowser => Arc::new(RenderedBrowser::from_config(config)),
            }
        })
        .collect())
}

/// One `reqwest::Client` per identity session so that cookies, connection
/// pools, and proxy settings never leak between identities.
pub(crate) struct HttpSessions {
    timeout: Duration,
    clients: Mutex<HashMap<Uuid, Client>>,
}

impl HttpSessions {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached client for `identity`, building one on first use.
    pub(crate) fn client_for(&self, identity: &Identity) -> Result<Client, ScraperError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&identity.session()) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(identity.profile().user_agent)
            .gzip(true)
            .brotli(true);
        if let Some(proxy) = identity.proxy() {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        let client = builder.build()?;
        clients.insert(identity.session(), client.clone());
        Ok(client)
    }

    pub(crate) fn forget(&self, session: Uuid) {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session);
    }

    pub(crate) fn clear(&self) {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[cfg(test)]
    pub(crate) fn session_count(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Classifies a transport error into a short human-readable reason.
pub(crate) fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timeout: {err}")
    } else if err.is_connect() {
        format!("connect: {err}")
    } else {
        err.to_string()
    }
}
