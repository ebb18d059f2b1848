//! Headless Chromium strategy.
//!
//! Each identity session gets its own browser process, launched with the
//! identity's proxy and fingerprint and torn down when the identity is
//! retired. A non-2xx main document is reported as `Blocked`, like the
//! static strategy does. Without the `browser` feature every fetch reports
//! `Failed`, and `build_strategies` leaves the strategy out.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use revharvest_core::{HarvestConfig, StrategyKind, Target};

use crate::identity::Identity;

use super::{AcquisitionStrategy, FetchAttempt, FetchOutcome, PageToken};

/// Selectors that mean the listing has rendered, either reviews or an
/// (empty) pagination control.
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
const READY_SELECTORS: &[&str] = &[
    r#"[data-test="review-card"]"#,
    r#"[itemprop="review"]"#,
    r#"div[id^="survey-response-"]"#,
    r#"[data-test="pagination"]"#,
    r#"nav.pagination"#,
];

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
pub struct RenderedBrowser {
    base_url: String,
    template: String,
    headless: bool,
    timeout: Duration,
    ready_wait: Duration,
    scroll_steps: u32,
    #[cfg(feature = "browser")]
    sessions: tokio::sync::Mutex<std::collections::HashMap<Uuid, session::BrowserSession>>,
}

impl RenderedBrowser {
    #[must_use]
    pub fn new(
        base_url: &str,
        template: &str,
        headless: bool,
        timeout: Duration,
        ready_wait: Duration,
        scroll_steps: u32,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            template: template.to_string(),
            headless,
            timeout,
            ready_wait,
            scroll_steps,
            #[cfg(feature = "browser")]
            sessions: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Renders the same listing URL the static strategy requests.
    #[must_use]
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(
            &config.base_url,
            &config.static_url_template,
            config.browser_headless,
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.browser_wait_secs),
            config.browser_scroll_steps,
        )
    }
}

#[async_trait]
impl AcquisitionStrategy for RenderedBrowser {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RenderedBrowser
    }

    #[cfg(not(feature = "browser"))]
    async fn fetch(&self, _target: &Target, page: &PageToken, identity: &Identity) -> FetchAttempt {
        FetchAttempt {
            strategy: StrategyKind::RenderedBrowser,
            page: page.clone(),
            identity: identity.session(),
            outcome: FetchOutcome::Failed(
                "browser support not compiled; rebuild with --features browser".to_string(),
            ),
        }
    }

    #[cfg(feature = "browser")]
    async fn fetch(&self, target: &Target, page: &PageToken, identity: &Identity) -> FetchAttempt {
        let outcome = match super::url::render_url(
            &self.template,
            &self.base_url,
            target.product_id(),
            page,
        ) {
            Ok(url) => match self.render(url.as_str(), identity).await {
                Ok(content) => super::markup_outcome(content),
                Err(e) => FetchOutcome::Failed(e.to_string()),
            },
            Err(e) => FetchOutcome::Failed(e.to_string()),
        };
        FetchAttempt {
            strategy: StrategyKind::RenderedBrowser,
            page: page.clone(),
            identity: identity.session(),
            outcome,
        }
    }

    #[cfg(not(feature = "browser"))]
    async fn forget(&self, _session: Uuid) {}

    #[cfg(feature = "browser")]
    async fn forget(&self, session: Uuid) {
        if let Some(closed) = self.sessions.lock().await.remove(&session) {
            tracing::debug!(%session, "closing browser session");
            closed.shutdown();
        }
    }

    #[cfg(feature = "browser")]
    async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (session, closed) in sessions {
            tracing::debug!(%session, "closing browser session");
            closed.shutdown();
        }
    }
}

#[cfg(feature = "browser")]
mod session {
    use std::sync::Arc;

    use chromiumoxide::Browser;
    use tokio::task::JoinHandle;

    pub(super) struct BrowserSession {
        pub(super) browser: Arc<Browser>,
        pub(super) handler: JoinHandle<()>,
    }

    impl BrowserSession {
        /// Dropping the last `Browser` handle kills the child process.
        pub(super) fn shutdown(self) {
            self.handler.abort();
            drop(self.browser);
        }
    }
}

#[cfg(feature = "browser")]
impl RenderedBrowser {
    async fn browser_for(
        &self,
        identity: &Identity,
    ) -> Result<std::sync::Arc<chromiumoxide::Browser>, crate::error::ScraperError> {
        use chromiumoxide::{Browser, BrowserConfig};
        use futures::StreamExt;

        use crate::error::ScraperError;

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&identity.session()) {
            return Ok(std::sync::Arc::clone(&existing.browser));
        }

        let (width, height) = identity.profile().viewport;
        let mut builder = BrowserConfig::builder().window_size(width, height);
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(proxy) = identity.proxy() {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }
        for arg in super::stealth::STEALTH_ARGS {
            builder = builder.arg(*arg);
        }
        let config = builder.build().map_err(ScraperError::Browser)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScraperError::Browser(format!("launch failed: {e}")))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        tracing::info!(session = %identity.session(), "launched browser session");

        let browser = std::sync::Arc::new(browser);
        sessions.insert(
            identity.session(),
            session::BrowserSession {
                browser: std::sync::Arc::clone(&browser),
                handler,
            },
        );
        Ok(browser)
    }

    /// Loads `url` in a fresh tab and returns the rendered document with the
    /// navigation's HTTP status. The tab is closed on every path, including
    /// timeouts.
    async fn render(
        &self,
        url: &str,
        identity: &Identity,
    ) -> Result<super::RawContent, crate::error::ScraperError> {
        use crate::error::ScraperError;

        let browser = self.browser_for(identity).await?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScraperError::Browser(e.to_string()))?;

        let budget = self.timeout + self.ready_wait;
        let rendered = tokio::time::timeout(budget, self.drive(&page, url, identity)).await;
        if let Err(e) = page.close().await {
            tracing::debug!(error = %e, "page close failed");
        }
        match rendered {
            Ok(result) => result,
            Err(_) => Err(ScraperError::Browser(format!(
                "render timed out after {}s",
                budget.as_secs()
            ))),
        }
    }

    async fn drive(
        &self,
        page: &chromiumoxide::Page,
        url: &str,
        identity: &Identity,
    ) -> Result<super::RawContent, crate::error::ScraperError> {
        use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;

        use crate::error::ScraperError;

        let browser_err = |e: chromiumoxide::error::CdpError| ScraperError::Browser(e.to_string());

        let profile = identity.profile();
        let ua = SetUserAgentOverrideParams::builder()
            .user_agent(profile.user_agent)
            .accept_language(profile.accept_language)
            .platform(profile.platform)
            .build()
            .map_err(ScraperError::Browser)?;
        page.execute(ua).await.map_err(browser_err)?;

        for script in super::stealth::STEALTH_SCRIPTS {
            if let Err(e) = page.evaluate_on_new_document(script.to_string()).await {
                tracing::debug!(error = %e, "stealth script injection skipped");
            }
        }
        if let Err(e) = page
            .evaluate_on_new_document(super::stealth::platform_script(profile.platform))
            .await
        {
            tracing::debug!(error = %e, "platform override skipped");
        }

        tracing::debug!(url, "navigating");
        page.goto(url).await.map_err(browser_err)?;
        let status = navigation_status(page).await;
        if !(200..300).contains(&status) {
            // Non-2xx documents are captured as loaded, without the ready wait.
            let html = page.content().await.map_err(browser_err)?;
            return Ok(super::RawContent::markup(status, html));
        }

        let deadline = tokio::time::Instant::now() + self.ready_wait;
        let mut ready = false;
        while !ready && tokio::time::Instant::now() < deadline {
            for selector in READY_SELECTORS {
                if page.find_element(*selector).await.is_ok() {
                    ready = true;
                    break;
                }
            }
            if !ready {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
        if !ready {
            tracing::warn!(url, "no content or pagination marker before wait elapsed");
        }

        for _ in 0..self.scroll_steps {
            if page
                .evaluate("window.scrollBy(0, document.body.scrollHeight)")
                .await
                .is_err()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(400)).await;
        }

        let html = page.content().await.map_err(browser_err)?;
        Ok(super::RawContent::markup(status, html))
    }
}

/// HTTP status of the page's main document. Falls back to the Navigation
/// Timing entry, then to 200 when neither source reports one.
#[cfg(feature = "browser")]
async fn navigation_status(page: &chromiumoxide::Page) -> u16 {
    let from_request = match page.wait_for_navigation_response().await {
        Ok(Some(request)) => request
            .response
            .as_ref()
            .and_then(|response| u16::try_from(response.status).ok()),
        _ => None,
    };
    if let Some(status) = from_request {
        return status;
    }
    let from_timing = page
        .evaluate("performance.getEntriesByType('navigation')[0]?.responseStatus ?? 0")
        .await
        .ok()
        .and_then(|result| result.into_value::<u64>().ok())
        .and_then(|status| u16::try_from(status).ok())
        .filter(|status| *status > 0);
    from_timing.unwrap_or_else(|| {
        tracing::debug!("navigation status unavailable; assuming 200");
        200
    })
}
