use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use revharvest_core::{StrategyKind, Target};

use crate::identity::Identity;

use super::url::render_url;
use super::{
    describe_transport_error, markup_outcome, AcquisitionStrategy, FetchAttempt, FetchOutcome,
    HttpSessions, PageToken, RawContent,
};

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Plain GET of the server-rendered review listing.
pub struct StaticHttp {
    base_url: String,
    template: String,
    sessions: HttpSessions,
}

impl StaticHttp {
    #[must_use]
    pub fn new(base_url: &str, template: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            template: template.to_string(),
            sessions: HttpSessions::new(timeout),
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for StaticHttp {
    fn kind(&self) -> StrategyKind {
        StrategyKind::StaticHttp
    }

    async fn fetch(&self, target: &Target, page: &PageToken, identity: &Identity) -> FetchAttempt {
        let attempt = |outcome| FetchAttempt {
            strategy: StrategyKind::StaticHttp,
            page: page.clone(),
            identity: identity.session(),
            outcome,
        };

        let url = match render_url(&self.template, &self.base_url, target.product_id(), page) {
            Ok(url) => url,
            Err(e) => return attempt(FetchOutcome::Failed(e.to_string())),
        };
        let client = match self.sessions.client_for(identity) {
            Ok(client) => client,
            Err(e) => return attempt(FetchOutcome::Failed(e.to_string())),
        };

        let referer = format!("{}/products/{}", self.base_url, target.product_id());
        tracing::debug!(%url, page = page.number, "static fetch");
        let response = match client
            .get(url)
            .header(reqwest::header::ACCEPT, ACCEPT_HTML)
            .header(
                reqwest::header::ACCEPT_LANGUAGE,
                identity.profile().accept_language,
            )
            .header(reqwest::header::REFERER, referer)
            .header(reqwest::header::UPGRADE_INSECURE_REQUESTS, "1")
            .header("Sec-Fetch-Site", "same-origin")
            .header("Sec-Fetch-Mode", "navigate")
            .header("Sec-Fetch-Dest", "document")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return attempt(FetchOutcome::Failed(describe_transport_error(&e))),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return attempt(FetchOutcome::Failed(describe_transport_error(&e))),
        };
        attempt(markup_outcome(RawContent::markup(status.as_u16(), body)))
    }

    async fn forget(&self, session: Uuid) {
        self.sessions.forget(session);
    }

    async fn shutdown(&self) {
        self.sessions.clear();
    }
}
