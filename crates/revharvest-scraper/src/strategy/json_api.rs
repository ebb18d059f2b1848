use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use revharvest_core::{StrategyKind, Target};

use crate::extract::json::{next_cursor, total_pages};
use crate::identity::Identity;

use super::url::render_url;
use super::{
    describe_transport_error, AcquisitionStrategy, FetchAttempt, FetchOutcome, HttpSessions,
    PageToken, RawContent, SourceKind,
};

/// XHR-style request against the site's structured review endpoint.
pub struct JsonEndpoint {
    base_url: String,
    template: String,
    sessions: HttpSessions,
}

impl JsonEndpoint {
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
impl AcquisitionStrategy for JsonEndpoint {
    fn kind(&self) -> StrategyKind {
        StrategyKind::JsonEndpoint
    }

    async fn fetch(&self, target: &Target, page: &PageToken, identity: &Identity) -> FetchAttempt {
        let attempt = |outcome| FetchAttempt {
            strategy: StrategyKind::JsonEndpoint,
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

        tracing::debug!(%url, page = page.number, "json fetch");
        let response = match client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json, text/javascript, */*; q=0.01")
            .header(
                reqwest::header::ACCEPT_LANGUAGE,
                identity.profile().accept_language,
            )
            .header("X-Requested-With", "XMLHttpRequest")
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

        let mut content = RawContent {
            status: status.as_u16(),
            body,
            source: SourceKind::Json,
            payload: None,
            total_pages: None,
            next_cursor: None,
        };
        if !status.is_success() {
            return attempt(FetchOutcome::Blocked {
                reason: format!("HTTP {}", status.as_u16()),
                content,
            });
        }

        match serde_json::from_str::<serde_json::Value>(&content.body) {
            Ok(payload) => {
                content.total_pages = total_pages(&payload);
                content.next_cursor = next_cursor(&payload);
                content.payload = Some(payload);
                attempt(FetchOutcome::Success(content))
            }
            Err(e) => {
                // Challenge interstitials are served as HTML with a 200.
                tracing::debug!(error = %e, "json endpoint returned a non-json body");
                attempt(FetchOutcome::Blocked {
                    reason: "non-json payload".to_string(),
                    content,
                })
            }
        }
    }

    async fn forget(&self, session: Uuid) {
        self.sessions.forget(session);
    }

    async fn shutdown(&self) {
        self.sessions.clear();
    }
}
