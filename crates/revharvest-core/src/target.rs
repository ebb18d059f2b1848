use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Number of reviews collected when the caller does not ask for a quota.
pub const DEFAULT_QUOTA: usize = 20;

/// One product to harvest. Built once per run and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    product_id: String,
    quota: usize,
}

impl Target {
    /// Creates a target for `product_id` with the given review `quota`.
    ///
    /// The identifier is trimmed. A quota of zero is accepted and yields an
    /// empty, successful run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTarget`] if the identifier is empty or
    /// contains a path separator.
    pub fn new(product_id: &str, quota: usize) -> Result<Self, ConfigError> {
        let product_id = product_id.trim();
        if product_id.is_empty() {
            return Err(ConfigError::InvalidTarget(
                "product identifier must be non-empty".to_string(),
            ));
        }
        if product_id.contains('/') {
            return Err(ConfigError::InvalidTarget(format!(
                "product identifier '{product_id}' must not contain '/'"
            )));
        }
        Ok(Self {
            product_id: product_id.to_string(),
            quota,
        })
    }

    #[must_use]
    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    #[must_use]
    pub fn quota(&self) -> usize {
        self.quota
    }
}

/// Acquisition method used to obtain raw review content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    StaticHttp,
    JsonEndpoint,
    RenderedBrowser,
}

impl StrategyKind {
    /// Default fallback order: cheapest first, full browser last.
    pub const DEFAULT_ORDER: [StrategyKind; 3] = [
        StrategyKind::StaticHttp,
        StrategyKind::JsonEndpoint,
        StrategyKind::RenderedBrowser,
    ];

    /// Short label used in logs and diagnostic keys.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            StrategyKind::StaticHttp => "static",
            StrategyKind::JsonEndpoint => "json",
            StrategyKind::RenderedBrowser => "browser",
        }
    }

    /// Parses a comma-separated strategy list, dropping duplicates while
    /// keeping first-seen order.
    ///
    /// # Errors
    ///
    /// Returns the unrecognized token, or `"empty strategy list"` when no
    /// strategy remains.
    pub fn parse_order(raw: &str) -> Result<Vec<StrategyKind>, String> {
        let mut order = Vec::new();
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let kind = token.parse::<StrategyKind>()?;
            if !order.contains(&kind) {
                order.push(kind);
            }
        }
        if order.is_empty() {
            return Err("empty strategy list".to_string());
        }
        Ok(order)
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" | "static_http" | "http" => Ok(StrategyKind::StaticHttp),
            "json" | "json_endpoint" | "api" => Ok(StrategyKind::JsonEndpoint),
            "browser" | "rendered_browser" | "rendered" => Ok(StrategyKind::RenderedBrowser),
            other => Err(format!("unknown strategy '{other}'")),
        }
    }
}
