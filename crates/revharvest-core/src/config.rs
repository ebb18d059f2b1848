use std::path::PathBuf;

use crate::app_config::{HarvestConfig, ProxyPoolConfig};
use crate::target::StrategyKind;
use crate::ConfigError;

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.g2.com".to_string(),
            log_level: "info".to_string(),
            strategy_order: StrategyKind::DEFAULT_ORDER.to_vec(),
            static_url_template: "{base}/products/{product}/reviews?page={page}".to_string(),
            json_url_template: "{base}/products/{product}/reviews.json?page={page}".to_string(),
            request_timeout_secs: 30,
            proxy_pool: ProxyPoolConfig::default(),
            identity_pool_size: 4,
            identity_max_uses: 20,
            max_soft_blocks: 3,
            inter_request_delay_ms: 1_500,
            retry_backoff_base_ms: 2_000,
            max_pages: 200,
            run_deadline_secs: 900,
            max_concurrent_targets: 1,
            browser_headless: true,
            browser_wait_secs: 15,
            browser_scroll_steps: 3,
            diagnostics_dir: PathBuf::from("./diagnostics"),
        }
    }
}

/// Load harvest configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a variable is present but invalid.
pub fn load_config() -> Result<HarvestConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_config_from_env()
}

/// Load harvest configuration from environment variables already in the process.
///
/// Unlike [`load_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if a variable is present but invalid.
pub fn load_config_from_env() -> Result<HarvestConfig, ConfigError> {
    build_config(|key| std::env::var(key))
}

/// Build configuration using the provided env-var lookup function.
///
/// Every variable is optional; absent ones keep the [`HarvestConfig::default`] value.
fn build_config<F>(lookup: F) -> Result<HarvestConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let defaults = HarvestConfig::default();

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: u32| -> Result<u32, ConfigError> {
        match lookup(var) {
            Ok(raw) => raw.trim().parse::<u32>().map_err(|e| invalid(var, e.to_string())),
            Err(_) => Ok(default),
        }
    };

    let parse_u64 = |var: &str, default: u64| -> Result<u64, ConfigError> {
        match lookup(var) {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|e| invalid(var, e.to_string())),
            Err(_) => Ok(default),
        }
    };

    let parse_usize = |var: &str, default: usize| -> Result<usize, ConfigError> {
        match lookup(var) {
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|e| invalid(var, e.to_string())),
            Err(_) => Ok(default),
        }
    };

    let base_url = or_default("REVHARVEST_BASE_URL", &defaults.base_url)
        .trim_end_matches('/')
        .to_string();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(invalid(
            "REVHARVEST_BASE_URL",
            format!("'{base_url}' is not an http(s) origin"),
        ));
    }

    let log_level = or_default("REVHARVEST_LOG_LEVEL", &defaults.log_level);

    let strategy_order = match lookup("REVHARVEST_STRATEGY_ORDER") {
        Ok(raw) => StrategyKind::parse_order(&raw)
            .map_err(|reason| invalid("REVHARVEST_STRATEGY_ORDER", reason))?,
        Err(_) => defaults.strategy_order,
    };

    let static_url_template =
        or_default("REVHARVEST_STATIC_URL_TEMPLATE", &defaults.static_url_template);
    validate_template("REVHARVEST_STATIC_URL_TEMPLATE", &static_url_template)?;
    let json_url_template = or_default("REVHARVEST_JSON_URL_TEMPLATE", &defaults.json_url_template);
    validate_template("REVHARVEST_JSON_URL_TEMPLATE", &json_url_template)?;

    let request_timeout_secs =
        parse_u64("REVHARVEST_REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?;
    let proxy_pool = lookup("REVHARVEST_PROXIES")
        .map(|raw| ProxyPoolConfig::from_list(&raw))
        .unwrap_or_default();

    let identity_pool_size =
        parse_usize("REVHARVEST_IDENTITY_POOL_SIZE", defaults.identity_pool_size)?;
    if identity_pool_size == 0 {
        return Err(invalid(
            "REVHARVEST_IDENTITY_POOL_SIZE",
            "must be at least 1".to_string(),
        ));
    }
    let identity_max_uses = parse_u32("REVHARVEST_IDENTITY_MAX_USES", defaults.identity_max_uses)?;
    let max_soft_blocks = parse_u32("REVHARVEST_MAX_SOFT_BLOCKS", defaults.max_soft_blocks)?;
    let inter_request_delay_ms = parse_u64(
        "REVHARVEST_INTER_REQUEST_DELAY_MS",
        defaults.inter_request_delay_ms,
    )?;
    let retry_backoff_base_ms = parse_u64(
        "REVHARVEST_RETRY_BACKOFF_BASE_MS",
        defaults.retry_backoff_base_ms,
    )?;
    let max_pages = parse_u32("REVHARVEST_MAX_PAGES", defaults.max_pages)?;
    let run_deadline_secs = parse_u64("REVHARVEST_RUN_DEADLINE_SECS", defaults.run_deadline_secs)?;
    // A pool of zero workers would never make progress.
    let max_concurrent_targets = parse_usize(
        "REVHARVEST_MAX_CONCURRENT_TARGETS",
        defaults.max_concurrent_targets,
    )?
    .max(1);

    let browser_headless = parse_bool(
        "REVHARVEST_BROWSER_HEADLESS",
        &or_default("REVHARVEST_BROWSER_HEADLESS", "true"),
    )?;
    let browser_wait_secs = parse_u64("REVHARVEST_BROWSER_WAIT_SECS", defaults.browser_wait_secs)?;
    let browser_scroll_steps =
        parse_u32("REVHARVEST_BROWSER_SCROLL_STEPS", defaults.browser_scroll_steps)?;
    let diagnostics_dir = lookup("REVHARVEST_DIAGNOSTICS_DIR")
        .map_or(defaults.diagnostics_dir, PathBuf::from);

    Ok(HarvestConfig {
        base_url,
        log_level,
        strategy_order,
        static_url_template,
        json_url_template,
        request_timeout_secs,
        proxy_pool,
        identity_pool_size,
        identity_max_uses,
        max_soft_blocks,
        inter_request_delay_ms,
        retry_backoff_base_ms,
        max_pages,
        run_deadline_secs,
        max_concurrent_targets,
        browser_headless,
        browser_wait_secs,
        browser_scroll_steps,
        diagnostics_dir,
    })
}

/// URL templates must at least carry the product and page placeholders.
fn validate_template(var: &str, template: &str) -> Result<(), ConfigError> {
    for placeholder in ["{product}", "{page}"] {
        if !template.contains(placeholder) {
            return Err(ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: format!("template is missing the {placeholder} placeholder"),
            });
        }
    }
    Ok(())
}

fn parse_bool(var: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
