//! Anti-detection patches for the rendered browser.
#![cfg_attr(not(feature = "browser"), allow(dead_code))]

/// Chrome launch flags that hide the most obvious automation markers.
pub(crate) const STEALTH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-sync",
    "--disable-translate",
    "--metrics-recording-only",
    "--no-sandbox",
    "--disable-gpu",
];

/// Scripts evaluated on every new document before site scripts run.
pub(crate) const STEALTH_SCRIPTS: &[&str] = &[
    r"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
        configurable: true
    });
    ",
    r"
    window.chrome = {
        runtime: {},
        loadTimes: function() {},
        csi: function() {},
        app: {}
    };
    ",
    r"
    const originalQuery = window.navigator.permissions.query;
    window.navigator.permissions.query = (parameters) => (
        parameters.name === 'notifications' ?
        Promise.resolve({ state: Notification.permission }) :
        originalQuery(parameters)
    );
    ",
    r"
    Object.defineProperty(navigator, 'plugins', {
        get: () => [
            { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
            { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' },
            { name: 'Native Client', filename: 'internal-nacl-plugin', description: '' }
        ],
        configurable: true
    });
    ",
    r"
    Object.defineProperty(navigator, 'languages', {
        get: () => ['en-US', 'en'],
        configurable: true
    });
    ",
];

/// Pins `navigator.platform` to the identity's fingerprint.
pub(crate) fn platform_script(platform: &str) -> String {
    format!(
        "Object.defineProperty(navigator, 'platform', {{ get: () => '{platform}', configurable: true }});"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_script_embeds_value() {
        let script = platform_script("MacIntel");
        assert!(script.contains("'MacIntel'"));
        assert!(script.starts_with("Object.defineProperty(navigator, 'platform'"));
    }

    #[test]
    fn args_disable_automation_flag() {
        assert!(STEALTH_ARGS.contains(&"--disable-blink-features=AutomationControlled"));
    }
}
