//! Per-session browser fingerprints
//!
//! Every checkout gets a freshly drawn profile so consecutive sessions on the
//! same page do not share user agent, viewport, timezone or WebGL identity.

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::Serialize;

const USER_AGENTS: &[(&str, &str)] = &[
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36",
        "Win32",
    ),
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.6778.205 Safari/537.36",
        "Win32",
    ),
    (
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36",
        "MacIntel",
    ),
    (
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.6778.139 Safari/537.36",
        "Linux x86_64",
    ),
];

const LOCALES: &[(&str, &str)] = &[
    ("en-US", "en-US,en;q=0.9"),
    ("en-GB", "en-GB,en;q=0.9"),
    ("en-CA", "en-CA,en;q=0.9,fr-CA;q=0.7"),
];

const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1536, 864), (1440, 900), (1366, 768), (1280, 800)];

const TIMEZONES: &[&str] = &[
    "America/New_York",
    "America/Chicago",
    "America/Los_Angeles",
    "Europe/London",
    "America/Toronto",
];

const WEBGL: &[(&str, &str)] = &[
    ("Intel Inc.", "Intel(R) UHD Graphics 630"),
    ("Intel Inc.", "Intel Iris OpenGL Engine"),
    ("NVIDIA Corporation", "NVIDIA GeForce GTX 1650/PCIe/SSE2"),
    ("Google Inc. (AMD)", "ANGLE (AMD, AMD Radeon RX 580 Direct3D11 vs_5_0 ps_5_0)"),
];

const HARDWARE_CONCURRENCY: &[u32] = &[4, 8, 12, 16];

/// Fingerprint-affecting properties applied to a page for one session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub user_agent: String,
    pub accept_language: String,
    pub platform: String,
    pub language: String,
    pub languages: Vec<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub timezone: String,
    pub webgl_vendor: String,
    pub webgl_renderer: String,
    pub hardware_concurrency: u32,
    /// Seeds deterministic canvas noise for this session
    pub session_seed: String,
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self {
            user_agent: USER_AGENTS[0].0.to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            platform: "Win32".to_string(),
            language: "en-US".to_string(),
            languages: vec!["en-US".to_string(), "en".to_string()],
            viewport_width: 1920,
            viewport_height: 1080,
            timezone: "America/New_York".to_string(),
            webgl_vendor: "Intel Inc.".to_string(),
            webgl_renderer: "Intel(R) UHD Graphics 630".to_string(),
            hardware_concurrency: 8,
            session_seed: "00".repeat(16),
        }
    }
}

impl Fingerprint {
    /// Draw a new fingerprint
    #[must_use]
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let fallback = Self::default();

        let (user_agent, platform) = USER_AGENTS
            .choose(&mut rng)
            .copied()
            .unwrap_or((USER_AGENTS[0].0, USER_AGENTS[0].1));
        let (language, accept_language) = LOCALES.choose(&mut rng).copied().unwrap_or(LOCALES[0]);
        let (width, height) = VIEWPORTS.choose(&mut rng).copied().unwrap_or(VIEWPORTS[0]);
        let timezone = TIMEZONES.choose(&mut rng).copied().unwrap_or(TIMEZONES[0]);
        let (vendor, renderer) = WEBGL.choose(&mut rng).copied().unwrap_or(WEBGL[0]);
        let cores = HARDWARE_CONCURRENCY
            .choose(&mut rng)
            .copied()
            .unwrap_or(fallback.hardware_concurrency);
        let seed: [u8; 16] = rng.random();

        let primary = language.split('-').next().unwrap_or("en").to_string();
        Self {
            user_agent: user_agent.to_string(),
            accept_language: accept_language.to_string(),
            platform: platform.to_string(),
            language: language.to_string(),
            languages: vec![language.to_string(), primary],
            // Small jitter so the exact window size is not a shared constant
            viewport_width: width - rng.random_range(0..=16),
            viewport_height: height - rng.random_range(0..=24),
            timezone: timezone.to_string(),
            webgl_vendor: vendor.to_string(),
            webgl_renderer: renderer.to_string(),
            hardware_concurrency: cores,
            session_seed: hex::encode(seed),
        }
    }

    /// Script run before any page script, overriding navigator/WebGL properties
    #[must_use]
    pub fn init_script(&self) -> String {
        let languages = serde_json::to_string(&self.languages).unwrap_or_else(|_| "[]".to_string());
        let vendor = serde_json::to_string(&self.webgl_vendor).unwrap_or_default();
        let renderer = serde_json::to_string(&self.webgl_renderer).unwrap_or_default();
        let platform = serde_json::to_string(&self.platform).unwrap_or_default();
        let language = serde_json::to_string(&self.language).unwrap_or_default();
        format!(
            r#"
            (() => {{
                const define = (obj, key, value) =>
                    Object.defineProperty(obj, key, {{ get: () => value, configurable: true }});
                define(Navigator.prototype, 'webdriver', undefined);
                define(Navigator.prototype, 'platform', {platform});
                define(Navigator.prototype, 'language', {language});
                define(Navigator.prototype, 'languages', Object.freeze({languages}));
                define(Navigator.prototype, 'hardwareConcurrency', {cores});
                const patch = (proto) => {{
                    const original = proto.getParameter;
                    proto.getParameter = function (param) {{
                        if (param === 37445) return {vendor};
                        if (param === 37446) return {renderer};
                        return original.call(this, param);
                    }};
                }};
                if (window.WebGLRenderingContext) patch(WebGLRenderingContext.prototype);
                if (window.WebGL2RenderingContext) patch(WebGL2RenderingContext.prototype);
                window.__sessionSeed = "{seed}";
            }})();
            "#,
            cores = self.hardware_concurrency,
            seed = self.session_seed,
        )
    }
}
