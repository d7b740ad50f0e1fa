use anyhow::{anyhow, Context};
pub use anyhow::Result;
use std::str::FromStr;
use std::time::Duration;

pub const PROD_URL: &str = "https://reveda-backend.onrender.com";
pub const DEV_ANDROID_URL: &str = "http://10.0.2.2:5000";
pub const DEV_DEFAULT_URL: &str = "http://localhost:5000";
const DEV_PORT: u16 = 5000;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const ENV_API_URL: &str = "REVEDA_API_URL";
pub const ENV_API_TIMEOUT: &str = "REVEDA_API_TIMEOUT_SECS";
pub const ENV_PLATFORM: &str = "REVEDA_PLATFORM";
pub const ENV_WEB_HOST: &str = "REVEDA_WEB_HOST";

/// Where the client is running. Only matters for picking a development backend URL.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Platform {
    Android,
    Ios,
    Web,
    Desktop,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "ios") {
            Platform::Ios
        } else if cfg!(target_arch = "wasm32") {
            Platform::Web
        } else {
            Platform::Desktop
        }
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "web" => Ok(Platform::Web),
            "desktop" => Ok(Platform::Desktop),
            _ => Err(anyhow!("unknown platform: {}", s)),
        }
    }
}

/// Picks the backend base URL.
///
/// Order: explicit override (if non-empty), then the production backend for release builds, then
/// a per-platform development default. Android emulators reach the host through `10.0.2.2`; web
/// builds talk to whatever host served the page.
pub fn resolve_base_url(
    env_override: Option<&str>,
    is_dev: bool,
    platform: Platform,
    web_host: Option<&str>,
) -> String {
    if let Some(url) = env_override.map(str::trim).filter(|u| !u.is_empty()) {
        return url.trim_end_matches('/').to_string();
    }
    if !is_dev {
        return PROD_URL.to_string();
    }
    match (platform, web_host) {
        (Platform::Android, _) => DEV_ANDROID_URL.to_string(),
        (Platform::Web, Some(host)) if !host.is_empty() => format!("http://{host}:{DEV_PORT}"),
        _ => DEV_DEFAULT_URL.to_string(),
    }
}

/// Connection settings for [`crate::ApiClient`]. Resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn new(base_url: &str) -> Self {
        ApiConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds config from `REVEDA_*` environment variables, falling back to build-type and
    /// platform defaults.
    pub fn from_env() -> Result<Self> {
        let env_override = std::env::var(ENV_API_URL).ok();
        let platform = match std::env::var(ENV_PLATFORM) {
            Ok(p) => Platform::from_str(&p)?,
            Err(_) => Platform::current(),
        };
        let web_host = std::env::var(ENV_WEB_HOST).ok();
        let base_url = resolve_base_url(
            env_override.as_deref(),
            cfg!(debug_assertions),
            platform,
            web_host.as_deref(),
        );
        let timeout = match std::env::var(ENV_API_TIMEOUT) {
            Ok(secs) => Duration::from_secs(
                secs.trim()
                    .parse()
                    .with_context(|| format!("invalid {ENV_API_TIMEOUT}: {secs}"))?,
            ),
            Err(_) => DEFAULT_TIMEOUT,
        };
        Ok(ApiConfig { base_url, timeout })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Turns a server-relative upload path (eg, a profile picture) into something fetchable.
    ///
    /// Absolute URLs pass through untouched; Windows-style separators from the backend are
    /// normalized.
    pub fn image_url(&self, path: &str) -> Option<String> {
        if path.is_empty() {
            return None;
        }
        if path.starts_with("http://") || path.starts_with("https://") {
            return Some(path.to_string());
        }
        let clean = path.replace('\\', "/");
        Some(self.url(&clean))
    }
}

#[test]
fn test_resolve_base_url() {
    assert_eq!(
        resolve_base_url(Some("https://staging.example.com/"), true, Platform::Android, None),
        "https://staging.example.com"
    );
    // empty override is the same as unset
    assert_eq!(
        resolve_base_url(Some(""), false, Platform::Desktop, None),
        PROD_URL
    );
    assert_eq!(
        resolve_base_url(None, false, Platform::Android, None),
        PROD_URL
    );
    assert_eq!(
        resolve_base_url(None, true, Platform::Android, None),
        DEV_ANDROID_URL
    );
    assert_eq!(
        resolve_base_url(None, true, Platform::Web, Some("192.168.1.20")),
        "http://192.168.1.20:5000"
    );
    assert_eq!(
        resolve_base_url(None, true, Platform::Web, None),
        DEV_DEFAULT_URL
    );
    assert_eq!(
        resolve_base_url(None, true, Platform::Ios, Some("ignored")),
        DEV_DEFAULT_URL
    );
}

#[test]
fn test_platform() {
    assert_eq!(Platform::from_str("Android").unwrap(), Platform::Android);
    assert_eq!(Platform::from_str("web").unwrap(), Platform::Web);
    assert!(Platform::from_str("").is_err());
    assert!(Platform::from_str("symbian").is_err());
}

#[test]
fn test_image_url() {
    let config = ApiConfig::new("http://localhost:5000/");
    assert_eq!(config.base_url, "http://localhost:5000");
    assert_eq!(config.image_url(""), None);
    assert_eq!(
        config.image_url("https://cdn.example.com/a.png").as_deref(),
        Some("https://cdn.example.com/a.png")
    );
    assert_eq!(
        config.image_url("uploads\\abc\\me.jpg").as_deref(),
        Some("http://localhost:5000/uploads/abc/me.jpg")
    );
    assert_eq!(
        config.image_url("/uploads/me.jpg").as_deref(),
        Some("http://localhost:5000/uploads/me.jpg")
    );
}
