//! Configuration management with serde serialization/deserialization
//!
//! This module provides all configuration structures for the screenshot service,
//! including server binding, access control, browser launch settings, render
//! wait policy, cache lifetime and the defaults substituted into requests.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the screenshot service
///
/// Built in three layers: defaults (or a JSON file), environment overrides
/// via [`Config::apply_env`], then command-line flags.
///
/// # Examples
///
/// ```rust
/// use screenshot_maker::Config;
///
/// // Use default configuration
/// let config = Config::default();
/// assert_eq!(config.server.port, 3000);
///
/// // Override a single section
/// let config = Config {
///     metrics_enabled: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener settings
    pub server: ServerSettings,

    /// API key / referer allow-list settings
    pub auth: AuthSettings,

    /// Browser launch settings
    pub browser: BrowserSettings,

    /// Page load and capture behaviour
    pub render: RenderSettings,

    /// Response cache lifetime and bounds
    pub cache: CacheSettings,

    /// Values substituted for parameters the caller left out
    pub defaults: RequestDefaults,

    /// Install the Prometheus recorder and serve `/metrics` (default: false)
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind (default: 0.0.0.0)
    pub bind: String,

    /// Port to listen on (default: 3000)
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Access control settings
///
/// A request is authorized when `bypass` is set, when its key equals
/// `api_key`, or when its referer hostname is listed in `allowed_origins`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Shared secret accepted in the `key` query parameter
    pub api_key: Option<String>,

    /// Referer hostnames allowed to call the service without a key
    pub allowed_origins: Vec<String>,

    /// Authorize every request. Local development only.
    pub bypass: bool,
}

/// How the browser binary is located and launched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    /// Headless with the argument set for sandboxed/serverless hosts, using
    /// a downloaded Chromium unless `chrome_path` is set
    Production,
    /// Headless against the locally installed Chrome
    #[default]
    Development,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub launch_mode: LaunchMode,

    /// Path to Chrome/Chromium executable (default: auto-detect, or a
    /// downloaded Chromium in production mode)
    pub chrome_path: Option<String>,

    /// Where production mode keeps the downloaded Chromium
    /// (default: `<temp dir>/screenshot-maker-chromium`)
    pub download_dir: Option<PathBuf>,

    /// Extra command-line switches appended after the built-in set
    pub extra_args: Vec<String>,

    /// Custom User-Agent string for page loads
    pub user_agent: Option<String>,
}

/// When a page counts as ready for capture
///
/// Navigation waits for the `load` event, bounded by `navigation_timeout`,
/// then sleeps for `settle_delay` so late scripts can paint. The delay is a
/// heuristic, not a guarantee that rendering finished.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WaitPolicy {
    /// Upper bound for navigation (default: 10s)
    #[serde(with = "humantime_serde")]
    pub navigation_timeout: Duration,

    /// Pause between the load event and capture (default: 1s)
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(1),
        }
    }
}

/// How sub-1.0 scale factors are applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleStrategy {
    /// Capture lossless at full resolution, downsize with Lanczos3
    #[default]
    Resample,
    /// Let Chrome clip and scale the capture region
    BrowserClip,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderSettings {
    pub wait: WaitPolicy,

    pub scale_strategy: ScaleStrategy,

    /// Maximum pages rendering at once in the shared browser (default: 8)
    pub max_concurrent_renders: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            wait: WaitPolicy::default(),
            scale_strategy: ScaleStrategy::default(),
            max_concurrent_renders: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Lifetime of a rendered image, also sent as `max-age` (default: 1h)
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Optional entry bound. `None` keeps the cache unbounded.
    pub max_entries: Option<usize>,

    /// How often expired entries are swept (default: 5m)
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: None,
            sweep_interval: Duration::from_secs(300),
        }
    }
}

/// Supported output image formats for screenshots
///
/// - PNG: lossless, `quality` is ignored
/// - JPEG: lossy, no alpha channel
/// - WebP: lossy encoding through libwebp
/// - AVIF: lossy AV1 still image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
    Avif,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Png,
        OutputFormat::Jpeg,
        OutputFormat::Webp,
        OutputFormat::Avif,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.as_str() == value)
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Avif => "image/avif",
        }
    }

    /// Whether the `quality` parameter changes the encoded output
    pub fn is_lossy(&self) -> bool {
        !matches!(self, OutputFormat::Png)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browser viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Values used when a request leaves a parameter out
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestDefaults {
    pub width: u32,
    pub height: u32,
    pub scale: f64,
    pub quality: u8,
    pub full_page: bool,
    pub format: OutputFormat,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            width: 1512,
            height: 982,
            scale: 0.25,
            quality: 50,
            full_page: false,
            format: OutputFormat::Png,
        }
    }
}

impl Config {
    /// Load a JSON configuration file. Missing fields keep their defaults.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    ///
    /// Recognised variables: `API_KEY`, `ALLOWED_ORIGINS` (JSON array of
    /// hostnames), `BYPASS_AUTH_CHECK`, `APP_ENV`, `CHROME_EXECUTABLE_PATH`
    /// and `PORT`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("API_KEY").filter(|k| !k.is_empty()) {
            self.auth.api_key = Some(key);
        }

        if let Some(raw) = lookup("ALLOWED_ORIGINS").filter(|v| !v.trim().is_empty()) {
            self.auth.allowed_origins =
                serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidEnv {
                    name: "ALLOWED_ORIGINS",
                    reason: format!("expected a JSON array of hostnames: {e}"),
                })?;
        }

        if let Some(flag) = lookup("BYPASS_AUTH_CHECK") {
            self.auth.bypass = flag == "true";
        }

        if let Some(env) = lookup("APP_ENV") {
            self.browser.launch_mode = if env == "production" {
                LaunchMode::Production
            } else {
                LaunchMode::Development
            };
        }

        if let Some(path) = lookup("CHROME_EXECUTABLE_PATH").filter(|p| !p.is_empty()) {
            self.browser.chrome_path = Some(path);
        }

        if let Some(port) = lookup("PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "PORT",
                reason: format!("'{port}' is not a valid port"),
            })?;
        }

        Ok(())
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("port must be greater than 0".into()));
        }

        if self.render.max_concurrent_renders == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_renders must be greater than 0".into(),
            ));
        }

        if self.cache.ttl.is_zero() {
            return Err(ConfigError::Invalid("cache ttl must be greater than 0".into()));
        }

        if self.cache.max_entries == Some(0) {
            return Err(ConfigError::Invalid(
                "cache max_entries must be greater than 0 when set".into(),
            ));
        }

        let defaults = &self.defaults;
        if defaults.width == 0 || defaults.height == 0 {
            return Err(ConfigError::Invalid(
                "default viewport dimensions must be greater than 0".into(),
            ));
        }

        if !(0.1..=1.0).contains(&defaults.scale) {
            return Err(ConfigError::Invalid(
                "default scale must be between 0.1 and 1".into(),
            ));
        }

        if !(1..=100).contains(&defaults.quality) {
            return Err(ConfigError::Invalid(
                "default quality must be between 1 and 100".into(),
            ));
        }

        Ok(())
    }
}

impl BrowserSettings {
    /// Whether launching needs a downloaded browser binary
    pub fn fetches_browser(&self) -> bool {
        self.launch_mode == LaunchMode::Production && self.chrome_path.is_none()
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("screenshot-maker-chromium"))
    }
}

/// Generate Chrome command-line arguments for the configured launch mode
///
/// Production mode carries the switch set tuned for constrained hosts:
/// no sandbox, no `/dev/shm` reliance, no GPU, single renderer process.
/// Development mode keeps Chrome close to its defaults.
///
/// # Examples
///
/// ```rust
/// use screenshot_maker::{BrowserSettings, LaunchMode, get_chrome_args};
///
/// let settings = BrowserSettings {
///     launch_mode: LaunchMode::Production,
///     ..Default::default()
/// };
/// let args = get_chrome_args(&settings);
/// assert!(args.contains(&"--disable-dev-shm-usage".to_string()));
/// ```
pub fn get_chrome_args(settings: &BrowserSettings) -> Vec<String> {
    // Headless is already the builder default
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-setuid-sandbox".to_string(),
    ];

    if settings.launch_mode == LaunchMode::Production {
        args.extend(
            [
                "--disable-dev-shm-usage",
                "--disable-gpu",
                "--no-zygote",
                "--single-process",
                "--no-first-run",
                "--disable-extensions",
                "--disable-background-networking",
                "--disable-default-apps",
                "--disable-sync",
                "--hide-scrollbars",
                "--mute-audio",
            ]
            .map(String::from),
        );
    }

    if let Some(user_agent) = &settings.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args.extend(settings.extra_args.iter().cloned());
    args
}

/// Build the chromiumoxide launch configuration
pub fn create_browser_config(
    settings: &BrowserSettings,
) -> Result<chromiumoxide::browser::BrowserConfig, ConfigError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder().args(get_chrome_args(settings));

    if let Some(chrome_path) = &settings.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(ConfigError::Invalid)
}
