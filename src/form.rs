//! Landing page and the screenshot URL builder behind it

use crate::OutputFormat;
use url::Url;

/// Self-contained HTML page served at `/`
pub const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Builds `/api/screenshot` links the same way the form on [`INDEX_HTML`] does
///
/// Only set values are emitted: empty strings, zeros and `false` are left
/// out so the server applies its own defaults.
///
/// ```rust
/// use screenshot_maker::ScreenshotUrlBuilder;
///
/// let link = ScreenshotUrlBuilder::new("https://example.com")
///     .viewport(800, 600)
///     .build("http://localhost:3000")
///     .unwrap();
/// assert_eq!(
///     link.as_str(),
///     "http://localhost:3000/api/screenshot?url=https%3A%2F%2Fexample.com&width=800&height=600"
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreenshotUrlBuilder {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub scale: Option<f64>,
    pub quality: Option<u8>,
    pub full_page: bool,
    pub format: Option<OutputFormat>,
    pub key: Option<String>,
}

impl ScreenshotUrlBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn full_page(mut self, full_page: bool) -> Self {
        self.full_page = full_page;
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Resolve the endpoint against `base` and append the set parameters
    pub fn build(&self, base: &str) -> Result<Url, url::ParseError> {
        let mut link = Url::parse(base)?.join("/api/screenshot")?;

        let mut pairs: Vec<(&str, String)> = Vec::new();
        if !self.url.is_empty() {
            pairs.push(("url", self.url.clone()));
        }
        if let Some(width) = self.width.filter(|w| *w > 0) {
            pairs.push(("width", width.to_string()));
        }
        if let Some(height) = self.height.filter(|h| *h > 0) {
            pairs.push(("height", height.to_string()));
        }
        if let Some(scale) = self.scale.filter(|s| *s > 0.0) {
            pairs.push(("scale", scale.to_string()));
        }
        if let Some(quality) = self.quality.filter(|q| *q > 0) {
            pairs.push(("quality", quality.to_string()));
        }
        if self.full_page {
            pairs.push(("fullPage", "true".to_string()));
        }
        if let Some(format) = self.format {
            pairs.push(("type", format.as_str().to_string()));
        }
        if let Some(key) = self.key.as_deref().filter(|k| !k.is_empty()) {
            pairs.push(("key", key.to_string()));
        }

        if !pairs.is_empty() {
            link.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(link)
    }
}
