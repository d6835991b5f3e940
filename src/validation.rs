//! Query parameter validation for the screenshot endpoint
//!
//! Validation is strict and reports every failing field at once. Defaults are
//! substituted afterwards by [`ValidatedParams::with_defaults`], so an error
//! response only ever talks about values the caller actually sent.

use crate::{OutputFormat, RequestDefaults, Viewport};
use serde::{Deserialize, Serialize};
use url::Url;

/// Raw query string as received, before any coercion
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawParams {
    pub url: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub scale: Option<String>,
    pub quality: Option<String>,
    #[serde(rename = "fullPage")]
    pub full_page: Option<String>,
    #[serde(rename = "type")]
    pub format: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    InvalidType,
    InvalidString,
    InvalidEnumValue,
    TooSmall,
    TooBig,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldIssue {
    pub code: IssueCode,
    pub path: Vec<String>,
    pub message: String,
}

impl FieldIssue {
    pub fn new(code: IssueCode, field: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            path: vec![field.to_string()],
            message: message.into(),
        }
    }

    pub fn field(&self) -> Option<&str> {
        self.path.first().map(String::as_str)
    }
}

/// Every problem found in one set of query parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    pub fn single(issue: FieldIssue) -> Self {
        Self { issues: vec![issue] }
    }

    /// Whether any issue is attached to `field`
    pub fn mentions(&self, field: &str) -> bool {
        self.issues.iter().any(|issue| issue.field() == Some(field))
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid query parameters")?;
        for (i, issue) in self.issues.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{}: {}", issue.path.join("."), issue.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Parameters that passed validation. `None` means the caller left it out.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedParams {
    pub url: Url,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub scale: Option<f64>,
    pub quality: Option<u8>,
    pub full_page: Option<bool>,
    pub format: Option<OutputFormat>,
    pub key: Option<String>,
}

/// A fully specified screenshot job
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotRequest {
    pub url: Url,
    pub viewport: Viewport,
    /// Downscale factor in [0.1, 1]
    pub scale: f64,
    /// Encoder quality in [1, 100], ignored for lossless formats
    pub quality: u8,
    pub full_page: bool,
    pub format: OutputFormat,
}

impl ScreenshotRequest {
    /// Scale actually applied to the capture. Full-page captures are never scaled.
    pub fn effective_scale(&self) -> f64 {
        if self.full_page {
            1.0
        } else {
            self.scale
        }
    }

    /// Quality actually passed to the encoder, `None` for lossless formats
    pub fn effective_quality(&self) -> Option<u8> {
        self.format.is_lossy().then_some(self.quality)
    }
}

impl ValidatedParams {
    pub fn with_defaults(self, defaults: &RequestDefaults) -> ScreenshotRequest {
        ScreenshotRequest {
            url: self.url,
            viewport: Viewport {
                width: self.width.unwrap_or(defaults.width),
                height: self.height.unwrap_or(defaults.height),
            },
            scale: self.scale.unwrap_or(defaults.scale),
            quality: self.quality.unwrap_or(defaults.quality),
            full_page: self.full_page.unwrap_or(defaults.full_page),
            format: self.format.unwrap_or(defaults.format),
        }
    }
}

/// Validate a raw parameter set
pub fn validate(raw: &RawParams) -> Result<ValidatedParams, ValidationError> {
    let mut issues = Vec::new();

    let url = parse_url(raw.url.as_deref(), &mut issues);
    let width = parse_integer(present(&raw.width), "width", 1, u32::MAX as u64, &mut issues)
        .map(|v| v as u32);
    let height = parse_integer(present(&raw.height), "height", 1, u32::MAX as u64, &mut issues)
        .map(|v| v as u32);
    let scale = parse_scale(present(&raw.scale), &mut issues);
    let quality =
        parse_integer(present(&raw.quality), "quality", 1, 100, &mut issues).map(|v| v as u8);
    let full_page = raw.full_page.as_deref().map(parse_flag);
    let format = parse_format(present(&raw.format), &mut issues);

    match (present(&raw.width), present(&raw.height)) {
        (Some(_), None) => issues.push(FieldIssue::new(
            IssueCode::Custom,
            "height",
            "Height is required when width is provided",
        )),
        (None, Some(_)) => issues.push(FieldIssue::new(
            IssueCode::Custom,
            "width",
            "Width is required when height is provided",
        )),
        _ => {}
    }

    match url {
        Some(url) if issues.is_empty() => Ok(ValidatedParams {
            url,
            width,
            height,
            scale,
            quality,
            full_page,
            format,
            key: raw.key.clone().filter(|k| !k.is_empty()),
        }),
        _ => Err(ValidationError { issues }),
    }
}

/// Empty strings count as absent
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_url(value: Option<&str>, issues: &mut Vec<FieldIssue>) -> Option<Url> {
    let Some(value) = value else {
        issues.push(FieldIssue::new(IssueCode::InvalidType, "url", "Required"));
        return None;
    };

    let url = crate::validate_url(value.trim());
    if url.is_none() {
        issues.push(FieldIssue::new(IssueCode::InvalidString, "url", "Invalid url"));
    }
    url
}

fn parse_number(value: &str, field: &str, issues: &mut Vec<FieldIssue>) -> Option<f64> {
    match value.parse::<f64>() {
        Ok(n) if n.is_finite() => Some(n),
        _ => {
            issues.push(FieldIssue::new(
                IssueCode::InvalidType,
                field,
                "Expected number, received nan",
            ));
            None
        }
    }
}

fn parse_integer(
    value: Option<&str>,
    field: &str,
    min: u64,
    max: u64,
    issues: &mut Vec<FieldIssue>,
) -> Option<u64> {
    let n = parse_number(value?, field, issues)?;

    if n < min as f64 {
        issues.push(FieldIssue::new(
            IssueCode::TooSmall,
            field,
            format!("Number must be greater than or equal to {min}"),
        ));
        return None;
    }
    if n > max as f64 {
        issues.push(FieldIssue::new(
            IssueCode::TooBig,
            field,
            format!("Number must be less than or equal to {max}"),
        ));
        return None;
    }
    if n.fract() != 0.0 {
        issues.push(FieldIssue::new(
            IssueCode::InvalidType,
            field,
            "Expected integer, received float",
        ));
        return None;
    }

    Some(n as u64)
}

fn parse_scale(value: Option<&str>, issues: &mut Vec<FieldIssue>) -> Option<f64> {
    let n = parse_number(value?, "scale", issues)?;

    if n < 0.1 {
        issues.push(FieldIssue::new(
            IssueCode::TooSmall,
            "scale",
            "Number must be greater than or equal to 0.1",
        ));
        None
    } else if n > 1.0 {
        issues.push(FieldIssue::new(
            IssueCode::TooBig,
            "scale",
            "Number must be less than or equal to 1",
        ));
        None
    } else {
        Some(n)
    }
}

/// String truthiness: any non-empty value is true, including "false"
fn parse_flag(value: &str) -> bool {
    !value.is_empty()
}

fn parse_format(value: Option<&str>, issues: &mut Vec<FieldIssue>) -> Option<OutputFormat> {
    let value = value?;
    let format = OutputFormat::parse(value);
    if format.is_none() {
        let expected = OutputFormat::ALL
            .iter()
            .map(|f| format!("'{f}'"))
            .collect::<Vec<_>>()
            .join(" | ");
        issues.push(FieldIssue::new(
            IssueCode::InvalidEnumValue,
            "type",
            format!("Invalid enum value. Expected {expected}, received '{value}'"),
        ));
    }
    format
}
