//! Turns a validated [`ScreenshotRequest`] into encoded image bytes
//!
//! [`ChromeRenderer`] drives the shared browser session. The [`Renderer`]
//! trait is the seam the HTTP layer depends on, so handlers can be exercised
//! without a browser.

use crate::imaging::{self, EncodeOptions};
use crate::{
    BrowserSession, OutputFormat, RenderError, RenderSettings, ScaleStrategy, ScreenshotRequest,
    SessionStatus,
};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport as ClipRegion};
use chromiumoxide::page::{Page, ScreenshotParams};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render `request` to bytes in the requested format
    async fn render(&self, request: &ScreenshotRequest) -> Result<Vec<u8>, RenderError>;

    /// State of the underlying browser, for health reporting
    async fn status(&self) -> SessionStatus;
}

/// What the browser captures and what happens to the bytes afterwards
#[derive(Debug, Clone, PartialEq)]
pub struct CapturePlan {
    /// Format requested from Chrome. Never AVIF, which Chrome cannot emit.
    pub browser_format: OutputFormat,
    pub browser_quality: Option<u8>,
    /// Scale applied by Chrome to a viewport-sized clip region
    pub clip_scale: Option<f64>,
    pub full_page: bool,
    /// Re-encoding step, `None` when the browser output is final
    pub post_process: Option<EncodeOptions>,
}

/// Decide how `request` is captured under `strategy`
pub fn plan_capture(request: &ScreenshotRequest, strategy: ScaleStrategy) -> CapturePlan {
    let scale = request.effective_scale();
    let scaled = scale < 1.0;
    let quality = request.effective_quality();

    match strategy {
        ScaleStrategy::Resample => {
            let resize_to =
                scaled.then(|| imaging::scaled_dimensions(request.viewport, scale));
            let needs_processing = resize_to.is_some() || request.format != OutputFormat::Png;

            CapturePlan {
                browser_format: OutputFormat::Png,
                browser_quality: None,
                clip_scale: None,
                full_page: request.full_page,
                post_process: needs_processing.then_some(EncodeOptions {
                    format: request.format,
                    quality,
                    resize_to,
                }),
            }
        }
        ScaleStrategy::BrowserClip => {
            let clip_scale = scaled.then_some(scale);

            if request.format == OutputFormat::Avif {
                CapturePlan {
                    browser_format: OutputFormat::Png,
                    browser_quality: None,
                    clip_scale,
                    full_page: request.full_page,
                    post_process: Some(EncodeOptions {
                        format: OutputFormat::Avif,
                        quality,
                        resize_to: None,
                    }),
                }
            } else {
                CapturePlan {
                    browser_format: request.format,
                    browser_quality: quality,
                    clip_scale,
                    full_page: request.full_page,
                    post_process: None,
                }
            }
        }
    }
}

fn capture_format(format: OutputFormat) -> CaptureScreenshotFormat {
    match format {
        OutputFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        OutputFormat::Webp => CaptureScreenshotFormat::Webp,
        OutputFormat::Png | OutputFormat::Avif => CaptureScreenshotFormat::Png,
    }
}

/// Renderer backed by the process-wide Chrome session
pub struct ChromeRenderer {
    session: Arc<BrowserSession>,
    settings: RenderSettings,
    limiter: Arc<Semaphore>,
}

impl ChromeRenderer {
    pub fn new(session: Arc<BrowserSession>, settings: RenderSettings) -> Self {
        let permits = settings.max_concurrent_renders.max(1);
        Self {
            session,
            settings,
            limiter: Arc::new(Semaphore::new(permits)),
        }
    }

    async fn capture(&self, page: &Page, request: &ScreenshotRequest) -> Result<Vec<u8>, RenderError> {
        let viewport = request.viewport;
        let device_metrics = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width as i64)
            .height(viewport.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(RenderError::PageError)?;
        page.execute(device_metrics)
            .await
            .map_err(|e| RenderError::PageError(e.to_string()))?;

        let wait = &self.settings.wait;
        match timeout(wait.navigation_timeout, page.goto(request.url.as_str())).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(RenderError::NavigationFailed(e.to_string())),
            Err(_) => return Err(RenderError::NavigationTimeout(wait.navigation_timeout)),
        }
        sleep(wait.settle_delay).await;

        let plan = plan_capture(request, self.settings.scale_strategy);
        debug!("Capture plan for {}: {:?}", request.url, plan);

        let mut params = ScreenshotParams::builder()
            .format(capture_format(plan.browser_format))
            .full_page(plan.full_page);
        if let Some(quality) = plan.browser_quality {
            params = params.quality(quality as i64);
        }
        if let Some(scale) = plan.clip_scale {
            params = params.clip(ClipRegion {
                x: 0.0,
                y: 0.0,
                width: viewport.width as f64,
                height: viewport.height as f64,
                scale,
            });
        }

        let captured = page
            .screenshot(params.build())
            .await
            .map_err(|e| RenderError::CaptureFailed(e.to_string()))?;

        match plan.post_process {
            None => Ok(captured),
            Some(options) => tokio::task::spawn_blocking(move || {
                imaging::process(&captured, &options)
            })
            .await
            .map_err(|e| RenderError::EncodeFailed(e.to_string()))?,
        }
    }
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn render(&self, request: &ScreenshotRequest) -> Result<Vec<u8>, RenderError> {
        let start = Instant::now();
        let _permit = self.limiter.acquire().await?;

        let result = async {
            let browser = self.session.acquire().await?;
            let page = browser.new_page().await?;
            let captured = self.capture(&page, request).await;

            if let Err(e) = page.close().await {
                warn!("Failed to close page for {}: {}", request.url, e);
            }
            captured
        }
        .await;

        crate::metrics::record_render(
            start.elapsed(),
            result.as_ref().err().map(RenderError::stage),
        );
        result
    }

    async fn status(&self) -> SessionStatus {
        self.session.status().await
    }
}
