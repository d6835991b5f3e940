//! Lazily launched, process-wide Chrome session
//!
//! One browser process serves every request. It is launched on first use and
//! reused afterwards; each render opens its own page on it. The slot is held
//! under a mutex for the whole launch, so concurrent first requests start
//! exactly one browser. In production mode without a configured executable
//! the pinned Chromium build is downloaded before the first launch.

use crate::{create_browser_config, BrowserSettings, RenderError};
use chromiumoxide::browser::Browser;
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

struct LaunchedBrowser {
    browser: Arc<Mutex<Browser>>,
    /// Background task driving the Chrome DevTools Protocol connection
    handler: JoinHandle<()>,
    launched_at: Instant,
}

impl LaunchedBrowser {
    fn handle(&self) -> BrowserHandle {
        BrowserHandle {
            browser: self.browser.clone(),
        }
    }

    async fn shutdown(self) {
        if let Err(e) = self.browser.lock().await.close().await {
            warn!("Browser did not close cleanly: {}", e);
        }
        self.handler.abort();
    }
}

/// Cheap clone of the shared browser, valid while the session keeps it
#[derive(Clone)]
pub struct BrowserHandle {
    browser: Arc<Mutex<Browser>>,
}

impl BrowserHandle {
    /// Open a blank page owned by the caller
    pub async fn new_page(&self) -> Result<Page, RenderError> {
        let browser = self.browser.lock().await;
        browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::PageError(e.to_string()))
    }

    /// Number of pages the browser currently has open
    pub async fn page_count(&self) -> Result<usize, RenderError> {
        let browser = self.browser.lock().await;
        browser
            .pages()
            .await
            .map(|pages| pages.len())
            .map_err(|e| RenderError::PageError(e.to_string()))
    }
}

/// Download the pinned Chromium build into `dir`, or reuse a previous download
pub async fn fetch_browser(dir: &Path) -> Result<PathBuf, RenderError> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        RenderError::BrowserLaunchFailed(format!("cannot create {}: {}", dir.display(), e))
    })?;

    let options = BrowserFetcherOptions::builder()
        .with_path(dir)
        .build()
        .map_err(|e| RenderError::BrowserLaunchFailed(e.to_string()))?;

    info!("Fetching Chromium into {}", dir.display());
    let installation = BrowserFetcher::new(options)
        .fetch()
        .await
        .map_err(|e| RenderError::BrowserLaunchFailed(format!("browser download failed: {e}")))?;

    info!("Using Chromium at {}", installation.executable_path.display());
    Ok(installation.executable_path)
}

/// Snapshot of the session for health reporting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub launched: bool,
    pub handler_alive: bool,
    pub launches: usize,
    pub uptime_secs: Option<u64>,
    pub open_pages: Option<usize>,
}

pub struct BrowserSession {
    settings: BrowserSettings,
    slot: Mutex<Option<LaunchedBrowser>>,
    launches: AtomicUsize,
}

impl BrowserSession {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            slot: Mutex::new(None),
            launches: AtomicUsize::new(0),
        }
    }

    /// Return the shared browser, launching it if needed
    ///
    /// A browser whose protocol handler has exited is treated as dead and
    /// replaced.
    pub async fn acquire(&self) -> Result<BrowserHandle, RenderError> {
        let mut slot = self.slot.lock().await;

        if let Some(existing) = slot.as_ref() {
            if !existing.handler.is_finished() {
                return Ok(existing.handle());
            }

            warn!(
                "Browser handler exited after {:?}, relaunching",
                existing.launched_at.elapsed()
            );
            if let Some(stale) = slot.take() {
                stale.shutdown().await;
            }
        }

        let launched = self.launch().await?;
        let handle = launched.handle();
        *slot = Some(launched);
        Ok(handle)
    }

    async fn launch(&self) -> Result<LaunchedBrowser, RenderError> {
        let mut settings = self.settings.clone();
        if settings.fetches_browser() {
            let executable = fetch_browser(&settings.download_dir()).await?;
            settings.chrome_path = Some(executable.to_string_lossy().into_owned());
        }

        let config = create_browser_config(&settings)
            .map_err(|e| RenderError::BrowserLaunchFailed(e.to_string()))?;

        info!("Launching browser ({:?} mode)", self.settings.launch_mode);
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::BrowserLaunchFailed(e.to_string()))?;

        // The handler implements Stream and must be polled for the browser to make progress
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("Browser handler error: {}", e);
                    break;
                }
            }
            info!("Browser handler stream ended");
        });

        let launches = self.launches.fetch_add(1, Ordering::Relaxed) + 1;
        crate::metrics::record_browser_launch();
        info!("Browser launched (launch #{})", launches);

        Ok(LaunchedBrowser {
            browser: Arc::new(Mutex::new(browser)),
            handler,
            launched_at: Instant::now(),
        })
    }

    pub async fn status(&self) -> SessionStatus {
        let slot = self.slot.lock().await;
        let launches = self.launches.load(Ordering::Relaxed);

        match slot.as_ref() {
            Some(launched) => {
                let handler_alive = !launched.handler.is_finished();
                let open_pages = if handler_alive {
                    launched.handle().page_count().await.ok()
                } else {
                    None
                };

                SessionStatus {
                    launched: true,
                    handler_alive,
                    launches,
                    uptime_secs: Some(launched.launched_at.elapsed().as_secs()),
                    open_pages,
                }
            }
            None => SessionStatus {
                launches,
                ..Default::default()
            },
        }
    }

    pub async fn shutdown(&self) {
        let launched = self.slot.lock().await.take();
        if let Some(launched) = launched {
            info!("Shutting down browser...");
            launched.shutdown().await;
            info!("Browser shutdown complete");
        }
    }
}
