//! # Screenshot Maker
//!
//! An HTTP service that renders a web page in headless Chrome and returns the
//! capture as PNG, JPEG, WebP or AVIF. One `GET /api/screenshot` call carries
//! everything: target URL, viewport, downscale factor, encoder quality,
//! full-page flag, output type and an optional API key.
//!
//! ## Request pipeline
//!
//! | Step | Module | Failure |
//! |------|--------|---------|
//! | Parse and check query parameters | [`validation`] | 400 with every field issue |
//! | API key or referer allow-list | [`auth`] | 401 |
//! | Cache lookup keyed on effective parameters | [`cache`] | |
//! | Render in the shared browser | [`renderer`], [`browser_session`] | 500, cause only logged |
//! | Downscale and encode | [`imaging`] | 500 |
//!
//! A single browser process is launched on first use and shared by every
//! request. Each render opens and closes its own page, and the number of
//! pages rendering at once is bounded by `render.max_concurrent_renders`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use screenshot_maker::{AppState, BrowserSession, ChromeRenderer, Config};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let session = Arc::new(BrowserSession::new(config.browser.clone()));
//!     let renderer = Arc::new(ChromeRenderer::new(session.clone(), config.render.clone()));
//!     let state = Arc::new(AppState::new(config, renderer, None));
//!
//!     let addr = "127.0.0.1:3000".parse()?;
//!     screenshot_maker::server::serve(state, addr, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ### Run the service
//! ```bash
//! API_KEY=secret screenshot-maker --port 3000
//! ```
//!
//! ### Build a screenshot link
//! ```bash
//! screenshot-maker url https://example.com --width 800 --height 600 --type webp --key secret
//! ```

/// Configuration and settings for the service
pub mod config;

/// Error types and their HTTP mapping
pub mod error;

/// Query parameter validation
pub mod validation;

/// API key and referer checks
pub mod auth;

/// Shared headless Chrome session
pub mod browser_session;

/// Post-capture resizing and encoding
pub mod imaging;

/// Page capture behind the `Renderer` trait
pub mod renderer;

/// Rendered image cache
pub mod cache;

/// HTTP routes and handlers
pub mod server;

/// Landing page and screenshot link builder
pub mod form;

/// Command-line interface implementation
pub mod cli;

/// Prometheus metrics recording
pub mod metrics;

/// Health report served at `/healthz`
pub mod health;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod tests;

pub use auth::*;
pub use browser_session::*;
pub use cache::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use form::*;
pub use health::*;
pub use renderer::*;
pub use server::*;
pub use utils::*;
pub use validation::*;
