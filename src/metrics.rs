//! Counters and histograms for the screenshot pipeline
//!
//! The macros are no-ops until a recorder is installed, so library code and
//! tests can call these unconditionally. The binary installs the Prometheus
//! recorder when `metrics_enabled` is set.

use metrics::{histogram, increment_counter};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

/// Final outcome of one `/api/screenshot` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Served,
    Invalid,
    Unauthorized,
    Failed,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::Served => "served",
            RequestOutcome::Invalid => "invalid",
            RequestOutcome::Unauthorized => "unauthorized",
            RequestOutcome::Failed => "failed",
        }
    }
}

pub fn record_request(outcome: RequestOutcome) {
    increment_counter!("screenshot_requests_total", "outcome" => outcome.as_str());
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    increment_counter!("screenshot_cache_total", "result" => result);
}

pub fn record_render(duration: Duration, failure_stage: Option<&'static str>) {
    histogram!("screenshot_render_duration_seconds", duration.as_secs_f64());

    if let Some(stage) = failure_stage {
        increment_counter!("screenshot_render_failures_total", "stage" => stage);
    }
}

pub fn record_browser_launch() {
    increment_counter!("browser_launches_total");
}

pub fn record_cache_evictions(count: usize) {
    if count > 0 {
        metrics::counter!("screenshot_cache_evictions_total", count as u64);
    }
}

/// Install the global Prometheus recorder and return the handle used by `/metrics`
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("Prometheus recorder installed");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(RequestOutcome::Served.as_str(), "served");
        assert_eq!(RequestOutcome::Unauthorized.as_str(), "unauthorized");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_request(RequestOutcome::Failed);
        record_cache_lookup(true);
        record_render(Duration::from_millis(120), Some("navigation"));
        record_cache_evictions(3);
    }
}
