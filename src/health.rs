use crate::SessionStatus;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    /// The browser was launched but its protocol handler has exited.
    /// The next render relaunches it.
    Degraded,
}

/// Body of `GET /healthz`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthLevel,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub browser: SessionStatus,
    pub cache_entries: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    pub fn new(browser: SessionStatus, cache_entries: usize, uptime: Duration) -> Self {
        let status = if browser.launched && !browser.handler_alive {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };

        Self {
            status,
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: uptime.as_secs(),
            browser,
            cache_entries,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_launched_is_healthy() {
        let report = HealthReport::new(SessionStatus::default(), 0, Duration::from_secs(5));
        assert_eq!(report.status, HealthLevel::Healthy);
        assert_eq!(report.uptime_secs, 5);
    }

    #[test]
    fn test_dead_handler_is_degraded() {
        let browser = SessionStatus {
            launched: true,
            handler_alive: false,
            launches: 1,
            uptime_secs: Some(60),
            open_pages: None,
        };
        let report = HealthReport::new(browser, 3, Duration::from_secs(90));
        assert_eq!(report.status, HealthLevel::Degraded);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["cache_entries"], 3);
        assert_eq!(json["browser"]["launches"], 1);
        assert!(json["browser"]["open_pages"].is_null());
    }
}
