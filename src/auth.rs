use crate::AuthSettings;
use url::Url;

/// Decides whether a caller may use the screenshot endpoint
///
/// Checks run in order and the first match wins: bypass flag, API key,
/// referer hostname. Missing configuration never errors, it just denies.
#[derive(Debug, Clone, Default)]
pub struct AccessGuard {
    api_key: Option<String>,
    allowed_origins: Vec<String>,
    bypass: bool,
}

impl AccessGuard {
    pub fn new(settings: &AuthSettings) -> Self {
        Self {
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            allowed_origins: settings.allowed_origins.clone(),
            bypass: settings.bypass,
        }
    }

    pub fn is_authorized(&self, referer: Option<&str>, key: Option<&str>) -> bool {
        if self.bypass {
            return true;
        }

        if self.is_valid_key(key) {
            return true;
        }

        self.is_allowed_referer(referer)
    }

    /// API key only, for operations a browser page should not trigger
    pub fn is_key_authorized(&self, key: Option<&str>) -> bool {
        self.bypass || self.is_valid_key(key)
    }

    fn is_valid_key(&self, key: Option<&str>) -> bool {
        match (key, &self.api_key) {
            (Some(key), Some(secret)) if !key.is_empty() => key == secret,
            _ => false,
        }
    }

    fn is_allowed_referer(&self, referer: Option<&str>) -> bool {
        let Some(referer) = referer else {
            return false;
        };

        let Ok(parsed) = Url::parse(referer) else {
            tracing::debug!("Ignoring unparsable referer: {}", referer);
            return false;
        };

        match parsed.host_str() {
            Some(host) => self.allowed_origins.iter().any(|allowed| allowed == host),
            None => false,
        }
    }
}
