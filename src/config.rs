use std::time::Duration;

use crate::io::export::{DEFAULT_EXPORT_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_STORAGE_BUCKET};

/// Deployment environment, switching service-to-service auth on or off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Production,
}

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the orchestrating backend, also the token audience
    pub backend_api_url: String,
    /// Storage bucket receiving exported rasters
    pub storage_bucket: String,
    pub environment: Environment,
    pub export_poll_interval: Duration,
    pub export_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_api_url: "http://localhost:8000".to_string(),
            storage_bucket: DEFAULT_STORAGE_BUCKET.to_string(),
            environment: Environment::Local,
            export_poll_interval: DEFAULT_POLL_INTERVAL,
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
        }
    }
}

impl Settings {
    /// Read settings from the process environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Self {
            backend_api_url: std::env::var("BACKEND_API_URL")
                .unwrap_or(defaults.backend_api_url),
            storage_bucket: std::env::var("STORAGE_BUCKET").unwrap_or(defaults.storage_bucket),
            environment: match std::env::var("WORKER_ENV").as_deref() {
                Ok("production") => Environment::Production,
                _ => Environment::Local,
            },
            export_poll_interval: env_secs("EXPORT_POLL_INTERVAL_SECS")
                .unwrap_or(defaults.export_poll_interval),
            export_timeout: env_secs("EXPORT_TIMEOUT_SECS").unwrap_or(defaults.export_timeout),
        }
    }

    pub fn is_local(&self) -> bool {
        self.environment == Environment::Local
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key).ok()?.parse::<u64>().ok().map(Duration::from_secs)
}
