//! Configuration Module
//!
//! Environment-driven settings with workable defaults.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the loyalty backend, no trailing path prefix.
    pub api_base_url: String,
    /// Directory for the session document and logs.
    pub data_dir: PathBuf,
    /// Client-wide HTTP timeout; also bounds the token refresh call.
    pub http_timeout: Duration,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Self {
        let api_base_url =
            std::env::var("LOYALTY_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let data_dir = std::env::var("LOYALTY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let http_timeout = std::env::var("LOYALTY_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));

        Self {
            api_base_url,
            data_dir,
            http_timeout,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("LoyaltyCompanion")
}
