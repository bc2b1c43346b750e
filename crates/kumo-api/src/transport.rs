// Shared transport configuration for building reqwest::Client instances.
//
// Kumo Cloud rejects requests that don't look like the mobile app, so every
// client carries the same default header set.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Production REST endpoint.
pub const BASE_URL: &str = "https://app-prod.kumocloud.com";

/// Production Socket.IO endpoint.
pub const SOCKET_URL: &str = "https://socket-prod.kumocloud.com";

/// App version reported to the cloud (captured from mobile app traffic).
pub const APP_VERSION: &str = "3.2.4";

const USER_AGENT: &str = "kumocloud/1237 CFNetwork/3860.200.71 Darwin/25.1.0";

const DEFAULT_HEADERS: &[(&str, &str)] = &[
    ("accept", "application/json"),
    ("accept-language", "en-US,en;q=0.9"),
    ("x-app-version", APP_VERSION),
    ("app-env", "prd"),
    ("cache-control", "no-cache, no-store"),
    ("x-allow-cache", "false"),
];

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: USER_AGENT.into(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str())
            .default_headers(default_headers())
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| crate::error::Error::ClientBuild(format!("failed to build HTTP client: {e}")))
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in DEFAULT_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    headers
}
