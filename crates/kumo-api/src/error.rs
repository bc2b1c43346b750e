use thiserror::Error;

/// Top-level error type for the `kumo-api` crate.
///
/// Covers every failure mode across both API surfaces:
/// authentication, HTTP transport, REST responses, and the socket stream.
/// `kumo-core` maps these into domain diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login or token refresh failed (wrong credentials, revoked token).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Refresh token missing or expired -- a full login is required.
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    ClientBuild(String),

    /// Rate limited by the cloud. Includes retry-after in seconds.
    #[error("Rate limited -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // ── REST API ────────────────────────────────────────────────────
    /// Non-success status returned by Kumo Cloud.
    #[error("Kumo Cloud API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// A site-scoped call was made without a site identifier.
    #[error("Site ID is required for {operation}")]
    MissingSite { operation: &'static str },

    // ── Socket ──────────────────────────────────────────────────────
    /// Socket connection or handshake failed.
    #[error("Socket connection failed: {0}")]
    SocketConnect(String),

    /// Socket closed by the server.
    #[error("Socket closed (code {code}): {reason}")]
    SocketClosed { code: u16, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::SessionExpired)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::RateLimited { .. }
            | Self::SocketConnect(_)
            | Self::SocketClosed { .. } => true,
            Self::Api { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }

    /// Returns `true` if the server understood the request and refused it.
    ///
    /// These failures are final: retrying the same payload will not help.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Api { status, .. } if (400..500).contains(status) && !matches!(status, 401 | 408 | 429))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Api {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_transient());
        assert!(!err.is_rejection());
    }

    #[test]
    fn client_errors_are_rejections() {
        let err = Error::Api {
            status: 400,
            message: "invalid setpoint".into(),
        };
        assert!(err.is_rejection());
        assert!(!err.is_transient());
    }

    #[test]
    fn throttling_is_not_a_rejection() {
        let err = Error::Api {
            status: 429,
            message: "slow down".into(),
        };
        assert!(!err.is_rejection());

        let timeout = Error::Api {
            status: 408,
            message: "timeout".into(),
        };
        assert!(timeout.is_transient());
        assert!(!timeout.is_rejection());
    }
}
