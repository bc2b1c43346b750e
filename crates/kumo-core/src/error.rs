// ── Core error types ──
//
// User-facing errors from kumo-core. Consumers never see HTTP status codes
// or socket frames directly; `From<kumo_api::Error>` and the source error
// conversions translate transport failures into domain variants.

use thiserror::Error;

use crate::source::{CommandError, TransportError};
use crate::store::Rejection;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Data errors ─────────────────────────────────────────────────
    #[error("Device not found: {serial}")]
    DeviceNotFound { serial: String },

    #[error("Field {field} is read-only")]
    ReadOnlyField { field: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Command contains no field writes")]
    EmptyCommand,

    // ── Command errors ──────────────────────────────────────────────
    #[error("Command for {serial} rejected by Kumo Cloud: {message}")]
    CommandRejected { serial: String, message: String },

    #[error("Command for {serial} failed: {message}")]
    CommandFailed { serial: String, message: String },

    // ── Transport errors ────────────────────────────────────────────
    #[error("Kumo Cloud unreachable: {message}")]
    Transport { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── Lifecycle ───────────────────────────────────────────────────
    #[error("Coordinator is shut down")]
    Shutdown,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` when retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::CommandFailed { .. })
    }
}

// ── Conversion from transport-layer errors ──────────────────────────

impl From<kumo_api::Error> for CoreError {
    fn from(err: kumo_api::Error) -> Self {
        match err {
            kumo_api::Error::Authentication { message } => CoreError::AuthenticationFailed { message },
            kumo_api::Error::SessionExpired => CoreError::AuthenticationFailed {
                message: "Session expired -- re-authentication required".into(),
            },
            kumo_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            kumo_api::Error::ClientBuild(message) => CoreError::Config { message },
            kumo_api::Error::MissingSite { operation } => CoreError::Config {
                message: format!("A site id is required for {operation}"),
            },
            kumo_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            other => CoreError::Transport {
                message: other.to_string(),
            },
        }
    }
}

impl From<TransportError> for CoreError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Auth(message) => CoreError::AuthenticationFailed { message },
            TransportError::Failed(message) => CoreError::Transport { message },
        }
    }
}

impl CoreError {
    pub(crate) fn from_command(serial: &str, err: CommandError) -> Self {
        match err {
            CommandError::Rejected(message) => CoreError::CommandRejected {
                serial: serial.to_owned(),
                message,
            },
            CommandError::Transient(message) => CoreError::CommandFailed {
                serial: serial.to_owned(),
                message,
            },
        }
    }

    pub(crate) fn from_rejection(serial: &str, field: &str, rejection: Rejection) -> Self {
        match rejection {
            Rejection::UnknownDevice => CoreError::DeviceNotFound {
                serial: serial.to_owned(),
            },
            Rejection::KindMismatch => CoreError::InvalidValue {
                field: field.to_owned(),
                message: rejection.to_string(),
            },
            Rejection::Stale => CoreError::Internal(format!("optimistic write to {field} was refused as stale")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_domain_variants() {
        let auth: CoreError = kumo_api::Error::SessionExpired.into();
        assert!(matches!(auth, CoreError::AuthenticationFailed { .. }));

        let api: CoreError = kumo_api::Error::Api {
            status: 503,
            message: "unavailable".into(),
        }
        .into();
        assert!(api.is_transient());
    }

    #[test]
    fn command_errors_keep_the_serial() {
        let err = CoreError::from_command("A1", CommandError::Rejected("bad setpoint".into()));
        assert_eq!(
            err.to_string(),
            "Command for A1 rejected by Kumo Cloud: bad setpoint"
        );
    }
}
