//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use kumo_config::ConfigError;
use kumo_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const REJECTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach Kumo Cloud: {message}")]
    #[diagnostic(
        code(kumo::connection_failed),
        help("Check your network connection, or retry with -vv for details.")
    )]
    ConnectionFailed { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(kumo::auth_failed),
        help(
            "Verify the account e-mail and password.\n\
             Run: kumo config set-password --profile {profile}"
        )
    )]
    AuthFailed { profile: String, message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(kumo::no_credentials),
        help(
            "Configure credentials with: kumo config init\n\
             Or set KUMO_USERNAME and KUMO_PASSWORD."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(kumo::not_found),
        help("Run: kumo {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Commands ─────────────────────────────────────────────────────
    #[error("Kumo Cloud rejected the command: {message}")]
    #[diagnostic(
        code(kumo::rejected),
        help("The local view was rolled back to the last value the cloud reported.")
    )]
    Rejected { message: String },

    #[error("Command was not delivered: {message}")]
    #[diagnostic(
        code(kumo::command_failed),
        help(
            "The new value stays visible until the next refresh or socket update\n\
             contradicts it. Retry once the connection recovers."
        )
    )]
    CommandFailed { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(kumo::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(kumo::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: kumo config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(kumo::no_config),
        help(
            "Create one with: kumo config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(kumo::config))]
    Config(#[from] ConfigError),

    // ── Internal ─────────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(kumo::internal))]
    Internal(String),

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::CommandFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } | Self::NoConfig { .. } => {
                exit_code::NOT_FOUND
            }
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::Validation { .. } => exit_code::USAGE,
            Self::Config(err) => match err {
                ConfigError::NoCredentials { .. } => exit_code::AUTH,
                ConfigError::UnknownProfile { .. } => exit_code::NOT_FOUND,
                ConfigError::Validation { .. } => exit_code::USAGE,
                _ => exit_code::GENERAL,
            },
            Self::Internal(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }

    pub(crate) fn prompt(err: impl std::fmt::Display) -> Self {
        Self::Validation {
            field: "interactive".into(),
            reason: format!("prompt failed: {err}"),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Transport { message } => CliError::ConnectionFailed { message },

            CoreError::AuthenticationFailed { message } => CliError::AuthFailed {
                profile: "default".into(),
                message,
            },

            CoreError::DeviceNotFound { serial } => CliError::NotFound {
                resource_type: "device".into(),
                identifier: serial,
                list_command: "devices list".into(),
            },

            CoreError::ReadOnlyField { field } => CliError::Validation {
                reason: format!("{field} is read-only"),
                field,
            },

            CoreError::InvalidValue { field, message } => CliError::Validation {
                field,
                reason: message,
            },

            CoreError::EmptyCommand => CliError::Validation {
                field: "set".into(),
                reason: "nothing to change; pass at least one of --power, --mode, --temp, \
                         --cool, --heat, --fan, --vane"
                    .into(),
            },

            CoreError::CommandRejected { message, .. } => CliError::Rejected { message },

            CoreError::CommandFailed { message, .. } => CliError::CommandFailed { message },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Shutdown => CliError::Internal("coordinator stopped unexpectedly".into()),

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_exit_codes() {
        let cases = [
            (
                CoreError::DeviceNotFound { serial: "X".into() },
                exit_code::NOT_FOUND,
            ),
            (
                CoreError::CommandRejected {
                    serial: "X".into(),
                    message: "bad".into(),
                },
                exit_code::REJECTED,
            ),
            (CoreError::EmptyCommand, exit_code::USAGE),
            (
                CoreError::AuthenticationFailed { message: "no".into() },
                exit_code::AUTH,
            ),
            (
                CoreError::Transport { message: "down".into() },
                exit_code::CONNECTION,
            ),
        ];
        for (core, code) in cases {
            assert_eq!(CliError::from(core).exit_code(), code);
        }
    }
}
