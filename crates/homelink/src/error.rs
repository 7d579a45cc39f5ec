//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help
//! text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use homelink_config::ConfigError;
use homelink_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    /// `EX_CONFIG` from sysexits.h.
    pub const CONFIG: i32 = 78;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Authentication ───────────────────────────────────────────────
    #[error("No {credential} configured")]
    #[diagnostic(
        code(homelink::no_credentials),
        help(
            "Pass --token / --local-token, set HOMELINK_AGENT_TOKEN / SUPERVISOR_TOKEN,\n\
             or store the token in the system keyring under service 'homelink'."
        )
    )]
    NoCredentials { credential: String },

    #[error("The remote service rejected the agent token {count} times: {reason}")]
    #[diagnostic(
        code(homelink::auth_rejected),
        help("The token may have been revoked. Issue a new agent token and restart.")
    )]
    AuthRejected { count: u32, reason: String },

    #[error("Home Assistant rejected the access token: {message}")]
    #[diagnostic(
        code(homelink::local_auth),
        help("Create a long-lived access token in your Home Assistant profile.")
    )]
    LocalAuth { message: String },

    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach {target}: {reason}")]
    #[diagnostic(
        code(homelink::connection_failed),
        help("Check that the address is correct and reachable from this host.")
    )]
    ConnectionFailed { target: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(homelink::validation), help("See: homelink config show"))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(homelink::config))]
    Config(Box<ConfigError>),

    // ── Internal / IO ────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    #[diagnostic(code(homelink::internal))]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoCredentials { .. } | Self::AuthRejected { .. } | Self::LocalAuth { .. } => {
                exit_code::AUTH
            }
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Validation { .. } | Self::Config(_) => exit_code::CONFIG,
            Self::Internal(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError ───────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { credential } => Self::NoCredentials { credential },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError ─────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthExhausted { count, reason } => Self::AuthRejected { count, reason },
            CoreError::AuthRejected { reason } => Self::AuthRejected { count: 1, reason },
            CoreError::LocalAuth { message } => Self::LocalAuth { message },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Network { reason } => Self::ConnectionFailed {
                target: "remote service".into(),
                reason,
            },
            CoreError::NotConnected => Self::ConnectionFailed {
                target: "remote service".into(),
                reason: "no live session".into(),
            },
            CoreError::LocalApi { message, .. } => Self::ConnectionFailed {
                target: "Home Assistant".into(),
                reason: message,
            },
            CoreError::Command(e) => Self::Internal(e.to_string()),
            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        let auth: CliError = CoreError::AuthExhausted {
            count: 5,
            reason: "revoked".into(),
        }
        .into();
        assert_eq!(auth.exit_code(), exit_code::AUTH);

        let local: CliError = CoreError::LocalApi {
            message: "connection refused".into(),
            transient: true,
        }
        .into();
        assert_eq!(local.exit_code(), exit_code::CONNECTION);

        let config: CliError = ConfigError::Validation {
            field: "server.url".into(),
            reason: "a server address is required".into(),
        }
        .into();
        assert_eq!(config.exit_code(), exit_code::CONFIG);

        let missing: CliError = ConfigError::NoCredentials {
            credential: "agent token".into(),
        }
        .into();
        assert_eq!(missing.exit_code(), exit_code::AUTH);
    }
}
