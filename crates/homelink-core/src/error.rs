// ── Core error types ──
//
// The agent's error taxonomy. Transport and handshake failures stay inside
// the connection manager; command failures are reported to the remote side
// and never touch session health. The `From<homelink_api::Error>` impl sorts
// raw API errors into those buckets.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Authentication rejected by remote service: {reason}")]
    AuthRejected { reason: String },

    #[error("Authentication rejected {count} times in a row, last reason: {reason}")]
    AuthExhausted { count: u32, reason: String },

    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("No live session")]
    NotConnected,

    // ── Command errors ───────────────────────────────────────────────
    #[error(transparent)]
    Command(#[from] CommandError),

    // ── Local API errors ─────────────────────────────────────────────
    #[error("Local API error: {message}")]
    LocalApi { message: String, transient: bool },

    #[error("Local API refused the access token: {message}")]
    LocalAuth { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` for errors that end the process rather than being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthExhausted { .. } | Self::LocalAuth { .. } | Self::Config { .. }
        )
    }
}

/// Why a command could not be carried out. Reported verbatim as result detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown entity '{entity}'")]
    UnknownEntity { entity: String },

    #[error("action '{action}' is not supported for {entity}")]
    UnsupportedAction { entity: String, action: String },

    #[error("rejected by local control surface: {message}")]
    Rejected { message: String },
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<homelink_api::Error> for CoreError {
    fn from(err: homelink_api::Error) -> Self {
        use homelink_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::LocalAuth { message },
            Api::Transport(_)
            | Api::Timeout { .. }
            | Api::LocalApi { .. }
            | Api::Unavailable { .. } => CoreError::LocalApi {
                transient: err.is_transient(),
                message: err.to_string(),
            },
            Api::Rejected { status, message } => CoreError::Command(CommandError::Rejected {
                message: format!("HTTP {status}: {message}"),
            }),
            Api::NotFound { path } => CoreError::Command(CommandError::Rejected {
                message: format!("{path} not found"),
            }),
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(message) => CoreError::Config {
                message: format!("TLS error: {message}"),
            },
            Api::WebSocketConnect(reason) => CoreError::Network { reason },
            Api::WebSocketClosed { code, reason } => CoreError::Network {
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
