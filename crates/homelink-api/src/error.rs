use thiserror::Error;

/// Top-level error type for the `homelink-api` crate.
///
/// Covers every failure mode across both API surfaces: the outbound
/// WebSocket session to the remote service and the local Home Assistant
/// REST API. `homelink-core` maps these into its own taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // credentials
    /// Credential rejected (HTTP 401 from the local API).
    #[error("credential rejected: {message}")]
    Authentication { message: String },

    // network
    /// Request could not be sent or its response not read.
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("bad URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// No response within the client timeout.
    #[error("no response within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// CA file unreadable, or the client could not be built.
    #[error("TLS setup failed: {0}")]
    Tls(String),

    // local API responses
    /// The local API understood the request and refused it (HTTP 400/405/422).
    #[error("local API rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Entity or service does not exist on the local API.
    #[error("local API resource not found: {path}")]
    NotFound { path: String },

    /// The local API is up but temporarily unable to serve (HTTP 502/503/504).
    #[error("local API unavailable (HTTP {status})")]
    Unavailable { status: u16 },

    /// Any other non-success HTTP status.
    #[error("local API error (HTTP {status}): {message}")]
    LocalApi { status: u16, message: String },

    // remote session
    /// Dial or upgrade of the remote session failed.
    #[error("could not open session: {0}")]
    WebSocketConnect(String),

    /// Remote side sent a close frame.
    #[error("session closed by peer (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // payloads
    /// JSON (de)serialization failed, with the raw body for debugging.
    #[error("malformed payload: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the request never reached the local surface, or
    /// the surface answered with a gateway-style "try again" status.
    ///
    /// Timeouts are deliberately absent: a timed-out service call may
    /// still have been executed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connect(),
            Self::Unavailable { .. } => true,
            _ => false,
        }
    }
}
