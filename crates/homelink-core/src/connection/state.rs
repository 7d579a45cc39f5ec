//! Connection lifecycle as a pure state machine.
//!
//! ```text
//! Disconnected ─Dial─▶ Connecting ─TransportOpened─▶ Authenticating ─AuthAccepted─▶ Connected
//!      ▲                   │                              │                            │
//!      │                   └────────────Failed────────────┴───────────Failed───────────┘
//!      │                                                  ▼
//!      └──────Disconnect (from any state)──────────── Backoff ─BackoffElapsed─▶ Connecting
//! ```
//!
//! [`transition`] has no side effects. The manager feeds it events and acts
//! on the state it returns; anything not drawn above is an
//! [`InvalidTransition`].

use std::time::Duration;

use thiserror::Error;

use super::session::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    Disconnected,
    Connecting { attempt: u32 },
    Authenticating { attempt: u32 },
    Connected { session_id: SessionId },
    Backoff { attempt: u32, delay: Duration },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Why a connection attempt or live session ended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error("no authentication reply in time")]
    AuthTimeout,
    #[error("heartbeat timed out")]
    HeartbeatTimeout,
    #[error("connection closed by peer")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Dial { attempt: u32 },
    TransportOpened,
    AuthAccepted { session_id: SessionId },
    Failed { failure: Failure, retry_in: Duration },
    BackoffElapsed,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid connection transition: {event:?} in state {from}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub event: ConnectionEvent,
}

/// Next state for `event` in state `from`.
pub fn transition(
    from: &ConnectionState,
    event: &ConnectionEvent,
) -> Result<ConnectionState, InvalidTransition> {
    use ConnectionEvent as E;
    use ConnectionState as S;

    let next = match (from, event) {
        (_, E::Disconnect) => S::Disconnected,
        (S::Disconnected, E::Dial { attempt }) => S::Connecting { attempt: *attempt },
        (S::Connecting { attempt }, E::TransportOpened) => S::Authenticating { attempt: *attempt },
        (S::Authenticating { .. }, E::AuthAccepted { session_id }) => S::Connected {
            session_id: session_id.clone(),
        },
        (
            S::Connecting { attempt } | S::Authenticating { attempt },
            E::Failed { failure, retry_in },
        ) if failure_allowed(from, failure) => S::Backoff {
            attempt: attempt.saturating_add(1),
            delay: *retry_in,
        },
        (S::Connected { .. }, E::Failed { failure, retry_in }) if failure_allowed(from, failure) => {
            S::Backoff {
                attempt: 1,
                delay: *retry_in,
            }
        }
        (S::Backoff { attempt, .. }, E::BackoffElapsed) => S::Connecting { attempt: *attempt },
        _ => {
            return Err(InvalidTransition {
                from: from.clone(),
                event: event.clone(),
            });
        }
    };
    Ok(next)
}

/// Handshake failures only happen mid-handshake; heartbeats only once connected.
fn failure_allowed(state: &ConnectionState, failure: &Failure) -> bool {
    match failure {
        Failure::AuthRejected(_) | Failure::AuthTimeout => {
            matches!(state, ConnectionState::Authenticating { .. })
        }
        Failure::HeartbeatTimeout => matches!(state, ConnectionState::Connected { .. }),
        Failure::Transport(_) | Failure::Protocol(_) | Failure::Closed => true,
    }
}
