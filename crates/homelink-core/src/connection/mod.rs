// ── Connection lifecycle ──
//
// `ConnectionManager` owns the transport and runs the state machine in
// `state`. Everything else talks to it through a cloneable
// `ConnectionHandle`: observe state, send frames, request a reconnect.

pub mod manager;
pub mod session;
pub mod state;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use homelink_api::ClientMessage;
use tokio::sync::{Notify, watch};

use crate::error::CoreError;

pub use manager::ConnectionManager;
pub use session::{Session, SessionContext, SessionId};
pub use state::{ConnectionEvent, ConnectionState, Failure, InvalidTransition, transition};

/// Session timing and handshake limits.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_grace: Duration,
    /// Consecutive rejections before the manager gives up. `0` never does.
    pub max_auth_rejections: u32,
    /// Upper bound on each session hook. A hook that overruns ends the
    /// session.
    pub hook_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            auth_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_grace: Duration::from_secs(10),
            max_auth_rejections: 5,
            hook_timeout: Duration::from_secs(30),
        }
    }
}

// ── Seams ────────────────────────────────────────────────────────────

/// Somewhere to put outbound frames.
pub trait Outbox: Send + Sync + 'static {
    fn send(&self, message: ClientMessage) -> impl Future<Output = Result<(), CoreError>> + Send;

    /// Whether a send right now would reach a live session.
    fn is_live(&self) -> bool;
}

impl<T: Outbox> Outbox for Arc<T> {
    fn send(&self, message: ClientMessage) -> impl Future<Output = Result<(), CoreError>> + Send {
        self.as_ref().send(message)
    }

    fn is_live(&self) -> bool {
        self.as_ref().is_live()
    }
}

/// Work tied to each new session.
///
/// `established` runs right after `auth_ok`, while general traffic is held
/// back; `ready` runs once it is released, before inbound frames are read.
pub trait SessionHook: Send + Sync + 'static {
    fn established(&self, session: SessionContext) -> impl Future<Output = ()> + Send;

    fn ready(&self, session: SessionContext) -> impl Future<Output = ()> + Send;
}

impl SessionHook for () {
    async fn established(&self, _session: SessionContext) {}

    async fn ready(&self, _session: SessionContext) {}
}

impl Outbox for SessionContext {
    async fn send(&self, message: ClientMessage) -> Result<(), CoreError> {
        self.session().send(&message).await
    }

    fn is_live(&self) -> bool {
        !self.cancel_token().is_cancelled()
    }
}

// ── Shared state ─────────────────────────────────────────────────────

pub(crate) struct Shared {
    pub(crate) live: ArcSwapOption<Session>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) reconnect: Notify,
}

impl Shared {
    pub(crate) fn new() -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            live: ArcSwapOption::empty(),
            state,
            reconnect: Notify::new(),
        })
    }
}

/// Cloneable view onto a running [`ConnectionManager`].
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.shared.live.load().as_ref().map(|s| s.id().clone())
    }

    /// Drop the current session (or skip the pending backoff) and dial again.
    ///
    /// A request made mid-handshake is kept and acted on once the manager
    /// next checks for it.
    pub fn reconnect(&self) {
        self.shared.reconnect.notify_one();
    }
}

impl Outbox for ConnectionHandle {
    async fn send(&self, message: ClientMessage) -> Result<(), CoreError> {
        let session = self.shared.live.load_full();
        match session {
            Some(session) if session.is_ready() => session.send(&message).await,
            _ => Err(CoreError::NotConnected),
        }
    }

    fn is_live(&self) -> bool {
        self.shared.live.load().as_ref().is_some_and(|s| s.is_ready())
    }
}
