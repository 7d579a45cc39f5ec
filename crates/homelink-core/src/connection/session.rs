// ── Authenticated session ──
//
// A `Session` exists only between `auth_ok` and the end of that connection.
// All outbound frames for the connection funnel through its sender, which
// feeds the single transport writer.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use homelink_api::ClientMessage;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::CoreError;

/// Identifier of one authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Locally minted id, used when the server does not assign one.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct Session {
    id: SessionId,
    established_at: DateTime<Utc>,
    opened: Instant,
    /// Millis since `opened` at which the last pong arrived.
    last_heartbeat_ms: AtomicU64,
    /// Set once the baseline inventory is out; general traffic waits for it.
    ready: AtomicBool,
    outbound: ArcSwapOption<mpsc::Sender<String>>,
    cancel: CancellationToken,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        outbound: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            established_at: Utc::now(),
            opened: Instant::now(),
            last_heartbeat_ms: AtomicU64::new(0),
            ready: AtomicBool::new(false),
            outbound: ArcSwapOption::from_pointee(outbound),
            cancel,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    pub fn last_heartbeat(&self) -> Instant {
        self.opened + Duration::from_millis(self.last_heartbeat_ms.load(Ordering::Relaxed))
    }

    pub(crate) fn touch_heartbeat(&self) {
        let elapsed = u64::try_from(self.opened.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_heartbeat_ms.store(elapsed, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drop the transport sender and stop session-scoped tasks.
    pub(crate) fn close(&self) {
        self.ready.store(false, Ordering::Release);
        self.outbound.store(None);
        self.cancel.cancel();
    }

    pub async fn send(&self, message: &ClientMessage) -> Result<(), CoreError> {
        let Some(tx) = self.outbound.load_full() else {
            return Err(CoreError::NotConnected);
        };
        let text = message.encode()?;
        tx.send(text).await.map_err(|_| CoreError::NotConnected)?;
        trace!(session = %self.id, kind = message.kind(), "frame sent");
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("established_at", &self.established_at)
            .field("ready", &self.is_ready())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// What session hooks get to work with.
///
/// Sends through the context bypass the readiness gate, so a hook can put
/// the baseline inventory on the wire before anything else.
#[derive(Debug, Clone)]
pub struct SessionContext {
    session: Arc<Session>,
}

impl SessionContext {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn id(&self) -> &SessionId {
        self.session.id()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Token cancelled when this session ends.
    pub fn cancel_token(&self) -> CancellationToken {
        self.session.cancel.clone()
    }

    pub async fn send(&self, message: &ClientMessage) -> Result<(), CoreError> {
        self.session.send(message).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_after_close_is_not_connected() {
        let (tx, mut rx) = mpsc::channel(4);
        let session = Session::new(SessionId::new("s"), tx, CancellationToken::new());

        session.send(&ClientMessage::Ping).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), r#"{"type":"ping"}"#);

        session.close();
        assert!(session.is_closed());
        assert!(matches!(
            session.send(&ClientMessage::Ping).await,
            Err(CoreError::NotConnected)
        ));
        // Last sender gone: the transport sees the close.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_timestamp_advances() {
        let (tx, _rx) = mpsc::channel(1);
        let session = Session::new(SessionId::generate(), tx, CancellationToken::new());
        let before = session.last_heartbeat();

        tokio::time::advance(Duration::from_secs(5)).await;
        session.touch_heartbeat();

        assert_eq!(session.last_heartbeat() - before, Duration::from_secs(5));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
