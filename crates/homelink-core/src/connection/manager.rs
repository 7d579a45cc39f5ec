// ── Connection manager ──
//
// Dials the remote service, authenticates, keeps the session alive with
// heartbeats, forwards inbound commands, and reconnects with backoff when
// anything below the command layer fails. One manager owns one transport;
// there is never more than one live session.

use std::future::Future;
use std::sync::Arc;

use homelink_api::{ClientMessage, Connector, Link, ServerMessage};
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::session::{Session, SessionContext, SessionId};
use super::state::{ConnectionEvent, ConnectionState, Failure, transition};
use super::{ConnectionHandle, ConnectionSettings, SessionHook, Shared};
use crate::backoff::{Backoff, BackoffPolicy, Jitter, RandomJitter};
use crate::error::CoreError;
use crate::model::Command;

type Inbound = mpsc::Receiver<Result<String, homelink_api::Error>>;

/// How one pass through connect → authenticate → serve ended.
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Manual,
    Rejected(String),
    Failed(Failure),
}

impl SessionEnd {
    fn describe(&self) -> String {
        match self {
            Self::Shutdown => "shutdown".into(),
            Self::Manual => "manual reconnect".into(),
            Self::Rejected(reason) => format!("authentication rejected: {reason}"),
            Self::Failed(failure) => failure.to_string(),
        }
    }
}

pub struct ConnectionManager<C, J = RandomJitter> {
    connector: C,
    token: SecretString,
    settings: ConnectionSettings,
    backoff: Backoff<J>,
    rejections: u32,
    shared: Arc<Shared>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        connector: C,
        token: SecretString,
        settings: ConnectionSettings,
        policy: BackoffPolicy,
    ) -> Self {
        Self::with_backoff(connector, token, settings, Backoff::new(policy))
    }
}

impl<C: Connector, J: Jitter> ConnectionManager<C, J> {
    pub fn with_backoff(
        connector: C,
        token: SecretString,
        settings: ConnectionSettings,
        backoff: Backoff<J>,
    ) -> Self {
        Self {
            connector,
            token,
            settings,
            backoff,
            rejections: 0,
            shared: Shared::new(),
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle::new(Arc::clone(&self.shared))
    }

    /// Run until `shutdown` fires or authentication is rejected too often.
    ///
    /// Commands received on a live session are forwarded to `commands`.
    pub async fn run<H: SessionHook>(
        mut self,
        hook: H,
        commands: mpsc::UnboundedSender<Command>,
        shutdown: CancellationToken,
    ) -> Result<(), CoreError> {
        loop {
            if matches!(*self.shared.state.borrow(), ConnectionState::Disconnected) {
                self.apply(ConnectionEvent::Dial {
                    attempt: self.backoff.attempt(),
                });
            }

            let failure = match self.connect_and_serve(&hook, &commands, &shutdown).await {
                SessionEnd::Shutdown => {
                    self.apply(ConnectionEvent::Disconnect);
                    info!("connection manager stopped");
                    return Ok(());
                }
                SessionEnd::Manual => {
                    info!("reconnecting on request");
                    self.apply(ConnectionEvent::Disconnect);
                    continue;
                }
                SessionEnd::Rejected(reason) => {
                    self.rejections = self.rejections.saturating_add(1);
                    let max = self.settings.max_auth_rejections;
                    if max > 0 && self.rejections >= max {
                        error!(
                            count = self.rejections,
                            reason = %reason,
                            "authentication rejected repeatedly, giving up"
                        );
                        self.apply(ConnectionEvent::Disconnect);
                        return Err(CoreError::AuthExhausted {
                            count: self.rejections,
                            reason,
                        });
                    }
                    Failure::AuthRejected(reason)
                }
                SessionEnd::Failed(failure) => failure,
            };

            if !self.wait_backoff(failure, &shutdown).await {
                info!("connection manager stopped");
                return Ok(());
            }
        }
    }

    /// Sleep out the next backoff delay. Returns `false` on shutdown.
    async fn wait_backoff(&mut self, failure: Failure, shutdown: &CancellationToken) -> bool {
        let delay = self.backoff.next_delay();
        warn!(
            error = %failure,
            attempt = self.backoff.attempt(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "connection lost, retrying after backoff"
        );
        self.apply(ConnectionEvent::Failed {
            failure,
            retry_in: delay,
        });

        let shared = Arc::clone(&self.shared);
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                self.apply(ConnectionEvent::Disconnect);
                false
            }
            () = shared.reconnect.notified() => {
                info!("reconnect requested, skipping backoff");
                self.apply(ConnectionEvent::Disconnect);
                true
            }
            () = tokio::time::sleep(delay) => {
                self.apply(ConnectionEvent::BackoffElapsed);
                true
            }
        }
    }

    async fn connect_and_serve<H: SessionHook>(
        &mut self,
        hook: &H,
        commands: &mpsc::UnboundedSender<Command>,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        let shared = Arc::clone(&self.shared);

        // ── Connecting ───────────────────────────────────────────────
        let connect_timeout = self.settings.connect_timeout;
        let link = tokio::select! {
            biased;
            () = shutdown.cancelled() => return SessionEnd::Shutdown,
            () = shared.reconnect.notified() => return SessionEnd::Manual,
            result = tokio::time::timeout(connect_timeout, self.connector.connect()) => match result {
                Ok(Ok(link)) => link,
                Ok(Err(e)) => return SessionEnd::Failed(Failure::Transport(e.to_string())),
                Err(_) => {
                    return SessionEnd::Failed(Failure::Transport(format!(
                        "connect timed out after {}s",
                        connect_timeout.as_secs()
                    )));
                }
            },
        };
        self.apply(ConnectionEvent::TransportOpened);

        // ── Authenticating ───────────────────────────────────────────
        let Link {
            outbound,
            mut inbound,
        } = link;
        let session_id = match self.authenticate(&outbound, &mut inbound, shutdown).await {
            Ok(id) => id,
            Err(end) => return end,
        };

        // ── Connected ────────────────────────────────────────────────
        self.rejections = 0;
        self.backoff.reset();

        let session = Arc::new(Session::new(
            session_id.clone(),
            outbound,
            shutdown.child_token(),
        ));
        shared.live.store(Some(Arc::clone(&session)));
        self.apply(ConnectionEvent::AuthAccepted {
            session_id: session_id.clone(),
        });
        info!(session = %session_id, "session established");

        let end = self
            .serve(&session, &mut inbound, hook, commands, shutdown)
            .await;

        session.close();
        shared.live.store(None);
        info!(
            session = %session_id,
            reason = %end.describe(),
            established_at = %session.established_at(),
            "session ended"
        );

        end
    }

    /// Send `auth` and wait for the verdict.
    async fn authenticate(
        &self,
        outbound: &mpsc::Sender<String>,
        inbound: &mut Inbound,
        shutdown: &CancellationToken,
    ) -> Result<SessionId, SessionEnd> {
        let frame = ClientMessage::auth(&self.token)
            .encode()
            .map_err(|e| SessionEnd::Failed(Failure::Protocol(e.to_string())))?;
        if outbound.send(frame).await.is_err() {
            return Err(SessionEnd::Failed(Failure::Closed));
        }
        debug!("auth sent, awaiting reply");

        let reply = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Err(SessionEnd::Shutdown),
            reply = tokio::time::timeout(self.settings.auth_timeout, await_auth_reply(inbound)) => reply,
        };

        match reply {
            Err(_) => Err(SessionEnd::Failed(Failure::AuthTimeout)),
            Ok(Err(end)) => Err(end),
            Ok(Ok(session_id)) => Ok(session_id.map_or_else(SessionId::generate, SessionId::new)),
        }
    }

    /// Hooks, then the steady-state read loop.
    async fn serve<H: SessionHook>(
        &self,
        session: &Arc<Session>,
        inbound: &mut Inbound,
        hook: &H,
        commands: &mpsc::UnboundedSender<Command>,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        let ctx = SessionContext::new(Arc::clone(session));

        if let Some(end) = self
            .run_hook("established", hook.established(ctx.clone()), shutdown)
            .await
        {
            return end;
        }
        session.mark_ready();
        if let Some(end) = self.run_hook("ready", hook.ready(ctx), shutdown).await {
            return end;
        }

        self.read_loop(session, inbound, commands, shutdown).await
    }

    async fn run_hook<F: Future<Output = ()>>(
        &self,
        name: &'static str,
        hook: F,
        shutdown: &CancellationToken,
    ) -> Option<SessionEnd> {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => Some(SessionEnd::Shutdown),
            result = tokio::time::timeout(self.settings.hook_timeout, hook) => match result {
                Ok(()) => None,
                Err(_) => {
                    warn!(hook = name, "session hook timed out, dropping session");
                    Some(SessionEnd::Failed(Failure::Protocol(format!(
                        "{name} hook did not finish within {}s",
                        self.settings.hook_timeout.as_secs()
                    ))))
                }
            },
        }
    }

    async fn read_loop(
        &self,
        session: &Session,
        inbound: &mut Inbound,
        commands: &mpsc::UnboundedSender<Command>,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        let interval = self.settings.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return SessionEnd::Shutdown,
                () = self.shared.reconnect.notified() => return SessionEnd::Manual,
                () = tokio::time::sleep_until(pong_deadline.unwrap_or_else(Instant::now)),
                    if pong_deadline.is_some() =>
                {
                    return SessionEnd::Failed(Failure::HeartbeatTimeout);
                }
                _ = heartbeat.tick() => {
                    if pong_deadline.is_none() {
                        if session.send(&ClientMessage::Ping).await.is_err() {
                            return SessionEnd::Failed(Failure::Closed);
                        }
                        pong_deadline = Some(Instant::now() + self.settings.heartbeat_grace);
                    }
                }
                frame = inbound.recv() => match frame {
                    None => return SessionEnd::Failed(Failure::Closed),
                    Some(Err(e)) => return SessionEnd::Failed(Failure::Transport(e.to_string())),
                    Some(Ok(text)) => {
                        handle_frame(session, &text, commands, &mut pong_deadline).await;
                    }
                },
            }
        }
    }

    fn apply(&self, event: ConnectionEvent) {
        let current = self.shared.state.borrow().clone();
        match transition(&current, &event) {
            Ok(next) => {
                info!(from = %current, to = %next, "connection state change");
                self.shared.state.send_replace(next);
            }
            Err(e) => warn!(error = %e, "ignoring invalid connection transition"),
        }
    }
}

/// Read frames until the handshake verdict. `Ok` carries the server-assigned
/// session id, if any.
async fn await_auth_reply(inbound: &mut Inbound) -> Result<Option<String>, SessionEnd> {
    loop {
        let text = match inbound.recv().await {
            None => return Err(SessionEnd::Failed(Failure::Closed)),
            Some(Err(e)) => return Err(SessionEnd::Failed(Failure::Transport(e.to_string()))),
            Some(Ok(text)) => text,
        };
        match ServerMessage::decode(&text) {
            Ok(ServerMessage::AuthOk { session_id }) => return Ok(session_id),
            Ok(ServerMessage::AuthReject { reason }) => {
                return Err(SessionEnd::Rejected(
                    reason.unwrap_or_else(|| "no reason given".into()),
                ));
            }
            Ok(ServerMessage::Unknown | ServerMessage::Ack { .. }) => {
                trace!("skipping frame before auth reply");
            }
            Ok(other) => {
                return Err(SessionEnd::Failed(Failure::Protocol(format!(
                    "expected auth reply, got {other:?}"
                ))));
            }
            Err(e) => warn!(error = %e, "dropping undecodable frame"),
        }
    }
}

async fn handle_frame(
    session: &Session,
    text: &str,
    commands: &mpsc::UnboundedSender<Command>,
    pong_deadline: &mut Option<Instant>,
) {
    let message = match ServerMessage::decode(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "dropping undecodable frame");
            return;
        }
    };

    match message {
        ServerMessage::Ping => {
            if let Err(e) = session.send(&ClientMessage::Pong).await {
                debug!(error = %e, "could not answer ping");
            }
        }
        ServerMessage::Pong => {
            *pong_deadline = None;
            session.touch_heartbeat();
            trace!("pong");
        }
        ServerMessage::Command(frame) => {
            debug!(
                command = %frame.id,
                entity = %frame.entity,
                action = %frame.action,
                "command received"
            );
            if commands.send(frame.into()).is_err() {
                warn!("dispatcher is gone, dropping command");
            }
        }
        ServerMessage::Ack { id } => trace!(?id, "ack"),
        ServerMessage::AuthOk { .. } | ServerMessage::AuthReject { .. } => {
            warn!("ignoring handshake frame on an established session");
        }
        ServerMessage::Unknown => debug!("ignoring frame of unknown type"),
    }
}
