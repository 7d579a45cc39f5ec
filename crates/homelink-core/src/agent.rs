// ── Agent ──
//
// Wires the connection manager, dispatcher, and inventory sync together and
// owns the shutdown sequence: stop intake, drain in-flight commands, then
// close the session.

use std::sync::Arc;
use std::time::Duration;

use homelink_api::{
    Connector, LocalClient, TlsMode, TransportConfig, WsConnector, agent_ws_url,
};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, TlsVerification};
use crate::connection::{
    ConnectionHandle, ConnectionManager, ConnectionSettings, SessionContext, SessionHook,
};
use crate::dispatch::{DispatchSettings, Dispatcher};
use crate::error::CoreError;
use crate::local::{HomeAssistant, LocalControl};
use crate::registry::{EntityStore, RegistrySync};

/// Headroom on top of the inventory fetch for putting the baseline on the wire.
const HOOK_SEND_ALLOWANCE: Duration = Duration::from_secs(10);

pub struct Agent<C, L> {
    manager: ConnectionManager<C>,
    dispatcher: Arc<Dispatcher<L, ConnectionHandle>>,
    sync: Arc<RegistrySync<L>>,
    store: Arc<EntityStore>,
    local: Arc<L>,
    shutdown_grace: Duration,
}

impl Agent<WsConnector, HomeAssistant> {
    /// Production agent: WebSocket to the remote service, REST to Home Assistant.
    pub fn from_config(config: &AgentConfig) -> Result<Self, CoreError> {
        config.validate()?;

        let transport = TransportConfig {
            tls: match &config.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: config.local_timeout,
        };
        let client = LocalClient::new(config.local_url.clone(), &config.local_token, &transport)?;
        let connector = WsConnector::new(agent_ws_url(&config.server_url)?);

        Self::new(config, connector, HomeAssistant::new(client, config.local_retry()))
    }
}

impl<C: Connector, L: LocalControl> Agent<C, L> {
    pub fn new(config: &AgentConfig, connector: C, local: L) -> Result<Self, CoreError> {
        config.validate()?;

        // The baseline push must be able to fall back to the cached inventory
        // before the manager gives up on the hook.
        let fetch_timeout = config.local_budget();
        let settings = ConnectionSettings {
            connect_timeout: config.connect_timeout,
            auth_timeout: config.auth_timeout,
            heartbeat_interval: config.heartbeat_interval,
            heartbeat_grace: config.heartbeat_grace,
            max_auth_rejections: config.max_auth_rejections,
            hook_timeout: fetch_timeout + HOOK_SEND_ALLOWANCE,
        };
        let manager = ConnectionManager::new(
            connector,
            config.agent_token.clone(),
            settings,
            config.backoff.clone(),
        );

        let local = Arc::new(local);
        let store = Arc::new(EntityStore::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&local),
            manager.handle(),
            Arc::clone(&store),
            &DispatchSettings {
                max_concurrent: config.max_concurrent_commands,
                command_timeout: config.command_timeout,
                cache_capacity: config.result_cache_capacity,
                cache_ttl: config.result_cache_ttl,
            },
        ));
        let sync = Arc::new(RegistrySync::new(
            Arc::clone(&local),
            Arc::clone(&store),
            config.inventory_poll_interval,
            fetch_timeout,
        ));

        Ok(Self {
            manager,
            dispatcher,
            sync,
            store,
            local,
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn connection(&self) -> ConnectionHandle {
        self.manager.handle()
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// Probe the local control surface once.
    pub async fn check_local(&self) -> Result<String, CoreError> {
        self.local.check().await
    }

    /// Run until `shutdown` fires or the connection gives up for good.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), CoreError> {
        let Self {
            manager,
            dispatcher,
            sync,
            local,
            shutdown_grace,
            ..
        } = self;

        match local.check().await {
            Ok(description) => info!(local = %description, "local control surface reachable"),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(error = %e, "local control surface not reachable yet, continuing"),
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let intake = CancellationToken::new();
        let dispatch_task = tokio::spawn(Arc::clone(&dispatcher).run(commands_rx, intake.clone()));

        let hook = AgentHook {
            sync,
            dispatcher: Arc::clone(&dispatcher),
        };
        let disconnect = CancellationToken::new();
        let mut connection = tokio::spawn(manager.run(hook, commands_tx, disconnect.clone()));

        let ended = tokio::select! {
            () = shutdown.cancelled() => None,
            joined = &mut connection => Some(joined),
        };

        info!("shutting down");
        intake.cancel();
        if let Err(e) = dispatch_task.await {
            warn!(error = %e, "dispatcher task ended abnormally");
        }
        if dispatcher.drain(shutdown_grace).await {
            debug!("in-flight commands drained");
        }

        let joined = match ended {
            Some(joined) => joined,
            None => {
                disconnect.cancel();
                connection.await
            }
        };
        let result = joined.map_err(|e: JoinError| {
            CoreError::Internal(format!("connection task failed: {e}"))
        })?;
        info!("agent stopped");
        result
    }
}

/// Per-session work: baseline inventory first, then held results and the
/// inventory poller.
struct AgentHook<L> {
    sync: Arc<RegistrySync<L>>,
    dispatcher: Arc<Dispatcher<L, ConnectionHandle>>,
}

impl<L: LocalControl> SessionHook for AgentHook<L> {
    async fn established(&self, session: SessionContext) {
        if let Err(e) = self.sync.push_full(&session).await {
            warn!(session = %session.id(), error = %e, "baseline inventory not sent");
        }
    }

    async fn ready(&self, session: SessionContext) {
        self.dispatcher.flush_pending().await;

        let sync = Arc::clone(&self.sync);
        let cancel = session.cancel_token();
        tokio::spawn(async move {
            sync.run_poller(session, cancel).await;
        });
    }
}
