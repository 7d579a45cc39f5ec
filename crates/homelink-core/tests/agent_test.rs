#![allow(clippy::unwrap_used)]

// End-to-end agent tests over an in-memory transport.
//
// Each test plays the remote service: it accepts the auth frame, reads what
// the agent sends, and pushes commands back. A scripted local surface stands
// in for Home Assistant.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use homelink_api::{ClientMessage, Connector, Link, MemoryPeer, ResultFrame, ResultStatus};
use homelink_core::{
    Agent, AgentConfig, CoreError, EntityId, EntitySnapshot, LocalControl,
};
use secrecy::SecretString;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

// ── Fakes ───────────────────────────────────────────────────────────

struct PeerConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl Connector for PeerConnector {
    async fn connect(&self) -> Result<Link, homelink_api::Error> {
        let (link, peer) = Link::memory();
        let _ = self.peers.send(peer);
        Ok(link)
    }
}

#[derive(Default)]
struct FakeHome {
    delays: Mutex<HashMap<String, Duration>>,
    /// Per-call delays for `list_entities`, consumed in order.
    listing_delays: Mutex<VecDeque<Duration>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeHome {
    fn slow(self, action: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(action.to_owned(), delay);
        self
    }

    fn slow_listing(self, delay: Duration) -> Self {
        self.listing_delays.lock().unwrap().push_back(delay);
        self
    }
}

struct Shared(Arc<FakeHome>);

impl LocalControl for Shared {
    async fn invoke(
        &self,
        entity: &EntityId,
        action: &str,
        _params: &Map<String, Value>,
    ) -> Result<Option<Value>, CoreError> {
        let home = &self.0;
        home.calls.lock().unwrap().push(format!("{entity}:{action}"));
        let now = home.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        home.peak.fetch_max(now, Ordering::SeqCst);

        let delay = home.delays.lock().unwrap().get(action).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        home.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Some(json!({ "entity_id": entity.as_str(), "state": action })))
    }

    async fn list_entities(&self) -> Result<Vec<EntitySnapshot>, CoreError> {
        let delay = self.0.listing_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(["lock.front_door", "light.kitchen", "sensor.outdoor_temp"]
            .into_iter()
            .map(|id| EntitySnapshot {
                id: EntityId::parse(id).unwrap(),
                name: id.to_owned(),
                state: "unknown".into(),
                last_changed: None,
            })
            .collect())
    }

    async fn check(&self) -> Result<String, CoreError> {
        Ok("fake home".into())
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Running {
    home: Arc<FakeHome>,
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), CoreError>>,
}

fn config() -> AgentConfig {
    AgentConfig::new(
        Url::parse("https://relay.example.com").unwrap(),
        SecretString::from("agent-token".to_owned()),
        Url::parse("http://supervisor/core").unwrap(),
        SecretString::from("local-token".to_owned()),
    )
}

fn start(cfg: &AgentConfig, home: FakeHome) -> Running {
    let (peer_tx, peers) = mpsc::unbounded_channel();
    let home = Arc::new(home);
    let agent = Agent::new(
        cfg,
        PeerConnector { peers: peer_tx },
        Shared(Arc::clone(&home)),
    )
    .unwrap();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(agent.run(shutdown.clone()));
    Running {
        home,
        peers,
        shutdown,
        task,
    }
}

/// Next non-heartbeat frame from the agent. Pings are answered.
async fn next(peer: &mut MemoryPeer) -> Option<ClientMessage> {
    loop {
        let text = peer.recv().await?;
        match ClientMessage::decode(&text).unwrap() {
            ClientMessage::Ping => {
                peer.send(r#"{"type":"pong"}"#).await;
            }
            ClientMessage::Pong => {}
            other => return Some(other),
        }
    }
}

async fn accept(peer: &mut MemoryPeer, session_id: &str) {
    let Some(ClientMessage::Auth { .. }) = next(peer).await else {
        panic!("first frame was not auth");
    };
    assert!(
        peer.send(format!(r#"{{"type":"auth_ok","session_id":"{session_id}"}}"#))
            .await
    );
}

async fn expect_inventory(peer: &mut MemoryPeer) -> Vec<String> {
    match next(peer).await {
        Some(ClientMessage::InventoryFull { entities }) => {
            entities.into_iter().map(|e| e.entity_id).collect()
        }
        other => panic!("expected inventory_full, got {other:?}"),
    }
}

async fn expect_result(peer: &mut MemoryPeer) -> ResultFrame {
    match next(peer).await {
        Some(ClientMessage::Result(frame)) => frame,
        other => panic!("expected result, got {other:?}"),
    }
}

async fn command(peer: &MemoryPeer, id: &str, entity: &str, action: &str) {
    let frame = json!({
        "type": "command",
        "id": id,
        "entity": entity,
        "action": action,
        "params": {},
    });
    assert!(peer.send(frame.to_string()).await);
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn command_round_trip_after_inventory() {
    let mut run = start(&config(), FakeHome::default());
    let mut peer = run.peers.recv().await.unwrap();
    accept(&mut peer, "s-1").await;

    let ids = expect_inventory(&mut peer).await;
    assert!(ids.contains(&"lock.front_door".to_owned()));

    command(&peer, "c1", "lock.front_door", "lock").await;
    let result = expect_result(&mut peer).await;
    assert_eq!(result.id, "c1");
    assert_eq!(result.status, ResultStatus::Succeeded);
    assert_eq!(result.data.unwrap()["state"], "lock");

    run.shutdown.cancel();
    run.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn slow_inventory_still_goes_out_first() {
    let mut cfg = config();
    cfg.local_timeout = Duration::from_secs(45);
    let home = FakeHome::default().slow_listing(Duration::from_secs(40));
    let mut run = start(&cfg, home);
    let mut peer = run.peers.recv().await.unwrap();
    accept(&mut peer, "s-1").await;

    let ids = expect_inventory(&mut peer).await;
    assert_eq!(ids.len(), 3);
    assert!(run.peers.try_recv().is_err(), "session should not be redialled");

    run.shutdown.cancel();
    run.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn stalled_inventory_falls_back_to_last_known() {
    let mut cfg = config();
    cfg.local_timeout = Duration::from_secs(5);
    cfg.local_retries = 0;
    let home = FakeHome::default().slow_listing(Duration::from_secs(3600));
    let mut run = start(&cfg, home);
    let mut peer = run.peers.recv().await.unwrap();
    accept(&mut peer, "s-1").await;

    // Nothing cached yet: the baseline is empty, but it is still a baseline.
    assert!(expect_inventory(&mut peer).await.is_empty());
    command(&peer, "c1", "lock.front_door", "lock").await;
    let result = expect_result(&mut peer).await;
    assert_eq!(result.status, ResultStatus::Failed);

    run.shutdown.cancel();
    run.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn unknown_entity_is_refused() {
    let mut run = start(&config(), FakeHome::default());
    let mut peer = run.peers.recv().await.unwrap();
    accept(&mut peer, "s-1").await;
    expect_inventory(&mut peer).await;

    command(&peer, "c2", "light.garage", "turn_on").await;
    let result = expect_result(&mut peer).await;
    assert_eq!(result.status, ResultStatus::Failed);
    assert!(result.detail.unwrap().contains("light.garage"));
    assert!(run.home.calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn retried_id_gets_cached_result() {
    let mut run = start(&config(), FakeHome::default());
    let mut peer = run.peers.recv().await.unwrap();
    accept(&mut peer, "s-1").await;
    expect_inventory(&mut peer).await;

    command(&peer, "c3", "light.kitchen", "turn_on").await;
    let first = expect_result(&mut peer).await;
    command(&peer, "c3", "light.kitchen", "turn_on").await;
    let second = expect_result(&mut peer).await;

    assert_eq!(first, second);
    assert_eq!(run.home.calls.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_sends_inventory_before_held_results() {
    let home = FakeHome::default().slow("unlock", Duration::from_secs(3));
    let mut run = start(&config(), home);

    let mut peer = run.peers.recv().await.unwrap();
    accept(&mut peer, "s-1").await;
    expect_inventory(&mut peer).await;
    command(&peer, "c4", "lock.front_door", "unlock").await;
    // Let the command start, then cut the connection under it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(peer);

    let mut peer = run.peers.recv().await.unwrap();
    // Hold the handshake until the command has finished offline.
    tokio::time::sleep(Duration::from_secs(5)).await;
    accept(&mut peer, "s-2").await;

    expect_inventory(&mut peer).await;
    let result = expect_result(&mut peer).await;
    assert_eq!(result.id, "c4");
    assert_eq!(result.status, ResultStatus::Succeeded);
    assert_eq!(run.home.calls.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_commands_are_bounded() {
    let mut cfg = config();
    cfg.max_concurrent_commands = 2;
    let home = FakeHome::default().slow("turn_on", Duration::from_secs(1));
    let mut run = start(&cfg, home);

    let mut peer = run.peers.recv().await.unwrap();
    accept(&mut peer, "s-1").await;
    expect_inventory(&mut peer).await;

    for i in 0..6 {
        command(&peer, &format!("c{i}"), "light.kitchen", "turn_on").await;
    }
    for _ in 0..6 {
        assert_eq!(expect_result(&mut peer).await.status, ResultStatus::Succeeded);
    }
    assert_eq!(run.home.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_finishes_in_flight_commands() {
    let home = FakeHome::default().slow("lock", Duration::from_secs(2));
    let mut run = start(&config(), home);

    let mut peer = run.peers.recv().await.unwrap();
    accept(&mut peer, "s-1").await;
    expect_inventory(&mut peer).await;
    command(&peer, "c5", "lock.front_door", "lock").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    run.shutdown.cancel();
    let result = expect_result(&mut peer).await;
    assert_eq!(result.id, "c5");
    run.task.await.unwrap().unwrap();
    assert!(next(&mut peer).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn repeated_auth_rejection_stops_the_agent() {
    let mut cfg = config();
    cfg.max_auth_rejections = 3;
    let mut run = start(&cfg, FakeHome::default());

    for _ in 0..3 {
        let mut peer = run.peers.recv().await.unwrap();
        let Some(ClientMessage::Auth { .. }) = next(&mut peer).await else {
            panic!("expected auth");
        };
        peer.send(r#"{"type":"auth_reject","reason":"revoked"}"#).await;
    }

    let err = run.task.await.unwrap().unwrap_err();
    assert!(matches!(err, CoreError::AuthExhausted { count: 3, .. }), "{err}");
    assert!(err.is_fatal());
}
