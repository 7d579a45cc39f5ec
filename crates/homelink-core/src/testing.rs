// Shared fakes for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use homelink_api::ClientMessage;
use serde_json::{Map, Value, json};

use crate::connection::Outbox;
use crate::error::{CommandError, CoreError};
use crate::local::LocalControl;
use crate::model::{EntityId, EntitySnapshot};

pub(crate) fn entity(id: &str, state: &str) -> EntitySnapshot {
    EntitySnapshot {
        id: EntityId::parse(id).unwrap_or_else(|e| panic!("{e}")),
        name: id.to_owned(),
        state: state.to_owned(),
        last_changed: None,
    }
}

/// Scriptable local surface.
///
/// Actions named `fail` are rejected and `hang` sleeps for an hour; anything
/// else takes `delay` and succeeds.
#[derive(Default)]
pub(crate) struct FakeLocal {
    entities: Mutex<Vec<EntitySnapshot>>,
    fail_listing: AtomicBool,
    listing_delay: Mutex<Duration>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeLocal {
    pub(crate) fn with_entities(entities: Vec<EntitySnapshot>) -> Self {
        let fake = Self::default();
        fake.set_entities(entities);
        fake
    }

    pub(crate) fn set_entities(&self, entities: Vec<EntitySnapshot>) {
        *self.entities.lock().unwrap_or_else(|e| e.into_inner()) = entities;
    }

    pub(crate) fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_listing_delay(&self, delay: Duration) {
        *self.listing_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// `entity:action` for every invocation, in start order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl LocalControl for FakeLocal {
    async fn invoke(
        &self,
        entity: &EntityId,
        action: &str,
        _params: &Map<String, Value>,
    ) -> Result<Option<Value>, CoreError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("{entity}:{action}"));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = match action {
            "hang" => Duration::from_secs(3600),
            _ => *self.delay.lock().unwrap_or_else(|e| e.into_inner()),
        };
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if action == "fail" {
            return Err(CommandError::Rejected {
                message: "device jammed".into(),
            }
            .into());
        }
        Ok(Some(json!({ "entity_id": entity.as_str(), "action": action })))
    }

    async fn list_entities(&self) -> Result<Vec<EntitySnapshot>, CoreError> {
        let delay = *self.listing_delay.lock().unwrap_or_else(|e| e.into_inner());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(CoreError::LocalApi {
                message: "connection refused".into(),
                transient: true,
            });
        }
        Ok(self.entities.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn check(&self) -> Result<String, CoreError> {
        Ok("fake".into())
    }
}

/// Outbox that records what it was given while marked live.
pub(crate) struct RecordingOutbox {
    live: AtomicBool,
    sent: Mutex<VecDeque<ClientMessage>>,
}

impl RecordingOutbox {
    pub(crate) fn live() -> Self {
        Self {
            live: AtomicBool::new(true),
            sent: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<ClientMessage> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl Outbox for RecordingOutbox {
    async fn send(&self, message: ClientMessage) -> Result<(), CoreError> {
        if !self.is_live() {
            return Err(CoreError::NotConnected);
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(message);
        Ok(())
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}
