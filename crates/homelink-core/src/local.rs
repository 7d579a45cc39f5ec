// ── Local control surface ──
//
// `LocalControl` is the seam between the agent and whatever actually runs
// the devices. `HomeAssistant` is the production implementation on top of
// `homelink_api::LocalClient`; tests substitute their own.

use std::future::Future;
use std::time::Duration;

use homelink_api::LocalClient;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::capability::READ_STATE;
use crate::model::{EntityId, EntitySnapshot};

pub trait LocalControl: Send + Sync + 'static {
    /// Carry out `action` on `entity`. Returns optional result data.
    fn invoke(
        &self,
        entity: &EntityId,
        action: &str,
        params: &Map<String, Value>,
    ) -> impl Future<Output = Result<Option<Value>, CoreError>> + Send;

    /// Every entity the local surface knows about.
    fn list_entities(&self) -> impl Future<Output = Result<Vec<EntitySnapshot>, CoreError>> + Send;

    /// Cheap reachability check. Returns a human-readable description.
    fn check(&self) -> impl Future<Output = Result<String, CoreError>> + Send;
}

/// Retry schedule for transient local failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub retries: u32,
    /// Delay before the first retry; later retries wait proportionally longer.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Longest a retried call can take when each attempt runs for `per_call`.
    pub fn budget(&self, per_call: Duration) -> Duration {
        let attempts = self.retries.saturating_add(1);
        // Waits grow linearly: delay, 2 * delay, ...
        let waits = self.retries.saturating_mul(attempts) / 2;
        per_call.saturating_mul(attempts) + self.delay.saturating_mul(waits)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_millis(500),
        }
    }
}

pub struct HomeAssistant {
    client: LocalClient,
    retry: RetryPolicy,
}

impl HomeAssistant {
    pub fn new(client: LocalClient, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Run `op`, retrying only transient errors. Timeouts are never retried:
    /// the request may already have taken effect.
    async fn with_retry<T, F, Fut>(&self, what: &str, op: F) -> Result<T, homelink_api::Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, homelink_api::Error>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.retry.retries => {
                    attempt += 1;
                    let wait = self.retry.delay * attempt;
                    warn!(op = what, attempt, error = %e, "transient local API error, retrying");
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }
}

impl LocalControl for HomeAssistant {
    async fn invoke(
        &self,
        entity: &EntityId,
        action: &str,
        params: &Map<String, Value>,
    ) -> Result<Option<Value>, CoreError> {
        if action == READ_STATE {
            let state = self
                .with_retry("get_state", || self.client.state(entity.as_str()))
                .await?;
            return Ok(Some(serde_json::to_value(state).map_err(|e| {
                CoreError::Internal(format!("cannot encode state: {e}"))
            })?));
        }

        let mut data = params.clone();
        data.insert("entity_id".into(), Value::String(entity.to_string()));
        debug!(entity = %entity, service = action, "calling service");

        let changed = self
            .with_retry("call_service", || {
                self.client.call_service(entity.domain(), action, &data)
            })
            .await?;
        Ok(Some(serde_json::to_value(changed).map_err(|e| {
            CoreError::Internal(format!("cannot encode changed states: {e}"))
        })?))
    }

    async fn list_entities(&self) -> Result<Vec<EntitySnapshot>, CoreError> {
        let states = self.with_retry("states", || self.client.states()).await?;
        let total = states.len();

        let entities: Vec<EntitySnapshot> = states
            .into_iter()
            .filter_map(|state| match EntitySnapshot::try_from(state) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    debug!(error = %e, "skipping entity");
                    None
                }
            })
            .collect();

        debug!(total, valid = entities.len(), "fetched local entities");
        Ok(entities)
    }

    async fn check(&self) -> Result<String, CoreError> {
        let status = self.with_retry("api_status", || self.client.api_status()).await?;
        Ok(match status.version {
            Some(version) => format!("{} (version {version})", status.message),
            None => status.message,
        })
    }
}
