// ── Inventory sync ──
//
// Full push once per session, then periodic diffs against the store. The
// store only advances after the remote side has been sent what it holds.

use std::sync::Arc;
use std::time::Duration;

use homelink_api::{ClientMessage, EntityRecord};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::diff::InventoryDiff;
use super::store::EntityStore;
use crate::connection::Outbox;
use crate::error::CoreError;
use crate::local::LocalControl;
use crate::model::EntitySnapshot;

pub struct RegistrySync<L> {
    local: Arc<L>,
    store: Arc<EntityStore>,
    poll_interval: Duration,
    /// Upper bound on one inventory fetch.
    fetch_timeout: Duration,
}

impl<L: LocalControl> RegistrySync<L> {
    pub fn new(
        local: Arc<L>,
        store: Arc<EntityStore>,
        poll_interval: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            local,
            store,
            poll_interval,
            fetch_timeout,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    async fn fetch(&self) -> Result<Vec<EntitySnapshot>, CoreError> {
        tokio::time::timeout(self.fetch_timeout, self.local.list_entities())
            .await
            .map_err(|_| CoreError::LocalApi {
                message: format!(
                    "inventory fetch took longer than {}s",
                    self.fetch_timeout.as_secs()
                ),
                transient: true,
            })?
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// Send the complete inventory. Returns the number of entities sent.
    ///
    /// If the local surface cannot be read in time, the last known inventory
    /// goes out instead so the session still starts from a baseline.
    pub async fn push_full<O: Outbox>(&self, outbox: &O) -> Result<usize, CoreError> {
        let fresh = match self.fetch().await {
            Ok(entities) => Some(entities),
            Err(e) => {
                warn!(error = %e, cached = self.store.len(), "inventory fetch failed, sending last known");
                None
            }
        };

        let entities: Vec<EntityRecord> = match &fresh {
            Some(entities) => entities.iter().map(EntityRecord::from).collect(),
            None => self
                .store
                .snapshot()
                .iter()
                .map(|e| EntityRecord::from(e.as_ref()))
                .collect(),
        };
        let count = entities.len();

        outbox.send(ClientMessage::InventoryFull { entities }).await?;
        if let Some(entities) = fresh {
            self.store.replace_all(entities);
        }
        info!(entities = count, "full inventory pushed");
        Ok(count)
    }

    /// Fetch, diff, and send the diff if there is one.
    pub async fn poll_once<O: Outbox>(&self, outbox: &O) -> Result<Option<InventoryDiff>, CoreError> {
        let current = self.fetch().await?;
        let diff = InventoryDiff::between(&self.store.snapshot(), &current);
        if diff.is_empty() {
            trace!("inventory unchanged");
            return Ok(None);
        }

        outbox.send(diff.to_message()).await?;
        self.store.replace_all(current);
        Ok(Some(diff))
    }

    /// Poll until `cancel` fires. Ticks while the outbox is down are skipped.
    pub async fn run_poller<O: Outbox>(&self, outbox: O, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if outbox.is_live() {
                        match self.poll_once(&outbox).await {
                            Ok(Some(diff)) => info!(
                                added = diff.added.len(),
                                removed = diff.removed.len(),
                                changed = diff.changed.len(),
                                "inventory diff pushed"
                            ),
                            Ok(None) => {}
                            Err(CoreError::NotConnected) => debug!("session gone during inventory poll"),
                            Err(e) => warn!(error = %e, "inventory poll failed"),
                        }
                    } else {
                        debug!("skipping inventory poll while disconnected");
                    }
                }
            }
        }
        debug!("inventory poller stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::EntityId;
    use crate::testing::{FakeLocal, RecordingOutbox, entity};

    fn sync(local: &Arc<FakeLocal>) -> RegistrySync<FakeLocal> {
        RegistrySync::new(
            Arc::clone(local),
            Arc::new(EntityStore::new()),
            Duration::from_secs(60),
            Duration::from_secs(20),
        )
    }

    #[tokio::test]
    async fn full_push_sends_everything_and_fills_store() {
        let local = Arc::new(FakeLocal::with_entities(vec![
            entity("light.kitchen", "on"),
            entity("lock.front_door", "locked"),
        ]));
        let outbox = RecordingOutbox::live();
        let sync = sync(&local);

        assert_eq!(sync.push_full(&outbox).await.unwrap(), 2);
        let sent = outbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), "inventory_full");
        assert_eq!(sync.store().len(), 2);
    }

    #[tokio::test]
    async fn failed_fetch_falls_back_to_cached_inventory() {
        let local = Arc::new(FakeLocal::with_entities(vec![entity("light.kitchen", "on")]));
        let outbox = RecordingOutbox::live();
        let sync = sync(&local);
        sync.push_full(&outbox).await.unwrap();

        local.fail_listing(true);
        assert_eq!(sync.push_full(&outbox).await.unwrap(), 1);
        let ClientMessage::InventoryFull { entities } = &outbox.sent()[1] else {
            panic!("expected full inventory");
        };
        assert_eq!(entities[0].entity_id, "light.kitchen");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_falls_back_to_cached_inventory() {
        let local = Arc::new(FakeLocal::with_entities(vec![entity("light.kitchen", "on")]));
        let outbox = RecordingOutbox::live();
        let sync = sync(&local);
        sync.push_full(&outbox).await.unwrap();

        local.set_entities(vec![entity("fan.attic", "on")]);
        local.set_listing_delay(Duration::from_secs(120));
        let started = Instant::now();
        assert_eq!(sync.push_full(&outbox).await.unwrap(), 1);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(20) && waited < Duration::from_secs(120));

        let ClientMessage::InventoryFull { entities } = &outbox.sent()[1] else {
            panic!("expected full inventory");
        };
        assert_eq!(entities[0].entity_id, "light.kitchen");
        assert!(sync.store().contains(&EntityId::parse("light.kitchen").unwrap()));
    }

    #[tokio::test]
    async fn empty_diff_is_not_sent() {
        let local = Arc::new(FakeLocal::with_entities(vec![entity("light.kitchen", "on")]));
        let outbox = RecordingOutbox::live();
        let sync = sync(&local);
        sync.push_full(&outbox).await.unwrap();

        assert!(sync.poll_once(&outbox).await.unwrap().is_none());
        assert_eq!(outbox.sent().len(), 1);
    }

    #[tokio::test]
    async fn diff_is_sent_and_store_advances() {
        let local = Arc::new(FakeLocal::with_entities(vec![entity("light.kitchen", "on")]));
        let outbox = RecordingOutbox::live();
        let sync = sync(&local);
        sync.push_full(&outbox).await.unwrap();

        local.set_entities(vec![entity("light.kitchen", "off"), entity("fan.attic", "on")]);
        let diff = sync.poll_once(&outbox).await.unwrap().unwrap();
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(outbox.sent()[1].kind(), "inventory_diff");

        // Nothing new since the last push.
        assert!(sync.poll_once(&outbox).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unsent_diff_leaves_store_untouched() {
        let local = Arc::new(FakeLocal::with_entities(vec![entity("light.kitchen", "on")]));
        let outbox = RecordingOutbox::live();
        let sync = sync(&local);
        sync.push_full(&outbox).await.unwrap();

        local.set_entities(vec![entity("light.kitchen", "off")]);
        outbox.set_live(false);
        assert!(matches!(
            sync.poll_once(&outbox).await,
            Err(CoreError::NotConnected)
        ));

        outbox.set_live(true);
        let diff = sync.poll_once(&outbox).await.unwrap().unwrap();
        assert_eq!(diff.changed.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_skips_ticks_while_disconnected() {
        let local = Arc::new(FakeLocal::with_entities(vec![entity("light.kitchen", "on")]));
        let outbox = Arc::new(RecordingOutbox::live());
        let sync = Arc::new(sync(&local));
        sync.push_full(&outbox).await.unwrap();

        outbox.set_live(false);
        local.set_entities(vec![entity("light.kitchen", "off")]);

        let cancel = CancellationToken::new();
        let task = {
            let sync = Arc::clone(&sync);
            let outbox = Arc::clone(&outbox);
            let cancel = cancel.clone();
            tokio::spawn(async move { sync.run_poller(outbox, cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(outbox.sent().len(), 1, "no diffs while disconnected");

        outbox.set_live(true);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(outbox.sent().len(), 2, "one diff, no backlog");

        cancel.cancel();
        task.await.unwrap();
    }
}
