// ── Command dispatcher ──
//
// Takes inbound commands in arrival order, answers retries from the result
// cache, validates targets against the entity store and the allow-list, and
// runs the rest on the local surface under a FIFO semaphore. Results that
// cannot be sent are held and replayed on the next session.

pub mod cache;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::connection::Outbox;
use crate::error::CommandError;
use crate::local::LocalControl;
use crate::model::{Command, CommandResult, EntityId, capability};
use crate::registry::EntityStore;

use self::cache::{Lookup, ResultCache};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_concurrent: usize,
    pub command_timeout: Duration,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            command_timeout: Duration::from_secs(30),
            cache_capacity: 512,
            cache_ttl: Duration::from_secs(15 * 60),
        }
    }
}

pub struct Dispatcher<L, O> {
    local: Arc<L>,
    outbox: O,
    store: Arc<EntityStore>,
    permits: Arc<Semaphore>,
    cache: Mutex<ResultCache>,
    /// Results produced while no session was live, oldest first.
    pending: Mutex<VecDeque<CommandResult>>,
    max_pending: usize,
    tracker: TaskTracker,
    command_timeout: Duration,
}

impl<L: LocalControl, O: Outbox> Dispatcher<L, O> {
    pub fn new(local: Arc<L>, outbox: O, store: Arc<EntityStore>, settings: &DispatchSettings) -> Self {
        Self {
            local,
            outbox,
            store,
            permits: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            cache: Mutex::new(ResultCache::new(settings.cache_capacity, settings.cache_ttl)),
            pending: Mutex::new(VecDeque::new()),
            max_pending: settings.cache_capacity.max(1),
            tracker: TaskTracker::new(),
            command_timeout: settings.command_timeout,
        }
    }

    /// Consume `commands` until `stop` fires or the sender goes away.
    pub async fn run(self: Arc<Self>, mut commands: mpsc::UnboundedReceiver<Command>, stop: CancellationToken) {
        loop {
            let command = tokio::select! {
                biased;
                () = stop.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            let id = command.id.clone();
            tokio::select! {
                biased;
                () = stop.cancelled() => {
                    // Still waiting for a permit: release the claim.
                    self.cache().forget(&id);
                    break;
                }
                () = self.handle(command) => {}
            }
        }
        commands.close();
        debug!("dispatcher stopped accepting commands");
    }

    /// Process one command. Returns once it is answered or has a permit.
    pub async fn handle(self: &Arc<Self>, command: Command) {
        let lookup = self.cache().begin(&command.id);
        match lookup {
            Lookup::Done(result) => {
                info!(command_id = %command.id, "duplicate command, replaying cached result");
                self.deliver(result).await;
                return;
            }
            Lookup::InFlight => {
                debug!(command_id = %command.id, "duplicate of in-flight command ignored");
                return;
            }
            Lookup::New => {}
        }

        let target = match self.validate(&command) {
            Ok(target) => target,
            Err(err) => {
                warn!(
                    command_id = %command.id,
                    entity = %command.entity,
                    action = %command.action,
                    error = %err,
                    "command refused"
                );
                self.finish(CommandResult::failed(command.id, err.to_string()))
                    .await;
                return;
            }
        };

        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            self.cache().forget(&command.id);
            return;
        };
        let this = Arc::clone(self);
        self.tracker.spawn(async move {
            let result = this.execute(&command, &target).await;
            drop(permit);
            this.finish(result).await;
        });
    }

    /// Send every held result. Returns how many went out.
    pub async fn flush_pending(&self) -> usize {
        let mut sent = 0usize;
        loop {
            let Some(result) = self.pending().pop_front() else {
                break;
            };
            if let Err(e) = self.outbox.send(result.to_message()).await {
                debug!(error = %e, "replay interrupted");
                self.pending().push_front(result);
                break;
            }
            sent += 1;
        }
        if sent > 0 {
            info!(count = sent, "replayed held results");
        }
        sent
    }

    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    /// Stop taking new work and wait up to `grace` for in-flight commands.
    /// Returns `true` if everything finished.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        let finished = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if !finished {
            warn!(remaining = self.tracker.len(), "in-flight commands still running at shutdown");
        }
        let held = self.pending_len();
        if held > 0 {
            warn!(held, "results could not be delivered before shutdown");
        }
        finished
    }

    fn validate(&self, command: &Command) -> Result<EntityId, CommandError> {
        let unknown = || CommandError::UnknownEntity {
            entity: command.entity.clone(),
        };
        let id = EntityId::parse(&command.entity).map_err(|_| unknown())?;
        if !self.store.contains(&id) {
            return Err(unknown());
        }
        if !capability::supports(id.domain(), &command.action) {
            return Err(CommandError::UnsupportedAction {
                entity: command.entity.clone(),
                action: command.action.clone(),
            });
        }
        Ok(id)
    }

    async fn execute(&self, command: &Command, target: &EntityId) -> CommandResult {
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.command_timeout,
            self.local.invoke(target, &command.action, &command.params),
        )
        .await;

        let result = match outcome {
            Ok(Ok(data)) => CommandResult::succeeded(command.id.clone(), data),
            Ok(Err(e)) => CommandResult::failed(command.id.clone(), e.to_string()),
            Err(_) => CommandResult::timed_out(
                command.id.clone(),
                format!(
                    "no response from local surface within {}s",
                    self.command_timeout.as_secs()
                ),
            ),
        };
        info!(
            command_id = %command.id,
            entity = %target,
            action = %command.action,
            status = %result.status,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "command finished"
        );
        result
    }

    async fn finish(&self, result: CommandResult) {
        self.cache().complete(result.clone());
        self.deliver(result).await;
    }

    async fn deliver(&self, result: CommandResult) {
        match self.outbox.send(result.to_message()).await {
            Ok(()) => debug!(command_id = %result.id, status = %result.status, "result sent"),
            Err(e) => {
                debug!(command_id = %result.id, error = %e, "holding result for next session");
                self.hold(result);
                // The session may have come up while this send was failing.
                if self.outbox.is_live() {
                    self.flush_pending().await;
                }
            }
        }
    }

    fn hold(&self, result: CommandResult) {
        let mut pending = self.pending();
        if pending.len() >= self.max_pending {
            if let Some(dropped) = pending.pop_front() {
                warn!(command_id = %dropped.id, "held result queue full, dropping oldest");
            }
        }
        pending.push_back(result);
    }

    fn cache(&self) -> MutexGuard<'_, ResultCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<CommandResult>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
