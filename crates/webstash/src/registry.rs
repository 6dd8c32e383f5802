//! Controller registry: memoization by config fingerprint plus cold-start
//! queueing.
//!
//! For a given configuration — compared structurally, never by reference —
//! at most one cache controller is ever constructed. The first call for a
//! fingerprint enqueues itself, builds the controller, then flushes the
//! queue in FIFO submission order. Calls arriving while construction is in
//! flight enqueue behind it and poll their completion slot at a fixed
//! interval, giving up after a fixed ceiling.

use crate::error::{ErrorKind, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use webstash_config::Config;
use webstash_loader::{CacheController, Collaborators, Resource};
use webstash_storage::StorageController;
use webstash_storage::manifest::ManifestHandle;

/// How often a queued call checks its completion slot.
const POLL_INTERVAL: Duration = Duration::from_millis(15);
/// Total polling budget before a queued call gives up.
const READY_CEILING: Duration = Duration::from_millis(5000);

/// An operation dispatched through the registry.
pub(crate) enum Op {
    Load(Vec<Resource>),
    Remove(Vec<Resource>),
}

/// What an operation resolved to.
pub(crate) enum OpOutcome {
    Loaded(Arc<StorageController>),
    Removed,
}

impl std::fmt::Debug for OpOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpOutcome::Loaded(_) => f.write_str("Loaded(..)"),
            OpOutcome::Removed => f.write_str("Removed"),
        }
    }
}

/// Hands the adopted controller to a queued call. Invoked by the flusher in
/// FIFO order; each invocation spawns its operation, so start order equals
/// submission order.
type Thunk = Box<dyn FnOnce(Arc<CacheController>) + Send>;

enum Slot {
    Initializing(Pending),
    Ready(Arc<CacheController>),
}

struct Pending {
    queue: Vec<Thunk>,
    calls: u32,
}

/// What `dispatch` decided under the registry lock.
enum Action {
    /// Controller already adopted; run the operation inline.
    Immediate(Arc<CacheController>, Op),
    /// This call registered the fingerprint; it constructs the controller
    /// and flushes the queue (its own operation is the queue head).
    Construct(oneshot::Receiver<OpOutcome>),
    /// Another call is constructing; wait on the completion slot.
    Wait(oneshot::Receiver<OpOutcome>),
}

pub(crate) struct Hub {
    collaborators: Collaborators,
    default_config: Mutex<Config>,
    registry: Mutex<HashMap<String, Slot>>,
    /// Handed to controllers constructed after it is attached.
    manifest: Mutex<Option<ManifestHandle>>,
}

impl Hub {
    pub(crate) fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            default_config: Mutex::new(Config::default()),
            registry: Mutex::new(HashMap::new()),
            manifest: Mutex::new(None),
        }
    }

    pub(crate) fn attach_manifest(&self, handle: ManifestHandle) {
        *self.manifest.lock().unwrap() = Some(handle);
    }

    /// Replace the default configuration used when callers pass none.
    /// Pure assignment; existing controllers keep the config they were
    /// built with.
    pub(crate) fn setup(&self, config: Config) {
        *self.default_config.lock().unwrap() = config;
    }

    fn effective(&self, config: Option<Config>) -> Config {
        config.unwrap_or_else(|| self.default_config.lock().unwrap().clone())
    }

    pub(crate) async fn dispatch(&self, config: Option<Config>, op: Op) -> Result<OpOutcome> {
        let config = self.effective(config);
        let fingerprint = config.fingerprint().map_err(|e| e.raise(ErrorKind::Config))?;

        // Lookup-or-create is atomic within this one lock acquisition: two
        // concurrent cold calls for the same fingerprint must agree on who
        // constructs. No await happens while the lock is held.
        let action = {
            let mut registry = self.registry.lock().unwrap();
            match registry.get_mut(&fingerprint) {
                Some(Slot::Ready(controller)) => Action::Immediate(controller.clone(), op),
                Some(Slot::Initializing(pending)) => {
                    let (tx, rx) = oneshot::channel();
                    pending.queue.push(make_thunk(op, tx));
                    pending.calls += 1;
                    tracing::debug!(fingerprint = %&fingerprint[..8], queued = pending.calls, "queued behind cold start");
                    Action::Wait(rx)
                },
                None => {
                    let (tx, rx) = oneshot::channel();
                    let pending = Pending { queue: vec![make_thunk(op, tx)], calls: 1 };
                    registry.insert(fingerprint.clone(), Slot::Initializing(pending));
                    Action::Construct(rx)
                },
            }
        };

        match action {
            Action::Immediate(controller, op) => Ok(run(controller, op).await),
            Action::Construct(rx) => {
                let manifest = self.manifest.lock().unwrap().clone();
                let controller =
                    Arc::new(CacheController::init_with_manifest(&config, self.collaborators.clone(), manifest).await);
                let queue = {
                    let mut registry = self.registry.lock().unwrap();
                    match registry.insert(fingerprint.clone(), Slot::Ready(controller.clone())) {
                        Some(Slot::Initializing(pending)) => pending.queue,
                        _ => Vec::new(),
                    }
                };
                tracing::debug!(fingerprint = %&fingerprint[..8], flushing = queue.len(), "controller ready");
                for thunk in queue {
                    thunk(controller.clone());
                }
                self.await_outcome(rx).await
            },
            Action::Wait(rx) => self.await_outcome(rx).await,
        }
    }

    /// Poll the completion slot until it fills or the budget runs out.
    async fn await_outcome(&self, mut rx: oneshot::Receiver<OpOutcome>) -> Result<OpOutcome> {
        let ticks = (READY_CEILING.as_millis() / POLL_INTERVAL.as_millis()) as u64;
        for _ in 0..ticks {
            match rx.try_recv() {
                Ok(outcome) => return Ok(outcome),
                Err(oneshot::error::TryRecvError::Empty) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(oneshot::error::TryRecvError::Closed) => break,
            }
        }
        exn::bail!(ErrorKind::ReadyTimeout)
    }
}

fn make_thunk(op: Op, tx: oneshot::Sender<OpOutcome>) -> Thunk {
    Box::new(move |controller| {
        tokio::spawn(async move {
            let _ = tx.send(run(controller, op).await);
        });
    })
}

async fn run(controller: Arc<CacheController>, op: Op) -> OpOutcome {
    match op {
        Op::Load(resources) => {
            controller.load(resources).await;
            OpOutcome::Loaded(controller.storage())
        },
        Op::Remove(resources) => {
            controller.remove(resources).await;
            OpOutcome::Removed
        },
    }
}
