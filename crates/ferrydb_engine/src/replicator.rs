//! Replicator state-machine driver.
//!
//! Each started replicator runs on its own thread. A session moves
//! `Connecting → Busy ⇄ Idle`, dropping to `Offline` on transient endpoint
//! loss (retried per the configured policy) and ending in `Stopped` on a
//! clean shutdown or `Error` when retries are exhausted. Within a cycle,
//! pulls are applied before pushes, and progress is monotone.
//!
//! Cursors record the last sequence synchronized per direction; resetting
//! the checkpoint clears them, forcing a full re-sync.

use crate::engine::{commit_and_notify, EngineShared};
use crate::store::{DbShard, PendingWrite};
use ferrydb_boundary::{
    DatabaseHandle, Endpoint, ReplicatorActivity, ReplicatorConfig, ReplicatorDirection,
    ReplicatorHandle, ReplicatorStatus,
};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Per-direction sync cursors.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Checkpoint {
    /// Last local sequence pushed to the endpoint.
    pub push_cursor: u64,
    /// Last endpoint sequence pulled locally.
    pub pull_cursor: u64,
}

/// Wakes an idle continuous replicator when watched databases commit.
pub(crate) struct WakeSignal {
    dirty: Mutex<bool>,
    condvar: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self {
            dirty: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub fn notify(&self) {
        let mut dirty = self.dirty.lock();
        *dirty = true;
        self.condvar.notify_all();
    }

    /// Waits until notified or the timeout elapses; clears the flag.
    pub fn wait(&self, timeout: Duration) {
        let mut dirty = self.dirty.lock();
        if !*dirty {
            let _ = self.condvar.wait_for(&mut dirty, timeout);
        }
        *dirty = false;
    }
}

/// Engine-side state of one replicator.
pub(crate) struct ReplicatorState {
    pub handle: ReplicatorHandle,
    pub config: ReplicatorConfig,
    pub status: Mutex<ReplicatorStatus>,
    pub stop_requested: AtomicBool,
    pub running: AtomicBool,
    pub checkpoint: Mutex<Checkpoint>,
    pub wake: WakeSignal,
}

impl ReplicatorState {
    pub fn new(handle: ReplicatorHandle, config: ReplicatorConfig) -> Self {
        Self {
            handle,
            config,
            status: Mutex::new(ReplicatorStatus::stopped()),
            stop_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            checkpoint: Mutex::new(Checkpoint::default()),
            wake: WakeSignal::new(),
        }
    }

    /// Whether commits to `db` are relevant to this replicator.
    pub fn watches(&self, db: &DatabaseHandle) -> bool {
        if self.config.database == *db {
            return true;
        }
        matches!(&self.config.endpoint, Endpoint::LocalDatabase(handle) if handle == db)
    }
}

enum Fault {
    /// Worth retrying per the retry policy.
    Transient(String),
    /// Not retryable; surfaces as an Error status.
    Fatal(String),
}

enum Outcome {
    Stopped,
    Fault(String),
}

/// One unit of pending transfer work.
struct PendingItem {
    pull: bool,
    sequence: u64,
    id: String,
}

/// Thread entry point for a started replicator.
pub(crate) fn run(shared: Weak<EngineShared>, state: Arc<ReplicatorState>) {
    let outcome = drive(&shared, &state);

    let mut status = state.status.lock();
    match outcome {
        Outcome::Stopped => {
            status.activity = ReplicatorActivity::Stopped;
        }
        Outcome::Fault(message) => {
            tracing::warn!(replicator = ?state.handle, error = %message, "replicator faulted");
            status.activity = ReplicatorActivity::Error;
            status.error = Some(message);
        }
    }
    drop(status);
    state.running.store(false, Ordering::SeqCst);
}

fn drive(shared: &Weak<EngineShared>, state: &Arc<ReplicatorState>) -> Outcome {
    let config = &state.config;
    let max_attempts = config.max_attempts.max(1);
    let mut attempts: u32 = 0;

    'session: loop {
        if state.stop_requested.load(Ordering::SeqCst) {
            return Outcome::Stopped;
        }
        set_activity(state, ReplicatorActivity::Connecting);

        let Some(engine) = shared.upgrade() else {
            return Outcome::Stopped;
        };
        if let Err(fault) = lookup_shards(&engine, config).map(|_| ()) {
            drop(engine);
            match fault {
                Fault::Fatal(message) => return Outcome::Fault(message),
                Fault::Transient(message) => {
                    attempts += 1;
                    if attempts >= max_attempts {
                        return Outcome::Fault(message);
                    }
                    set_activity(state, ReplicatorActivity::Offline);
                    if !wait_with_stop(state, config.max_attempt_wait_time) {
                        return Outcome::Stopped;
                    }
                    continue 'session;
                }
            }
        }
        attempts = 0;
        drop(engine);

        // Sync cycles against the connected endpoint.
        loop {
            if state.stop_requested.load(Ordering::SeqCst) {
                return Outcome::Stopped;
            }
            let Some(engine) = shared.upgrade() else {
                return Outcome::Stopped;
            };

            let pending = match collect_pending(&engine, state) {
                Ok(pending) => pending,
                Err(Fault::Fatal(message)) => return Outcome::Fault(message),
                Err(Fault::Transient(message)) => {
                    drop(engine);
                    attempts += 1;
                    if attempts >= max_attempts {
                        return Outcome::Fault(message);
                    }
                    set_activity(state, ReplicatorActivity::Offline);
                    if !wait_with_stop(state, config.max_attempt_wait_time) {
                        return Outcome::Stopped;
                    }
                    continue 'session;
                }
            };

            if pending.is_empty() {
                {
                    let mut status = state.status.lock();
                    status.progress.complete = 1.0;
                    status.activity = ReplicatorActivity::Idle;
                }
                if !config.continuous {
                    return Outcome::Stopped;
                }
                drop(engine);
                state.wake.wait(config.heartbeat);
                continue;
            }

            // New cycle: progress resets, then rises monotonically.
            {
                let mut status = state.status.lock();
                status.activity = ReplicatorActivity::Busy;
                status.progress.complete = 0.0;
            }

            let total = pending.len();
            for (index, item) in pending.into_iter().enumerate() {
                if state.stop_requested.load(Ordering::SeqCst) {
                    return Outcome::Stopped;
                }
                match transfer(&engine, state, &item) {
                    Ok(wrote) => {
                        advance_cursor(state, &item);
                        let mut status = state.status.lock();
                        if wrote {
                            status.progress.document_count += 1;
                        }
                        status.progress.complete = (index + 1) as f64 / total as f64;
                    }
                    Err(Fault::Fatal(message)) => return Outcome::Fault(message),
                    Err(Fault::Transient(message)) => {
                        attempts += 1;
                        if attempts >= max_attempts {
                            return Outcome::Fault(message);
                        }
                        set_activity(state, ReplicatorActivity::Offline);
                        if !wait_with_stop(state, config.max_attempt_wait_time) {
                            return Outcome::Stopped;
                        }
                        continue 'session;
                    }
                }
            }
        }
    }
}

fn set_activity(state: &ReplicatorState, activity: ReplicatorActivity) {
    state.status.lock().activity = activity;
}

/// Sleeps for `total`, polling the stop flag. Returns false if stopped.
fn wait_with_stop(state: &ReplicatorState, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if state.stop_requested.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(STOP_POLL_INTERVAL.min(deadline - now));
    }
}

/// Resolves the local and endpoint databases for a session.
fn lookup_shards(
    engine: &Arc<EngineShared>,
    config: &ReplicatorConfig,
) -> Result<(Arc<DbShard>, Arc<DbShard>), Fault> {
    let databases = engine.databases.read();

    let source = databases
        .get(&config.database)
        .cloned()
        .ok_or_else(|| Fault::Fatal("local database is closed".to_string()))?;

    let target = match &config.endpoint {
        Endpoint::LocalDatabase(handle) => databases
            .get(handle)
            .cloned()
            .ok_or_else(|| Fault::Transient("endpoint database is not open".to_string()))?,
        Endpoint::Url(url) => {
            return Err(Fault::Transient(format!("endpoint unreachable: {url}")))
        }
    };

    Ok((source, target))
}

/// Revisions not yet synchronized, pulls ahead of pushes.
fn collect_pending(
    engine: &Arc<EngineShared>,
    state: &ReplicatorState,
) -> Result<Vec<PendingItem>, Fault> {
    let config = &state.config;
    let (source, target) = lookup_shards(engine, config)?;
    let checkpoint = *state.checkpoint.lock();

    let mut pending = Vec::new();
    if matches!(
        config.direction,
        ReplicatorDirection::Pull | ReplicatorDirection::PushAndPull
    ) {
        for (sequence, id) in target.changes_since(checkpoint.pull_cursor) {
            pending.push(PendingItem {
                pull: true,
                sequence,
                id,
            });
        }
    }
    if matches!(
        config.direction,
        ReplicatorDirection::Push | ReplicatorDirection::PushAndPull
    ) {
        for (sequence, id) in source.changes_since(checkpoint.push_cursor) {
            pending.push(PendingItem {
                pull: false,
                sequence,
                id,
            });
        }
    }
    Ok(pending)
}

/// Copies one revision across. Returns whether a write was applied;
/// revisions the receiving side already has are skipped.
fn transfer(
    engine: &Arc<EngineShared>,
    state: &ReplicatorState,
    item: &PendingItem,
) -> Result<bool, Fault> {
    let (source, target) = lookup_shards(engine, &state.config)?;
    let (from, to) = if item.pull {
        (target, source)
    } else {
        (source, target)
    };

    let Some(revision) = from.revision(&item.id) else {
        return Ok(false);
    };

    let receiver_revision = to.revision(&item.id);
    let already_applied = match &receiver_revision {
        Some(existing) => existing.body == revision.body,
        None => revision.body.is_none(),
    };
    if already_applied {
        return Ok(false);
    }

    commit_and_notify(
        engine,
        &to,
        vec![PendingWrite {
            id: item.id.clone(),
            body: revision.body,
        }],
    )
    .map_err(|e| Fault::Fatal(format!("failed to apply revision: {e}")))?;

    Ok(true)
}

fn advance_cursor(state: &ReplicatorState, item: &PendingItem) {
    let mut checkpoint = state.checkpoint.lock();
    if item.pull {
        checkpoint.pull_cursor = checkpoint.pull_cursor.max(item.sequence);
    } else {
        checkpoint.push_cursor = checkpoint.push_cursor.max(item.sequence);
    }
}
