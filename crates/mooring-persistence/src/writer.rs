//! ---
//! mooring_section: "03-persistence-logging"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Persistence abstractions and storage bindings."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
//! Debounced, coalescing write queue drained by a single background thread.
//!
//! Pending work is keyed by `(kind, id)`: a later write or delete replaces
//! the earlier one, so the store only ever sees the latest state of an
//! object and operations on one id reach it in submission order. A batch is
//! drained once the oldest pending entry is `period` old, as soon as the
//! queue reaches `high_water`, or when a caller asks to wait for completion.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use mooring_common::PersistenceConfig;
use mooring_memento::{Kind, Memento};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::handler::{PersistenceDisposition, PersistenceExceptionHandler};
use crate::metrics::PersistenceMetrics;
use crate::store::MementoStore;
use crate::{PersistenceError, Result};

const WORKER_NAME: &str = "memento-writer";

/// Timing knobs for [`MementoWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    /// Debounce window measured from the oldest pending operation.
    pub period: Duration,
    /// Pending-op count that triggers an immediate drain.
    pub high_water: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(1000),
            high_water: 1024,
        }
    }
}

impl From<&PersistenceConfig> for WriterConfig {
    fn from(config: &PersistenceConfig) -> Self {
        Self {
            period: config.period,
            high_water: config.high_water.max(1),
        }
    }
}

/// Point-in-time copy of the writer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Operations accepted into the queue.
    pub enqueued: u64,
    /// Accepted operations replaced before being drained.
    pub coalesced: u64,
    /// Successful store writes.
    pub written: u64,
    /// Successful store deletes.
    pub deleted: u64,
    /// Store operations that failed.
    pub failed: u64,
    /// Operations refused or discarded because the writer was not running.
    pub dropped: u64,
    /// Batches applied.
    pub batches: u64,
}

#[derive(Debug)]
enum PendingOp {
    Write(Memento),
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Stopping,
    Halted,
}

struct QueueState {
    store: Arc<dyn MementoStore>,
    pending: IndexMap<(Kind, String), PendingOp>,
    first_pending_at: Option<Instant>,
    flush_requested: bool,
    /// Bumped on every accepted operation.
    enqueued_seq: u64,
    /// Every operation with a sequence at or below this has been attempted.
    completed_seq: u64,
    in_flight: bool,
    paused: bool,
    phase: Phase,
    worker_exited: bool,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    coalesced: AtomicU64,
    written: AtomicU64,
    deleted: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    batches: AtomicU64,
}

struct Shared {
    config: WriterConfig,
    state: Mutex<QueueState>,
    /// Signalled when the worker has something new to look at.
    wake: Condvar,
    /// Signalled whenever a batch finishes or the worker exits.
    settled: Condvar,
    handler: Arc<dyn PersistenceExceptionHandler>,
    metrics: Option<PersistenceMetrics>,
    counters: Counters,
}

/// Asynchronous writer that keeps a [`MementoStore`] in step with live objects.
pub struct MementoWriter {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    handler_stopped: AtomicBool,
}

impl MementoWriter {
    /// Spawn the writer thread against `store`.
    pub fn start(
        store: Arc<dyn MementoStore>,
        handler: Arc<dyn PersistenceExceptionHandler>,
        config: WriterConfig,
    ) -> Result<Self> {
        Self::start_with_metrics(store, handler, config, None)
    }

    /// Like [`MementoWriter::start`], also publishing [`PersistenceMetrics`].
    pub fn start_with_metrics(
        store: Arc<dyn MementoStore>,
        handler: Arc<dyn PersistenceExceptionHandler>,
        config: WriterConfig,
        metrics: Option<PersistenceMetrics>,
    ) -> Result<Self> {
        let config = WriterConfig {
            high_water: config.high_water.max(1),
            ..config
        };
        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(QueueState {
                store,
                pending: IndexMap::new(),
                first_pending_at: None,
                flush_requested: false,
                enqueued_seq: 0,
                completed_seq: 0,
                in_flight: false,
                paused: false,
                phase: Phase::Running,
                worker_exited: false,
            }),
            wake: Condvar::new(),
            settled: Condvar::new(),
            handler,
            metrics,
            counters: Counters::default(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(WORKER_NAME.into())
            .spawn(move || run_worker(worker_shared))?;
        info!(
            period_ms = config.period.as_millis() as u64,
            high_water = config.high_water,
            "memento writer started"
        );

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
            handler_stopped: AtomicBool::new(false),
        })
    }

    /// Queue a write of `memento`. Returns `false` when the writer no longer accepts work.
    pub fn schedule_write(&self, memento: Memento) -> bool {
        let kind = memento.kind();
        let id = memento.id().to_owned();
        self.enqueue(kind, id, PendingOp::Write(memento))
    }

    /// Queue removal of `(kind, id)`. Returns `false` when the writer no longer accepts work.
    pub fn schedule_delete(&self, kind: Kind, id: &str) -> bool {
        if kind == Kind::Unknown {
            debug!(id, "ignoring delete for unclassified object");
            return false;
        }
        self.enqueue(kind, id.to_owned(), PendingOp::Delete)
    }

    /// Route a snapshot failure raised on the mutating thread to the handler.
    pub fn report_generation_failure(&self, kind: Kind, id: &str, error: anyhow::Error) {
        let error = PersistenceError::Generation {
            kind,
            id: id.to_owned(),
            source: error,
        };
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_failed(kind, "generate");
        }
        let verdict = self.shared.handler.on_generate_memento_failed(kind, id, &error);
        if verdict == PersistenceDisposition::Halt {
            let mut state = self.shared.state.lock();
            halt_locked(&self.shared, &mut state);
            drop(state);
            self.shared.wake.notify_all();
            self.shared.settled.notify_all();
        }
    }

    /// Whether new operations are still accepted.
    pub fn is_accepting(&self) -> bool {
        self.shared.state.lock().phase == Phase::Running
    }

    /// Whether the exception handler stopped the writer.
    pub fn is_halted(&self) -> bool {
        self.shared.state.lock().phase == Phase::Halted
    }

    /// Operations waiting to be drained.
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// The store new batches are written to.
    pub fn store(&self) -> Arc<dyn MementoStore> {
        Arc::clone(&self.shared.state.lock().store)
    }

    pub fn stats(&self) -> WriterStats {
        let counters = &self.shared.counters;
        WriterStats {
            enqueued: counters.enqueued.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            written: counters.written.load(Ordering::Relaxed),
            deleted: counters.deleted.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            batches: counters.batches.load(Ordering::Relaxed),
        }
    }

    /// Block until every operation accepted before this call has been attempted.
    ///
    /// Skips the debounce window. Fails with [`PersistenceError::Interrupted`]
    /// if the writer halts or exits before that point.
    pub fn wait_for_pending_complete(&self) -> Result<()> {
        self.wait_until(None).map(|_| ())
    }

    /// Bounded variant of [`Self::wait_for_pending_complete`]; `Ok(false)` on timeout.
    pub fn wait_for_pending_complete_timeout(&self, timeout: Duration) -> Result<bool> {
        self.wait_until(Some(Instant::now() + timeout))
    }

    /// Redirect all subsequent batches to `store`.
    ///
    /// Operations queued before the call are written to the previous store,
    /// after any batch already in flight against it. Operations queued once
    /// this returns go to `store` only.
    pub fn set_store(&self, store: Arc<dyn MementoStore>) {
        let shared = &self.shared;
        let (batch, target, previous) = {
            let mut state = shared.state.lock();
            while state.paused {
                shared.settled.wait(&mut state);
            }
            state.paused = true;
            while state.in_flight {
                shared.settled.wait(&mut state);
            }
            let batch = std::mem::take(&mut state.pending);
            state.first_pending_at = None;
            let target = state.enqueued_seq;
            let previous = std::mem::replace(&mut state.store, store);
            (batch, target, previous)
        };

        let disposition = if batch.is_empty() {
            PersistenceDisposition::Continue
        } else {
            apply_batch(shared, previous.as_ref(), batch)
        };

        let mut state = shared.state.lock();
        state.completed_seq = state.completed_seq.max(target);
        state.paused = false;
        if disposition == PersistenceDisposition::Halt {
            halt_locked(shared, &mut state);
        }
        info!(
            from = %previous.describe(),
            to = %state.store.describe(),
            "memento store replaced"
        );
        drop(state);
        shared.wake.notify_all();
        shared.settled.notify_all();
    }

    /// Drain what is queued, join the worker, and stop the handler. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.phase == Phase::Running {
                state.phase = Phase::Stopping;
            }
        }
        self.shared.wake.notify_all();

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("memento writer thread panicked");
            }
        }

        if !self.handler_stopped.swap(true, Ordering::AcqRel) {
            self.shared.handler.stop();
            let stats = self.stats();
            info!(
                written = stats.written,
                deleted = stats.deleted,
                failed = stats.failed,
                dropped = stats.dropped,
                "memento writer stopped"
            );
        }
    }

    fn enqueue(&self, kind: Kind, id: String, op: PendingOp) -> bool {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.phase != Phase::Running {
            shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(%kind, id = %id, "memento writer not accepting work; dropping operation");
            return false;
        }

        state.enqueued_seq += 1;
        shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        if state.pending.insert((kind, id), op).is_some() {
            shared.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &shared.metrics {
                metrics.record_coalesced(kind);
            }
        }

        let mut notify = false;
        if state.first_pending_at.is_none() {
            state.first_pending_at = Some(Instant::now());
            notify = true;
        }
        let depth = state.pending.len();
        if depth >= shared.config.high_water && !state.flush_requested {
            state.flush_requested = true;
            notify = true;
        }
        if let Some(metrics) = &shared.metrics {
            metrics.set_queue_depth(depth);
        }
        drop(state);

        if notify {
            shared.wake.notify_one();
        }
        true
    }

    fn wait_until(&self, deadline: Option<Instant>) -> Result<bool> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let target = state.enqueued_seq;
        if state.completed_seq >= target {
            return Ok(true);
        }
        state.flush_requested = true;
        shared.wake.notify_one();

        loop {
            if state.completed_seq >= target {
                return Ok(true);
            }
            if state.phase == Phase::Halted || state.worker_exited {
                return Err(PersistenceError::Interrupted);
            }
            match deadline {
                Some(deadline) => {
                    if shared.settled.wait_until(&mut state, deadline).timed_out() {
                        return Ok(state.completed_seq >= target);
                    }
                }
                None => shared.settled.wait(&mut state),
            }
        }
    }
}

impl Drop for MementoWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for MementoWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MementoWriter")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn run_worker(shared: Arc<Shared>) {
    let mut state = shared.state.lock();
    loop {
        match state.phase {
            Phase::Halted => break,
            Phase::Stopping if state.pending.is_empty() && !state.paused => break,
            _ => {}
        }
        if state.pending.is_empty() || state.paused {
            shared.wake.wait(&mut state);
            continue;
        }

        let urgent = state.flush_requested
            || state.phase == Phase::Stopping
            || state.pending.len() >= shared.config.high_water;
        if !urgent {
            let due = state
                .first_pending_at
                .map(|at| at + shared.config.period)
                .unwrap_or_else(Instant::now);
            if Instant::now() < due {
                shared.wake.wait_until(&mut state, due);
                continue;
            }
        }

        let batch = std::mem::take(&mut state.pending);
        let target = state.enqueued_seq;
        state.first_pending_at = None;
        state.flush_requested = false;
        state.in_flight = true;
        if let Some(metrics) = &shared.metrics {
            metrics.set_queue_depth(0);
        }
        let store = Arc::clone(&state.store);

        let disposition =
            MutexGuard::unlocked(&mut state, || apply_batch(&shared, store.as_ref(), batch));

        state.in_flight = false;
        state.completed_seq = state.completed_seq.max(target);
        if disposition == PersistenceDisposition::Halt {
            halt_locked(&shared, &mut state);
        }
        shared.settled.notify_all();
    }
    state.worker_exited = true;
    drop(state);
    shared.settled.notify_all();
    debug!("memento writer thread exiting");
}

fn apply_batch(
    shared: &Shared,
    store: &dyn MementoStore,
    batch: IndexMap<(Kind, String), PendingOp>,
) -> PersistenceDisposition {
    let started = Instant::now();
    let total = batch.len();
    let counters = &shared.counters;
    let mut disposition = PersistenceDisposition::Continue;
    let mut ops = batch.into_iter();

    for ((kind, id), op) in ops.by_ref() {
        let (operation, result) = match &op {
            PendingOp::Write(memento) => ("persist", store.write(kind, &id, memento)),
            PendingOp::Delete => ("delete", store.delete(kind, &id)),
        };
        match (result, op) {
            (Ok(()), PendingOp::Write(_)) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &shared.metrics {
                    metrics.record_written(kind);
                }
            }
            (Ok(()), PendingOp::Delete) => {
                counters.deleted.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &shared.metrics {
                    metrics.record_deleted(kind);
                }
            }
            (Err(err), op) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &shared.metrics {
                    metrics.record_failed(kind, operation);
                }
                let verdict = match op {
                    PendingOp::Write(_) => shared.handler.on_persist_memento_failed(kind, &id, &err),
                    PendingOp::Delete => shared.handler.on_delete_memento_failed(kind, &id, &err),
                };
                if verdict == PersistenceDisposition::Halt {
                    disposition = PersistenceDisposition::Halt;
                    break;
                }
            }
        }
    }

    let skipped = ops.count();
    if skipped > 0 {
        counters.dropped.fetch_add(skipped as u64, Ordering::Relaxed);
        warn!(skipped, "memento writer halted mid-batch; remaining operations discarded");
    }
    counters.batches.fetch_add(1, Ordering::Relaxed);

    let elapsed = started.elapsed();
    let description = store.describe();
    if let Some(metrics) = &shared.metrics {
        metrics.observe_batch_duration(&description, elapsed.as_secs_f64());
    }
    debug!(
        store = %description,
        ops = total,
        elapsed_ms = elapsed.as_millis() as u64,
        "memento batch applied"
    );
    disposition
}

fn halt_locked(shared: &Shared, state: &mut QueueState) {
    if state.phase == Phase::Halted {
        return;
    }
    state.phase = Phase::Halted;
    let discarded = state.pending.len();
    state.pending.clear();
    state.first_pending_at = None;
    shared
        .counters
        .dropped
        .fetch_add(discarded as u64, Ordering::Relaxed);
    if let Some(metrics) = &shared.metrics {
        metrics.set_queue_depth(0);
    }
    warn!(discarded, "memento writer halted by exception handler");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::LoggingPersistenceExceptionHandler;
    use crate::store::InMemoryMementoStore;
    use mooring_memento::{EntityMemento, LocationMemento};
    use serde_json::json;

    const LONG: Duration = Duration::from_secs(3600);

    fn writer_on(
        store: &Arc<InMemoryMementoStore>,
        handler: &Arc<LoggingPersistenceExceptionHandler>,
        config: WriterConfig,
    ) -> MementoWriter {
        MementoWriter::start(store.clone(), handler.clone(), config).unwrap()
    }

    fn entity(id: &str, replicas: u64) -> Memento {
        EntityMemento::new(id, "basic.Entity")
            .with_config("replicas", json!(replicas))
            .into()
    }

    fn debounced() -> WriterConfig {
        WriterConfig {
            period: LONG,
            high_water: 1024,
        }
    }

    #[test]
    fn last_write_per_id_wins() {
        let store = Arc::new(InMemoryMementoStore::new("a"));
        let handler = Arc::new(LoggingPersistenceExceptionHandler::new());
        let writer = writer_on(&store, &handler, debounced());

        for replicas in 1..=3 {
            assert!(writer.schedule_write(entity("app-1", replicas)));
        }
        assert_eq!(writer.pending_len(), 1);
        assert!(store.is_empty());

        writer.wait_for_pending_complete().unwrap();
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.get(Kind::Entity, "app-1"), Some(entity("app-1", 3)));
        assert_eq!(writer.stats().coalesced, 2);
    }

    #[test]
    fn delete_supersedes_queued_write() {
        let store = Arc::new(InMemoryMementoStore::new("a"));
        let handler = Arc::new(LoggingPersistenceExceptionHandler::new());
        let writer = writer_on(&store, &handler, debounced());

        writer.schedule_write(entity("app-1", 1));
        writer.schedule_delete(Kind::Entity, "app-1");
        writer.wait_for_pending_complete().unwrap();
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.delete_count(), 1);
    }

    #[test]
    fn high_water_drains_without_waiting_for_period() {
        let store = Arc::new(InMemoryMementoStore::new("a"));
        let handler = Arc::new(LoggingPersistenceExceptionHandler::new());
        let writer = writer_on(
            &store,
            &handler,
            WriterConfig {
                period: LONG,
                high_water: 2,
            },
        );

        writer.schedule_write(entity("a", 1));
        writer.schedule_write(entity("b", 1));
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn failures_reach_handler_and_later_ops_continue() {
        let store = Arc::new(InMemoryMementoStore::new("a"));
        store.fail_writes_for("bad");
        let handler = Arc::new(LoggingPersistenceExceptionHandler::new());
        let writer = writer_on(&store, &handler, debounced());

        writer.schedule_write(entity("bad", 1));
        writer.schedule_write(entity("good", 1));
        writer.wait_for_pending_complete().unwrap();

        assert_eq!(handler.counts().persist, 1);
        assert!(store.get(Kind::Entity, "good").is_some());
        assert!(writer.is_accepting());
    }

    #[test]
    fn halt_interrupts_waiters_and_refuses_work() {
        let store = Arc::new(InMemoryMementoStore::new("a"));
        let handler = Arc::new(LoggingPersistenceExceptionHandler::halting());
        let writer = writer_on(&store, &handler, debounced());

        writer.schedule_write(entity("app-1", 1));
        writer.report_generation_failure(Kind::Entity, "app-2", anyhow::anyhow!("boom"));

        assert!(writer.is_halted());
        assert!(matches!(
            writer.wait_for_pending_complete(),
            Err(PersistenceError::Interrupted)
        ));
        assert!(!writer.schedule_write(entity("app-3", 1)));
        assert!(store.is_empty());
    }

    #[test]
    fn stop_drains_queue_and_is_idempotent() {
        let store = Arc::new(InMemoryMementoStore::new("a"));
        let handler = Arc::new(LoggingPersistenceExceptionHandler::new());
        let writer = writer_on(&store, &handler, debounced());

        writer.schedule_write(entity("app-1", 1));
        writer.stop();
        writer.stop();

        assert!(store.get(Kind::Entity, "app-1").is_some());
        assert!(handler.is_stopped());
        assert!(!writer.schedule_write(entity("app-2", 1)));
        writer.wait_for_pending_complete().unwrap();
    }

    #[test]
    fn set_store_splits_work_at_the_swap() {
        let old = Arc::new(InMemoryMementoStore::new("old"));
        let new = Arc::new(InMemoryMementoStore::new("new"));
        let handler = Arc::new(LoggingPersistenceExceptionHandler::new());
        let writer = writer_on(&old, &handler, debounced());

        writer.schedule_write(entity("before", 1));
        writer.set_store(new.clone());
        writer.schedule_write(LocationMemento::new("after", "basic.Location").into());
        writer.wait_for_pending_complete().unwrap();

        assert!(old.get(Kind::Entity, "before").is_some());
        assert!(old.get(Kind::Location, "after").is_none());
        assert!(new.get(Kind::Location, "after").is_some());
        assert!(new.get(Kind::Entity, "before").is_none());
    }

    #[test]
    fn timed_wait_reports_completion() {
        let store = Arc::new(InMemoryMementoStore::new("a"));
        let handler = Arc::new(LoggingPersistenceExceptionHandler::new());
        let writer = writer_on(&store, &handler, debounced());
        assert!(writer
            .wait_for_pending_complete_timeout(Duration::from_millis(10))
            .unwrap());
        writer.schedule_write(entity("app-1", 1));
        assert!(writer
            .wait_for_pending_complete_timeout(Duration::from_secs(5))
            .unwrap());
    }
}
