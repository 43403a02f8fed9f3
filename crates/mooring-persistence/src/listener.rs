//! ---
//! mooring_section: "03-persistence-logging"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Persistence abstractions and storage bindings."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use mooring_memento::{classify, Kind, Persistable};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::writer::MementoWriter;

const ORDER_STRIPES: usize = 32;

/// Observer notified by live objects as they enter, change, and leave management.
///
/// Implementations must not block on store IO; they are called from the
/// mutating thread.
pub trait ChangeListener: Send + Sync {
    /// The object became managed.
    fn on_managed(&self, object: &dyn Persistable);
    /// Persisted state of a managed object changed.
    fn on_changed(&self, object: &dyn Persistable);
    /// The object is no longer managed and its memento should go.
    fn on_unmanaged(&self, object: &dyn Persistable);
}

/// Listener that discards every notification. Installed before persistence starts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopChangeListener;

impl ChangeListener for NoopChangeListener {
    fn on_managed(&self, _object: &dyn Persistable) {}
    fn on_changed(&self, _object: &dyn Persistable) {}
    fn on_unmanaged(&self, _object: &dyn Persistable) {}
}

/// Listener that snapshots on the caller's thread and queues the result.
///
/// Snapshotting eagerly means the memento reflects the object as of the
/// notification, and the writer never touches live objects. Snapshot and
/// enqueue happen under a lock striped by `(kind, id)`, so for one object
/// the queue order matches the snapshot order.
#[derive(Debug, Clone)]
pub struct DeltaChangeListener {
    writer: Arc<MementoWriter>,
    stripes: Arc<[Mutex<()>]>,
}

impl DeltaChangeListener {
    pub fn new(writer: Arc<MementoWriter>) -> Self {
        Self {
            writer,
            stripes: (0..ORDER_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn writer(&self) -> &Arc<MementoWriter> {
        &self.writer
    }

    fn stripe(&self, kind: Kind, id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        (kind, id).hash(&mut hasher);
        &self.stripes[hasher.finish() as usize % self.stripes.len()]
    }

    fn record(&self, object: &dyn Persistable, event: &'static str) {
        let kind = classify(object);
        if kind == Kind::Unknown {
            debug!(id = object.id(), event, "ignoring change for unclassified object");
            return;
        }
        if !self.writer.is_accepting() {
            trace!(%kind, id = object.id(), event, "writer stopped; change not recorded");
            return;
        }
        let _ordered = self.stripe(kind, object.id()).lock();
        match object.snapshot() {
            Ok(memento) if memento.kind() != kind || memento.id() != object.id() => {
                self.writer.report_generation_failure(
                    kind,
                    object.id(),
                    anyhow::anyhow!(
                        "snapshot produced {} '{}' instead",
                        memento.kind(),
                        memento.id()
                    ),
                );
            }
            Ok(memento) => {
                trace!(%kind, id = object.id(), event, "memento queued");
                self.writer.schedule_write(memento);
            }
            Err(err) => self.writer.report_generation_failure(kind, object.id(), err),
        }
    }
}

impl ChangeListener for DeltaChangeListener {
    fn on_managed(&self, object: &dyn Persistable) {
        self.record(object, "managed");
    }

    fn on_changed(&self, object: &dyn Persistable) {
        self.record(object, "changed");
    }

    fn on_unmanaged(&self, object: &dyn Persistable) {
        let kind = classify(object);
        let _ordered = self.stripe(kind, object.id()).lock();
        self.writer.schedule_delete(kind, object.id());
    }
}
