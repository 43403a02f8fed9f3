//! ---
//! mooring_section: "03-persistence-logging"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Persistence abstractions and storage bindings."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use mooring_memento::{GraphMemento, Kind, Memento};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{PersistenceError, Result};

/// What a [`LoadFailureSink`] wants done after a read failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDisposition {
    /// Leave the memento (or whole kind) out and keep loading.
    Skip,
    /// Stop loading and fail [`MementoStore::load_all`].
    Abort,
}

/// Receives read failures raised while assembling a [`GraphMemento`].
pub trait LoadFailureSink {
    /// A single memento could not be read or decoded.
    fn on_load_memento_failed(
        &self,
        kind: Kind,
        id: &str,
        message: &str,
        error: &PersistenceError,
    ) -> LoadDisposition;

    /// The ids of a whole kind could not be enumerated.
    fn on_load_kind_failed(
        &self,
        kind: Kind,
        message: &str,
        error: &PersistenceError,
    ) -> LoadDisposition;
}

/// Sink that logs every failure and skips the affected memento.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipOnLoadFailure;

impl LoadFailureSink for SkipOnLoadFailure {
    fn on_load_memento_failed(
        &self,
        kind: Kind,
        id: &str,
        message: &str,
        error: &PersistenceError,
    ) -> LoadDisposition {
        warn!(%kind, id, error = %error, "{message}");
        LoadDisposition::Skip
    }

    fn on_load_kind_failed(
        &self,
        kind: Kind,
        message: &str,
        error: &PersistenceError,
    ) -> LoadDisposition {
        warn!(%kind, error = %error, "{message}");
        LoadDisposition::Skip
    }
}

/// Durable keyed storage of mementos, namespaced by [`Kind`].
///
/// Implementations must be safe to call from the writer thread and from a
/// rebind pass at the same time. A write followed by a read of the same id
/// must observe the write, and `delete` of an absent id succeeds.
pub trait MementoStore: Send + Sync + fmt::Debug {
    /// Short description used in logs.
    fn describe(&self) -> String;

    /// Whether mutation is refused.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Replace the memento stored under `(kind, id)`.
    fn write(&self, kind: Kind, id: &str, memento: &Memento) -> Result<()>;

    /// Remove the memento stored under `(kind, id)`.
    fn delete(&self, kind: Kind, id: &str) -> Result<()>;

    /// Read one memento, `None` when absent.
    fn read(&self, kind: Kind, id: &str) -> Result<Option<Memento>>;

    /// Ids currently stored for `kind`.
    fn list(&self, kind: Kind) -> Result<Vec<String>>;

    /// Read every memento into an aggregate and derive its top-level lists.
    ///
    /// Failures are routed to `sink`; a skipped memento is simply absent from
    /// the result.
    fn load_all(&self, sink: &dyn LoadFailureSink) -> Result<GraphMemento> {
        let mut graph = GraphMemento::new();
        for kind in Kind::persisted().iter().copied() {
            let ids = match self.list(kind) {
                Ok(ids) => ids,
                Err(err) => match sink.on_load_kind_failed(kind, "unable to enumerate mementos", &err)
                {
                    LoadDisposition::Skip => continue,
                    LoadDisposition::Abort => {
                        return Err(PersistenceError::LoadAborted {
                            kind,
                            id: None,
                            source: Box::new(err),
                        })
                    }
                },
            };

            for id in ids {
                let outcome = self.read(kind, &id).and_then(|found| match found {
                    Some(memento) if memento.kind() != kind || memento.id() != id => {
                        Err(PersistenceError::Corrupt {
                            kind,
                            id: id.clone(),
                            reason: format!(
                                "stored under {kind}/{id} but describes {}/{}",
                                memento.kind(),
                                memento.id()
                            ),
                        })
                    }
                    other => Ok(other),
                });
                match outcome {
                    Ok(Some(memento)) => {
                        graph.insert(memento);
                    }
                    // Deleted between list and read.
                    Ok(None) => debug!(%kind, id = %id, "memento vanished during load"),
                    Err(err) => {
                        match sink.on_load_memento_failed(kind, &id, "unable to load memento", &err)
                        {
                            LoadDisposition::Skip => {}
                            LoadDisposition::Abort => {
                                return Err(PersistenceError::LoadAborted {
                                    kind,
                                    id: Some(id),
                                    source: Box::new(err),
                                })
                            }
                        }
                    }
                }
            }
        }
        graph.derive_top_level();
        Ok(graph)
    }
}

/// Process-local store, used by tests and as a staging mirror.
#[derive(Debug, Default)]
pub struct InMemoryMementoStore {
    name: String,
    entries: RwLock<HashMap<Kind, IndexMap<String, Memento>>>,
    corrupt: RwLock<HashSet<(Kind, String)>>,
    failing: RwLock<HashSet<String>>,
    read_only: bool,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryMementoStore {
    /// Create an empty writable store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Seed a store with an existing snapshot set.
    pub fn with_graph(name: impl Into<String>, graph: &GraphMemento) -> Self {
        let store = Self::new(name);
        {
            let mut entries = store.entries.write();
            for kind in Kind::persisted().iter().copied() {
                let slot = entries.entry(kind).or_default();
                for memento in graph.mementos(kind) {
                    slot.insert(memento.id().to_owned(), memento);
                }
            }
        }
        store
    }

    /// Refuse all further mutation.
    pub fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Make writes and deletes of `id` fail until [`Self::heal`] is called.
    pub fn fail_writes_for(&self, id: impl Into<String>) {
        self.failing.write().insert(id.into());
    }

    /// Clear injected write failures.
    pub fn heal(&self) {
        self.failing.write().clear();
    }

    /// Make reads of `(kind, id)` report corruption.
    pub fn corrupt(&self, kind: Kind, id: impl Into<String>) {
        self.corrupt.write().insert((kind, id.into()));
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Peek at a stored memento without going through fault injection.
    pub fn get(&self, kind: Kind, id: &str) -> Option<Memento> {
        self.entries
            .read()
            .get(&kind)
            .and_then(|slot| slot.get(id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_mutable(&self, id: &str) -> Result<()> {
        if self.read_only {
            return Err(PersistenceError::ReadOnly(self.describe()));
        }
        if self.failing.read().contains(id) {
            return Err(PersistenceError::Injected(id.to_owned()));
        }
        Ok(())
    }
}

impl MementoStore for InMemoryMementoStore {
    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn write(&self, kind: Kind, id: &str, memento: &Memento) -> Result<()> {
        self.check_mutable(id)?;
        self.entries
            .write()
            .entry(kind)
            .or_default()
            .insert(id.to_owned(), memento.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn delete(&self, kind: Kind, id: &str) -> Result<()> {
        self.check_mutable(id)?;
        if let Some(slot) = self.entries.write().get_mut(&kind) {
            slot.shift_remove(id);
        }
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn read(&self, kind: Kind, id: &str) -> Result<Option<Memento>> {
        if self.corrupt.read().contains(&(kind, id.to_owned())) {
            return Err(PersistenceError::Corrupt {
                kind,
                id: id.to_owned(),
                reason: "marked corrupt".into(),
            });
        }
        Ok(self.get(kind, id))
    }

    fn list(&self, kind: Kind) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .get(&kind)
            .map(|slot| slot.keys().cloned().collect())
            .unwrap_or_default())
    }
}
