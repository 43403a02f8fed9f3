//! ---
//! mooring_section: "03-persistence-logging"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Persistence abstractions and storage bindings."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use mooring_memento::Kind;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::PersistenceError;

/// What the writer does after reporting a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceDisposition {
    /// Drop the failed operation and keep draining.
    Continue,
    /// Stop the writer; pending and future operations are discarded.
    Halt,
}

/// Policy for failures on the write path.
///
/// Called from the writer thread (persist/delete) or the mutating thread
/// (generation), never while the writer holds its queue lock.
pub trait PersistenceExceptionHandler: Send + Sync {
    /// A live object failed to produce its memento.
    fn on_generate_memento_failed(
        &self,
        kind: Kind,
        id: &str,
        error: &PersistenceError,
    ) -> PersistenceDisposition;

    /// Writing a memento to the store failed.
    fn on_persist_memento_failed(
        &self,
        kind: Kind,
        id: &str,
        error: &PersistenceError,
    ) -> PersistenceDisposition;

    /// Deleting a memento from the store failed.
    fn on_delete_memento_failed(
        &self,
        kind: Kind,
        id: &str,
        error: &PersistenceError,
    ) -> PersistenceDisposition;

    /// The writer has stopped; no further callbacks follow.
    fn stop(&self);
}

/// Totals kept by [`LoggingPersistenceExceptionHandler`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureCounts {
    /// Snapshot generation failures.
    pub generate: u64,
    /// Store write failures.
    pub persist: u64,
    /// Store delete failures.
    pub delete: u64,
}

/// Logs every failure and keeps going.
///
/// The first failure per `(kind, id)` is logged at warn, repeats at debug.
/// Once stopped, everything is logged at debug.
#[derive(Debug, Default)]
pub struct LoggingPersistenceExceptionHandler {
    seen: Mutex<HashSet<(Kind, String)>>,
    generate: AtomicU64,
    persist: AtomicU64,
    delete: AtomicU64,
    halt_on_failure: bool,
    stopped: AtomicBool,
}

impl LoggingPersistenceExceptionHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variant that halts the writer at the first failure.
    pub fn halting() -> Self {
        Self {
            halt_on_failure: true,
            ..Self::default()
        }
    }

    pub fn counts(&self) -> FailureCounts {
        FailureCounts {
            generate: self.generate.load(Ordering::Relaxed),
            persist: self.persist.load(Ordering::Relaxed),
            delete: self.delete.load(Ordering::Relaxed),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn report(
        &self,
        counter: &AtomicU64,
        operation: &str,
        kind: Kind,
        id: &str,
        error: &PersistenceError,
    ) -> PersistenceDisposition {
        counter.fetch_add(1, Ordering::Relaxed);
        let first = self.seen.lock().insert((kind, id.to_owned()));
        if first && !self.is_stopped() {
            warn!(%kind, id, operation, error = %error, "memento persistence failed");
        } else {
            debug!(%kind, id, operation, error = %error, "memento persistence failed again");
        }
        if self.halt_on_failure {
            PersistenceDisposition::Halt
        } else {
            PersistenceDisposition::Continue
        }
    }
}

impl PersistenceExceptionHandler for LoggingPersistenceExceptionHandler {
    fn on_generate_memento_failed(
        &self,
        kind: Kind,
        id: &str,
        error: &PersistenceError,
    ) -> PersistenceDisposition {
        self.report(&self.generate, "generate", kind, id, error)
    }

    fn on_persist_memento_failed(
        &self,
        kind: Kind,
        id: &str,
        error: &PersistenceError,
    ) -> PersistenceDisposition {
        self.report(&self.persist, "persist", kind, id, error)
    }

    fn on_delete_memento_failed(
        &self,
        kind: Kind,
        id: &str,
        error: &PersistenceError,
    ) -> PersistenceDisposition {
        self.report(&self.delete, "delete", kind, id, error)
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            let counts = self.counts();
            info!(
                generate = counts.generate,
                persist = counts.persist,
                delete = counts.delete,
                "persistence exception handler stopped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_each_category_and_continues() {
        let handler = LoggingPersistenceExceptionHandler::new();
        let err = PersistenceError::Injected("app-1".into());
        assert_eq!(
            handler.on_persist_memento_failed(Kind::Entity, "app-1", &err),
            PersistenceDisposition::Continue
        );
        handler.on_persist_memento_failed(Kind::Entity, "app-1", &err);
        handler.on_delete_memento_failed(Kind::Feed, "feed-1", &err);
        assert_eq!(
            handler.counts(),
            FailureCounts {
                generate: 0,
                persist: 2,
                delete: 1
            }
        );
    }

    #[test]
    fn halting_variant_requests_halt() {
        let handler = LoggingPersistenceExceptionHandler::halting();
        let err = PersistenceError::Injected("x".into());
        assert_eq!(
            handler.on_generate_memento_failed(Kind::Policy, "x", &err),
            PersistenceDisposition::Halt
        );
        handler.stop();
        handler.stop();
        assert!(handler.is_stopped());
    }
}
