//! ---
//! mooring_section: "01-core-functionality"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Rebind orchestration for the control plane."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
//! Reconstructs the live object graph from a [`GraphMemento`] in three
//! phases: reconstruct every object from its own memento, rebind
//! relationships through the [`RebindContext`], then finalize in
//! parent-before-child order.
//!
//! [`GraphMemento`]: mooring_memento::GraphMemento

use mooring_memento::Kind;
use mooring_persistence::PersistenceError;

pub mod basic;
pub mod context;
pub mod handler;
pub mod manager;
pub mod metrics;
pub mod object;
pub mod report;

pub use basic::{BasicAdjunct, BasicCatalogItem, BasicEntity, BasicLocation, LifecycleState};
pub use context::{RebindContext, ReconstructContext};
pub use handler::{
    DefaultRebindExceptionHandler, Disposition, RebindExceptionHandler, Resolution,
};
pub use manager::{RebindManager, RebindOutcome, RebindState};
pub use metrics::RebindMetrics;
pub use object::{
    ManagedObject, ObjectRef, ResolvedRelations, ScopedTypeLoader, TypeDescriptor, TypeLoader,
    TypeRegistry,
};
pub use report::{RebindIssue, RebindPhase, RebindReport};

/// Errors surfaced by a rebind pass.
#[derive(Debug, thiserror::Error)]
pub enum RebindError {
    /// No type is registered under the requested name.
    #[error("type '{0}' not found")]
    TypeNotFound(String),
    /// A type resolved to a factory for a different kind than its memento.
    #[error("type '{type_name}' builds {found} objects, memento is a {expected}")]
    KindMismatch {
        /// Name that was resolved.
        type_name: String,
        /// Kind of the memento being reconstructed.
        expected: Kind,
        /// Kind the factory produces.
        found: Kind,
    },
    /// The store or writer failed, including an aborted load.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    /// The exception handler aborted the pass on a per-object failure.
    #[error("rebind aborted during {phase} of {kind} '{id}': {message}")]
    Aborted {
        /// Phase in which the abort was requested.
        phase: RebindPhase,
        /// Kind of the object involved.
        kind: Kind,
        /// Object id involved.
        id: String,
        /// Description of the triggering failure.
        message: String,
    },
    /// Failures were deferred to the end of the pass.
    #[error("rebind completed with {total} deferred failure(s); first: {first}")]
    Deferred {
        /// Earliest recorded issue.
        first: RebindIssue,
        /// Number of issues recorded in deferring categories.
        total: usize,
    },
    /// The manager was stopped.
    #[error("rebind manager stopped")]
    Stopped,
    /// Another pass is already running on this manager.
    #[error("a rebind pass is already running")]
    AlreadyRunning,
    /// Failure raised by a custom exception handler.
    #[error(transparent)]
    Other(anyhow::Error),
}
