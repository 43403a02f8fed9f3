//! ---
//! mooring_section: "03-persistence-logging"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Persistence abstractions and storage bindings."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Durable memento storage and the asynchronous path that keeps it current.
//!
//! Live mutations reach a [`ChangeListener`], which snapshots the object and
//! hands the memento to the [`MementoWriter`]. The writer coalesces pending
//! work per `(kind, id)` and drains it on a background thread into whichever
//! [`MementoStore`] is currently installed.

use mooring_memento::Kind;

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing memento files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper for CBOR serialization issues.
    #[error("cbor serialization error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    /// A stored memento failed integrity verification.
    #[error("{kind} memento '{id}' failed hash verification")]
    HashMismatch {
        /// Kind namespace of the memento.
        kind: Kind,
        /// Identifier of the memento.
        id: String,
    },
    /// A stored memento decoded but does not describe what its location claims.
    #[error("{kind} memento '{id}' is corrupt: {reason}")]
    Corrupt {
        /// Kind namespace of the memento.
        kind: Kind,
        /// Identifier of the memento.
        id: String,
        /// Human readable description of the defect.
        reason: String,
    },
    /// The live object could not produce a memento.
    #[error("failed to generate {kind} memento for '{id}': {source}")]
    Generation {
        /// Kind of the object.
        kind: Kind,
        /// Identifier of the object.
        id: String,
        /// Error raised by the object.
        #[source]
        source: anyhow::Error,
    },
    /// Mutation attempted against a read-only store.
    #[error("store {0} is read-only")]
    ReadOnly(String),
    /// A failure injected by a test store.
    #[error("injected failure for '{0}'")]
    Injected(String),
    /// The writer was stopped or halted while a caller waited on it.
    #[error("interrupted while waiting for pending persistence")]
    Interrupted,
    /// Loading the snapshot set was aborted by the load failure sink.
    #[error("load of {kind} mementos aborted: {source}")]
    LoadAborted {
        /// Kind being loaded when the abort happened.
        kind: Kind,
        /// Memento id, when a single memento triggered the abort.
        id: Option<String>,
        /// Failure that caused the abort.
        #[source]
        source: Box<PersistenceError>,
    },
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub mod file_store;
pub mod handler;
pub mod listener;
pub mod metrics;
pub mod store;
pub mod writer;

pub use file_store::{FileMementoStore, ENVELOPE_VERSION};
pub use handler::{
    FailureCounts, LoggingPersistenceExceptionHandler, PersistenceDisposition,
    PersistenceExceptionHandler,
};
pub use listener::{ChangeListener, DeltaChangeListener, NoopChangeListener};
pub use metrics::PersistenceMetrics;
pub use store::{
    InMemoryMementoStore, LoadDisposition, LoadFailureSink, MementoStore, SkipOnLoadFailure,
};
pub use writer::{MementoWriter, WriterConfig, WriterStats};
