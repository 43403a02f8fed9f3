//! ---
//! mooring_section: "03-persistence-logging"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Memento model and kind taxonomy."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
//! Serializable snapshots of managed objects and the kind taxonomy they are
//! filed under. Mementos refer to one another only by stable id.

pub mod aggregate;
pub mod kind;
pub mod memento;

pub use aggregate::{DanglingReference, GraphMemento};
pub use kind::{classify, Classified, Kind, CLASSIFICATION_ORDER};
pub use memento::{
    AdjunctMemento, CatalogItemMemento, EntityMemento, LocationMemento, Memento, MementoCore,
    Persistable,
};

/// Error type for the memento model.
#[derive(Debug, thiserror::Error)]
pub enum MementoError {
    /// A kind name did not match the taxonomy.
    #[error("unknown memento kind '{0}'")]
    UnknownKind(String),
    /// A memento was offered where a different kind was required.
    #[error("expected a {expected} memento, found {found}")]
    KindMismatch {
        /// Kind the caller asked for.
        expected: Kind,
        /// Kind that was supplied.
        found: Kind,
    },
}
