//! ---
//! mooring_section: "01-core-functionality"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Shared primitives and utilities for the control plane."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
//! Shared primitives for the Mooring workspace: configuration loading,
//! tracing initialisation, and the prometheus registry plumbing consumed
//! by the persistence and rebind crates.

pub mod config;
pub mod logging;
pub mod metrics;

pub use config::{
    AppConfig, FailureMode, LoggingConfig, MetricsConfig, NodeConfig, NodeRole,
    PersistenceConfig, RebindConfig, StoreFormat,
};
pub use logging::{init_test_tracing, init_tracing, LogFormat};
pub use metrics::{node_registry, spawn_http_server, MetricsServer, Readiness, SharedRegistry};
