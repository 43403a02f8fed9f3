//! ---
//! mooring_section: "07-resilience-fault-tolerance"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Node supervision and promotion coordinators."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
//! High-availability supervision for control-plane nodes and the driver that
//! turns a local promotion into a rebind.

mod node;
mod promotion;
mod supervisor;

pub use node::{HeartbeatStatus, NodeContext, NodeRuntimeState};
pub use promotion::{DriverState, PromotionDriver, PromotionOutcome};
pub use supervisor::{NodeSupervisor, PromotionEvent, PromotionReason};
