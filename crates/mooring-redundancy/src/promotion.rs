//! ---
//! mooring_section: "07-resilience-fault-tolerance"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Node supervision and promotion coordinators."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
//! Turns mastership changes into persistence and rebind actions.
//!
//! While standby, the local [`RebindManager`] points at a read-only view of
//! the shared store. Promotion swaps in the exclusive read-write store and
//! rebinds from it on the calling thread; demotion stops persistence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mooring_persistence::MementoStore;
use mooring_rebind::{RebindError, RebindIssue, RebindManager, RebindOutcome};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::supervisor::PromotionEvent;

/// Local node's view of its own role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverState {
    Standby,
    Promoting,
    Master,
    Demoted,
}

/// What a promotion produced.
#[derive(Debug, Clone, Serialize)]
pub struct PromotionOutcome {
    pub node_id: String,
    pub root_ids: Vec<String>,
    pub managed: usize,
    pub issues: Vec<RebindIssue>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl PromotionOutcome {
    pub fn roots(&self) -> usize {
        self.root_ids.len()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

struct DriverInner {
    state: DriverState,
    live: Option<Arc<RebindOutcome>>,
}

/// Reacts to [`PromotionEvent`]s concerning the local node.
pub struct PromotionDriver {
    node_id: String,
    manager: Arc<RebindManager>,
    primary: Arc<dyn MementoStore>,
    inner: Mutex<DriverInner>,
}

impl PromotionDriver {
    /// `primary` is the store this node writes to once it is master.
    pub fn new(
        node_id: impl Into<String>,
        manager: Arc<RebindManager>,
        primary: Arc<dyn MementoStore>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            manager,
            primary,
            inner: Mutex::new(DriverInner {
                state: DriverState::Standby,
                live: None,
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn state(&self) -> DriverState {
        self.inner.lock().state
    }

    pub fn manager(&self) -> &Arc<RebindManager> {
        &self.manager
    }

    /// The graph rebound by the last successful promotion.
    pub fn live(&self) -> Option<Arc<RebindOutcome>> {
        self.inner.lock().live.clone()
    }

    /// Apply an event. Returns an outcome only when this call promoted the
    /// local node.
    pub fn handle(&self, event: &PromotionEvent) -> Result<Option<PromotionOutcome>, RebindError> {
        if event.promoted_node == self.node_id {
            if self.state() == DriverState::Master {
                return Ok(None);
            }
            return self.promote().map(Some);
        }
        if event.demoted_node.as_deref() == Some(self.node_id.as_str()) {
            self.demote();
        }
        Ok(None)
    }

    /// Swap to the read-write store and rebind from it.
    pub fn promote(&self) -> Result<PromotionOutcome, RebindError> {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                DriverState::Standby => inner.state = DriverState::Promoting,
                DriverState::Demoted => return Err(RebindError::Stopped),
                DriverState::Promoting | DriverState::Master => {
                    return Err(RebindError::AlreadyRunning)
                }
            }
        }

        let _span = info_span!("promotion", node = %self.node_id).entered();
        let started = Instant::now();
        info!(store = %self.primary.describe(), "promotion started");
        self.manager.set_persister(Arc::clone(&self.primary));

        match self.manager.rebind_from_store() {
            Ok(outcome) => {
                let result = PromotionOutcome {
                    node_id: self.node_id.clone(),
                    root_ids: outcome.root_ids().into_iter().map(str::to_owned).collect(),
                    managed: outcome.len(),
                    issues: outcome.report().issues.clone(),
                    duration: started.elapsed(),
                };
                let mut inner = self.inner.lock();
                inner.state = DriverState::Master;
                inner.live = Some(Arc::new(outcome));
                info!(
                    node = %self.node_id,
                    roots = result.roots(),
                    managed = result.managed,
                    issues = result.issues.len(),
                    elapsed_ms = result.duration.as_millis() as u64,
                    "promotion complete"
                );
                Ok(result)
            }
            Err(err) => {
                warn!(node = %self.node_id, error = %err, "promotion failed");
                self.manager.stop();
                self.inner.lock().state = DriverState::Demoted;
                Err(err)
            }
        }
    }

    /// Stop persistence and release the live graph. Idempotent.
    pub fn demote(&self) {
        let previous = {
            let mut inner = self.inner.lock();
            inner.live = None;
            std::mem::replace(&mut inner.state, DriverState::Demoted)
        };
        if previous != DriverState::Demoted {
            info!(node = %self.node_id, from = ?previous, "node demoted; stopping persistence");
        }
        self.manager.stop();
    }
}

impl std::fmt::Debug for PromotionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromotionDriver")
            .field("node_id", &self.node_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
