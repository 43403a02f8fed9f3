//! ---
//! mooring_section: "07-resilience-fault-tolerance"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Node supervision and promotion coordinators."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use mooring_common::NodeRole;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::node::{HeartbeatStatus, NodeContext, NodeRuntimeState};

#[derive(Debug)]
struct SupervisorInner {
    active: Option<String>,
    nodes: HashMap<String, NodeRuntimeState>,
}

/// Supervises the nodes of one cluster and decides which one is master.
#[derive(Debug)]
pub struct NodeSupervisor {
    cluster_id: String,
    inner: Mutex<SupervisorInner>,
}

impl NodeSupervisor {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            inner: Mutex::new(SupervisorInner {
                active: None,
                nodes: HashMap::new(),
            }),
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Register or update a node. Registration alone never changes the
    /// master; promotion happens in [`evaluate`](Self::evaluate) or
    /// [`promote`](Self::promote).
    pub fn register(&self, context: NodeContext, now: Instant) {
        let mut inner = self.inner.lock();
        let node_id = context.node_id.clone();
        match inner.nodes.get_mut(&node_id) {
            Some(state) => state.context = context,
            None => {
                inner
                    .nodes
                    .insert(node_id.clone(), NodeRuntimeState::new(context, now));
            }
        }
        debug!(cluster = %self.cluster_id, node = %node_id, "registered node");
    }

    /// Remove a node. Removing the master leaves the cluster without one
    /// until the next evaluation.
    pub fn deregister(&self, node_id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.active.as_deref() == Some(node_id) {
            inner.active = None;
        }
        let removed = inner.nodes.remove(node_id).is_some();
        if removed {
            info!(cluster = %self.cluster_id, node = node_id, "node deregistered");
        }
        removed
    }

    pub fn heartbeat(&self, node_id: &str, now: Instant) -> HeartbeatStatus {
        let mut inner = self.inner.lock();
        let is_master = inner.active.as_deref() == Some(node_id);
        let Some(state) = inner.nodes.get_mut(node_id) else {
            warn!(cluster = %self.cluster_id, node_id, "received heartbeat for unknown node");
            return HeartbeatStatus::Missing(Default::default());
        };
        let status = state.record_heartbeat(now);
        if let HeartbeatStatus::Late(delay) = status {
            debug!(
                cluster = %self.cluster_id,
                node = node_id,
                master = is_master,
                delay_ms = delay.as_millis() as u64,
                "late heartbeat"
            );
        }
        status
    }

    pub fn is_active(&self, node_id: &str) -> bool {
        self.inner.lock().active.as_deref() == Some(node_id)
    }

    pub fn active(&self) -> Option<String> {
        self.inner.lock().active.clone()
    }

    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Check master liveness; elect a master if there is none or it went silent.
    pub fn evaluate(&self, now: Instant) -> Option<PromotionEvent> {
        let mut inner = self.inner.lock();
        let Some(active_id) = inner.active.clone() else {
            return self.promote_next_locked(&mut inner, PromotionReason::Startup, now, None);
        };

        let Some(active) = inner.nodes.get_mut(&active_id) else {
            return self.promote_next_locked(
                &mut inner,
                PromotionReason::Missing,
                now,
                Some(active_id.as_str()),
            );
        };

        match active.evaluate(now) {
            HeartbeatStatus::Missing(overdue) => {
                warn!(
                    cluster = %self.cluster_id,
                    node = %active_id,
                    overdue_ms = overdue.as_millis() as u64,
                    "master heartbeat missing; initiating failover"
                );
                active.is_active = false;
                self.promote_next_locked(
                    &mut inner,
                    PromotionReason::HeartbeatTimeout,
                    now,
                    Some(active_id.as_str()),
                )
            }
            HeartbeatStatus::Late(_) | HeartbeatStatus::OnTime => None,
        }
    }

    /// Operator-requested promotion of a specific node.
    pub fn promote(&self, node_id: &str) -> Option<PromotionEvent> {
        let mut inner = self.inner.lock();
        let eligible = inner
            .nodes
            .get(node_id)
            .is_some_and(|state| state.context.is_eligible());
        if !eligible {
            warn!(cluster = %self.cluster_id, node = node_id, "manual promotion refused");
            return None;
        }
        if inner.active.as_deref() == Some(node_id) {
            return None;
        }
        Some(self.activate_locked(&mut inner, node_id, PromotionReason::Manual))
    }

    fn promote_next_locked(
        &self,
        inner: &mut SupervisorInner,
        reason: PromotionReason,
        now: Instant,
        exclude: Option<&str>,
    ) -> Option<PromotionEvent> {
        let next_id = inner
            .nodes
            .iter()
            .filter(|(id, state)| {
                state.context.is_eligible()
                    && !state.is_active
                    && exclude.map_or(true, |ex| id.as_str() != ex)
                    && state
                        .last_heartbeat()
                        .is_some_and(|seen| now.saturating_duration_since(seen) <= state.context.watchdog_timeout)
            })
            .min_by(|(a_id, a), (b_id, b)| priority_cmp(a, b).then_with(|| a_id.cmp(b_id)))
            .map(|(id, _)| id.clone());

        let Some(next_id) = next_id else {
            warn!(cluster = %self.cluster_id, "no live standby available for promotion");
            inner.active = None;
            return None;
        };
        Some(self.activate_locked(inner, &next_id, reason))
    }

    fn activate_locked(
        &self,
        inner: &mut SupervisorInner,
        node_id: &str,
        reason: PromotionReason,
    ) -> PromotionEvent {
        let demoted = inner.active.replace(node_id.to_owned());
        if let Some(previous) = demoted.as_deref() {
            if let Some(state) = inner.nodes.get_mut(previous) {
                state.is_active = false;
            }
        }
        if let Some(state) = inner.nodes.get_mut(node_id) {
            state.is_active = true;
        }
        let event = PromotionEvent {
            event_id: Uuid::new_v4(),
            cluster_id: self.cluster_id.clone(),
            promoted_node: node_id.to_owned(),
            demoted_node: demoted,
            triggered_at: Utc::now(),
            reason,
        };
        info!(
            cluster = %event.cluster_id,
            node = %event.promoted_node,
            demoted = ?event.demoted_node,
            %reason,
            "node promoted to master"
        );
        event
    }
}

fn priority_cmp(a: &NodeRuntimeState, b: &NodeRuntimeState) -> Ordering {
    role_priority(&a.context.role)
        .cmp(&role_priority(&b.context.role))
        .then_with(|| a.context.failover_order.cmp(&b.context.failover_order))
}

fn role_priority(role: &NodeRole) -> u8 {
    match role {
        NodeRole::Master => 0,
        NodeRole::Standby => 1,
        NodeRole::Observer => 2,
    }
}

/// Emitted whenever mastership moves.
#[derive(Debug, Clone, Serialize)]
pub struct PromotionEvent {
    pub event_id: Uuid,
    pub cluster_id: String,
    pub promoted_node: String,
    pub demoted_node: Option<String>,
    pub triggered_at: DateTime<Utc>,
    pub reason: PromotionReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromotionReason {
    Startup,
    Manual,
    HeartbeatTimeout,
    Missing,
}

impl fmt::Display for PromotionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PromotionReason::Startup => "startup",
            PromotionReason::Manual => "manual",
            PromotionReason::HeartbeatTimeout => "heartbeat-timeout",
            PromotionReason::Missing => "missing",
        })
    }
}
