//! ---
//! mooring_section: "07-resilience-fault-tolerance"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Node supervision and promotion coordinators."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

use mooring_common::{NodeConfig, NodeRole};

/// Heartbeats arriving this much after the interval still count as on time.
const HEARTBEAT_GRACE: Duration = Duration::from_millis(50);

/// Identity and timing configuration of a cluster node.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub cluster_id: String,
    pub node_id: String,
    pub role: NodeRole,
    pub failover_order: u32,
    pub heartbeat_interval: Duration,
    pub watchdog_timeout: Duration,
}

impl NodeContext {
    pub fn from_config(cluster_id: &str, config: &NodeConfig) -> Self {
        Self {
            cluster_id: cluster_id.to_owned(),
            node_id: config.id.clone(),
            role: config.role.clone(),
            failover_order: config.failover_order,
            heartbeat_interval: config.heartbeat_interval,
            watchdog_timeout: config.watchdog_timeout,
        }
    }

    /// Observers follow the cluster but are never promoted.
    pub fn is_eligible(&self) -> bool {
        self.role != NodeRole::Observer
    }
}

/// Liveness bookkeeping the supervisor keeps per node.
#[derive(Debug, Clone)]
pub struct NodeRuntimeState {
    pub context: NodeContext,
    registered_at: Instant,
    last_heartbeat: Option<Instant>,
    pub is_active: bool,
    failure_count: u32,
}

impl NodeRuntimeState {
    pub fn new(context: NodeContext, now: Instant) -> Self {
        Self {
            context,
            registered_at: now,
            last_heartbeat: None,
            is_active: false,
            failure_count: 0,
        }
    }

    pub fn record_heartbeat(&mut self, now: Instant) -> HeartbeatStatus {
        let status = match self.last_heartbeat {
            Some(previous) => {
                let delta = now.saturating_duration_since(previous);
                if delta <= self.context.heartbeat_interval + HEARTBEAT_GRACE {
                    HeartbeatStatus::OnTime
                } else {
                    HeartbeatStatus::Late(delta - self.context.heartbeat_interval)
                }
            }
            None => HeartbeatStatus::OnTime,
        };
        self.last_heartbeat = Some(now);
        status
    }

    /// Check the watchdog. A node that never reported is measured from
    /// registration.
    pub fn evaluate(&mut self, now: Instant) -> HeartbeatStatus {
        let since = self.last_heartbeat.unwrap_or(self.registered_at);
        let delta = now.saturating_duration_since(since);
        if delta > self.context.watchdog_timeout {
            self.failure_count += 1;
            HeartbeatStatus::Missing(delta - self.context.watchdog_timeout)
        } else {
            HeartbeatStatus::OnTime
        }
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.last_heartbeat
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }
}

/// Result of a heartbeat evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeartbeatStatus {
    OnTime,
    Late(Duration),
    Missing(Duration),
}
