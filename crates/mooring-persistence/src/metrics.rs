//! ---
//! mooring_section: "03-persistence-logging"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Persistence abstractions and storage bindings."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::sync::Arc;

use mooring_memento::Kind;
use prometheus::{self, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

use crate::Result;

/// Metrics published by the memento writer.
#[derive(Clone)]
pub struct PersistenceMetrics {
    mementos_written: IntCounterVec,
    mementos_deleted: IntCounterVec,
    mementos_failed: IntCounterVec,
    writes_coalesced: IntCounterVec,
    queue_depth: IntGauge,
    batch_duration: HistogramVec,
    #[allow(dead_code)]
    registry: Arc<Registry>,
}

impl PersistenceMetrics {
    /// Register all persistence metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let mementos_written = IntCounterVec::new(
            Opts::new(
                "mooring_mementos_written_total",
                "Total number of mementos successfully written to the store",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(mementos_written.clone()))?;

        let mementos_deleted = IntCounterVec::new(
            Opts::new(
                "mooring_mementos_deleted_total",
                "Total number of mementos removed from the store",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(mementos_deleted.clone()))?;

        let mementos_failed = IntCounterVec::new(
            Opts::new(
                "mooring_memento_failures_total",
                "Total number of memento generate, persist, or delete operations that failed",
            ),
            &["kind", "operation"],
        )?;
        registry.register(Box::new(mementos_failed.clone()))?;

        let writes_coalesced = IntCounterVec::new(
            Opts::new(
                "mooring_memento_writes_coalesced_total",
                "Queued operations superseded by a later one for the same id",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(writes_coalesced.clone()))?;

        let queue_depth = IntGauge::new(
            "mooring_memento_queue_depth",
            "Operations waiting for the memento writer",
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "mooring_memento_batch_duration_seconds",
            "Time spent applying one drained batch to the store",
        )
        .buckets(prometheus::exponential_buckets(0.0005, 2.0, 14)?);
        let batch_duration = HistogramVec::new(histogram_opts, &["store"])?;
        registry.register(Box::new(batch_duration.clone()))?;

        Ok(Self {
            mementos_written,
            mementos_deleted,
            mementos_failed,
            writes_coalesced,
            queue_depth,
            batch_duration,
            registry,
        })
    }

    pub fn record_written(&self, kind: Kind) {
        self.mementos_written
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn record_deleted(&self, kind: Kind) {
        self.mementos_deleted
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    /// Record a failure; `operation` is one of `generate`, `persist` or `delete`.
    pub fn record_failed(&self, kind: Kind, operation: &str) {
        self.mementos_failed
            .with_label_values(&[kind.as_str(), operation])
            .inc();
    }

    pub fn record_coalesced(&self, kind: Kind) {
        self.writes_coalesced
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    pub fn observe_batch_duration(&self, store: &str, seconds: f64) {
        self.batch_duration
            .with_label_values(&[store])
            .observe(seconds);
    }
}

impl std::fmt::Debug for PersistenceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_counts() {
        let registry = Arc::new(Registry::new());
        let metrics = PersistenceMetrics::new(registry.clone()).unwrap();
        metrics.record_written(Kind::Entity);
        metrics.record_failed(Kind::Feed, "persist");
        metrics.set_queue_depth(3);

        let families = registry.gather();
        let written = families
            .iter()
            .find(|family| family.get_name() == "mooring_mementos_written_total")
            .unwrap();
        assert_eq!(written.get_metric()[0].get_counter().get_value(), 1.0);
        assert!(PersistenceMetrics::new(registry).is_err());
    }
}
