//! ---
//! mooring_section: "01-core-functionality"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Rebind orchestration for the control plane."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::sync::Arc;

use mooring_memento::Kind;
use prometheus::{self, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::report::RebindPhase;

/// Metrics published by the rebind orchestrator.
#[derive(Clone)]
pub struct RebindMetrics {
    passes: IntCounterVec,
    objects_managed: IntCounterVec,
    issues: IntCounterVec,
    duration: HistogramVec,
}

impl RebindMetrics {
    pub fn new(registry: Arc<Registry>) -> prometheus::Result<Self> {
        let passes = IntCounterVec::new(
            Opts::new("mooring_rebind_passes_total", "Rebind passes by terminal outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(passes.clone()))?;

        let objects_managed = IntCounterVec::new(
            Opts::new(
                "mooring_rebind_objects_managed_total",
                "Objects brought under management by rebind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(objects_managed.clone()))?;

        let issues = IntCounterVec::new(
            Opts::new(
                "mooring_rebind_issues_total",
                "Per-object failures reported to the rebind exception handler",
            ),
            &["phase"],
        )?;
        registry.register(Box::new(issues.clone()))?;

        let duration = HistogramVec::new(
            HistogramOpts::new(
                "mooring_rebind_duration_seconds",
                "Wall time of a rebind pass",
            )
            .buckets(prometheus::exponential_buckets(0.001, 2.0, 16)?),
            &["outcome"],
        )?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            passes,
            objects_managed,
            issues,
            duration,
        })
    }

    pub fn record_pass(&self, outcome: &str, seconds: f64) {
        self.passes.with_label_values(&[outcome]).inc();
        self.duration.with_label_values(&[outcome]).observe(seconds);
    }

    pub fn record_managed(&self, kind: Kind) {
        self.objects_managed.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn record_issue(&self, phase: RebindPhase) {
        self.issues.with_label_values(&[phase.as_str()]).inc();
    }
}

impl std::fmt::Debug for RebindMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebindMetrics").finish_non_exhaustive()
    }
}
