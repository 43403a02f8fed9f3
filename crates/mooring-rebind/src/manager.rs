//! ---
//! mooring_section: "01-core-functionality"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Rebind orchestration for the control plane."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
//! The rebind state machine.
//!
//! A pass runs on the calling thread. Phase 1 owns the [`RebindContext`]
//! mutably and hands objects only a [`ReconstructContext`]; phases 2 and 3
//! see the context through a shared borrow, so no object can be rebound
//! before every object has been reconstructed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use indexmap::IndexMap;
use mooring_memento::{classify, GraphMemento, Kind, Memento, Persistable};
use mooring_persistence::{
    ChangeListener, DeltaChangeListener, MementoStore, MementoWriter, PersistenceExceptionHandler,
    WriterConfig,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::span::EnteredSpan;
use tracing::{debug, info, info_span, warn};

use crate::context::{RebindContext, ReconstructContext};
use crate::handler::{Disposition, HandlerLoadSink, RebindExceptionHandler, Resolution};
use crate::metrics::RebindMetrics;
use crate::object::{ManagedObject, ObjectRef, ResolvedRelations, TypeLoader};
use crate::report::{RebindIssue, RebindPhase, RebindReport};
use crate::RebindError;

/// Global state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RebindState {
    Idle,
    Loading,
    Reconstructing,
    Rebinding,
    Managing,
    Done,
    Failed,
}

impl RebindState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebindState::Idle => "idle",
            RebindState::Loading => "loading",
            RebindState::Reconstructing => "reconstructing",
            RebindState::Rebinding => "rebinding",
            RebindState::Managing => "managing",
            RebindState::Done => "done",
            RebindState::Failed => "failed",
        }
    }
}

impl fmt::Display for RebindState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful pass.
pub struct RebindOutcome {
    roots: Vec<ObjectRef>,
    objects: HashMap<Kind, IndexMap<String, ObjectRef>>,
    report: RebindReport,
}

impl RebindOutcome {
    /// Top-level managed entities in aggregate order.
    pub fn roots(&self) -> &[ObjectRef] {
        &self.roots
    }

    pub fn root_ids(&self) -> Vec<&str> {
        self.roots.iter().map(|root| root.id()).collect()
    }

    /// A managed object, if it made it through all three phases.
    pub fn get(&self, kind: Kind, id: &str) -> Option<&ObjectRef> {
        self.objects.get(&kind).and_then(|slot| slot.get(id))
    }

    /// Ids of managed objects of `kind`, in manage order.
    pub fn ids(&self, kind: Kind) -> Vec<&str> {
        self.objects
            .get(&kind)
            .map(|slot| slot.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Every managed object, catalog items first.
    pub fn iter(&self) -> impl Iterator<Item = &ObjectRef> {
        Kind::persisted()
            .iter()
            .filter_map(|kind| self.objects.get(kind))
            .flat_map(|slot| slot.values())
    }

    pub fn len(&self) -> usize {
        self.objects.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn report(&self) -> &RebindReport {
        &self.report
    }
}

impl fmt::Debug for RebindOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebindOutcome")
            .field("roots", &self.root_ids())
            .field("managed", &self.len())
            .field("report", &self.report)
            .finish()
    }
}

/// Holds the running flag and the entered `rebind_pass` span for one pass.
struct PassGuard<'a> {
    running: &'a AtomicBool,
    _span: EnteredSpan,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Drives rebind passes and owns the persistence write path.
pub struct RebindManager {
    loader: Arc<dyn TypeLoader>,
    writer: Arc<MementoWriter>,
    listener: Arc<DeltaChangeListener>,
    handler: Arc<dyn RebindExceptionHandler>,
    state: Mutex<RebindState>,
    running: AtomicBool,
    stopped: AtomicBool,
    passes: AtomicU64,
    metrics: Option<RebindMetrics>,
}

impl RebindManager {
    /// Start a writer against `store` and build a manager around it.
    pub fn new(
        config: WriterConfig,
        loader: Arc<dyn TypeLoader>,
        store: Arc<dyn MementoStore>,
        persistence_handler: Arc<dyn PersistenceExceptionHandler>,
        rebind_handler: Arc<dyn RebindExceptionHandler>,
    ) -> Result<Self, RebindError> {
        let writer = MementoWriter::start(store, persistence_handler, config)?;
        Ok(Self::with_writer(Arc::new(writer), loader, rebind_handler))
    }

    /// Build a manager around an already running writer.
    pub fn with_writer(
        writer: Arc<MementoWriter>,
        loader: Arc<dyn TypeLoader>,
        rebind_handler: Arc<dyn RebindExceptionHandler>,
    ) -> Self {
        let listener = Arc::new(DeltaChangeListener::new(Arc::clone(&writer)));
        Self {
            loader,
            writer,
            listener,
            handler: rebind_handler,
            state: Mutex::new(RebindState::Idle),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            passes: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: RebindMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> RebindState {
        *self.state.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn type_loader(&self) -> &Arc<dyn TypeLoader> {
        &self.loader
    }

    pub fn writer(&self) -> &Arc<MementoWriter> {
        &self.writer
    }

    /// Observer the live graph reports mutations to.
    pub fn change_listener(&self) -> Arc<dyn ChangeListener> {
        self.listener.clone()
    }

    /// Swap the durable store; see [`MementoWriter::set_store`].
    pub fn set_persister(&self, store: Arc<dyn MementoStore>) {
        self.writer.set_store(store);
    }

    pub fn persister(&self) -> Arc<dyn MementoStore> {
        self.writer.store()
    }

    /// Block until all writes scheduled so far have been attempted.
    pub fn wait_for_pending_complete(&self) -> Result<(), RebindError> {
        Ok(self.writer.wait_for_pending_complete()?)
    }

    /// Queue a full write of every supplied object. Returns how many were queued.
    pub fn checkpoint<'a>(&self, objects: impl IntoIterator<Item = &'a ObjectRef>) -> usize {
        let mut scheduled = 0;
        for object in objects {
            let kind = classify(object.as_ref());
            match object.snapshot() {
                Ok(memento) => {
                    if self.writer.schedule_write(memento) {
                        scheduled += 1;
                    }
                }
                Err(err) => self.writer.report_generation_failure(kind, object.id(), err),
            }
        }
        info!(scheduled, "checkpoint queued");
        scheduled
    }

    /// Stop persistence and make any running or future pass fail. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            info!(state = %self.state(), "rebind manager stopping");
        }
        self.writer.stop();
    }

    /// Rebind `graph` with the manager's type loader.
    pub fn rebind(&self, graph: &GraphMemento) -> Result<RebindOutcome, RebindError> {
        self.rebind_with_loader(graph, self.loader.as_ref())
    }

    /// Rebind `graph`, resolving types through `loader` instead.
    pub fn rebind_with_loader(
        &self,
        graph: &GraphMemento,
        loader: &dyn TypeLoader,
    ) -> Result<RebindOutcome, RebindError> {
        let _pass = self.begin_pass("graph")?;
        self.run(graph, loader, Vec::new(), Instant::now())
    }

    /// Load every memento from the current persister, then rebind.
    pub fn rebind_from_store(&self) -> Result<RebindOutcome, RebindError> {
        let _pass = self.begin_pass("store")?;
        let started = Instant::now();
        self.set_state(RebindState::Loading);

        let store = self.writer.store();
        let sink = HandlerLoadSink::new(self.handler.as_ref());
        let loaded = store.load_all(&sink);
        let issues = sink.into_issues();
        if let Some(metrics) = &self.metrics {
            for issue in &issues {
                metrics.record_issue(issue.phase);
            }
        }

        match loaded {
            Ok(graph) => {
                info!(
                    store = %store.describe(),
                    mementos = graph.len(),
                    skipped = issues.len(),
                    "mementos loaded"
                );
                self.run(&graph, self.loader.as_ref(), issues, started)
            }
            Err(err) => self.fail(RebindError::Persistence(err), started),
        }
    }

    fn begin_pass(&self, source: &'static str) -> Result<PassGuard<'_>, RebindError> {
        if self.is_stopped() {
            return Err(RebindError::Stopped);
        }
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RebindError::AlreadyRunning)?;
        let pass = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        let guard = PassGuard {
            running: &self.running,
            _span: info_span!("rebind_pass", pass, source).entered(),
        };
        self.handler.on_pass_started();
        Ok(guard)
    }

    fn set_state(&self, state: RebindState) {
        *self.state.lock() = state;
        debug!(state = %state, "rebind state changed");
    }

    fn check_stopped(&self) -> Result<(), RebindError> {
        if self.is_stopped() {
            Err(RebindError::Stopped)
        } else {
            Ok(())
        }
    }

    fn issue(&self, report: &mut RebindReport, issue: RebindIssue) {
        if let Some(metrics) = &self.metrics {
            metrics.record_issue(issue.phase);
        }
        report.record(issue);
    }

    fn run(
        &self,
        graph: &GraphMemento,
        loader: &dyn TypeLoader,
        issues: Vec<RebindIssue>,
        started: Instant,
    ) -> Result<RebindOutcome, RebindError> {
        let mut report = RebindReport {
            issues,
            ..RebindReport::default()
        };
        match self.run_phases(graph, loader, &mut report) {
            Ok((roots, objects)) => {
                if let Some(cause) = self.handler.deferred_failure() {
                    return self.fail(cause, started);
                }
                report.duration_ms = started.elapsed().as_millis() as u64;
                self.set_state(RebindState::Done);
                if let Some(metrics) = &self.metrics {
                    metrics.record_pass("done", started.elapsed().as_secs_f64());
                }
                self.handler.on_done(&report);
                Ok(RebindOutcome {
                    roots,
                    objects,
                    report,
                })
            }
            Err(cause) => self.fail(cause, started),
        }
    }

    fn fail(&self, cause: RebindError, started: Instant) -> Result<RebindOutcome, RebindError> {
        self.set_state(RebindState::Failed);
        if let Some(metrics) = &self.metrics {
            metrics.record_pass("failed", started.elapsed().as_secs_f64());
        }
        Err(self.handler.on_failed(cause))
    }

    #[allow(clippy::type_complexity)]
    fn run_phases(
        &self,
        graph: &GraphMemento,
        loader: &dyn TypeLoader,
        report: &mut RebindReport,
    ) -> Result<(Vec<ObjectRef>, HashMap<Kind, IndexMap<String, ObjectRef>>), RebindError> {
        let mementos: Vec<Memento> = Kind::persisted()
            .iter()
            .flat_map(|kind| graph.mementos(*kind))
            .collect();

        self.set_state(RebindState::Reconstructing);
        let phase_started = Instant::now();
        let mut ctx = RebindContext::new(loader);
        for memento in &mementos {
            self.check_stopped()?;
            self.reconstruct_one(&mut ctx, loader, memento, report)?;
        }
        let ctx = ctx;
        info!(
            reconstructed = report.reconstructed,
            omitted = report.omitted.len(),
            elapsed_ms = phase_started.elapsed().as_millis() as u64,
            "reconstruct phase complete"
        );

        self.set_state(RebindState::Rebinding);
        let phase_started = Instant::now();
        let mut rebound: HashSet<(Kind, String)> = HashSet::new();
        for memento in &mementos {
            let kind = memento.kind();
            let Some(object) = ctx.resolve(kind, memento.id()) else {
                continue;
            };
            self.check_stopped()?;
            let relations = Resolver::new(self, &ctx, memento.id(), report).relations(memento)?;
            match object.rebind(&ctx, memento, &relations) {
                Ok(()) => {
                    report.rebound += 1;
                    rebound.insert((kind, memento.id().to_owned()));
                }
                Err(err) => {
                    self.issue(
                        report,
                        RebindIssue::new(RebindPhase::Rebind, kind, Some(memento.id()), format!("{err:#}")),
                    );
                    if rebind_failed(self.handler.as_ref(), kind, memento.id(), &err)
                        == Disposition::Abort
                    {
                        return Err(aborted(RebindPhase::Rebind, kind, memento.id(), &err));
                    }
                }
            }
        }
        info!(
            rebound = report.rebound,
            dangling = report.dangling,
            elapsed_ms = phase_started.elapsed().as_millis() as u64,
            "rebind phase complete"
        );

        self.set_state(RebindState::Managing);
        let phase_started = Instant::now();
        let mut order: Vec<(Kind, &str)> = Vec::with_capacity(mementos.len());
        order.extend(graph.ids(Kind::CatalogItem).into_iter().map(|id| (Kind::CatalogItem, id)));
        order.extend(graph.locations_parent_first().into_iter().map(|id| (Kind::Location, id)));
        order.extend(graph.entities_parent_first().into_iter().map(|id| (Kind::Entity, id)));
        for kind in [Kind::Policy, Kind::Enricher, Kind::Feed] {
            order.extend(graph.ids(kind).into_iter().map(|id| (kind, id)));
        }

        let listener: Arc<dyn ChangeListener> = self.listener.clone();
        let mut managed: HashMap<Kind, IndexMap<String, ObjectRef>> = HashMap::new();
        for (kind, id) in order {
            if !rebound.contains(&(kind, id.to_owned())) {
                continue;
            }
            let Some(object) = ctx.resolve(kind, id) else {
                continue;
            };
            self.check_stopped()?;
            object.bind_listener(Arc::clone(&listener));
            match object.finalize() {
                Ok(()) => {
                    report.managed += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_managed(kind);
                    }
                    managed.entry(kind).or_default().insert(id.to_owned(), object);
                }
                Err(err) => {
                    self.issue(
                        report,
                        RebindIssue::new(RebindPhase::Manage, kind, Some(id), format!("{err:#}")),
                    );
                    if manage_failed(self.handler.as_ref(), kind, id, &err) == Disposition::Abort {
                        return Err(aborted(RebindPhase::Manage, kind, id, &err));
                    }
                }
            }
        }
        info!(
            managed = report.managed,
            elapsed_ms = phase_started.elapsed().as_millis() as u64,
            "manage phase complete"
        );

        let top_level: Vec<String> = if graph.top_level_entities.is_empty() {
            graph
                .entities
                .values()
                .filter(|entity| entity.parent.is_none())
                .map(|entity| entity.core.id.clone())
                .collect()
        } else {
            graph.top_level_entities.clone()
        };
        let roots = top_level
            .iter()
            .filter_map(|id| managed.get(&Kind::Entity).and_then(|slot| slot.get(id)))
            .cloned()
            .collect();

        Ok((roots, managed))
    }

    fn reconstruct_one(
        &self,
        ctx: &mut RebindContext<'_>,
        loader: &dyn TypeLoader,
        memento: &Memento,
        report: &mut RebindReport,
    ) -> Result<(), RebindError> {
        let kind = memento.kind();
        let id = memento.id();
        let err = match construct(loader, memento) {
            Ok(object) => {
                ctx.insert(kind, object);
                report.reconstructed += 1;
                debug!(%kind, id, "object reconstructed");
                return Ok(());
            }
            Err(err) => err,
        };

        self.issue(
            report,
            RebindIssue::new(RebindPhase::Reconstruct, kind, Some(id), format!("{err:#}")),
        );
        match create_failed(self.handler.as_ref(), kind, id, memento.type_name(), &err) {
            Resolution::Omit => report.omitted.push((kind, id.to_owned())),
            Resolution::Substitute(substitute) => {
                if classify(substitute.as_ref()) == kind && substitute.id() == id {
                    ctx.insert(kind, substitute);
                    report.substituted.push((kind, id.to_owned()));
                } else {
                    warn!(%kind, id, substitute = substitute.id(), "substitute does not match; omitting");
                    report.omitted.push((kind, id.to_owned()));
                }
            }
            Resolution::Abort => return Err(aborted(RebindPhase::Reconstruct, kind, id, &err)),
        }
        Ok(())
    }
}

impl fmt::Debug for RebindManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebindManager")
            .field("state", &self.state())
            .field("stopped", &self.is_stopped())
            .field("writer", &self.writer)
            .finish_non_exhaustive()
    }
}

/// Resolves the relationship ids of one memento, offering each miss to the
/// handler at most once.
struct Resolver<'m, 'c, 'l> {
    manager: &'m RebindManager,
    ctx: &'c RebindContext<'l>,
    owner: &'m str,
    report: &'m mut RebindReport,
    misses: HashMap<(Kind, String), Option<ObjectRef>>,
}

impl<'m, 'c, 'l> Resolver<'m, 'c, 'l> {
    fn new(
        manager: &'m RebindManager,
        ctx: &'c RebindContext<'l>,
        owner: &'m str,
        report: &'m mut RebindReport,
    ) -> Self {
        Self {
            manager,
            ctx,
            owner,
            report,
            misses: HashMap::new(),
        }
    }

    fn relations(mut self, memento: &Memento) -> Result<ResolvedRelations, RebindError> {
        Ok(match memento {
            Memento::Entity(m) => ResolvedRelations::Entity {
                parent: self.optional(Kind::Entity, m.parent.as_deref())?,
                children: self.many(Kind::Entity, &m.children)?,
                locations: self.many(Kind::Location, &m.locations)?,
                policies: self.many(Kind::Policy, &m.policies)?,
                enrichers: self.many(Kind::Enricher, &m.enrichers)?,
                feeds: self.many(Kind::Feed, &m.feeds)?,
                catalog_item: self.optional(Kind::CatalogItem, m.core.catalog_item_id.as_deref())?,
            },
            Memento::Location(m) => ResolvedRelations::Location {
                parent: self.optional(Kind::Location, m.parent.as_deref())?,
                children: self.many(Kind::Location, &m.children)?,
                catalog_item: self.optional(Kind::CatalogItem, m.core.catalog_item_id.as_deref())?,
            },
            Memento::Policy(m) | Memento::Enricher(m) | Memento::Feed(m) => {
                ResolvedRelations::Adjunct {
                    owner: self.optional(Kind::Entity, m.owner.as_deref())?,
                    catalog_item: self.optional(Kind::CatalogItem, m.core.catalog_item_id.as_deref())?,
                }
            }
            Memento::CatalogItem(_) => ResolvedRelations::CatalogItem,
        })
    }

    fn optional(&mut self, kind: Kind, id: Option<&str>) -> Result<Option<ObjectRef>, RebindError> {
        match id {
            Some(id) => self.one(kind, id),
            None => Ok(None),
        }
    }

    fn many<'i>(
        &mut self,
        kind: Kind,
        ids: impl IntoIterator<Item = &'i String>,
    ) -> Result<Vec<ObjectRef>, RebindError> {
        let mut resolved = Vec::new();
        for id in ids {
            if let Some(object) = self.one(kind, id)? {
                resolved.push(object);
            }
        }
        Ok(resolved)
    }

    fn one(&mut self, kind: Kind, id: &str) -> Result<Option<ObjectRef>, RebindError> {
        if let Some(found) = self.ctx.resolve(kind, id) {
            return Ok(Some(found));
        }
        let key = (kind, id.to_owned());
        if let Some(previous) = self.misses.get(&key) {
            return Ok(previous.clone());
        }

        self.report.dangling += 1;
        self.manager.issue(
            self.report,
            RebindIssue::new(
                RebindPhase::Resolve,
                kind,
                Some(id),
                format!("dangling reference from '{}'", self.owner),
            ),
        );
        let resolved = match dangling(self.manager.handler.as_ref(), kind, id, self.owner) {
            Resolution::Omit => None,
            Resolution::Substitute(substitute) if classify(substitute.as_ref()) == kind => {
                Some(substitute)
            }
            Resolution::Substitute(substitute) => {
                warn!(%kind, id, substitute = substitute.id(), "substitute has the wrong kind; omitting");
                None
            }
            Resolution::Abort => {
                return Err(RebindError::Aborted {
                    phase: RebindPhase::Resolve,
                    kind,
                    id: id.to_owned(),
                    message: format!("dangling reference from '{}'", self.owner),
                })
            }
        };
        self.misses.insert(key, resolved.clone());
        Ok(resolved)
    }
}

fn construct(loader: &dyn TypeLoader, memento: &Memento) -> anyhow::Result<ObjectRef> {
    let kind = memento.kind();
    let descriptor = loader.load_type(memento.type_name())?;
    if descriptor.kind() != kind {
        return Err(RebindError::KindMismatch {
            type_name: descriptor.name().to_owned(),
            expected: kind,
            found: descriptor.kind(),
        }
        .into());
    }
    let object = descriptor
        .instantiate(memento.id())
        .with_context(|| format!("instantiating '{}'", descriptor.name()))?;
    anyhow::ensure!(
        object.id() == memento.id(),
        "factory for '{}' built '{}' for memento '{}'",
        descriptor.name(),
        object.id(),
        memento.id()
    );
    object.reconstruct(&ReconstructContext::new(loader, kind, memento.id()), memento)?;
    Ok(object)
}

fn aborted(phase: RebindPhase, kind: Kind, id: &str, err: &anyhow::Error) -> RebindError {
    RebindError::Aborted {
        phase,
        kind,
        id: id.to_owned(),
        message: format!("{err:#}"),
    }
}

fn create_failed(
    handler: &dyn RebindExceptionHandler,
    kind: Kind,
    id: &str,
    type_name: &str,
    err: &anyhow::Error,
) -> Resolution<ObjectRef> {
    match kind {
        Kind::Location => handler.on_create_location_failed(id, type_name, err),
        Kind::Entity => handler.on_create_entity_failed(id, type_name, err),
        Kind::Policy => handler.on_create_policy_failed(id, type_name, err),
        Kind::Enricher => handler.on_create_enricher_failed(id, type_name, err),
        Kind::Feed => handler.on_create_feed_failed(id, type_name, err),
        Kind::CatalogItem => handler.on_create_catalog_item_failed(id, type_name, err),
        Kind::Unknown => handler.on_create_failed(kind, id, type_name, err),
    }
}

fn dangling(
    handler: &dyn RebindExceptionHandler,
    kind: Kind,
    id: &str,
    referenced_by: &str,
) -> Resolution<ObjectRef> {
    match kind {
        Kind::Entity => handler.on_dangling_entity_ref(id, referenced_by),
        Kind::Location => handler.on_dangling_location_ref(id, referenced_by),
        Kind::Policy => handler.on_dangling_policy_ref(id, referenced_by),
        Kind::Enricher => handler.on_dangling_enricher_ref(id, referenced_by),
        Kind::Feed => handler.on_dangling_feed_ref(id, referenced_by),
        Kind::CatalogItem => handler.on_dangling_catalog_item_ref(id, referenced_by),
        Kind::Unknown => handler.on_dangling_ref(kind, id, referenced_by),
    }
}

fn rebind_failed(
    handler: &dyn RebindExceptionHandler,
    kind: Kind,
    id: &str,
    err: &anyhow::Error,
) -> Disposition {
    match kind {
        Kind::Entity => handler.on_rebind_entity_failed(id, err),
        Kind::Location => handler.on_rebind_location_failed(id, err),
        Kind::Policy | Kind::Enricher | Kind::Feed => handler.on_rebind_adjunct_failed(kind, id, err),
        Kind::CatalogItem => handler.on_rebind_catalog_item_failed(id, err),
        Kind::Unknown => handler.on_rebind_failed(kind, id, err),
    }
}

fn manage_failed(
    handler: &dyn RebindExceptionHandler,
    kind: Kind,
    id: &str,
    err: &anyhow::Error,
) -> Disposition {
    match kind {
        Kind::Entity => handler.on_manage_entity_failed(id, err),
        Kind::Location => handler.on_manage_location_failed(id, err),
        Kind::Policy | Kind::Enricher | Kind::Feed => handler.on_manage_adjunct_failed(kind, id, err),
        Kind::CatalogItem => handler.on_manage_catalog_item_failed(id, err),
        Kind::Unknown => handler.on_manage_failed(kind, id, err),
    }
}
