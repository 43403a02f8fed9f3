//! ---
//! mooring_section: "01-core-functionality"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Rebind orchestration for the control plane."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use mooring_common::{FailureMode, RebindConfig, StoreFormat};
use mooring_memento::{
    AdjunctMemento, CatalogItemMemento, Classified, EntityMemento, GraphMemento, Kind,
    LocationMemento, Memento, Persistable,
};
use mooring_persistence::{
    FileMementoStore, InMemoryMementoStore, LoggingPersistenceExceptionHandler, MementoStore,
    WriterConfig,
};
use mooring_rebind::object::{
    BASIC_APPLICATION, BASIC_CATALOG_ITEM, BASIC_ENTITY, BASIC_LOCATION, BASIC_POLICY,
};
use mooring_rebind::{
    BasicEntity, BasicLocation, DefaultRebindExceptionHandler, ManagedObject, ObjectRef, RebindContext,
    RebindError, RebindExceptionHandler, RebindManager, RebindPhase, RebindReport, RebindState,
    ReconstructContext, ResolvedRelations, Resolution, TypeRegistry,
};
use parking_lot::Mutex;

const STAGED: &str = "test.Staged";

type Hook = Arc<dyn Fn(&str, &str) -> Result<()> + Send + Sync>;

/// Entity double that reports every phase call to a hook.
struct Staged {
    id: String,
    hook: Hook,
    memento: Mutex<Option<Memento>>,
}

impl Classified for Staged {
    fn implements(&self, kind: Kind) -> bool {
        kind == Kind::Entity
    }
}

impl Persistable for Staged {
    fn id(&self) -> &str {
        &self.id
    }

    fn snapshot(&self) -> Result<Memento> {
        match self.memento.lock().clone() {
            Some(memento) => Ok(memento),
            None => bail!("staged object '{}' has no state", self.id),
        }
    }
}

impl ManagedObject for Staged {
    fn type_name(&self) -> &str {
        STAGED
    }

    fn reconstruct(&self, _ctx: &ReconstructContext<'_>, memento: &Memento) -> Result<()> {
        (self.hook)("reconstruct", &self.id)?;
        *self.memento.lock() = Some(memento.clone());
        Ok(())
    }

    fn rebind(
        &self,
        _ctx: &RebindContext<'_>,
        _memento: &Memento,
        _relations: &ResolvedRelations,
    ) -> Result<()> {
        (self.hook)("rebind", &self.id)
    }

    fn finalize(&self) -> Result<()> {
        (self.hook)("finalize", &self.id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn staged_registry<F>(hook: F) -> Arc<TypeRegistry>
where
    F: Fn(&str, &str) -> Result<()> + Send + Sync + 'static,
{
    let hook: Hook = Arc::new(hook);
    let registry = TypeRegistry::with_basic_types();
    registry.register(STAGED, Kind::Entity, move |id| {
        Ok(Arc::new(Staged {
            id: id.to_owned(),
            hook: Arc::clone(&hook),
            memento: Mutex::new(None),
        }) as ObjectRef)
    });
    Arc::new(registry)
}

fn writer_config() -> WriterConfig {
    WriterConfig {
        period: Duration::from_millis(5),
        high_water: 64,
    }
}

fn manager_with(
    loader: Arc<TypeRegistry>,
    store: Arc<dyn MementoStore>,
    handler: Arc<dyn RebindExceptionHandler>,
) -> RebindManager {
    RebindManager::new(
        writer_config(),
        loader,
        store,
        Arc::new(LoggingPersistenceExceptionHandler::new()),
        handler,
    )
    .expect("writer starts")
}

fn default_manager(store: Arc<dyn MementoStore>) -> RebindManager {
    manager_with(
        Arc::new(TypeRegistry::with_basic_types()),
        store,
        Arc::new(DefaultRebindExceptionHandler::new(RebindConfig::default())),
    )
}

fn staged_graph(ids: &[&str]) -> GraphMemento {
    let mut graph = GraphMemento::new();
    let (root, rest) = ids.split_first().expect("at least one id");
    let mut parent = EntityMemento::new(*root, STAGED);
    for child in rest {
        parent = parent.with_child(*child);
        graph.insert(EntityMemento::new(*child, STAGED).with_parent(*root));
    }
    graph.insert(parent);
    graph.derive_top_level();
    graph
}

fn application_graph() -> Result<GraphMemento> {
    let mut graph = GraphMemento::new();
    let mut catalog = CatalogItemMemento::new(
        "cat-1",
        BASIC_CATALOG_ITEM,
        "acme.web",
        "1.2.0",
        Kind::Entity,
    );
    catalog.plan = Some("services: [web]".into());
    graph.insert(catalog);

    let mut app = EntityMemento::new("app-1", BASIC_APPLICATION)
        .with_location("loc-1")
        .with_child("child-1")
        .with_adjunct(Kind::Policy, "pol-1")
        .with_config("replicas", serde_json::json!(3))
        .with_tag("tier:web");
    app.core.catalog_item_id = Some("cat-1".into());
    app.core.display_name = Some("Web application".into());
    graph.insert(app);
    graph.insert(EntityMemento::new("child-1", BASIC_ENTITY).with_parent("app-1"));
    graph.insert(
        LocationMemento::new("loc-1", BASIC_LOCATION)
            .with_config("region", serde_json::json!("eu-west-1")),
    );
    graph.insert(Memento::adjunct(
        Kind::Policy,
        AdjunctMemento::new("pol-1", BASIC_POLICY).with_owner("app-1"),
    )?);
    graph.derive_top_level();
    Ok(graph)
}

#[test]
fn phases_act_as_barriers() -> Result<()> {
    let events = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&events);
    let loader = staged_registry(move |phase, id| {
        sink.lock().push(format!("{phase}:{id}"));
        Ok(())
    });
    let manager = manager_with(
        loader,
        Arc::new(InMemoryMementoStore::new("barrier")),
        Arc::new(DefaultRebindExceptionHandler::new(RebindConfig::default())),
    );

    let outcome = manager.rebind(&staged_graph(&["a", "b", "c"]))?;
    assert_eq!(outcome.root_ids(), vec!["a"]);

    let events = events.lock().clone();
    let position = |prefix: &str| -> Vec<usize> {
        events
            .iter()
            .enumerate()
            .filter(|(_, event)| event.starts_with(prefix))
            .map(|(index, _)| index)
            .collect()
    };
    let reconstructs = position("reconstruct:");
    let rebinds = position("rebind:");
    let finalizes = position("finalize:");
    assert_eq!((reconstructs.len(), rebinds.len(), finalizes.len()), (3, 3, 3));
    assert!(reconstructs.iter().max() < rebinds.iter().min());
    assert!(rebinds.iter().max() < finalizes.iter().min());
    // Parents are finalized before their children.
    assert_eq!(events[finalizes[0]], "finalize:a");
    Ok(())
}

#[derive(Default)]
struct DanglingRecorder {
    calls: Mutex<Vec<(String, String)>>,
}

impl RebindExceptionHandler for DanglingRecorder {
    fn on_dangling_location_ref(&self, id: &str, referenced_by: &str) -> Resolution<ObjectRef> {
        self.calls.lock().push((id.to_owned(), referenced_by.to_owned()));
        Resolution::Omit
    }
}

#[test]
fn dangling_location_is_offered_once_and_omitted() -> Result<()> {
    let mut graph = GraphMemento::new();
    graph.insert(
        EntityMemento::new("app-1", BASIC_APPLICATION)
            .with_location("loc-1")
            .with_location("loc-1"),
    );
    graph.derive_top_level();

    let recorder = Arc::new(DanglingRecorder::default());
    let manager = manager_with(
        Arc::new(TypeRegistry::with_basic_types()),
        Arc::new(InMemoryMementoStore::new("dangling")),
        recorder.clone(),
    );
    let outcome = manager.rebind(&graph)?;

    assert_eq!(
        *recorder.calls.lock(),
        vec![("loc-1".to_owned(), "app-1".to_owned())]
    );
    let app = outcome.roots()[0]
        .as_any()
        .downcast_ref::<BasicEntity>()
        .expect("basic entity");
    assert!(app.location_ids().is_empty());
    assert_eq!(outcome.report().dangling, 1);
    assert_eq!(outcome.report().issues[0].phase, RebindPhase::Resolve);
    Ok(())
}

#[test]
fn failed_reconstruct_omits_only_that_object() -> Result<()> {
    let loader = staged_registry(|phase, id| {
        if phase == "reconstruct" && id == "b" {
            bail!("state for 'b' is unreadable");
        }
        Ok(())
    });
    let manager = manager_with(
        loader,
        Arc::new(InMemoryMementoStore::new("partial")),
        Arc::new(DefaultRebindExceptionHandler::new(RebindConfig::uniform(
            FailureMode::Continue,
        ))),
    );

    let outcome = manager.rebind(&staged_graph(&["a", "b", "c"]))?;
    assert_eq!(outcome.ids(Kind::Entity), vec!["a", "c"]);
    assert!(outcome.get(Kind::Entity, "b").is_none());
    assert_eq!(outcome.report().omitted, vec![(Kind::Entity, "b".to_owned())]);
    // The failed create plus the parent's now-dangling child reference.
    assert_eq!(outcome.report().issues.len(), 2);
    assert_eq!(outcome.report().dangling, 1);
    assert_eq!(manager.state(), RebindState::Done);
    Ok(())
}

#[test]
fn fail_fast_create_aborts_the_pass() {
    let loader = staged_registry(|phase, _| {
        if phase == "reconstruct" {
            bail!("nope");
        }
        Ok(())
    });
    let manager = manager_with(
        loader,
        Arc::new(InMemoryMementoStore::new("abort")),
        Arc::new(DefaultRebindExceptionHandler::new(RebindConfig::uniform(
            FailureMode::FailFast,
        ))),
    );

    let err = manager.rebind(&staged_graph(&["a", "b"])).unwrap_err();
    assert!(
        matches!(&err, RebindError::Aborted { phase: RebindPhase::Reconstruct, id, .. } if id == "b"),
        "unexpected error: {err}"
    );
    assert_eq!(manager.state(), RebindState::Failed);
}

/// Delegates to the default handler and counts terminal callbacks.
struct Terminals {
    inner: DefaultRebindExceptionHandler,
    done: AtomicUsize,
    failed: AtomicUsize,
}

impl RebindExceptionHandler for Terminals {
    fn on_create_failed(
        &self,
        kind: Kind,
        id: &str,
        type_name: &str,
        error: &anyhow::Error,
    ) -> Resolution<ObjectRef> {
        self.inner.on_create_failed(kind, id, type_name, error)
    }

    fn deferred_failure(&self) -> Option<RebindError> {
        self.inner.deferred_failure()
    }

    fn on_done(&self, _report: &RebindReport) {
        self.done.fetch_add(1, Ordering::SeqCst);
    }

    fn on_failed(&self, cause: RebindError) -> RebindError {
        self.failed.fetch_add(1, Ordering::SeqCst);
        cause
    }
}

#[test]
fn fail_at_end_reports_deferred_failure_instead_of_done() {
    let loader = staged_registry(|phase, id| {
        if phase == "reconstruct" && id != "a" {
            bail!("broken {id}");
        }
        Ok(())
    });
    let terminals = Arc::new(Terminals {
        inner: DefaultRebindExceptionHandler::new(RebindConfig {
            create: FailureMode::FailAtEnd,
            ..RebindConfig::uniform(FailureMode::Continue)
        }),
        done: AtomicUsize::new(0),
        failed: AtomicUsize::new(0),
    });
    let manager = manager_with(
        loader,
        Arc::new(InMemoryMementoStore::new("deferred")),
        terminals.clone(),
    );

    let err = manager.rebind(&staged_graph(&["a", "b", "c"])).unwrap_err();
    match err {
        RebindError::Deferred { first, total } => {
            assert_eq!(total, 2);
            assert_eq!(first.id.as_deref(), Some("b"));
        }
        other => panic!("expected deferred failure, got {other}"),
    }
    assert_eq!(terminals.done.load(Ordering::SeqCst), 0);
    assert_eq!(terminals.failed.load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_type_reaches_the_handler_as_type_not_found() -> Result<()> {
    #[derive(Default)]
    struct Missing(Mutex<Vec<String>>);

    impl RebindExceptionHandler for Missing {
        fn on_create_entity_failed(
            &self,
            _id: &str,
            _type_name: &str,
            error: &anyhow::Error,
        ) -> Resolution<ObjectRef> {
            if let Some(RebindError::TypeNotFound(name)) = error.downcast_ref::<RebindError>() {
                self.0.lock().push(name.clone());
            }
            Resolution::Substitute(Arc::new(BasicEntity::new("legacy-1", BASIC_ENTITY)))
        }
    }

    let mut graph = GraphMemento::new();
    graph.insert(EntityMemento::new("legacy-1", "acme.Retired"));
    graph.derive_top_level();

    let handler = Arc::new(Missing::default());
    let manager = manager_with(
        Arc::new(TypeRegistry::with_basic_types()),
        Arc::new(InMemoryMementoStore::new("missing")),
        handler.clone(),
    );
    let outcome = manager.rebind(&graph)?;

    assert_eq!(*handler.0.lock(), vec!["acme.Retired".to_owned()]);
    assert_eq!(outcome.report().substituted, vec![(Kind::Entity, "legacy-1".to_owned())]);
    assert_eq!(outcome.root_ids(), vec!["legacy-1"]);
    Ok(())
}

#[test]
fn managed_snapshots_match_the_source_mementos() -> Result<()> {
    let graph = application_graph()?;
    let manager = default_manager(Arc::new(InMemoryMementoStore::new("round-trip")));
    let outcome = manager.rebind(&graph)?;

    assert_eq!(outcome.len(), graph.len());
    for object in outcome.iter() {
        let kind = mooring_memento::classify(object.as_ref());
        assert_eq!(Some(object.snapshot()?), graph.get(kind, object.id()), "{kind} '{}'", object.id());
    }
    Ok(())
}

#[test]
fn rebind_from_file_store_restores_the_graph() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(FileMementoStore::open(dir.path(), StoreFormat::Json)?);
    let graph = application_graph()?;
    for kind in Kind::persisted() {
        for memento in graph.mementos(*kind) {
            store.write(*kind, memento.id(), &memento)?;
        }
    }

    let manager = default_manager(store);
    let outcome = manager.rebind_from_store()?;
    assert_eq!(outcome.root_ids(), vec!["app-1"]);
    assert_eq!(outcome.ids(Kind::Location), vec!["loc-1"]);
    assert!(outcome.report().is_clean());
    Ok(())
}

#[test]
fn mutations_follow_the_persister_swap() -> Result<()> {
    let first = Arc::new(InMemoryMementoStore::new("first"));
    let second = Arc::new(InMemoryMementoStore::new("second"));
    let manager = default_manager(first.clone());
    let outcome = manager.rebind(&application_graph()?)?;

    manager.set_persister(second.clone());
    let app = outcome.roots()[0]
        .as_any()
        .downcast_ref::<BasicEntity>()
        .expect("basic entity");
    app.set_config("replicas", serde_json::json!(7));
    manager.wait_for_pending_complete()?;

    assert!(first.get(Kind::Entity, "app-1").is_none());
    let stored = second.get(Kind::Entity, "app-1").expect("written to new persister");
    assert_eq!(stored.core().config["replicas"], serde_json::json!(7));
    assert_eq!(manager.persister().describe(), second.describe());
    Ok(())
}

#[test]
fn stop_is_idempotent_and_refuses_later_passes() {
    let manager = default_manager(Arc::new(InMemoryMementoStore::new("stop")));
    manager.stop();
    manager.stop();
    assert!(manager.is_stopped());
    assert!(matches!(
        manager.rebind(&GraphMemento::new()),
        Err(RebindError::Stopped)
    ));
    assert!(matches!(manager.rebind_from_store(), Err(RebindError::Stopped)));
}

#[test]
fn concurrent_pass_is_refused() -> Result<()> {
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);
    let loader = staged_registry(move |phase, _| {
        if phase == "reconstruct" {
            let _ = entered_tx.lock().send(());
            let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
        }
        Ok(())
    });
    let manager = Arc::new(manager_with(
        loader,
        Arc::new(InMemoryMementoStore::new("busy")),
        Arc::new(DefaultRebindExceptionHandler::new(RebindConfig::default())),
    ));

    let background = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.rebind(&staged_graph(&["a"])).map(|outcome| outcome.len()))
    };
    entered_rx.recv_timeout(Duration::from_secs(5))?;
    assert!(matches!(
        manager.rebind(&staged_graph(&["a"])),
        Err(RebindError::AlreadyRunning)
    ));
    assert_eq!(manager.state(), RebindState::Reconstructing);
    release_tx.send(())?;

    let managed = background.join().expect("pass thread").map_err(anyhow::Error::new)?;
    assert_eq!(managed, 1);
    Ok(())
}

#[test]
fn aborted_pass_leaves_no_deferred_failure_for_the_next_one() -> Result<()> {
    let loader = staged_registry(|phase, id| match (phase, id) {
        ("reconstruct", "b") => bail!("b broken"),
        ("rebind", "a") => bail!("a cannot attach"),
        _ => Ok(()),
    });
    let handler = Arc::new(DefaultRebindExceptionHandler::new(RebindConfig {
        create: FailureMode::FailAtEnd,
        rebind: FailureMode::FailFast,
        ..RebindConfig::uniform(FailureMode::Continue)
    }));
    let manager = manager_with(
        loader,
        Arc::new(InMemoryMementoStore::new("two-passes")),
        handler.clone(),
    );

    let err = manager.rebind(&staged_graph(&["a", "b", "c"])).unwrap_err();
    assert!(
        matches!(&err, RebindError::Aborted { phase: RebindPhase::Rebind, id, .. } if id == "a"),
        "unexpected error: {err}"
    );

    let outcome = manager.rebind(&staged_graph(&["x", "y"]))?;
    assert_eq!(outcome.root_ids(), vec!["x"]);
    assert_eq!(manager.state(), RebindState::Done);
    assert!(handler.issues().is_empty());
    Ok(())
}

#[test]
fn stop_during_a_pass_fails_it_as_stopped() {
    let slot: Arc<Mutex<Weak<RebindManager>>> = Arc::new(Mutex::new(Weak::new()));
    let hook_slot = Arc::clone(&slot);
    let loader = staged_registry(move |phase, id| {
        if phase == "reconstruct" && id == "a" {
            if let Some(manager) = hook_slot.lock().upgrade() {
                manager.stop();
            }
        }
        Ok(())
    });
    let terminals = Arc::new(Terminals {
        inner: DefaultRebindExceptionHandler::new(RebindConfig::default()),
        done: AtomicUsize::new(0),
        failed: AtomicUsize::new(0),
    });
    let manager = Arc::new(manager_with(
        loader,
        Arc::new(InMemoryMementoStore::new("cancel")),
        terminals.clone(),
    ));
    *slot.lock() = Arc::downgrade(&manager);

    let err = manager.rebind(&staged_graph(&["a", "b", "c"])).unwrap_err();
    assert!(matches!(err, RebindError::Stopped), "unexpected error: {err}");
    assert_eq!(manager.state(), RebindState::Failed);
    assert_eq!(terminals.failed.load(Ordering::SeqCst), 1);
    assert_eq!(terminals.done.load(Ordering::SeqCst), 0);
}

#[test]
fn dangling_location_substitute_is_what_the_entity_sees() -> Result<()> {
    struct StandIn(Mutex<Vec<String>>);

    impl RebindExceptionHandler for StandIn {
        fn on_dangling_location_ref(&self, id: &str, _referenced_by: &str) -> Resolution<ObjectRef> {
            self.0.lock().push(id.to_owned());
            Resolution::Substitute(Arc::new(BasicLocation::new(id, BASIC_LOCATION)))
        }
    }

    let mut graph = GraphMemento::new();
    graph.insert(EntityMemento::new("app-1", BASIC_APPLICATION).with_location("loc-gone"));
    graph.derive_top_level();

    let handler = Arc::new(StandIn(Mutex::new(Vec::new())));
    let manager = manager_with(
        Arc::new(TypeRegistry::with_basic_types()),
        Arc::new(InMemoryMementoStore::new("stand-in")),
        handler.clone(),
    );
    let outcome = manager.rebind(&graph)?;

    assert_eq!(*handler.0.lock(), vec!["loc-gone".to_owned()]);
    let app = outcome.roots()[0]
        .as_any()
        .downcast_ref::<BasicEntity>()
        .expect("basic entity");
    assert_eq!(app.location_ids(), vec!["loc-gone".to_owned()]);
    assert_eq!(outcome.report().dangling, 1);
    assert!(outcome.get(Kind::Location, "loc-gone").is_none());
    Ok(())
}

#[test]
fn missing_catalog_provenance_matches_the_aggregate_view() {
    let mut graph = GraphMemento::new();
    let mut zone = LocationMemento::new("zone-1", BASIC_LOCATION);
    zone.core.catalog_item_id = Some("acme.zone:1.0".into());
    graph.insert(zone);
    graph.derive_top_level();

    let dangling = graph.dangling_references();
    assert_eq!(dangling.len(), 1);
    assert_eq!((dangling[0].kind, dangling[0].id.as_str()), (Kind::CatalogItem, "acme.zone:1.0"));

    let manager = manager_with(
        Arc::new(TypeRegistry::with_basic_types()),
        Arc::new(InMemoryMementoStore::new("provenance")),
        Arc::new(DefaultRebindExceptionHandler::new(RebindConfig {
            dangling_ref: FailureMode::FailFast,
            ..RebindConfig::default()
        })),
    );
    let err = manager.rebind(&graph).unwrap_err();
    assert!(
        matches!(
            &err,
            RebindError::Aborted { phase: RebindPhase::Resolve, kind: Kind::CatalogItem, id, .. }
                if id == "acme.zone:1.0"
        ),
        "unexpected error: {err}"
    );
}
