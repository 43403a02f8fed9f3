//! ---
//! mooring_section: "07-resilience-fault-tolerance"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Node supervision and promotion coordinators."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use mooring_common::{NodeConfig, NodeRole, RebindConfig, StoreFormat};
use mooring_memento::{EntityMemento, Kind, LocationMemento, Memento};
use mooring_persistence::{
    FileMementoStore, LoggingPersistenceExceptionHandler, MementoStore, WriterConfig,
};
use mooring_rebind::object::{BASIC_APPLICATION, BASIC_LOCATION};
use mooring_rebind::{
    BasicEntity, DefaultRebindExceptionHandler, ManagedObject, RebindError, RebindManager,
    TypeRegistry,
};
use mooring_redundancy::{DriverState, NodeContext, NodeSupervisor, PromotionDriver, PromotionReason};

fn node_config(id: &str, role: NodeRole, failover_order: u32) -> NodeConfig {
    NodeConfig {
        id: id.into(),
        role,
        failover_order,
        heartbeat_interval: Duration::from_millis(10),
        watchdog_timeout: Duration::from_millis(20),
    }
}

fn seed(store: &FileMementoStore) -> anyhow::Result<()> {
    let app: Memento = EntityMemento::new("app-1", BASIC_APPLICATION)
        .with_location("loc-1")
        .into();
    let loc: Memento = LocationMemento::new("loc-1", BASIC_LOCATION).into();
    store.write(Kind::Entity, "app-1", &app)?;
    store.write(Kind::Location, "loc-1", &loc)?;
    Ok(())
}

fn standby_driver(node_id: &str, primary: &FileMementoStore) -> anyhow::Result<PromotionDriver> {
    let manager = RebindManager::new(
        WriterConfig {
            period: Duration::from_millis(5),
            high_water: 64,
        },
        Arc::new(TypeRegistry::with_basic_types()),
        Arc::new(primary.read_only_view()),
        Arc::new(LoggingPersistenceExceptionHandler::new()),
        Arc::new(DefaultRebindExceptionHandler::new(RebindConfig::default())),
    )?;
    Ok(PromotionDriver::new(
        node_id,
        Arc::new(manager),
        Arc::new(primary.clone()),
    ))
}

#[test]
fn standby_takes_over_when_master_goes_silent() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let primary = FileMementoStore::open(dir.path(), StoreFormat::Json)?;
    seed(&primary)?;

    let supervisor = NodeSupervisor::new("cluster-a");
    let start = Instant::now();
    supervisor.register(
        NodeContext::from_config("cluster-a", &node_config("node-a", NodeRole::Master, 0)),
        start,
    );
    supervisor.register(
        NodeContext::from_config("cluster-a", &node_config("node-b", NodeRole::Standby, 1)),
        start,
    );
    supervisor.heartbeat("node-a", start);
    supervisor.heartbeat("node-b", start);
    assert_eq!(supervisor.evaluate(start).map(|e| e.promoted_node), Some("node-a".into()));

    let driver = standby_driver("node-b", &primary)?;
    assert!(driver.manager().persister().is_read_only());

    let later = start + Duration::from_millis(30);
    supervisor.heartbeat("node-b", later);
    let event = supervisor.evaluate(later).expect("failover event");
    assert_eq!(event.reason, PromotionReason::HeartbeatTimeout);
    assert_eq!(event.promoted_node, "node-b");

    let outcome = driver.handle(&event)?.expect("local promotion");
    assert_eq!(outcome.root_ids, vec!["app-1".to_owned()]);
    assert_eq!(outcome.managed, 2);
    assert!(outcome.issues.is_empty());
    assert_eq!(driver.state(), DriverState::Master);
    assert!(!driver.manager().persister().is_read_only());

    // The rebound graph now persists through the read-write store.
    let live = driver.live().expect("live graph");
    let app = live.roots()[0]
        .as_any()
        .downcast_ref::<BasicEntity>()
        .expect("basic entity");
    app.set_config("owner", serde_json::json!("node-b"));
    driver.manager().wait_for_pending_complete()?;
    let stored = primary.read(Kind::Entity, "app-1")?.expect("app persisted");
    assert_eq!(stored.core().config["owner"], serde_json::json!("node-b"));

    // A repeated event for the same node is a no-op.
    assert!(driver.handle(&event)?.is_none());
    Ok(())
}

#[test]
fn demotion_stops_persistence() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let primary = FileMementoStore::open(dir.path(), StoreFormat::Cbor)?;
    seed(&primary)?;

    let driver = standby_driver("node-a", &primary)?;
    driver.promote()?;
    driver.demote();
    driver.demote();

    assert_eq!(driver.state(), DriverState::Demoted);
    assert!(driver.live().is_none());
    assert!(driver.manager().is_stopped());
    assert!(matches!(driver.promote(), Err(RebindError::Stopped)));
    Ok(())
}
