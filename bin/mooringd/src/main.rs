//! ---
//! mooring_section: "01-core-functionality"
//! mooring_subsection: "binary"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Binary entrypoint for the Mooring daemon."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use mooring_common::{
    init_tracing, node_registry, spawn_http_server, AppConfig, Readiness, SharedRegistry,
};
use mooring_memento::Kind;
use mooring_persistence::{
    FileMementoStore, LoggingPersistenceExceptionHandler, MementoStore, MementoWriter,
    PersistenceMetrics, SkipOnLoadFailure, WriterConfig,
};
use mooring_rebind::{DefaultRebindExceptionHandler, RebindManager, RebindMetrics, TypeRegistry};
use mooring_redundancy::{DriverState, NodeContext, NodeSupervisor, PromotionDriver};
use serde_json::json;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Mooring control-plane daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        env = "MOORING_CLUSTER",
        default_value = "default",
        help = "Cluster the node belongs to"
    )]
    cluster: String,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the node: supervise, and rebind when promoted")]
    Run,
    #[command(about = "Rebind the persisted graph once and print the report")]
    Rebind {
        #[arg(long, help = "Rewrite every managed object after the pass")]
        checkpoint: bool,
    },
    #[command(about = "Summarise the mementos held by the store")]
    Inspect {
        #[arg(long, value_enum, help = "List the ids of one kind")]
        kind: Option<KindArg>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Entity,
    Location,
    Policy,
    Enricher,
    Feed,
    CatalogItem,
}

impl From<KindArg> for Kind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Entity => Kind::Entity,
            KindArg::Location => Kind::Location,
            KindArg::Policy => Kind::Policy,
            KindArg::Enricher => Kind::Enricher,
            KindArg::Feed => Kind::Feed,
            KindArg::CatalogItem => Kind::CatalogItem,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("mooringd {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/mooring.toml"));
    candidates.push(PathBuf::from("/etc/mooring/mooring.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    config.validate()?;
    init_tracing("mooringd", &config.logging)?;
    info!(source = %loaded.source.display(), node = %config.node.id, "configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_node(config, cli.cluster).await?,
        Commands::Rebind { checkpoint } => {
            tokio::task::spawn_blocking(move || rebind_once(&config, checkpoint)).await??
        }
        Commands::Inspect { kind } => inspect(&config, kind.map(Kind::from))?,
    }

    Ok(())
}

fn build_manager(
    config: &AppConfig,
    store: Arc<dyn MementoStore>,
    registry: Option<&SharedRegistry>,
) -> Result<RebindManager> {
    let persistence_metrics = registry
        .map(|registry| PersistenceMetrics::new(Arc::clone(registry)))
        .transpose()?;
    let writer = MementoWriter::start_with_metrics(
        store,
        Arc::new(LoggingPersistenceExceptionHandler::new()),
        WriterConfig::from(&config.persistence),
        persistence_metrics,
    )?;
    let mut manager = RebindManager::with_writer(
        Arc::new(writer),
        Arc::new(TypeRegistry::with_basic_types()),
        Arc::new(DefaultRebindExceptionHandler::new(config.rebind.clone())),
    );
    if let Some(registry) = registry {
        manager = manager.with_metrics(RebindMetrics::new(Arc::clone(registry))?);
    }
    Ok(manager)
}

async fn run_node(config: AppConfig, cluster: String) -> Result<()> {
    let registry = node_registry(&cluster, &config.node.id)?;
    let readiness = Readiness::default();
    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(
            registry.clone(),
            readiness.clone(),
            config.metrics.listen,
        )?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let primary = FileMementoStore::from_config(&config.persistence)?;
    let mirror: Arc<dyn MementoStore> = Arc::new(primary.read_only_view());
    let manager = build_manager(&config, mirror, Some(&registry))?;
    let driver = Arc::new(PromotionDriver::new(
        config.node.id.clone(),
        Arc::new(manager),
        Arc::new(primary),
    ));

    let node_id = config.node.id.clone();
    let supervisor = NodeSupervisor::new(cluster);
    supervisor.register(
        NodeContext::from_config(supervisor.cluster_id(), &config.node),
        Instant::now(),
    );

    let mut ticker = tokio::time::interval(config.node.heartbeat_interval);
    info!(cluster = %supervisor.cluster_id(), node = %node_id, role = ?config.node.role, "node running; waiting for termination signal");
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("ctrl-c received; shutting down");
                break;
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                supervisor.heartbeat(&node_id, now);
                let Some(event) = supervisor.evaluate(now) else {
                    continue;
                };
                let local = Arc::clone(&driver);
                let handled = tokio::task::spawn_blocking(move || local.handle(&event)).await?;
                readiness.set(driver.state() == DriverState::Master);
                match handled {
                    Ok(Some(outcome)) => info!(
                        roots = outcome.roots(),
                        managed = outcome.managed,
                        issues = outcome.issues.len(),
                        "serving as master"
                    ),
                    Ok(None) => {}
                    Err(err) => {
                        error!(error = %err, "promotion failed; leaving the cluster");
                        supervisor.deregister(&node_id);
                        break;
                    }
                }
            }
        }
    }

    let local = Arc::clone(&driver);
    tokio::task::spawn_blocking(move || local.manager().stop()).await?;
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

fn rebind_once(config: &AppConfig, checkpoint: bool) -> Result<()> {
    let store = FileMementoStore::from_config(&config.persistence)?;
    if checkpoint && store.is_read_only() {
        bail!("--checkpoint needs a writable store; {} is read-only", store.describe());
    }
    let store: Arc<dyn MementoStore> = if checkpoint {
        Arc::new(store)
    } else {
        Arc::new(store.read_only_view())
    };

    let manager = build_manager(config, store, None)?;
    let result = manager.rebind_from_store();
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            manager.stop();
            return Err(err.into());
        }
    };
    if checkpoint {
        let scheduled = manager.checkpoint(outcome.iter());
        manager.wait_for_pending_complete()?;
        info!(scheduled, "checkpoint written");
    }
    manager.stop();

    let report = json!({
        "roots": outcome.root_ids(),
        "report": outcome.report(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn inspect(config: &AppConfig, kind: Option<Kind>) -> Result<()> {
    let store = FileMementoStore::open_read_only(&config.persistence.directory, config.persistence.format);
    let graph = store.load_all(&SkipOnLoadFailure)?;

    let summary = match kind {
        Some(kind) => json!({
            "store": store.describe(),
            "kind": kind.as_str(),
            "ids": graph.ids(kind),
        }),
        None => {
            let counts: serde_json::Map<String, serde_json::Value> = Kind::persisted()
                .iter()
                .map(|kind| (kind.as_str().to_owned(), json!(graph.count(*kind))))
                .collect();
            let dangling: Vec<serde_json::Value> = graph
                .dangling_references()
                .into_iter()
                .map(|reference| {
                    json!({
                        "from": format!("{} '{}'", reference.from_kind, reference.from_id),
                        "missing": format!("{} '{}'", reference.kind, reference.id),
                    })
                })
                .collect();
            if !dangling.is_empty() {
                warn!(count = dangling.len(), "store holds dangling references");
            }
            json!({
                "store": store.describe(),
                "counts": counts,
                "top_level_entities": graph.top_level_entities,
                "top_level_locations": graph.top_level_locations,
                "dangling": dangling,
            })
        }
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
