//! ---
//! mooring_section: "03-persistence-logging"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Metrics collection and export utilities."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across crates.
pub type SharedRegistry = Arc<Registry>;

/// Registry whose every sample carries `cluster` and `node` labels, so
/// scrapes from both members of a pair can be told apart.
pub fn node_registry(cluster: &str, node: &str) -> Result<SharedRegistry> {
    let labels = HashMap::from([
        ("cluster".to_owned(), cluster.to_owned()),
        ("node".to_owned(), node.to_owned()),
    ]);
    let registry = Registry::new_custom(None, Some(labels))
        .with_context(|| format!("building metrics registry for node '{node}'"))?;
    Ok(Arc::new(registry))
}

/// Whether this node currently serves a rebound graph. Drives `/readyz`.
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Spawn an HTTP server exposing `registry` at `/metrics` and `readiness`
/// at `/readyz` (200 on the serving master, 503 otherwise).
///
/// Must be called from within a tokio runtime.
pub fn spawn_http_server(
    registry: SharedRegistry,
    readiness: Readiness,
    addr: SocketAddr,
) -> Result<MetricsServer> {
    let app = Router::new()
        .route(
            "/metrics",
            get(move || metrics_handler(Arc::clone(&registry))),
        )
        .route("/readyz", get(move || readiness_handler(readiness.clone())));

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {addr}"))?;
    std_listener
        .set_nonblocking(true)
        .context("failed to configure metrics listener as non-blocking")?;
    let bound = std_listener.local_addr().unwrap_or(addr);
    let listener = TcpListener::from_std(std_listener)
        .context("failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    match TextEncoder::new().encode_to_string(&registry.gather()) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error").into_response()
        }
    }
}

async fn readiness_handler(readiness: Readiness) -> impl IntoResponse {
    if readiness.is_ready() {
        (StatusCode::OK, "serving")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "standby")
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpStream;

    use prometheus::{IntCounter, Opts};

    use super::*;

    async fn get_path(addr: SocketAddr, path: &'static str) -> String {
        tokio::task::spawn_blocking(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            write!(stream, "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).unwrap();
            response
        })
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn readyz_follows_readiness_and_metrics_carry_node_labels() {
        let registry = node_registry("cluster-a", "node-b").unwrap();
        let passes = IntCounter::with_opts(Opts::new("mooring_test_passes_total", "passes")).unwrap();
        registry.register(Box::new(passes.clone())).unwrap();
        passes.inc();

        let readiness = Readiness::default();
        let server =
            spawn_http_server(registry, readiness.clone(), "127.0.0.1:0".parse().unwrap()).unwrap();

        assert!(get_path(server.addr(), "/readyz").await.starts_with("HTTP/1.1 503"));
        readiness.set(true);
        assert!(get_path(server.addr(), "/readyz").await.starts_with("HTTP/1.1 200"));

        let metrics = get_path(server.addr(), "/metrics").await;
        assert!(
            metrics.contains(r#"mooring_test_passes_total{cluster="cluster-a",node="node-b"} 1"#),
            "{metrics}"
        );
        server.shutdown().await.unwrap();
    }
}
