//! ---
//! mooring_section: "01-core-functionality"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Shared primitives and utilities for the control plane."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::{EnvFilter, LevelFilter, Targets};
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "MOORING_LOG";

/// Crates whose events make up the rebind log.
const REBIND_TARGETS: [&str; 2] = ["mooring_rebind", "mooring_redundancy"];

static GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

fn env_filter(fallback: &str) -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive '{directive}' ({err}); using {fallback}");
            EnvFilter::new(fallback)
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
    }
}

fn rolling(directory: &Path, file: String, guards: &mut Vec<WorkerGuard>) -> NonBlocking {
    let (writer, guard) = tracing_appender::non_blocking(daily(directory, file));
    guards.push(guard);
    writer
}

/// Initialize the tracing subscriber based on configuration and environment variables.
///
/// * `MOORING_LOG` overrides the log filter (e.g. `info`, `mooring_rebind=trace`).
///   When unset the standard `RUST_LOG` variable is honoured, finally defaulting to `info`.
/// * Stdout receives the configured format and `<prefix>.log` rolls daily as JSON.
/// * With `rebind_file` set, `<prefix>-rebind.log` holds only rebind and
///   promotion events at debug and above, plus a close record for every
///   `rebind_pass` span with its busy and idle time.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)
        .with_context(|| format!("creating log directory {}", config.directory.display()))?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);

    let mut guards = Vec::with_capacity(3);
    let file_writer = rolling(&config.directory, format!("{prefix}.log"), &mut guards);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };
    let mut layers = vec![
        stdout_layer.with_filter(env_filter("info")).boxed(),
        fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(file_writer)
            .with_filter(env_filter("info"))
            .boxed(),
    ];

    if config.rebind_file {
        let rebind_writer = rolling(&config.directory, format!("{prefix}-rebind.log"), &mut guards);
        let targets = REBIND_TARGETS
            .iter()
            .fold(Targets::new(), |targets, target| {
                targets.with_target(*target, LevelFilter::DEBUG)
            });
        layers.push(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_span_events(FmtSpan::CLOSE)
                .json()
                .with_current_span(true)
                .with_writer(rebind_writer)
                .with_filter(targets)
                .boxed(),
        );
    }

    let installed = tracing_subscriber::registry().with(layers).try_init().is_ok();
    if installed {
        let _ = GUARDS.set(guards);
    }

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        rebind_file = config.rebind_file,
        installed,
        "tracing initialised"
    );
    Ok(())
}

/// Install a plain stdout subscriber for tests and one-shot CLI commands.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer().with_filter(env_filter("warn")))
        .try_init();
}
