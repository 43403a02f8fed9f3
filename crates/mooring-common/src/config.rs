//! ---
//! mooring_section: "01-core-functionality"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Shared primitives and utilities for the control plane."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_node_id() -> String {
    "mooring-1".to_owned()
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_watchdog_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_persistence_directory() -> PathBuf {
    PathBuf::from("target/mementos")
}

fn default_persistence_period() -> Duration {
    Duration::from_millis(1000)
}

fn default_high_water() -> usize {
    1024
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_rebind_log() -> bool {
    true
}

fn default_metrics_enabled() -> bool {
    false
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9899))
}

/// Primary configuration object for the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub rebind: RebindConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "MOORING_CONFIG";

    /// Load configuration from disk, respecting the `MOORING_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.node.validate()?;
        self.persistence.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// High-availability identity of this control-plane node.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_id")]
    pub id: String,
    #[serde(default)]
    pub role: NodeRole,
    #[serde(default)]
    pub failover_order: u32,
    #[serde(default = "default_heartbeat_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub heartbeat_interval: Duration,
    #[serde(default = "default_watchdog_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub watchdog_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
            role: NodeRole::default(),
            failover_order: 0,
            heartbeat_interval: default_heartbeat_interval(),
            watchdog_timeout: default_watchdog_timeout(),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(anyhow!("node id must not be empty"));
        }
        if self.watchdog_timeout <= self.heartbeat_interval {
            return Err(anyhow!(
                "node '{}' watchdog timeout ({:?}) must exceed heartbeat interval ({:?})",
                self.id,
                self.watchdog_timeout,
                self.heartbeat_interval
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    #[default]
    Standby,
    Observer,
}

/// Serialization format used by the file-backed memento store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreFormat {
    #[default]
    Json,
    Cbor,
}

impl StoreFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            StoreFormat::Json => "json",
            StoreFormat::Cbor => "cbor",
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_persistence_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub format: StoreFormat,
    /// Debounce window applied to queued memento writes.
    #[serde(default = "default_persistence_period")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub period: Duration,
    /// Pending-op count that forces an immediate drain.
    #[serde(default = "default_high_water")]
    pub high_water: usize,
    #[serde(default)]
    pub read_only: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            directory: default_persistence_directory(),
            format: StoreFormat::default(),
            period: default_persistence_period(),
            high_water: default_high_water(),
            read_only: false,
        }
    }
}

impl PersistenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.high_water == 0 {
            return Err(anyhow!("persistence high_water must be at least 1"));
        }
        Ok(())
    }
}

/// How the rebind exception handler reacts to one failure category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    /// Abort the pass on the first failure.
    FailFast,
    /// Keep going, then fail the pass once every phase has run.
    FailAtEnd,
    /// Log and keep going.
    Continue,
}

fn fail_fast() -> FailureMode {
    FailureMode::FailFast
}

fn keep_going() -> FailureMode {
    FailureMode::Continue
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RebindConfig {
    /// Applies when a whole kind cannot be enumerated.
    #[serde(default = "fail_fast")]
    pub load_kind: FailureMode,
    /// Applies when a single memento cannot be read.
    #[serde(default = "keep_going")]
    pub load_memento: FailureMode,
    #[serde(default = "keep_going")]
    pub create: FailureMode,
    #[serde(default = "keep_going")]
    pub dangling_ref: FailureMode,
    #[serde(default = "keep_going")]
    pub rebind: FailureMode,
    #[serde(default = "keep_going")]
    pub manage: FailureMode,
}

impl Default for RebindConfig {
    fn default() -> Self {
        Self {
            load_kind: fail_fast(),
            load_memento: keep_going(),
            create: keep_going(),
            dangling_ref: keep_going(),
            rebind: keep_going(),
            manage: keep_going(),
        }
    }
}

impl RebindConfig {
    /// Every category set to the same mode; handy for strict test setups.
    pub fn uniform(mode: FailureMode) -> Self {
        Self {
            load_kind: mode,
            load_memento: mode,
            create: mode,
            dangling_ref: mode,
            rebind: mode,
            manage: mode,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Also write rebind and promotion events, with pass spans, to `<prefix>-rebind.log`.
    #[serde(default = "default_rebind_log")]
    pub rebind_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            rebind_file: default_rebind_log(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: AppConfig = r#"
            [node]
            id = "cp-a"
            role = "master"

            [persistence]
            directory = "/tmp/mementos"
            format = "cbor"
            period = 250
        "#
        .parse()
        .unwrap();

        assert_eq!(config.node.id, "cp-a");
        assert_eq!(config.node.role, NodeRole::Master);
        assert_eq!(config.persistence.format, StoreFormat::Cbor);
        assert_eq!(config.persistence.period, Duration::from_millis(250));
        assert_eq!(config.persistence.high_water, 1024);
        assert_eq!(config.rebind, RebindConfig::default());
    }

    #[test]
    fn rebind_failure_modes_parse_kebab_case() {
        let config: AppConfig = r#"
            [rebind]
            create = "fail-at-end"
            dangling_ref = "fail-fast"
        "#
        .parse()
        .unwrap();
        assert_eq!(config.rebind.create, FailureMode::FailAtEnd);
        assert_eq!(config.rebind.dangling_ref, FailureMode::FailFast);
        assert_eq!(config.rebind.load_kind, FailureMode::FailFast);
        assert_eq!(config.rebind.manage, FailureMode::Continue);
    }

    #[test]
    fn rejects_watchdog_shorter_than_heartbeat() {
        let err = r#"
            [node]
            heartbeat_interval = 1000
            watchdog_timeout = 500
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("watchdog timeout"));
    }

    #[test]
    fn load_uses_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mooring.toml");
        fs::write(&path, "[node]\nid = \"from-file\"\n").unwrap();
        let missing = dir.path().join("missing.toml");

        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).unwrap();
        assert_eq!(loaded.source, path);
        assert_eq!(loaded.config.node.id, "from-file");
    }
}
