//! ---
//! mooring_section: "15-testing-qa-runbook"
//! mooring_subsection: "integration-tests"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Integration and validation tests for the Mooring stack."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::time::Duration;

use mooring_common::{AppConfig, FailureMode, NodeRole, StoreFormat};
use mooring_persistence::WriterConfig;

fn read(path: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let full = Path::new(manifest_dir).join("..").join(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[test]
fn example_config_parses_and_validates() {
    let content = read("configs/mooring.toml");
    assert!(content.starts_with("# ---"), "example config must carry the frontmatter header");

    let config: AppConfig = content.parse().expect("example config parses");
    assert_eq!(config.node.role, NodeRole::Master);
    assert_eq!(config.persistence.format, StoreFormat::Json);
    assert_eq!(config.rebind.load_kind, FailureMode::FailFast);
    assert_eq!(config.rebind.create, FailureMode::Continue);
    assert!(config.logging.rebind_file);

    let writer = WriterConfig::from(&config.persistence);
    assert_eq!(writer.period, Duration::from_millis(1000));
    assert_eq!(writer.high_water, 1024);
}
