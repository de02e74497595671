use std::io::Write;

use nodeflow_core::config::{EngineConfig, LoopFailurePolicy};
use nodeflow_core::error::NodeflowError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
max_dispatches = 250
node_timeout_secs = 12

[loop]
max_iterations_cap = 20
timeout_secs = 5
failure_policy = "continue"

[parallel]
max_branches = 3

[log]
enabled = true
log_dir = "/tmp/nodeflow-test-logs"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = EngineConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_dispatches, 250);
    assert_eq!(config.engine.node_timeout_secs, 12);
    assert_eq!(config.loops.max_iterations_cap, 20);
    assert_eq!(config.loops.timeout_secs, 5);
    assert_eq!(config.loops.failure_policy, LoopFailurePolicy::Continue);
    assert_eq!(config.parallel.max_branches, 3);
    assert!(config.log.enabled);
    assert_eq!(
        config.log_dir(),
        std::path::PathBuf::from("/tmp/nodeflow-test-logs")
    );
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("NODEFLOW_TEST_LOG_DIR", "/tmp/expanded-logs");

    let toml_content = r#"
[log]
enabled = true
log_dir = "${NODEFLOW_TEST_LOG_DIR}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = EngineConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.log.log_dir, "/tmp/expanded-logs");

    std::env::remove_var("NODEFLOW_TEST_LOG_DIR");
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("absent.toml");

    assert!(matches!(
        EngineConfig::load(&path),
        Err(NodeflowError::ConfigNotFound(_))
    ));

    let config = EngineConfig::load_or_default(&path).expect("defaults");
    assert_eq!(config.engine.max_dispatches, 1000);
    assert_eq!(config.loops.failure_policy, LoopFailurePolicy::Halt);
}

#[test]
fn test_invalid_toml_is_config_error() {
    let tmp = nodeflow_test_utils::config_file("[engine\nmax_dispatches = ");
    let err = EngineConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, NodeflowError::Config(_)));
}
