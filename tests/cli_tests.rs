//! End-to-end tests of the `flood` binary.
//!
//! Nothing here sends load: runs use `--dry`, which writes the plan and
//! stops before the first attack.

use assert_cmd::Command;
use predicates::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;

use flood::loadtest::generators::GeneratorRegistry;
use flood::loadtest::output::{LoadTestOutput, LoadTestOutputDatum, MetricsDatum, ResultSet};
use flood::loadtest::payload::{self, ResultsPayload, RunType, PLAN_FILENAME, SCHEMA_VERSION};

/// `flood` isolated from any user or project config.
fn flood(config_dir: &Path) -> Command {
    flood_with_config(config_dir, "")
}

fn flood_with_config(config_dir: &Path, config_toml: &str) -> Command {
    let config = config_dir.join("config.toml");
    std::fs::write(&config, config_toml).unwrap();
    let mut cmd = Command::cargo_bin("flood").unwrap();
    cmd.current_dir(config_dir)
        .env("FLOOD_CONFIG", &config)
        .env("FLOOD_VEGETA", config_dir.join("no-vegeta-here"))
        .env_remove("RUST_LOG");
    cmd
}

fn write_results(dir: &Path, schema_version: &str) {
    let mut datum = MetricsDatum::empty(4, 30);
    datum.requests = 120;
    datum.success = Some(1.0);
    datum.throughput = Some(4.0);
    datum.p90 = Some(0.004);
    let mut results = ResultSet::new();
    results.insert(
        "node1".to_string(),
        LoadTestOutput::from_data(vec![LoadTestOutputDatum::new(datum)]),
    );
    let payload = ResultsPayload {
        schema_version: schema_version.to_string(),
        dependency_versions: BTreeMap::new(),
        cli_args: vec!["flood".to_string()],
        run_type: RunType::SingleTest,
        t_run_start: 0.0,
        t_run_end: 30.0,
        nodes: Default::default(),
        results,
    };
    payload::save_results(dir, &payload).unwrap();
}

#[test]
fn test_ls_lists_builtin_tests() {
    let dir = tempfile::tempdir().unwrap();
    flood(dir.path())
        .arg("ls")
        .assert()
        .success()
        .stdout(predicate::str::contains("eth_getBalance"))
        .stdout(predicate::str::contains("eth_blockNumber"));
}

#[test]
fn test_version_json_reports_missing_vegeta() {
    let dir = tempfile::tempdir().unwrap();
    let output = flood(dir.path())
        .args(["version", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let installation: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(installation["flood_version"], env!("CARGO_PKG_VERSION"));
    assert!(installation["vegeta_path"].is_null());
}

#[test]
fn test_unknown_test_fails() {
    let dir = tempfile::tempdir().unwrap();
    flood(dir.path())
        .args(["eth_nothing", "node1=localhost:1", "--dry"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("eth_nothing"));
}

#[test]
fn test_invalid_node_fails() {
    let dir = tempfile::tempdir().unwrap();
    flood(dir.path())
        .args(["eth_chainId", "node1=", "--dry"])
        .assert()
        .failure();
}

#[test]
fn test_dry_run_writes_plan() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("run");
    flood(dir.path())
        .args(["eth_chainId", "node1=localhost:1", "--dry", "-r", "1,2", "-d", "1", "-s", "7", "-o"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("eth_chainId"))
        .stdout(predicate::str::contains("rate=2/s duration=1s calls=2"));

    let plan = payload::load_plan(&out, false).unwrap();
    assert_eq!(plan.name, "eth_chainId");
    assert_eq!(plan.test_parameters.random_seed, 7);
    assert_eq!(plan.test_parameters.rates, vec![1, 2]);
    assert!(!out.join(payload::RESULTS_FILENAME).exists());
}

#[test]
fn test_rerun_from_plan_keeps_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first");
    let second = dir.path().join("second");
    flood(dir.path())
        .args(["eth_getBalance", "localhost:1", "--dry", "-r", "3", "-d", "2", "-o"])
        .arg(&first)
        .assert()
        .success();
    flood(dir.path())
        .arg(first.join(PLAN_FILENAME))
        .args(["localhost:1", "--dry", "-o"])
        .arg(&second)
        .assert()
        .success();

    let original = payload::load_plan(&first, false).unwrap();
    let rerun = payload::load_plan(&second, false).unwrap();
    assert_eq!(rerun, original);
}

#[test]
fn test_rerun_under_other_config_regenerates_same_calls() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first");
    let second = dir.path().join("second");
    flood_with_config(dir.path(), "[generation]\nmax_block = 17000000\n")
        .args(["eth_getBalance", "localhost:1", "--dry", "-r", "2", "-d", "2", "-s", "42", "-o"])
        .arg(&first)
        .assert()
        .success();
    flood_with_config(dir.path(), "[generation]\nmax_block = 1000\n")
        .arg(first.join(PLAN_FILENAME))
        .args(["localhost:1", "--dry", "-o"])
        .arg(&second)
        .assert()
        .success();

    let registry = GeneratorRegistry::new();
    let original = payload::load_plan(&first, false).unwrap();
    let rerun = payload::load_plan(&second, false).unwrap();
    assert_eq!(rerun.test_parameters.max_block, 17_000_000);
    assert_eq!(
        rerun.into_test(&registry).unwrap().attacks,
        original.into_test(&registry).unwrap().attacks
    );
}

#[test]
fn test_rerun_without_nodes_needs_results() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first");
    flood(dir.path())
        .args(["eth_chainId", "localhost:1", "--dry", "-r", "1", "-d", "1", "-o"])
        .arg(&first)
        .assert()
        .success();
    flood(dir.path())
        .arg(&first)
        .arg("--dry")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No nodes given"));
}

#[test]
fn test_print_renders_saved_results() {
    let dir = tempfile::tempdir().unwrap();
    write_results(dir.path(), SCHEMA_VERSION);
    flood(dir.path())
        .arg("print")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("success"))
        .stdout(predicate::str::contains("100.0%"))
        .stdout(predicate::str::contains("4.0ms"));
}

#[test]
fn test_print_checks_schema_version() {
    let dir = tempfile::tempdir().unwrap();
    write_results(dir.path(), "0.0.1");
    flood(dir.path())
        .arg("print")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--allow-other-versions"));
    flood(dir.path())
        .arg("print")
        .arg(dir.path())
        .arg("--allow-other-versions")
        .assert()
        .success();
}
