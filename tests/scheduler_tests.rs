//! Scheduler tests against in-memory engine and remote channel fakes.
//!
//! The fakes stand in for the `vegeta` binary and the ssh/rsync transport so
//! whole runs (local and remote) execute without any external process.

use async_trait::async_trait;
use base64::Engine as _;
use indexmap::IndexMap;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flood::loadtest::config::RemoteSettings;
use flood::loadtest::engine::{JobState, RunOptions, Scheduler};
use flood::loadtest::error::{FloodError, Result};
use flood::loadtest::node::Node;
use flood::loadtest::output::{
    LoadTestOutput, LoadTestOutputDatum, MetricsDatum, ResponseCategory, ResultSet,
};
use flood::loadtest::payload::{self, PlanPayload, ResultsPayload, RunType, SCHEMA_VERSION};
use flood::loadtest::plan::{AttackUnit, LoadTest};
use flood::loadtest::remote::RemoteChannel;
use flood::loadtest::runner::{run_all, NodeSelection, TestSelection};
use flood::loadtest::vegeta::{AttackEngine, RawAttackReport};

/// Engine that answers every attack with a synthetic trace.
struct FakeEngine {
    attacks: AtomicUsize,
    installed: bool,
}

impl FakeEngine {
    fn new() -> Self {
        Self {
            attacks: AtomicUsize::new(0),
            installed: true,
        }
    }

    fn attack_count(&self) -> usize {
        self.attacks.load(Ordering::SeqCst)
    }
}

fn b64(body: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(body)
}

#[async_trait]
impl AttackEngine for FakeEngine {
    async fn attack(&self, url: &str, unit: &AttackUnit) -> Result<RawAttackReport> {
        self.attacks.fetch_add(1, Ordering::SeqCst);
        if url.contains("unreachable") {
            return Err(FloodError::ExternalBinaryFailure {
                command: format!("vegeta attack -rate {}/1s", unit.rate),
                status: "exit status: 1".to_string(),
                stderr: "connection refused".to_string(),
            });
        }
        let trace = json!({"url": url, "rate": unit.rate, "duration": unit.duration});
        Ok(serde_json::to_vec(&trace)?)
    }

    async fn report(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let trace: serde_json::Value = serde_json::from_slice(raw)?;
        let rate = trace["rate"].as_u64().unwrap_or(0);
        let duration = trace["duration"].as_u64().unwrap_or(0);
        let requests = rate * duration;
        let report = json!({
            "latencies": {
                "mean": 2_000_000, "50th": 1_900_000, "90th": 3_000_000,
                "95th": 3_500_000, "99th": 5_000_000, "max": 9_000_000, "min": 1_000_000
            },
            "earliest": "2024-01-01T00:00:00Z",
            "latest": "2024-01-01T00:00:01Z",
            "end": "2024-01-01T00:00:01.002Z",
            "duration": duration * 1_000_000_000,
            "wait": 2_000_000,
            "requests": requests,
            "rate": rate as f64,
            "throughput": rate as f64,
            "success": 1.0,
            "status_codes": {"200": requests},
            "errors": []
        });
        Ok(serde_json::to_vec(&report)?)
    }

    async fn encode_csv(&self, _raw: &[u8]) -> Result<Vec<u8>> {
        let ok = b64(r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#);
        let rpc_error = b64(r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32000}}"#);
        let csv = format!(
            "1700000000000000000,200,1000000,60,40,,{ok},,0,POST,http://node,\n\
             1700000000500000000,200,1000000,60,48,,{rpc_error},,1,POST,http://node,\n"
        );
        Ok(csv.into_bytes())
    }

    fn locate(&self) -> Option<PathBuf> {
        self.installed.then(|| PathBuf::from("/usr/bin/vegeta"))
    }
}

/// Load test runs in flight, per remote host and overall.
#[derive(Default)]
struct Concurrency {
    running: HashMap<String, usize>,
    peak_per_remote: HashMap<String, usize>,
    total: usize,
    peak_total: usize,
}

impl Concurrency {
    fn enter(&mut self, remote: &str) {
        let running = self.running.entry(remote.to_string()).or_default();
        *running += 1;
        let peak = self.peak_per_remote.entry(remote.to_string()).or_default();
        *peak = (*peak).max(*running);
        self.total += 1;
        self.peak_total = self.peak_total.max(self.total);
    }

    fn leave(&mut self, remote: &str) {
        if let Some(running) = self.running.get_mut(remote) {
            *running -= 1;
        }
        self.total -= 1;
    }
}

/// Remote channel that plays the remote flood installation.
///
/// Remote hosts are named `<node>-box`; fetched results are keyed by that
/// node name.
struct FakeChannel {
    flood_version: String,
    run_delay: Option<Duration>,
    scripts: Mutex<Vec<String>>,
    shipped_plans: Mutex<Vec<PlanPayload>>,
    /// (remote, test name) per shipped plan, in shipping order.
    synced: Mutex<Vec<(String, String)>>,
    concurrency: Mutex<Concurrency>,
}

impl FakeChannel {
    fn new() -> Self {
        Self {
            flood_version: SCHEMA_VERSION.to_string(),
            run_delay: None,
            scripts: Mutex::new(Vec::new()),
            shipped_plans: Mutex::new(Vec::new()),
            synced: Mutex::new(Vec::new()),
            concurrency: Mutex::new(Concurrency::default()),
        }
    }

    fn with_version(mut self, version: &str) -> Self {
        self.flood_version = version.to_string();
        self
    }

    fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = Some(delay);
        self
    }

    fn run_scripts(&self) -> Vec<String> {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .filter(|script| !script.contains("version --json"))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RemoteChannel for FakeChannel {
    async fn sync_dir(&self, remote: &str, local_dir: &Path, _remote_parent: &str) -> Result<()> {
        let plan = payload::load_plan(local_dir, false)?;
        self.synced
            .lock()
            .unwrap()
            .push((remote.to_string(), plan.name.clone()));
        self.shipped_plans.lock().unwrap().push(plan);
        Ok(())
    }

    async fn exec(&self, remote: &str, script: &str) -> Result<Vec<u8>> {
        self.scripts.lock().unwrap().push(script.to_string());
        if script.contains("version --json") {
            let installation = json!({
                "flood_version": self.flood_version,
                "vegeta_path": "/usr/local/bin/vegeta"
            });
            return Ok(serde_json::to_vec(&installation)?);
        }
        self.concurrency.lock().unwrap().enter(remote);
        if let Some(delay) = self.run_delay {
            tokio::time::sleep(delay).await;
        }
        self.concurrency.lock().unwrap().leave(remote);
        Ok(Vec::new())
    }

    async fn fetch(&self, remote: &str, remote_path: &str, local_path: &Path) -> Result<()> {
        assert!(remote_path.starts_with("/tmp/flood__"));
        assert!(remote_path.ends_with("/results.json"));
        let node_name = remote.trim_end_matches("-box").to_string();
        let mut datum = MetricsDatum::empty(1, 1);
        datum.requests = 42;
        let mut results = ResultSet::new();
        results.insert(
            node_name,
            LoadTestOutput::from_data(vec![LoadTestOutputDatum::new(datum)]),
        );
        let payload = ResultsPayload {
            schema_version: SCHEMA_VERSION.to_string(),
            dependency_versions: Default::default(),
            cli_args: vec![],
            run_type: RunType::SingleTest,
            t_run_start: 0.0,
            t_run_end: 1.0,
            nodes: IndexMap::new(),
            results,
        };
        let dir = local_path.parent().unwrap();
        payload::save_results(dir, &payload)?;
        Ok(())
    }
}

fn local_node(name: &str) -> Node {
    Node {
        name: name.to_string(),
        url: format!("http://{name}:8545"),
        remote: None,
        client_version: None,
    }
}

fn remote_node(name: &str) -> Node {
    Node {
        name: name.to_string(),
        url: "http://localhost:8545".to_string(),
        remote: Some(format!("{name}-box")),
        client_version: None,
    }
}

fn small_test(name: &str) -> LoadTest {
    let units = [1u64, 2]
        .iter()
        .map(|rate| AttackUnit {
            rate: *rate,
            duration: 1,
            calls: vec![json!({"jsonrpc": "2.0", "id": 1, "method": name}); *rate as usize],
            extra_args: None,
        })
        .collect();
    LoadTest::from_attacks(name, "ethereum", units)
}

fn nodes(list: Vec<Node>) -> NodeSelection {
    NodeSelection::Multiple(list.into_iter().map(|n| (n.name.clone(), n)).collect())
}

fn scheduler(engine: &Arc<FakeEngine>, channel: &Arc<FakeChannel>) -> Scheduler {
    Scheduler::new(
        Arc::clone(engine) as Arc<dyn AttackEngine>,
        Arc::clone(channel) as Arc<dyn RemoteChannel>,
    )
}

#[tokio::test]
async fn test_two_nodes_two_tests_produce_four_entries() {
    let engine = Arc::new(FakeEngine::new());
    let channel = Arc::new(FakeChannel::new());
    let scheduler = scheduler(&engine, &channel);

    let tests = IndexMap::from([
        ("t1".to_string(), small_test("t1")),
        ("t2".to_string(), small_test("t2")),
    ]);
    let results = run_all(
        &scheduler,
        nodes(vec![local_node("a"), local_node("b")]),
        TestSelection::Multiple(tests),
    )
    .await
    .unwrap();

    let keys: Vec<&str> = results.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["a__t1", "a__t2", "b__t1", "b__t2"]);
    for output in results.values() {
        assert_eq!(output.metrics.target_rate, vec![1, 2]);
        assert_eq!(output.metrics.requests, vec![1, 2]);
        assert_eq!(output.metrics.min, vec![Some(0.001), Some(0.001)]);
        assert!(output.deep_metrics.is_none());
        assert!(output.deep_raw_output.is_none());
    }
    assert_eq!(engine.attack_count(), 8);
    assert!(scheduler
        .job_states()
        .values()
        .all(|state| *state == JobState::Completed));
}

#[tokio::test]
async fn test_version_mismatch_fails_before_any_attack() {
    let engine = Arc::new(FakeEngine::new());
    let channel = Arc::new(FakeChannel::new().with_version("0.0.1"));
    let scheduler = scheduler(&engine, &channel);

    let result = run_all(
        &scheduler,
        nodes(vec![local_node("a"), remote_node("r")]),
        TestSelection::Single(small_test("t1")),
    )
    .await;

    match result {
        Err(FloodError::Job { node, source, .. }) => {
            assert_eq!(node, "r");
            assert!(matches!(*source, FloodError::RemoteVersionMismatch { .. }));
        },
        other => panic!("Expected a version mismatch, got {:?}", other),
    }
    assert_eq!(engine.attack_count(), 0);
    assert!(channel.run_scripts().is_empty());
    assert!(scheduler
        .job_states()
        .values()
        .all(|state| *state == JobState::Pending));
}

#[tokio::test]
async fn test_missing_local_engine_fails_before_any_attack() {
    let engine = Arc::new(FakeEngine {
        attacks: AtomicUsize::new(0),
        installed: false,
    });
    let channel = Arc::new(FakeChannel::new());
    let scheduler = scheduler(&engine, &channel);

    let result = run_all(
        &scheduler,
        NodeSelection::Single(local_node("a")),
        TestSelection::Single(small_test("t1")),
    )
    .await;

    match result {
        Err(FloodError::Job { source, .. }) => {
            assert!(matches!(*source, FloodError::ExternalBinaryMissing { .. }));
        },
        other => panic!("Expected ExternalBinaryMissing, got {:?}", other),
    }
    assert_eq!(engine.attack_count(), 0);
}

#[tokio::test]
async fn test_remote_job_ships_plan_and_returns_remote_results() {
    let engine = Arc::new(FakeEngine::new());
    let channel = Arc::new(FakeChannel::new());
    let scheduler = scheduler(&engine, &channel).with_options(RunOptions {
        deep_metrics: true,
        save_raw_output: false,
    });

    let results = run_all(
        &scheduler,
        NodeSelection::Single(remote_node("r")),
        TestSelection::Single(small_test("custom")),
    )
    .await
    .unwrap();

    assert_eq!(results["r"].metrics.requests, vec![42]);
    assert_eq!(engine.attack_count(), 0);

    let plans = channel.shipped_plans.lock().unwrap().clone();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].name, "custom");
    assert_eq!(plans[0].attacks.as_ref().map(Vec::len), Some(2));

    let scripts = channel.run_scripts();
    assert_eq!(scripts.len(), 1);
    assert!(scripts[0].starts_with("source ~/.profile\nflood /tmp/flood__"));
    assert!(scripts[0].contains(" r=http://localhost:8545 "));
    assert!(scripts[0].contains("--no-figures"));
    assert!(scripts[0].contains("--deep-check"));
    assert!(!scripts[0].contains("--save-raw-output"));
    assert_eq!(scheduler.job_states()["r"], JobState::Completed);
}

#[tokio::test]
async fn test_remote_node_runs_one_test_at_a_time() {
    let engine = Arc::new(FakeEngine::new());
    let channel = Arc::new(FakeChannel::new().with_run_delay(Duration::from_millis(200)));
    let scheduler = scheduler(&engine, &channel);

    let tests = IndexMap::from([
        ("t1".to_string(), small_test("t1")),
        ("t2".to_string(), small_test("t2")),
        ("t3".to_string(), small_test("t3")),
    ]);
    let results = run_all(
        &scheduler,
        nodes(vec![remote_node("r1"), remote_node("r2")]),
        TestSelection::Multiple(tests),
    )
    .await
    .unwrap();

    let keys: Vec<&str> = results.keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec!["r1__t1", "r1__t2", "r1__t3", "r2__t1", "r2__t2", "r2__t3"]
    );

    let concurrency = channel.concurrency.lock().unwrap();
    assert_eq!(concurrency.peak_per_remote["r1-box"], 1);
    assert_eq!(concurrency.peak_per_remote["r2-box"], 1);
    // separate nodes still overlap
    assert_eq!(concurrency.peak_total, 2);
    drop(concurrency);

    let synced = channel.synced.lock().unwrap();
    for remote in ["r1-box", "r2-box"] {
        let order: Vec<&str> = synced
            .iter()
            .filter(|(host, _)| host == remote)
            .map(|(_, test)| test.as_str())
            .collect();
        assert_eq!(order, vec!["t1", "t2", "t3"]);
    }
}

#[tokio::test]
async fn test_local_failure_lists_failed_and_completed_jobs() {
    let engine = Arc::new(FakeEngine::new());
    let channel = Arc::new(FakeChannel::new());
    let scheduler = scheduler(&engine, &channel);

    let result = run_all(
        &scheduler,
        nodes(vec![local_node("a"), local_node("unreachable")]),
        TestSelection::Single(small_test("t1")),
    )
    .await;

    match result {
        Err(FloodError::AggregateFailed { failed, completed }) => {
            assert_eq!(completed, vec!["a".to_string()]);
            assert_eq!(failed.len(), 1);
            match &failed[0] {
                FloodError::Job { node, source, .. } => {
                    assert_eq!(node, "unreachable");
                    assert!(matches!(**source, FloodError::ExternalBinaryFailure { .. }));
                },
                other => panic!("Expected a job error, got {:?}", other),
            }
        },
        other => panic!("Expected AggregateFailed, got {:?}", other),
    }
    // the failing node stops at its first unit
    assert_eq!(engine.attack_count(), 3);
    let states = scheduler.job_states();
    assert_eq!(states["a"], JobState::Completed);
    assert_eq!(states["unreachable"], JobState::Failed);
}

#[tokio::test]
async fn test_slow_remote_job_times_out() {
    let engine = Arc::new(FakeEngine::new());
    let channel = Arc::new(FakeChannel::new().with_run_delay(Duration::from_secs(60)));
    let scheduler = scheduler(&engine, &channel).with_remote_settings(RemoteSettings {
        grace_secs: 1,
        ..RemoteSettings::default()
    });

    let test = LoadTest::from_attacks(
        "t1",
        "ethereum",
        vec![AttackUnit {
            rate: 1,
            duration: 1,
            calls: vec![json!({"id": 1})],
            extra_args: None,
        }],
    );
    let result = run_all(
        &scheduler,
        NodeSelection::Single(remote_node("r")),
        TestSelection::Single(test),
    )
    .await;

    match result {
        Err(FloodError::Job { source, .. }) => match *source {
            FloodError::RemoteTimeout { key, seconds } => {
                assert_eq!(key, "r");
                assert_eq!(seconds, 2);
            },
            other => panic!("Expected RemoteTimeout, got {:?}", other),
        },
        other => panic!("Expected a job error, got {:?}", other),
    }
    assert_eq!(scheduler.job_states()["r"], JobState::Failed);
}

#[tokio::test]
async fn test_deep_and_raw_outputs_are_recorded() {
    let engine = Arc::new(FakeEngine::new());
    let channel = Arc::new(FakeChannel::new());
    let scheduler = scheduler(&engine, &channel).with_options(RunOptions {
        deep_metrics: true,
        save_raw_output: true,
    });

    let results = run_all(
        &scheduler,
        NodeSelection::Single(local_node("a")),
        TestSelection::Single(small_test("t1")),
    )
    .await
    .unwrap();

    let output = &results["a"];
    let deep = output.deep_metrics.as_ref().unwrap();
    assert_eq!(deep[&ResponseCategory::All].metrics.requests, vec![2, 2]);
    assert_eq!(deep[&ResponseCategory::Successful].metrics.requests, vec![1, 1]);
    assert_eq!(deep[&ResponseCategory::Failed].n_rpc_errors, vec![1, 1]);

    let pairs = output.deep_rpc_error_pairs.as_ref().unwrap();
    let first_unit = pairs[0].as_ref().unwrap();
    assert_eq!(first_unit.len(), 1);
    // seq 1 wraps around the single call of the first unit
    assert_eq!(first_unit[0].request.as_ref().unwrap()["method"], "t1");

    let raw = output.deep_raw_output.as_ref().unwrap();
    let decoded = flood::loadtest::report::decode_raw_output(raw[0].as_ref().unwrap()).unwrap();
    let trace: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
    assert_eq!(trace["rate"], 1);
}
