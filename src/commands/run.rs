//! `flood <test> [nodes...]`: generate (or reload) a load test and run it.

use anyhow::{Context, Result};
use clap::Args;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use flood::loadtest::config::FloodConfig;
use flood::loadtest::display::RunProgress;
use flood::loadtest::engine::{handle_ctrl_c, RunOptions, Scheduler};
use flood::loadtest::generators::{GeneratorRegistry, TestKind};
use flood::loadtest::node::{self, Node};
use flood::loadtest::payload::{self, PlanPayload, ResultsPayload, RunType, PLAN_FILENAME, SCHEMA_VERSION};
use flood::loadtest::plan::{self, LoadTest, LoadTestMode, TestParameters};
use flood::loadtest::process;
use flood::loadtest::remote::SshChannel;
use flood::loadtest::runner::{self, NodeSelection, TestSelection};
use flood::loadtest::summary::{render_summary, SummaryStyle};
use flood::loadtest::vegeta::VegetaBinary;

use super::GlobalOptions;

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Load test to run (see `flood ls`), or a run directory / test.json to rerun
    pub test: Option<String>,

    /// Nodes to test: `[name=]url`, `[name=]user@host:url`, or a config alias
    pub nodes: Vec<String>,

    /// Random seed for call generation (default: random)
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Hide progress and summary output
    #[arg(short, long)]
    pub quiet: bool,

    /// Request rates per second, comma separated (overrides --mode)
    #[arg(short, long, value_delimiter = ',')]
    pub rates: Option<Vec<u64>>,

    /// Duration of each rate in seconds (overrides --mode)
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// Rate schedule to use when --rates is not given
    #[arg(short, long, value_enum, default_value_t = LoadTestMode::Stress)]
    pub mode: LoadTestMode,

    /// Network the generated calls target (default from config)
    #[arg(short, long)]
    pub network: Option<String>,

    /// Directory for test.json and results.json (default: fresh temp dir)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write the plan and print what would run, without sending traffic
    #[arg(long)]
    pub dry: bool,

    /// Metrics to show in the summary, comma separated
    #[arg(long, value_delimiter = ',')]
    pub metrics: Vec<String>,

    /// Accepted for compatibility; figures are never rendered
    #[arg(long)]
    pub no_figures: bool,

    /// Keep the compressed raw vegeta output in results.json
    #[arg(long)]
    pub save_raw_output: bool,

    /// Classify every response and record per-category metrics
    #[arg(long)]
    pub deep_check: bool,

    /// Extra flags passed verbatim to `vegeta attack`
    #[arg(long, allow_hyphen_values = true)]
    pub extra_args: Option<String>,
}

/// Where the load test comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TestSource {
    /// A built-in test, generated fresh.
    Registry(TestKind),
    /// A saved plan, regenerated from its parameters.
    Saved(PathBuf),
}

fn test_source(test: &str) -> Result<TestSource> {
    let path = Path::new(test);
    if path.exists() {
        return Ok(TestSource::Saved(path.to_path_buf()));
    }
    let kind = test
        .parse::<TestKind>()
        .with_context(|| format!("'{test}' is neither a known test nor an existing path (see `flood ls`)"))?;
    Ok(TestSource::Registry(kind))
}

fn random_seed() -> u64 {
    rand::random()
}

fn parameters_from_args(args: &RunArgs, kind: TestKind, config: &FloodConfig) -> Result<TestParameters> {
    let (rates, durations) = plan::generate_timings(args.mode, args.rates.clone(), args.duration)?;
    let extra_args = vec![args.extra_args.clone(); rates.len()];
    Ok(TestParameters {
        flood_version: SCHEMA_VERSION.to_string(),
        test_name: kind.name().to_string(),
        random_seed: args.seed.unwrap_or_else(random_seed),
        rates,
        durations,
        extra_args,
        network: args
            .network
            .clone()
            .unwrap_or_else(|| config.generation.default_network.clone()),
        max_block: config.generation.max_block,
    })
}

/// Nodes recorded next to a saved plan, if any.
fn saved_nodes(plan_path: &Path) -> Result<Vec<Node>> {
    let dir = if plan_path.is_dir() {
        plan_path.to_path_buf()
    } else {
        plan_path.parent().map(Path::to_path_buf).unwrap_or_default()
    };
    let results_path = dir.join(payload::RESULTS_FILENAME);
    if !results_path.is_file() {
        anyhow::bail!(
            "No nodes given and no {} next to {} to take them from",
            payload::RESULTS_FILENAME,
            plan_path.display()
        );
    }
    let results = payload::load_results(&results_path, false)?;
    Ok(results
        .nodes
        .into_values()
        .map(|node| Node {
            client_version: None,
            ..node
        })
        .collect())
}

fn output_dir(args: &RunArgs) -> Result<PathBuf> {
    let dir = match &args.output {
        Some(dir) => dir.clone(),
        None => std::env::temp_dir().join(format!("flood__{}", uuid::Uuid::new_v4())),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create output directory '{}'", dir.display()))?;
    Ok(dir)
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

async fn vegeta_version(vegeta_path: &str) -> Option<String> {
    let stdout = process::run(vegeta_path, &["-version".to_string()], None).await.ok()?;
    let text = String::from_utf8_lossy(&stdout);
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Execute a load test run.
///
/// Steps: load config, build or reload the test, resolve nodes, write the
/// plan, run every node, write results, print the summary.
pub async fn execute(args: RunArgs, globals: GlobalOptions, color: bool) -> Result<()> {
    // Step 1: Config and test
    let config = globals.load_config()?;
    let registry = Arc::new(GeneratorRegistry::new());

    let test_arg = args
        .test
        .clone()
        .context("Missing <TEST>. Run `flood ls` to list the available tests.")?;
    let (test, mut nodes) = match test_source(&test_arg)? {
        TestSource::Registry(kind) => {
            let parameters = parameters_from_args(&args, kind, &config)?;
            let test = registry.generate_test(parameters)?;
            (test, Vec::new())
        },
        TestSource::Saved(path) => {
            let plan = payload::load_plan(&path, false)
                .with_context(|| format!("Failed to load plan from '{}'", path.display()))?;
            let test = plan.into_test(&registry)?;
            let nodes = if args.nodes.is_empty() {
                saved_nodes(&path)?
            } else {
                Vec::new()
            };
            (test, nodes)
        },
    };

    // Step 2: Nodes
    if nodes.is_empty() {
        if args.nodes.is_empty() {
            anyhow::bail!("No nodes given. Pass at least one node, e.g. `flood {test_arg} localhost:8545`.");
        }
        nodes = node::resolve_all(&args.nodes, &config.aliases)?;
    }
    node::request_metadata(&mut nodes, &config.remote.ssh_path).await;

    // Step 3: Plan file, written before any traffic
    let output = output_dir(&args)?;
    let plan_path = payload::save_plan(&output, &PlanPayload::from_test(&test, &registry))?;
    tracing::info!(path = %plan_path.display(), "plan written");

    if args.dry {
        println!("{}", render_dry_run(&test, &nodes, &output));
        return Ok(());
    }

    // Step 4: Run
    let cancel = CancellationToken::new();
    let ctrl_c = tokio::spawn(handle_ctrl_c(cancel.clone()));
    let options = RunOptions {
        deep_metrics: args.deep_check,
        save_raw_output: args.save_raw_output,
    };
    let scheduler = Scheduler::new(
        Arc::new(VegetaBinary::new(config.engine.vegeta_path.clone())),
        Arc::new(SshChannel::new(
            config.remote.ssh_path.clone(),
            config.remote.rsync_path.clone(),
        )),
    )
    .with_options(options)
    .with_remote_settings(config.remote.clone())
    .with_registry(Arc::clone(&registry))
    .with_progress(RunProgress::new(args.quiet, color))
    .with_cancellation(cancel);

    let node_map = nodes
        .iter()
        .map(|node| (node.name.clone(), node.clone()))
        .collect();
    let t_run_start = unix_now();
    let results = runner::run_all(
        &scheduler,
        NodeSelection::Multiple(node_map),
        TestSelection::Single(test),
    )
    .await;
    ctrl_c.abort();
    let results = results.context("Load test failed")?;
    let t_run_end = unix_now();

    // Step 5: Results
    let dependency_versions = BTreeMap::from([
        ("flood".to_string(), Some(SCHEMA_VERSION.to_string())),
        ("vegeta".to_string(), vegeta_version(&config.engine.vegeta_path).await),
    ]);
    let payload = ResultsPayload {
        schema_version: SCHEMA_VERSION.to_string(),
        dependency_versions,
        cli_args: std::env::args().collect(),
        run_type: RunType::SingleTest,
        t_run_start,
        t_run_end,
        nodes: nodes.into_iter().map(|node| (node.name.clone(), node)).collect(),
        results,
    };
    let results_path = payload::save_results(&output, &payload)?;

    if !args.quiet {
        let style = SummaryStyle::default()
            .with_color(color)
            .with_metrics(args.metrics.clone());
        println!("{}", render_summary(&payload, &style));
        eprintln!();
        eprintln!("Results written to: {}", results_path.display());
    }
    Ok(())
}

fn render_dry_run(test: &LoadTest, nodes: &[Node], output: &Path) -> String {
    let mut lines = vec![
        format!("test:     {}", test.name()),
        format!("seed:     {}", test.parameters.random_seed),
        format!("network:  {}", test.parameters.network),
        format!("duration: {}s", test.total_duration_secs()),
    ];
    for unit in &test.attacks {
        lines.push(format!(
            "  rate={}/s duration={}s calls={}",
            unit.rate,
            unit.duration,
            unit.calls.len()
        ));
    }
    for node in nodes {
        let location = node.remote.as_deref().unwrap_or("local");
        lines.push(format!("node:     {} {} ({location})", node.name, node.url));
    }
    lines.push(format!("plan:     {}", output.join(PLAN_FILENAME).display()));
    lines.join("\n")
}
