//! Local and remote job execution.
//!
//! [`Scheduler`] runs (node, test) jobs. Each job moves through
//! `Pending -> Running -> {Completed, Failed}`:
//! - Local jobs run on the calling task, one attack unit after another in
//!   plan order.
//! - Remote jobs are grouped by node. Each remote node gets one worker on a
//!   [`TaskTracker`] that runs its jobs in plan order, so a node never serves
//!   two load tests at once. Workers for different nodes run concurrently
//!   with each other and with the local jobs. Each remote job has a deadline
//!   of the test's total duration plus the configured grace period, counted
//!   from when it starts.
//!
//! Versions and binaries are checked for every involved host before the
//! first attack. A local failure cancels outstanding remote jobs through a
//! [`CancellationToken`]; their child processes are killed on drop.

use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::loadtest::config::RemoteSettings;
use crate::loadtest::deep;
use crate::loadtest::display::{JobProgress, RunProgress};
use crate::loadtest::error::{FloodError, Result};
use crate::loadtest::generators::GeneratorRegistry;
use crate::loadtest::node::Node;
use crate::loadtest::output::{LoadTestOutput, LoadTestOutputDatum, ResultSet};
use crate::loadtest::payload::{self, PlanPayload, RESULTS_FILENAME};
use crate::loadtest::plan::{AttackUnit, LoadTest};
use crate::loadtest::remote::{self, Installation, MirroredFlags, RemoteChannel};
use crate::loadtest::report;
use crate::loadtest::vegeta::AttackEngine;

/// Lifecycle of a (node, test) job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// What to record besides the engine's own report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Classify every response and compute per-category metrics.
    pub deep_metrics: bool,
    /// Keep the compressed raw trace of every unit.
    pub save_raw_output: bool,
}

impl RunOptions {
    fn mirrored(self) -> MirroredFlags {
        MirroredFlags {
            deep_check: self.deep_metrics,
            save_raw_output: self.save_raw_output,
        }
    }
}

/// One load test against one node, stored under `key` in the result set.
#[derive(Debug, Clone)]
pub struct Job {
    pub key: String,
    pub node: Node,
    pub test: Arc<LoadTest>,
}

type JobStates = Arc<Mutex<IndexMap<String, JobState>>>;

fn record_state(states: &JobStates, job: &Job, state: JobState) {
    tracing::info!(job = %job.key, node = %job.node.name, test = %job.test.name(), ?state, "job state");
    states
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(job.key.clone(), state);
}

/// Executes jobs against local and remote nodes.
pub struct Scheduler {
    engine: Arc<dyn AttackEngine>,
    channel: Arc<dyn RemoteChannel>,
    registry: Arc<GeneratorRegistry>,
    remote: RemoteSettings,
    options: RunOptions,
    progress: RunProgress,
    cancel: CancellationToken,
    states: JobStates,
}

type JobOutcome = (String, Result<LoadTestOutput>);

/// One remote node's jobs, run in order on a single task.
struct RemoteWorker {
    jobs: Vec<Job>,
    handle: JoinHandle<Vec<JobOutcome>>,
}

/// Everything a spawned remote job needs, owned.
struct RemoteJobContext {
    channel: Arc<dyn RemoteChannel>,
    registry: Arc<GeneratorRegistry>,
    settings: RemoteSettings,
    flags: MirroredFlags,
    progress: RunProgress,
    states: JobStates,
}

impl Scheduler {
    pub fn new(engine: Arc<dyn AttackEngine>, channel: Arc<dyn RemoteChannel>) -> Self {
        Self {
            engine,
            channel,
            registry: Arc::new(GeneratorRegistry::new()),
            remote: RemoteSettings::default(),
            options: RunOptions::default(),
            progress: RunProgress::hidden(),
            cancel: CancellationToken::new(),
            states: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_remote_settings(mut self, settings: RemoteSettings) -> Self {
        self.remote = settings;
        self
    }

    pub fn with_registry(mut self, registry: Arc<GeneratorRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_progress(mut self, progress: RunProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Use `cancel` (e.g. tied to Ctrl+C) to stop running jobs.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> RunOptions {
        self.options
    }

    /// Last known state of every job seen by this scheduler.
    pub fn job_states(&self) -> IndexMap<String, JobState> {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Check binaries and remote versions for every job. Sends no traffic.
    pub async fn preflight(&self, jobs: &[Job]) -> Result<()> {
        let local = Installation::local(self.engine.as_ref());
        if let Some(job) = jobs.iter().find(|job| !job.node.is_remote()) {
            if local.vegeta_path.is_none() {
                return Err(FloodError::ExternalBinaryMissing {
                    binary: "vegeta".to_string(),
                    location: "local host".to_string(),
                }
                .in_job(&job.node.name, job.test.name()));
            }
        }

        let mut checked = BTreeSet::new();
        for job in jobs {
            let Some(host) = job.node.remote.as_deref() else {
                continue;
            };
            if !checked.insert(host.to_string()) {
                continue;
            }
            remote::remote_installation(self.channel.as_ref(), host, &self.remote.remote_binary)
                .await
                .and_then(|installation| remote::check_installation(&local, host, &installation))
                .map_err(|e| e.in_job(&job.node.name, job.test.name()))?;
            tracing::debug!(remote = host, "remote installation matches");
        }
        Ok(())
    }

    /// Run every job and collect outputs keyed by job key, in job order.
    ///
    /// Any failed job fails the whole call; the error lists every failure
    /// and the keys that did complete.
    pub async fn run_jobs(&self, jobs: Vec<Job>) -> Result<ResultSet> {
        for job in &jobs {
            record_state(&self.states, job, JobState::Pending);
        }
        self.preflight(&jobs).await?;

        let order: Vec<String> = jobs.iter().map(|job| job.key.clone()).collect();
        let cancel = self.cancel.child_token();
        let tracker = TaskTracker::new();
        let (remote_jobs, local_jobs): (Vec<Job>, Vec<Job>) =
            jobs.into_iter().partition(|job| job.node.is_remote());
        let workers: Vec<RemoteWorker> = group_by_node(remote_jobs)
            .into_values()
            .map(|node_jobs| self.dispatch_remote(&tracker, &cancel, node_jobs))
            .collect();
        let mut outputs: IndexMap<String, LoadTestOutput> = IndexMap::new();
        let mut failed = Vec::new();

        for job in local_jobs {
            match self.run_local(&job, &cancel).await {
                Ok(output) => {
                    outputs.insert(job.key.clone(), output);
                },
                Err(error) => {
                    failed.push(error);
                    cancel.cancel();
                    break;
                },
            }
        }

        for worker in workers {
            for (key, result) in self.join_remote(worker).await {
                match result {
                    Ok(output) => {
                        outputs.insert(key, output);
                    },
                    Err(error) => failed.push(error),
                }
            }
        }
        tracker.close();
        tracker.wait().await;

        if !failed.is_empty() {
            if failed.len() == 1 && outputs.is_empty() {
                return Err(failed.remove(0));
            }
            return Err(FloodError::AggregateFailed {
                failed,
                completed: outputs.keys().cloned().collect(),
            });
        }

        let mut results = ResultSet::new();
        for key in order {
            if let Some(output) = outputs.shift_remove(&key) {
                results.insert(key, output);
            }
        }
        Ok(results)
    }

    /// Run a job against a local node on the calling task.
    pub async fn run_local(&self, job: &Job, cancel: &CancellationToken) -> Result<LoadTestOutput> {
        record_state(&self.states, job, JobState::Running);
        let progress = self.progress.local_job(&job.key, job.test.attacks.len());
        let result = self
            .attack_all(job, &progress, cancel)
            .await
            .map_err(|e| e.in_job(&job.node.name, job.test.name()));
        match &result {
            Ok(_) => {
                progress.complete();
                record_state(&self.states, job, JobState::Completed);
            },
            Err(error) => {
                progress.fail(&error.to_string());
                record_state(&self.states, job, JobState::Failed);
            },
        }
        result
    }

    async fn attack_all(
        &self,
        job: &Job,
        progress: &JobProgress,
        cancel: &CancellationToken,
    ) -> Result<LoadTestOutput> {
        let mut data = Vec::with_capacity(job.test.attacks.len());
        for unit in &job.test.attacks {
            progress.start_unit(unit);
            let datum = tokio::select! {
                datum = run_unit(self.engine.as_ref(), &job.node.url, unit, self.options) => datum?,
                _ = cancel.cancelled() => return Err(FloodError::Cancelled),
            };
            progress.finish_unit();
            data.push(datum);
        }
        Ok(LoadTestOutput::from_data(data))
    }

    fn dispatch_remote(
        &self,
        tracker: &TaskTracker,
        cancel: &CancellationToken,
        jobs: Vec<Job>,
    ) -> RemoteWorker {
        let ctx = RemoteJobContext {
            channel: Arc::clone(&self.channel),
            registry: Arc::clone(&self.registry),
            settings: self.remote.clone(),
            flags: self.options.mirrored(),
            progress: self.progress.clone(),
            states: Arc::clone(&self.states),
        };
        let cancel = cancel.clone();
        let task_jobs = jobs.clone();

        let handle = tracker.spawn(async move {
            let mut finished = Vec::with_capacity(task_jobs.len());
            for job in task_jobs {
                // Jobs not yet started stay pending.
                if cancel.is_cancelled() {
                    break;
                }
                let result = run_remote_in_turn(&ctx, &job, &cancel).await;
                finished.push((job.key, result));
            }
            finished
        });

        RemoteWorker { jobs, handle }
    }

    async fn join_remote(&self, worker: RemoteWorker) -> Vec<JobOutcome> {
        match worker.handle.await {
            Ok(finished) => finished,
            Err(join_error) => worker
                .jobs
                .iter()
                .map(|job| {
                    record_state(&self.states, job, JobState::Failed);
                    let error = FloodError::RemoteTransferFailure {
                        remote: job.node.remote.clone().unwrap_or_default(),
                        message: format!("worker task ended abnormally: {join_error}"),
                    };
                    (job.key.clone(), Err(error.in_job(&job.node.name, job.test.name())))
                })
                .collect(),
        }
    }
}

/// Group jobs by node name, keeping plan order within each node.
fn group_by_node(jobs: Vec<Job>) -> IndexMap<String, Vec<Job>> {
    let mut groups: IndexMap<String, Vec<Job>> = IndexMap::new();
    for job in jobs {
        groups.entry(job.node.name.clone()).or_default().push(job);
    }
    groups
}

/// Run one remote job under its deadline, tracking state and progress.
async fn run_remote_in_turn(
    ctx: &RemoteJobContext,
    job: &Job,
    cancel: &CancellationToken,
) -> Result<LoadTestOutput> {
    record_state(&ctx.states, job, JobState::Running);
    let progress = ctx
        .progress
        .remote_job(&job.key, job.node.remote.as_deref().unwrap_or_default());
    let timeout = Duration::from_secs(job.test.total_duration_secs()) + ctx.settings.grace();
    // Dropping the job future removes its temp dir and kills child processes.
    let result = tokio::select! {
        result = tokio::time::timeout(timeout, run_remote_job(ctx, job)) => {
            result.unwrap_or_else(|_| {
                Err(FloodError::RemoteTimeout {
                    key: job.key.clone(),
                    seconds: timeout.as_secs(),
                })
            })
        },
        _ = cancel.cancelled() => Err(FloodError::Cancelled),
    };
    let result = result.map_err(|e| e.in_job(&job.node.name, job.test.name()));
    match &result {
        Ok(_) => {
            progress.complete();
            record_state(&ctx.states, job, JobState::Completed);
        },
        Err(error) => {
            progress.fail(&error.to_string());
            record_state(&ctx.states, job, JobState::Failed);
        },
    }
    result
}

/// Cancel `cancel` on the first Ctrl+C; exit on the second.
pub async fn handle_ctrl_c(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not install Ctrl+C handler");
        return;
    }
    eprintln!("\nReceived Ctrl+C, stopping gracefully...");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("\nReceived second Ctrl+C, aborting immediately.");
        std::process::exit(130);
    }
}

/// Attack, decode and optionally analyze one unit.
pub async fn run_unit(
    engine: &dyn AttackEngine,
    url: &str,
    unit: &AttackUnit,
    options: RunOptions,
) -> Result<LoadTestOutputDatum> {
    let raw = engine.attack(url, unit).await?;
    let metrics = report::decode(engine, &raw, unit.rate, unit.duration).await?;
    let mut datum = LoadTestOutputDatum::new(metrics);
    if options.deep_metrics {
        let analysis = deep::analyze(engine, &raw, &unit.calls, unit.rate, unit.duration).await?;
        datum.deep_metrics = Some(analysis.metrics);
        datum.deep_rpc_error_pairs = Some(analysis.error_pairs);
    }
    if options.save_raw_output {
        datum.deep_raw_output = Some(report::encode_raw_output(&raw)?);
    }
    Ok(datum)
}

async fn run_remote_job(ctx: &RemoteJobContext, job: &Job) -> Result<LoadTestOutput> {
    let host = job
        .node
        .remote
        .as_deref()
        .ok_or_else(|| FloodError::InvalidNodeFormat {
            descriptor: job.node.name.clone(),
            reason: "node has no remote host".to_string(),
        })?;
    let dir_name = format!("flood__{}", uuid::Uuid::new_v4());
    // Removed on drop, including when the job is dropped at its deadline.
    let local_dir = tempfile::Builder::new()
        .prefix(&dir_name)
        .rand_bytes(0)
        .tempdir()
        .map_err(|e| FloodError::io(std::env::temp_dir().join(&dir_name), e))?;
    let remote_dir = format!("{}/{}", ctx.settings.tmp_root.trim_end_matches('/'), dir_name);

    exchange_with_remote(ctx, job, host, local_dir.path(), &remote_dir).await
}

async fn exchange_with_remote(
    ctx: &RemoteJobContext,
    job: &Job,
    host: &str,
    local_dir: &Path,
    remote_dir: &str,
) -> Result<LoadTestOutput> {
    payload::save_plan(local_dir, &PlanPayload::from_test(&job.test, &ctx.registry))?;
    ctx.channel
        .sync_dir(host, local_dir, &ctx.settings.tmp_root)
        .await?;
    tracing::info!(remote = host, dir = remote_dir, "plan shipped");

    let script = remote::remote_run_script(&ctx.settings.remote_binary, remote_dir, &job.node, ctx.flags);
    ctx.channel.exec(host, &script).await?;

    let local_results = local_dir.join(RESULTS_FILENAME);
    ctx.channel
        .fetch(host, &format!("{remote_dir}/{RESULTS_FILENAME}"), &local_results)
        .await?;
    let mut results = payload::load_results(&local_results, false)?;
    results
        .results
        .shift_remove(&job.node.name)
        .ok_or_else(|| FloodError::RemoteTransferFailure {
            remote: host.to_string(),
            message: format!("results.json has no entry for node '{}'", job.node.name),
        })
}
