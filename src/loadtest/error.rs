//! Error types for the load testing pipeline.
//!
//! [`FloodError`] covers every failure that can stop a run: malformed node
//! descriptors and plans, external binary problems, remote dispatch failures
//! and persisted file incompatibilities. Response-level problems (malformed
//! payloads, JSON-RPC errors) are data, counted by the deep output analyzer,
//! and never surface here.

/// Result alias used throughout the load testing modules.
pub type Result<T, E = FloodError> = std::result::Result<T, E>;

/// Errors raised while building, running or persisting load tests.
#[derive(Debug, thiserror::Error)]
pub enum FloodError {
    /// The node descriptor does not match the shorthand grammar.
    #[error("Invalid node '{descriptor}': {reason}")]
    InvalidNodeFormat { descriptor: String, reason: String },

    /// The attack plan is inconsistent (no rates, mismatched lengths, too few calls).
    #[error("Invalid load test plan: {message}")]
    InvalidPlan { message: String },

    /// No test generator is registered under this name.
    #[error("Unknown test '{name}' (run `flood ls` to list available tests)")]
    UnknownTest { name: String },

    /// An external binary (vegeta, ssh, rsync) could not be found.
    #[error("Required binary '{binary}' not found on {location}")]
    ExternalBinaryMissing { binary: String, location: String },

    /// An external binary exited unsuccessfully.
    #[error("Command `{command}` failed ({status}): {stderr}")]
    ExternalBinaryFailure {
        command: String,
        status: String,
        stderr: String,
    },

    /// Local and remote installations disagree on versions.
    #[error("Version mismatch on remote '{remote}': local {local}, remote {remote_version}")]
    RemoteVersionMismatch {
        remote: String,
        local: String,
        remote_version: String,
    },

    /// Shipping the plan or fetching results from a remote host failed.
    #[error("Transfer with remote '{remote}' failed: {message}")]
    RemoteTransferFailure { remote: String, message: String },

    /// A remote job did not finish within its allotted time.
    #[error("Remote job '{key}' timed out after {seconds}s")]
    RemoteTimeout { key: String, seconds: u64 },

    /// The run was interrupted before this job finished.
    #[error("Run cancelled")]
    Cancelled,

    /// A persisted payload was written by another version of flood.
    #[error(
        "{path} was written by flood {found}, this is flood {expected} \
         (pass --allow-other-versions to load it anyway)"
    )]
    SchemaVersionMismatch {
        path: String,
        found: String,
        expected: String,
    },

    /// The engine produced a report or trace that could not be decoded.
    #[error("Failed to decode vegeta output: {message}")]
    ReportDecode { message: String },

    /// TOML parse failure in the configuration file.
    #[error("Failed to parse config TOML: {source}")]
    ConfigParse {
        #[from]
        source: toml::de::Error,
    },

    /// The configuration parsed but contains invalid values.
    #[error("Config validation error: {message}")]
    ConfigValidation { message: String },

    /// A single (node, test) job failed.
    #[error("Load test '{test}' on node '{node}' failed: {source}")]
    Job {
        node: String,
        test: String,
        #[source]
        source: Box<FloodError>,
    },

    /// One or more jobs of an aggregate run failed.
    #[error("{}", render_aggregate(.failed, .completed))]
    AggregateFailed {
        failed: Vec<FloodError>,
        completed: Vec<String>,
    },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FloodError {
    /// Wrap an error with the node and test it happened in.
    pub fn in_job(self, node: &str, test: &str) -> Self {
        match self {
            already @ Self::Job { .. } => already,
            other => Self::Job {
                node: node.to_string(),
                test: test.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub(crate) fn plan(message: impl Into<String>) -> Self {
        Self::InvalidPlan {
            message: message.into(),
        }
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::ReportDecode {
            message: message.into(),
        }
    }
}

fn render_aggregate(failed: &[FloodError], completed: &[String]) -> String {
    let mut out = format!("{} job(s) failed", failed.len());
    for error in failed {
        out.push_str(&format!("\n  - {error}"));
    }
    if completed.is_empty() {
        out.push_str("\nno job completed");
    } else {
        out.push_str(&format!("\ncompleted: {}", completed.join(", ")));
    }
    out
}
