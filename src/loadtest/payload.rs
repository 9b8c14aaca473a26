//! Persisted run files.
//!
//! Two JSON documents describe a run:
//! - `test.json`, the plan, written before any traffic is sent. It holds the
//!   generation parameters, enough to regenerate every call.
//! - `results.json`, written after the run, holding every node's output.
//!
//! Both carry `schema_version`, the flood version that wrote them. Loading a
//! file from another version is refused unless explicitly allowed.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::loadtest::error::{FloodError, Result};
use crate::loadtest::generators::GeneratorRegistry;
use crate::loadtest::node::Node;
use crate::loadtest::output::ResultSet;
use crate::loadtest::plan::{AttackUnit, LoadTest, TestParameters};

pub const PLAN_FILENAME: &str = "test.json";
pub const RESULTS_FILENAME: &str = "results.json";

/// Schema version written by this build.
pub const SCHEMA_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    SingleTest,
}

/// Contents of `test.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanPayload {
    pub schema_version: String,
    pub run_type: RunType,
    pub name: String,
    pub test_parameters: TestParameters,
    /// Explicit attacks, only for tests no registered generator can rebuild.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attacks: Option<Vec<AttackUnit>>,
}

impl PlanPayload {
    pub fn from_test(test: &LoadTest, registry: &GeneratorRegistry) -> Self {
        let regenerable = registry.contains(test.name());
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            run_type: RunType::SingleTest,
            name: test.name().to_string(),
            test_parameters: test.parameters.clone(),
            attacks: (!regenerable).then(|| test.attacks.clone()),
        }
    }

    /// Rebuild the load test, regenerating calls from the parameters.
    pub fn into_test(self, registry: &GeneratorRegistry) -> Result<LoadTest> {
        match self.attacks {
            Some(attacks) => Ok(LoadTest {
                parameters: self.test_parameters,
                attacks,
            }),
            None => registry.generate_test(self.test_parameters),
        }
    }
}

/// Contents of `results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsPayload {
    pub schema_version: String,
    pub dependency_versions: BTreeMap<String, Option<String>>,
    pub cli_args: Vec<String>,
    pub run_type: RunType,
    /// Unix seconds.
    pub t_run_start: f64,
    pub t_run_end: f64,
    pub nodes: IndexMap<String, Node>,
    pub results: ResultSet,
}

/// `path` itself if it is a file, else `path/<filename>`.
pub fn resolve_path(path: &Path, filename: &str) -> PathBuf {
    if path.is_dir() {
        path.join(filename)
    } else {
        path.to_path_buf()
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).map_err(|e| FloodError::io(path, e))
}

fn read_versioned<T: DeserializeOwned>(path: &Path, allow_other_versions: bool) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| FloodError::io(path, e))?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    let found = value
        .get("schema_version")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown");
    if found != SCHEMA_VERSION && !allow_other_versions {
        return Err(FloodError::SchemaVersionMismatch {
            path: path.display().to_string(),
            found: found.to_string(),
            expected: SCHEMA_VERSION.to_string(),
        });
    }
    Ok(serde_json::from_value(value)?)
}

/// Write the plan into `dir`, returning the file path.
pub fn save_plan(dir: &Path, plan: &PlanPayload) -> Result<PathBuf> {
    let path = dir.join(PLAN_FILENAME);
    write_json(&path, plan)?;
    Ok(path)
}

/// Load a plan from a file or a run directory.
pub fn load_plan(path: &Path, allow_other_versions: bool) -> Result<PlanPayload> {
    read_versioned(&resolve_path(path, PLAN_FILENAME), allow_other_versions)
}

/// Write results into `dir`, returning the file path.
pub fn save_results(dir: &Path, results: &ResultsPayload) -> Result<PathBuf> {
    let path = dir.join(RESULTS_FILENAME);
    write_json(&path, results)?;
    Ok(path)
}

/// Load results from a file or a run directory.
pub fn load_results(path: &Path, allow_other_versions: bool) -> Result<ResultsPayload> {
    read_versioned(&resolve_path(path, RESULTS_FILENAME), allow_other_versions)
}
