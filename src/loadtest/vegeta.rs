//! Vegeta load generator adapter.
//!
//! An attack unit is materialized as one JSON file per call plus a target
//! manifest in vegeta's HTTP format:
//!
//! ```text
//! POST <url>
//! Content-Type: application/json
//! @<payload path>
//!
//! ```
//!
//! The manifest is written byte for byte in that shape. Responses are not
//! inspected here; the raw trace is handed to the report decoder and the deep
//! output analyzer.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::loadtest::error::{FloodError, Result};
use crate::loadtest::plan::{AttackUnit, Call};
use crate::loadtest::process;

/// Name of the target manifest inside an attack directory.
pub const TARGETS_FILENAME: &str = "vegeta_targets";

/// Headers sent with every request.
pub const HEADERS: [(&str, &str); 1] = [("Content-Type", "application/json")];

/// Raw vegeta trace bytes for one attack unit.
pub type RawAttackReport = Vec<u8>;

/// The external load generation engine.
#[async_trait]
pub trait AttackEngine: Send + Sync {
    /// Run one attack unit against `url` and return the raw trace.
    async fn attack(&self, url: &str, unit: &AttackUnit) -> Result<RawAttackReport>;

    /// Summarize a raw trace as a JSON report.
    async fn report(&self, raw: &[u8]) -> Result<Vec<u8>>;

    /// Expand a raw trace into one CSV row per response.
    async fn encode_csv(&self, raw: &[u8]) -> Result<Vec<u8>>;

    /// Location of the engine binary, `None` when it is not installed.
    fn locate(&self) -> Option<PathBuf>;
}

/// [`AttackEngine`] backed by the `vegeta` binary.
#[derive(Debug, Clone)]
pub struct VegetaBinary {
    path: String,
}

impl VegetaBinary {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Arguments of `vegeta attack` for one unit.
pub fn attack_args(manifest: &Path, unit: &AttackUnit) -> Vec<String> {
    let mut args = vec![
        "attack".to_string(),
        format!("-targets={}", manifest.display()),
        format!("-rate={}", unit.rate),
        format!("-duration={}s", unit.duration),
    ];
    if let Some(extra) = &unit.extra_args {
        args.extend(extra.split_whitespace().map(str::to_string));
    }
    args
}

#[async_trait]
impl AttackEngine for VegetaBinary {
    async fn attack(&self, url: &str, unit: &AttackUnit) -> Result<RawAttackReport> {
        let dir = tempfile::Builder::new()
            .prefix("flood_attack_")
            .tempdir()
            .map_err(|e| FloodError::io(std::env::temp_dir(), e))?;
        let manifest = write_manifest(dir.path(), url, &unit.calls)?;
        tracing::info!(
            url,
            rate = unit.rate,
            duration = unit.duration,
            calls = unit.calls.len(),
            "starting attack"
        );
        process::run(&self.path, &attack_args(&manifest, unit), None).await
    }

    async fn report(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let args = vec!["report".to_string(), "-type".to_string(), "json".to_string()];
        process::run(&self.path, &args, Some(raw.to_vec())).await
    }

    async fn encode_csv(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let args = vec!["encode".to_string(), "--to".to_string(), "csv".to_string()];
        process::run(&self.path, &args, Some(raw.to_vec())).await
    }

    fn locate(&self) -> Option<PathBuf> {
        process::find_executable(&self.path)
    }
}

/// Render the manifest for `url` with one entry per payload file.
pub fn render_manifest(url: &str, payload_paths: &[PathBuf]) -> String {
    let mut manifest = String::new();
    for path in payload_paths {
        manifest.push_str(&format!("POST {url}\n"));
        for (key, value) in HEADERS {
            manifest.push_str(&format!("{key}: {value}\n"));
        }
        manifest.push_str(&format!("@{}\n\n", path.display()));
    }
    manifest
}

/// Write payload files and the manifest into `dir`, returning the manifest path.
pub fn write_manifest(dir: &Path, url: &str, calls: &[Call]) -> Result<PathBuf> {
    let mut payload_paths = Vec::with_capacity(calls.len());
    for (i, call) in calls.iter().enumerate() {
        let path = dir.join(format!("vegeta_calls_{i}.json"));
        let body = serde_json::to_vec(call)?;
        std::fs::write(&path, body).map_err(|e| FloodError::io(&path, e))?;
        payload_paths.push(path);
    }
    let manifest_path = dir.join(TARGETS_FILENAME);
    std::fs::write(&manifest_path, render_manifest(url, &payload_paths))
        .map_err(|e| FloodError::io(&manifest_path, e))?;
    Ok(manifest_path)
}

/// One parsed manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTarget {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body_path: PathBuf,
}

/// Parse a manifest written by [`render_manifest`].
pub fn parse_manifest(text: &str) -> Result<Vec<ManifestTarget>> {
    let malformed = |line: usize, what: &str| {
        FloodError::decode(format!("manifest line {}: {what}", line + 1))
    };
    let mut targets = Vec::new();
    let mut lines = text.lines().enumerate();

    while let Some((n, line)) = lines.next() {
        if line.is_empty() {
            continue;
        }
        let (method, url) = line
            .split_once(' ')
            .ok_or_else(|| malformed(n, "expected '<METHOD> <url>'"))?;

        let mut headers = Vec::new();
        let body_path = loop {
            let (n, line) = lines
                .next()
                .ok_or_else(|| malformed(n, "entry has no @body line"))?;
            if let Some(path) = line.strip_prefix('@') {
                break PathBuf::from(path);
            }
            let (key, value) = line
                .split_once(": ")
                .ok_or_else(|| malformed(n, "expected '<Header>: <value>'"))?;
            headers.push((key.to_string(), value.to_string()));
        };

        if let Some((n, line)) = lines.next() {
            if !line.is_empty() {
                return Err(malformed(n, "expected blank line after entry"));
            }
        }

        targets.push(ManifestTarget {
            method: method.to_string(),
            url: url.to_string(),
            headers,
            body_path,
        });
    }
    Ok(targets)
}

/// Read a manifest file back into ordered (url, payload) pairs.
pub fn read_manifest(path: &Path) -> Result<Vec<(String, Call)>> {
    let text = std::fs::read_to_string(path).map_err(|e| FloodError::io(path, e))?;
    parse_manifest(&text)?
        .into_iter()
        .map(|target| {
            let body = std::fs::read(&target.body_path)
                .map_err(|e| FloodError::io(&target.body_path, e))?;
            Ok((target.url, serde_json::from_slice(&body)?))
        })
        .collect()
}
