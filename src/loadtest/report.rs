//! Decoding vegeta reports into [`MetricsDatum`]s.
//!
//! `vegeta report -type json` summarizes a raw trace; durations in that
//! summary are nanoseconds and are converted to seconds here. Raw traces
//! that must be kept are gzip-compressed and base64-encoded so they can be
//! embedded in the JSON results file.

use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::loadtest::error::{FloodError, Result};
use crate::loadtest::output::MetricsDatum;
use crate::loadtest::vegeta::AttackEngine;

const NANOS_PER_SECOND: f64 = 1e9;

#[derive(Debug, Deserialize)]
struct VegetaLatencies {
    mean: u64,
    #[serde(rename = "50th")]
    p50: u64,
    #[serde(rename = "90th")]
    p90: u64,
    #[serde(rename = "95th")]
    p95: u64,
    #[serde(rename = "99th")]
    p99: u64,
    max: u64,
    #[serde(default)]
    min: Option<u64>,
}

/// Subset of the vegeta JSON report flood reads.
#[derive(Debug, Deserialize)]
struct VegetaReport {
    latencies: VegetaLatencies,
    earliest: String,
    latest: String,
    end: String,
    duration: u64,
    wait: u64,
    requests: u64,
    rate: f64,
    throughput: f64,
    success: f64,
    #[serde(default)]
    status_codes: Option<BTreeMap<String, u64>>,
    #[serde(default)]
    errors: Option<Vec<String>>,
}

fn seconds(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_SECOND
}

/// Convert a vegeta JSON report into a datum.
pub fn parse_report(report: &[u8], target_rate: u64, target_duration: u64) -> Result<MetricsDatum> {
    let report: VegetaReport = serde_json::from_slice(report)
        .map_err(|e| FloodError::decode(format!("invalid vegeta report: {e}")))?;
    let latencies = report.latencies;
    Ok(MetricsDatum {
        target_rate,
        actual_rate: Some(report.rate),
        target_duration,
        actual_duration: Some(seconds(report.duration)),
        requests: report.requests,
        throughput: Some(report.throughput),
        success: Some(report.success),
        min: latencies.min.map(seconds),
        mean: Some(seconds(latencies.mean)),
        p50: Some(seconds(latencies.p50)),
        p90: Some(seconds(latencies.p90)),
        p95: Some(seconds(latencies.p95)),
        p99: Some(seconds(latencies.p99)),
        max: Some(seconds(latencies.max)),
        status_codes: report.status_codes.unwrap_or_default(),
        errors: report.errors.unwrap_or_default(),
        first_request_timestamp: Some(report.earliest),
        last_request_timestamp: Some(report.latest),
        last_response_timestamp: Some(report.end),
        final_wait_time: Some(seconds(report.wait)),
    })
}

/// Summarize a raw trace through the engine and decode the result.
pub async fn decode(
    engine: &dyn AttackEngine,
    raw: &[u8],
    target_rate: u64,
    target_duration: u64,
) -> Result<MetricsDatum> {
    let report = engine.report(raw).await?;
    parse_report(&report, target_rate, target_duration)
}

/// Compress and base64-encode a raw trace.
pub fn encode_raw_output(raw: &[u8]) -> Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(raw)
        .and_then(|_| encoder.finish())
        .map(|compressed| base64::engine::general_purpose::STANDARD.encode(compressed))
        .map_err(|e| FloodError::decode(format!("failed to compress raw output: {e}")))
}

/// Reverse [`encode_raw_output`].
pub fn decode_raw_output(encoded: &str) -> Result<Vec<u8>> {
    let compressed = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| FloodError::decode(format!("raw output is not base64: {e}")))?;
    let mut raw = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut raw)
        .map_err(|e| FloodError::decode(format!("raw output is not gzip: {e}")))?;
    Ok(raw)
}
