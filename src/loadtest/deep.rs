//! Deep output analysis.
//!
//! Vegeta's own report only knows about HTTP status codes. A JSON-RPC node
//! can answer `200 OK` with a body that is not JSON, or with an error
//! envelope instead of a `result`. This module expands the raw trace into one
//! row per response (`vegeta encode --to csv`), classifies each row, and
//! recomputes the full metric set for every [`ResponseCategory`].
//!
//! Every latency statistic is exact: the median averages the two middle
//! values and the other quantiles take the nearest rank.

use base64::Engine as _;
use chrono::DateTime;
use std::collections::{BTreeMap, BTreeSet};

use crate::loadtest::error::{FloodError, Result};
use crate::loadtest::output::{DeepOutputDatum, ErrorPair, MetricsDatum, ResponseCategory};
use crate::loadtest::plan::Call;
use crate::loadtest::vegeta::AttackEngine;

const NANOS_PER_SECOND: f64 = 1e9;

/// One response from the per-response CSV trace.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRow {
    /// Request start, unix nanoseconds.
    pub timestamp: i64,
    pub status_code: u16,
    /// Nanoseconds.
    pub latency: i64,
    pub bytes_out: u64,
    pub bytes_in: u64,
    pub error: String,
    /// Base64 response body.
    pub body: String,
    /// Sequence number of the request within the attack.
    pub seq: u64,
}

/// How a single response was judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Successful,
    /// Non-200 status; the body is not inspected.
    BadStatus,
    /// 200 with a body that is not a JSON object.
    InvalidPayload,
    /// 200 with a JSON envelope lacking a non-null `result`.
    ProtocolError,
}

impl ResponseClass {
    pub fn is_successful(self) -> bool {
        self == Self::Successful
    }
}

/// Per-category deep metrics plus correlated protocol errors for one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct DeepAnalysis {
    pub metrics: BTreeMap<ResponseCategory, DeepOutputDatum>,
    pub error_pairs: Vec<ErrorPair>,
}

fn field<'a>(record: &'a csv::StringRecord, index: usize, name: &str) -> Result<&'a str> {
    record
        .get(index)
        .ok_or_else(|| FloodError::decode(format!("csv row is missing the {name} column")))
}

fn number<T: std::str::FromStr>(record: &csv::StringRecord, index: usize, name: &str) -> Result<T> {
    let raw = field(record, index, name)?;
    raw.parse()
        .map_err(|_| FloodError::decode(format!("invalid {name} '{raw}' in csv row")))
}

/// Parse `vegeta encode --to csv` output.
pub fn parse_rows(csv_bytes: &[u8]) -> Result<Vec<ResponseRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(csv_bytes);
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| FloodError::decode(format!("invalid csv: {e}")))?;
        rows.push(ResponseRow {
            timestamp: number(&record, 0, "timestamp")?,
            status_code: number(&record, 1, "status code")?,
            latency: number(&record, 2, "latency")?,
            bytes_out: number(&record, 3, "bytes out")?,
            bytes_in: number(&record, 4, "bytes in")?,
            error: field(&record, 5, "error")?.to_string(),
            body: field(&record, 6, "body")?.to_string(),
            seq: number(&record, 8, "seq")?,
        });
    }
    Ok(rows)
}

fn decode_body(row: &ResponseRow) -> Option<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(&row.body)
        .ok()
}

/// Classify one response.
pub fn classify(row: &ResponseRow) -> ResponseClass {
    if row.status_code != 200 {
        return ResponseClass::BadStatus;
    }
    let envelope = decode_body(row)
        .and_then(|body| serde_json::from_slice::<serde_json::Value>(&body).ok());
    match envelope {
        Some(serde_json::Value::Object(fields)) => match fields.get("result") {
            None | Some(serde_json::Value::Null) => ResponseClass::ProtocolError,
            Some(_) => ResponseClass::Successful,
        },
        _ => ResponseClass::InvalidPayload,
    }
}

fn format_timestamp(nanos: i64) -> String {
    DateTime::from_timestamp_nanos(nanos)
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string()
}

fn per_second(count: usize, span_nanos: i64) -> Option<f64> {
    (span_nanos > 0).then(|| count as f64 * NANOS_PER_SECOND / span_nanos as f64)
}

fn seconds(nanos: i64) -> f64 {
    nanos as f64 / NANOS_PER_SECOND
}

/// Median of non-empty sorted latencies, in seconds.
fn median(sorted: &[i64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0 / NANOS_PER_SECOND
    } else {
        seconds(sorted[mid])
    }
}

/// Nearest-rank quantile of non-empty sorted latencies, in seconds.
fn nearest_rank(sorted: &[i64], q: f64) -> f64 {
    let last = sorted.len() - 1;
    let index = (q * last as f64).round() as usize;
    seconds(sorted[index.min(last)])
}

/// Recompute the metric set over `rows`.
///
/// Quantiles are exact over the rows, not estimated.
pub fn compute_metrics(
    rows: &[&ResponseRow],
    target_rate: u64,
    target_duration: u64,
) -> Result<MetricsDatum> {
    let Some(first) = rows.first() else {
        return Ok(MetricsDatum::empty(target_rate, target_duration));
    };

    let mut min_ts = first.timestamp;
    let mut max_ts = first.timestamp;
    let mut last_response = first.timestamp + first.latency;
    let mut latencies = Vec::with_capacity(rows.len());
    let mut latency_sum = 0f64;
    let mut n_ok_status = 0usize;
    let mut status_codes: BTreeMap<String, u64> = BTreeMap::new();
    let mut errors = BTreeSet::new();

    for row in rows {
        min_ts = min_ts.min(row.timestamp);
        max_ts = max_ts.max(row.timestamp);
        last_response = last_response.max(row.timestamp + row.latency);
        latencies.push(row.latency);
        latency_sum += row.latency as f64;
        if row.status_code == 200 {
            n_ok_status += 1;
        }
        *status_codes.entry(row.status_code.to_string()).or_insert(0) += 1;
        if !row.error.is_empty() {
            errors.insert(row.error.clone());
        }
    }
    latencies.sort_unstable();

    let n = rows.len();
    Ok(MetricsDatum {
        target_rate,
        actual_rate: per_second(n, max_ts - min_ts),
        target_duration,
        actual_duration: Some(seconds(max_ts - min_ts)),
        requests: n as u64,
        throughput: per_second(n_ok_status, last_response - min_ts),
        success: Some(n_ok_status as f64 / n as f64),
        min: Some(seconds(latencies[0])),
        mean: Some(latency_sum / n as f64 / NANOS_PER_SECOND),
        p50: Some(median(&latencies)),
        p90: Some(nearest_rank(&latencies, 0.90)),
        p95: Some(nearest_rank(&latencies, 0.95)),
        p99: Some(nearest_rank(&latencies, 0.99)),
        max: Some(seconds(latencies[n - 1])),
        status_codes,
        errors: errors.into_iter().collect(),
        first_request_timestamp: Some(format_timestamp(min_ts)),
        last_request_timestamp: Some(format_timestamp(max_ts)),
        last_response_timestamp: Some(format_timestamp(last_response)),
        final_wait_time: Some(seconds(last_response - max_ts)),
    })
}

/// Classify rows and compute per-category metrics.
///
/// Protocol errors are paired with `calls[seq % calls.len()]`. Vegeta cycles
/// through the target list in order, so this holds as long as no request was
/// dropped before being assigned a sequence number.
pub fn analyze_rows(
    rows: &[ResponseRow],
    calls: &[Call],
    target_rate: u64,
    target_duration: u64,
) -> Result<DeepAnalysis> {
    let classes: Vec<ResponseClass> = rows.iter().map(classify).collect();

    let mut metrics = BTreeMap::new();
    for category in ResponseCategory::ALL {
        let selected: Vec<(&ResponseRow, ResponseClass)> = rows
            .iter()
            .zip(classes.iter().copied())
            .filter(|(_, class)| match category {
                ResponseCategory::All => true,
                ResponseCategory::Successful => class.is_successful(),
                ResponseCategory::Failed => !class.is_successful(),
            })
            .collect();
        let selected_rows: Vec<&ResponseRow> = selected.iter().map(|(row, _)| *row).collect();
        let count = |wanted: ResponseClass| {
            selected.iter().filter(|(_, class)| *class == wanted).count() as u64
        };
        metrics.insert(
            category,
            DeepOutputDatum {
                metrics: compute_metrics(&selected_rows, target_rate, target_duration)?,
                n_invalid_json_errors: count(ResponseClass::InvalidPayload),
                n_rpc_errors: count(ResponseClass::ProtocolError),
            },
        );
    }

    let error_pairs = rows
        .iter()
        .zip(&classes)
        .filter(|(_, class)| **class == ResponseClass::ProtocolError)
        .map(|(row, _)| ErrorPair {
            request: (!calls.is_empty()).then(|| calls[(row.seq as usize) % calls.len()].clone()),
            response: decode_body(row)
                .map(|body| String::from_utf8_lossy(&body).into_owned())
                .unwrap_or_default(),
        })
        .collect();

    Ok(DeepAnalysis {
        metrics,
        error_pairs,
    })
}

/// Expand a raw trace through the engine and analyze it.
pub async fn analyze(
    engine: &dyn AttackEngine,
    raw: &[u8],
    calls: &[Call],
    target_rate: u64,
    target_duration: u64,
) -> Result<DeepAnalysis> {
    let csv_bytes = engine.encode_csv(raw).await?;
    let rows = parse_rows(&csv_bytes)?;
    analyze_rows(&rows, calls, target_rate, target_duration)
}
