//! Load test output data model.
//!
//! A [`MetricsDatum`] holds the metrics of one attack unit. A whole load
//! test is stored column-wise as [`MetricsColumns`]: one vector per metric,
//! one entry per unit, in rate order. Deep outputs reuse the same shape per
//! response category.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Response validity categories produced by the deep output analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseCategory {
    All,
    Successful,
    Failed,
}

impl ResponseCategory {
    pub const ALL: [ResponseCategory; 3] = [Self::All, Self::Successful, Self::Failed];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Successful => "successful",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ResponseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics of one attack unit. Time values are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsDatum {
    pub target_rate: u64,
    pub actual_rate: Option<f64>,
    pub target_duration: u64,
    pub actual_duration: Option<f64>,
    pub requests: u64,
    pub throughput: Option<f64>,
    pub success: Option<f64>,
    /// `None` when no request succeeded, never zero as a stand-in.
    pub min: Option<f64>,
    pub mean: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub max: Option<f64>,
    pub status_codes: BTreeMap<String, u64>,
    pub errors: Vec<String>,
    pub first_request_timestamp: Option<String>,
    pub last_request_timestamp: Option<String>,
    pub last_response_timestamp: Option<String>,
    pub final_wait_time: Option<f64>,
}

impl MetricsDatum {
    /// Datum for a category with no rows.
    pub fn empty(target_rate: u64, target_duration: u64) -> Self {
        Self {
            target_rate,
            actual_rate: Some(0.0),
            target_duration,
            actual_duration: None,
            requests: 0,
            throughput: None,
            success: None,
            min: None,
            mean: None,
            p50: None,
            p90: None,
            p95: None,
            p99: None,
            max: None,
            status_codes: BTreeMap::new(),
            errors: Vec::new(),
            first_request_timestamp: None,
            last_request_timestamp: None,
            last_response_timestamp: None,
            final_wait_time: None,
        }
    }

    /// Look up a numeric metric by name, for summary tables.
    pub fn metric(&self, name: &str) -> Option<f64> {
        match name {
            "target_rate" => Some(self.target_rate as f64),
            "actual_rate" => self.actual_rate,
            "target_duration" => Some(self.target_duration as f64),
            "actual_duration" => self.actual_duration,
            "requests" => Some(self.requests as f64),
            "throughput" => self.throughput,
            "success" => self.success,
            "min" => self.min,
            "mean" => self.mean,
            "p50" => self.p50,
            "p90" => self.p90,
            "p95" => self.p95,
            "p99" => self.p99,
            "max" => self.max,
            "final_wait_time" => self.final_wait_time,
            _ => None,
        }
    }
}

/// Deep metrics of one unit for one response category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepOutputDatum {
    #[serde(flatten)]
    pub metrics: MetricsDatum,
    pub n_invalid_json_errors: u64,
    pub n_rpc_errors: u64,
}

/// A JSON-RPC protocol error: the request (when it could be correlated) and
/// the raw response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPair {
    pub request: Option<serde_json::Value>,
    pub response: String,
}

/// Everything recorded for one attack unit.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadTestOutputDatum {
    pub metrics: MetricsDatum,
    pub deep_raw_output: Option<String>,
    pub deep_metrics: Option<BTreeMap<ResponseCategory, DeepOutputDatum>>,
    pub deep_rpc_error_pairs: Option<Vec<ErrorPair>>,
}

impl LoadTestOutputDatum {
    pub fn new(metrics: MetricsDatum) -> Self {
        Self {
            metrics,
            deep_raw_output: None,
            deep_metrics: None,
            deep_rpc_error_pairs: None,
        }
    }
}

/// Column-wise metrics across the units of a load test.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsColumns {
    pub target_rate: Vec<u64>,
    pub actual_rate: Vec<Option<f64>>,
    pub target_duration: Vec<u64>,
    pub actual_duration: Vec<Option<f64>>,
    pub requests: Vec<u64>,
    pub throughput: Vec<Option<f64>>,
    pub success: Vec<Option<f64>>,
    pub min: Vec<Option<f64>>,
    pub mean: Vec<Option<f64>>,
    pub p50: Vec<Option<f64>>,
    pub p90: Vec<Option<f64>>,
    pub p95: Vec<Option<f64>>,
    pub p99: Vec<Option<f64>>,
    pub max: Vec<Option<f64>>,
    pub status_codes: Vec<BTreeMap<String, u64>>,
    pub errors: Vec<Vec<String>>,
    pub first_request_timestamp: Vec<Option<String>>,
    pub last_request_timestamp: Vec<Option<String>>,
    pub last_response_timestamp: Vec<Option<String>>,
    pub final_wait_time: Vec<Option<f64>>,
}

impl MetricsColumns {
    pub fn push(&mut self, datum: MetricsDatum) {
        self.target_rate.push(datum.target_rate);
        self.actual_rate.push(datum.actual_rate);
        self.target_duration.push(datum.target_duration);
        self.actual_duration.push(datum.actual_duration);
        self.requests.push(datum.requests);
        self.throughput.push(datum.throughput);
        self.success.push(datum.success);
        self.min.push(datum.min);
        self.mean.push(datum.mean);
        self.p50.push(datum.p50);
        self.p90.push(datum.p90);
        self.p95.push(datum.p95);
        self.p99.push(datum.p99);
        self.max.push(datum.max);
        self.status_codes.push(datum.status_codes);
        self.errors.push(datum.errors);
        self.first_request_timestamp
            .push(datum.first_request_timestamp);
        self.last_request_timestamp.push(datum.last_request_timestamp);
        self.last_response_timestamp
            .push(datum.last_response_timestamp);
        self.final_wait_time.push(datum.final_wait_time);
    }

    pub fn len(&self) -> usize {
        self.target_rate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target_rate.is_empty()
    }

    /// Reassemble the datum of unit `index`.
    pub fn row(&self, index: usize) -> Option<MetricsDatum> {
        if index >= self.len() {
            return None;
        }
        Some(MetricsDatum {
            target_rate: self.target_rate[index],
            actual_rate: self.actual_rate[index],
            target_duration: self.target_duration[index],
            actual_duration: self.actual_duration[index],
            requests: self.requests[index],
            throughput: self.throughput[index],
            success: self.success[index],
            min: self.min[index],
            mean: self.mean[index],
            p50: self.p50[index],
            p90: self.p90[index],
            p95: self.p95[index],
            p99: self.p99[index],
            max: self.max[index],
            status_codes: self.status_codes[index].clone(),
            errors: self.errors[index].clone(),
            first_request_timestamp: self.first_request_timestamp[index].clone(),
            last_request_timestamp: self.last_request_timestamp[index].clone(),
            last_response_timestamp: self.last_response_timestamp[index].clone(),
            final_wait_time: self.final_wait_time[index],
        })
    }
}

/// Column-wise deep metrics for one response category.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadTestDeepOutput {
    #[serde(flatten)]
    pub metrics: MetricsColumns,
    pub n_invalid_json_errors: Vec<u64>,
    pub n_rpc_errors: Vec<u64>,
}

/// Column-wise output of a whole load test against one node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadTestOutput {
    #[serde(flatten)]
    pub metrics: MetricsColumns,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_raw_output: Option<Vec<Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_metrics: Option<BTreeMap<ResponseCategory, LoadTestDeepOutput>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_rpc_error_pairs: Option<Vec<Option<Vec<ErrorPair>>>>,
}

impl LoadTestOutput {
    /// Transpose per-unit data into columns.
    ///
    /// Deep columns are present only when every unit carries them.
    pub fn from_data(data: Vec<LoadTestOutputDatum>) -> Self {
        let raw_present = data.iter().any(|d| d.deep_raw_output.is_some());
        let deep_present = !data.is_empty() && data.iter().all(|d| d.deep_metrics.is_some());
        let pairs_present = data.iter().any(|d| d.deep_rpc_error_pairs.is_some());

        let mut output = Self::default();
        let mut raw = Vec::new();
        let mut deep: BTreeMap<ResponseCategory, LoadTestDeepOutput> = BTreeMap::new();
        let mut pairs = Vec::new();

        for datum in data {
            output.metrics.push(datum.metrics);
            raw.push(datum.deep_raw_output);
            pairs.push(datum.deep_rpc_error_pairs);
            if let Some(categories) = datum.deep_metrics.filter(|_| deep_present) {
                for (category, deep_datum) in categories {
                    let column = deep.entry(category).or_default();
                    column.metrics.push(deep_datum.metrics);
                    column.n_invalid_json_errors.push(deep_datum.n_invalid_json_errors);
                    column.n_rpc_errors.push(deep_datum.n_rpc_errors);
                }
            }
        }

        output.deep_raw_output = raw_present.then_some(raw);
        output.deep_metrics = deep_present.then_some(deep);
        output.deep_rpc_error_pairs = pairs_present.then_some(pairs);
        output
    }
}

/// Outputs keyed by node name, test name, or `{node}__{test}`.
pub type ResultSet = IndexMap<String, LoadTestOutput>;
