//! Terminal summary of a run.
//!
//! [`render_summary`] is a pure function over a [`ResultsPayload`]: a header
//! of dotted rows describing the run, then one table per selected metric
//! with a row per target rate and a column per result key.
//!
//! ```text
//!   nodes...................................: 2
//!     n1....................................: http://localhost:8545 (geth/v1.13.0)
//!   elapsed.................................: 95.2s
//!
//!   success
//!   rate        n1          n2
//!   ──────────────────────────────
//!   1/s         100.0%      100.0%
//!   4/s         100.0%      98.3%
//! ```

use colored::Colorize;

use crate::loadtest::output::{LoadTestOutput, ResponseCategory, ResultSet};
use crate::loadtest::payload::ResultsPayload;

/// Width for dotted metric row padding.
const PAD_WIDTH: usize = 40;

const MIN_COLUMN_WIDTH: usize = 12;

/// Metrics shown when none are requested.
pub const DEFAULT_METRICS: [&str; 3] = ["success", "throughput", "p90"];

/// Presentation settings for summaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryStyle {
    pub color: bool,
    pub metrics: Vec<String>,
}

impl Default for SummaryStyle {
    fn default() -> Self {
        Self {
            color: false,
            metrics: DEFAULT_METRICS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl SummaryStyle {
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Replace the metric selection, keeping the defaults if `metrics` is empty.
    pub fn with_metrics(mut self, metrics: Vec<String>) -> Self {
        if !metrics.is_empty() {
            self.metrics = metrics;
        }
        self
    }
}

#[derive(Clone, Copy)]
enum Tone {
    Good,
    Warn,
    Bad,
    Plain,
}

fn paint(text: String, tone: Tone, style: &SummaryStyle) -> String {
    if !style.color {
        return text;
    }
    match tone {
        Tone::Good => text.green().to_string(),
        Tone::Warn => text.yellow().to_string(),
        Tone::Bad => text.red().to_string(),
        Tone::Plain => text,
    }
}

/// Render the summary of a saved or finished run.
pub fn render_summary(payload: &ResultsPayload, style: &SummaryStyle) -> String {
    let mut lines = Vec::new();

    lines.push(format_metric_row("nodes", &payload.nodes.len().to_string(), PAD_WIDTH));
    for (name, node) in &payload.nodes {
        let mut value = node.url.clone();
        if let Some(remote) = &node.remote {
            value.push_str(&format!(" via {remote}"));
        }
        if let Some(version) = &node.client_version {
            value.push_str(&format!(" ({version})"));
        }
        lines.push(format_metric_row(&format!("  {name}"), &value, PAD_WIDTH));
    }
    let elapsed = (payload.t_run_end - payload.t_run_start).max(0.0);
    lines.push(format_metric_row("elapsed", &format!("{elapsed:.1}s"), PAD_WIDTH));

    let tables = render_tables(&payload.results, style);
    if !tables.is_empty() {
        lines.push(String::new());
        lines.push(tables);
    }
    lines.join("\n")
}

/// One table per selected metric, plus failure counts when deep metrics exist.
pub fn render_tables(results: &ResultSet, style: &SummaryStyle) -> String {
    if results.is_empty() {
        return String::new();
    }
    let mut tables = Vec::new();
    for metric in &style.metrics {
        tables.push(render_table(metric, results, style, |output, i| {
            let value = output.metrics.row(i)?.metric(metric)?;
            Some(format_metric_value(metric, value, style))
        }));
    }

    if results.values().any(|output| output.deep_metrics.is_some()) {
        tables.push(render_table("failed: invalid json", results, style, |output, i| {
            let failed = output.deep_metrics.as_ref()?.get(&ResponseCategory::Failed)?;
            let count = *failed.n_invalid_json_errors.get(i)?;
            Some(format_count(count, style))
        }));
        tables.push(render_table("failed: rpc errors", results, style, |output, i| {
            let failed = output.deep_metrics.as_ref()?.get(&ResponseCategory::Failed)?;
            let count = *failed.n_rpc_errors.get(i)?;
            Some(format_count(count, style))
        }));
    }
    tables.join("\n\n")
}

fn render_table<F>(title: &str, results: &ResultSet, style: &SummaryStyle, cell: F) -> String
where
    F: Fn(&LoadTestOutput, usize) -> Option<String>,
{
    let width = results
        .keys()
        .map(|key| key.len() + 2)
        .max()
        .unwrap_or(0)
        .max(MIN_COLUMN_WIDTH);
    let n_rows = results.values().map(|o| o.metrics.len()).max().unwrap_or(0);
    let rates = results
        .values()
        .find(|o| o.metrics.len() == n_rows)
        .map(|o| o.metrics.target_rate.clone())
        .unwrap_or_default();

    let title = if style.color {
        title.bold().to_string()
    } else {
        title.to_string()
    };
    let mut lines = vec![format!("  {title}")];

    let mut header = format!("  {:<width$}", "rate");
    for key in results.keys() {
        header.push_str(&format!("{key:<width$}"));
    }
    lines.push(header.trim_end().to_string());
    lines.push(format!("  {}", "\u{2500}".repeat(width * (results.len() + 1))));

    for (i, rate) in rates.iter().enumerate() {
        let mut row = format!("  {:<width$}", format!("{rate}/s"));
        for output in results.values() {
            let value = cell(output, i).unwrap_or_else(|| "-".to_string());
            row.push_str(&pad_visible(&value, width));
        }
        lines.push(row.trim_end().to_string());
    }
    lines.join("\n")
}

/// Left-align `value` in `width` columns, ignoring ANSI escape sequences.
fn pad_visible(value: &str, width: usize) -> String {
    let visible = strip_ansi_len(value);
    format!("{value}{}", " ".repeat(width.saturating_sub(visible)))
}

fn strip_ansi_len(value: &str) -> usize {
    let mut len = 0;
    let mut in_escape = false;
    for c in value.chars() {
        if in_escape {
            if c == 'm' {
                in_escape = false;
            }
        } else if c == '\u{1b}' {
            in_escape = true;
        } else {
            len += 1;
        }
    }
    len
}

fn format_count(count: u64, style: &SummaryStyle) -> String {
    let tone = if count > 0 { Tone::Bad } else { Tone::Plain };
    paint(count.to_string(), tone, style)
}

/// Format a metric value for display. Latencies are shown in milliseconds.
pub fn format_metric_value(metric: &str, value: f64, style: &SummaryStyle) -> String {
    match metric {
        "success" => {
            let tone = if value >= 1.0 {
                Tone::Good
            } else if value >= 0.99 {
                Tone::Warn
            } else {
                Tone::Bad
            };
            paint(format!("{:.1}%", value * 100.0), tone, style)
        },
        "throughput" | "actual_rate" => format!("{value:.1}"),
        "requests" | "target_rate" | "target_duration" => format!("{value:.0}"),
        "actual_duration" | "final_wait_time" => format!("{value:.2}s"),
        _ => {
            let ms = value * 1000.0;
            let tone = if ms > 1000.0 { Tone::Warn } else { Tone::Plain };
            paint(format!("{ms:.1}ms"), tone, style)
        },
    }
}

/// `  name........: value`
fn format_metric_row(name: &str, value: &str, pad_width: usize) -> String {
    format!("  {name:.<pad_width$}: {value}")
}
