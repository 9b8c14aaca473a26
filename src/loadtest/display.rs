//! Terminal progress for running jobs.
//!
//! One indicatif bar per (node, test) job. Local jobs advance one step per
//! attack unit; remote jobs show a spinner until their results come back.
//! Bars draw to stderr and are hidden entirely in quiet mode.

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

use crate::loadtest::plan::AttackUnit;

/// Progress bars for a whole run.
#[derive(Clone)]
pub struct RunProgress {
    multi: MultiProgress,
    hidden: bool,
    color: bool,
}

impl RunProgress {
    pub fn new(quiet: bool, color: bool) -> Self {
        let multi = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        Self {
            multi,
            hidden: quiet,
            color,
        }
    }

    /// A display that never draws.
    pub fn hidden() -> Self {
        Self::new(true, false)
    }

    /// Bar for a local job running `n_units` attack units.
    pub fn local_job(&self, key: &str, n_units: usize) -> JobProgress {
        if self.hidden {
            return JobProgress::hidden(self.color);
        }
        let bar = self.multi.add(ProgressBar::new(n_units as u64));
        if let Ok(style) =
            ProgressStyle::with_template("{prefix:.bold} [{bar:20.cyan/blue}] {pos}/{len} {wide_msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_prefix(key.to_string());
        JobProgress {
            bar,
            color: self.color,
        }
    }

    /// Spinner for a remote job.
    pub fn remote_job(&self, key: &str, remote: &str) -> JobProgress {
        if self.hidden {
            return JobProgress::hidden(self.color);
        }
        let bar = self.multi.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::with_template("{prefix:.bold} {spinner:.cyan} {wide_msg}") {
            bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }
        bar.set_prefix(key.to_string());
        bar.set_message(format!("running on {remote}"));
        bar.enable_steady_tick(Duration::from_millis(100));
        JobProgress {
            bar,
            color: self.color,
        }
    }
}

/// Progress of one job.
pub struct JobProgress {
    bar: ProgressBar,
    color: bool,
}

impl JobProgress {
    fn hidden(color: bool) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            color,
        }
    }

    pub fn start_unit(&self, unit: &AttackUnit) {
        self.bar.set_message(format_unit(unit));
    }

    pub fn finish_unit(&self) {
        self.bar.inc(1);
    }

    pub fn complete(&self) {
        let done = if self.color {
            "done".green().to_string()
        } else {
            "done".to_string()
        };
        self.bar.finish_with_message(done);
    }

    pub fn fail(&self, reason: &str) {
        let failed = if self.color {
            "failed".red().to_string()
        } else {
            "failed".to_string()
        };
        self.bar.abandon_with_message(format!("{failed}: {reason}"));
    }
}

/// Short description of an attack unit for the progress line.
pub fn format_unit(unit: &AttackUnit) -> String {
    format!(
        "rate={}/s duration={}s calls={}",
        unit.rate,
        unit.duration,
        unit.calls.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_unit() {
        let unit = AttackUnit {
            rate: 16,
            duration: 30,
            calls: vec![serde_json::json!(1); 480],
            extra_args: None,
        };
        assert_eq!(format_unit(&unit), "rate=16/s duration=30s calls=480");
    }

    #[test]
    fn test_hidden_progress_does_not_panic() {
        let progress = RunProgress::hidden();
        let job = progress.local_job("node1", 3);
        job.finish_unit();
        job.complete();
        progress.remote_job("node2", "box").fail("boom");
    }
}
