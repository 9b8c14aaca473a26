//! `flood print`: re-render the summary of a saved run.

use anyhow::{Context, Result};
use std::path::Path;

use flood::loadtest::payload;
use flood::loadtest::summary::{render_summary, SummaryStyle};

pub fn execute(path: &Path, allow_other_versions: bool, metrics: Vec<String>, color: bool) -> Result<()> {
    let results = payload::load_results(path, allow_other_versions)
        .with_context(|| format!("Failed to load results from '{}'", path.display()))?;
    let style = SummaryStyle::default()
        .with_color(color)
        .with_metrics(metrics);
    println!("{}", render_summary(&results, &style));
    Ok(())
}
