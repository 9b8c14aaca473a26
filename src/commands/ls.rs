//! `flood ls`: list the built-in load tests.

use anyhow::Result;
use colored::Colorize;

use flood::loadtest::generators::GeneratorRegistry;

pub fn execute(color: bool) -> Result<()> {
    let registry = GeneratorRegistry::new();
    println!("{}", render(&registry, color));
    Ok(())
}

fn render(registry: &GeneratorRegistry, color: bool) -> String {
    let width = registry.kinds().map(|kind| kind.name().len()).max().unwrap_or(0);
    let mut lines = vec!["Available load tests:".to_string()];
    for kind in registry.kinds() {
        let name = format!("{:<width$}", kind.name());
        let name = if color { name.bold().to_string() } else { name };
        lines.push(format!("  {name}  {}", kind.description()));
    }
    lines.join("\n")
}
