//! `flood` subcommands.

pub mod ls;
pub mod print;
pub mod run;
pub mod version;

use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::path::PathBuf;

use flood::loadtest::config::FloodConfig;

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub vegeta: Option<String>,
}

impl GlobalOptions {
    /// Load the config file and apply command-line overrides.
    pub fn load_config(&self) -> Result<FloodConfig> {
        let mut config = FloodConfig::resolve(self.config.as_deref()).with_context(|| {
            match &self.config {
                Some(path) => format!("Failed to load config '{}'", path.display()),
                None => "Failed to load discovered flood config".to_string(),
            }
        })?;
        if let Some(vegeta) = &self.vegeta {
            config.engine.vegeta_path = vegeta.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Whether stdout should be colored.
pub fn stdout_color() -> bool {
    std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}
