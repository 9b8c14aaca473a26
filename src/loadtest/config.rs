//! TOML configuration for flood.
//!
//! The file is optional; every field has a default. It is discovered by
//! walking up from the working directory looking for `.flood/config.toml`,
//! falling back to `~/.config/flood/config.toml`.
//!
//! # Example TOML
//!
//! ```toml
//! [engine]
//! vegeta_path = "/usr/local/bin/vegeta"
//!
//! [remote]
//! ssh_path = "ssh"
//! rsync_path = "rsync"
//! tmp_root = "/tmp"
//! grace_secs = 300
//!
//! [generation]
//! default_network = "ethereum"
//! max_block = 17000000
//!
//! [aliases]
//! archive = "https://archive.example.org/rpc"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::loadtest::error::{FloodError, Result};

/// Relative location of the project-level config file.
pub const CONFIG_RELATIVE_PATH: &str = ".flood/config.toml";

/// Top-level flood configuration.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FloodConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub remote: RemoteSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
    /// Provider alias registry used by the node resolver: alias -> URL.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

/// Settings for the external load generation engine.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineSettings {
    /// Path or name of the vegeta binary.
    #[serde(default = "default_vegeta_path")]
    pub vegeta_path: String,
}

/// Settings for remote job dispatch over ssh/rsync.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RemoteSettings {
    #[serde(default = "default_ssh_path")]
    pub ssh_path: String,
    #[serde(default = "default_rsync_path")]
    pub rsync_path: String,
    /// Directory under which per-job directories are created on both ends.
    #[serde(default = "default_tmp_root")]
    pub tmp_root: String,
    /// Name of the flood binary on the remote host's PATH.
    #[serde(default = "default_remote_binary")]
    pub remote_binary: String,
    /// Time allowed on top of the test duration before a remote job is
    /// declared hung.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

/// Settings for synthesizing call parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GenerationSettings {
    #[serde(default = "default_network")]
    pub default_network: String,
    /// Upper bound (inclusive) for randomly drawn block numbers.
    #[serde(default = "default_max_block")]
    pub max_block: u64,
}

fn default_vegeta_path() -> String {
    "vegeta".to_string()
}

fn default_ssh_path() -> String {
    "ssh".to_string()
}

fn default_rsync_path() -> String {
    "rsync".to_string()
}

fn default_tmp_root() -> String {
    "/tmp".to_string()
}

fn default_remote_binary() -> String {
    "flood".to_string()
}

fn default_grace_secs() -> u64 {
    300
}

fn default_network() -> String {
    "ethereum".to_string()
}

fn default_max_block() -> u64 {
    17_000_000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            vegeta_path: default_vegeta_path(),
        }
    }
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            ssh_path: default_ssh_path(),
            rsync_path: default_rsync_path(),
            tmp_root: default_tmp_root(),
            remote_binary: default_remote_binary(),
            grace_secs: default_grace_secs(),
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            default_network: default_network(),
            max_block: default_max_block(),
        }
    }
}

impl RemoteSettings {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

impl FloodConfig {
    /// Parse a TOML string into a validated [`FloodConfig`].
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a [`FloodConfig`] from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| FloodError::io(path, e))?;
        Self::from_toml(&content)
    }

    /// Load the config at `explicit` if given, else the discovered one, else defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let cwd = std::env::current_dir().map_err(|e| FloodError::io(".", e))?;
        match discover_config(&cwd) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Validate that the config is semantically correct.
    ///
    /// Checks:
    /// - binary paths are non-empty
    /// - the remote grace period is positive
    /// - `max_block` is positive
    /// - alias targets are non-empty
    pub fn validate(&self) -> Result<()> {
        let binaries = [
            ("engine.vegeta_path", &self.engine.vegeta_path),
            ("remote.ssh_path", &self.remote.ssh_path),
            ("remote.rsync_path", &self.remote.rsync_path),
            ("remote.remote_binary", &self.remote.remote_binary),
        ];
        for (field, value) in binaries {
            if value.trim().is_empty() {
                return Err(FloodError::ConfigValidation {
                    message: format!("{field} must not be empty"),
                });
            }
        }
        if self.remote.grace_secs == 0 {
            return Err(FloodError::ConfigValidation {
                message: "remote.grace_secs must be greater than 0".to_string(),
            });
        }
        if self.generation.max_block == 0 {
            return Err(FloodError::ConfigValidation {
                message: "generation.max_block must be greater than 0".to_string(),
            });
        }
        if let Some((alias, _)) = self.aliases.iter().find(|(_, url)| url.trim().is_empty()) {
            return Err(FloodError::ConfigValidation {
                message: format!("alias '{alias}' has an empty URL"),
            });
        }
        Ok(())
    }
}

/// Discover a config file by walking up from `start_dir`, then the user config dir.
pub fn discover_config(start_dir: &Path) -> Option<PathBuf> {
    let mut dir = start_dir.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_RELATIVE_PATH);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            break;
        }
    }
    dirs::config_dir()
        .map(|base| base.join("flood").join("config.toml"))
        .filter(|candidate| candidate.is_file())
}
