//! Remote execution channel.
//!
//! A remote job ships a job directory to the node's SSH host, re-invokes
//! flood there over that directory, and fetches `results.json` back. The
//! transport is abstracted behind [`RemoteChannel`]; [`SshChannel`] drives
//! the `rsync` and `ssh` binaries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::loadtest::error::{FloodError, Result};
use crate::loadtest::node::Node;
use crate::loadtest::process;
use crate::loadtest::vegeta::AttackEngine;

/// Version information exchanged before any remote traffic is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub flood_version: String,
    pub vegeta_path: Option<String>,
}

impl Installation {
    /// Describe the installation running this process.
    pub fn local(engine: &dyn AttackEngine) -> Self {
        Self {
            flood_version: env!("CARGO_PKG_VERSION").to_string(),
            vegeta_path: engine.locate().map(|path| path.display().to_string()),
        }
    }
}

/// Transport primitives needed to run a job on another host.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Copy `local_dir` recursively into `remote_parent` on `remote`.
    async fn sync_dir(&self, remote: &str, local_dir: &Path, remote_parent: &str) -> Result<()>;

    /// Run a bash script on `remote` and return its stdout.
    async fn exec(&self, remote: &str, script: &str) -> Result<Vec<u8>>;

    /// Copy one file from `remote` to `local_path`.
    async fn fetch(&self, remote: &str, remote_path: &str, local_path: &Path) -> Result<()>;
}

/// [`RemoteChannel`] over `ssh` and `rsync`.
#[derive(Debug, Clone)]
pub struct SshChannel {
    ssh_path: String,
    rsync_path: String,
}

impl SshChannel {
    pub fn new(ssh_path: impl Into<String>, rsync_path: impl Into<String>) -> Self {
        Self {
            ssh_path: ssh_path.into(),
            rsync_path: rsync_path.into(),
        }
    }
}

fn transfer_failure(remote: &str, error: FloodError) -> FloodError {
    match error {
        kept @ (FloodError::ExternalBinaryMissing { .. } | FloodError::RemoteTransferFailure { .. }) => {
            kept
        },
        other => FloodError::RemoteTransferFailure {
            remote: remote.to_string(),
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl RemoteChannel for SshChannel {
    async fn sync_dir(&self, remote: &str, local_dir: &Path, remote_parent: &str) -> Result<()> {
        let args = vec![
            "-r".to_string(),
            local_dir.display().to_string(),
            format!("{remote}:{remote_parent}"),
        ];
        process::run(&self.rsync_path, &args, None)
            .await
            .map(drop)
            .map_err(|e| transfer_failure(remote, e))
    }

    async fn exec(&self, remote: &str, script: &str) -> Result<Vec<u8>> {
        let args = vec![remote.to_string(), "bash -s".to_string()];
        process::run(&self.ssh_path, &args, Some(script.as_bytes().to_vec()))
            .await
            .map_err(|e| transfer_failure(remote, e))
    }

    async fn fetch(&self, remote: &str, remote_path: &str, local_path: &Path) -> Result<()> {
        let args = vec![
            format!("{remote}:{remote_path}"),
            local_path.display().to_string(),
        ];
        process::run(&self.rsync_path, &args, None)
            .await
            .map(drop)
            .map_err(|e| transfer_failure(remote, e))
    }
}

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"@%+=:,./_-".contains(&b))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn login_script(command: &str) -> String {
    format!("source ~/.profile\n{command}\n")
}

/// Flags mirrored from the orchestrating run into the remote run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirroredFlags {
    pub deep_check: bool,
    pub save_raw_output: bool,
}

/// Script that runs the job in `job_dir` on the remote host against `node`.
pub fn remote_run_script(binary: &str, job_dir: &str, node: &Node, flags: MirroredFlags) -> String {
    let mut command = format!(
        "{binary} {dir} {node} --output {dir} --no-figures --quiet",
        binary = shell_quote(binary),
        dir = shell_quote(job_dir),
        node = shell_quote(&node.remote_descriptor()),
    );
    if flags.deep_check {
        command.push_str(" --deep-check");
    }
    if flags.save_raw_output {
        command.push_str(" --save-raw-output");
    }
    login_script(&command)
}

/// Ask the remote host which flood and vegeta it has.
pub async fn remote_installation(
    channel: &dyn RemoteChannel,
    remote: &str,
    binary: &str,
) -> Result<Installation> {
    let script = login_script(&format!("{} version --json", shell_quote(binary)));
    let stdout = channel
        .exec(remote, &script)
        .await
        .map_err(|e| transfer_failure(remote, e))?;
    serde_json::from_slice(&stdout).map_err(|e| FloodError::RemoteTransferFailure {
        remote: remote.to_string(),
        message: format!("unreadable `flood version --json` output: {e}"),
    })
}

/// Fail unless the remote installation can run jobs for this one.
pub fn check_installation(local: &Installation, remote_host: &str, remote: &Installation) -> Result<()> {
    if local.flood_version != remote.flood_version {
        return Err(FloodError::RemoteVersionMismatch {
            remote: remote_host.to_string(),
            local: local.flood_version.clone(),
            remote_version: remote.flood_version.clone(),
        });
    }
    if remote.vegeta_path.is_none() {
        return Err(FloodError::ExternalBinaryMissing {
            binary: "vegeta".to_string(),
            location: format!("remote '{remote_host}'"),
        });
    }
    Ok(())
}
