//! Running external binaries.
//!
//! Every external command (vegeta, ssh, rsync) goes through [`run`], which
//! maps a missing binary to [`FloodError::ExternalBinaryMissing`] and a
//! non-zero exit to [`FloodError::ExternalBinaryFailure`] carrying the full
//! command line.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::loadtest::error::{FloodError, Result};

/// Render a command line for logs and error messages.
pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `program` with `args`, optionally feeding `stdin`, and return stdout.
///
/// The child is killed if the returned future is dropped.
pub async fn run(program: &str, args: &[String], stdin: Option<Vec<u8>>) -> Result<Vec<u8>> {
    let command = command_line(program, args);
    tracing::debug!(%command, "spawning");

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FloodError::ExternalBinaryMissing {
                binary: program.to_string(),
                location: "local host".to_string(),
            },
            _ => FloodError::ExternalBinaryFailure {
                command: command.clone(),
                status: "failed to spawn".to_string(),
                stderr: e.to_string(),
            },
        })?;

    let writer = match (stdin, child.stdin.take()) {
        (Some(bytes), Some(mut pipe)) => Some(tokio::spawn(async move {
            let result = pipe.write_all(&bytes).await;
            drop(pipe);
            result
        })),
        _ => None,
    };

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| FloodError::ExternalBinaryFailure {
            command: command.clone(),
            status: "failed to wait".to_string(),
            stderr: e.to_string(),
        })?;

    if let Some(writer) = writer {
        // A child that exits before reading all input reports its own error below.
        let _ = writer.await;
    }

    if !output.status.success() {
        return Err(FloodError::ExternalBinaryFailure {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// Locate an executable by path or on `PATH`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|full| full.is_file())
}
