//! Optional external build command.
//!
//! The command is opaque: it runs through the shell in the given directory
//! and only its exit status matters.

use std::path::Path;

use tokio::process::Command;
use tracing::info;

use crate::domain::{QuaysideError, Result};

/// Run `command` through `sh -c` in `workdir`.
///
/// A non-zero exit (or a kill by signal) is `BuildFailed`.
pub async fn run_build(command: &str, workdir: &Path) -> Result<()> {
    info!(command, workdir = %workdir.display(), "running build command");
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workdir)
        .status()
        .await?;
    if !status.success() {
        return Err(QuaysideError::BuildFailed {
            command: command.to_string(),
            status: status.to_string(),
        });
    }
    Ok(())
}
