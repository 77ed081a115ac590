//! Scoped dependency install inside the instance.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio::process::Command;
use tracing::info;

use crate::sandbox::validate;

/// Installs `packages` into `work_dir` with audit and funding telemetry
/// disabled and nothing written to a manifest.
///
/// Every identifier is re-checked first; the caller's validation is not
/// trusted from inside the instance.
pub async fn install_packages(
    npm: &str,
    work_dir: &Path,
    packages: &[String],
    timeout: Duration,
) -> Result<()> {
    validate::validate_packages(packages)?;

    info!("Installing {} package(s): {}", packages.len(), packages.join(", "));

    let mut cmd = Command::new(npm);
    cmd.args(["install", "--no-save", "--no-audit", "--no-fund"])
        .args(packages)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| anyhow!("timed out after {}s", timeout.as_secs()))?
        .map_err(|e| anyhow!("could not run {npm}: {e}"))?;

    if !output.status.success() {
        bail!("{}", String::from_utf8_lossy(&output.stderr).trim());
    }
    Ok(())
}
