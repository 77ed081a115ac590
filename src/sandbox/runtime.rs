//! Thin wrapper over the container runtime CLI (`docker`, `podman`, ...).

use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::process::Command;

use crate::config::SandboxConfig;

/// Upper bound for `kill` / `rm` housekeeping commands.
const HOUSEKEEPING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RuntimeCli {
    program: String,
    global_args: Vec<String>,
}

impl RuntimeCli {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            program: config.runtime.clone(),
            global_args: config.runtime_args.clone(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// A command with the global arguments already applied.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.global_args);
        cmd
    }

    /// Sends SIGKILL to a running instance.
    pub async fn kill(&self, name: &str) -> Result<()> {
        self.housekeeping(&["kill", name]).await
    }

    /// Force-removes an instance. Fails if it is already gone.
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.housekeeping(&["rm", "-f", name]).await
    }

    async fn housekeeping(&self, args: &[&str]) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let status = tokio::time::timeout(HOUSEKEEPING_TIMEOUT, cmd.status())
            .await
            .map_err(|_| anyhow!("{} {} timed out", self.program, args.join(" ")))??;

        if status.success() {
            Ok(())
        } else {
            Err(anyhow!(
                "{} {} failed ({status})",
                self.program,
                args.join(" ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(program: &str) -> RuntimeCli {
        RuntimeCli::new(&SandboxConfig {
            runtime: program.to_string(),
            ..SandboxConfig::default()
        })
    }

    #[tokio::test]
    async fn test_housekeeping_success() {
        // `true` ignores its arguments and exits 0
        assert!(cli("true").kill("code-x").await.is_ok());
        assert!(cli("true").remove("code-x").await.is_ok());
    }

    #[tokio::test]
    async fn test_housekeeping_failure_status() {
        let err = cli("false").remove("code-x").await.unwrap_err();
        assert!(err.to_string().contains("rm -f code-x"));
    }

    #[tokio::test]
    async fn test_housekeeping_missing_program() {
        assert!(cli("/nonexistent/runtime").kill("code-x").await.is_err());
    }

    #[test]
    fn test_program_name() {
        assert_eq!(cli("podman").program(), "podman");
    }
}
