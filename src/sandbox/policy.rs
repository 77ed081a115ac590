//! Isolation policy: the per-execution resource and privilege envelope,
//! rendered as container runtime `run` arguments.

use std::time::Duration;

use super::types::ExecutionRequest;
use crate::config::SandboxConfig;

/// Mount point for scratch files inside the instance.
pub const TMP_MOUNT: &str = "/tmp";

/// Working directory inside the instance (package installs land here).
pub const WORK_MOUNT: &str = "/app";

/// Built fresh for every execution; never shared between calls.
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationPolicy {
    /// Instance name, unique per execution.
    pub name: String,
    pub image: String,
    /// Memory ceiling in MB; swap is capped to the same value.
    pub memory_mb: u64,
    pub cpus: f64,
    pub pids_limit: u32,
    pub nofile: u32,
    pub user: String,
    pub tmp_size_mb: u32,
    pub work_size_mb: u32,
    pub network: bool,
    pub timeout: Duration,
}

impl IsolationPolicy {
    pub fn build(name: &str, request: &ExecutionRequest, sandbox: &SandboxConfig) -> Self {
        Self {
            name: name.to_string(),
            image: sandbox.image.clone(),
            memory_mb: request.memory_mb,
            cpus: sandbox.cpus,
            pids_limit: sandbox.pids_limit,
            nofile: sandbox.nofile,
            user: sandbox.user.clone(),
            tmp_size_mb: sandbox.tmp_size_mb,
            work_size_mb: sandbox.work_size_mb,
            network: request.allow_network,
            timeout: request.timeout,
        }
    }

    /// The only variables visible inside the instance.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("TIMEOUT_MS", self.timeout.as_millis().to_string()),
            ("MEMORY_LIMIT_MB", self.memory_mb.to_string()),
            ("NODE_ENV", "sandbox".to_string()),
        ]
    }

    /// Arguments for `<runtime> run ...`, ending with the image reference.
    pub fn run_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "--name".into(),
            self.name.clone(),
            "--memory".into(),
            format!("{}m", self.memory_mb),
            // Same value as --memory: no swap
            "--memory-swap".into(),
            format!("{}m", self.memory_mb),
            "--cpus".into(),
            self.cpus.to_string(),
            "--pids-limit".into(),
            self.pids_limit.to_string(),
            "--ulimit".into(),
            format!("nofile={0}:{0}", self.nofile),
            "--ulimit".into(),
            format!("nproc={0}:{0}", self.pids_limit),
            "--cap-drop".into(),
            "ALL".into(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "--read-only".into(),
            "--tmpfs".into(),
            format!("{TMP_MOUNT}:rw,noexec,nosuid,size={}m", self.tmp_size_mb),
            "--tmpfs".into(),
            format!("{WORK_MOUNT}:rw,noexec,nosuid,size={}m", self.work_size_mb),
            "--workdir".into(),
            WORK_MOUNT.into(),
            "--user".into(),
            self.user.clone(),
            "--interactive".into(),
        ];

        if !self.network {
            args.push("--network".into());
            args.push("none".into());
        }

        for (key, value) in self.env() {
            args.push("--env".into());
            args.push(format!("{key}={value}"));
        }

        args.push(self.image.clone());
        args
    }
}
