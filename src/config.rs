use serde::Deserialize;
use std::path::Path;

use anyhow::bail;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
}

/// How isolated instances are created.
#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Container runtime CLI (`docker`, `podman`, ...)
    #[serde(default = "default_runtime")]
    pub runtime: String,
    /// Global arguments placed before the sub-command (e.g. `--context remote`)
    #[serde(default)]
    pub runtime_args: Vec<String>,
    /// Supports ${ENV_VAR} substitution
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_cpus")]
    pub cpus: f64,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: u32,
    #[serde(default = "default_nofile")]
    pub nofile: u32,
    /// Non-root `uid:gid` inside the instance
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_tmp_size_mb")]
    pub tmp_size_mb: u32,
    #[serde(default = "default_work_size_mb")]
    pub work_size_mb: u32,
    /// Extra time granted on top of the request timeout for instance startup
    #[serde(default = "default_startup_overhead_ms")]
    pub startup_overhead_ms: u64,
}

/// Bounds applied to caller-supplied requests. Out-of-range values are
/// rejected, never clamped.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_code_chars")]
    pub max_code_chars: usize,
    #[serde(default = "default_min_timeout_ms")]
    pub min_timeout_ms: u64,
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_min_memory_mb")]
    pub min_memory_mb: u64,
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(default = "default_memory_mb")]
    pub default_memory_mb: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SkillsConfig {
    #[serde(default)]
    pub code: CodeSkillConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CodeSkillConfig {
    /// Packages the code tool may install inside an instance
    #[serde(default = "default_allowed_packages")]
    pub allowed_packages: Vec<String>,
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "code-sandbox:latest".to_string()
}

fn default_cpus() -> f64 {
    0.5
}

fn default_pids_limit() -> u32 {
    32
}

fn default_nofile() -> u32 {
    256
}

fn default_user() -> String {
    "1001:1001".to_string()
}

fn default_tmp_size_mb() -> u32 {
    100
}

fn default_work_size_mb() -> u32 {
    50
}

fn default_startup_overhead_ms() -> u64 {
    5000
}

fn default_max_code_chars() -> usize {
    100_000
}

fn default_min_timeout_ms() -> u64 {
    1000
}

fn default_max_timeout_ms() -> u64 {
    300_000
}

fn default_timeout_ms() -> u64 {
    8000
}

fn default_min_memory_mb() -> u64 {
    64
}

fn default_max_memory_mb() -> u64 {
    1024
}

fn default_memory_mb() -> u64 {
    256
}

fn default_allowed_packages() -> Vec<String> {
    [
        "lodash",
        "moment",
        "uuid",
        "axios",
        "cheerio",
        "csv-parser",
        "date-fns",
        "ramda",
        "validator",
        "colors",
        "chalk",
        "debug",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            runtime_args: Vec::new(),
            image: default_image(),
            cpus: default_cpus(),
            pids_limit: default_pids_limit(),
            nofile: default_nofile(),
            user: default_user(),
            tmp_size_mb: default_tmp_size_mb(),
            work_size_mb: default_work_size_mb(),
            startup_overhead_ms: default_startup_overhead_ms(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_code_chars: default_max_code_chars(),
            min_timeout_ms: default_min_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            default_timeout_ms: default_timeout_ms(),
            min_memory_mb: default_min_memory_mb(),
            max_memory_mb: default_max_memory_mb(),
            default_memory_mb: default_memory_mb(),
        }
    }
}

impl Default for CodeSkillConfig {
    fn default() -> Self {
        Self {
            allowed_packages: default_allowed_packages(),
        }
    }
}

impl SandboxConfig {
    /// Human-readable description of the isolation backend
    pub fn description(&self) -> String {
        if self.runtime_args.is_empty() {
            format!("{} ({})", self.runtime, self.image)
        } else {
            format!(
                "{} {} ({})",
                self.runtime,
                self.runtime_args.join(" "),
                self.image
            )
        }
    }
}

impl LimitsConfig {
    fn check(&self) -> anyhow::Result<()> {
        if self.max_code_chars == 0 {
            bail!("limits.max_code_chars must be greater than zero");
        }
        if self.min_timeout_ms == 0 || self.min_timeout_ms > self.max_timeout_ms {
            bail!(
                "limits: invalid timeout bounds {}..={} ms",
                self.min_timeout_ms,
                self.max_timeout_ms
            );
        }
        if !(self.min_timeout_ms..=self.max_timeout_ms).contains(&self.default_timeout_ms) {
            bail!(
                "limits.default_timeout_ms ({}) outside {}..={}",
                self.default_timeout_ms,
                self.min_timeout_ms,
                self.max_timeout_ms
            );
        }
        if self.min_memory_mb == 0 || self.min_memory_mb > self.max_memory_mb {
            bail!(
                "limits: invalid memory bounds {}..={} MB",
                self.min_memory_mb,
                self.max_memory_mb
            );
        }
        if !(self.min_memory_mb..=self.max_memory_mb).contains(&self.default_memory_mb) {
            bail!(
                "limits.default_memory_mb ({}) outside {}..={}",
                self.default_memory_mb,
                self.min_memory_mb,
                self.max_memory_mb
            );
        }
        Ok(())
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses a TOML document after expanding `${VAR}` references.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.limits.check()?;
        if self.sandbox.runtime.trim().is_empty() {
            bail!("sandbox.runtime must not be empty");
        }
        if self.sandbox.image.trim().is_empty() {
            bail!("sandbox.image must not be empty");
        }
        if !(self.sandbox.cpus > 0.0) {
            bail!("sandbox.cpus must be positive");
        }
        Ok(())
    }
}
