//! Builtin skill: run JavaScript in an isolated, throwaway container.
//!
//! Every call is validated (shape, ranges, package allow-list) before it
//! reaches the executor. Whatever happens, the model gets back one
//! structured result document; failures are never raised as errors.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::{Config, LimitsConfig};
use crate::sandbox::types::{ExecutionResult, RunningExecution};
use crate::sandbox::{normalize, validate, SandboxExecutor};
use crate::skills::{Skill, SkillContext};

/// Clones share the executor and the allow-list.
#[derive(Clone)]
pub struct CodeSkill {
    executor: Arc<SandboxExecutor>,
    limits: LimitsConfig,
    allowed: Arc<RwLock<HashSet<String>>>,
}

impl CodeSkill {
    pub fn new(config: &Config) -> Self {
        Self {
            executor: Arc::new(SandboxExecutor::new(config.sandbox.clone())),
            limits: config.limits.clone(),
            allowed: Arc::new(RwLock::new(
                config.skills.code.allowed_packages.iter().cloned().collect(),
            )),
        }
    }

    /// The executor behind this skill, for shutdown sweeps.
    pub fn executor(&self) -> Arc<SandboxExecutor> {
        self.executor.clone()
    }

    /// Validates and runs one tool call. Never fails.
    pub async fn run(&self, params: Value) -> ExecutionResult {
        self.run_until(params, std::future::pending::<()>()).await
    }

    /// Like [`run`](Self::run), but stops the instance if `cancel` completes first.
    pub async fn run_until<F>(&self, params: Value, cancel: F) -> ExecutionResult
    where
        F: Future<Output = ()>,
    {
        let request = match validate::parse_input(params)
            .and_then(|input| validate::validate_input(input, &self.limits))
        {
            Ok(request) => request,
            Err(rejection) => {
                info!("Code call rejected: {rejection}");
                return normalize::rejection(&rejection);
            }
        };

        let allowed = validate::check_allow_list(&request.packages, &self.read_allowed());
        if let Err(rejection) = allowed {
            info!("Code call rejected: {rejection}");
            return normalize::rejection(&rejection);
        }

        self.executor.execute_until(&request, cancel).await
    }

    pub fn add_allowed_packages<I, S>(&self, packages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write_allowed().extend(packages.into_iter().map(Into::into));
    }

    pub fn remove_allowed_packages<I, S>(&self, packages: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed = self.write_allowed();
        for package in packages {
            allowed.remove(package.as_ref());
        }
    }

    /// Allow-listed packages, sorted.
    pub fn allowed_packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = self.read_allowed().iter().cloned().collect();
        packages.sort();
        packages
    }

    pub fn running_executions(&self) -> Vec<RunningExecution> {
        self.executor.running()
    }

    /// Kills and removes every instance still registered.
    pub async fn cleanup(&self) {
        self.executor.kill_all().await;
    }

    fn read_allowed(&self) -> RwLockReadGuard<'_, HashSet<String>> {
        self.allowed.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_allowed(&self) -> RwLockWriteGuard<'_, HashSet<String>> {
        self.allowed.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Skill for CodeSkill {
    fn name(&self) -> &str {
        "code_interpreter"
    }

    fn description(&self) -> &str {
        "Execute JavaScript (Node.js) code in a secure, isolated sandbox. \
         Use this for calculations, data transformation, parsing, or checking \
         how a snippet behaves. Output is whatever the code prints to stdout \
         and stderr. The sandbox has no network access by default and nothing \
         persists between calls. Only allow-listed npm packages can be installed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "JavaScript code to execute. Use console.log() to produce output."
                },
                "packages": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "npm packages to install before running (must be allow-listed)"
                },
                "timeoutMs": {
                    "type": "number",
                    "minimum": self.limits.min_timeout_ms,
                    "maximum": self.limits.max_timeout_ms,
                    "description": format!(
                        "Execution timeout in milliseconds (default {})",
                        self.limits.default_timeout_ms
                    )
                },
                "memMb": {
                    "type": "number",
                    "minimum": self.limits.min_memory_mb,
                    "maximum": self.limits.max_memory_mb,
                    "description": format!(
                        "Memory limit in megabytes (default {})",
                        self.limits.default_memory_mb
                    )
                },
                "network": {
                    "type": "boolean",
                    "description": "Allow outbound network access (default false)"
                }
            },
            "required": ["code"]
        })
    }

    fn capabilities(&self) -> Vec<String> {
        vec![format!("process:{}", self.executor.runtime_program())]
    }

    async fn execute(&self, params: Value, context: &SkillContext) -> anyhow::Result<String> {
        debug!("code_interpreter invoked by {}", context.caller);
        let result = self.run(params).await;
        Ok(serde_json::to_string(&result)?)
    }
}
