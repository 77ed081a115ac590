pub mod builtin;
pub mod registry;

use async_trait::async_trait;

/// Runtime context passed to skill execution.
pub struct SkillContext {
    /// Who asked for the invocation (used in logs only).
    pub caller: String,
}

/// A tool the calling agent can invoke.
///
/// The host calls `execute()` with the raw JSON arguments of a tool call.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Unique identifier used in tool definitions.
    /// Must be lowercase alphanumeric + underscores (e.g. "code_interpreter").
    fn name(&self) -> &str;

    /// Human-readable description shown to the model so it knows
    /// when to invoke this skill.
    fn description(&self) -> &str;

    /// JSON Schema describing the parameters this skill accepts.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Declared capabilities, e.g. "process:docker".
    fn capabilities(&self) -> Vec<String> {
        vec![]
    }

    /// Execute the skill with the given parameters and return a text result.
    async fn execute(
        &self,
        params: serde_json::Value,
        context: &SkillContext,
    ) -> anyhow::Result<String>;
}

pub use registry::{SkillRegistry, ToolDefinition};
