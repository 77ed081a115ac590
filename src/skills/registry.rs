//! Skills registry: the set of tools exposed to the calling agent.

use serde::Serialize;
use serde_json::Value;

use super::Skill;

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Default)]
pub struct SkillRegistry {
    skills: Vec<Box<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a skill. A later skill with the same name replaces the earlier one.
    pub fn register(&mut self, skill: Box<dyn Skill>) {
        self.skills.retain(|s| s.name() != skill.name());
        self.skills.push(skill);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Skill> {
        self.skills
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Definitions for every registered skill, in registration order.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.skills
            .iter()
            .map(|s| ToolDefinition {
                name: s.name().to_string(),
                description: s.description().to_string(),
                input_schema: s.parameters_schema(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::SkillContext;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoSkill {
        name: &'static str,
        reply: &'static str,
    }

    #[async_trait]
    impl Skill for EchoSkill {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Echoes"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _params: Value, _context: &SkillContext) -> anyhow::Result<String> {
            Ok(self.reply.to_string())
        }
    }

    fn echo(name: &'static str, reply: &'static str) -> Box<dyn Skill> {
        Box::new(EchoSkill { name, reply })
    }

    #[test]
    fn test_empty_registry() {
        let registry = SkillRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.get("anything").is_none());
        assert!(registry.tool_definitions().is_empty());
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = SkillRegistry::new();
        registry.register(echo("alpha", "a"));
        registry.register(echo("beta", "b"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("beta").unwrap().name(), "beta");
        assert!(registry.get("gamma").is_none());
    }

    #[tokio::test]
    async fn test_register_replaces_same_name() {
        let mut registry = SkillRegistry::new();
        registry.register(echo("alpha", "first"));
        registry.register(echo("alpha", "second"));
        assert_eq!(registry.len(), 1);

        let context = SkillContext {
            caller: "test".to_string(),
        };
        let out = registry
            .get("alpha")
            .unwrap()
            .execute(json!({}), &context)
            .await
            .unwrap();
        assert_eq!(out, "second");
    }

    #[test]
    fn test_tool_definitions_in_order() {
        let mut registry = SkillRegistry::new();
        registry.register(echo("alpha", "a"));
        registry.register(echo("beta", "b"));

        let defs = registry.tool_definitions();
        let names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(defs[0].input_schema["type"], "object");

        let wire = serde_json::to_value(&defs[1]).unwrap();
        assert_eq!(wire["input_schema"], json!({"type": "object"}));
        assert_eq!(wire["description"], "Echoes");
    }
}
