pub mod bash;
pub mod edit_file;
pub mod list_files;
pub mod paths;
pub mod read_file;
pub mod skill;
pub mod task;
pub mod write_file;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::context::SessionContext;
use crate::conversation::{ToolCall, ToolResultMessage};
use crate::llm::{AiProvider, ToolSpec};
use crate::safety::CommandValidator;
use crate::session::SessionStore;
use crate::skills::CapabilityRegistry;

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub output: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: true,
        }
    }
}

/// Trait for all investigation tools. Handlers are pure with respect to
/// the session: everything they need arrives in the invocation context
/// and the parsed input.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    async fn execute(&self, args: Value, ctx: &SessionContext) -> Result<ToolOutcome>;
}

/// Shared dependencies for the built-in tool set.
#[derive(Clone)]
pub struct ToolDeps {
    pub store: Arc<SessionStore>,
    pub validator: Arc<CommandValidator>,
    pub capabilities: Arc<CapabilityRegistry>,
    /// Provider for the `task` tool's nested loop; absent in restricted
    /// sub-agent registries.
    pub provider: Option<Arc<dyn AiProvider>>,
}

/// Registry of available tools. Registration happens at startup and is
/// read-mostly afterwards; dispatch never blocks on registration churn
/// beyond the brief map lock.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the default built-in tools. Built-in names are
    /// distinct, so registration cannot conflict.
    pub fn with_defaults(deps: &ToolDeps) -> Self {
        let registry = Self::new();
        registry.register(Arc::new(read_file::ReadFileTool)).unwrap();
        registry.register(Arc::new(write_file::WriteFileTool)).unwrap();
        registry.register(Arc::new(edit_file::EditFileTool)).unwrap();
        registry.register(Arc::new(list_files::ListFilesTool)).unwrap();
        registry
            .register(Arc::new(bash::BashTool::new(deps.validator.clone())))
            .unwrap();
        registry
            .register(Arc::new(skill::ActivateSkillTool::new(
                deps.store.clone(),
                deps.capabilities.clone(),
            )))
            .unwrap();
        registry
            .register(Arc::new(skill::DeactivateSkillTool::new(deps.store.clone())))
            .unwrap();
        if deps.provider.is_some() {
            registry
                .register(Arc::new(task::TaskTool::new(deps.clone())))
                .unwrap();
        }
        registry
    }

    /// Register a tool. Names are unique; re-registering is an error.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().expect("tool registry lock poisoned");
        if tools.contains_key(&name) {
            bail!("tool already registered: {}", name);
        }
        tools.insert(name, tool);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        let mut tools = self.tools.write().expect("tool registry lock poisoned");
        if tools.remove(name).is_none() {
            bail!("tool not registered: {}", name);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .expect("tool registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Tool definitions for the provider request, sorted by name for a
    /// stable prompt.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let tools = self.tools.read().expect("tool registry lock poisoned");
        let mut specs: Vec<ToolSpec> = tools
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// New registry containing only the named tools (sub-agent restriction).
    pub fn restricted(&self, names: &[String]) -> Self {
        let tools = self.tools.read().expect("tool registry lock poisoned");
        let filtered: HashMap<String, Arc<dyn Tool>> = tools
            .iter()
            .filter(|(name, _)| names.iter().any(|n| n == *name))
            .map(|(name, tool)| (name.clone(), tool.clone()))
            .collect();
        Self {
            tools: RwLock::new(filtered),
        }
    }

    /// Validate input against a tool's JSON-schema subset: required fields
    /// must be present and primitive types must match.
    pub fn validate_input(&self, name: &str, input: &Value) -> Result<()> {
        let tool = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("tool not found: {}", name))?;
        validate_against_schema(&tool.parameters(), input)
    }

    /// Dispatch one tool call: lookup, input validation, execution. Every
    /// failure becomes an error-flagged result paired with the call ID so
    /// the model can self-correct.
    pub async fn dispatch(&self, call: &ToolCall, ctx: &SessionContext) -> ToolResultMessage {
        let outcome = match self.get(&call.name) {
            None => ToolOutcome::error(format!("tool not found: {}", call.name)),
            Some(tool) => {
                if let Err(e) = validate_against_schema(&tool.parameters(), &call.input) {
                    ToolOutcome::error(format!("invalid input for {}: {}", call.name, e))
                } else {
                    match tool.execute(call.input.clone(), ctx).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!("tool {} execution error: {}", call.name, e);
                            ToolOutcome::error(format!("tool error: {}", e))
                        }
                    }
                }
            }
        };

        ToolResultMessage {
            tool_id: call.id.clone(),
            text: outcome.output,
            is_error: outcome.is_error,
            thought_signature: call.thought_signature.clone(),
        }
    }
}

fn validate_against_schema(schema: &Value, input: &Value) -> Result<()> {
    let Some(input_obj) = input.as_object() else {
        bail!("input must be a JSON object");
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required {
            let Some(field) = field.as_str() else { continue };
            if !input_obj.contains_key(field) {
                bail!("missing required field: {}", field);
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, value) in input_obj {
            let Some(prop) = props.get(key) else { continue };
            let Some(expected) = prop.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                bail!("field {} must be of type {}", key, expected);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo the input back"
        }
        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "count": {"type": "integer"}
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, args: Value, _ctx: &SessionContext) -> Result<ToolOutcome> {
            Ok(ToolOutcome::success(
                args.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            ))
        }
    }

    fn ctx() -> SessionContext {
        SessionContext::new("s-test", "/tmp")
    }

    fn call(name: &str, input: Value) -> ToolCall {
        ToolCall {
            id: "tu_1".to_string(),
            name: name.to_string(),
            input,
            thought_signature: None,
        }
    }

    #[test]
    fn test_register_unique_names() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        assert!(registry.register(Arc::new(EchoTool)).is_err());
    }

    #[test]
    fn test_unregister() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        registry.unregister("echo").unwrap();
        assert!(registry.get("echo").is_none());
        assert!(registry.unregister("echo").is_err());
    }

    #[test]
    fn test_specs_sorted() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let specs = registry.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "echo");
        assert!(specs[0].input_schema.get("properties").is_some());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let registry = ToolRegistry::new();
        let result = registry.dispatch(&call("nope", json!({})), &ctx()).await;
        assert!(result.is_error);
        assert!(result.text.contains("tool not found"));
        assert_eq!(result.tool_id, "tu_1");
    }

    #[tokio::test]
    async fn test_dispatch_missing_required() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let result = registry.dispatch(&call("echo", json!({})), &ctx()).await;
        assert!(result.is_error);
        assert!(result.text.contains("missing required field: text"));
    }

    #[tokio::test]
    async fn test_dispatch_wrong_type() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let result = registry
            .dispatch(&call("echo", json!({"text": "hi", "count": "three"})), &ctx())
            .await;
        assert!(result.is_error);
        assert!(result.text.contains("must be of type integer"));
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let result = registry
            .dispatch(&call("echo", json!({"text": "hello"})), &ctx())
            .await;
        assert!(!result.is_error);
        assert_eq!(result.text, "hello");
    }

    #[tokio::test]
    async fn test_dispatch_preserves_thought_signature() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let mut c = call("echo", json!({"text": "x"}));
        c.thought_signature = Some("ts-1".to_string());
        let result = registry.dispatch(&c, &ctx()).await;
        assert_eq!(result.thought_signature.as_deref(), Some("ts-1"));
    }

    #[test]
    fn test_restricted() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let sub = registry.restricted(&["echo".to_string(), "ghost".to_string()]);
        assert_eq!(sub.names(), vec!["echo"]);
        let none = registry.restricted(&[]);
        assert!(none.names().is_empty());
    }

    #[test]
    fn test_validate_input_non_object() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        assert!(registry.validate_input("echo", &json!("just a string")).is_err());
        assert!(registry.validate_input("echo", &json!({"text": "ok"})).is_ok());
    }
}
