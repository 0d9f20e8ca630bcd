use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{Tool, ToolOutcome};
use crate::context::SessionContext;
use crate::session::SessionStore;
use crate::skills::CapabilityRegistry;

/// Activate a discovered skill for the current session. The skill's
/// SKILL.md contents become available for the model to read on demand.
pub struct ActivateSkillTool {
    store: Arc<SessionStore>,
    capabilities: Arc<CapabilityRegistry>,
}

impl ActivateSkillTool {
    pub fn new(store: Arc<SessionStore>, capabilities: Arc<CapabilityRegistry>) -> Self {
        Self {
            store,
            capabilities,
        }
    }
}

#[async_trait]
impl Tool for ActivateSkillTool {
    fn name(&self) -> &str {
        "activate_skill"
    }

    fn description(&self) -> &str {
        "Activate a skill by name for this session. Read its SKILL.md location for instructions."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Skill name as listed in the system prompt"
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, args: Value, ctx: &SessionContext) -> Result<ToolOutcome> {
        let name = args
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("activate_skill: missing 'name' argument"))?;

        let Some(skill) = self.capabilities.skills().into_iter().find(|s| s.name == name) else {
            let known: Vec<String> =
                self.capabilities.skills().into_iter().map(|s| s.name).collect();
            return Ok(ToolOutcome::error(format!(
                "unknown skill: {} (available: {})",
                name,
                known.join(", ")
            )));
        };

        let newly = self.store.activate_skill(ctx.session_id(), name)?;
        if newly {
            Ok(ToolOutcome::success(format!(
                "skill {} activated; instructions at {}",
                name,
                skill.location.display()
            )))
        } else {
            Ok(ToolOutcome::success(format!("skill {} was already active", name)))
        }
    }
}

/// Deactivate a previously activated skill.
pub struct DeactivateSkillTool {
    store: Arc<SessionStore>,
}

impl DeactivateSkillTool {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for DeactivateSkillTool {
    fn name(&self) -> &str {
        "deactivate_skill"
    }

    fn description(&self) -> &str {
        "Deactivate a skill previously activated in this session."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Skill name to deactivate"
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, args: Value, ctx: &SessionContext) -> Result<ToolOutcome> {
        let name = args
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("deactivate_skill: missing 'name' argument"))?;

        if self.store.deactivate_skill(ctx.session_id(), name)? {
            Ok(ToolOutcome::success(format!("skill {} deactivated", name)))
        } else {
            Ok(ToolOutcome::error(format!("skill {} was not active", name)))
        }
    }
}
