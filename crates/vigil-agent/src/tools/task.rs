use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{Tool, ToolDeps, ToolOutcome};
use crate::context::{SessionContext, SessionMode};
use crate::subagent;

/// Delegate a focused subtask to a named sub-agent. The sub-agent runs a
/// nested loop on a fresh session with its own restricted tool set; its
/// final text becomes this tool's result.
pub struct TaskTool {
    deps: ToolDeps,
}

impl TaskTool {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Delegate a subtask to a named sub-agent listed in the system prompt. Returns the sub-agent's final answer."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "description": "Name of the sub-agent to run"
                },
                "task": {
                    "type": "string",
                    "description": "The subtask to complete"
                }
            },
            "required": ["agent", "task"]
        })
    }

    async fn execute(&self, args: Value, ctx: &SessionContext) -> Result<ToolOutcome> {
        let agent_name = args
            .get("agent")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("task: missing 'agent' argument"))?;
        let task = args
            .get("task")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("task: missing 'task' argument"))?;

        if ctx.mode() == SessionMode::Plan {
            return Ok(ToolOutcome::error(
                "session is in plan mode: delegate after the plan is approved",
            ));
        }

        let Some(agent) = self.deps.capabilities.find_agent(agent_name) else {
            let known = self.deps.capabilities.agent_names();
            return Ok(ToolOutcome::error(format!(
                "unknown sub-agent: {} (available: {})",
                agent_name,
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            )));
        };

        match subagent::run_subagent(&self.deps, &agent, task, ctx.root_dir(), None).await {
            Ok(text) => Ok(ToolOutcome::success(text)),
            Err(e) => Ok(ToolOutcome::error(format!("sub-agent failed: {}", e))),
        }
    }
}
