use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use super::{Tool, ToolOutcome};
use crate::context::{SessionContext, SessionMode};
use crate::safety::CommandValidator;

const MAX_OUTPUT_BYTES: usize = 64 * 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 300;

/// Shell execution gated by the command safety pipeline. Every candidate
/// command passes the validator before it reaches a shell.
pub struct BashTool {
    validator: Arc<CommandValidator>,
}

impl BashTool {
    pub fn new(validator: Arc<CommandValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command in the investigation root and return its output. Commands are safety-checked before execution."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "dangerous": {
                    "type": "boolean",
                    "description": "Set true if this command could modify state or destroy data"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 30, max: 300)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &SessionContext) -> Result<ToolOutcome> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("bash: missing 'command' argument"))?;
        let llm_flagged = args.get("dangerous").and_then(|v| v.as_bool()).unwrap_or(false);

        if ctx.mode() == SessionMode::Plan {
            let plan = ctx
                .plan_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ".agent/plans/<session>.md".to_string());
            return Ok(ToolOutcome::error(format!(
                "session is in plan mode: shell commands are disabled. Write the intended \
                 steps to {} instead.",
                plan
            )));
        }

        let verdict = self.validator.validate(command, llm_flagged);
        if !verdict.allowed {
            let prefix = if verdict.needs_confirm {
                "command requires confirmation"
            } else {
                "command blocked"
            };
            return Ok(ToolOutcome::error(format!("{}: {}", prefix, verdict.reason)));
        }

        let timeout_secs = args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(ctx.root_dir())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let mut stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code().unwrap_or(-1);

                if stdout.len() > MAX_OUTPUT_BYTES {
                    stdout.truncate(MAX_OUTPUT_BYTES);
                    stdout.push_str("\n... (output truncated)");
                }

                let mut text = String::new();
                if !stdout.is_empty() {
                    text.push_str(&stdout);
                }
                if !stderr.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str("[stderr] ");
                    text.push_str(&stderr);
                }
                if text.is_empty() {
                    text = format!("(exit code {})", exit_code);
                } else if exit_code != 0 {
                    text.push_str(&format!("\n(exit code {})", exit_code));
                }

                if exit_code == 0 {
                    Ok(ToolOutcome::success(text))
                } else {
                    Ok(ToolOutcome::error(text))
                }
            }
            Ok(Err(e)) => Ok(ToolOutcome::error(format!("bash failed: {}", e))),
            Err(_) => Ok(ToolOutcome::error(format!(
                "bash timed out after {}s",
                timeout_secs
            ))),
        }
    }
}
