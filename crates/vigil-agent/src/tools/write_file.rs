use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::paths::{plan_mode_guard, resolve_safe_path};
use super::{Tool, ToolOutcome};
use crate::context::SessionContext;

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. Overwrites existing content."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the investigation root"
                },
                "content": {
                    "type": "string",
                    "description": "Full content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &SessionContext) -> Result<ToolOutcome> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("write_file: missing 'path' argument"))?;
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("write_file: missing 'content' argument"))?;

        if let Some(blocked) = plan_mode_guard(ctx, path) {
            return Ok(blocked);
        }

        let safe_path = match resolve_safe_path(ctx.root_dir(), path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(format!("{}", e))),
        };

        if let Some(parent) = safe_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolOutcome::error(format!(
                    "failed to create parent directories: {}",
                    e
                )));
            }
        }

        match tokio::fs::write(&safe_path, content).await {
            Ok(()) => Ok(ToolOutcome::success(format!(
                "wrote {} bytes to {}",
                content.len(),
                path
            ))),
            Err(e) => Ok(ToolOutcome::error(format!("failed to write {}: {}", path, e))),
        }
    }
}
