use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::paths::{plan_mode_guard, resolve_safe_path};
use super::{Tool, ToolOutcome};
use crate::context::SessionContext;

pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact string in a file. The old string must appear exactly once unless replace_all is set."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the investigation root"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence (default: false)"
                }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, args: Value, ctx: &SessionContext) -> Result<ToolOutcome> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("edit_file: missing 'path' argument"))?;
        let old_string = args
            .get("old_string")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("edit_file: missing 'old_string' argument"))?;
        let new_string = args
            .get("new_string")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("edit_file: missing 'new_string' argument"))?;
        let replace_all = args
            .get("replace_all")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if old_string.is_empty() {
            return Ok(ToolOutcome::error("old_string must not be empty"));
        }

        if let Some(blocked) = plan_mode_guard(ctx, path) {
            return Ok(blocked);
        }

        let safe_path = match resolve_safe_path(ctx.root_dir(), path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(format!("{}", e))),
        };

        let content = match tokio::fs::read_to_string(&safe_path).await {
            Ok(c) => c,
            Err(e) => {
                return Ok(ToolOutcome::error(format!("failed to read {}: {}", path, e)))
            }
        };

        let occurrences = content.matches(old_string).count();
        if occurrences == 0 {
            return Ok(ToolOutcome::error(format!(
                "old_string not found in {}",
                path
            )));
        }
        if occurrences > 1 && !replace_all {
            return Ok(ToolOutcome::error(format!(
                "old_string appears {} times in {}; pass replace_all or provide more context",
                occurrences, path
            )));
        }

        let updated = if replace_all {
            content.replace(old_string, new_string)
        } else {
            content.replacen(old_string, new_string, 1)
        };

        match tokio::fs::write(&safe_path, updated).await {
            Ok(()) => Ok(ToolOutcome::success(format!(
                "replaced {} occurrence(s) in {}",
                if replace_all { occurrences } else { 1 },
                path
            ))),
            Err(e) => Ok(ToolOutcome::error(format!("failed to write {}: {}", path, e))),
        }
    }
}
