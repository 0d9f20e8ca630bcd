use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use super::paths::resolve_safe_path;
use super::{Tool, ToolOutcome};
use crate::context::SessionContext;

const MAX_ENTRIES: usize = 1000;

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files in a directory. Directories get a trailing slash. The .git directory is pruned unless include_git is set."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the investigation root (default: the root)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Descend into subdirectories (default: false)"
                },
                "include_git": {
                    "type": "boolean",
                    "description": "Include .git directories (default: false)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value, ctx: &SessionContext) -> Result<ToolOutcome> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let recursive = args.get("recursive").and_then(|v| v.as_bool()).unwrap_or(false);
        let include_git = args.get("include_git").and_then(|v| v.as_bool()).unwrap_or(false);

        let safe_path = match resolve_safe_path(ctx.root_dir(), path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(format!("{}", e))),
        };
        if !safe_path.is_dir() {
            return Ok(ToolOutcome::error(format!("not a directory: {}", path)));
        }

        let mut entries = Vec::new();
        let mut truncated = false;
        collect(&safe_path, &safe_path, recursive, include_git, &mut entries, &mut truncated);
        entries.sort();

        let mut output = entries.join("\n");
        if truncated {
            output.push_str(&format!("\n... (listing truncated at {} entries)", MAX_ENTRIES));
        }
        if output.is_empty() {
            output = "(empty directory)".to_string();
        }
        Ok(ToolOutcome::success(output))
    }
}

fn collect(
    base: &Path,
    dir: &Path,
    recursive: bool,
    include_git: bool,
    entries: &mut Vec<String>,
    truncated: &mut bool,
) {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.flatten() {
        if entries.len() >= MAX_ENTRIES {
            *truncated = true;
            return;
        }
        let path = entry.path();
        let name = entry.file_name();
        let is_dir = path.is_dir();

        if is_dir && !include_git && name == ".git" {
            continue;
        }

        let rel = path.strip_prefix(base).unwrap_or(&path);
        if is_dir {
            entries.push(format!("{}/", rel.display()));
            if recursive {
                collect(base, &path, recursive, include_git, entries, truncated);
            }
        } else {
            entries.push(rel.display().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, SessionContext) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        std::fs::write(dir.path().join("README.md"), "x").unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "x").unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "x").unwrap();
        let ctx = SessionContext::new("s", dir.path());
        (dir, ctx)
    }

    #[tokio::test]
    async fn test_flat_listing_prunes_git() {
        let (_dir, ctx) = fixture();
        let out = ListFilesTool
            .execute(serde_json::json!({}), &ctx)
            .await
            .unwrap();
        assert!(!out.is_error);
        assert!(out.output.contains("README.md"));
        assert!(out.output.contains("src/"));
        assert!(!out.output.contains(".git"));
        // Flat listing does not descend.
        assert!(!out.output.contains("main.rs"));
    }

    #[tokio::test]
    async fn test_recursive_listing() {
        let (_dir, ctx) = fixture();
        let out = ListFilesTool
            .execute(serde_json::json!({"recursive": true}), &ctx)
            .await
            .unwrap();
        assert!(out.output.contains("src/main.rs"));
        assert!(!out.output.contains(".git"));
    }

    #[tokio::test]
    async fn test_include_git() {
        let (_dir, ctx) = fixture();
        let out = ListFilesTool
            .execute(serde_json::json!({"recursive": true, "include_git": true}), &ctx)
            .await
            .unwrap();
        assert!(out.output.contains(".git/"));
        assert!(out.output.contains(".git/HEAD"));
    }

    #[tokio::test]
    async fn test_not_a_directory() {
        let (_dir, ctx) = fixture();
        let out = ListFilesTool
            .execute(serde_json::json!({"path": "README.md"}), &ctx)
            .await
            .unwrap();
        assert!(out.is_error);
    }
}
