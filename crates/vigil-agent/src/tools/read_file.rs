use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::paths::resolve_safe_path;
use super::{Tool, ToolOutcome};
use crate::context::SessionContext;

const MAX_FILE_BYTES: usize = 256 * 1024;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file, numbering each line as 'N: <line>'. Optional start_line/end_line select an inclusive 1-indexed range."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the investigation root"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to read (1-indexed, inclusive)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to read (1-indexed, inclusive)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &SessionContext) -> Result<ToolOutcome> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("read_file: missing 'path' argument"))?;

        let safe_path = match resolve_safe_path(ctx.root_dir(), path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(format!("{}", e))),
        };

        let start_line = args.get("start_line").and_then(|v| v.as_i64());
        let end_line = args.get("end_line").and_then(|v| v.as_i64());

        if let Some(s) = start_line {
            if s < 1 {
                return Ok(ToolOutcome::error("start_line must be >= 1"));
            }
        }
        if let Some(e) = end_line {
            if e < 1 {
                return Ok(ToolOutcome::error("end_line must be >= 1"));
            }
        }
        if let (Some(s), Some(e)) = (start_line, end_line) {
            if s > e {
                return Ok(ToolOutcome::error("start_line must not exceed end_line"));
            }
        }

        let content = match tokio::fs::read_to_string(&safe_path).await {
            Ok(c) => c,
            Err(e) => {
                return Ok(ToolOutcome::error(format!("failed to read {}: {}", path, e)))
            }
        };
        if content.len() > MAX_FILE_BYTES {
            return Ok(ToolOutcome::error(format!(
                "file too large ({} bytes, max {}); use start_line/end_line to read a portion",
                content.len(),
                MAX_FILE_BYTES
            )));
        }

        let lines: Vec<&str> = content.lines().collect();
        let start = start_line.unwrap_or(1) as usize;
        let end = match end_line {
            Some(e) => (e as usize).min(lines.len()),
            None => lines.len(),
        };

        // start past EOF yields empty output rather than an error.
        if start > lines.len() {
            return Ok(ToolOutcome::success(String::new()));
        }

        let numbered: Vec<String> = lines[start - 1..end]
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{}: {}", start + i, line))
            .collect();
        Ok(ToolOutcome::success(numbered.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(dir: &std::path::Path, args: Value) -> ToolOutcome {
        let ctx = SessionContext::new("s-test", dir);
        ReadFileTool.execute(args, &ctx).await.unwrap()
    }

    fn fixture(content: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), content).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_read_whole_file() {
        let dir = fixture("alpha\nbeta\ngamma\n");
        let out = run(dir.path(), serde_json::json!({"path": "f.txt"})).await;
        assert!(!out.is_error);
        assert_eq!(out.output, "1: alpha\n2: beta\n3: gamma");
    }

    #[tokio::test]
    async fn test_single_line_file_range() {
        let dir = fixture("only line\n");
        let out = run(
            dir.path(),
            serde_json::json!({"path": "f.txt", "start_line": 1, "end_line": 1}),
        )
        .await;
        assert!(!out.is_error);
        assert_eq!(out.output, "1: only line");
    }

    #[tokio::test]
    async fn test_blank_lines_preserved() {
        let dir = fixture("a\n\nc\n");
        let out = run(dir.path(), serde_json::json!({"path": "f.txt"})).await;
        assert_eq!(out.output, "1: a\n2: \n3: c");
    }

    #[tokio::test]
    async fn test_inclusive_range() {
        let dir = fixture("1\n2\n3\n4\n5\n");
        let out = run(
            dir.path(),
            serde_json::json!({"path": "f.txt", "start_line": 2, "end_line": 4}),
        )
        .await;
        assert_eq!(out.output, "2: 2\n3: 3\n4: 4");
    }

    #[tokio::test]
    async fn test_start_past_eof_is_empty() {
        let dir = fixture("a\nb\n");
        let out = run(dir.path(), serde_json::json!({"path": "f.txt", "start_line": 10})).await;
        assert!(!out.is_error);
        assert_eq!(out.output, "");
    }

    #[tokio::test]
    async fn test_end_past_eof_clamps() {
        let dir = fixture("a\nb\n");
        let out = run(
            dir.path(),
            serde_json::json!({"path": "f.txt", "start_line": 1, "end_line": 99}),
        )
        .await;
        assert_eq!(out.output, "1: a\n2: b");
    }

    #[tokio::test]
    async fn test_invalid_ranges() {
        let dir = fixture("a\n");
        for args in [
            serde_json::json!({"path": "f.txt", "start_line": 0}),
            serde_json::json!({"path": "f.txt", "end_line": 0}),
            serde_json::json!({"path": "f.txt", "start_line": 3, "end_line": 2}),
        ] {
            let out = run(dir.path(), args).await;
            assert!(out.is_error);
        }
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = fixture("a\n");
        let out = run(dir.path(), serde_json::json!({"path": "ghost.txt"})).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn test_escape_denied() {
        let dir = fixture("a\n");
        let out = run(dir.path(), serde_json::json!({"path": "../../etc/passwd"})).await;
        assert!(out.is_error);
        assert!(out.output.contains("traversal"));
    }
}
