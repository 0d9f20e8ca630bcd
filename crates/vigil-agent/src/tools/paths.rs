use anyhow::{bail, Context, Result};
use std::path::{Component, Path, PathBuf};

use super::ToolOutcome;
use crate::context::{SessionContext, SessionMode};

/// Characters that have no business in a file path handed to a tool.
const FORBIDDEN_CHARS: [char; 7] = ['\0', ';', '|', '&', '<', '>', '`'];

/// Resolve a user-supplied path against the configured root. Rejects null
/// bytes, shell metacharacters, `..` traversal and absolute paths that
/// escape the root.
pub fn resolve_safe_path(root: &Path, user_path: &str) -> Result<PathBuf> {
    if user_path.is_empty() {
        bail!("path must not be empty");
    }
    if let Some(bad) = user_path.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        bail!("path contains forbidden character {:?}", bad);
    }

    let path = Path::new(user_path);
    for component in path.components() {
        if matches!(component, Component::ParentDir) {
            bail!("path traversal denied: `..` is not allowed");
        }
    }

    let root = root
        .canonicalize()
        .with_context(|| format!("root directory not accessible: {}", root.display()))?;

    let target = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };

    if !target.starts_with(&root) {
        bail!("path escapes the allowed root: {}", user_path);
    }
    Ok(target)
}

/// Plan-mode gate for mutating tools. Writes anywhere but the plan file
/// come back as an error instructing the model to use the plan instead.
pub fn plan_mode_guard(ctx: &SessionContext, target: &str) -> Option<ToolOutcome> {
    if ctx.mode() != SessionMode::Plan {
        return None;
    }
    let plan_path = ctx.plan_path()?;

    let root = ctx.root_dir();
    let resolved_target = resolve_safe_path(root, target).ok()?;
    let resolved_plan = match plan_path.to_str().and_then(|p| resolve_safe_path(root, p).ok()) {
        Some(p) => p,
        None => plan_path.to_path_buf(),
    };

    if resolved_target == resolved_plan {
        return None;
    }
    Some(ToolOutcome::error(format!(
        "session is in plan mode: do not modify {}. Write your plan to {} instead, \
         then ask to leave plan mode before making changes.",
        target,
        plan_path.display(),
    )))
}
