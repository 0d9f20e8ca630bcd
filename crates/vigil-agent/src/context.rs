use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Session operating mode. In plan mode, mutating tools redirect the LLM
/// to the plan file instead of touching anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Normal,
    Plan,
}

/// Extended-thinking settings forwarded to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingConfig {
    pub budget_tokens: u32,
}

/// Immutable bag of per-invocation values threaded through every tool
/// execution and provider call. Setters derive a new bag; the parent (and
/// any sibling derived from it) keeps its own values.
#[derive(Debug, Clone)]
pub struct SessionContext {
    session_id: String,
    mode: SessionMode,
    plan_path: Option<PathBuf>,
    custom_system_prompt: Option<String>,
    thinking: Option<ThinkingConfig>,
    root_dir: PathBuf,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            mode: SessionMode::Normal,
            plan_path: None,
            custom_system_prompt: None,
            thinking: None,
            root_dir: root_dir.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn plan_path(&self) -> Option<&Path> {
        self.plan_path.as_deref()
    }

    pub fn custom_system_prompt(&self) -> Option<&str> {
        self.custom_system_prompt.as_deref()
    }

    pub fn thinking(&self) -> Option<&ThinkingConfig> {
        self.thinking.as_ref()
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn with_mode(&self, mode: SessionMode) -> Self {
        Self { mode, ..self.clone() }
    }

    /// Enter plan mode with the given plan file path.
    pub fn with_plan(&self, plan_path: impl Into<PathBuf>) -> Self {
        Self {
            mode: SessionMode::Plan,
            plan_path: Some(plan_path.into()),
            ..self.clone()
        }
    }

    pub fn with_custom_system_prompt(&self, prompt: impl Into<String>) -> Self {
        Self {
            custom_system_prompt: Some(prompt.into()),
            ..self.clone()
        }
    }

    pub fn with_thinking(&self, budget_tokens: u32) -> Self {
        Self {
            thinking: Some(ThinkingConfig { budget_tokens }),
            ..self.clone()
        }
    }
}
