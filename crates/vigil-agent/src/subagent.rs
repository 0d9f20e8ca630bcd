//! Sub-agent execution — lets the investigation delegate a focused
//! subtask to an isolated nested run-loop.
//!
//! A sub-agent runs on a fresh session with a restricted tool set (never
//! including `task`, so sub-agents cannot delegate further) and the same
//! provider as the parent. Its final text becomes the tool result.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::runtime::{run_investigation, RunnerOptions};
use crate::skills::SubagentInfo;
use crate::tools::{ToolDeps, ToolRegistry};

const SUBAGENT_STEP_BUDGET: usize = 15;
const SUBAGENT_DEADLINE: Duration = Duration::from_secs(300);

/// Run one sub-agent task to completion and return its final text.
/// The parent's cancellation token is inherited.
pub async fn run_subagent(
    deps: &ToolDeps,
    agent: &SubagentInfo,
    task: &str,
    root_dir: &Path,
    cancel_token: Option<CancellationToken>,
) -> Result<String> {
    let provider = deps
        .provider
        .as_ref()
        .context("sub-agent execution requires a provider")?;

    info!(agent = %agent.name, "starting sub-agent task");

    // Fresh session, fresh tool set without `task`.
    let session_id = deps
        .store
        .start(Some(&format!("subagent-{}-{}", agent.name, uuid::Uuid::new_v4())))?;

    let sub_deps = ToolDeps {
        provider: None,
        ..deps.clone()
    };
    let registry = ToolRegistry::with_defaults(&sub_deps);
    let registry = if agent.tools.is_empty() {
        registry
    } else {
        registry.restricted(&agent.tools)
    };

    let opts = RunnerOptions {
        step_budget: SUBAGENT_STEP_BUDGET,
        deadline: SUBAGENT_DEADLINE,
        root_dir: root_dir.to_path_buf(),
        thinking_budget: None,
        ..RunnerOptions::default()
    };

    let mut prompt = format!(
        "You are the {} sub-agent working one focused subtask of a larger \
         investigation. Complete the task and reply with a clear result; do \
         not ask questions.\n\nTask: {}",
        agent.name, task
    );
    if !agent.prompt.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&agent.prompt);
    }

    let outcome = run_investigation(
        provider.as_ref(),
        &deps.store,
        &session_id,
        Some(&prompt),
        &registry,
        &deps.capabilities,
        &opts,
        cancel_token,
    )
    .await;

    // The nested session is throwaway; drop it regardless of outcome.
    let _ = deps.store.end(&session_id);

    let outcome = outcome?;
    info!(
        agent = %agent.name,
        steps = outcome.steps,
        "sub-agent task finished"
    );
    Ok(outcome.final_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ThinkingConfig;
    use crate::conversation::Message;
    use crate::llm::{AiProvider, ProviderUsage, ToolSpec};
    use crate::safety::{CommandValidator, SafetyMode};
    use crate::session::SessionStore;
    use crate::skills::CapabilityRegistry;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct OneShotProvider;

    #[async_trait]
    impl AiProvider for OneShotProvider {
        fn name(&self) -> &str {
            "one-shot"
        }

        async fn complete(
            &self,
            _system_prompt: &str,
            messages: &[Message],
            tools: &[ToolSpec],
            _thinking: Option<&ThinkingConfig>,
        ) -> Result<(Message, ProviderUsage)> {
            // The restricted registry must not expose `task`.
            assert!(tools.iter().all(|t| t.name != "task"));
            assert!(messages[0].content.contains("Task: count the errors"));
            Ok((Message::assistant("42 errors found"), ProviderUsage::default()))
        }
    }

    fn deps(provider: Option<Arc<dyn AiProvider>>) -> ToolDeps {
        ToolDeps {
            store: Arc::new(SessionStore::new()),
            validator: Arc::new(CommandValidator::new(SafetyMode::Blacklist, false)),
            capabilities: Arc::new(CapabilityRegistry::with_paths(vec![], vec![])),
            provider,
        }
    }

    fn agent(tools: Vec<String>) -> SubagentInfo {
        SubagentInfo {
            name: "log-analyzer".to_string(),
            description: Some("digs through logs".to_string()),
            tools,
            prompt: "Focus on error clusters.".to_string(),
        }
    }

    #[tokio::test]
    async fn test_subagent_runs_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps(Some(Arc::new(OneShotProvider)));

        let result = run_subagent(
            &deps,
            &agent(vec!["read_file".to_string(), "bash".to_string()]),
            "count the errors",
            dir.path(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(result, "42 errors found");
        // The throwaway session is gone.
        assert_eq!(deps.store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_subagent_requires_provider() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps(None);
        let err = run_subagent(&deps, &agent(vec![]), "x", dir.path(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("provider"));
    }
}
