use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{SessionContext, SessionMode};
use crate::conversation::Message;
use crate::llm::{AiProvider, ChunkFn};
use crate::prompt;
use crate::session::{Session, SessionStore};
use crate::skills::CapabilityRegistry;
use crate::tools::ToolRegistry;

const MAX_STEP_BUDGET: usize = 100;
const MAX_DEADLINE: Duration = Duration::from_secs(3600);
/// Max characters of one tool result sent back to the model; longer
/// output keeps its head and tail.
const MAX_TOOL_RESULT_CHARS: usize = 32_000;

/// Derived runner view of the canonical investigation config.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// LLM↔tool iterations before the loop is forced to stop.
    pub step_budget: usize,
    /// Wall-clock deadline for the whole run.
    pub deadline: Duration,
    /// Root directory file tools are confined to.
    pub root_dir: PathBuf,
    /// Extended-thinking token budget, when enabled.
    pub thinking_budget: Option<u32>,
    /// Consecutive all-error tool rounds before the loop escalates.
    pub error_escalate: u32,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            step_budget: 25,
            deadline: Duration::from_secs(900),
            root_dir: PathBuf::from("."),
            thinking_budget: None,
            error_escalate: 3,
        }
    }
}

impl RunnerOptions {
    pub fn from_config(config: &vigil_core::config::InvestigationConfig) -> Self {
        Self {
            step_budget: config.max_actions.min(MAX_STEP_BUDGET),
            deadline: config.max_duration().min(MAX_DEADLINE),
            root_dir: config
                .allowed_directories
                .first()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            thinking_budget: None,
            error_escalate: config.error_escalate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The model produced a final, tool-free response.
    Completed,
    Budget,
    Timeout,
    Cancelled,
    /// Too many consecutive all-error tool rounds; a human should look.
    Escalated,
}

impl TerminationReason {
    fn note(&self) -> &'static str {
        match self {
            TerminationReason::Completed => "",
            TerminationReason::Budget => "(investigation incomplete: step budget exhausted)",
            TerminationReason::Timeout => "(investigation incomplete: deadline exceeded)",
            TerminationReason::Cancelled => "(investigation incomplete: cancelled)",
            TerminationReason::Escalated => {
                "(investigation incomplete: repeated tool failures, escalating to a human)"
            }
        }
    }
}

/// Truncate oversized tool output, keeping the head and tail.
fn truncate_tool_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_RESULT_CHARS {
        return output.to_string();
    }
    let head = MAX_TOOL_RESULT_CHARS * 3 / 4;
    let tail = MAX_TOOL_RESULT_CHARS / 4;
    let omitted = output.len() - head - tail;
    let head_end = (0..=head).rev().find(|&i| output.is_char_boundary(i)).unwrap_or(0);
    let tail_start = (output.len() - tail..output.len())
        .find(|&i| output.is_char_boundary(i))
        .unwrap_or(output.len());
    format!(
        "{}\n\n... [{} chars truncated] ...\n\n{}",
        &output[..head_end],
        omitted,
        &output[tail_start..]
    )
}

/// Outcome of one investigation run.
#[derive(Debug)]
pub struct LoopOutcome {
    pub final_text: String,
    pub steps: usize,
    pub terminated: TerminationReason,
}

enum CallMode<'a> {
    Blocking,
    Streaming {
        on_text: ChunkFn<'a>,
        on_thinking: Option<ChunkFn<'a>>,
    },
}

/// Drive the LLM to a terminal (no-tool) response, executing every tool
/// call it produces along the way. `user_prompt` is omitted when resuming
/// a conversation that already ends in tool results.
#[allow(clippy::too_many_arguments)]
pub async fn run_investigation(
    provider: &dyn AiProvider,
    store: &SessionStore,
    session_id: &str,
    user_prompt: Option<&str>,
    tools: &ToolRegistry,
    capabilities: &CapabilityRegistry,
    opts: &RunnerOptions,
    cancel_token: Option<CancellationToken>,
) -> Result<LoopOutcome> {
    run_loop(
        provider,
        store,
        session_id,
        user_prompt,
        tools,
        capabilities,
        opts,
        cancel_token,
        CallMode::Blocking,
    )
    .await
}

/// Streaming variant: identical semantics, but the provider is invoked in
/// streaming mode and the chunk callbacks fire as deltas arrive. The
/// callbacks never mutate the conversation.
#[allow(clippy::too_many_arguments)]
pub async fn run_investigation_streaming(
    provider: &dyn AiProvider,
    store: &SessionStore,
    session_id: &str,
    user_prompt: Option<&str>,
    tools: &ToolRegistry,
    capabilities: &CapabilityRegistry,
    opts: &RunnerOptions,
    cancel_token: Option<CancellationToken>,
    on_text: ChunkFn<'_>,
    on_thinking: Option<ChunkFn<'_>>,
) -> Result<LoopOutcome> {
    run_loop(
        provider,
        store,
        session_id,
        user_prompt,
        tools,
        capabilities,
        opts,
        cancel_token,
        CallMode::Streaming {
            on_text,
            on_thinking,
        },
    )
    .await
}

fn context_from(session: &Session, opts: &RunnerOptions) -> SessionContext {
    let mut ctx = SessionContext::new(&session.session_id, &opts.root_dir);
    if session.mode == SessionMode::Plan {
        let plan = session
            .plan_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!(".agent/plans/{}.md", session.session_id)));
        ctx = ctx.with_plan(plan);
    }
    if let Some(prompt) = &session.custom_system_prompt {
        ctx = ctx.with_custom_system_prompt(prompt);
    }
    if let Some(budget) = opts.thinking_budget {
        ctx = ctx.with_thinking(budget);
    }
    ctx
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    provider: &dyn AiProvider,
    store: &SessionStore,
    session_id: &str,
    user_prompt: Option<&str>,
    tools: &ToolRegistry,
    capabilities: &CapabilityRegistry,
    opts: &RunnerOptions,
    cancel_token: Option<CancellationToken>,
    mode: CallMode<'_>,
) -> Result<LoopOutcome> {
    let t_start = Instant::now();

    if let Some(prompt) = user_prompt {
        store.append_user_message(session_id, prompt)?;
    }

    let tool_specs = tools.specs();
    let mut steps = 0usize;
    let mut consecutive_error_rounds = 0u32;

    let finish = |reason: TerminationReason, steps: usize| -> Result<LoopOutcome> {
        let note = reason.note();
        store
            .append_assistant_message(session_id, Message::assistant(note))
            .with_context(|| format!("failed to append termination note for {}", session_id))?;
        warn!(session_id, ?reason, steps, "investigation terminated early");
        Ok(LoopOutcome {
            final_text: note.to_string(),
            steps,
            terminated: reason,
        })
    };

    loop {
        if let Some(ct) = &cancel_token {
            if ct.is_cancelled() {
                return finish(TerminationReason::Cancelled, steps);
            }
        }
        if t_start.elapsed() >= opts.deadline {
            return finish(TerminationReason::Timeout, steps);
        }

        // Re-snapshot each round: tools may have switched the session's
        // mode or prompt mid-investigation.
        let session = store.snapshot(session_id)?;
        let ctx = context_from(&session, opts);
        let system_prompt = prompt::system_prompt_for(&ctx, capabilities);
        let messages = session.conversation.messages().to_vec();

        debug!(
            session_id,
            step = steps,
            messages = messages.len(),
            "requesting completion"
        );

        let call = async {
            match &mode {
                CallMode::Blocking => {
                    provider
                        .complete(&system_prompt, &messages, &tool_specs, ctx.thinking())
                        .await
                }
                CallMode::Streaming {
                    on_text,
                    on_thinking,
                } => {
                    provider
                        .complete_streaming(
                            &system_prompt,
                            &messages,
                            &tool_specs,
                            ctx.thinking(),
                            *on_text,
                            *on_thinking,
                        )
                        .await
                }
            }
        };

        let (assistant, _usage) = if let Some(ct) = &cancel_token {
            tokio::select! {
                result = call => result,
                _ = ct.cancelled() => {
                    return finish(TerminationReason::Cancelled, steps);
                }
            }
        } else {
            call.await
        }
        .with_context(|| format!("provider call failed on step {}", steps + 1))?;

        let tool_calls = assistant.tool_calls.clone();
        let final_text = assistant.content.clone();
        store.append_assistant_message(session_id, assistant)?;

        if tool_calls.is_empty() {
            info!(
                session_id,
                steps,
                elapsed_ms = t_start.elapsed().as_millis() as u64,
                "investigation complete"
            );
            return Ok(LoopOutcome {
                final_text,
                steps,
                terminated: TerminationReason::Completed,
            });
        }

        // Dispatch in call order; every call gets exactly one result and
        // all results travel in a single user message.
        let mut results = Vec::with_capacity(tool_calls.len());
        for call in &tool_calls {
            debug!(session_id, tool = %call.name, call_id = %call.id, "dispatching tool");
            let mut result = tools.dispatch(call, &ctx).await;
            if result.is_error {
                warn!(session_id, tool = %call.name, "tool returned error: {}", result.text);
            }
            result.text = truncate_tool_output(&result.text);
            results.push(result);
        }
        let all_errors = results.iter().all(|r| r.is_error);
        store.append_tool_results(session_id, results)?;

        if all_errors {
            consecutive_error_rounds += 1;
            if opts.error_escalate > 0 && consecutive_error_rounds >= opts.error_escalate {
                return finish(TerminationReason::Escalated, steps + 1);
            }
        } else {
            consecutive_error_rounds = 0;
        }

        steps += 1;
        if steps >= opts.step_budget {
            return finish(TerminationReason::Budget, steps);
        }
        if t_start.elapsed() >= opts.deadline {
            return finish(TerminationReason::Timeout, steps);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ThinkingConfig;
    use crate::conversation::{Role, ToolCall};
    use crate::llm::{ProviderUsage, ToolSpec};
    use crate::safety::{CommandValidator, SafetyMode};
    use crate::tools::ToolDeps;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Mock provider that replays a scripted sequence of responses. Past
    /// the end of the script it keeps issuing the fallback tool call.
    struct ScriptedProvider {
        script: Vec<Message>,
        cursor: AtomicUsize,
        delay: Duration,
        fallback_call: Option<ToolCall>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Message>) -> Self {
            Self {
                script,
                cursor: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fallback_call: None,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn with_script_fallback(mut self, call: ToolCall) -> Self {
            self.fallback_call = Some(call);
            self
        }
    }

    #[async_trait]
    impl AiProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _system_prompt: &str,
            _messages: &[Message],
            _tools: &[ToolSpec],
            _thinking: Option<&ThinkingConfig>,
        ) -> Result<(Message, ProviderUsage)> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
            let msg = self.script.get(idx).cloned().unwrap_or_else(|| {
                let call = self
                    .fallback_call
                    .clone()
                    .unwrap_or_else(|| bash_call("tu_loop"));
                Message::assistant_with_tools("", vec![call], vec![])
            });
            Ok((msg, ProviderUsage::default()))
        }
    }

    fn bash_call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "bash".to_string(),
            input: serde_json::json!({"command": "echo probe"}),
            thought_signature: None,
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<SessionStore>,
        tools: ToolRegistry,
        capabilities: CapabilityRegistry,
        opts: RunnerOptions,
        session_id: String,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SessionStore::new());
        let session_id = store.start(None).unwrap();
        let capabilities = CapabilityRegistry::with_paths(
            vec![PathBuf::from("/nonexistent")],
            vec![PathBuf::from("/nonexistent")],
        );
        let deps = ToolDeps {
            store: store.clone(),
            validator: Arc::new(CommandValidator::new(SafetyMode::Blacklist, false)),
            capabilities: Arc::new(CapabilityRegistry::with_paths(vec![], vec![])),
            provider: None,
        };
        let tools = ToolRegistry::with_defaults(&deps);
        let opts = RunnerOptions {
            root_dir: dir.path().to_path_buf(),
            ..RunnerOptions::default()
        };
        Harness {
            _dir: dir,
            store,
            tools,
            capabilities,
            opts,
            session_id,
        }
    }

    #[tokio::test]
    async fn test_terminates_on_text_response() {
        let h = harness();
        let provider = ScriptedProvider::new(vec![Message::assistant("root cause: full disk")]);

        let outcome = run_investigation(
            &provider,
            &h.store,
            &h.session_id,
            Some("investigate the alert"),
            &h.tools,
            &h.capabilities,
            &h.opts,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.terminated, TerminationReason::Completed);
        assert_eq!(outcome.final_text, "root cause: full disk");
        assert_eq!(outcome.steps, 0);

        let snap = h.store.snapshot(&h.session_id).unwrap();
        assert_eq!(snap.conversation.message_count(), 2); // user + assistant
    }

    #[tokio::test]
    async fn test_tool_round_then_completion() {
        let h = harness();
        let provider = ScriptedProvider::new(vec![
            Message::assistant_with_tools("", vec![bash_call("tu_1")], vec![]),
            Message::assistant("done"),
        ]);

        let outcome = run_investigation(
            &provider,
            &h.store,
            &h.session_id,
            Some("check uptime"),
            &h.tools,
            &h.capabilities,
            &h.opts,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.terminated, TerminationReason::Completed);
        assert_eq!(outcome.steps, 1);

        let snap = h.store.snapshot(&h.session_id).unwrap();
        let messages = snap.conversation.messages();
        // user, assistant(tool), user(results), assistant(final)
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, Role::User);
        assert_eq!(messages[2].tool_results.len(), 1);
        assert_eq!(messages[2].tool_results[0].tool_id, "tu_1");
        assert!(!messages[2].tool_results[0].is_error);
        assert!(messages[2].tool_results[0].text.contains("probe"));
    }

    #[tokio::test]
    async fn test_tool_error_continues_loop() {
        let h = harness();
        let provider = ScriptedProvider::new(vec![
            Message::assistant_with_tools(
                "",
                vec![ToolCall {
                    id: "tu_bad".to_string(),
                    name: "bash".to_string(),
                    input: serde_json::json!({"command": "rm -rf /"}),
                    thought_signature: None,
                }],
                vec![],
            ),
            Message::assistant("switching to a read-only check"),
        ]);

        let outcome = run_investigation(
            &provider,
            &h.store,
            &h.session_id,
            Some("clean the disk"),
            &h.tools,
            &h.capabilities,
            &h.opts,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.terminated, TerminationReason::Completed);
        let snap = h.store.snapshot(&h.session_id).unwrap();
        let result = &snap.conversation.messages()[2].tool_results[0];
        assert!(result.is_error);
        assert!(result.text.contains("destructive rm command"));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_result() {
        let h = harness();
        let provider = ScriptedProvider::new(vec![
            Message::assistant_with_tools(
                "",
                vec![ToolCall {
                    id: "tu_x".to_string(),
                    name: "teleport".to_string(),
                    input: serde_json::json!({}),
                    thought_signature: None,
                }],
                vec![],
            ),
            Message::assistant("ok"),
        ]);

        run_investigation(
            &provider,
            &h.store,
            &h.session_id,
            Some("go"),
            &h.tools,
            &h.capabilities,
            &h.opts,
            None,
        )
        .await
        .unwrap();

        let snap = h.store.snapshot(&h.session_id).unwrap();
        let result = &snap.conversation.messages()[2].tool_results[0];
        assert!(result.is_error);
        assert!(result.text.contains("tool not found"));
    }

    #[tokio::test]
    async fn test_step_budget_appends_note() {
        let h = harness();
        // Empty script: the provider keeps asking for tools forever.
        let provider = ScriptedProvider::new(vec![]);
        let opts = RunnerOptions {
            step_budget: 3,
            ..h.opts.clone()
        };

        let outcome = run_investigation(
            &provider,
            &h.store,
            &h.session_id,
            Some("never ends"),
            &h.tools,
            &h.capabilities,
            &opts,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.terminated, TerminationReason::Budget);
        assert_eq!(outcome.steps, 3);
        assert!(outcome.final_text.contains("investigation incomplete"));
        assert!(outcome.final_text.contains("budget"));

        let snap = h.store.snapshot(&h.session_id).unwrap();
        let last = snap.conversation.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.contains("investigation incomplete"));
    }

    #[tokio::test]
    async fn test_deadline_terminates() {
        let h = harness();
        let provider =
            ScriptedProvider::new(vec![]).with_delay(Duration::from_millis(80));
        let opts = RunnerOptions {
            deadline: Duration::from_millis(50),
            ..h.opts.clone()
        };

        let outcome = run_investigation(
            &provider,
            &h.store,
            &h.session_id,
            Some("slow"),
            &h.tools,
            &h.capabilities,
            &opts,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.terminated, TerminationReason::Timeout);
        assert!(outcome.final_text.contains("deadline"));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_run() {
        let h = harness();
        let provider =
            ScriptedProvider::new(vec![Message::assistant("late")]).with_delay(Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let ct = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ct.cancel();
        });

        let t = Instant::now();
        let outcome = run_investigation(
            &provider,
            &h.store,
            &h.session_id,
            Some("hello"),
            &h.tools,
            &h.capabilities,
            &h.opts,
            Some(cancel),
        )
        .await
        .unwrap();

        assert_eq!(outcome.terminated, TerminationReason::Cancelled);
        assert!(t.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_streaming_callbacks_observe_chunks() {
        use std::sync::Mutex;
        let h = harness();
        let provider = ScriptedProvider::new(vec![Message::assistant("streamed answer")]);
        let chunks: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let on_text = |c: &str| chunks.lock().unwrap().push(c.to_string());

        let outcome = run_investigation_streaming(
            &provider,
            &h.store,
            &h.session_id,
            Some("stream it"),
            &h.tools,
            &h.capabilities,
            &h.opts,
            None,
            &on_text,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.final_text, "streamed answer");
        // Default streaming falls back to one chunk with the whole text.
        assert_eq!(*chunks.lock().unwrap(), vec!["streamed answer"]);
    }

    #[tokio::test]
    async fn test_repeated_tool_failures_escalate() {
        let h = harness();
        // The provider asks for an unknown tool forever: every round is an
        // all-error round.
        let provider = ScriptedProvider::new(vec![]).with_script_fallback(ToolCall {
            id: "tu_missing".to_string(),
            name: "teleport".to_string(),
            input: serde_json::json!({}),
            thought_signature: None,
        });
        let opts = RunnerOptions {
            error_escalate: 2,
            ..h.opts.clone()
        };

        let outcome = run_investigation(
            &provider,
            &h.store,
            &h.session_id,
            Some("doomed"),
            &h.tools,
            &h.capabilities,
            &opts,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.terminated, TerminationReason::Escalated);
        assert_eq!(outcome.steps, 2);
        assert!(outcome.final_text.contains("escalating"));
    }

    #[tokio::test]
    async fn test_successful_round_resets_error_streak() {
        let h = harness();
        let bad = ToolCall {
            id: "tu_bad".to_string(),
            name: "teleport".to_string(),
            input: serde_json::json!({}),
            thought_signature: None,
        };
        let provider = ScriptedProvider::new(vec![
            Message::assistant_with_tools("", vec![bad.clone()], vec![]),
            Message::assistant_with_tools("", vec![bash_call("tu_ok")], vec![]),
            Message::assistant_with_tools("", vec![bad], vec![]),
            Message::assistant("gave up gracefully"),
        ]);
        let opts = RunnerOptions {
            error_escalate: 2,
            ..h.opts.clone()
        };

        let outcome = run_investigation(
            &provider,
            &h.store,
            &h.session_id,
            Some("flaky"),
            &h.tools,
            &h.capabilities,
            &opts,
            None,
        )
        .await
        .unwrap();

        // One error round, one good round, one error round: never two in
        // a row, so the loop reaches the final text.
        assert_eq!(outcome.terminated, TerminationReason::Completed);
        assert_eq!(outcome.final_text, "gave up gracefully");
    }

    #[test]
    fn test_truncate_tool_output_short() {
        let short = "plenty of room";
        assert_eq!(truncate_tool_output(short), short);
    }

    #[test]
    fn test_truncate_tool_output_long() {
        let long = "x".repeat(50_000);
        let result = truncate_tool_output(&long);
        assert!(result.len() < long.len());
        assert!(result.contains("chars truncated"));
    }

    #[test]
    fn test_runner_options_from_config() {
        let mut config = vigil_core::config::InvestigationConfig::default();
        config.max_actions = 40;
        config.max_duration_secs = 600;
        config.allowed_directories = vec!["/srv/investigations".to_string()];

        let opts = RunnerOptions::from_config(&config);
        assert_eq!(opts.step_budget, 40);
        assert_eq!(opts.deadline, Duration::from_secs(600));
        assert_eq!(opts.root_dir, PathBuf::from("/srv/investigations"));
    }
}
