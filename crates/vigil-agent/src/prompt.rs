use crate::context::{SessionContext, SessionMode};
use crate::skills::CapabilityRegistry;

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an autonomous incident investigator. An alert from a monitoring \
system triggered this session. Investigate the alert using the available \
tools: read logs and configuration, run read-only diagnostics, and narrow \
down the root cause. Prefer observation over mutation; destructive \
commands are refused by the safety layer. When you have enough evidence, \
stop calling tools and reply with a concise conclusion: what happened, \
the evidence, and a recommended remediation.";

const PLAN_MODE_PROMPT: &str = "\
You are an autonomous incident investigator in PLAN MODE. Do not change \
anything yet: investigate read-only and write your proposed remediation \
steps to the plan file. Mutating tools are disabled except for edits to \
the plan file itself.";

/// Choose the system prompt at provider-call time.
/// Priority: custom prompt > plan-mode prompt > default prompt with the
/// discovered skill/agent metadata appended.
pub fn system_prompt_for(ctx: &SessionContext, capabilities: &CapabilityRegistry) -> String {
    if let Some(custom) = ctx.custom_system_prompt() {
        return custom.to_string();
    }

    if ctx.mode() == SessionMode::Plan {
        let mut prompt = PLAN_MODE_PROMPT.to_string();
        if let Some(plan) = ctx.plan_path() {
            prompt.push_str(&format!("\n\nPlan file: {}", plan.display()));
        }
        return prompt;
    }

    let mut prompt = DEFAULT_SYSTEM_PROMPT.to_string();
    let block = capabilities.prompt_block();
    if !block.is_empty() {
        prompt.push_str("\n\nAvailable capabilities:\n");
        prompt.push_str(&block);
    }
    prompt
}
