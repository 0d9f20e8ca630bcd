use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Message types ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Opaque reasoning artifact from providers with extended thinking.
/// The signature must be replayed byte-exact; thinking blocks precede
/// text and tool blocks whenever a message is sent back to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub thinking: String,
    pub signature: String,
}

/// A provider-initiated request to execute a named capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned correlation ID.
    pub id: String,
    pub name: String,
    pub input: Value,
    /// Opaque pass-through token some providers attach per call.
    /// Carried even when unused; the provider adapter decides whether to
    /// inject it into the wire format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

/// The paired outcome of a ToolCall, matched by tool_id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultMessage {
    pub tool_id: String,
    pub text: String,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

/// An immutable record of one conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thinking_blocks: Vec<ThinkingBlock>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    /// Assistant turn carrying tool calls, optionally with text and
    /// thinking blocks alongside.
    pub fn assistant_with_tools(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
        thinking_blocks: Vec<ThinkingBlock>,
    ) -> Self {
        Self {
            tool_calls,
            thinking_blocks,
            ..Self::new(Role::Assistant, content.into())
        }
    }

    /// User turn bundling the results for every outstanding tool call.
    pub fn tool_results(results: Vec<ToolResultMessage>) -> Self {
        Self {
            tool_results: results,
            ..Self::new(Role::User, String::new())
        }
    }

    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            created_at: Utc::now(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            thinking_blocks: Vec::new(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Append-only ordered message log for one session.
///
/// Invariants: roles alternate user↔assistant after an optional leading
/// system message; every assistant tool call is answered by exactly one
/// result in the next user message, in call order; editing a message means
/// appending a revised one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
    pub started_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Append a message, enforcing the alternation invariant.
    pub fn push(&mut self, message: Message) -> Result<()> {
        match message.role {
            Role::System => {
                if !self.messages.is_empty() {
                    bail!("system message only allowed at the start of a conversation");
                }
            }
            Role::User => {
                if let Some(last) = self.messages.last() {
                    if last.role == Role::User {
                        bail!("consecutive user messages violate role alternation");
                    }
                    // A user turn after tool calls must answer every one of them.
                    if last.role == Role::Assistant && last.has_tool_calls() {
                        let expected: Vec<&str> =
                            last.tool_calls.iter().map(|c| c.id.as_str()).collect();
                        let got: Vec<&str> =
                            message.tool_results.iter().map(|r| r.tool_id.as_str()).collect();
                        if expected != got {
                            bail!(
                                "tool results {:?} do not answer outstanding calls {:?}",
                                got,
                                expected
                            );
                        }
                    }
                }
            }
            Role::Assistant => {
                match self.messages.last() {
                    Some(last) if last.role == Role::Assistant => {
                        bail!("consecutive assistant messages violate role alternation");
                    }
                    None => bail!("conversation cannot start with an assistant message"),
                    _ => {}
                }
            }
            Role::Tool => {
                bail!("tool results are carried on user messages, not a separate role");
            }
        }
        self.messages.push(message);
        Ok(())
    }

    /// Tool calls from the last assistant message that have not been
    /// answered yet. Empty when the conversation is settled.
    pub fn unanswered_tool_calls(&self) -> &[ToolCall] {
        match self.messages.last() {
            Some(m) if m.role == Role::Assistant => &m.tool_calls,
            _ => &[],
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
