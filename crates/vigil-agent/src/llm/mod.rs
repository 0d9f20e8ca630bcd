pub mod anthropic;
pub mod streaming;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::context::ThinkingConfig;
use crate::conversation::Message;

/// Tool definition sent to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Default, Clone)]
pub struct ProviderUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Chunk callback for streaming completions. Callbacks observe text as it
/// arrives; they never mutate the conversation — the accumulated message
/// returned by the provider is what enters the log.
pub type ChunkFn<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Port to a large-language-model backend. The core only sees this trait;
/// wire protocols live behind it.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    /// One completion turn. The returned assistant message carries any
    /// tool calls and thinking blocks the provider produced.
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSpec],
        thinking: Option<&ThinkingConfig>,
    ) -> Result<(Message, ProviderUsage)>;

    /// Streaming completion. Default implementation falls back to
    /// `complete` and emits the full text as a single chunk.
    async fn complete_streaming(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSpec],
        thinking: Option<&ThinkingConfig>,
        on_text: ChunkFn<'_>,
        on_thinking: Option<ChunkFn<'_>>,
    ) -> Result<(Message, ProviderUsage)> {
        let (message, usage) = self.complete(system_prompt, messages, tools, thinking).await?;
        if let (Some(cb), false) = (on_thinking, message.thinking_blocks.is_empty()) {
            for block in &message.thinking_blocks {
                cb(&block.thinking);
            }
        }
        if !message.content.is_empty() {
            on_text(&message.content);
        }
        Ok((message, usage))
    }
}
