use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::{streaming, AiProvider, ChunkFn, ProviderUsage, ToolSpec};
use crate::context::ThinkingConfig;
use crate::conversation::{Message, Role, ThinkingBlock, ToolCall};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;
const MAX_RETRIES: u32 = 3;

/// Anthropic Messages API adapter.
pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Build a provider from ANTHROPIC_API_KEY.
    pub fn from_env(model: &str) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY is not set")?;
        Ok(Self::new(&api_key, model))
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    pub(crate) fn apply_headers(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
    }

    pub(crate) fn build_request(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSpec],
        thinking: Option<&ThinkingConfig>,
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system_prompt,
            "messages": wire_messages(messages),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.input_schema,
                        })
                    })
                    .collect(),
            );
        }
        if let Some(cfg) = thinking {
            body["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": cfg.budget_tokens,
            });
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }
}

/// Convert domain messages to the wire shape. Thinking blocks are replayed
/// first with their signatures byte-exact, then text, then tool use; a
/// leading system message is dropped (the system prompt travels in its own
/// request field).
pub(crate) fn wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => continue,
            Role::Assistant => {
                let mut blocks = Vec::new();
                for tb in &msg.thinking_blocks {
                    blocks.push(json!({
                        "type": "thinking",
                        "thinking": tb.thinking,
                        "signature": tb.signature,
                    }));
                }
                if !msg.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": msg.content}));
                }
                for call in &msg.tool_calls {
                    // thought_signature has no Messages-API slot; it stays
                    // on the domain type and is echoed back on the paired
                    // result for providers that need it.
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.input,
                    }));
                }
                wire.push(json!({"role": "assistant", "content": blocks}));
            }
            Role::User | Role::Tool => {
                if msg.tool_results.is_empty() {
                    wire.push(json!({"role": "user", "content": msg.content}));
                } else {
                    let mut blocks: Vec<Value> = msg
                        .tool_results
                        .iter()
                        .map(|r| {
                            json!({
                                "type": "tool_result",
                                "tool_use_id": r.tool_id,
                                "content": r.text,
                                "is_error": r.is_error,
                            })
                        })
                        .collect();
                    if !msg.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": msg.content}));
                    }
                    wire.push(json!({"role": "user", "content": blocks}));
                }
            }
        }
    }
    wire
}

// ── Response types ──

#[derive(Deserialize)]
pub(crate) struct ApiResponse {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    Thinking {
        thinking: String,
        signature: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
pub(crate) struct ApiUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

pub(crate) fn parse_response(resp: ApiResponse) -> (Message, ProviderUsage) {
    let mut text = String::new();
    let mut calls: Vec<ToolCall> = Vec::new();
    let mut thinking: Vec<ThinkingBlock> = Vec::new();

    for block in resp.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::ToolUse { id, name, input } => calls.push(ToolCall {
                id,
                name,
                input,
                thought_signature: None,
            }),
            ContentBlock::Thinking {
                thinking: t,
                signature,
            } => thinking.push(ThinkingBlock {
                thinking: t,
                signature,
            }),
            ContentBlock::Unknown => {}
        }
    }

    let usage = resp
        .usage
        .map(|u| ProviderUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        })
        .unwrap_or_default();

    (Message::assistant_with_tools(text, calls, thinking), usage)
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSpec],
        thinking: Option<&ThinkingConfig>,
    ) -> Result<(Message, ProviderUsage)> {
        let body = self.build_request(system_prompt, messages, tools, thinking, false);

        // Retry with exponential backoff for transient errors; auth and
        // other client errors fail immediately and terminate the loop.
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay_ms = 1000 * (1 << (attempt - 1));
                warn!(
                    "Retrying provider request (attempt {}/{}) after {}ms",
                    attempt + 1,
                    MAX_RETRIES + 1,
                    delay_ms
                );
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }

            let response = match self
                .apply_headers(self.client.post(self.messages_url()))
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("provider request failed: {}", e));
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let err_body = response.text().await.unwrap_or_default();
                if matches!(status.as_u16(), 401 | 403) {
                    bail!("provider authentication failed ({}): {}", status, err_body);
                }
                let is_transient = matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504 | 529);
                if is_transient && attempt < MAX_RETRIES {
                    last_error = Some(anyhow::anyhow!("provider returned {}: {}", status, err_body));
                    continue;
                }
                bail!("provider returned {}: {}", status, err_body);
            }

            let api_response: ApiResponse = response
                .json()
                .await
                .context("failed to parse provider response")?;
            return Ok(parse_response(api_response));
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("provider request failed after retries")))
    }

    async fn complete_streaming(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSpec],
        thinking: Option<&ThinkingConfig>,
        on_text: ChunkFn<'_>,
        on_thinking: Option<ChunkFn<'_>>,
    ) -> Result<(Message, ProviderUsage)> {
        let body = self.build_request(system_prompt, messages, tools, thinking, true);
        streaming::stream_messages(self, &body, on_text, on_thinking).await
    }
}
