use anyhow::{bail, Context, Result};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::anthropic::AnthropicProvider;
use super::{ChunkFn, ProviderUsage};
use crate::conversation::{Message, ThinkingBlock, ToolCall};

/// Stream one Messages-API completion, firing chunk callbacks as deltas
/// arrive. The accumulated message is returned once the stream ends; the
/// callbacks only observe.
pub(crate) async fn stream_messages(
    provider: &AnthropicProvider,
    body: &Value,
    on_text: ChunkFn<'_>,
    on_thinking: Option<ChunkFn<'_>>,
) -> Result<(Message, ProviderUsage)> {
    let response = provider
        .apply_headers(provider.client().post(provider.messages_url()))
        .json(body)
        .send()
        .await
        .context("failed to send streaming request")?;

    let status = response.status();
    if !status.is_success() {
        let err_body = response.text().await.unwrap_or_default();
        if matches!(status.as_u16(), 401 | 403) {
            bail!("provider authentication failed ({}): {}", status, err_body);
        }
        bail!("provider returned {}: {}", status, err_body);
    }

    let mut acc = Accumulator::default();
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("stream read error")?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        // Process complete SSE lines
        while let Some(line_end) = buffer.find('\n') {
            let line = buffer[..line_end].trim().to_string();
            buffer = buffer[line_end + 1..].to_string();
            acc.feed_line(&line, on_text, on_thinking);
        }
    }

    Ok(acc.finish())
}

// ── SSE event types ──

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    Ping,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct MessageStart {
    #[serde(default)]
    usage: Option<StartUsage>,
}

#[derive(Deserialize)]
struct StartUsage {
    #[serde(default)]
    input_tokens: u32,
}

#[derive(Deserialize)]
struct DeltaUsage {
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StartBlock {
    Text {},
    ToolUse { id: String, name: String },
    Thinking {},
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    #[serde(other)]
    Unknown,
}

/// One content block under accumulation, indexed by stream position.
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
    Thinking {
        thinking: String,
        signature: String,
    },
}

#[derive(Default)]
pub(crate) struct Accumulator {
    blocks: Vec<Option<PartialBlock>>,
    usage: ProviderUsage,
}

impl Accumulator {
    fn slot(&mut self, index: usize) -> &mut Option<PartialBlock> {
        while self.blocks.len() <= index {
            self.blocks.push(None);
        }
        &mut self.blocks[index]
    }

    pub(crate) fn feed_line(
        &mut self,
        line: &str,
        on_text: ChunkFn<'_>,
        on_thinking: Option<ChunkFn<'_>>,
    ) {
        if line.is_empty() || !line.starts_with("data: ") {
            return;
        }
        let json_str = &line["data: ".len()..];
        let event: StreamEvent = match serde_json::from_str(json_str) {
            Ok(e) => e,
            Err(_) => return,
        };

        match event {
            StreamEvent::MessageStart { message } => {
                if let Some(u) = message.usage {
                    self.usage.input_tokens = u.input_tokens;
                }
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                *self.slot(index) = match content_block {
                    StartBlock::Text {} => Some(PartialBlock::Text(String::new())),
                    StartBlock::ToolUse { id, name } => Some(PartialBlock::ToolUse {
                        id,
                        name,
                        input_json: String::new(),
                    }),
                    StartBlock::Thinking {} => Some(PartialBlock::Thinking {
                        thinking: String::new(),
                        signature: String::new(),
                    }),
                    StartBlock::Unknown => None,
                };
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                match (self.slot(index).as_mut(), delta) {
                    (Some(PartialBlock::Text(buf)), Delta::TextDelta { text }) => {
                        buf.push_str(&text);
                        on_text(&text);
                    }
                    (
                        Some(PartialBlock::ToolUse { input_json, .. }),
                        Delta::InputJsonDelta { partial_json },
                    ) => {
                        input_json.push_str(&partial_json);
                    }
                    (
                        Some(PartialBlock::Thinking { thinking, .. }),
                        Delta::ThinkingDelta { thinking: t },
                    ) => {
                        thinking.push_str(&t);
                        if let Some(cb) = on_thinking {
                            cb(&t);
                        }
                    }
                    (
                        Some(PartialBlock::Thinking { signature, .. }),
                        Delta::SignatureDelta { signature: s },
                    ) => {
                        signature.push_str(&s);
                    }
                    _ => {}
                }
            }
            StreamEvent::MessageDelta { usage } => {
                if let Some(u) = usage {
                    self.usage.output_tokens = u.output_tokens;
                }
            }
            StreamEvent::ContentBlockStop { .. }
            | StreamEvent::MessageStop
            | StreamEvent::Ping
            | StreamEvent::Unknown => {}
        }
    }

    pub(crate) fn finish(self) -> (Message, ProviderUsage) {
        let mut text = String::new();
        let mut calls: Vec<ToolCall> = Vec::new();
        let mut thinking: Vec<ThinkingBlock> = Vec::new();

        for block in self.blocks.into_iter().flatten() {
            match block {
                PartialBlock::Text(t) => text.push_str(&t),
                PartialBlock::ToolUse {
                    id,
                    name,
                    input_json,
                } => {
                    let input = if input_json.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&input_json).unwrap_or_else(|e| {
                            warn!("failed to parse streamed tool input for {}: {}", name, e);
                            serde_json::json!({})
                        })
                    };
                    calls.push(ToolCall {
                        id,
                        name,
                        input,
                        thought_signature: None,
                    });
                }
                PartialBlock::Thinking {
                    thinking: t,
                    signature,
                } => thinking.push(ThinkingBlock {
                    thinking: t,
                    signature,
                }),
            }
        }

        (
            Message::assistant_with_tools(text, calls, thinking),
            self.usage,
        )
    }
}
