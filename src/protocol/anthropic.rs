//! Anthropic Messages body sent through the gateway's invoke operation.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::conversation::{Conversation, ToolChoice};
use crate::error::{Error, Result};
use crate::protocol::util::{self, Segment, WireTurn};
use crate::protocol::{InvokeRequest, Operation, Protocol};
use crate::types::{
    ContentPart, FinishReason, ImageSource, Message, Role, Thinking, ToolCall, TurnResult, Usage,
};

const PROTOCOL_ID: &str = "anthropic";
const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Reply block `type`s decoded into [`ResponseBlock`].
const REPLY_BLOCK_TYPES: &[&str] = &["text", "tool_use", "thinking", "redacted_thinking"];

#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicProtocol;

impl AnthropicProtocol {
    pub fn new() -> Self {
        Self
    }

    /// Request body for `conversation`.
    pub fn build_body(&self, conversation: &Conversation) -> Result<Value> {
        let config = &conversation.config;
        let tools = conversation.visible_tools();

        let system: Vec<String> = conversation
            .system
            .iter()
            .cloned()
            .chain(util::inline_system_text(&conversation.messages))
            .filter(|text| !text.is_empty())
            .collect();

        let auto_markers = usize::from(!system.is_empty()) + usize::from(!tools.is_empty());
        let checkpoints = util::select_cache_checkpoints(
            &conversation.messages,
            util::MAX_CACHE_POINTS - auto_markers,
        );

        let turns = util::plan_turns(
            &conversation.messages,
            map_role,
            |part| !matches!(part, ContentPart::Text { text } if text.is_empty()),
            &checkpoints,
            true,
        );
        let messages = turns
            .iter()
            .map(convert_turn)
            .collect::<Result<Vec<_>>>()?;

        let max_tokens = config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let mut body = json!({
            "anthropic_version": ANTHROPIC_VERSION,
            "max_tokens": max_tokens,
            "messages": messages,
        });

        if !system.is_empty() {
            let mut blocks: Vec<Value> = system
                .iter()
                .map(|text| json!({"type": "text", "text": text}))
                .collect();
            mark_ephemeral(blocks.last_mut());
            body["system"] = json!(blocks);
        }

        if let Some(temp) = config.temperature {
            body["temperature"] = json!(temp);
        }

        if let Some(top_p) = config.top_p {
            body["top_p"] = json!(top_p);
        }

        if !config.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(config.stop_sequences);
        }

        if !tools.is_empty() {
            let mut declared: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    let mut entry = json!({
                        "name": tool.name,
                        "input_schema": tool.input_schema,
                    });
                    if !tool.description.is_empty() {
                        entry["description"] = json!(tool.description);
                    }
                    entry
                })
                .collect();
            mark_ephemeral(declared.last_mut());
            body["tools"] = json!(declared);

            if let Some(choice) = config.tool_choice.as_ref().and_then(convert_tool_choice) {
                body["tool_choice"] = choice;
            }
        }

        util::merge_provider_options(&mut body, config.provider_options.as_ref());
        Ok(body)
    }
}

impl Protocol for AnthropicProtocol {
    fn protocol_id(&self) -> &str {
        PROTOCOL_ID
    }

    fn transform_request(&self, conversation: &Conversation) -> Result<InvokeRequest> {
        let body = self.build_body(conversation)?;
        debug!(model = %conversation.model, "Built anthropic request");
        Ok(InvokeRequest::json(
            Operation::Invoke,
            &conversation.model,
            serde_json::to_vec(&body)?,
        ))
    }

    fn transform_response(&self, body: &[u8]) -> Result<TurnResult> {
        let response: MessagesResponse = serde_json::from_slice(body).map_err(|e| {
            Error::adapter(format!("unexpected anthropic reply: {e}"))
                .with_source(e)
                .with_raw(body)
        })?;

        let Some(stop_reason) = response.stop_reason else {
            return Err(Error::adapter("anthropic reply has no stop_reason").with_raw(body));
        };

        let mut content = Vec::with_capacity(response.content.len());
        for block in response.content {
            let kind = block.get("type").and_then(Value::as_str).map(str::to_owned);
            let decoded = util::decode_reply_block(block, kind.as_deref(), REPLY_BLOCK_TYPES)
                .map_err(|e| e.with_raw(body))?;
            match decoded {
                Some(ResponseBlock::Text { text }) => content.push(ContentPart::Text { text }),
                Some(ResponseBlock::ToolUse { id, name, input }) => {
                    content.push(ContentPart::ToolCall(ToolCall {
                        id,
                        name,
                        arguments: util::tool_arguments(&input),
                    }))
                }
                Some(ResponseBlock::Thinking { thinking, signature }) => {
                    content.push(ContentPart::Thinking(Thinking {
                        text: thinking,
                        signature,
                    }))
                }
                Some(ResponseBlock::RedactedThinking {}) => {
                    debug!("Skipping redacted thinking block")
                }
                None => {}
            }
        }

        let usage = Usage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            cache_read_tokens: response.usage.cache_read_input_tokens.unwrap_or(0),
            cache_write_tokens: response.usage.cache_creation_input_tokens.unwrap_or(0),
            reasoning_tokens: 0,
        };

        Ok(TurnResult {
            message: Message::new(Role::Assistant, content),
            finish_reason: map_stop_reason(&stop_reason),
            raw_finish_reason: stop_reason,
            usage,
            response_id: response.id,
        })
    }
}

// MARK: - Outbound

fn map_role(role: Role) -> Option<&'static str> {
    match role {
        Role::System => None,
        Role::User | Role::Tool => Some("user"),
        Role::Assistant => Some("assistant"),
    }
}

fn mark_ephemeral(block: Option<&mut Value>) {
    if let Some(block) = block {
        block["cache_control"] = json!({"type": "ephemeral"});
    }
}

fn convert_part(part: &ContentPart) -> Result<Value> {
    Ok(match part {
        ContentPart::Text { text } => json!({"type": "text", "text": text}),
        ContentPart::Image(image) => {
            let source = match &image.source {
                ImageSource::Bytes(bytes) => json!({
                    "type": "base64",
                    "media_type": image.media_type,
                    "data": util::encode_base64(bytes),
                }),
                ImageSource::Url(url) => json!({"type": "url", "url": url}),
            };
            json!({"type": "image", "source": source})
        }
        ContentPart::ToolCall(call) => json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": util::tool_input(call)?,
        }),
        ContentPart::ToolResult(result) => {
            let mut block = json!({
                "type": "tool_result",
                "tool_use_id": result.tool_call_id,
                "content": result.content,
            });
            if result.is_error {
                block["is_error"] = json!(true);
            }
            block
        }
        ContentPart::Thinking(thinking) => json!({
            "type": "thinking",
            "thinking": thinking.text,
            "signature": thinking.signature,
        }),
    })
}

fn convert_turn(turn: &WireTurn<'_, &'static str>) -> Result<Value> {
    let mut content: Vec<Value> = Vec::with_capacity(turn.segments.len());
    for segment in &turn.segments {
        match segment {
            Segment::Part(part) => content.push(convert_part(part)?),
            Segment::CachePoint => mark_ephemeral(
                content
                    .iter_mut()
                    .rev()
                    .find(|block| block["type"] != "thinking"),
            ),
        }
    }
    Ok(json!({"role": turn.role, "content": content}))
}

fn convert_tool_choice(choice: &ToolChoice) -> Option<Value> {
    match choice {
        ToolChoice::Auto => Some(json!({"type": "auto"})),
        ToolChoice::Required => Some(json!({"type": "any"})),
        ToolChoice::Named(name) => Some(json!({"type": "tool", "name": name})),
        ToolChoice::None => None,
    }
}

// MARK: - Inbound

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    id: Option<String>,
    content: Vec<Value>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: MessagesUsage,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: String,
    },
    RedactedThinking {},
}

/// Map an Anthropic `stop_reason` onto the unified vocabulary.
pub fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" | "pause_turn" => FinishReason::Stop,
        "max_tokens" | "model_context_window_exceeded" => FinishReason::Length,
        "tool_use" => FinishReason::ToolUse,
        "refusal" => FinishReason::ContentFilter,
        other => {
            warn!(protocol = PROTOCOL_ID, stop_reason = %other, "Unrecognized stop reason");
            FinishReason::Error
        }
    }
}
