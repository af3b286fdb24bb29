//! Bedrock Converse protocol.
//!
//! The gateway's unified schema: strict user/assistant alternation, tool
//! results carried in user turns, `cachePoint` markers for Anthropic models.

pub mod types;

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

use self::types::*;
use crate::conversation::{Conversation, ToolChoice as ChoiceMode};
use crate::error::{Error, Result};
use crate::protocol::util::{self, Segment, WireTurn};
use crate::protocol::{InvokeRequest, Operation, Protocol};
use crate::types::{
    ContentPart, FinishReason, Image, ImageSource, Message, Role, Thinking, ToolCall, TurnResult,
    Usage,
};

const PROTOCOL_ID: &str = "converse";

/// Reply block keys decoded into [`ContentBlock`].
const REPLY_BLOCK_KINDS: &[&str] = &[
    "text",
    "image",
    "toolUse",
    "toolResult",
    "cachePoint",
    "reasoningContent",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ConverseProtocol;

impl ConverseProtocol {
    pub fn new() -> Self {
        Self
    }

    /// Typed request for `conversation`, before serialization.
    pub fn build_request(&self, conversation: &Conversation) -> Result<ConverseRequest> {
        let cache = util::is_cache_capable_model(&conversation.model);
        let tools = conversation.visible_tools();

        let mut system: Vec<SystemContentBlock> = conversation
            .system
            .iter()
            .cloned()
            .chain(util::inline_system_text(&conversation.messages))
            .filter(|text| !text.is_empty())
            .map(SystemContentBlock::Text)
            .collect();

        let auto_markers = usize::from(!system.is_empty()) + usize::from(!tools.is_empty());
        let checkpoints = if cache {
            util::select_cache_checkpoints(
                &conversation.messages,
                util::MAX_CACHE_POINTS - auto_markers,
            )
        } else {
            HashSet::new()
        };

        if cache && !system.is_empty() {
            system.push(SystemContentBlock::CachePoint(CachePointBlock::default_point()));
        }

        let turns = util::plan_turns(
            &conversation.messages,
            map_role,
            |part| keep_part(part, cache),
            &checkpoints,
            true,
        );
        let messages = turns
            .iter()
            .map(convert_turn)
            .collect::<Result<Vec<_>>>()?;

        let config = &conversation.config;
        let inference_config = InferenceConfiguration {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            stop_sequences: config.stop_sequences.clone(),
        };

        let tool_config = if tools.is_empty() {
            None
        } else {
            let mut specs: Vec<Tool> = tools
                .iter()
                .map(|tool| {
                    Tool::ToolSpec(ToolSpecification {
                        name: tool.name.clone(),
                        description: Some(tool.description.clone()).filter(|d| !d.is_empty()),
                        input_schema: ToolInputSchema::Json(tool.input_schema.clone()),
                    })
                })
                .collect();
            if cache {
                specs.push(Tool::CachePoint(CachePointBlock::default_point()));
            }
            Some(ToolConfiguration {
                tools: specs,
                tool_choice: config.tool_choice.as_ref().and_then(convert_tool_choice),
            })
        };

        Ok(ConverseRequest {
            messages,
            system,
            inference_config: Some(inference_config).filter(|c| !c.is_empty()),
            tool_config,
            additional_model_request_fields: config.provider_options.clone(),
        })
    }

    /// Convert a decoded reply into a turn result.
    pub fn convert_response(&self, response: ConverseResponse) -> Result<TurnResult> {
        let ConverseOutput::Message(reply) = response.output;
        let mut content = Vec::with_capacity(reply.content.len());
        let mut filtered = false;

        for block in reply.content {
            if block.get("guardContent").is_some() {
                filtered = true;
                continue;
            }
            let kind = block_kind(&block).map(str::to_owned);
            match util::decode_reply_block(block, kind.as_deref(), REPLY_BLOCK_KINDS)? {
                Some(ContentBlock::Text(text)) => content.push(ContentPart::Text { text }),
                Some(ContentBlock::ToolUse(tool_use)) => {
                    content.push(ContentPart::ToolCall(ToolCall {
                        id: tool_use.tool_use_id,
                        name: tool_use.name,
                        arguments: util::tool_arguments(&tool_use.input),
                    }))
                }
                Some(ContentBlock::ReasoningContent(ReasoningContentBlock {
                    reasoning_text: Some(reasoning),
                    ..
                })) => content.push(ContentPart::Thinking(Thinking {
                    text: reasoning.text,
                    signature: reasoning.signature.unwrap_or_default(),
                })),
                Some(other) => debug!(block = ?other, "Skipping reply block with no unified form"),
                None => {}
            }
        }

        let finish_reason = if filtered {
            FinishReason::ContentFilter
        } else {
            map_stop_reason(&response.stop_reason)
        };

        let usage = Usage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            cache_read_tokens: response.usage.cache_read_input_tokens.unwrap_or(0),
            cache_write_tokens: response.usage.cache_write_input_tokens.unwrap_or(0),
            reasoning_tokens: 0,
        };

        Ok(TurnResult {
            message: Message::new(Role::Assistant, content),
            finish_reason,
            raw_finish_reason: response.stop_reason,
            usage,
            response_id: None,
        })
    }
}

impl Protocol for ConverseProtocol {
    fn protocol_id(&self) -> &str {
        PROTOCOL_ID
    }

    fn transform_request(&self, conversation: &Conversation) -> Result<InvokeRequest> {
        let request = self.build_request(conversation)?;
        let body = serde_json::to_vec(&request)?;
        debug!(
            model = %conversation.model,
            messages = request.messages.len(),
            "Built converse request"
        );
        Ok(InvokeRequest::json(Operation::Converse, &conversation.model, body))
    }

    fn transform_response(&self, body: &[u8]) -> Result<TurnResult> {
        let response: ConverseResponse = serde_json::from_slice(body).map_err(|e| {
            Error::adapter(format!("unexpected converse reply: {e}"))
                .with_source(e)
                .with_raw(body)
        })?;
        self.convert_response(response).map_err(|e| e.with_raw(body))
    }
}

// MARK: - Outbound

fn map_role(role: Role) -> Option<ConversationRole> {
    match role {
        Role::System => None,
        Role::User | Role::Tool => Some(ConversationRole::User),
        Role::Assistant => Some(ConversationRole::Assistant),
    }
}

fn keep_part(part: &ContentPart, cache_capable: bool) -> bool {
    match part {
        ContentPart::Text { text } => !text.is_empty(),
        ContentPart::Thinking(_) => cache_capable,
        ContentPart::Image(image) => {
            let supported = convert_image(image).is_some();
            if !supported {
                warn!(
                    media_type = %image.media_type,
                    "Dropping image converse cannot carry (needs inline bytes or s3:// URL)"
                );
            }
            supported
        }
        ContentPart::ToolCall(_) | ContentPart::ToolResult(_) => true,
    }
}

fn convert_image(image: &Image) -> Option<ImageBlock> {
    let format = util::image_format(&image.media_type)?;
    let source = match &image.source {
        ImageSource::Bytes(bytes) => ImageSourceBlock::Bytes(util::encode_base64(bytes)),
        ImageSource::Url(url) if url.starts_with("s3://") => {
            ImageSourceBlock::S3Location(S3Location { uri: url.clone() })
        }
        ImageSource::Url(_) => return None,
    };
    Some(ImageBlock {
        format: format.to_string(),
        source,
    })
}

fn convert_turn(turn: &WireTurn<'_, ConversationRole>) -> Result<ConverseMessage> {
    let mut content = Vec::with_capacity(turn.segments.len());
    for segment in &turn.segments {
        let block = match segment {
            Segment::CachePoint => ContentBlock::CachePoint(CachePointBlock::default_point()),
            Segment::Part(part) => match part {
                ContentPart::Text { text } => ContentBlock::Text(text.clone()),
                ContentPart::Image(image) => match convert_image(image) {
                    Some(block) => ContentBlock::Image(block),
                    None => continue,
                },
                ContentPart::ToolCall(call) => ContentBlock::ToolUse(ToolUseBlock {
                    tool_use_id: call.id.clone(),
                    name: call.name.clone(),
                    input: util::tool_input(call)?,
                }),
                ContentPart::ToolResult(result) => ContentBlock::ToolResult(ToolResultBlock {
                    tool_use_id: result.tool_call_id.clone(),
                    content: vec![ToolResultContent::Text(result.content.clone())],
                    status: Some(if result.is_error {
                        ToolResultStatus::Error
                    } else {
                        ToolResultStatus::Success
                    }),
                }),
                ContentPart::Thinking(thinking) => {
                    ContentBlock::ReasoningContent(ReasoningContentBlock {
                        reasoning_text: Some(ReasoningTextBlock {
                            text: thinking.text.clone(),
                            signature: Some(thinking.signature.clone())
                                .filter(|s| !s.is_empty()),
                        }),
                        redacted_content: None,
                    })
                }
            },
        };
        content.push(block);
    }
    Ok(ConverseMessage {
        role: turn.role,
        content,
    })
}

fn convert_tool_choice(choice: &ChoiceMode) -> Option<ToolChoice> {
    match choice {
        ChoiceMode::Auto => Some(ToolChoice::Auto(EmptyObject {})),
        ChoiceMode::Required => Some(ToolChoice::Any(EmptyObject {})),
        ChoiceMode::Named(name) => Some(ToolChoice::Tool(SpecificToolChoice {
            name: name.clone(),
        })),
        ChoiceMode::None => None,
    }
}

// MARK: - Inbound

/// The single key naming a reply content block, e.g. `toolUse`.
fn block_kind(block: &Value) -> Option<&str> {
    match block.as_object() {
        Some(fields) if fields.len() == 1 => fields.keys().next().map(String::as_str),
        _ => None,
    }
}

/// Map a Converse `stopReason` onto the unified vocabulary.
pub fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" | "model_context_window_exceeded" => FinishReason::Length,
        "tool_use" => FinishReason::ToolUse,
        "guardrail_intervened" | "content_filtered" => FinishReason::ContentFilter,
        other => {
            warn!(protocol = PROTOCOL_ID, stop_reason = %other, "Unrecognized stop reason");
            FinishReason::Error
        }
    }
}
