//! OpenAI Chat Completions body sent through the gateway's invoke operation.
//!
//! No alternation rule and a dedicated `tool` role, so messages map one to
//! one (one `tool` message per result). No cache markers; reasoning parts
//! are not replayed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::conversation::{Conversation, ToolChoice};
use crate::error::{Error, Result};
use crate::protocol::util::{self, WireTurn};
use crate::protocol::{InvokeRequest, Operation, Protocol};
use crate::types::{
    ContentPart, FinishReason, Message, Role, Thinking, ToolCall, TurnResult, Usage,
};

const PROTOCOL_ID: &str = "openai";

// MARK: - Wire Types

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    /// Serialized as `null` for assistant turns that only call tools.
    pub content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub r#type: &'static str,
    pub function: FunctionDef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(default = "function_type")]
    pub r#type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    id: Option<String>,
    choices: Vec<ReplyChoice>,
    usage: CompletionUsage,
}

#[derive(Debug, Deserialize)]
struct ReplyChoice {
    message: ReplyMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(default)]
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: Option<u64>,
}

// MARK: - Protocol

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiProtocol;

impl OpenAiProtocol {
    pub fn new() -> Self {
        Self
    }

    /// Typed request for `conversation`, before provider options are merged.
    pub fn build_request(&self, conversation: &Conversation) -> Result<ChatRequest> {
        let config = &conversation.config;

        let mut messages: Vec<ChatMessage> = conversation
            .system
            .iter()
            .filter(|text| !text.is_empty())
            .map(|text| ChatMessage::text(ChatRole::System, text.clone()))
            .collect();

        let turns = util::plan_turns(
            &conversation.messages,
            Some,
            keep_part,
            &HashSet::new(),
            false,
        );
        for turn in &turns {
            convert_turn(turn, &mut messages);
        }

        let tools: Vec<ToolSpec> = conversation
            .visible_tools()
            .iter()
            .map(|tool| ToolSpec {
                r#type: "function",
                function: FunctionDef {
                    name: tool.name.clone(),
                    description: Some(tool.description.clone()).filter(|d| !d.is_empty()),
                    parameters: tool.input_schema.clone(),
                },
            })
            .collect();

        let tool_choice = if tools.is_empty() {
            None
        } else {
            config.tool_choice.as_ref().and_then(convert_tool_choice)
        };

        Ok(ChatRequest {
            model: conversation.model.clone(),
            messages,
            tools,
            tool_choice,
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            stop: config.stop_sequences.clone(),
            reasoning_effort: config.reasoning_effort.map(|e| e.as_str()),
        })
    }
}

impl Protocol for OpenAiProtocol {
    fn protocol_id(&self) -> &str {
        PROTOCOL_ID
    }

    fn transform_request(&self, conversation: &Conversation) -> Result<InvokeRequest> {
        let request = self.build_request(conversation)?;
        let mut body = serde_json::to_value(&request)?;
        util::merge_provider_options(&mut body, conversation.config.provider_options.as_ref());
        debug!(
            model = %conversation.model,
            messages = request.messages.len(),
            "Built openai request"
        );
        Ok(InvokeRequest::json(
            Operation::Invoke,
            &conversation.model,
            serde_json::to_vec(&body)?,
        ))
    }

    fn transform_response(&self, body: &[u8]) -> Result<TurnResult> {
        let completion: ChatCompletion = serde_json::from_slice(body).map_err(|e| {
            Error::adapter(format!("unexpected openai reply: {e}"))
                .with_source(e)
                .with_raw(body)
        })?;

        let Some(choice) = completion.choices.into_iter().next() else {
            return Err(Error::adapter("openai reply has no choices").with_raw(body));
        };
        let Some(raw_finish) = choice.finish_reason else {
            return Err(Error::adapter("openai reply has no finish_reason").with_raw(body));
        };

        let reply = choice.message;
        let mut content = Vec::new();
        if let Some(reasoning) = reply.reasoning_content.filter(|r| !r.is_empty()) {
            content.push(ContentPart::Thinking(Thinking {
                text: reasoning,
                signature: String::new(),
            }));
        }
        if let Some(text) = reply.content.filter(|t| !t.is_empty()) {
            content.push(ContentPart::Text { text });
        }
        for call in reply.tool_calls.unwrap_or_default() {
            content.push(ContentPart::ToolCall(ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            }));
        }

        let refused = reply.refusal.is_some_and(|r| !r.is_empty());
        let finish_reason = if refused {
            FinishReason::ContentFilter
        } else {
            map_finish_reason(&raw_finish)
        };

        let usage = &completion.usage;
        let usage = Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_read_tokens: usage
                .prompt_tokens_details
                .as_ref()
                .and_then(|d| d.cached_tokens)
                .unwrap_or(0),
            cache_write_tokens: 0,
            reasoning_tokens: usage
                .completion_tokens_details
                .as_ref()
                .and_then(|d| d.reasoning_tokens)
                .unwrap_or(0),
        };

        Ok(TurnResult {
            message: Message::new(Role::Assistant, content),
            finish_reason,
            raw_finish_reason: raw_finish,
            usage,
            response_id: completion.id,
        })
    }
}

// MARK: - Outbound

impl ChatMessage {
    fn text(role: ChatRole, text: String) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(text)),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

fn keep_part(part: &ContentPart) -> bool {
    match part {
        ContentPart::Text { text } => !text.is_empty(),
        ContentPart::Thinking(_) => false,
        _ => true,
    }
}

fn convert_turn(turn: &WireTurn<'_, Role>, out: &mut Vec<ChatMessage>) {
    match turn.role {
        Role::System => {
            let text: String = turn.parts().filter_map(ContentPart::as_text).collect();
            out.push(ChatMessage::text(ChatRole::System, text));
        }
        Role::User => {
            let has_images = turn.parts().any(|p| matches!(p, ContentPart::Image(_)));
            let content = if has_images {
                let parts = turn
                    .parts()
                    .filter_map(|part| match part {
                        ContentPart::Text { text } => {
                            Some(ChatContentPart::Text { text: text.clone() })
                        }
                        ContentPart::Image(image) => Some(ChatContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: util::image_uri(image),
                            },
                        }),
                        _ => None,
                    })
                    .collect();
                MessageContent::Parts(parts)
            } else {
                MessageContent::Text(turn.parts().filter_map(ContentPart::as_text).collect())
            };
            out.push(ChatMessage {
                role: ChatRole::User,
                content: Some(content),
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }
        Role::Assistant => {
            let text: String = turn.parts().filter_map(ContentPart::as_text).collect();
            let tool_calls: Vec<WireToolCall> = turn
                .parts()
                .filter_map(|part| match part {
                    ContentPart::ToolCall(call) => Some(WireToolCall {
                        id: call.id.clone(),
                        r#type: function_type(),
                        function: FunctionCall {
                            name: call.name.clone(),
                            arguments: if call.arguments.trim().is_empty() {
                                "{}".to_string()
                            } else {
                                call.arguments.clone()
                            },
                        },
                    }),
                    _ => None,
                })
                .collect();
            out.push(ChatMessage {
                role: ChatRole::Assistant,
                content: Some(text)
                    .filter(|t| !t.is_empty() || tool_calls.is_empty())
                    .map(MessageContent::Text),
                tool_calls,
                tool_call_id: None,
            });
        }
        Role::Tool => {
            for part in turn.parts() {
                match part {
                    ContentPart::ToolResult(result) => out.push(ChatMessage {
                        role: ChatRole::Tool,
                        content: Some(MessageContent::Text(result.content.clone())),
                        tool_calls: Vec::new(),
                        tool_call_id: Some(result.tool_call_id.clone()),
                    }),
                    other => {
                        warn!(part = ?other, "Dropping non-result content from tool message")
                    }
                }
            }
        }
    }
}

fn convert_tool_choice(choice: &ToolChoice) -> Option<Value> {
    match choice {
        ToolChoice::Auto => Some(json!("auto")),
        ToolChoice::Required => Some(json!("required")),
        ToolChoice::Named(name) => Some(json!({"type": "function", "function": {"name": name}})),
        ToolChoice::None => None,
    }
}

// MARK: - Inbound

/// Map an OpenAI `finish_reason` onto the unified vocabulary.
pub fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolUse,
        "content_filter" => FinishReason::ContentFilter,
        other => {
            warn!(protocol = PROTOCOL_ID, finish_reason = %other, "Unrecognized finish reason");
            FinishReason::Error
        }
    }
}
