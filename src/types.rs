//! Provider-agnostic conversation data model.
//!
//! Everything here is plain serializable data. Translation to and from a
//! backend's wire format lives in [`crate::protocol`].

use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

// MARK: - Roles

/// Speaker of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Carries tool results back to the model.
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        })
    }
}

// MARK: - Content

/// One block of message content. Exactly one payload per variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image(Image),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    Thinking(Thinking),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Image attached to a message, either inline or by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub source: ImageSource,
    /// MIME type such as `image/png`.
    pub media_type: String,
}

impl Image {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, media_type: impl Into<String>) -> Self {
        Self {
            source: ImageSource::Bytes(bytes.into()),
            media_type: media_type.into(),
        }
    }

    pub fn from_url(url: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            source: ImageSource::Url(url.into()),
            media_type: media_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    Url(String),
}

/// A model-issued tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Backend-assigned correlation id, echoed back in the [`ToolResult`].
    pub id: String,
    pub name: String,
    /// Raw JSON arguments exactly as the backend produced them.
    pub arguments: String,
}

/// Result of executing a tool, correlated to a [`ToolCall`] by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

/// Model reasoning. The signature is opaque and only replayed to the
/// backend that issued it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thinking {
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// MARK: - Messages

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
    /// Request a cache marker after this message on backends that support
    /// prompt caching.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cache_checkpoint: bool,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            role,
            content,
            cache_checkpoint: false,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::text(text)])
    }

    /// A tool-result carrier answering the call with `tool_call_id`.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::new(
            Role::Tool,
            vec![ContentPart::ToolResult(ToolResult {
                tool_call_id: tool_call_id.into(),
                content: content.into(),
                is_error,
            })],
        )
    }

    pub fn with_cache_checkpoint(mut self) -> Self {
        self.cache_checkpoint = true;
        self
    }

    /// Concatenation of all text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|part| matches!(part, ContentPart::ToolCall(_)))
    }
}

// MARK: - Usage

/// Token counters for one turn or, accumulated, for a whole conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            input_tokens: self.input_tokens.saturating_add(rhs.input_tokens),
            output_tokens: self.output_tokens.saturating_add(rhs.output_tokens),
            cache_read_tokens: self.cache_read_tokens.saturating_add(rhs.cache_read_tokens),
            cache_write_tokens: self.cache_write_tokens.saturating_add(rhs.cache_write_tokens),
            reasoning_tokens: self.reasoning_tokens.saturating_add(rhs.reasoning_tokens),
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for Usage {
    fn sum<I: Iterator<Item = Usage>>(iter: I) -> Usage {
        iter.fold(Usage::default(), Add::add)
    }
}

// MARK: - Turn results

/// Why generation stopped, normalized across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolUse => "tool_use",
            Self::ContentFilter => "content_filter",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one successful exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    /// The assistant reply, already appended to the returned conversation.
    pub message: Message,
    pub finish_reason: FinishReason,
    /// Stop signal exactly as the backend reported it.
    #[serde(default)]
    pub raw_finish_reason: String,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl TurnResult {
    pub fn text(&self) -> String {
        self.message.text()
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.message.tool_calls()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_part_tagging() {
        let part = ContentPart::ToolCall(ToolCall {
            id: "call_1".into(),
            name: "lookup".into(),
            arguments: r#"{"q":"x"}"#.into(),
        });
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(
            value,
            json!({"type": "tool_call", "id": "call_1", "name": "lookup", "arguments": "{\"q\":\"x\"}"})
        );
    }

    #[test]
    fn test_image_bytes_serialize_as_base64() {
        let part = ContentPart::Image(Image::from_bytes(vec![1u8, 2, 3], "image/png"));
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["source"]["bytes"], "AQID");

        let back: ContentPart = serde_json::from_value(value).unwrap();
        assert_eq!(back, part);
    }

    #[test]
    fn test_message_defaults_on_deserialize() {
        let msg: Message = serde_json::from_value(json!({
            "role": "user",
            "content": [{"type": "text", "text": "hi"}]
        }))
        .unwrap();
        assert!(!msg.cache_checkpoint);
        assert_eq!(msg.text(), "hi");
    }

    #[test]
    fn test_tool_result_message() {
        let msg = Message::tool_result("call_9", "boom", true);
        assert_eq!(msg.role, Role::Tool);
        match &msg.content[0] {
            ContentPart::ToolResult(result) => {
                assert_eq!(result.tool_call_id, "call_9");
                assert!(result.is_error);
            }
            other => panic!("unexpected part: {other:?}"),
        }
    }

    #[test]
    fn test_message_tool_calls() {
        let msg = Message::new(
            Role::Assistant,
            vec![
                ContentPart::text("let me check"),
                ContentPart::ToolCall(ToolCall {
                    id: "a".into(),
                    name: "f".into(),
                    arguments: "{}".into(),
                }),
            ],
        );
        assert!(msg.has_tool_calls());
        assert_eq!(msg.tool_calls().len(), 1);
        assert_eq!(msg.text(), "let me check");
    }

    #[test]
    fn test_usage_add_assign() {
        let mut total = Usage {
            input_tokens: 10,
            output_tokens: 5,
            ..Default::default()
        };
        total += Usage {
            input_tokens: 1,
            output_tokens: 2,
            cache_read_tokens: 3,
            cache_write_tokens: 4,
            reasoning_tokens: 5,
        };
        assert_eq!(
            total,
            Usage {
                input_tokens: 11,
                output_tokens: 7,
                cache_read_tokens: 3,
                cache_write_tokens: 4,
                reasoning_tokens: 5,
            }
        );
        assert_eq!(total.total_tokens(), 18);
    }

    #[test]
    fn test_finish_reason_display() {
        assert_eq!(FinishReason::ToolUse.to_string(), "tool_use");
        assert_eq!(
            serde_json::to_string(&FinishReason::ContentFilter).unwrap(),
            "\"content_filter\""
        );
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn usage_strategy() -> impl Strategy<Value = Usage> {
            (
                0u64..1_000_000,
                0u64..1_000_000,
                0u64..1_000_000,
                0u64..1_000_000,
                0u64..1_000_000,
            )
                .prop_map(|(i, o, r, w, t)| Usage {
                    input_tokens: i,
                    output_tokens: o,
                    cache_read_tokens: r,
                    cache_write_tokens: w,
                    reasoning_tokens: t,
                })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            #[test]
            fn prop_usage_add_is_commutative(a in usage_strategy(), b in usage_strategy()) {
                prop_assert_eq!(a + b, b + a);
            }

            #[test]
            fn prop_usage_add_is_associative(
                a in usage_strategy(),
                b in usage_strategy(),
                c in usage_strategy(),
            ) {
                prop_assert_eq!((a + b) + c, a + (b + c));
            }

            #[test]
            fn prop_usage_sum_is_elementwise(
                turns in proptest::collection::vec(usage_strategy(), 0..20),
            ) {
                let total: Usage = turns.iter().copied().sum();
                let inputs: u64 = turns.iter().map(|u| u.input_tokens).sum();
                let reasoning: u64 = turns.iter().map(|u| u.reasoning_tokens).sum();
                prop_assert_eq!(total.input_tokens, inputs);
                prop_assert_eq!(total.reasoning_tokens, reasoning);
            }
        }
    }
}
