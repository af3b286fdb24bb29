//! Provider-agnostic conversation layer for Amazon Bedrock.
//!
//! A [`Conversation`] is plain, serializable data: model id, system
//! prompts, message history, tool definitions, inference settings and the
//! running token [`Usage`]. A [`Client`] sends it through one of three wire
//! protocols (Bedrock Converse, Anthropic Messages, OpenAI Chat Completions)
//! and returns an updated copy plus a [`TurnResult`]. Failures are reduced
//! to a stable [`ErrorKind`].
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bedrock_llm::{
//!     Client, ClientConfig, Conversation, ConversationOptions, HttpTransport,
//!     HttpTransportConfig, Message, Param, ToolDefinition, TracingMiddleware,
//! };
//!
//! # async fn run() -> bedrock_llm::Result<()> {
//! let transport = HttpTransport::new(
//!     HttpTransportConfig::for_region("us-east-1").with_bearer_token("api-key"),
//! )?;
//! let client = Client::new(
//!     ClientConfig::new(Arc::new(transport)).with_middleware(TracingMiddleware::new()),
//! )?;
//!
//! let weather = ToolDefinition::new(
//!     "get_weather",
//!     "Current weather for a city",
//!     vec![Param::string("city")],
//! )?;
//! let conversation = Conversation::new(
//!     "anthropic.claude-3-5-sonnet-20241022-v2:0",
//!     ConversationOptions {
//!         system: vec!["You are terse.".into()],
//!         tools: vec![weather],
//!         ..Default::default()
//!     },
//! )?;
//!
//! let (conversation, turn) = client
//!     .send(&conversation, [Message::user("Weather in Oslo?")])
//!     .await?;
//! for call in turn.tool_calls() {
//!     let args = conversation.tool(&call.name).map(|t| t.parse_arguments(call));
//!     println!("{} -> {:?}", call.name, args);
//! }
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod client;
pub mod conversation;
pub mod error;
pub mod middleware;
pub mod protocol;
pub mod tools;
pub mod transport;
pub mod types;

pub use crate::classify::{TransportError, classify};
pub use crate::client::{CallContext, Client, ClientConfig};
pub use crate::conversation::{
    Conversation, ConversationOptions, InferenceConfig, ReasoningEffort, ToolChoice,
};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::middleware::{CacheCheckpointMiddleware, Middleware, Next, TracingMiddleware};
pub use crate::protocol::{
    AnthropicProtocol, ConverseProtocol, InvokeRequest, OpenAiProtocol, Operation, Protocol,
    standard_protocols,
};
pub use crate::tools::{
    Param, ParamType, ToolArgumentError, ToolCallArgs, ToolDefinition, parse_arguments,
};
pub use crate::transport::{HttpTransport, HttpTransportConfig, InvokeReply, Transport};
pub use crate::types::{
    ContentPart, FinishReason, Image, ImageSource, Message, Role, Thinking, ToolCall, ToolResult,
    TurnResult, Usage,
};
pub use tokio_util::sync::CancellationToken;
