//! Wire protocol translation.
//!
//! A [`Protocol`] turns a [`Conversation`] snapshot into the exact request a
//! backend expects and turns the backend's reply back into a
//! [`TurnResult`]. Protocols are stateless; one instance serves any number
//! of concurrent exchanges.

pub mod anthropic;
pub mod converse;
pub mod openai;
pub mod util;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::conversation::Conversation;
use crate::error::Result;
use crate::types::TurnResult;

pub use self::anthropic::AnthropicProtocol;
pub use self::converse::ConverseProtocol;
pub use self::openai::OpenAiProtocol;

const JSON: &str = "application/json";

// MARK: - Invoke Request

/// Gateway operation a request is sent through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Vendor-native body passed through verbatim.
    Invoke,
    /// The gateway's own unified conversation schema.
    Converse,
}

impl Operation {
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Invoke => "invoke",
            Self::Converse => "converse",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// A fully translated request, ready for a [`Transport`](crate::Transport).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeRequest {
    pub operation: Operation,
    pub model_id: String,
    pub body: Vec<u8>,
    pub content_type: &'static str,
    pub accept: &'static str,
}

impl InvokeRequest {
    pub fn json(operation: Operation, model_id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            operation,
            model_id: model_id.into(),
            body,
            content_type: JSON,
            accept: JSON,
        }
    }
}

// MARK: - Protocol Trait

/// Bidirectional translator for one wire protocol.
pub trait Protocol: Send + Sync {
    /// Registry key, e.g. `"converse"`.
    fn protocol_id(&self) -> &str;

    /// Build the wire request for the conversation's next turn.
    fn transform_request(&self, conversation: &Conversation) -> Result<InvokeRequest>;

    /// Parse a successful reply body.
    fn transform_response(&self, body: &[u8]) -> Result<TurnResult>;
}

/// Registry holding every protocol this crate ships, keyed by id.
pub fn standard_protocols() -> HashMap<String, Arc<dyn Protocol>> {
    let protocols: [Arc<dyn Protocol>; 3] = [
        Arc::new(ConverseProtocol::new()),
        Arc::new(AnthropicProtocol::new()),
        Arc::new(OpenAiProtocol::new()),
    ];
    protocols
        .into_iter()
        .map(|p| (p.protocol_id().to_string(), p))
        .collect()
}
