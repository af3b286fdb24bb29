use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::tools::{ToolDefinition, validate_tool_name};
use crate::types::{Message, Role, Usage};

/// How the backend may use the declared tools on the next turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "name", rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    /// Hide the tools from the backend entirely.
    None,
    Required,
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Inference parameters. Unset fields are left to the backend's defaults
/// unless the wire protocol requires a value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Only honored by the OpenAI protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Backend-specific fields passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_options: Option<Map<String, Value>>,
}

/// Everything except the model id needed to start a [`Conversation`].
#[derive(Debug, Clone, Default)]
pub struct ConversationOptions {
    /// Registered protocol id; falls back to the client's default when unset.
    pub protocol: Option<String>,
    pub system: Vec<String>,
    pub tools: Vec<ToolDefinition>,
    pub config: InferenceConfig,
}

/// Serializable conversation state.
///
/// Sending never mutates a `Conversation`; [`Client::send`](crate::Client::send)
/// returns an updated copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default)]
    pub system: Vec<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub config: InferenceConfig,
    #[serde(default)]
    pub usage: Usage,
}

impl Conversation {
    pub fn new(model: impl Into<String>, options: ConversationOptions) -> Result<Self> {
        let conversation = Self {
            model: model.into(),
            protocol: options.protocol,
            system: options.system,
            messages: Vec::new(),
            tools: options.tools,
            config: options.config,
            usage: Usage::default(),
        };
        conversation.validate()?;
        Ok(conversation)
    }

    /// Check the invariants a constructed conversation must hold.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::config("model id must not be empty"));
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            validate_tool_name(&tool.name)?;
            if !seen.insert(tool.name.as_str()) {
                return Err(Error::config(format!("duplicate tool name {:?}", tool.name)));
            }
        }

        if let Some(ToolChoice::Named(name)) = &self.config.tool_choice {
            if !seen.contains(name.as_str()) {
                return Err(Error::config(format!(
                    "tool choice names undeclared tool {name:?}"
                )));
            }
        }

        if self.config.max_tokens == Some(0) {
            return Err(Error::config("max_tokens must be greater than zero"));
        }
        if let Some(temperature) = self.config.temperature {
            if !temperature.is_finite() || temperature < 0.0 {
                return Err(Error::config(format!("invalid temperature {temperature}")));
            }
        }
        if let Some(top_p) = self.config.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(Error::config(format!("top_p {top_p} outside [0, 1]")));
            }
        }

        Ok(())
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// Effective tool choice. An unset choice is left off the wire and
    /// backends treat it as `Auto`.
    pub fn tool_choice(&self) -> ToolChoice {
        self.config.tool_choice.clone().unwrap_or_default()
    }

    /// Tools visible to the backend for the next request.
    pub fn visible_tools(&self) -> &[ToolDefinition] {
        match self.config.tool_choice {
            Some(ToolChoice::None) => &[],
            _ => &self.tools,
        }
    }
}
