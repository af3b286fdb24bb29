//! Tool declarations, argument validation and result construction.
//!
//! The crate never executes tools. Callers read [`ToolCall`]s off a
//! [`TurnResult`](crate::TurnResult), validate them with
//! [`ToolDefinition::parse_arguments`], run whatever they like, and send the
//! outcome back with [`ToolCall::result`] or [`tool_result`].

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::types::{Message, ToolCall};

const MAX_TOOL_NAME_LEN: usize = 64;

static TOOL_NAME_RE: LazyLock<regex_lite::Regex> = LazyLock::new(|| {
    regex_lite::Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("tool name pattern is valid")
});

// MARK: - Parameters

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number | Self::Integer => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl Param {
    pub fn new(name: impl Into<String>, param_type: ParamType, required: bool) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::String, true)
    }

    pub fn optional_string(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::String, false)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Number, true)
    }

    pub fn optional_number(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Number, false)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Integer, true)
    }

    pub fn optional_integer(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Integer, false)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Boolean, true)
    }

    pub fn optional_boolean(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Boolean, false)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Build the JSON-Schema object sent to the backend for `params`.
///
/// `properties` and `required` are always present, even when empty.
pub fn build_tool_schema(params: &[Param]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in params {
        let mut prop = Map::new();
        prop.insert("type".into(), json!(param.param_type.as_str()));
        if !param.description.is_empty() {
            prop.insert("description".into(), json!(param.description));
        }
        properties.insert(param.name.clone(), Value::Object(prop));

        if param.required {
            required.push(json!(param.name));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

// MARK: - Definitions

/// A tool the model may call.
///
/// `params` is kept alongside the rendered schema so incoming calls can be
/// validated; only `input_schema` crosses the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        params: Vec<Param>,
    ) -> Result<Self> {
        let name = name.into();
        validate_tool_name(&name)?;
        Ok(Self {
            name,
            description: description.into(),
            input_schema: build_tool_schema(&params),
            params,
        })
    }

    /// Declare a tool from a hand-written schema. Calls to it are not
    /// type-checked by [`parse_arguments`](Self::parse_arguments).
    pub fn with_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Result<Self> {
        let name = name.into();
        validate_tool_name(&name)?;
        if !input_schema.is_object() {
            return Err(Error::config(format!(
                "tool {name:?}: input schema must be a JSON object"
            )));
        }
        Ok(Self {
            name,
            description: description.into(),
            input_schema,
            params: Vec::new(),
        })
    }

    pub fn parse_arguments(&self, call: &ToolCall) -> Result<ToolCallArgs, ToolArgumentError> {
        parse_arguments(call, &self.params)
    }
}

pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.len() > MAX_TOOL_NAME_LEN {
        return Err(Error::config(format!(
            "tool name {name:?} exceeds {MAX_TOOL_NAME_LEN} characters"
        )));
    }
    if !TOOL_NAME_RE.is_match(name) {
        return Err(Error::config(format!(
            "tool name {name:?} must start with a letter and contain only letters, digits and underscores"
        )));
    }
    Ok(())
}

// MARK: - Arguments

#[derive(Debug, thiserror::Error)]
pub enum ToolArgumentError {
    #[error("malformed tool arguments: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("tool arguments must be a JSON object")]
    NotAnObject,

    #[error("missing required parameter {0:?}")]
    MissingRequired(String),

    #[error("parameter {name:?}: expected {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Validated arguments of a tool call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallArgs(Map<String, Value>);

impl ToolCallArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    /// Integer view of a numeric argument, truncated toward zero.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        let value = self.0.get(name)?;
        value.as_i64().or_else(|| value.as_f64().map(|f| f.trunc() as i64))
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(Value::as_bool)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// Decode `call.arguments` and check it against `params`.
///
/// Keys not declared in `params` are kept and ignored.
pub fn parse_arguments(
    call: &ToolCall,
    params: &[Param],
) -> Result<ToolCallArgs, ToolArgumentError> {
    let raw = call.arguments.trim();
    let value: Value = if raw.is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(raw)?
    };
    let Value::Object(map) = value else {
        return Err(ToolArgumentError::NotAnObject);
    };

    for param in params {
        match map.get(&param.name) {
            None | Some(Value::Null) if param.required => {
                return Err(ToolArgumentError::MissingRequired(param.name.clone()));
            }
            None | Some(Value::Null) => {}
            Some(value) if !param.param_type.accepts(value) => {
                return Err(ToolArgumentError::TypeMismatch {
                    name: param.name.clone(),
                    expected: param.param_type.as_str(),
                    found: json_type_name(value),
                });
            }
            Some(_) => {}
        }
    }

    Ok(ToolCallArgs(map))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// MARK: - Results

/// Build the tool-result message answering `tool_call_id`.
pub fn tool_result(
    tool_call_id: impl Into<String>,
    content: impl Into<String>,
    is_error: bool,
) -> Message {
    Message::tool_result(tool_call_id, content, is_error)
}

impl ToolCall {
    pub fn result(&self, content: impl Into<String>) -> Message {
        tool_result(self.id.clone(), content, false)
    }

    pub fn error_result(&self, content: impl Into<String>) -> Message {
        tool_result(self.id.clone(), content, true)
    }
}
