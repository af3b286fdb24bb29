//! Shared helpers for the protocol translators.

use std::collections::HashSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{ContentPart, Image, ImageSource, Message, Role, ToolCall};

/// Most cache markers a single request may carry.
pub const MAX_CACHE_POINTS: usize = 4;

/// Regional inference-profile prefixes that may precede a model id.
const REGION_PREFIXES: &[&str] = &["us.", "eu.", "apac.", "global."];

const CACHE_CAPABLE_PREFIXES: &[&str] = &["anthropic."];

// MARK: - Model Detection

/// Strip a leading regional inference-profile prefix such as `us.`.
pub fn base_model_id(model_id: &str) -> &str {
    REGION_PREFIXES
        .iter()
        .find_map(|prefix| model_id.strip_prefix(prefix))
        .unwrap_or(model_id)
}

/// Whether the model accepts cache markers and replayed reasoning on the
/// Converse operation.
pub fn is_cache_capable_model(model_id: &str) -> bool {
    let base = base_model_id(model_id);
    CACHE_CAPABLE_PREFIXES
        .iter()
        .any(|prefix| base.starts_with(prefix))
}

// MARK: - System Messages

/// Text of `Role::System` messages found inside the message list.
pub fn inline_system_text(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(Message::text)
        .filter(|t| !t.is_empty())
        .collect()
}

// MARK: - Cache Checkpoints

/// Indices of messages whose caller-requested checkpoint fits in `budget`.
///
/// The most recent checkpoints win.
pub fn select_cache_checkpoints(messages: &[Message], budget: usize) -> HashSet<usize> {
    let requested: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.cache_checkpoint && m.role != Role::System)
        .map(|(i, _)| i)
        .collect();

    if requested.len() > budget {
        debug!(
            requested = requested.len(),
            budget, "Dropping oldest cache checkpoints over the marker limit"
        );
    }

    requested.into_iter().rev().take(budget).collect()
}

// MARK: - Message Ordering

/// One item of an outgoing wire message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment<'a> {
    Part(&'a ContentPart),
    CachePoint,
}

/// An outgoing message after role mapping, filtering and merging.
#[derive(Debug, Clone, PartialEq)]
pub struct WireTurn<'a, R> {
    pub role: R,
    pub segments: Vec<Segment<'a>>,
}

impl<'a, R> WireTurn<'a, R> {
    pub fn parts(&self) -> impl Iterator<Item = &'a ContentPart> + '_ {
        self.segments.iter().filter_map(|s| match s {
            Segment::Part(part) => Some(*part),
            Segment::CachePoint => None,
        })
    }
}

/// Map, filter and (optionally) merge messages into wire turns.
///
/// * `map_role` returns `None` for messages that are emitted elsewhere
///   (system text hoisted into a dedicated field).
/// * `keep` drops parts the backend cannot accept; a message left empty is
///   skipped entirely, checkpoint included.
/// * With `merge`, consecutive turns with equal mapped roles are joined by
///   concatenating their segments in order.
pub fn plan_turns<'a, R: Copy + PartialEq>(
    messages: &'a [Message],
    map_role: impl Fn(Role) -> Option<R>,
    keep: impl Fn(&ContentPart) -> bool,
    checkpoints: &HashSet<usize>,
    merge: bool,
) -> Vec<WireTurn<'a, R>> {
    let mut turns: Vec<WireTurn<'a, R>> = Vec::with_capacity(messages.len());

    for (index, msg) in messages.iter().enumerate() {
        let Some(role) = map_role(msg.role) else {
            continue;
        };

        let mut segments: Vec<Segment<'a>> = msg
            .content
            .iter()
            .filter(|part| keep(part))
            .map(Segment::Part)
            .collect();
        if segments.is_empty() {
            continue;
        }
        if checkpoints.contains(&index) {
            segments.push(Segment::CachePoint);
        }

        match turns.last_mut() {
            Some(last) if merge && last.role == role => last.segments.extend(segments),
            _ => turns.push(WireTurn { role, segments }),
        }
    }

    turns
}

// MARK: - Tool Calls

/// Decode a tool call's raw arguments into a JSON object for protocols that
/// send them structured. Empty arguments become `{}`.
pub fn tool_input(call: &ToolCall) -> Result<Value> {
    let raw = call.arguments.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(raw).map_err(|e| {
        Error::adapter(format!(
            "tool call {} ({}): malformed arguments: {e}",
            call.id, call.name
        ))
        .with_source(e)
    })
}

/// Re-encode a structured tool input as the raw argument string.
pub fn tool_arguments(input: &Value) -> String {
    match input {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

// MARK: - Reply Blocks

/// Decode one reply content block whose kind is `kind`.
///
/// Blocks of a kind outside `known` are skipped. A block of a known kind
/// that does not decode is an adapter error.
pub fn decode_reply_block<T: DeserializeOwned>(
    block: Value,
    kind: Option<&str>,
    known: &[&str],
) -> Result<Option<T>> {
    let Some(kind) = kind.filter(|kind| known.contains(kind)) else {
        debug!(kind = ?kind, "Skipping unrecognized reply block");
        return Ok(None);
    };
    serde_json::from_value(block).map(Some).map_err(|e| {
        Error::adapter(format!("malformed {kind} block in reply: {e}")).with_source(e)
    })
}

// MARK: - Images

/// Short format name (`png`, `jpeg`, ...) for an image MIME type.
pub fn image_format(media_type: &str) -> Option<&'static str> {
    let subtype = media_type
        .trim()
        .to_ascii_lowercase()
        .rsplit('/')
        .next()
        .map(str::to_string)?;
    match subtype.as_str() {
        "png" => Some("png"),
        "jpeg" | "jpg" => Some("jpeg"),
        "gif" => Some("gif"),
        "webp" => Some("webp"),
        _ => None,
    }
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// `data:` URI for inline images, the URL itself otherwise.
pub fn image_uri(image: &Image) -> String {
    match &image.source {
        ImageSource::Bytes(bytes) => {
            format!("data:{};base64,{}", image.media_type, encode_base64(bytes))
        }
        ImageSource::Url(url) => url.clone(),
    }
}

// MARK: - Provider Options

/// Merge caller-supplied top-level fields into a request body without
/// overwriting anything the translator set.
pub fn merge_provider_options(body: &mut Value, options: Option<&Map<String, Value>>) {
    let (Some(options), Value::Object(target)) = (options, body) else {
        return;
    };
    for (key, value) in options {
        if target.contains_key(key) {
            debug!(key = %key, "Ignoring provider option that overrides a translated field");
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}
