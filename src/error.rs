use std::fmt;

use serde::{Deserialize, Serialize};

/// Boxed cause carried by [`Error`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Stable taxonomy every failure is reduced to.
///
/// Callers branch on this (retry on `RateLimit`/`Server`, trim history on
/// `ContextLength`, ...) instead of matching on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or unknown protocol, no transport, or an invalid conversation.
    Config,
    /// Marshal/unmarshal failure while translating to or from the wire.
    Adapter,
    Authentication,
    NotFound,
    InvalidRequest,
    RateLimit,
    Server,
    ContextLength,
    ContentFilter,
    /// The call was cancelled or its deadline elapsed.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Adapter => "adapter",
            Self::Authentication => "authentication",
            Self::NotFound => "not_found",
            Self::InvalidRequest => "invalid_request",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::ContextLength => "context_length",
            Self::ContentFilter => "content_filter",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error returned by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
#[error("llm [{kind}]{}: {message}", protocol_suffix(.protocol))]
pub struct Error {
    kind: ErrorKind,
    protocol: Option<String>,
    message: String,
    #[source]
    source: Option<BoxError>,
    raw: Option<Vec<u8>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            protocol: None,
            message: message.into(),
            source: None,
            raw: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn adapter(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Adapter, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Tag the error with the protocol id that produced it.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach the raw wire bytes that could not be processed.
    pub fn with_raw(mut self, raw: impl Into<Vec<u8>>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn raw(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::RateLimit | ErrorKind::Server)
    }
}

fn protocol_suffix(protocol: &Option<String>) -> String {
    protocol.as_deref().map(|p| format!(" {p}")).unwrap_or_default()
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::adapter(format!("JSON error: {err}")).with_source(err)
    }
}
