//! Reduce transport failures to an [`ErrorKind`].
//!
//! Tier one is an exact lookup on the backend's exception name, then on the
//! HTTP status. Anything still unresolved (typically a 5xx with a
//! descriptive message) goes through a best-effort substring match.

use crate::error::{BoxError, Error, ErrorKind};

/// Failure reported by a [`Transport`](crate::Transport).
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    /// HTTP status, when the failure came from a reply.
    pub status: Option<u16>,
    /// Backend exception name such as `ThrottlingException`.
    pub exception: Option<String>,
    pub message: String,
    /// Reply body, kept for diagnosis.
    pub body: Option<Vec<u8>>,
    #[source]
    pub source: Option<BoxError>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            exception: None,
            message: message.into(),
            body: None,
            source: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// MARK: - Tier one

const EXCEPTION_TABLE: &[(&str, ErrorKind)] = &[
    ("AccessDeniedException", ErrorKind::Authentication),
    ("UnrecognizedClientException", ErrorKind::Authentication),
    ("ExpiredTokenException", ErrorKind::Authentication),
    ("InvalidSignatureException", ErrorKind::Authentication),
    ("MissingAuthenticationTokenException", ErrorKind::Authentication),
    ("ValidationException", ErrorKind::InvalidRequest),
    ("SerializationException", ErrorKind::InvalidRequest),
    ("ResourceNotFoundException", ErrorKind::NotFound),
    ("ThrottlingException", ErrorKind::RateLimit),
    ("TooManyRequestsException", ErrorKind::RateLimit),
    ("ServiceQuotaExceededException", ErrorKind::RateLimit),
    ("InternalServerException", ErrorKind::Server),
    ("ModelErrorException", ErrorKind::Server),
    ("ModelTimeoutException", ErrorKind::Server),
    ("ModelNotReadyException", ErrorKind::Server),
    ("ServiceUnavailableException", ErrorKind::Server),
];

/// Strip `namespace#` prefixes and `:detail` suffixes, as in
/// `com.amazon.coral.validate#ValidationException:http://...`.
fn normalize_exception(name: &str) -> &str {
    let name = name.rsplit('#').next().unwrap_or(name);
    name.split(':').next().unwrap_or(name).trim()
}

fn lookup_exception(name: &str) -> Option<ErrorKind> {
    let name = normalize_exception(name);
    EXCEPTION_TABLE
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, kind)| *kind)
}

fn lookup_status(status: u16) -> Option<ErrorKind> {
    match status {
        400 | 422 => Some(ErrorKind::InvalidRequest),
        401 | 403 => Some(ErrorKind::Authentication),
        404 => Some(ErrorKind::NotFound),
        429 => Some(ErrorKind::RateLimit),
        _ => None,
    }
}

// MARK: - Tier two

const MESSAGE_PATTERNS: &[(&str, ErrorKind)] = &[
    ("context length", ErrorKind::ContextLength),
    ("too many tokens", ErrorKind::ContextLength),
    ("context window", ErrorKind::ContextLength),
    ("prompt is too long", ErrorKind::ContextLength),
    ("input is too long", ErrorKind::ContextLength),
    ("content filter", ErrorKind::ContentFilter),
    ("guardrail", ErrorKind::ContentFilter),
];

fn match_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    MESSAGE_PATTERNS
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::Server)
}

/// Classify a transport failure. Pure; never looks at retry state.
pub fn classify(err: &TransportError) -> ErrorKind {
    if let Some(kind) = err.exception.as_deref().and_then(lookup_exception) {
        return kind;
    }
    if let Some(kind) = err.status.and_then(lookup_status) {
        return kind;
    }
    match_message(&err.message)
}

/// Wrap a transport failure as a crate [`Error`], keeping it as the source.
pub(crate) fn into_error(protocol: &str, err: TransportError) -> Error {
    let kind = classify(&err);
    let message = match (&err.exception, err.status) {
        (Some(exception), _) => format!("{}: {}", normalize_exception(exception), err.message),
        (None, Some(status)) => format!("HTTP {status}: {}", err.message),
        (None, None) => err.message.clone(),
    };
    let raw = err.body.clone();
    let mut wrapped = Error::new(kind, message)
        .with_protocol(protocol)
        .with_source(err);
    if let Some(raw) = raw {
        wrapped = wrapped.with_raw(raw);
    }
    wrapped
}
