//! Exchange orchestration.
//!
//! [`Client::send`] copies the conversation, runs the middleware chain, and
//! at the bottom of the chain translates the snapshot, invokes the
//! transport, and parses or classifies the outcome. On success the reply is
//! folded into the returned copy; on failure the caller's conversation is
//! left exactly as it was.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::classify::into_error;
use crate::conversation::Conversation;
use crate::error::{Error, Result};
use crate::middleware::{Middleware, Next};
use crate::protocol::{Protocol, standard_protocols};
use crate::transport::Transport;
use crate::types::{Message, TurnResult};

/// Protocol id used by [`ClientConfig::new`].
pub const DEFAULT_PROTOCOL: &str = "converse";

// ---------------------------------------------------------------------------
// CallContext
// ---------------------------------------------------------------------------

/// Per-call deadline and cancellation.
///
/// Both bound only the transport round-trip. Hitting either aborts the
/// in-flight request and yields an [`ErrorKind::Cancelled`](crate::ErrorKind::Cancelled)
/// error.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Drive `fut` to completion unless the deadline passes or the token
    /// fires first.
    async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        if self.is_cancelled() {
            return Err(Error::cancelled("call cancelled before dispatch"));
        }

        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, fut)
                    .await
                    .map_err(|_| Error::cancelled(format!("call timed out after {limit:?}"))),
                None => Ok(fut.await),
            }
        };

        match &self.cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::cancelled("call cancelled")),
                output = bounded => output,
            },
            None => bounded.await,
        }
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Everything a [`Client`] needs. Validated by [`Client::new`].
#[derive(Clone, Default)]
pub struct ClientConfig {
    pub transport: Option<Arc<dyn Transport>>,
    pub protocols: HashMap<String, Arc<dyn Protocol>>,
    /// Used when a conversation does not name a protocol itself.
    pub default_protocol: Option<String>,
    /// First entry is the outermost middleware.
    pub middleware: Vec<Arc<dyn Middleware>>,
}

impl ClientConfig {
    /// All bundled protocols, defaulting to Converse.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport: Some(transport),
            protocols: standard_protocols(),
            default_protocol: Some(DEFAULT_PROTOCOL.to_string()),
            middleware: Vec::new(),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Register (or replace) a protocol under its own id.
    pub fn with_protocol(mut self, protocol: Arc<dyn Protocol>) -> Self {
        self.protocols
            .insert(protocol.protocol_id().to_string(), protocol);
        self
    }

    pub fn with_default_protocol(mut self, id: impl Into<String>) -> Self {
        self.default_protocol = Some(id.into());
        self
    }

    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut protocols: Vec<&str> = self.protocols.keys().map(String::as_str).collect();
        protocols.sort_unstable();
        f.debug_struct("ClientConfig")
            .field("transport", &self.transport.is_some())
            .field("protocols", &protocols)
            .field("default_protocol", &self.default_protocol)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Drives exchanges with the backend. Cheap to clone; holds no per-call
/// state, so any number of sends may run concurrently on distinct
/// conversations.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    protocols: Arc<HashMap<String, Arc<dyn Protocol>>>,
    default_protocol: Option<String>,
    middleware: Arc<[Arc<dyn Middleware>]>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = config
            .transport
            .ok_or_else(|| Error::config("no transport configured"))?;
        if config.protocols.is_empty() {
            return Err(Error::config("no protocols registered"));
        }
        if let Some(id) = &config.default_protocol {
            if !config.protocols.contains_key(id) {
                return Err(Error::config(format!(
                    "default protocol {id:?} is not registered"
                )));
            }
        }

        Ok(Self {
            transport,
            protocols: Arc::new(config.protocols),
            default_protocol: config.default_protocol,
            middleware: config.middleware.into(),
        })
    }

    /// Protocol a conversation would be sent with.
    pub fn resolve_protocol(&self, conversation: &Conversation) -> Result<Arc<dyn Protocol>> {
        let id = conversation
            .protocol
            .as_deref()
            .or(self.default_protocol.as_deref())
            .ok_or_else(|| {
                Error::config("conversation names no protocol and the client has no default")
            })?;
        self.protocols
            .get(id)
            .cloned()
            .ok_or_else(|| Error::config(format!("unknown protocol {id:?}")))
    }

    /// Append `messages`, exchange one turn, and return the updated copy
    /// together with the turn. `conversation` itself is never modified.
    pub async fn send(
        &self,
        conversation: &Conversation,
        messages: impl IntoIterator<Item = Message>,
    ) -> Result<(Conversation, TurnResult)> {
        self.send_with(&CallContext::default(), conversation, messages)
            .await
    }

    /// [`send`](Self::send) bounded by a [`CallContext`].
    pub async fn send_with(
        &self,
        context: &CallContext,
        conversation: &Conversation,
        messages: impl IntoIterator<Item = Message>,
    ) -> Result<(Conversation, TurnResult)> {
        let protocol = self.resolve_protocol(conversation)?;

        let mut updated = conversation.clone();
        updated.messages.extend(messages);
        updated.validate()?;

        let exchange = Exchange {
            protocol,
            transport: Arc::clone(&self.transport),
            context: context.clone(),
        };
        let turn = Next::new(&self.middleware, &exchange)
            .run(updated.clone())
            .await?;

        updated.messages.push(turn.message.clone());
        updated.usage += turn.usage;
        Ok((updated, turn))
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut protocols: Vec<&str> = self.protocols.keys().map(String::as_str).collect();
        protocols.sort_unstable();
        f.debug_struct("Client")
            .field("protocols", &protocols)
            .field("default_protocol", &self.default_protocol)
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// The innermost step of the chain: one translate, invoke, parse cycle.
pub(crate) struct Exchange {
    protocol: Arc<dyn Protocol>,
    transport: Arc<dyn Transport>,
    context: CallContext,
}

impl Exchange {
    pub(crate) fn protocol_id(&self) -> &str {
        self.protocol.protocol_id()
    }

    pub(crate) async fn execute(&self, conversation: Conversation) -> Result<TurnResult> {
        let id = self.protocol_id();
        let request = self
            .protocol
            .transform_request(&conversation)
            .map_err(|e| e.with_protocol(id))?;
        debug!(
            protocol = %id,
            model = %request.model_id,
            operation = %request.operation,
            bytes = request.body.len(),
            "Dispatching request"
        );

        let reply = self
            .context
            .guard(self.transport.invoke(&request))
            .await
            .map_err(|e| e.with_protocol(id))?
            .map_err(|e| into_error(id, e))?;

        self.protocol
            .transform_response(&reply.body)
            .map_err(|e| e.with_protocol(id))
    }
}
