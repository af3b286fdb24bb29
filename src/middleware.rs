//! Interceptors wrapped around every exchange.
//!
//! Middleware run in registration order on the way in and in reverse on the
//! way out. Each one receives an owned snapshot of the outgoing conversation
//! plus a [`Next`] handle; calling [`Next::run`] continues down the chain and
//! eventually performs the single transport call. Not calling it
//! short-circuits the exchange.
//!
//! Edits made to the snapshot only shape the outgoing request. The
//! conversation returned by [`Client::send`](crate::Client::send) is built
//! from the caller's messages, never from a middleware's copy.

use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::client::Exchange;
use crate::conversation::Conversation;
use crate::error::Result;
use crate::types::{Role, TurnResult};

/// Interceptor around one exchange.
///
/// Async methods return boxed futures so the trait stays dyn-compatible
/// (`Arc<dyn Middleware>`).
pub trait Middleware: Send + Sync {
    fn handle<'a>(
        &'a self,
        conversation: Conversation,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<TurnResult>>;
}

/// Continuation for the rest of the chain.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    exchange: &'a Exchange,
}

impl<'a> Next<'a> {
    pub(crate) fn new(remaining: &'a [Arc<dyn Middleware>], exchange: &'a Exchange) -> Self {
        Self {
            remaining,
            exchange,
        }
    }

    /// Id of the protocol this exchange was resolved to.
    pub fn protocol_id(&self) -> &'a str {
        self.exchange.protocol_id()
    }

    /// Hand the conversation to the next middleware, or to the transport
    /// once the chain is exhausted. Consumes the handle, so at most one
    /// downstream call can happen per middleware.
    pub fn run(self, conversation: Conversation) -> BoxFuture<'a, Result<TurnResult>> {
        match self.remaining.split_first() {
            Some((middleware, rest)) => {
                middleware.handle(conversation, Next::new(rest, self.exchange))
            }
            None => Box::pin(self.exchange.execute(conversation)),
        }
    }
}

// ---------------------------------------------------------------------------
// TracingMiddleware
// ---------------------------------------------------------------------------

/// Logs one `info!` per completed turn (or `warn!` per failure) with the
/// protocol, model, finish reason, token counts and latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMiddleware;

impl TracingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for TracingMiddleware {
    fn handle<'a>(
        &'a self,
        conversation: Conversation,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<TurnResult>> {
        Box::pin(async move {
            let protocol = next.protocol_id();
            let model = conversation.model.clone();
            debug!(
                protocol = %protocol,
                model = %model,
                messages = conversation.messages.len(),
                tools = conversation.visible_tools().len(),
                "Sending turn"
            );

            let started = Instant::now();
            let outcome = next.run(conversation).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match &outcome {
                Ok(turn) => info!(
                    protocol = %protocol,
                    model = %model,
                    finish_reason = %turn.finish_reason,
                    input_tokens = turn.usage.input_tokens,
                    output_tokens = turn.usage.output_tokens,
                    cache_read_tokens = turn.usage.cache_read_tokens,
                    elapsed_ms,
                    "Turn completed"
                ),
                Err(err) => warn!(
                    protocol = %protocol,
                    model = %model,
                    kind = %err.kind(),
                    error = %err,
                    elapsed_ms,
                    "Turn failed"
                ),
            }
            outcome
        })
    }
}

// ---------------------------------------------------------------------------
// CacheCheckpointMiddleware
// ---------------------------------------------------------------------------

/// Requests a cache checkpoint after the newest non-system messages of
/// every outgoing request, so the next turn can reuse the prefix.
///
/// Protocols without cache support ignore the flag.
#[derive(Debug, Clone, Copy)]
pub struct CacheCheckpointMiddleware {
    trailing: usize,
}

impl Default for CacheCheckpointMiddleware {
    fn default() -> Self {
        Self { trailing: 1 }
    }
}

impl CacheCheckpointMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the last `count` non-system messages instead of only the last.
    pub fn trailing(count: usize) -> Self {
        Self { trailing: count }
    }

    fn apply(&self, conversation: &mut Conversation) {
        conversation
            .messages
            .iter_mut()
            .rev()
            .filter(|m| m.role != Role::System)
            .take(self.trailing)
            .for_each(|m| m.cache_checkpoint = true);
    }
}

impl Middleware for CacheCheckpointMiddleware {
    fn handle<'a>(
        &'a self,
        mut conversation: Conversation,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<TurnResult>> {
        self.apply(&mut conversation);
        next.run(conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationOptions;
    use crate::types::Message;

    fn make_conversation(messages: Vec<Message>) -> Conversation {
        let mut conv = Conversation::new("anthropic.claude-3-haiku", ConversationOptions::default())
            .unwrap();
        conv.messages = messages;
        conv
    }

    #[test]
    fn test_cache_checkpoint_marks_last_message() {
        let mut conv = make_conversation(vec![
            Message::user("a"),
            Message::assistant("b"),
            Message::user("c"),
        ]);
        CacheCheckpointMiddleware::new().apply(&mut conv);
        let flags: Vec<bool> = conv.messages.iter().map(|m| m.cache_checkpoint).collect();
        assert_eq!(flags, vec![false, false, true]);
    }

    #[test]
    fn test_cache_checkpoint_skips_system_messages() {
        let mut conv = make_conversation(vec![
            Message::user("a"),
            Message::assistant("b"),
            Message::system("rules"),
        ]);
        CacheCheckpointMiddleware::trailing(2).apply(&mut conv);
        let flags: Vec<bool> = conv.messages.iter().map(|m| m.cache_checkpoint).collect();
        assert_eq!(flags, vec![true, true, false]);
    }

    #[test]
    fn test_cache_checkpoint_empty_conversation() {
        let mut conv = make_conversation(Vec::new());
        CacheCheckpointMiddleware::trailing(3).apply(&mut conv);
        assert!(conv.messages.is_empty());
    }
}
