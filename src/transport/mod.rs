//! Transport abstraction consumed by the [`Client`](crate::Client).
//!
//! A transport moves one [`InvokeRequest`] to the backend and returns the
//! reply body. Authentication, connection pooling, TLS and retries all live
//! behind this trait.

pub mod http;

use futures::future::BoxFuture;

use crate::classify::TransportError;
use crate::protocol::InvokeRequest;

pub use self::http::{HttpTransport, HttpTransportConfig};

/// Successful reply from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeReply {
    pub body: Vec<u8>,
}

impl InvokeReply {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self { body: body.into() }
    }
}

/// Performs a single invocation. Implementations must not retry on their
/// own; that decision belongs to the caller.
pub trait Transport: Send + Sync {
    fn invoke<'a>(
        &'a self,
        request: &'a InvokeRequest,
    ) -> BoxFuture<'a, Result<InvokeReply, TransportError>>;
}
