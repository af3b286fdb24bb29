//! HTTP transport for the Bedrock runtime endpoint.
//!
//! Posts the translated body to `{endpoint}/model/{model}/{invoke|converse}`
//! with bearer-token (API key) authentication.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{InvokeReply, Transport};
use crate::classify::TransportError;
use crate::error::{Error, Result};
use crate::protocol::{InvokeRequest, Operation};

/// Default user agent.
pub const USER_AGENT: &str = concat!("bedrock-llm/", env!("CARGO_PKG_VERSION"));

/// Default connection timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

const DEFAULT_REGION: &str = "us-east-1";
const ERROR_TYPE_HEADER: &str = "x-amzn-errortype";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Settings for [`HttpTransport`]. Deserializable so it can be embedded in a
/// caller's own config file.
#[derive(Clone, Deserialize)]
pub struct HttpTransportConfig {
    /// Base URL, e.g. `https://bedrock-runtime.us-east-1.amazonaws.com`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Bedrock API key sent as `Authorization: Bearer`.
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_endpoint() -> String {
    regional_endpoint(DEFAULT_REGION)
}

fn default_user_agent() -> String {
    USER_AGENT.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    CONNECT_TIMEOUT.as_secs()
}

fn default_request_timeout_secs() -> u64 {
    REQUEST_TIMEOUT.as_secs()
}

fn regional_endpoint(region: &str) -> String {
    format!("https://bedrock-runtime.{region}.amazonaws.com")
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            bearer_token: None,
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl HttpTransportConfig {
    /// Config targeting the public runtime endpoint of `region`.
    pub fn for_region(region: &str) -> Self {
        Self {
            endpoint: regional_endpoint(region),
            ..Default::default()
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

impl fmt::Debug for HttpTransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransportConfig")
            .field("endpoint", &self.endpoint)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("user_agent", &self.user_agent)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    bearer_token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                Error::config(format!("failed to build HTTP client: {e}")).with_source(e)
            })?;
        Self::with_client(config, client)
    }

    /// Use a preconfigured `reqwest` client (proxies, custom TLS, ...).
    pub fn with_client(config: HttpTransportConfig, client: Client) -> Result<Self> {
        let endpoint = Url::parse(config.endpoint.trim_end_matches('/')).map_err(|e| {
            Error::config(format!("invalid endpoint {:?}: {e}", config.endpoint)).with_source(e)
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "endpoint {:?} must use http or https",
                config.endpoint
            )));
        }
        if config.bearer_token.is_none() {
            warn!(endpoint = %endpoint, "HTTP transport configured without a bearer token");
        }
        Ok(Self {
            client,
            endpoint,
            bearer_token: config.bearer_token,
        })
    }

    /// Full URL for an operation on `model_id`. The model id is
    /// percent-encoded since inference profile ARNs contain `:` and `/`.
    pub fn model_url(&self, model_id: &str, operation: Operation) -> Result<Url, TransportError> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        let raw = format!(
            "{base}/model/{}/{}",
            urlencoding::encode(model_id),
            operation.path_segment()
        );
        Url::parse(&raw)
            .map_err(|e| TransportError::new(format!("invalid model URL: {e}")).with_source(e))
    }

    async fn send(&self, request: &InvokeRequest) -> Result<InvokeReply, TransportError> {
        let url = self.model_url(&request.model_id, request.operation)?;
        debug!(url = %url, bytes = request.body.len(), "Invoking model");

        let mut builder = self
            .client
            .post(url)
            .header(CONTENT_TYPE, request.content_type)
            .header(ACCEPT, request.accept)
            .body(request.body.clone());
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(request_failed)?;
        let status = response.status();
        let exception = response
            .headers()
            .get(ERROR_TYPE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(request_failed)?.to_vec();

        if status.is_success() {
            return Ok(InvokeReply::new(body));
        }

        debug!(status = status.as_u16(), exception = ?exception, "Model invocation failed");
        Err(error_from_reply(status.as_u16(), exception, body))
    }
}

impl Transport for HttpTransport {
    fn invoke<'a>(
        &'a self,
        request: &'a InvokeRequest,
    ) -> BoxFuture<'a, Result<InvokeReply, TransportError>> {
        Box::pin(self.send(request))
    }
}

fn request_failed(err: reqwest::Error) -> TransportError {
    let message = if err.is_timeout() {
        format!("request timed out: {err}")
    } else {
        format!("request failed: {err}")
    };
    let mut transport_err = TransportError::new(message);
    if let Some(status) = err.status() {
        transport_err = transport_err.with_status(status.as_u16());
    }
    transport_err.with_source(err)
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "Message")]
    message: Option<String>,
    #[serde(default, rename = "__type")]
    error_type: Option<String>,
}

/// Build a [`TransportError`] from a non-2xx reply.
fn error_from_reply(status: u16, exception: Option<String>, body: Vec<u8>) -> TransportError {
    let parsed: ErrorBody = serde_json::from_slice(&body).unwrap_or_default();
    let message = parsed
        .message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            let text = String::from_utf8_lossy(&body).trim().to_string();
            if text.is_empty() {
                format!("HTTP status {status}")
            } else {
                text
            }
        });

    let mut err = TransportError::new(message).with_status(status).with_body(body);
    if let Some(exception) = exception.or(parsed.error_type) {
        err = err.with_exception(exception);
    }
    err
}
