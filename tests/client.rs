use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bedrock_llm::{
    CacheCheckpointMiddleware, CallContext, CancellationToken, Client, ClientConfig, Conversation,
    ConversationOptions, ErrorKind, FinishReason, InvokeReply, InvokeRequest, Message, Middleware,
    Next, Param, Result, ToolDefinition, TracingMiddleware, Transport, TransportError, TurnResult,
    Usage,
};
use futures::future::BoxFuture;
use serde_json::{Value, json};

const CLAUDE: &str = "anthropic.claude-3-5-sonnet-20241022-v2:0";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Replays canned replies in order and records every request it sees.
#[derive(Default)]
struct ScriptedTransport {
    replies: Mutex<VecDeque<std::result::Result<Vec<u8>, TransportError>>>,
    requests: Mutex<Vec<InvokeRequest>>,
}

impl ScriptedTransport {
    fn new(replies: Vec<std::result::Result<Vec<u8>, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::default(),
        })
    }

    fn requests(&self) -> Vec<InvokeRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn request_body(&self, index: usize) -> Value {
        serde_json::from_slice(&self.requests()[index].body).unwrap()
    }
}

impl Transport for ScriptedTransport {
    fn invoke<'a>(
        &'a self,
        request: &'a InvokeRequest,
    ) -> BoxFuture<'a, std::result::Result<InvokeReply, TransportError>> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("transport called more often than scripted");
        Box::pin(async move { reply.map(InvokeReply::new) })
    }
}

/// Never answers.
struct HangingTransport;

impl Transport for HangingTransport {
    fn invoke<'a>(
        &'a self,
        _request: &'a InvokeRequest,
    ) -> BoxFuture<'a, std::result::Result<InvokeReply, TransportError>> {
        Box::pin(futures::future::pending())
    }
}

fn make_reply(content: Value, stop_reason: &str, input: u64, output: u64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "output": {"message": {"role": "assistant", "content": content}},
        "stopReason": stop_reason,
        "usage": {"inputTokens": input, "outputTokens": output}
    }))
    .unwrap()
}

fn make_weather_tool() -> ToolDefinition {
    ToolDefinition::new(
        "get_weather",
        "Current weather for a city",
        vec![Param::string("city").describe("City name")],
    )
    .unwrap()
}

fn make_conversation() -> Conversation {
    Conversation::new(
        CLAUDE,
        ConversationOptions {
            system: vec!["You are a weather assistant.".into()],
            tools: vec![make_weather_tool()],
            ..Default::default()
        },
    )
    .unwrap()
}

fn make_client(transport: Arc<dyn Transport>) -> Client {
    Client::new(ClientConfig::new(transport)).unwrap()
}

/// Logs `name:in` / `name:out` around the rest of the chain.
struct RecordingMiddleware {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Middleware for RecordingMiddleware {
    fn handle<'a>(
        &'a self,
        conversation: Conversation,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<TurnResult>> {
        Box::pin(async move {
            self.log.lock().unwrap().push(format!("{}:in", self.name));
            let outcome = next.run(conversation).await;
            self.log.lock().unwrap().push(format!("{}:out", self.name));
            outcome
        })
    }
}

/// Answers without touching the transport.
struct CannedMiddleware;

impl Middleware for CannedMiddleware {
    fn handle<'a>(
        &'a self,
        _conversation: Conversation,
        _next: Next<'a>,
    ) -> BoxFuture<'a, Result<TurnResult>> {
        Box::pin(async {
            Ok(TurnResult {
                message: Message::assistant("from cache"),
                finish_reason: FinishReason::Stop,
                raw_finish_reason: "end_turn".into(),
                usage: Usage::default(),
                response_id: None,
            })
        })
    }
}

/// Appends an extra instruction to the outgoing snapshot only.
struct InjectingMiddleware;

impl Middleware for InjectingMiddleware {
    fn handle<'a>(
        &'a self,
        mut conversation: Conversation,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<TurnResult>> {
        conversation.messages.push(Message::user("Answer in Norwegian."));
        next.run(conversation)
    }
}

// ---------------------------------------------------------------------------
// Exchange flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_tool_loop_end_to_end() {
    let transport = ScriptedTransport::new(vec![
        Ok(make_reply(
            json!([
                {"text": "Let me check."},
                {"toolUse": {"toolUseId": "tooluse_1", "name": "get_weather", "input": {"city": "Oslo"}}}
            ]),
            "tool_use",
            100,
            20,
        )),
        Ok(make_reply(json!([{"text": "4C and cloudy."}]), "end_turn", 150, 10)),
    ]);
    let client = make_client(transport.clone());
    let start = make_conversation();

    let (after_call, turn) = client
        .send(&start, [Message::user("Weather in Oslo?")])
        .await
        .unwrap();
    assert_eq!(turn.finish_reason, FinishReason::ToolUse);
    assert_eq!(after_call.messages.len(), 2);
    assert_eq!(after_call.usage.input_tokens, 100);

    let call = turn.tool_calls()[0].clone();
    let args = after_call
        .tool(&call.name)
        .unwrap()
        .parse_arguments(&call)
        .unwrap();
    assert_eq!(args.get_str("city"), Some("Oslo"));

    let (done, final_turn) = client
        .send(&after_call, [call.result("4C and cloudy")])
        .await
        .unwrap();
    assert_eq!(final_turn.finish_reason, FinishReason::Stop);
    assert_eq!(final_turn.text(), "4C and cloudy.");

    assert_eq!(done.messages.len(), 4);
    assert_eq!(
        done.usage,
        Usage {
            input_tokens: 250,
            output_tokens: 30,
            ..Default::default()
        }
    );

    // Inputs are never modified.
    assert!(start.messages.is_empty());
    assert_eq!(after_call.messages.len(), 2);

    // The second request carries the tool result in a user turn.
    assert_eq!(transport.requests().len(), 2);
    let body = transport.request_body(1);
    let roles: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["user", "assistant", "user"]);
    assert_eq!(
        body["messages"][2]["content"][0]["toolResult"]["toolUseId"],
        "tooluse_1"
    );
}

#[tokio::test]
async fn test_send_uses_conversation_protocol() {
    let reply = json!({
        "id": "chatcmpl-1",
        "choices": [{"message": {"content": "hi"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 3, "completion_tokens": 1}
    });
    let transport = ScriptedTransport::new(vec![Ok(serde_json::to_vec(&reply).unwrap())]);
    let client = make_client(transport.clone());

    let mut conversation = make_conversation();
    conversation.protocol = Some("openai".into());
    let (updated, turn) = client
        .send(&conversation, [Message::user("hello")])
        .await
        .unwrap();

    assert_eq!(turn.response_id.as_deref(), Some("chatcmpl-1"));
    assert_eq!(updated.usage.total_tokens(), 4);
    let request = &transport.requests()[0];
    assert_eq!(request.operation, bedrock_llm::Operation::Invoke);
    assert_eq!(transport.request_body(0)["messages"][0]["role"], "system");
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_transport_failure_is_classified() {
    let failure = TransportError::new("Too many requests, please wait before trying again.")
        .with_status(429)
        .with_exception("ThrottlingException")
        .with_body(br#"{"message":"Too many requests"}"#.to_vec());
    let transport = ScriptedTransport::new(vec![Err(failure)]);
    let client = make_client(transport.clone());
    let conversation = make_conversation();
    let snapshot = conversation.clone();

    let err = client
        .send(&conversation, [Message::user("hi")])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RateLimit);
    assert!(err.is_retryable());
    assert_eq!(err.protocol(), Some("converse"));
    assert!(err.raw().is_some());
    assert_eq!(conversation, snapshot);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn test_context_length_failure() {
    let failure = TransportError::new("prompt is too long: 212000 tokens > 200000 maximum")
        .with_status(500);
    let client = make_client(ScriptedTransport::new(vec![Err(failure)]));

    let err = client
        .send(&make_conversation(), [Message::user("hi")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContextLength);
}

#[tokio::test]
async fn test_unparseable_reply_is_adapter_error() {
    let client = make_client(ScriptedTransport::new(vec![Ok(b"<html>oops</html>".to_vec())]));

    let err = client
        .send(&make_conversation(), [Message::user("hi")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Adapter);
    assert_eq!(err.raw(), Some(&b"<html>oops</html>"[..]));
}

#[tokio::test]
async fn test_unknown_protocol_is_config_error() {
    let transport = ScriptedTransport::new(Vec::new());
    let client = make_client(transport.clone());
    let mut conversation = make_conversation();
    conversation.protocol = Some("grpc".into());

    let err = client
        .send(&conversation, [Message::user("hi")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_cancellation_aborts_call() {
    let client = make_client(Arc::new(HangingTransport));
    let token = CancellationToken::new();
    let context = CallContext::new().with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let conversation = make_conversation();
    let err = client
        .send_with(&context, &conversation, [Message::user("hi")])
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(conversation.messages.is_empty());
}

#[tokio::test]
async fn test_timeout_surfaces_cancelled() {
    let client = make_client(Arc::new(HangingTransport));
    let context = CallContext::new().with_timeout(Duration::from_millis(30));

    let err = client
        .send_with(&context, &make_conversation(), [Message::user("hi")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.protocol(), Some("converse"));
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_middleware_onion_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let transport = ScriptedTransport::new(vec![Ok(make_reply(
        json!([{"text": "ok"}]),
        "end_turn",
        1,
        1,
    ))]);
    let config = ClientConfig::new(transport)
        .with_middleware(RecordingMiddleware {
            name: "outer",
            log: log.clone(),
        })
        .with_middleware(RecordingMiddleware {
            name: "inner",
            log: log.clone(),
        });
    let client = Client::new(config).unwrap();

    client
        .send(&make_conversation(), [Message::user("hi")])
        .await
        .unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["outer:in", "inner:in", "inner:out", "outer:out"]
    );
}

#[tokio::test]
async fn test_middleware_short_circuit_skips_transport() {
    let transport = ScriptedTransport::new(Vec::new());
    let config = ClientConfig::new(transport.clone()).with_middleware(CannedMiddleware);
    let client = Client::new(config).unwrap();

    let (updated, turn) = client
        .send(&make_conversation(), [Message::user("hi")])
        .await
        .unwrap();

    assert!(transport.requests().is_empty());
    assert_eq!(turn.text(), "from cache");
    assert_eq!(updated.messages.len(), 2);
}

#[tokio::test]
async fn test_middleware_edits_stay_out_of_history() {
    let transport = ScriptedTransport::new(vec![Ok(make_reply(
        json!([{"text": "Det er kaldt."}]),
        "end_turn",
        5,
        3,
    ))]);
    let config = ClientConfig::new(transport.clone())
        .with_middleware(InjectingMiddleware)
        .with_middleware(CacheCheckpointMiddleware::new());
    let client = Client::new(config).unwrap();

    let (updated, _) = client
        .send(&make_conversation(), [Message::user("Weather?")])
        .await
        .unwrap();

    // The request saw the injected message and a checkpoint after it.
    let body = transport.request_body(0);
    let content = body["messages"][0]["content"].as_array().unwrap();
    assert_eq!(content[1]["text"], "Answer in Norwegian.");
    assert_eq!(content[2], json!({"cachePoint": {"type": "default"}}));

    // The returned history did not.
    assert_eq!(updated.messages.len(), 2);
    assert_eq!(updated.messages[0].text(), "Weather?");
    assert!(updated.messages.iter().all(|m| !m.cache_checkpoint));
}

#[tokio::test]
async fn test_tracing_middleware_passes_through() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("bedrock_llm=debug")
        .with_test_writer()
        .try_init();

    let transport = ScriptedTransport::new(vec![
        Ok(make_reply(json!([{"text": "ok"}]), "end_turn", 2, 1)),
        Err(TransportError::new("boom").with_status(500)),
    ]);
    let config = ClientConfig::new(transport).with_middleware(TracingMiddleware::new());
    let client = Client::new(config).unwrap();
    let conversation = make_conversation();

    let (_, turn) = client
        .send(&conversation, [Message::user("hi")])
        .await
        .unwrap();
    assert_eq!(turn.text(), "ok");

    let err = client
        .send(&conversation, [Message::user("again")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);
}
