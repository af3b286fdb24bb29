use bedrock_llm::{AnthropicProtocol, FinishReason, Operation, Protocol};

use crate::{GoldenTest, weather_loop};

#[test]
fn test_anthropic_request_transformation() {
    let golden = GoldenTest::new("anthropic");
    let conversation = weather_loop();

    let request = AnthropicProtocol::new()
        .transform_request(&conversation)
        .expect("Failed to build anthropic request");

    assert_eq!(request.operation, Operation::Invoke);
    golden.assert_body("weather_loop_request", &request.body);
}

#[test]
fn test_anthropic_response_transformation() {
    let golden = GoldenTest::new("anthropic");
    let body = golden.load_bytes("thinking_reply");

    let turn = AnthropicProtocol::new()
        .transform_response(&body)
        .expect("Failed to parse anthropic reply");

    assert_eq!(turn.finish_reason, FinishReason::Stop);
    assert_eq!(turn.text(), "Yes, bring one.");
    golden.assert_json("thinking_turn", &turn);
}
