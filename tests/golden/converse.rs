use bedrock_llm::{ConverseProtocol, FinishReason, Operation, Protocol};

use crate::{GoldenTest, weather_loop};

#[test]
fn test_converse_request_transformation() {
    let golden = GoldenTest::new("converse");
    let conversation = weather_loop();

    let request = ConverseProtocol::new()
        .transform_request(&conversation)
        .expect("Failed to build converse request");

    assert_eq!(request.operation, Operation::Converse);
    assert_eq!(request.model_id, conversation.model);
    golden.assert_body("weather_loop_request", &request.body);
}

#[test]
fn test_converse_request_without_cache_support() {
    let mut conversation = weather_loop();
    conversation.model = "amazon.nova-pro-v1:0".into();

    let request = ConverseProtocol::new().transform_request(&conversation).unwrap();
    let body = String::from_utf8(request.body).unwrap();
    assert!(!body.contains("cachePoint"));
}

#[test]
fn test_converse_response_transformation() {
    let golden = GoldenTest::new("converse");
    let body = golden.load_bytes("tool_use_reply");

    let turn = ConverseProtocol::new()
        .transform_response(&body)
        .expect("Failed to parse converse reply");

    assert_eq!(turn.finish_reason, FinishReason::ToolUse);
    golden.assert_json("tool_use_turn", &turn);
}
