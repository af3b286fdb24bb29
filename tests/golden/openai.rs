use bedrock_llm::{FinishReason, OpenAiProtocol, Operation, Protocol};

use crate::{GoldenTest, weather_loop};

#[test]
fn test_openai_request_transformation() {
    let golden = GoldenTest::new("openai");
    let mut conversation = weather_loop();
    conversation.model = "openai.gpt-oss-120b-1:0".into();

    let request = OpenAiProtocol::new()
        .transform_request(&conversation)
        .expect("Failed to build openai request");

    assert_eq!(request.operation, Operation::Invoke);
    golden.assert_body("weather_loop_request", &request.body);
}

#[test]
fn test_openai_response_transformation() {
    let golden = GoldenTest::new("openai");
    let body = golden.load_bytes("tool_calls_reply");

    let turn = OpenAiProtocol::new()
        .transform_response(&body)
        .expect("Failed to parse openai reply");

    assert_eq!(turn.finish_reason, FinishReason::ToolUse);
    assert_eq!(turn.tool_calls().len(), 1);
    golden.assert_json("tool_calls_turn", &turn);
}
