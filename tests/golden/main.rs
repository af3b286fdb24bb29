use std::fs;
use std::path::PathBuf;

use pretty_assertions::assert_eq;
use serde::de::DeserializeOwned;

mod anthropic;
mod converse;
mod openai;

pub struct GoldenTest {
    root: PathBuf,
}

impl GoldenTest {
    pub fn new(suite: &str) -> Self {
        let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");
        let root = PathBuf::from(manifest_dir)
            .join("tests")
            .join("golden")
            .join("data")
            .join(suite);
        Self { root }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    pub fn load_bytes(&self, name: &str) -> Vec<u8> {
        let path = self.path(name);
        fs::read(&path).unwrap_or_else(|_| panic!("Failed to read golden file: {path:?}"))
    }

    pub fn load_json<T: DeserializeOwned>(&self, name: &str) -> T {
        let path = self.path(name);
        serde_json::from_slice(&self.load_bytes(name))
            .unwrap_or_else(|e| panic!("Failed to parse golden file {path:?}: {e}"))
    }

    /// Compare a wire body against the stored fixture, ignoring formatting
    /// and key order.
    pub fn assert_body(&self, name: &str, body: &[u8]) {
        let actual: serde_json::Value =
            serde_json::from_slice(body).expect("Request body is not valid JSON");
        self.assert_json(name, &actual);
    }

    pub fn assert_json<T: serde::Serialize>(&self, name: &str, actual: &T) {
        let expected_path = self.path(name);
        let actual_val = serde_json::to_value(actual).expect("Failed to serialize actual value");

        if !expected_path.exists() {
            panic!(
                "Golden file missing: {:?}.\nActual content:\n{}",
                expected_path,
                serde_json::to_string_pretty(&actual_val).unwrap_or_default()
            );
        }

        let expected_val: serde_json::Value = self.load_json(name);
        assert_eq!(expected_val, actual_val, "Golden test failed for {name}");
    }
}

/// The shared multi-turn tool conversation every protocol is checked with.
pub fn weather_loop() -> bedrock_llm::Conversation {
    let conversation: bedrock_llm::Conversation =
        GoldenTest::new("conversation").load_json("weather_loop");
    conversation.validate().expect("fixture conversation is invalid");
    conversation
}
