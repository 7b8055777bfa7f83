//! Gemini specific values kept in [`Message::extra`] and [`ToolCall::extra`].

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bridge_domain::{Message, ToolCall};
use serde_json::{Map, Value};

use super::request::{CodeExecutionResult, ExecutableCode, VideoMetadata};

const VIDEO_META_DATA: &str = "gemini_video_meta_data";
const THOUGHT_SIGNATURE: &str = "gemini_thought_signature";
const GROUNDING_METADATA: &str = "gemini_ground_metadata";
const EXECUTABLE_CODE: &str = "gemini_executable_code";
const CODE_EXECUTION_RESULT: &str = "gemini_code_execution_result";

fn set_signature(extra: &mut Map<String, Value>, signature: &[u8]) {
    if !signature.is_empty() {
        extra.insert(THOUGHT_SIGNATURE.to_string(), Value::String(STANDARD.encode(signature)));
    }
}

fn signature(extra: &Map<String, Value>) -> Option<Vec<u8>> {
    let encoded = extra.get(THOUGHT_SIGNATURE)?.as_str()?;
    STANDARD.decode(encoded).ok().filter(|signature| !signature.is_empty())
}

/// Stores the signature the model attached to a text or inline data part.
pub fn set_thought_signature(message: &mut Message, signature: &[u8]) {
    set_signature(&mut message.extra, signature);
}

pub fn thought_signature(message: &Message) -> Option<Vec<u8>> {
    signature(&message.extra)
}

/// Stores the signature of a function call part. With parallel calls only the
/// first call carries one.
pub fn set_tool_call_thought_signature(call: &mut ToolCall, signature: &[u8]) {
    set_signature(&mut call.extra, signature);
}

pub fn tool_call_thought_signature(call: &ToolCall) -> Option<Vec<u8>> {
    signature(&call.extra)
}

/// Sets clip and sampling settings for the input video at `url`.
pub fn set_input_video_metadata(message: &mut Message, url: impl Into<String>, metadata: &VideoMetadata) {
    let Ok(value) = serde_json::to_value(metadata) else {
        return;
    };
    let entry = message
        .extra
        .entry(VIDEO_META_DATA)
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(videos) = entry {
        videos.insert(url.into(), value);
    }
}

pub fn input_video_metadata(message: &Message, url: &str) -> Option<VideoMetadata> {
    let value = message.extra.get(VIDEO_META_DATA)?.get(url)?;
    serde_json::from_value(value.clone()).ok()
}

pub(crate) fn set_grounding_metadata(message: &mut Message, metadata: Value) {
    message.extra.insert(GROUNDING_METADATA.to_string(), metadata);
}

/// Grounding sources of a search grounded answer, as sent by the API.
pub fn grounding_metadata(message: &Message) -> Option<&Value> {
    message.extra.get(GROUNDING_METADATA)
}

pub(crate) fn set_executable_code(message: &mut Message, code: &ExecutableCode) {
    if let Ok(value) = serde_json::to_value(code) {
        message.extra.insert(EXECUTABLE_CODE.to_string(), value);
    }
}

/// Code the model ran through the code execution tool.
pub fn executable_code(message: &Message) -> Option<ExecutableCode> {
    serde_json::from_value(message.extra.get(EXECUTABLE_CODE)?.clone()).ok()
}

pub(crate) fn set_code_execution_result(message: &mut Message, result: &CodeExecutionResult) {
    if let Ok(value) = serde_json::to_value(result) {
        message.extra.insert(CODE_EXECUTION_RESULT.to_string(), value);
    }
}

pub fn code_execution_result(message: &Message) -> Option<CodeExecutionResult> {
    serde_json::from_value(message.extra.get(CODE_EXECUTION_RESULT)?.clone()).ok()
}
