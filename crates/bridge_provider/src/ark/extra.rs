//! Ark specific values kept in [`Message::extra`].
//!
//! Every key is written by the chat models and survives
//! [`Message::concat`], so the values are readable from the merged message of
//! a stream as well.

use bridge_domain::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const REQUEST_ID: &str = "ark-request-id";
const MODEL_NAME: &str = "ark-model-name";
const SERVICE_TIER: &str = "ark-service-tier";
const RESPONSE_ID: &str = "ark-response-id";
const CONTEXT_ID: &str = "ark-context-id";
const RESPONSE_CACHING: &str = "ark-response-caching";
const CACHE_EXPIRE_AT: &str = "ark-response-cache-expire-at";
const INPUT_VIDEO_FPS: &str = "ark-input-video-fps";

/// Whether the reply was stored by the session cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Caching {
    Enabled,
    Disabled,
}

fn string<'a>(message: &'a Message, key: &str) -> Option<&'a str> {
    message.extra.get(key).and_then(Value::as_str)
}

fn set(message: &mut Message, key: &str, value: impl Into<Value>) {
    message.extra.insert(key.to_string(), value.into());
}

pub fn set_request_id(message: &mut Message, id: impl Into<String>) {
    set(message, REQUEST_ID, id.into());
}

/// The `X-Request-Id` of the call that produced the message.
pub fn request_id(message: &Message) -> Option<&str> {
    string(message, REQUEST_ID)
}

pub fn set_model_name(message: &mut Message, name: impl Into<String>) {
    set(message, MODEL_NAME, name.into());
}

pub fn model_name(message: &Message) -> Option<&str> {
    string(message, MODEL_NAME)
}

pub fn set_service_tier(message: &mut Message, tier: impl Into<String>) {
    set(message, SERVICE_TIER, tier.into());
}

pub fn service_tier(message: &Message) -> Option<&str> {
    string(message, SERVICE_TIER)
}

pub fn set_response_id(message: &mut Message, id: impl Into<String>) {
    set(message, RESPONSE_ID, id.into());
}

/// Id of the Responses API reply; pass it back as a previous response id to
/// continue the session.
pub fn response_id(message: &Message) -> Option<&str> {
    string(message, RESPONSE_ID)
}

pub fn set_context_id(message: &mut Message, id: impl Into<String>) {
    set(message, CONTEXT_ID, id.into());
}

pub fn context_id(message: &Message) -> Option<&str> {
    string(message, CONTEXT_ID)
}

pub fn set_caching(message: &mut Message, caching: Caching) {
    if let Ok(value) = serde_json::to_value(caching) {
        set(message, RESPONSE_CACHING, value);
    }
}

pub fn caching(message: &Message) -> Option<Caching> {
    message
        .extra
        .get(RESPONSE_CACHING)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

/// Sets the unix second after which the cached reply is gone.
pub fn set_cache_expire_at(message: &mut Message, expire_at: i64) {
    set(message, CACHE_EXPIRE_AT, expire_at);
}

pub fn cache_expire_at(message: &Message) -> Option<i64> {
    message.extra.get(CACHE_EXPIRE_AT).and_then(Value::as_i64)
}

/// Sets the sampling rate of the input video at `url`, sent as `fps` by the
/// Responses model.
pub fn set_input_video_fps(message: &mut Message, url: impl Into<String>, fps: f32) {
    let entry = message
        .extra
        .entry(INPUT_VIDEO_FPS)
        .or_insert_with(|| Value::Object(Default::default()));
    if !entry.is_object() {
        *entry = Value::Object(Default::default());
    }
    if let Value::Object(map) = entry {
        map.insert(url.into(), fps.into());
    }
}

pub fn input_video_fps(message: &Message, url: &str) -> Option<f32> {
    message
        .extra
        .get(INPUT_VIDEO_FPS)
        .and_then(|map| map.get(url))
        .and_then(Value::as_f64)
        .map(|fps| fps as f32)
}

/// Stops the session cache from continuing after any of `messages`.
pub fn invalidate_message_caches(messages: &mut [Message]) {
    for message in messages {
        message.extra.remove(CACHE_EXPIRE_AT);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_extras_survive_concat() {
        let mut first = Message::assistant("", vec![]);
        let mut second = Message::assistant("", vec![]);
        for message in [&mut first, &mut second] {
            set_request_id(message, "123456");
            set_model_name(message, "model name");
            set_service_tier(message, "service tier");
        }
        set_response_id(&mut first, "resp id");
        set_caching(&mut first, Caching::Enabled);

        let actual = Message::concat(&[first, second]).unwrap();

        assert_eq!(request_id(&actual), Some("123456"));
        assert_eq!(model_name(&actual), Some("model name"));
        assert_eq!(service_tier(&actual), Some("service tier"));
        assert_eq!(response_id(&actual), Some("resp id"));
        assert_eq!(caching(&actual), Some(Caching::Enabled));
    }

    #[test]
    fn test_invalidate_message_caches() {
        let mut fixture = vec![Message::assistant("a", vec![]), Message::user("b")];
        set_cache_expire_at(&mut fixture[0], 1_700_000_000);
        set_response_id(&mut fixture[0], "resp");

        invalidate_message_caches(&mut fixture);

        assert_eq!(cache_expire_at(&fixture[0]), None);
        assert_eq!(response_id(&fixture[0]), Some("resp"));
    }

    #[test]
    fn test_input_video_fps() {
        let mut fixture = Message::user("");
        set_input_video_fps(&mut fixture, "https://v/1.mp4", 2.0);
        set_input_video_fps(&mut fixture, "https://v/2.mp4", 0.5);

        assert_eq!(input_video_fps(&fixture, "https://v/1.mp4"), Some(2.0));
        assert_eq!(input_video_fps(&fixture, "https://v/2.mp4"), Some(0.5));
        assert_eq!(input_video_fps(&fixture, "https://v/3.mp4"), None);
    }
}
