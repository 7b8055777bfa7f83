use std::collections::HashMap;

use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{Display, EnumString};

use crate::Error;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    #[default]
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImageDetail {
    High,
    Low,
    Auto,
}

/// One part of a multimodal message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<ImageDetail>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    AudioUrl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    VideoUrl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    FileUrl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        Self::ImageUrl { url: url.into(), detail: None, mime_type: None }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct ToolCall {
    /// Position of the call within a streamed response. Chunks sharing an
    /// index belong to the same call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            index: None,
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall { name: name.into(), arguments: arguments.into() },
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTokenDetails {
    pub cached_tokens: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionTokensDetails {
    pub reasoning_tokens: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Setters)]
#[setters(into)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub prompt_token_details: PromptTokenDetails,
    pub completion_tokens: u64,
    pub completion_tokens_details: CompletionTokensDetails,
    pub total_tokens: u64,
}

impl TokenUsage {
    fn max(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.max(other.prompt_tokens),
            prompt_token_details: PromptTokenDetails {
                cached_tokens: self
                    .prompt_token_details
                    .cached_tokens
                    .max(other.prompt_token_details.cached_tokens),
            },
            completion_tokens: self.completion_tokens.max(other.completion_tokens),
            completion_tokens_details: CompletionTokensDetails {
                reasoning_tokens: self
                    .completion_tokens_details
                    .reasoning_tokens
                    .max(other.completion_tokens_details.reasoning_tokens),
            },
            total_tokens: self.total_tokens.max(other.total_tokens),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopLogProb {
    pub token: String,
    pub logprob: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bytes: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogProb {
    pub token: String,
    pub logprob: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bytes: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_logprobs: Vec<TopLogProb>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogProbs {
    pub content: Vec<LogProb>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct ResponseMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<LogProbs>,
}

/// A chat message exchanged with a model, or a chunk of one while streaming.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_input_multi_content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assistant_gen_multi_content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning_content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_meta: Option<ResponseMeta>,
    /// Provider specific values such as response ids or thought signatures.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), ..Default::default() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), ..Default::default() }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_calls, ..Default::default() }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            ..Default::default()
        }
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.response_meta.as_ref()?.finish_reason.as_deref()
    }

    pub fn usage(&self) -> Option<&TokenUsage> {
        self.response_meta.as_ref()?.usage.as_ref()
    }

    /// Merges streamed chunks into a single message.
    pub fn concat(chunks: &[Message]) -> anyhow::Result<Message> {
        let Some(first) = chunks.first() else {
            return Err(Error::EmptyConcat.into());
        };

        let mut result = Message { role: first.role, ..Default::default() };
        let mut tool_calls = Vec::new();
        let mut finish_reason = None;
        let mut usage: Option<TokenUsage> = None;
        let mut logprobs: Option<LogProbs> = None;

        for chunk in chunks {
            if chunk.role != result.role {
                return Err(Error::RoleMismatch { expected: result.role, actual: chunk.role }.into());
            }

            result.content.push_str(&chunk.content);
            result.reasoning_content.push_str(&chunk.reasoning_content);
            extend_parts(&mut result.user_input_multi_content, &chunk.user_input_multi_content);
            extend_parts(
                &mut result.assistant_gen_multi_content,
                &chunk.assistant_gen_multi_content,
            );
            tool_calls.extend(chunk.tool_calls.iter().cloned());

            if chunk.tool_call_id.is_some() {
                result.tool_call_id = chunk.tool_call_id.clone();
            }
            if chunk.tool_name.is_some() {
                result.tool_name = chunk.tool_name.clone();
            }

            if let Some(meta) = &chunk.response_meta {
                if let Some(reason) = meta.finish_reason.as_ref().filter(|r| !r.is_empty()) {
                    finish_reason = Some(reason.clone());
                }
                if let Some(chunk_usage) = meta.usage {
                    usage = Some(usage.map_or(chunk_usage, |u| u.max(chunk_usage)));
                }
                if let Some(chunk_logprobs) = &meta.logprobs {
                    logprobs
                        .get_or_insert_with(LogProbs::default)
                        .content
                        .extend(chunk_logprobs.content.iter().cloned());
                }
            }

            for (key, value) in &chunk.extra {
                result.extra.insert(key.clone(), value.clone());
            }
        }

        result.tool_calls = merge_tool_calls(tool_calls);
        if finish_reason.is_some() || usage.is_some() || logprobs.is_some() {
            result.response_meta = Some(ResponseMeta { finish_reason, usage, logprobs });
        }

        Ok(result)
    }
}

fn extend_parts(target: &mut Vec<ContentPart>, parts: &[ContentPart]) {
    for part in parts {
        match (target.last_mut(), part) {
            (Some(ContentPart::Text { text }), ContentPart::Text { text: next }) => {
                text.push_str(next)
            }
            _ => target.push(part.clone()),
        }
    }
}

fn merge_tool_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut merged: Vec<ToolCall> = Vec::with_capacity(calls.len());
    let mut positions: HashMap<usize, usize> = HashMap::new();

    for call in calls {
        let Some(index) = call.index else {
            merged.push(call);
            continue;
        };

        match positions.get(&index) {
            Some(&position) => {
                let target = &mut merged[position];
                if target.id.is_empty() {
                    target.id = call.id;
                }
                if target.call_type.is_empty() {
                    target.call_type = call.call_type;
                }
                if target.function.name.is_empty() {
                    target.function.name = call.function.name;
                }
                target.function.arguments.push_str(&call.function.arguments);
                target.extra.extend(call.extra);
            }
            None => {
                positions.insert(index, merged.len());
                merged.push(call);
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn chunk(content: &str) -> Message {
        Message { role: Role::Assistant, content: content.to_string(), ..Default::default() }
    }

    #[test]
    fn test_concat_joins_content_and_reasoning() {
        let fixture = vec![
            chunk("Hello").reasoning_content("think"),
            chunk(", world").reasoning_content("ing"),
        ];

        let actual = Message::concat(&fixture).unwrap();

        assert_eq!(actual.content, "Hello, world");
        assert_eq!(actual.reasoning_content, "thinking");
        assert_eq!(actual.role, Role::Assistant);
    }

    #[test]
    fn test_concat_merges_tool_calls_by_index() {
        let fixture = vec![
            chunk("").tool_calls(vec![
                ToolCall::new("call_1", "get_weather", "{\"ci").index(0usize),
            ]),
            chunk("").tool_calls(vec![
                ToolCall { index: Some(0), function: FunctionCall { arguments: "ty\":\"Paris\"}".into(), ..Default::default() }, ..Default::default() },
                ToolCall::new("call_2", "get_time", "{}").index(1usize),
            ]),
        ];

        let actual = Message::concat(&fixture).unwrap().tool_calls;

        let expected = vec![
            ToolCall::new("call_1", "get_weather", "{\"city\":\"Paris\"}").index(0usize),
            ToolCall::new("call_2", "get_time", "{}").index(1usize),
        ];
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_concat_keeps_last_finish_reason_and_max_usage() {
        let fixture = vec![
            chunk("a").response_meta(
                ResponseMeta::default().usage(TokenUsage::default().prompt_tokens(10u64)),
            ),
            chunk("b").response_meta(
                ResponseMeta::default()
                    .finish_reason("stop")
                    .usage(TokenUsage::default().prompt_tokens(10u64).completion_tokens(5u64)),
            ),
        ];

        let actual = Message::concat(&fixture).unwrap();

        assert_eq!(actual.finish_reason(), Some("stop"));
        assert_eq!(
            actual.usage().copied(),
            Some(TokenUsage::default().prompt_tokens(10u64).completion_tokens(5u64))
        );
    }

    #[test]
    fn test_concat_extra_last_writer_wins() {
        let mut first = chunk("a");
        first.extra.insert("response_id".into(), json!("r1"));
        first.extra.insert("model".into(), json!("m"));
        let mut second = chunk("b");
        second.extra.insert("response_id".into(), json!("r2"));

        let actual = Message::concat(&[first, second]).unwrap().extra;

        assert_eq!(actual.get("response_id"), Some(&json!("r2")));
        assert_eq!(actual.get("model"), Some(&json!("m")));
    }

    #[test]
    fn test_concat_rejects_role_mismatch() {
        let fixture = vec![chunk("a"), Message::user("b")];
        let actual = Message::concat(&fixture).unwrap_err().to_string();
        assert_eq!(actual, "cannot concat messages with different roles: assistant and user");
    }

    #[test]
    fn test_concat_empty_input() {
        assert!(Message::concat(&[]).is_err());
    }

    #[test]
    fn test_concat_merges_adjacent_text_parts() {
        let fixture = vec![
            chunk("").assistant_gen_multi_content(vec![ContentPart::text("Hel")]),
            chunk("").assistant_gen_multi_content(vec![
                ContentPart::text("lo"),
                ContentPart::image_url("https://example.com/a.png"),
            ]),
        ];

        let actual = Message::concat(&fixture).unwrap().assistant_gen_multi_content;

        let expected = vec![
            ContentPart::text("Hello"),
            ContentPart::image_url("https://example.com/a.png"),
        ];
        assert_eq!(actual, expected);
    }
}
