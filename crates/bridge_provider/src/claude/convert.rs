use anyhow::Context as _;
use bridge_domain::{
    ContentPart, Message, PromptTokenDetails, ResponseMeta, Role, TokenUsage, ToolCall,
    ToolChoice, ToolInfo,
};
use serde_json::Value;

use super::request::{
    ClaudeRole, ContentBlock, ImageSource, InputMessage, ToolChoiceParam, ToolDefinition,
};
use super::response::{Delta, MessagesResponse, ResponseBlock, StreamEvent, Usage};
use crate::error::Error;
use crate::tool_choice::{ResolvedToolChoice, resolve_tool_choice};

const PROVIDER: &str = "claude";
const THINKING_SIGNATURE: &str = "claude-thinking-signature";

pub fn set_thinking_signature(message: &mut Message, signature: impl Into<String>) {
    message
        .extra
        .insert(THINKING_SIGNATURE.to_string(), Value::String(signature.into()));
}

/// Signature of the thinking block the reasoning content came from. It must be
/// sent back with the reasoning for the model to accept it in a later turn.
pub fn thinking_signature(message: &Message) -> Option<&str> {
    message.extra.get(THINKING_SIGNATURE).and_then(Value::as_str)
}

/// Text of all system messages, one block each.
pub fn system_blocks(input: &[Message]) -> Vec<ContentBlock> {
    input
        .iter()
        .filter(|message| message.role == Role::System)
        .flat_map(|message| {
            let parts = message.user_input_multi_content.iter().filter_map(ContentPart::as_text);
            std::iter::once(message.content.as_str()).chain(parts)
        })
        .filter(|text| !text.is_empty())
        .map(ContentBlock::text)
        .collect()
}

/// Converts the non-system messages into alternating user and assistant turns.
/// Adjacent messages mapping to the same role share a turn, so tool results
/// following a tool use land in one user turn.
pub fn input_messages(input: &[Message]) -> anyhow::Result<Vec<InputMessage>> {
    let mut turns: Vec<InputMessage> = Vec::new();
    for message in input {
        let (role, blocks) = match message.role {
            Role::System => continue,
            Role::User => (ClaudeRole::User, user_blocks(message)?),
            Role::Assistant => (ClaudeRole::Assistant, assistant_blocks(message)?),
            Role::Tool => (
                ClaudeRole::User,
                vec![ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message.content.clone(),
                    cache_control: None,
                }],
            ),
        };
        if blocks.is_empty() {
            continue;
        }
        match turns.last_mut() {
            Some(turn) if turn.role == role => turn.content.extend(blocks),
            _ => turns.push(InputMessage { role, content: blocks }),
        }
    }
    Ok(turns)
}

fn user_blocks(message: &Message) -> anyhow::Result<Vec<ContentBlock>> {
    if message.user_input_multi_content.is_empty() {
        return Ok(text_block(&message.content).into_iter().collect());
    }
    message.user_input_multi_content.iter().map(part_block).collect()
}

fn assistant_blocks(message: &Message) -> anyhow::Result<Vec<ContentBlock>> {
    let mut blocks = Vec::new();
    if !message.reasoning_content.is_empty()
        && let Some(signature) = thinking_signature(message)
    {
        blocks.push(ContentBlock::Thinking {
            thinking: message.reasoning_content.clone(),
            signature: signature.to_string(),
        });
    }

    if message.assistant_gen_multi_content.is_empty() {
        blocks.extend(text_block(&message.content));
    } else {
        for part in &message.assistant_gen_multi_content {
            blocks.push(part_block(part)?);
        }
    }

    for call in &message.tool_calls {
        let input = if call.function.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&call.function.arguments).with_context(|| {
                format!("Failed to parse arguments of tool call '{}'", call.function.name)
            })?
        };
        blocks.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input,
            cache_control: None,
        });
    }
    Ok(blocks)
}

fn text_block(text: &str) -> Option<ContentBlock> {
    (!text.is_empty()).then(|| ContentBlock::text(text))
}

fn part_block(part: &ContentPart) -> anyhow::Result<ContentBlock> {
    Ok(match part {
        ContentPart::Text { text } => ContentBlock::text(text),
        ContentPart::ImageUrl { url, .. } => {
            ContentBlock::Image { source: source(url)?, cache_control: None }
        }
        ContentPart::FileUrl { url, .. } => {
            ContentBlock::Document { source: source(url)?, cache_control: None }
        }
        ContentPart::AudioUrl { .. } => {
            return Err(Error::UnsupportedPart { provider: PROVIDER, part: "audio_url" }.into());
        }
        ContentPart::VideoUrl { .. } => {
            return Err(Error::UnsupportedPart { provider: PROVIDER, part: "video_url" }.into());
        }
    })
}

/// Inline `data:<mime>;base64,<data>` urls become base64 sources, anything
/// else is passed by reference.
fn source(url: &str) -> anyhow::Result<ImageSource> {
    let Some(inline) = url.strip_prefix("data:") else {
        return Ok(ImageSource::Url { url: url.to_string() });
    };
    let (head, data) = inline
        .split_once(',')
        .with_context(|| "Malformed data url: missing ','")?;
    let Some(media_type) = head.strip_suffix(";base64") else {
        anyhow::bail!("Malformed data url: only base64 payloads are supported");
    };
    Ok(ImageSource::Base64 { media_type: media_type.to_string(), data: data.to_string() })
}

pub fn tool_definitions(tools: &[ToolInfo]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|tool| ToolDefinition {
            name: tool.name.clone(),
            description: tool.desc.clone(),
            input_schema: tool.parameters_schema(),
            cache_control: None,
        })
        .collect()
}

pub fn tool_choice(
    choice: Option<ToolChoice>,
    allowed_tool_names: &[String],
    tool_names: &[&str],
    disable_parallel_tool_use: Option<bool>,
) -> anyhow::Result<Option<ToolChoiceParam>> {
    let resolved = match resolve_tool_choice(choice, allowed_tool_names, tool_names)? {
        Some(resolved) => resolved,
        None if disable_parallel_tool_use.is_some() && !tool_names.is_empty() => {
            ResolvedToolChoice::Auto
        }
        None => return Ok(None),
    };
    Ok(Some(match resolved {
        ResolvedToolChoice::None => ToolChoiceParam::None,
        ResolvedToolChoice::Auto => ToolChoiceParam::Auto { disable_parallel_tool_use },
        ResolvedToolChoice::Required => ToolChoiceParam::Any { disable_parallel_tool_use },
        ResolvedToolChoice::Function(name) => {
            ToolChoiceParam::Tool { name, disable_parallel_tool_use }
        }
    }))
}

pub fn token_usage(usage: Usage) -> TokenUsage {
    let prompt_tokens =
        usage.input_tokens + usage.cache_creation_input_tokens + usage.cache_read_input_tokens;
    TokenUsage {
        prompt_tokens,
        prompt_token_details: PromptTokenDetails { cached_tokens: usage.cache_read_input_tokens },
        completion_tokens: usage.output_tokens,
        total_tokens: prompt_tokens + usage.output_tokens,
        ..Default::default()
    }
}

fn arguments(input: Value) -> String {
    match input {
        Value::Null => "{}".to_string(),
        input => input.to_string(),
    }
}

pub fn response_message(response: MessagesResponse) -> Message {
    let mut message = Message {
        role: Role::Assistant,
        response_meta: Some(ResponseMeta {
            finish_reason: response.stop_reason,
            usage: Some(token_usage(response.usage)),
            logprobs: None,
        }),
        ..Default::default()
    };
    for block in response.content {
        match block {
            ResponseBlock::Text { text } => message.content.push_str(&text),
            ResponseBlock::Thinking { thinking, signature } => {
                message.reasoning_content.push_str(&thinking);
                if !signature.is_empty() {
                    set_thinking_signature(&mut message, signature);
                }
            }
            ResponseBlock::ToolUse { id, name, input } => {
                message.tool_calls.push(ToolCall::new(id, name, arguments(input)));
            }
            ResponseBlock::Other => {}
        }
    }
    message
}

/// Turns stream events into message chunks. Input token counts arrive with
/// `message_start` and are reported together with the output count of
/// `message_delta`.
#[derive(Debug, Default)]
pub struct StreamState {
    usage: Usage,
}

impl StreamState {
    pub fn on_event(&mut self, event: StreamEvent) -> anyhow::Result<Option<Message>> {
        let chunk = |message: Message| -> anyhow::Result<Option<Message>> {
            Ok(Some(Message { role: Role::Assistant, ..message }))
        };
        match event {
            StreamEvent::MessageStart { message } => {
                self.usage = message.usage;
                Ok(None)
            }
            StreamEvent::ContentBlockStart { index, content_block } => match content_block {
                ResponseBlock::ToolUse { id, name, .. } => chunk(Message {
                    tool_calls: vec![ToolCall { index: Some(index), ..ToolCall::new(id, name, "") }],
                    ..Default::default()
                }),
                ResponseBlock::Text { text } if !text.is_empty() => {
                    chunk(Message { content: text, ..Default::default() })
                }
                _ => Ok(None),
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                Delta::TextDelta { text } => chunk(Message { content: text, ..Default::default() }),
                Delta::ThinkingDelta { thinking } => {
                    chunk(Message { reasoning_content: thinking, ..Default::default() })
                }
                Delta::SignatureDelta { signature } => {
                    let mut message = Message::default();
                    set_thinking_signature(&mut message, signature);
                    chunk(message)
                }
                Delta::InputJsonDelta { partial_json } => {
                    let call = ToolCall {
                        index: Some(index),
                        function: bridge_domain::FunctionCall {
                            name: String::new(),
                            arguments: partial_json,
                        },
                        ..Default::default()
                    };
                    chunk(Message { tool_calls: vec![call], ..Default::default() })
                }
                Delta::Other => Ok(None),
            },
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                }
                chunk(Message {
                    response_meta: Some(ResponseMeta {
                        finish_reason: delta.stop_reason,
                        usage: Some(token_usage(self.usage)),
                        logprobs: None,
                    }),
                    ..Default::default()
                })
            }
            StreamEvent::Error { error } => {
                anyhow::bail!("claude stream error: {}: {}", error.error_type, error.message)
            }
            StreamEvent::Other => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_input_messages_groups_tool_results() {
        let mut assistant = Message::assistant(
            "calling",
            vec![ToolCall::new("t1", "a", r#"{"x":1}"#), ToolCall::new("t2", "b", "")],
        );
        assistant.reasoning_content = "plan".to_string();
        set_thinking_signature(&mut assistant, "sig");
        let fixture = vec![
            Message::system("rules"),
            Message::user("go"),
            assistant,
            Message::tool("ra", "t1"),
            Message::tool("rb", "t2"),
        ];

        let actual = serde_json::to_value(input_messages(&fixture).unwrap()).unwrap();

        let expected = json!([
            {"role": "user", "content": [{"type": "text", "text": "go"}]},
            {"role": "assistant", "content": [
                {"type": "thinking", "thinking": "plan", "signature": "sig"},
                {"type": "text", "text": "calling"},
                {"type": "tool_use", "id": "t1", "name": "a", "input": {"x": 1}},
                {"type": "tool_use", "id": "t2", "name": "b", "input": {}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": "ra"},
                {"type": "tool_result", "tool_use_id": "t2", "content": "rb"}
            ]}
        ]);
        assert_eq!(actual, expected);
        assert_eq!(system_blocks(&fixture), vec![ContentBlock::text("rules")]);
    }

    #[test]
    fn test_user_image_sources() {
        let fixture = Message::user("").user_input_multi_content(vec![
            ContentPart::image_url("data:image/png;base64,iVBOR"),
            ContentPart::image_url("https://example.com/a.png"),
        ]);

        let actual = serde_json::to_value(input_messages(&[fixture]).unwrap()).unwrap();

        let expected = json!([{"role": "user", "content": [
            {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "iVBOR"}},
            {"type": "image", "source": {"type": "url", "url": "https://example.com/a.png"}}
        ]}]);
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_audio_part_is_rejected() {
        let fixture = Message::user("").user_input_multi_content(vec![ContentPart::AudioUrl {
            url: "https://a".into(),
            mime_type: None,
        }]);

        let actual = input_messages(&[fixture]).unwrap_err();

        assert_eq!(actual.to_string(), "unsupported content part for claude: audio_url");
    }

    #[test]
    fn test_tool_choice_mapping() {
        let names = ["a", "b"];

        let forced = tool_choice(Some(ToolChoice::Forced), &["b".to_string()], &names, None).unwrap();
        let any = tool_choice(Some(ToolChoice::Forced), &[], &names, Some(true)).unwrap();
        let implicit = tool_choice(None, &[], &names, Some(true)).unwrap();
        let none = tool_choice(Some(ToolChoice::Forbidden), &[], &names, None).unwrap();

        assert_eq!(
            forced,
            Some(ToolChoiceParam::Tool { name: "b".to_string(), disable_parallel_tool_use: None })
        );
        assert_eq!(any, Some(ToolChoiceParam::Any { disable_parallel_tool_use: Some(true) }));
        assert_eq!(implicit, Some(ToolChoiceParam::Auto { disable_parallel_tool_use: Some(true) }));
        assert_eq!(none, Some(ToolChoiceParam::None));
    }

    #[test]
    fn test_response_message() {
        let fixture: MessagesResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "sig"},
                {"type": "text", "text": "sure"},
                {"type": "tool_use", "id": "t1", "name": "f", "input": {"q": "x"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 4, "cache_read_input_tokens": 6}
        }))
        .unwrap();

        let actual = response_message(fixture);

        assert_eq!(actual.content, "sure");
        assert_eq!(actual.reasoning_content, "hmm");
        assert_eq!(thinking_signature(&actual), Some("sig"));
        assert_eq!(actual.tool_calls, vec![ToolCall::new("t1", "f", r#"{"q":"x"}"#)]);
        assert_eq!(actual.finish_reason(), Some("tool_use"));
        let usage = actual.usage().unwrap();
        assert_eq!(usage.prompt_tokens, 16);
        assert_eq!(usage.prompt_token_details.cached_tokens, 6);
        assert_eq!(usage.total_tokens, 20);
    }
}
