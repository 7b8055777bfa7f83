use bridge_domain::{
    ChatOptions, CompletionTokensDetails, ContentPart, LogProb, LogProbs, Message,
    PromptTokenDetails, ResponseMeta, Role, TokenUsage, ToolCall, ToolChoice, ToolInfo, TopLogProb,
};

use super::request::{
    ChatRequest, FunctionDefinition, MediaUrl, MessageContent, NamedFunction, NamedToolChoice,
    RequestMessage, Tool, ToolChoiceMode, ToolChoiceParam, WireFunctionCall, WirePart,
    WireToolCall,
};
use super::response::{ChatResponse, Choice, ChoiceLogProbs, ResponseMessage, Usage};
use crate::error::Error;
use crate::tool_choice::{ResolvedToolChoice, resolve_tool_choice};

/// Converts domain messages into chat-completions messages. `tool_role` is
/// the role name the provider expects for tool results.
pub fn request_messages(
    provider: &'static str,
    input: &[Message],
    tool_role: &str,
) -> anyhow::Result<Vec<RequestMessage>> {
    input.iter().map(|message| request_message(provider, message, tool_role)).collect()
}

fn request_message(
    provider: &'static str,
    message: &Message,
    tool_role: &str,
) -> anyhow::Result<RequestMessage> {
    let role = match message.role {
        Role::Tool => tool_role.to_string(),
        role => role.to_string(),
    };

    let parts = match message.role {
        Role::Assistant => &message.assistant_gen_multi_content,
        _ => &message.user_input_multi_content,
    };
    let content = if !parts.is_empty() {
        Some(MessageContent::Parts(wire_parts(provider, parts)?))
    } else if message.content.is_empty() && !message.tool_calls.is_empty() {
        None
    } else {
        Some(MessageContent::Text(message.content.clone()))
    };

    Ok(RequestMessage {
        role,
        content,
        name: message.tool_name.clone().filter(|_| message.role == Role::Tool),
        tool_calls: message.tool_calls.iter().map(wire_tool_call).collect(),
        tool_call_id: message.tool_call_id.clone(),
    })
}

fn wire_parts(provider: &'static str, parts: &[ContentPart]) -> Result<Vec<WirePart>, Error> {
    parts
        .iter()
        .map(|part| match part {
            ContentPart::Text { text } => Ok(WirePart::Text { text: text.clone() }),
            ContentPart::ImageUrl { url, detail, .. } => Ok(WirePart::ImageUrl {
                image_url: MediaUrl { url: url.clone(), detail: detail.map(|d| d.to_string()) },
            }),
            ContentPart::VideoUrl { url, .. } => {
                Ok(WirePart::VideoUrl { video_url: MediaUrl { url: url.clone(), detail: None } })
            }
            ContentPart::AudioUrl { .. } => Err(Error::UnsupportedPart { provider, part: "audio_url" }),
            ContentPart::FileUrl { .. } => Err(Error::UnsupportedPart { provider, part: "file_url" }),
        })
        .collect()
}

fn wire_tool_call(call: &ToolCall) -> WireToolCall {
    let call_type = if call.call_type.is_empty() { "function" } else { call.call_type.as_str() };
    WireToolCall {
        index: None,
        id: Some(call.id.clone()),
        call_type: Some(call_type.to_string()),
        function: WireFunctionCall {
            name: Some(call.function.name.clone()),
            arguments: Some(call.function.arguments.clone()),
        },
    }
}

pub fn tools(tools: &[ToolInfo]) -> Vec<Tool> {
    tools
        .iter()
        .map(|tool| Tool {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: tool.name.clone(),
                description: tool.desc.clone(),
                parameters: tool.parameters_schema(),
            },
        })
        .collect()
}

pub fn tool_choice(resolved: ResolvedToolChoice) -> ToolChoiceParam {
    match resolved {
        ResolvedToolChoice::None => ToolChoiceParam::Mode(ToolChoiceMode::None),
        ResolvedToolChoice::Auto => ToolChoiceParam::Mode(ToolChoiceMode::Auto),
        ResolvedToolChoice::Required => ToolChoiceParam::Mode(ToolChoiceMode::Required),
        ResolvedToolChoice::Function(name) => ToolChoiceParam::Function(NamedToolChoice {
            choice_type: "function".to_string(),
            function: NamedFunction { name },
        }),
    }
}

/// Sets `tools` and `tool_choice` on `request`. Per call tools replace the
/// bound ones; the per call choice wins over `default_choice`.
pub fn apply_tools(
    request: &mut ChatRequest,
    bound: &[ToolInfo],
    default_choice: Option<ToolChoice>,
    options: &ChatOptions,
) -> Result<(), Error> {
    let selected = options.tools.as_deref().unwrap_or(bound);
    request.tools = tools(selected);

    let names: Vec<&str> = selected.iter().map(|tool| tool.name.as_str()).collect();
    let choice = options.tool_choice.or(default_choice);
    request.tool_choice =
        resolve_tool_choice(choice, &options.allowed_tool_names, &names)?.map(tool_choice);
    Ok(())
}

/// Lets the common per call options override what the model was configured
/// with.
pub fn apply_options(mut request: ChatRequest, options: &ChatOptions) -> ChatRequest {
    if let Some(model) = &options.model {
        request.model = model.clone();
    }
    request.temperature = options.temperature.or(request.temperature);
    request.max_tokens = options.max_tokens.or(request.max_tokens);
    request.top_p = options.top_p.or(request.top_p);
    if let Some(stop) = &options.stop {
        request.stop = Some(stop.clone());
    }
    request
}

/// Picks choice 0 of a complete reply and turns it into an assistant message.
pub fn response_message(provider: &'static str, response: ChatResponse) -> anyhow::Result<Message> {
    if let Some(error) = response.error {
        return Err(Error::Api { provider, code: error.code_text(), message: error.message }.into());
    }
    if response.choices.is_empty() {
        return Err(Error::EmptyChoices { provider }.into());
    }

    let usage = response.usage;
    let choice = response
        .choices
        .into_iter()
        .find(|choice| choice.index == 0)
        .ok_or(Error::ChoiceNotFound { provider })?;

    let mut message = choice_message(&choice, choice.message.clone().unwrap_or_default());
    if let Some(usage) = usage {
        message.response_meta.get_or_insert_with(ResponseMeta::default).usage =
            Some(token_usage(usage));
    }
    Ok(message)
}

/// Resolves one stream chunk. The flag tells whether the chunk carried
/// anything: a delta for choice 0 or a usage report.
pub fn resolve_stream_chunk(
    provider: &'static str,
    chunk: ChatResponse,
) -> anyhow::Result<(Option<Message>, bool)> {
    if let Some(error) = chunk.error {
        return Err(Error::Api { provider, code: error.code_text(), message: error.message }.into());
    }

    let usage = chunk.usage.map(token_usage);
    let choice = chunk.choices.into_iter().find(|choice| choice.index == 0);

    let message = match (choice, usage) {
        (Some(choice), usage) => {
            let mut message = choice_message(&choice, choice.delta.clone().unwrap_or_default());
            if let Some(usage) = usage {
                message.response_meta.get_or_insert_with(ResponseMeta::default).usage = Some(usage);
            }
            message
        }
        (None, Some(usage)) => Message {
            role: Role::Assistant,
            response_meta: Some(ResponseMeta::default().usage(usage)),
            ..Default::default()
        },
        (None, None) => return Ok((None, false)),
    };
    Ok((Some(message), true))
}

fn choice_message(choice: &Choice, wire: ResponseMessage) -> Message {
    let tool_calls = wire
        .tool_calls
        .into_iter()
        .map(|call| ToolCall {
            index: call.index,
            id: call.id.unwrap_or_default(),
            call_type: call.call_type.unwrap_or_default(),
            function: bridge_domain::FunctionCall {
                name: call.function.name.unwrap_or_default(),
                arguments: call.function.arguments.unwrap_or_default(),
            },
            extra: Default::default(),
        })
        .collect();

    let meta = ResponseMeta {
        finish_reason: choice.finish_reason.clone().filter(|reason| !reason.is_empty()),
        usage: None,
        logprobs: choice.logprobs.as_ref().map(log_probs),
    };

    Message {
        role: Role::Assistant,
        content: wire.content.unwrap_or_default(),
        reasoning_content: wire.reasoning_content.unwrap_or_default(),
        tool_calls,
        response_meta: Some(meta).filter(|meta| meta != &ResponseMeta::default()),
        ..Default::default()
    }
}

pub fn token_usage(usage: Usage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: usage.prompt_tokens,
        prompt_token_details: PromptTokenDetails {
            cached_tokens: usage.prompt_tokens_details.map_or(0, |details| details.cached_tokens),
        },
        completion_tokens: usage.completion_tokens,
        completion_tokens_details: CompletionTokensDetails {
            reasoning_tokens: usage
                .completion_tokens_details
                .map_or(0, |details| details.reasoning_tokens),
        },
        total_tokens: usage.total_tokens,
    }
}

pub fn log_probs(wire: &ChoiceLogProbs) -> LogProbs {
    LogProbs {
        content: wire
            .content
            .iter()
            .map(|token| LogProb {
                token: token.token.clone(),
                logprob: token.logprob,
                bytes: token.bytes.clone().unwrap_or_default(),
                top_logprobs: token
                    .top_logprobs
                    .iter()
                    .map(|top| TopLogProb {
                        token: top.token.clone(),
                        logprob: top.logprob,
                        bytes: top.bytes.clone().unwrap_or_default(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use bridge_domain::ImageDetail;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn parse(value: serde_json::Value) -> ChatResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_request_messages_roles_and_tool_calls() {
        let fixture = vec![
            Message::system("be brief"),
            Message::assistant("", vec![ToolCall::new("call_1", "weather", "{}")]),
            Message::tool("sunny", "call_1").tool_name("weather"),
        ];

        let actual = serde_json::to_value(request_messages("test", &fixture, "tool").unwrap()).unwrap();

        let expected = json!([
            {"role": "system", "content": "be brief"},
            {"role": "assistant", "tool_calls": [
                {"id": "call_1", "type": "function", "function": {"name": "weather", "arguments": "{}"}}
            ]},
            {"role": "tool", "content": "sunny", "name": "weather", "tool_call_id": "call_1"}
        ]);
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_request_messages_multimodal() {
        let fixture = vec![Message::user("").user_input_multi_content(vec![
            ContentPart::text("what is this"),
            ContentPart::ImageUrl { url: "https://img".into(), detail: Some(ImageDetail::High), mime_type: None },
        ])];

        let actual = serde_json::to_value(request_messages("test", &fixture, "tool").unwrap()).unwrap();

        let expected = json!([{"role": "user", "content": [
            {"type": "text", "text": "what is this"},
            {"type": "image_url", "image_url": {"url": "https://img", "detail": "high"}}
        ]}]);
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_request_messages_rejects_audio() {
        let fixture = vec![Message::user("").user_input_multi_content(vec![ContentPart::AudioUrl {
            url: "https://a".into(),
            mime_type: None,
        }])];

        let actual = request_messages("deepseek", &fixture, "tool").unwrap_err();

        assert_eq!(actual.to_string(), "unsupported content part for deepseek: audio_url");
    }

    #[test]
    fn test_apply_tools_forced_single_tool() {
        let mut fixture = ChatRequest::default();
        let bound = vec![ToolInfo::new("tool1", "first")];

        apply_tools(&mut fixture, &bound, Some(ToolChoice::Forced), &ChatOptions::default()).unwrap();

        let actual = serde_json::to_value(&fixture.tool_choice).unwrap();
        assert_eq!(actual, json!({"type": "function", "function": {"name": "tool1"}}));
        assert_eq!(fixture.tools.len(), 1);
    }

    #[test]
    fn test_apply_tools_call_options_win() {
        let mut fixture = ChatRequest::default();
        let bound = vec![ToolInfo::new("tool1", "first")];
        let options = ChatOptions::default()
            .tools(vec![ToolInfo::new("a", ""), ToolInfo::new("b", "")])
            .tool_choice(ToolChoice::Forced);

        apply_tools(&mut fixture, &bound, Some(ToolChoice::Allowed), &options).unwrap();

        assert_eq!(fixture.tool_choice, Some(ToolChoiceParam::Mode(ToolChoiceMode::Required)));
        assert_eq!(fixture.tools[1].function.name, "b");
    }

    #[test]
    fn test_response_message() {
        let fixture = parse(json!({
            "choices": [{
                "index": 0,
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": "hello world",
                    "reasoning_content": "reasoning content",
                    "tool_calls": [{"index": 1, "id": "id", "type": "type", "function": {"name": "name", "arguments": "arguments"}}]
                }
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
        }));

        let actual = response_message("test", fixture).unwrap();

        let expected = Message {
            role: Role::Assistant,
            content: "hello world".into(),
            reasoning_content: "reasoning content".into(),
            tool_calls: vec![ToolCall {
                index: Some(1),
                id: "id".into(),
                call_type: "type".into(),
                function: bridge_domain::FunctionCall { name: "name".into(), arguments: "arguments".into() },
                extra: Default::default(),
            }],
            response_meta: Some(ResponseMeta {
                finish_reason: Some("tool_calls".into()),
                usage: Some(TokenUsage { prompt_tokens: 1, completion_tokens: 2, total_tokens: 3, ..Default::default() }),
                logprobs: None,
            }),
            ..Default::default()
        };
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_response_message_failures() {
        let error = response_message(
            "qianfan",
            parse(json!({"error": {"code": "123", "message": "asd", "type": "qwe"}})),
        )
        .unwrap_err();
        let empty = response_message("qianfan", parse(json!({"choices": []}))).unwrap_err();
        let missing = response_message("qianfan", parse(json!({"choices": [{"index": 1}]}))).unwrap_err();

        assert_eq!(error.to_string(), "qianfan API error [123]: asd");
        assert_eq!(empty.to_string(), "received empty choices from qianfan");
        assert_eq!(missing.to_string(), "choice with index 0 not found in qianfan response");
    }

    #[test]
    fn test_resolve_stream_chunks() {
        let fixture = vec![
            json!({"choices": [{"index": 0, "delta": {"content": "test_content_001"}}]}),
            json!({"choices": [{"index": 0, "delta": {"content": "test_content_002"}}]}),
            json!({"usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}}),
            json!({}),
        ];

        let resolved: Vec<(Option<Message>, bool)> = fixture
            .into_iter()
            .map(|chunk| resolve_stream_chunk("qianfan", parse(chunk)).unwrap())
            .collect();

        let found: Vec<bool> = resolved.iter().map(|(_, found)| *found).collect();
        assert_eq!(found, vec![true, true, true, false]);

        let chunks: Vec<Message> = resolved.into_iter().filter_map(|(message, _)| message).collect();
        let actual = Message::concat(&chunks).unwrap();
        assert_eq!(actual.role, Role::Assistant);
        assert_eq!(actual.content, "test_content_001test_content_002");
        assert_eq!(
            actual.usage(),
            Some(&TokenUsage { prompt_tokens: 1, completion_tokens: 2, total_tokens: 3, ..Default::default() })
        );
    }

    #[test]
    fn test_log_probs() {
        let fixture: ChoiceLogProbs = serde_json::from_value(json!({"content": [{
            "token": "1",
            "logprob": 1.0,
            "bytes": [1, 2, 3],
            "top_logprobs": [{"token": "2", "logprob": 2.0, "bytes": [4, 5, 6]}]
        }]}))
        .unwrap();

        let actual = log_probs(&fixture);

        let expected = LogProbs {
            content: vec![LogProb {
                token: "1".into(),
                logprob: 1.0,
                bytes: vec![1, 2, 3],
                top_logprobs: vec![TopLogProb { token: "2".into(), logprob: 2.0, bytes: vec![4, 5, 6] }],
            }],
        };
        assert_eq!(actual, expected);
    }
}
