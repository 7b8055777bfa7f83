use std::collections::HashMap;

use anyhow::Context as _;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bridge_domain::{
    CompletionTokensDetails, ContentPart, Message, PromptTokenDetails, ResponseMeta, Role,
    TokenUsage, ToolCall, ToolChoice, ToolInfo,
};
use serde_json::{Value, json};

use super::extra::{
    input_video_metadata, set_code_execution_result, set_executable_code, set_grounding_metadata,
    set_thought_signature, set_tool_call_thought_signature, thought_signature,
    tool_call_thought_signature,
};
use super::request::{
    Blob, Content, FileData, FunctionCall, FunctionCallingConfig, FunctionCallingMode,
    FunctionDeclaration, FunctionResponse, GeminiRole, Part, PartData, Tool, ToolConfig,
};
use super::response::{GenerateContentResponse, UsageMetadata};
use crate::tool_choice::{ResolvedToolChoice, resolve_tool_choice};

/// Text of all system messages as one instruction.
pub fn system_instruction(input: &[Message]) -> Option<Content> {
    let parts: Vec<Part> = input
        .iter()
        .filter(|message| message.role == Role::System)
        .flat_map(|message| {
            let parts = message.user_input_multi_content.iter().filter_map(ContentPart::as_text);
            std::iter::once(message.content.as_str()).chain(parts)
        })
        .filter(|text| !text.is_empty())
        .map(|text| Part::from(PartData::Text(text.to_string())))
        .collect();
    (!parts.is_empty()).then_some(Content { role: None, parts })
}

/// Converts the non-system messages into contents. Adjacent messages with the
/// same role share one content, so parallel function responses are sent
/// together.
pub fn contents(input: &[Message]) -> anyhow::Result<Vec<Content>> {
    let mut call_names: HashMap<&str, &str> = HashMap::new();
    let mut contents: Vec<Content> = Vec::new();

    for message in input {
        let (role, parts) = match message.role {
            Role::System => continue,
            Role::User => (GeminiRole::User, user_parts(message)?),
            Role::Assistant => {
                for call in &message.tool_calls {
                    call_names.insert(&call.id, &call.function.name);
                }
                (GeminiRole::Model, model_parts(message)?)
            }
            Role::Tool => {
                let id = message.tool_call_id.as_deref().unwrap_or_default();
                let name = message
                    .tool_name
                    .as_deref()
                    .or_else(|| call_names.get(id).copied())
                    .with_context(|| format!("Failed to find the function name of tool result '{id}'"))?;
                let response = PartData::FunctionResponse(FunctionResponse {
                    id: (!id.is_empty()).then(|| id.to_string()),
                    name: name.to_string(),
                    response: json!({"output": message.content}),
                });
                (GeminiRole::User, vec![Part::from(response)])
            }
        };
        if parts.is_empty() {
            continue;
        }
        match contents.last_mut() {
            Some(content) if content.role == Some(role) => content.parts.extend(parts),
            _ => contents.push(Content { role: Some(role), parts }),
        }
    }
    Ok(contents)
}

fn text_part(text: &str) -> Option<Part> {
    (!text.is_empty()).then(|| Part::from(PartData::Text(text.to_string())))
}

fn user_parts(message: &Message) -> anyhow::Result<Vec<Part>> {
    if message.user_input_multi_content.is_empty() {
        return Ok(text_part(&message.content).into_iter().collect());
    }
    message
        .user_input_multi_content
        .iter()
        .map(|part| media_part(message, part))
        .collect()
}

fn model_parts(message: &Message) -> anyhow::Result<Vec<Part>> {
    let mut parts: Vec<Part> = if message.assistant_gen_multi_content.is_empty() {
        text_part(&message.content).into_iter().collect()
    } else {
        message
            .assistant_gen_multi_content
            .iter()
            .map(|part| media_part(message, part))
            .collect::<anyhow::Result<_>>()?
    };
    if let (Some(signature), Some(first)) = (thought_signature(message), parts.first_mut()) {
        first.thought_signature = Some(STANDARD.encode(signature));
    }

    for call in &message.tool_calls {
        let args = if call.function.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&call.function.arguments).with_context(|| {
                format!("Failed to parse arguments of tool call '{}'", call.function.name)
            })?
        };
        let mut part = Part::from(PartData::FunctionCall(FunctionCall {
            id: (!call.id.is_empty()).then(|| call.id.clone()),
            name: call.function.name.clone(),
            args,
        }));
        part.thought_signature = tool_call_thought_signature(call).map(|signature| STANDARD.encode(signature));
        parts.push(part);
    }
    Ok(parts)
}

/// Inline `data:` urls are sent as blobs, anything else as a file reference.
fn media(url: &str, mime_type: Option<&String>) -> anyhow::Result<PartData> {
    let Some(inline) = url.strip_prefix("data:") else {
        return Ok(PartData::FileData(FileData {
            mime_type: mime_type.cloned(),
            file_uri: url.to_string(),
        }));
    };
    let (head, data) = inline
        .split_once(',')
        .with_context(|| "Malformed data url: missing ','")?;
    let Some(media_type) = head.strip_suffix(";base64") else {
        anyhow::bail!("Malformed data url: only base64 payloads are supported");
    };
    Ok(PartData::InlineData(Blob { mime_type: media_type.to_string(), data: data.to_string() }))
}

fn media_part(message: &Message, part: &ContentPart) -> anyhow::Result<Part> {
    let part = match part {
        ContentPart::Text { text } => Part::from(PartData::Text(text.clone())),
        ContentPart::ImageUrl { url, mime_type, .. }
        | ContentPart::AudioUrl { url, mime_type }
        | ContentPart::FileUrl { url, mime_type } => Part::from(media(url, mime_type.as_ref())?),
        ContentPart::VideoUrl { url, mime_type } => Part {
            video_metadata: input_video_metadata(message, url),
            ..Part::from(media(url, mime_type.as_ref())?)
        },
    };
    Ok(part)
}

pub fn tools(tools: &[ToolInfo], code_execution: bool) -> Vec<Tool> {
    let mut result = Vec::new();
    if !tools.is_empty() {
        result.push(Tool {
            function_declarations: tools
                .iter()
                .map(|tool| FunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.desc.clone(),
                    parameters_json_schema: tool.parameters_schema(),
                })
                .collect(),
            code_execution: None,
        });
    }
    if code_execution {
        result.push(Tool { function_declarations: Vec::new(), code_execution: Some(json!({})) });
    }
    result
}

pub fn tool_config(
    choice: Option<ToolChoice>,
    allowed_tool_names: &[String],
    tool_names: &[&str],
) -> anyhow::Result<Option<ToolConfig>> {
    let Some(resolved) = resolve_tool_choice(choice, allowed_tool_names, tool_names)? else {
        return Ok(None);
    };
    let (mode, allowed_function_names) = match resolved {
        ResolvedToolChoice::None => (FunctionCallingMode::None, Vec::new()),
        ResolvedToolChoice::Auto => (FunctionCallingMode::Auto, Vec::new()),
        ResolvedToolChoice::Required => (FunctionCallingMode::Any, Vec::new()),
        ResolvedToolChoice::Function(name) => (FunctionCallingMode::Any, vec![name]),
    };
    Ok(Some(ToolConfig {
        function_calling_config: FunctionCallingConfig { mode, allowed_function_names },
    }))
}

pub fn token_usage(usage: UsageMetadata) -> TokenUsage {
    TokenUsage {
        prompt_tokens: usage.prompt_token_count,
        prompt_token_details: PromptTokenDetails { cached_tokens: usage.cached_content_token_count },
        completion_tokens: usage.candidates_token_count + usage.thoughts_token_count,
        completion_tokens_details: CompletionTokensDetails {
            reasoning_tokens: usage.thoughts_token_count,
        },
        total_tokens: usage.total_token_count,
    }
}

fn decode_signature(encoded: Option<&str>) -> Option<Vec<u8>> {
    encoded.and_then(|encoded| STANDARD.decode(encoded).ok())
}

fn generated_part(blob_or_file: PartData) -> Option<ContentPart> {
    match blob_or_file {
        PartData::InlineData(blob) => {
            let url = format!("data:{};base64,{}", blob.mime_type, blob.data);
            let mime_type = Some(blob.mime_type);
            Some(if mime_type.as_deref().is_some_and(|mime| mime.starts_with("image/")) {
                ContentPart::ImageUrl { url, detail: None, mime_type }
            } else if mime_type.as_deref().is_some_and(|mime| mime.starts_with("audio/")) {
                ContentPart::AudioUrl { url, mime_type }
            } else {
                ContentPart::FileUrl { url, mime_type }
            })
        }
        PartData::FileData(file) => Some(ContentPart::FileUrl { url: file.file_uri, mime_type: file.mime_type }),
        _ => None,
    }
}

/// Converts the first candidate of a response. Returns `None` for a chunk
/// without candidates or usage.
pub fn candidate_message(response: GenerateContentResponse) -> Option<Message> {
    let usage = response.usage_metadata.map(token_usage);
    let Some(candidate) = response.candidates.into_iter().next() else {
        return usage.map(|usage| Message {
            role: Role::Assistant,
            response_meta: Some(ResponseMeta { usage: Some(usage), ..Default::default() }),
            ..Default::default()
        });
    };

    let mut message = Message {
        role: Role::Assistant,
        response_meta: (candidate.finish_reason.is_some() || usage.is_some()).then(|| ResponseMeta {
            finish_reason: candidate.finish_reason,
            usage,
            logprobs: None,
        }),
        ..Default::default()
    };
    if let Some(metadata) = candidate.grounding_metadata {
        set_grounding_metadata(&mut message, metadata);
    }

    let parts = candidate.content.map(|content| content.parts).unwrap_or_default();
    for part in parts {
        let signature = decode_signature(part.thought_signature.as_deref());
        match part.data {
            PartData::Text(text) if part.thought == Some(true) => message.reasoning_content.push_str(&text),
            PartData::Text(text) => message.content.push_str(&text),
            PartData::FunctionCall(call) => {
                let arguments = match call.args {
                    Value::Null => "{}".to_string(),
                    args => args.to_string(),
                };
                let id = call.id.unwrap_or_else(|| call.name.clone());
                let mut tool_call = ToolCall::new(id, call.name, arguments);
                if let Some(signature) = &signature {
                    set_tool_call_thought_signature(&mut tool_call, signature);
                }
                message.tool_calls.push(tool_call);
                continue;
            }
            PartData::ExecutableCode(code) => set_executable_code(&mut message, &code),
            PartData::CodeExecutionResult(result) => set_code_execution_result(&mut message, &result),
            data => message.assistant_gen_multi_content.extend(generated_part(data)),
        }
        if let Some(signature) = &signature {
            set_thought_signature(&mut message, signature);
        }
    }
    Some(message)
}

/// Converts a complete response. A response without candidates is an error,
/// naming the block reason when the prompt was blocked.
pub fn response_message(response: GenerateContentResponse) -> anyhow::Result<Message> {
    if response.candidates.is_empty() {
        let reason = response
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
            .unwrap_or_else(|| "unknown".to_string());
        anyhow::bail!("gemini returned no candidates, block reason: {reason}");
    }
    candidate_message(response).with_context(|| "gemini returned an empty candidate")
}
