use bridge_domain::{
    ChatOptions, CompletionTokensDetails, ContentPart, Message, PromptTokenDetails, ResponseMeta,
    Role, TokenUsage, ToolCall, ToolChoice, ToolInfo,
};

use super::request::{
    ApproximateLocation, CacheType, CachingConfig, ContentItem, InputItem, InputRole,
    ResponsesRequest, ResponsesTool, ResponsesToolChoice, TextConfig, TextFormat, TextFormatType,
    ToolChoiceMode,
};
use super::response::{OutputContent, OutputItem, ResponseObject, ResponseStatus, ResponseUsage, StreamEvent};
use crate::ark::extra::{
    input_video_fps, set_cache_expire_at, set_context_id, set_response_id, set_service_tier,
};
use crate::ark::types::{CacheOption, SessionCacheConfig, ToolWebSearch};
use crate::openai::{ResponseFormat, ResponseFormatType};
use crate::tool_choice::{ResolvedToolChoice, resolve_tool_choice};

/// Cache settings a request was sent with, echoed onto its output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheState {
    pub enabled: bool,
    pub expire_at: Option<i64>,
}

impl CacheState {
    pub fn of(request: &ResponsesRequest) -> Self {
        Self {
            enabled: request.caching.is_some_and(|caching| caching.cache_type == CacheType::Enabled),
            expire_at: request.expire_at,
        }
    }
}

pub fn text_config(format: &ResponseFormat) -> TextConfig {
    let format = match format.format_type {
        ResponseFormatType::Text => TextFormat::plain(TextFormatType::Text),
        ResponseFormatType::JsonObject => TextFormat::plain(TextFormatType::JsonObject),
        ResponseFormatType::JsonSchema => {
            let schema = format.json_schema.clone().unwrap_or_default();
            TextFormat {
                format_type: TextFormatType::JsonSchema,
                name: Some(schema.name),
                description: Some(schema.description),
                schema: Some(schema.schema),
                strict: Some(schema.strict),
            }
        }
    };
    TextConfig { format }
}

impl TextFormat {
    fn plain(format_type: TextFormatType) -> Self {
        Self { format_type, name: None, description: None, schema: None, strict: None }
    }
}

/// Resolves which stored response the request continues from and returns the
/// part of `input` that still has to be sent.
///
/// With the session cache on and no context id, the newest message that
/// carries an unexpired cache and a response id wins; everything up to it is
/// already on the server. Otherwise a context id, then the head previous
/// response id, is used.
pub fn populate_cache<'a>(
    input: &'a [Message],
    request: &mut ResponsesRequest,
    session_cache: Option<SessionCacheConfig>,
    option: Option<&CacheOption>,
    now: i64,
) -> anyhow::Result<&'a [Message]> {
    let mut enabled = session_cache.is_some_and(|cache| cache.enable_cache);
    let mut ttl = session_cache.map(|cache| cache.ttl);

    let context_id = option.and_then(|option| option.context_id.clone());
    let head_response_id = option.and_then(|option| option.head_previous_response_id.clone());
    if let Some(cache) = option.and_then(|option| option.session_cache) {
        enabled = cache.enable_cache;
        ttl = Some(cache.ttl);
    }

    let mut remaining = input;
    let mut previous = None;
    if enabled && context_id.is_none() {
        let cached = input.iter().enumerate().rev().find_map(|(index, message)| {
            let expire_at = crate::ark::extra::cache_expire_at(message)?;
            if expire_at < now {
                return None;
            }
            crate::ark::extra::response_id(message).map(|id| (index, id.to_string()))
        });
        if let Some((index, id)) = cached {
            if index + 1 >= input.len() {
                anyhow::bail!("not found incremental input after ResponseID");
            }
            remaining = &input[index + 1..];
            previous = Some(id);
        }
    }

    request.previous_response_id = previous.or(context_id).or(head_response_id);
    request.store = Some(enabled);
    request.expire_at = ttl.map(|ttl| now + ttl);
    request.caching = Some(CachingConfig {
        cache_type: if enabled { CacheType::Enabled } else { CacheType::Disabled },
        prefix: None,
    });
    Ok(remaining)
}

pub fn populate_input(input: &[Message], request: &mut ResponsesRequest) -> anyhow::Result<()> {
    let mut items = Vec::with_capacity(input.len());
    for message in input {
        match message.role {
            Role::User => items.push(InputItem::Message {
                role: InputRole::User,
                content: user_content(message, "user")?,
            }),
            Role::System => items.push(InputItem::Message {
                role: InputRole::System,
                content: user_content(message, "system")?,
            }),
            Role::Assistant => {
                let content = assistant_content(message)?;
                if !content.is_empty() {
                    items.push(InputItem::Message { role: InputRole::Assistant, content });
                }
                items.extend(message.tool_calls.iter().map(|call| InputItem::FunctionCall {
                    call_id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                }));
            }
            Role::Tool => {
                if !message.user_input_multi_content.is_empty() {
                    anyhow::bail!("ark response api doesn't support multi modal tool result");
                }
                items.push(InputItem::FunctionCallOutput {
                    call_id: message.tool_call_id.clone().unwrap_or_default(),
                    output: message.content.clone(),
                });
            }
        }
    }
    request.input = items;
    Ok(())
}

fn user_content(message: &Message, role: &str) -> anyhow::Result<Vec<ContentItem>> {
    if !message.assistant_gen_multi_content.is_empty() {
        anyhow::bail!("if {role} role, AssistantGenMultiContent cannot be set");
    }
    if !message.user_input_multi_content.is_empty() {
        return content_items(message, &message.user_input_multi_content);
    }
    if !message.content.is_empty() {
        return Ok(vec![ContentItem::text(&message.content)]);
    }
    anyhow::bail!("{role} role message content is empty")
}

fn assistant_content(message: &Message) -> anyhow::Result<Vec<ContentItem>> {
    if !message.user_input_multi_content.is_empty() {
        anyhow::bail!("if assistant role, UserInputMultiContent cannot be set");
    }
    if !message.assistant_gen_multi_content.is_empty() {
        return message
            .assistant_gen_multi_content
            .iter()
            .map(|part| match part.as_text() {
                Some(text) => Ok(ContentItem::text(text)),
                None => anyhow::bail!("unsupported content type in AssistantGenMultiContent"),
            })
            .collect();
    }
    if !message.content.is_empty() {
        return Ok(vec![ContentItem::text(&message.content)]);
    }
    Ok(Vec::new())
}

fn content_items(message: &Message, parts: &[ContentPart]) -> anyhow::Result<Vec<ContentItem>> {
    parts
        .iter()
        .map(|part| {
            Ok(match part {
                ContentPart::Text { text } => ContentItem::text(text),
                ContentPart::ImageUrl { url, detail, .. } => ContentItem::InputImage {
                    image_url: url.clone(),
                    detail: detail.map(|detail| detail.to_string()),
                },
                ContentPart::VideoUrl { url, .. } => ContentItem::InputVideo {
                    video_url: url.clone(),
                    fps: input_video_fps(message, url),
                },
                ContentPart::FileUrl { url, .. } if url.starts_with("data:") => {
                    ContentItem::InputFile { file_url: None, file_data: Some(url.clone()), filename: None }
                }
                ContentPart::FileUrl { url, .. } => {
                    ContentItem::InputFile { file_url: Some(url.clone()), file_data: None, filename: None }
                }
                ContentPart::AudioUrl { .. } => {
                    anyhow::bail!("unsupported content type in UserInputMultiContent: audio_url")
                }
            })
        })
        .collect()
}

pub fn function_tools(tools: &[ToolInfo]) -> Vec<ResponsesTool> {
    tools
        .iter()
        .map(|tool| ResponsesTool::Function {
            name: tool.name.clone(),
            description: tool.desc.clone(),
            parameters: tool.parameters_schema(),
        })
        .collect()
}

fn web_search_tool(web_search: &ToolWebSearch) -> ResponsesTool {
    ResponsesTool::WebSearch {
        limit: web_search.limit,
        user_location: web_search
            .user_location
            .clone()
            .map(|location| ApproximateLocation { location_type: "approximate", location }),
        sources: web_search.sources.clone(),
        max_keyword: web_search.max_keyword,
    }
}

/// Sets tools, tool choice, web search and the tool call budget. A request
/// continuing a stored response keeps the tools of that response.
pub fn populate_tools(
    request: &mut ResponsesRequest,
    bound: &[ToolInfo],
    default_choice: Option<ToolChoice>,
    options: &ChatOptions,
    web_search: Option<&ToolWebSearch>,
    max_tool_calls: Option<i64>,
) -> anyhow::Result<()> {
    if request.previous_response_id.is_some() {
        return Ok(());
    }

    let selected = options.tools.as_deref().unwrap_or(bound);
    let names: Vec<&str> = selected.iter().map(|tool| tool.name.as_str()).collect();
    let choice = options.tool_choice.or(default_choice);
    request.tool_choice =
        resolve_tool_choice(choice, &options.allowed_tool_names, &names)?.map(|resolved| match resolved {
            ResolvedToolChoice::None => ResponsesToolChoice::Mode(ToolChoiceMode::None),
            ResolvedToolChoice::Auto => ResponsesToolChoice::Mode(ToolChoiceMode::Auto),
            ResolvedToolChoice::Required => ResponsesToolChoice::Mode(ToolChoiceMode::Required),
            ResolvedToolChoice::Function(name) => {
                ResponsesToolChoice::Function { choice_type: "function", name }
            }
        });

    request.tools = function_tools(selected);
    if let Some(web_search) = web_search {
        request.tools.push(web_search_tool(web_search));
    }
    if max_tool_calls.is_some() {
        request.max_tool_calls = max_tool_calls;
    }
    Ok(())
}

pub fn token_usage(usage: Option<ResponseUsage>) -> TokenUsage {
    let usage = usage.unwrap_or_default();
    TokenUsage {
        prompt_tokens: usage.input_tokens,
        prompt_token_details: PromptTokenDetails {
            cached_tokens: usage.input_tokens_details.map_or(0, |details| details.cached_tokens),
        },
        completion_tokens: usage.output_tokens,
        completion_tokens_details: CompletionTokensDetails {
            reasoning_tokens: usage.output_tokens_details.map_or(0, |details| details.reasoning_tokens),
        },
        total_tokens: usage.total_tokens,
    }
}

fn set_default_extra(message: &mut Message, response: &ResponseObject, cache: CacheState) {
    if cache.enabled {
        set_cache_expire_at(message, cache.expire_at.unwrap_or_default());
    }
    set_context_id(message, &response.id);
    set_response_id(message, &response.id);
    if let Some(tier) = &response.service_tier {
        set_service_tier(message, tier);
    }
}

fn status_message(response: &ResponseObject, finish_reason: String, cache: CacheState) -> Message {
    let mut message = Message {
        role: Role::Assistant,
        response_meta: Some(ResponseMeta {
            finish_reason: Some(finish_reason).filter(|reason| !reason.is_empty()),
            usage: Some(token_usage(response.usage)),
            logprobs: None,
        }),
        ..Default::default()
    };
    set_default_extra(&mut message, response, cache);
    message
}

fn finish_reason(response: &ResponseObject) -> String {
    match response.status {
        ResponseStatus::Failed => {
            response.error.as_ref().map(|error| error.message.clone()).unwrap_or_default()
        }
        ResponseStatus::Incomplete => response
            .incomplete_details
            .as_ref()
            .map(|details| details.reason.clone())
            .unwrap_or_default(),
        status => status.as_str().to_string(),
    }
}

/// Converts a complete response into an assistant message.
pub fn output_message(response: ResponseObject, cache: CacheState) -> anyhow::Result<Message> {
    let mut message = status_message(&response, finish_reason(&response), cache);
    if matches!(response.status, ResponseStatus::Failed | ResponseStatus::Incomplete) {
        return Ok(message);
    }
    if response.output.is_empty() {
        anyhow::bail!("received empty output from ARK");
    }

    for item in response.output {
        match item {
            OutputItem::Message { content } => {
                let texts: Vec<String> = content
                    .into_iter()
                    .filter_map(|content| match content {
                        OutputContent::OutputText { text } => Some(text),
                        OutputContent::Other => None,
                    })
                    .collect();
                match <[String; 1]>::try_from(texts) {
                    Ok([text]) => message.content = text,
                    Err(texts) => message
                        .assistant_gen_multi_content
                        .extend(texts.into_iter().map(ContentPart::text)),
                }
            }
            OutputItem::Reasoning { summary } => {
                for text in summary.into_iter().map(|summary| summary.text).filter(|text| !text.is_empty()) {
                    if !message.reasoning_content.is_empty() {
                        message.reasoning_content.push_str("\n\n");
                    }
                    message.reasoning_content.push_str(&text);
                }
            }
            OutputItem::FunctionCall { call_id, name, arguments, .. } => {
                message.tool_calls.push(ToolCall::new(call_id, name, arguments));
            }
            OutputItem::Other => {}
        }
    }
    Ok(message)
}

/// Function call whose argument deltas are being streamed.
#[derive(Debug, Clone, Default)]
struct PendingCall {
    item_id: String,
    call_id: String,
    name: String,
}

/// Turns stream events into message chunks.
#[derive(Debug, Default)]
pub struct StreamState {
    cache: CacheState,
    pending: Option<PendingCall>,
}

impl StreamState {
    pub fn new(cache: CacheState) -> Self {
        Self { cache, pending: None }
    }

    pub fn on_event(&mut self, event: StreamEvent) -> anyhow::Result<Option<Message>> {
        let chunk = match event {
            StreamEvent::Created { response } => {
                let mut message = Message { role: Role::Assistant, ..Default::default() };
                set_default_extra(&mut message, &response, self.cache);
                message
            }
            StreamEvent::Completed { response } => {
                status_message(&response, response.status.as_str().to_string(), self.cache)
            }
            StreamEvent::Incomplete { response } | StreamEvent::Failed { response } => {
                status_message(&response, finish_reason(&response), self.cache)
            }
            StreamEvent::Error { message, .. } => anyhow::bail!("received error: {message}"),
            StreamEvent::OutputItemAdded { item, .. } => {
                if let OutputItem::FunctionCall { id, call_id, name, .. } = item {
                    self.pending = Some(PendingCall { item_id: id.unwrap_or_default(), call_id, name });
                }
                return Ok(None);
            }
            StreamEvent::FunctionCallArgumentsDelta { item_id, output_index, delta } => {
                let Some(pending) = self.pending.as_ref().filter(|pending| pending.item_id == item_id) else {
                    return Ok(None);
                };
                let call = ToolCall {
                    index: Some(output_index),
                    ..ToolCall::new(&pending.call_id, &pending.name, delta)
                };
                Message::assistant("", vec![call])
            }
            StreamEvent::ReasoningDelta { delta } => {
                Message { role: Role::Assistant, reasoning_content: delta, ..Default::default() }
            }
            StreamEvent::TextDelta { delta } => Message::assistant(delta, vec![]),
            StreamEvent::Other => return Ok(None),
        };
        Ok(Some(chunk))
    }
}
