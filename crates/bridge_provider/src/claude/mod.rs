//! Anthropic Messages API chat model.

mod convert;
mod request;
mod response;
mod set_cache;

use std::sync::Arc;

use bridge_domain::{
    ChatModel, ChatOptions, DefaultTransformation, HttpConfig, HttpInfra, Message, MessageStream,
    RetryConfig, ToolCallingChatModel, ToolChoice, ToolInfo, Transformer, join_url,
};
use bridge_infra::BridgeHttpService;
pub use convert::{set_thinking_signature, thinking_signature};
use convert::*;
use derive_setters::Setters;
use futures::StreamExt;
use reqwest::Url;
use response::{MessagesResponse, StreamEvent};
use serde::{Deserialize, Serialize};
use set_cache::SetCache;
use tracing::info;

use self::request::{MessagesRequest, ThinkingParam};
use crate::client::{JsonReply, ProviderClient};
use crate::error::Error;
use crate::event::json_events;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Extended thinking. `budget_tokens` must be below `max_tokens`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thinking {
    pub enable: bool,
    pub budget_tokens: u32,
}

impl Thinking {
    fn param(self) -> Option<ThinkingParam> {
        self.enable.then_some(ThinkingParam::Enabled { budget_tokens: self.budget_tokens })
    }
}

#[derive(derive_more::Debug, Clone, Default, Serialize, Deserialize, Setters)]
#[serde(default)]
#[setters(strip_option, into)]
pub struct ClaudeConfig {
    #[debug(skip)]
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Required by the API.
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stop_sequences: Vec<String>,
    pub thinking: Option<Thinking>,
    pub disable_parallel_tool_use: Option<bool>,
    pub http: HttpConfig,
    pub retry: RetryConfig,
}

impl ClaudeConfig {
    pub fn validate(&mut self) -> anyhow::Result<()> {
        if self.api_key.is_empty() {
            return Err(Error::MissingCredentials("APIKey").into());
        }
        if self.model.is_empty() {
            anyhow::bail!("model is required");
        }
        if self.max_tokens == 0 {
            anyhow::bail!("max_tokens is required");
        }
        if self.base_url.is_empty() {
            self.base_url = DEFAULT_BASE_URL.to_string();
        }
        Ok(())
    }
}

/// Per call options read from `ChatOptions` extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Setters)]
#[setters(strip_option, into)]
pub struct ClaudeOptions {
    pub top_k: Option<u32>,
    pub thinking: Option<Thinking>,
    pub disable_parallel_tool_use: Option<bool>,
    /// Caches the tool list, the system prompt and the conversation so far.
    pub enable_auto_cache: Option<bool>,
}

pub struct ClaudeChatModel<H> {
    client: ProviderClient<H>,
    url: Url,
    config: Arc<ClaudeConfig>,
    tools: Vec<ToolInfo>,
    tool_choice: Option<ToolChoice>,
}

impl<H> Clone for ClaudeChatModel<H> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            url: self.url.clone(),
            config: self.config.clone(),
            tools: self.tools.clone(),
            tool_choice: self.tool_choice,
        }
    }
}

impl ClaudeChatModel<BridgeHttpService> {
    pub fn connect(mut config: ClaudeConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let http = Arc::new(BridgeHttpService::new(&config.http)?);
        Self::new(http, config)
    }
}

impl<H: HttpInfra> ClaudeChatModel<H> {
    pub fn new(http: Arc<H>, mut config: ClaudeConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let headers = vec![
            ("x-api-key".to_string(), config.api_key.clone()),
            ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
        ];
        let client = ProviderClient::new(http, headers, config.retry.clone());
        let url = join_url(&config.base_url, "messages")?;
        Ok(Self { client, url, config: Arc::new(config), tools: Vec::new(), tool_choice: None })
    }

    fn request(&self, input: &[Message], options: &ChatOptions) -> anyhow::Result<MessagesRequest> {
        let config = &self.config;
        let claude = options.extension::<ClaudeOptions>().cloned().unwrap_or_default();

        let tools = options.tools.as_deref().unwrap_or(&self.tools);
        let names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
        let tool_choice = tool_choice(
            options.tool_choice.or(self.tool_choice),
            &options.allowed_tool_names,
            &names,
            claude.disable_parallel_tool_use.or(config.disable_parallel_tool_use),
        )?;

        let request = MessagesRequest {
            model: options.model.clone().unwrap_or_else(|| config.model.clone()),
            max_tokens: options.max_tokens.unwrap_or(config.max_tokens),
            system: system_blocks(input),
            messages: input_messages(input)?,
            temperature: options.temperature.or(config.temperature),
            top_p: options.top_p.or(config.top_p),
            top_k: claude.top_k.or(config.top_k),
            stop_sequences: options.stop.clone().unwrap_or_else(|| config.stop_sequences.clone()),
            thinking: claude.thinking.or(config.thinking).and_then(Thinking::param),
            tools: tool_definitions(tools),
            tool_choice,
            stream: None,
        };

        let auto_cache = claude.enable_auto_cache.unwrap_or_default();
        let mut pipeline =
            DefaultTransformation::<MessagesRequest>::new().pipe(SetCache.when(move |_| auto_cache));
        Ok(pipeline.transform(request))
    }

    fn log_request(&self, request: &MessagesRequest) {
        info!(
            url = %self.url,
            model = %request.model,
            message_count = request.messages.len(),
            stream = request.stream.unwrap_or_default(),
            "Connecting Upstream"
        );
    }
}

#[async_trait::async_trait]
impl<H: HttpInfra> ChatModel for ClaudeChatModel<H> {
    async fn generate(&self, input: Vec<Message>, options: ChatOptions) -> anyhow::Result<Message> {
        let request = self.request(&input, &options)?;
        self.log_request(&request);

        let reply: JsonReply<MessagesResponse> = self.client.post_json(&self.url, &request, &[]).await?;
        Ok(response_message(reply.body))
    }

    async fn stream(
        &self,
        input: Vec<Message>,
        options: ChatOptions,
    ) -> anyhow::Result<MessageStream> {
        let mut request = self.request(&input, &options)?;
        request.stream = Some(true);
        self.log_request(&request);

        let source = self.client.post_stream(&self.url, &request, &[]).await?;
        let stream = json_events::<StreamEvent>(source)
            .scan(StreamState::default(), |state, event| {
                let chunk = event.and_then(|event| state.on_event(event)).transpose();
                futures::future::ready(Some(chunk))
            })
            .filter_map(futures::future::ready);
        Ok(Box::pin(stream))
    }
}

impl<H: HttpInfra> ToolCallingChatModel for ClaudeChatModel<H> {
    fn with_tools(&self, tools: Vec<ToolInfo>) -> anyhow::Result<Self> {
        if tools.is_empty() {
            return Err(Error::NoToolsToBind.into());
        }
        Ok(Self { tools, tool_choice: Some(ToolChoice::Allowed), ..self.clone() })
    }
}
