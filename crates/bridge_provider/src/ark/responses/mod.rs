//! Ark Responses API chat model with server side session caching.

mod convert;
mod request;
mod response;

use std::collections::BTreeMap;
use std::sync::Arc;

use bridge_domain::{
    ChatModel, ChatOptions, HttpConfig, HttpInfra, Message, MessageStream, RetryConfig,
    TokenUsage, ToolCallingChatModel, ToolChoice, ToolInfo, join_url,
};
use bridge_infra::BridgeHttpService;
use convert::*;
use derive_setters::Setters;
use futures::StreamExt;
pub use request::*;
use reqwest::Url;
pub use response::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::types::{
    ArkOptions, DEFAULT_BASE_URL, DEFAULT_REGION, ReasoningEffort, ServiceTier,
    SessionCacheConfig, Thinking, ToolWebSearch, merged_headers,
};
use crate::client::{JsonReply, ProviderClient};
use crate::error::Error;
use crate::event::json_events;
use crate::openai::ResponseFormat;

#[derive(derive_more::Debug, Clone, Default, Serialize, Deserialize, Setters)]
#[serde(default)]
#[setters(strip_option, into)]
pub struct ResponsesConfig {
    #[debug(skip)]
    pub api_key: String,
    pub base_url: String,
    pub region: String,
    pub model: String,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// Sent as `text.format`.
    pub response_format: Option<ResponseFormat>,
    pub thinking: Option<Thinking>,
    pub service_tier: Option<ServiceTier>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub session_cache: Option<SessionCacheConfig>,
    pub web_search: Option<ToolWebSearch>,
    pub max_tool_calls: Option<i64>,
    pub custom_headers: BTreeMap<String, String>,
    pub http: HttpConfig,
    pub retry: RetryConfig,
}

impl ResponsesConfig {
    pub fn validate(&mut self) -> anyhow::Result<()> {
        if self.api_key.is_empty() {
            return Err(Error::MissingCredentials("APIKey").into());
        }
        if self.model.is_empty() {
            anyhow::bail!("model is required");
        }
        if self.base_url.is_empty() {
            self.base_url = DEFAULT_BASE_URL.to_string();
        }
        if self.region.is_empty() {
            self.region = DEFAULT_REGION.to_string();
        }
        Ok(())
    }
}

/// Result of [`ArkResponsesChatModel::create_prefix_cache`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheInfo {
    /// Pass as `head_previous_response_id` to reuse the prefix.
    pub response_id: String,
    pub usage: TokenUsage,
}

pub struct ArkResponsesChatModel<H> {
    client: ProviderClient<H>,
    url: Url,
    config: Arc<ResponsesConfig>,
    tools: Vec<ToolInfo>,
    tool_choice: Option<ToolChoice>,
}

impl<H> Clone for ArkResponsesChatModel<H> {
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

impl ArkResponsesChatModel<BridgeHttpService> {
    pub fn connect(mut config: ResponsesConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let http = Arc::new(BridgeHttpService::new(&config.http)?);
        Self::new(http, config)
    }
}

impl<H: HttpInfra> ArkResponsesChatModel<H> {
    pub fn new(http: Arc<H>, mut config: ResponsesConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let headers = vec![("Authorization".to_string(), format!("Bearer {}", config.api_key))];
        let client = ProviderClient::new(http, headers, config.retry.clone());
        let url = join_url(&config.base_url, "responses")?;
        Ok(Self { client, url, config: Arc::new(config), tools: Vec::new(), tool_choice: None })
    }

    fn base_request(&self, options: &ChatOptions) -> anyhow::Result<ResponsesRequest> {
        if options.stop.as_ref().is_some_and(|stop| !stop.is_empty()) {
            anyhow::bail!("'Stop' is not supported by responses API");
        }
        let config = &self.config;
        let ark = options.extension::<ArkOptions>();

        Ok(ResponsesRequest {
            model: options.model.clone().unwrap_or_else(|| config.model.clone()),
            max_output_tokens: options.max_tokens.or(config.max_output_tokens),
            temperature: options.temperature.or(config.temperature),
            top_p: options.top_p.or(config.top_p),
            text: config.response_format.as_ref().map(text_config),
            thinking: ark.and_then(|ark| ark.thinking).or(config.thinking),
            reasoning: ark
                .and_then(|ark| ark.reasoning_effort)
                .or(config.reasoning_effort)
                .map(|effort| Reasoning { effort }),
            service_tier: config.service_tier,
            ..Default::default()
        })
    }

    fn populate_tools(&self, request: &mut ResponsesRequest, options: &ChatOptions) -> anyhow::Result<()> {
        let ark = options.extension::<ArkOptions>();
        let web_search = ark
            .and_then(|ark| ark.web_search.as_ref())
            .or(self.config.web_search.as_ref());
        let max_tool_calls = ark.and_then(|ark| ark.max_tool_calls).or(self.config.max_tool_calls);
        populate_tools(request, &self.tools, self.tool_choice, options, web_search, max_tool_calls)
    }

    fn request(&self, input: &[Message], options: &ChatOptions) -> anyhow::Result<ResponsesRequest> {
        let mut request = self.base_request(options)?;
        let cache = options.extension::<ArkOptions>().and_then(|ark| ark.cache.as_ref());
        let now = chrono::Utc::now().timestamp();
        let remaining = populate_cache(input, &mut request, self.config.session_cache, cache, now)?;
        populate_input(remaining, &mut request)?;
        self.populate_tools(&mut request, options)?;
        Ok(request)
    }

    fn headers(&self, options: &ChatOptions) -> Vec<(String, String)> {
        merged_headers(&self.config.custom_headers, options.extension::<ArkOptions>())
    }

    fn log_request(&self, request: &ResponsesRequest) {
        info!(
            url = %self.url,
            model = %request.model,
            input_count = request.input.len(),
            previous_response_id = ?request.previous_response_id,
            stream = request.stream.unwrap_or_default(),
            "Connecting Upstream"
        );
    }

    /// Stores `prefix` on the server so later calls can start from the
    /// returned response id instead of resending it. `ttl` is in seconds;
    /// zero keeps the server default.
    pub async fn create_prefix_cache(
        &self,
        prefix: Vec<Message>,
        ttl: i64,
        options: ChatOptions,
    ) -> anyhow::Result<CacheInfo> {
        if prefix.is_empty() {
            anyhow::bail!("prefix messages cannot be empty");
        }
        let mut request = self.base_request(&options)?;
        request.store = Some(true);
        request.caching = Some(CachingConfig { cache_type: CacheType::Enabled, prefix: Some(true) });
        if ttl > 0 {
            request.expire_at = Some(chrono::Utc::now().timestamp() + ttl);
        }
        populate_input(&prefix, &mut request)?;
        self.populate_tools(&mut request, &options)?;

        self.log_request(&request);
        let reply: JsonReply<ResponseObject> =
            self.client.post_json(&self.url, &request, &self.headers(&options)).await?;
        Ok(CacheInfo { response_id: reply.body.id, usage: token_usage(reply.body.usage) })
    }
}

#[async_trait::async_trait]
impl<H: HttpInfra> ChatModel for ArkResponsesChatModel<H> {
    async fn generate(&self, input: Vec<Message>, options: ChatOptions) -> anyhow::Result<Message> {
        let request = self.request(&input, &options)?;
        self.log_request(&request);

        let reply: JsonReply<ResponseObject> =
            self.client.post_json(&self.url, &request, &self.headers(&options)).await?;
        output_message(reply.body, CacheState::of(&request))
    }

    async fn stream(
        &self,
        input: Vec<Message>,
        options: ChatOptions,
    ) -> anyhow::Result<MessageStream> {
        let mut request = self.request(&input, &options)?;
        request.stream = Some(true);
        self.log_request(&request);

        let source = self.client.post_stream(&self.url, &request, &self.headers(&options)).await?;
        let stream = json_events::<StreamEvent>(source)
            .scan(StreamState::new(CacheState::of(&request)), |state, event| {
                let chunk = event.and_then(|event| state.on_event(event)).transpose();
                futures::future::ready(Some(chunk))
            })
            .filter_map(futures::future::ready);
        Ok(Box::pin(stream))
    }
}

impl<H: HttpInfra> ToolCallingChatModel for ArkResponsesChatModel<H> {
    fn with_tools(&self, tools: Vec<ToolInfo>) -> anyhow::Result<Self> {
        if tools.is_empty() {
            return Err(Error::NoToolsToBind.into());
        }
        Ok(Self { tools, tool_choice: Some(ToolChoice::Allowed), ..self.clone() })
    }
}
