use std::collections::BTreeMap;
use std::sync::Arc;

use bridge_domain::{
    ChatModel, ChatOptions, HttpConfig, HttpInfra, Message, MessageStream, RetryConfig,
    ToolCallingChatModel, ToolChoice, ToolInfo,
};
use bridge_infra::BridgeHttpService;
use derive_setters::Setters;
use serde::{Deserialize, Serialize};

use super::extra::{set_model_name, set_request_id, set_service_tier};
use super::types::{
    ArkOptions, DEFAULT_BASE_URL, DEFAULT_REGION, ReasoningEffort, ServiceTier, Thinking,
    merged_headers,
};
use crate::client::ProviderClient;
use crate::error::Error;
use crate::openai::{
    ChatRequest, ChatResponse, Completions, ResponseFormat, apply_options, apply_tools,
    request_messages,
};

const PROVIDER: &str = "ark";
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(derive_more::Debug, Clone, Default, Serialize, Deserialize, Setters)]
#[serde(default)]
#[setters(strip_option, into)]
pub struct ArkConfig {
    #[debug(skip)]
    pub api_key: String,
    /// Empty falls back to the Beijing endpoint.
    pub base_url: String,
    /// Empty falls back to `cn-beijing`.
    pub region: String,
    /// Endpoint id on the Ark platform.
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub response_format: Option<ResponseFormat>,
    pub logprobs: bool,
    pub top_logprobs: Option<u32>,
    pub thinking: Option<Thinking>,
    pub service_tier: Option<ServiceTier>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub custom_headers: BTreeMap<String, String>,
    pub http: HttpConfig,
    pub retry: RetryConfig,
}

impl ArkConfig {
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

fn decorate(response: &ChatResponse, message: &mut Message) {
    if let Some(model) = response.model.as_deref().filter(|model| !model.is_empty()) {
        set_model_name(message, model);
    }
    if let Some(tier) = response.service_tier.as_deref().filter(|tier| !tier.is_empty()) {
        set_service_tier(message, tier);
    }
}

/// Ark chat completions model.
pub struct ArkChatModel<H> {
    completions: Completions<H>,
    config: Arc<ArkConfig>,
    tools: Vec<ToolInfo>,
    tool_choice: Option<ToolChoice>,
}

impl<H> Clone for ArkChatModel<H> {
    fn clone(&self) -> Self {
        Self {
            completions: self.completions.clone(),
            config: self.config.clone(),
            tools: self.tools.clone(),
            tool_choice: self.tool_choice,
        }
    }
}

impl ArkChatModel<BridgeHttpService> {
    pub fn connect(mut config: ArkConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let http = Arc::new(BridgeHttpService::new(&config.http)?);
        Self::new(http, config)
    }
}

impl<H: HttpInfra> ArkChatModel<H> {
    pub fn new(http: Arc<H>, mut config: ArkConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let headers = vec![("Authorization".to_string(), format!("Bearer {}", config.api_key))];
        let client = ProviderClient::new(http, headers, config.retry.clone());
        let completions =
            Completions::new(client, &config.base_url, PROVIDER)?.decorator(Arc::new(decorate));
        Ok(Self { completions, config: Arc::new(config), tools: Vec::new(), tool_choice: None })
    }

    fn request(&self, input: &[Message], options: &ChatOptions) -> anyhow::Result<ChatRequest> {
        let config = &self.config;
        let ark = options.extension::<ArkOptions>();

        let base = ChatRequest {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            stop: config.stop.clone(),
            presence_penalty: config.presence_penalty,
            frequency_penalty: config.frequency_penalty,
            response_format: config.response_format.clone(),
            logprobs: config.logprobs.then_some(true),
            top_logprobs: config.top_logprobs,
            ..Default::default()
        };
        let mut request = apply_options(base, options);

        let thinking = ark.and_then(|ark| ark.thinking).or(config.thinking);
        if let Some(thinking) = thinking {
            request = request.extra_field("thinking", serde_json::to_value(thinking)?);
        }
        if let Some(tier) = config.service_tier {
            request = request.extra_field("service_tier", serde_json::to_value(tier)?);
        }
        let effort = ark.and_then(|ark| ark.reasoning_effort).or(config.reasoning_effort);
        if let Some(effort) = effort {
            request = request.extra_field("reasoning_effort", serde_json::to_value(effort)?);
        }

        request.messages = request_messages(PROVIDER, input, "tool")?;
        apply_tools(&mut request, &self.tools, self.tool_choice, options)?;
        Ok(request)
    }
}

#[async_trait::async_trait]
impl<H: HttpInfra> ChatModel for ArkChatModel<H> {
    async fn generate(&self, input: Vec<Message>, options: ChatOptions) -> anyhow::Result<Message> {
        let request = self.request(&input, &options)?;
        let headers = merged_headers(&self.config.custom_headers, options.extension::<ArkOptions>());

        let (mut message, reply_headers) = self.completions.generate(&request, &headers).await?;
        if let Some(id) = reply_headers.get(REQUEST_ID_HEADER).and_then(|id| id.to_str().ok()) {
            set_request_id(&mut message, id);
        }
        Ok(message)
    }

    async fn stream(
        &self,
        input: Vec<Message>,
        options: ChatOptions,
    ) -> anyhow::Result<MessageStream> {
        let request = self.request(&input, &options)?;
        let headers = merged_headers(&self.config.custom_headers, options.extension::<ArkOptions>());
        self.completions.stream(request, &headers).await
    }
}

impl<H: HttpInfra> ToolCallingChatModel for ArkChatModel<H> {
    fn with_tools(&self, tools: Vec<ToolInfo>) -> anyhow::Result<Self> {
        if tools.is_empty() {
            return Err(Error::NoToolsToBind.into());
        }
        Ok(Self { tools, tool_choice: Some(ToolChoice::Allowed), ..self.clone() })
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::ark::extra::{model_name, request_id, service_tier};
    use crate::ark::types::ThinkingType;

    fn model(server: &mockito::Server) -> ArkChatModel<BridgeHttpService> {
        ArkChatModel::connect(
            ArkConfig::default()
                .api_key("ark-key")
                .model("ep-123")
                .base_url(server.url())
                .service_tier(ServiceTier::Auto)
                .custom_headers(BTreeMap::from([("x-team".to_string(), "a".to_string())]))
                .retry(RetryConfig::disabled()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_generate_records_request_metadata() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("x-team", "b")
            .match_body(Matcher::PartialJson(json!({
                "model": "ep-123",
                "thinking": {"type": "disabled"},
                "service_tier": "auto",
                "reasoning_effort": "low"
            })))
            .with_header("content-type", "application/json")
            .with_header("x-request-id", "req-1")
            .with_body(
                json!({
                    "model": "doubao-seed",
                    "service_tier": "default",
                    "choices": [{"index": 0, "message": {
                        "role": "assistant", "content": "ok", "reasoning_content": "thought"
                    }}]
                })
                .to_string(),
            )
            .create_async()
            .await;
        let options = ChatOptions::default().with_extension(
            ArkOptions::default()
                .thinking(Thinking::new(ThinkingType::Disabled))
                .reasoning_effort(ReasoningEffort::Low)
                .custom_headers(BTreeMap::from([("x-team".to_string(), "b".to_string())])),
        );

        let actual = model(&server).generate(vec![Message::user("hi")], options).await.unwrap();

        mock.assert_async().await;
        assert_eq!(actual.content, "ok");
        assert_eq!(actual.reasoning_content, "thought");
        assert_eq!(request_id(&actual), Some("req-1"));
        assert_eq!(model_name(&actual), Some("doubao-seed"));
        assert_eq!(service_tier(&actual), Some("default"));
    }

    #[tokio::test]
    async fn test_stream_chunks_carry_model_name() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"model\":\"doubao-seed\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"o\"}}]}\n\n",
                "data: {\"model\":\"doubao-seed\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"k\"},\"finish_reason\":\"stop\"}]}\n\n",
                "data: [DONE]\n\n"
            ))
            .create_async()
            .await;

        let stream = model(&server).stream(vec![Message::user("hi")], ChatOptions::default()).await.unwrap();
        let chunks: Vec<Message> = stream.map(|chunk| chunk.unwrap()).collect().await;
        let actual = Message::concat(&chunks).unwrap();

        assert_eq!(actual.content, "ok");
        assert_eq!(model_name(&actual), Some("doubao-seed"));
    }
}
