use std::sync::Arc;

use bridge_domain::{
    ChatModel, ChatOptions, HttpConfig, HttpInfra, Message, MessageStream, RetryConfig,
    ToolCallingChatModel, ToolChoice, ToolInfo,
};
use bridge_infra::BridgeHttpService;
use derive_setters::Setters;
use serde::{Deserialize, Serialize};

use crate::client::ProviderClient;
use crate::error::Error;
use crate::openai::{
    ChatRequest, Completions, ResponseFormat, ResponseFormatType, apply_options, apply_tools,
    request_messages,
};

const PROVIDER: &str = "deepseek";
pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeepSeekResponseFormat {
    #[default]
    Text,
    JsonObject,
}

#[derive(derive_more::Debug, Clone, Default, Serialize, Deserialize, Setters)]
#[serde(default)]
#[setters(strip_option, into)]
pub struct DeepSeekConfig {
    #[debug(skip)]
    pub api_key: String,
    /// Empty falls back to [`DEFAULT_BASE_URL`].
    pub base_url: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub response_format: Option<DeepSeekResponseFormat>,
    pub logprobs: bool,
    pub top_logprobs: Option<u32>,
    pub http: HttpConfig,
    pub retry: RetryConfig,
}

impl DeepSeekConfig {
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
        Ok(())
    }

    fn request(&self) -> ChatRequest {
        let response_format = self.response_format.map(|format| ResponseFormat {
            format_type: match format {
                DeepSeekResponseFormat::Text => ResponseFormatType::Text,
                DeepSeekResponseFormat::JsonObject => ResponseFormatType::JsonObject,
            },
            json_schema: None,
        });
        ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            stop: self.stop.clone(),
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
            response_format,
            logprobs: self.logprobs.then_some(true),
            top_logprobs: self.top_logprobs,
            ..Default::default()
        }
    }
}

/// DeepSeek chat model. Reasoning models report their chain of thought in
/// `reasoning_content`.
pub struct DeepSeekChatModel<H> {
    completions: Completions<H>,
    config: Arc<DeepSeekConfig>,
    tools: Vec<ToolInfo>,
    tool_choice: Option<ToolChoice>,
}

impl<H> Clone for DeepSeekChatModel<H> {
    fn clone(&self) -> Self {
        Self {
            completions: self.completions.clone(),
            config: self.config.clone(),
            tools: self.tools.clone(),
            tool_choice: self.tool_choice,
        }
    }
}

impl DeepSeekChatModel<BridgeHttpService> {
    pub fn connect(mut config: DeepSeekConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let http = Arc::new(BridgeHttpService::new(&config.http)?);
        Self::new(http, config)
    }
}

impl<H: HttpInfra> DeepSeekChatModel<H> {
    pub fn new(http: Arc<H>, mut config: DeepSeekConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let headers = vec![("Authorization".to_string(), format!("Bearer {}", config.api_key))];
        let client = ProviderClient::new(http, headers, config.retry.clone());
        let completions = Completions::new(client, &config.base_url, PROVIDER)?;
        Ok(Self { completions, config: Arc::new(config), tools: Vec::new(), tool_choice: None })
    }

    fn request(&self, input: &[Message], options: &ChatOptions) -> anyhow::Result<ChatRequest> {
        let mut request = apply_options(self.config.request(), options);
        request.messages = request_messages(PROVIDER, input, "tool")?;
        apply_tools(&mut request, &self.tools, self.tool_choice, options)?;
        Ok(request)
    }
}

#[async_trait::async_trait]
impl<H: HttpInfra> ChatModel for DeepSeekChatModel<H> {
    async fn generate(&self, input: Vec<Message>, options: ChatOptions) -> anyhow::Result<Message> {
        let request = self.request(&input, &options)?;
        let (message, _) = self.completions.generate(&request, &[]).await?;
        Ok(message)
    }

    async fn stream(
        &self,
        input: Vec<Message>,
        options: ChatOptions,
    ) -> anyhow::Result<MessageStream> {
        let request = self.request(&input, &options)?;
        self.completions.stream(request, &[]).await
    }
}

impl<H: HttpInfra> ToolCallingChatModel for DeepSeekChatModel<H> {
    fn with_tools(&self, tools: Vec<ToolInfo>) -> anyhow::Result<Self> {
        if tools.is_empty() {
            return Err(Error::NoToolsToBind.into());
        }
        Ok(Self { tools, tool_choice: Some(ToolChoice::Allowed), ..self.clone() })
    }
}

#[cfg(test)]
mod tests {
    use bridge_domain::ToolCall;
    use futures::StreamExt;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn model(server: &mockito::Server) -> DeepSeekChatModel<BridgeHttpService> {
        DeepSeekChatModel::connect(
            DeepSeekConfig::default()
                .api_key("my-api-key")
                .base_url(server.url())
                .model("deepseek-chat")
                .response_format(DeepSeekResponseFormat::JsonObject)
                .retry(RetryConfig::disabled()),
        )
        .unwrap()
    }

    #[test]
    fn test_validate_requires_api_key() {
        let mut fixture = DeepSeekConfig::default().model("deepseek-chat");

        let actual = fixture.validate().unwrap_err().to_string();

        assert_eq!(actual, "missing credentials: set 'APIKey'");
    }

    #[test]
    fn test_validate_fills_base_url() {
        let mut fixture = DeepSeekConfig::default().api_key("k").model("deepseek-chat");

        fixture.validate().unwrap();

        assert_eq!(fixture.base_url, DEFAULT_BASE_URL);
    }

    #[tokio::test]
    async fn test_generate_with_forced_tool() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer my-api-key")
            .match_body(Matcher::PartialJson(json!({
                "model": "deepseek-chat",
                "response_format": {"type": "json_object"},
                "tool_choice": {"type": "function", "function": {"name": "deepseek-tool"}},
                "messages": [
                    {"role": "system", "content": "system"},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "choices": [{
                        "index": 0,
                        "message": {
                            "role": "assistant",
                            "content": "hello world",
                            "reasoning_content": "reasoning content",
                            "tool_calls": [{
                                "index": 1, "id": "id", "type": "type",
                                "function": {"name": "name", "arguments": "arguments"}
                            }]
                        }
                    }],
                    "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let fixture = model(&server).with_tools(vec![ToolInfo::new("deepseek-tool", "")]).unwrap();
        let actual = fixture
            .generate(
                vec![Message::system("system"), Message::user("hello")],
                ChatOptions::default().tool_choice(ToolChoice::Forced),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(actual.content, "hello world");
        assert_eq!(actual.reasoning_content, "reasoning content");
        assert_eq!(
            actual.tool_calls,
            vec![ToolCall { index: Some(1), call_type: "type".into(), ..ToolCall::new("id", "name", "arguments") }]
        );
        assert_eq!(actual.usage().map(|usage| usage.total_tokens), Some(3));
    }

    #[tokio::test]
    async fn test_stream_collects_reasoning() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"reasoning_content\":\"think\"}}]}\n\n",
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"},\"finish_reason\":\"stop\"}]}\n\n",
                "data: [DONE]\n\n"
            ))
            .create_async()
            .await;

        let stream = model(&server)
            .stream(vec![Message::user("hello")], ChatOptions::default())
            .await
            .unwrap();
        let chunks: Vec<Message> = stream.map(|chunk| chunk.unwrap()).collect().await;
        let actual = Message::concat(&chunks).unwrap();

        assert_eq!(actual.reasoning_content, "think");
        assert_eq!(actual.content, "hi");
        assert_eq!(actual.finish_reason(), Some("stop"));
    }

    #[test]
    fn test_with_tools_rejects_empty() {
        let fixture =
            DeepSeekChatModel::connect(DeepSeekConfig::default().api_key("k").model("m")).unwrap();

        let actual = fixture.with_tools(vec![]).err().unwrap().to_string();

        assert_eq!(actual, "no tools to bind");
    }
}
