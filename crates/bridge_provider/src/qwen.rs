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
    ChatRequest, Completions, ResponseFormat, apply_options, apply_tools, request_messages,
};

const PROVIDER: &str = "qwen";
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

#[derive(derive_more::Debug, Clone, Default, Serialize, Deserialize, Setters)]
#[serde(default)]
#[setters(strip_option, into)]
pub struct QwenConfig {
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
    pub response_format: Option<ResponseFormat>,
    pub seed: Option<i64>,
    /// Turns thinking on or off for hybrid reasoning models. Unset leaves the
    /// model default.
    pub enable_thinking: Option<bool>,
    pub http: HttpConfig,
    pub retry: RetryConfig,
}

impl QwenConfig {
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
}

/// Per call options read from [`ChatOptions`] extensions.
#[derive(Debug, Clone, Default, PartialEq, Setters)]
#[setters(strip_option, into)]
pub struct QwenOptions {
    pub enable_thinking: Option<bool>,
}

/// Rejects tool choice combinations DashScope cannot express.
pub fn validate_tool_options(options: &ChatOptions) -> anyhow::Result<()> {
    match options.tool_choice {
        Some(ToolChoice::Allowed) if !options.allowed_tool_names.is_empty() => {
            Err(Error::AllowedWithToolNames.into())
        }
        Some(ToolChoice::Forced) if options.allowed_tool_names.len() > 1 => {
            anyhow::bail!("only one allowed tool name can be configured for tool_choice 'forced'")
        }
        _ => Ok(()),
    }
}

/// Qwen chat model on the DashScope OpenAI compatible endpoint.
pub struct QwenChatModel<H> {
    completions: Completions<H>,
    config: Arc<QwenConfig>,
    tools: Vec<ToolInfo>,
    tool_choice: Option<ToolChoice>,
}

impl<H> Clone for QwenChatModel<H> {
    fn clone(&self) -> Self {
        Self {
            completions: self.completions.clone(),
            config: self.config.clone(),
            tools: self.tools.clone(),
            tool_choice: self.tool_choice,
        }
    }
}

impl QwenChatModel<BridgeHttpService> {
    pub fn connect(mut config: QwenConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let http = Arc::new(BridgeHttpService::new(&config.http)?);
        Self::new(http, config)
    }
}

impl<H: HttpInfra> QwenChatModel<H> {
    pub fn new(http: Arc<H>, mut config: QwenConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let headers = vec![("Authorization".to_string(), format!("Bearer {}", config.api_key))];
        let client = ProviderClient::new(http, headers, config.retry.clone());
        let completions = Completions::new(client, &config.base_url, PROVIDER)?;
        Ok(Self { completions, config: Arc::new(config), tools: Vec::new(), tool_choice: None })
    }

    fn request(&self, input: &[Message], options: &ChatOptions) -> anyhow::Result<ChatRequest> {
        validate_tool_options(options)?;

        let config = &self.config;
        let base = ChatRequest {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            stop: config.stop.clone(),
            presence_penalty: config.presence_penalty,
            frequency_penalty: config.frequency_penalty,
            response_format: config.response_format.clone(),
            ..Default::default()
        };
        let mut request = apply_options(base, options);
        if let Some(seed) = config.seed {
            request = request.extra_field("seed", seed);
        }

        let enable_thinking = options
            .extension::<QwenOptions>()
            .and_then(|qwen| qwen.enable_thinking)
            .or(config.enable_thinking);
        if let Some(enable_thinking) = enable_thinking {
            request = request.extra_field("enable_thinking", enable_thinking);
        }

        request.messages = request_messages(PROVIDER, input, "tool")?;
        apply_tools(&mut request, &self.tools, self.tool_choice, options)?;
        Ok(request)
    }
}

#[async_trait::async_trait]
impl<H: HttpInfra> ChatModel for QwenChatModel<H> {
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

impl<H: HttpInfra> ToolCallingChatModel for QwenChatModel<H> {
    fn with_tools(&self, tools: Vec<ToolInfo>) -> anyhow::Result<Self> {
        if tools.is_empty() {
            return Err(Error::NoToolsToBind.into());
        }
        Ok(Self { tools, tool_choice: Some(ToolChoice::Allowed), ..self.clone() })
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn tool_options(choice: ToolChoice, names: &[&str]) -> ChatOptions {
        ChatOptions::default()
            .tool_choice(choice)
            .allowed_tool_names(names.iter().map(|name| name.to_string()).collect::<Vec<_>>())
            .tools(vec![ToolInfo::new("tool1", ""), ToolInfo::new("tool2", "")])
    }

    #[test]
    fn test_validate_tool_options() {
        assert!(validate_tool_options(&ChatOptions::default()).is_ok());
        assert!(validate_tool_options(&ChatOptions::default().tool_choice(ToolChoice::Allowed)).is_ok());
        assert!(validate_tool_options(&tool_options(ToolChoice::Forced, &["tool1"])).is_ok());
        assert!(validate_tool_options(&ChatOptions::default().tool_choice(ToolChoice::Forced)).is_ok());
    }

    #[test]
    fn test_validate_tool_options_allowed_with_names() {
        let actual = validate_tool_options(&tool_options(ToolChoice::Allowed, &["tool1"]))
            .unwrap_err()
            .to_string();

        let expected = "tool_choice 'allowed' is not supported when allowed tool names are present";
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_validate_tool_options_forced_with_many_names() {
        let actual = validate_tool_options(&tool_options(ToolChoice::Forced, &["tool1", "tool2"]))
            .unwrap_err()
            .to_string();

        let expected = "only one allowed tool name can be configured for tool_choice 'forced'";
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_generate_sends_enable_thinking() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer qwe")
            .match_body(Matcher::PartialJson(json!({
                "model": "zxc",
                "enable_thinking": true
            })))
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"hi"}}]}"#)
            .create_async()
            .await;
        let fixture = QwenChatModel::connect(
            QwenConfig::default()
                .api_key("qwe")
                .model("zxc")
                .base_url(server.url())
                .enable_thinking(false)
                .retry(RetryConfig::disabled()),
        )
        .unwrap();

        let actual = fixture
            .generate(
                vec![Message::user("hello")],
                ChatOptions::default().with_extension(QwenOptions::default().enable_thinking(true)),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(actual.content, "hi");
    }

    #[tokio::test]
    async fn test_generate_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(400)
            .with_body("mock err")
            .create_async()
            .await;
        let fixture = QwenChatModel::connect(
            QwenConfig::default()
                .api_key("qwe")
                .model("zxc")
                .base_url(server.url())
                .retry(RetryConfig::disabled()),
        )
        .unwrap();

        let actual = fixture.generate(vec![Message::user("hello")], ChatOptions::default()).await;

        assert!(actual.is_err());
    }

    #[test]
    fn test_connect_requires_api_key() {
        let actual = QwenChatModel::connect(QwenConfig::default().model("zxc")).err().unwrap();

        assert_eq!(actual.to_string(), "missing credentials: set 'APIKey'");
    }
}
