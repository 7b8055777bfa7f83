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
    ChatRequest, Completions, MessageContent, RequestMessage, ResponseFormat, WirePart,
    apply_options, apply_tools, request_messages,
};

const PROVIDER: &str = "qianfan";
pub const DEFAULT_BASE_URL: &str = "https://qianfan.baidubce.com/v2";

#[derive(derive_more::Debug, Clone, Default, Serialize, Deserialize, Setters)]
#[serde(default)]
#[setters(strip_option, into)]
pub struct QianfanConfig {
    /// Bearer token of the v2 API.
    #[debug(skip)]
    pub api_key: String,
    /// Empty falls back to [`DEFAULT_BASE_URL`].
    pub base_url: String,
    pub model: String,
    pub max_completion_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub penalty_score: Option<f32>,
    pub seed: Option<i64>,
    pub user: Option<String>,
    pub parallel_tool_calls: Option<bool>,
    pub response_format: Option<ResponseFormat>,
    pub http: HttpConfig,
    pub retry: RetryConfig,
}

impl QianfanConfig {
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
        let mut request = ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_completion_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            stop: self.stop.clone(),
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
            response_format: self.response_format.clone(),
            ..Default::default()
        };
        if let Some(score) = self.penalty_score {
            request = request.extra_field("penalty_score", score);
        }
        if let Some(seed) = self.seed {
            request = request.extra_field("seed", seed);
        }
        if let Some(user) = &self.user {
            request = request.extra_field("user", user.clone());
        }
        if let Some(parallel) = self.parallel_tool_calls {
            request = request.extra_field("parallel_tool_calls", parallel);
        }
        request
    }
}

/// Converts messages for Qianfan, which takes every content as a list of
/// parts and calls the tool role `function`.
pub fn multimodal_messages(input: &[Message]) -> anyhow::Result<Vec<RequestMessage>> {
    let mut messages = request_messages(PROVIDER, input, "function")?;
    for message in &mut messages {
        message.content = match message.content.take() {
            Some(MessageContent::Text(text)) if text.is_empty() => None,
            Some(MessageContent::Text(text)) => Some(MessageContent::Parts(vec![WirePart::Text { text }])),
            Some(MessageContent::Parts(parts)) => {
                if parts.iter().any(|part| matches!(part, WirePart::VideoUrl { .. })) {
                    return Err(Error::UnsupportedPart { provider: PROVIDER, part: "video_url" }.into());
                }
                Some(MessageContent::Parts(parts))
            }
            None => None,
        };
    }
    Ok(messages)
}

/// Baidu Qianfan chat model on the v2 chat completions API.
pub struct QianfanChatModel<H> {
    completions: Completions<H>,
    config: Arc<QianfanConfig>,
    tools: Vec<ToolInfo>,
    tool_choice: Option<ToolChoice>,
}

impl<H> Clone for QianfanChatModel<H> {
    fn clone(&self) -> Self {
        Self {
            completions: self.completions.clone(),
            config: self.config.clone(),
            tools: self.tools.clone(),
            tool_choice: self.tool_choice,
        }
    }
}

impl QianfanChatModel<BridgeHttpService> {
    pub fn connect(mut config: QianfanConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let http = Arc::new(BridgeHttpService::new(&config.http)?);
        Self::new(http, config)
    }
}

impl<H: HttpInfra> QianfanChatModel<H> {
    pub fn new(http: Arc<H>, mut config: QianfanConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let headers = vec![("Authorization".to_string(), format!("Bearer {}", config.api_key))];
        let client = ProviderClient::new(http, headers, config.retry.clone());
        let completions = Completions::new(client, &config.base_url, PROVIDER)?;
        Ok(Self { completions, config: Arc::new(config), tools: Vec::new(), tool_choice: None })
    }

    fn request(&self, input: &[Message], options: &ChatOptions) -> anyhow::Result<ChatRequest> {
        let mut request = apply_options(self.config.request(), options);
        request.messages = multimodal_messages(input)?;
        apply_tools(&mut request, &self.tools, self.tool_choice, options)?;
        Ok(request)
    }
}

#[async_trait::async_trait]
impl<H: HttpInfra> ChatModel for QianfanChatModel<H> {
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

impl<H: HttpInfra> ToolCallingChatModel for QianfanChatModel<H> {
    fn with_tools(&self, tools: Vec<ToolInfo>) -> anyhow::Result<Self> {
        if tools.is_empty() {
            return Err(Error::NoToolsToBind.into());
        }
        Ok(Self { tools, tool_choice: Some(ToolChoice::Allowed), ..self.clone() })
    }
}

#[cfg(test)]
mod tests {
    use bridge_domain::{ContentPart, ToolCall};
    use mockito::Matcher;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn model(server: &mockito::Server) -> QianfanChatModel<BridgeHttpService> {
        QianfanChatModel::connect(
            QianfanConfig::default()
                .api_key("bce-v3/key")
                .model("ernie-4.0")
                .base_url(server.url())
                .retry(RetryConfig::disabled()),
        )
        .unwrap()
    }

    #[test]
    fn test_multimodal_messages() {
        let fixture = vec![
            Message::user("hello"),
            Message::user("").user_input_multi_content(vec![
                ContentPart::text("text part"),
                ContentPart::image_url("http://example.com/image.png"),
            ]),
            Message::assistant("", vec![]).assistant_gen_multi_content(vec![ContentPart::text("assistant")]),
            Message::assistant("", vec![ToolCall::new("id", "func", "args")]),
            Message { role: bridge_domain::Role::Tool, tool_call_id: Some("id".into()), ..Default::default() },
        ];

        let actual = serde_json::to_value(multimodal_messages(&fixture).unwrap()).unwrap();

        let expected = json!([
            {"role": "user", "content": [{"type": "text", "text": "hello"}]},
            {"role": "user", "content": [
                {"type": "text", "text": "text part"},
                {"type": "image_url", "image_url": {"url": "http://example.com/image.png"}}
            ]},
            {"role": "assistant", "content": [{"type": "text", "text": "assistant"}]},
            {"role": "assistant", "tool_calls": [
                {"id": "id", "type": "function", "function": {"name": "func", "arguments": "args"}}
            ]},
            {"role": "function", "tool_call_id": "id"}
        ]);
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_generate_body_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"code":"123","message":"asd","type":"qwe"}}"#)
            .create_async()
            .await;

        let actual = model(&server)
            .generate(vec![Message::user("test")], ChatOptions::default())
            .await
            .unwrap_err();

        assert_eq!(actual.to_string(), "qianfan API error [123]: asd");
    }

    #[tokio::test]
    async fn test_generate_with_bound_tools() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer bce-v3/key")
            .match_body(Matcher::PartialJson(json!({
                "tool_choice": "auto",
                "tools": [{"type": "function", "function": {
                    "name": "get_current_stock_price",
                    "description": "Get the current stock price given the name of the stock",
                    "parameters": {"type": "object", "properties": {}}
                }}]
            })))
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "choices": [{"index": 0, "message": {
                        "role": "assistant",
                        "tool_calls": [{"id": "call", "type": "function",
                            "function": {"name": "get_current_stock_price", "arguments": "{}"}}]
                    }, "finish_reason": "tool_calls"}],
                    "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
                })
                .to_string(),
            )
            .create_async()
            .await;
        let fixture = model(&server)
            .with_tools(vec![ToolInfo::new(
                "get_current_stock_price",
                "Get the current stock price given the name of the stock",
            )])
            .unwrap();

        let actual = fixture.generate(vec![Message::user("price?")], ChatOptions::default()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(actual.tool_calls, vec![ToolCall::new("call", "get_current_stock_price", "{}")]);
        assert_eq!(actual.finish_reason(), Some("tool_calls"));
        assert_eq!(actual.usage().map(|usage| usage.prompt_tokens), Some(1));
    }
}
