//! Google Gemini `generateContent` chat model.

mod convert;
pub mod extra;
mod request;
mod response;

use std::sync::Arc;

use anyhow::Context as _;
use bridge_domain::{
    ChatModel, ChatOptions, HttpConfig, HttpInfra, Message, MessageStream, RetryConfig,
    ToolCallingChatModel, ToolChoice, ToolInfo,
};
use bridge_infra::BridgeHttpService;
use convert::*;
use derive_setters::Setters;
use futures::StreamExt;
pub use request::{
    CodeExecutionResult, ExecutableCode, Modality, SafetySetting, ThinkingConfig, VideoMetadata,
};
use request::{GenerateContentRequest, GenerationConfig};
use reqwest::Url;
use response::GenerateContentResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::client::{JsonReply, ProviderClient};
use crate::error::Error;
use crate::event::json_events;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(derive_more::Debug, Clone, Default, Serialize, Deserialize, Setters)]
#[serde(default)]
#[setters(strip_option, into)]
pub struct GeminiConfig {
    #[debug(skip)]
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    /// JSON schema the reply must follow; the reply is then JSON.
    pub response_schema: Option<Value>,
    pub response_modalities: Vec<Modality>,
    pub thinking_config: Option<ThinkingConfig>,
    pub safety_settings: Vec<SafetySetting>,
    /// Offers the built in code execution tool.
    pub enable_code_execution: bool,
    pub http: HttpConfig,
    pub retry: RetryConfig,
}

impl GeminiConfig {
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

/// Per call options read from `ChatOptions` extensions.
#[derive(Debug, Clone, Default, PartialEq, Setters)]
#[setters(strip_option, into)]
pub struct GeminiOptions {
    pub top_k: Option<u32>,
    pub response_schema: Option<Value>,
    pub response_modalities: Option<Vec<Modality>>,
    pub thinking_config: Option<ThinkingConfig>,
}

pub struct GeminiChatModel<H> {
    client: ProviderClient<H>,
    config: Arc<GeminiConfig>,
    tools: Vec<ToolInfo>,
    tool_choice: Option<ToolChoice>,
}

impl<H> Clone for GeminiChatModel<H> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            tools: self.tools.clone(),
            tool_choice: self.tool_choice,
        }
    }
}

impl GeminiChatModel<BridgeHttpService> {
    pub fn connect(mut config: GeminiConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let http = Arc::new(BridgeHttpService::new(&config.http)?);
        Self::new(http, config)
    }
}

impl<H: HttpInfra> GeminiChatModel<H> {
    pub fn new(http: Arc<H>, mut config: GeminiConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let headers = vec![("x-goog-api-key".to_string(), config.api_key.clone())];
        let client = ProviderClient::new(http, headers, config.retry.clone());
        Ok(Self { client, config: Arc::new(config), tools: Vec::new(), tool_choice: None })
    }

    /// Models are addressed in the path: `{base}/models/{model}:{method}`.
    fn url(&self, model: &str, method: &str) -> anyhow::Result<Url> {
        let model = model.strip_prefix("models/").unwrap_or(model);
        let url = format!("{}/models/{model}:{method}", self.config.base_url.trim_end_matches('/'));
        Url::parse(&url).with_context(|| "Failed to construct Gemini API URL")
    }

    fn request(&self, input: &[Message], options: &ChatOptions) -> anyhow::Result<GenerateContentRequest> {
        let config = &self.config;
        let gemini = options.extension::<GeminiOptions>().cloned().unwrap_or_default();

        let tools = options.tools.as_deref().unwrap_or(&self.tools);
        let names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
        let tool_config = tool_config(
            options.tool_choice.or(self.tool_choice),
            &options.allowed_tool_names,
            &names,
        )?;

        let response_schema = gemini.response_schema.or_else(|| config.response_schema.clone());
        let generation_config = GenerationConfig {
            max_output_tokens: options.max_tokens.or(config.max_tokens),
            temperature: options.temperature.or(config.temperature),
            top_p: options.top_p.or(config.top_p),
            top_k: gemini.top_k.or(config.top_k),
            stop_sequences: options.stop.clone().unwrap_or_default(),
            response_mime_type: response_schema.as_ref().map(|_| "application/json".to_string()),
            response_json_schema: response_schema,
            response_modalities: gemini
                .response_modalities
                .unwrap_or_else(|| config.response_modalities.clone()),
            thinking_config: gemini.thinking_config.or(config.thinking_config),
        };

        Ok(GenerateContentRequest {
            contents: contents(input)?,
            system_instruction: system_instruction(input),
            tools: convert::tools(tools, config.enable_code_execution),
            tool_config,
            generation_config: Some(generation_config),
            safety_settings: config.safety_settings.clone(),
        })
    }

    fn model<'a>(&'a self, options: &'a ChatOptions) -> &'a str {
        options.model.as_deref().unwrap_or(&self.config.model)
    }
}

#[async_trait::async_trait]
impl<H: HttpInfra> ChatModel for GeminiChatModel<H> {
    async fn generate(&self, input: Vec<Message>, options: ChatOptions) -> anyhow::Result<Message> {
        let request = self.request(&input, &options)?;
        let model = self.model(&options);
        let url = self.url(model, "generateContent")?;
        info!(url = %url, model = %model, content_count = request.contents.len(), "Connecting Upstream");

        let reply: JsonReply<GenerateContentResponse> = self.client.post_json(&url, &request, &[]).await?;
        response_message(reply.body)
    }

    async fn stream(
        &self,
        input: Vec<Message>,
        options: ChatOptions,
    ) -> anyhow::Result<MessageStream> {
        let request = self.request(&input, &options)?;
        let model = self.model(&options);
        // `alt=sse` selects server-sent events instead of a JSON array
        let mut url = self.url(model, "streamGenerateContent")?;
        url.set_query(Some("alt=sse"));
        info!(url = %url, model = %model, content_count = request.contents.len(), stream = true, "Connecting Upstream");

        let source = self.client.post_stream(&url, &request, &[]).await?;
        let stream = json_events::<GenerateContentResponse>(source).filter_map(|chunk| {
            futures::future::ready(chunk.map(candidate_message).transpose())
        });
        Ok(Box::pin(stream))
    }
}

impl<H: HttpInfra> ToolCallingChatModel for GeminiChatModel<H> {
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
    use crate::gemini::extra::tool_call_thought_signature;

    fn model(server: &mockito::Server, config: GeminiConfig) -> GeminiChatModel<BridgeHttpService> {
        GeminiChatModel::connect(
            config
                .api_key("g-key")
                .model("gemini-2.5-flash")
                .base_url(server.url())
                .retry(RetryConfig::disabled()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_generate_sends_generation_config() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .match_header("x-goog-api-key", "g-key")
            .match_body(Matcher::PartialJson(json!({
                "systemInstruction": {"parts": [{"text": "json only"}]},
                "generationConfig": {
                    "temperature": 0.5,
                    "responseMimeType": "application/json",
                    "responseJsonSchema": {"type": "object"},
                    "thinkingConfig": {"includeThoughts": true, "thinkingBudget": 128}
                },
                "tools": [{"codeExecution": {}}]
            })))
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "candidates": [{"content": {"role": "model", "parts": [{"text": "{}"}]}, "finishReason": "STOP"}],
                    "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1, "totalTokenCount": 4}
                })
                .to_string(),
            )
            .create_async()
            .await;
        let config = GeminiConfig::default()
            .temperature(0.5f32)
            .response_schema(json!({"type": "object"}))
            .thinking_config(ThinkingConfig::default().include_thoughts(true).thinking_budget(128))
            .enable_code_execution(true);

        let actual = model(&server, config)
            .generate(vec![Message::system("json only"), Message::user("hi")], ChatOptions::default())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(actual.content, "{}");
        assert_eq!(actual.usage().map(|usage| usage.total_tokens), Some(4));
    }

    #[tokio::test]
    async fn test_stream_thoughts_and_function_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash:streamGenerateContent")
            .match_query(Matcher::UrlEncoded("alt".into(), "sse".into()))
            .match_body(Matcher::PartialJson(json!({
                "toolConfig": {"functionCallingConfig": {"mode": "AUTO"}}
            })))
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"weighing\",\"thought\":true}]}}]}\n\n",
                "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"functionCall\":{\"name\":\"lookup\",\"args\":{\"q\":\"x\"}},\"thoughtSignature\":\"c2ln\"}]},\"finishReason\":\"STOP\"}],",
                "\"usageMetadata\":{\"promptTokenCount\":5,\"candidatesTokenCount\":3,\"totalTokenCount\":8}}\n\n"
            ))
            .create_async()
            .await;
        let model = model(&server, GeminiConfig::default())
            .with_tools(vec![ToolInfo::new("lookup", "")])
            .unwrap();

        let stream = model.stream(vec![Message::user("find x")], ChatOptions::default()).await.unwrap();
        let chunks: Vec<Message> = stream.map(|chunk| chunk.unwrap()).collect().await;
        let actual = Message::concat(&chunks).unwrap();

        mock.assert_async().await;
        assert_eq!(actual.reasoning_content, "weighing");
        assert_eq!(actual.tool_calls.len(), 1);
        assert_eq!(actual.tool_calls[0].function.arguments, r#"{"q":"x"}"#);
        assert_eq!(tool_call_thought_signature(&actual.tool_calls[0]), Some(b"sig".to_vec()));
        assert_eq!(actual.finish_reason(), Some("STOP"));
    }

    #[test]
    fn test_validate_requires_api_key() {
        let mut fixture = GeminiConfig::default().model("gemini-2.5-flash");

        let actual = fixture.validate().unwrap_err();

        assert_eq!(actual.to_string(), "missing credentials: set 'APIKey'");
    }
}
