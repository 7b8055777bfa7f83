//! Chat-completions wire format shared by DeepSeek, Qwen, Qianfan and the
//! Ark chat endpoint.

mod convert;
mod request;
mod response;

use std::sync::Arc;

use bridge_domain::{HttpInfra, Message, MessageStream, join_url};
pub use convert::*;
use futures::StreamExt;
use reqwest::Url;
use reqwest::header::HeaderMap;
pub use request::*;
pub use response::*;
use tracing::info;

use crate::client::{JsonReply, ProviderClient};
use crate::event::json_events;

/// Copies reply level fields such as the model name onto a converted
/// message or stream chunk.
pub type Decorator = Arc<dyn Fn(&ChatResponse, &mut Message) + Send + Sync>;

/// A `chat/completions` endpoint.
pub struct Completions<H> {
    client: ProviderClient<H>,
    url: Url,
    provider: &'static str,
    decorator: Option<Decorator>,
}

impl<H> Clone for Completions<H> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            url: self.url.clone(),
            provider: self.provider,
            decorator: self.decorator.clone(),
        }
    }
}

impl<H: HttpInfra> Completions<H> {
    pub fn new(client: ProviderClient<H>, base_url: &str, provider: &'static str) -> anyhow::Result<Self> {
        Ok(Self { client, url: join_url(base_url, "chat/completions")?, provider, decorator: None })
    }

    pub fn decorator(mut self, decorator: Decorator) -> Self {
        self.decorator = Some(decorator);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Sends `request` and returns choice 0 with the reply headers.
    pub async fn generate(
        &self,
        request: &ChatRequest,
        headers: &[(String, String)],
    ) -> anyhow::Result<(Message, HeaderMap)> {
        info!(
            url = %self.url,
            model = %request.model,
            message_count = request.messages.len(),
            provider = self.provider,
            "Connecting Upstream"
        );
        let reply: JsonReply<ChatResponse> = self.client.post_json(&self.url, request, headers).await?;
        let head = self.decorator.as_ref().map(|_| reply.body.clone());
        let mut message = response_message(self.provider, reply.body)?;
        if let (Some(decorate), Some(head)) = (&self.decorator, head) {
            decorate(&head, &mut message);
        }
        Ok((message, reply.headers))
    }

    /// Streams `request`, asking the server to report usage in the last
    /// chunk.
    pub async fn stream(
        &self,
        mut request: ChatRequest,
        headers: &[(String, String)],
    ) -> anyhow::Result<MessageStream> {
        request.stream = Some(true);
        request.stream_options = Some(StreamOptions { include_usage: true });
        info!(
            url = %self.url,
            model = %request.model,
            message_count = request.messages.len(),
            provider = self.provider,
            stream = true,
            "Connecting Upstream"
        );

        let source = self.client.post_stream(&self.url, &request, headers).await?;
        let provider = self.provider;
        let decorator = self.decorator.clone();
        let stream = json_events::<ChatResponse>(source).filter_map(move |chunk| {
            let resolved = chunk.and_then(|chunk| {
                let head = decorator.as_ref().map(|_| chunk.clone());
                let (message, _) = resolve_stream_chunk(provider, chunk)?;
                Ok(message.map(|mut message| {
                    if let (Some(decorate), Some(head)) = (&decorator, &head) {
                        decorate(head, &mut message);
                    }
                    message
                }))
            });
            futures::future::ready(resolved.transpose())
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use bridge_domain::{HttpConfig, RetryConfig};
    use bridge_infra::BridgeHttpService;
    use pretty_assertions::assert_eq;

    use super::*;

    fn completions(server: &mockito::Server) -> Completions<BridgeHttpService> {
        let client =
            ProviderClient::connect(&HttpConfig::default(), vec![], RetryConfig::disabled()).unwrap();
        Completions::new(client, &server.url(), "test").unwrap()
    }

    #[tokio::test]
    async fn test_stream_sets_stream_options_and_concats() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "stream": true,
                "stream_options": {"include_usage": true}
            })))
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
                "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2,\"total_tokens\":5}}\n\n",
                "data: [DONE]\n\n"
            ))
            .create_async()
            .await;

        let stream = completions(&server)
            .stream(ChatRequest::default().model("m"), &[])
            .await
            .unwrap();
        let chunks: Vec<Message> = stream.map(|chunk| chunk.unwrap()).collect().await;
        let actual = Message::concat(&chunks).unwrap();

        mock.assert_async().await;
        assert_eq!(actual.content, "Hello");
        assert_eq!(actual.finish_reason(), Some("stop"));
        assert_eq!(actual.usage().map(|usage| usage.total_tokens), Some(5));
    }
}
