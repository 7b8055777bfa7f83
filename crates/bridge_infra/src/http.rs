use std::time::Duration;

use anyhow::Context as _;
use bridge_domain::{EventStream, HttpConfig, HttpInfra, ServerSentEvent};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder, Response, Url};
use reqwest_eventsource::{Event, RequestBuilderExt};
use tokio_stream::StreamExt;
use tracing::debug;

const USER_AGENT: &str = concat!("bridge/", env!("CARGO_PKG_VERSION"));

const SENSITIVE_HEADERS: [&str; 4] = ["authorization", "api-key", "x-api-key", "x-goog-api-key"];

/// reqwest backed [`HttpInfra`].
#[derive(Clone)]
pub struct BridgeHttpService {
    client: Client,
}

impl BridgeHttpService {
    pub fn new(config: &HttpConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .read_timeout(Duration::from_secs(config.read_timeout))
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .redirect(Policy::limited(config.max_redirects))
            .user_agent(USER_AGENT)
            .build()
            .with_context(|| "Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Wraps a client built elsewhere, e.g. one with a custom TLS setup.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn headers(&self, headers: Option<HeaderMap>) -> HeaderMap {
        let mut headers = headers.unwrap_or_default();
        headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        debug!(headers = ?sanitize_headers(&headers), "Request Headers");
        headers
    }

    async fn send(&self, request: RequestBuilder) -> anyhow::Result<Response> {
        Ok(request.send().await?)
    }

    async fn post_stream(
        &self,
        url: &Url,
        headers: Option<HeaderMap>,
        body: Bytes,
    ) -> anyhow::Result<EventStream> {
        let mut request_headers = self.headers(headers);
        request_headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        let es = self
            .client
            .post(url.clone())
            .headers(request_headers)
            .body(body)
            .eventsource()?;

        let stream = es
            .take_while(|message| !matches!(message, Err(reqwest_eventsource::Error::StreamEnded)))
            .filter_map(|event| match event {
                Ok(Event::Open) => None,
                Ok(Event::Message(msg)) => Some(Ok(ServerSentEvent {
                    event_type: Some(msg.event).filter(|event| event != "message"),
                    data: msg.data,
                    id: Some(msg.id).filter(|id| !id.is_empty()),
                })),
                Err(err) => Some(Err(err.into())),
            });

        Ok(Box::pin(stream))
    }
}

/// Copies `headers`, replacing credentials with a placeholder.
pub fn sanitize_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .map(|(name, value)| {
            let name_str = name.as_str().to_lowercase();
            let value = if SENSITIVE_HEADERS.contains(&name_str.as_str()) {
                HeaderValue::from_static("[REDACTED]")
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}

#[async_trait::async_trait]
impl HttpInfra for BridgeHttpService {
    async fn http_get(&self, url: &Url, headers: Option<HeaderMap>) -> anyhow::Result<Response> {
        self.send(self.client.get(url.clone()).headers(self.headers(headers)))
            .await
    }

    async fn http_head(&self, url: &Url, headers: Option<HeaderMap>) -> anyhow::Result<Response> {
        self.send(self.client.head(url.clone()).headers(self.headers(headers)))
            .await
    }

    async fn http_post(
        &self,
        url: &Url,
        headers: Option<HeaderMap>,
        body: Bytes,
    ) -> anyhow::Result<Response> {
        self.send(
            self.client
                .post(url.clone())
                .headers(self.headers(headers))
                .body(body),
        )
        .await
    }

    async fn http_put(
        &self,
        url: &Url,
        headers: Option<HeaderMap>,
        body: Bytes,
    ) -> anyhow::Result<Response> {
        self.send(
            self.client
                .put(url.clone())
                .headers(self.headers(headers))
                .body(body),
        )
        .await
    }

    async fn http_eventsource(
        &self,
        url: &Url,
        headers: Option<HeaderMap>,
        body: Bytes,
    ) -> anyhow::Result<EventStream> {
        self.post_stream(url, headers, body).await
    }
}
