use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use bridge_domain::{
    Error as DomainError, EventStream, HttpConfig, HttpInfra, RetryConfig, create_headers,
    format_http_context, read_json, retry_with_config,
};
use bridge_infra::BridgeHttpService;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Url;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::retry::into_retry;

/// A decoded JSON reply together with its response headers.
#[derive(Debug)]
pub struct JsonReply<T> {
    pub body: T,
    pub headers: HeaderMap,
}

/// HTTP plumbing shared by every chat model: auth headers, JSON posts, SSE
/// streams and retries.
pub struct ProviderClient<H> {
    http: Arc<H>,
    headers: Vec<(String, String)>,
    retry: Arc<RetryConfig>,
}

impl<H> Clone for ProviderClient<H> {
    fn clone(&self) -> Self {
        Self { http: self.http.clone(), headers: self.headers.clone(), retry: self.retry.clone() }
    }
}

impl ProviderClient<BridgeHttpService> {
    pub fn connect(
        http: &HttpConfig,
        headers: Vec<(String, String)>,
        retry: RetryConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(BridgeHttpService::new(http)?), headers, retry))
    }
}

impl<H: HttpInfra> ProviderClient<H> {
    pub fn new(http: Arc<H>, headers: Vec<(String, String)>, retry: RetryConfig) -> Self {
        Self { http, headers, retry: Arc::new(retry) }
    }

    fn header_map(&self, extra: &[(String, String)]) -> anyhow::Result<HeaderMap> {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        headers.extend(self.headers.iter().cloned());
        headers.extend(extra.iter().cloned());
        create_headers(headers)
    }

    /// Posts `body` as JSON and decodes the reply, retrying transient
    /// failures.
    pub async fn post_json<Req, Res>(
        &self,
        url: &Url,
        body: &Req,
        extra_headers: &[(String, String)],
    ) -> anyhow::Result<JsonReply<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let body: Bytes = serde_json::to_vec(body)
            .with_context(|| "Failed to serialize request")?
            .into();
        let headers = self.header_map(extra_headers)?;

        retry_with_config(
            &self.retry,
            || {
                let headers = headers.clone();
                let body = body.clone();
                async move {
                    self.send_json(url, headers, body)
                        .await
                        .map_err(|error| into_retry(error, &self.retry))
                }
            },
            Some(notify_retry),
        )
        .await
    }

    async fn send_json<Res: DeserializeOwned>(
        &self,
        url: &Url,
        headers: HeaderMap,
        body: Bytes,
    ) -> anyhow::Result<JsonReply<Res>> {
        let response = self
            .http
            .http_post(url, Some(headers), body)
            .await
            .with_context(|| format_http_context(None, "POST", url))?;
        let headers = response.headers().clone();
        let body = read_json(response, "POST", url).await?;
        Ok(JsonReply { body, headers })
    }

    /// Opens a server-sent event stream for `body`. A connection that fails
    /// before the first event is retried like a plain post.
    pub async fn post_stream<Req>(
        &self,
        url: &Url,
        body: &Req,
        extra_headers: &[(String, String)],
    ) -> anyhow::Result<EventStream>
    where
        Req: Serialize + ?Sized,
    {
        let body: Bytes = serde_json::to_vec(body)
            .with_context(|| "Failed to serialize request")?
            .into();
        let headers = self.header_map(extra_headers)?;

        retry_with_config(
            &self.retry,
            || {
                let headers = headers.clone();
                let body = body.clone();
                async move {
                    self.open_stream(url, headers, body)
                        .await
                        .map_err(|error| into_retry(error, &self.retry))
                }
            },
            Some(notify_retry),
        )
        .await
    }

    async fn open_stream(
        &self,
        url: &Url,
        headers: HeaderMap,
        body: Bytes,
    ) -> anyhow::Result<EventStream> {
        let mut source = self
            .http
            .http_eventsource(url, Some(headers), body)
            .await
            .with_context(|| format_http_context(None, "POST", url))?;

        // The outcome of the connection arrives as the first item.
        let first = match source.next().await {
            Some(Ok(event)) => event,
            Some(Err(error)) => {
                return Err(status_error(error).await)
                    .with_context(|| format_http_context(None, "POST", url));
            }
            None => return Ok(Box::pin(futures::stream::empty())),
        };

        let url = url.clone();
        let rest = source
            .scan(false, |failed, item| {
                let next = if *failed { None } else { Some(item) };
                *failed = matches!(next, Some(Err(_)));
                futures::future::ready(next)
            })
            .then(move |item| {
                let url = url.clone();
                async move {
                    match item {
                        Ok(event) => Ok(event),
                        Err(error) => Err(status_error(error)
                            .await
                            .context(format_http_context(None, "POST", &url))),
                    }
                }
            });

        Ok(Box::pin(futures::stream::once(async { Ok(first) }).chain(rest)))
    }
}

fn notify_retry(error: &anyhow::Error, delay: Duration) {
    warn!(error = %error, delay_ms = delay.as_millis() as u64, "Retrying request");
}

/// Turns an unexpected SSE status into [`DomainError::HttpStatus`] carrying
/// the response body.
async fn status_error(error: anyhow::Error) -> anyhow::Error {
    match error.downcast::<reqwest_eventsource::Error>() {
        Ok(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
            let body = response.text().await.unwrap_or_default();
            DomainError::HttpStatus { status: status.as_u16(), body }.into()
        }
        Ok(other) => other.into(),
        Err(error) => error,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    use super::*;

    fn client(headers: Vec<(String, String)>) -> ProviderClient<BridgeHttpService> {
        let retry = RetryConfig::default().min_delay_ms(1u64).max_retry_attempts(2usize);
        ProviderClient::connect(&HttpConfig::default(), headers, retry).unwrap()
    }

    fn url(server: &mockito::Server, path: &str) -> Url {
        Url::parse(&format!("{}{path}", server.url())).unwrap()
    }

    #[tokio::test]
    async fn test_post_json_sends_headers_and_decodes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat")
            .match_header("authorization", "Bearer key")
            .match_header("x-trace", "1")
            .match_body(mockito::Matcher::Json(json!({"q": 1})))
            .with_header("x-request-id", "req-1")
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let actual: JsonReply<Value> = client(vec![("Authorization".into(), "Bearer key".into())])
            .post_json(&url(&server, "/chat"), &json!({"q": 1}), &[("x-trace".into(), "1".into())])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(actual.body, json!({"ok": true}));
        assert_eq!(actual.headers.get("x-request-id").unwrap(), "req-1");
    }

    #[tokio::test]
    async fn test_post_json_retries_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat")
            .with_status(503)
            .with_body("busy")
            .expect(3)
            .create_async()
            .await;

        let actual = client(vec![])
            .post_json::<_, Value>(&url(&server, "/chat"), &json!({}), &[])
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(format!("{actual:#}").contains("HTTP 503: busy"));
    }

    #[tokio::test]
    async fn test_post_json_does_not_retry_client_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat")
            .with_status(400)
            .with_body("bad")
            .expect(1)
            .create_async()
            .await;

        let actual = client(vec![])
            .post_json::<_, Value>(&url(&server, "/chat"), &json!({}), &[])
            .await
            .unwrap_err();

        mock.assert_async().await;
        let status = actual.downcast_ref::<DomainError>().and_then(DomainError::status);
        assert_eq!(status, Some(400));
    }

    #[tokio::test]
    async fn test_post_stream_yields_events() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/stream")
            .with_header("content-type", "text/event-stream")
            .with_body("data: one\n\ndata: two\n\n")
            .create_async()
            .await;

        let stream = client(vec![]).post_stream(&url(&server, "/stream"), &json!({}), &[]).await.unwrap();
        let actual: Vec<String> = stream.map(|event| event.unwrap().data).collect().await;

        assert_eq!(actual, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_post_stream_reports_status_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/stream")
            .with_status(401)
            .with_body("invalid key")
            .expect(1)
            .create_async()
            .await;

        let actual = client(vec![])
            .post_stream(&url(&server, "/stream"), &json!({}), &[])
            .await
            .err()
            .unwrap();

        mock.assert_async().await;
        assert!(format!("{actual:#}").contains("HTTP 401: invalid key"));
    }
}
