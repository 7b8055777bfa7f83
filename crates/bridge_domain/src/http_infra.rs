use std::pin::Pin;

use anyhow::Context as _;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio_stream::Stream;

use crate::Error;

pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<ServerSentEvent>> + Send>>;

/// HTTP transport used by every adapter.
#[async_trait::async_trait]
pub trait HttpInfra: Send + Sync + 'static {
    async fn http_get(&self, url: &Url, headers: Option<HeaderMap>) -> anyhow::Result<Response>;

    async fn http_head(&self, url: &Url, headers: Option<HeaderMap>) -> anyhow::Result<Response>;

    async fn http_post(
        &self,
        url: &Url,
        headers: Option<HeaderMap>,
        body: Bytes,
    ) -> anyhow::Result<Response>;

    async fn http_put(
        &self,
        url: &Url,
        headers: Option<HeaderMap>,
        body: Bytes,
    ) -> anyhow::Result<Response>;

    /// Posts `body` and returns the server-sent events of the reply.
    async fn http_eventsource(
        &self,
        url: &Url,
        headers: Option<HeaderMap>,
        body: Bytes,
    ) -> anyhow::Result<EventStream>;
}

/// Represents a server-sent event
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSentEvent {
    pub event_type: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

pub fn create_headers(headers: Vec<(String, String)>) -> anyhow::Result<HeaderMap> {
    let mut header_map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .with_context(|| format!("Invalid header name: {key}"))?;
        let value = HeaderValue::from_str(&value)
            .with_context(|| format!("Invalid value for header {key}"))?;
        header_map.insert(name, value);
    }
    Ok(header_map)
}

pub fn format_http_context(status: Option<StatusCode>, method: &str, url: &Url) -> String {
    match status {
        Some(status) => format!("{method} {url} [{status}]"),
        None => format!("{method} {url}"),
    }
}

/// Joins `path` onto `base`, keeping any path prefix `base` already has.
pub fn join_url(base: &str, path: &str) -> anyhow::Result<Url> {
    let full = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&full).with_context(|| format!("Failed to parse URL: {full}"))
}

/// Reads a JSON body, turning a non success status into `Error::HttpStatus`.
pub async fn read_json<T: DeserializeOwned>(
    response: Response,
    method: &str,
    url: &Url,
) -> anyhow::Result<T> {
    let status = response.status();
    let ctx_msg = format_http_context(Some(status), method, url);
    let text = response
        .text()
        .await
        .with_context(|| ctx_msg.clone())
        .with_context(|| "Failed to decode response into text")?;

    if !status.is_success() {
        return Err(Error::HttpStatus { status: status.as_u16(), body: text })
            .with_context(|| ctx_msg);
    }

    serde_json::from_str(&text)
        .with_context(|| ctx_msg)
        .with_context(|| "Failed to deserialize response")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_join_url_keeps_base_path() {
        let actual = join_url("https://api.example.com/api/v3/", "/chat/completions").unwrap();
        assert_eq!(actual.as_str(), "https://api.example.com/api/v3/chat/completions");
    }

    #[test]
    fn test_create_headers_rejects_invalid_name() {
        let actual = create_headers(vec![("bad header".to_string(), "v".to_string())]);
        assert!(actual.is_err());
    }

    #[test]
    fn test_format_http_context() {
        let url = Url::parse("https://example.com/x").unwrap();
        let actual = format_http_context(Some(StatusCode::NOT_FOUND), "POST", &url);
        assert_eq!(actual, "POST https://example.com/x [404 Not Found]");
    }
}
