use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context as _;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bridge_domain::{HttpConfig, HttpInfra, create_headers, format_http_context, join_url, read_json};
use bridge_infra::BridgeHttpService;
use bytes::Bytes;
use derive_setters::Setters;
use reqwest::Response;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::Error;
use crate::request::{SearchRequest, SearchResponse};

/// Connection settings for an Elasticsearch cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct ClientConfig {
    /// Node addresses, tried in order until one answers.
    pub addresses: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Base64 encoded API key. Wins over basic auth when both are set.
    pub api_key: Option<String>,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addresses: vec!["http://localhost:9200".to_string()],
            username: None,
            password: None,
            api_key: None,
            http: HttpConfig::default(),
        }
    }
}

impl ClientConfig {
    fn authorization(&self) -> Option<String> {
        if let Some(api_key) = &self.api_key {
            return Some(format!("ApiKey {api_key}"));
        }
        let username = self.username.as_ref()?;
        let password = self.password.as_deref().unwrap_or_default();
        Some(format!("Basic {}", STANDARD.encode(format!("{username}:{password}"))))
    }
}

/// One `index` action of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOperation {
    pub index: String,
    pub id: String,
    pub source: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<BTreeMap<String, BulkItem>>,
}

impl BulkResponse {
    /// First item the cluster rejected, if any.
    pub fn first_failure(&self) -> Option<Error> {
        self.items.iter().flat_map(|item| item.values()).find_map(|item| {
            item.error.as_ref().map(|error| Error::BulkItem {
                id: item.id.clone(),
                status: item.status,
                reason: error.reason.clone().unwrap_or_else(|| error.error_type.clone()),
            })
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BulkItem {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub error: Option<BulkItemError>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BulkItemError {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, strum_macros::Display)]
#[strum(serialize_all = "UPPERCASE")]
enum Verb {
    Head,
    Post,
    Put,
}

/// Elasticsearch REST client.
pub struct ElasticClient<H> {
    http: Arc<H>,
    config: Arc<ClientConfig>,
}

impl<H> Clone for ElasticClient<H> {
    fn clone(&self) -> Self {
        Self { http: self.http.clone(), config: self.config.clone() }
    }
}

impl ElasticClient<BridgeHttpService> {
    pub fn connect(config: ClientConfig) -> anyhow::Result<Self> {
        let http = BridgeHttpService::new(&config.http)?;
        Ok(Self::new(Arc::new(http), config))
    }
}

impl<H: HttpInfra> ElasticClient<H> {
    pub fn new(http: Arc<H>, config: ClientConfig) -> Self {
        Self { http, config: Arc::new(config) }
    }

    fn headers(&self, content_type: &str) -> anyhow::Result<HeaderMap> {
        let mut headers = vec![(CONTENT_TYPE.to_string(), content_type.to_string())];
        if let Some(authorization) = self.config.authorization() {
            headers.push((AUTHORIZATION.to_string(), authorization));
        }
        create_headers(headers)
    }

    /// Sends to the first node that accepts the connection. HTTP error
    /// statuses are returned as is and do not move on to the next node.
    async fn execute(
        &self,
        verb: Verb,
        path: &str,
        content_type: &str,
        body: Bytes,
    ) -> anyhow::Result<(Response, reqwest::Url)> {
        let headers = self.headers(content_type)?;
        let mut last_error = None;

        for address in &self.config.addresses {
            let url = join_url(address, path)?;
            debug!(url = %url, method = %verb, "Calling Elasticsearch");
            let result = match verb {
                Verb::Head => self.http.http_head(&url, Some(headers.clone())).await,
                Verb::Post => self.http.http_post(&url, Some(headers.clone()), body.clone()).await,
                Verb::Put => self.http.http_put(&url, Some(headers.clone()), body.clone()).await,
            };
            match result {
                Ok(response) => return Ok((response, url)),
                Err(error) => {
                    warn!(url = %url, error = %error, "Elasticsearch node unreachable");
                    let context = format_http_context(None, &verb.to_string(), &url);
                    last_error = Some(error.context(context));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::NoAddress.into()))
    }

    pub async fn search(
        &self,
        index: &str,
        request: &SearchRequest,
    ) -> anyhow::Result<SearchResponse> {
        let body = serde_json::to_vec(request).with_context(|| "Failed to serialize search request")?;
        let (response, url) = self
            .execute(Verb::Post, &format!("{index}/_search"), "application/json", body.into())
            .await?;
        read_json(response, "POST", &url).await
    }

    /// Sends `operations` as one NDJSON `_bulk` request.
    pub async fn bulk(&self, operations: &[BulkOperation]) -> anyhow::Result<BulkResponse> {
        let mut body = Vec::new();
        for operation in operations {
            let action = json!({"index": {"_index": operation.index, "_id": operation.id}});
            serde_json::to_writer(&mut body, &action)?;
            body.push(b'\n');
            serde_json::to_writer(&mut body, &operation.source)
                .with_context(|| format!("Failed to serialize document {}", operation.id))?;
            body.push(b'\n');
        }

        let (response, url) = self
            .execute(Verb::Post, "_bulk", "application/x-ndjson", body.into())
            .await?;
        read_json(response, "POST", &url).await
    }

    pub async fn index_exists(&self, index: &str) -> anyhow::Result<bool> {
        let (response, url) = self
            .execute(Verb::Head, index, "application/json", Bytes::new())
            .await?;
        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(bridge_domain::Error::HttpStatus { status, body: String::new() })
                .with_context(|| format_http_context(Some(response.status()), "HEAD", &url)),
        }
    }

    /// Creates `index` with the given settings and mappings body.
    pub async fn create_index(&self, index: &str, body: &Value) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(body).with_context(|| "Failed to serialize index body")?;
        let (response, url) = self
            .execute(Verb::Put, index, "application/json", bytes.into())
            .await?;
        let _: Value = read_json(response, "PUT", &url).await?;
        Ok(())
    }
}
