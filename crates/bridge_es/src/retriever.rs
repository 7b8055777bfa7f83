use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context as _;
use bridge_domain::{Document, Embedder, HttpInfra, Retriever, RetrieverOptions};
use bridge_infra::BridgeHttpService;
use derive_setters::Setters;
use serde_json::Value;
use tracing::debug;

use crate::client::{ClientConfig, ElasticClient};
use crate::error::Error;
use crate::request::{Hit, Query};
use crate::search_mode::SearchMode;

const DEFAULT_TOP_K: usize = 10;

/// Turns one search hit into a document.
pub type ResultParser = Arc<dyn Fn(&Hit) -> anyhow::Result<Document> + Send + Sync>;

/// Per call options read from [`RetrieverOptions`] extensions.
#[derive(Debug, Clone, Default, PartialEq, Setters)]
#[setters(strip_option, into)]
pub struct SearchOptions {
    /// Clauses every hit must satisfy. How they are applied depends on the
    /// search mode.
    pub filters: Vec<Query>,
    /// Token to weight query for sparse vector search.
    pub sparse_vector: Option<BTreeMap<String, f32>>,
}

impl SearchOptions {
    pub(crate) fn from_options(options: &RetrieverOptions) -> Self {
        options.extension::<SearchOptions>().cloned().unwrap_or_default()
    }
}

#[derive(derive_more::Debug, Clone, Default, Setters)]
#[setters(strip_option, into)]
pub struct RetrieverConfig {
    pub index: String,
    /// Zero falls back to 10.
    pub top_k: usize,
    /// Sent as `min_score`.
    pub score_threshold: Option<f64>,
    #[debug(skip)]
    pub search_mode: Option<Arc<dyn SearchMode>>,
    #[debug(skip)]
    pub result_parser: Option<ResultParser>,
    #[debug(skip)]
    pub embedding: Option<Arc<dyn Embedder>>,
}

impl RetrieverConfig {
    pub fn validate(&mut self) -> anyhow::Result<()> {
        if self.index.is_empty() {
            anyhow::bail!("[NewRetriever] index not provided");
        }
        if self.search_mode.is_none() {
            anyhow::bail!("[NewRetriever] search mode not provided");
        }
        if self.top_k == 0 {
            self.top_k = DEFAULT_TOP_K;
        }
        Ok(())
    }

    /// The call's embedder, or the configured one.
    pub fn embedder<'a>(&'a self, options: &'a RetrieverOptions) -> Option<&'a Arc<dyn Embedder>> {
        options.embedder.as_ref().or(self.embedding.as_ref())
    }

    fn parse(&self, hit: &Hit) -> anyhow::Result<Document> {
        match &self.result_parser {
            Some(parser) => parser(hit),
            None => default_result_parser(hit),
        }
    }
}

/// `_id` becomes the id, `_source.content` the content and `_score` the
/// score. Every other source field lands in the metadata.
pub fn default_result_parser(hit: &Hit) -> anyhow::Result<Document> {
    let id = hit.id.clone().ok_or(Error::MissingHitField { field: "_id" })?;
    let source = match &hit.source {
        Some(Value::Object(source)) => source,
        Some(other) => anyhow::bail!("_source of document {id} is not an object: {other}"),
        None => return Err(Error::MissingHitField { field: "_source" }.into()),
    };

    let mut doc = Document::new(id, "");
    for (key, value) in source {
        match (key.as_str(), value) {
            ("content", Value::String(content)) => doc.content = content.clone(),
            ("content", _) => {
                anyhow::bail!("field 'content' is not a string in document {}", doc.id)
            }
            _ => {
                doc.metadata.insert(key.clone(), value.clone());
            }
        }
    }
    doc.score = hit.score;
    Ok(doc)
}

/// [`Retriever`] over an Elasticsearch index.
pub struct EsRetriever<H> {
    client: ElasticClient<H>,
    config: RetrieverConfig,
    search_mode: Arc<dyn SearchMode>,
}

impl EsRetriever<BridgeHttpService> {
    pub fn connect(client: ClientConfig, config: RetrieverConfig) -> anyhow::Result<Self> {
        Self::new(ElasticClient::connect(client)?, config)
    }
}

impl<H: HttpInfra> EsRetriever<H> {
    pub fn new(client: ElasticClient<H>, mut config: RetrieverConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let search_mode = config
            .search_mode
            .clone()
            .ok_or_else(|| anyhow::anyhow!("[NewRetriever] search mode not provided"))?;
        Ok(Self { client, config, search_mode })
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl<H: HttpInfra> Retriever for EsRetriever<H> {
    async fn retrieve(
        &self,
        query: &str,
        options: RetrieverOptions,
    ) -> anyhow::Result<Vec<Document>> {
        let mut request = self
            .search_mode
            .build_request(&self.config, query, &options)
            .await
            .with_context(|| "[Retriever] failed to build search request")?;
        // Per call options win over the body, the body over the config.
        request.size = options.top_k.or(request.size).or(Some(self.config.top_k));
        request.min_score = options
            .score_threshold
            .or(request.min_score)
            .or(self.config.score_threshold);

        let index = options.index.as_deref().unwrap_or(&self.config.index);
        let response = self.client.search(index, &request).await?;
        debug!(index, hits = response.hits.hits.len(), "Search completed");

        response
            .hits
            .hits
            .iter()
            .map(|hit| self.config.parse(hit))
            .collect::<anyhow::Result<Vec<_>>>()
            .with_context(|| "[Retriever] failed to parse search hits")
    }
}
