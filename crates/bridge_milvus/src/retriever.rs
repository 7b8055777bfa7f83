use std::sync::Arc;

use anyhow::Context as _;
use bridge_domain::{Document, Embedder, Retriever, RetrieverOptions};
use derive_setters::Setters;
use serde_json::Value;
use tracing::debug;

use crate::client::MilvusClient;
use crate::entity::{Grouping, LoadState, ResultSet};
use crate::error::Error;
use crate::rest::{ClientConfig, RestClient};
use crate::search_mode::SearchMode;
use crate::types::*;

/// Per call options read from [`RetrieverOptions`] extensions.
#[derive(Debug, Clone, Default, PartialEq, Setters)]
#[setters(strip_option, into)]
pub struct SearchOptions {
    /// Boolean filter expression, e.g. `year > 2000`.
    pub filter: Option<String>,
    pub grouping: Option<Grouping>,
}

impl SearchOptions {
    pub(crate) fn from_options(options: &RetrieverOptions) -> Self {
        options.extension::<SearchOptions>().cloned().unwrap_or_default()
    }

    pub(crate) fn filter_expr(&self) -> Option<&str> {
        self.filter.as_deref().filter(|filter| !filter.is_empty())
    }
}

/// Maps one search result set to documents.
pub trait ResultConverter: Send + Sync {
    fn convert(&self, result: &ResultSet) -> anyhow::Result<Vec<Document>>;
}

/// One document per row: `id` and `content` fill the document, the JSON
/// `metadata` column is merged into its metadata, and every other field is
/// stored in the metadata under its own name.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResultConverter;

impl ResultConverter for DefaultResultConverter {
    fn convert(&self, result: &ResultSet) -> anyhow::Result<Vec<Document>> {
        let mut docs = Vec::with_capacity(result.result_count);
        for row in 0..result.result_count {
            let mut doc = Document::default();
            if let Some(score) = result.scores.get(row) {
                doc.score = Some(f64::from(*score));
            }

            for field in &result.fields {
                let Some(value) = field.get(row) else {
                    continue;
                };
                match field.name.as_str() {
                    DEFAULT_ID_FIELD => doc.id = value_as_string(value),
                    DEFAULT_CONTENT_FIELD => doc.content = value_as_string(value),
                    DEFAULT_METADATA_FIELD => merge_metadata(&mut doc, value),
                    name => {
                        doc.metadata.insert(name.to_string(), value.clone());
                    }
                }
            }
            docs.push(doc);
        }
        Ok(docs)
    }
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}

/// Metadata arrives either as a JSON object or as a string holding one.
/// Anything else is ignored.
fn merge_metadata(doc: &mut Document, value: &Value) {
    let object = match value {
        Value::Object(object) => object.clone(),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(object)) => object,
            _ => return,
        },
        _ => return,
    };
    doc.metadata.extend(object);
}

#[derive(derive_more::Debug, Clone, Setters)]
#[setters(strip_option, into)]
pub struct RetrieverConfig {
    #[debug(skip)]
    pub client: Option<Arc<dyn MilvusClient>>,
    pub client_config: Option<ClientConfig>,
    pub collection: String,
    pub partitions: Vec<String>,
    pub vector_field: String,
    pub sparse_vector_field: String,
    pub output_fields: Vec<String>,
    pub top_k: usize,
    pub consistency_level: ConsistencyLevel,
    #[debug(skip)]
    pub search_mode: Option<Arc<dyn SearchMode>>,
    #[debug(skip)]
    pub document_converter: Option<Arc<dyn ResultConverter>>,
    #[debug(skip)]
    pub embedding: Option<Arc<dyn Embedder>>,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            client: None,
            client_config: None,
            collection: DEFAULT_COLLECTION.to_string(),
            partitions: Vec::new(),
            vector_field: DEFAULT_VECTOR_FIELD.to_string(),
            sparse_vector_field: DEFAULT_SPARSE_VECTOR_FIELD.to_string(),
            output_fields: vec!["*".to_string()],
            top_k: DEFAULT_TOP_K,
            consistency_level: ConsistencyLevel::Default,
            search_mode: None,
            document_converter: None,
            embedding: None,
        }
    }
}

impl RetrieverConfig {
    fn validate(&mut self) -> anyhow::Result<()> {
        if self.client.is_none() && self.client_config.is_none() {
            anyhow::bail!("[NewRetriever] milvus client or client config not provided");
        }
        if self.search_mode.is_none() {
            anyhow::bail!("[NewRetriever] search mode not provided");
        }
        if self.collection.is_empty() {
            self.collection = DEFAULT_COLLECTION.to_string();
        }
        if self.vector_field.is_empty() {
            self.vector_field = DEFAULT_VECTOR_FIELD.to_string();
        }
        if self.sparse_vector_field.is_empty() {
            self.sparse_vector_field = DEFAULT_SPARSE_VECTOR_FIELD.to_string();
        }
        if self.output_fields.is_empty() {
            self.output_fields = vec!["*".to_string()];
        }
        if self.top_k == 0 {
            self.top_k = DEFAULT_TOP_K;
        }
        if self.document_converter.is_none() {
            self.document_converter = Some(Arc::new(DefaultResultConverter));
        }
        Ok(())
    }

    /// Embedder passed with the call, else the configured one.
    pub(crate) fn embedder<'a>(
        &'a self,
        options: &'a RetrieverOptions,
    ) -> Option<&'a Arc<dyn Embedder>> {
        options.embedder.as_ref().or(self.embedding.as_ref())
    }

    /// The call's top-k, else the configured one.
    pub(crate) fn limit_for(&self, options: &RetrieverOptions) -> usize {
        options.top_k.unwrap_or(self.top_k)
    }

    pub(crate) fn convert(&self, result: &ResultSet) -> anyhow::Result<Vec<Document>> {
        match &self.document_converter {
            Some(converter) => converter.convert(result),
            None => DefaultResultConverter.convert(result),
        }
    }
}

/// Retrieves documents from a Milvus collection with a pluggable
/// [`SearchMode`].
#[derive(derive_more::Debug)]
pub struct MilvusRetriever {
    #[debug(skip)]
    client: Arc<dyn MilvusClient>,
    #[debug(skip)]
    search_mode: Arc<dyn SearchMode>,
    config: RetrieverConfig,
}

impl MilvusRetriever {
    pub async fn new(mut config: RetrieverConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let client = match (&config.client, &config.client_config) {
            (Some(client), _) => client.clone(),
            (None, Some(client_config)) => {
                let client = RestClient::connect(client_config.clone())
                    .with_context(|| "[NewRetriever] failed to create milvus client")?;
                Arc::new(client) as Arc<dyn MilvusClient>
            }
            (None, None) => {
                anyhow::bail!("[NewRetriever] milvus client or client config not provided")
            }
        };
        let search_mode = config
            .search_mode
            .clone()
            .ok_or_else(|| anyhow::anyhow!("[NewRetriever] search mode not provided"))?;

        let collection = &config.collection;
        let exists = client
            .has_collection(collection)
            .await
            .with_context(|| "[NewRetriever] failed to check collection")?;
        if !exists {
            return Err(Error::CollectionNotFound(collection.clone()).into());
        }

        let state = client
            .get_load_state(collection)
            .await
            .with_context(|| "[NewRetriever] failed to get load state")?;
        if state != LoadState::Loaded {
            client
                .load_collection(collection)
                .await
                .with_context(|| "[NewRetriever] failed to load collection")?;
            debug!(collection = %collection, "Loaded Milvus collection");
        }

        Ok(Self { client, search_mode, config })
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl Retriever for MilvusRetriever {
    async fn retrieve(
        &self,
        query: &str,
        options: RetrieverOptions,
    ) -> anyhow::Result<Vec<Document>> {
        let docs = self
            .search_mode
            .retrieve(self.client.as_ref(), &self.config, query, &options)
            .await?;
        debug!(collection = %self.config.collection, count = docs.len(), "Retrieved documents");
        Ok(docs)
    }
}
