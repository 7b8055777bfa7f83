use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context as _;
use bridge_domain::{Document, Embedder, Indexer, IndexerOptions};
use derive_setters::Setters;
use tracing::{debug, info};

use crate::client::MilvusClient;
use crate::entity::{
    Column, CreateCollectionRequest, CreateIndexRequest, Field, FieldType, Function, LoadState,
    Schema, SparseEmbedding, UpsertRequest,
};
use crate::error::Error;
use crate::index_builder::{
    AutoIndexBuilder, IndexBuilder, SparseIndexBuilder, SparseInvertedIndexBuilder,
};
use crate::rest::{ClientConfig, RestClient};
use crate::types::*;

/// Dense vector field settings.
#[derive(derive_more::Debug, Clone, Setters)]
#[setters(strip_option, into)]
pub struct VectorConfig {
    /// Required when the collection has to be created.
    pub dimension: i64,
    pub metric_type: MetricType,
    #[debug(skip)]
    pub index_builder: Option<Arc<dyn IndexBuilder>>,
    pub vector_field: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dimension: 0,
            metric_type: MetricType::L2,
            index_builder: None,
            vector_field: DEFAULT_VECTOR_FIELD.to_string(),
        }
    }
}

/// Sparse vector field settings.
#[derive(derive_more::Debug, Clone, Setters)]
#[setters(strip_option, into)]
pub struct SparseVectorConfig {
    #[debug(skip)]
    pub index_builder: Option<Arc<dyn SparseIndexBuilder>>,
    pub vector_field: String,
    pub metric_type: MetricType,
    /// Resolved from the metric when unset: BM25 means [`SparseMethod::Auto`].
    pub method: Option<SparseMethod>,
}

impl Default for SparseVectorConfig {
    fn default() -> Self {
        Self {
            index_builder: None,
            vector_field: DEFAULT_SPARSE_VECTOR_FIELD.to_string(),
            metric_type: MetricType::BM25,
            method: None,
        }
    }
}

impl SparseVectorConfig {
    fn is_precomputed(&self) -> bool {
        self.method == Some(SparseMethod::Precomputed)
    }
}

/// Turns documents plus their embeddings into the columns to upsert.
pub trait DocumentConverter: Send + Sync {
    fn convert(&self, docs: &[Document], vectors: &[Vec<f64>]) -> anyhow::Result<Vec<Column>>;
}

/// Writes `id`, `content` and `metadata` plus whichever vector columns the
/// collection is configured with.
#[derive(Debug, Clone, Default)]
pub struct DefaultDocumentConverter {
    dense_field: Option<String>,
    sparse_field: Option<String>,
}

impl DefaultDocumentConverter {
    pub fn new(vector: Option<&VectorConfig>, sparse: Option<&SparseVectorConfig>) -> Self {
        Self {
            dense_field: vector.map(|vector| vector.vector_field.clone()),
            sparse_field: sparse
                .filter(|sparse| sparse.is_precomputed())
                .map(|sparse| sparse.vector_field.clone()),
        }
    }
}

impl DocumentConverter for DefaultDocumentConverter {
    fn convert(&self, docs: &[Document], vectors: &[Vec<f64>]) -> anyhow::Result<Vec<Column>> {
        let mut ids = Vec::with_capacity(docs.len());
        let mut contents = Vec::with_capacity(docs.len());
        let mut metadata = Vec::with_capacity(docs.len());
        let mut dense = Vec::with_capacity(docs.len());
        let mut sparse = Vec::with_capacity(docs.len());

        for (idx, doc) in docs.iter().enumerate() {
            ids.push(doc.id.clone());
            contents.push(doc.content.clone());

            if self.dense_field.is_some() {
                let source = if vectors.len() == docs.len() {
                    Some(vectors[idx].as_slice())
                } else {
                    doc.dense_vector.as_deref()
                };
                let source = source.filter(|vector| !vector.is_empty()).ok_or_else(|| {
                    anyhow::anyhow!("vector data missing for document {idx} (id: {})", doc.id)
                })?;
                dense.push(source.iter().map(|value| *value as f32).collect::<Vec<_>>());
            }

            if self.sparse_field.is_some() {
                let embedding = to_sparse_embedding(doc.sparse_vector.as_ref())
                    .with_context(|| format!("failed to convert sparse vector for document {idx}"))?;
                sparse.push(embedding);
            }

            metadata.push(serde_json::Value::Object(doc.metadata.clone()));
        }

        let mut columns = vec![
            Column::var_char(DEFAULT_ID_FIELD, ids),
            Column::var_char(DEFAULT_CONTENT_FIELD, contents),
            Column::json(DEFAULT_METADATA_FIELD, metadata),
        ];
        if let Some(field) = &self.dense_field {
            let dim = dense.first().map(Vec::len).unwrap_or_default();
            columns.push(Column::float_vector(field.clone(), dim, dense));
        }
        if let Some(field) = &self.sparse_field {
            columns.push(Column::sparse_vector(field.clone(), sparse));
        }
        Ok(columns)
    }
}

fn to_sparse_embedding(vector: Option<&BTreeMap<i64, f64>>) -> anyhow::Result<SparseEmbedding> {
    let Some(vector) = vector else {
        return Ok(SparseEmbedding::default());
    };

    let mut embedding = SparseEmbedding::default();
    for (index, value) in vector {
        let index = u32::try_from(*index)
            .map_err(|_| anyhow::anyhow!("negative sparse index: {index}"))?;
        embedding.indices.push(index);
        embedding.values.push(*value as f32);
    }
    Ok(embedding)
}

/// Per call options read from [`IndexerOptions`] extensions.
#[derive(Debug, Clone, Default, PartialEq, Setters)]
#[setters(strip_option, into)]
pub struct StoreOptions {
    /// Overrides the configured partition.
    pub partition: Option<String>,
}

#[derive(derive_more::Debug, Clone, Setters)]
#[setters(strip_option, into)]
pub struct IndexerConfig {
    #[debug(skip)]
    pub client: Option<Arc<dyn MilvusClient>>,
    /// Used to connect when no `client` is given.
    pub client_config: Option<ClientConfig>,
    pub collection: String,
    pub description: String,
    pub partition_name: Option<String>,
    pub consistency_level: ConsistencyLevel,
    pub enable_dynamic_schema: bool,
    pub vector: Option<VectorConfig>,
    pub sparse: Option<SparseVectorConfig>,
    #[debug(skip)]
    pub document_converter: Option<Arc<dyn DocumentConverter>>,
    #[debug(skip)]
    pub embedding: Option<Arc<dyn Embedder>>,
    pub functions: Vec<Function>,
    /// Extra type params keyed by field name, e.g. `enable_analyzer`.
    pub field_params: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            client: None,
            client_config: None,
            collection: DEFAULT_COLLECTION.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            partition_name: None,
            consistency_level: ConsistencyLevel::Default,
            enable_dynamic_schema: false,
            vector: None,
            sparse: None,
            document_converter: None,
            embedding: None,
            functions: Vec::new(),
            field_params: BTreeMap::new(),
        }
    }
}

impl IndexerConfig {
    fn validate(&mut self) -> anyhow::Result<()> {
        if self.client.is_none() && self.client_config.is_none() {
            anyhow::bail!("[NewIndexer] milvus client or client config not provided");
        }
        if self.vector.is_none() && self.sparse.is_none() {
            anyhow::bail!("[NewIndexer] at least one vector field (dense or sparse) is required");
        }

        if self.collection.is_empty() {
            self.collection = DEFAULT_COLLECTION.to_string();
        }
        if self.description.is_empty() {
            self.description = DEFAULT_DESCRIPTION.to_string();
        }
        if let Some(vector) = &mut self.vector
            && vector.vector_field.is_empty()
        {
            vector.vector_field = DEFAULT_VECTOR_FIELD.to_string();
        }
        if let Some(sparse) = &mut self.sparse {
            if sparse.vector_field.is_empty() {
                sparse.vector_field = DEFAULT_SPARSE_VECTOR_FIELD.to_string();
            }
            if sparse.method.is_none() {
                sparse.method = Some(if sparse.metric_type == MetricType::BM25 {
                    SparseMethod::Auto
                } else {
                    SparseMethod::Precomputed
                });
            }
        }
        self.add_default_bm25_function();

        if self.document_converter.is_none() {
            self.document_converter = Some(Arc::new(DefaultDocumentConverter::new(
                self.vector.as_ref(),
                self.sparse.as_ref(),
            )));
        }
        Ok(())
    }

    fn add_default_bm25_function(&mut self) {
        let Some(sparse) = self.sparse.as_ref().filter(|sparse| sparse.method == Some(SparseMethod::Auto))
        else {
            return;
        };
        let covered = self
            .functions
            .iter()
            .any(|function| function.output_fields.contains(&sparse.vector_field));
        if !covered {
            let function = Function::bm25("bm25_auto", DEFAULT_CONTENT_FIELD, &sparse.vector_field);
            self.functions.push(function);
        }
    }

    fn schema(&self) -> Schema {
        let with_params = |mut field: Field| {
            if let Some(params) = self.field_params.get(&field.name) {
                field.type_params.extend(params.clone());
            }
            field
        };

        let mut fields = vec![
            with_params(
                Field::new(DEFAULT_ID_FIELD, FieldType::VarChar)
                    .max_length(DEFAULT_MAX_ID_LEN)
                    .primary_key(),
            ),
            with_params(
                Field::new(DEFAULT_CONTENT_FIELD, FieldType::VarChar)
                    .max_length(DEFAULT_MAX_CONTENT_LEN),
            ),
            with_params(Field::new(DEFAULT_METADATA_FIELD, FieldType::Json)),
        ];
        if let Some(vector) = &self.vector {
            fields.push(with_params(
                Field::new(&vector.vector_field, FieldType::FloatVector).dim(vector.dimension),
            ));
        }
        if let Some(sparse) = &self.sparse {
            fields.push(with_params(Field::new(&sparse.vector_field, FieldType::SparseFloatVector)));
        }

        Schema {
            description: self.description.clone(),
            fields,
            functions: self.functions.clone(),
            enable_dynamic_field: self.enable_dynamic_schema,
        }
    }
}

/// Stores documents in a Milvus collection, creating and indexing the
/// collection on first use.
#[derive(derive_more::Debug)]
pub struct MilvusIndexer {
    #[debug(skip)]
    client: Arc<dyn MilvusClient>,
    #[debug(skip)]
    converter: Arc<dyn DocumentConverter>,
    config: IndexerConfig,
}

impl MilvusIndexer {
    pub async fn new(mut config: IndexerConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let client = match (&config.client, &config.client_config) {
            (Some(client), _) => client.clone(),
            (None, Some(client_config)) => {
                let client = RestClient::connect(client_config.clone())
                    .with_context(|| "[NewIndexer] failed to create milvus client")?;
                Arc::new(client) as Arc<dyn MilvusClient>
            }
            (None, None) => anyhow::bail!("[NewIndexer] milvus client or client config not provided"),
        };
        let converter = config
            .document_converter
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultDocumentConverter::new(None, None)));

        let indexer = Self { client, converter, config };
        indexer.init_collection().await?;
        Ok(indexer)
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    async fn init_collection(&self) -> anyhow::Result<()> {
        let collection = &self.config.collection;
        let exists = self
            .client
            .has_collection(collection)
            .await
            .with_context(|| "[NewIndexer] failed to check collection")?;

        if !exists {
            if self.config.vector.as_ref().is_some_and(|vector| vector.dimension <= 0) {
                anyhow::bail!("[NewIndexer] vector dimension is required when collection does not exist");
            }
            let request = CreateCollectionRequest {
                collection: collection.clone(),
                schema: self.config.schema(),
                consistency_level: self.config.consistency_level.requested(),
            };
            self.client
                .create_collection(request)
                .await
                .with_context(|| "[NewIndexer] failed to create collection")?;
            info!(collection = %collection, "Created Milvus collection");
        }

        let state = self
            .client
            .get_load_state(collection)
            .await
            .with_context(|| "[NewIndexer] failed to get load state")?;
        if state != LoadState::Loaded {
            self.create_indexes().await?;
            self.client
                .load_collection(collection)
                .await
                .with_context(|| "[NewIndexer] failed to load collection")?;
            debug!(collection = %collection, "Loaded Milvus collection");
        }
        Ok(())
    }

    async fn create_indexes(&self) -> anyhow::Result<()> {
        if let Some(vector) = &self.config.vector {
            let index = match &vector.index_builder {
                Some(builder) => builder.build(vector.metric_type),
                None => AutoIndexBuilder.build(vector.metric_type),
            };
            if self.index_exists(&vector.vector_field).await? {
                info!(field = %vector.vector_field, "[NewIndexer] vector index already exists, skipping creation");
            } else {
                self.client
                    .create_index(CreateIndexRequest {
                        collection: self.config.collection.clone(),
                        field_name: vector.vector_field.clone(),
                        index,
                    })
                    .await
                    .with_context(|| "[NewIndexer] failed to create index")?;
            }
        }

        if let Some(sparse) = &self.config.sparse {
            let index = match &sparse.index_builder {
                Some(builder) => builder.build(sparse.metric_type),
                None => SparseInvertedIndexBuilder::default().build(sparse.metric_type),
            };
            if self.index_exists(&sparse.vector_field).await? {
                info!(field = %sparse.vector_field, "[NewIndexer] sparse index already exists, skipping creation");
            } else {
                self.client
                    .create_index(CreateIndexRequest {
                        collection: self.config.collection.clone(),
                        field_name: sparse.vector_field.clone(),
                        index,
                    })
                    .await
                    .with_context(|| "[NewIndexer] failed to create sparse index")?;
            }
        }
        Ok(())
    }

    /// A failed describe counts as a missing index.
    async fn index_exists(&self, field: &str) -> anyhow::Result<bool> {
        match self.client.describe_index(&self.config.collection, field).await {
            Ok(description) => Ok(description.is_some()),
            Err(error) => {
                debug!(field = %field, error = %error, "Describe index failed");
                Ok(false)
            }
        }
    }

    async fn embed_documents(
        &self,
        embedder: Option<&Arc<dyn Embedder>>,
        docs: &[Document],
    ) -> anyhow::Result<Vec<Vec<f64>>> {
        let Some(embedder) = embedder else {
            return Ok(Vec::new());
        };

        let texts: Vec<String> = docs.iter().map(|doc| doc.content.clone()).collect();
        let vectors = embedder
            .embed_strings(&texts)
            .await
            .with_context(|| "[Indexer.Store] failed to embed documents")?;
        if vectors.len() != docs.len() {
            return Err(Error::EmbeddingCountMismatch {
                expected: docs.len(),
                actual: vectors.len(),
            }
            .into());
        }
        Ok(vectors)
    }
}

#[async_trait::async_trait]
impl Indexer for MilvusIndexer {
    async fn store(
        &self,
        docs: Vec<Document>,
        options: IndexerOptions,
    ) -> anyhow::Result<Vec<String>> {
        let embedder = options.embedder.as_ref().or(self.config.embedding.as_ref());
        let partition = options
            .extension::<StoreOptions>()
            .and_then(|store| store.partition.clone())
            .or_else(|| self.config.partition_name.clone())
            .filter(|partition| !partition.is_empty());

        let vectors = self.embed_documents(embedder, &docs).await?;
        let columns = self
            .converter
            .convert(&docs, &vectors)
            .with_context(|| "[Indexer.Store] failed to convert documents")?;

        let result = self
            .client
            .upsert(UpsertRequest {
                collection: self.config.collection.clone(),
                partition,
                columns,
            })
            .await
            .with_context(|| "[Indexer.Store] failed to upsert documents")?;

        let ids = result.ids_as_strings();
        debug!(collection = %self.config.collection, count = ids.len(), "Stored documents");
        Ok(ids)
    }
}
