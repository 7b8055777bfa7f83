use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context as _;
use bridge_domain::{Document, Embedder, HttpInfra, Indexer, IndexerOptions};
use bridge_infra::BridgeHttpService;
use derive_setters::Setters;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::client::{BulkOperation, ClientConfig, ElasticClient};

const DEFAULT_BATCH_SIZE: usize = 5;

/// Maps a document to the fields written to the index.
pub type DocumentToFields =
    Arc<dyn Fn(&Document) -> anyhow::Result<BTreeMap<String, FieldValue>> + Send + Sync>;

/// Renders a field value as the text to embed.
pub type Stringify = Arc<dyn Fn(&Value) -> anyhow::Result<String> + Send + Sync>;

/// One field of an indexed document.
#[derive(derive_more::Debug, Clone, Default)]
pub struct FieldValue {
    pub value: Value,
    /// When set, the value is embedded and the vector is stored under this
    /// key, next to the original value.
    pub embed_key: Option<String>,
    /// Text used for embedding. Defaults to the value itself, which must then
    /// be a string.
    #[debug(skip)]
    pub stringify: Option<Stringify>,
}

impl FieldValue {
    pub fn new(value: impl Into<Value>) -> Self {
        Self { value: value.into(), ..Default::default() }
    }

    pub fn embed_into(mut self, key: impl Into<String>) -> Self {
        self.embed_key = Some(key.into());
        self
    }

    pub fn with_stringify(mut self, stringify: Stringify) -> Self {
        self.stringify = Some(stringify);
        self
    }

    fn embed_text(&self, key: &str, embed_key: &str) -> anyhow::Result<String> {
        match (&self.stringify, &self.value) {
            (Some(stringify), value) => stringify(value),
            (None, Value::String(text)) => Ok(text.clone()),
            (None, _) => anyhow::bail!(
                "[makeBatch] assert value as string failed, key={key}, emb_key={embed_key}"
            ),
        }
    }
}

#[derive(derive_more::Debug, Clone, Default, Setters)]
#[setters(strip_option, into)]
pub struct IndexerConfig {
    pub index: String,
    /// Documents per bulk request. Zero falls back to 5.
    pub batch_size: usize,
    #[debug(skip)]
    pub document_to_fields: Option<DocumentToFields>,
    #[debug(skip)]
    pub embedding: Option<Arc<dyn Embedder>>,
    /// Settings and mappings used to create the index when it is missing.
    /// Without them the index is left to the cluster's dynamic mapping.
    pub mappings: Option<Value>,
}

impl IndexerConfig {
    pub fn validate(&mut self) -> anyhow::Result<()> {
        if self.index.is_empty() {
            anyhow::bail!("[NewIndexer] index not provided");
        }
        if self.document_to_fields.is_none() {
            anyhow::bail!("[NewIndexer] DocumentToFields method not provided");
        }
        if self.batch_size == 0 {
            self.batch_size = DEFAULT_BATCH_SIZE;
        }
        Ok(())
    }
}

/// [`Indexer`] writing documents to Elasticsearch with the bulk API.
pub struct EsIndexer<H> {
    client: ElasticClient<H>,
    config: IndexerConfig,
    document_to_fields: DocumentToFields,
}

impl EsIndexer<BridgeHttpService> {
    pub async fn connect(client: ClientConfig, config: IndexerConfig) -> anyhow::Result<Self> {
        Self::new(ElasticClient::connect(client)?, config).await
    }
}

impl<H: HttpInfra> EsIndexer<H> {
    pub async fn new(client: ElasticClient<H>, mut config: IndexerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let document_to_fields = config
            .document_to_fields
            .clone()
            .ok_or_else(|| anyhow::anyhow!("[NewIndexer] DocumentToFields method not provided"))?;

        if let Some(mappings) = &config.mappings
            && !client.index_exists(&config.index).await?
        {
            client
                .create_index(&config.index, mappings)
                .await
                .with_context(|| format!("[NewIndexer] failed to create index {}", config.index))?;
            info!(index = %config.index, "Index created");
        }

        Ok(Self { client, config, document_to_fields })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Builds the source of every document in `docs`, embedding the fields
    /// that ask for it in a single call.
    async fn make_batch(
        &self,
        docs: &[Document],
        embedder: Option<&Arc<dyn Embedder>>,
    ) -> anyhow::Result<Vec<Map<String, Value>>> {
        let mut sources = Vec::with_capacity(docs.len());
        let mut texts = Vec::new();
        let mut targets = Vec::new();

        for (idx, doc) in docs.iter().enumerate() {
            let fields = (self.document_to_fields)(doc)
                .with_context(|| "[makeBatch] FieldValueMapping failed")?;

            let mut source = Map::new();
            for (key, field) in &fields {
                source.insert(key.clone(), field.value.clone());
                let Some(embed_key) = &field.embed_key else {
                    continue;
                };
                if key == embed_key {
                    anyhow::bail!("[makeBatch] duplicate key for embed key, key={key}");
                }
                if fields.contains_key(embed_key) {
                    anyhow::bail!("[makeBatch] duplicate key for origin key, key={embed_key}");
                }
                texts.push(field.embed_text(key, embed_key)?);
                targets.push((idx, embed_key.clone()));
            }
            sources.push(source);
        }

        if texts.is_empty() {
            return Ok(sources);
        }

        let embedder =
            embedder.ok_or_else(|| anyhow::anyhow!("[makeBatch] embedding method not provided"))?;
        let vectors = embedder
            .embed_strings(&texts)
            .await
            .with_context(|| "[makeBatch] embedding failed")?;
        if vectors.len() != texts.len() {
            anyhow::bail!(
                "[makeBatch] invalid vector length, expected={}, got={}",
                texts.len(),
                vectors.len()
            );
        }

        for ((idx, embed_key), vector) in targets.into_iter().zip(vectors) {
            sources[idx].insert(embed_key, json!(vector));
        }
        Ok(sources)
    }
}

#[async_trait::async_trait]
impl<H: HttpInfra> Indexer for EsIndexer<H> {
    async fn store(
        &self,
        docs: Vec<Document>,
        options: IndexerOptions,
    ) -> anyhow::Result<Vec<String>> {
        let embedder = options.embedder.as_ref().or(self.config.embedding.as_ref());

        for batch in docs.chunks(self.config.batch_size) {
            let sources = self.make_batch(batch, embedder).await?;
            let operations = batch
                .iter()
                .zip(sources)
                .map(|(doc, source)| BulkOperation {
                    index: self.config.index.clone(),
                    id: doc.id.clone(),
                    source: Value::Object(source),
                })
                .collect::<Vec<_>>();

            let response = self
                .client
                .bulk(&operations)
                .await
                .with_context(|| "[Indexer.Store] bulk request failed")?;
            if let Some(failure) = response.first_failure() {
                return Err(failure.into());
            }
            debug!(index = %self.config.index, count = operations.len(), "Bulk batch indexed");
        }

        Ok(docs.into_iter().map(|doc| doc.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    use super::*;

    /// Always returns `vectors` vectors, whatever it is asked for.
    struct FixedEmbedder {
        vectors: usize,
    }

    #[async_trait::async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed_strings(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f64>>> {
            Ok((0..self.vectors).map(|i| vec![i as f64, 0.5]).collect())
        }
    }

    fn embedder(vectors: usize) -> Arc<dyn Embedder> {
        Arc::new(FixedEmbedder { vectors })
    }

    fn content_fields() -> DocumentToFields {
        Arc::new(|doc: &Document| {
            Ok(BTreeMap::from([
                ("content".to_string(), FieldValue::new(doc.content.clone()).embed_into("content_vector")),
                ("location".to_string(), FieldValue::new(doc.metadata.get("location").cloned().unwrap_or_default())),
            ]))
        })
    }

    fn config() -> IndexerConfig {
        IndexerConfig::default().index("docs").document_to_fields(content_fields())
    }

    async fn indexer(server: &mockito::Server, config: IndexerConfig) -> EsIndexer<BridgeHttpService> {
        EsIndexer::connect(ClientConfig::default().addresses(vec![server.url()]), config)
            .await
            .unwrap()
    }

    fn docs() -> Vec<Document> {
        vec![
            Document::new("1", "great wall").insert_metadata("location", "China"),
            Document::new("2", "eiffel tower").insert_metadata("location", "France"),
        ]
    }

    #[test]
    fn test_validate() {
        let mut fixture = config();
        fixture.validate().unwrap();
        assert_eq!(fixture.batch_size, 5);

        let actual = IndexerConfig::default().index("docs").validate().unwrap_err();
        assert_eq!(actual.to_string(), "[NewIndexer] DocumentToFields method not provided");
    }

    #[tokio::test]
    async fn test_store_embeds_and_bulk_indexes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/_bulk")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"\{"index":\{"_id":"1","_index":"docs"\}\}"#.to_string()),
                Matcher::Regex(
                    r#"\{"content":"great wall","content_vector":\[0\.0,0\.5\],"location":"China"\}"#
                        .to_string(),
                ),
                Matcher::Regex(r#""content_vector":\[1\.0,0\.5\],"location":"France""#.to_string()),
            ]))
            .with_body(r#"{"errors":false,"items":[{"index":{"_id":"1","status":201}},{"index":{"_id":"2","status":201}}]}"#)
            .expect(1)
            .create_async()
            .await;

        let actual = indexer(&server, config().embedding(embedder(2)))
            .await
            .store(docs(), IndexerOptions::default())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(actual, vec!["1".to_string(), "2".to_string()]);
    }

    #[tokio::test]
    async fn test_store_splits_batches() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/_bulk")
            .with_body(r#"{"errors":false,"items":[]}"#)
            .expect(2)
            .create_async()
            .await;

        indexer(&server, config().batch_size(1usize))
            .await
            .store(docs(), IndexerOptions::default().embedder(embedder(1)))
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_store_surfaces_item_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/_bulk")
            .with_body(r#"{"errors":true,"items":[{"index":{"_id":"2","status":400,"error":{"type":"mapper_parsing_exception","reason":"bad location"}}}]}"#)
            .create_async()
            .await;

        let actual = indexer(&server, config().embedding(embedder(2)))
            .await
            .store(docs(), IndexerOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            actual.downcast_ref::<crate::Error>(),
            Some(crate::Error::BulkItem { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_embedder() {
        let server = mockito::Server::new_async().await;

        let actual = indexer(&server, config())
            .await
            .store(docs(), IndexerOptions::default())
            .await
            .unwrap_err();

        assert_eq!(actual.to_string(), "[makeBatch] embedding method not provided");
    }

    #[tokio::test]
    async fn test_vector_count_mismatch() {
        let server = mockito::Server::new_async().await;

        let actual = indexer(&server, config().embedding(embedder(1)))
            .await
            .store(docs(), IndexerOptions::default())
            .await
            .unwrap_err();

        assert_eq!(actual.to_string(), "[makeBatch] invalid vector length, expected=2, got=1");
    }

    #[tokio::test]
    async fn test_embed_key_must_not_shadow_a_field() {
        let server = mockito::Server::new_async().await;
        let fields: DocumentToFields = Arc::new(|doc: &Document| {
            Ok(BTreeMap::from([
                ("content".to_string(), FieldValue::new(doc.content.clone()).embed_into("title")),
                ("title".to_string(), FieldValue::new("t")),
            ]))
        });

        let actual = indexer(&server, config().document_to_fields(fields).embedding(embedder(2)))
            .await
            .store(docs(), IndexerOptions::default())
            .await
            .unwrap_err();

        assert_eq!(actual.to_string(), "[makeBatch] duplicate key for origin key, key=title");
    }

    #[tokio::test]
    async fn test_non_string_value_needs_stringify() {
        let server = mockito::Server::new_async().await;
        let plain: DocumentToFields = Arc::new(|_: &Document| {
            Ok(BTreeMap::from([("year".to_string(), FieldValue::new(2024).embed_into("year_vector"))]))
        });

        let actual = indexer(&server, config().document_to_fields(plain).embedding(embedder(2)))
            .await
            .store(docs(), IndexerOptions::default())
            .await
            .unwrap_err();

        assert_eq!(
            actual.to_string(),
            "[makeBatch] assert value as string failed, key=year, emb_key=year_vector"
        );
    }

    #[test]
    fn test_stringify_renders_embed_text() {
        let fixture = FieldValue::new(2024)
            .embed_into("year_vector")
            .with_stringify(Arc::new(|value: &Value| Ok(format!("year {value}"))));

        let actual = fixture.embed_text("year", "year_vector").unwrap();

        assert_eq!(actual, "year 2024");
    }

    #[tokio::test]
    async fn test_creates_missing_index_with_mappings() {
        let mut server = mockito::Server::new_async().await;
        server.mock("HEAD", "/docs").with_status(404).create_async().await;
        let create = server
            .mock("PUT", "/docs")
            .match_body(Matcher::Json(json!({"mappings": {"properties": {"content": {"type": "text"}}}})))
            .with_body(r#"{"acknowledged":true}"#)
            .create_async()
            .await;

        indexer(
            &server,
            config().mappings(json!({"mappings": {"properties": {"content": {"type": "text"}}}})),
        )
        .await;

        create.assert_async().await;
    }
}
