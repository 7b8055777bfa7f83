//! Query strategies for [`MilvusRetriever`](crate::MilvusRetriever). Each
//! mode builds one kind of Milvus request from the query, the retriever
//! config and the call options, then converts the results to documents.

mod approximate;
mod hybrid;
mod iterator;
mod range;
mod scalar;
mod sparse;

use std::sync::Arc;

use anyhow::Context as _;
pub use approximate::*;
use bridge_domain::{Document, Embedder, RetrieverOptions};
pub use hybrid::*;
pub use iterator::*;
pub use range::*;
pub use scalar::*;
pub use sparse::*;

use crate::client::MilvusClient;
use crate::entity::{QueryData, SearchRequest};
use crate::error::Error;
use crate::retriever::{RetrieverConfig, SearchOptions};

#[async_trait::async_trait]
pub trait SearchMode: Send + Sync {
    async fn retrieve(
        &self,
        client: &dyn MilvusClient,
        config: &RetrieverConfig,
        query: &str,
        options: &RetrieverOptions,
    ) -> anyhow::Result<Vec<Document>>;
}

/// Embeds a single query and narrows it to the `f32` vectors Milvus stores.
pub async fn embed_query(
    embedder: Option<&Arc<dyn Embedder>>,
    query: &str,
) -> anyhow::Result<Vec<f32>> {
    let embedder = embedder.ok_or_else(|| anyhow::anyhow!("[Retriever] embedding not provided"))?;
    let vectors = embedder
        .embed_strings(&[query.to_string()])
        .await
        .with_context(|| "[Retriever] failed to embed query")?;
    let [vector] = vectors.as_slice() else {
        anyhow::bail!(
            "[Retriever] invalid embedding result: expected 1, got {}",
            vectors.len()
        );
    };
    Ok(vector.iter().map(|value| *value as f32).collect())
}

/// Embeds the query for a mode that cannot run without a dense vector.
async fn require_query_vector(
    mode: &'static str,
    config: &RetrieverConfig,
    query: &str,
    options: &RetrieverOptions,
) -> anyhow::Result<Vec<f32>> {
    let embedder = config.embedder(options).ok_or(Error::EmbeddingRequired(mode))?;
    embed_query(Some(embedder), query).await
}

/// A single vector search with the settings shared by every ANN mode.
fn ann_search(
    config: &RetrieverConfig,
    options: &RetrieverOptions,
    anns_field: &str,
    data: QueryData,
) -> SearchRequest {
    let search = SearchOptions::from_options(options);
    let mut request = SearchRequest::new(&config.collection, config.limit_for(options), vec![data])
        .anns_field(anns_field)
        .output_fields(config.output_fields.clone())
        .partitions(config.partitions.clone());
    request.filter = search.filter_expr().map(str::to_string);
    request.grouping = search.grouping;
    request.consistency_level = config.consistency_level.requested();
    request
}

/// Runs a search and converts its first result set.
async fn search_and_convert(
    client: &dyn MilvusClient,
    config: &RetrieverConfig,
    request: SearchRequest,
) -> anyhow::Result<Vec<Document>> {
    let results = client.search(request).await.with_context(|| "failed to search")?;
    match results.first() {
        Some(result) => config.convert(result),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mock::MockEmbedder;

    #[tokio::test]
    async fn test_embed_query_narrows_to_f32() {
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(3));
        let actual = embed_query(Some(&embedder), "q").await.unwrap();
        assert_eq!(actual, vec![1.0f32, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_embed_query_without_embedder() {
        let actual = embed_query(None, "q").await.unwrap_err();
        assert_eq!(actual.to_string(), "[Retriever] embedding not provided");
    }

    #[tokio::test]
    async fn test_embed_query_rejects_wrong_count() {
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(3).returning(2));
        let actual = embed_query(Some(&embedder), "q").await.unwrap_err();
        assert_eq!(actual.to_string(), "[Retriever] invalid embedding result: expected 1, got 2");
    }
}
