//! Query strategies for [`EsRetriever`](crate::EsRetriever). A mode turns the
//! query text and the call options into a `_search` body; the retriever adds
//! size and score threshold on top.

mod approximate;
mod dense_vector_similarity;
mod exact_match;
mod raw_string;
mod sparse_vector_query;
mod text_expansion;

use std::sync::Arc;

use anyhow::Context as _;
pub use approximate::*;
use bridge_domain::{Embedder, RetrieverOptions};
pub use dense_vector_similarity::*;
pub use exact_match::*;
pub use raw_string::*;
pub use sparse_vector_query::*;
pub use text_expansion::*;

use crate::request::SearchRequest;
use crate::retriever::RetrieverConfig;

#[async_trait::async_trait]
pub trait SearchMode: Send + Sync {
    async fn build_request(
        &self,
        config: &RetrieverConfig,
        query: &str,
        options: &RetrieverOptions,
    ) -> anyhow::Result<SearchRequest>;
}

/// Embeds the query with the call's embedder, falling back to the
/// configured one.
async fn embed_query(
    config: &RetrieverConfig,
    query: &str,
    options: &RetrieverOptions,
) -> anyhow::Result<Vec<f32>> {
    let embedder: &Arc<dyn Embedder> = config
        .embedder(options)
        .ok_or_else(|| anyhow::anyhow!("embedding not provided"))?;
    let vectors = embedder
        .embed_strings(&[query.to_string()])
        .await
        .with_context(|| "embedding failed")?;
    let [vector] = vectors.as_slice() else {
        anyhow::bail!("vector len error, expected=1, got={}", vectors.len());
    };
    Ok(vector.iter().map(|value| *value as f32).collect())
}


#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::test_support::embedded;
    use super::*;

    #[tokio::test]
    async fn test_embed_query_narrows_to_f32() {
        let actual = embed_query(&embedded(false), "q", &RetrieverOptions::default()).await.unwrap();
        assert_eq!(actual, vec![0.1f32, 0.2f32]);
    }

    #[tokio::test]
    async fn test_embed_query_errors() {
        let options = RetrieverOptions::default();

        let actual = embed_query(&RetrieverConfig::default(), "q", &options).await.unwrap_err();
        assert_eq!(actual.to_string(), "embedding not provided");

        let actual = embed_query(&embedded(true), "q", &options).await.unwrap_err();
        assert_eq!(format!("{actual:#}"), "embedding failed: mock error");
    }
}
