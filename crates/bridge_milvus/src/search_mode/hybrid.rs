use std::collections::BTreeMap;

use anyhow::Context as _;
use bridge_domain::{Document, RetrieverOptions};
use derive_setters::Setters;

use super::{SearchMode, require_query_vector};
use crate::client::MilvusClient;
use crate::entity::{AnnRequest, HybridSearchRequest, QueryData, Reranker};
use crate::retriever::{RetrieverConfig, SearchOptions};
use crate::{MetricType, VectorType};

/// One vector search inside a [`Hybrid`] query.
#[derive(Debug, Clone, Default, PartialEq, Setters)]
#[setters(strip_option, into)]
pub struct SubRequest {
    /// Defaults to the retriever's dense or sparse field by `vector_type`.
    pub vector_field: Option<String>,
    pub metric_type: Option<MetricType>,
    /// Candidates fetched by this leg. Zero uses the retriever's top-k.
    pub top_k: usize,
    pub search_params: BTreeMap<String, String>,
    pub vector_type: VectorType,
}

impl SubRequest {
    pub fn dense(metric_type: MetricType) -> Self {
        Self { metric_type: Some(metric_type), ..Default::default() }
    }

    pub fn sparse(metric_type: MetricType) -> Self {
        Self {
            metric_type: Some(metric_type),
            vector_type: VectorType::Sparse,
            ..Default::default()
        }
    }
}

/// Multi vector search whose ranked lists are fused by a [`Reranker`].
#[derive(Debug, Clone, PartialEq)]
pub struct Hybrid {
    pub sub_requests: Vec<SubRequest>,
    pub reranker: Reranker,
    /// Final result count. Zero uses the retriever's top-k.
    pub top_k: usize,
}

impl Hybrid {
    pub fn new(reranker: Reranker, sub_requests: Vec<SubRequest>) -> Self {
        Self { sub_requests, reranker, top_k: 0 }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn hybrid_request(
        &self,
        config: &RetrieverConfig,
        query_vector: &[f32],
        query: &str,
        options: &RetrieverOptions,
    ) -> anyhow::Result<HybridSearchRequest> {
        if self.sub_requests.len() < 2 {
            anyhow::bail!(
                "hybrid search requires at least 2 SubRequests; use Approximate or Sparse search mode for single-vector search"
            );
        }

        let search = SearchOptions::from_options(options);
        let limit = options.top_k.unwrap_or(if self.top_k > 0 { self.top_k } else { config.top_k });

        let requests = self
            .sub_requests
            .iter()
            .map(|sub| {
                let field = sub.vector_field.clone().unwrap_or_else(|| match sub.vector_type {
                    VectorType::Sparse => config.sparse_vector_field.clone(),
                    VectorType::Dense => config.vector_field.clone(),
                });
                let sub_limit = if sub.top_k > 0 { sub.top_k } else { config.top_k };
                let data = match sub.vector_type {
                    VectorType::Sparse => QueryData::Text(query.to_string()),
                    VectorType::Dense if query_vector.is_empty() => anyhow::bail!(
                        "dense vector SubRequest requires embedding, but query vector is empty"
                    ),
                    VectorType::Dense => QueryData::FloatVector(query_vector.to_vec()),
                };

                let mut request = AnnRequest::new(field, sub_limit, data);
                request.search_params = sub.search_params.clone();
                if let Some(metric_type) = sub.metric_type {
                    request = request.search_param("metric_type", metric_type.as_ref());
                }
                request.filter = search.filter_expr().map(str::to_string);
                request.grouping = search.grouping.clone();
                Ok(request)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut request =
            HybridSearchRequest::new(&config.collection, limit, requests, self.reranker.clone())
                .output_fields(config.output_fields.clone())
                .partitions(config.partitions.clone());
        request.consistency_level = config.consistency_level.requested();
        Ok(request)
    }
}

#[async_trait::async_trait]
impl SearchMode for Hybrid {
    async fn retrieve(
        &self,
        client: &dyn MilvusClient,
        config: &RetrieverConfig,
        query: &str,
        options: &RetrieverOptions,
    ) -> anyhow::Result<Vec<Document>> {
        let vector = require_query_vector("hybrid", config, query, options).await?;
        let request = self
            .hybrid_request(config, &vector, query, options)
            .with_context(|| "failed to build hybrid search option")?;
        let results = client
            .hybrid_search(request)
            .await
            .with_context(|| "failed to hybrid search")?;
        match results.first() {
            Some(result) => config.convert(result),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bridge_domain::Embedder;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::entity::Grouping;
    use crate::mock::{Call, MockClient, MockEmbedder, result_set};

    fn hybrid() -> Hybrid {
        Hybrid::new(
            Reranker::rrf(),
            vec![
                SubRequest::dense(MetricType::L2)
                    .top_k(10usize)
                    .search_params(BTreeMap::from([("nprobe".to_string(), "16".to_string())])),
                SubRequest::sparse(MetricType::BM25),
            ],
        )
    }

    #[test]
    fn test_builds_one_leg_per_sub_request() {
        let config = RetrieverConfig::default().collection("docs").top_k(4usize);
        let options = RetrieverOptions::default().with_extension(
            SearchOptions::default()
                .filter("lang == \"en\"")
                .grouping(Grouping::new("author", 1, false)),
        );

        let actual = hybrid().hybrid_request(&config, &[0.5, 1.0], "query", &options).unwrap();

        let expected = HybridSearchRequest::new(
            "docs",
            4,
            vec![
                AnnRequest::new("vector", 10, QueryData::FloatVector(vec![0.5, 1.0]))
                    .search_param("nprobe", "16")
                    .search_param("metric_type", "L2")
                    .filter("lang == \"en\"")
                    .grouping(Grouping::new("author", 1, false)),
                AnnRequest::new("sparse_vector", 4, QueryData::Text("query".to_string()))
                    .search_param("metric_type", "BM25")
                    .filter("lang == \"en\"")
                    .grouping(Grouping::new("author", 1, false)),
            ],
            Reranker::rrf(),
        )
        .output_fields(vec!["*".to_string()]);
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_top_k_precedence() {
        let config = RetrieverConfig::default().top_k(4usize);

        let actual = hybrid()
            .with_top_k(7)
            .hybrid_request(&config, &[1.0], "q", &RetrieverOptions::default())
            .unwrap();
        assert_eq!(actual.limit, 7);

        let actual = hybrid()
            .with_top_k(7)
            .hybrid_request(&config, &[1.0], "q", &RetrieverOptions::default().top_k(2usize))
            .unwrap();
        assert_eq!(actual.limit, 2);
    }

    #[test]
    fn test_needs_two_sub_requests() {
        let fixture = Hybrid::new(Reranker::rrf(), vec![SubRequest::dense(MetricType::IP)]);

        let actual = fixture
            .hybrid_request(&RetrieverConfig::default(), &[1.0], "q", &RetrieverOptions::default())
            .unwrap_err();

        assert_eq!(
            actual.to_string(),
            "hybrid search requires at least 2 SubRequests; use Approximate or Sparse search mode for single-vector search"
        );
    }

    #[test]
    fn test_dense_leg_needs_a_vector() {
        let actual = hybrid()
            .hybrid_request(&RetrieverConfig::default(), &[], "q", &RetrieverOptions::default())
            .unwrap_err();

        assert_eq!(
            actual.to_string(),
            "dense vector SubRequest requires embedding, but query vector is empty"
        );
    }

    #[tokio::test]
    async fn test_retrieve_runs_hybrid_search() {
        let client = MockClient::default().with_results(vec![result_set(&[("a", "x", 0.03)])]);
        let config = RetrieverConfig::default()
            .embedding(Arc::new(MockEmbedder::new(2)) as Arc<dyn Embedder>);
        let fixture = Hybrid::new(
            Reranker::Weighted { weights: vec![0.7, 0.3] },
            vec![SubRequest::dense(MetricType::L2), SubRequest::sparse(MetricType::BM25)],
        );

        let actual = fixture
            .retrieve(&client, &config, "q", &RetrieverOptions::default())
            .await
            .unwrap();

        assert_eq!(actual.len(), 1);
        let calls = client.calls();
        let Call::HybridSearch(request) = &calls[0] else {
            panic!("expected hybrid search");
        };
        assert_eq!(request.reranker, Reranker::Weighted { weights: vec![0.7, 0.3] });
        assert_eq!(request.requests[0].data, QueryData::FloatVector(vec![1.0, 0.0]));
    }

    #[tokio::test]
    async fn test_requires_embedding() {
        let client = MockClient::default();

        let actual = hybrid()
            .retrieve(&client, &RetrieverConfig::default(), "q", &RetrieverOptions::default())
            .await
            .unwrap_err();

        assert_eq!(actual.to_string(), "embedding is required for hybrid search");
    }
}
