use bridge_domain::{Document, RetrieverOptions};

use super::{SearchMode, ann_search, require_query_vector, search_and_convert};
use crate::MetricType;
use crate::client::MilvusClient;
use crate::entity::{QueryData, SearchRequest};
use crate::retriever::RetrieverConfig;

/// Approximate nearest neighbour search on the dense vector field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Approximate {
    pub metric_type: MetricType,
}

impl Default for Approximate {
    fn default() -> Self {
        Self::new(MetricType::L2)
    }
}

impl Approximate {
    pub fn new(metric_type: MetricType) -> Self {
        Self { metric_type }
    }

    pub fn search_request(
        &self,
        config: &RetrieverConfig,
        query_vector: Vec<f32>,
        options: &RetrieverOptions,
    ) -> SearchRequest {
        ann_search(config, options, &config.vector_field, QueryData::FloatVector(query_vector))
            .search_param("metric_type", self.metric_type.as_ref())
    }
}

#[async_trait::async_trait]
impl SearchMode for Approximate {
    async fn retrieve(
        &self,
        client: &dyn MilvusClient,
        config: &RetrieverConfig,
        query: &str,
        options: &RetrieverOptions,
    ) -> anyhow::Result<Vec<Document>> {
        let vector = require_query_vector("approximate", config, query, options).await?;
        let request = self.search_request(config, vector, options);
        search_and_convert(client, config, request).await
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
    use crate::retriever::SearchOptions;
    use crate::ConsistencyLevel;

    fn config() -> RetrieverConfig {
        RetrieverConfig::default()
            .collection("docs")
            .partitions(vec!["p1".to_string()])
            .output_fields(vec!["id".to_string(), "content".to_string()])
            .consistency_level(ConsistencyLevel::Bounded)
            .embedding(Arc::new(MockEmbedder::new(2)) as Arc<dyn Embedder>)
    }

    #[test]
    fn test_search_request() {
        let options = RetrieverOptions::default().top_k(3usize).with_extension(
            SearchOptions::default()
                .filter("year > 2000")
                .grouping(Grouping::new("author", 2, true)),
        );

        let actual = Approximate::new(MetricType::IP).search_request(&config(), vec![0.5, 1.0], &options);

        let expected = SearchRequest::new("docs", 3, vec![QueryData::FloatVector(vec![0.5, 1.0])])
            .anns_field("vector")
            .output_fields(vec!["id".to_string(), "content".to_string()])
            .partitions(vec!["p1".to_string()])
            .filter("year > 2000")
            .grouping(Grouping::new("author", 2, true))
            .consistency_level(ConsistencyLevel::Bounded)
            .search_param("metric_type", "IP");
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_requires_embedding() {
        let client = MockClient::default();
        let fixture = RetrieverConfig::default();

        let actual = Approximate::default()
            .retrieve(&client, &fixture, "q", &RetrieverOptions::default())
            .await
            .unwrap_err();

        assert_eq!(actual.to_string(), "embedding is required for approximate search");
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_converts_first_result() {
        let client = MockClient::default().with_results(vec![result_set(&[("a", "x", 1.0)])]);

        let actual = Approximate::default()
            .retrieve(&client, &config(), "q", &RetrieverOptions::default())
            .await
            .unwrap();

        assert_eq!(actual, vec![Document::new("a", "x").score(1.0)]);
        let calls = client.calls();
        let Call::Search(request) = &calls[0] else {
            panic!("expected search");
        };
        assert_eq!(request.limit, 5);
        assert_eq!(request.search_params.get("metric_type"), Some(&"L2".to_string()));
    }

    #[tokio::test]
    async fn test_empty_result_list() {
        let client = MockClient::default();

        let actual = Approximate::default()
            .retrieve(&client, &config(), "q", &RetrieverOptions::default())
            .await
            .unwrap();

        assert!(actual.is_empty());
    }

    #[tokio::test]
    async fn test_search_failure_is_wrapped() {
        let client = MockClient::default().failing("boom");

        let actual = Approximate::default()
            .retrieve(&client, &config(), "q", &RetrieverOptions::default())
            .await
            .unwrap_err();

        assert_eq!(format!("{actual:#}"), "failed to search: boom");
    }
}
