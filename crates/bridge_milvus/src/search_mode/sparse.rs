use bridge_domain::{Document, RetrieverOptions};

use super::{SearchMode, ann_search, search_and_convert};
use crate::MetricType;
use crate::client::MilvusClient;
use crate::entity::{QueryData, SearchRequest};
use crate::retriever::RetrieverConfig;

/// Full text search on the sparse field. The raw query text is sent and the
/// server derives the sparse vector, so no embedder is needed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sparse {
    pub metric_type: MetricType,
}

impl Default for Sparse {
    fn default() -> Self {
        Self::new(MetricType::BM25)
    }
}

impl Sparse {
    pub fn new(metric_type: MetricType) -> Self {
        Self { metric_type }
    }

    pub fn search_request(
        &self,
        config: &RetrieverConfig,
        query: &str,
        options: &RetrieverOptions,
    ) -> SearchRequest {
        ann_search(
            config,
            options,
            &config.sparse_vector_field,
            QueryData::Text(query.to_string()),
        )
        .search_param("metric_type", self.metric_type.as_ref())
    }
}

#[async_trait::async_trait]
impl SearchMode for Sparse {
    async fn retrieve(
        &self,
        client: &dyn MilvusClient,
        config: &RetrieverConfig,
        query: &str,
        options: &RetrieverOptions,
    ) -> anyhow::Result<Vec<Document>> {
        let request = self.search_request(config, query, options);
        search_and_convert(client, config, request).await
    }
}
