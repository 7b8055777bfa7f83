use bridge_domain::{Document, RetrieverOptions};

use super::{SearchMode, ann_search, require_query_vector, search_and_convert};
use crate::MetricType;
use crate::client::MilvusClient;
use crate::entity::{QueryData, SearchRequest};
use crate::retriever::RetrieverConfig;

/// Returns hits whose distance falls inside `radius` and, when set, outside
/// `range_filter`. For L2 the window is `range_filter <= d < radius`; for
/// IP and COSINE it is `radius < d <= range_filter`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub metric_type: MetricType,
    pub radius: f64,
    pub range_filter: Option<f64>,
}

impl Range {
    pub fn new(metric_type: MetricType, radius: f64) -> Self {
        Self { metric_type, radius, range_filter: None }
    }

    pub fn with_range_filter(mut self, range_filter: f64) -> Self {
        self.range_filter = Some(range_filter);
        self
    }

    pub fn search_request(
        &self,
        config: &RetrieverConfig,
        query_vector: Vec<f32>,
        options: &RetrieverOptions,
    ) -> SearchRequest {
        let request =
            ann_search(config, options, &config.vector_field, QueryData::FloatVector(query_vector))
                .search_param("radius", self.radius.to_string())
                .search_param("metric_type", self.metric_type.as_ref());
        match self.range_filter {
            Some(range_filter) => request.search_param("range_filter", range_filter.to_string()),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl SearchMode for Range {
    async fn retrieve(
        &self,
        client: &dyn MilvusClient,
        config: &RetrieverConfig,
        query: &str,
        options: &RetrieverOptions,
    ) -> anyhow::Result<Vec<Document>> {
        let vector = require_query_vector("range", config, query, options).await?;
        let request = self.search_request(config, vector, options);
        search_and_convert(client, config, request).await
    }
}
