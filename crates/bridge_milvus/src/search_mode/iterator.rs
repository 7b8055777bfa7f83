use std::collections::BTreeMap;

use anyhow::Context as _;
use bridge_domain::{Document, RetrieverOptions};

use super::{SearchMode, require_query_vector};
use crate::MetricType;
use crate::client::MilvusClient;
use crate::entity::{QueryData, SearchIteratorRequest};
use crate::retriever::{RetrieverConfig, SearchOptions};

const DEFAULT_BATCH_SIZE: usize = 100;

/// Dense search that walks the hits batch by batch, for result sets too
/// large for a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct IteratorSearch {
    pub metric_type: MetricType,
    pub batch_size: usize,
    pub search_params: BTreeMap<String, String>,
}

impl Default for IteratorSearch {
    fn default() -> Self {
        Self::new(MetricType::L2, DEFAULT_BATCH_SIZE)
    }
}

impl IteratorSearch {
    /// A zero `batch_size` falls back to 100.
    pub fn new(metric_type: MetricType, batch_size: usize) -> Self {
        let batch_size = if batch_size == 0 { DEFAULT_BATCH_SIZE } else { batch_size };
        Self { metric_type, batch_size, search_params: BTreeMap::new() }
    }

    pub fn with_search_params(mut self, search_params: BTreeMap<String, String>) -> Self {
        self.search_params = search_params;
        self
    }

    pub fn iterator_request(
        &self,
        config: &RetrieverConfig,
        query_vector: Vec<f32>,
        options: &RetrieverOptions,
    ) -> SearchIteratorRequest {
        let search = SearchOptions::from_options(options);
        let mut request =
            SearchIteratorRequest::new(&config.collection, QueryData::FloatVector(query_vector))
                .anns_field(&config.vector_field)
                .batch_size(self.batch_size)
                .output_fields(config.output_fields.clone())
                .iterator_limit(config.limit_for(options))
                .search_param("metric_type", self.metric_type.as_ref())
                .partitions(config.partitions.clone());
        request
            .search_params
            .extend(self.search_params.iter().map(|(key, value)| (key.clone(), value.clone())));
        request.filter = search.filter_expr().map(str::to_string);
        request.grouping = search.grouping;
        request.consistency_level = config.consistency_level.requested();
        request
    }
}

#[async_trait::async_trait]
impl SearchMode for IteratorSearch {
    async fn retrieve(
        &self,
        client: &dyn MilvusClient,
        config: &RetrieverConfig,
        query: &str,
        options: &RetrieverOptions,
    ) -> anyhow::Result<Vec<Document>> {
        let vector = require_query_vector("iterator", config, query, options).await?;
        let request = self.iterator_request(config, vector, options);
        let mut iterator = client
            .search_iterator(request)
            .await
            .with_context(|| "failed to create search iterator")?;

        let mut docs = Vec::new();
        while let Some(batch) = iterator.next().await.with_context(|| "iterator next failed")? {
            if batch.result_count == 0 {
                break;
            }
            let converted = config
                .convert(&batch)
                .with_context(|| "failed to convert batch results")?;
            docs.extend(converted);
        }
        Ok(docs)
    }
}
