use anyhow::Context as _;
use bridge_domain::{Document, RetrieverOptions};

use super::SearchMode;
use crate::client::MilvusClient;
use crate::entity::QueryRequest;
use crate::retriever::{RetrieverConfig, SearchOptions};

/// Filter only lookup: the query string is a boolean expression and no
/// vector search takes place.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Scalar;

impl Scalar {
    pub fn query_request(
        &self,
        config: &RetrieverConfig,
        query: &str,
        options: &RetrieverOptions,
    ) -> QueryRequest {
        let search = SearchOptions::from_options(options);
        let expr = match (query.is_empty(), search.filter_expr()) {
            (false, Some(filter)) => format!("({query}) and ({filter})"),
            (true, Some(filter)) => filter.to_string(),
            (_, None) => query.to_string(),
        };

        let mut request = QueryRequest::new(&config.collection)
            .filter(expr)
            .output_fields(config.output_fields.clone())
            .limit(config.limit_for(options))
            .partitions(config.partitions.clone());
        request.consistency_level = config.consistency_level.requested();
        request
    }
}

#[async_trait::async_trait]
impl SearchMode for Scalar {
    async fn retrieve(
        &self,
        client: &dyn MilvusClient,
        config: &RetrieverConfig,
        query: &str,
        options: &RetrieverOptions,
    ) -> anyhow::Result<Vec<Document>> {
        let request = self.query_request(config, query, options);
        let result = client.query(request).await.with_context(|| "failed to query")?;
        config.convert(&result)
    }
}
