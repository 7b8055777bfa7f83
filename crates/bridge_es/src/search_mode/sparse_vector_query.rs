use bridge_domain::RetrieverOptions;

use super::SearchMode;
use crate::request::{BoolQuery, Query, SearchRequest, SparseVectorQuery as SparseVectorClause};
use crate::retriever::{RetrieverConfig, SearchOptions};

/// `sparse_vector` query on a sparse field. The query is expanded by the
/// inference endpoint when one is set, otherwise the call must carry a
/// precomputed sparse vector in [`SearchOptions::sparse_vector`].
#[derive(Debug, Clone, PartialEq)]
pub struct SparseVectorQuery {
    pub field: String,
    pub inference_id: Option<String>,
}

impl SparseVectorQuery {
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into(), inference_id: None }
    }

    pub fn with_inference_id(mut self, inference_id: impl Into<String>) -> Self {
        self.inference_id = Some(inference_id.into());
        self
    }
}

#[async_trait::async_trait]
impl SearchMode for SparseVectorQuery {
    async fn build_request(
        &self,
        _config: &RetrieverConfig,
        query: &str,
        options: &RetrieverOptions,
    ) -> anyhow::Result<SearchRequest> {
        let search = SearchOptions::from_options(options);

        let mut clause = SparseVectorClause::default().field(&self.field);
        match (&self.inference_id, search.sparse_vector) {
            (Some(inference_id), _) => {
                clause.inference_id = Some(inference_id.clone());
                clause.query = Some(query.to_string());
            }
            (None, Some(sparse_vector)) => clause.query_vector = Some(sparse_vector),
            (None, None) => anyhow::bail!(
                "[SparseVectorQuery] either inference id or a sparse vector option is required"
            ),
        }

        let should = Query { sparse_vector: Some(clause), ..Default::default() };
        Ok(SearchRequest::default().query(Query::boolean(
            BoolQuery::default().should(vec![should]).filter(search.filters),
        )))
    }
}
