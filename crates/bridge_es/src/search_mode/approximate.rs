use bridge_domain::RetrieverOptions;
use derive_setters::Setters;

use super::{SearchMode, embed_query};
use crate::request::{
    BoolQuery, KnnSearch, Query, QueryVectorBuilder, Rank, RrfRank, SearchRequest, TextEmbedding,
};
use crate::retriever::{RetrieverConfig, SearchOptions};

/// Approximate kNN search on a dense vector field, optionally combined with a
/// full text match on another field.
#[derive(Debug, Clone, Default, PartialEq, Setters)]
#[setters(strip_option, into)]
pub struct Approximate {
    pub vector_field_name: String,
    /// Text field matched when `hybrid` is set.
    pub query_field_name: String,
    pub hybrid: bool,
    /// Fuse the kNN and match rankings with reciprocal rank fusion. Only
    /// used with `hybrid`, and needs a license that allows it.
    pub rrf: bool,
    pub rrf_rank_constant: Option<i64>,
    pub rrf_window_size: Option<i64>,
    pub k: Option<usize>,
    pub num_candidates: Option<usize>,
    pub similarity: Option<f32>,
    /// Let the cluster embed the query with this model instead of the
    /// retriever's embedder.
    pub query_vector_builder_model_id: Option<String>,
}

#[async_trait::async_trait]
impl SearchMode for Approximate {
    async fn build_request(
        &self,
        config: &RetrieverConfig,
        query: &str,
        options: &RetrieverOptions,
    ) -> anyhow::Result<SearchRequest> {
        let filters = SearchOptions::from_options(options).filters;

        let mut knn = KnnSearch {
            field: self.vector_field_name.clone(),
            k: self.k,
            num_candidates: self.num_candidates,
            similarity: self.similarity,
            filter: filters.clone(),
            ..Default::default()
        };
        match &self.query_vector_builder_model_id {
            Some(model_id) => {
                knn.query_vector_builder = Some(QueryVectorBuilder {
                    text_embedding: TextEmbedding {
                        model_id: model_id.clone(),
                        model_text: query.to_string(),
                    },
                });
            }
            None => knn.query_vector = Some(embed_query(config, query, options).await?),
        }

        let mut request = SearchRequest::default().knn(vec![knn]);
        if self.hybrid {
            request.query = Some(Query::boolean(
                BoolQuery::default()
                    .must(vec![Query::matching(&self.query_field_name, query)])
                    .filter(filters),
            ));
            if self.rrf {
                request.rank = Some(Rank {
                    rrf: Some(RrfRank {
                        rank_constant: self.rrf_rank_constant,
                        rank_window_size: self.rrf_window_size,
                    }),
                });
            }
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::search_mode::test_support::embedded;

    #[tokio::test]
    async fn test_knn_with_embedded_query() {
        let fixture = Approximate::default().vector_field_name("vector_field").k(5usize);

        let actual = fixture
            .build_request(&embedded(false), "test_query", &RetrieverOptions::default())
            .await
            .unwrap();

        let expected = SearchRequest::default().knn(vec![KnnSearch {
            field: "vector_field".to_string(),
            query_vector: Some(vec![0.1, 0.2]),
            k: Some(5),
            ..Default::default()
        }]);
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_hybrid_with_rrf() {
        let fixture = Approximate::default()
            .vector_field_name("vector_field")
            .query_field_name("text_field")
            .hybrid(true)
            .rrf(true)
            .rrf_rank_constant(60i64);
        let options = RetrieverOptions::default()
            .with_extension(SearchOptions::default().filters(vec![Query::term("lang", "en")]));

        let actual = fixture.build_request(&embedded(false), "test_query", &options).await.unwrap();

        let expected = json!({
            "knn": [{
                "field": "vector_field",
                "query_vector": [0.1f32, 0.2f32],
                "filter": [{"term": {"lang": "en"}}]
            }],
            "query": {
                "bool": {
                    "must": [{"match": {"text_field": {"query": "test_query"}}}],
                    "filter": [{"term": {"lang": "en"}}]
                }
            },
            "rank": {"rrf": {"rank_constant": 60}}
        });
        assert_eq!(serde_json::to_value(actual).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_rrf_needs_hybrid() {
        let fixture = Approximate::default().vector_field_name("v").rrf(true);

        let actual = fixture
            .build_request(&embedded(false), "q", &RetrieverOptions::default())
            .await
            .unwrap();

        assert_eq!(actual.rank, None);
        assert_eq!(actual.query, None);
    }

    #[tokio::test]
    async fn test_query_vector_builder_skips_embedding() {
        let fixture = Approximate::default()
            .vector_field_name("vector_field")
            .query_vector_builder_model_id("test_model");

        let actual = fixture
            .build_request(&RetrieverConfig::default(), "test_query", &RetrieverOptions::default())
            .await
            .unwrap();

        let expected = QueryVectorBuilder {
            text_embedding: TextEmbedding {
                model_id: "test_model".to_string(),
                model_text: "test_query".to_string(),
            },
        };
        assert_eq!(actual.knn[0].query_vector_builder, Some(expected));
        assert_eq!(actual.knn[0].query_vector, None);
    }

    #[tokio::test]
    async fn test_missing_embedder() {
        let actual = Approximate::default()
            .build_request(&RetrieverConfig::default(), "q", &RetrieverOptions::default())
            .await
            .unwrap_err();

        assert_eq!(actual.to_string(), "embedding not provided");
    }
}
