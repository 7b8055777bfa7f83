use anyhow::Context as _;
use bridge_domain::RetrieverOptions;
use serde_json::{Map, json};

use super::{SearchMode, embed_query};
use crate::request::{BoolQuery, Query, Script, ScriptScoreQuery, SearchRequest};
use crate::retriever::{RetrieverConfig, SearchOptions};

/// Painless vector function used to score each document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityType {
    CosineSimilarity,
    DotProduct,
    L1Norm,
    L2Norm,
}

impl SimilarityType {
    /// Script source over `params.embedding` and `field`. Every variant keeps
    /// the score non negative, which `script_score` requires.
    fn script_source(self, field: &str) -> String {
        match self {
            Self::CosineSimilarity => format!("cosineSimilarity(params.embedding, '{field}') + 1.0"),
            Self::DotProduct => format!(
                "double value = dotProduct(params.embedding, '{field}'); return sigmoid(1, Math.E, -value);"
            ),
            Self::L1Norm => format!("1 / (1 + l1norm(params.embedding, '{field}'))"),
            Self::L2Norm => format!("1 / (1 + l2norm(params.embedding, '{field}'))"),
        }
    }
}

/// Brute force `script_score` over every document matching the filters.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseVectorSimilarity {
    pub similarity: SimilarityType,
    pub field: String,
}

impl DenseVectorSimilarity {
    pub fn new(similarity: SimilarityType, field: impl Into<String>) -> Self {
        Self { similarity, field: field.into() }
    }
}

#[async_trait::async_trait]
impl SearchMode for DenseVectorSimilarity {
    async fn build_request(
        &self,
        config: &RetrieverConfig,
        query: &str,
        options: &RetrieverOptions,
    ) -> anyhow::Result<SearchRequest> {
        let vector = embed_query(config, query, options)
            .await
            .with_context(|| "[DenseVectorSimilarity] failed to embed query")?;
        let filters = SearchOptions::from_options(options).filters;

        let inner = if filters.is_empty() {
            Query::match_all()
        } else {
            Query::boolean(BoolQuery::default().filter(filters))
        };
        let script = Script {
            source: self.similarity.script_source(&self.field),
            params: Map::from_iter([("embedding".to_string(), json!(vector))]),
        };
        let script_score = ScriptScoreQuery { query: inner, script, min_score: None };

        Ok(SearchRequest::default()
            .query(Query { script_score: Some(Box::new(script_score)), ..Default::default() }))
    }
}
