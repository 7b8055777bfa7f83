use std::collections::BTreeMap;

use bridge_domain::RetrieverOptions;

use super::SearchMode;
use crate::request::{BoolQuery, Query, SearchRequest, TextExpansionQuery};
use crate::retriever::{RetrieverConfig, SearchOptions};

/// `text_expansion` against the `<field>.tokens` rank features written by
/// an ELSER style model.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseVectorTextExpansion {
    pub model_id: String,
    pub field: String,
}

impl SparseVectorTextExpansion {
    pub fn new(model_id: impl Into<String>, field: impl Into<String>) -> Self {
        Self { model_id: model_id.into(), field: field.into() }
    }
}

#[async_trait::async_trait]
impl SearchMode for SparseVectorTextExpansion {
    async fn build_request(
        &self,
        _config: &RetrieverConfig,
        query: &str,
        options: &RetrieverOptions,
    ) -> anyhow::Result<SearchRequest> {
        let expansion = TextExpansionQuery {
            model_id: self.model_id.clone(),
            model_text: query.to_string(),
        };
        let must = Query {
            text_expansion: Some(BTreeMap::from([(format!("{}.tokens", self.field), expansion)])),
            ..Default::default()
        };
        let filters = SearchOptions::from_options(options).filters;

        Ok(SearchRequest::default()
            .query(Query::boolean(BoolQuery::default().must(vec![must]).filter(filters))))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_text_expansion_on_tokens_field() {
        let actual = SparseVectorTextExpansion::new("model_id", "vector_field")
            .build_request(&RetrieverConfig::default(), "test query", &RetrieverOptions::default())
            .await
            .unwrap();

        let expected = json!({
            "query": {
                "bool": {
                    "must": [{
                        "text_expansion": {
                            "vector_field.tokens": {"model_id": "model_id", "model_text": "test query"}
                        }
                    }]
                }
            }
        });
        assert_eq!(serde_json::to_value(actual).unwrap(), expected);
    }
}
