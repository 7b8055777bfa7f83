use bridge_domain::RetrieverOptions;

use super::SearchMode;
use crate::request::{Query, SearchRequest};
use crate::retriever::RetrieverConfig;

/// Full text `match` on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct ExactMatch {
    pub field: String,
}

impl ExactMatch {
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }
}

#[async_trait::async_trait]
impl SearchMode for ExactMatch {
    async fn build_request(
        &self,
        _config: &RetrieverConfig,
        query: &str,
        _options: &RetrieverOptions,
    ) -> anyhow::Result<SearchRequest> {
        Ok(SearchRequest::default().query(Query::matching(&self.field, query)))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_match_on_field() {
        let actual = ExactMatch::new("test_field")
            .build_request(&RetrieverConfig::default(), "test_query", &RetrieverOptions::default())
            .await
            .unwrap();

        let expected = json!({"query": {"match": {"test_field": {"query": "test_query"}}}});
        assert_eq!(serde_json::to_value(actual).unwrap(), expected);
    }
}
