use anyhow::Context as _;
use bridge_domain::RetrieverOptions;

use super::SearchMode;
use crate::request::SearchRequest;
use crate::retriever::RetrieverConfig;

/// Treats the query string as a complete `_search` body.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawStringRequest;

#[async_trait::async_trait]
impl SearchMode for RawStringRequest {
    async fn build_request(
        &self,
        _config: &RetrieverConfig,
        query: &str,
        _options: &RetrieverOptions,
    ) -> anyhow::Result<SearchRequest> {
        serde_json::from_str(query).with_context(|| "failed to parse raw search request")
    }
}
