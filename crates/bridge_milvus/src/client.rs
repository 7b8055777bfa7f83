use crate::entity::{
    CreateCollectionRequest, CreateIndexRequest, HybridSearchRequest, IndexDescription, LoadState,
    QueryRequest, ResultSet, SearchIteratorRequest, SearchRequest, UpsertRequest, UpsertResult,
};

/// The subset of the Milvus API the indexer and retriever rely on.
#[async_trait::async_trait]
pub trait MilvusClient: Send + Sync {
    async fn has_collection(&self, collection: &str) -> anyhow::Result<bool>;

    async fn create_collection(&self, request: CreateCollectionRequest) -> anyhow::Result<()>;

    async fn get_load_state(&self, collection: &str) -> anyhow::Result<LoadState>;

    /// Loads the collection and waits until it is ready for search.
    async fn load_collection(&self, collection: &str) -> anyhow::Result<()>;

    /// Returns `None` when no index exists under `index_name`.
    async fn describe_index(
        &self,
        collection: &str,
        index_name: &str,
    ) -> anyhow::Result<Option<IndexDescription>>;

    /// Creates the index and waits for the request to be accepted.
    async fn create_index(&self, request: CreateIndexRequest) -> anyhow::Result<()>;

    async fn upsert(&self, request: UpsertRequest) -> anyhow::Result<UpsertResult>;

    /// One result set per query vector.
    async fn search(&self, request: SearchRequest) -> anyhow::Result<Vec<ResultSet>>;

    async fn hybrid_search(&self, request: HybridSearchRequest) -> anyhow::Result<Vec<ResultSet>>;

    async fn query(&self, request: QueryRequest) -> anyhow::Result<ResultSet>;

    async fn search_iterator(
        &self,
        request: SearchIteratorRequest,
    ) -> anyhow::Result<Box<dyn SearchIterator>>;
}

/// Cursor over the batches of a large search.
#[async_trait::async_trait]
pub trait SearchIterator: Send {
    /// Next batch, or `None` once the iterator is exhausted.
    async fn next(&mut self) -> anyhow::Result<Option<ResultSet>>;
}
