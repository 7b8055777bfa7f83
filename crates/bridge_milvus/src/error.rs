#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("[NewRetriever] collection {0:?} not found")]
    CollectionNotFound(String),

    #[error("milvus returned code {code}: {message}")]
    Server { code: i64, message: String },

    #[error("embedding is required for {0} search")]
    EmbeddingRequired(&'static str),

    #[error("[Indexer.Store] embedding result length mismatch: need {expected}, got {actual}")]
    EmbeddingCountMismatch { expected: usize, actual: usize },
}
