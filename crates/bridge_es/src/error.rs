#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("[Indexer.Store] bulk index of document {id} failed [{status}]: {reason}")]
    BulkItem { id: String, status: u16, reason: String },

    #[error("field '{field}' not found in hit")]
    MissingHitField { field: &'static str },

    #[error("no Elasticsearch address configured")]
    NoAddress,
}
