use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub const DEFAULT_COLLECTION: &str = "eino_collection";
pub const DEFAULT_DESCRIPTION: &str = "the collection for eino";
pub const DEFAULT_ID_FIELD: &str = "id";
pub const DEFAULT_CONTENT_FIELD: &str = "content";
pub const DEFAULT_METADATA_FIELD: &str = "metadata";
pub const DEFAULT_VECTOR_FIELD: &str = "vector";
pub const DEFAULT_SPARSE_VECTOR_FIELD: &str = "sparse_vector";
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_MAX_ID_LEN: usize = 255;
pub const DEFAULT_MAX_CONTENT_LEN: usize = 65535;

/// Similarity metric used by an index or a search.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum MetricType {
    L2,
    IP,
    Cosine,
    Hamming,
    Jaccard,
    Tanimoto,
    Substructure,
    Superstructure,
    BM25,
}

/// Read consistency requested from Milvus. `Default` leaves the choice to
/// the collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ConsistencyLevel {
    #[default]
    Default,
    Strong,
    Session,
    Bounded,
    Eventually,
}

impl ConsistencyLevel {
    /// The level to send, if any.
    pub fn requested(self) -> Option<ConsistencyLevel> {
        (self != ConsistencyLevel::Default).then_some(self)
    }
}

/// Kind of vector a hybrid sub-request targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorType {
    #[default]
    Dense,
    Sparse,
}

/// Where sparse vectors come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum SparseMethod {
    /// Milvus derives them server side with a BM25 function.
    Auto,
    /// Documents carry their own sparse vectors.
    Precomputed,
}
