use std::collections::BTreeMap;

use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A unit of content moved between indexers, retrievers and the stores
/// behind them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Similarity score assigned by the store that returned this document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dense_vector: Option<Vec<f64>>,
    /// Dimension index to weight. Indices are signed so that invalid input
    /// can be reported instead of silently wrapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse_vector: Option<BTreeMap<i64, f64>>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { id: id.into(), content: content.into(), ..Default::default() }
    }

    pub fn insert_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
