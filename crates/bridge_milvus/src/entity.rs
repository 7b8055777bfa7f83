use std::collections::BTreeMap;

use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::Display;

use crate::{ConsistencyLevel, MetricType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum FieldType {
    Int64,
    VarChar,
    #[serde(rename = "JSON")]
    #[strum(serialize = "JSON")]
    Json,
    FloatVector,
    BinaryVector,
    SparseFloatVector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub data_type: FieldType,
    pub is_primary_key: bool,
    pub type_params: BTreeMap<String, String>,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: FieldType) -> Self {
        Self { name: name.into(), data_type, is_primary_key: false, type_params: BTreeMap::new() }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn max_length(self, max_length: usize) -> Self {
        self.type_param("max_length", max_length.to_string())
    }

    pub fn dim(self, dim: i64) -> Self {
        self.type_param("dim", dim.to_string())
    }

    pub fn type_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.type_params.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum FunctionType {
    BM25,
}

/// A server side function, e.g. BM25 deriving a sparse vector from text.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub function_type: FunctionType,
    pub input_fields: Vec<String>,
    pub output_fields: Vec<String>,
    pub params: BTreeMap<String, Value>,
}

impl Function {
    pub fn bm25(
        name: impl Into<String>,
        input_field: impl Into<String>,
        output_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            function_type: FunctionType::BM25,
            input_fields: vec![input_field.into()],
            output_fields: vec![output_field.into()],
            params: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub description: String,
    pub fields: Vec<Field>,
    pub functions: Vec<Function>,
    pub enable_dynamic_field: bool,
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateCollectionRequest {
    pub collection: String,
    pub schema: Schema,
    pub consistency_level: Option<ConsistencyLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NotExist,
    NotLoad,
    Loading,
    Loaded,
}

/// Index type plus build parameters, as produced by an index builder.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexParams {
    pub index_type: String,
    pub metric_type: MetricType,
    pub params: BTreeMap<String, Value>,
}

impl IndexParams {
    pub fn new(index_type: impl Into<String>, metric_type: MetricType) -> Self {
        Self { index_type: index_type.into(), metric_type, params: BTreeMap::new() }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexRequest {
    pub collection: String,
    pub field_name: String,
    pub index: IndexParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDescription {
    pub index_name: String,
    pub field_name: String,
    pub index_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseEmbedding {
    /// Strictly increasing dimension indices.
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    VarChar(Vec<String>),
    Json(Vec<Value>),
    FloatVector { dim: usize, rows: Vec<Vec<f32>> },
    SparseFloatVector(Vec<SparseEmbedding>),
}

/// Column based data for an insert or upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn var_char(name: impl Into<String>, values: Vec<String>) -> Self {
        Self { name: name.into(), data: ColumnData::VarChar(values) }
    }

    pub fn json(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self { name: name.into(), data: ColumnData::Json(values) }
    }

    pub fn float_vector(name: impl Into<String>, dim: usize, rows: Vec<Vec<f32>>) -> Self {
        Self { name: name.into(), data: ColumnData::FloatVector { dim, rows } }
    }

    pub fn sparse_vector(name: impl Into<String>, rows: Vec<SparseEmbedding>) -> Self {
        Self { name: name.into(), data: ColumnData::SparseFloatVector(rows) }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            ColumnData::VarChar(values) => values.len(),
            ColumnData::Json(values) => values.len(),
            ColumnData::FloatVector { rows, .. } => rows.len(),
            ColumnData::SparseFloatVector(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertRequest {
    pub collection: String,
    pub partition: Option<String>,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertResult {
    pub ids: Vec<Value>,
}

impl UpsertResult {
    pub fn ids_as_strings(&self) -> Vec<String> {
        self.ids
            .iter()
            .map(|id| match id {
                Value::String(id) => id.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

/// Query payload of a search: a dense vector or raw text for BM25.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    FloatVector(Vec<f32>),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grouping {
    pub group_by_field: String,
    pub group_size: usize,
    pub strict_group_size: bool,
}

impl Grouping {
    pub fn new(group_by_field: impl Into<String>, group_size: usize, strict: bool) -> Self {
        Self { group_by_field: group_by_field.into(), group_size, strict_group_size: strict }
    }
}

#[derive(Debug, Clone, PartialEq, Setters)]
#[setters(strip_option, into)]
pub struct SearchRequest {
    pub collection: String,
    pub limit: usize,
    pub data: Vec<QueryData>,
    pub anns_field: String,
    pub output_fields: Vec<String>,
    pub search_params: BTreeMap<String, String>,
    pub partitions: Vec<String>,
    pub filter: Option<String>,
    pub grouping: Option<Grouping>,
    pub consistency_level: Option<ConsistencyLevel>,
}

impl SearchRequest {
    pub fn new(collection: impl Into<String>, limit: usize, data: Vec<QueryData>) -> Self {
        Self {
            collection: collection.into(),
            limit,
            data,
            anns_field: String::new(),
            output_fields: Vec::new(),
            search_params: BTreeMap::new(),
            partitions: Vec::new(),
            filter: None,
            grouping: None,
            consistency_level: None,
        }
    }

    pub fn search_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.search_params.insert(key.into(), value.into());
        self
    }
}

/// One leg of a hybrid search.
#[derive(Debug, Clone, PartialEq, Setters)]
#[setters(strip_option, into)]
pub struct AnnRequest {
    pub anns_field: String,
    pub limit: usize,
    pub data: QueryData,
    pub search_params: BTreeMap<String, String>,
    pub filter: Option<String>,
    pub grouping: Option<Grouping>,
}

impl AnnRequest {
    pub fn new(anns_field: impl Into<String>, limit: usize, data: QueryData) -> Self {
        Self {
            anns_field: anns_field.into(),
            limit,
            data,
            search_params: BTreeMap::new(),
            filter: None,
            grouping: None,
        }
    }

    pub fn search_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.search_params.insert(key.into(), value.into());
        self
    }
}

/// Fuses the ranked lists of a hybrid search.
#[derive(Debug, Clone, PartialEq)]
pub enum Reranker {
    /// Reciprocal rank fusion with smoothing constant `k`.
    Rrf { k: f64 },
    /// Weighted score fusion, one weight per sub-request.
    Weighted { weights: Vec<f64> },
}

impl Reranker {
    pub fn rrf() -> Self {
        Self::Rrf { k: 60.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Setters)]
#[setters(strip_option, into)]
pub struct HybridSearchRequest {
    pub collection: String,
    pub limit: usize,
    pub requests: Vec<AnnRequest>,
    pub reranker: Reranker,
    pub output_fields: Vec<String>,
    pub partitions: Vec<String>,
    pub consistency_level: Option<ConsistencyLevel>,
}

impl HybridSearchRequest {
    pub fn new(
        collection: impl Into<String>,
        limit: usize,
        requests: Vec<AnnRequest>,
        reranker: Reranker,
    ) -> Self {
        Self {
            collection: collection.into(),
            limit,
            requests,
            reranker,
            output_fields: Vec::new(),
            partitions: Vec::new(),
            consistency_level: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Setters)]
#[setters(strip_option, into)]
pub struct QueryRequest {
    pub collection: String,
    pub filter: String,
    pub output_fields: Vec<String>,
    pub limit: usize,
    pub partitions: Vec<String>,
    pub consistency_level: Option<ConsistencyLevel>,
}

impl QueryRequest {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filter: String::new(),
            output_fields: Vec::new(),
            limit: 0,
            partitions: Vec::new(),
            consistency_level: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Setters)]
#[setters(strip_option, into)]
pub struct SearchIteratorRequest {
    pub collection: String,
    pub data: QueryData,
    pub anns_field: String,
    pub batch_size: usize,
    /// Total number of hits to return across all batches.
    pub iterator_limit: usize,
    pub output_fields: Vec<String>,
    pub search_params: BTreeMap<String, String>,
    pub partitions: Vec<String>,
    pub filter: Option<String>,
    pub grouping: Option<Grouping>,
    pub consistency_level: Option<ConsistencyLevel>,
}

impl SearchIteratorRequest {
    pub fn new(collection: impl Into<String>, data: QueryData) -> Self {
        Self {
            collection: collection.into(),
            data,
            anns_field: String::new(),
            batch_size: 0,
            iterator_limit: 0,
            output_fields: Vec::new(),
            search_params: BTreeMap::new(),
            partitions: Vec::new(),
            filter: None,
            grouping: None,
            consistency_level: None,
        }
    }

    pub fn search_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.search_params.insert(key.into(), value.into());
        self
    }
}

/// Values of one output field across the rows of a result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultColumn {
    pub name: String,
    pub values: Vec<Value>,
}

impl ResultColumn {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self { name: name.into(), values }
    }

    pub fn get(&self, row: usize) -> Option<&Value> {
        self.values.get(row)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub result_count: usize,
    pub scores: Vec<f32>,
    pub fields: Vec<ResultColumn>,
}
