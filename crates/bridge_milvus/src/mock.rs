use std::collections::VecDeque;
use std::sync::Mutex;

use bridge_domain::Embedder;
use serde_json::Value;

use crate::client::{MilvusClient, SearchIterator};
use crate::entity::*;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    HasCollection(String),
    CreateCollection(CreateCollectionRequest),
    GetLoadState(String),
    LoadCollection(String),
    DescribeIndex(String, String),
    CreateIndex(CreateIndexRequest),
    Upsert(UpsertRequest),
    Search(SearchRequest),
    HybridSearch(HybridSearchRequest),
    Query(QueryRequest),
    SearchIterator(SearchIteratorRequest),
}

/// Records every request and answers from canned data.
#[derive(Debug)]
pub struct MockClient {
    has_collection: bool,
    load_state: LoadState,
    indexes: Vec<String>,
    results: Vec<ResultSet>,
    batches: Vec<ResultSet>,
    fail_with: Option<String>,
    calls: Mutex<Vec<Call>>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self {
            has_collection: false,
            load_state: LoadState::NotLoad,
            indexes: Vec::new(),
            results: Vec::new(),
            batches: Vec::new(),
            fail_with: None,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockClient {
    pub fn with_collection(mut self) -> Self {
        self.has_collection = true;
        self
    }

    pub fn with_load_state(mut self, state: LoadState) -> Self {
        self.load_state = state;
        self
    }

    pub fn with_index(mut self, field: &str) -> Self {
        self.indexes.push(field.to_string());
        self
    }

    /// Result sets returned by search, hybrid search and query.
    pub fn with_results(mut self, results: Vec<ResultSet>) -> Self {
        self.results = results;
        self
    }

    pub fn with_batches(mut self, batches: Vec<ResultSet>) -> Self {
        self.batches = batches;
        self
    }

    /// Makes every search style call fail.
    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_failure(&self) -> anyhow::Result<()> {
        match &self.fail_with {
            Some(message) => anyhow::bail!("{message}"),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl MilvusClient for MockClient {
    async fn has_collection(&self, collection: &str) -> anyhow::Result<bool> {
        self.record(Call::HasCollection(collection.to_string()));
        Ok(self.has_collection)
    }

    async fn create_collection(&self, request: CreateCollectionRequest) -> anyhow::Result<()> {
        self.record(Call::CreateCollection(request));
        Ok(())
    }

    async fn get_load_state(&self, collection: &str) -> anyhow::Result<LoadState> {
        self.record(Call::GetLoadState(collection.to_string()));
        Ok(self.load_state)
    }

    async fn load_collection(&self, collection: &str) -> anyhow::Result<()> {
        self.record(Call::LoadCollection(collection.to_string()));
        Ok(())
    }

    async fn describe_index(
        &self,
        collection: &str,
        index_name: &str,
    ) -> anyhow::Result<Option<IndexDescription>> {
        self.record(Call::DescribeIndex(collection.to_string(), index_name.to_string()));
        if self.indexes.iter().any(|index| index == index_name) {
            Ok(Some(IndexDescription {
                index_name: index_name.to_string(),
                field_name: index_name.to_string(),
                index_type: None,
            }))
        } else {
            anyhow::bail!("index not found")
        }
    }

    async fn create_index(&self, request: CreateIndexRequest) -> anyhow::Result<()> {
        self.record(Call::CreateIndex(request));
        Ok(())
    }

    async fn upsert(&self, request: UpsertRequest) -> anyhow::Result<UpsertResult> {
        let ids = request
            .columns
            .iter()
            .find(|column| column.name == "id")
            .map(|column| match &column.data {
                ColumnData::VarChar(ids) => ids.iter().cloned().map(Value::String).collect(),
                _ => Vec::new(),
            })
            .unwrap_or_default();
        self.record(Call::Upsert(request));
        Ok(UpsertResult { ids })
    }

    async fn search(&self, request: SearchRequest) -> anyhow::Result<Vec<ResultSet>> {
        self.record(Call::Search(request));
        self.check_failure()?;
        Ok(self.results.clone())
    }

    async fn hybrid_search(&self, request: HybridSearchRequest) -> anyhow::Result<Vec<ResultSet>> {
        self.record(Call::HybridSearch(request));
        self.check_failure()?;
        Ok(self.results.clone())
    }

    async fn query(&self, request: QueryRequest) -> anyhow::Result<ResultSet> {
        self.record(Call::Query(request));
        self.check_failure()?;
        Ok(self.results.first().cloned().unwrap_or_default())
    }

    async fn search_iterator(
        &self,
        request: SearchIteratorRequest,
    ) -> anyhow::Result<Box<dyn SearchIterator>> {
        self.record(Call::SearchIterator(request));
        self.check_failure()?;
        Ok(Box::new(MockIterator { batches: self.batches.clone().into() }))
    }
}

struct MockIterator {
    batches: VecDeque<ResultSet>,
}

#[async_trait::async_trait]
impl SearchIterator for MockIterator {
    async fn next(&mut self) -> anyhow::Result<Option<ResultSet>> {
        Ok(self.batches.pop_front())
    }
}

/// Returns `[1.0, i, i, ...]` for the i-th text.
pub struct MockEmbedder {
    dimension: usize,
    count: Option<usize>,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, count: None }
    }

    /// Returns exactly `count` vectors regardless of input.
    pub fn returning(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

#[async_trait::async_trait]
impl Embedder for MockEmbedder {
    async fn embed_strings(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f64>>> {
        let count = self.count.unwrap_or(texts.len());
        Ok((0..count)
            .map(|i| {
                (0..self.dimension)
                    .map(|j| if j == 0 { 1.0 } else { i as f64 })
                    .collect()
            })
            .collect())
    }
}

/// A result set with an `id` and `content` column plus scores.
pub fn result_set(rows: &[(&str, &str, f32)]) -> ResultSet {
    ResultSet {
        result_count: rows.len(),
        scores: rows.iter().map(|(_, _, score)| *score).collect(),
        fields: vec![
            ResultColumn::new("id", rows.iter().map(|(id, ..)| Value::from(*id)).collect()),
            ResultColumn::new(
                "content",
                rows.iter().map(|(_, content, _)| Value::from(*content)).collect(),
            ),
        ],
    }
}
