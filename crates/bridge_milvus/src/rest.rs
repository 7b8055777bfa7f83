use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use bridge_domain::{HttpConfig, HttpInfra, create_headers, format_http_context, join_url, read_json};
use bridge_infra::BridgeHttpService;
use derive_setters::Setters;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::client::{MilvusClient, SearchIterator};
use crate::entity::{
    Column, ColumnData, CreateCollectionRequest, CreateIndexRequest, Grouping,
    HybridSearchRequest, IndexDescription, LoadState, QueryData, QueryRequest, Reranker,
    ResultColumn, ResultSet, SearchIteratorRequest, SearchRequest, UpsertRequest, UpsertResult,
};
use crate::error::Error;

/// Milvus caps `offset + limit` of a single search at this value.
const MAX_SEARCH_WINDOW: usize = 16384;

/// Connection settings for the Milvus REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[serde(rename_all = "camelCase")]
#[setters(strip_option, into)]
pub struct ClientConfig {
    /// Base address, e.g. `http://localhost:19530`.
    pub address: String,
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db_name: Option<String>,
    #[serde(default)]
    pub http: HttpConfig,
    pub load_poll_interval_ms: u64,
    pub load_timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: None,
            username: None,
            password: None,
            db_name: None,
            http: HttpConfig::default(),
            load_poll_interval_ms: 500,
            load_timeout_secs: 300,
        }
    }

    fn bearer(&self) -> Option<String> {
        if let Some(token) = &self.token {
            return Some(token.clone());
        }
        match (&self.username, &self.password) {
            (Some(user), Some(password)) => Some(format!("{user}:{password}")),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

/// [`MilvusClient`] speaking the Milvus v2 REST API.
pub struct RestClient<H> {
    http: Arc<H>,
    config: Arc<ClientConfig>,
}

impl<H> Clone for RestClient<H> {
    fn clone(&self) -> Self {
        Self { http: self.http.clone(), config: self.config.clone() }
    }
}

impl RestClient<BridgeHttpService> {
    pub fn connect(config: ClientConfig) -> anyhow::Result<Self> {
        let http = BridgeHttpService::new(&config.http)?;
        Ok(Self::new(Arc::new(http), config))
    }
}

impl<H: HttpInfra> RestClient<H> {
    pub fn new(http: Arc<H>, config: ClientConfig) -> Self {
        Self { http, config: Arc::new(config) }
    }

    fn headers(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = vec![(CONTENT_TYPE.to_string(), "application/json".to_string())];
        if let Some(bearer) = self.config.bearer() {
            headers.push((AUTHORIZATION.to_string(), format!("Bearer {bearer}")));
        }
        create_headers(headers)
    }

    async fn send(&self, path: &str, mut body: Value) -> anyhow::Result<Reply> {
        if let (Some(db_name), Some(object)) = (&self.config.db_name, body.as_object_mut()) {
            object.insert("dbName".into(), json!(db_name));
        }

        let url = join_url(&self.config.address, path)?;
        debug!(url = %url, "Calling Milvus");

        let bytes = serde_json::to_vec(&body).with_context(|| "Failed to serialize request")?;
        let response = self
            .http
            .http_post(&url, Some(self.headers()?), bytes.into())
            .await
            .with_context(|| format_http_context(None, "POST", &url))?;

        read_json(response, "POST", &url).await
    }

    /// Sends the request and returns `data`, failing on a non zero `code`.
    async fn call(&self, path: &str, body: Value) -> anyhow::Result<Value> {
        let reply = self.send(path, body).await?;
        if reply.code != 0 {
            return Err(Error::Server { code: reply.code, message: reply.message })
                .with_context(|| format!("Milvus call {path} failed"));
        }
        Ok(reply.data)
    }

    async fn search_rows(&self, body: Value) -> anyhow::Result<ResultSet> {
        let data = self.call("/v2/vectordb/entities/search", body).await?;
        rows_to_result_set(data, true)
    }
}

#[async_trait::async_trait]
impl<H: HttpInfra> MilvusClient for RestClient<H> {
    async fn has_collection(&self, collection: &str) -> anyhow::Result<bool> {
        let data = self
            .call("/v2/vectordb/collections/has", json!({"collectionName": collection}))
            .await?;
        Ok(data.get("has").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn create_collection(&self, request: CreateCollectionRequest) -> anyhow::Result<()> {
        let fields = request
            .schema
            .fields
            .iter()
            .map(|field| {
                let params = field
                    .type_params
                    .iter()
                    .map(|(key, value)| (key.clone(), typed_param(value)))
                    .collect::<Map<_, _>>();
                let mut value = json!({
                    "fieldName": field.name,
                    "dataType": field.data_type.to_string(),
                    "isPrimary": field.is_primary_key,
                });
                if !params.is_empty() {
                    value["elementTypeParams"] = Value::Object(params);
                }
                value
            })
            .collect::<Vec<_>>();

        let functions = request
            .schema
            .functions
            .iter()
            .map(|function| {
                json!({
                    "name": function.name,
                    "type": function.function_type.to_string(),
                    "inputFieldNames": function.input_fields,
                    "outputFieldNames": function.output_fields,
                    "params": function.params,
                })
            })
            .collect::<Vec<_>>();

        let mut body = json!({
            "collectionName": request.collection,
            "description": request.schema.description,
            "schema": {
                "autoId": false,
                "enableDynamicField": request.schema.enable_dynamic_field,
                "fields": fields,
            },
        });
        if !functions.is_empty() {
            body["schema"]["functions"] = json!(functions);
        }
        if let Some(level) = request.consistency_level {
            body["params"] = json!({"consistencyLevel": level.to_string()});
        }

        self.call("/v2/vectordb/collections/create", body).await?;
        Ok(())
    }

    async fn get_load_state(&self, collection: &str) -> anyhow::Result<LoadState> {
        let data = self
            .call(
                "/v2/vectordb/collections/get_load_state",
                json!({"collectionName": collection}),
            )
            .await?;
        let state = data.get("loadState").and_then(Value::as_str).unwrap_or_default();
        Ok(match state {
            "LoadStateLoaded" => LoadState::Loaded,
            "LoadStateLoading" => LoadState::Loading,
            "LoadStateNotExist" => LoadState::NotExist,
            _ => LoadState::NotLoad,
        })
    }

    async fn load_collection(&self, collection: &str) -> anyhow::Result<()> {
        self.call("/v2/vectordb/collections/load", json!({"collectionName": collection}))
            .await?;

        let interval = Duration::from_millis(self.config.load_poll_interval_ms);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.load_timeout_secs);
        loop {
            if self.get_load_state(collection).await? == LoadState::Loaded {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("timed out waiting for collection {collection:?} to load");
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn describe_index(
        &self,
        collection: &str,
        index_name: &str,
    ) -> anyhow::Result<Option<IndexDescription>> {
        let reply = self
            .send(
                "/v2/vectordb/indexes/describe",
                json!({"collectionName": collection, "indexName": index_name}),
            )
            .await?;
        if reply.code != 0 {
            debug!(code = reply.code, message = %reply.message, index = %index_name, "Index not found");
            return Ok(None);
        }

        let first = match reply.data {
            Value::Array(items) => items.into_iter().next(),
            Value::Null => None,
            other => Some(other),
        };
        Ok(first.map(|item| IndexDescription {
            index_name: string_field(&item, "indexName").unwrap_or_else(|| index_name.to_string()),
            field_name: string_field(&item, "fieldName").unwrap_or_default(),
            index_type: string_field(&item, "indexType"),
        }))
    }

    async fn create_index(&self, request: CreateIndexRequest) -> anyhow::Result<()> {
        let mut params = Map::new();
        params.insert("index_type".into(), json!(request.index.index_type));
        params.extend(request.index.params.clone());

        let body = json!({
            "collectionName": request.collection,
            "indexParams": [{
                "fieldName": request.field_name,
                "indexName": request.field_name,
                "metricType": request.index.metric_type.to_string(),
                "params": params,
            }],
        });
        self.call("/v2/vectordb/indexes/create", body).await?;
        Ok(())
    }

    async fn upsert(&self, request: UpsertRequest) -> anyhow::Result<UpsertResult> {
        let rows = columns_to_rows(&request.columns)?;
        let mut body = json!({"collectionName": request.collection, "data": rows});
        if let Some(partition) = request.partition {
            body["partitionName"] = json!(partition);
        }

        let data = self.call("/v2/vectordb/entities/upsert", body).await?;
        let ids = data
            .get("upsertIds")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(UpsertResult { ids })
    }

    async fn search(&self, request: SearchRequest) -> anyhow::Result<Vec<ResultSet>> {
        let mut body = json!({
            "collectionName": request.collection,
            "data": request.data.iter().map(query_data).collect::<Vec<_>>(),
            "annsField": request.anns_field,
            "limit": request.limit,
            "outputFields": request.output_fields,
            "searchParams": search_params(&request.search_params),
        });
        apply_common(
            &mut body,
            &request.partitions,
            request.filter.as_deref(),
            request.grouping.as_ref(),
        );
        if let Some(level) = request.consistency_level {
            body["consistencyLevel"] = json!(level.to_string());
        }

        Ok(vec![self.search_rows(body).await?])
    }

    async fn hybrid_search(&self, request: HybridSearchRequest) -> anyhow::Result<Vec<ResultSet>> {
        let searches = request
            .requests
            .iter()
            .map(|ann| {
                let mut search = json!({
                    "data": [query_data(&ann.data)],
                    "annsField": ann.anns_field,
                    "limit": ann.limit,
                    "searchParams": search_params(&ann.search_params),
                });
                apply_common(&mut search, &[], ann.filter.as_deref(), ann.grouping.as_ref());
                search
            })
            .collect::<Vec<_>>();

        let rerank = match &request.reranker {
            Reranker::Rrf { k } => json!({"strategy": "rrf", "params": {"k": k}}),
            Reranker::Weighted { weights } => {
                json!({"strategy": "weighted", "params": {"weights": weights}})
            }
        };

        let mut body = json!({
            "collectionName": request.collection,
            "search": searches,
            "rerank": rerank,
            "limit": request.limit,
            "outputFields": request.output_fields,
        });
        apply_common(&mut body, &request.partitions, None, None);
        if let Some(level) = request.consistency_level {
            body["consistencyLevel"] = json!(level.to_string());
        }

        let data = self.call("/v2/vectordb/entities/hybrid_search", body).await?;
        Ok(vec![rows_to_result_set(data, true)?])
    }

    async fn query(&self, request: QueryRequest) -> anyhow::Result<ResultSet> {
        let mut body = json!({
            "collectionName": request.collection,
            "filter": request.filter,
            "outputFields": request.output_fields,
            "limit": request.limit,
        });
        apply_common(&mut body, &request.partitions, None, None);
        if let Some(level) = request.consistency_level {
            body["consistencyLevel"] = json!(level.to_string());
        }

        let data = self.call("/v2/vectordb/entities/query", body).await?;
        rows_to_result_set(data, false)
    }

    async fn search_iterator(
        &self,
        request: SearchIteratorRequest,
    ) -> anyhow::Result<Box<dyn SearchIterator>> {
        if request.batch_size == 0 {
            anyhow::bail!("search iterator batch size must be positive");
        }
        Ok(Box::new(RestSearchIterator {
            client: self.clone(),
            request,
            fetched: 0,
            done: false,
        }))
    }
}

/// Pages through a search with `offset` and `limit`.
struct RestSearchIterator<H> {
    client: RestClient<H>,
    request: SearchIteratorRequest,
    fetched: usize,
    done: bool,
}

impl<H> RestSearchIterator<H> {
    fn remaining(&self) -> usize {
        let limit = match self.request.iterator_limit {
            0 => MAX_SEARCH_WINDOW,
            limit => limit.min(MAX_SEARCH_WINDOW),
        };
        limit.saturating_sub(self.fetched)
    }
}

#[async_trait::async_trait]
impl<H: HttpInfra> SearchIterator for RestSearchIterator<H> {
    async fn next(&mut self) -> anyhow::Result<Option<ResultSet>> {
        let batch = self.request.batch_size.min(self.remaining());
        if self.done || batch == 0 {
            return Ok(None);
        }

        let request = &self.request;
        let mut body = json!({
            "collectionName": request.collection,
            "data": [query_data(&request.data)],
            "annsField": request.anns_field,
            "limit": batch,
            "offset": self.fetched,
            "outputFields": request.output_fields,
            "searchParams": search_params(&request.search_params),
        });
        apply_common(
            &mut body,
            &request.partitions,
            request.filter.as_deref(),
            request.grouping.as_ref(),
        );
        if let Some(level) = request.consistency_level {
            body["consistencyLevel"] = json!(level.to_string());
        }

        let result = self.client.search_rows(body).await?;
        if result.result_count < batch {
            self.done = true;
        }
        if result.result_count == 0 {
            return Ok(None);
        }
        self.fetched += result.result_count;
        Ok(Some(result))
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Milvus params are strings on the SDK side but typed in REST payloads.
fn typed_param(value: &str) -> Value {
    if let Ok(int) = value.parse::<i64>() {
        return json!(int);
    }
    if let Some(float) = value.parse::<f64>().ok().filter(|f| f.is_finite()) {
        return json!(float);
    }
    if let Ok(flag) = value.parse::<bool>() {
        return json!(flag);
    }
    json!(value)
}

fn search_params(params: &BTreeMap<String, String>) -> Value {
    let mut result = Map::new();
    let mut inner = Map::new();
    for (key, value) in params {
        if key == "metric_type" {
            result.insert("metricType".into(), json!(value));
        } else {
            inner.insert(key.clone(), typed_param(value));
        }
    }
    if !inner.is_empty() {
        result.insert("params".into(), Value::Object(inner));
    }
    Value::Object(result)
}

fn query_data(data: &QueryData) -> Value {
    match data {
        QueryData::FloatVector(vector) => json!(vector),
        QueryData::Text(text) => json!(text),
    }
}

fn apply_common(
    body: &mut Value,
    partitions: &[String],
    filter: Option<&str>,
    grouping: Option<&Grouping>,
) {
    if !partitions.is_empty() {
        body["partitionNames"] = json!(partitions);
    }
    if let Some(filter) = filter {
        body["filter"] = json!(filter);
    }
    if let Some(grouping) = grouping {
        body["groupingField"] = json!(grouping.group_by_field);
        body["groupSize"] = json!(grouping.group_size);
        if grouping.strict_group_size {
            body["strictGroupSize"] = json!(true);
        }
    }
}

fn columns_to_rows(columns: &[Column]) -> anyhow::Result<Vec<Value>> {
    let Some(first) = columns.first() else {
        return Ok(Vec::new());
    };
    let count = first.len();
    if let Some(column) = columns.iter().find(|column| column.len() != count) {
        anyhow::bail!(
            "column {} has {} rows, expected {count}",
            column.name,
            column.len()
        );
    }

    let rows = (0..count)
        .map(|row| {
            let object = columns
                .iter()
                .map(|column| {
                    let value = match &column.data {
                        ColumnData::VarChar(values) => json!(values[row]),
                        ColumnData::Json(values) => values[row].clone(),
                        ColumnData::FloatVector { rows, .. } => json!(rows[row]),
                        ColumnData::SparseFloatVector(rows) => {
                            let sparse = &rows[row];
                            Value::Object(
                                sparse
                                    .indices
                                    .iter()
                                    .zip(&sparse.values)
                                    .map(|(index, weight)| (index.to_string(), json!(weight)))
                                    .collect(),
                            )
                        }
                    };
                    (column.name.clone(), value)
                })
                .collect::<Map<_, _>>();
            Value::Object(object)
        })
        .collect();
    Ok(rows)
}

/// Rebuilds column oriented results from the rows REST returns. With
/// `scored`, each row's `distance` becomes the score.
fn rows_to_result_set(data: Value, scored: bool) -> anyhow::Result<ResultSet> {
    let rows = match data {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        other => anyhow::bail!("unexpected result payload: {other}"),
    };

    let mut names: Vec<String> = Vec::new();
    for row in &rows {
        if let Value::Object(object) = row {
            for key in object.keys() {
                if !(scored && key == "distance") && !names.contains(key) {
                    names.push(key.clone());
                }
            }
        }
    }

    let scores = if scored {
        rows.iter()
            .map(|row| row.get("distance").and_then(Value::as_f64).unwrap_or_default() as f32)
            .collect()
    } else {
        Vec::new()
    };

    let fields = names
        .into_iter()
        .map(|name| {
            let values = rows
                .iter()
                .map(|row| row.get(&name).cloned().unwrap_or(Value::Null))
                .collect();
            ResultColumn::new(name, values)
        })
        .collect();

    Ok(ResultSet { result_count: rows.len(), scores, fields })
}
