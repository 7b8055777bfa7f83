//! Typed subset of the Elasticsearch query DSL.
//!
//! Only the clauses the search modes build are modelled. Anything else a
//! caller sends, for example through a raw request or a filter, survives in
//! the flattened `extra` maps.

use std::collections::BTreeMap;

use derive_setters::Setters;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Body of a `_search` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct SearchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub knn: Vec<KnnSearch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<Rank>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    #[serde(flatten)]
    #[setters(skip)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(rename = "bool", default, skip_serializing_if = "Option::is_none")]
    pub bool_query: Option<BoolQuery>,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_query: Option<BTreeMap<String, MatchQuery>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_all: Option<MatchAllQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_score: Option<Box<ScriptScoreQuery>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse_vector: Option<SparseVectorQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_expansion: Option<BTreeMap<String, TextExpansionQuery>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<BTreeMap<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Query {
    pub fn match_all() -> Self {
        Self { match_all: Some(MatchAllQuery::default()), ..Default::default() }
    }

    pub fn matching(field: impl Into<String>, text: impl Into<String>) -> Self {
        let clause = MatchQuery { query: text.into(), options: Map::new() };
        Self { match_query: Some(BTreeMap::from([(field.into(), clause)])), ..Default::default() }
    }

    pub fn boolean(query: BoolQuery) -> Self {
        Self { bool_query: Some(query), ..Default::default() }
    }

    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { term: Some(BTreeMap::from([(field.into(), value.into())])), ..Default::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct BoolQuery {
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<Query>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<Query>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<Query>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<Query>,
}

/// Full text match. Accepts the `{"field": "text"}` shorthand on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MatchQueryRepr")]
pub struct MatchQuery {
    pub query: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MatchQueryRepr {
    Short(String),
    Full {
        query: String,
        #[serde(flatten)]
        options: Map<String, Value>,
    },
}

impl From<MatchQueryRepr> for MatchQuery {
    fn from(repr: MatchQueryRepr) -> Self {
        match repr {
            MatchQueryRepr::Short(query) => Self { query, options: Map::new() },
            MatchQueryRepr::Full { query, options } => Self { query, options },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchAllQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptScoreQuery {
    pub query: Query,
    pub script: Script,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub source: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct KnnSearch {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_vector_builder: Option<QueryVectorBuilder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_candidates: Option<usize>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<Query>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

/// Lets the cluster embed the query text with a deployed model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryVectorBuilder {
    pub text_embedding: TextEmbedding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEmbedding {
    pub model_id: String,
    pub model_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rank {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rrf: Option<RrfRank>,
}

/// Reciprocal rank fusion of the knn and query result lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RrfRank {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_constant: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_window_size: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct SparseVectorQuery {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_vector: Option<BTreeMap<String, f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextExpansionQuery {
    pub model_id: String,
    pub model_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub took: Option<u64>,
    #[serde(default)]
    pub hits: HitsMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HitsMetadata {
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Hit {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(rename = "_score", default)]
    pub score: Option<f64>,
    #[serde(rename = "_source", default)]
    pub source: Option<Value>,
}

/// Elasticsearch accepts a lone object wherever a list of clauses goes.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_serialization_skips_unset_clauses() {
        let fixture = SearchRequest::default()
            .query(Query::boolean(
                BoolQuery::default()
                    .must(vec![Query::matching("content", "rust")])
                    .filter(vec![Query::term("lang", "en")]),
            ))
            .size(5usize);

        let actual = serde_json::to_value(&fixture).unwrap();

        let expected = json!({
            "query": {
                "bool": {
                    "must": [{"match": {"content": {"query": "rust"}}}],
                    "filter": [{"term": {"lang": "en"}}]
                }
            },
            "size": 5
        });
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_match_all_serializes_as_empty_object() {
        let actual = serde_json::to_value(Query::match_all()).unwrap();
        assert_eq!(actual, json!({"match_all": {}}));
    }

    #[test]
    fn test_deserialize_accepts_shorthands_and_unknown_clauses() {
        let fixture = json!({
            "query": {
                "bool": {
                    "must": {"match": {"title": "hello"}},
                    "filter": [{"terms": {"tag": ["a", "b"]}}]
                }
            },
            "knn": {"field": "vec", "query_vector": [0.5], "k": 3},
            "_source": false
        });

        let actual: SearchRequest = serde_json::from_value(fixture).unwrap();

        let bool_query = actual.query.as_ref().and_then(|q| q.bool_query.as_ref()).unwrap();
        assert_eq!(bool_query.must, vec![Query::matching("title", "hello")]);
        assert_eq!(bool_query.filter[0].extra.get("terms"), Some(&json!({"tag": ["a", "b"]})));
        assert_eq!(actual.knn.len(), 1);
        assert_eq!(actual.knn[0].k, Some(3));
        assert_eq!(actual.extra.get("_source"), Some(&json!(false)));
    }

    #[test]
    fn test_hit_deserialization() {
        let fixture = json!({"_index": "docs", "_id": "1", "_score": 1.5, "_source": {"content": "x"}});

        let actual: Hit = serde_json::from_value(fixture).unwrap();

        let expected = Hit {
            index: "docs".to_string(),
            id: Some("1".to_string()),
            score: Some(1.5),
            source: Some(json!({"content": "x"})),
        };
        assert_eq!(actual, expected);
    }
}
