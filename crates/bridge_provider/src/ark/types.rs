use std::collections::BTreeMap;

use derive_setters::Setters;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
pub const DEFAULT_REGION: &str = "cn-beijing";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingType {
    Enabled,
    Disabled,
    Auto,
}

/// Deep thinking switch, sent as `{"type": ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thinking {
    #[serde(rename = "type")]
    pub thinking_type: ThinkingType,
}

impl Thinking {
    pub fn new(thinking_type: ThinkingType) -> Self {
        Self { thinking_type }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTier {
    Auto,
    Default,
}

/// Server side session cache of the Responses API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Setters)]
#[serde(default)]
pub struct SessionCacheConfig {
    /// Stores each turn so the next call can continue from its response id
    /// instead of resending the history.
    pub enable_cache: bool,
    /// Lifetime of the cached turn in seconds, at most three days.
    pub ttl: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebSearchSource {
    Toutiao,
    Douyin,
    Moji,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct UserLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Built in web search tool of the Responses API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct ToolWebSearch {
    /// Results per search round, 1 to 50.
    pub limit: Option<i64>,
    pub user_location: Option<UserLocation>,
    pub sources: Vec<WebSearchSource>,
    /// Keywords searched in parallel per round, 1 to 50.
    pub max_keyword: Option<i32>,
}

/// Per call cache selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Setters)]
#[setters(strip_option, into)]
pub struct CacheOption {
    /// Id of a context created by the legacy context API. Takes precedence
    /// over response ids.
    pub context_id: Option<String>,
    /// Response id to continue from when no cached message is found in the
    /// input.
    pub head_previous_response_id: Option<String>,
    /// Overrides the configured session cache.
    pub session_cache: Option<SessionCacheConfig>,
}

/// Per call options read from `ChatOptions` extensions by both Ark models.
#[derive(Debug, Clone, Default, PartialEq, Eq, Setters)]
#[setters(strip_option, into)]
pub struct ArkOptions {
    /// Added to the configured custom headers, winning on conflicts.
    pub custom_headers: BTreeMap<String, String>,
    pub thinking: Option<Thinking>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub web_search: Option<ToolWebSearch>,
    pub max_tool_calls: Option<i64>,
    pub cache: Option<CacheOption>,
}

pub(crate) fn merged_headers(
    configured: &BTreeMap<String, String>,
    options: Option<&ArkOptions>,
) -> Vec<(String, String)> {
    let mut headers = configured.clone();
    if let Some(options) = options {
        headers.extend(options.custom_headers.clone());
    }
    headers.into_iter().collect()
}
