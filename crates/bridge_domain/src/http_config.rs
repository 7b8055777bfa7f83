use derive_setters::Setters;
use serde::{Deserialize, Serialize};

/// Connection settings for the shared HTTP client. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[serde(rename_all = "camelCase")]
#[setters(into)]
pub struct HttpConfig {
    pub connect_timeout: u64,
    pub read_timeout: u64,
    pub pool_idle_timeout: u64,
    pub pool_max_idle_per_host: usize,
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 30,
            read_timeout: 900, // 15 minutes, long generations stream for a while
            pool_idle_timeout: 90,
            pool_max_idle_per_host: 5,
            max_redirects: 10,
        }
    }
}
