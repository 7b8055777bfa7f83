use derive_setters::Setters;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Setters, PartialEq)]
#[setters(into)]
pub struct RetryConfig {
    /// Delay in milliseconds before the first retry, grown by
    /// `backoff_factor` for each further one
    pub min_delay_ms: u64,

    /// Backoff multiplication factor for each retry attempt
    pub backoff_factor: u64,

    /// Maximum number of retry attempts
    pub max_retry_attempts: usize,

    /// HTTP status codes that mark a failed call as retryable
    pub retry_status_codes: Vec<u16>,

    /// Upper bound of a single delay, in seconds
    pub max_delay: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 1000,
            backoff_factor: 2,
            max_retry_attempts: 8,
            retry_status_codes: vec![429, 500, 502, 503, 504, 408],
            max_delay: None,
        }
    }
}

impl RetryConfig {
    /// A configuration that performs the call exactly once.
    pub fn disabled() -> Self {
        Self { max_retry_attempts: 0, ..Self::default() }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();

        assert_eq!(config.min_delay_ms, 1000);
        assert_eq!(config.backoff_factor, 2);
        assert_eq!(config.max_retry_attempts, 8);
        assert_eq!(
            config.retry_status_codes,
            vec![429, 500, 502, 503, 504, 408]
        );
        assert_eq!(config.max_delay, None);
    }

    #[test]
    fn test_retry_config_setters() {
        let config = RetryConfig::default()
            .min_delay_ms(500u64)
            .max_retry_attempts(2usize)
            .retry_status_codes(vec![429]);

        assert_eq!(config.min_delay_ms, 500);
        assert_eq!(config.max_retry_attempts, 2);
        assert_eq!(config.retry_status_codes, vec![429]);
    }
}
