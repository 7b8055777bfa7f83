use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use crate::{Error, RetryConfig};

/// Runs `operation` until it succeeds, fails with a non retryable error, or
/// the attempts in `config` are used up.
pub async fn retry_with_config<F, Fut, T, C>(
    config: &RetryConfig,
    operation: F,
    notify: Option<C>,
) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
    C: Fn(&anyhow::Error, Duration) + Send + Sync + 'static,
{
    let mut strategy = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.min_delay_ms))
        .with_factor(config.backoff_factor as f32)
        .with_max_times(config.max_retry_attempts)
        .with_jitter();
    if let Some(max_delay) = config.max_delay {
        strategy = strategy.with_max_delay(Duration::from_secs(max_delay));
    }

    let retryable = operation.retry(strategy).when(should_retry);

    match notify {
        Some(callback) => retryable.notify(callback).await,
        None => retryable.await,
    }
}

/// Only `Error::Retryable` triggers another attempt.
fn should_retry(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<Error>()
        .is_some_and(|error| matches!(error, Error::Retryable(_)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    fn fast_config(attempts: usize) -> RetryConfig {
        RetryConfig::default()
            .min_delay_ms(1u64)
            .max_retry_attempts(attempts)
    }

    #[tokio::test]
    async fn test_retries_retryable_errors_until_exhausted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let actual: anyhow::Result<()> = retry_with_config(
            &fast_config(2),
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Retryable(anyhow::anyhow!("Network error")).into())
                }
            },
            None::<fn(&anyhow::Error, Duration)>,
        )
        .await;

        assert!(actual.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_other_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let actual: anyhow::Result<()> = retry_with_config(
            &fast_config(5),
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("bad request"))
                }
            },
            None::<fn(&anyhow::Error, Duration)>,
        )
        .await;

        assert!(actual.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_returns_first_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let actual = retry_with_config(
            &fast_config(5),
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(Error::Retryable(anyhow::anyhow!("timeout")).into())
                    } else {
                        Ok("done")
                    }
                }
            },
            None::<fn(&anyhow::Error, Duration)>,
        )
        .await
        .unwrap();

        assert_eq!(actual, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
