//! Exponential backoff for transient storage errors (spec §5 "Retries":
//! base 1 ms, factor 1.5, cap 1 s, applied up to a per-operation deadline).
//! Signature/proof verification failures never flow through here — only
//! `StorageError::is_retryable` cases do.

use crate::error::StorageError;
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub deadline: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1),
            factor: 1.5,
            cap: Duration::from_secs(1),
            deadline: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut current = self.base;
        std::iter::from_fn(move || {
            let this = current;
            let next_millis = (current.as_secs_f64() * self.factor * 1000.0) as u64;
            current = Duration::from_millis(next_millis).min(self.cap);
            Some(this)
        })
    }
}

/// Retry `op` under `policy` until it succeeds, returns a non-retryable
/// error, or the accumulated sleep time would exceed the deadline.
pub async fn retry_async<T, F, Fut>(policy: BackoffPolicy, mut op: F) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StorageError>>,
{
    let mut elapsed = Duration::ZERO;
    let mut delays = policy.delays();
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() => {
                let delay = delays.next().unwrap_or(policy.cap);
                if elapsed + delay > policy.deadline {
                    return Err(StorageError::Deadline);
                }
                tokio::time::sleep(delay).await;
                elapsed += delay;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let policy = BackoffPolicy {
            base: Duration::from_millis(1),
            factor: 1.5,
            cap: Duration::from_millis(5),
            deadline: Duration::from_secs(1),
        };
        let result = retry_async(policy, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StorageError::Unavailable("not yet".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_abort_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), StorageError> = retry_async(BackoffPolicy::default(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::NotFound("x".into())) }
        })
        .await;
        assert_eq!(result, Err(StorageError::NotFound("x".into())));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausting_the_deadline_surfaces_deadline_exceeded() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(1),
            factor: 1.0,
            cap: Duration::from_millis(1),
            deadline: Duration::from_millis(3),
        };
        let result: Result<(), StorageError> =
            retry_async(policy, || async { Err(StorageError::Unavailable("down".into())) }).await;
        assert_eq!(result, Err(StorageError::Deadline));
    }
}
