//! Readiness probe: block until the datastore accepts connections or the
//! retry budget runs out.
//!
//! The attempt function is injectable so the retry loop is testable
//! without a live datastore; [`connect_once`] is the production attempt.

use std::future::Future;

use sqlx::{Connection, PgConnection};

use crate::error::{BoxError, ProbeError};
use crate::settings::{ConnectionTarget, RetryPolicy};

/// Open a connection, run a liveness statement, and close. The probe
/// connection is never handed to later stages.
pub async fn connect_once(target: &ConnectionTarget) -> Result<(), BoxError> {
    let mut conn = PgConnection::connect_with(&target.connect_options()).await?;
    sqlx::query("select 1").execute(&mut conn).await?;
    conn.close().await?;
    Ok(())
}

/// Retry `connect` with exponential backoff until it succeeds or
/// `policy.max_attempts` attempts have failed.
///
/// Returns the 1-based attempt number that succeeded. The attempt
/// function receives the attempt number; the final failed attempt is not
/// followed by a sleep.
pub async fn wait_until_ready<F, Fut>(
    policy: &RetryPolicy,
    mut connect: F,
) -> Result<u32, ProbeError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), BoxError>>,
{
    let mut last_error: Option<BoxError> = None;

    for attempt in 1..=policy.max_attempts {
        match connect(attempt).await {
            Ok(()) => {
                tracing::info!(attempt, "datastore accepted connection");
                return Ok(attempt);
            }
            Err(error) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "datastore not ready"
                );
                last_error = Some(error);
                if attempt < policy.max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(ProbeError::Exhausted {
        attempts: policy.max_attempts,
        source: last_error.unwrap_or_else(|| "retry budget allows no attempts".into()),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(4),
        }
    }

    fn refused() -> BoxError {
        "connection refused".into()
    }

    /// Attempt function failing the first `failures` calls, succeeding after.
    fn flaky(
        failures: u32,
        calls: Arc<AtomicU32>,
    ) -> impl FnMut(u32) -> std::pin::Pin<Box<dyn Future<Output = Result<(), BoxError>>>> {
        move |_attempt| {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    Err(refused())
                } else {
                    Ok(())
                }
            })
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let attempt = wait_until_ready(&fast_policy(5), flaky(0, calls.clone()))
            .await
            .unwrap();
        assert_eq!(attempt, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn n_failures_then_success_reports_attempt_n_plus_one() {
        let calls = Arc::new(AtomicU32::new(0));
        let attempt = wait_until_ready(&fast_policy(10), flaky(3, calls.clone()))
            .await
            .unwrap();
        assert_eq!(attempt, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn never_exceeds_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = wait_until_ready(&fast_policy(3), flaky(u32::MAX, calls.clone()))
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let ProbeError::Exhausted { attempts, source } = err;
        assert_eq!(attempts, 3);
        assert_eq!(source.to_string(), "connection refused");
    }

    #[tokio::test]
    async fn success_on_final_allowed_attempt_is_not_exhaustion() {
        let calls = Arc::new(AtomicU32::new(0));
        let attempt = wait_until_ready(&fast_policy(4), flaky(3, calls.clone()))
            .await
            .unwrap();
        assert_eq!(attempt, 4);
    }

    #[tokio::test]
    async fn zero_attempt_budget_is_exhausted_without_connecting() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = wait_until_ready(&fast_policy(0), flaky(0, calls.clone()))
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let ProbeError::Exhausted { attempts, .. } = err;
        assert_eq!(attempts, 0);
    }

    #[tokio::test]
    async fn attempt_numbers_are_passed_in_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in = seen.clone();
        let result = wait_until_ready(&fast_policy(3), move |attempt| {
            let seen = seen_in.clone();
            Box::pin(async move {
                seen.lock().unwrap().push(attempt);
                Err::<(), BoxError>(refused())
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }
}
