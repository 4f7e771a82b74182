//! Retry-with-backoff wrapper shared by both providers.
//!
//! Grounded on `openclaw-agent/src/llm/mod.rs`'s `OpenAiCompatibleProvider::
//! complete` retry loop (3 attempts, 1s/2s/4s backoff on transient HTTP
//! statuses), generalized into one helper both providers call instead of
//! duplicating the loop, and wrapped in a 60s wall-clock bound per
//! SPEC_FULL.md §4.7 so a stalled connection can't hang a turn forever.

use std::future::Future;
use std::time::Duration;

use subterminator_core::TransientError;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 3;
const WALL_CLOCK_BOUND: Duration = Duration::from_secs(60);

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(1000 * (1u64 << attempt.saturating_sub(1)))
}

/// Run `f` up to `MAX_ATTEMPTS` times with exponential backoff between
/// attempts, the whole sequence bounded by a 60s wall clock. `is_transient`
/// decides whether a given error is worth retrying at all; a non-transient
/// error returns immediately on first failure.
pub async fn with_retry<T, F, Fut>(
    mut f: F,
    is_transient: impl Fn(&TransientError) -> bool,
) -> Result<T, TransientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransientError>>,
{
    let deadline = tokio::time::Instant::now() + WALL_CLOCK_BOUND;
    let mut last_err = None;

    for attempt in 1..=MAX_ATTEMPTS {
        if attempt > 1 {
            let delay = backoff_delay(attempt - 1);
            if tokio::time::Instant::now() + delay >= deadline {
                break;
            }
            warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying LLM call");
            tokio::time::sleep(delay).await;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, f()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                if !is_transient(&e) {
                    return Err(e);
                }
                last_err = Some(e);
            }
            Err(_) => {
                last_err = Some(TransientError::Llm("request timed out".to_string()));
                break;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| TransientError::Llm("retry loop exited with no error recorded".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(TransientError::Llm("503".to_string()))
                } else {
                    Ok(42)
                }
            },
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, _> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransientError::Llm("bad request".to_string()))
            },
            |_| false,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_sequence_is_1_2_4_seconds() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
    }
}
