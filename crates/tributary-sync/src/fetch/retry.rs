//! Exponential backoff for remote API calls
//!
//! The wait after failure `k` (0-based) is `min(2^k, cap)` seconds plus a
//! uniform jitter in `[jitter_min, jitter_max]` seconds. Once `max_attempts`
//! calls have failed the operation gives up with
//! [`SyncError::RetriesExhausted`].

use rand::Rng;
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total calls, including the first
    pub max_attempts: u32,
    pub cap_secs: u64,
    pub jitter_min_secs: u64,
    pub jitter_max_secs: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            cap_secs: 60,
            jitter_min_secs: 1,
            jitter_max_secs: 5,
        }
    }
}

impl BackoffPolicy {
    /// Retry immediately; for tests against local mock servers
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            cap_secs: 0,
            jitter_min_secs: 0,
            jitter_max_secs: 0,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max attempts must be at least 1".to_string());
        }
        if self.jitter_min_secs > self.jitter_max_secs {
            return Err(format!(
                "jitter minimum {}s exceeds maximum {}s",
                self.jitter_min_secs, self.jitter_max_secs
            ));
        }
        Ok(())
    }

    /// Wait after failure `failures` (0 for the first) without jitter
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exp = 2u64.checked_pow(failures).unwrap_or(u64::MAX);
        Duration::from_secs(exp.min(self.cap_secs))
    }

    pub fn jitter(&self) -> Duration {
        if self.jitter_max_secs == 0 || self.jitter_min_secs > self.jitter_max_secs {
            return Duration::ZERO;
        }
        let secs = rand::rng().random_range(self.jitter_min_secs..=self.jitter_max_secs);
        Duration::from_secs(secs)
    }

    pub fn delay(&self, failures: u32) -> Duration {
        self.base_delay(failures) + self.jitter()
    }
}

/// Result of one attempt
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// Transient failure, worth another try
    Retry(String),
    Fail(SyncError),
}

/// How a response status should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Retryable,
    Fatal,
}

pub fn classify_status(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StatusClass::Retryable
    } else {
        StatusClass::Fatal
    }
}

/// Timeouts and connection failures are transient; anything else is not
pub fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Run `op` until it is done, fails, or the attempt budget is spent
pub async fn retry<T, F, Fut>(policy: &BackoffPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut last_error = String::from("no attempt made");
    for attempt in 1..=policy.max_attempts {
        match op(attempt).await {
            Attempt::Done(value) => {
                if attempt > 1 {
                    info!(what, attempt, "Succeeded after retry");
                }
                return Ok(value);
            },
            Attempt::Fail(err) => return Err(err),
            Attempt::Retry(reason) => {
                warn!(what, attempt, max_attempts = policy.max_attempts, reason = %reason, "Attempt failed");
                last_error = reason;
                if attempt < policy.max_attempts {
                    let delay = policy.delay(attempt - 1);
                    info!(what, delay_secs = delay.as_secs(), "Backing off");
                    tokio::time::sleep(delay).await;
                }
            },
        }
    }

    Err(SyncError::RetriesExhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}

/// Send a request built by `build`, retrying transient failures.
///
/// Returns the first response that is not retryable; callers inspect its
/// status for fatal errors.
pub async fn send_with_retry<F>(policy: &BackoffPolicy, what: &str, build: F) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let build = &build;
    retry(policy, what, move |_| async move {
        match build().send().await {
            Ok(response) => match classify_status(response.status()) {
                StatusClass::Retryable => Attempt::Retry(format!("Status {}", response.status().as_u16())),
                _ => Attempt::Done(response),
            },
            Err(e) if is_transient(&e) => Attempt::Retry(e.to_string()),
            Err(e) => Attempt::Fail(SyncError::Http(e)),
        }
    })
    .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_base_delay_doubles_then_caps() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (0..=7).map(|k| policy.base_delay(k).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_status_classes() {
        assert_eq!(classify_status(StatusCode::OK), StatusClass::Success);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), StatusClass::Retryable);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), StatusClass::Retryable);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), StatusClass::Fatal);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), StatusClass::Fatal);
    }

    #[test]
    fn test_validate() {
        assert!(BackoffPolicy::default().validate().is_ok());
        assert!(BackoffPolicy::immediate(0).validate().is_err());
        let inverted = BackoffPolicy {
            jitter_min_secs: 5,
            jitter_max_secs: 1,
            ..BackoffPolicy::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempt_cap() {
        let policy = BackoffPolicy {
            jitter_min_secs: 0,
            jitter_max_secs: 0,
            ..BackoffPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let err = retry::<(), _, _>(&policy, "push batch", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Retry("Status 503".to_string()) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        match err {
            SyncError::RetriesExhausted { attempts, last_error } => {
                assert_eq!(attempts, 6);
                assert_eq!(last_error, "Status 503");
            },
            other => panic!("unexpected error: {other:?}"),
        }
        // waits after attempts 1..=5: 1 + 2 + 4 + 8 + 16
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(31) && waited < Duration::from_secs(32));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_retry_waits_one_second() {
        let policy = BackoffPolicy {
            jitter_min_secs: 0,
            jitter_max_secs: 0,
            ..BackoffPolicy::default()
        };
        let started = Instant::now();
        let second_call = std::sync::Mutex::new(None);

        retry(&policy, "runs", |attempt| {
            if attempt == 2 {
                *second_call.lock().unwrap() = Some(started.elapsed());
            }
            async move {
                if attempt == 1 {
                    Attempt::Retry("Status 503".to_string())
                } else {
                    Attempt::Done(())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(second_call.into_inner().unwrap(), Some(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_stops_immediately() {
        let calls = AtomicU32::new(0);
        let err = retry::<(), _, _>(&BackoffPolicy::default(), "runs", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Attempt::Fail(SyncError::Api {
                    status: 401,
                    message: "Invalid token".into(),
                })
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.to_string(), "Status 401: Invalid token");
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let value = retry(&BackoffPolicy::default(), "runs", |attempt| async move {
            if attempt < 3 {
                Attempt::Retry("Status 429".to_string())
            } else {
                Attempt::Done(attempt)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    proptest! {
        #[test]
        fn prop_delay_within_bounds(
            k in 0u32..80,
            cap in 1u64..120,
            jitter_min in 0u64..5,
            jitter_span in 0u64..5,
        ) {
            let policy = BackoffPolicy {
                max_attempts: 6,
                cap_secs: cap,
                jitter_min_secs: jitter_min,
                jitter_max_secs: jitter_min + jitter_span,
            };
            let base = policy.base_delay(k).as_secs();
            prop_assert_eq!(base, 2u64.checked_pow(k).unwrap_or(u64::MAX).min(cap));

            let total = policy.delay(k).as_secs();
            if policy.jitter_max_secs > 0 {
                prop_assert!(total >= base + jitter_min);
            }
            prop_assert!(total <= base + jitter_min + jitter_span);
        }
    }
}
