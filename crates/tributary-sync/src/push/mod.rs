//! Batched delivery to an external API
//!
//! Records are split into `ceil(N / B)` batches and sent one at a time.
//! Each batch walks a small state machine:
//!
//! ```text
//! Pending -> Sending -> Succeeded
//!               |
//!               +-> Retrying -> Sending   (429 / 5xx / timeout)
//!               +-> Exhausted             (attempt cap reached, fatal)
//!               +-> error                 (any other status, fatal)
//! ```

pub mod profiles;

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SyncError};
use crate::fetch::retry::{classify_status, is_transient, Attempt, BackoffPolicy, StatusClass};

pub use profiles::ProfileApiClient;

/// Number of batches needed for `total` items
pub fn batch_count(total: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    (total + batch_size - 1) / batch_size
}

/// Contiguous batches of at most `batch_size` items, covering `items` exactly once
pub fn partition<T>(items: &[T], batch_size: usize) -> Vec<&[T]> {
    if batch_size == 0 {
        return Vec::new();
    }
    items.chunks(batch_size).collect()
}

/// Raw response of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait PushTarget<T: Sync>: Send + Sync {
    async fn send(&self, batch: &[T]) -> Result<PushResponse>;

    /// Inspect a 2xx response for an application-level rejection
    fn check_accepted(&self, _response: &PushResponse) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Sending { attempt: u32 },
    Retrying { attempt: u32, delay: Duration, reason: String },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32, last_error: String },
}

/// Totals of a completed delivery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub items: usize,
    pub batches: usize,
    pub retries: u32,
}

pub struct BatchSender {
    policy: BackoffPolicy,
    batch_size: usize,
}

impl BatchSender {
    pub fn new(policy: BackoffPolicy, batch_size: usize) -> Self {
        Self { policy, batch_size }
    }

    /// Deliver every item; stops at the first batch that cannot be delivered
    pub async fn send_all<T, P>(&self, target: &P, items: &[T]) -> Result<PushReport>
    where
        T: Sync,
        P: PushTarget<T> + ?Sized,
    {
        let batches = partition(items, self.batch_size);
        let total = batches.len();
        info!(items = items.len(), batches = total, batch_size = self.batch_size, "Sending batches");

        let mut report = PushReport {
            items: items.len(),
            batches: total,
            retries: 0,
        };
        for (i, batch) in batches.into_iter().enumerate() {
            let attempts = self.send_batch(target, batch, i + 1, total).await?;
            report.retries += attempts - 1;
        }
        Ok(report)
    }

    /// Drive one batch to a terminal state; returns the attempts it took
    async fn send_batch<T, P>(&self, target: &P, batch: &[T], number: usize, total: usize) -> Result<u32>
    where
        T: Sync,
        P: PushTarget<T> + ?Sized,
    {
        let mut state = BatchState::Pending;
        loop {
            state = match state {
                BatchState::Pending => BatchState::Sending { attempt: 1 },
                BatchState::Sending { attempt } => {
                    debug!(batch = number, attempt, size = batch.len(), "Sending batch");
                    match self.attempt(target, batch).await {
                        Attempt::Done(()) => BatchState::Succeeded { attempts: attempt },
                        Attempt::Retry(reason) if attempt < self.policy.max_attempts => {
                            BatchState::Retrying {
                                attempt,
                                delay: self.policy.delay(attempt - 1),
                                reason,
                            }
                        },
                        Attempt::Retry(reason) => BatchState::Exhausted {
                            attempts: attempt,
                            last_error: reason,
                        },
                        Attempt::Fail(e) => {
                            error!(batch = number, error = %e, "Batch rejected");
                            return Err(e);
                        },
                    }
                },
                BatchState::Retrying {
                    attempt,
                    delay,
                    reason,
                } => {
                    warn!(batch = number, attempt, reason = %reason, delay_secs = delay.as_secs(), "Batch will be retried");
                    tokio::time::sleep(delay).await;
                    BatchState::Sending {
                        attempt: attempt + 1,
                    }
                },
                BatchState::Succeeded { attempts } => {
                    info!(batch = number, total, attempts, "Batch delivered");
                    return Ok(attempts);
                },
                BatchState::Exhausted {
                    attempts,
                    last_error,
                } => {
                    error!(batch = number, attempts, last_error = %last_error, "Too many failed attempts");
                    return Err(SyncError::RetriesExhausted {
                        attempts,
                        last_error,
                    });
                },
            };
        }
    }

    async fn attempt<T, P>(&self, target: &P, batch: &[T]) -> Attempt<()>
    where
        T: Sync,
        P: PushTarget<T> + ?Sized,
    {
        let response = match target.send(batch).await {
            Ok(response) => response,
            Err(SyncError::Http(e)) if is_transient(&e) => return Attempt::Retry(e.to_string()),
            Err(e) => return Attempt::Fail(e),
        };

        let class = StatusCode::from_u16(response.status)
            .map(classify_status)
            .unwrap_or(StatusClass::Fatal);
        match class {
            StatusClass::Success => match target.check_accepted(&response) {
                Ok(()) => Attempt::Done(()),
                Err(e) => Attempt::Fail(e),
            },
            StatusClass::Retryable => Attempt::Retry(format!("Status {}", response.status)),
            StatusClass::Fatal => Attempt::Fail(SyncError::PushRejected {
                status: response.status,
                message: response.body,
            }),
        }
    }
}
