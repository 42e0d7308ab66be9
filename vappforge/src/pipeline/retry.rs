//! Named retry policies.
//!
//! Every bounded retry in the pipeline is a named `RetryPolicy` value rather
//! than a count spread across call sites. A policy retries only while its
//! predicate accepts the error; anything else escalates immediately.

use std::future::Future;
use std::time::Duration;

use crate::errors::{ForgeError, ForgeResult};
use crate::pipeline::cancel::CancelToken;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub name: &'static str,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Console tickets are short-lived and the console endpoint lags power-on.
pub const MKS_TICKET: RetryPolicy = RetryPolicy {
    name: "mks-ticket",
    max_attempts: 10,
    delay: Duration::from_secs(5),
};

/// Media inserts return 409 while a fresh upload settles on the backing store.
pub const MEDIA_INSERT: RetryPolicy = RetryPolicy {
    name: "media-insert",
    max_attempts: 12,
    delay: Duration::from_secs(30),
};

/// Power-on conflicts are retried with a substitute IP.
pub const POWER_ON_IP: RetryPolicy = RetryPolicy {
    name: "power-on-ip",
    max_attempts: 6,
    delay: Duration::ZERO,
};

impl RetryPolicy {
    /// Run `op` until it succeeds, the predicate rejects the error, or the
    /// attempt budget is exhausted. The delay between attempts honours
    /// cancellation.
    pub async fn run<T, F, Fut, P>(
        &self,
        cancel: &CancelToken,
        mut op: F,
        retryable: P,
    ) -> ForgeResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ForgeResult<T>>,
        P: Fn(&ForgeError) -> bool,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    if !retryable(&err) || attempt >= self.max_attempts {
                        return Err(err);
                    }
                    tracing::debug!(
                        policy = self.name,
                        attempt,
                        max = self.max_attempts,
                        error = %err,
                        "retrying after error"
                    );
                    if !self.delay.is_zero() {
                        cancel.sleep(self.delay).await?;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: RetryPolicy = RetryPolicy {
        name: "fast",
        max_attempts: 3,
        delay: Duration::from_millis(1),
    };

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let token = CancelToken::never();
        let result = FAST
            .run(
                &token,
                |_| async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ForgeError::Cloud("busy".into()))
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
    async fn exhausts_attempt_budget() {
        let calls = AtomicU32::new(0);
        let token = CancelToken::never();
        let result: ForgeResult<()> = FAST
            .run(
                &token,
                |_| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ForgeError::Cloud("busy".into()))
                },
                |_| true,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_escalate_immediately() {
        let calls = AtomicU32::new(0);
        let token = CancelToken::never();
        let result: ForgeResult<()> = FAST
            .run(
                &token,
                |_| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ForgeError::Config("bad".into()))
                },
                |err| matches!(err, ForgeError::Cloud(_)),
            )
            .await;
        assert!(matches!(result, Err(ForgeError::Config(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
