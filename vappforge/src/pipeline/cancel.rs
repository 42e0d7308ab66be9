//! Build cancellation.
//!
//! A single `CancelSource` is held by the caller; `CancelToken` clones travel
//! with the build context. Every sleep and poll in the pipeline races against
//! the token so a cancel takes effect at the next suspension point.

use std::time::Duration;

use tokio::sync::watch;

use crate::errors::{ForgeError, ForgeResult};

/// The cancelling half. Dropping it does not cancel the build.
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

/// The observing half carried by the build context.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelSource {
    pub fn new() -> (CancelSource, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelSource { tx }, CancelToken { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelToken {
    /// A token that can never be cancelled, for standalone component use.
    pub fn never() -> CancelToken {
        // A closed watch channel keeps reporting its last value (false).
        let (_tx, rx) = watch::channel(false);
        CancelToken { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the build is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow_and_update() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        // Sender dropped without cancelling: never resolve.
        std::future::pending::<()>().await;
    }

    /// Sleep for `duration`, or return `Cancelled` if the build is cancelled
    /// first.
    pub async fn sleep(&self, duration: Duration) -> ForgeResult<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(ForgeError::Cancelled),
        }
    }

    /// Bail out immediately if the build is already cancelled.
    pub fn check(&self) -> ForgeResult<()> {
        if self.is_cancelled() {
            Err(ForgeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_completes_when_not_cancelled() {
        let (_source, token) = CancelSource::new();
        token.sleep(Duration::from_millis(1)).await.unwrap();
    }

    #[tokio::test]
    async fn sleep_aborts_on_cancel() {
        let (source, token) = CancelSource::new();
        let sleeper = tokio::spawn({
            let token = token.clone();
            async move { token.sleep(Duration::from_secs(300)).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), sleeper)
            .await
            .expect("sleep must return promptly after cancel")
            .unwrap();
        assert!(matches!(result, Err(ForgeError::Cancelled)));
    }

    #[tokio::test]
    async fn check_reflects_cancel_state() {
        let (source, token) = CancelSource::new();
        assert!(token.check().is_ok());
        source.cancel();
        assert!(matches!(token.check(), Err(ForgeError::Cancelled)));
    }
}
