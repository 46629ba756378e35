//! Cooperative cancellation.
//!
//! A Director task is cancellable at any suspension point. The token is
//! checked before blocking operations and raced against in-flight calls;
//! cancelled dispatches complete their provenance record with
//! `error_kind = cancelled`.

use tokio::sync::watch;

/// Cancellation token; cheap to clone, observable across tasks.
#[derive(Debug, Clone)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

/// The cancelling side of a token.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelToken {
    /// Create a token and its cancelling handle.
    pub fn new() -> (CancelHandle, CancelToken) {
        let (sender, receiver) = watch::channel(false);
        (CancelHandle { sender }, CancelToken { receiver })
    }

    /// A token that can never be cancelled.
    pub fn never() -> CancelToken {
        static NEVER: std::sync::OnceLock<(watch::Sender<bool>, watch::Receiver<bool>)> =
            std::sync::OnceLock::new();
        let (_, receiver) = NEVER.get_or_init(|| watch::channel(false));
        CancelToken {
            receiver: receiver.clone(),
        }
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve when cancellation is requested.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if *receiver.borrow() {
            return;
        }
        // An error means the handle was dropped: cancellation can no longer
        // happen, so park forever and let the racing future win.
        while receiver.changed().await.is_ok() {
            if *receiver.borrow() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }
}

impl CancelHandle {
    /// Request cancellation; all clones of the token observe it.
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_observed() {
        let (handle, token) = CancelToken::new();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
        // Resolves immediately once cancelled.
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_never_token() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        let raced = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(raced.is_err());
    }

    #[tokio::test]
    async fn test_cancel_races_work() {
        let (handle, token) = CancelToken::new();
        let work = tokio::time::sleep(Duration::from_secs(5));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });

        tokio::select! {
            _ = work => panic!("work should not finish first"),
            _ = token.cancelled() => {}
        }
    }
}
