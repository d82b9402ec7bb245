//! Re-armable readiness signal.

use tokio::sync::watch;

/// Signals that the cache has been populated for the current load cycle.
///
/// Resolving is idempotent. [`ReadySignal::rearm`] starts a new cycle, so
/// anyone waiting afterwards blocks until the next [`ReadySignal::resolve`].
#[derive(Debug)]
pub struct ReadySignal {
    tx: watch::Sender<bool>,
}

impl ReadySignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn resolve(&self) {
        self.tx.send_replace(true);
    }

    pub fn rearm(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal is resolved.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_once_resolved() {
        let signal = Arc::new(ReadySignal::new());
        assert!(!signal.is_ready());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        signal.resolve();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let signal = ReadySignal::new();
        signal.resolve();
        signal.resolve();
        assert!(signal.is_ready());
        signal.wait().await;
    }

    #[tokio::test]
    async fn test_rearm_blocks_new_waiters() {
        let signal = Arc::new(ReadySignal::new());
        signal.resolve();
        signal.rearm();
        assert!(!signal.is_ready());

        let pending = tokio::time::timeout(Duration::from_millis(20), signal.wait()).await;
        assert!(pending.is_err());

        signal.resolve();
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .unwrap();
    }
}
