//! Shutdown coordination for the API.

use tokio_util::sync::CancellationToken;

/// Coordinator for graceful shutdown.
///
/// Wraps a root cancellation token. Every long-running task (HTTP server,
/// rate limiter sweeper, task pool) receives a child token, so one
/// `trigger` stops them all while each can still be cancelled on its own.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    root: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
        }
    }

    /// A token cancelled when shutdown is triggered.
    pub fn subscribe(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.root.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.root.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_cancels_subscribers() {
        let shutdown = Shutdown::new();
        let a = shutdown.subscribe();
        let b = shutdown.subscribe();

        assert!(!a.is_cancelled());
        shutdown.trigger();

        a.cancelled().await;
        b.cancelled().await;
        assert!(shutdown.is_triggered());
    }

    #[test]
    fn test_child_cancel_does_not_trigger_root() {
        let shutdown = Shutdown::new();
        let child = shutdown.subscribe();
        child.cancel();
        assert!(!shutdown.is_triggered());
    }
}
