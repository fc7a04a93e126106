//! Shutdown coordination between the signal handler and the simulation loop.
//!
//! Once shutdown is initiated the loop stops admitting new client work, runs
//! its final cleanup (disconnecting remaining channels) and then marks the
//! shutdown complete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct ShutdownState {
    initiated: Arc<AtomicBool>,
    complete: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once no new client work should be admitted.
    pub fn is_initiated(&self) -> bool {
        self.initiated.load(Ordering::Acquire)
    }

    /// True once every channel has been cleaned up.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn initiate(&self) {
        if !self.initiated.swap(true, Ordering::AcqRel) {
            info!("🛑 Shutdown initiated - no new client work will be admitted");
            self.notify.notify_waiters();
        }
    }

    pub fn complete(&self) {
        self.complete.store(true, Ordering::Release);
        info!("✅ Simulation stopped - ready for final cleanup");
    }

    /// Resolves once shutdown has been initiated.
    pub async fn initiated(&self) {
        let notified = self.notify.notified();
        if self.is_initiated() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_flags() {
        let state = ShutdownState::new();
        assert!(!state.is_initiated());
        assert!(!state.is_complete());

        state.initiate();
        state.initiate();
        assert!(state.is_initiated());

        state.complete();
        assert!(state.is_complete());
    }

    #[tokio::test]
    async fn test_initiated_wakes_waiters() {
        let state = ShutdownState::new();
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.initiated().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        state.initiate();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .expect("waiter should not panic");
    }

    #[tokio::test]
    async fn test_initiated_returns_immediately_when_already_set() {
        let state = ShutdownState::new();
        state.initiate();
        tokio::time::timeout(Duration::from_millis(100), state.initiated())
            .await
            .expect("should not wait");
    }
}
