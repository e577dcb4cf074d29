use std::sync::Arc;

use tokio::sync::Semaphore;

/// Counting wake-up signal for the assignment loop.
///
/// Released once per enqueue and once per worker that frees up; each wait
/// consumes one release.
#[derive(Debug, Clone)]
pub struct WorkSignal {
    permits: Arc<Semaphore>,
}

impl Default for WorkSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkSignal {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    /// Non-blocking release.
    pub fn notify(&self) {
        self.permits.add_permits(1);
    }

    /// Wait for one release.
    pub async fn wait(&self) {
        // The semaphore is never closed, so acquire only fails if that changes.
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }

    /// Releases not yet consumed.
    pub fn pending(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn releases_are_counted() {
        let signal = WorkSignal::new();
        signal.notify();
        signal.notify();
        assert_eq!(signal.pending(), 2);

        signal.wait().await;
        signal.wait().await;
        assert_eq!(signal.pending(), 0);

        let blocked = tokio::time::timeout(Duration::from_millis(20), signal.wait()).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn clones_share_permits() {
        let signal = WorkSignal::new();
        let worker_side = signal.clone();
        let waiter = tokio::spawn(async move { signal.wait().await });
        worker_side.notify();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
