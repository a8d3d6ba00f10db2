use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;

/// Cancellable deadline task.
///
/// The scheduled future runs once after `after` elapses unless the timer is
/// cancelled or dropped first.
#[derive(Debug)]
pub struct DeadlineTimer {
    handle: Option<AbortHandle>,
}

impl DeadlineTimer {
    pub fn schedule<F>(after: Duration, on_fire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            on_fire.await;
        });

        DeadlineTimer {
            handle: Some(task.abort_handle()),
        }
    }

    pub fn cancel(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Release the handle without aborting. Used from inside the timer's own
    /// task once it has fired.
    pub fn detach(mut self) {
        self.handle = None;
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, AbortHandle::is_finished)
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_timer_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let _timer = DeadlineTimer::schedule(Duration::from_millis(10), async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let timer = DeadlineTimer::schedule(Duration::from_millis(10), async move {
            flag.store(true, Ordering::SeqCst);
        });
        timer.cancel();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dropped_timer_never_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        drop(DeadlineTimer::schedule(Duration::from_millis(10), async move {
            flag.store(true, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
