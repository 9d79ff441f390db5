//! Cancellable scheduled tasks.
//!
//! The countdown and the hold-repeat are owned by whoever starts them and
//! stop when cancelled or dropped, so a task can never outlive the state
//! that armed it.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A spawned task tied to a cancellation token.
#[derive(Debug)]
pub struct ScheduledTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `action` every `period`, first after one period.
    ///
    /// The task ends when cancelled or when `action` returns `Break`.
    pub fn every<F, Fut>(period: Duration, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if action().await.is_break() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            cancel_token,
            handle,
        }
    }

    /// Run `future` once after `delay` unless cancelled first.
    pub fn once<Fut>(delay: Duration, future: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => future.await,
            }
        });

        Self {
            cancel_token,
            handle,
        }
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Whether the task is neither cancelled nor finished.
    pub fn is_active(&self) -> bool {
        !self.cancel_token.is_cancelled() && !self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Let spawned tasks observe the advanced clock.
    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_repeats_until_cancelled() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let task = ScheduledTask::every(Duration::from_millis(100), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            }
        });
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(100)).await;
            settle().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);

        task.cancel();
        settle().await;
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!task.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_stops_on_break() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let task = ScheduledTask::every(Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
        });

        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(10)).await;
            settle().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(!task.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_does_not_run_after_drop() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let task = ScheduledTask::once(Duration::from_millis(50), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(task);

        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_runs_after_delay() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let _task = ScheduledTask::once(Duration::from_millis(50), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_millis(49)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
