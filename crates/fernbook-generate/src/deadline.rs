use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Sleep;

/// Counts timers that are armed and not yet dropped.
#[derive(Debug, Clone, Default)]
pub struct TimerRegistry {
    armed: Arc<AtomicUsize>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timers currently armed. Zero whenever no race is in flight.
    pub fn pending(&self) -> usize {
        self.armed.load(Ordering::SeqCst)
    }

    fn arm(&self, limit: Duration) -> ArmedTimer {
        self.armed.fetch_add(1, Ordering::SeqCst);
        ArmedTimer {
            sleep: Box::pin(tokio::time::sleep(limit)),
            armed: Arc::clone(&self.armed),
        }
    }
}

struct ArmedTimer {
    sleep: Pin<Box<Sleep>>,
    armed: Arc<AtomicUsize>,
}

impl Drop for ArmedTimer {
    fn drop(&mut self) {
        self.armed.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, PartialEq)]
pub enum Raced<T> {
    Completed(T),
    TimedOut,
}

/// Run `op` against a timer of `limit`; whichever settles first decides.
///
/// The timer is disarmed on both paths. On timeout `op` is dropped, which
/// stops polling it; a request already on the wire is not recalled.
pub async fn race<F>(timers: &TimerRegistry, limit: Duration, op: F) -> Raced<F::Output>
where
    F: Future,
{
    let mut timer = timers.arm(limit);
    let outcome = tokio::select! {
        biased;
        out = op => Raced::Completed(out),
        _ = timer.sleep.as_mut() => Raced::TimedOut,
    };
    drop(timer);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn completes_before_limit() {
        let timers = TimerRegistry::new();
        let outcome = race(&timers, Duration::from_secs(5), async { 7 }).await;
        assert_eq!(outcome, Raced::Completed(7));
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_disarms() {
        let timers = TimerRegistry::new();
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            1
        };
        let outcome = race(&timers, Duration::from_secs(5), slow).await;
        assert_eq!(outcome, Raced::TimedOut);
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn counts_timer_while_in_flight() {
        let timers = TimerRegistry::new();
        let observer = timers.clone();
        let outcome =
            race(&timers, Duration::from_secs(5), async move { observer.pending() }).await;
        assert_eq!(outcome, Raced::Completed(1));
        assert_eq!(timers.pending(), 0);
    }
}
