//! One-shot registration deadline for a half-open room.
//!
//! A timer is a spawned task that sleeps and then runs a callback with the
//! timer's epoch. The callback must re-check the epoch against the room's
//! current timer under the table lock: aborting the task is best effort (it
//! may already be past its sleep), the epoch comparison is what makes firing
//! and cancellation mutually exclusive.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct RegistrationTimer {
    epoch: u64,
    task: JoinHandle<()>,
}

impl RegistrationTimer {
    pub fn start<F, Fut>(epoch: u64, delay: Duration, on_fire: F) -> Self
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(epoch).await;
        });
        Self { epoch, task }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_with_its_epoch_after_the_delay() {
        let fired = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&fired);
        let timer = RegistrationTimer::start(7, Duration::from_secs(10), move |epoch| async move {
            seen.store(epoch, Ordering::SeqCst);
        });
        assert_eq!(timer.epoch(), 7);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&fired);
        let timer = RegistrationTimer::start(3, Duration::from_secs(10), move |epoch| async move {
            seen.store(epoch, Ordering::SeqCst);
        });

        timer.cancel();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
