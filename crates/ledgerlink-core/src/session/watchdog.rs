//! Idle watchdog
//!
//! A single re-armable timer. Arming replaces any previous timer; each arm
//! gets a new generation so a timer that fires late can tell it is stale.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug)]
pub struct IdleWatchdog {
    timeout: Duration,
    slot: Arc<Mutex<Slot>>,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl IdleWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start (or restart) the timer
    ///
    /// `on_idle` receives the generation it was armed with. The fired task
    /// detaches itself first, so `cancel` called from `on_idle` cannot abort
    /// it. Returns the new deadline.
    pub fn arm<F, Fut>(&self, on_idle: F) -> Instant
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + self.timeout;
        let mut slot = lock(&self.slot);

        slot.generation += 1;
        let generation = slot.generation;
        if let Some(previous) = slot.handle.take() {
            previous.abort();
        }

        let shared = Arc::clone(&self.slot);
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut slot = lock(&shared);
                if slot.generation != generation {
                    return;
                }
                // Dropping the handle detaches the task without aborting it
                slot.handle.take();
            }
            on_idle(generation).await;
        }));

        deadline
    }

    /// Stop the timer, if any
    pub fn cancel(&self) {
        let mut slot = lock(&self.slot);
        slot.generation += 1;
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
    }

    pub fn generation(&self) -> u64 {
        lock(&self.slot).generation
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.slot).handle.is_some()
    }
}

impl Drop for IdleWatchdog {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_timeout() {
        let watchdog = IdleWatchdog::new(Duration::from_secs(60));
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();

        watchdog.arm(move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(watchdog.is_armed());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!watchdog.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_postpones() {
        let watchdog = IdleWatchdog::new(Duration::from_secs(60));
        let fired = Arc::new(AtomicU32::new(0));

        let counter = fired.clone();
        watchdog.arm(move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(40)).await;
        let counter = fired.clone();
        watchdog.arm(move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let watchdog = IdleWatchdog::new(Duration::from_secs(60));
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();

        watchdog.arm(move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        watchdog.cancel();
        assert!(!watchdog.is_armed());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_increments() {
        let watchdog = IdleWatchdog::new(Duration::from_secs(1));
        let before = watchdog.generation();
        watchdog.arm(|_| async {});
        assert_eq!(watchdog.generation(), before + 1);
        watchdog.cancel();
        assert_eq!(watchdog.generation(), before + 2);
    }
}
