//! Periodic server-pull driver (§4.7). Never initiates uploads; guarantees
//! its own firings never overlap.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::logging;

pub struct Poller {
    handle: JoinHandle<()>,
}

impl Poller {
    pub fn spawn<F, Fut>(period: Duration, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let in_flight = Arc::new(AtomicBool::new(false));
        let callback = Arc::new(callback);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    logging::info("poller tick skipped: previous check still running");
                    continue;
                }
                let in_flight = in_flight.clone();
                let callback = callback.clone();
                (callback)().await;
                in_flight.store(false, Ordering::SeqCst);
            }
        });

        Self { handle }
    }

    /// Cancellation is synchronous: `stop()` aborts the task immediately,
    /// matching the "Timers are cancelled synchronously" guarantee (§5).
    pub fn stop(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test(start_paused = true)]
    async fn poller_fires_at_configured_period_and_stops_cleanly() {
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();
        let poller = Poller::spawn(Duration::from_millis(10), move || {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::advance(Duration::from_millis(35)).await;
        tokio::task::yield_now().await;

        assert!(count.load(Ordering::SeqCst) >= 2);
        poller.stop();
    }
}
