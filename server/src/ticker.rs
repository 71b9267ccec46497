//! Periodic per-session task.

use log::debug;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Owns the handle of one periodic task. The task is started once and
/// released once, either by [`Ticker::stop`] or by the tick callback
/// returning `Break`.
#[derive(Debug, Default)]
pub struct Ticker {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the loop calling `on_tick` every `period`. The first call
    /// happens one full period after start. Returns false if already started.
    pub fn start<F, Fut>(&self, period: Duration, mut on_tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let mut slot = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return false;
        }

        let handle = tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // Skip the first tick since it fires immediately
            timer.tick().await;

            loop {
                timer.tick().await;
                if on_tick().await.is_break() {
                    break;
                }
            }
            debug!("Ticker loop finished");
        });

        *slot = Some(handle);
        true
    }

    /// Aborts the loop if it is still running. Only the first call has any
    /// effect; returns whether this call released the task.
    pub fn stop(&self) -> bool {
        let taken = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        match taken {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting(
        ticks: &Arc<AtomicU32>,
        stop_after: u32,
    ) -> impl FnMut() -> std::future::Ready<ControlFlow<()>> + Send + 'static {
        let ticks = Arc::clone(ticks);
        move || {
            let n = ticks.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if n >= stop_after {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_period() {
        let ticks = Arc::new(AtomicU32::new(0));
        let ticker = Ticker::new();
        assert!(ticker.start(Duration::from_secs(1), counting(&ticks, u32::MAX)));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(ticker.is_running());

        assert!(ticker.stop());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_exactly_once() {
        let ticks = Arc::new(AtomicU32::new(0));
        let ticker = Ticker::new();
        ticker.start(Duration::from_secs(1), counting(&ticks, u32::MAX));

        assert!(ticker.stop());
        assert!(!ticker.stop());
        assert!(!ticker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_refused() {
        let ticks = Arc::new(AtomicU32::new(0));
        let ticker = Ticker::new();
        assert!(ticker.start(Duration::from_secs(1), counting(&ticks, u32::MAX)));
        assert!(!ticker.start(Duration::from_secs(1), counting(&ticks, u32::MAX)));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        ticker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_break_ends_loop() {
        let ticks = Arc::new(AtomicU32::new(0));
        let ticker = Ticker::new();
        ticker.start(Duration::from_secs(1), counting(&ticks, 2));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert!(!ticker.is_running());
    }
}
