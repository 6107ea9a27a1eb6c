//! Cancellable periodic tasks.
//!
//! Every refresh loop and the mining progress poll run as a [`PeriodicTask`]:
//! a spawned loop with a fixed period that ends when its tick returns
//! [`Tick::Stop`], when [`PeriodicTask::cancel`] or [`PeriodicTask::stop`]
//! is called, or when the handle is dropped. Dropping aborts a tick in
//! flight; `stop` lets it finish.

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// What a tick tells its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Stop,
}

pub struct PeriodicTask {
    name: &'static str,
    stop_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn a loop whose first tick fires immediately.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Tick> + Send + 'static,
    {
        Self::spawn_at(name, Instant::now(), period, tick)
    }

    /// Spawn a loop whose first tick fires one `period` from now.
    pub fn spawn_delayed<F, Fut>(name: &'static str, period: Duration, tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Tick> + Send + 'static,
    {
        Self::spawn_at(name, Instant::now() + period, period, tick)
    }

    fn spawn_at<F, Fut>(name: &'static str, start: Instant, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Tick> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(start, period);
            // A slow tick pushes the schedule back instead of bursting.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.recv() => {
                        tracing::debug!(task = name, "periodic task cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        if tick().await == Tick::Stop {
                            tracing::debug!(task = name, "periodic task finished");
                            break;
                        }
                    }
                }
            }
        });

        tracing::debug!(task = name, period_ms = period.as_millis() as u64, "periodic task started");
        Self {
            name,
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Ask the loop to stop. A tick already in flight completes first.
    pub fn cancel(&self) {
        let _ = self.stop_tx.send(());
    }

    /// Release the handle without cutting short a tick in flight. The loop
    /// exits at its next turn.
    pub fn stop(mut self) {
        tracing::debug!(task = self.name, "periodic task stopping");
        self.cancel();
        self.handle.take();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    /// Cancel and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn ticks_until_stop() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let task = PeriodicTask::spawn("count", Duration::from_secs(1), move || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                    Tick::Stop
                } else {
                    Tick::Continue
                }
            }
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(task.is_finished());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_future_ticks() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let task = PeriodicTask::spawn("cancel", Duration::from_secs(5), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Tick::Continue
            }
        });

        tokio::time::sleep(Duration::from_secs(6)).await;
        task.shutdown().await;
        let seen = count.load(Ordering::SeqCst);
        assert_eq!(seen, 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_task_waits_one_period() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let _task = PeriodicTask::spawn_delayed("delayed", Duration::from_secs(1), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Tick::Continue
            }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_aborts_the_loop() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let task = PeriodicTask::spawn("drop", Duration::from_secs(1), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Tick::Continue
            }
        });
        tokio::time::sleep(Duration::from_millis(1500)).await;
        drop(task);
        let seen = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_the_tick_in_flight_finish() {
        let finished = Arc::new(AtomicU32::new(0));
        let f = Arc::clone(&finished);
        let task = PeriodicTask::spawn("slow", Duration::from_secs(1), move || {
            let f = Arc::clone(&f);
            async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                f.fetch_add(1, Ordering::SeqCst);
                Tick::Continue
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        task.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
