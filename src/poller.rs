use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio_util::sync::CancellationToken;

/// Owns the live poll timers, one per fingerprint: `idle -> active -> idle`.
///
/// The registry is the single source of truth for which fingerprints are
/// being watched; timers hold no task data and only drive the tick callback
/// on schedule.
#[derive(Clone)]
pub struct PollingScheduler {
    timers: Arc<Mutex<HashMap<String, CancellationToken>>>,
    interval: Duration,
}

impl PollingScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            interval,
        }
    }

    /// Spawns the recurring timer for this fingerprint. Idempotent: when a
    /// timer is already active the call returns `false` and the existing
    /// timer keeps running. The first tick fires one full interval after
    /// start, and each tick is awaited to completion before the next wait,
    /// so ticks for one fingerprint never overlap.
    pub fn start<F, Fut>(&self, fingerprint: &str, on_tick: F) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        {
            let mut g = self.timers.lock().unwrap();
            if g.contains_key(fingerprint) {
                return false;
            }
            g.insert(fingerprint.to_string(), token.clone());
        }

        let interval = self.interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => on_tick().await,
                }
            }
        });
        true
    }

    /// Cancels and removes the timer if present; a no-op when idle.
    pub fn stop(&self, fingerprint: &str) -> bool {
        let token = self.timers.lock().unwrap().remove(fingerprint);
        match token {
            Some(t) => {
                t.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, fingerprint: &str) -> bool {
        self.timers.lock().unwrap().contains_key(fingerprint)
    }

    pub fn active_count(&self) -> usize {
        self.timers.lock().unwrap().len()
    }

    /// Session teardown: cancels every live timer.
    pub fn shutdown(&self) {
        let drained: Vec<(String, CancellationToken)> =
            self.timers.lock().unwrap().drain().collect();
        for (_, token) in drained {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_tick(counter: Arc<AtomicUsize>) -> impl Fn() -> std::future::Ready<()> + Send {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test]
    async fn start_twice_keeps_exactly_one_timer() {
        let sched = PollingScheduler::new(Duration::from_millis(10));
        let counter = Arc::new(AtomicUsize::new(0));

        assert!(sched.start("fp-1", counting_tick(counter.clone())));
        assert!(!sched.start("fp-1", counting_tick(counter.clone())));
        assert_eq!(sched.active_count(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(counter.load(Ordering::SeqCst) >= 1);
        assert_eq!(sched.active_count(), 1);
        sched.shutdown();
    }

    #[tokio::test]
    async fn first_tick_waits_one_full_interval() {
        let sched = PollingScheduler::new(Duration::from_millis(200));
        let counter = Arc::new(AtomicUsize::new(0));
        sched.start("fp-1", counting_tick(counter.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        sched.shutdown();
    }

    #[tokio::test]
    async fn stop_halts_ticking_and_clears_the_registry() {
        let sched = PollingScheduler::new(Duration::from_millis(10));
        let counter = Arc::new(AtomicUsize::new(0));
        sched.start("fp-1", counting_tick(counter.clone()));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(sched.stop("fp-1"));
        assert!(!sched.is_active("fp-1"));

        // Let any in-flight tick drain, then verify the count has settled.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let settled = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(counter.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn stop_when_idle_is_a_noop() {
        let sched = PollingScheduler::new(Duration::from_millis(10));
        assert!(!sched.stop("fp-unknown"));
    }

    #[tokio::test]
    async fn shutdown_cancels_every_timer() {
        let sched = PollingScheduler::new(Duration::from_millis(10));
        let counter = Arc::new(AtomicUsize::new(0));
        sched.start("fp-1", counting_tick(counter.clone()));
        sched.start("fp-2", counting_tick(counter.clone()));
        assert_eq!(sched.active_count(), 2);

        sched.shutdown();
        assert_eq!(sched.active_count(), 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let settled = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(counter.load(Ordering::SeqCst), settled);
    }
}
