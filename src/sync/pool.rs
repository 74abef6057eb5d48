// ABOUTME: Bounded-concurrency task pool on a tokio semaphore
// ABOUTME: Drain waits on a Notify until queue and active count reach zero

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

use super::gate::KeyGate;
use super::stats::PoolCounters;

/// A fixed number of worker slots shared by spawned tasks.
///
/// Permits are handed out in FIFO order, so a re-submitted task goes to the
/// back of the queue.
pub struct TaskPool {
    name: &'static str,
    width: usize,
    slots: Arc<Semaphore>,
    counters: Arc<PoolCounters>,
    idle: Arc<Notify>,
}

impl TaskPool {
    pub fn new(name: &'static str, width: usize) -> Self {
        Self {
            name,
            width,
            slots: Arc::new(Semaphore::new(width)),
            counters: Arc::new(PoolCounters::default()),
            idle: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn counters(&self) -> &PoolCounters {
        &self.counters
    }

    /// Queue a future; it runs once a worker slot is free.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        let slots = self.slots.clone();
        let counters = self.counters.clone();
        let idle = self.idle.clone();

        tokio::spawn(async move {
            let permit = slots.acquire_owned().await;
            // Count as active before leaving the queue so outstanding() never reads 0 mid-handoff
            counters.active.fetch_add(1, Ordering::SeqCst);
            counters.queued.fetch_sub(1, Ordering::SeqCst);
            let _slot = ActiveSlot { counters, idle };
            if permit.is_ok() {
                work.await;
            }
        });
    }

    /// Resolve once nothing is queued or running and `gate` holds no keys.
    pub async fn drain(&self, gate: &KeyGate) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.counters.outstanding() == 0 && gate.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

struct ActiveSlot {
    counters: Arc<PoolCounters>,
    idle: Arc<Notify>,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        self.idle.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_width_bounds_concurrency() {
        let pool = TaskPool::new("test", 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            pool.spawn(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        pool.drain(&KeyGate::new()).await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.counters().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_drain_on_idle_pool_returns_immediately() {
        let pool = TaskPool::new("test", 1);
        tokio::time::timeout(Duration::from_secs(1), pool.drain(&KeyGate::new()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_drain_waits_for_resubmitted_work() {
        let pool = Arc::new(TaskPool::new("test", 1));
        let done = Arc::new(AtomicUsize::new(0));

        let inner_pool = pool.clone();
        let inner_done = done.clone();
        pool.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let done = inner_done.clone();
            inner_pool.spawn(async move {
                done.fetch_add(1, Ordering::SeqCst);
            });
        });

        pool.drain(&KeyGate::new()).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
