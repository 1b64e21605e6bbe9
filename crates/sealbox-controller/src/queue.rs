//! Rate-limited work queue with dedupe and retry bookkeeping.
//!
//! Producers (watch callbacks) enqueue resource keys; a worker consumes
//! them one at a time. An item enqueued while it is being processed is
//! deferred, not dropped, and re-queued when processing finishes, so the
//! worker always reconciles against the latest state exactly once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

/// A deduplicating work queue with per-item exponential backoff.
///
/// Thread-safe; the internal lock is never held across an await point.
pub struct WorkQueue<T> {
    inner: Mutex<QueueInner<T>>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

struct QueueInner<T> {
    queue: VecDeque<T>,
    /// Items waiting to be processed (or reprocessed).
    dirty: HashSet<T>,
    /// Items currently held by a worker.
    processing: HashSet<T>,
    /// Consecutive rate-limited requeues per item.
    retries: HashMap<T, u32>,
    shutting_down: bool,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash,
{
    /// Create a queue with the given backoff window.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                retries: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            base_delay,
            max_delay,
        }
    }

    /// Enqueue an item.
    ///
    /// A no-op if the item is already waiting. If the item is currently
    /// being processed it is marked dirty and re-queued on `done`.
    pub fn add(&self, item: T) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.shutting_down {
                return;
            }
            if !inner.dirty.insert(item.clone()) {
                return;
            }
            if inner.processing.contains(&item) {
                return;
            }
            inner.queue.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Wait for the next item. Returns `None` once the queue is shut down
    /// and drained.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(item) = inner.queue.pop_front() {
                    inner.dirty.remove(&item);
                    inner.processing.insert(item.clone());
                    return Some(item);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark an item as finished. If it went dirty while being processed it
    /// is re-queued immediately.
    pub fn done(&self, item: &T) {
        let requeued = {
            let mut inner = self.inner.lock().unwrap();
            inner.processing.remove(item);
            if inner.dirty.contains(item) {
                inner.queue.push_back(item.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Number of consecutive rate-limited requeues for an item.
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .retries
            .get(item)
            .copied()
            .unwrap_or(0)
    }

    /// Clear an item's retry bookkeeping.
    pub fn forget(&self, item: &T) {
        self.inner.lock().unwrap().retries.remove(item);
    }

    /// Items currently queued (not counting in-flight ones).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting new items. Queued items are still handed out until
    /// the queue is drained.
    pub fn shut_down(&self) {
        self.inner.lock().unwrap().shutting_down = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().unwrap().shutting_down
    }

    fn next_delay(&self, item: &T) -> Duration {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.retries.entry(item.clone()).or_insert(0);
        *count += 1;
        let exponent = (*count - 1).min(31);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Re-enqueue an item after its exponential backoff delay.
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        if self.is_shutting_down() {
            return;
        }
        let delay = self.next_delay(&item);
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> Arc<WorkQueue<String>> {
        Arc::new(WorkQueue::new(
            Duration::from_millis(5),
            Duration::from_secs(1000),
        ))
    }

    #[tokio::test]
    async fn duplicate_adds_coalesce() {
        let q = queue();
        q.add("a".to_string());
        q.add("a".to_string());
        q.add("b".to_string());
        assert_eq!(q.len(), 2);

        assert_eq!(q.get().await.unwrap(), "a");
        assert_eq!(q.get().await.unwrap(), "b");
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn add_during_processing_requeues_on_done() {
        let q = queue();
        q.add("a".to_string());
        let item = q.get().await.unwrap();

        // Arrives while the worker holds the item.
        q.add("a".to_string());
        assert!(q.is_empty());

        q.done(&item);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await.unwrap(), "a");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_backoff_grows_and_forget_resets() {
        let q = queue();

        q.add_rate_limited("a".to_string());
        assert_eq!(q.num_requeues(&"a".to_string()), 1);
        q.add_rate_limited("a".to_string());
        assert_eq!(q.num_requeues(&"a".to_string()), 2);

        // Paused clock auto-advances through the backoff sleeps.
        let item = q.get().await.unwrap();
        assert_eq!(item, "a");
        q.done(&item);

        q.forget(&"a".to_string());
        assert_eq!(q.num_requeues(&"a".to_string()), 0);
    }

    #[test]
    fn backoff_delay_is_capped() {
        let q = WorkQueue::<String>::new(Duration::from_millis(5), Duration::from_secs(1000));
        let item = "a".to_string();
        let mut last = Duration::ZERO;
        for _ in 0..40 {
            last = q.next_delay(&item);
        }
        assert_eq!(last, Duration::from_secs(1000));
    }

    #[tokio::test]
    async fn shutdown_drains_then_ends() {
        let q = queue();
        q.add("a".to_string());
        q.shut_down();

        // Drops new work, hands out queued work, then signals the end.
        q.add("b".to_string());
        assert_eq!(q.get().await.unwrap(), "a");
        assert!(q.get().await.is_none());
    }
}
