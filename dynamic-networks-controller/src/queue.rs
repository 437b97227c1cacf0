use std::{
    collections::{HashMap, HashSet, VecDeque},
    hash::Hash,
    sync::Arc,
    time::Duration,
};

use log::trace;
use tokio::{
    sync::{Mutex, Notify},
    time::sleep,
};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    requeues: HashMap<K, u32>,
    shutting_down: bool,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            requeues: HashMap::new(),
            shutting_down: false,
        }
    }
}

struct QueueInner<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

/// Deduplicating work queue with per-key exponential backoff.
///
/// A key is handed out to at most one worker at a time. Adding a key that is being processed
/// marks it dirty, and it's queued again once the worker calls [`WorkQueue::done`].
pub struct WorkQueue<K> {
    inner: Arc<QueueInner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                base_delay,
                max_delay,
            }),
        }
    }

    pub async fn add(&self, key: K) {
        let mut state = self.inner.state.lock().await;

        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }

        state.dirty.insert(key.clone());

        if state.processing.contains(&key) {
            return;
        }

        state.queue.push_back(key);
        self.inner.notify.notify_one();
    }

    /// Waits for the next key. Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<K> {
        loop {
            {
                let mut state = self.inner.state.lock().await;

                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());

                    return Some(key);
                }

                if state.shutting_down {
                    return None;
                }
            }

            self.inner.notify.notified().await;
        }
    }

    pub async fn done(&self, key: &K) {
        let mut state = self.inner.state.lock().await;

        state.processing.remove(key);

        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            self.inner.notify.notify_one();
        }
    }

    /// Queues `key` again after its backoff delay and bumps its requeue count.
    pub async fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut state = self.inner.state.lock().await;
            let requeues = state.requeues.entry(key.clone()).or_insert(0);
            let delay = self.backoff(*requeues);
            *requeues += 1;

            delay
        };

        trace!("Requeueing with a {delay:?} delay");

        let queue = self.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            queue.add(key).await;
        });
    }

    pub async fn forget(&self, key: &K) {
        self.inner.state.lock().await.requeues.remove(key);
    }

    pub async fn num_requeues(&self, key: &K) -> u32 {
        self.inner
            .state
            .lock()
            .await
            .requeues
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// Stops accepting keys; workers drain what's queued and then get `None`.
    pub async fn shutdown(&self) {
        self.inner.state.lock().await.shutting_down = true;
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();
    }

    fn backoff(&self, requeues: u32) -> Duration {
        let factor = 2u32.checked_pow(requeues).unwrap_or(u32::MAX);

        self.inner
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.inner.max_delay)
            .min(self.inner.max_delay)
    }
}
