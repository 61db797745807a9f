use std::{
    collections::{HashSet, VecDeque},
    sync::Mutex,
    time::Duration,
};

use tokio::{sync::Notify, time::Instant};
use url::Url;

/// One unit of pending work: a canonical URL, its BFS depth, and the page
/// that discovered it.
#[derive(Debug, Clone)]
pub struct FrontierItem {
    pub url: Url,
    pub depth: usize,
    pub parent: Option<Url>,
}

/// Seen-set plus FIFO work queue. A canonical URL passes `try_admit` at most
/// once for the lifetime of the frontier; the queue preserves insertion
/// order, which yields breadth-first traversal as depths increase from the
/// seed. Locks are plain `std` mutexes: no caller suspends while holding
/// one.
#[derive(Debug, Default)]
pub struct Frontier {
    seen: Mutex<HashSet<String>>,
    queue: Mutex<VecDeque<FrontierItem>>,
    notify: Notify,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check-and-insert into the seen-set. True iff the URL was
    /// newly inserted.
    pub fn try_admit(&self, url: &Url) -> bool {
        self.seen
            .lock()
            .expect("frontier seen-set poisoned")
            .insert(url.as_str().to_string())
    }

    pub fn push(&self, item: FrontierItem) {
        self.queue
            .lock()
            .expect("frontier queue poisoned")
            .push_back(item);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<FrontierItem> {
        self.queue
            .lock()
            .expect("frontier queue poisoned")
            .pop_front()
    }

    /// Remove and return the oldest item, waiting up to `poll` for one to
    /// arrive. `None` on timeout.
    pub async fn pop(&self, poll: Duration) -> Option<FrontierItem> {
        let deadline = Instant::now() + poll;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let notified = self.notify.notified();
            // A push may have landed between the pop attempt and the
            // listener registration; re-check before waiting.
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue
            .lock()
            .expect("frontier queue poisoned")
            .is_empty()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.lock().expect("frontier seen-set poisoned").len()
    }
}
