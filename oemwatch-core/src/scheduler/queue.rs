//! Priority queue of outstanding crawl jobs. Ordered by priority
//! descending, ties broken by scheduled instant ascending.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub source_page_id: String,
    pub tenant_id: String,
    pub url: String,
    pub priority: i32,
    pub scheduled_at: Instant,
}

impl PartialEq for CrawlJob {
    fn eq(&self, other: &Self) -> bool {
        self.source_page_id == other.source_page_id
    }
}

impl Eq for CrawlJob {}

impl Ord for CrawlJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.scheduled_at.cmp(&self.scheduled_at))
    }
}

impl PartialOrd for CrawlJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Thin wrapper over `BinaryHeap` exposing the queue semantics the driver
/// needs: O(log n) push/pop, O(n) idempotent removal by URL.
#[derive(Debug, Default)]
pub struct CrawlQueue {
    heap: BinaryHeap<CrawlJob>,
}

impl CrawlQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub fn push(&mut self, job: CrawlJob) {
        self.heap.push(job);
    }

    pub fn pop(&mut self) -> Option<CrawlJob> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Removes the first queued job for `url`, if any. Returns whether a
    /// job was actually removed.
    pub fn remove(&mut self, url: &str) -> bool {
        let before = self.heap.len();
        let remaining: Vec<CrawlJob> = self.heap.drain().filter(|j| j.url != url).collect();
        let removed = remaining.len() != before;
        self.heap = remaining.into_iter().collect();
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, priority: i32) -> CrawlJob {
        CrawlJob {
            source_page_id: id.into(),
            tenant_id: "bmw".into(),
            url: format!("https://example.com/{id}"),
            priority,
            scheduled_at: Instant::now(),
        }
    }

    #[test]
    fn pops_highest_priority_first() {
        let mut queue = CrawlQueue::new();
        queue.push(job("low", 1));
        queue.push(job("high", 10));
        queue.push(job("mid", 5));

        assert_eq!(queue.pop().unwrap().source_page_id, "high");
        assert_eq!(queue.pop().unwrap().source_page_id, "mid");
        assert_eq!(queue.pop().unwrap().source_page_id, "low");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn ties_break_by_scheduled_instant_ascending() {
        let earlier = job("earlier", 5);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let later = job("later", 5);

        let mut queue = CrawlQueue::new();
        queue.push(later);
        queue.push(earlier);

        assert_eq!(queue.pop().unwrap().source_page_id, "earlier");
        assert_eq!(queue.pop().unwrap().source_page_id, "later");
    }

    #[test]
    fn remove_is_idempotent() {
        let mut queue = CrawlQueue::new();
        queue.push(job("a", 1));
        assert!(queue.remove("https://example.com/a"));
        assert!(!queue.remove("https://example.com/a"));
        assert!(queue.is_empty());
    }
}
