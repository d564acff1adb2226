//! In-process bounded work queue (C9, §4.9): holds due pages between the
//! Scheduler's tick and its worker pool, keeping one FIFO lane per OEM so
//! dispatch order within an OEM follows `PageType::dispatch_priority()`
//! while OEMs themselves are drained round-robin.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use oemwatch_common::ids::OemId;
use oemwatch_common::types::SourcePage;
use tokio::sync::{Notify, Semaphore};

/// One due page queued for the crawl pipeline.
#[derive(Clone, Debug)]
pub struct CrawlJob {
    pub oem_id: OemId,
    pub page: SourcePage,
}

struct Lanes {
    /// One FIFO per OEM; pages are already dispatch-priority sorted when
    /// `Scheduler` enqueues them (§4.9 Ordering), so this is a plain queue.
    by_oem: HashMap<OemId, VecDeque<SourcePage>>,
    /// OEMs with a non-empty lane, in round-robin order.
    cursor: VecDeque<OemId>,
}

/// Bounded queue: `capacity` caps the total number of jobs in flight
/// (queued + checked out but not yet acknowledged), matching
/// `ConcurrencyConfig.global_concurrency` at the call site.
pub struct WorkQueue {
    lanes: Mutex<Lanes>,
    permits: Semaphore,
    notify: Notify,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            lanes: Mutex::new(Lanes {
                by_oem: HashMap::new(),
                cursor: VecDeque::new(),
            }),
            permits: Semaphore::new(capacity),
            notify: Notify::new(),
        }
    }

    /// Enqueue one OEM's due pages, already sorted by dispatch priority.
    pub fn enqueue_batch(&self, oem_id: &OemId, pages: Vec<SourcePage>) {
        if pages.is_empty() {
            return;
        }
        let mut lanes = self.lanes.lock().unwrap();
        let was_empty_or_absent = lanes.by_oem.get(oem_id).map(|q| q.is_empty()).unwrap_or(true);
        let lane = lanes.by_oem.entry(oem_id.clone()).or_default();
        lane.extend(pages);
        if was_empty_or_absent {
            lanes.cursor.push_back(oem_id.clone());
        }
        drop(lanes);
        self.notify.notify_waiters();
    }

    /// Draw the next job, round-robining across OEM lanes. Blocks (without
    /// spinning) until a job is available or a permit can't be acquired
    /// because the queue is shut down.
    pub async fn dequeue(&self) -> Option<CrawlJob> {
        let _permit = self.permits.acquire().await.ok()?;
        loop {
            {
                let mut lanes = self.lanes.lock().unwrap();
                if let Some(oem_id) = lanes.cursor.pop_front() {
                    let page = lanes.by_oem.get_mut(&oem_id).and_then(|q| q.pop_front());
                    if let Some(page) = page {
                        let lane_has_more = lanes.by_oem.get(&oem_id).map(|q| !q.is_empty()).unwrap_or(false);
                        if lane_has_more {
                            lanes.cursor.push_back(oem_id.clone());
                        }
                        _permit.forget();
                        return Some(CrawlJob { oem_id, page });
                    }
                }
            }
            self.notify.notified().await;
        }
    }

    /// Release one slot back to the bounded capacity once a job finishes.
    pub fn release(&self) {
        self.permits.add_permits(1);
    }

    /// Whether any lane still holds queued pages for `oem_id` — used by the
    /// Scheduler to decide when it's safe to close an ImportRun (§4.9 step 5).
    pub fn is_oem_drained(&self, oem_id: &OemId) -> bool {
        self.lanes.lock().unwrap().by_oem.get(oem_id).map(|q| q.is_empty()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oemwatch_common::types::{PageType, SourcePage};

    fn page(oem: &str, page_type: PageType) -> SourcePage {
        SourcePage::new_seed(OemId::new(oem), format!("https://{oem}.example/{:?}", page_type), page_type)
    }

    #[tokio::test]
    async fn round_robins_across_oem_lanes() {
        let queue = WorkQueue::new(10);
        queue.enqueue_batch(&OemId::new("ford"), vec![page("ford", PageType::Offers), page("ford", PageType::Homepage)]);
        queue.enqueue_batch(&OemId::new("toyota"), vec![page("toyota", PageType::Offers)]);

        let first = queue.dequeue().await.unwrap();
        let second = queue.dequeue().await.unwrap();
        let third = queue.dequeue().await.unwrap();

        assert_eq!(first.oem_id, OemId::new("ford"));
        assert_eq!(second.oem_id, OemId::new("toyota"));
        assert_eq!(third.oem_id, OemId::new("ford"));
    }

    #[tokio::test]
    async fn drains_are_observable_per_oem() {
        let queue = WorkQueue::new(10);
        let oem = OemId::new("ford");
        queue.enqueue_batch(&oem, vec![page("ford", PageType::Offers)]);
        assert!(!queue.is_oem_drained(&oem));
        let _ = queue.dequeue().await.unwrap();
        assert!(queue.is_oem_drained(&oem));
    }
}
