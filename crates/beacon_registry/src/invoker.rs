//! Per-key serialized task lanes.
//!
//! [`SerializedInvoker`] guarantees that tasks submitted under the same key
//! run strictly one at a time, in submission order, no matter how many
//! threads submit concurrently; tasks under different keys run in parallel.
//! It is the sole mutual-exclusion primitive protecting an instance record:
//! a fairness-ordered queue instead of a per-record lock, so mutation
//! ordering is externally observable.
//!
//! Each key owns an unbounded mpsc lane drained by one spawned task, the same
//! shape as a per-connection writer task. A panicking task is caught and
//! reported only to its own caller (its completion channel just drops); the
//! lane keeps draining.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Lane {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl Lane {
    fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("serialized task panicked; lane continues");
                }
                worker_pending.fetch_sub(1, Ordering::AcqRel);
            }
        });
        Lane { tx, pending }
    }
}

/// Per-key FIFO task queue. See module docs.
pub struct SerializedInvoker {
    lanes: DashMap<String, Lane>,
}

impl SerializedInvoker {
    pub fn new() -> Self {
        Self {
            lanes: DashMap::new(),
        }
    }

    /// Enqueue `task` on `key`'s lane. The returned receiver resolves with
    /// the task's result; it errors if the task panicked or the lane was
    /// torn down before running it.
    pub fn submit<T, F>(&self, key: &str, task: F) -> oneshot::Receiver<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = done_tx.send(task());
        });

        // The entry guard pins the lane while we enqueue, so `retire` on the
        // same key cannot observe pending == 0 in between.
        let lane = self.lanes.entry(key.to_string()).or_insert_with(Lane::spawn);
        lane.pending.fetch_add(1, Ordering::AcqRel);
        if lane.tx.send(job).is_err() {
            // Unreachable while the lane is held in the map; the worker only
            // exits once every sender is gone.
            lane.pending.fetch_sub(1, Ordering::AcqRel);
        }
        done_rx
    }

    /// Drop `key`'s lane if it has no pending tasks. Called after the
    /// caller has observed the owning record's removal; if new tasks raced
    /// in, the lane stays and a later retire gets it.
    pub fn retire(&self, key: &str) {
        self.lanes
            .remove_if(key, |_, lane| lane.pending.load(Ordering::Acquire) == 0);
    }

    /// Number of live lanes.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }
}

impl Default for SerializedInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Barrier, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_tasks_run_in_submission_order() {
        let invoker = SerializedInvoker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut last = None;
        for i in 0..100u32 {
            let seen = seen.clone();
            last = Some(invoker.submit("k", move || {
                seen.lock().unwrap().push(i);
            }));
        }
        last.unwrap().await.expect("task completed");

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn different_keys_run_concurrently() {
        let invoker = SerializedInvoker::new();
        let barrier = Arc::new(Barrier::new(2));

        let b1 = barrier.clone();
        let a = invoker.submit("a", move || {
            b1.wait();
        });
        let b2 = barrier.clone();
        let b = invoker.submit("b", move || {
            b2.wait();
        });

        // Both complete only if the lanes actually run in parallel.
        let joined = tokio::time::timeout(Duration::from_secs(5), async {
            a.await.unwrap();
            b.await.unwrap();
        })
        .await;
        assert!(joined.is_ok(), "cross-key tasks deadlocked");
    }

    #[tokio::test]
    async fn panicking_task_does_not_block_the_lane() {
        let invoker = SerializedInvoker::new();

        let bad = invoker.submit("k", || panic!("boom"));
        let good = invoker.submit("k", || 7u32);

        assert!(bad.await.is_err());
        assert_eq!(good.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn retire_removes_idle_lane() {
        let invoker = SerializedInvoker::new();

        // On the current-thread runtime the worker decrements its pending
        // counter before yielding back, so the lane is observably idle here.
        invoker.submit("k", || ()).await.unwrap();
        assert_eq!(invoker.lane_count(), 1);
        invoker.retire("k");
        assert_eq!(invoker.lane_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn retire_keeps_lane_with_pending_work() {
        let invoker = SerializedInvoker::new();

        let gate = Arc::new(Barrier::new(2));
        let g = gate.clone();
        let rx = invoker.submit("k", move || {
            g.wait();
        });
        invoker.retire("k");
        assert_eq!(invoker.lane_count(), 1);
        gate.wait();
        rx.await.unwrap();
    }
}
