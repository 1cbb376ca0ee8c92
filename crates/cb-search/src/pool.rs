//! Demand-queue worker pool.
//!
//! Workers pull jobs from a shared queue, keep their outputs in a private
//! accumulator and hand the whole accumulator back when the queue drains;
//! the coordinator folds the per-worker partials after the join.  Jobs never
//! synchronize with each other mid-flight.  Cancellation clears the pending
//! queue; jobs already picked up run to completion and their outputs are
//! kept.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared cancellation handle.  Cloning hands out another view of the same
/// flag; strategies poll it before dispatching new work and inside long
/// inner loops.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.  Queued-but-unstarted work is discarded;
    /// in-flight jobs complete and partial results remain valid.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Progress tick sent to an optional observer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// Pending-job queue shared between the coordinator and the workers.
pub struct JobQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> JobQueue<T> {
    pub fn new(jobs: impl IntoIterator<Item = T>) -> Self {
        Self {
            inner: Mutex::new(jobs.into_iter().collect()),
        }
    }

    /// Hand the next pending job to a worker.
    pub fn demand(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Drop every pending job.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Run `jobs` on `workers` threads and fold the per-worker accumulators
/// after the pool drains.  Outputs arrive in completion order; jobs must
/// carry their own aggregation key when order matters.
pub fn run_pool<T, R, F>(
    jobs: Vec<T>,
    workers: usize,
    interrupt: &Interrupt,
    progress: Option<&Sender<Progress>>,
    work: F,
) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let total = jobs.len();
    let queue = JobQueue::new(jobs);
    let workers = workers.max(1);
    let completed = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        let queue = &queue;
        let completed = &completed;
        let work = &work;
        let mut handles = Vec::with_capacity(workers);

        for worker in 0..workers {
            handles.push(scope.spawn(move || {
                let mut accumulator = Vec::new();
                loop {
                    if interrupt.interrupted() {
                        queue.clear();
                        break;
                    }
                    let Some(job) = queue.demand() else { break };
                    accumulator.push(work(job));
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(sender) = progress {
                        let _ = sender.send(Progress {
                            completed: done,
                            total,
                        });
                    }
                }
                debug!(worker, produced = accumulator.len(), "worker drained");
                accumulator
            }));
        }

        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap_or_default())
            .collect()
    })
}
