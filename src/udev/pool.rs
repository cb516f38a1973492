//! Bounded worker pool for uevent handling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed worker count over a bounded queue. Submission blocks when the
/// queue is full. The pool is idle when the queue is empty and no worker
/// is executing a job.
#[derive(Clone)]
pub struct Pool {
    tx: mpsc::Sender<Job>,
    queued: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl Pool {
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let queued = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        for _ in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let queued = Arc::clone(&queued);
            let active = Arc::clone(&active);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    // active is raised before queued is released; idleness
                    // must never read true mid-handoff.
                    active.fetch_add(1, Ordering::SeqCst);
                    queued.fetch_sub(1, Ordering::SeqCst);
                    job();
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }

        Self { tx, queued, active }
    }

    /// Queue a job, waiting for space when the queue is full.
    pub async fn submit(&self, job: impl FnOnce() + Send + 'static) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Box::new(job)).await.is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Blocking submit, for use off the async runtime (the netlink read
    /// loop).
    pub fn submit_blocking(&self, job: impl FnOnce() + Send + 'static) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.tx.blocking_send(Box::new(job)).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Queue empty and no job in flight.
    pub fn is_idle(&self) -> bool {
        self.queued.load(Ordering::SeqCst) == 0 && self.active.load(Ordering::SeqCst) == 0
    }
}
