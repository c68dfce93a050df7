//! Cached worker pool executing blocking waits
//!
//! Threads are spawned on demand up to a configured maximum and exit after an
//! idle period. Every job carries a [`CancellationToken`]; shutting the pool
//! down cancels all tokens of queued and running jobs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::cancel::{CancelReason, CancellationToken};
use crate::error::{IfdError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker accounting. Queueing a job and a worker deciding to exit both
/// happen under this lock.
#[derive(Debug, Default)]
struct Workers {
    waiting: usize,
    total: usize,
}

struct Shared {
    jobs: Receiver<(u64, Job)>,
    live: Mutex<HashMap<u64, CancellationToken>>,
    workers: Mutex<Workers>,
    max_workers: usize,
    keep_alive: Duration,
}

impl Shared {
    /// Whether `incoming` more jobs outnumber the waiting workers
    fn needs_worker(&self, workers: &Workers, incoming: usize) -> bool {
        self.jobs.len() + incoming > workers.waiting && workers.total < self.max_workers
    }
}

/// Pool of worker threads owned by one context
pub struct WorkerPool {
    sender: Mutex<Option<Sender<(u64, Job)>>>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let workers = self.shared.workers.lock();
        f.debug_struct("WorkerPool")
            .field("workers", &workers.total)
            .field("waiting", &workers.waiting)
            .field("max_workers", &self.shared.max_workers)
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish()
    }
}

impl WorkerPool {
    /// Create an empty pool
    pub fn new(max_workers: usize, keep_alive: Duration) -> Self {
        let (sender, jobs) = unbounded();
        Self {
            sender: Mutex::new(Some(sender)),
            shared: Arc::new(Shared {
                jobs,
                live: Mutex::new(HashMap::new()),
                workers: Mutex::new(Workers::default()),
                max_workers: max_workers.max(1),
                keep_alive,
            }),
            next_id: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Schedule `job`, which observes `token`
    pub fn execute<F>(&self, token: CancellationToken, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(IfdError::SessionTerminated);
        };

        let mut workers = self.shared.workers.lock();
        if self.shared.needs_worker(&workers, 1) {
            spawn_worker(&self.shared, &mut workers)?;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.live.lock().insert(id, token);
        sender.send((id, Box::new(job))).map_err(|_| {
            self.shared.live.lock().remove(&id);
            IfdError::SessionTerminated
        })
    }

    /// Number of jobs scheduled or running
    pub fn pending(&self) -> usize {
        self.shared.live.lock().len()
    }

    /// Number of live worker threads
    pub fn worker_count(&self) -> usize {
        self.shared.workers.lock().total
    }

    /// Cancel every job and stop accepting new ones
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sender.lock().take();

        let tokens: Vec<_> = self.shared.live.lock().drain().map(|(_, t)| t).collect();
        debug!(cancelled = tokens.len(), "Shutting down IFD worker pool");
        for token in tokens {
            token.cancel_with(CancelReason::Teardown);
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(shared: &Arc<Shared>, workers: &mut Workers) -> Result<()> {
    let index = workers.total;
    trace!(index, "Spawning IFD worker");

    let worker_shared = Arc::clone(shared);
    thread::Builder::new()
        .name(format!("ifd-worker-{index}"))
        .spawn(move || worker_loop(worker_shared))
        .map_err(|e| {
            warn!(error = %e, "Failed to spawn IFD worker");
            IfdError::IllegalState("unable to spawn worker thread")
        })?;
    workers.total += 1;
    workers.waiting += 1;
    Ok(())
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let next = shared.jobs.recv_timeout(shared.keep_alive);
        let mut workers = shared.workers.lock();
        match next {
            Ok((id, job)) => {
                workers.waiting -= 1;
                // Jobs queued while this worker still counted as waiting
                if shared.needs_worker(&workers, 0) {
                    let _ = spawn_worker(&shared, &mut workers);
                }
                drop(workers);

                job();
                shared.live.lock().remove(&id);
                shared.workers.lock().waiting += 1;
            }
            Err(RecvTimeoutError::Timeout) if !shared.jobs.is_empty() => {}
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                workers.waiting -= 1;
                workers.total -= 1;
                break;
            }
        }
    }
    trace!("IFD worker exiting");
}
