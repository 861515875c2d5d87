//! Bounded producer/consumer queue feeding a fixed worker pool
//!
//! The enumerator pushes file paths with [`ThreadedFileQueue::enqueue`],
//! which blocks once `capacity` paths are waiting. That backpressure keeps a
//! fast directory walk from racing arbitrarily far ahead of the slower
//! hash-and-copy work done by the workers.
//!
//! ```rust
//! use strata::queue::ThreadedFileQueue;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! let queue = ThreadedFileQueue::new(4, 16, move |_path| {
//!     counter.fetch_add(1, Ordering::Relaxed);
//! });
//!
//! for i in 0..100 {
//!     queue.enqueue(PathBuf::from(format!("file{}.txt", i)));
//! }
//! queue.finalize();
//! assert_eq!(seen.load(Ordering::Relaxed), 100);
//! ```

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, trace};

/// Queue capacity per worker used by [`ThreadedFileQueue::with_default_capacity`]
pub const QUEUE_CAPACITY_MULTIPLIER: usize = 4;

/// Number of workers to start when none is configured
///
/// One per available hardware thread, never less than one.
pub fn default_worker_count() -> usize {
    num_cpus::get().max(1)
}

type WorkItem = dyn Fn(&Path) + Send + Sync;

struct QueueState {
    files: VecDeque<PathBuf>,
    done: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    completed: AtomicUsize,
    panicked: AtomicUsize,
    work: Box<WorkItem>,
}

/// Bounded FIFO of file paths drained by a pool of worker threads
///
/// Dropping the queue finalizes it, so every enqueued path is processed
/// before the drop returns.
pub struct ThreadedFileQueue {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Set when no worker could be spawned; items then run on the caller
    inline: bool,
}

impl ThreadedFileQueue {
    /// Start `worker_count` workers running `work` on each dequeued path
    ///
    /// Both `worker_count` and `capacity` are raised to at least 1.
    pub fn new<F>(worker_count: usize, capacity: usize, work: F) -> Self
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        let worker_count = worker_count.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                files: VecDeque::with_capacity(capacity.max(1)),
                done: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
            completed: AtomicUsize::new(0),
            panicked: AtomicUsize::new(0),
            work: Box::new(work),
        });

        let workers = (0..worker_count)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("strata-worker-{}", index))
                    .spawn(move || worker_loop(&shared))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("Failed to spawn worker thread: {}", e);
                    None
                }
            })
            .collect::<Vec<_>>();

        let inline = workers.is_empty();
        if inline {
            error!("No worker threads could be started; files will be processed inline");
        }
        trace!("Started {} workers, queue capacity {}", workers.len(), shared.capacity);

        Self {
            shared,
            workers: Mutex::new(workers),
            inline,
        }
    }

    /// Start `worker_count` workers with a capacity of
    /// `worker_count × QUEUE_CAPACITY_MULTIPLIER`
    pub fn with_default_capacity<F>(worker_count: usize, work: F) -> Self
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        let worker_count = worker_count.max(1);
        Self::new(worker_count, worker_count * QUEUE_CAPACITY_MULTIPLIER, work)
    }

    /// Add a path, blocking while the queue is full
    ///
    /// Returns `false` (and drops the path) if the queue was already finalized.
    pub fn enqueue(&self, file: PathBuf) -> bool {
        if self.inline {
            if self.is_finalized() {
                return false;
            }
            run_item(&self.shared, &file);
            return true;
        }

        let mut state = self.shared.state.lock();
        while state.files.len() >= self.shared.capacity && !state.done {
            self.shared.not_full.wait(&mut state);
        }
        if state.done {
            return false;
        }
        state.files.push_back(file);
        self.shared.not_empty.notify_one();
        true
    }

    /// Signal that no more paths will arrive and wait for all workers
    ///
    /// Paths already queued are still processed. Calling this more than once
    /// is a no-op.
    pub fn finalize(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.done {
                return;
            }
            state.done = true;
        }
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if handle.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }
    }

    /// Whether [`finalize`](Self::finalize) has been called
    pub fn is_finalized(&self) -> bool {
        self.shared.state.lock().done
    }

    /// Number of work items that have finished, panicked ones included
    pub fn completed(&self) -> usize {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// Number of work items whose callback panicked
    pub fn panicked(&self) -> usize {
        self.shared.panicked.load(Ordering::Acquire)
    }

    /// Maximum number of waiting paths
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl Drop for ThreadedFileQueue {
    fn drop(&mut self) {
        self.finalize();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let file = {
            let mut state = shared.state.lock();
            loop {
                if let Some(file) = state.files.pop_front() {
                    shared.not_full.notify_one();
                    break Some(file);
                }
                if state.done {
                    break None;
                }
                shared.not_empty.wait(&mut state);
            }
        };

        match file {
            Some(file) => run_item(shared, &file),
            None => return,
        }
    }
}

fn run_item(shared: &Shared, file: &Path) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (shared.work)(file)));
    if outcome.is_err() {
        shared.panicked.fetch_add(1, Ordering::AcqRel);
        error!("Worker panicked while processing {:?}", file);
    }
    shared.completed.fetch_add(1, Ordering::AcqRel);
}
