//! Fixed-size worker pool for offloading handler work.
//!
//! Packet handlers run on the reactor thread; anything slow belongs here.
//! Workers drain the queue in FIFO order, a panicking task never takes its
//! worker down, and shutdown lets queued work finish before joining.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tracing::{debug, error, info};

use crate::error::PoolError;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: VecDeque<Job>,
    stopped: bool,
}

struct PoolInner {
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Fixed-size pool of background worker threads.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn a pool with the given number of workers (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                stopped: false,
            }),
            available: Condvar::new(),
        });

        let workers = (0..size)
            .map(|i| {
                let inner = Arc::clone(&inner);
                thread::Builder::new()
                    .name(format!("netframe-worker-{i}"))
                    .spawn(move || worker_loop(&inner))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        info!("worker pool started with {size} threads");
        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Queue a task for execution.
    ///
    /// Fails with [`PoolError::Stopped`] once [`shutdown`](Self::shutdown)
    /// has begun.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock().expect("pool state poisoned");
        if state.stopped {
            return Err(PoolError::Stopped);
        }
        state.queue.push_back(Box::new(task));
        drop(state);
        self.inner.available.notify_one();
        Ok(())
    }

    /// Number of tasks waiting for a worker.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().expect("pool state poisoned").queue.len()
    }

    /// Stop accepting tasks, let queued work finish, and join all workers.
    ///
    /// Idempotent; later calls return immediately.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock().expect("pool state poisoned");
            if state.stopped {
                return;
            }
            state.stopped = true;
        }
        self.inner.available.notify_all();

        let workers: Vec<_> = self
            .workers
            .lock()
            .expect("pool workers poisoned")
            .drain(..)
            .collect();
        for worker in workers {
            if worker.join().is_err() {
                error!("worker thread terminated abnormally");
            }
        }
        debug!("worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let job = {
            let mut state = inner.state.lock().expect("pool state poisoned");
            loop {
                if let Some(job) = state.queue.pop_front() {
                    break job;
                }
                if state.stopped {
                    return; // Queue drained and no more tasks coming.
                }
                state = inner.available.wait(state).expect("pool state poisoned");
            }
        };

        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("worker task panicked");
        }
    }
}
