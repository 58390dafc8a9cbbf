use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{panic_message, ExecutorError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A pool of worker threads for running synchronous handlers.
///
/// The pool implements a simple scheduler with the following features:
/// - Dynamic thread pool that grows up to a maximum number of workers
/// - Worker threads that automatically exit after a period of inactivity
/// - Job queuing with notification system for idle workers
/// - A panicking job is logged and the worker keeps running
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

/// Internal state shared between the pool and its worker threads
struct Inner {
    /// Duration a worker thread will wait for new jobs before shutting down
    keep_alive: Duration,
    /// Shared state protected by a mutex
    shared: Mutex<Shared>,
    /// Maximum number of worker threads allowed
    max_workers: usize,
    /// Condition variable for worker thread synchronization
    condvar: Condvar,
}

/// Shared state for the thread pool
struct Shared {
    /// Queue of pending jobs
    queue: VecDeque<Job>,
    /// Current number of worker threads
    workers: usize,
    /// Number of idle worker threads
    idle: usize,
    /// Number of workers that have been notified of new work
    notified: usize,
}

impl WorkerPool {
    /// Creates a new pool.
    ///
    /// # Arguments
    /// * `max_workers` - Maximum number of worker threads, at least one
    /// * `keep_alive` - Duration idle workers wait for new jobs
    pub fn new(max_workers: usize, keep_alive: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    queue: VecDeque::new(),
                    workers: 0,
                    idle: 0,
                    notified: 0,
                }),
                condvar: Condvar::new(),
                keep_alive,
                max_workers: max_workers.max(1),
            }),
        }
    }

    /// Queues a job, waking an idle worker or spawning a new one if needed.
    ///
    /// # Errors
    /// Returns an error if the state lock is poisoned or, when no worker is
    /// available at all, if a thread cannot be spawned. The job is dropped
    /// in that case.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut shared = self
            .inner
            .shared
            .lock()
            .map_err(|_| ExecutorError::LockPoisoned)?;

        shared.queue.push_back(Box::new(job));

        if shared.idle > 0 {
            shared.idle -= 1;
            shared.notified += 1;
            self.inner.condvar.notify_one();
        } else if shared.workers < self.inner.max_workers {
            shared.workers += 1;
            if let Err(err) = self.spawn_worker() {
                shared.workers -= 1;
                // a running worker will still drain the queue
                if shared.workers == 0 {
                    shared.queue.pop_back();
                    return Err(err);
                }
                log::warn!("Worker pool could not grow: {}", err);
            }
        }
        Ok(())
    }

    /// Spawns a new worker thread that will process jobs from the queue.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned.
    fn spawn_worker(&self) -> Result<()> {
        let inner = self.inner.clone();
        std::thread::Builder::new()
            .name("bitroute-worker".to_owned())
            .spawn(move || {
                if let Err(e) = inner.run() {
                    log::error!("Worker thread error: {}", e);
                }
            })
            .map_err(ExecutorError::ThreadSpawn)?;
        Ok(())
    }
}

impl Inner {
    /// Main worker thread loop.
    ///
    /// The worker will:
    /// 1. Process all available jobs in the queue
    /// 2. Wait for new jobs using a condition variable
    /// 3. Exit if no jobs arrive within the keep-alive duration
    ///
    /// # Errors
    /// Returns an error if mutex operations fail
    fn run(&self) -> Result<()> {
        let mut shared = self
            .shared
            .lock()
            .map_err(|_| ExecutorError::LockPoisoned)?;

        'alive: loop {
            while let Some(job) = shared.queue.pop_front() {
                drop(shared);
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    log::error!("Worker job panicked: {}", panic_message(payload.as_ref()));
                }
                shared = self
                    .shared
                    .lock()
                    .map_err(|_| ExecutorError::LockPoisoned)?;
            }

            shared.idle += 1;

            loop {
                let result = self
                    .condvar
                    .wait_timeout(shared, self.keep_alive)
                    .map_err(|_| ExecutorError::LockPoisoned)?;

                shared = result.0;
                let timeout = result.1;

                if shared.notified != 0 {
                    shared.notified -= 1;
                    continue 'alive;
                }

                if timeout.timed_out() {
                    break 'alive;
                }
            }
        }

        shared.workers -= 1;
        shared.idle -= 1;
        Ok(())
    }
}
