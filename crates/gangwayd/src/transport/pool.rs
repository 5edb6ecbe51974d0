//! Bounded worker pool for connection handling.
//!
//! The pool keeps `min_workers` threads alive permanently and grows on
//! demand up to `max_workers`. Each accepted connection occupies one
//! worker until it completes; submitting work to a saturated pool blocks
//! the caller until a worker can absorb it, which is what turns pool
//! exhaustion into accept-side backpressure.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error};

use gangway_config::PoolSettings;

use super::TRANSPORT_TARGET;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors surfaced when submitting work to the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool is shutting down and accepts no further work.
    #[error("worker pool is shut down")]
    Closed,
    /// Spawning an additional worker thread failed.
    #[error("failed to spawn worker thread: {source}")]
    Spawn {
        /// Thread creation failure.
        #[source]
        source: std::io::Error,
    },
}

struct PoolState {
    queue: VecDeque<Job>,
    workers: usize,
    idle: usize,
    shutdown: bool,
}

impl PoolState {
    /// Jobs the pool can absorb without the submitter waiting: idle
    /// workers plus the headroom for on-demand spawns.
    fn absorb_capacity(&self, max_workers: usize) -> usize {
        self.idle + max_workers.saturating_sub(self.workers)
    }
}

struct PoolShared {
    state: Mutex<PoolState>,
    work_available: Condvar,
    slot_available: Condvar,
    settings: PoolSettings,
}

/// A bounded, keep-alive worker pool.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Creates the pool and pre-spawns the minimum worker count.
    #[must_use]
    pub fn new(settings: PoolSettings) -> Self {
        let pool = Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    workers: 0,
                    idle: 0,
                    shutdown: false,
                }),
                work_available: Condvar::new(),
                slot_available: Condvar::new(),
                settings,
            }),
        };
        let min = pool.shared.settings.min_workers;
        let mut state = pool.lock();
        for _ in 0..min {
            if spawn_worker(&pool.shared).is_ok() {
                state.workers += 1;
            }
        }
        drop(state);
        pool
    }

    /// Submits one job, blocking while the pool cannot absorb it.
    ///
    /// # Errors
    ///
    /// [`PoolError::Closed`] once shutdown has begun and
    /// [`PoolError::Spawn`] when growing the pool fails with no idle
    /// worker available to fall back on.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> Result<(), PoolError> {
        let max = self.shared.settings.max_workers;
        let mut state = self.lock();
        while !state.shutdown && state.queue.len() >= state.absorb_capacity(max) {
            state = self
                .shared
                .slot_available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.shutdown {
            return Err(PoolError::Closed);
        }

        state.queue.push_back(Box::new(job));
        if state.idle == 0 && state.workers < max {
            match spawn_worker(&self.shared) {
                Ok(()) => state.workers += 1,
                Err(source) => {
                    if state.workers == 0 {
                        state.queue.pop_back();
                        return Err(PoolError::Spawn { source });
                    }
                    // An existing busy worker will pick the job up later.
                    debug!(target: TRANSPORT_TARGET, %source, "worker spawn deferred");
                }
            }
        }
        self.shared.work_available.notify_one();
        Ok(())
    }

    /// Stops the pool: rejects new work, drains queued jobs, and waits up
    /// to `timeout` for every worker to finish.
    ///
    /// Returns `true` when all workers exited within the timeout.
    #[must_use]
    pub fn shutdown(&self, timeout: Duration) -> bool {
        {
            let mut state = self.lock();
            state.shutdown = true;
        }
        self.shared.work_available.notify_all();
        self.shared.slot_available.notify_all();

        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while state.workers > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout) = self
                .shared
                .slot_available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        true
    }

    /// Current worker count; used by tests and diagnostics.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.lock().workers
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("WorkerPool")
            .field("settings", &self.shared.settings)
            .finish_non_exhaustive()
    }
}

fn spawn_worker(shared: &Arc<PoolShared>) -> Result<(), std::io::Error> {
    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name("gangway-worker".into())
        .spawn(move || worker_loop(&shared))
        .map(|_| ())
}

fn worker_loop(shared: &Arc<PoolShared>) {
    let keep_alive = shared.settings.keep_alive();
    let min = shared.settings.min_workers;
    let mut state = shared
        .state
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    loop {
        state.idle += 1;
        // Going idle raises the pool's absorb capacity; a submitter may be
        // waiting on exactly that.
        shared.slot_available.notify_one();
        let job = loop {
            if let Some(job) = state.queue.pop_front() {
                break Some(job);
            }
            if state.shutdown {
                break None;
            }
            let (guard, wait) = shared
                .work_available
                .wait_timeout(state, keep_alive)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
            // Surplus workers retire after sitting idle for the keep-alive
            // window; the minimum crew waits indefinitely.
            if wait.timed_out() && state.queue.is_empty() && !state.shutdown && state.workers > min
            {
                break None;
            }
        };
        state.idle -= 1;

        match job {
            Some(job) => {
                shared.slot_available.notify_one();
                drop(state);
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!(target: TRANSPORT_TARGET, "connection worker panicked");
                }
                state = shared
                    .state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
            }
            None => {
                state.workers -= 1;
                drop(state);
                shared.slot_available.notify_all();
                return;
            }
        }
    }
}
