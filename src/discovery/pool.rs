//! Reusable worker threads for search sessions.
//!
//! A session borrows one worker for its receive loop. The worker reports
//! [`WorkerState::Running`] from the moment it is handed a job until the job
//! drops its [`WorkerLease`], and [`WorkerState::Idle`] afterwards. A job that
//! keeps the lease to the end (or panics) releases it on return. Idle workers
//! are reused; the pool grows when all of them are busy.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;

use crate::error::{KnxError, Result};

type Job = Box<dyn FnOnce(WorkerLease) + Send + 'static>;

/// Observable state of a pool worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Waiting for a job
    Idle,
    /// Executing a job
    Running,
}

/// Name and state of one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    /// Thread name, `<pool name>-<n>`
    pub name: String,
    /// Current state
    pub state: WorkerState,
}

#[derive(Debug)]
struct WorkerSlot {
    id: usize,
    name: String,
    state: WorkerState,
    jobs: Sender<Job>,
}

#[derive(Debug)]
struct PoolInner {
    name: String,
    workers: Mutex<Vec<WorkerSlot>>,
}

impl PoolInner {
    fn mark_idle(&self, id: usize) {
        if let Some(slot) = self.workers.lock().iter_mut().find(|w| w.id == id) {
            slot.state = WorkerState::Idle;
        }
    }
}

/// Claim on a pool worker held by the job it runs
///
/// Dropping the lease marks the worker idle. A job may drop it before it
/// returns; the worker picks up its next job once the current one has returned.
#[derive(Debug)]
pub struct WorkerLease {
    pool: Weak<PoolInner>,
    id: usize,
}

impl WorkerLease {
    /// Lease not tied to any pool
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            pool: Weak::new(),
            id: 0,
        }
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.mark_idle(self.id);
        }
    }
}

/// A growable set of named, reusable worker threads
///
/// Cloning yields another handle to the same pool.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

static GLOBAL: OnceLock<WorkerPool> = OnceLock::new();

impl WorkerPool {
    /// Create an empty pool whose threads are named `<name>-<n>`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Process-wide pool shared by discoverers that were not given their own
    pub fn global() -> Self {
        GLOBAL.get_or_init(|| Self::new("Discoverer")).clone()
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run `job` on an idle worker, spawning one if none is idle
    ///
    /// The job receives the worker's [`WorkerLease`]; the worker counts as
    /// running until the lease is dropped.
    ///
    /// # Errors
    ///
    /// Returns a transport error if a new thread cannot be spawned
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce(WorkerLease) + Send + 'static,
    {
        let mut job: Job = Box::new(job);
        let mut workers = self.inner.workers.lock();

        while let Some(slot) = workers.iter_mut().find(|w| w.state == WorkerState::Idle) {
            slot.state = WorkerState::Running;
            match slot.jobs.send(job) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    // worker thread is gone; forget it and try the next one
                    job = returned.into_inner();
                    let id = slot.id;
                    knx_log!(warn, "[Pool] worker {} exited, removing", id);
                    workers.retain(|w| w.id != id);
                }
            }
        }

        let id = workers.iter().map(|w| w.id + 1).max().unwrap_or(0);
        let name = format!("{}-{}", self.inner.name, id);
        let (tx, rx) = channel::unbounded::<Job>();
        let pool = Arc::downgrade(&self.inner);

        thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&pool, id, &rx))
            .map_err(KnxError::worker_spawn_failed)?;
        knx_log!(debug, "[Pool] spawned worker {}", name);

        tx.send(job)
            .map_err(|_| KnxError::worker_spawn_failed(std::io::Error::other("worker exited")))?;
        workers.push(WorkerSlot {
            id,
            name,
            state: WorkerState::Running,
            jobs: tx,
        });
        Ok(())
    }

    /// Name and state of every worker, in creation order
    pub fn workers(&self) -> Vec<WorkerStatus> {
        self.inner
            .workers
            .lock()
            .iter()
            .map(|w| WorkerStatus {
                name: w.name.clone(),
                state: w.state,
            })
            .collect()
    }

    /// Check that no worker is running a job
    pub fn all_idle(&self) -> bool {
        self.inner
            .workers
            .lock()
            .iter()
            .all(|w| w.state == WorkerState::Idle)
    }

    /// Number of workers spawned so far
    pub fn len(&self) -> usize {
        self.inner.workers.lock().len()
    }

    /// Check if no worker has been spawned yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn worker_loop(pool: &Weak<PoolInner>, id: usize, jobs: &channel::Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        let lease = WorkerLease {
            pool: Weak::clone(pool),
            id,
        };
        // an unwinding job drops its lease on the way out
        if panic::catch_unwind(AssertUnwindSafe(|| job(lease))).is_err() {
            knx_log!(error, "[Pool] job panicked on worker {}", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::{Duration, Instant};

    fn wait_idle(pool: &WorkerPool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !pool.all_idle() {
            assert!(Instant::now() < deadline, "workers never went idle");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_idle_worker_is_reused() {
        let pool = WorkerPool::new("test-reuse");
        assert!(pool.is_empty());

        pool.execute(|_| {}).unwrap();
        wait_idle(&pool);
        pool.execute(|_| {}).unwrap();
        wait_idle(&pool);

        assert_eq!(
            pool.workers(),
            vec![WorkerStatus {
                name: "test-reuse-0".into(),
                state: WorkerState::Idle
            }]
        );
    }

    #[test]
    fn test_pool_grows_when_busy() {
        let pool = WorkerPool::new("test-grow");
        let barrier = Arc::new(Barrier::new(3));
        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            pool.execute(move |_lease| {
                barrier.wait();
            })
            .unwrap();
        }

        assert_eq!(pool.len(), 2);
        assert!(pool
            .workers()
            .iter()
            .all(|w| w.state == WorkerState::Running));

        barrier.wait();
        wait_idle(&pool);
    }

    #[test]
    fn test_dropping_lease_releases_worker_before_job_returns() {
        let pool = WorkerPool::new("test-lease");
        let (released_tx, released_rx) = channel::bounded(1);
        let (finish_tx, finish_rx) = channel::bounded::<()>(1);

        pool.execute(move |lease| {
            drop(lease);
            released_tx.send(()).unwrap();
            finish_rx.recv().unwrap();
        })
        .unwrap();

        released_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(pool.all_idle());

        // the released worker takes the next job once the first one returns
        let (tx, rx) = channel::bounded(1);
        pool.execute(move |_| tx.send(thread::current().name().map(String::from)).unwrap())
            .unwrap();
        assert!(!pool.all_idle());
        finish_tx.send(()).unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap().as_deref(),
            Some("test-lease-0")
        );
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_panicking_job_releases_worker() {
        let pool = WorkerPool::new("test-panic");
        pool.execute(|_| panic!("boom")).unwrap();
        wait_idle(&pool);

        let (tx, rx) = channel::bounded(1);
        pool.execute(move |_| tx.send(thread::current().name().map(String::from)).unwrap())
            .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap().as_deref(),
            Some("test-panic-0")
        );
    }
}
