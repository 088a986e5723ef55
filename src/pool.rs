//! Fixed-size worker pool servicing graph node executions.

use crate::error::{Error, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;

/// A unit of work queued on the pool.
type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of worker threads executing queued jobs in FIFO order.
///
/// Jobs are submitted with [`spawn`], which returns a [`TaskHandle`]
/// that delivers the job's return value (or failure) to the caller.
/// A job that panics records [`Error::WorkerPanic`] in its handle; the
/// worker thread itself survives and keeps servicing the queue.
///
/// [`shutdown`] (also run on drop) closes the job queue — jobs that
/// have not started yet are discarded, jobs already running complete —
/// and joins every worker. Submitting after shutdown fails with
/// [`Error::PoolStopped`].
///
/// [`spawn`]: WorkerPool::spawn
/// [`shutdown`]: WorkerPool::shutdown
pub struct WorkerPool {
    jobs: kanal::Sender<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    threads: usize,
    stopped: AtomicBool,
}

impl WorkerPool {
    /// Create a pool with `threads` workers.
    ///
    /// A count of zero selects the machine's available parallelism,
    /// with a minimum of one worker. Thread spawning failures are
    /// returned to the caller.
    pub fn new(threads: usize) -> Result<Self> {
        let threads = if threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            threads
        };

        let (tx, rx) = kanal::unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let rx = rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("millrace-worker-{index}"))
                .spawn(move || worker_loop(index, rx))?;
            workers.push(handle);
        }

        tracing::debug!("worker pool initialized with {} threads", threads);
        Ok(Self {
            jobs: tx,
            workers: Mutex::new(workers),
            threads,
            stopped: AtomicBool::new(false),
        })
    }

    /// Queue a job and return a handle to its eventual result.
    ///
    /// Fails with [`Error::PoolStopped`] after [`shutdown`].
    ///
    /// [`shutdown`]: WorkerPool::shutdown
    pub fn spawn<F, T>(&self, job: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::PoolStopped);
        }

        let (tx, rx) = kanal::bounded(1);
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job))
                .map_err(|payload| Error::WorkerPanic(panic_message(payload.as_ref())));
            // The receiver may already be gone; the result is then simply dropped.
            let _ = tx.send(outcome);
        });

        self.jobs.send(job).map_err(|_| Error::PoolStopped)?;
        Ok(TaskHandle { result: rx })
    }

    /// Number of worker threads in the pool.
    pub fn thread_count(&self) -> usize {
        self.threads
    }

    /// Number of jobs queued but not yet picked up by a worker.
    pub fn queued_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the pool has been shut down.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop the pool: discard queued jobs, let running jobs finish,
    /// join all workers. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        // Closing the channel wakes idle workers and drops any job
        // that has not started; its handle observes PoolStopped.
        self.jobs.close();

        let workers = {
            let mut guard = self.workers.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        let joined = workers.len();
        for worker in workers {
            let _ = worker.join();
        }
        tracing::debug!("worker pool stopped, {} threads joined", joined);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .field("queued", &self.queued_jobs())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn worker_loop(index: usize, jobs: kanal::Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        job();
    }
    tracing::trace!("worker {} exiting", index);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a job submitted to a [`WorkerPool`].
///
/// Dropping the handle detaches the job; it still runs, its result is
/// discarded.
pub struct TaskHandle<T> {
    result: kanal::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the job finishes and return its result.
    ///
    /// Returns [`Error::PoolStopped`] if the job was discarded by a
    /// pool shutdown before it started, and [`Error::WorkerPanic`] if
    /// the job panicked.
    pub fn wait(self) -> Result<T> {
        match self.result.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::PoolStopped),
        }
    }

    /// Non-blocking poll for the job's result.
    pub fn try_wait(&self) -> Option<Result<T>> {
        match self.result.try_recv() {
            Ok(Some(outcome)) => Some(outcome),
            Ok(None) => None,
            Err(_) => Some(Err(Error::PoolStopped)),
        }
    }
}
