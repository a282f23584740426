//! Fixed-size worker pools for flushes and compactions.
//!
//! Jobs travel over a crossbeam channel to named threads. Each job gets a
//! one-shot result channel, so the submitter can wait on the outcome. A
//! panicking job is caught and reported through its handle without
//! taking the worker down.
//!
//! A job counts as pending from `spawn` until it returns, so
//! [`WorkerPool::wait_idle`] never sees a job that sits between the queue
//! and a worker.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tierdb_core::{Error, Result};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to the result of a job submitted to a [`WorkerPool`]
#[derive(Debug)]
pub struct JobHandle<T> {
    result: Receiver<Result<T>>,
}

impl<T> JobHandle<T> {
    /// Block until the job finishes
    pub fn wait(self) -> Result<T> {
        self.result.recv().map_err(|_| Error::WorkerPanicked)?
    }

    /// The result if the job has already finished
    pub fn try_wait(&self) -> Option<Result<T>> {
        self.result.try_recv().ok()
    }
}

/// Jobs submitted but not yet returned
#[derive(Default)]
struct Pending {
    jobs: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.jobs.lock() += 1;
    }

    fn done(&self) {
        let mut jobs = self.jobs.lock();
        *jobs = jobs.saturating_sub(1);
        if *jobs == 0 {
            self.idle.notify_all();
        }
    }
}

/// A named, fixed-size thread pool
pub struct WorkerPool {
    name: String,
    threads: usize,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    active: Arc<AtomicUsize>,
    pending: Arc<Pending>,
}

impl WorkerPool {
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let active = Arc::new(AtomicUsize::new(0));
        let pending = Arc::new(Pending::default());
        let mut workers = Vec::with_capacity(threads);

        for i in 0..threads {
            let receiver = receiver.clone();
            let active = Arc::clone(&active);
            let pending = Arc::clone(&pending);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || {
                    for job in receiver.iter() {
                        active.fetch_add(1, Ordering::SeqCst);
                        job();
                        active.fetch_sub(1, Ordering::SeqCst);
                        pending.done();
                    }
                })?;
            workers.push(handle);
        }

        debug!(pool = name, threads, "worker pool started");
        Ok(Self {
            name: name.to_string(),
            threads,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            active,
            pending,
        })
    }

    /// Queue `job`. Fails with `ShuttingDown` once the pool is closed.
    pub fn spawn<T, F>(&self, job: F) -> Result<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let pool = self.name.clone();
        let wrapped: Job = Box::new(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(result) => result,
                Err(_) => {
                    error!(pool = %pool, "job panicked");
                    Err(Error::WorkerPanicked)
                }
            };
            // The submitter may have dropped its handle
            let _ = tx.send(outcome);
        });

        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(Error::ShuttingDown);
        };
        self.pending.add();
        if sender.send(wrapped).is_err() {
            self.pending.done();
            return Err(Error::ShuttingDown);
        }
        Ok(JobHandle { result: rx })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.sender.lock().as_ref().map(|s| s.len()).unwrap_or(0)
    }

    /// Jobs currently running
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Jobs queued or running
    pub fn pending(&self) -> usize {
        *self.pending.jobs.lock()
    }

    /// Block until every job submitted so far has returned. Jobs submitted
    /// by those jobs are waited for as well.
    ///
    /// Calling this from one of the pool's own jobs never returns.
    pub fn wait_idle(&self) {
        let mut jobs = self.pending.jobs.lock();
        while *jobs > 0 {
            self.pending.idle.wait(&mut jobs);
        }
    }

    /// Stop accepting jobs, drain the queue and join every worker
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                error!(pool = %self.name, "worker thread exited abnormally");
            }
        }
        debug!(pool = %self.name, "worker pool stopped");
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
            .field("name", &self.name)
            .field("threads", &self.threads)
            .field("active", &self.active())
            .field("pending", &self.pending())
            .finish()
    }
}
