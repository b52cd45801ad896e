//! Background task pools for snapshot writes
//!
//! Saving posts the disk write to a [`TaskPool`] so the caller only pays
//! for serialization. [`ThreadTaskPool`] runs tasks on its own worker
//! threads; [`TokioTaskPool`] hands them to a tokio runtime's blocking
//! pool.

use crate::error::SnapshotResult;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::JoinHandle;
use tracing::{debug, error};

/// Unit of background work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executor for background snapshot work
pub trait TaskPool: Send + Sync {
    /// Run `task` at some later point on another thread
    fn post(&self, task: Task);
}

/// Fixed set of worker threads fed by a channel
pub struct ThreadTaskPool {
    tx: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadTaskPool {
    /// Spawn `threads` workers (at least one)
    pub fn new(threads: usize) -> SnapshotResult<Self> {
        let (tx, rx) = unbounded::<Task>();
        let mut workers = Vec::with_capacity(threads.max(1));
        for i in 0..threads.max(1) {
            let rx = rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("otter-snapshot-{}", i))
                .spawn(move || run_worker(rx))?;
            workers.push(handle);
        }
        Ok(Self { tx: Some(tx), workers })
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Finish queued tasks and join the workers
    pub fn shutdown(mut self) {
        self.join_workers();
    }

    fn join_workers(&mut self) {
        // Closing the channel ends each worker loop once the queue drains
        self.tx.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Snapshot worker exited abnormally");
            }
        }
    }
}

impl TaskPool for ThreadTaskPool {
    fn post(&self, task: Task) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(task).is_err() {
            error!("Snapshot task pool is shut down");
        }
    }
}

impl Drop for ThreadTaskPool {
    fn drop(&mut self) {
        self.join_workers();
    }
}

fn run_worker(rx: Receiver<Task>) {
    while let Ok(task) = rx.recv() {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("Snapshot task panicked");
        }
    }
    debug!("Snapshot worker stopped");
}

/// Adapter running tasks on a tokio runtime's blocking pool
#[derive(Clone)]
pub struct TokioTaskPool {
    handle: tokio::runtime::Handle,
}

impl TokioTaskPool {
    /// Pool on an explicit runtime
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Pool on the runtime of the calling task, if any
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl TaskPool for TokioTaskPool {
    fn post(&self, task: Task) {
        drop(self.handle.spawn_blocking(task));
    }
}
