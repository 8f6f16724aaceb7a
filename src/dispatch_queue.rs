//! Single-threaded dispatch context.
//!
//! Producer callbacks (notification stream, telephony stream, control requests) never
//! deliver to the consumer or touch the disk themselves: they post a job here and return.
//! Jobs run one at a time, in posting order, on a dedicated worker thread.

use anyhow::{Context, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc as std_mpsc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::mpsc;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Run(Job),
    Barrier(std_mpsc::Sender<()>),
}

/// Serial job queue backed by one worker thread.
pub struct DispatchQueue {
    name: String,
    tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl DispatchQueue {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();

        let thread_name = name.clone();
        let worker = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                while let Some(cmd) = rx.blocking_recv() {
                    match cmd {
                        Command::Run(job) => {
                            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                                error!(queue = %thread_name, "Dispatch job panicked");
                            }
                        }
                        Command::Barrier(done) => {
                            let _ = done.send(());
                        }
                    }
                }
                debug!(queue = %thread_name, "Dispatch queue drained");
            })
            .with_context(|| format!("Failed to spawn dispatch thread {}", name))?;

        let worker_id = worker.thread().id();

        Ok(Self {
            name,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            worker_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job. Returns false once the queue has been shut down.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(Command::Run(Box::new(job))).is_ok(),
            None => false,
        }
    }

    /// Block until every job posted before this call has run.
    ///
    /// Returns immediately when called from the worker itself or after shutdown.
    pub fn sync(&self) {
        if thread::current().id() == self.worker_id {
            return;
        }
        let (done_tx, done_rx) = std_mpsc::channel();
        let sent = {
            let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
            guard
                .as_ref()
                .map(|tx| tx.send(Command::Barrier(done_tx)).is_ok())
                .unwrap_or(false)
        };
        if sent {
            let _ = done_rx.recv();
        }
    }

    /// Stop accepting jobs, run what is already queued, and join the worker.
    pub fn shutdown(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();

        // dropping the last reference from inside a job must not join itself
        if thread::current().id() == self.worker_id {
            return;
        }
        if let Some(worker) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = worker.join();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_jobs_run_in_posting_order() {
        let queue = DispatchQueue::new("test-dispatch").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let seen = seen.clone();
            assert!(queue.post(move || seen.lock().unwrap().push(i)));
        }
        queue.sync();

        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_post_after_shutdown_is_rejected() {
        let queue = DispatchQueue::new("test-dispatch").unwrap();
        queue.shutdown();
        assert!(queue.is_closed());
        assert!(!queue.post(|| {}));
        // sync after shutdown must not hang
        queue.sync();
    }

    #[test]
    fn test_shutdown_drains_pending_jobs() {
        let queue = DispatchQueue::new("test-dispatch").unwrap();
        let count = Arc::new(Mutex::new(0));
        for _ in 0..10 {
            let count = count.clone();
            queue.post(move || *count.lock().unwrap() += 1);
        }
        queue.shutdown();
        assert_eq!(*count.lock().unwrap(), 10);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let queue = DispatchQueue::new("test-dispatch").unwrap();
        let ran = Arc::new(Mutex::new(false));
        queue.post(|| panic!("boom"));
        let ran2 = ran.clone();
        queue.post(move || *ran2.lock().unwrap() = true);
        queue.sync();
        assert!(*ran.lock().unwrap());
    }
}
