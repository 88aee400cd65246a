//! Bounded thread pool for running independent per-server work units in
//! parallel.
//!
//! `spawn` hands a closure to a pool of long-lived worker threads and
//! returns a [`Handle`]; `wait` blocks for that worker's result. A panic
//! inside the closure is caught and surfaced as [`RunnerError::Panicked`]
//! from `wait` rather than unwinding into the caller's thread.
//!
//! Whether a given batch of work is worth spawning at all (the "M == 1"
//! inline case) is a decision made by the caller, not by this crate: a
//! single work unit can simply be called in place instead of routed
//! through a [`BackgroundRunner`].

mod error;

use std::panic::AssertUnwindSafe;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
pub use error::RunnerError;
use tracing::warn;

type Job = Box<dyn FnOnce() + Send>;

/// A fixed-size pool of worker threads shared across batches.
pub struct BackgroundRunner {
    sender: Sender<Job>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl BackgroundRunner {
    /// Starts `worker_count` long-lived threads. `worker_count` is clamped
    /// to at least 1.
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();

        let workers = (0..worker_count)
            .map(|id| {
                let receiver: Receiver<Job> = receiver.clone();
                thread::Builder::new()
                    .name(format!("bg-runner-{id}"))
                    .spawn(move || {
                        for job in receiver.iter() {
                            job();
                        }
                    })
                    .expect("failed to spawn background runner thread")
            })
            .collect();

        Self { sender, workers }
    }

    /// Sizes the pool to the machine's available parallelism (falling back
    /// to 4 threads if that can't be determined).
    pub fn with_default_size() -> Self {
        let n = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self::new(n)
    }

    /// Queues `f` on the pool and returns a handle to its eventual result.
    /// `f` may start running immediately if a worker is idle, or sit in the
    /// queue behind other spawned work otherwise.
    pub fn spawn<F, T>(&self, f: F) -> Handle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let job: Job = Box::new(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(f));
            // Receiver side may already be gone if the caller dropped the
            // handle without waiting; that's not this worker's problem.
            let _ = tx.send(result);
        });
        self.sender
            .send(job)
            .expect("background runner's worker threads have shut down");
        Handle { receiver: rx }
    }
}

impl Drop for BackgroundRunner {
    fn drop(&mut self) {
        // Dropping `sender` closes the channel once this is the last
        // handle; workers finish their `receiver.iter()` loop and exit.
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// A pending background result. `wait` consumes the handle: a result can
/// only be collected once.
pub struct Handle<T> {
    receiver: Receiver<thread::Result<T>>,
}

impl<T> Handle<T> {
    /// Blocks until the worker finishes, returning its value or the reason
    /// it didn't produce one.
    pub fn wait(self) -> Result<T, RunnerError> {
        match self.receiver.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(panic)) => {
                let message = panic_message(&panic);
                warn!(%message, "background worker panicked");
                Err(RunnerError::Panicked(message))
            }
            Err(_) => Err(RunnerError::Disconnected),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
