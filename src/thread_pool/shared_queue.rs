use std::thread;

use crossbeam::channel;
use crossbeam::channel::{Receiver, Sender};
use tracing::{debug, error};

use super::ThreadPool;
use crate::Result;

/// A thread pool implemented with a shared job queue (i.e. channel).
///
/// This implementation uses the MPMC [`channel`] provided by the crossbeam crate.
/// Specifically, we are using it as a single producer, multiple consumer. The single producer
/// is this type itself, and the threads in the pool are the consumers.
///
/// If a spawned connection job panics, the old thread will be destroyed and a new one will be
/// created. Any failure to create the replacement thread at the OS level is logged but
/// otherwise swallowed, so the thread count in the pool can decrease over time; once it
/// reaches zero, spawning a job will panic.
///
/// [`channel`]: https://docs.rs/crossbeam/0.8.1/crossbeam/channel/index.html
pub struct SharedQueueThreadPool {
    /// the sending part of the channel
    tx: Sender<Box<dyn FnOnce() + Send + 'static>>,
}

impl ThreadPool for SharedQueueThreadPool {
    /// create a new thread pool with the given number of `threads`.
    /// Every thread created will have a handle to the receiving end of the channel
    fn new(threads: u32) -> Result<Self> {
        let (tx, rx) = channel::unbounded::<Box<dyn FnOnce() + Send + 'static>>();
        for _ in 0..threads {
            let job_rx = JobReceiver(rx.clone());
            thread::Builder::new().spawn(move || run_jobs(job_rx))?;
        }
        Ok(SharedQueueThreadPool { tx })
    }

    /// Spawns a job into the thread pool.
    ///
    /// # Panics
    ///
    /// Panics if the thread pool has no thread.
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Box::new(job))
            .expect("There are no threads in the pool");
    }
}

// Receives jobs from the shared channel and runs them; also responsible for
// restarting any thread that panicked mid-job.
#[derive(Clone)]
struct JobReceiver(Receiver<Box<dyn FnOnce() + Send + 'static>>);

impl Drop for JobReceiver {
    fn drop(&mut self) {
        if thread::panicking() {
            debug!("pool thread panicked, starting a new thread");
            let job_rx = self.clone();
            if let Err(e) = thread::Builder::new().spawn(move || run_jobs(job_rx)) {
                error!("failed to spawn a replacement thread: {}", e);
            }
        }
    }
}

// waits for a job to arrive on the (wrapped) receiver, then runs it
fn run_jobs(rx: JobReceiver) {
    loop {
        match rx.0.recv() {
            Ok(job) => job(),
            Err(_) => {
                debug!("thread exited because the thread pool was destroyed");
                break;
            }
        }
    }
}
