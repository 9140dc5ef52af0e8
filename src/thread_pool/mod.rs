//! This module provides the thread pools used to serve client connections.
//!
//! The server draws one pool thread per accepted connection; the threads never touch the
//! session registry themselves, they only decode requests and marshal them to the owner
//! worker. [`SharedQueueThreadPool`] is the pool the server binary uses;
//! [`NaiveThreadPool`] spawns a fresh thread per connection and exists mostly as the
//! simplest possible implementor of the trait.
//!
//! [`SharedQueueThreadPool`]: ./struct.SharedQueueThreadPool.html
//! [`NaiveThreadPool`]: ./struct.NaiveThreadPool.html

pub use naive::NaiveThreadPool;
pub use shared_queue::SharedQueueThreadPool;

mod naive;
mod shared_queue;

use crate::Result;

/// A trait for types that can run jobs (closures) on a pool of threads
pub trait ThreadPool {
    /// creates a new thread pool with `threads` threads
    ///
    /// # Errors
    /// returns an error if any of the threads could not be spawned at the OS level
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// spawns a job into the thread pool
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;
}
