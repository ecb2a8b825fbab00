//! The resolver.

use crate::driver::Driver;
use crate::engine::{Engine, Family};
use crate::error::{EngineInitError, LookupResult};
use crate::queue::{Submission, SubmissionQueue, Submitter, WorkSource};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "stub")]
use crate::stub::{conf::StubConf, StubEngine};

//------------ Resolver ------------------------------------------------------

/// A resolver running lookups on a single thread.
///
/// Lookups are started via [`submit`][Self::submit] which can be called
/// from any thread at any time, including from within a callback. Nothing
/// actually happens, though, until some thread calls [`run`][Self::run].
/// This thread will then process all submitted lookups, including those
/// submitted while it is running, and call their callbacks. Once there is
/// nothing left to do, `run` returns.
///
/// All callbacks are called on the thread that currently executes `run`,
/// one after another. A callback must not call `run` on its own resolver.
/// Doing so will deadlock.
///
/// When the resolver is dropped, all lookups that haven’t finished yet are
/// cancelled. Their callbacks are called with
/// [`Failure::Cancelled`][crate::error::Failure::Cancelled] on the
/// dropping thread. Requests submitted through a [`Submitter`] after that
/// are cancelled immediately.
///
/// With the `stub` feature, the engine defaults to the stub engine.
pub struct Resolver<
    #[cfg(feature = "stub")] E: Engine = StubEngine,
    #[cfg(not(feature = "stub"))] E: Engine,
> {
    /// The queue of requests not yet picked up by the loop.
    queue: Arc<SubmissionQueue>,

    /// The loop state.
    ///
    /// The lock is held for the whole duration of a run.
    driver: Mutex<Driver<E>>,
}

#[cfg(feature = "stub")]
impl Resolver<StubEngine> {
    /// Creates a new resolver using the system’s configuration.
    pub fn new() -> Result<Self, EngineInitError> {
        Self::from_conf(StubConf::default())
    }
}

impl<E: Engine> Resolver<E> {
    /// Creates a new resolver with the given engine configuration.
    pub fn from_conf(conf: E::Config) -> Result<Self, EngineInitError> {
        let driver = Driver::new(conf)?;
        tracing::debug!("resolver created");
        Ok(Resolver {
            queue: Arc::new(SubmissionQueue::new()),
            driver: Mutex::new(driver),
        })
    }

    /// Submits a lookup for a host name or literal address.
    ///
    /// If `query` is a literal IPv4 or IPv6 address, the address is looked
    /// up in the reverse tree. Otherwise, the addresses of both families
    /// are looked up for the host name.
    ///
    /// The callback receives either the addresses found, which may be
    /// none at all, or the reason for failing.
    pub fn submit<F>(&self, query: impl Into<String>, callback: F)
    where
        F: FnOnce(LookupResult) + Send + 'static,
    {
        self.push(Submission::new(query, callback))
    }

    /// Submits a lookup restricted to one address family.
    ///
    /// The family is ignored for literal addresses.
    pub fn submit_with_family<F>(
        &self,
        query: impl Into<String>,
        family: Family,
        callback: F,
    ) where
        F: FnOnce(LookupResult) + Send + 'static,
    {
        self.push(Submission::with_family(query, family, callback))
    }

    /// Submits a prepared submission.
    pub fn push(&self, item: Submission) {
        // The queue is only closed when we are dropped.
        if let Err(item) = self.queue.enqueue(item) {
            item.cancel()
        }
    }

    /// Returns a submitter for this resolver.
    pub fn submitter(&self) -> Submitter {
        Submitter::new(self.queue.clone())
    }

    /// Returns the number of lookups waiting to be picked up.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Runs all lookups to completion.
    ///
    /// The method blocks the current thread until all submitted lookups
    /// are done, calling their callbacks as they finish. If another thread
    /// is currently running the resolver, the method waits for that run to
    /// finish first.
    pub fn run(&self) {
        self.driver.lock().run(&[&*self.queue])
    }

    /// Runs all lookups, also taking them from an external source.
    ///
    /// This is like [`run`][Self::run] but `source` is drained in every
    /// iteration of the loop in addition to the resolver’s own queue. The
    /// method returns once both are empty and all lookups are done.
    pub fn run_with(&self, source: &dyn WorkSource) {
        self.driver.lock().run(&[&*self.queue, source])
    }

    /// Returns the number of lookups currently in progress.
    ///
    /// Returns `None` if the resolver is running on some thread.
    pub fn in_progress(&self) -> Option<usize> {
        self.driver.try_lock().map(|driver| driver.pending().len())
    }
}

impl<E: Engine> Drop for Resolver<E> {
    fn drop(&mut self) {
        let leftover = self.queue.close();
        self.driver.get_mut().shutdown(leftover);
    }
}

impl<E: Engine> fmt::Debug for Resolver<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
