//! Getting requests into the loop.
//!
//! Requests can be submitted from any thread. They are collected in a
//! [`SubmissionQueue`] until the loop picks them up at the start of its next
//! iteration. More generally, the loop drains anything that implements
//! [`WorkSource`], which allows an application to feed requests from a
//! queue of its own.

use crate::engine::Family;
use crate::error::{Failure, LookupResult};
use crate::pending::Callback;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::{fmt, mem, sync};

//------------ Submission ----------------------------------------------------

/// A request waiting to be picked up by the loop.
pub struct Submission {
    /// The host name or literal address.
    query: String,

    /// The address family for host names.
    family: Family,

    /// The callback for the outcome.
    callback: Callback,
}

impl Submission {
    /// Creates a new submission for both address families.
    pub fn new<F>(query: impl Into<String>, callback: F) -> Self
    where
        F: FnOnce(LookupResult) + Send + 'static,
    {
        Self::with_family(query, Family::Any, callback)
    }

    /// Creates a new submission for the given address family.
    pub fn with_family<F>(
        query: impl Into<String>,
        family: Family,
        callback: F,
    ) -> Self
    where
        F: FnOnce(LookupResult) + Send + 'static,
    {
        Submission {
            query: query.into(),
            family,
            callback: Box::new(callback),
        }
    }

    /// Returns the requested host name or address.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Returns the requested address family.
    pub fn family(&self) -> Family {
        self.family
    }

    /// Splits the submission into its parts.
    pub fn into_parts(self) -> (String, Family, Callback) {
        (self.query, self.family, self.callback)
    }

    /// Gives up on the submission, telling its callback.
    pub fn cancel(self) {
        (self.callback)(Err(Failure::Cancelled))
    }
}

impl fmt::Debug for Submission {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Submission")
            .field("query", &self.query)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

//------------ WorkSource ----------------------------------------------------

/// A thread-safe source of submissions.
///
/// The loop calls [`drain`][Self::drain] at the start of every iteration.
/// Implementations may be filled from other threads at any time, but any
/// lock involved must only be held for the duration of the call.
pub trait WorkSource {
    /// Removes and returns all currently available submissions.
    ///
    /// Submissions must be returned in the order they were added.
    fn drain(&self) -> Vec<Submission>;
}

impl<T: WorkSource + ?Sized> WorkSource for &T {
    fn drain(&self) -> Vec<Submission> {
        (**self).drain()
    }
}

impl<T: WorkSource + ?Sized> WorkSource for Arc<T> {
    fn drain(&self) -> Vec<Submission> {
        (**self).drain()
    }
}

impl WorkSource for Mutex<VecDeque<Submission>> {
    fn drain(&self) -> Vec<Submission> {
        mem::take(&mut *self.lock()).into()
    }
}

impl WorkSource for sync::Mutex<VecDeque<Submission>> {
    fn drain(&self) -> Vec<Submission> {
        // A panicking producer doesn’t make the submissions any less valid.
        let mut queue = match self.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        mem::take(&mut *queue).into()
    }
}

//------------ SubmissionQueue -----------------------------------------------

/// The queue of submissions for a resolver.
///
/// Once the resolver owning the queue goes away, the queue is closed and
/// refuses any further submissions.
#[derive(Default)]
pub struct SubmissionQueue {
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    entries: Vec<Submission>,
    closed: bool,
}

impl SubmissionQueue {
    /// Creates a new, empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a submission to the end of the queue.
    ///
    /// If the queue has been closed, the submission is handed back.
    pub fn enqueue(&self, item: Submission) -> Result<(), Submission> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(item);
        }
        state.entries.push(item);
        Ok(())
    }

    /// Returns the number of waiting submissions.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns whether no submissions are waiting.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Closes the queue and returns whatever was still waiting.
    pub fn close(&self) -> Vec<Submission> {
        let mut state = self.state.lock();
        state.closed = true;
        mem::take(&mut state.entries)
    }

    /// Returns whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl WorkSource for SubmissionQueue {
    fn drain(&self) -> Vec<Submission> {
        mem::take(&mut self.state.lock().entries)
    }
}

impl fmt::Debug for SubmissionQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SubmissionQueue")
            .field("entries", &state.entries.len())
            .field("closed", &state.closed)
            .finish()
    }
}

//------------ Submitter -----------------------------------------------------

/// A handle for submitting requests to a resolver.
///
/// Submitters can be cloned and sent to other threads. They can also be
/// used from within callbacks to issue follow-up requests. If the
/// resolver has been dropped, submitted requests are cancelled right away
/// on the submitting thread.
#[derive(Clone, Debug)]
pub struct Submitter {
    queue: Arc<SubmissionQueue>,
}

impl Submitter {
    pub(crate) fn new(queue: Arc<SubmissionQueue>) -> Self {
        Submitter { queue }
    }

    /// Submits a request for both address families.
    pub fn submit<F>(&self, query: impl Into<String>, callback: F)
    where
        F: FnOnce(LookupResult) + Send + 'static,
    {
        self.push(Submission::new(query, callback))
    }

    /// Submits a request for the given address family.
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
        if let Err(item) = self.queue.enqueue(item) {
            tracing::trace!(
                query = item.query(),
                "resolver gone, cancelling submission"
            );
            item.cancel()
        }
    }

    /// Returns whether the resolver behind this submitter is gone.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

//============ Testing =======================================================
