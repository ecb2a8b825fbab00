//! The event loop.
//!
//! The loop owns an engine and the requests pending with it. Each
//! iteration picks up newly submitted requests and hands them to the
//! engine, waits for the engine’s descriptors to become ready or its next
//! deadline to pass, and lets the engine process whatever happened. The
//! engine reports finished lookups which are then handed to the request’s
//! callback. This repeats until the engine has nothing left to wait for
//! and no new requests arrived.

use crate::engine::{Engine, EngineHandle, FdSet, Query};
use crate::error::EngineInitError;
use crate::pending::PendingRequests;
use crate::queue::{Submission, WorkSource};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll};
use smallvec::SmallVec;
use std::os::unix::io::RawFd;
use std::time::Duration;
use std::{fmt, io};

//------------ Driver --------------------------------------------------------

/// The loop state: an engine and its pending requests.
pub struct Driver<E> {
    /// The engine.
    engine: EngineHandle<E>,

    /// The requests the engine is working on.
    pending: PendingRequests,

    /// Waits for the engine’s descriptors.
    waiter: Waiter,
}

impl<E: Engine> Driver<E> {
    /// Creates a new driver with a fresh engine.
    pub fn new(config: E::Config) -> Result<Self, EngineInitError> {
        let engine = EngineHandle::create(config)?;
        let waiter = Waiter::new().map_err(EngineInitError::engine)?;
        Ok(Driver {
            engine,
            pending: PendingRequests::new(),
            waiter,
        })
    }

    /// Returns a reference to the engine handle.
    pub fn engine(&self) -> &EngineHandle<E> {
        &self.engine
    }

    /// Returns the pending requests.
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Runs the loop until there is nothing left to do.
    ///
    /// All `sources` are drained at the start of every iteration. The loop
    /// returns once the engine doesn’t wait for any descriptors and none of
    /// the sources provided new work. It also returns early if waiting for
    /// the descriptors fails. Requests still pending in this case stay
    /// pending and are picked up by the next run.
    pub fn run(&mut self, sources: &[&dyn WorkSource]) {
        loop {
            self.admit_from(sources);

            let interest = self.engine.descriptors();
            if interest.is_empty() {
                // Something may have been submitted since we drained.
                if self.admit_from(sources) == 0 {
                    tracing::debug!(
                        pending = self.pending.len(),
                        "loop is quiescent"
                    );
                    return;
                }
                continue;
            }

            let timeout = self.engine.next_timeout();
            tracing::trace!(
                read = interest.readable().len(),
                write = interest.writable().len(),
                ?timeout,
                "waiting for descriptors"
            );
            let ready = match self.waiter.wait(&interest, timeout) {
                Ok(ready) => ready,
                Err(err) => {
                    tracing::warn!(
                        error = %LoopIoError(err),
                        pending = self.pending.len(),
                        "stopping loop"
                    );
                    return;
                }
            };

            let pending = &mut self.pending;
            self.engine.process_ready(&ready, &mut |token, result| {
                pending.complete(token, result);
            });
        }
    }

    /// Cancels everything and leaves the driver empty.
    ///
    /// Pending requests are cancelled first, then the submissions from
    /// `leftover`, each in their order. Returns the number of callbacks
    /// that were called.
    pub fn shutdown(&mut self, leftover: Vec<Submission>) -> usize {
        let mut count = self.pending.cancel_all();
        for item in leftover {
            item.cancel();
            count += 1;
        }
        if count > 0 {
            tracing::debug!(count, "cancelled unfinished requests");
        }
        count
    }

    /// Drains all sources and starts the queries.
    ///
    /// Returns the number of admitted submissions.
    fn admit_from(&mut self, sources: &[&dyn WorkSource]) -> usize {
        let mut count = 0;
        for source in sources {
            for item in source.drain() {
                self.admit(item);
                count += 1;
            }
        }
        count
    }

    /// Hands a single submission to the engine.
    fn admit(&mut self, item: Submission) {
        let (request, family, callback) = item.into_parts();
        let query = Query::from_request(&request, family);
        let token = self.pending.insert(request, callback);
        tracing::trace!(%token, ?query, "starting query");
        if let Err(failure) = self.engine.begin_query(token, &query) {
            self.pending.complete(token, Err(failure));
        }
    }
}

impl<E> fmt::Debug for Driver<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Driver")
            .field("engine", &self.engine)
            .field("pending", &self.pending.len())
            .finish()
    }
}

//------------ LoopIoError ---------------------------------------------------

/// Waiting for descriptors failed.
#[derive(Debug)]
struct LoopIoError(io::Error);

impl fmt::Display for LoopIoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "waiting for descriptors failed: {}", self.0)
    }
}

//------------ Waiter --------------------------------------------------------

/// Waits for descriptors to become ready.
///
/// The descriptors an engine is interested in change from one iteration
/// to the next, so they are registered right before waiting and removed
/// again right after. Registering a descriptor that is already ready makes
/// it show up in the next poll.
pub struct Waiter {
    poll: Poll,
    events: Events,
}

impl Waiter {
    /// Creates a new waiter.
    pub fn new() -> io::Result<Self> {
        Ok(Waiter {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
        })
    }

    /// Waits until descriptors in `interest` are ready or `timeout` passes.
    ///
    /// Returns the set of descriptors that are ready, which may be empty if
    /// the timeout passed. A descriptor that isn’t open is an error.
    pub fn wait(
        &mut self,
        interest: &FdSet,
        timeout: Option<Duration>,
    ) -> io::Result<FdSet> {
        let fds = merge_interest(interest);
        let mut registered = 0;
        let mut res = Ok(());
        for (idx, &(fd, fd_interest)) in fds.iter().enumerate() {
            res = self.poll.registry().register(
                &mut SourceFd(&fd),
                mio::Token(idx),
                fd_interest,
            );
            if res.is_err() {
                break;
            }
            registered += 1;
        }
        if res.is_ok() {
            res = self.poll_events(timeout);
        }
        for &(fd, _) in &fds[..registered] {
            // The engine still owns the descriptor, it can’t be gone.
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
        }
        res?;

        let mut ready = FdSet::new();
        for event in self.events.iter() {
            let (fd, fd_interest) = match fds.get(event.token().0) {
                Some(item) => *item,
                None => continue,
            };
            if fd_interest.is_readable()
                && (event.is_readable()
                    || event.is_read_closed()
                    || event.is_error())
            {
                ready.add_read(fd)
            }
            if fd_interest.is_writable()
                && (event.is_writable()
                    || event.is_write_closed()
                    || event.is_error())
            {
                ready.add_write(fd)
            }
        }
        Ok(ready)
    }

    fn poll_events(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    continue
                }
                res => return res,
            }
        }
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Waiter").finish_non_exhaustive()
    }
}

/// How many events a single poll reports at most.
const EVENTS_CAPACITY: usize = 64;

/// Combines read and write interest for each descriptor.
fn merge_interest(interest: &FdSet) -> SmallVec<[(RawFd, Interest); 8]> {
    let mut res: SmallVec<[(RawFd, Interest); 8]> = interest
        .readable()
        .iter()
        .map(|&fd| (fd, Interest::READABLE))
        .collect();
    for &fd in interest.writable() {
        match res.iter_mut().find(|item| item.0 == fd) {
            Some(item) => item.1 = item.1.add(Interest::WRITABLE),
            None => res.push((fd, Interest::WRITABLE)),
        }
    }
    res
}

//============ Testing =======================================================
