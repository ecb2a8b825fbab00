//! The interface to a resolution engine.
//!
//! An engine does the actual work of resolving names: it composes queries,
//! sends them, retransmits and parses responses. The loop in this crate
//! doesn’t care about any of that. All it needs from an engine is what is
//! described by the [`Engine`] trait: start a query, tell which descriptors
//! to wait for and until when, and process whatever became ready.
//!
//! Engines typically need some process-wide setup. This is expressed via a
//! [`Library`] that each engine type provides and that is reference counted
//! by the [`EngineHandle`]s of all resolvers using that engine.

use crate::error::{EngineInitError, Failure, LookupResult};
use smallvec::SmallVec;
use std::net::IpAddr;
use std::os::unix::io::RawFd;
use std::time::Duration;
use std::fmt;

pub use self::handle::EngineHandle;
pub use self::library::{Library, LibraryRef};

//------------ Sub-modules ---------------------------------------------------

pub mod handle;
pub mod library;

//------------ Engine --------------------------------------------------------

/// A resolution engine.
///
/// None of the methods are expected to be called concurrently. The loop
/// calls them all from the thread that currently runs it.
pub trait Engine: Sized {
    /// The configuration used to create an engine.
    type Config;

    /// Returns the process-wide library state for this engine type.
    fn library() -> &'static Library;

    /// Creates a new engine instance.
    ///
    /// This is only called while the library is initialized.
    fn create(config: Self::Config) -> Result<Self, EngineInitError>;

    /// Starts resolving `query`.
    ///
    /// The outcome has to be reported later via `process_ready` using the
    /// given token. If the query cannot be started at all, the engine can
    /// return the failure right away instead and must forget the token.
    fn begin_query(
        &mut self,
        token: Token,
        query: &Query,
    ) -> Result<(), Failure>;

    /// Returns the descriptors the engine currently waits on.
    ///
    /// An empty set means that the engine has nothing in flight.
    fn descriptors(&self) -> FdSet;

    /// Returns how long to wait at most before calling `process_ready`.
    ///
    /// `None` means there is no deadline.
    fn next_timeout(&self) -> Option<Duration>;

    /// Processes ready descriptors and expired deadlines.
    ///
    /// Every lookup that finished is reported through `complete`, exactly
    /// once per token.
    fn process_ready(
        &mut self,
        ready: &FdSet,
        complete: &mut dyn FnMut(Token, LookupResult),
    );
}

//------------ Token ---------------------------------------------------------

/// The token correlating a lookup inside an engine with its request.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Token(u64);

impl Token {
    pub(crate) fn new(value: u64) -> Self {
        Token(value)
    }

    /// Returns the raw value of the token.
    pub fn into_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

//------------ Family --------------------------------------------------------

/// The address family to look up names for.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Family {
    /// Both IPv4 and IPv6 addresses.
    #[default]
    Any,

    /// IPv4 addresses only.
    V4,

    /// IPv6 addresses only.
    V6,
}

impl Family {
    /// Returns whether IPv4 addresses are wanted.
    pub fn wants_v4(self) -> bool {
        matches!(self, Family::Any | Family::V4)
    }

    /// Returns whether IPv6 addresses are wanted.
    pub fn wants_v6(self) -> bool {
        matches!(self, Family::Any | Family::V6)
    }
}

//------------ Query ---------------------------------------------------------

/// What an engine is asked to do for a request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Query {
    /// Look up the addresses of a host name.
    Forward {
        /// The host name.
        name: String,

        /// The address families to look up.
        family: Family,
    },

    /// Look up and thereby verify a literal address.
    Reverse(IpAddr),
}

impl Query {
    /// Creates the query for a request string.
    ///
    /// A string that is a literal IPv4 or IPv6 address results in a
    /// reverse lookup, everything else in a forward lookup.
    pub fn from_request(request: &str, family: Family) -> Self {
        match request.parse::<IpAddr>() {
            Ok(addr) => Query::Reverse(addr),
            Err(_) => Query::Forward {
                name: request.into(),
                family,
            },
        }
    }

    /// Returns whether this is a reverse lookup.
    pub fn is_reverse(&self) -> bool {
        matches!(self, Query::Reverse(_))
    }
}

//------------ FdSet ---------------------------------------------------------

/// A set of readable and writable descriptors.
///
/// This is used both for the descriptors an engine wants to wait for and
/// for those that turned out to be ready.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FdSet {
    read: SmallVec<[RawFd; 4]>,
    write: SmallVec<[RawFd; 4]>,
}

impl FdSet {
    /// Creates a new, empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor to wait for reading on.
    pub fn add_read(&mut self, fd: RawFd) {
        if !self.read.contains(&fd) {
            self.read.push(fd)
        }
    }

    /// Adds a descriptor to wait for writing on.
    pub fn add_write(&mut self, fd: RawFd) {
        if !self.write.contains(&fd) {
            self.write.push(fd)
        }
    }

    /// Returns whether the set contains no descriptors at all.
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }

    /// Returns whether `fd` is in the readable part of the set.
    pub fn is_readable(&self, fd: RawFd) -> bool {
        self.read.contains(&fd)
    }

    /// Returns whether `fd` is in the writable part of the set.
    pub fn is_writable(&self, fd: RawFd) -> bool {
        self.write.contains(&fd)
    }

    /// Returns the readable descriptors.
    pub fn readable(&self) -> &[RawFd] {
        &self.read
    }

    /// Returns the writable descriptors.
    pub fn writable(&self) -> &[RawFd] {
        &self.write
    }
}

//============ Testing =======================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn literal_requests_are_reverse() {
        assert_eq!(
            Query::from_request("192.0.2.1", Family::Any),
            Query::Reverse(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)))
        );
        assert_eq!(
            Query::from_request("2001:db8::1", Family::V4),
            Query::Reverse(IpAddr::V6(Ipv6Addr::new(
                0x2001, 0xdb8, 0, 0, 0, 0, 0, 1
            )))
        );
    }

    #[test]
    fn names_are_forward() {
        assert_eq!(
            Query::from_request("example.test", Family::V6),
            Query::Forward {
                name: "example.test".into(),
                family: Family::V6
            }
        );
        // Looks almost like an address but isn’t one.
        assert!(!Query::from_request("192.0.2", Family::Any).is_reverse());
        assert!(!Query::from_request("[::1]", Family::Any).is_reverse());
    }

    #[test]
    fn fd_set_deduplicates() {
        let mut set = FdSet::new();
        assert!(set.is_empty());
        set.add_read(3);
        set.add_read(3);
        set.add_write(4);
        assert_eq!(set.readable(), &[3]);
        assert_eq!(set.writable(), &[4]);
        assert!(set.is_readable(3));
        assert!(!set.is_writable(3));
        assert!(!set.is_empty());
    }

    #[test]
    fn family_wants() {
        assert!(Family::Any.wants_v4() && Family::Any.wants_v6());
        assert!(Family::V4.wants_v4() && !Family::V4.wants_v6());
        assert!(!Family::V6.wants_v4() && Family::V6.wants_v6());
    }
}
