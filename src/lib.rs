//! Asynchronous host name resolution on a single thread.
//!
//! This crate drives a non-blocking resolution engine from a simple event
//! loop. Applications submit lookups for host names or literal addresses
//! from any number of threads, together with a callback that receives the
//! outcome. One thread at a time runs the loop which hands the lookups to
//! the engine, waits for the engine’s descriptors and timers, and calls
//! the callbacks as lookups finish. The loop returns once there is
//! nothing left to do.
//!
//! # Modules
//!
//! * [resolver] contains [`Resolver`], the type most applications will
//!   want to use,
//! * [queue] contains the types for getting lookups into the loop from
//!   other threads, including the [`WorkSource`] trait for feeding the
//!   loop from an application’s own queue,
//! * [driver] contains the loop itself,
//! * [pending] keeps track of the lookups the engine is working on,
//! * [engine] defines the interface of a resolution engine and manages
//!   the process-wide state such engines need, and
//! * [error] contains the error types.
//!
#![cfg_attr(feature = "stub", doc = "* [stub]:")]
#![cfg_attr(not(feature = "stub"), doc = "* stub:")]
//!   A stub engine sending queries via UDP to the recursive resolvers
//!   configured for the system.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "stub")]
//! # {
//! use resolv_loop::Resolver;
//!
//! let resolver = Resolver::new().unwrap();
//! resolver.submit("www.example.com", |res| match res {
//!     Ok(addrs) => println!("www.example.com: {:?}", addrs),
//!     Err(err) => println!("www.example.com: {}", err),
//! });
//! resolver.submit("192.0.2.1", |res| println!("192.0.2.1: {:?}", res));
//! resolver.run();
//! # }
//! ```
//!
//! # Reference of Feature Flags
//!
//! * `stub`: Enables the
#![cfg_attr(feature = "stub", doc = "  [stub]")]
#![cfg_attr(not(feature = "stub"), doc = "  stub")]
//!   module and the [`Resolver::new`] function using it. This pulls in the
//!   [domain](https://github.com/NLnetLabs/domain) crate for DNS messages
//!   and [rand](https://github.com/rust-random/rand) for message IDs. The
//!   feature is enabled by default.

#![cfg(unix)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use self::engine::{Family, Query};
pub use self::error::{EngineInitError, Failure, LookupResult};
pub use self::queue::{Submission, Submitter, WorkSource};
pub use self::resolver::Resolver;

pub mod driver;
pub mod engine;
pub mod error;
pub mod pending;
pub mod queue;
pub mod resolver;

#[cfg(feature = "stub")]
#[cfg_attr(docsrs, doc(cfg(feature = "stub")))]
pub mod stub;
