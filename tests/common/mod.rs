//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::UdpSocket;
use std::os::unix::io::AsRawFd;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use resolv_loop::engine::{Engine, FdSet, Library, Query, Token};
use resolv_loop::{EngineInitError, Failure, LookupResult};
use tracing_subscriber::EnvFilter;

//------------ Logging -------------------------------------------------------

/// Setup logging of events reported by the crate and the test suite.
///
/// Use the RUST_LOG environment variable to override the defaults.
///
/// E.g. to see every request going through the loop:
///   RUST_LOG=resolv_loop=TRACE
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_ids(true)
        .without_time()
        .try_init()
        .ok();
}

//------------ Results -------------------------------------------------------

/// A callback sending its result down a channel.
pub fn channel() -> (
    impl Fn() -> Box<dyn FnOnce(LookupResult) + Send>,
    mpsc::Receiver<LookupResult>,
) {
    let (tx, rx) = mpsc::channel();
    let make = move || -> Box<dyn FnOnce(LookupResult) + Send> {
        let tx = tx.clone();
        Box::new(move |res| {
            let _ = tx.send(res);
        })
    };
    (make, rx)
}

/// Collects everything currently in the channel.
pub fn collect(rx: &mpsc::Receiver<LookupResult>) -> Vec<LookupResult> {
    rx.try_iter().collect()
}

//------------ MockEngine ----------------------------------------------------

/// The library of the mock engine.
pub static MOCK_LIBRARY: Library = Library::new("mock", || Ok(()), || ());

/// Configuration for a mock engine.
#[derive(Clone, Default)]
pub struct MockConf {
    /// Results for specific requests.
    ///
    /// Requests not listed here succeed with made up addresses.
    pub answers: HashMap<String, LookupResult>,

    /// Report a descriptor that isn’t open.
    pub bad_fd: bool,

    /// Where to record the queries the engine receives.
    pub log: Arc<Mutex<Vec<Query>>>,
}

impl MockConf {
    pub fn answer(mut self, request: &str, result: LookupResult) -> Self {
        self.answers.insert(request.into(), result);
        self
    }
}

/// An engine that answers from a table.
///
/// The engine waits for its socket to become writable which it always is.
/// Each call to `process_ready` completes one lookup so that the loop
/// makes several iterations for several lookups.
pub struct MockEngine {
    conf: MockConf,
    sock: UdpSocket,
    queue: Vec<(Token, LookupResult)>,
}

impl MockEngine {
    fn result_for(&self, query: &Query) -> LookupResult {
        let key = match query {
            Query::Forward { name, .. } => name.clone(),
            Query::Reverse(addr) => addr.to_string(),
        };
        if let Some(res) = self.conf.answers.get(&key) {
            return res.clone();
        }
        match query {
            Query::Forward { family, .. } => {
                let mut res = Vec::new();
                if family.wants_v4() {
                    res.push("192.0.2.1".to_string());
                }
                if family.wants_v6() {
                    res.push("2001:db8::1".to_string());
                }
                Ok(res)
            }
            Query::Reverse(addr) => Ok(vec![addr.to_string()]),
        }
    }
}

impl Engine for MockEngine {
    type Config = MockConf;

    fn library() -> &'static Library {
        &MOCK_LIBRARY
    }

    fn create(conf: MockConf) -> Result<Self, EngineInitError> {
        let sock =
            UdpSocket::bind("127.0.0.1:0").map_err(EngineInitError::engine)?;
        Ok(MockEngine {
            conf,
            sock,
            queue: Vec::new(),
        })
    }

    fn begin_query(
        &mut self,
        token: Token,
        query: &Query,
    ) -> Result<(), Failure> {
        self.conf.log.lock().push(query.clone());
        if let Query::Forward { name, .. } = query {
            if name.is_empty() {
                return Err(Failure::BadName);
            }
        }
        let res = self.result_for(query);
        self.queue.push((token, res));
        Ok(())
    }

    fn descriptors(&self) -> FdSet {
        let mut res = FdSet::new();
        if self.conf.bad_fd {
            res.add_read(1_000_000);
        } else if !self.queue.is_empty() {
            res.add_write(self.sock.as_raw_fd());
        }
        res
    }

    fn next_timeout(&self) -> Option<Duration> {
        None
    }

    fn process_ready(
        &mut self,
        ready: &FdSet,
        complete: &mut dyn FnMut(Token, LookupResult),
    ) {
        if !ready.is_writable(self.sock.as_raw_fd()) || self.queue.is_empty()
        {
            return;
        }
        let (token, res) = self.queue.remove(0);
        complete(token, res)
    }
}
