//! A stub resolution engine.
//!
//! The stub engine sends queries via UDP to the recursive resolvers listed
//! in its configuration and waits for their answers. It does all of that
//! without ever blocking: queries are sent from
//! [`begin_query`][Engine::begin_query] and answers are only read when the
//! loop reports a server socket as readable.
//!
//! A host name lookup asks for A or AAAA records or both, depending on the
//! requested address family. A lookup for a literal address asks for the
//! PTR records of the address’s reverse name. The lookup succeeds with
//! the address itself if there is at least one such record.
//!
//! Each question is an exchange of its own with its own message ID. If
//! there is no answer within the configured timeout, the question is sent
//! to the next server. After `attempts` rounds through all servers, the
//! exchange fails with [`Failure::Timeout`].

use self::conf::StubConf;
use self::message::Question;
use crate::engine::{Engine, FdSet, Library, Query, Token};
use crate::error::{EngineInitError, Failure, LookupResult};
use domain::base::{Message, Name};
use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};
use std::{fmt, io, mem};

//------------ Sub-modules ---------------------------------------------------

pub mod conf;
mod message;

//------------ Library State -------------------------------------------------

/// The library of the stub engine.
static LIBRARY: Library = Library::new("stub", init_library, cleanup_library);

/// The process-wide generator for message IDs.
///
/// This is only present while the library is initialized.
static IDS: Mutex<Option<StdRng>> = parking_lot::const_mutex(None);

fn init_library() -> Result<(), EngineInitError> {
    let rng = StdRng::from_rng(OsRng).map_err(|err| {
        EngineInitError::library(io::Error::new(io::ErrorKind::Other, err))
    })?;
    *IDS.lock() = Some(rng);
    Ok(())
}

fn cleanup_library() {
    *IDS.lock() = None;
}

/// Returns a random message ID.
fn random_id() -> u16 {
    match IDS.lock().as_mut() {
        Some(rng) => rng.gen(),
        // Only reachable if someone uses an engine without its library.
        None => rand::random(),
    }
}

//------------ StubEngine ----------------------------------------------------

/// An engine sending queries to upstream recursive resolvers.
pub struct StubEngine {
    /// The configuration.
    conf: StubConf,

    /// One socket per configured server, in configuration order.
    servers: Vec<ServerSocket>,

    /// The server the next exchange starts at if rotating.
    next_server: usize,

    /// The lookups in progress.
    lookups: BTreeMap<Token, Lookup>,

    /// The exchanges in progress, keyed by message ID.
    exchanges: HashMap<u16, Exchange>,

    /// Lookups that are done but haven’t been reported yet.
    done: Vec<(Token, LookupResult)>,

    /// The receive buffer.
    buf: Vec<u8>,
}

impl StubEngine {
    /// Returns the configuration of the engine.
    pub fn conf(&self) -> &StubConf {
        &self.conf
    }

    /// Returns the number of lookups currently in progress.
    pub fn lookups(&self) -> usize {
        self.lookups.len() + self.done.len()
    }

    /// Returns the maximum number of times a question is sent.
    fn max_sends(&self) -> usize {
        self.conf.attempts() * self.servers.len()
    }

    /// Picks the server for a new exchange.
    fn first_server(&mut self) -> usize {
        if self.conf.rotate {
            let res = self.next_server;
            self.next_server = (self.next_server + 1) % self.servers.len();
            res
        } else {
            0
        }
    }

    /// Returns a message ID not currently in use.
    ///
    /// Starts at a random ID and walks through the ID space from there.
    /// Returns `None` if all IDs are taken.
    fn unused_id(&self) -> Option<u16> {
        if self.exchanges.len() > usize::from(u16::MAX) {
            return None;
        }
        let start = random_id();
        (0..=u16::MAX)
            .map(|offset| start.wrapping_add(offset))
            .find(|id| !self.exchanges.contains_key(id))
    }

    /// Starts a new exchange for the given lookup.
    fn start_exchange(
        &mut self,
        token: Token,
        qname: &Name<Vec<u8>>,
        question: Question,
    ) -> Result<(), Failure> {
        let id = self.unused_id().ok_or_else(|| {
            tracing::warn!(
                exchanges = self.exchanges.len(),
                "all message IDs in use"
            );
            Failure::Network(io::ErrorKind::WouldBlock)
        })?;
        let request = message::compose(id, qname, question)?;
        let server = self.first_server();
        self.exchanges.insert(
            id,
            Exchange {
                token,
                question,
                request,
                server,
                sends: 0,
                sent_any: false,
                deadline: Instant::now(),
            },
        );
        self.transmit(id);
        Ok(())
    }

    /// Sends the request of an exchange to its current server.
    ///
    /// If sending fails, moves on to the next server right away. If the
    /// exchange has used up all its attempts, it is finished.
    fn transmit(&mut self, id: u16) {
        let max_sends = self.max_sends();
        let timeout = self.conf.timeout();
        let count = self.servers.len();
        let exchange = match self.exchanges.get_mut(&id) {
            Some(exchange) => exchange,
            None => return,
        };
        let mut last_err = None;
        loop {
            if exchange.sends >= max_sends {
                let failure = match (exchange.sent_any, last_err) {
                    (false, Some(err)) => Failure::from(err),
                    _ => Failure::Timeout,
                };
                self.finish_exchange(id, Err(failure));
                return;
            }
            exchange.sends += 1;
            let server = &self.servers[exchange.server];
            match server.sock.send(exchange.request.as_slice()) {
                Ok(_) => {
                    tracing::trace!(
                        id, server = %server.addr, sends = exchange.sends,
                        "sent question"
                    );
                    exchange.sent_any = true;
                    exchange.deadline = Instant::now() + timeout;
                    return;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    // Treat it like a lost datagram.
                    exchange.sent_any = true;
                    exchange.deadline = Instant::now() + timeout;
                    return;
                }
                Err(err) => {
                    tracing::debug!(
                        id, server = %server.addr, error = %err,
                        "sending failed, trying next server"
                    );
                    exchange.server = (exchange.server + 1) % count;
                    last_err = Some(err);
                }
            }
        }
    }

    /// Moves all exchanges of a server to the next server.
    fn fail_over(&mut self, server: usize) {
        let count = self.servers.len();
        let ids: Vec<u16> = self
            .exchanges
            .iter_mut()
            .filter(|(_, exchange)| exchange.server == server)
            .map(|(id, exchange)| {
                exchange.server = (server + 1) % count;
                *id
            })
            .collect();
        for id in ids {
            self.transmit(id)
        }
    }

    /// Reads all available datagrams from a server’s socket.
    fn receive(&mut self, server: usize) {
        let recv_size = self.conf.recv_size();
        loop {
            let mut buf = mem::take(&mut self.buf);
            buf.resize(recv_size, 0);
            let res = self.servers[server].sock.recv(&mut buf);
            match res {
                Ok(len) => {
                    buf.truncate(len);
                    self.process_datagram(server, buf);
                }
                Err(err) => {
                    self.buf = buf;
                    match err.kind() {
                        io::ErrorKind::WouldBlock => return,
                        io::ErrorKind::Interrupted => continue,
                        io::ErrorKind::ConnectionRefused => {
                            tracing::debug!(
                                server = %self.servers[server].addr,
                                "connection refused, trying next server"
                            );
                            self.fail_over(server);
                        }
                        _ => {
                            tracing::warn!(
                                server = %self.servers[server].addr,
                                error = %err,
                                "receiving failed"
                            );
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Processes a datagram received from a server.
    ///
    /// Anything that isn’t an answer to one of our questions is dropped.
    fn process_datagram(&mut self, server: usize, buf: Vec<u8>) {
        let response = match Message::from_octets(buf) {
            Ok(response) => response,
            Err(_) => {
                tracing::debug!(
                    server = %self.servers[server].addr,
                    "dropping short datagram"
                );
                return;
            }
        };
        let id = response.header().id();
        let question = match self.exchanges.get(&id) {
            Some(exchange) if response.is_answer(&exchange.request) => {
                exchange.question
            }
            _ => {
                tracing::debug!(
                    id, server = %self.servers[server].addr,
                    "dropping unexpected response"
                );
                self.buf = response.into_octets();
                return;
            }
        };
        let result = message::read_answer(&response, question);
        self.buf = response.into_octets();
        self.finish_exchange(id, result);
    }

    /// Retransmits all exchanges whose deadline has passed.
    fn process_timeouts(&mut self) {
        let now = Instant::now();
        let count = self.servers.len();
        let ids: Vec<u16> = self
            .exchanges
            .iter_mut()
            .filter(|(_, exchange)| exchange.deadline <= now)
            .map(|(id, exchange)| {
                exchange.server = (exchange.server + 1) % count;
                *id
            })
            .collect();
        for id in ids {
            tracing::trace!(id, "question timed out");
            self.transmit(id)
        }
    }

    /// Removes an exchange and records its outcome with its lookup.
    fn finish_exchange(
        &mut self,
        id: u16,
        result: Result<Vec<String>, Failure>,
    ) {
        let exchange = match self.exchanges.remove(&id) {
            Some(exchange) => exchange,
            None => return,
        };
        let token = exchange.token;
        let lookup = match self.lookups.get_mut(&token) {
            Some(lookup) => lookup,
            None => return,
        };
        lookup.record(exchange.question, result);
        if lookup.outstanding == 0 {
            if let Some(lookup) = self.lookups.remove(&token) {
                self.done.push((token, lookup.into_result()));
            }
        }
    }
}

//--- Engine

impl Engine for StubEngine {
    type Config = StubConf;

    fn library() -> &'static Library {
        &LIBRARY
    }

    fn create(mut conf: StubConf) -> Result<Self, EngineInitError> {
        conf.finalize();
        let servers = conf
            .servers
            .iter()
            .map(|addr| ServerSocket::connect(*addr))
            .collect::<Result<Vec<_>, _>>()
            .map_err(EngineInitError::engine)?;
        tracing::debug!(servers = servers.len(), "stub engine created");
        Ok(StubEngine {
            buf: Vec::with_capacity(conf.recv_size()),
            conf,
            servers,
            next_server: 0,
            lookups: BTreeMap::new(),
            exchanges: HashMap::new(),
            done: Vec::new(),
        })
    }

    fn begin_query(
        &mut self,
        token: Token,
        query: &Query,
    ) -> Result<(), Failure> {
        let (qname, questions, kind) = match *query {
            Query::Forward { ref name, family } => {
                let mut questions = Vec::with_capacity(2);
                if family.wants_v4() {
                    questions.push(Question::A);
                }
                if family.wants_v6() {
                    questions.push(Question::Aaaa);
                }
                (message::host_name(name)?, questions, LookupKind::Forward)
            }
            Query::Reverse(addr) => (
                message::reverse_name(addr)?,
                vec![Question::Ptr],
                LookupKind::Reverse(addr),
            ),
        };

        self.lookups.insert(
            token,
            Lookup {
                kind,
                outstanding: questions.len(),
                v4: None,
                v6: None,
                ptr: None,
            },
        );
        for question in questions {
            if let Err(failure) = self.start_exchange(token, &qname, question)
            {
                // Questions already sent are forgotten, their answers will
                // be dropped as unexpected.
                self.exchanges.retain(|_, exchange| exchange.token != token);
                self.lookups.remove(&token);
                self.done.retain(|(done, _)| *done != token);
                return Err(failure);
            }
        }
        Ok(())
    }

    fn descriptors(&self) -> FdSet {
        let mut res = FdSet::new();
        if !self.exchanges.is_empty() || !self.done.is_empty() {
            for server in &self.servers {
                res.add_read(server.fd());
            }
        }
        res
    }

    fn next_timeout(&self) -> Option<Duration> {
        if !self.done.is_empty() {
            return Some(Duration::ZERO);
        }
        let now = Instant::now();
        self.exchanges
            .values()
            .map(|exchange| exchange.deadline.saturating_duration_since(now))
            .min()
    }

    fn process_ready(
        &mut self,
        ready: &FdSet,
        complete: &mut dyn FnMut(Token, LookupResult),
    ) {
        for server in 0..self.servers.len() {
            if ready.is_readable(self.servers[server].fd()) {
                self.receive(server)
            }
        }
        self.process_timeouts();
        for (token, result) in self.done.drain(..) {
            complete(token, result)
        }
    }
}

impl fmt::Debug for StubEngine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StubEngine")
            .field("servers", &self.servers)
            .field("lookups", &self.lookups.len())
            .field("exchanges", &self.exchanges.len())
            .finish()
    }
}

//------------ ServerSocket --------------------------------------------------

/// A socket connected to one upstream server.
#[derive(Debug)]
struct ServerSocket {
    addr: SocketAddr,
    sock: UdpSocket,
}

impl ServerSocket {
    fn connect(addr: SocketAddr) -> io::Result<Self> {
        let local = match addr {
            SocketAddr::V4(_) => {
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
            }
            SocketAddr::V6(_) => {
                SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
            }
        };
        let sock = UdpSocket::bind(local)?;
        sock.connect(addr)?;
        sock.set_nonblocking(true)?;
        Ok(ServerSocket { addr, sock })
    }

    fn fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }
}

//------------ Exchange ------------------------------------------------------

/// A single question in flight.
struct Exchange {
    /// The lookup this question belongs to.
    token: Token,

    /// What is being asked.
    question: Question,

    /// The request message.
    request: Message<Vec<u8>>,

    /// The index of the server the question was last sent to.
    server: usize,

    /// How often the question has been sent.
    sends: usize,

    /// Whether sending has succeeded at least once.
    sent_any: bool,

    /// When to give up on the current server.
    deadline: Instant,
}

//------------ Lookup --------------------------------------------------------

#[derive(Clone, Copy, Debug)]
enum LookupKind {
    Forward,
    Reverse(IpAddr),
}

/// The state of a lookup, collecting the outcome of its exchanges.
#[derive(Debug)]
struct Lookup {
    kind: LookupKind,

    /// The number of exchanges still in flight.
    outstanding: usize,

    v4: Option<Result<Vec<String>, Failure>>,
    v6: Option<Result<Vec<String>, Failure>>,
    ptr: Option<Result<Vec<String>, Failure>>,
}

impl Lookup {
    fn record(
        &mut self,
        question: Question,
        result: Result<Vec<String>, Failure>,
    ) {
        let slot = match question {
            Question::A => &mut self.v4,
            Question::Aaaa => &mut self.v6,
            Question::Ptr => &mut self.ptr,
        };
        if slot.is_none() {
            *slot = Some(result);
            self.outstanding = self.outstanding.saturating_sub(1);
        }
    }

    /// Merges the outcome of all exchanges.
    ///
    /// A forward lookup succeeds if any of its questions succeeded, with
    /// the IPv4 addresses before the IPv6 addresses. Otherwise it fails
    /// with the first failure.
    fn into_result(self) -> LookupResult {
        match self.kind {
            LookupKind::Forward => {
                let mut addrs = Vec::new();
                let mut failure = None;
                let mut success = false;
                for part in [self.v4, self.v6].into_iter().flatten() {
                    match part {
                        Ok(found) => {
                            success = true;
                            addrs.extend(found);
                        }
                        Err(err) => {
                            failure.get_or_insert(err);
                        }
                    }
                }
                match failure {
                    Some(err) if !success => Err(err),
                    _ => Ok(addrs),
                }
            }
            LookupKind::Reverse(addr) => match self.ptr {
                Some(Ok(names)) if !names.is_empty() => {
                    Ok(vec![addr.to_string()])
                }
                Some(Ok(_)) => Err(Failure::NotFound),
                Some(Err(err)) => Err(err),
                None => Err(Failure::Timeout),
            },
        }
    }
}

//============ Testing =======================================================
