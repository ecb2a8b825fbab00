//! Stub engine configuration.
//!
//! The configuration is normally read from the system’s `/etc/resolv.conf`
//! and modeled along the lines of glibc’s resolver. Only the parts that
//! matter for sending queries to upstream servers are kept: the servers
//! themselves, how long to wait for them, and how often to try.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::SplitWhitespace;
use std::time::Duration;
use std::{cmp, error, fmt, fs, io};

//------------ Configuration Constants ---------------------------------------

/// Limits for the time to wait for a response.
const TIMEOUT: DefMinMax<Duration> = DefMinMax::new(
    Duration::from_secs(5),
    Duration::from_millis(1),
    Duration::from_secs(60),
);

/// Limits for the number of rounds through all servers.
const ATTEMPTS: DefMinMax<usize> = DefMinMax::new(2, 1, 10);

/// Limits for the size of the receive buffer.
const RECV_SIZE: DefMinMax<usize> = DefMinMax::new(1232, 512, 65535);

/// The port servers listen on unless stated otherwise.
const DNS_PORT: u16 = 53;

//------------ StubConf ------------------------------------------------------

/// Configuration for the stub engine.
///
/// A new value via [`new`][Self::new] is empty. You can add servers and
/// adjust the options. The configuration can also be read from a
/// glibc-style configuration file via [`parse`][Self::parse] and
/// [`parse_file`][Self::parse_file]. Either way, call
/// [`finalize`][Self::finalize] before using it.
///
/// The easiest way to get the system’s configuration is
/// [`StubConf::system`] which is also what `Default` gives you.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StubConf {
    /// Addresses of servers to query.
    pub servers: Vec<SocketAddr>,

    /// Whether to pick servers round-robin rather than in order.
    pub rotate: bool,

    /// Timeout to wait for a response from one server.
    timeout: Duration,

    /// Number of rounds through all servers before giving up.
    attempts: usize,

    /// Size of the receive buffer in bytes.
    recv_size: usize,
}

/// # Management
///
impl StubConf {
    /// Creates a new, empty configuration.
    ///
    /// The configuration doesn’t contain any servers. Call
    /// [`finalize`][Self::finalize] to make it usable.
    pub fn new() -> Self {
        StubConf {
            servers: Vec::new(),
            rotate: false,
            timeout: TIMEOUT.default(),
            attempts: ATTEMPTS.default(),
            recv_size: RECV_SIZE.default(),
        }
    }

    /// Creates a configuration querying only the given server.
    pub fn with_server(addr: SocketAddr) -> Self {
        let mut res = Self::new();
        res.servers.push(addr);
        res
    }

    /// Returns the configuration of this system.
    ///
    /// This reads `/etc/resolv.conf`. Lines that can’t be parsed are
    /// skipped and everything else is used. If the file can’t be read at
    /// all, the default configuration is used.
    pub fn system() -> Self {
        let mut res = Self::new();
        if let Err(err) = res.parse_file("/etc/resolv.conf") {
            tracing::debug!(
                error = %err,
                servers = res.servers.len(),
                "problem with /etc/resolv.conf"
            );
        }
        res.finalize();
        res
    }

    /// Finalizes the configuration for actual use.
    ///
    /// If there are no servers, this adds `127.0.0.1:53`, just like glibc
    /// does.
    pub fn finalize(&mut self) {
        if self.servers.is_empty() {
            self.servers.push(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                DNS_PORT,
            ));
        }
    }

    /// Returns the time to wait for a response from a server.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sets the time to wait for a response from a server.
    ///
    /// If the value is too small or too large, it will be capped.
    pub fn set_timeout(&mut self, value: Duration) {
        self.timeout = TIMEOUT.limit(value)
    }

    /// Returns how many rounds through all servers are made.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Sets how many rounds through all servers are made.
    ///
    /// If the value is too small or too large, it will be capped.
    pub fn set_attempts(&mut self, value: usize) {
        self.attempts = ATTEMPTS.limit(value)
    }

    /// Returns the size of the receive buffer.
    pub fn recv_size(&self) -> usize {
        self.recv_size
    }

    /// Sets the size of the receive buffer.
    ///
    /// If the value is too small or too large, it will be capped.
    pub fn set_recv_size(&mut self, value: usize) {
        self.recv_size = RECV_SIZE.limit(value)
    }
}

/// # Parsing Configuration File
///
impl StubConf {
    /// Parses the configuration from a file.
    pub fn parse_file(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let data = fs::read_to_string(path)?;
        self.parse(&data)
    }

    /// Parses the configuration from a string.
    ///
    /// The format is that of the `/etc/resolv.conf` file. Everything
    /// after a `#` or `;` is a comment. Keywords not relevant for the stub
    /// engine, including unknown ones, are ignored.
    ///
    /// A line that can’t be parsed is skipped and the remaining lines are
    /// still applied. The error for the first such line is returned at the
    /// end.
    pub fn parse(&mut self, data: &str) -> Result<(), Error> {
        let mut res = Ok(());
        for line in data.lines() {
            let line = match line.find(|ch: char| ch == '#' || ch == ';') {
                Some(pos) => &line[..pos],
                None => line,
            };

            let mut words = line.split_whitespace();
            let keyword = words.next();
            let line_res = match keyword {
                Some("nameserver") => self.parse_nameserver(words),
                Some("options") => {
                    self.parse_options(words);
                    Ok(())
                }
                Some(other) => {
                    tracing::trace!(keyword = other, "ignoring keyword");
                    Ok(())
                }
                None => Ok(()),
            };
            if let Err(err) = line_res {
                tracing::debug!(line, "skipping broken line");
                if res.is_ok() {
                    res = Err(err)
                }
            }
        }
        res
    }

    fn parse_nameserver(
        &mut self,
        mut words: SplitWhitespace,
    ) -> Result<(), Error> {
        let addr = next_word(&mut words)?;
        // Link-local IPv6 addresses may carry a zone which we can’t use.
        let addr = addr.split('%').next().unwrap_or(addr);
        let addr = addr.parse::<IpAddr>().map_err(|_| Error::ParseError)?;
        self.servers.push(SocketAddr::new(addr, DNS_PORT));
        no_more_words(words)
    }

    fn parse_options(&mut self, words: SplitWhitespace) {
        for word in words {
            match split_arg(word) {
                Ok(("timeout", Some(n))) => {
                    self.set_timeout(Duration::from_secs(n as u64))
                }
                Ok(("attempts", Some(n))) => self.set_attempts(n),
                Ok(("rotate", None)) => self.rotate = true,
                // Ignore unknown or misformated options.
                _ => {}
            }
        }
    }
}

//--- Default

impl Default for StubConf {
    fn default() -> Self {
        Self::system()
    }
}

//--- Display

/// Writes the configuration in `resolv.conf` format.
///
/// The format can’t express everything, so the output is lossy: server
/// ports are dropped, the timeout is rounded up to full seconds, and the
/// receive buffer size is left out.
impl fmt::Display for StubConf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for server in &self.servers {
            writeln!(f, "nameserver {}", server.ip())?;
        }
        write!(
            f,
            "options timeout:{} attempts:{}",
            timeout_secs(self.timeout),
            self.attempts
        )?;
        if self.rotate {
            f.write_str(" rotate")?;
        }
        writeln!(f)
    }
}

//------------ DefMinMax -----------------------------------------------------

/// The default, minimum, and maximum values for a config variable.
#[derive(Clone, Copy)]
struct DefMinMax<T> {
    def: T,
    min: T,
    max: T,
}

impl<T> DefMinMax<T> {
    const fn new(def: T, min: T, max: T) -> Self {
        Self { def, min, max }
    }

    fn default(self) -> T {
        self.def
    }

    fn limit(self, value: T) -> T
    where
        T: Ord,
    {
        cmp::max(self.min, cmp::min(self.max, value))
    }
}

//------------ Private Helpers -----------------------------------------------

/// Returns a timeout in seconds, rounded up.
fn timeout_secs(timeout: Duration) -> u64 {
    if timeout.subsec_nanos() > 0 {
        timeout.as_secs() + 1
    } else {
        timeout.as_secs()
    }
}

/// Returns a reference to the next word or an error.
fn next_word<'a>(words: &mut SplitWhitespace<'a>) -> Result<&'a str, Error> {
    words.next().ok_or(Error::ParseError)
}

/// Returns nothing but errors out if there are words left.
fn no_more_words(mut words: SplitWhitespace) -> Result<(), Error> {
    match words.next() {
        Some(..) => Err(Error::ParseError),
        None => Ok(()),
    }
}

/// Splits the name and argument from an option with arguments.
fn split_arg(s: &str) -> Result<(&str, Option<usize>), Error> {
    match s.split_once(':') {
        Some((left, right)) => {
            let value = right.parse().map_err(|_| Error::ParseError)?;
            Ok((left, Some(value)))
        }
        None => Ok((s, None)),
    }
}

//------------ Error ---------------------------------------------------------

/// The error that can happen when parsing `resolv.conf`.
#[derive(Debug)]
pub enum Error {
    /// The file is not a proper file.
    ParseError,

    /// Something happend while reading.
    Io(io::Error),
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Error {
        Error::Io(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::ParseError => f.write_str("error parsing configuration"),
            Error::Io(ref err) => err.fmt(f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::ParseError => None,
            Error::Io(ref err) => Some(err),
        }
    }
}

//============ Testing =======================================================
