//! Errors.
//!
//! There are two kinds of errors. Creating a resolver can fail with an
//! [`EngineInitError`] which is returned right away. Everything that goes
//! wrong with an individual lookup is a [`Failure`] that is only ever
//! delivered to the callback of that lookup.

use std::{error, fmt, io};

//------------ InitStage -----------------------------------------------------

/// The stage at which creating an engine failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InitStage {
    /// Process-wide initialization of the engine library failed.
    Library,

    /// Creating the engine instance for one resolver failed.
    Engine,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            InitStage::Library => f.write_str("library"),
            InitStage::Engine => f.write_str("engine"),
        }
    }
}

//------------ EngineInitError -----------------------------------------------

/// Creating a resolution engine failed.
#[derive(Debug)]
pub struct EngineInitError {
    stage: InitStage,
    source: io::Error,
}

impl EngineInitError {
    /// Creates an error for a failed process-wide initialization.
    pub fn library(source: impl Into<io::Error>) -> Self {
        EngineInitError {
            stage: InitStage::Library,
            source: source.into(),
        }
    }

    /// Creates an error for a failed engine instance.
    pub fn engine(source: impl Into<io::Error>) -> Self {
        EngineInitError {
            stage: InitStage::Engine,
            source: source.into(),
        }
    }

    /// Returns the stage at which initialization failed.
    pub fn stage(&self) -> InitStage {
        self.stage
    }

    /// Returns the underlying I/O error.
    pub fn io_error(&self) -> &io::Error {
        &self.source
    }
}

impl fmt::Display for EngineInitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} failed to initialize: {}", self.stage, self.source)
    }
}

impl error::Error for EngineInitError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.source)
    }
}

//------------ Failure -------------------------------------------------------

/// The reason a lookup did not succeed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Failure {
    /// The name or address does not exist.
    NotFound,

    /// The upstream server failed to produce an answer.
    ServerFailure,

    /// The upstream server refused to answer.
    Refused,

    /// The query or the response was malformed.
    FormatError,

    /// The name cannot be expressed as a domain name.
    BadName,

    /// No server answered in time.
    Timeout,

    /// Talking to the servers failed.
    Network(io::ErrorKind),

    /// The resolver was shut down before the lookup finished.
    Cancelled,
}

impl Failure {
    /// Returns whether the lookup was cancelled rather than attempted.
    pub fn is_cancelled(self) -> bool {
        matches!(self, Failure::Cancelled)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Failure::NotFound => f.write_str("domain name not found"),
            Failure::ServerFailure => f.write_str("server failure"),
            Failure::Refused => f.write_str("query refused"),
            Failure::FormatError => f.write_str("malformed message"),
            Failure::BadName => f.write_str("misformatted domain name"),
            Failure::Timeout => f.write_str("timeout"),
            Failure::Network(kind) => write!(f, "network error: {}", kind),
            Failure::Cancelled => f.write_str("lookup cancelled"),
        }
    }
}

impl error::Error for Failure {}

impl From<io::Error> for Failure {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => Failure::Timeout,
            kind => Failure::Network(kind),
        }
    }
}

//------------ LookupResult --------------------------------------------------

/// The outcome of a single lookup.
///
/// On success this is the set of addresses in the order the engine
/// reported them. The set may well be empty.
pub type LookupResult = Result<Vec<String>, Failure>;

//============ Testing =======================================================
