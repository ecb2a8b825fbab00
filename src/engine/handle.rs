//! Owning an engine instance.

use super::{Engine, FdSet, LibraryRef, Query, Token};
use crate::error::{EngineInitError, Failure, LookupResult};
use std::fmt;
use std::time::Duration;

//------------ EngineHandle --------------------------------------------------

/// Exclusive ownership of one engine instance.
///
/// Creating a handle acquires a reference to the engine’s library and
/// dropping it releases that reference again after the engine itself has
/// been dropped. The handle can be moved but not cloned.
pub struct EngineHandle<E> {
    /// The engine.
    ///
    /// Fields are dropped in order of declaration, so this goes before the
    /// library reference.
    engine: E,

    /// Our reference to the process-wide library.
    library: LibraryRef,
}

impl<E: Engine> EngineHandle<E> {
    /// Creates a new engine using the given configuration.
    ///
    /// If creating the engine fails, the library reference acquired for it
    /// is released before the error is returned.
    pub fn create(config: E::Config) -> Result<Self, EngineInitError> {
        let library = E::library().acquire()?;
        let engine = E::create(config)?;
        Ok(EngineHandle { engine, library })
    }

    /// Starts a query.
    pub fn begin_query(
        &mut self,
        token: Token,
        query: &Query,
    ) -> Result<(), Failure> {
        self.engine.begin_query(token, query)
    }

    /// Returns the descriptors the engine waits on.
    pub fn descriptors(&self) -> FdSet {
        self.engine.descriptors()
    }

    /// Returns the time until the engine needs attention.
    pub fn next_timeout(&self) -> Option<Duration> {
        self.engine.next_timeout()
    }

    /// Lets the engine process ready descriptors.
    pub fn process_ready(
        &mut self,
        ready: &FdSet,
        complete: &mut dyn FnMut(Token, LookupResult),
    ) {
        self.engine.process_ready(ready, complete)
    }

    /// Returns a reference to the engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Returns a mutable reference to the engine.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Returns the library reference held by this handle.
    pub fn library(&self) -> &LibraryRef {
        &self.library
    }
}

impl<E> fmt::Debug for EngineHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("library", &self.library)
            .finish_non_exhaustive()
    }
}

//============ Testing =======================================================
