//! Process-wide engine library state.

use crate::error::EngineInitError;
use parking_lot::Mutex;
use std::fmt;

//------------ Library -------------------------------------------------------

/// The process-wide state of an engine library.
///
/// Each engine type owns exactly one static value of this type. The
/// library is initialized when the first reference is acquired and torn
/// down again when the last reference is dropped.
///
/// The reference count is protected by its own lock and both hooks run
/// while holding it. A second resolver being created concurrently with the
/// first one thus waits until initialization has finished.
pub struct Library {
    /// A human readable name for log messages.
    name: &'static str,

    /// The number of outstanding references.
    refs: Mutex<usize>,

    /// Initializes the process-wide state.
    init: fn() -> Result<(), EngineInitError>,

    /// Releases the process-wide state.
    cleanup: fn(),
}

impl Library {
    /// Creates a new library from its initialization and cleanup hooks.
    pub const fn new(
        name: &'static str,
        init: fn() -> Result<(), EngineInitError>,
        cleanup: fn(),
    ) -> Self {
        Library {
            name,
            refs: parking_lot::const_mutex(0),
            init,
            cleanup,
        }
    }

    /// Acquires a reference to the library.
    ///
    /// If this is the first reference, the library is initialized. If that
    /// fails, no reference is taken and the error is returned.
    pub fn acquire(&'static self) -> Result<LibraryRef, EngineInitError> {
        let mut refs = self.refs.lock();
        if *refs == 0 {
            (self.init)()?;
            tracing::debug!(library = self.name, "library initialized");
        }
        *refs += 1;
        Ok(LibraryRef { library: self })
    }

    /// Returns the current number of references.
    pub fn refs(&self) -> usize {
        *self.refs.lock()
    }

    /// Returns whether the library is currently initialized.
    pub fn is_initialized(&self) -> bool {
        self.refs() > 0
    }

    fn release(&self) {
        let mut refs = self.refs.lock();
        debug_assert!(*refs > 0);
        *refs -= 1;
        if *refs == 0 {
            (self.cleanup)();
            tracing::debug!(library = self.name, "library cleaned up");
        }
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Library")
            .field("name", &self.name)
            .field("refs", &self.refs())
            .finish()
    }
}

//------------ LibraryRef ----------------------------------------------------

/// A counted reference to an initialized library.
///
/// Dropping the value releases the reference.
pub struct LibraryRef {
    library: &'static Library,
}

impl LibraryRef {
    /// Returns the library this reference belongs to.
    pub fn library(&self) -> &'static Library {
        self.library
    }
}

impl Drop for LibraryRef {
    fn drop(&mut self) {
        self.library.release()
    }
}

impl fmt::Debug for LibraryRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("LibraryRef").field(&self.library.name).finish()
    }
}

//============ Testing =======================================================
