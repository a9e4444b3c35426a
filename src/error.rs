//! Error kinds returned by every fallible OStore operation.
//!
//! Mirrors the error kinds from the store's design: there is no `Ok`-carrying
//! variant here because success is simply `Result::Ok` -- only the failure
//! kinds need representation.

use std::io;

use snafu::Snafu;

/// Everything that can go wrong while creating, opening, or operating on a store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The backing file did not exist (on open), or the requested object id /
    /// enumeration index does not exist.
    #[snafu(display("object or file not found"))]
    NotFound,

    /// `add` was called with an id that is already present in the object index.
    #[snafu(display("object with this id already exists"))]
    AlreadyExists,

    /// The file header, a block header, or an on-disk invariant failed
    /// validation. The store may be truncated, foreign, or written by an
    /// incompatible version.
    #[snafu(display("store file is corrupt: {}", reason))]
    Corrupt { reason: String },

    /// A read or write range extended past the object's currently allocated
    /// length.
    #[snafu(display(
        "requested range [{}, {}) exceeds object length {}",
        position,
        position + *length as u64,
        available
    ))]
    OutOfBounds {
        position: u64,
        length: usize,
        available: u64,
    },

    /// The underlying file primitive failed: a short read/write, or an OS-level
    /// I/O error.
    #[snafu(display("I/O error: {}", source))]
    Io { source: io::Error },

    /// An allocation could not be satisfied.
    #[snafu(display("out of memory"))]
    NoMem,

    /// A caller-supplied argument violates a documented precondition, such as
    /// using a reserved object id.
    #[snafu(display("invalid argument: {}", reason))]
    InvalidArg { reason: String },
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
