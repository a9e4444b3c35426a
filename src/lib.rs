//! OStore: an embedded single-file binary object store.
//!
//! A store is a random-access file holding a small, finite set of named
//! objects, each identified by a caller-chosen 32-bit id and presenting a
//! flat, byte-addressable payload. The crate is organized as a layered
//! stack, leaves first:
//!
//! - [`file_io`] — positional byte I/O against the backing file.
//! - [`block`] — fixed-size block headers, offsets, and allocation.
//! - [`chain`] — doubly-linked block chains, grown from and shrunk into a
//!   shared trash list.
//! - [`addressing`] — logical-offset-to-block-and-physical-offset
//!   translation and the block-spanning read/write loop.
//! - [`meta`] — the two bootstrap meta-objects (object index, trash) and
//!   their persistence in the file's bootstrap area.
//! - [`store`] — the public [`Store`] handle and object API.
//!
//! The file is designed to survive normal close/open cycles and to detect
//! structural corruption on open; it makes no guarantees across multiple
//! concurrent writers or torn writes (see [`store`] for the full contract).

pub mod addressing;
pub mod block;
pub mod chain;
pub mod error;
pub mod file_io;
pub mod layout;
pub mod meta;
pub mod store;

pub use error::{Error, Result};
pub use layout::{OBJECT_TABLE_ID, TRASH_TABLE_ID};
pub use store::{OpenMode, Store, StoreOptions, StoreOptionsBuilder};

/// The on-disk format version this build of the crate reads and writes,
/// derived from the crate's own version at compile time.
pub fn version() -> (u32, u32) {
    (
        env!("CARGO_PKG_VERSION_MAJOR").parse().expect("valid version"),
        env!("CARGO_PKG_VERSION_MINOR").parse().expect("valid version"),
    )
}

#[cfg(test)]
mod tests {
    #[test]
    fn version_is_reported() {
        let (major, minor) = super::version();
        assert_eq!(major, 0);
        assert_eq!(minor, 1);
    }
}
