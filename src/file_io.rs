//! The file primitive (spec §4.1): positional byte I/O against one backing
//! file, modeled as a small trait so the block layer above it never has to
//! know whether it's talking to a real file or, in tests, a scratch file in a
//! temporary directory.
//!
//! This is the "collaborator interface" the core storage engine consumes; it
//! performs no buffering of its own beyond what the OS/host file abstraction
//! already provides.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::error::Result;

/// A seekable, positional, byte-addressable file.
///
/// Implementors need not buffer writes; the store issues writes in the order
/// they must land on disk and performs no explicit flushing between calls,
/// beyond what [`RandomAccessFile::sync`] does on `close`.
pub trait RandomAccessFile {
    /// Reads exactly `len` bytes starting at `offset`. A short read (fewer
    /// bytes available than requested) is reported as [`crate::Error::Corrupt`],
    /// since for this store it always indicates a truncated/foreign file
    /// rather than a transient condition.
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Writes `data` at `offset`, overwriting whatever was previously there.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Extends the file by `len` zero bytes, appended after the current
    /// end-of-file.
    fn append_zeros(&mut self, len: u64) -> Result<()>;

    /// Truncates (or extends with zeros) the file to exactly `new_len` bytes.
    fn truncate(&mut self, new_len: u64) -> Result<()>;

    /// Current length of the file, in bytes.
    fn len(&mut self) -> Result<u64>;

    /// Ensures all writes issued so far are durable.
    fn sync(&mut self) -> Result<()>;
}

/// [`RandomAccessFile`] backed by a real `std::fs::File`.
#[derive(Debug)]
pub struct StdFile {
    file: File,
}

impl StdFile {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)?;
        Ok(Self { file })
    }
}

impl RandomAccessFile for StdFile {
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf).map_err(|_| {
            crate::error::Error::Corrupt {
                reason: format!("short read at offset {offset}, expected {len} bytes"),
            }
        })?;
        Ok(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn append_zeros(&mut self, len: u64) -> Result<()> {
        let end = self.file.seek(SeekFrom::End(0))?;
        let zeros = vec![0u8; len as usize];
        self.file.write_all(&zeros)?;
        debug!(offset = end, len, "appended zero-filled region");
        Ok(())
    }

    fn truncate(&mut self, new_len: u64) -> Result<()> {
        self.file.set_len(new_len)?;
        Ok(())
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.file.seek(SeekFrom::End(0))?)
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn write_then_read_round_trips() {
        let tmp = NamedTempFile::new().unwrap();
        let mut f = StdFile::create(tmp.path()).unwrap();
        f.append_zeros(16).unwrap();
        f.write_at(4, b"abcd").unwrap();
        let got = f.read_at(0, 16).unwrap();
        assert_eq!(&got[4..8], b"abcd");
    }

    #[test]
    fn short_read_is_corrupt() {
        let tmp = NamedTempFile::new().unwrap();
        let mut f = StdFile::create(tmp.path()).unwrap();
        f.append_zeros(4).unwrap();
        let err = f.read_at(0, 16).unwrap_err();
        assert!(matches!(err, crate::error::Error::Corrupt { .. }));
    }

    #[test]
    fn truncate_shrinks_file() {
        let tmp = NamedTempFile::new().unwrap();
        let mut f = StdFile::create(tmp.path()).unwrap();
        f.append_zeros(32).unwrap();
        f.truncate(8).unwrap();
        assert_eq!(f.len().unwrap(), 8);
    }
}
