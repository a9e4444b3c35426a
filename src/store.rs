//! The object API (spec §4.6/§4.7): the public `Store` handle, its
//! open/create lifecycle, and the create/destroy/resize/read/write
//! operations presented to callers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fslock::LockFile;
use snafu::{ensure, OptionExt};
use tracing::{debug, instrument, warn};

use crate::addressing::{read_chain, write_chain};
use crate::block::{append_new_block, read_block_header, read_file_header, write_file_header};
use crate::chain;
use crate::error::{
    AlreadyExistsSnafu, InvalidArgSnafu, NotFoundSnafu, Result,
};
use crate::file_io::{RandomAccessFile, StdFile};
use crate::layout::{
    BlockHeader, FileHeader, ObjectDescriptor, BOOTSTRAP_AREA_LEN, DEFAULT_BLOCK_SIZE, NO_BLOCK,
    OBJECT_TABLE_ID, TRASH_TABLE_ID,
};
use crate::meta::{self, Bootstrap};

/// Whether a store is opened for reading only or for reading and writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Tunables accepted at create time. Built via [`StoreOptionsBuilder`].
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    block_size: u32,
    lock_timeout: Duration,
}

impl StoreOptions {
    pub fn builder() -> StoreOptionsBuilder {
        StoreOptionsBuilder::default()
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptionsBuilder::default().build().expect("defaults are valid")
    }
}

/// Builder for [`StoreOptions`].
pub struct StoreOptionsBuilder {
    block_size: u32,
    lock_timeout: Duration,
}

impl Default for StoreOptionsBuilder {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreOptionsBuilder {
    #[must_use]
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    #[must_use]
    pub fn lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn build(self) -> Result<StoreOptions> {
        let min_block_size = BOOTSTRAP_AREA_LEN as u32;
        ensure!(
            self.block_size >= min_block_size,
            InvalidArgSnafu {
                reason: format!(
                    "block_size must be at least {min_block_size} bytes to hold the bootstrap area"
                ),
            }
        );
        Ok(StoreOptions {
            block_size: self.block_size,
            lock_timeout: self.lock_timeout,
        })
    }
}

/// A single-file binary object store.
///
/// Not `Send`/`Sync`: a handle is owned by one caller at a time (spec §5).
pub struct Store {
    file: StdFile,
    lock: LockFile,
    file_header: FileHeader,
    boot: Bootstrap,
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn acquire_lock(path: &Path, timeout: Duration) -> Result<LockFile> {
    let mut lock = LockFile::open(&lock_path(path))?;
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if lock.try_lock()? {
            return Ok(lock);
        }
        if std::time::Instant::now() >= deadline {
            return InvalidArgSnafu {
                reason: "store is already open elsewhere",
            }
            .fail();
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

impl Store {
    /// Creates a new, empty store at `path`. Fails if the file already
    /// exists and is non-empty, per the file primitive's `IO` behavior.
    #[instrument(level = "debug", skip(options))]
    pub fn create<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        let mut lock = acquire_lock(path, options.lock_timeout)?;

        match Self::create_locked(path, options) {
            Ok((file, file_header, boot)) => {
                debug!("created store");
                Ok(Self {
                    file,
                    lock,
                    file_header,
                    boot,
                })
            }
            Err(err) => {
                let _ = lock.unlock();
                Err(err)
            }
        }
    }

    fn create_locked(path: &Path, options: StoreOptions) -> Result<(StdFile, FileHeader, Bootstrap)> {
        let mut file = StdFile::create(path)?;
        let mut file_header = FileHeader::new(options.block_size(), 0);
        write_file_header(&mut file, &file_header)?;

        let index_template = BlockHeader {
            id: OBJECT_TABLE_ID,
            block_index: 0,
            sequence: 0,
            prev: NO_BLOCK,
            next: NO_BLOCK,
        };
        append_new_block(&mut file, &mut file_header, index_template)?;

        let index = ObjectDescriptor {
            id: OBJECT_TABLE_ID,
            head_block: 0,
            tail_block: 0,
            count: 1,
        };
        let trash = ObjectDescriptor::empty(TRASH_TABLE_ID);

        meta::persist_object_count(&mut file, 0)?;
        meta::persist_index_descriptor(&mut file, &index)?;
        meta::persist_trash_descriptor(&mut file, &trash)?;

        Ok((
            file,
            file_header,
            Bootstrap {
                object_count: 0,
                index,
                trash,
            },
        ))
    }

    /// Opens an existing store at `path`.
    #[instrument(level = "debug", skip(options))]
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return NotFoundSnafu.fail();
        }
        let mut lock = acquire_lock(path, options.lock_timeout)?;

        match Self::open_locked(path, mode) {
            Ok((file, file_header, boot)) => {
                debug!(objects = boot.object_count, "opened store");
                Ok(Self {
                    file,
                    lock,
                    file_header,
                    boot,
                })
            }
            Err(err) => {
                let _ = lock.unlock();
                Err(err)
            }
        }
    }

    fn open_locked(path: &Path, mode: OpenMode) -> Result<(StdFile, FileHeader, Bootstrap)> {
        let mut file = StdFile::open(path, mode == OpenMode::ReadWrite)?;
        let file_header = read_file_header(&mut file)?;

        let block0 = read_block_header(&mut file, 0, file_header.block_size)?;
        if block0.id != OBJECT_TABLE_ID || block0.prev != NO_BLOCK || block0.sequence != 0 {
            warn!("block 0 failed bootstrap validation");
            return crate::error::CorruptSnafu {
                reason: "block 0 is not a valid object-index head",
            }
            .fail();
        }

        let boot = meta::read_bootstrap(&mut file)?;
        Ok((file, file_header, boot))
    }

    /// Flushes pending state and releases the file handle. Also performed
    /// implicitly by `Drop`.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        self.file.sync()?;
        let _ = self.lock.unlock();
        Ok(())
    }

    /// Number of objects currently tracked.
    pub fn enumerate(&self) -> u32 {
        self.boot.object_count
    }

    /// The block size this store was created with. Fixed for the life of
    /// the file (spec §1 Non-goals: "variable-sized block files").
    pub fn block_size(&self) -> u32 {
        self.file_header.block_size
    }

    /// Returns the id stored at enumeration position `i`.
    pub fn id_at(&mut self, i: u32) -> Result<u32> {
        meta::id_at(&mut self.file, &self.boot, self.file_header.block_size, i)?
            .context(NotFoundSnafu)
    }

    /// Whether an object with `id` exists.
    pub fn exists(&mut self, id: u32) -> Result<bool> {
        Ok(meta::find(&mut self.file, &self.boot, self.file_header.block_size, id)?.is_some())
    }

    fn reject_reserved(id: u32) -> Result<()> {
        ensure!(
            id != OBJECT_TABLE_ID && id != TRASH_TABLE_ID,
            InvalidArgSnafu {
                reason: "id is reserved for internal use",
            }
        );
        Ok(())
    }

    /// Creates a new object with the given id and initial logical length.
    /// Minimum allocation is always one block, even for `length == 0`.
    #[instrument(level = "debug", skip(self))]
    pub fn add(&mut self, id: u32, length: u64) -> Result<()> {
        Self::reject_reserved(id)?;
        ensure!(
            meta::find(&mut self.file, &self.boot, self.file_header.block_size, id)?.is_none(),
            AlreadyExistsSnafu
        );

        let mut desc = ObjectDescriptor::empty(id);
        let blocks = chain::blocks_needed(self.file_header.block_size, length).max(1);
        chain::grow(
            &mut self.file,
            &mut self.file_header,
            &mut desc,
            &mut self.boot.trash,
            blocks,
        )?;

        let block_size = self.file_header.block_size;
        meta::append(&mut self.file, &mut self.file_header, &mut self.boot, block_size, desc)?;

        meta::persist_object_count(&mut self.file, self.boot.object_count)?;
        meta::persist_index_descriptor(&mut self.file, &self.boot.index)?;
        meta::persist_trash_descriptor(&mut self.file, &self.boot.trash)?;
        debug!(id, blocks, "added object");
        Ok(())
    }

    /// Removes an object, returning its blocks to the trash and compacting
    /// the index.
    #[instrument(level = "debug", skip(self))]
    pub fn remove(&mut self, id: u32) -> Result<()> {
        let (slot, mut desc) = meta::find(&mut self.file, &self.boot, self.file_header.block_size, id)?
            .context(NotFoundSnafu)?;

        chain::shrink(
            &mut self.file,
            self.file_header.block_size,
            &mut desc,
            &mut self.boot.trash,
            desc.count,
        )?;

        meta::remove_slot(&mut self.file, &mut self.boot, self.file_header.block_size, slot)?;

        meta::persist_object_count(&mut self.file, self.boot.object_count)?;
        meta::persist_trash_descriptor(&mut self.file, &self.boot.trash)?;
        debug!(id, "removed object");
        Ok(())
    }

    /// Resizes an object's chain to hold exactly `logical_bytes` bytes.
    #[instrument(level = "debug", skip(self))]
    pub fn set_length(&mut self, id: u32, logical_bytes: u64) -> Result<()> {
        let (slot, mut desc) = meta::find(&mut self.file, &self.boot, self.file_header.block_size, id)?
            .context(NotFoundSnafu)?;

        chain::set_length(
            &mut self.file,
            &mut self.file_header,
            &mut desc,
            &mut self.boot.trash,
            logical_bytes,
        )?;

        meta::update_slot(&mut self.file, &self.boot, self.file_header.block_size, slot, &desc)?;
        meta::persist_index_descriptor(&mut self.file, &self.boot.index)?;
        meta::persist_trash_descriptor(&mut self.file, &self.boot.trash)?;
        Ok(())
    }

    /// Current allocated length of an object, in bytes (block-rounded, not
    /// the caller-supplied logical length; see spec §9).
    pub fn get_length(&mut self, id: u32) -> Result<u64> {
        let desc = meta::get(&mut self.file, &self.boot, self.file_header.block_size, id)?;
        Ok(u64::from(desc.count) * u64::from(self.file_header.block_size))
    }

    /// Reads `dst.len()` bytes starting at `pos` from object `id`'s payload.
    pub fn read(&mut self, id: u32, pos: u64, dst: &mut [u8]) -> Result<()> {
        let desc = meta::get(&mut self.file, &self.boot, self.file_header.block_size, id)?;
        read_chain(&mut self.file, &desc, self.file_header.block_size, 0, pos, dst)
    }

    /// Writes `src` starting at `pos` into object `id`'s payload.
    pub fn write(&mut self, id: u32, pos: u64, src: &[u8]) -> Result<()> {
        let desc = meta::get(&mut self.file, &self.boot, self.file_header.block_size, id)?;
        write_chain(&mut self.file, &desc, self.file_header.block_size, 0, pos, src)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(%err, "error flushing store on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn opts() -> StoreOptions {
        StoreOptions::builder().block_size(128).build().unwrap()
    }

    #[test]
    fn create_then_reopen_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        {
            let store = Store::create(&path, opts()).unwrap();
            store.close().unwrap();
        }
        let store = Store::open(&path, OpenMode::ReadOnly, opts()).unwrap();
        assert_eq!(store.enumerate(), 0);
    }

    #[test]
    fn add_zero_length_rounds_up_to_one_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let mut store = Store::create(&path, opts()).unwrap();
        store.add(7, 0).unwrap();
        assert_eq!(store.get_length(7).unwrap(), 128);
    }

    #[test]
    fn write_then_read_round_trips_across_blocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let mut store = Store::create(&path, opts()).unwrap();
        store.add(1, 3 * 128).unwrap();

        let data = vec![0xABu8; 128 + 10];
        store.write(1, 128 - 5, &data).unwrap();
        let mut got = vec![0u8; data.len()];
        store.read(1, 128 - 5, &mut got).unwrap();
        assert_eq!(got, data);
    }

    #[test]
    fn set_length_trash_reuse_avoids_file_growth() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let mut store = Store::create(&path, opts()).unwrap();
        store.add(1, 5 * 128).unwrap();
        store.set_length(1, 128).unwrap();
        assert_eq!(store.boot.trash.count, 4);

        let blocks_before = store.file_header.block_count;
        store.add(2, 4 * 128).unwrap();
        assert_eq!(store.get_length(2).unwrap(), 4 * 128);
        assert_eq!(store.file_header.block_count, blocks_before);
    }

    #[test]
    fn remove_compacts_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let mut store = Store::create(&path, opts()).unwrap();
        store.add(1, 128).unwrap();
        store.add(2, 128).unwrap();
        store.add(3, 128).unwrap();

        store.remove(2).unwrap();
        assert_eq!(store.enumerate(), 2);
        let ids: Vec<u32> = (0..store.enumerate())
            .map(|i| store.id_at(i).unwrap())
            .collect();
        assert!(ids.contains(&1));
        assert!(ids.contains(&3));
        assert!(!store.exists(2).unwrap());
    }

    #[test]
    fn add_rejects_reserved_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let mut store = Store::create(&path, opts()).unwrap();
        let err = store.add(OBJECT_TABLE_ID, 1).unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidArg { .. }));
        let err = store.add(TRASH_TABLE_ID, 1).unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidArg { .. }));
    }

    #[test]
    fn add_duplicate_id_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let mut store = Store::create(&path, opts()).unwrap();
        store.add(1, 128).unwrap();
        let err = store.add(1, 128).unwrap_err();
        assert!(matches!(err, crate::error::Error::AlreadyExists));
    }

    #[test]
    fn open_rejects_corrupted_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        {
            let store = Store::create(&path, opts()).unwrap();
            store.close().unwrap();
        }
        {
            let mut raw = StdFile::open(&path, true).unwrap();
            raw.write_at(0, &[0, 0, 0, 0]).unwrap();
        }
        let err = Store::open(&path, OpenMode::ReadOnly, opts()).unwrap_err();
        assert!(matches!(err, crate::error::Error::Corrupt { .. }));
    }
}
