//! On-disk wire layout: magic numbers, fixed-size header structs, and the
//! byte-exact encode/decode routines used to move them in and out of the
//! backing file.
//!
//! # Warning
//!
//! - Do not add fields to [`FileHeader`], [`BlockHeader`], or [`ObjectDescriptor`].
//! - Do not remove fields from them.
//! - Do not change the type of a field.
//! - Do not change the order of fields.
//!
//! Doing so changes the serialized representation and breaks every store file
//! written by a previous version of this crate.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::warn;

use crate::error::{CorruptSnafu, Result};

/// Reading a fixed-size field out of an in-memory byte slice only fails when
/// the slice was too short, which always means the on-disk header was
/// truncated -- never a "real" I/O error.
fn short_read(_: std::io::Error) -> crate::error::Error {
    crate::error::Error::Corrupt {
        reason: "truncated header".to_string(),
    }
}

/// Sentinel physical block index meaning "no such block".
pub const NO_BLOCK: u32 = 0xFFFF_FFFF;

/// Reserved id of the object-index meta-object. Never usable by callers.
pub const OBJECT_TABLE_ID: u32 = 0xFFFF_FFFE;

/// Reserved id of the trash meta-object. Never usable by callers.
pub const TRASH_TABLE_ID: u32 = 0xFFFF_FFFD;

/// Magic word identifying a valid OStore file header.
const FILE_MAGIC: u32 = 0x4F53_544F; // "OSTO"

/// Magic word identifying a valid block header.
const BLOCK_MAGIC: u32 = 0x424C_4B48; // "BLKH"

/// On-disk format version written/understood by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// Default block size used by [`crate::StoreOptions`] when none is given.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

pub const FILE_HEADER_LEN: u64 = 16;
pub const BLOCK_HEADER_LEN: u64 = 24;
pub const OBJECT_DESCRIPTOR_LEN: u64 = 16;

/// Size of the three bootstrap fields packed at the front of block 0's payload:
/// `object_count` (4 bytes) + `index_descriptor` (16 bytes) + `trash_descriptor`
/// (16 bytes).
pub const BOOTSTRAP_AREA_LEN: u64 = 4 + OBJECT_DESCRIPTOR_LEN + OBJECT_DESCRIPTOR_LEN;

/// Bytes of block 0's payload consumed by the two meta descriptors, i.e. the
/// portion of the bootstrap area that sits *after* `object_count` and must be
/// "skipped over" when the object-index chain addresses its own payload.
pub const INDEX_CHAIN_RESERVED_LEN: u64 = OBJECT_DESCRIPTOR_LEN + OBJECT_DESCRIPTOR_LEN;

pub const FILE_HEADER_OFFSET: u64 = 0;
pub const BLOCK0_HEADER_OFFSET: u64 = FILE_HEADER_OFFSET + FILE_HEADER_LEN;
pub const BLOCK0_PAYLOAD_OFFSET: u64 = BLOCK0_HEADER_OFFSET + BLOCK_HEADER_LEN;
pub const OBJECT_COUNT_OFFSET: u64 = BLOCK0_PAYLOAD_OFFSET;
pub const INDEX_DESCRIPTOR_OFFSET: u64 = OBJECT_COUNT_OFFSET + 4;
pub const TRASH_DESCRIPTOR_OFFSET: u64 = INDEX_DESCRIPTOR_OFFSET + OBJECT_DESCRIPTOR_LEN;

/// The file header at absolute offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub block_size: u32,
    pub block_count: u32,
}

impl FileHeader {
    pub fn new(block_size: u32, block_count: u32) -> Self {
        Self {
            magic: FILE_MAGIC,
            version: FORMAT_VERSION,
            block_size,
            block_count,
        }
    }

    pub fn encode(&self) -> [u8; FILE_HEADER_LEN as usize] {
        let mut buf = [0u8; FILE_HEADER_LEN as usize];
        {
            let mut w = &mut buf[..];
            w.write_u32::<LittleEndian>(self.magic).expect("fixed buf");
            w.write_u32::<LittleEndian>(self.version)
                .expect("fixed buf");
            w.write_u32::<LittleEndian>(self.block_size)
                .expect("fixed buf");
            w.write_u32::<LittleEndian>(self.block_count)
                .expect("fixed buf");
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = bytes;
        let header = Self {
            magic: r.read_u32::<LittleEndian>().map_err(short_read)?,
            version: r.read_u32::<LittleEndian>().map_err(short_read)?,
            block_size: r.read_u32::<LittleEndian>().map_err(short_read)?,
            block_count: r.read_u32::<LittleEndian>().map_err(short_read)?,
        };
        if header.magic != FILE_MAGIC {
            warn!(magic = header.magic, "file header magic mismatch");
            return CorruptSnafu {
                reason: "file header magic mismatch",
            }
            .fail();
        }
        if header.version != FORMAT_VERSION {
            warn!(version = header.version, "unsupported format version");
            return CorruptSnafu {
                reason: "unsupported format version",
            }
            .fail();
        }
        Ok(header)
    }
}

/// The header prefixing every block in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub id: u32,
    pub block_index: u32,
    pub sequence: u32,
    pub prev: u32,
    pub next: u32,
}

impl BlockHeader {
    pub fn encode(&self) -> [u8; BLOCK_HEADER_LEN as usize] {
        let mut buf = [0u8; BLOCK_HEADER_LEN as usize];
        {
            let mut w = &mut buf[..];
            w.write_u32::<LittleEndian>(BLOCK_MAGIC).expect("fixed buf");
            w.write_u32::<LittleEndian>(self.id).expect("fixed buf");
            w.write_u32::<LittleEndian>(self.block_index)
                .expect("fixed buf");
            w.write_u32::<LittleEndian>(self.sequence)
                .expect("fixed buf");
            w.write_u32::<LittleEndian>(self.prev).expect("fixed buf");
            w.write_u32::<LittleEndian>(self.next).expect("fixed buf");
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = bytes;
        let magic = r.read_u32::<LittleEndian>().map_err(short_read)?;
        if magic != BLOCK_MAGIC {
            warn!(magic, "block header magic mismatch");
            return CorruptSnafu {
                reason: "block header magic mismatch",
            }
            .fail();
        }
        Ok(Self {
            id: r.read_u32::<LittleEndian>().map_err(short_read)?,
            block_index: r.read_u32::<LittleEndian>().map_err(short_read)?,
            sequence: r.read_u32::<LittleEndian>().map_err(short_read)?,
            prev: r.read_u32::<LittleEndian>().map_err(short_read)?,
            next: r.read_u32::<LittleEndian>().map_err(short_read)?,
        })
    }
}

/// A chain descriptor: identifies an object (or meta-object) and the head,
/// tail, and length of the block chain backing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub id: u32,
    pub head_block: u32,
    pub tail_block: u32,
    pub count: u32,
}

impl ObjectDescriptor {
    pub fn empty(id: u32) -> Self {
        Self {
            id,
            head_block: NO_BLOCK,
            tail_block: NO_BLOCK,
            count: 0,
        }
    }

    pub fn encode(&self) -> [u8; OBJECT_DESCRIPTOR_LEN as usize] {
        let mut buf = [0u8; OBJECT_DESCRIPTOR_LEN as usize];
        {
            let mut w = &mut buf[..];
            w.write_u32::<LittleEndian>(self.id).expect("fixed buf");
            w.write_u32::<LittleEndian>(self.head_block)
                .expect("fixed buf");
            w.write_u32::<LittleEndian>(self.tail_block)
                .expect("fixed buf");
            w.write_u32::<LittleEndian>(self.count).expect("fixed buf");
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = bytes;
        Ok(Self {
            id: r.read_u32::<LittleEndian>().map_err(short_read)?,
            head_block: r.read_u32::<LittleEndian>().map_err(short_read)?,
            tail_block: r.read_u32::<LittleEndian>().map_err(short_read)?,
            count: r.read_u32::<LittleEndian>().map_err(short_read)?,
        })
    }
}
