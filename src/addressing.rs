//! The addressing layer (spec §4.4): resolves `(descriptor, logical offset,
//! length)` to block-local file I/O, walking the chain block by block.
//!
//! The object-index chain is addressed through the same routine as every
//! other chain; the only wrinkle is that block 0 of that specific chain has
//! `INDEX_CHAIN_RESERVED_LEN` bytes of its payload claimed by the two meta
//! descriptors, which the chain's own logical payload must skip over (see
//! the module-level note in [`crate::layout`]).

use tracing::instrument;

use crate::block::block_payload_offset;
use crate::error::{OutOfBoundsSnafu, Result};
use crate::file_io::RandomAccessFile;
use crate::layout::{BlockHeader, ObjectDescriptor};

/// Logical byte capacity contributed by sequence `seq` of a chain with the
/// given `bootstrap_reserved` (0 for every chain except the object index).
fn block_capacity(block_size: u32, bootstrap_reserved: u64, seq: u32) -> u64 {
    if seq == 0 {
        u64::from(block_size) - bootstrap_reserved
    } else {
        u64::from(block_size)
    }
}

/// Total logical payload capacity of a chain with `count` blocks.
pub fn chain_capacity(block_size: u32, bootstrap_reserved: u64, count: u32) -> u64 {
    if count == 0 {
        return 0;
    }
    block_capacity(block_size, bootstrap_reserved, 0) + u64::from(count - 1) * u64::from(block_size)
}

/// One contiguous physical sub-range within a block's payload.
struct SubRange {
    in_block_offset: u64,
    len: u64,
}

/// Splits a `[in_block_offset, in_block_offset + len)` logical range local to
/// sequence `seq` into the physical sub-ranges it actually occupies. For every
/// chain except the object index, and for every sequence but 0 of the object
/// index, this is always the range unchanged. For sequence 0 of the object
/// index, a range that crosses the 4-byte `object_count` boundary is split in
/// two, skipping the `bootstrap_reserved` bytes claimed by the meta
/// descriptors.
fn split_ranges(
    bootstrap_reserved: u64,
    seq: u32,
    in_block_offset: u64,
    len: u64,
) -> Vec<SubRange> {
    if seq != 0 || bootstrap_reserved == 0 {
        return vec![SubRange {
            in_block_offset,
            len,
        }];
    }

    const OBJECT_COUNT_LEN: u64 = 4;
    let skip_to = OBJECT_COUNT_LEN + bootstrap_reserved;
    let end = in_block_offset + len;

    if end <= OBJECT_COUNT_LEN {
        vec![SubRange {
            in_block_offset,
            len,
        }]
    } else if in_block_offset >= OBJECT_COUNT_LEN {
        vec![SubRange {
            in_block_offset: skip_to + (in_block_offset - OBJECT_COUNT_LEN),
            len,
        }]
    } else {
        let first_len = OBJECT_COUNT_LEN - in_block_offset;
        vec![
            SubRange {
                in_block_offset,
                len: first_len,
            },
            SubRange {
                in_block_offset: skip_to,
                len: len - first_len,
            },
        ]
    }
}

/// Resolves `logical_offset` to a `(sequence, in_block_offset)` pair.
fn resolve_start(block_size: u32, bootstrap_reserved: u64, logical_offset: u64) -> (u32, u64) {
    let cap0 = block_capacity(block_size, bootstrap_reserved, 0);
    if logical_offset < cap0 {
        return (0, logical_offset);
    }
    let remaining = logical_offset - cap0;
    let seq = 1 + (remaining / u64::from(block_size)) as u32;
    let in_block_offset = remaining % u64::from(block_size);
    (seq, in_block_offset)
}

/// Walks `desc`'s chain from the head, following `next`, until reaching
/// sequence `target_seq`. O(count); chains are expected to be short.
fn walk_to_sequence<F: RandomAccessFile>(
    file: &mut F,
    desc: &ObjectDescriptor,
    block_size: u32,
    target_seq: u32,
) -> Result<BlockHeader> {
    let mut current = crate::block::read_block_header(file, desc.head_block, block_size)?;
    for _ in 0..target_seq {
        current = crate::block::read_block_header(file, current.next, block_size)?;
    }
    Ok(current)
}

/// Validates that `[logical_offset, logical_offset + length)` lies within the
/// chain's current capacity.
fn check_bounds(
    block_size: u32,
    bootstrap_reserved: u64,
    desc: &ObjectDescriptor,
    logical_offset: u64,
    length: usize,
) -> Result<()> {
    let available = chain_capacity(block_size, bootstrap_reserved, desc.count);
    if logical_offset + length as u64 > available {
        return OutOfBoundsSnafu {
            position: logical_offset,
            length,
            available,
        }
        .fail();
    }
    Ok(())
}

/// Reads `buf.len()` bytes starting at `logical_offset` from `desc`'s chain.
#[instrument(level = "trace", skip(file, buf))]
pub fn read_chain<F: RandomAccessFile>(
    file: &mut F,
    desc: &ObjectDescriptor,
    block_size: u32,
    bootstrap_reserved: u64,
    logical_offset: u64,
    buf: &mut [u8],
) -> Result<()> {
    check_bounds(block_size, bootstrap_reserved, desc, logical_offset, buf.len())?;
    if buf.is_empty() {
        return Ok(());
    }

    let (mut seq, mut in_block_offset) = resolve_start(block_size, bootstrap_reserved, logical_offset);
    let mut header = walk_to_sequence(file, desc, block_size, seq)?;
    let mut filled = 0usize;

    while filled < buf.len() {
        let cap = block_capacity(block_size, bootstrap_reserved, seq);
        let take = std::cmp::min((buf.len() - filled) as u64, cap - in_block_offset);

        for range in split_ranges(bootstrap_reserved, seq, in_block_offset, take) {
            let phys = block_payload_offset(header.block_index, block_size) + range.in_block_offset;
            let chunk = file.read_at(phys, range.len as usize)?;
            buf[filled..filled + chunk.len()].copy_from_slice(&chunk);
            filled += chunk.len();
        }

        if filled < buf.len() {
            header = crate::block::read_block_header(file, header.next, block_size)?;
            seq += 1;
            in_block_offset = 0;
        }
    }

    Ok(())
}

/// Writes `data` starting at `logical_offset` into `desc`'s chain.
#[instrument(level = "trace", skip(file, data))]
pub fn write_chain<F: RandomAccessFile>(
    file: &mut F,
    desc: &ObjectDescriptor,
    block_size: u32,
    bootstrap_reserved: u64,
    logical_offset: u64,
    data: &[u8],
) -> Result<()> {
    check_bounds(block_size, bootstrap_reserved, desc, logical_offset, data.len())?;
    if data.is_empty() {
        return Ok(());
    }

    let (mut seq, mut in_block_offset) = resolve_start(block_size, bootstrap_reserved, logical_offset);
    let mut header = walk_to_sequence(file, desc, block_size, seq)?;
    let mut written = 0usize;

    while written < data.len() {
        let cap = block_capacity(block_size, bootstrap_reserved, seq);
        let take = std::cmp::min((data.len() - written) as u64, cap - in_block_offset);

        for range in split_ranges(bootstrap_reserved, seq, in_block_offset, take) {
            let phys = block_payload_offset(header.block_index, block_size) + range.in_block_offset;
            let slice = &data[written..written + range.len as usize];
            file.write_at(phys, slice)?;
            written += slice.len();
        }

        if written < data.len() {
            header = crate::block::read_block_header(file, header.next, block_size)?;
            seq += 1;
            in_block_offset = 0;
        }
    }

    Ok(())
}
