//! The chain layer (spec §4.3): grows and shrinks the doubly-linked block
//! chain backing an object (or a meta-object), trading blocks with the trash
//! chain and falling back to fresh block allocation when the trash is empty.

use tracing::debug;

use crate::block::{append_new_block, fresh_block_header, read_block_header, write_block_header};
use crate::error::Result;
use crate::file_io::RandomAccessFile;
use crate::layout::{BlockHeader, FileHeader, ObjectDescriptor, NO_BLOCK, TRASH_TABLE_ID};

/// Extends `desc`'s chain by `k` blocks, consuming them from the head of
/// `trash` first and falling back to freshly appended blocks once the trash
/// is exhausted. Mutates `desc`, `trash`, and `file_header.block_count` in
/// place; persisting the updated descriptors to their on-disk homes is the
/// caller's responsibility (spec §4.3/§4.5).
pub fn grow<F: RandomAccessFile>(
    file: &mut F,
    file_header: &mut FileHeader,
    desc: &mut ObjectDescriptor,
    trash: &mut ObjectDescriptor,
    k: u32,
) -> Result<()> {
    for _ in 0..k {
        let next_seq = if desc.count == 0 {
            0
        } else {
            read_block_header(file, desc.tail_block, file_header.block_size)?.sequence + 1
        };
        let prev = if desc.count == 0 {
            NO_BLOCK
        } else {
            desc.tail_block
        };

        let block_index = if trash.count > 0 {
            pop_from_trash(file, file_header.block_size, trash)?
        } else {
            let template = fresh_block_header(desc.id, next_seq, prev);
            append_new_block(file, file_header, template)?
        };

        // Re-stamp the block (whether it came from the trash or was freshly
        // appended) with this chain's identity and linkage.
        let header = BlockHeader {
            id: desc.id,
            block_index,
            sequence: next_seq,
            prev,
            next: NO_BLOCK,
        };
        write_block_header(file, block_index, file_header.block_size, &header)?;

        if prev != NO_BLOCK {
            let mut prev_header = read_block_header(file, prev, file_header.block_size)?;
            prev_header.next = block_index;
            write_block_header(file, prev, file_header.block_size, &prev_header)?;
        } else {
            desc.head_block = block_index;
        }

        desc.tail_block = block_index;
        desc.count += 1;
    }

    debug!(id = desc.id, added = k, count = desc.count, "grew chain");
    Ok(())
}

/// Pops the head of the trash chain, updating `trash` in place, and returns
/// its physical block index.
fn pop_from_trash<F: RandomAccessFile>(
    file: &mut F,
    block_size: u32,
    trash: &mut ObjectDescriptor,
) -> Result<u32> {
    let block_index = trash.head_block;
    let header = read_block_header(file, block_index, block_size)?;
    let new_head = header.next;

    if new_head != NO_BLOCK {
        let mut new_head_header = read_block_header(file, new_head, block_size)?;
        new_head_header.prev = NO_BLOCK;
        write_block_header(file, new_head, block_size, &new_head_header)?;
    }

    trash.head_block = new_head;
    trash.count -= 1;
    if trash.count == 0 {
        trash.tail_block = NO_BLOCK;
    }

    Ok(block_index)
}

/// Removes the last `k` blocks from `desc`'s chain and prepends them to
/// `trash`, re-stamped with the reserved trash owner id. Mutates `desc` and
/// `trash` in place; persistence is the caller's responsibility.
pub fn shrink<F: RandomAccessFile>(
    file: &mut F,
    block_size: u32,
    desc: &mut ObjectDescriptor,
    trash: &mut ObjectDescriptor,
    k: u32,
) -> Result<()> {
    for _ in 0..k {
        if desc.count == 0 {
            break;
        }

        let tail = desc.tail_block;
        let tail_header = read_block_header(file, tail, block_size)?;
        let new_tail = tail_header.prev;

        if new_tail != NO_BLOCK {
            let mut new_tail_header = read_block_header(file, new_tail, block_size)?;
            new_tail_header.next = NO_BLOCK;
            write_block_header(file, new_tail, block_size, &new_tail_header)?;
            desc.tail_block = new_tail;
        } else {
            desc.head_block = NO_BLOCK;
            desc.tail_block = NO_BLOCK;
        }
        desc.count -= 1;

        let old_trash_head = trash.head_block;
        let trashed_header = BlockHeader {
            id: TRASH_TABLE_ID,
            block_index: tail,
            sequence: 0,
            prev: NO_BLOCK,
            next: old_trash_head,
        };
        write_block_header(file, tail, block_size, &trashed_header)?;

        if old_trash_head != NO_BLOCK {
            let mut old_head_header = read_block_header(file, old_trash_head, block_size)?;
            old_head_header.prev = tail;
            write_block_header(file, old_trash_head, block_size, &old_head_header)?;
        } else {
            trash.tail_block = tail;
        }
        trash.head_block = tail;
        trash.count += 1;
    }

    debug!(id = desc.id, removed = k, count = desc.count, "shrank chain");
    Ok(())
}

/// Required block count to hold `logical_bytes` of payload.
pub fn blocks_needed(block_size: u32, logical_bytes: u64) -> u32 {
    if logical_bytes == 0 {
        return 0;
    }
    let block_size = u64::from(block_size);
    ((logical_bytes + block_size - 1) / block_size) as u32
}

/// Grows or shrinks `desc`'s chain so that it holds exactly the block count
/// required for `logical_bytes` bytes of payload.
pub fn set_length<F: RandomAccessFile>(
    file: &mut F,
    file_header: &mut FileHeader,
    desc: &mut ObjectDescriptor,
    trash: &mut ObjectDescriptor,
    logical_bytes: u64,
) -> Result<()> {
    let required = blocks_needed(file_header.block_size, logical_bytes);
    if required > desc.count {
        grow(file, file_header, desc, trash, required - desc.count)
    } else if required < desc.count {
        shrink(file, file_header.block_size, desc, trash, desc.count - required)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::write_file_header;
    use crate::file_io::StdFile;
    use crate::layout::OBJECT_TABLE_ID;
    use tempfile::NamedTempFile;

    fn new_file() -> (StdFile, FileHeader) {
        let tmp = NamedTempFile::new().unwrap();
        let mut file = StdFile::create(tmp.path()).unwrap();
        // Leak the tempfile path by leaving `tmp` alive via std::mem::forget so
        // the backing file survives for the duration of the test.
        std::mem::forget(tmp);
        let header = FileHeader::new(128, 0);
        write_file_header(&mut file, &header).unwrap();
        (file, header)
    }

    #[test]
    fn grow_allocates_fresh_blocks_when_trash_empty() {
        let (mut file, mut fh) = new_file();
        let mut desc = ObjectDescriptor::empty(1);
        let mut trash = ObjectDescriptor::empty(OBJECT_TABLE_ID);

        grow(&mut file, &mut fh, &mut desc, &mut trash, 3).unwrap();
        assert_eq!(desc.count, 3);
        assert_eq!(fh.block_count, 3);

        let head = read_block_header(&mut file, desc.head_block, fh.block_size).unwrap();
        assert_eq!(head.sequence, 0);
        assert_eq!(head.prev, NO_BLOCK);

        let tail = read_block_header(&mut file, desc.tail_block, fh.block_size).unwrap();
        assert_eq!(tail.sequence, 2);
        assert_eq!(tail.next, NO_BLOCK);
    }

    #[test]
    fn shrink_moves_blocks_to_trash_and_grow_reuses_them() {
        let (mut file, mut fh) = new_file();
        let mut desc = ObjectDescriptor::empty(1);
        let mut trash = ObjectDescriptor::empty(OBJECT_TABLE_ID);

        grow(&mut file, &mut fh, &mut desc, &mut trash, 5).unwrap();
        shrink(&mut file, fh.block_size, &mut desc, &mut trash, 4).unwrap();
        assert_eq!(desc.count, 1);
        assert_eq!(trash.count, 4);

        let blocks_before = fh.block_count;
        let mut desc2 = ObjectDescriptor::empty(2);
        grow(&mut file, &mut fh, &mut desc2, &mut trash, 4).unwrap();
        assert_eq!(desc2.count, 4);
        assert_eq!(trash.count, 0);
        // No new blocks should have been appended to the file; all 4 came
        // from the trash.
        assert_eq!(fh.block_count, blocks_before);
    }

    #[test]
    fn shrink_to_zero_clears_head_and_tail() {
        let (mut file, mut fh) = new_file();
        let mut desc = ObjectDescriptor::empty(1);
        let mut trash = ObjectDescriptor::empty(OBJECT_TABLE_ID);

        grow(&mut file, &mut fh, &mut desc, &mut trash, 2).unwrap();
        shrink(&mut file, fh.block_size, &mut desc, &mut trash, 2).unwrap();
        assert_eq!(desc.count, 0);
        assert_eq!(desc.head_block, NO_BLOCK);
        assert_eq!(desc.tail_block, NO_BLOCK);
    }

    #[test]
    fn blocks_needed_rounds_up() {
        assert_eq!(blocks_needed(100, 0), 0);
        assert_eq!(blocks_needed(100, 1), 1);
        assert_eq!(blocks_needed(100, 100), 1);
        assert_eq!(blocks_needed(100, 101), 2);
    }
}
