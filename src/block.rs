//! The block layer (spec §4.2): computes the physical location of blocks in
//! the file and provides read/write/append primitives for block headers.

use tracing::{debug, instrument};

use crate::error::Result;
use crate::file_io::RandomAccessFile;
use crate::layout::{BlockHeader, FileHeader, BLOCK_HEADER_LEN, FILE_HEADER_LEN, NO_BLOCK};

/// Absolute file offset of block `n`'s header.
pub fn block_header_offset(n: u32, block_size: u32) -> u64 {
    FILE_HEADER_LEN + u64::from(n) * (BLOCK_HEADER_LEN + u64::from(block_size))
}

/// Absolute file offset of block `n`'s payload (immediately after its header).
pub fn block_payload_offset(n: u32, block_size: u32) -> u64 {
    block_header_offset(n, block_size) + BLOCK_HEADER_LEN
}

/// Reads and validates the header of block `n`.
pub fn read_block_header<F: RandomAccessFile>(
    file: &mut F,
    n: u32,
    block_size: u32,
) -> Result<BlockHeader> {
    let bytes = file.read_at(block_header_offset(n, block_size), BLOCK_HEADER_LEN as usize)?;
    BlockHeader::decode(&bytes)
}

/// Overwrites the header of block `n`.
pub fn write_block_header<F: RandomAccessFile>(
    file: &mut F,
    n: u32,
    block_size: u32,
    header: &BlockHeader,
) -> Result<()> {
    file.write_at(block_header_offset(n, block_size), &header.encode())
}

pub fn write_file_header<F: RandomAccessFile>(file: &mut F, header: &FileHeader) -> Result<()> {
    file.write_at(0, &header.encode())
}

pub fn read_file_header<F: RandomAccessFile>(file: &mut F) -> Result<FileHeader> {
    let bytes = file.read_at(0, FILE_HEADER_LEN as usize)?;
    FileHeader::decode(&bytes)
}

/// Extends the file by one block's worth of bytes (header + zeroed payload),
/// stamps the header with `id`/`sequence`/`prev`/`next` from `header_template`
/// (its `block_index` is overwritten with the newly assigned index), and
/// persists the incremented `file_header.block_count`.
///
/// Returns the physical index of the new block.
#[instrument(level = "debug", skip(file, file_header))]
pub fn append_new_block<F: RandomAccessFile>(
    file: &mut F,
    file_header: &mut FileHeader,
    mut header_template: BlockHeader,
) -> Result<u32> {
    let new_index = file_header.block_count;
    header_template.block_index = new_index;

    file.append_zeros(BLOCK_HEADER_LEN + u64::from(file_header.block_size))?;
    write_block_header(file, new_index, file_header.block_size, &header_template)?;

    file_header.block_count += 1;
    write_file_header(file, file_header)?;

    debug!(block = new_index, "appended new block");
    Ok(new_index)
}

/// Convenience constructor for a freshly allocated block's header.
pub fn fresh_block_header(id: u32, sequence: u32, prev: u32) -> BlockHeader {
    BlockHeader {
        id,
        block_index: 0, // filled in by append_new_block
        sequence,
        prev,
        next: NO_BLOCK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_io::StdFile;
    use tempfile::NamedTempFile;

    #[test]
    fn append_new_block_increments_count_and_persists_header() {
        let tmp = NamedTempFile::new().unwrap();
        let mut file = StdFile::create(tmp.path()).unwrap();
        let mut fh = FileHeader::new(64, 0);
        write_file_header(&mut file, &fh).unwrap();

        let tmpl = fresh_block_header(42, 0, NO_BLOCK);
        let idx = append_new_block(&mut file, &mut fh, tmpl).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(fh.block_count, 1);

        let got = read_block_header(&mut file, 0, 64).unwrap();
        assert_eq!(got.id, 42);
        assert_eq!(got.block_index, 0);
        assert_eq!(got.prev, NO_BLOCK);
        assert_eq!(got.next, NO_BLOCK);

        let refetched = read_file_header(&mut file).unwrap();
        assert_eq!(refetched.block_count, 1);
    }

    #[test]
    fn second_block_offset_follows_first() {
        assert_eq!(block_header_offset(0, 100), FILE_HEADER_LEN);
        assert_eq!(
            block_header_offset(1, 100),
            FILE_HEADER_LEN + BLOCK_HEADER_LEN + 100
        );
    }
}
