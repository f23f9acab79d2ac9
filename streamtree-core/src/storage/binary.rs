//! Flat binary dumps of block-allocated arrays.
//!
//! The format is the logical element sequence in native byte order with no
//! header, so a dump taken with one block size can be read back into an array
//! using any other block size.

use std::io::{self, Read, Write};

use bytemuck::Pod;

use crate::error::StorageError;

use super::BlockStore;

/// Writes the first `store.len()` elements of `store` to `writer`.
///
/// # Errors
/// Returns [`StorageError::Stream`] when the writer fails.
///
/// # Examples
/// ```
/// use streamtree_core::storage::{BlockArray, BlockStore, dump_binary, read_binary};
///
/// let mut source = BlockArray::<u32>::new(2)?;
/// for value in [3, 1, 4, 1, 5] {
///     source.push(value)?;
/// }
/// let mut bytes = Vec::new();
/// dump_binary(&source, &mut bytes)?;
///
/// let mut copy = BlockArray::<u32>::new(3)?;
/// read_binary(&mut copy, bytes.as_slice())?;
/// assert_eq!(copy.iter().copied().collect::<Vec<_>>(), vec![3, 1, 4, 1, 5]);
/// # Ok::<(), streamtree_core::StorageError>(())
/// ```
pub fn dump_binary<T, S, W>(store: &S, mut writer: W) -> Result<(), StorageError>
where
    T: Pod,
    S: BlockStore<T> + ?Sized,
    W: Write,
{
    let block_size = store.geometry().block_size();
    let mut remaining = store.len();
    for index in 0..store.block_count() {
        if remaining == 0 {
            break;
        }
        let used = remaining.min(block_size);
        let block = store
            .block(index)
            .ok_or(StorageError::CapacityOverflow {
                requested: store.len(),
            })?;
        writer
            .write_all(bytemuck::cast_slice(&block[..used]))
            .map_err(|source| StorageError::Stream {
                direction: "dump",
                source,
            })?;
        remaining -= used;
    }
    writer.flush().map_err(|source| StorageError::Stream {
        direction: "dump",
        source,
    })
}

/// Replaces the contents of `store` with the elements read from `reader`.
///
/// The reader is consumed until end of input; the array ends up holding
/// exactly the elements that were read.
///
/// # Errors
/// Returns [`StorageError::Stream`] on read failure and
/// [`StorageError::TruncatedElement`] when the input length is not a multiple
/// of the element size.
pub fn read_binary<T, S, R>(store: &mut S, mut reader: R) -> Result<(), StorageError>
where
    T: Pod,
    S: BlockStore<T> + ?Sized,
    R: Read,
{
    let element_size = size_of::<T>();
    let block_size = store.geometry().block_size();
    store.resize(0)?;

    loop {
        let start = store.len();
        let grown = start
            .checked_add(block_size)
            .ok_or(StorageError::CapacityOverflow { requested: start })?;
        store.resize(grown)?;
        let (block_index, _) = store.geometry().locate(start);
        let block = store
            .block_mut(block_index)
            .ok_or(StorageError::CapacityOverflow { requested: grown })?;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(block);
        let filled = fill(&mut reader, bytes).map_err(|source| StorageError::Stream {
            direction: "read",
            source,
        })?;

        let complete = filled / element_size;
        let trailing = filled % element_size;
        store.resize(start + complete)?;
        if trailing != 0 {
            return Err(StorageError::TruncatedElement {
                trailing,
                element_size,
            });
        }
        if filled < bytes_len(block_size, element_size) {
            return Ok(());
        }
    }
}

const fn bytes_len(block_size: usize, element_size: usize) -> usize {
    block_size.saturating_mul(element_size)
}

fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
