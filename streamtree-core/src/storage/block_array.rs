//! Heap-backed block array.

use tracing::debug;

use crate::error::StorageError;

use super::{BlockGeometry, BlockStore};

/// Growable array allocated in fixed-size heap blocks.
///
/// Growing never moves existing blocks, so a reference obtained before a
/// resize points at the same element afterwards (as long as the element is
/// still within bounds).
///
/// # Examples
/// ```
/// use streamtree_core::storage::{BlockArray, BlockStore};
///
/// let mut array = BlockArray::<u32>::new(2)?;
/// for value in 0..10 {
///     array.push(value)?;
/// }
/// assert_eq!(array.len(), 10);
/// assert_eq!(array.block_count(), 3);
/// assert_eq!(array.get(7), Some(&7));
/// # Ok::<(), streamtree_core::StorageError>(())
/// ```
#[derive(Debug)]
pub struct BlockArray<T> {
    blocks: Vec<Box<[T]>>,
    len: usize,
    geometry: BlockGeometry,
}

impl<T: Default> BlockArray<T> {
    /// Creates an empty array whose blocks hold `1 << block_bits` elements.
    ///
    /// # Errors
    /// Returns [`StorageError::InvalidBlockBits`] for unsupported exponents.
    pub fn new(block_bits: u32) -> Result<Self, StorageError> {
        Ok(Self {
            blocks: Vec::new(),
            len: 0,
            geometry: BlockGeometry::new(block_bits)?,
        })
    }

    /// Iterates over the logical elements in index order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.blocks
            .iter()
            .flat_map(|block| block.iter())
            .take(self.len)
    }

    fn allocate_block(&self) -> Result<Box<[T]>, StorageError> {
        let size = self.geometry.block_size();
        let mut block = Vec::new();
        block
            .try_reserve_exact(size)
            .map_err(|_| StorageError::Allocation {
                bytes: size.saturating_mul(size_of::<T>()),
            })?;
        block.resize_with(size, T::default);
        Ok(block.into_boxed_slice())
    }

    fn reset_range(&mut self, start: usize, end: usize) {
        for index in start..end {
            if let Some(slot) = self.get_mut(index) {
                *slot = T::default();
            }
        }
    }
}

impl<T: Default> BlockStore<T> for BlockArray<T> {
    #[rustfmt::skip]
    fn len(&self) -> usize { self.len }

    #[rustfmt::skip]
    fn geometry(&self) -> BlockGeometry { self.geometry }

    #[rustfmt::skip]
    fn block_count(&self) -> usize { self.blocks.len() }

    fn resize(&mut self, len: usize) -> Result<(), StorageError> {
        let needed = self.geometry.blocks_for(len);
        let old_len = self.len;
        let old_capacity = self.capacity();

        if needed > self.blocks.len() {
            self.blocks
                .try_reserve(needed - self.blocks.len())
                .map_err(|_| StorageError::CapacityOverflow { requested: len })?;
            while self.blocks.len() < needed {
                let block = self.allocate_block()?;
                self.blocks.push(block);
            }
            debug!(blocks = needed, len, "block array grew");
        } else if needed < self.blocks.len() {
            self.blocks.truncate(needed);
            debug!(blocks = needed, len, "block array released tail blocks");
        }

        self.len = len;
        if len > old_len {
            // Fresh blocks are already default; only recycled tail slots of
            // blocks that survived the last shrink can hold stale values.
            self.reset_range(old_len, len.min(old_capacity));
        }
        Ok(())
    }

    fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        let (block, offset) = self.geometry.locate(index);
        self.blocks.get(block)?.get(offset)
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.len {
            return None;
        }
        let (block, offset) = self.geometry.locate(index);
        self.blocks.get_mut(block)?.get_mut(offset)
    }

    fn block(&self, index: usize) -> Option<&[T]> {
        self.blocks.get(index).map(|block| &block[..])
    }

    fn block_mut(&mut self, index: usize) -> Option<&mut [T]> {
        self.blocks.get_mut(index).map(|block| &mut block[..])
    }
}
