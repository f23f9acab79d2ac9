//! Block-allocated storage substrate.
//!
//! Every container in this module grows and shrinks by whole fixed-size
//! blocks and never relocates a block once it is allocated, so references to
//! elements stay valid across growth. Element `i` lives in block
//! `i >> block_bits` at offset `i & block_mask`.
//!
//! - [`BlockArray`] keeps its blocks on the heap.
//! - [`OocArray`] maps one scratch file per block through a
//!   [`BlockProvider`].
//! - [`ExtendableArray`] layers a global-id map and a free list on top of a
//!   [`BlockArray`] so retired slots are reused.

mod binary;
mod block_array;
mod extendable;
mod ooc;

use crate::error::StorageError;

pub use self::{
    binary::{dump_binary, read_binary},
    block_array::BlockArray,
    extendable::{ExtendableArray, FREE_END, Slot},
    ooc::{
        BlockProvider, HeapProvider, MmapBlock, MmapProvider, OocArray, SCRATCH_DIR_ENV,
        resolve_scratch_dir,
    },
};

/// Smallest accepted block size exponent.
pub const MIN_BLOCK_BITS: u32 = 1;
/// Largest accepted block size exponent.
pub const MAX_BLOCK_BITS: u32 = 30;
/// Block size exponent used when callers do not choose one.
pub const DEFAULT_BLOCK_BITS: u32 = 12;

/// Index arithmetic for power-of-two blocks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockGeometry {
    bits: u32,
}

impl BlockGeometry {
    /// Validates `bits` and builds the geometry for blocks of `1 << bits`
    /// elements.
    ///
    /// # Errors
    /// Returns [`StorageError::InvalidBlockBits`] when `bits` lies outside
    /// [`MIN_BLOCK_BITS`]`..=`[`MAX_BLOCK_BITS`].
    pub const fn new(bits: u32) -> Result<Self, StorageError> {
        if bits < MIN_BLOCK_BITS || bits > MAX_BLOCK_BITS {
            return Err(StorageError::InvalidBlockBits {
                bits,
                max: MAX_BLOCK_BITS,
            });
        }
        Ok(Self { bits })
    }

    /// Returns the block size exponent.
    #[must_use]
    #[rustfmt::skip]
    pub const fn bits(&self) -> u32 { self.bits }

    /// Returns the number of elements in one block.
    #[must_use]
    pub const fn block_size(&self) -> usize {
        1 << self.bits
    }

    /// Returns the mask selecting the offset within a block.
    #[must_use]
    pub const fn mask(&self) -> usize {
        self.block_size() - 1
    }

    /// Splits an element index into `(block, offset)`.
    #[must_use]
    pub const fn locate(&self, index: usize) -> (usize, usize) {
        (index >> self.bits, index & self.mask())
    }

    /// Returns how many blocks are needed to hold `len` elements.
    #[must_use]
    pub const fn blocks_for(&self, len: usize) -> usize {
        len.div_ceil(self.block_size())
    }
}

/// Common accessor surface shared by the block-allocated arrays.
///
/// Implementations guarantee that `resize` only allocates or frees whole
/// blocks at the tail and never moves an existing block.
pub trait BlockStore<T> {
    /// Number of logical elements.
    fn len(&self) -> usize;

    /// Returns `true` when the array holds no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block geometry used by the array.
    fn geometry(&self) -> BlockGeometry;

    /// Number of allocated blocks.
    fn block_count(&self) -> usize;

    /// Number of elements the allocated blocks can hold.
    fn capacity(&self) -> usize {
        self.block_count() << self.geometry().bits()
    }

    /// Grows or shrinks the array to `len` elements.
    ///
    /// Newly exposed elements hold the element type's empty value.
    ///
    /// # Errors
    /// Returns a [`StorageError`] when a block cannot be allocated or
    /// released.
    fn resize(&mut self, len: usize) -> Result<(), StorageError>;

    /// Returns the element at `index`, if it is within bounds.
    fn get(&self, index: usize) -> Option<&T>;

    /// Returns the element at `index` mutably, if it is within bounds.
    fn get_mut(&mut self, index: usize) -> Option<&mut T>;

    /// Returns the full contents of block `index`, including unused tail
    /// slots.
    fn block(&self, index: usize) -> Option<&[T]>;

    /// Returns block `index` mutably.
    fn block_mut(&mut self, index: usize) -> Option<&mut [T]>;

    /// Appends `value`, growing by one block when the tail block is full.
    ///
    /// # Errors
    /// Returns a [`StorageError`] when a new block cannot be allocated.
    fn push(&mut self, value: T) -> Result<usize, StorageError> {
        let index = self.len();
        let requested = index
            .checked_add(1)
            .ok_or(StorageError::CapacityOverflow { requested: index })?;
        self.resize(requested)?;
        let slot = self
            .get_mut(index)
            .ok_or(StorageError::CapacityOverflow { requested })?;
        *slot = value;
        Ok(index)
    }
}

#[cfg(test)]
mod tests;
