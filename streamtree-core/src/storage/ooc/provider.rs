//! Block providers for the out-of-core array.

use std::ops::DerefMut;

use bytemuck::Pod;

use crate::error::StorageError;

/// Creates and destroys the backing storage of individual blocks.
///
/// [`OocArray`](super::OocArray) calls [`allocate`](Self::allocate) once per
/// new tail block and [`release`](Self::release) once per freed tail block,
/// always in stack order, so providers can name their resources by block
/// index.
pub trait BlockProvider<T: Pod> {
    /// Handle to one live block. Dropping it must not leak the mapping.
    type Block: DerefMut<Target = [T]>;

    /// Creates block `index` holding `len` zeroed elements.
    ///
    /// # Errors
    /// Returns a [`StorageError`] when the block cannot be created.
    fn allocate(&mut self, index: usize, len: usize) -> Result<Self::Block, StorageError>;

    /// Destroys block `index`, consuming its handle.
    ///
    /// # Errors
    /// Returns a [`StorageError`] when the backing resource cannot be
    /// removed.
    fn release(&mut self, index: usize, block: Self::Block) -> Result<(), StorageError>;
}

/// In-memory provider used where files are unwanted, mainly in tests.
///
/// It counts live blocks so callers can observe the allocate/release
/// protocol without touching the filesystem.
#[derive(Debug, Default)]
pub struct HeapProvider {
    live: usize,
    allocated: usize,
    released: usize,
}

impl HeapProvider {
    /// Creates a provider with no live blocks.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            live: 0,
            allocated: 0,
            released: 0,
        }
    }

    /// Number of blocks currently allocated.
    #[must_use]
    #[rustfmt::skip]
    pub const fn live_blocks(&self) -> usize { self.live }

    /// Total number of blocks ever allocated.
    #[must_use]
    #[rustfmt::skip]
    pub const fn allocated(&self) -> usize { self.allocated }

    /// Total number of blocks ever released.
    #[must_use]
    #[rustfmt::skip]
    pub const fn released(&self) -> usize { self.released }
}

impl<T: Pod> BlockProvider<T> for HeapProvider {
    type Block = Box<[T]>;

    fn allocate(&mut self, _index: usize, len: usize) -> Result<Self::Block, StorageError> {
        let mut block = Vec::new();
        block
            .try_reserve_exact(len)
            .map_err(|_| StorageError::Allocation {
                bytes: len.saturating_mul(size_of::<T>()),
            })?;
        block.resize(len, T::zeroed());
        self.live += 1;
        self.allocated += 1;
        Ok(block.into_boxed_slice())
    }

    fn release(&mut self, _index: usize, block: Self::Block) -> Result<(), StorageError> {
        drop(block);
        self.live = self.live.saturating_sub(1);
        self.released += 1;
        Ok(())
    }
}
