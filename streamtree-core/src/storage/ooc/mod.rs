//! Out-of-core block array.
//!
//! Same contract as [`BlockArray`](super::BlockArray), but each block is
//! obtained from a [`BlockProvider`]. The default provider maps one scratch
//! file per block so the array can exceed available memory.

mod mmap;
mod provider;

use std::{fmt, path::Path};

use bytemuck::Pod;
use tracing::warn;

use crate::error::StorageError;

use super::{BlockGeometry, BlockStore};

pub use self::{
    mmap::{MmapBlock, MmapProvider, SCRATCH_DIR_ENV, resolve_scratch_dir},
    provider::{BlockProvider, HeapProvider},
};

/// Block array whose blocks come from a [`BlockProvider`].
///
/// Only construction and [`resize`](BlockStore::resize) touch the provider.
/// Dropping the array releases every outstanding block.
///
/// # Examples
/// ```
/// use streamtree_core::storage::{BlockStore, HeapProvider, OocArray};
///
/// let mut array = OocArray::<u64, _>::with_provider(2, HeapProvider::new())?;
/// array.resize(9)?;
/// assert_eq!(array.block_count(), 3);
/// assert_eq!(array.provider().live_blocks(), 3);
/// array.resize(3)?;
/// assert_eq!(array.provider().live_blocks(), 1);
/// # Ok::<(), streamtree_core::StorageError>(())
/// ```
pub struct OocArray<T: Pod, P: BlockProvider<T> = MmapProvider> {
    blocks: Vec<P::Block>,
    len: usize,
    geometry: BlockGeometry,
    provider: P,
}

impl<T: Pod> OocArray<T, MmapProvider> {
    /// Creates an empty file-backed array in the resolved scratch directory.
    ///
    /// # Errors
    /// Returns [`StorageError::InvalidBlockBits`] for unsupported exponents
    /// and [`StorageError::Filesystem`] when the guard file cannot be
    /// created.
    pub fn new(block_bits: u32, scratch_dir: Option<&Path>) -> Result<Self, StorageError> {
        Self::with_provider(block_bits, MmapProvider::new(scratch_dir)?)
    }
}

impl<T: Pod, P: BlockProvider<T>> OocArray<T, P> {
    /// Creates an empty array drawing blocks from `provider`.
    ///
    /// # Errors
    /// Returns [`StorageError::InvalidBlockBits`] for unsupported exponents.
    pub fn with_provider(block_bits: u32, provider: P) -> Result<Self, StorageError> {
        debug_assert!(size_of::<T>() > 0, "zero-sized elements cannot be mapped");
        Ok(Self {
            blocks: Vec::new(),
            len: 0,
            geometry: BlockGeometry::new(block_bits)?,
            provider,
        })
    }

    /// Returns the block provider.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Iterates over the logical elements in index order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.blocks
            .iter()
            .flat_map(|block| block.iter())
            .take(self.len)
    }

    fn release_tail(&mut self, keep: usize) -> Result<(), StorageError> {
        while self.blocks.len() > keep {
            let index = self.blocks.len() - 1;
            let Some(block) = self.blocks.pop() else {
                break;
            };
            self.provider.release(index, block)?;
        }
        Ok(())
    }
}

impl<T: Pod, P: BlockProvider<T>> BlockStore<T> for OocArray<T, P> {
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
                let index = self.blocks.len();
                let block = self
                    .provider
                    .allocate(index, self.geometry.block_size())?;
                self.blocks.push(block);
            }
        } else {
            self.release_tail(needed)?;
        }

        self.len = len;
        if len > old_len {
            for index in old_len..len.min(old_capacity) {
                if let Some(slot) = self.get_mut(index) {
                    *slot = T::zeroed();
                }
            }
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
        self.blocks.get(index).map(|block| &**block)
    }

    fn block_mut(&mut self, index: usize) -> Option<&mut [T]> {
        self.blocks.get_mut(index).map(|block| &mut **block)
    }
}

impl<T: Pod, P: BlockProvider<T>> fmt::Debug for OocArray<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OocArray")
            .field("len", &self.len)
            .field("blocks", &self.blocks.len())
            .field("geometry", &self.geometry)
            .finish_non_exhaustive()
    }
}

impl<T: Pod, P: BlockProvider<T>> Drop for OocArray<T, P> {
    fn drop(&mut self) {
        if let Err(err) = self.release_tail(0) {
            warn!(error = %err, "failed to release out-of-core blocks on drop");
        }
    }
}
