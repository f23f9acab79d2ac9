//! File-backed block provider using one memory-mapped file per block.

use std::{
    env,
    fs::{self, File, OpenOptions},
    io,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
};

use bytemuck::Pod;
use memmap2::MmapMut;
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

use crate::error::StorageError;

use super::BlockProvider;

/// Environment variable overriding the scratch directory.
pub const SCRATCH_DIR_ENV: &str = "STREAMTREE_SCRATCH_DIR";

/// Picks the directory that holds out-of-core block files.
///
/// An explicit directory wins, then [`SCRATCH_DIR_ENV`], then the platform
/// temporary directory.
#[must_use]
pub fn resolve_scratch_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    match env::var_os(SCRATCH_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => env::temp_dir(),
    }
}

/// Provider mapping each block onto its own scratch file.
///
/// A uniquely named guard file reserves the name prefix; block `n` lives in
/// `<guard>_block_NNNN` beside it. The guard is deleted when the provider is
/// dropped.
#[derive(Debug)]
pub struct MmapProvider {
    guard: NamedTempFile,
}

impl MmapProvider {
    /// Creates a provider in the resolved scratch directory.
    ///
    /// # Errors
    /// Returns [`StorageError::Filesystem`] when the directory or guard file
    /// cannot be created.
    pub fn new(scratch_dir: Option<&Path>) -> Result<Self, StorageError> {
        let dir = resolve_scratch_dir(scratch_dir);
        fs::create_dir_all(&dir).map_err(|source| filesystem("create directory", &dir, source))?;
        let guard = tempfile::Builder::new()
            .prefix("streamtree-")
            .suffix(".ooc")
            .tempfile_in(&dir)
            .map_err(|source| filesystem("create guard file in", &dir, source))?;
        debug!(guard = %guard.path().display(), "out-of-core scratch guard created");
        Ok(Self { guard })
    }

    /// Path of the guard file.
    #[must_use]
    pub fn guard_path(&self) -> &Path {
        self.guard.path()
    }

    /// Path of the backing file for block `index`.
    #[must_use]
    pub fn block_path(&self, index: usize) -> PathBuf {
        let mut name = self.guard.path().as_os_str().to_owned();
        name.push(format!("_block_{index:04}"));
        PathBuf::from(name)
    }
}

impl<T: Pod> BlockProvider<T> for MmapProvider {
    type Block = MmapBlock<T>;

    fn allocate(&mut self, index: usize, len: usize) -> Result<Self::Block, StorageError> {
        let path = self.block_path(index);
        let bytes = len
            .checked_mul(size_of::<T>())
            .ok_or(StorageError::CapacityOverflow { requested: len })?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| filesystem("create block file", &path, source))?;
        match map_block(&file, bytes) {
            Ok(map) => {
                debug!(block = index, path = %path.display(), bytes, "mapped block file");
                Ok(MmapBlock {
                    map,
                    path,
                    _element: PhantomData,
                })
            }
            Err(source) => {
                drop(file);
                if let Err(cleanup) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %cleanup, "failed to remove unmapped block file");
                }
                error!(path = %path.display(), error = %source, "failed to map block file");
                Err(filesystem("map block file", &path, source))
            }
        }
    }

    fn release(&mut self, index: usize, block: Self::Block) -> Result<(), StorageError> {
        let path = block.path.clone();
        let removed = fs::remove_file(&path);
        drop(block);
        match removed {
            Ok(()) => {
                debug!(block = index, path = %path.display(), "removed block file");
                Ok(())
            }
            Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(filesystem("remove block file", &path, source)),
        }
    }
}

fn map_block(file: &File, bytes: usize) -> io::Result<MmapMut> {
    let len = u64::try_from(bytes).map_err(io::Error::other)?;
    file.set_len(len)?;
    // SAFETY: the file was created exclusively by this provider, has just
    // been sized, and is only ever accessed through this mapping.
    unsafe { MmapMut::map_mut(file) }
}

fn filesystem(action: &'static str, path: &Path, source: io::Error) -> StorageError {
    StorageError::Filesystem {
        action,
        path: path.to_path_buf(),
        source,
    }
}

/// One mapped block file viewed as a slice of `T`.
///
/// Dropping the handle unmaps the file and removes it.
#[derive(Debug)]
pub struct MmapBlock<T> {
    map: MmapMut,
    path: PathBuf,
    _element: PhantomData<T>,
}

impl<T> MmapBlock<T> {
    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T: Pod> Deref for MmapBlock<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        bytemuck::cast_slice(&self.map[..])
    }
}

impl<T: Pod> DerefMut for MmapBlock<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        bytemuck::cast_slice_mut(&mut self.map[..])
    }
}

impl<T> Drop for MmapBlock<T> {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), error = %err, "failed to remove block file"),
        }
    }
}
