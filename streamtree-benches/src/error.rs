//! Benchmark setup error type.
//!
//! Lets setup functions propagate failures with `?` instead of `.expect()`.

use streamtree_core::{ContourError, TreeError};

use crate::field::FieldError;

/// Errors that may occur during benchmark setup.
#[derive(Debug, thiserror::Error)]
pub enum BenchSetupError {
    /// Synthetic field generation failed.
    #[error("synthetic field generation failed: {0}")]
    Field(#[from] FieldError),
    /// Building or streaming into a tree failed.
    #[error("tree operation failed: {0}")]
    Tree(#[from] TreeError),
    /// Contour merging failed.
    #[error("contour merge failed: {0}")]
    Contour(#[from] ContourError),
    /// Creating a scratch directory for out-of-core storage failed.
    #[error("scratch directory unavailable: {0}")]
    Scratch(#[from] std::io::Error),
}
