//! Error types for the streamtree core library.
//!
//! Every error raised by the crate is fatal to the computation it interrupts:
//! the streaming contract has no recovery path once a pointer, branch or
//! storage invariant is broken. Each enum exposes a stable machine-readable
//! code so callers can log or count failures without matching on messages.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

use crate::{
    graph::{GraphError, GraphErrorCode},
    order::GlobalId,
    segmentation::SegmentationError,
};

macro_rules! define_error_codes {
    (
        $(#[$enum_meta:meta])*
        enum $CodeTy:ident for $ErrTy:ident {
            $(
                $(#[$variant_meta:meta])*
                $CodeVariant:ident => $ErrVariant:ident $( { $($pattern:tt)* } )? => $code:expr
            ),+ $(,)?
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
        #[non_exhaustive]
        pub enum $CodeTy {
            $(
                $(#[$variant_meta])*
                $CodeVariant,
            )+
        }

        impl $CodeTy {
            /// Return the stable machine-readable representation of this error code.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$CodeVariant => $code,)+
                }
            }
        }

        impl ::std::fmt::Display for $CodeTy {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl $ErrTy {
            #[doc = concat!(
                "Retrieve the stable [`",
                stringify!($CodeTy),
                "`] for this error."
            )]
            #[must_use]
            pub const fn code(&self) -> $CodeTy {
                match self {
                    $(Self::$ErrVariant $( { $($pattern)* } )? => $CodeTy::$CodeVariant,)+
                }
            }
        }
    };
}

pub(crate) use define_error_codes;

/// An error produced by the block, out-of-core and extendable arrays.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested block size exponent is outside the supported range.
    #[error("block size exponent {bits} is outside 1..={max}")]
    InvalidBlockBits {
        /// The rejected exponent.
        bits: u32,
        /// The largest exponent accepted.
        max: u32,
    },
    /// Allocating a new block failed.
    #[error("failed to allocate a block of {bytes} bytes")]
    Allocation {
        /// Size of the block that could not be allocated.
        bytes: usize,
    },
    /// The requested length overflowed the addressable range.
    #[error("requested length {requested} exceeds the addressable range")]
    CapacityOverflow {
        /// The rejected length.
        requested: usize,
    },
    /// A filesystem operation on a backing file failed.
    #[error("failed to {action} `{path}`: {source}")]
    Filesystem {
        /// What the storage layer was attempting.
        action: &'static str,
        /// The file or directory involved.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// Streaming elements to or from a binary dump failed.
    #[error("binary {direction} failed: {source}")]
    Stream {
        /// Either `dump` or `read`.
        direction: &'static str,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// A binary dump ended in the middle of an element.
    #[error("binary input ends with {trailing} stray bytes (element size {element_size})")]
    TruncatedElement {
        /// Bytes left over after the last complete element.
        trailing: usize,
        /// Size in bytes of one element.
        element_size: usize,
    },
    /// The free list of an extendable array is corrupt.
    #[error("free list corrupt at slot {slot}: {detail}")]
    CorruptFreeList {
        /// Slot where the corruption was detected.
        slot: u32,
        /// Description of the broken link.
        detail: &'static str,
    },
}

define_error_codes! {
    /// Stable codes describing [`StorageError`] variants.
    enum StorageErrorCode for StorageError {
        /// The requested block size exponent is outside the supported range.
        InvalidBlockBits => InvalidBlockBits { .. } => "STORAGE_INVALID_BLOCK_BITS",
        /// Allocating a new block failed.
        Allocation => Allocation { .. } => "STORAGE_ALLOCATION",
        /// The requested length overflowed the addressable range.
        CapacityOverflow => CapacityOverflow { .. } => "STORAGE_CAPACITY_OVERFLOW",
        /// A filesystem operation on a backing file failed.
        Filesystem => Filesystem { .. } => "STORAGE_FILESYSTEM",
        /// Streaming elements to or from a binary dump failed.
        Stream => Stream { .. } => "STORAGE_STREAM",
        /// A binary dump ended in the middle of an element.
        TruncatedElement => TruncatedElement { .. } => "STORAGE_TRUNCATED_ELEMENT",
        /// The free list of an extendable array is corrupt.
        CorruptFreeList => CorruptFreeList { .. } => "STORAGE_CORRUPT_FREE_LIST",
    }
}

/// Names the structural invariant a [`TreeError::InvariantViolation`] refers
/// to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum TreeInvariant {
    /// A vertex was missing from the branch it claims to belong to.
    BranchMembership,
    /// A branch stopped being a contiguous stretch of a child chain.
    BranchContiguity,
    /// A parent list and a child pointer disagree.
    ParentChildSymmetry,
    /// A child pointer does not descend in height.
    ChainOrder,
    /// A slot referenced by a pointer is vacant.
    DanglingPointer,
    /// A vertex chosen for retirement does not have interior shape.
    RetirementShape,
}

impl fmt::Display for TreeInvariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::BranchMembership => "vertex must belong to its own branch",
            Self::BranchContiguity => "branch members must form a contiguous chain",
            Self::ParentChildSymmetry => "parent lists must mirror child pointers",
            Self::ChainOrder => "child pointers must descend in height",
            Self::DanglingPointer => "pointers must reference live slots",
            Self::RetirementShape => "retired vertices must have one parent and one child",
        };
        f.write_str(text)
    }
}

/// Error type produced while building or streaming into a union tree.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TreeError {
    /// The configured value filter is empty or not finite.
    #[error("value filter [{lower}, {upper}] is invalid")]
    InvalidBounds {
        /// Configured lower bound.
        lower: f64,
        /// Configured upper bound.
        upper: f64,
    },
    /// The builder was given settings that cannot be combined.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration was rejected.
        reason: &'static str,
    },
    /// A vertex value was not a finite number.
    #[error("vertex {id} has non-finite value {value}")]
    NonFiniteValue {
        /// The offending vertex.
        id: GlobalId,
        /// The rejected value.
        value: f64,
    },
    /// The same global id was added twice to a non-parallel tree.
    #[error("vertex {id} was added more than once")]
    DuplicateVertex {
        /// The duplicated vertex id.
        id: GlobalId,
    },
    /// An event referenced a vertex that is not resident in the tree.
    #[error("vertex {id} is not resident in the tree")]
    UnknownVertex {
        /// The missing vertex id.
        id: GlobalId,
    },
    /// An edge arrived for a vertex that had already been finalized.
    #[error("edge ({left}, {right}) arrived after vertex {finalized} was finalized")]
    EdgeAfterFinalization {
        /// First endpoint as provided.
        left: GlobalId,
        /// Second endpoint as provided.
        right: GlobalId,
        /// The endpoint that was already finalized.
        finalized: GlobalId,
    },
    /// A vertex was declared shared after it had already been finalized.
    #[error("vertex {id} was declared shared after it was finalized")]
    SharedAfterFinalization {
        /// The vertex that can no longer be held open.
        id: GlobalId,
    },
    /// An internal structural invariant was broken.
    #[error("tree invariant violated at vertex {id}: {invariant}")]
    InvariantViolation {
        /// Which invariant failed.
        invariant: TreeInvariant,
        /// The vertex at which the failure was detected.
        id: GlobalId,
    },
    /// The backing storage failed.
    #[error("storage failure: {source}")]
    Storage {
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },
    /// The output graph rejected an update.
    #[error("output graph rejected an update: {source}")]
    Graph {
        /// Underlying graph error.
        #[source]
        source: GraphError,
    },
    /// Segmentation bookkeeping failed.
    #[error("segmentation failure: {source}")]
    Segmentation {
        /// Underlying segmentation error.
        #[source]
        source: SegmentationError,
    },
}

define_error_codes! {
    /// Stable codes describing [`TreeError`] variants.
    enum TreeErrorCode for TreeError {
        /// The configured value filter is empty or not finite.
        InvalidBounds => InvalidBounds { .. } => "TREE_INVALID_BOUNDS",
        /// The builder was given settings that cannot be combined.
        InvalidConfiguration => InvalidConfiguration { .. } => "TREE_INVALID_CONFIGURATION",
        /// A vertex value was not a finite number.
        NonFiniteValue => NonFiniteValue { .. } => "TREE_NON_FINITE_VALUE",
        /// The same global id was added twice to a non-parallel tree.
        DuplicateVertex => DuplicateVertex { .. } => "TREE_DUPLICATE_VERTEX",
        /// An event referenced a vertex that is not resident in the tree.
        UnknownVertex => UnknownVertex { .. } => "TREE_UNKNOWN_VERTEX",
        /// An edge arrived for a vertex that had already been finalized.
        EdgeAfterFinalization => EdgeAfterFinalization { .. } => "TREE_EDGE_AFTER_FINALIZATION",
        /// A vertex was declared shared after it had already been finalized.
        SharedAfterFinalization => SharedAfterFinalization { .. } => "TREE_SHARED_AFTER_FINALIZATION",
        /// An internal structural invariant was broken.
        InvariantViolation => InvariantViolation { .. } => "TREE_INVARIANT_VIOLATION",
        /// The backing storage failed.
        StorageFailure => Storage { .. } => "TREE_STORAGE_FAILURE",
        /// The output graph rejected an update.
        GraphFailure => Graph { .. } => "TREE_GRAPH_FAILURE",
        /// Segmentation bookkeeping failed.
        SegmentationFailure => Segmentation { .. } => "TREE_SEGMENTATION_FAILURE",
    }
}

impl TreeError {
    /// Retrieve the inner [`StorageErrorCode`] when the error originated in
    /// the storage layer.
    #[must_use]
    pub const fn storage_code(&self) -> Option<StorageErrorCode> {
        match self {
            Self::Storage { source } => Some(source.code()),
            _ => None,
        }
    }

    /// Retrieve the inner [`GraphErrorCode`] when the output graph rejected
    /// an update.
    #[must_use]
    pub const fn graph_code(&self) -> Option<GraphErrorCode> {
        match self {
            Self::Graph { source } => Some(source.code()),
            _ => None,
        }
    }
}

impl From<StorageError> for TreeError {
    fn from(source: StorageError) -> Self {
        Self::Storage { source }
    }
}

impl From<GraphError> for TreeError {
    fn from(source: GraphError) -> Self {
        Self::Graph { source }
    }
}

impl From<SegmentationError> for TreeError {
    fn from(source: SegmentationError) -> Self {
        Self::Segmentation { source }
    }
}

/// Convenient alias for results returned by the streaming tree API.
pub type Result<T> = core::result::Result<T, TreeError>;
