//! Streaming merge, split and contour trees.
//!
//! A [`UnionTree`] consumes a mesh as a stream of vertex, edge and
//! finalization events and keeps only the active front in memory: a vertex
//! is dropped the moment it is finalized and proves to be topologically
//! regular. Critical vertices become nodes of an [`OutputGraph`]. Pairing a
//! merge tree with a split tree of the same stream through a
//! [`ContourTreeMerger`] yields the contour tree.
//!
//! # Metrics
//!
//! Every tree counts its work in a [`TreeMetrics`]. With the `metrics`
//! feature enabled the same events are forwarded to the `metrics` facade as
//! `streamtree_*` counters.
//!
//! [`OutputGraph`]: graph::OutputGraph
#![cfg_attr(docsrs, feature(doc_cfg))]

mod builder;
pub mod contour;
mod error;
pub mod graph;
mod memory;
mod metrics;
mod order;
pub mod segmentation;
pub mod storage;
mod tree;

#[cfg(test)]
mod test_utils;

pub use crate::{
    builder::UnionTreeBuilder,
    contour::{ContourError, ContourErrorCode, ContourStats, ContourTreeMerger},
    error::{
        Result, StorageError, StorageErrorCode, TreeError, TreeErrorCode, TreeInvariant,
    },
    memory::{estimate_front_bytes, format_bytes},
    metrics::TreeMetrics,
    order::{FunctionValue, GNULL, GlobalId, HeightKey, TreeKind},
    segmentation::{SegmentationError, SegmentationErrorCode, SegmentationStorage},
    tree::{IntegrationStrategy, ParallelUnionTree, TreeParts, UnionTree, VertexKind},
};
