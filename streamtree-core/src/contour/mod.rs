//! Contour tree from a merge tree and a split tree of the same stream.
//!
//! Both trees are first augmented so that each holds the other's nodes: a
//! node missing from one tree is inserted on the arc whose value range
//! contains it, found through that tree's segmentation. The augmented trees
//! then share one node set and are peeled leaf by leaf. A node that is a leaf
//! in one tree and has exactly one neighbour below it in the other is a leaf
//! of the contour tree; its contour arc is emitted and the node is bypassed
//! in both trees. Emitted arcs point from the peeled leaf to its neighbour.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::{
    UnionTreeBuilder,
    error::{TreeError, define_error_codes},
    graph::{GraphError, GraphView, OutputGraph, TreeGraph},
    order::{FunctionValue, GlobalId, TreeKind},
    segmentation::{Segmentation, SegmentationError, SegmentationStorage},
    tree::UnionTree,
};

/// Error raised while merging a merge tree and a split tree.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ContourError {
    /// A tree was passed in the wrong slot.
    #[error("expected a {expected:?} tree, found a {found:?} tree")]
    KindMismatch {
        /// Kind required for this slot.
        expected: TreeKind,
        /// Kind actually supplied.
        found: TreeKind,
    },
    /// A tree was built without segmentation.
    #[error("the {kind:?} tree was built without segmentation")]
    MissingSegmentation {
        /// Kind of the offending tree.
        kind: TreeKind,
    },
    /// A node of one tree has no counterpart in the other.
    #[error("node {id} has no counterpart in the {kind:?} tree: {detail}")]
    ConsistencyViolation {
        /// The node that could not be matched.
        id: GlobalId,
        /// Tree in which the counterpart was expected.
        kind: TreeKind,
        /// What was missing.
        detail: &'static str,
    },
    /// Streaming into one of the trees failed.
    #[error("tree update failed: {source}")]
    Tree {
        /// Underlying tree error.
        #[source]
        source: TreeError,
    },
    /// Completing a segmentation failed.
    #[error("segmentation failed: {source}")]
    Segmentation {
        /// Underlying segmentation error.
        #[source]
        source: SegmentationError,
    },
    /// A graph rejected an update.
    #[error("graph update failed: {source}")]
    Graph {
        /// Underlying graph error.
        #[source]
        source: GraphError,
    },
}

define_error_codes! {
    /// Stable codes describing [`ContourError`] variants.
    enum ContourErrorCode for ContourError {
        /// A tree was passed in the wrong slot.
        KindMismatch => KindMismatch { .. } => "CONTOUR_KIND_MISMATCH",
        /// A tree was built without segmentation.
        MissingSegmentation => MissingSegmentation { .. } => "CONTOUR_MISSING_SEGMENTATION",
        /// A node of one tree has no counterpart in the other.
        ConsistencyViolation => ConsistencyViolation { .. } => "CONTOUR_CONSISTENCY_VIOLATION",
        /// Streaming into one of the trees failed.
        TreeFailure => Tree { .. } => "CONTOUR_TREE_FAILURE",
        /// Completing a segmentation failed.
        SegmentationFailure => Segmentation { .. } => "CONTOUR_SEGMENTATION_FAILURE",
        /// A graph rejected an update.
        GraphFailure => Graph { .. } => "CONTOUR_GRAPH_FAILURE",
    }
}

impl From<TreeError> for ContourError {
    fn from(source: TreeError) -> Self {
        Self::Tree { source }
    }
}

impl From<SegmentationError> for ContourError {
    fn from(source: SegmentationError) -> Self {
        Self::Segmentation { source }
    }
}

impl From<GraphError> for ContourError {
    fn from(source: GraphError) -> Self {
        Self::Graph { source }
    }
}

/// Summary of one contour tree construction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ContourStats {
    /// Nodes written to the output graph.
    pub nodes: usize,
    /// Arcs written to the output graph.
    pub arcs: usize,
    /// Split-tree nodes inserted into the merge tree.
    pub augmented_merge: usize,
    /// Merge-tree nodes inserted into the split tree.
    pub augmented_split: usize,
}

/// Streams one mesh into a merge tree and a split tree and joins them.
///
/// # Examples
/// ```
/// use streamtree_core::{ContourTreeMerger, graph::TreeGraph};
///
/// // A path 0(5) - 1(3) - 2(8) - 3(1).
/// let mut merger = ContourTreeMerger::new()?;
/// for (id, value) in [(0, 5.0), (1, 3.0), (2, 8.0), (3, 1.0)] {
///     merger.add_vertex(id, value)?;
/// }
/// for (a, b) in [(0, 1), (1, 2), (2, 3)] {
///     merger.add_edge(a, b)?;
/// }
/// let mut contour = TreeGraph::new();
/// let stats = merger.finish_tree(&mut contour)?;
/// assert_eq!(stats.nodes, 4);
/// assert_eq!(contour.arc_count(), 3);
/// # Ok::<(), streamtree_core::ContourError>(())
/// ```
#[derive(Debug)]
pub struct ContourTreeMerger {
    merge: UnionTree<TreeGraph>,
    split: UnionTree<TreeGraph>,
}

impl ContourTreeMerger {
    /// Creates a merger with default trees and in-memory segmentation.
    ///
    /// # Errors
    /// Returns [`ContourError::Tree`] when a tree cannot be built.
    pub fn new() -> Result<Self, ContourError> {
        let builder = |kind| {
            UnionTreeBuilder::new(kind)
                .with_segmentation(SegmentationStorage::InMemory)
                .build()
        };
        Self::from_trees(builder(TreeKind::Merge)?, builder(TreeKind::Split)?)
    }

    /// Pairs a merge tree with a split tree of the same stream.
    ///
    /// # Errors
    /// Returns [`ContourError::KindMismatch`] when the trees are swapped and
    /// [`ContourError::MissingSegmentation`] when either lacks segmentation.
    pub fn from_trees(
        merge: UnionTree<TreeGraph>,
        split: UnionTree<TreeGraph>,
    ) -> Result<Self, ContourError> {
        for (tree, expected) in [(&merge, TreeKind::Merge), (&split, TreeKind::Split)] {
            if tree.kind() != expected {
                error!(?expected, found = ?tree.kind(), "trees passed in the wrong order");
                return Err(ContourError::KindMismatch {
                    expected,
                    found: tree.kind(),
                });
            }
            if tree.segmentation().is_none() {
                error!(kind = ?expected, "contour merging needs segmentation");
                return Err(ContourError::MissingSegmentation { kind: expected });
            }
        }
        Ok(Self { merge, split })
    }

    /// The merge tree.
    #[must_use]
    #[rustfmt::skip]
    pub const fn merge_tree(&self) -> &UnionTree<TreeGraph> { &self.merge }

    /// The split tree.
    #[must_use]
    #[rustfmt::skip]
    pub const fn split_tree(&self) -> &UnionTree<TreeGraph> { &self.split }

    /// Adds a vertex to both trees.
    ///
    /// # Errors
    /// Propagates [`UnionTree::add_vertex`] failures.
    pub fn add_vertex(&mut self, id: GlobalId, value: FunctionValue) -> Result<(), ContourError> {
        self.merge.add_vertex(id, value)?;
        self.split.add_vertex(id, value)?;
        Ok(())
    }

    /// Adds an edge to both trees.
    ///
    /// # Errors
    /// Propagates [`UnionTree::add_edge`] failures.
    pub fn add_edge(&mut self, i0: GlobalId, i1: GlobalId) -> Result<(), ContourError> {
        self.merge.add_edge(i0, i1)?;
        self.split.add_edge(i0, i1)?;
        Ok(())
    }

    /// Finalizes a vertex in both trees.
    ///
    /// # Errors
    /// Propagates [`UnionTree::finalize_vertex`] failures.
    pub fn finalize_vertex(&mut self, id: GlobalId, restricted: bool) -> Result<(), ContourError> {
        self.merge.finalize_vertex(id, restricted)?;
        self.split.finalize_vertex(id, restricted)?;
        Ok(())
    }

    /// Finishes both trees and writes the contour tree into `out`.
    ///
    /// The mesh must be simply connected. When it has a loop the two trees
    /// no longer describe a tree of contours, peeling runs out of leaves
    /// before the graphs are empty, and the call fails with a
    /// [`ContourError::ConsistencyViolation`] whose detail is
    /// `"peeling stalled"`.
    ///
    /// # Errors
    /// Returns [`ContourError::ConsistencyViolation`] when the trees do not
    /// describe the same simply connected mesh, and propagates tree,
    /// segmentation and graph failures.
    #[instrument(level = "debug", skip_all, name = "contour.finish_tree")]
    pub fn finish_tree<G: OutputGraph>(self, out: &mut G) -> Result<ContourStats, ContourError> {
        let Self {
            mut merge,
            mut split,
        } = self;
        merge.cleanup()?;
        split.cleanup()?;
        merge.complete_segmentation()?;
        split.complete_segmentation()?;

        let merge_parts = merge.into_parts();
        let split_parts = split.into_parts();
        let mut merge_graph = merge_parts.graph;
        let mut split_graph = split_parts.graph;
        let (Some(merge_segments), Some(split_segments)) =
            (merge_parts.segmentation, split_parts.segmentation)
        else {
            return Err(ContourError::MissingSegmentation {
                kind: TreeKind::Merge,
            });
        };

        let mut stats = ContourStats {
            augmented_merge: augment(&mut merge_graph, &merge_segments, &split_graph)?,
            augmented_split: augment(&mut split_graph, &split_segments, &merge_graph)?,
            ..ContourStats::default()
        };
        debug!(
            merge_nodes = merge_graph.node_count(),
            split_nodes = split_graph.node_count(),
            "trees augmented"
        );

        for (id, node) in merge_graph.nodes() {
            if !split_graph.contains(id) {
                return Err(inconsistent(id, TreeKind::Split, "augmented node sets differ"));
            }
            out.add_node(id, node.value())?;
            out.finalize_node(id, node.is_restricted())?;
            stats.nodes += 1;
        }
        stats.arcs = peel(&mut merge_graph, &mut split_graph, out)?;
        debug!(nodes = stats.nodes, arcs = stats.arcs, "contour tree emitted");
        Ok(stats)
    }
}

fn inconsistent(id: GlobalId, kind: TreeKind, detail: &'static str) -> ContourError {
    error!(id, ?kind, detail, "contour trees disagree");
    ContourError::ConsistencyViolation { id, kind, detail }
}

/// Inserts every node of `other` missing from `graph`, returning how many.
fn augment(
    graph: &mut TreeGraph,
    segments: &Segmentation,
    other: &TreeGraph,
) -> Result<usize, ContourError> {
    let kind = segments.kind();
    let missing: Vec<(GlobalId, FunctionValue)> = other
        .nodes()
        .filter(|(id, _)| !graph.contains(*id))
        .map(|(id, node)| (id, node.value()))
        .collect();

    for (id, value) in &missing {
        let Some(owner) = segments.owner(*id).filter(|owner| graph.contains(*owner)) else {
            return Err(inconsistent(*id, kind, "no owning arc"));
        };
        let key = kind.key(*id, *value);
        let mut upper = owner;
        let lower = loop {
            let Some(child) = graph.child(upper) else {
                return Err(inconsistent(*id, kind, "owning arc ends above the node"));
            };
            let child_value = graph
                .node_value(child)
                .ok_or_else(|| inconsistent(child, kind, "arc leads to a missing node"))?;
            if kind.key(child, child_value) < key {
                break child;
            }
            upper = child;
        };
        graph.insert_on_arc(upper, lower, *id, *value)?;
    }
    Ok(missing.len())
}

fn peelable(merge: &TreeGraph, split: &TreeGraph, id: GlobalId) -> bool {
    merge.contains(id) && merge.parents(id).len() + split.parents(id).len() == 1
}

/// Repeatedly removes contour leaves, emitting one arc per leaf.
fn peel<G: OutputGraph>(
    merge: &mut TreeGraph,
    split: &mut TreeGraph,
    out: &mut G,
) -> Result<usize, ContourError> {
    let mut queue: BTreeSet<GlobalId> = merge
        .nodes()
        .map(|(id, _)| id)
        .filter(|id| peelable(merge, split, *id))
        .collect();
    let mut arcs = 0;

    while let Some(id) = queue.pop_first() {
        if !peelable(merge, split, id) {
            continue;
        }
        let (kind, neighbour) = if merge.parents(id).is_empty() {
            (TreeKind::Merge, merge.child(id))
        } else {
            (TreeKind::Split, split.child(id))
        };
        let Some(neighbour) = neighbour else {
            return Err(inconsistent(id, kind, "leaf has no neighbour below it"));
        };
        let value = merge
            .node_value(id)
            .ok_or_else(|| inconsistent(id, TreeKind::Merge, "peeled node vanished"))?;
        let neighbour_value = merge
            .node_value(neighbour)
            .ok_or_else(|| inconsistent(neighbour, TreeKind::Merge, "neighbour vanished"))?;
        out.add_arc(id, value, neighbour, neighbour_value)?;
        arcs += 1;

        let mut affected: Vec<GlobalId> = merge.parents(id).to_vec();
        affected.extend(split.parents(id));
        affected.extend(merge.child(id));
        affected.extend(split.child(id));
        merge.bypass_node(id)?;
        split.bypass_node(id)?;
        queue.extend(affected.into_iter().filter(|node| peelable(merge, split, *node)));
    }

    // Isolated nodes and the last node of each component carry no arc.
    let rest: Vec<GlobalId> = merge.nodes().map(|(id, _)| id).collect();
    for id in rest {
        if merge.parents(id).len() + split.parents(id).len() > 0 {
            return Err(inconsistent(id, TreeKind::Merge, "peeling stalled"));
        }
        merge.remove_node(id)?;
        split.remove_node(id)?;
    }
    Ok(arcs)
}

#[cfg(test)]
mod tests;
