//! Output graph interface and the in-memory reference graph.
//!
//! Union trees only ever talk to their output through [`OutputGraph`]. Arcs
//! are oriented the way the tree stores them: `add_arc(upper, .., lower, ..)`
//! makes `lower` the single child of `upper`, so every node has at most one
//! outgoing arc and any number of incoming ones.

use std::collections::{BTreeMap, HashMap};

use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    error::define_error_codes,
    order::{FunctionValue, GlobalId},
};

/// Error raised when an [`OutputGraph`] rejects an update.
#[non_exhaustive]
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GraphError {
    /// The referenced node does not exist.
    #[error("node {id} is not present in the graph")]
    MissingNode {
        /// The missing node.
        id: GlobalId,
    },
    /// A node with this id already exists.
    #[error("node {id} is already present in the graph")]
    DuplicateNode {
        /// The duplicated node.
        id: GlobalId,
    },
    /// The upper node already has a different outgoing arc.
    #[error("arc ({from}, {to}) conflicts with existing arc ({from}, {existing})")]
    ArcConflict {
        /// Upper endpoint of the rejected arc.
        from: GlobalId,
        /// Lower endpoint of the rejected arc.
        to: GlobalId,
        /// Current child of `from`.
        existing: GlobalId,
    },
    /// The arc to remove does not exist.
    #[error("arc ({from}, {to}) is not present in the graph")]
    MissingArc {
        /// Upper endpoint.
        from: GlobalId,
        /// Lower endpoint.
        to: GlobalId,
    },
}

define_error_codes! {
    /// Stable codes describing [`GraphError`] variants.
    enum GraphErrorCode for GraphError {
        /// The referenced node does not exist.
        MissingNode => MissingNode { .. } => "GRAPH_MISSING_NODE",
        /// A node with this id already exists.
        DuplicateNode => DuplicateNode { .. } => "GRAPH_DUPLICATE_NODE",
        /// The upper node already has a different outgoing arc.
        ArcConflict => ArcConflict { .. } => "GRAPH_ARC_CONFLICT",
        /// The arc to remove does not exist.
        MissingArc => MissingArc { .. } => "GRAPH_MISSING_ARC",
    }
}

/// Sink receiving the nodes and arcs emitted by a union tree.
pub trait OutputGraph {
    /// Adds a node for a critical or restricted vertex.
    ///
    /// # Errors
    /// Returns [`GraphError::DuplicateNode`] when `id` is already present.
    fn add_node(&mut self, id: GlobalId, value: FunctionValue) -> Result<(), GraphError>;

    /// Adds the arc from `id0` down to its child `id1`.
    ///
    /// # Errors
    /// Returns [`GraphError::MissingNode`] when an endpoint is absent and
    /// [`GraphError::ArcConflict`] when `id0` already has a child.
    fn add_arc(
        &mut self,
        id0: GlobalId,
        v0: FunctionValue,
        id1: GlobalId,
        v1: FunctionValue,
    ) -> Result<(), GraphError>;

    /// Removes the arc from `id0` to `id1`.
    ///
    /// # Errors
    /// Returns [`GraphError::MissingArc`] when no such arc exists.
    fn remove_arc(&mut self, id0: GlobalId, id1: GlobalId) -> Result<(), GraphError>;

    /// Removes a node together with any arcs still touching it.
    ///
    /// # Errors
    /// Returns [`GraphError::MissingNode`] when `id` is absent.
    fn remove_node(&mut self, id: GlobalId) -> Result<(), GraphError>;

    /// Marks a node as final, optionally pinning it as restricted.
    ///
    /// # Errors
    /// Returns [`GraphError::MissingNode`] when `id` is absent.
    fn finalize_node(&mut self, id: GlobalId, restricted: bool) -> Result<(), GraphError>;

    /// Returns the dense index `id` would receive in
    /// [`create_active_map`](Self::create_active_map), if it is present.
    fn find_active_node(&self, id: GlobalId) -> Option<usize>;

    /// Fills `map` with a dense `0..k` index for every active node.
    fn create_active_map(&self, map: &mut HashMap<GlobalId, usize>);

    /// Records that ids up to `id` occur in the input.
    fn max_index(&mut self, id: GlobalId);
}

/// Read-only navigation over a tree-shaped graph.
///
/// Segmentation completion walks arcs through this view.
pub trait GraphView {
    /// Function value of node `id`, if present.
    fn node_value(&self, id: GlobalId) -> Option<FunctionValue>;

    /// Child of node `id`, if it has one.
    fn child_of(&self, id: GlobalId) -> Option<GlobalId>;
}

/// Node record stored by [`TreeGraph`].
#[derive(Clone, Debug, PartialEq)]
pub struct GraphNode {
    value: FunctionValue,
    child: Option<GlobalId>,
    parents: SmallVec<[GlobalId; 2]>,
    finalized: bool,
    restricted: bool,
}

impl GraphNode {
    fn new(value: FunctionValue) -> Self {
        Self {
            value,
            child: None,
            parents: SmallVec::new(),
            finalized: false,
            restricted: false,
        }
    }

    /// Function value of the node.
    #[must_use]
    #[rustfmt::skip]
    pub const fn value(&self) -> FunctionValue { self.value }

    /// Child of the node, if any.
    #[must_use]
    #[rustfmt::skip]
    pub const fn child(&self) -> Option<GlobalId> { self.child }

    /// Parents of the node in insertion order.
    #[must_use]
    pub fn parents(&self) -> &[GlobalId] {
        &self.parents
    }

    /// Whether [`OutputGraph::finalize_node`] was called for the node.
    #[must_use]
    #[rustfmt::skip]
    pub const fn is_finalized(&self) -> bool { self.finalized }

    /// Whether the node was pinned as restricted.
    #[must_use]
    #[rustfmt::skip]
    pub const fn is_restricted(&self) -> bool { self.restricted }
}

/// In-memory tree graph keyed by global id.
///
/// # Examples
/// ```
/// use streamtree_core::graph::{OutputGraph, TreeGraph};
///
/// let mut graph = TreeGraph::new();
/// graph.add_node(2, 8.0)?;
/// graph.add_node(1, 3.0)?;
/// graph.add_arc(2, 8.0, 1, 3.0)?;
/// assert_eq!(graph.child(2), Some(1));
/// assert_eq!(graph.parents(1), &[2]);
/// # Ok::<(), streamtree_core::graph::GraphError>(())
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TreeGraph {
    nodes: BTreeMap<GlobalId, GraphNode>,
    arc_count: usize,
    max_id: Option<GlobalId>,
}

impl TreeGraph {
    /// Creates an empty graph.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            arc_count: 0,
            max_id: None,
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of arcs.
    #[must_use]
    #[rustfmt::skip]
    pub const fn arc_count(&self) -> usize { self.arc_count }

    /// Returns `true` when the graph holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Largest id announced through [`OutputGraph::max_index`].
    #[must_use]
    #[rustfmt::skip]
    pub const fn max_id(&self) -> Option<GlobalId> { self.max_id }

    /// Returns `true` when `id` is a node.
    #[must_use]
    pub fn contains(&self, id: GlobalId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Returns the node record for `id`.
    #[must_use]
    pub fn node(&self, id: GlobalId) -> Option<&GraphNode> {
        self.nodes.get(&id)
    }

    /// Returns the child of `id`.
    #[must_use]
    pub fn child(&self, id: GlobalId) -> Option<GlobalId> {
        self.nodes.get(&id).and_then(GraphNode::child)
    }

    /// Returns the parents of `id`, or an empty slice when it is absent.
    #[must_use]
    pub fn parents(&self, id: GlobalId) -> &[GlobalId] {
        self.nodes.get(&id).map_or(&[][..], GraphNode::parents)
    }

    /// Iterates over nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = (GlobalId, &GraphNode)> + '_ {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    /// Iterates over arcs as `(upper, lower)` pairs in ascending upper id.
    pub fn arcs(&self) -> impl Iterator<Item = (GlobalId, GlobalId)> + '_ {
        self.nodes
            .iter()
            .filter_map(|(id, node)| node.child.map(|child| (*id, child)))
    }

    /// Splits the arc `upper -> lower` by inserting node `id`.
    ///
    /// # Errors
    /// Returns [`GraphError::MissingArc`] when the arc is absent and
    /// [`GraphError::DuplicateNode`] when `id` already exists.
    pub fn insert_on_arc(
        &mut self,
        upper: GlobalId,
        lower: GlobalId,
        id: GlobalId,
        value: FunctionValue,
    ) -> Result<(), GraphError> {
        if self.child(upper) != Some(lower) {
            return Err(GraphError::MissingArc {
                from: upper,
                to: lower,
            });
        }
        if self.contains(id) {
            return Err(GraphError::DuplicateNode { id });
        }
        let upper_value = self.value_of(upper)?;
        let lower_value = self.value_of(lower)?;
        self.remove_arc(upper, lower)?;
        self.add_node(id, value)?;
        self.add_arc(upper, upper_value, id, value)?;
        self.add_arc(id, value, lower, lower_value)
    }

    /// Removes `id`, reconnecting each of its parents to its child.
    ///
    /// # Errors
    /// Returns [`GraphError::MissingNode`] when `id` is absent.
    pub fn bypass_node(&mut self, id: GlobalId) -> Result<(), GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::MissingNode { id })?;
        let child = node.child;
        let parents = node.parents.clone();
        self.remove_node(id)?;
        if let Some(lower) = child {
            let lower_value = self.value_of(lower)?;
            for parent in parents {
                let parent_value = self.value_of(parent)?;
                self.add_arc(parent, parent_value, lower, lower_value)?;
            }
        }
        Ok(())
    }

    fn value_of(&self, id: GlobalId) -> Result<FunctionValue, GraphError> {
        self.nodes
            .get(&id)
            .map(GraphNode::value)
            .ok_or(GraphError::MissingNode { id })
    }

    fn node_mut(&mut self, id: GlobalId) -> Result<&mut GraphNode, GraphError> {
        self.nodes
            .get_mut(&id)
            .ok_or(GraphError::MissingNode { id })
    }
}

impl OutputGraph for TreeGraph {
    fn add_node(&mut self, id: GlobalId, value: FunctionValue) -> Result<(), GraphError> {
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode { id });
        }
        self.nodes.insert(id, GraphNode::new(value));
        Ok(())
    }

    fn add_arc(
        &mut self,
        id0: GlobalId,
        _v0: FunctionValue,
        id1: GlobalId,
        _v1: FunctionValue,
    ) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&id1) {
            return Err(GraphError::MissingNode { id: id1 });
        }
        let upper = self.node_mut(id0)?;
        if let Some(existing) = upper.child {
            return Err(GraphError::ArcConflict {
                from: id0,
                to: id1,
                existing,
            });
        }
        upper.child = Some(id1);
        self.node_mut(id1)?.parents.push(id0);
        self.arc_count += 1;
        Ok(())
    }

    fn remove_arc(&mut self, id0: GlobalId, id1: GlobalId) -> Result<(), GraphError> {
        let missing = GraphError::MissingArc { from: id0, to: id1 };
        let upper = self.nodes.get_mut(&id0).ok_or_else(|| missing.clone())?;
        if upper.child != Some(id1) {
            return Err(missing);
        }
        upper.child = None;
        let lower = self.nodes.get_mut(&id1).ok_or_else(|| missing.clone())?;
        let position = lower
            .parents
            .iter()
            .position(|parent| *parent == id0)
            .ok_or(missing)?;
        lower.parents.swap_remove(position);
        self.arc_count -= 1;
        Ok(())
    }

    fn remove_node(&mut self, id: GlobalId) -> Result<(), GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::MissingNode { id })?;
        let child = node.child;
        let parents = node.parents.clone();
        if let Some(lower) = child {
            self.remove_arc(id, lower)?;
        }
        for parent in parents {
            self.remove_arc(parent, id)?;
        }
        self.nodes.remove(&id);
        Ok(())
    }

    fn finalize_node(&mut self, id: GlobalId, restricted: bool) -> Result<(), GraphError> {
        let node = self.node_mut(id)?;
        node.finalized = true;
        node.restricted |= restricted;
        Ok(())
    }

    fn find_active_node(&self, id: GlobalId) -> Option<usize> {
        self.nodes
            .contains_key(&id)
            .then(|| self.nodes.range(..id).count())
    }

    fn create_active_map(&self, map: &mut HashMap<GlobalId, usize>) {
        map.clear();
        map.extend(self.nodes.keys().zip(0..).map(|(id, index)| (*id, index)));
    }

    fn max_index(&mut self, id: GlobalId) {
        self.max_id = Some(self.max_id.map_or(id, |current| current.max(id)));
    }
}

impl GraphView for TreeGraph {
    fn node_value(&self, id: GlobalId) -> Option<FunctionValue> {
        self.nodes.get(&id).map(GraphNode::value)
    }

    fn child_of(&self, id: GlobalId) -> Option<GlobalId> {
        self.child(id)
    }
}
