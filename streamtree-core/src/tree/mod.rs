//! Streaming union tree: vertices, edges and finalizations in, nodes and
//! arcs out.
//!
//! A [`UnionTree`] keeps only the vertices whose role is still undecided.
//! Once a vertex is finalized (all of its edges have been seen) and proves to
//! be topologically regular, it is spliced out of its chain and its slot is
//! freed. Every other finalized vertex becomes a node of the output graph,
//! and an arc is emitted between each node and the node directly below it.
//! Later edges may still reshape the chains around finalized nodes; arcs that
//! no longer match the chains are withdrawn before replacements are emitted.

mod algorithm;
mod parallel;
mod vertex;

use std::mem;

use tracing::{debug, error, instrument, warn};

use crate::{
    error::{Result, TreeError},
    graph::{GraphView, OutputGraph, TreeGraph},
    memory::{estimate_front_bytes, format_bytes},
    metrics::TreeMetrics,
    order::{FunctionValue, GlobalId, TreeKind},
    segmentation::Segmentation,
    storage::Slot,
};

use self::algorithm::UnionAlgorithm;

pub use self::{algorithm::IntegrationStrategy, parallel::ParallelUnionTree, vertex::VertexKind};

/// Settings resolved by [`UnionTreeBuilder`](crate::UnionTreeBuilder).
#[derive(Clone, Copy, Debug)]
pub(crate) struct TreeConfig {
    pub(crate) kind: TreeKind,
    pub(crate) lower_bound: FunctionValue,
    pub(crate) upper_bound: FunctionValue,
    pub(crate) strategy: IntegrationStrategy,
    pub(crate) block_bits: u32,
}

/// Everything a finished tree hands back to its caller.
#[derive(Debug)]
pub struct TreeParts<G> {
    /// The output graph holding the emitted nodes and arcs.
    pub graph: G,
    /// Segmentation, when the tree was built with one.
    pub segmentation: Option<Segmentation>,
    /// Counters accumulated while streaming.
    pub metrics: TreeMetrics,
}

/// Streaming merge or split tree over an [`OutputGraph`].
///
/// [`VertexKind`] follows the pointer shape, not the degree in the emitted
/// graph. In the example below vertices 1 and 2 both end up as degree-one
/// ends of the single arc, yet 1 reports [`VertexKind::Root`] because it has
/// a parent and no child, while 0 is [`VertexKind::Interior`] and is retired.
///
/// # Examples
/// ```
/// use streamtree_core::{TreeKind, UnionTreeBuilder, VertexKind};
///
/// let mut tree = UnionTreeBuilder::new(TreeKind::Merge).build()?;
/// for (id, value) in [(0, 5.0), (1, 3.0), (2, 8.0)] {
///     tree.add_vertex(id, value)?;
/// }
/// tree.add_edge(0, 1)?;
/// tree.add_edge(0, 2)?;
/// tree.cleanup()?;
///
/// let graph = tree.graph();
/// assert_eq!(graph.arcs().collect::<Vec<_>>(), vec![(2, 1)]);
/// assert_eq!(tree.vertex_kind(1), Some(VertexKind::Root));
/// # Ok::<(), streamtree_core::TreeError>(())
/// ```
#[derive(Debug)]
pub struct UnionTree<G: OutputGraph = TreeGraph> {
    config: TreeConfig,
    core: UnionAlgorithm,
    graph: G,
    segmentation: Option<Segmentation>,
    metrics: TreeMetrics,
    touched: Vec<Slot>,
}

impl<G: OutputGraph> UnionTree<G> {
    pub(crate) fn from_config(
        config: TreeConfig,
        graph: G,
        segmentation: Option<Segmentation>,
    ) -> Result<Self> {
        Ok(Self {
            core: UnionAlgorithm::new(config.kind, config.strategy, config.block_bits)?,
            config,
            graph,
            segmentation,
            metrics: TreeMetrics::default(),
            touched: Vec::new(),
        })
    }

    /// Sweep direction of this tree.
    #[must_use]
    #[rustfmt::skip]
    pub const fn kind(&self) -> TreeKind { self.config.kind }

    /// Branch storage strategy in use.
    #[must_use]
    pub const fn strategy(&self) -> IntegrationStrategy {
        self.core.strategy()
    }

    /// Inclusive value filter as `(lower, upper)`.
    #[must_use]
    pub const fn bounds(&self) -> (FunctionValue, FunctionValue) {
        (self.config.lower_bound, self.config.upper_bound)
    }

    /// The output graph.
    #[must_use]
    #[rustfmt::skip]
    pub const fn graph(&self) -> &G { &self.graph }

    /// Segmentation, when enabled.
    #[must_use]
    pub const fn segmentation(&self) -> Option<&Segmentation> {
        self.segmentation.as_ref()
    }

    /// Counters accumulated so far.
    #[must_use]
    #[rustfmt::skip]
    pub const fn metrics(&self) -> &TreeMetrics { &self.metrics }

    /// Mutable counters, e.g. to [`reset`](TreeMetrics::reset) them.
    #[rustfmt::skip]
    pub const fn metrics_mut(&mut self) -> &mut TreeMetrics { &mut self.metrics }

    /// Number of vertices still resident.
    #[must_use]
    pub fn live_vertices(&self) -> usize {
        self.core.len()
    }

    /// Number of live branches.
    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.core.branch_count()
    }

    /// Returns `true` while `id` is resident.
    #[must_use]
    pub fn contains(&self, id: GlobalId) -> bool {
        self.core.slot_of(id).is_some()
    }

    /// Current role of a resident vertex.
    #[must_use]
    pub fn vertex_kind(&self, id: GlobalId) -> Option<VertexKind> {
        let slot = self.core.slot_of(id)?;
        self.core.vertex(slot).ok().map(vertex::TreeVertex::kind)
    }

    /// Whether a resident vertex has been finalized.
    #[must_use]
    pub fn is_finalized(&self, id: GlobalId) -> Option<bool> {
        let slot = self.core.slot_of(id)?;
        self.core.vertex(slot).ok().map(|vertex| vertex.finalized)
    }

    /// Members of the branch holding `id`, highest first.
    #[must_use]
    pub fn branch_of(&self, id: GlobalId) -> Option<Vec<GlobalId>> {
        let slot = self.core.slot_of(id)?;
        self.core.branch_members(slot).ok()
    }

    /// Checks pointer symmetry, chain order, branch contiguity and the free
    /// list of the vertex arena.
    ///
    /// # Errors
    /// Returns [`TreeError::InvariantViolation`] naming the broken invariant
    /// and a storage error when the free list is corrupt.
    pub fn validate(&self) -> Result<()> {
        self.core.validate()
    }

    /// Consumes the tree, returning its graph, segmentation and metrics.
    #[must_use]
    pub fn into_parts(self) -> TreeParts<G> {
        TreeParts {
            graph: self.graph,
            segmentation: self.segmentation,
            metrics: self.metrics,
        }
    }

    fn filters_values(&self) -> bool {
        self.config.lower_bound > FunctionValue::NEG_INFINITY
            || self.config.upper_bound < FunctionValue::INFINITY
    }

    /// Adds vertex `id` with function value `value`.
    ///
    /// Values outside the configured bounds are skipped without error.
    ///
    /// # Errors
    /// Returns [`TreeError::NonFiniteValue`] for NaN or infinite values and
    /// [`TreeError::DuplicateVertex`] when `id` is already resident.
    pub fn add_vertex(&mut self, id: GlobalId, value: FunctionValue) -> Result<()> {
        if !value.is_finite() {
            error!(id, value, "rejecting non-finite vertex value");
            return Err(TreeError::NonFiniteValue { id, value });
        }
        if value < self.config.lower_bound || value > self.config.upper_bound {
            self.metrics.record_vertex_filtered();
            return Ok(());
        }
        if self.contains(id) {
            error!(id, "vertex added twice");
            return Err(TreeError::DuplicateVertex { id });
        }
        self.core.insert_vertex(id, value)?;
        self.graph.max_index(id);
        self.metrics.record_vertex_added();
        Ok(())
    }

    /// Integrates the edge between `i0` and `i1`.
    ///
    /// Edges touching a vertex removed by the value filter are dropped.
    /// Self-loops are ignored.
    ///
    /// # Errors
    /// Returns [`TreeError::UnknownVertex`] when an endpoint is not resident
    /// and no filter could explain it, and
    /// [`TreeError::EdgeAfterFinalization`] when an endpoint was already
    /// finalized.
    #[instrument(level = "trace", skip(self), name = "tree.add_edge")]
    pub fn add_edge(&mut self, i0: GlobalId, i1: GlobalId) -> Result<()> {
        let (a, b) = match (self.core.slot_of(i0), self.core.slot_of(i1)) {
            (Some(a), Some(b)) => (a, b),
            (first, _) => {
                let missing = if first.is_none() { i0 } else { i1 };
                if self.filters_values() {
                    self.metrics.record_edge_dropped();
                    return Ok(());
                }
                error!(id = missing, "edge references an unknown vertex");
                return Err(TreeError::UnknownVertex { id: missing });
            }
        };
        if a == b {
            return Ok(());
        }
        for (slot, id) in [(a, i0), (b, i1)] {
            if self.core.vertex(slot)?.finalized {
                error!(left = i0, right = i1, finalized = id, "edge after finalization");
                return Err(TreeError::EdgeAfterFinalization {
                    left: i0,
                    right: i1,
                    finalized: id,
                });
            }
        }

        let mut touched = mem::take(&mut self.touched);
        touched.clear();
        let outcome = self
            .core
            .add_edge(a, b, &mut self.metrics, &mut touched)
            .and_then(|()| self.settle(&touched));
        self.touched = touched;
        outcome?;
        self.metrics.record_edge_added();
        Ok(())
    }

    /// Declares that every edge of `id` has been seen.
    ///
    /// Regular vertices are removed at once; every other vertex becomes a
    /// node of the output graph. `restricted` keeps a regular vertex as a
    /// node. Finalizing a vertex twice is a no-op.
    ///
    /// # Errors
    /// Returns [`TreeError::UnknownVertex`] when `id` is not resident and no
    /// filter could explain it, and any graph or segmentation failure.
    pub fn finalize_vertex(&mut self, id: GlobalId, restricted: bool) -> Result<()> {
        let Some(slot) = self.core.slot_of(id) else {
            if self.filters_values() {
                return Ok(());
            }
            error!(id, "finalizing an unknown vertex");
            return Err(TreeError::UnknownVertex { id });
        };
        let vertex = self.core.vertex_mut(slot)?;
        if vertex.finalized {
            return Ok(());
        }
        vertex.finalized = true;
        vertex.restricted |= restricted;
        self.refresh(slot)
    }

    /// Finalizes every vertex the caller left open, in id order.
    ///
    /// Only a component's root is expected to remain open at the end of a
    /// stream; any other vertex is reported as a warning.
    ///
    /// # Errors
    /// Propagates failures from [`finalize_vertex`](Self::finalize_vertex).
    #[instrument(level = "debug", skip(self), name = "tree.cleanup")]
    pub fn cleanup(&mut self) -> Result<()> {
        let live = self.core.len();
        debug!(
            live,
            estimate = %format_bytes(estimate_front_bytes(live, self.config.block_bits)),
            "finalizing remaining front"
        );
        let mut pending: Vec<(GlobalId, VertexKind)> = self
            .core
            .vertices()
            .filter(|(_, vertex)| !vertex.finalized)
            .map(|(_, vertex)| (vertex.id, vertex.kind()))
            .collect();
        pending.sort_unstable_by_key(|(id, _)| *id);

        for (id, kind) in pending {
            if kind != VertexKind::Root {
                warn!(id, ?kind, "forcing finalization of a non-root vertex");
            }
            self.metrics.record_forced_finalization();
            self.finalize_vertex(id, false)?;
        }
        Ok(())
    }

    /// Re-derives nodes and arcs around vertices whose pointers changed.
    fn settle(&mut self, touched: &[Slot]) -> Result<()> {
        let mut ids = touched
            .iter()
            .map(|slot| Ok(self.core.vertex(*slot)?.id))
            .collect::<Result<Vec<_>>>()?;
        ids.sort_unstable();
        ids.dedup();

        // Stale arcs go first so replacement arcs never collide with them.
        for id in &ids {
            if let Some(slot) = self.finalized_slot(*id)? {
                self.drop_stale_arc(slot)?;
            }
        }
        for id in ids {
            if let Some(slot) = self.finalized_slot(id)? {
                self.refresh(slot)?;
            }
        }
        Ok(())
    }

    fn finalized_slot(&self, id: GlobalId) -> Result<Option<Slot>> {
        let Some(slot) = self.core.slot_of(id) else {
            return Ok(None);
        };
        Ok(self.core.vertex(slot)?.finalized.then_some(slot))
    }

    fn child_id(&self, slot: Slot) -> Result<Option<GlobalId>> {
        match self.core.vertex(slot)?.child {
            Some(child) => Ok(Some(self.core.vertex(child)?.id)),
            None => Ok(None),
        }
    }

    fn drop_stale_arc(&mut self, slot: Slot) -> Result<()> {
        let vertex = self.core.vertex(slot)?;
        let (id, target) = (vertex.id, vertex.arc_target);
        let Some(target) = target else {
            return Ok(());
        };
        if self.child_id(slot)? != Some(target) {
            self.graph.remove_arc(id, target)?;
            self.core.vertex_mut(slot)?.arc_target = None;
        }
        Ok(())
    }

    /// Applies the role of a finalized vertex to the output.
    fn refresh(&mut self, slot: Slot) -> Result<()> {
        let vertex = self.core.vertex(slot)?;
        if vertex.kind() == VertexKind::Interior {
            return self.retire(slot);
        }
        let parents = vertex.parents.clone();
        self.emit_node(slot)?;
        self.refresh_arc(slot)?;
        for parent in parents {
            self.refresh_arc(parent)?;
        }
        Ok(())
    }

    fn emit_node(&mut self, slot: Slot) -> Result<()> {
        let vertex = self.core.vertex(slot)?;
        if vertex.processed {
            return Ok(());
        }
        let (id, value, restricted) = (vertex.id, vertex.value, vertex.restricted);
        self.graph.add_node(id, value)?;
        self.graph.finalize_node(id, restricted)?;
        self.core.vertex_mut(slot)?.processed = true;
        if let Some(segmentation) = self.segmentation.as_mut() {
            segmentation.record(id, id, value)?;
        }
        Ok(())
    }

    /// Keeps the arc leaving `slot` in step with its child pointer.
    fn refresh_arc(&mut self, slot: Slot) -> Result<()> {
        let vertex = self.core.vertex(slot)?;
        if !vertex.processed {
            return Ok(());
        }
        let (id, value, current) = (vertex.id, vertex.value, vertex.arc_target);
        let desired = match vertex.child {
            Some(child) => {
                let below = self.core.vertex(child)?;
                below.processed.then_some((below.id, below.value))
            }
            None => None,
        };
        if desired.map(|(target, _)| target) == current {
            return Ok(());
        }
        if let Some(old) = current {
            self.graph.remove_arc(id, old)?;
        }
        if let Some((target, target_value)) = desired {
            self.graph.add_arc(id, value, target, target_value)?;
        }
        self.core.vertex_mut(slot)?.arc_target = desired.map(|(target, _)| target);
        Ok(())
    }

    /// Splices a finalized regular vertex out of the tree and the graph.
    fn retire(&mut self, slot: Slot) -> Result<()> {
        let vertex = self.core.vertex(slot)?;
        let (id, value, processed, own_arc) =
            (vertex.id, vertex.value, vertex.processed, vertex.arc_target);
        let Some(&parent) = vertex.parents.first() else {
            return Ok(());
        };

        if let Some(target) = own_arc {
            self.graph.remove_arc(id, target)?;
        }
        let above = self.core.vertex_mut(parent)?;
        let parent_id = above.id;
        if above.arc_target == Some(id) {
            above.arc_target = None;
            self.graph.remove_arc(parent_id, id)?;
        }
        if processed {
            self.graph.remove_node(id)?;
        }
        if let Some(segmentation) = self.segmentation.as_mut() {
            segmentation.record(id, parent_id, value)?;
        }

        self.core.remove_vertex(slot)?;
        self.metrics.record_vertex_retired();
        self.refresh_arc(parent)
    }
}

impl<G: OutputGraph + GraphView> UnionTree<G> {
    /// Resolves every segmentation guess against the current graph.
    ///
    /// Does nothing when segmentation is disabled.
    ///
    /// # Errors
    /// Returns [`TreeError::Segmentation`] when completion fails.
    pub fn complete_segmentation(&mut self) -> Result<()> {
        if let Some(segmentation) = self.segmentation.as_mut() {
            segmentation.complete(&self.graph)?;
        }
        Ok(())
    }
}
