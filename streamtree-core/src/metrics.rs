//! Counters describing the work done by a union tree.
//!
//! Counters always accumulate on the [`TreeMetrics`] owned by each tree.
//! With the `metrics` feature enabled every increment is also forwarded to
//! the `metrics` facade under a `streamtree_` prefixed name.

/// Running counters for one union tree.
///
/// # Examples
/// ```
/// use streamtree_core::{TreeKind, UnionTreeBuilder};
///
/// let mut tree = UnionTreeBuilder::new(TreeKind::Merge).build()?;
/// tree.add_vertex(0, 1.0)?;
/// assert_eq!(tree.metrics().vertices_added(), 1);
/// tree.metrics_mut().reset();
/// assert_eq!(tree.metrics().vertices_added(), 0);
/// # Ok::<(), streamtree_core::TreeError>(())
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TreeMetrics {
    vertices_added: u64,
    vertices_filtered: u64,
    vertices_retired: u64,
    edges_added: u64,
    edges_dropped: u64,
    integration_steps: u64,
    branch_splits: u64,
    branch_folds: u64,
    forced_finalizations: u64,
    live_vertices: u64,
    peak_live_vertices: u64,
}

macro_rules! counter_accessors {
    ($($(#[$meta:meta])* $field:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[must_use]
            #[rustfmt::skip]
            pub const fn $field(&self) -> u64 { self.$field }
        )+
    };
}

impl TreeMetrics {
    counter_accessors! {
        /// Vertices accepted by `add_vertex`.
        vertices_added,
        /// Vertices skipped by the value filter.
        vertices_filtered,
        /// Interior vertices spliced out and freed.
        vertices_retired,
        /// Edges integrated into the tree.
        edges_added,
        /// Edges dropped because an endpoint was filtered out.
        edges_dropped,
        /// Pointer relinks performed while zipping chains.
        integration_steps,
        /// Branches split to keep membership contiguous.
        branch_splits,
        /// Branches folded into a neighbouring branch.
        branch_folds,
        /// Vertices finalized by `cleanup` rather than by the caller.
        forced_finalizations,
        /// Vertices currently resident.
        live_vertices,
        /// Largest number of simultaneously resident vertices.
        peak_live_vertices,
    }

    /// Clears every counter, including the live and peak gauges.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn record_vertex_added(&mut self) {
        self.vertices_added += 1;
        self.live_vertices += 1;
        self.peak_live_vertices = self.peak_live_vertices.max(self.live_vertices);
        forward("streamtree_vertices_added");
    }

    pub(crate) fn record_vertex_filtered(&mut self) {
        self.vertices_filtered += 1;
        forward("streamtree_vertices_filtered");
    }

    pub(crate) fn record_vertex_retired(&mut self) {
        self.vertices_retired += 1;
        self.live_vertices = self.live_vertices.saturating_sub(1);
        forward("streamtree_vertices_retired");
    }

    pub(crate) fn record_edge_added(&mut self) {
        self.edges_added += 1;
        forward("streamtree_edges_added");
    }

    pub(crate) fn record_edge_dropped(&mut self) {
        self.edges_dropped += 1;
        forward("streamtree_edges_dropped");
    }

    pub(crate) fn record_integration_step(&mut self) {
        self.integration_steps += 1;
        forward("streamtree_integration_steps");
    }

    pub(crate) fn record_branch_split(&mut self) {
        self.branch_splits += 1;
        forward("streamtree_branch_splits");
    }

    pub(crate) fn record_branch_fold(&mut self) {
        self.branch_folds += 1;
        forward("streamtree_branch_folds");
    }

    pub(crate) fn record_forced_finalization(&mut self) {
        self.forced_finalizations += 1;
        forward("streamtree_forced_finalizations");
    }
}

#[cfg(feature = "metrics")]
fn forward(name: &'static str) {
    ::metrics::counter!(name).increment(1);
}

#[cfg(not(feature = "metrics"))]
const fn forward(_name: &'static str) {}
