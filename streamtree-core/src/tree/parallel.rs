//! Union tree for one subdomain of a decomposed mesh.
//!
//! Boundary vertices are streamed by every subdomain that contains them. A
//! vertex declared with [`ParallelUnionTree::add_shared_vertex`] is held open
//! while other subdomains may still send edges for it: finalizing it only
//! records the request, and the vertex is neither retired nor frozen until
//! [`ParallelUnionTree::mark_unshared`] demotes it.

use std::ops::Deref;

use tracing::{debug, error, instrument, trace};

use crate::{
    error::{Result, TreeError},
    graph::{OutputGraph, TreeGraph},
    metrics::TreeMetrics,
    order::{FunctionValue, GlobalId},
};

use super::UnionTree;

/// [`UnionTree`] that tolerates vertices shared between subdomains.
///
/// Read-only accessors are reached through `Deref`.
///
/// # Examples
/// ```
/// use streamtree_core::{TreeKind, UnionTreeBuilder};
///
/// let mut tree = UnionTreeBuilder::new(TreeKind::Merge).build_parallel()?;
/// tree.add_shared_vertex(0, 4.0)?;
/// tree.finalize_vertex(0, false)?; // first subdomain is done
/// tree.add_shared_vertex(0, 4.0)?; // second subdomain arrives late
/// assert_eq!(tree.is_finalized(0), Some(false));
/// tree.finalize_vertex(0, false)?;
/// tree.mark_unshared(0)?;
/// assert_eq!(tree.is_finalized(0), Some(true));
/// # Ok::<(), streamtree_core::TreeError>(())
/// ```
#[derive(Debug)]
pub struct ParallelUnionTree<G: OutputGraph = TreeGraph> {
    inner: UnionTree<G>,
}

impl<G: OutputGraph> ParallelUnionTree<G> {
    pub(crate) const fn new(inner: UnionTree<G>) -> Self {
        Self { inner }
    }

    /// Adds `id`; a repeat call for a resident vertex changes nothing.
    ///
    /// # Errors
    /// Returns [`TreeError::NonFiniteValue`] for NaN or infinite values.
    pub fn add_vertex(&mut self, id: GlobalId, value: FunctionValue) -> Result<()> {
        if !self.inner.contains(id) {
            return self.inner.add_vertex(id, value);
        }
        if !value.is_finite() {
            error!(id, value, "rejecting non-finite vertex value");
            return Err(TreeError::NonFiniteValue { id, value });
        }
        trace!(id, "repeat vertex ignored");
        Ok(())
    }

    /// Adds `id` as a boundary vertex shared with other subdomains.
    ///
    /// The vertex stays open until [`mark_unshared`](Self::mark_unshared),
    /// however many times it is finalized. Repeat calls are no-ops.
    ///
    /// # Errors
    /// Returns [`TreeError::NonFiniteValue`] for NaN or infinite values and
    /// [`TreeError::SharedAfterFinalization`] when `id` is resident and was
    /// already finalized without being shared.
    pub fn add_shared_vertex(&mut self, id: GlobalId, value: FunctionValue) -> Result<()> {
        self.add_vertex(id, value)?;
        let Some(slot) = self.inner.core.slot_of(id) else {
            return Ok(());
        };
        let vertex = self.inner.core.vertex_mut(slot)?;
        if vertex.finalized {
            error!(id, "vertex finalized before it was declared shared");
            return Err(TreeError::SharedAfterFinalization { id });
        }
        if !vertex.shared {
            vertex.shared = true;
            trace!(id, "vertex held open for other subdomains");
        }
        Ok(())
    }

    /// Integrates the edge between `i0` and `i1`.
    ///
    /// # Errors
    /// Propagates failures from [`UnionTree::add_edge`].
    pub fn add_edge(&mut self, i0: GlobalId, i1: GlobalId) -> Result<()> {
        self.inner.add_edge(i0, i1)
    }

    /// Finalizes `id`, or records the request while it is shared.
    ///
    /// # Errors
    /// Returns [`TreeError::UnknownVertex`] when `id` is not resident and no
    /// filter could explain it.
    pub fn finalize_vertex(&mut self, id: GlobalId, restricted: bool) -> Result<()> {
        let Some(slot) = self.inner.core.slot_of(id) else {
            return self.inner.finalize_vertex(id, restricted);
        };
        let vertex = self.inner.core.vertex_mut(slot)?;
        if !vertex.shared {
            return self.inner.finalize_vertex(id, restricted);
        }
        vertex.held = Some(vertex.held.unwrap_or(false) | restricted);
        trace!(id, "finalization held for a shared vertex");
        Ok(())
    }

    /// Demotes `id` out of shared status once no other subdomain needs it.
    ///
    /// A held finalization takes effect at once; otherwise the vertex stays
    /// open for a later [`finalize_vertex`](Self::finalize_vertex). Demoting
    /// a vertex that is not shared is a no-op.
    ///
    /// # Errors
    /// Returns [`TreeError::UnknownVertex`] when `id` is not resident and no
    /// filter could explain it.
    pub fn mark_unshared(&mut self, id: GlobalId) -> Result<()> {
        let Some(slot) = self.inner.core.slot_of(id) else {
            if self.inner.filters_values() {
                return Ok(());
            }
            error!(id, "demoting an unknown vertex");
            return Err(TreeError::UnknownVertex { id });
        };
        let vertex = self.inner.core.vertex_mut(slot)?;
        if !vertex.shared {
            return Ok(());
        }
        vertex.shared = false;
        let held = vertex.held.take();
        match held {
            Some(restricted) => self.inner.finalize_vertex(id, restricted),
            None => Ok(()),
        }
    }

    /// Returns `true` while `id` is resident and held open as shared.
    #[must_use]
    pub fn is_shared(&self, id: GlobalId) -> Option<bool> {
        let slot = self.inner.core.slot_of(id)?;
        self.inner.core.vertex(slot).ok().map(|vertex| vertex.shared)
    }

    /// Demotes every shared vertex, then finalizes whatever is still open.
    ///
    /// # Errors
    /// Propagates failures from [`UnionTree::cleanup`].
    #[instrument(level = "debug", skip(self), name = "parallel.cleanup")]
    pub fn cleanup(&mut self) -> Result<()> {
        let mut shared: Vec<GlobalId> = self
            .inner
            .core
            .vertices()
            .filter(|(_, vertex)| vertex.shared)
            .map(|(_, vertex)| vertex.id)
            .collect();
        shared.sort_unstable();
        debug!(count = shared.len(), "demoting shared vertices");
        for id in shared {
            self.mark_unshared(id)?;
        }
        self.inner.cleanup()
    }

    /// Mutable counters of the wrapped tree.
    pub const fn metrics_mut(&mut self) -> &mut TreeMetrics {
        self.inner.metrics_mut()
    }

    /// Returns the wrapped tree.
    #[must_use]
    pub fn into_inner(self) -> UnionTree<G> {
        self.inner
    }
}

impl<G: OutputGraph> Deref for ParallelUnionTree<G> {
    type Target = UnionTree<G>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
