//! Per-vertex pointer state stored in the tree arena.

use smallvec::SmallVec;

use crate::{
    order::{FunctionValue, GlobalId, HeightKey},
    storage::Slot,
};

/// Index of a branch in the branch slab.
pub(crate) type BranchId = u32;

/// Topological role of a vertex, derived from its pointer shape.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VertexKind {
    /// One parent and no child: the lowest vertex of its component so far.
    Root,
    /// Two or more parents: a saddle where components join.
    Branch,
    /// No parents: an extremum where a component is born.
    Leaf,
    /// Exactly one parent and a child: topologically regular.
    Interior,
    /// Regular shape, but pinned as a node by its restricted flag.
    Restricted,
}

impl VertexKind {
    /// Returns `true` for kinds that become nodes of the output graph.
    #[must_use]
    pub const fn is_node(self) -> bool {
        !matches!(self, Self::Interior)
    }
}

/// Arena record for one resident vertex.
#[derive(Clone, Debug)]
pub(crate) struct TreeVertex {
    pub(crate) id: GlobalId,
    pub(crate) value: FunctionValue,
    pub(crate) key: HeightKey,
    pub(crate) child: Option<Slot>,
    pub(crate) parents: SmallVec<[Slot; 2]>,
    pub(crate) branch: BranchId,
    pub(crate) finalized: bool,
    /// Set once the vertex has been emitted as a graph node.
    pub(crate) processed: bool,
    pub(crate) restricted: bool,
    /// Child id of the arc currently present in the output graph.
    pub(crate) arc_target: Option<GlobalId>,
    /// Held open by the parallel tree until demoted.
    pub(crate) shared: bool,
    /// A sharing subdomain finalized the vertex while it was held open.
    pub(crate) held: Option<bool>,
}

impl TreeVertex {
    pub(crate) fn new(id: GlobalId, value: FunctionValue, key: HeightKey) -> Self {
        Self {
            id,
            value,
            key,
            child: None,
            parents: SmallVec::new(),
            branch: 0,
            finalized: false,
            processed: false,
            restricted: false,
            arc_target: None,
            shared: false,
            held: None,
        }
    }

    pub(crate) fn kind(&self) -> VertexKind {
        match (self.parents.len(), self.child) {
            (0, _) => VertexKind::Leaf,
            (1, None) => VertexKind::Root,
            (1, Some(_)) if self.restricted => VertexKind::Restricted,
            (1, Some(_)) => VertexKind::Interior,
            _ => VertexKind::Branch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    use crate::order::TreeKind;

    fn vertex(parents: usize, child: bool, restricted: bool) -> TreeVertex {
        let mut vertex = TreeVertex::new(7, 1.0, TreeKind::Merge.key(7, 1.0));
        vertex.parents = (0..parents).map(|slot| slot as Slot).collect();
        vertex.child = child.then_some(99);
        vertex.restricted = restricted;
        vertex
    }

    #[rstest]
    #[case::isolated(0, false, false, VertexKind::Leaf)]
    #[case::maximum(0, true, false, VertexKind::Leaf)]
    #[case::root(1, false, false, VertexKind::Root)]
    #[case::regular(1, true, false, VertexKind::Interior)]
    #[case::pinned(1, true, true, VertexKind::Restricted)]
    #[case::saddle(2, true, false, VertexKind::Branch)]
    #[case::saddle_root(3, false, false, VertexKind::Branch)]
    fn kind_follows_pointer_shape(
        #[case] parents: usize,
        #[case] child: bool,
        #[case] restricted: bool,
        #[case] expected: VertexKind,
    ) {
        assert_eq!(vertex(parents, child, restricted).kind(), expected);
    }
}
