//! Union algorithm: zipper integration of edges over branch decompositions.
//!
//! Every resident vertex has at most one child, the next vertex below it on
//! the path to its component's root. Adding an edge merges the two
//! endpoints' descending chains into one sorted chain (a zipper merge): the
//! higher endpoint is attached beneath the lowest vertex of the other chain
//! that still sits above it, and the displaced remainder is merged further
//! down the same way.
//!
//! Branches partition the resident vertices into contiguous stretches of
//! chains so the search for an integration vertex can jump along a branch
//! instead of following pointers one by one. After every relink, branches are
//! split where a stretch was broken and folded where two stretches now join
//! end to end, smaller into larger.

mod branch;

use std::mem;

use tracing::{debug, error};

use crate::{
    error::{Result, TreeError, TreeInvariant},
    metrics::TreeMetrics,
    order::{FunctionValue, GNULL, GlobalId, HeightKey, TreeKind},
    storage::{ExtendableArray, Slot},
};

use self::branch::{Branch, BranchSlab};
use super::vertex::{BranchId, TreeVertex};

/// How branch membership is stored and searched.
///
/// Both strategies build identical trees and identical branch partitions;
/// they differ only in cost.
///
/// # Examples
/// ```
/// use streamtree_core::{IntegrationStrategy, TreeKind, UnionTreeBuilder};
///
/// let tree = UnionTreeBuilder::new(TreeKind::Split)
///     .with_strategy(IntegrationStrategy::Linear)
///     .build()?;
/// assert_eq!(tree.strategy(), IntegrationStrategy::Linear);
/// # Ok::<(), streamtree_core::TreeError>(())
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum IntegrationStrategy {
    /// Sorted vectors with linear scans; a split always detaches the lower
    /// part.
    Linear,
    /// Ordered maps with logarithmic range lookups; a split moves whichever
    /// part is smaller so long trunks keep their identity.
    #[default]
    Accelerated,
}

/// Arena of vertices plus their branch decomposition.
#[derive(Debug)]
pub(crate) struct UnionAlgorithm {
    kind: TreeKind,
    strategy: IntegrationStrategy,
    vertices: ExtendableArray<TreeVertex>,
    branches: BranchSlab,
}

impl UnionAlgorithm {
    pub(crate) fn new(
        kind: TreeKind,
        strategy: IntegrationStrategy,
        block_bits: u32,
    ) -> Result<Self> {
        Ok(Self {
            kind,
            strategy,
            vertices: ExtendableArray::new(block_bits)?,
            branches: BranchSlab::default(),
        })
    }

    pub(crate) const fn strategy(&self) -> IntegrationStrategy {
        self.strategy
    }

    pub(crate) fn len(&self) -> usize {
        self.vertices.len()
    }

    pub(crate) fn branch_count(&self) -> usize {
        self.branches.live_count()
    }

    pub(crate) fn slot_of(&self, id: GlobalId) -> Option<Slot> {
        self.vertices.slot_of(id)
    }

    pub(crate) fn vertices(&self) -> impl Iterator<Item = (Slot, &TreeVertex)> + '_ {
        self.vertices.iter().map(|(slot, _, vertex)| (slot, vertex))
    }

    pub(crate) fn vertex(&self, slot: Slot) -> Result<&TreeVertex> {
        self.vertices.get(slot).ok_or_else(|| dangling(slot))
    }

    pub(crate) fn vertex_mut(&mut self, slot: Slot) -> Result<&mut TreeVertex> {
        self.vertices.get_mut(slot).ok_or_else(|| dangling(slot))
    }

    fn key(&self, slot: Slot) -> Result<HeightKey> {
        Ok(self.vertex(slot)?.key)
    }

    /// Registers a new vertex as its own single-member branch.
    pub(crate) fn insert_vertex(&mut self, id: GlobalId, value: FunctionValue) -> Result<Slot> {
        let key = self.kind.key(id, value);
        let slot = self.vertices.insert(id, TreeVertex::new(id, value, key))?;
        let branch = self
            .branches
            .insert(Branch::singleton(self.strategy, key, slot))
            .ok_or(TreeError::InvariantViolation {
                invariant: TreeInvariant::BranchMembership,
                id,
            })?;
        self.vertex_mut(slot)?.branch = branch;
        Ok(slot)
    }

    /// Integrates the edge `(a, b)`, appending every slot whose pointers
    /// changed to `touched`.
    pub(crate) fn add_edge(
        &mut self,
        a: Slot,
        b: Slot,
        metrics: &mut TreeMetrics,
        touched: &mut Vec<Slot>,
    ) -> Result<()> {
        if a == b {
            return Ok(());
        }
        let (head, tail) = if self.key(a)? > self.key(b)? {
            (a, b)
        } else {
            (b, a)
        };

        let mut upper = self.integration_point(head, self.key(tail)?)?;
        let mut lower = tail;
        let mut steps = 0_usize;
        loop {
            let old = self.vertex(upper)?.child;
            if old == Some(lower) {
                if steps == 0 {
                    debug!(
                        head = self.vertex(head)?.id,
                        tail = self.vertex(tail)?.id,
                        "edge endpoints already chained"
                    );
                }
                break;
            }

            self.relink(upper, lower, old)?;
            metrics.record_integration_step();
            steps += 1;
            touched.push(upper);
            touched.push(lower);
            touched.extend(old);
            self.repair_branches(upper, lower, old, metrics)?;

            let Some(next) = old else {
                break;
            };
            upper = self.integration_point(lower, self.key(next)?)?;
            lower = next;
        }
        Ok(())
    }

    /// Finds the lowest vertex on the chain below `from` whose key is still
    /// above `target`. Requires `key(from) > target`.
    pub(crate) fn integration_point(&self, from: Slot, target: HeightKey) -> Result<Slot> {
        let mut current = from;
        loop {
            let vertex = self.vertex(current)?;
            let branch = self.branch(vertex.branch, vertex.id)?;
            let candidate = branch
                .lowest_above(target, vertex.key)
                .ok_or_else(|| violation(TreeInvariant::BranchMembership, vertex.id))?;
            if branch.bottom() != Some(candidate) {
                return Ok(candidate);
            }
            match self.vertex(candidate)?.child {
                Some(child) if self.key(child)? > target => current = child,
                _ => return Ok(candidate),
            }
        }
    }

    fn relink(&mut self, upper: Slot, lower: Slot, old: Option<Slot>) -> Result<()> {
        if let Some(old) = old {
            let parents = &mut self.vertex_mut(old)?.parents;
            let position = parents
                .iter()
                .position(|parent| *parent == upper)
                .ok_or(TreeInvariant::ParentChildSymmetry);
            match position {
                Ok(position) => {
                    parents.swap_remove(position);
                }
                Err(invariant) => {
                    let id = self.vertex(old)?.id;
                    return Err(violation(invariant, id));
                }
            }
        }
        self.vertex_mut(upper)?.child = Some(lower);
        self.vertex_mut(lower)?.parents.push(upper);
        Ok(())
    }

    fn repair_branches(
        &mut self,
        upper: Slot,
        lower: Slot,
        old: Option<Slot>,
        metrics: &mut TreeMetrics,
    ) -> Result<()> {
        if let Some(old) = old {
            let (branch, key, id) = {
                let vertex = self.vertex(old)?;
                (vertex.branch, vertex.key, vertex.id)
            };
            if branch == self.vertex(upper)?.branch {
                self.split_branch(branch, key, id)?;
                metrics.record_branch_split();
            }
        }

        let upper_branch = self.vertex(upper)?.branch;
        let lower_branch = self.vertex(lower)?.branch;
        if upper_branch == lower_branch {
            return Ok(());
        }
        let upper_id = self.vertex(upper)?.id;
        let lower_id = self.vertex(lower)?.id;
        let joins_end_to_end = self.branch(upper_branch, upper_id)?.bottom() == Some(upper)
            && self.branch(lower_branch, lower_id)?.top() == Some(lower);
        if joins_end_to_end {
            self.fold_branches(upper_branch, lower_branch, upper_id)?;
            metrics.record_branch_fold();
        }
        Ok(())
    }

    /// Breaks branch `id` so members at or below `at` form their own branch.
    fn split_branch(&mut self, id: BranchId, at: HeightKey, vertex: GlobalId) -> Result<()> {
        let strategy = self.strategy;
        let branch = self.branch_mut(id, vertex)?;
        let mut moved = branch.split_at(at);
        if strategy == IntegrationStrategy::Accelerated && branch.len() < moved.len() {
            mem::swap(branch, &mut moved);
        }
        if moved.is_empty() || branch.is_empty() {
            return Err(violation(TreeInvariant::BranchContiguity, vertex));
        }
        let slots = moved.slots();
        let new_id = self
            .branches
            .insert(moved)
            .ok_or_else(|| violation(TreeInvariant::BranchMembership, vertex))?;
        for slot in slots {
            self.vertex_mut(slot)?.branch = new_id;
        }
        Ok(())
    }

    /// Folds the smaller of two branches into the larger.
    fn fold_branches(&mut self, a: BranchId, b: BranchId, vertex: GlobalId) -> Result<()> {
        let (keep, gone) = if self.branch(a, vertex)?.len() >= self.branch(b, vertex)?.len() {
            (a, b)
        } else {
            (b, a)
        };
        let absorbed = self
            .branches
            .remove(gone)
            .ok_or_else(|| violation(TreeInvariant::BranchMembership, vertex))?;
        let slots = absorbed.slots();
        self.branch_mut(keep, vertex)?.absorb(absorbed);
        for slot in slots {
            self.vertex_mut(slot)?.branch = keep;
        }
        Ok(())
    }

    /// Splices a one-parent, one-child vertex out of its chain and frees its
    /// slot.
    pub(crate) fn remove_vertex(&mut self, slot: Slot) -> Result<TreeVertex> {
        let vertex = self.vertex(slot)?;
        let (id, key, branch_id) = (vertex.id, vertex.key, vertex.branch);
        let (Some(child), [parent]) = (vertex.child, vertex.parents.as_slice()) else {
            return Err(violation(TreeInvariant::RetirementShape, id));
        };
        let parent = *parent;

        let branch = self.branch_mut(branch_id, id)?;
        if branch.get(key) != Some(slot) {
            return Err(violation(TreeInvariant::BranchMembership, id));
        }
        branch.remove(key);
        if branch.is_empty() {
            self.branches.remove(branch_id);
        }

        self.vertex_mut(parent)?.child = Some(child);
        let child_parents = &mut self.vertex_mut(child)?.parents;
        let Some(position) = child_parents.iter().position(|p| *p == slot) else {
            return Err(violation(TreeInvariant::ParentChildSymmetry, id));
        };
        if let Some(entry) = child_parents.get_mut(position) {
            *entry = parent;
        }

        self.vertices.remove(id).ok_or_else(|| dangling(slot))
    }

    /// Checks pointer symmetry, chain order, branch contiguity and the free
    /// chain of the arena.
    pub(crate) fn validate(&self) -> Result<()> {
        for (slot, vertex) in self.vertices() {
            if let Some(child) = vertex.child {
                let below = self.vertex(child)?;
                if !below.parents.contains(&slot) {
                    return Err(violation(TreeInvariant::ParentChildSymmetry, vertex.id));
                }
                if below.key >= vertex.key {
                    return Err(violation(TreeInvariant::ChainOrder, vertex.id));
                }
            }
            for parent in &vertex.parents {
                if self.vertex(*parent)?.child != Some(slot) {
                    return Err(violation(TreeInvariant::ParentChildSymmetry, vertex.id));
                }
            }
            if self.branch(vertex.branch, vertex.id)?.get(vertex.key) != Some(slot) {
                return Err(violation(TreeInvariant::BranchMembership, vertex.id));
            }
        }

        for (id, branch) in self.branches.live() {
            let members = branch.slots();
            for (index, slot) in members.iter().enumerate() {
                let vertex = self.vertex(*slot)?;
                if vertex.branch != id {
                    return Err(violation(TreeInvariant::BranchMembership, vertex.id));
                }
                if let Some(next) = members.get(index + 1) {
                    if vertex.child != Some(*next) {
                        return Err(violation(TreeInvariant::BranchContiguity, vertex.id));
                    }
                }
            }
        }

        self.vertices.validate_free_chain()?;
        Ok(())
    }

    /// Global ids of the members of the branch holding `slot`, highest first.
    pub(crate) fn branch_members(&self, slot: Slot) -> Result<Vec<GlobalId>> {
        let vertex = self.vertex(slot)?;
        self.branch(vertex.branch, vertex.id)?
            .slots()
            .into_iter()
            .map(|member| Ok(self.vertex(member)?.id))
            .collect()
    }

    fn branch(&self, id: BranchId, vertex: GlobalId) -> Result<&Branch> {
        self.branches
            .get(id)
            .ok_or_else(|| violation(TreeInvariant::BranchMembership, vertex))
    }

    fn branch_mut(&mut self, id: BranchId, vertex: GlobalId) -> Result<&mut Branch> {
        self.branches
            .get_mut(id)
            .ok_or_else(|| violation(TreeInvariant::BranchMembership, vertex))
    }
}

fn violation(invariant: TreeInvariant, id: GlobalId) -> TreeError {
    error!(%invariant, id, "tree invariant violated");
    TreeError::InvariantViolation { invariant, id }
}

fn dangling(slot: Slot) -> TreeError {
    error!(slot, "pointer references a vacant slot");
    TreeError::InvariantViolation {
        invariant: TreeInvariant::DanglingPointer,
        id: GNULL,
    }
}
