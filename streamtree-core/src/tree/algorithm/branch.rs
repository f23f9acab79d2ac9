//! Branch membership sets.
//!
//! A branch is a contiguous, height-monotone stretch of one child chain.
//! Members are kept ordered by height key so the integration search can jump
//! straight to the lowest member above a target instead of walking pointers.

use std::{collections::BTreeMap, mem, ops::Bound};

use crate::{order::HeightKey, storage::Slot};

use super::IntegrationStrategy;
use crate::tree::vertex::BranchId;

/// Ordered members of one branch.
#[derive(Clone, Debug)]
pub(crate) enum Branch {
    /// Sorted highest-first; searched linearly.
    Sorted(Vec<(HeightKey, Slot)>),
    /// Ordered map searched by range lookup.
    Indexed(BTreeMap<HeightKey, Slot>),
}

impl Branch {
    pub(crate) fn singleton(strategy: IntegrationStrategy, key: HeightKey, slot: Slot) -> Self {
        match strategy {
            IntegrationStrategy::Linear => Self::Sorted(vec![(key, slot)]),
            IntegrationStrategy::Accelerated => Self::Indexed(BTreeMap::from([(key, slot)])),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Sorted(members) => members.len(),
            Self::Indexed(members) => members.len(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn get(&self, key: HeightKey) -> Option<Slot> {
        match self {
            Self::Sorted(members) => members
                .iter()
                .find(|(member, _)| *member == key)
                .map(|(_, slot)| *slot),
            Self::Indexed(members) => members.get(&key).copied(),
        }
    }

    pub(crate) fn remove(&mut self, key: HeightKey) -> Option<Slot> {
        match self {
            Self::Sorted(members) => {
                let position = members.iter().position(|(member, _)| *member == key)?;
                Some(members.remove(position).1)
            }
            Self::Indexed(members) => members.remove(&key),
        }
    }

    /// Highest member.
    pub(crate) fn top(&self) -> Option<Slot> {
        match self {
            Self::Sorted(members) => members.first().map(|(_, slot)| *slot),
            Self::Indexed(members) => members.last_key_value().map(|(_, slot)| *slot),
        }
    }

    /// Lowest member.
    pub(crate) fn bottom(&self) -> Option<Slot> {
        match self {
            Self::Sorted(members) => members.last().map(|(_, slot)| *slot),
            Self::Indexed(members) => members.first_key_value().map(|(_, slot)| *slot),
        }
    }

    /// Lowest member with `floor < key <= ceiling`.
    pub(crate) fn lowest_above(&self, floor: HeightKey, ceiling: HeightKey) -> Option<Slot> {
        match self {
            Self::Sorted(members) => members
                .iter()
                .rev()
                .find(|(key, _)| *key > floor)
                .filter(|(key, _)| *key <= ceiling)
                .map(|(_, slot)| *slot),
            Self::Indexed(members) => members
                .range((Bound::Excluded(floor), Bound::Included(ceiling)))
                .next()
                .map(|(_, slot)| *slot),
        }
    }

    /// Keeps members above `key` and returns the rest (`key` included).
    pub(crate) fn split_at(&mut self, key: HeightKey) -> Self {
        match self {
            Self::Sorted(members) => {
                let position = members
                    .iter()
                    .position(|(member, _)| *member <= key)
                    .unwrap_or(members.len());
                Self::Sorted(members.split_off(position))
            }
            Self::Indexed(members) => {
                let mut upper = members.split_off(&key);
                if let Some(slot) = upper.remove(&key) {
                    members.insert(key, slot);
                }
                Self::Indexed(mem::replace(members, upper))
            }
        }
    }

    /// Moves every member of `other` into this branch.
    pub(crate) fn absorb(&mut self, other: Self) {
        match (self, other) {
            (Self::Sorted(members), Self::Sorted(incoming)) => {
                members.extend(incoming);
                members.sort_unstable_by(|a, b| b.0.cmp(&a.0));
            }
            (Self::Indexed(members), Self::Indexed(mut incoming)) => {
                members.append(&mut incoming);
            }
            (Self::Sorted(members), Self::Indexed(incoming)) => {
                members.extend(incoming);
                members.sort_unstable_by(|a, b| b.0.cmp(&a.0));
            }
            (Self::Indexed(members), Self::Sorted(incoming)) => {
                members.extend(incoming);
            }
        }
    }

    /// Members in descending height order.
    pub(crate) fn members(&self) -> Vec<(HeightKey, Slot)> {
        match self {
            Self::Sorted(members) => members.clone(),
            Self::Indexed(members) => members
                .iter()
                .rev()
                .map(|(key, slot)| (*key, *slot))
                .collect(),
        }
    }

    pub(crate) fn slots(&self) -> Vec<Slot> {
        self.members().into_iter().map(|(_, slot)| slot).collect()
    }
}

/// Slab of branches with id reuse.
#[derive(Debug, Default)]
pub(crate) struct BranchSlab {
    branches: Vec<Option<Branch>>,
    free: Vec<BranchId>,
}

impl BranchSlab {
    pub(crate) fn insert(&mut self, branch: Branch) -> Option<BranchId> {
        if let Some(id) = self.free.pop() {
            if let Some(entry) = self.branches.get_mut(id as usize) {
                *entry = Some(branch);
                return Some(id);
            }
        }
        let id = BranchId::try_from(self.branches.len()).ok()?;
        self.branches.push(Some(branch));
        Some(id)
    }

    pub(crate) fn get(&self, id: BranchId) -> Option<&Branch> {
        self.branches.get(id as usize)?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: BranchId) -> Option<&mut Branch> {
        self.branches.get_mut(id as usize)?.as_mut()
    }

    pub(crate) fn remove(&mut self, id: BranchId) -> Option<Branch> {
        let branch = self.branches.get_mut(id as usize)?.take()?;
        self.free.push(id);
        Some(branch)
    }

    pub(crate) fn live(&self) -> impl Iterator<Item = (BranchId, &Branch)> + '_ {
        self.branches
            .iter()
            .zip(0..)
            .filter_map(|(branch, id)| branch.as_ref().map(|branch| (id, branch)))
    }

    pub(crate) fn live_count(&self) -> usize {
        self.branches.len() - self.free.len()
    }
}
