//! Identifier types and the height order shared by every tree component.
//!
//! A merge tree sweeps from high to low function values, a split tree from
//! low to high. Rather than threading a comparator through every structure,
//! each vertex carries a [`HeightKey`] that already encodes the sweep
//! direction: in both tree kinds a larger key means "higher", i.e. closer to
//! the leaves. Ties in function value are broken by global id so the order is
//! total.

use std::cmp::Ordering;

/// Global identifier of a mesh vertex.
pub type GlobalId = u64;

/// Scalar function value attached to a vertex.
pub type FunctionValue = f64;

/// Sentinel id marking an unknown or removed owner.
pub const GNULL: GlobalId = GlobalId::MAX;

/// Which sweep direction a tree summarises.
///
/// # Examples
/// ```
/// use streamtree_core::TreeKind;
///
/// let merge = TreeKind::Merge;
/// assert!(merge.is_higher((1, 5.0), (0, 3.0)));
/// assert!(TreeKind::Split.is_higher((0, 3.0), (1, 5.0)));
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TreeKind {
    /// Tracks superlevel-set components: maxima are leaves, arcs run downward.
    Merge,
    /// Tracks sublevel-set components: minima are leaves, arcs run upward.
    Split,
}

impl TreeKind {
    /// Builds the height key of a vertex under this sweep direction.
    #[must_use]
    pub fn key(self, id: GlobalId, value: FunctionValue) -> HeightKey {
        match self {
            Self::Merge => HeightKey { value, rank: id },
            Self::Split => HeightKey {
                value: -value,
                rank: GlobalId::MAX - id,
            },
        }
    }

    /// Returns `true` when `a` sits strictly above `b` in this tree.
    #[must_use]
    pub fn is_higher(self, a: (GlobalId, FunctionValue), b: (GlobalId, FunctionValue)) -> bool {
        self.key(a.0, a.1) > self.key(b.0, b.1)
    }

    /// Returns the opposite sweep direction.
    #[must_use]
    pub const fn counterpart(self) -> Self {
        match self {
            Self::Merge => Self::Split,
            Self::Split => Self::Merge,
        }
    }
}

/// Total order key for a vertex within one tree.
///
/// Keys compare by function value (using IEEE total ordering) and then by a
/// rank derived from the global id.
#[derive(Clone, Copy, Debug)]
pub struct HeightKey {
    value: FunctionValue,
    rank: u64,
}

impl HeightKey {
    /// Smallest possible key; every vertex sits above it.
    #[cfg(test)]
    pub(crate) const FLOOR: Self = Self {
        value: FunctionValue::NEG_INFINITY,
        rank: 0,
    };
}

impl PartialEq for HeightKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeightKey {}

impl Ord for HeightKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .total_cmp(&other.value)
            .then_with(|| self.rank.cmp(&other.rank))
    }
}

impl PartialOrd for HeightKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
