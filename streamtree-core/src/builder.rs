//! Builder for union trees.
//!
//! Collects the tree kind, value filter, branch strategy, block size and
//! segmentation storage, and validates them before any storage is created.

use tracing::error;

use crate::{
    Result,
    error::TreeError,
    graph::{OutputGraph, TreeGraph},
    order::{FunctionValue, TreeKind},
    segmentation::{Segmentation, SegmentationStorage},
    storage::{DEFAULT_BLOCK_BITS, MAX_BLOCK_BITS, MIN_BLOCK_BITS},
    tree::{IntegrationStrategy, ParallelUnionTree, TreeConfig, UnionTree},
};

/// Configures and constructs [`UnionTree`] and [`ParallelUnionTree`]
/// instances.
///
/// # Examples
/// ```
/// use streamtree_core::{IntegrationStrategy, TreeKind, UnionTreeBuilder};
///
/// let tree = UnionTreeBuilder::new(TreeKind::Merge)
///     .with_bounds(0.0, 10.0)
///     .with_strategy(IntegrationStrategy::Linear)
///     .with_block_bits(8)
///     .build()
///     .expect("builder configuration is valid");
/// assert_eq!(tree.kind(), TreeKind::Merge);
/// assert_eq!(tree.bounds(), (0.0, 10.0));
/// ```
#[derive(Clone, Debug)]
pub struct UnionTreeBuilder {
    kind: TreeKind,
    lower_bound: FunctionValue,
    upper_bound: FunctionValue,
    strategy: IntegrationStrategy,
    block_bits: u32,
    segmentation: SegmentationStorage,
}

impl UnionTreeBuilder {
    /// Creates a builder for `kind` with no value filter, the accelerated
    /// strategy, default blocks and no segmentation.
    ///
    /// # Examples
    /// ```
    /// use streamtree_core::{IntegrationStrategy, SegmentationStorage, TreeKind, UnionTreeBuilder};
    ///
    /// let builder = UnionTreeBuilder::new(TreeKind::Split);
    /// assert_eq!(builder.kind(), TreeKind::Split);
    /// assert_eq!(builder.strategy(), IntegrationStrategy::Accelerated);
    /// assert_eq!(builder.segmentation(), &SegmentationStorage::None);
    /// ```
    #[must_use]
    pub const fn new(kind: TreeKind) -> Self {
        Self {
            kind,
            lower_bound: FunctionValue::NEG_INFINITY,
            upper_bound: FunctionValue::INFINITY,
            strategy: IntegrationStrategy::Accelerated,
            block_bits: DEFAULT_BLOCK_BITS,
            segmentation: SegmentationStorage::None,
        }
    }

    /// Keeps only vertices whose value lies in `[lower, upper]`.
    #[must_use]
    pub const fn with_bounds(mut self, lower: FunctionValue, upper: FunctionValue) -> Self {
        self.lower_bound = lower;
        self.upper_bound = upper;
        self
    }

    /// Selects how branch membership is stored.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: IntegrationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the block size of every array to `1 << bits` elements.
    #[must_use]
    pub const fn with_block_bits(mut self, bits: u32) -> Self {
        self.block_bits = bits;
        self
    }

    /// Selects where segmentation entries live.
    ///
    /// # Examples
    /// ```
    /// use streamtree_core::{SegmentationStorage, TreeKind, UnionTreeBuilder};
    ///
    /// let builder = UnionTreeBuilder::new(TreeKind::Merge)
    ///     .with_segmentation(SegmentationStorage::OutOfCore { scratch_dir: None });
    /// assert!(matches!(
    ///     builder.segmentation(),
    ///     SegmentationStorage::OutOfCore { .. }
    /// ));
    /// ```
    #[must_use]
    pub fn with_segmentation(mut self, storage: SegmentationStorage) -> Self {
        self.segmentation = storage;
        self
    }

    /// Configured tree kind.
    #[must_use]
    #[rustfmt::skip]
    pub const fn kind(&self) -> TreeKind { self.kind }

    /// Configured value filter as `(lower, upper)`.
    #[must_use]
    pub const fn bounds(&self) -> (FunctionValue, FunctionValue) {
        (self.lower_bound, self.upper_bound)
    }

    /// Configured branch strategy.
    #[must_use]
    #[rustfmt::skip]
    pub const fn strategy(&self) -> IntegrationStrategy { self.strategy }

    /// Configured block size exponent.
    #[must_use]
    #[rustfmt::skip]
    pub const fn block_bits(&self) -> u32 { self.block_bits }

    /// Configured segmentation storage.
    #[must_use]
    #[rustfmt::skip]
    pub const fn segmentation(&self) -> &SegmentationStorage { &self.segmentation }

    /// Validates the configuration and builds a tree writing into a fresh
    /// [`TreeGraph`].
    ///
    /// # Errors
    /// Returns [`TreeError::InvalidBounds`] when the filter is empty or NaN,
    /// [`TreeError::InvalidConfiguration`] for an unsupported block size and
    /// a storage error when segmentation storage cannot be created.
    pub fn build(self) -> Result<UnionTree<TreeGraph>> {
        self.build_with_graph(TreeGraph::new())
    }

    /// Like [`build`](Self::build) but writes into `graph`.
    ///
    /// # Errors
    /// See [`build`](Self::build).
    pub fn build_with_graph<G: OutputGraph>(self, graph: G) -> Result<UnionTree<G>> {
        let config = self.validate()?;
        let segmentation =
            Segmentation::for_storage(config.kind, &self.segmentation, config.block_bits)?;
        UnionTree::from_config(config, graph, segmentation)
    }

    /// Builds a tree for one subdomain of a decomposed mesh.
    ///
    /// # Errors
    /// See [`build`](Self::build).
    pub fn build_parallel(self) -> Result<ParallelUnionTree<TreeGraph>> {
        self.build_parallel_with_graph(TreeGraph::new())
    }

    /// Like [`build_parallel`](Self::build_parallel) but writes into `graph`.
    ///
    /// # Errors
    /// See [`build`](Self::build).
    pub fn build_parallel_with_graph<G: OutputGraph>(
        self,
        graph: G,
    ) -> Result<ParallelUnionTree<G>> {
        self.build_with_graph(graph).map(ParallelUnionTree::new)
    }

    fn validate(&self) -> Result<TreeConfig> {
        let (lower, upper) = (self.lower_bound, self.upper_bound);
        if lower.is_nan() || upper.is_nan() || lower > upper {
            error!(lower, upper, "rejecting value filter");
            return Err(TreeError::InvalidBounds { lower, upper });
        }
        if !(MIN_BLOCK_BITS..=MAX_BLOCK_BITS).contains(&self.block_bits) {
            error!(bits = self.block_bits, "rejecting block size");
            return Err(TreeError::InvalidConfiguration {
                reason: "block size exponent must lie in 1..=30",
            });
        }
        Ok(TreeConfig {
            kind: self.kind,
            lower_bound: lower,
            upper_bound: upper,
            strategy: self.strategy,
            block_bits: self.block_bits,
        })
    }
}
