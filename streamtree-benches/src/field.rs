//! Seeded scalar fields on triangulated grids.
//!
//! A [`GridField`] streams its mesh row by row: a vertex is finalized as
//! soon as the row below it has been connected, so the live front never
//! exceeds two rows.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use streamtree_core::{
    ContourError, ContourTreeMerger, FunctionValue, GlobalId, TreeError, UnionTree,
    graph::OutputGraph,
};

/// Errors that may occur during synthetic field generation.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum FieldError {
    /// The requested grid has no vertices.
    #[error("grid sides must be greater than zero")]
    EmptyGrid,
    /// The grid holds more vertices than ids can address.
    #[error("a {width}x{height} grid exceeds the id range")]
    TooLarge {
        /// Requested width.
        width: u64,
        /// Requested height.
        height: u64,
    },
}

/// Configuration for synthetic field generation.
#[derive(Clone, Debug)]
pub struct GridConfig {
    /// Vertices per row.
    pub width: u64,
    /// Number of rows.
    pub height: u64,
    /// RNG seed for reproducibility.
    pub seed: u64,
}

/// Receiver of a streamed mesh.
pub trait StreamSink {
    /// Error reported by the sink.
    type Error;

    /// Accepts a vertex.
    ///
    /// # Errors
    /// Propagates the sink's rejection.
    fn add_vertex(&mut self, id: GlobalId, value: FunctionValue) -> Result<(), Self::Error>;

    /// Accepts an edge between two accepted vertices.
    ///
    /// # Errors
    /// Propagates the sink's rejection.
    fn add_edge(&mut self, a: GlobalId, b: GlobalId) -> Result<(), Self::Error>;

    /// Declares that every edge of `id` has been delivered.
    ///
    /// # Errors
    /// Propagates the sink's rejection.
    fn finalize_vertex(&mut self, id: GlobalId) -> Result<(), Self::Error>;
}

impl<G: OutputGraph> StreamSink for UnionTree<G> {
    type Error = TreeError;

    fn add_vertex(&mut self, id: GlobalId, value: FunctionValue) -> Result<(), Self::Error> {
        Self::add_vertex(self, id, value)
    }

    fn add_edge(&mut self, a: GlobalId, b: GlobalId) -> Result<(), Self::Error> {
        Self::add_edge(self, a, b)
    }

    fn finalize_vertex(&mut self, id: GlobalId) -> Result<(), Self::Error> {
        Self::finalize_vertex(self, id, false)
    }
}

impl StreamSink for ContourTreeMerger {
    type Error = ContourError;

    fn add_vertex(&mut self, id: GlobalId, value: FunctionValue) -> Result<(), Self::Error> {
        Self::add_vertex(self, id, value)
    }

    fn add_edge(&mut self, a: GlobalId, b: GlobalId) -> Result<(), Self::Error> {
        Self::add_edge(self, a, b)
    }

    fn finalize_vertex(&mut self, id: GlobalId) -> Result<(), Self::Error> {
        Self::finalize_vertex(self, id, false)
    }
}

/// Uniform random values on a `width` x `height` grid split into triangles
/// along the down-right diagonal.
///
/// # Examples
///
/// ```
/// use streamtree_benches::field::{GridConfig, GridField};
/// use streamtree_core::{TreeKind, UnionTreeBuilder};
///
/// let field = GridField::generate(&GridConfig { width: 4, height: 3, seed: 7 })
///     .expect("valid config");
/// let mut tree = UnionTreeBuilder::new(TreeKind::Merge).build()?;
/// field.stream_into(&mut tree)?;
/// tree.cleanup()?;
/// assert!(tree.graph().node_count() >= 2);
/// # Ok::<(), streamtree_core::TreeError>(())
/// ```
#[derive(Clone, Debug)]
pub struct GridField {
    values: Vec<FunctionValue>,
    width: u64,
    height: u64,
}

impl GridField {
    /// Generates values eagerly from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::EmptyGrid`] when either side is zero and
    /// [`FieldError::TooLarge`] when the vertex count does not fit in memory.
    pub fn generate(config: &GridConfig) -> Result<Self, FieldError> {
        if config.width == 0 || config.height == 0 {
            return Err(FieldError::EmptyGrid);
        }
        let too_large = FieldError::TooLarge {
            width: config.width,
            height: config.height,
        };
        let total = config
            .width
            .checked_mul(config.height)
            .ok_or_else(|| too_large.clone())?;
        let total = usize::try_from(total).map_err(|_| too_large)?;

        let mut rng = SmallRng::seed_from_u64(config.seed);
        let values = (0..total).map(|_| rng.gen_range(0.0..1.0)).collect();
        Ok(Self {
            values,
            width: config.width,
            height: config.height,
        })
    }

    /// Number of vertices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when the field has no vertices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Streams the mesh into `sink` row by row.
    ///
    /// The sink is not cleaned up; callers decide whether to finish the
    /// stream.
    ///
    /// # Errors
    /// Propagates the first error reported by the sink.
    pub fn stream_into<S: StreamSink>(&self, sink: &mut S) -> Result<(), S::Error> {
        self.add_row(sink, 0)?;
        for y in 0..self.height {
            let has_below = y + 1 < self.height;
            if has_below {
                self.add_row(sink, y + 1)?;
            }
            for x in 0..self.width {
                let here = self.id(x, y);
                let has_right = x + 1 < self.width;
                if has_right {
                    sink.add_edge(here, self.id(x + 1, y))?;
                }
                if has_below {
                    sink.add_edge(here, self.id(x, y + 1))?;
                    if has_right {
                        sink.add_edge(here, self.id(x + 1, y + 1))?;
                    }
                }
            }
            for x in 0..self.width {
                sink.finalize_vertex(self.id(x, y))?;
            }
        }
        Ok(())
    }

    fn add_row<S: StreamSink>(&self, sink: &mut S, y: u64) -> Result<(), S::Error> {
        let start = self.id(0, y);
        let row = usize::try_from(start)
            .ok()
            .and_then(|offset| self.values.get(offset..))
            .unwrap_or_default();
        for (id, value) in (start..start + self.width).zip(row) {
            sink.add_vertex(id, *value)?;
        }
        Ok(())
    }

    const fn id(&self, x: u64, y: u64) -> GlobalId {
        y * self.width + x
    }
}
