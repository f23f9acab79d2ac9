//! Segmentation bookkeeping: which surviving node owns each input vertex.
//!
//! While streaming, every vertex records a cheap local guess. A vertex that
//! becomes a graph node owns itself; a vertex spliced out as regular records
//! the parent it hung from at that moment. Those guesses are corrected in one
//! pass by [`Segmentation::complete`] once the graph is final.

use std::{
    collections::{BTreeMap, HashMap},
    io,
    path::PathBuf,
};

use bytemuck::{Pod, Zeroable};
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::{
    error::{StorageError, define_error_codes},
    graph::{GraphError, GraphView, OutputGraph, TreeGraph},
    order::{FunctionValue, GNULL, GlobalId, TreeKind},
    storage::{BlockArray, BlockStore, OocArray},
};

/// Error raised by segmentation bookkeeping.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SegmentationError {
    /// The backing array failed.
    #[error("segmentation storage failed: {source}")]
    Storage {
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },
    /// The output graph rejected a split node.
    #[error("segmentation graph update failed: {source}")]
    Graph {
        /// Underlying graph error.
        #[source]
        source: GraphError,
    },
    /// The id cannot be addressed on this platform.
    #[error("vertex id {id} cannot be addressed by the segmentation index")]
    IdOutOfRange {
        /// The rejected id.
        id: GlobalId,
    },
    /// Owner ids were already remapped to dense indices.
    #[error("segmentation was compacted and no longer holds global ids")]
    Compacted,
    /// An owner chain looped back on itself.
    #[error("owner chain starting at vertex {id} contains a cycle")]
    OwnerCycle {
        /// Vertex whose chain looped.
        id: GlobalId,
    },
    /// A segment size cap of zero was requested.
    #[error("segment size cap must be positive")]
    InvalidSplitSize,
    /// An owner expected in the graph has no arc to split.
    #[error("segment owner {id} is not a node of the graph")]
    MissingOwner {
        /// The owner that was not found.
        id: GlobalId,
    },
    /// The export sink failed.
    #[error("segmentation export failed: {source}")]
    Sink {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

define_error_codes! {
    /// Stable codes describing [`SegmentationError`] variants.
    enum SegmentationErrorCode for SegmentationError {
        /// The backing array failed.
        Storage => Storage { .. } => "SEGMENTATION_STORAGE",
        /// The output graph rejected a split node.
        Graph => Graph { .. } => "SEGMENTATION_GRAPH",
        /// The id cannot be addressed on this platform.
        IdOutOfRange => IdOutOfRange { .. } => "SEGMENTATION_ID_OUT_OF_RANGE",
        /// Owner ids were already remapped to dense indices.
        Compacted => Compacted => "SEGMENTATION_COMPACTED",
        /// An owner chain looped back on itself.
        OwnerCycle => OwnerCycle { .. } => "SEGMENTATION_OWNER_CYCLE",
        /// A segment size cap of zero was requested.
        InvalidSplitSize => InvalidSplitSize => "SEGMENTATION_INVALID_SPLIT_SIZE",
        /// An owner expected in the graph has no arc to split.
        MissingOwner => MissingOwner { .. } => "SEGMENTATION_MISSING_OWNER",
        /// The export sink failed.
        Sink => Sink { .. } => "SEGMENTATION_SINK",
    }
}

impl From<StorageError> for SegmentationError {
    fn from(source: StorageError) -> Self {
        Self::Storage { source }
    }
}

impl From<GraphError> for SegmentationError {
    fn from(source: GraphError) -> Self {
        Self::Graph { source }
    }
}

/// Where segmentation entries are stored.
///
/// # Examples
/// ```
/// use streamtree_core::{SegmentationStorage, TreeKind, UnionTreeBuilder};
///
/// let tree = UnionTreeBuilder::new(TreeKind::Merge)
///     .with_segmentation(SegmentationStorage::InMemory)
///     .build()?;
/// assert!(tree.segmentation().is_some());
/// # Ok::<(), streamtree_core::TreeError>(())
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum SegmentationStorage {
    /// Do not track segmentation.
    #[default]
    None,
    /// Keep entries in heap blocks.
    InMemory,
    /// Keep entries in memory-mapped scratch files.
    OutOfCore {
        /// Directory for block files; see
        /// [`resolve_scratch_dir`](crate::storage::resolve_scratch_dir).
        scratch_dir: Option<PathBuf>,
    },
}

/// One segmentation record: the current owner of a vertex and its value.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SegmentEntry {
    /// Owning node, or [`GNULL`].
    pub owner: GlobalId,
    /// Function value of the vertex.
    pub value: FunctionValue,
}

impl SegmentEntry {
    /// Entry for a vertex that has not been seen.
    pub const UNKNOWN: Self = Self {
        owner: GNULL,
        value: 0.0,
    };
}

impl Default for SegmentEntry {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

enum EntryStore {
    Memory(BlockArray<SegmentEntry>),
    OutOfCore(OocArray<SegmentEntry>),
}

impl EntryStore {
    fn store(&self) -> &dyn BlockStore<SegmentEntry> {
        match self {
            Self::Memory(array) => array,
            Self::OutOfCore(array) => array,
        }
    }

    fn store_mut(&mut self) -> &mut dyn BlockStore<SegmentEntry> {
        match self {
            Self::Memory(array) => array,
            Self::OutOfCore(array) => array,
        }
    }
}

/// Offsets, counts and flat member list describing every segment.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SegmentExport {
    /// Owner of each segment, ascending.
    pub owners: Vec<GlobalId>,
    /// Start of each segment in [`members`](Self::members).
    pub offsets: Vec<u64>,
    /// Number of members of each segment.
    pub counts: Vec<u64>,
    /// Vertex ids grouped by segment, ascending within a segment.
    pub members: Vec<GlobalId>,
}

/// External writer receiving an exported segmentation.
pub trait SegmentationSink {
    /// Writes one complete segmentation.
    ///
    /// # Errors
    /// Returns the writer's I/O error.
    fn write_segments(&mut self, segments: &SegmentExport) -> io::Result<()>;
}

/// Per-vertex owner index for one tree.
pub struct Segmentation {
    kind: TreeKind,
    entries: EntryStore,
    compacted: bool,
}

impl std::fmt::Debug for Segmentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segmentation")
            .field("kind", &self.kind)
            .field("len", &self.len())
            .field("compacted", &self.compacted)
            .finish_non_exhaustive()
    }
}

impl Segmentation {
    /// Creates a segmentation for `storage`, or `None` when disabled.
    ///
    /// # Errors
    /// Returns a [`StorageError`] when the backing array cannot be created.
    pub fn for_storage(
        kind: TreeKind,
        storage: &SegmentationStorage,
        block_bits: u32,
    ) -> Result<Option<Self>, StorageError> {
        let entries = match storage {
            SegmentationStorage::None => return Ok(None),
            SegmentationStorage::InMemory => EntryStore::Memory(BlockArray::new(block_bits)?),
            SegmentationStorage::OutOfCore { scratch_dir } => {
                EntryStore::OutOfCore(OocArray::new(block_bits, scratch_dir.as_deref())?)
            }
        };
        Ok(Some(Self {
            kind,
            entries,
            compacted: false,
        }))
    }

    /// Creates an in-memory segmentation.
    ///
    /// # Errors
    /// Returns [`StorageError::InvalidBlockBits`] for unsupported exponents.
    pub fn in_memory(kind: TreeKind, block_bits: u32) -> Result<Self, StorageError> {
        Ok(Self {
            kind,
            entries: EntryStore::Memory(BlockArray::new(block_bits)?),
            compacted: false,
        })
    }

    /// Tree kind whose height order is used when walking arcs.
    #[must_use]
    #[rustfmt::skip]
    pub const fn kind(&self) -> TreeKind { self.kind }

    /// Number of addressable ids (one past the largest id recorded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.store().len()
    }

    /// Returns `true` when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once [`compactify`](Self::compactify) has run.
    #[must_use]
    #[rustfmt::skip]
    pub const fn is_compacted(&self) -> bool { self.compacted }

    /// Returns the entry for `id`, if it lies within the index.
    #[must_use]
    pub fn entry(&self, id: GlobalId) -> Option<SegmentEntry> {
        let index = usize::try_from(id).ok()?;
        self.entries.store().get(index).copied()
    }

    /// Returns the owner of `id`, or `None` when it is unknown.
    #[must_use]
    pub fn owner(&self, id: GlobalId) -> Option<GlobalId> {
        self.entry(id)
            .map(|entry| entry.owner)
            .filter(|owner| *owner != GNULL)
    }

    /// Records `owner` as the current owner of vertex `id`.
    ///
    /// # Errors
    /// Returns [`SegmentationError::Compacted`] after compaction and a
    /// storage error when the index cannot grow.
    pub fn record(
        &mut self,
        id: GlobalId,
        owner: GlobalId,
        value: FunctionValue,
    ) -> Result<(), SegmentationError> {
        if self.compacted {
            return Err(SegmentationError::Compacted);
        }
        let index = usize::try_from(id).map_err(|_| SegmentationError::IdOutOfRange { id })?;
        self.ensure_len(index)?;
        self.set(index, SegmentEntry { owner, value });
        Ok(())
    }

    fn ensure_len(&mut self, index: usize) -> Result<(), SegmentationError> {
        let store = self.entries.store_mut();
        let old_len = store.len();
        if index < old_len {
            return Ok(());
        }
        let new_len = index
            .checked_add(1)
            .ok_or(StorageError::CapacityOverflow { requested: index })?;
        store.resize(new_len)?;
        // Out-of-core blocks start zeroed, and id 0 is a valid owner.
        for fresh in old_len..new_len {
            if let Some(entry) = store.get_mut(fresh) {
                *entry = SegmentEntry::UNKNOWN;
            }
        }
        Ok(())
    }

    fn set(&mut self, index: usize, entry: SegmentEntry) {
        if let Some(slot) = self.entries.store_mut().get_mut(index) {
            *slot = entry;
        }
    }

    fn set_owner(&mut self, id: GlobalId, owner: GlobalId) {
        if let Ok(index) = usize::try_from(id) {
            if let Some(slot) = self.entries.store_mut().get_mut(index) {
                slot.owner = owner;
            }
        }
    }

    fn ids(&self) -> impl Iterator<Item = GlobalId> + use<> {
        0..u64::try_from(self.len()).unwrap_or(u64::MAX)
    }

    /// Replaces every local guess with the upper node of the arc that
    /// contains the vertex.
    ///
    /// Each vertex follows its owner chain upward to a node of `graph` (or
    /// to an unknown owner), then the recorded path is walked back down,
    /// descending arcs while the next node is still above the vertex.
    ///
    /// # Errors
    /// Returns [`SegmentationError::Compacted`] after compaction and
    /// [`SegmentationError::OwnerCycle`] when an owner chain loops.
    #[instrument(level = "debug", skip_all, name = "segmentation.complete")]
    pub fn complete<G: GraphView>(&mut self, graph: &G) -> Result<(), SegmentationError> {
        if self.compacted {
            return Err(SegmentationError::Compacted);
        }
        let limit = self.len();
        let mut path = Vec::new();
        for id in self.ids() {
            let Some(entry) = self.entry(id) else {
                continue;
            };
            if entry.owner == GNULL || (entry.owner == id && graph.node_value(id).is_some()) {
                continue;
            }

            path.clear();
            path.push(id);
            let mut current = entry.owner;
            let resolved = loop {
                if current == GNULL {
                    break None;
                }
                if graph.node_value(current).is_some() {
                    break Some(current);
                }
                let next = self.entry(current).map_or(GNULL, |entry| entry.owner);
                if next == current {
                    debug!(vertex = current, "owner left the graph; segment unknown");
                    path.push(current);
                    break None;
                }
                path.push(current);
                if path.len() > limit {
                    error!(id, "owner chain does not terminate");
                    return Err(SegmentationError::OwnerCycle { id });
                }
                current = next;
            };

            let Some(mut node) = resolved else {
                for vertex in path.drain(..) {
                    self.set_owner(vertex, GNULL);
                }
                continue;
            };
            while let Some(vertex) = path.pop() {
                let value = self.entry(vertex).map_or(0.0, |entry| entry.value);
                node = self.descend(graph, node, vertex, value);
                self.set_owner(vertex, node);
            }
        }
        Ok(())
    }

    fn descend<G: GraphView>(
        &self,
        graph: &G,
        mut node: GlobalId,
        vertex: GlobalId,
        value: FunctionValue,
    ) -> GlobalId {
        let key = self.kind.key(vertex, value);
        while let Some(child) = graph.child_of(node) {
            let Some(child_value) = graph.node_value(child) else {
                break;
            };
            if self.kind.key(child, child_value) <= key {
                break;
            }
            node = child;
        }
        node
    }

    /// Remaps owner ids to the dense indices of `graph`'s active-node map.
    ///
    /// Owners missing from the map become [`GNULL`]. Running it again is a
    /// no-op.
    ///
    /// # Errors
    /// Currently infallible for in-range ids; the `Result` leaves room for
    /// storage failures of future backends.
    #[instrument(level = "debug", skip_all, name = "segmentation.compactify")]
    pub fn compactify<G: OutputGraph>(&mut self, graph: &G) -> Result<(), SegmentationError> {
        if self.compacted {
            return Ok(());
        }
        let mut map = HashMap::new();
        graph.create_active_map(&mut map);
        for id in self.ids() {
            let Some(entry) = self.entry(id) else {
                continue;
            };
            if entry.owner == GNULL {
                continue;
            }
            let dense = map
                .get(&entry.owner)
                .and_then(|index| GlobalId::try_from(*index).ok())
                .unwrap_or(GNULL);
            self.set_owner(id, dense);
        }
        self.compacted = true;
        Ok(())
    }

    /// Caps every segment at `max_size` vertices by inserting new nodes
    /// along over-large arcs.
    ///
    /// Members of a segment are ordered from highest to lowest; every
    /// `max_size`-th member is promoted to a node on the owner's arc and
    /// takes over the members below it. Returns the number of nodes
    /// inserted. Call after [`complete`](Self::complete).
    ///
    /// # Errors
    /// Returns [`SegmentationError::InvalidSplitSize`] for a zero cap,
    /// [`SegmentationError::Compacted`] after compaction and a graph error
    /// when a node cannot be inserted.
    pub fn split_by_vertices(
        &mut self,
        graph: &mut TreeGraph,
        max_size: usize,
    ) -> Result<usize, SegmentationError> {
        if max_size == 0 {
            return Err(SegmentationError::InvalidSplitSize);
        }
        if self.compacted {
            return Err(SegmentationError::Compacted);
        }

        let mut segments: BTreeMap<GlobalId, Vec<(GlobalId, FunctionValue)>> = BTreeMap::new();
        for id in self.ids() {
            if let Some(entry) = self.entry(id).filter(|entry| entry.owner != GNULL) {
                segments
                    .entry(entry.owner)
                    .or_default()
                    .push((id, entry.value));
            }
        }

        let mut inserted = 0;
        for (owner, mut members) in segments {
            if members.len() <= max_size {
                continue;
            }
            if !graph.contains(owner) {
                return Err(SegmentationError::MissingOwner { id: owner });
            }
            let kind = self.kind;
            members.sort_by(|a, b| kind.key(b.0, b.1).cmp(&kind.key(a.0, a.1)));

            let mut head = owner;
            for (position, (vertex, value)) in members.into_iter().enumerate() {
                let starts_chunk = position > 0 && position % max_size == 0;
                if starts_chunk && vertex != owner && !graph.contains(vertex) {
                    match graph.child(head) {
                        Some(below) => graph.insert_on_arc(head, below, vertex, value)?,
                        None => {
                            let head_value = graph
                                .node(head)
                                .map(crate::graph::GraphNode::value)
                                .ok_or(SegmentationError::MissingOwner { id: head })?;
                            graph.add_node(vertex, value)?;
                            graph.add_arc(head, head_value, vertex, value)?;
                        }
                    }
                    graph.finalize_node(vertex, false)?;
                    head = vertex;
                    inserted += 1;
                }
                self.set_owner(vertex, head);
            }
        }
        debug!(inserted, max_size, "segments split");
        Ok(inserted)
    }

    /// Groups vertices by owner.
    #[must_use]
    pub fn export(&self) -> SegmentExport {
        let mut segments: BTreeMap<GlobalId, Vec<GlobalId>> = BTreeMap::new();
        for id in self.ids() {
            if let Some(owner) = self.owner(id) {
                segments.entry(owner).or_default().push(id);
            }
        }
        let mut export = SegmentExport::default();
        for (owner, members) in segments {
            export.owners.push(owner);
            export
                .offsets
                .push(u64::try_from(export.members.len()).unwrap_or(u64::MAX));
            export
                .counts
                .push(u64::try_from(members.len()).unwrap_or(u64::MAX));
            export.members.extend(members);
        }
        export
    }

    /// Exports the segmentation into `sink`.
    ///
    /// # Errors
    /// Returns [`SegmentationError::Sink`] when the writer fails.
    pub fn export_to<S: SegmentationSink + ?Sized>(
        &self,
        sink: &mut S,
    ) -> Result<(), SegmentationError> {
        sink.write_segments(&self.export())
            .map_err(|source| SegmentationError::Sink { source })
    }
}
