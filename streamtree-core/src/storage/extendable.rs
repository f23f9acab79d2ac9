//! Slot arena addressed by global id with free-slot reuse.

use std::collections::HashMap;

use crate::{error::StorageError, order::GlobalId};

use super::{BlockArray, BlockStore};

/// Local slot index inside an [`ExtendableArray`].
pub type Slot = u32;

/// Sentinel terminating the free chain.
pub const FREE_END: Slot = Slot::MAX;

#[derive(Debug)]
enum Entry<T> {
    Occupied { id: GlobalId, value: T },
    Vacant { next: Slot },
}

impl<T> Default for Entry<T> {
    fn default() -> Self {
        Self::Vacant { next: FREE_END }
    }
}

/// Block array of records keyed by global id.
///
/// Removing a record threads its slot onto a free list; inserting reuses a
/// free slot when one exists, otherwise appends, growing by one block when
/// the tail block is full. Slots of live records never move.
///
/// # Examples
/// ```
/// use streamtree_core::storage::ExtendableArray;
///
/// let mut array = ExtendableArray::new(4)?;
/// let a = array.insert(10, "a")?;
/// let b = array.insert(20, "b")?;
/// assert_eq!(array.remove(10), Some("a"));
/// let c = array.insert(30, "c")?;
/// assert_eq!(c, a);
/// assert_ne!(c, b);
/// assert_eq!(array.slot_of(30), Some(a));
/// # Ok::<(), streamtree_core::StorageError>(())
/// ```
#[derive(Debug)]
pub struct ExtendableArray<T> {
    slots: BlockArray<Entry<T>>,
    index: HashMap<GlobalId, Slot>,
    free_head: Slot,
    free_len: usize,
}

impl<T> ExtendableArray<T> {
    /// Creates an empty array with blocks of `1 << block_bits` slots.
    ///
    /// # Errors
    /// Returns [`StorageError::InvalidBlockBits`] for unsupported exponents.
    pub fn new(block_bits: u32) -> Result<Self, StorageError> {
        Ok(Self {
            slots: BlockArray::new(block_bits)?,
            index: HashMap::new(),
            free_head: FREE_END,
            free_len: 0,
        })
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` when no record is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of slots ever handed out, live or vacant.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots the allocated blocks can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Number of vacant slots waiting on the free list.
    #[must_use]
    #[rustfmt::skip]
    pub fn free_len(&self) -> usize { self.free_len }

    /// Returns the slot holding `id`, if it is live.
    #[must_use]
    pub fn slot_of(&self, id: GlobalId) -> Option<Slot> {
        self.index.get(&id).copied()
    }

    /// Returns `true` when `id` is live.
    #[must_use]
    pub fn contains(&self, id: GlobalId) -> bool {
        self.index.contains_key(&id)
    }

    /// Stores `value` under `id` and returns its slot.
    ///
    /// A record already stored under `id` is overwritten in place.
    ///
    /// # Errors
    /// Returns [`StorageError::CorruptFreeList`] when the free chain points
    /// at an occupied slot, [`StorageError::CapacityOverflow`] when slots are
    /// exhausted, and any allocation error raised while growing.
    pub fn insert(&mut self, id: GlobalId, value: T) -> Result<Slot, StorageError> {
        if let Some(slot) = self.slot_of(id) {
            if let Some(Entry::Occupied { value: current, .. }) = self.slots.get_mut(slot as usize)
            {
                *current = value;
                return Ok(slot);
            }
            return Err(StorageError::CorruptFreeList {
                slot,
                detail: "indexed slot is vacant",
            });
        }

        let slot = if self.free_head == FREE_END {
            let next = self.slots.len();
            let slot = Slot::try_from(next)
                .ok()
                .filter(|slot| *slot != FREE_END)
                .ok_or(StorageError::CapacityOverflow { requested: next })?;
            self.slots.push(Entry::Occupied { id, value })?;
            slot
        } else {
            let slot = self.free_head;
            let entry = self
                .slots
                .get_mut(slot as usize)
                .ok_or(StorageError::CorruptFreeList {
                    slot,
                    detail: "free chain points past the end",
                })?;
            let Entry::Vacant { next } = *entry else {
                return Err(StorageError::CorruptFreeList {
                    slot,
                    detail: "free chain points at an occupied slot",
                });
            };
            *entry = Entry::Occupied { id, value };
            self.free_head = next;
            self.free_len -= 1;
            slot
        };
        self.index.insert(id, slot);
        Ok(slot)
    }

    /// Removes the record stored under `id`, returning it.
    pub fn remove(&mut self, id: GlobalId) -> Option<T> {
        let slot = self.index.remove(&id)?;
        let entry = self.slots.get_mut(slot as usize)?;
        let previous = std::mem::replace(
            entry,
            Entry::Vacant {
                next: self.free_head,
            },
        );
        self.free_head = slot;
        self.free_len += 1;
        match previous {
            Entry::Occupied { value, .. } => Some(value),
            Entry::Vacant { .. } => None,
        }
    }

    /// Returns the record in `slot`, if it is live.
    #[must_use]
    pub fn get(&self, slot: Slot) -> Option<&T> {
        match self.slots.get(slot as usize)? {
            Entry::Occupied { value, .. } => Some(value),
            Entry::Vacant { .. } => None,
        }
    }

    /// Returns the record in `slot` mutably, if it is live.
    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut T> {
        match self.slots.get_mut(slot as usize)? {
            Entry::Occupied { value, .. } => Some(value),
            Entry::Vacant { .. } => None,
        }
    }

    /// Returns the global id stored in `slot`, if it is live.
    #[must_use]
    pub fn id_at(&self, slot: Slot) -> Option<GlobalId> {
        match self.slots.get(slot as usize)? {
            Entry::Occupied { id, .. } => Some(*id),
            Entry::Vacant { .. } => None,
        }
    }

    /// Iterates over live records as `(slot, id, record)` in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, GlobalId, &T)> + '_ {
        self.slots
            .iter()
            .zip(0..)
            .filter_map(|(entry, slot)| match entry {
                Entry::Occupied { id, value } => Some((slot, *id, value)),
                Entry::Vacant { .. } => None,
            })
    }

    /// Walks the free chain and checks it against the slot table.
    ///
    /// Every vacant slot must be reachable exactly once from the head, the
    /// chain must end at [`FREE_END`], and every occupied slot must be
    /// indexed under its own id.
    ///
    /// # Errors
    /// Returns [`StorageError::CorruptFreeList`] describing the first
    /// inconsistency found.
    pub fn validate_free_chain(&self) -> Result<(), StorageError> {
        let mut steps = 0_usize;
        let mut cursor = self.free_head;
        while cursor != FREE_END {
            if steps > self.slots.len() {
                return Err(StorageError::CorruptFreeList {
                    slot: cursor,
                    detail: "free chain contains a cycle",
                });
            }
            match self.slots.get(cursor as usize) {
                Some(Entry::Vacant { next }) => cursor = *next,
                Some(Entry::Occupied { .. }) => {
                    return Err(StorageError::CorruptFreeList {
                        slot: cursor,
                        detail: "free chain points at an occupied slot",
                    });
                }
                None => {
                    return Err(StorageError::CorruptFreeList {
                        slot: cursor,
                        detail: "free chain points past the end",
                    });
                }
            }
            steps += 1;
        }

        let mut vacant = 0_usize;
        for (entry, slot) in self.slots.iter().zip(0..) {
            match entry {
                Entry::Vacant { .. } => vacant += 1,
                Entry::Occupied { id, .. } => {
                    if self.index.get(id) != Some(&slot) {
                        return Err(StorageError::CorruptFreeList {
                            slot,
                            detail: "occupied slot is not indexed under its id",
                        });
                    }
                }
            }
        }
        if vacant != steps || steps != self.free_len {
            return Err(StorageError::CorruptFreeList {
                slot: self.free_head,
                detail: "vacant slots are unreachable from the free chain",
            });
        }
        Ok(())
    }
}
