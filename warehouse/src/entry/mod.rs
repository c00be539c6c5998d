//! Entity identity.
//!
//! An [`Entry`] is the stable handle of one entity: an [`Id`] naming a slot in the
//! [`EntryIndex`] arena plus the [`Generation`] that slot had when the handle was issued.
//!
//! # Generation Tracking
//!
//! Destroying an entity bumps its slot's generation before the id returns to the free pool.
//! Handles issued before that carry the old generation, so detecting a stale handle is a single
//! comparison against the arena:
//!
//! ```rust,ignore
//! let entry = index.new_entries(1, table, Row::new(0))?[0]; // Entry { id: 0, generation: 0 }
//! index.recycle_entries(&[entry.id()])?;
//! let reused = index.new_entries(1, table, Row::new(0))?[0]; // Entry { id: 0, generation: 1 }
//! assert!(!index.is_live(entry));
//! ```
//!
//! The pair survives save and load unchanged (see [`crate::snapshot`]), so ids stored inside
//! component data remain valid references after a restore.

mod index;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use index::EntryIndex;

/// The generation of an entry slot. Starts at `FIRST` and is incremented each time the slot is
/// recycled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(u32);

impl Generation {
    /// The first generation of an entry.
    pub const FIRST: Self = Self(0);

    /// Construct a generation from its raw value.
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the next generation from the current.
    #[inline]
    pub fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// The raw value.
    #[inline]
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// An entry identifier, an index into the entry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id(u32);

impl Id {
    /// Construct an id from its raw value.
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the index of this id in the entry arena.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// The raw value.
    #[inline]
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for Id {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// A stable entity handle.
///
/// An `(id, generation)` pair identifies at most one live entity. Handles are only issued by an
/// [`EntryIndex`]; everything else (rows, tables) is looked up from them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Entry {
    /// The arena slot.
    id: Id,

    /// The generation of the slot when the handle was issued.
    generation: Generation,
}

impl Entry {
    /// Construct an entry with an id and known generation.
    #[inline]
    pub(crate) const fn new(id: Id, generation: Generation) -> Self {
        Self { id, generation }
    }

    /// Get the id of this entry.
    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    /// Get the recycle generation of this entry.
    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Get the index of this entry in the arena.
    #[inline]
    pub fn index(&self) -> usize {
        self.id.index()
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entry({}v{})", self.id.0, self.generation.0)
    }
}
