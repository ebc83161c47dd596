//! Entity handles and the generational free-list pool behind them.
//!
//! An [`Entity`] is a 32-bit handle packing a generation counter in the high
//! [`ENTITY_GENERATION_BITS`](crate::limits::ENTITY_GENERATION_BITS) bits and
//! an index in the remaining low bits. Index 0 is reserved, so the
//! all-zeroes handle is the invalid (falsy) value and `Entity::default()` is
//! never a live entity.
//!
//! The pool recycles released indices FIFO, bumping the index's generation
//! (masked to the configured bit width) so an outstanding handle to the old
//! occupant stops comparing equal. The pool never retroactively invalidates
//! handles; staleness detection is the caller's generation comparison.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::limits::{ENTITY_GENERATION_BITS, ENTITY_INDEX_BITS};

const INDEX_MASK: u32 = (1 << ENTITY_INDEX_BITS) - 1;
const GENERATION_MASK: u32 = (1 << ENTITY_GENERATION_BITS) - 1;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A generational entity handle.
///
/// Layout: `[generation: ENTITY_GENERATION_BITS | index: ENTITY_INDEX_BITS]`
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(u32);

impl Entity {
    /// The falsy handle; never identifies a live entity.
    pub const INVALID: Self = Self(0);

    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        debug_assert!(index <= INDEX_MASK);
        debug_assert!(generation <= GENERATION_MASK);
        Self(generation << ENTITY_INDEX_BITS | index)
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.0 >> ENTITY_INDEX_BITS
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.index() != 0
    }

    /// Raw `u32` representation.
    #[inline]
    pub fn to_raw(self) -> u32 {
        self.0
    }

    /// Reconstruct from a raw `u32`.
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// HandlePool
// ---------------------------------------------------------------------------

/// Generational free-list allocator for [`Entity`] handles.
#[derive(Debug)]
pub struct HandlePool {
    // Per-index generation; slot 0 exists but is never issued.
    generations: Vec<u32>,
    free: VecDeque<u32>,
    next_index: u32,
}

impl Default for HandlePool {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlePool {
    pub fn new() -> Self {
        Self {
            generations: vec![0],
            free: VecDeque::new(),
            next_index: 1,
        }
    }

    /// Pops a recycled index or extends the index space. Returns the falsy
    /// handle when the index space is exhausted.
    pub fn acquire(&mut self) -> Entity {
        if let Some(index) = self.free.pop_front() {
            return Entity::new(index, self.generations[index as usize]);
        }
        self.acquire_fresh()
    }

    /// Acquires `count` handles with guaranteed index-contiguity: the result
    /// is the first handle and the remaining `count - 1` follow at
    /// consecutive indices, all at generation 0 of fresh index space.
    /// Falsy when the range would not fit; nothing is allocated in that
    /// case.
    pub fn acquire_contiguous(&mut self, count: u32) -> Entity {
        debug_assert!(count > 0);
        if count == 1 {
            return self.acquire();
        }
        if INDEX_MASK - self.next_index + 1 < count {
            return Entity::INVALID;
        }
        let first = self.next_index;
        self.next_index += count;
        self.generations.resize(self.next_index as usize, 0);
        Entity::new(first, 0)
    }

    /// Returns the index to the free list and advances its generation so
    /// outstanding handles become stale. Releasing a handle that is not the
    /// current occupant of its index is a contract violation.
    pub fn release(&mut self, entity: Entity) {
        let index = entity.index();
        debug_assert!(index != 0 && (index as usize) < self.generations.len());
        debug_assert!(self.generations[index as usize] == entity.generation());
        let slot = &mut self.generations[index as usize];
        *slot = slot.wrapping_add(1) & GENERATION_MASK;
        self.free.push_back(index);
    }

    /// Whether `entity` is the current occupant of its index. A released
    /// index stays "current" for its *next* generation, so this alone is
    /// not a liveness check; the registry's location map is.
    pub fn is_current(&self, entity: Entity) -> bool {
        let index = entity.index() as usize;
        index != 0
            && index < self.generations.len()
            && self.generations[index] == entity.generation()
    }

    fn acquire_fresh(&mut self) -> Entity {
        if self.next_index > INDEX_MASK {
            return Entity::INVALID;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.generations.push(0);
        Entity::new(index, 0)
    }
}
